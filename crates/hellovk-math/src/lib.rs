// SPDX-License-Identifier: CEPL-1.0
//! Pre-rotation math for presenting on surfaces the compositor does not rotate.
pub use glam::{Mat4, Vec3, Vec4};

/// Rotation the presentation engine applies to swapchain images.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SurfaceRotation {
    #[default]
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl SurfaceRotation {
    pub fn degrees(self) -> f32 {
        match self {
            SurfaceRotation::Identity => 0.0,
            SurfaceRotation::Rotate90 => 90.0,
            SurfaceRotation::Rotate180 => 180.0,
            SurfaceRotation::Rotate270 => 270.0,
        }
    }

    /// True when the native extent is the current extent with its axes swapped.
    pub fn swaps_axes(self) -> bool {
        matches!(self, SurfaceRotation::Rotate90 | SurfaceRotation::Rotate270)
    }
}

/// `R(pre) * S(1, ratio, 1) * R(spin)` around +Z.
///
/// `ratio` is width / height of the identity extent. The spin angle is owned by
/// the caller so the result depends only on its arguments.
pub fn prerotation_matrix(rotation: SurfaceRotation, ratio: f32, spin_degrees: f32) -> Mat4 {
    let pre = Mat4::from_rotation_z(rotation.degrees().to_radians());
    let scale = Mat4::from_scale(Vec3::new(1.0, ratio, 1.0));
    let spin = Mat4::from_rotation_z(spin_degrees.to_radians());
    pre * scale * spin
}

/// Monotonic spin state, one step per rendered frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpinAngle {
    degrees: f32,
    step: f32,
}

impl Default for SpinAngle {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl SpinAngle {
    pub fn new(step: f32) -> Self {
        Self { degrees: 0.0, step }
    }

    #[cfg(test)]
    fn degrees(&self) -> f32 {
        self.degrees
    }

    /// Advances by one step and returns the new angle, kept in [0, 360).
    pub fn advance(&mut self) -> f32 {
        self.degrees = (self.degrees + self.step).rem_euclid(360.0);
        self.degrees
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn identity_square_no_spin_is_identity() {
        let m = prerotation_matrix(SurfaceRotation::Identity, 1.0, 0.0);
        assert!(m.abs_diff_eq(Mat4::IDENTITY, EPS));
    }

    #[test]
    fn ratio_scales_only_y() {
        let m = prerotation_matrix(SurfaceRotation::Identity, 2.0, 0.0);
        let p = m * Vec4::new(0.5, 0.5, 0.0, 1.0);
        assert!(p.abs_diff_eq(Vec4::new(0.5, 1.0, 0.0, 1.0), EPS));
    }

    #[test]
    fn rotate90_maps_x_onto_y() {
        let m = prerotation_matrix(SurfaceRotation::Rotate90, 1.0, 0.0);
        let p = m * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert!(p.abs_diff_eq(Vec4::new(0.0, 1.0, 0.0, 1.0), EPS));
    }

    #[test]
    fn spin_is_applied_before_scale() {
        // spin 90 takes x to y, then the ratio stretches y
        let m = prerotation_matrix(SurfaceRotation::Identity, 3.0, 90.0);
        let p = m * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert!(p.abs_diff_eq(Vec4::new(0.0, 3.0, 0.0, 1.0), EPS));
    }

    #[test]
    fn only_quarter_turns_swap_axes() {
        assert!(!SurfaceRotation::Identity.swaps_axes());
        assert!(SurfaceRotation::Rotate90.swaps_axes());
        assert!(!SurfaceRotation::Rotate180.swaps_axes());
        assert!(SurfaceRotation::Rotate270.swaps_axes());
    }

    #[test]
    fn spin_advances_one_degree_and_wraps() {
        let mut spin = SpinAngle::default();
        assert_eq!(spin.advance(), 1.0);
        assert_eq!(spin.advance(), 2.0);
        let mut spin = SpinAngle::new(90.0);
        for _ in 0..4 {
            spin.advance();
        }
        assert_eq!(spin.degrees(), 0.0);
    }
}
