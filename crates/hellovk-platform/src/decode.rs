// SPDX-License-Identifier: CEPL-1.0
use hellovk_render::{DecodeError, DecodedImage, ImageDecoder};

/// `image`-backed decoder; any input is expanded to RGBA8.
#[derive(Clone, Copy, Debug, Default)]
pub struct PngDecoder;

impl ImageDecoder for PngDecoder {
    fn decode_rgba(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?
            .to_rgba8();
        let (width, height) = img.dimensions();
        DecodedImage::new(width, height, img.into_raw())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

    use super::*;

    const WHITE: [u8; 4] = [255, 255, 255, 255];
    const BLACK: [u8; 4] = [0, 0, 0, 255];

    fn png_bytes(img: impl Into<image::DynamicImage>) -> Vec<u8> {
        let mut out = Vec::new();
        img.into()
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    /// CPU model of the texture sampler: bilinear filter, REPEAT addressing.
    fn sample_linear_repeat(img: &DecodedImage, u: f32, v: f32) -> [f32; 4] {
        let (w, h) = (img.width as i64, img.height as i64);
        let x = u * w as f32 - 0.5;
        let y = v * h as f32 - 0.5;
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (x - x0, y - y0);
        let (x0, y0) = (x0 as i64, y0 as i64);
        let at = |i: i64, j: i64| {
            img.texel(i.rem_euclid(w) as u32, j.rem_euclid(h) as u32)
                .unwrap()
                .map(f32::from)
        };
        let mut out = [0.0; 4];
        for (c, o) in out.iter_mut().enumerate() {
            let top = at(x0, y0)[c] * (1.0 - fx) + at(x0 + 1, y0)[c] * fx;
            let bottom = at(x0, y0 + 1)[c] * (1.0 - fx) + at(x0 + 1, y0 + 1)[c] * fx;
            *o = top * (1.0 - fy) + bottom * fy;
        }
        out
    }

    fn near(sampled: [f32; 4], want: [u8; 4]) -> bool {
        sampled
            .iter()
            .zip(want)
            .all(|(s, w)| (s - f32::from(w)).abs() <= 1.0)
    }

    fn checkerboard(side: u32, cell: u32) -> RgbaImage {
        RgbaImage::from_fn(side, side, |x, y| {
            if (x / cell + y / cell) % 2 == 0 {
                Rgba(WHITE)
            } else {
                Rgba(BLACK)
            }
        })
    }

    #[test]
    fn checkerboard_texels_at_vertex_uvs() {
        // 3x3 cells of 2px: the wrapped neighbours of every corner share its cell color
        let decoded = PngDecoder
            .decode_rgba(&png_bytes(checkerboard(6, 2)))
            .unwrap();
        assert_eq!((decoded.width, decoded.height), (6, 6));

        // texcoords of the three triangle vertices
        assert!(near(sample_linear_repeat(&decoded, 0.5, 1.0), BLACK));
        assert!(near(sample_linear_repeat(&decoded, 0.0, 0.0), WHITE));
        assert!(near(sample_linear_repeat(&decoded, 1.0, 0.0), WHITE));
    }

    #[test]
    fn repeat_filtering_blends_across_the_wrap() {
        let decoded = PngDecoder
            .decode_rgba(&png_bytes(checkerboard(2, 1)))
            .unwrap();
        // a corner of a 2x2 board averages all four texels
        let corner = sample_linear_repeat(&decoded, 0.0, 0.0);
        assert!(near(corner, [128, 128, 128, 255]));
        // texel centers come back unfiltered
        assert!(near(sample_linear_repeat(&decoded, 0.25, 0.25), WHITE));
        assert!(near(sample_linear_repeat(&decoded, 0.75, 0.25), BLACK));
    }

    #[test]
    fn rgb_input_is_forced_to_four_channels() {
        let rgb = RgbImage::from_pixel(3, 1, Rgb([10, 20, 30]));
        let decoded = PngDecoder.decode_rgba(&png_bytes(rgb)).unwrap();
        assert_eq!(decoded.pixels.len(), 3 * 4);
        assert_eq!(decoded.texel(2, 0), Some([10, 20, 30, 255]));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = PngDecoder.decode_rgba(b"definitely not a png").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }
}
