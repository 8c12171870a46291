// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::{Duration, Instant};

/// Installs the global subscriber. `RUST_LOG` wins; otherwise `info`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

/// Counts presented frames and reports once per window.
pub struct FpsCounter {
    window: Duration,
    frames: u32,
    since: Instant,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self::with_window(now, Duration::from_secs(1))
    }

    pub fn with_window(now: Instant, window: Duration) -> Self {
        Self {
            window,
            frames: 0,
            since: now,
        }
    }

    pub fn frame(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    /// Frames counted since the last report, if the window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<u32> {
        if now.saturating_duration_since(self.since) < self.window {
            return None;
        }
        let n = self.frames;
        self.frames = 0;
        self.since = now;
        tracing::debug!(fps = n, "fps window elapsed");
        Some(n)
    }

    pub fn reset(&mut self, now: Instant) {
        self.frames = 0;
        self.since = now;
    }
}
