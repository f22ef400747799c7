use std::thread;
use std::time::{Duration, Instant};

/// Caps the frame rate by sleeping off whatever is left of each frame's time
/// slice.
#[derive(Clone, Debug, Default)]
pub struct FpsLimiter {
    last_frame: Option<Instant>,
}

impl FpsLimiter {
    /// Returns how long it slept.
    pub fn wait(&mut self, max_fps: u32) -> Duration {
        let now = Instant::now();

        let slept = match self.last_frame {
            Some(last_frame) => {
                let remaining = remaining(now - last_frame, max_fps);

                if !remaining.is_zero() {
                    thread::sleep(remaining);
                }

                remaining
            }
            None => Duration::ZERO,
        };

        self.last_frame = Some(now + slept);

        slept
    }
}

/// Returns what's left of a frame that took `elapsed` so far; zero
/// `max_fps` disables the cap.
fn remaining(elapsed: Duration, max_fps: u32) -> Duration {
    if max_fps == 0 {
        return Duration::ZERO;
    }

    Duration::from_secs(1)
        .checked_div(max_fps)
        .and_then(|budget| budget.checked_sub(elapsed))
        .unwrap_or_default()
}
