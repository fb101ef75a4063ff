// Frame-rate measurement for the window title

use std::time::{Duration, Instant};

/// Averages the frame rate over fixed batches of presented frames.
#[derive(Debug)]
pub struct FpsCounter {
    sample_frames: u32,
    frames: u32,
    batch_start: Instant,
}

impl FpsCounter {
    pub fn new(sample_frames: u32, now: Instant) -> Self {
        Self {
            sample_frames: sample_frames.max(1),
            frames: 0,
            batch_start: now,
        }
    }

    /// Count one presented frame. Returns the average rate when a batch completes.
    pub fn record_frame(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;
        if self.frames < self.sample_frames {
            return None;
        }

        let elapsed = now.saturating_duration_since(self.batch_start);
        let fps = rate(self.frames, elapsed);
        self.frames = 0;
        self.batch_start = now;
        Some(fps)
    }
}

fn rate(frames: u32, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds > 0.0 {
        f64::from(frames) / seconds
    } else {
        f64::INFINITY
    }
}

/// Whole frames only; a partial frame is dropped, not rounded up.
pub fn title_with_fps(title: &str, fps: f64) -> String {
    format!("{} {:.0} FPS", title, fps.floor())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_once_per_batch() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(4, start);

        for i in 1..4 {
            assert!(counter.record_frame(start + Duration::from_millis(i * 10)).is_none());
        }
        let fps = counter.record_frame(start + Duration::from_secs(2)).unwrap();
        assert!((fps - 2.0).abs() < 1e-9);
    }

    #[test]
    fn next_batch_starts_where_the_last_ended() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(2, start);
        counter.record_frame(start);
        counter.record_frame(start + Duration::from_secs(1));

        assert!(counter.record_frame(start + Duration::from_millis(1100)).is_none());
        let fps = counter.record_frame(start + Duration::from_millis(1500)).unwrap();
        assert!((fps - 4.0).abs() < 1e-9);
    }

    #[test]
    fn zero_sample_size_reports_every_frame() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(0, start);
        assert!(counter.record_frame(start + Duration::from_millis(500)).is_some());
    }

    #[test]
    fn title_is_formatted() {
        assert_eq!(title_with_fps("vulkan-learning", 60.0), "vulkan-learning 60 FPS");
        assert_eq!(title_with_fps("vulkan-learning", 59.6), "vulkan-learning 59 FPS");
    }
}
