//! Rolling frame-time statistics

use super::ring_buffer::RingBuffer;
use std::time::Duration;

/// Tracks the last `capacity` wall-clock frame times.
pub struct FrameTimer {
    frame_times: RingBuffer<Duration>,
}

impl FrameTimer {
    pub fn new(capacity: usize) -> Self {
        Self {
            frame_times: RingBuffer::new(capacity),
        }
    }

    /// Record a measured frame time (the same value fed to the scheduler).
    pub fn record(&mut self, frame_time: Duration) {
        self.frame_times.push(frame_time);
    }

    pub fn fps(&self) -> f64 {
        let avg = self.frame_times.average();
        if avg.as_secs_f64() > 0.0 {
            1.0 / avg.as_secs_f64()
        } else {
            0.0
        }
    }

    pub fn frame_time_ms(&self) -> f64 {
        self.frame_times.average().as_secs_f64() * 1000.0
    }

    pub fn frame_time_range_ms(&self) -> (f64, f64) {
        let (min, max) = self.frame_times.min_max();
        (min.as_secs_f64() * 1000.0, max.as_secs_f64() * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_from_recorded_frames() {
        let mut timer = FrameTimer::new(4);
        assert_eq!(timer.fps(), 0.0);

        for _ in 0..4 {
            timer.record(Duration::from_millis(10));
        }
        assert!((timer.fps() - 100.0).abs() < 1e-9);
        assert!((timer.frame_time_ms() - 10.0).abs() < 1e-9);

        timer.record(Duration::from_millis(30));
        let (min, max) = timer.frame_time_range_ms();
        assert!((min - 10.0).abs() < 1e-9);
        assert!((max - 30.0).abs() < 1e-9);
    }
}
