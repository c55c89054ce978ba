//! Spark Metrics - frame timing and event counters
//!
//! Everything here vanishes when the `metrics` feature is off: the stubs below
//! keep the same API and do nothing.
//!
//! # Usage
//!
//! ```ignore
//! use spark_metrics::{Counter, FrameTimer};
//!
//! let mut timer = FrameTimer::new(120);
//! timer.record(frame_time);
//! let mut counters = Counter::new();
//! counters.increment("steps", 2);
//! ```

#[cfg(feature = "metrics")]
mod counter;
#[cfg(feature = "metrics")]
mod frame_timer;
#[cfg(feature = "metrics")]
mod ring_buffer;

#[cfg(feature = "metrics")]
pub use counter::Counter;
#[cfg(feature = "metrics")]
pub use frame_timer::FrameTimer;
#[cfg(feature = "metrics")]
pub use ring_buffer::RingBuffer;

// ============================================================================
// No-op stubs when metrics disabled
// ============================================================================

#[cfg(not(feature = "metrics"))]
pub struct FrameTimer;

#[cfg(not(feature = "metrics"))]
impl FrameTimer {
    pub fn new(_capacity: usize) -> Self { Self }
    pub fn record(&mut self, _frame_time: std::time::Duration) {}
    pub fn fps(&self) -> f64 { 0.0 }
    pub fn frame_time_ms(&self) -> f64 { 0.0 }
    pub fn frame_time_range_ms(&self) -> (f64, f64) { (0.0, 0.0) }
}

#[cfg(not(feature = "metrics"))]
pub struct RingBuffer<T>(std::marker::PhantomData<T>);

#[cfg(not(feature = "metrics"))]
impl<T> RingBuffer<T> {
    pub fn new(_capacity: usize) -> Self { Self(std::marker::PhantomData) }
    pub fn push(&mut self, _value: T) {}
}

#[cfg(not(feature = "metrics"))]
#[derive(Default)]
pub struct Counter;

#[cfg(not(feature = "metrics"))]
impl Counter {
    pub fn new() -> Self { Self }
    pub fn increment(&mut self, _name: &'static str, _value: u64) {}
    pub fn get(&self, _name: &'static str) -> u64 { 0 }
    pub fn reset_all(&mut self) {}
}

#[cfg(test)]
mod tests {
    #[test]
    fn api_is_available_in_every_configuration() {
        let mut timer = super::FrameTimer::new(60);
        timer.record(std::time::Duration::from_millis(16));
        let _ = timer.fps();

        let mut buffer = super::RingBuffer::<std::time::Duration>::new(10);
        buffer.push(std::time::Duration::ZERO);

        let mut counter = super::Counter::new();
        counter.increment("steps", 1);
        counter.reset_all();
        assert_eq!(counter.get("steps"), 0);
    }
}
