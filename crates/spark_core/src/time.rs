//! Deterministic time system
//!
//! Fixed simulation step driven by an accumulator of wall-clock frame time.
//! The simulation clock only ever moves in whole steps, so it is tracked as a
//! tick count plus the exact `Duration` those ticks add up to.

use std::time::{Duration, Instant};

/// Default simulation step (100 Hz)
pub const DEFAULT_STEP: Duration = Duration::from_millis(10);

/// Upper bound on the wall-clock time a single frame may feed the accumulator.
///
/// A debugger pause or an OS stall would otherwise queue a burst of catch-up
/// steps large enough to stall the following frames as well.
pub const MAX_FRAME_TIME: Duration = Duration::from_millis(250);

/// Returned by the per-step callback to keep stepping or bail out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepControl {
    Continue,
    Quit,
}

/// The step about to be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Tick number once this step has run (first step is 1)
    pub tick: u64,
    /// Simulation clock once this step has run
    pub time: Duration,
}

/// Outcome of one wall-clock frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Simulation steps taken this frame
    pub steps: u32,
    /// Stepping was interrupted by a quit request
    pub quit: bool,
}

impl FrameReport {
    /// A frame renders only when it advanced the simulation and is not shutting down.
    pub fn render_due(&self) -> bool {
        self.steps > 0 && !self.quit
    }
}

/// Fixed-timestep scheduler state.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    step: Duration,
    accumulator: Duration,
    tick_count: u64,
    accumulated_time: Duration,
}

impl FixedTimestep {
    /// Create a scheduler with the given step. The step must be non-zero.
    pub fn new(step: Duration) -> Self {
        assert!(!step.is_zero(), "simulation step must be non-zero");
        Self {
            step,
            accumulator: Duration::ZERO,
            tick_count: 0,
            accumulated_time: Duration::ZERO,
        }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Simulation clock `t`
    pub fn total_time(&self) -> Duration {
        self.accumulated_time
    }

    /// Simulation clock in seconds
    pub fn seconds(&self) -> f64 {
        self.accumulated_time.as_secs_f64()
    }

    /// Wall time carried over to the next frame
    pub fn accumulator(&self) -> Duration {
        self.accumulator
    }

    /// Feed one wall-clock frame into the scheduler.
    ///
    /// `on_step` is called once per whole step that fits in the accumulator,
    /// before the clock moves. Returning [`StepControl::Quit`] stops stepping
    /// immediately and that step is not taken.
    pub fn advance<F>(&mut self, frame_time: Duration, mut on_step: F) -> FrameReport
    where
        F: FnMut(Step) -> StepControl,
    {
        self.accumulator += frame_time.min(MAX_FRAME_TIME);

        let mut report = FrameReport::default();
        while self.accumulator >= self.step {
            let next = Step {
                tick: self.tick_count + 1,
                time: self.accumulated_time + self.step,
            };
            if on_step(next) == StepControl::Quit {
                report.quit = true;
                break;
            }

            self.advance_tick();
            self.accumulator -= self.step;
            report.steps += 1;
        }

        report
    }

    fn advance_tick(&mut self) {
        self.tick_count += 1;
        self.accumulated_time += self.step;
    }
}

impl Default for FixedTimestep {
    fn default() -> Self {
        Self::new(DEFAULT_STEP)
    }
}

/// Wall-clock frame time source.
pub struct FrameClock {
    last: Instant,
}

impl FrameClock {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Time since the previous call (or since construction).
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let frame_time = now.saturating_duration_since(self.last);
        self.last = now;
        frame_time
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn run(scheduler: &mut FixedTimestep, frame_time: Duration) -> FrameReport {
        scheduler.advance(frame_time, |_| StepControl::Continue)
    }

    #[test]
    fn steps_match_whole_multiples_of_the_step() {
        let step = ms(10);
        let frame_times = [1, 3, 7, 9, 10, 11, 19, 20, 33, 99, 100, 250];

        for carry in [0u64, 2, 5, 9] {
            for &frame in &frame_times {
                let mut scheduler = FixedTimestep::new(step);
                // Prime the accumulator without taking a step.
                run(&mut scheduler, ms(carry));
                let before = scheduler.accumulator();
                assert_eq!(before, ms(carry));

                let report = run(&mut scheduler, ms(frame));
                let expected = (carry + frame) / 10;
                assert_eq!(report.steps as u64, expected, "carry={carry} frame={frame}");
                assert_eq!(
                    scheduler.accumulator(),
                    before + ms(frame) - step * report.steps
                );
                assert!(scheduler.accumulator() < step);
            }
        }
    }

    #[test]
    fn frame_time_is_clamped() {
        let mut long = FixedTimestep::new(ms(10));
        let mut clamped = FixedTimestep::new(ms(10));

        let a = run(&mut long, Duration::from_secs(30));
        let b = run(&mut clamped, MAX_FRAME_TIME);

        assert_eq!(a.steps, 25);
        assert_eq!(a, b);
        assert_eq!(long.accumulator(), clamped.accumulator());
        assert_eq!(long.total_time(), MAX_FRAME_TIME);
    }

    #[test]
    fn clock_moves_in_whole_steps_and_never_regresses() {
        let step = ms(10);
        let mut scheduler = FixedTimestep::new(step);
        let mut previous = Duration::ZERO;

        for frame in [0u64, 4, 4, 4, 17, 1, 300, 8, 2, 0, 61] {
            run(&mut scheduler, ms(frame));
            let now = scheduler.total_time();
            assert!(now >= previous);
            assert_eq!(now.as_nanos() % step.as_nanos(), 0);
            assert_eq!(now, step * scheduler.tick_count() as u32);
            previous = now;
        }
    }

    #[test]
    fn zero_step_frame_is_not_render_due() {
        let mut scheduler = FixedTimestep::new(ms(10));
        let report = run(&mut scheduler, ms(4));
        assert_eq!(report.steps, 0);
        assert!(!report.render_due());

        let report = run(&mut scheduler, ms(6));
        assert_eq!(report.steps, 1);
        assert!(report.render_due());
    }

    #[test]
    fn three_frame_scenario() {
        let mut scheduler = FixedTimestep::new(ms(10));
        let mut total = 0;
        for frame in [Duration::from_micros(5_000), Duration::from_micros(5_000), ms(20)] {
            total += run(&mut scheduler, frame).steps;
        }
        assert_eq!(total, 3);
        assert_eq!(scheduler.accumulator(), Duration::ZERO);
        assert_eq!(scheduler.tick_count(), 3);
    }

    #[test]
    fn quit_interrupts_stepping() {
        let mut scheduler = FixedTimestep::new(ms(10));
        let mut calls = 0;
        let report = scheduler.advance(ms(50), |step| {
            calls += 1;
            if step.tick == 3 {
                StepControl::Quit
            } else {
                StepControl::Continue
            }
        });

        assert_eq!(calls, 3);
        assert_eq!(report.steps, 2);
        assert!(report.quit);
        assert!(!report.render_due());
        assert_eq!(scheduler.tick_count(), 2);
        assert_eq!(scheduler.accumulator(), ms(30));
    }

    #[test]
    fn step_reports_clock_after_the_step() {
        let mut scheduler = FixedTimestep::new(ms(10));
        let mut seen = Vec::new();
        scheduler.advance(ms(30), |step| {
            seen.push((step.tick, step.time));
            StepControl::Continue
        });
        assert_eq!(seen, vec![(1, ms(10)), (2, ms(20)), (3, ms(30))]);
    }
}
