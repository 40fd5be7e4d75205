// surfrec/src/pacing.rs
//
//! Paces frames from a decoder so they are shown at the rate their timestamps dictate.

use log::{info, warn};
use std::thread;
use std::time::{Duration, Instant};

const ONE_MILLION: i64 = 1_000_000;
// Longest single sleep, so a paced thread notices stop requests.
const MAX_SLEEP_USEC: i64 = 500_000;
// Closer to the deadline than this, sleeping would overshoot.
const SLEEP_SLACK_USEC: i64 = 100;
const MAX_FRAME_DELTA_USEC: i64 = 10 * ONE_MILLION;

/// Hooks a frame producer calls around each frame it renders.
pub trait FrameCallback {
    /// Called before the frame with presentation time `presentation_time_us` is rendered. May
    /// block.
    fn pre_render(&mut self, presentation_time_us: i64);

    fn post_render(&mut self);

    /// The producer jumped back to the start of its stream.
    fn loop_reset(&mut self);
}

pub trait Clock {
    /// Microseconds on a monotonic timeline.
    fn now_usec(&self) -> i64;

    fn sleep_usec(&mut self, duration_usec: i64);
}

pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> MonotonicClock {
        MonotonicClock { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> MonotonicClock {
        MonotonicClock::new()
    }
}

impl Clock for MonotonicClock {
    fn now_usec(&self) -> i64 {
        self.origin.elapsed().as_micros() as i64
    }

    fn sleep_usec(&mut self, duration_usec: i64) {
        if duration_usec > 0 {
            thread::sleep(Duration::from_micros(duration_usec as u64));
        }
    }
}

/// Sleeps in `pre_render` until the frame is due.
///
/// The first frame is shown immediately and anchors the timeline. Later frames are due one
/// timestamp delta (or one fixed frame duration) after the previous one. Deltas are measured
/// against the computed schedule rather than the wake-up time, so pacing does not drift.
pub struct SpeedControl<C = MonotonicClock> {
    clock: C,
    fixed_frame_duration_us: Option<i64>,
    prev_present_us: i64,
    prev_monotonic_us: Option<i64>,
    loop_reset: bool,
}

impl SpeedControl<MonotonicClock> {
    pub fn new() -> SpeedControl<MonotonicClock> {
        SpeedControl::with_clock(MonotonicClock::new())
    }
}

impl Default for SpeedControl<MonotonicClock> {
    fn default() -> SpeedControl<MonotonicClock> {
        SpeedControl::new()
    }
}

impl<C: Clock> SpeedControl<C> {
    pub fn with_clock(clock: C) -> SpeedControl<C> {
        SpeedControl {
            clock,
            fixed_frame_duration_us: None,
            prev_present_us: 0,
            prev_monotonic_us: None,
            loop_reset: false,
        }
    }

    /// Ignores timestamps and shows frames at `fps`. A rate of 0 goes back to timestamps.
    pub fn set_fixed_playback_rate(&mut self, fps: u32) {
        self.fixed_frame_duration_us = match fps {
            0 => None,
            fps => Some(ONE_MILLION / fps as i64),
        };
    }

    #[inline]
    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn frame_delta(&self, presentation_time_us: i64) -> i64 {
        let delta = self
            .fixed_frame_duration_us
            .unwrap_or(presentation_time_us - self.prev_present_us);
        if delta < 0 {
            warn!("video timestamps went backwards by {} us", -delta);
            0
        } else if delta == 0 {
            info!("current and previous frame share timestamp {}", presentation_time_us);
            0
        } else if delta > MAX_FRAME_DELTA_USEC {
            info!("inter-frame pause was {} s, capping at 1 s", delta / ONE_MILLION);
            ONE_MILLION
        } else {
            delta
        }
    }
}

impl<C: Clock> FrameCallback for SpeedControl<C> {
    fn pre_render(&mut self, presentation_time_us: i64) {
        let prev_monotonic_us = match self.prev_monotonic_us {
            Some(prev) => prev,
            None => {
                self.prev_monotonic_us = Some(self.clock.now_usec());
                self.prev_present_us = presentation_time_us;
                return;
            }
        };

        if self.loop_reset {
            // No duration is known for the last frame before the loop; assume 30 fps.
            self.prev_present_us = presentation_time_us - ONE_MILLION / 30;
            self.loop_reset = false;
        }

        let delta = self.frame_delta(presentation_time_us);
        let desired_us = prev_monotonic_us + delta;
        let mut now_us = self.clock.now_usec();
        while now_us < desired_us - SLEEP_SLACK_USEC {
            self.clock.sleep_usec((desired_us - now_us).min(MAX_SLEEP_USEC));
            now_us = self.clock.now_usec();
        }

        self.prev_monotonic_us = Some(prev_monotonic_us + delta);
        self.prev_present_us += delta;
    }

    fn post_render(&mut self) {}

    fn loop_reset(&mut self) {
        self.loop_reset = true;
    }
}

#[cfg(test)]
mod test {
    use super::{Clock, FrameCallback, SpeedControl};

    #[derive(Default)]
    struct FakeClock {
        now: i64,
        sleeps: Vec<i64>,
    }

    impl Clock for FakeClock {
        fn now_usec(&self) -> i64 {
            self.now
        }

        fn sleep_usec(&mut self, duration_usec: i64) {
            self.sleeps.push(duration_usec);
            self.now += duration_usec;
        }
    }

    fn pacer(start: i64) -> SpeedControl<FakeClock> {
        SpeedControl::with_clock(FakeClock { now: start, sleeps: vec![] })
    }

    #[test]
    fn first_frame_is_not_delayed() {
        let mut pacing = pacer(5_000);
        pacing.pre_render(123_456);
        assert!(pacing.clock().sleeps.is_empty());
    }

    #[test]
    fn frames_follow_their_timestamps() {
        let mut pacing = pacer(0);
        pacing.pre_render(0);
        pacing.pre_render(33_333);
        assert_eq!(pacing.clock().sleeps, vec![33_333]);
        pacing.pre_render(66_666);
        assert_eq!(pacing.clock().now, 66_666);
    }

    #[test]
    fn schedule_does_not_drift_after_a_late_frame() {
        let mut pacing = pacer(0);
        pacing.pre_render(0);
        // Rendering took longer than a frame.
        pacing.clock.now = 50_000;
        pacing.pre_render(33_333);
        assert!(pacing.clock().sleeps.is_empty());
        pacing.pre_render(66_666);
        assert_eq!(pacing.clock().sleeps, vec![16_666]);
    }

    #[test]
    fn long_gaps_are_capped_and_slept_in_chunks() {
        let mut pacing = pacer(0);
        pacing.pre_render(0);
        pacing.pre_render(20_000_000);
        assert_eq!(pacing.clock().sleeps, vec![500_000, 500_000]);
    }

    #[test]
    fn backwards_timestamps_do_not_sleep() {
        let mut pacing = pacer(0);
        pacing.pre_render(100_000);
        pacing.pre_render(50_000);
        pacing.pre_render(50_000);
        assert!(pacing.clock().sleeps.is_empty());
    }

    #[test]
    fn loop_reset_assumes_one_frame_at_30_fps() {
        let mut pacing = pacer(0);
        pacing.pre_render(0);
        pacing.pre_render(40_000);
        pacing.loop_reset();
        pacing.pre_render(0);
        assert_eq!(pacing.clock().now, 40_000 + 33_333);
    }

    #[test]
    fn fixed_rate_ignores_timestamps() {
        let mut pacing = pacer(0);
        pacing.set_fixed_playback_rate(10);
        pacing.pre_render(0);
        pacing.pre_render(1);
        pacing.pre_render(2);
        assert_eq!(pacing.clock().now, 200_000);
    }

    #[test]
    fn deadlines_within_the_slack_are_not_slept() {
        let mut pacing = pacer(0);
        pacing.pre_render(0);
        pacing.clock.now = 33_300;
        pacing.pre_render(33_333);
        assert!(pacing.clock().sleeps.is_empty());
    }
}
