//! Nearest-neighbor sample rate conversion.
//!
//! Rate conversion never interpolates. Each source frame either produces no
//! output, one converted output frame, or (when upsampling) that frame plus a
//! duplicate of it. Which of the three happens is decided by a running
//! fractional counter of output clock ticks that lives for the whole session,
//! so output pace stays locked to the ratio of the two clocks.
//!
//! When upsampling, every source frame is counted twice as if the input had
//! been pre-replicated, and the output is then sampled from that doubled
//! stream. This caps upsampling at 2x.

/// Sampling interval between two clocks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingPlan {
    interval: f64,
    replicating: bool,
}

impl SamplingPlan {
    /// Plans conversion from `source_rate` to `output_rate`.
    ///
    /// Both rates must be non-zero.
    #[must_use]
    pub fn new(source_rate: u32, output_rate: u32) -> Self {
        let source = f64::from(source_rate);
        let output = f64::from(output_rate);

        if source_rate >= output_rate {
            Self {
                interval: source / output,
                replicating: false,
            }
        } else {
            Self {
                interval: source * 2.0 / output,
                replicating: true,
            }
        }
    }

    /// Virtual ticks consumed by one output frame.
    #[must_use]
    pub fn interval(&self) -> f64 {
        self.interval
    }

    /// Returns `true` when the output rate is above the source rate.
    #[must_use]
    pub fn replicating(&self) -> bool {
        self.replicating
    }

    /// Returns `true` when the output clock runs faster than this plan can
    /// feed it, i.e. above twice the source rate.
    #[must_use]
    pub fn under_produces(&self) -> bool {
        self.interval < 1.0
    }

    /// Output frames per second actually produced from `source_rate` input.
    #[must_use]
    pub fn produced_rate(&self, source_rate: u32) -> f64 {
        let per_frame = (self.step() / self.interval).min(2.0);
        f64::from(source_rate) * per_frame
    }

    /// Virtual ticks contributed by one source frame.
    #[must_use]
    pub fn step(&self) -> f64 {
        if self.replicating {
            2.0
        } else {
            1.0
        }
    }
}

/// Output frames owed for a single source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
    /// The source frame is skipped.
    None,
    /// The source frame is converted once.
    Once,
    /// The source frame is converted and the result duplicated.
    Twice,
}

impl Emission {
    /// Number of output frames this emission stands for.
    #[must_use]
    pub const fn frames(self) -> usize {
        match self {
            Self::None => 0,
            Self::Once => 1,
            Self::Twice => 2,
        }
    }
}

/// Running accumulator of output clock ticks since the last emitted frame.
///
/// One counter belongs to one capture session. It carries its remainder across
/// packets and transfers and is only reset when a new session starts.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SamplingCounter {
    ticks: f64,
}

impl SamplingCounter {
    /// Creates a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current accumulated ticks.
    #[must_use]
    pub fn ticks(&self) -> f64 {
        self.ticks
    }

    /// Advances by one source frame and returns what it owes the output.
    pub fn advance(&mut self, plan: &SamplingPlan) -> Emission {
        self.ticks += plan.step();

        let owed = (self.ticks / plan.interval).floor();
        if owed < 1.0 {
            return Emission::None;
        }
        self.ticks -= plan.interval;
        if owed < 2.0 {
            return Emission::Once;
        }
        self.ticks -= plan.interval;
        Emission::Twice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitted(plan: &SamplingPlan, counter: &mut SamplingCounter, frames: usize) -> usize {
        (0..frames).map(|_| counter.advance(plan).frames()).sum()
    }

    #[test]
    fn test_plan_same_rate() {
        let plan = SamplingPlan::new(44_100, 44_100);
        assert_eq!(plan.interval(), 1.0);
        assert!(!plan.replicating());
    }

    #[test]
    fn test_plan_upsample_doubles_interval() {
        let plan = SamplingPlan::new(44_100, 48_000);
        assert!(plan.replicating());
        assert!((plan.interval() - 1.8375).abs() < 1e-12);
        assert_eq!(plan.step(), 2.0);
    }

    #[test]
    fn test_plan_downsample() {
        let plan = SamplingPlan::new(44_100, 22_050);
        assert!(!plan.replicating());
        assert_eq!(plan.interval(), 2.0);
    }

    #[test]
    fn test_one_to_one_emits_once_per_frame() {
        let plan = SamplingPlan::new(44_100, 44_100);
        let mut counter = SamplingCounter::new();
        for _ in 0..1000 {
            assert_eq!(counter.advance(&plan), Emission::Once);
            assert!(counter.ticks() <= plan.interval());
        }
    }

    #[test]
    fn test_two_to_one_upsample_emits_twice_without_drift() {
        let plan = SamplingPlan::new(24_000, 48_000);
        let mut counter = SamplingCounter::new();
        for _ in 0..10_000 {
            assert_eq!(counter.advance(&plan), Emission::Twice);
        }
        assert!(counter.ticks().abs() <= plan.interval());
    }

    #[test]
    fn test_one_to_two_downsample_emits_every_other_frame() {
        let plan = SamplingPlan::new(44_100, 22_050);
        let mut counter = SamplingCounter::new();
        let pattern: Vec<_> = (0..6).map(|_| counter.advance(&plan)).collect();
        assert_eq!(
            pattern,
            vec![
                Emission::None,
                Emission::Once,
                Emission::None,
                Emission::Once,
                Emission::None,
                Emission::Once
            ]
        );
    }

    #[test]
    fn test_44k1_to_48k_ratio() {
        let plan = SamplingPlan::new(44_100, 48_000);
        let mut counter = SamplingCounter::new();
        let frames = emitted(&plan, &mut counter, 441);
        assert!((479..=481).contains(&frames), "got {frames}");
    }

    #[test]
    fn test_48k_to_44k1_ratio_over_long_run() {
        let plan = SamplingPlan::new(48_000, 44_100);
        let mut counter = SamplingCounter::new();
        // 10 seconds split into uneven packets must stay within one frame.
        let mut total = 0;
        for packet in [7usize, 193, 480, 1, 4799].iter().cycle().take(884) {
            total += emitted(&plan, &mut counter, *packet);
        }
        let source_frames: usize = [7usize, 193, 480, 1, 4799].iter().cycle().take(884).sum();
        let expected = source_frames as f64 * 44_100.0 / 48_000.0;
        assert!((total as f64 - expected).abs() <= 1.0);
    }

    #[test]
    fn test_above_two_x_under_produces() {
        let plan = SamplingPlan::new(44_100, 96_000);
        assert!(plan.under_produces());
        assert_eq!(plan.produced_rate(44_100), 88_200.0);

        let mut counter = SamplingCounter::new();
        assert_eq!(emitted(&plan, &mut counter, 44_100), 88_200);
        // The shortfall piles up in the counter instead of reaching the output.
        assert!(counter.ticks() > 7_000.0);
    }

    #[test]
    fn test_up_to_two_x_keeps_pace() {
        for output_rate in [22_050, 44_100, 48_000, 88_200] {
            let plan = SamplingPlan::new(44_100, output_rate);
            assert!(!plan.under_produces(), "{output_rate}");
            assert!((plan.produced_rate(44_100) - f64::from(output_rate)).abs() < 1e-6);
        }
    }
}
