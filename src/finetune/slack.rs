//! Error slack: widen all four limits of a stick at once.
//!
//! A gesture starts from a baseline (the four limits and the stick's
//! histogram as they were when the slider was grabbed). Every slider
//! position is applied to that baseline, never to the previous position,
//! so dragging back and forth is lossless.

use super::params::{ParamId, ParameterSet};
use crate::histogram::PolarHistogram;
use crate::input::Stick;

/// Raw-unit adjustment for a slider position in [0, 100].
pub fn slack_total(position: f64, max_adjustment: f64) -> f64 {
    position.clamp(0.0, 100.0) / 100.0 * max_adjustment
}

#[derive(Clone, Debug)]
pub struct SlackBaseline {
    limits: [(ParamId, u32); 4],
    histogram: PolarHistogram,
}

impl SlackBaseline {
    pub fn capture(stick: Stick, params: &ParameterSet, histogram: &PolarHistogram) -> Self {
        Self {
            limits: ParamId::limits_of(stick).map(|id| (id, params.get(id))),
            histogram: histogram.clone(),
        }
    }

    /// Write baseline ± `total` into the limits (truncated to whole units)
    /// and grow the preview histogram by `total * scale`.
    pub fn apply(
        &self,
        total: f64,
        scale: f64,
        max: u32,
        params: &mut ParameterSet,
        histogram: &mut PolarHistogram,
    ) {
        for (id, base) in self.limits {
            let value = (f64::from(base) + id.slack_sign() * total).clamp(0.0, f64::from(max));
            params.set_clamped(id, value.trunc() as i64, max);
        }

        *histogram = self.histogram.clone();
        histogram.map_radii(|_, r| r + total * scale);
        histogram.trim_to_square();
    }

    pub fn restore(&self, params: &mut ParameterSet, max: u32) {
        for (id, base) in self.limits {
            params.set_clamped(id, i64::from(base), max);
        }
    }
}

/// Per-stick slack state between gestures.
#[derive(Clone, Debug, Default)]
pub struct SlackState {
    pub baseline: Option<SlackBaseline>,
    /// A released gesture can be reset.
    pub used: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finetune::params::PARAM_COUNT;

    #[test]
    fn test_half_slider_is_87_5() {
        assert_eq!(slack_total(50.0, 175.0), 87.5);
        assert_eq!(slack_total(150.0, 175.0), 175.0);
        assert_eq!(slack_total(-3.0, 175.0), 0.0);
    }

    #[test]
    fn test_apply_truncates_and_signs() {
        let mut params = ParameterSet::new([1000; PARAM_COUNT]);
        let mut hist = PolarHistogram::new();
        let base = SlackBaseline::capture(Stick::Left, &params, &hist);

        base.apply(87.5, 0.00085, 65535, &mut params, &mut hist);
        assert_eq!(params.get(ParamId::LL), 1087);
        assert_eq!(params.get(ParamId::LT), 1087);
        assert_eq!(params.get(ParamId::LR), 912);
        assert_eq!(params.get(ParamId::LB), 912);
        // The other stick is untouched.
        assert_eq!(params.get(ParamId::RL), 1000);
        assert!(hist.values().iter().all(|r| (r - 87.5 * 0.00085).abs() < 1e-12));
    }

    #[test]
    fn test_apply_is_relative_to_baseline() {
        let mut params = ParameterSet::new([1000; PARAM_COUNT]);
        let mut hist = PolarHistogram::new();
        let base = SlackBaseline::capture(Stick::Right, &params, &hist);

        base.apply(175.0, 0.00085, 65535, &mut params, &mut hist);
        base.apply(17.5, 0.00085, 65535, &mut params, &mut hist);
        assert_eq!(params.get(ParamId::RL), 1017);
        assert_eq!(params.get(ParamId::RR), 982);

        base.restore(&mut params, 65535);
        assert_eq!(params, ParameterSet::new([1000; PARAM_COUNT]));
    }

    #[test]
    fn test_preview_is_trimmed() {
        let mut params = ParameterSet::new([1000; PARAM_COUNT]);
        let mut hist = PolarHistogram::new();
        hist.map_radii(|_, _| 1.0);
        let base = SlackBaseline::capture(Stick::Left, &params, &hist);

        base.apply(175.0, 0.00085, 65535, &mut params, &mut hist);
        // On the x axis the square clips back to exactly 1.
        assert!((hist.values()[0] - 1.0).abs() < 1e-12);
    }
}
