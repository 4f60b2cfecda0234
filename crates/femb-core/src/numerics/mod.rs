pub mod lsq;

pub use lsq::{LeastSquaresError, WeightedLeastSquares, solve_weighted_least_squares};

use serde::{Deserialize, Serialize};

fn kahan_add(sum: &mut f64, correction: &mut f64, value: f64) {
    let corrected = value - *correction;
    let next = *sum + corrected;
    *correction = (next - *sum) - corrected;
    *sum = next;
}

pub fn stable_sum(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut correction = 0.0;

    for &value in values {
        kahan_add(&mut sum, &mut correction, value);
    }

    sum
}

pub fn stable_weighted_sum(values: &[f64], weights: &[f64]) -> Option<f64> {
    if values.len() != weights.len() {
        return None;
    }

    let mut sum = 0.0;
    let mut correction = 0.0;
    for (&value, &weight) in values.iter().zip(weights) {
        kahan_add(&mut sum, &mut correction, value * weight);
    }

    Some(sum)
}

pub fn stable_weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    if values.len() != weights.len() {
        return None;
    }

    let total_weight = stable_sum(weights);
    if total_weight == 0.0 {
        return None;
    }

    let weighted_sum = stable_weighted_sum(values, weights)?;
    Some(weighted_sum / total_weight)
}

/// Indices ordering `values` ascending, ties broken by index.
pub fn deterministic_argsort(values: &[f64]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    indices.sort_unstable_by(|lhs, rhs| {
        values[*lhs]
            .total_cmp(&values[*rhs])
            .then_with(|| lhs.cmp(rhs))
    });
    indices
}

/// Sample count, mean and population RMS about the mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeanRms {
    pub count: usize,
    pub mean: f64,
    pub rms: f64,
}

impl MeanRms {
    /// `None` for an empty sample.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let count = values.len();
        let mean = stable_sum(values) / count as f64;
        let squares: Vec<f64> = values.iter().map(|value| (value - mean).powi(2)).collect();
        let variance = stable_sum(&squares) / count as f64;

        Some(Self {
            count,
            mean,
            rms: variance.max(0.0).sqrt(),
        })
    }

    /// Combine summaries weighted by their sample counts.
    pub fn combine<'a>(summaries: impl IntoIterator<Item = &'a MeanRms>) -> Option<Self> {
        let summaries: Vec<&MeanRms> = summaries
            .into_iter()
            .filter(|summary| summary.count > 0)
            .collect();
        let count: usize = summaries.iter().map(|summary| summary.count).sum();
        if count == 0 {
            return None;
        }

        let weights: Vec<f64> = summaries.iter().map(|summary| summary.count as f64).collect();
        let means: Vec<f64> = summaries.iter().map(|summary| summary.mean).collect();
        let second_moments: Vec<f64> = summaries
            .iter()
            .map(|summary| summary.rms * summary.rms + summary.mean * summary.mean)
            .collect();

        let mean = stable_weighted_mean(&means, &weights)?;
        let second_moment = stable_weighted_mean(&second_moments, &weights)?;
        let variance = (second_moment - mean * mean).max(0.0);

        Some(Self {
            count,
            mean,
            rms: variance.sqrt(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{
        MeanRms, deterministic_argsort, stable_sum, stable_weighted_mean, stable_weighted_sum,
    };

    #[test]
    fn stable_sum_reduces_order_loss_for_large_and_small_values() {
        let input = [1.0e16, 1.0, -1.0e16];
        assert_eq!(stable_sum(&input), 0.0);
    }

    #[test]
    fn stable_weighted_sum_validates_shape() {
        assert_eq!(stable_weighted_sum(&[1.0, 2.0], &[0.25]), None);
        let weighted = stable_weighted_sum(&[2.0, 4.0], &[0.5, 0.5]).expect("sum");
        assert!((weighted - 3.0).abs() < 1.0e-12);
    }

    #[test]
    fn stable_weighted_mean_requires_non_zero_total_weight() {
        assert_eq!(stable_weighted_mean(&[1.0, 2.0], &[0.0, 0.0]), None);
        let mean = stable_weighted_mean(&[10.0, 20.0, 40.0], &[1.0, 2.0, 1.0]).expect("mean");
        assert!((mean - 22.5).abs() < 1.0e-12);
    }

    #[test]
    fn deterministic_argsort_orders_by_value_then_index() {
        let values = [2.0, 1.0, f64::NAN, 1.0, -0.0, 0.0];
        let order = deterministic_argsort(&values);
        assert_eq!(order, vec![4, 5, 1, 3, 0, 2]);
    }

    #[test]
    fn mean_rms_is_undefined_for_empty_samples() {
        assert_eq!(MeanRms::from_values(&[]), None);
        let single = MeanRms::from_values(&[100.0]).expect("single value");
        assert_eq!(single.mean, 100.0);
        assert_eq!(single.rms, 0.0);
    }

    #[test]
    fn combined_summaries_match_pooled_statistics() {
        let first = [1.0, 2.0, 3.0, 4.0];
        let second = [10.0, 12.0];
        let pooled: Vec<f64> = first.iter().chain(second.iter()).copied().collect();

        let combined = MeanRms::combine(&[
            MeanRms::from_values(&first).expect("first"),
            MeanRms::from_values(&second).expect("second"),
        ])
        .expect("combined");
        let direct = MeanRms::from_values(&pooled).expect("pooled");

        assert_eq!(combined.count, 6);
        assert!((combined.mean - direct.mean).abs() < 1.0e-12);
        assert!((combined.rms - direct.rms).abs() < 1.0e-12);
        assert_eq!(MeanRms::combine(std::iter::empty()), None);
    }
}
