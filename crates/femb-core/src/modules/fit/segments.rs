//! First-pass saturating-linear fit.
//!
//! With the points ordered along the response, a saturating model splits them
//! into a low-saturated prefix, a linear middle and a high-saturated suffix. For
//! a fixed split the model is linear in (gain, low, high), so every admissible
//! split is solved exactly by weighted least squares and the best penalized
//! score wins. The charge offset of the dead-zone model is not linear and is
//! found by a grid scan with golden-section refinement on top of that search.

use super::model::{Estimate, ResponseModelKind, charge_transform, clip};
use crate::numerics::{deterministic_argsort, solve_weighted_least_squares};
use faer::Mat;

const GOLDEN_ITERATIONS: usize = 60;

#[derive(Debug, Clone, PartialEq)]
pub(super) struct SegmentedFit {
    pub gain: Estimate,
    pub low: Option<Estimate>,
    pub high: Option<Estimate>,
    /// Input indices assigned to the saturated segments.
    pub low_points: Vec<usize>,
    pub high_points: Vec<usize>,
    pub chi_square: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct OffsetFit {
    pub offset: Estimate,
    pub fit: SegmentedFit,
}

pub(super) struct SegmentInput<'a> {
    pub xs: &'a [f64],
    pub ys: &'a [f64],
    pub weights: &'a [f64],
    pub kind: ResponseModelKind,
    pub saturation_penalty: f64,
}

impl SegmentInput<'_> {
    /// `None` when no split yields a solvable linear segment.
    pub fn fit_at_offset(&self, offset: f64) -> Option<SegmentedFit> {
        let n = self.xs.len();
        if n == 0 {
            return None;
        }
        let us: Vec<f64> = self.xs.iter().map(|&x| charge_transform(x, offset)).collect();

        // Orient so that the ordering runs from the lowest to the highest signal.
        let mut correlation = 0.0;
        for index in 0..n {
            correlation += self.weights[index] * us[index] * self.ys[index];
        }
        let orientation = if correlation >= 0.0 { 1.0 } else { -1.0 };
        let keys: Vec<f64> = us.iter().map(|u| orientation * u).collect();
        let order = deterministic_argsort(&keys);

        let max_low = if self.kind.allows_low() { n - 1 } else { 0 };
        let max_high = if self.kind.allows_high() { n - 1 } else { 0 };

        let mut best: Option<SegmentedFit> = None;
        for saturated in 0..n {
            for low_count in 0..=saturated {
                let high_count = saturated - low_count;
                if low_count > max_low || high_count > max_high {
                    continue;
                }
                let Some(candidate) = self.solve_split(&us, &order, low_count, high_count) else {
                    continue;
                };
                // Strict comparison keeps the split with fewer saturated points on ties.
                if best
                    .as_ref()
                    .map_or(true, |current| candidate.score < current.score)
                {
                    best = Some(candidate);
                }
            }
        }
        best
    }

    fn solve_split(
        &self,
        us: &[f64],
        order: &[usize],
        low_count: usize,
        high_count: usize,
    ) -> Option<SegmentedFit> {
        let n = order.len();
        let low_column = (low_count > 0).then_some(1);
        let high_column = (high_count > 0).then_some(1 + usize::from(low_count > 0));
        let columns = 1 + usize::from(low_count > 0) + usize::from(high_count > 0);

        let mut design = Mat::<f64>::zeros(n, columns);
        let mut values = Vec::with_capacity(n);
        let mut weights = Vec::with_capacity(n);
        for (rank, &index) in order.iter().enumerate() {
            if rank < low_count {
                design[(rank, 1)] = 1.0;
            } else if rank >= n - high_count {
                design[(rank, columns - 1)] = 1.0;
            } else {
                design[(rank, 0)] = us[index];
            }
            values.push(self.ys[index]);
            weights.push(self.weights[index]);
        }

        let solution = solve_weighted_least_squares(&design, &values, &weights).ok()?;
        let gain = Estimate::new(solution.parameter(0), solution.uncertainty(0));
        let low = low_column.map(|column| {
            Estimate::new(solution.parameter(column), solution.uncertainty(column))
        });
        let high = high_column.map(|column| {
            Estimate::new(solution.parameter(column), solution.uncertainty(column))
        });
        if let (Some(low), Some(high)) = (low, high) {
            if low.value >= high.value {
                return None;
            }
        }

        let low_level = low.map(|low| low.value);
        let high_level = high.map(|high| high.value);
        let mut chi_square = 0.0;
        for index in 0..n {
            let prediction = clip(gain.value * us[index], low_level, high_level);
            let residual = self.ys[index] - prediction;
            chi_square += self.weights[index] * residual * residual;
        }
        let parameters = usize::from(low.is_some()) + usize::from(high.is_some());

        Some(SegmentedFit {
            gain,
            low,
            high,
            low_points: order[..low_count].to_vec(),
            high_points: order[n - high_count..].to_vec(),
            chi_square,
            score: chi_square + self.saturation_penalty * parameters as f64,
        })
    }

    fn score_at(&self, offset: f64) -> f64 {
        self.fit_at_offset(offset)
            .map_or(f64::INFINITY, |fit| fit.score)
    }

    /// Scan `x0` over `[0, max|x| / 2]`, refine, and estimate its uncertainty
    /// from the curvature of the score (`delta chi2 = 1`).
    pub fn fit_with_offset_scan(&self, scan_steps: usize) -> Option<OffsetFit> {
        let max_abs = self.xs.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()));
        let upper = 0.5 * max_abs;
        let steps = scan_steps.max(1);
        if upper <= 0.0 {
            let fit = self.fit_at_offset(0.0)?;
            return Some(OffsetFit {
                offset: Estimate::without_error(0.0),
                fit,
            });
        }

        let step = upper / steps as f64;
        let mut best_offset = 0.0;
        let mut best_score = f64::INFINITY;
        for index in 0..=steps {
            let offset = step * index as f64;
            let score = self.score_at(offset);
            if score < best_score {
                best_score = score;
                best_offset = offset;
            }
        }
        if !best_score.is_finite() {
            return None;
        }

        let refined = self.golden_section(
            (best_offset - step).max(0.0),
            (best_offset + step).min(upper),
        );
        let refined_score = self.score_at(refined);
        let offset = if refined_score <= best_score {
            refined
        } else {
            best_offset
        };

        let fit = self.fit_at_offset(offset)?;
        let error = self.offset_uncertainty(offset, 0.25 * step, upper);
        Some(OffsetFit {
            offset: Estimate {
                value: offset,
                error,
            },
            fit,
        })
    }

    fn golden_section(&self, mut lower: f64, mut upper: f64) -> f64 {
        let ratio = 0.5 * (5.0_f64.sqrt() - 1.0);
        let mut left = upper - ratio * (upper - lower);
        let mut right = lower + ratio * (upper - lower);
        let mut left_score = self.score_at(left);
        let mut right_score = self.score_at(right);
        for _ in 0..GOLDEN_ITERATIONS {
            if left_score <= right_score {
                upper = right;
                right = left;
                right_score = left_score;
                left = upper - ratio * (upper - lower);
                left_score = self.score_at(left);
            } else {
                lower = left;
                left = right;
                left_score = right_score;
                right = lower + ratio * (upper - lower);
                right_score = self.score_at(right);
            }
        }
        0.5 * (lower + upper)
    }

    fn offset_uncertainty(&self, offset: f64, spacing: f64, upper: f64) -> Option<f64> {
        if spacing <= 0.0 {
            return None;
        }
        // Central difference where possible, one-sided at the range boundaries.
        let (first, second, third) = if offset - spacing < 0.0 {
            (offset, offset + spacing, offset + 2.0 * spacing)
        } else if offset + spacing > upper {
            (offset - 2.0 * spacing, offset - spacing, offset)
        } else {
            (offset - spacing, offset, offset + spacing)
        };
        let curvature = (self.score_at(first) - 2.0 * self.score_at(second) + self.score_at(third))
            / (spacing * spacing);
        (curvature.is_finite() && curvature > 0.0).then(|| (2.0 / curvature).sqrt())
    }
}
