//! Saturating-gain fit of one channel's response points.
//!
//! The first pass fits the selected saturating model to every fit-eligible
//! point. The reported gain comes from a pure linear refit through the origin
//! on the points the first pass places inside its linear range.

mod model;
mod segments;

pub use model::{
    Estimate, ResponseModel, ResponseModelKind, charge_transform, clip, select_model,
};

use super::quality::ResidualStatistics;
use super::response::ResponsePoint;
use crate::common::config::CalibrationConfig;
use crate::domain::SampleUnit;
use crate::numerics::{deterministic_argsort, solve_weighted_least_squares};
use faer::Mat;
use segments::SegmentInput;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub min_fit_points: usize,
    pub saturation_penalty: f64,
    pub offset_scan_steps: usize,
    pub saturation_margin: f64,
    /// Report saturation levels in raw ADC counts as well.
    pub raw_adc: bool,
}

impl FitOptions {
    pub fn from_config(config: &CalibrationConfig, unit: &SampleUnit) -> Self {
        Self {
            min_fit_points: config.min_fit_points,
            saturation_penalty: config.saturation_penalty,
            offset_scan_steps: config.offset_scan_steps,
            saturation_margin: config.signal_parameters(unit).saturation_margin,
            raw_adc: !unit.is_calibrated(),
        }
    }
}

/// Starting values read directly off the points.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FitSeeds {
    pub gain: Option<f64>,
    pub low: Option<f64>,
    pub high: Option<f64>,
}

impl FitSeeds {
    fn from_points(points: &[ResponsePoint], eligible: &[usize], kind: ResponseModelKind) -> Self {
        let gain = eligible
            .iter()
            .rev()
            .map(|&index| &points[index])
            .find(|point| !point.saturated && point.x != 0.0)
            .map(|point| point.y / point.x);

        let mut high_side: Vec<&ResponsePoint> = eligible
            .iter()
            .map(|&index| &points[index])
            .filter(|point| point.y > 0.0)
            .collect();
        let mut low_side: Vec<&ResponsePoint> = eligible
            .iter()
            .map(|&index| &points[index])
            .filter(|point| point.y < 0.0)
            .collect();
        high_side.sort_by(|lhs, rhs| lhs.x.abs().total_cmp(&rhs.x.abs()));
        low_side.sort_by(|lhs, rhs| lhs.x.abs().total_cmp(&rhs.x.abs()));

        Self {
            gain,
            low: kind.allows_low().then(|| edge_mean(&low_side)).flatten(),
            high: kind.allows_high().then(|| edge_mean(&high_side)).flatten(),
        }
    }
}

fn edge_mean(side: &[&ResponsePoint]) -> Option<f64> {
    let tail = &side[side.len().saturating_sub(2)..];
    (!tail.is_empty()).then(|| tail.iter().map(|point| point.y).sum::<f64>() / tail.len() as f64)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GainFit {
    /// Refit gain with the first-pass saturation levels and offset.
    pub model: ResponseModel,
    pub first_pass: ResponseModel,
    pub seeds: FitSeeds,
    pub raw_low_saturation: Option<f64>,
    pub raw_high_saturation: Option<f64>,
    pub eligible_count: usize,
    /// Fewer eligible points than the configured minimum.
    pub few_points: bool,
    /// Indices of the refit window points, ordered along the charge axis.
    pub window: Vec<usize>,
    pub residuals: ResidualStatistics,
}

impl GainFit {
    pub fn gain(&self) -> f64 {
        self.model.gain().value
    }

    pub fn gain_error(&self) -> Option<f64> {
        self.model.gain().error
    }

    pub fn chi_square_per_dof(&self) -> Option<f64> {
        self.residuals.chi_square_per_dof
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum FitOutcome {
    Performed(GainFit),
    NotPerformed { reason: String },
}

impl FitOutcome {
    fn not_performed(reason: impl Into<String>) -> Self {
        Self::NotPerformed {
            reason: reason.into(),
        }
    }

    pub fn performed(&self) -> Option<&GainFit> {
        match self {
            Self::Performed(fit) => Some(fit),
            Self::NotPerformed { .. } => None,
        }
    }
}

pub fn fit_response(
    points: &[ResponsePoint],
    kind: ResponseModelKind,
    options: &FitOptions,
) -> FitOutcome {
    let eligible: Vec<usize> = (0..points.len())
        .filter(|&index| points[index].keep_for_fit)
        .collect();
    if eligible.is_empty() {
        return FitOutcome::not_performed("no fit-eligible points");
    }
    let few_points = eligible.len() < options.min_fit_points;
    if few_points {
        warn!(
            eligible = eligible.len(),
            minimum = options.min_fit_points,
            model = kind.as_str(),
            "few fit-eligible points; fitting anyway"
        );
    }

    let seeds = FitSeeds::from_points(points, &eligible, kind);
    let xs: Vec<f64> = eligible.iter().map(|&index| points[index].x).collect();
    let ys: Vec<f64> = eligible.iter().map(|&index| points[index].y).collect();
    let weights: Vec<f64> = eligible
        .iter()
        .map(|&index| points[index].dy_fit.powi(-2))
        .collect();
    let input = SegmentInput {
        xs: &xs,
        ys: &ys,
        weights: &weights,
        kind,
        saturation_penalty: options.saturation_penalty,
    };

    let first = if kind.has_offset() {
        input
            .fit_with_offset_scan(options.offset_scan_steps)
            .map(|result| (Some(result.offset), result.fit))
    } else {
        input.fit_at_offset(0.0).map(|fit| (None, fit))
    };
    let Some((offset, first)) = first else {
        return FitOutcome::not_performed("first pass found no solvable linear segment");
    };
    let first_pass = ResponseModel::from_parts(kind, first.gain, first.low, first.high, offset);

    let (raw_low_saturation, raw_high_saturation) = if options.raw_adc {
        (
            knee_level(points, &eligible, &first.low_points, first.low),
            knee_level(points, &eligible, &first.high_points, first.high),
        )
    } else {
        (None, None)
    };

    let gain = first.gain.value;
    let lower = first
        .low
        .map_or(f64::NEG_INFINITY, |low| low.value - options.saturation_margin);
    let upper = first
        .high
        .map_or(f64::INFINITY, |high| high.value + options.saturation_margin);
    let candidates: Vec<usize> = eligible
        .iter()
        .copied()
        .filter(|&index| {
            let point = &points[index];
            let u = first_pass.transform(point.x);
            !point.saturated && u != 0.0 && (lower..=upper).contains(&(gain * u))
        })
        .collect();
    if candidates.is_empty() {
        return FitOutcome::not_performed("linear window is empty");
    }

    let candidate_us: Vec<f64> = candidates
        .iter()
        .map(|&index| first_pass.transform(points[index].x))
        .collect();
    let order = deterministic_argsort(&candidate_us);
    let window: Vec<usize> = order.iter().map(|&rank| candidates[rank]).collect();
    let us: Vec<f64> = order.iter().map(|&rank| candidate_us[rank]).collect();

    let mut design = Mat::<f64>::zeros(window.len(), 1);
    for (row, &u) in us.iter().enumerate() {
        design[(row, 0)] = u;
    }
    let values: Vec<f64> = window.iter().map(|&index| points[index].y).collect();
    let sigmas: Vec<f64> = window.iter().map(|&index| points[index].dy_fit).collect();
    let refit_weights: Vec<f64> = sigmas.iter().map(|sigma| sigma.powi(-2)).collect();
    let refit = match solve_weighted_least_squares(&design, &values, &refit_weights) {
        Ok(refit) => refit,
        Err(error) => return FitOutcome::not_performed(format!("linear refit failed: {error}")),
    };
    let refit_gain = refit.parameter(0);
    let model = first_pass.with_gain(Estimate::new(refit_gain, refit.uncertainty(0)));

    let residuals: Vec<f64> = values
        .iter()
        .zip(&us)
        .map(|(y, u)| y - refit_gain * u)
        .collect();
    let Some(residuals) = ResidualStatistics::from_residuals(&residuals, &sigmas) else {
        return FitOutcome::not_performed("no residuals in the linear window");
    };

    FitOutcome::Performed(GainFit {
        model,
        first_pass,
        seeds,
        raw_low_saturation,
        raw_high_saturation,
        eligible_count: eligible.len(),
        few_points,
        window,
        residuals,
    })
}

/// Saturation level in raw ADC counts, using the pedestal of the segment point
/// closest to the knee.
fn knee_level(
    points: &[ResponsePoint],
    eligible: &[usize],
    segment: &[usize],
    level: Option<Estimate>,
) -> Option<f64> {
    let level = level?;
    segment
        .iter()
        .map(|&rank| &points[eligible[rank]])
        .min_by(|lhs, rhs| lhs.x.abs().total_cmp(&rhs.x.abs()))
        .map(|point| level.value + point.pedestal)
}
