//! Fit residual statistics and calibrated-vs-expected deviation summaries.

use super::features::EventSummary;
use crate::domain::{Polarity, ValueKind};
use crate::numerics::{MeanRms, stable_sum};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResidualStatistics {
    pub count: usize,
    pub chi_square: f64,
    pub degrees_of_freedom: usize,
    pub chi_square_per_dof: Option<f64>,
    /// RMS of the unnormalized residuals, in signal units.
    pub raw_rms: f64,
    /// RMS of successive residual differences over sqrt(2); insensitive to slow trends.
    pub local_rms: Option<f64>,
}

impl ResidualStatistics {
    /// `residuals` are `y - prediction` ordered along the charge axis.
    pub fn from_residuals(residuals: &[f64], uncertainties: &[f64]) -> Option<Self> {
        if residuals.is_empty() || residuals.len() != uncertainties.len() {
            return None;
        }

        let count = residuals.len();
        let pulls: Vec<f64> = residuals
            .iter()
            .zip(uncertainties)
            .map(|(residual, sigma)| (residual / sigma).powi(2))
            .collect();
        let chi_square = stable_sum(&pulls);
        let degrees_of_freedom = count - 1;

        let squares: Vec<f64> = residuals.iter().map(|residual| residual * residual).collect();
        let raw_rms = (stable_sum(&squares) / count as f64).sqrt();

        let local_rms = (count > 1).then(|| {
            let steps: Vec<f64> = residuals
                .windows(2)
                .map(|pair| (pair[1] - pair[0]).powi(2))
                .collect();
            (stable_sum(&steps) / (2.0 * (count - 1) as f64)).sqrt()
        });

        Some(Self {
            count,
            chi_square,
            degrees_of_freedom,
            chi_square_per_dof: (degrees_of_freedom > 0)
                .then(|| chi_square / degrees_of_freedom as f64),
            raw_rms,
            local_rms,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviationSummary {
    pub bulk: Option<MeanRms>,
    pub bulk_count: usize,
    pub tail_count: usize,
    pub tail_fraction: Option<f64>,
    /// Polarity-events dropped because a pulse under- or overflowed.
    pub excluded_event_count: usize,
}

impl DeviationSummary {
    fn with_counts(bulk: Option<MeanRms>, tail_count: usize, excluded_event_count: usize) -> Self {
        let bulk_count = bulk.map_or(0, |bulk| bulk.count);
        let total = bulk_count + tail_count;
        Self {
            bulk,
            bulk_count,
            tail_count,
            tail_fraction: (total > 0).then(|| tail_count as f64 / total as f64),
            excluded_event_count,
        }
    }
}

/// Per-pulse `calibrated value - expected charge` for one channel of a calibrated scan.
pub fn channel_deviations<'a>(
    summaries: impl IntoIterator<Item = &'a EventSummary>,
    kind: ValueKind,
    tail_limit: f64,
) -> DeviationSummary {
    let mut bulk = Vec::new();
    let mut tail_count = 0;
    let mut excluded_event_count = 0;

    for summary in summaries {
        if !summary.has_signal() {
            continue;
        }
        for polarity in Polarity::ALL {
            let Some(polarity_summary) = summary.polarity(polarity) else {
                continue;
            };
            if polarity_summary.has_saturation() {
                excluded_event_count += 1;
                continue;
            }
            let Some(values) = polarity_summary.values(kind) else {
                continue;
            };
            for value in values {
                let deviation = value - summary.charge_ke;
                if deviation.abs() > tail_limit {
                    tail_count += 1;
                } else {
                    bulk.push(deviation);
                }
            }
        }
    }

    DeviationSummary::with_counts(MeanRms::from_values(&bulk), tail_count, excluded_event_count)
}

/// Board summary recombined from channel means and RMS, weighted by bulk count.
pub fn combine_deviations<'a>(
    summaries: impl IntoIterator<Item = &'a DeviationSummary>,
) -> DeviationSummary {
    let summaries: Vec<&DeviationSummary> = summaries.into_iter().collect();
    let bulk = MeanRms::combine(summaries.iter().filter_map(|summary| summary.bulk.as_ref()));
    DeviationSummary::with_counts(
        bulk,
        summaries.iter().map(|summary| summary.tail_count).sum(),
        summaries
            .iter()
            .map(|summary| summary.excluded_event_count)
            .sum(),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    pub summary: MeanRms,
    pub min: f64,
    pub max: f64,
}

impl Distribution {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        Some(Self {
            summary: MeanRms::from_values(values)?,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}
