//! Per (channel, event) pulse features derived from the ROIs an upstream finder
//! reported.

use super::sticky::StickyCodeMetrics;
use super::tickmod::TickModSummary;
use crate::domain::{Polarity, RoiMode, SampleUnit, ValueKind};
use crate::numerics::MeanRms;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One region of interest in the calibrated sample stream.
///
/// Ticks are absolute positions in the readout window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Roi {
    pub tick0: usize,
    pub n_ticks: usize,
    pub area: Option<f64>,
    pub sig_min: f64,
    pub sig_max: f64,
    pub tick_min: usize,
    pub tick_max: usize,
    pub n_underflow: usize,
    pub n_overflow: usize,
}

impl Roi {
    pub fn polarity(&self) -> Polarity {
        let positive = match self.area {
            Some(area) => area >= 0.0,
            None => self.sig_max >= -self.sig_min,
        };
        if positive {
            Polarity::Positive
        } else {
            Polarity::Negative
        }
    }

    /// Unsigned peak excursion in the direction of `polarity`.
    pub fn height(&self, polarity: Polarity) -> f64 {
        match polarity {
            Polarity::Positive => self.sig_max,
            Polarity::Negative => -self.sig_min,
        }
    }

    pub fn peak_tick(&self, polarity: Polarity) -> usize {
        match polarity {
            Polarity::Positive => self.tick_max,
            Polarity::Negative => self.tick_min,
        }
    }

    pub fn end_tick(&self) -> usize {
        self.tick0 + self.n_ticks
    }

    pub fn has_flow(&self) -> bool {
        self.n_underflow > 0 || self.n_overflow > 0
    }
}

/// Which ROIs near the readout-window boundaries are dropped before analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeExclusionPolicy {
    KeepAll,
    /// Drop ROIs touching the first or last tick.
    WindowEdges,
    /// Also drop ROIs whose injection period runs past the window end.
    WindowEdgesAndPeriod { period: usize },
}

impl EdgeExclusionPolicy {
    pub fn for_mode(mode: RoiMode, tick_period: Option<usize>) -> Self {
        match (mode, tick_period) {
            (RoiMode::None, _) => Self::KeepAll,
            (RoiMode::Peak, _) | (RoiMode::TickMod, None) => Self::WindowEdges,
            (RoiMode::TickMod, Some(period)) => Self::WindowEdgesAndPeriod { period },
        }
    }

    pub fn excludes(&self, roi: &Roi, n_ticks: usize) -> bool {
        let touches_edge = roi.tick0 == 0 || roi.end_tick() >= n_ticks;
        match *self {
            Self::KeepAll => false,
            Self::WindowEdges => touches_edge,
            Self::WindowEdgesAndPeriod { period } => {
                touches_edge || roi.tick0 + period > n_ticks
            }
        }
    }
}

/// Most frequent spacing between successive pulse peaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Periodicity {
    pub period: usize,
    pub fraction: f64,
    pub spacings: Vec<usize>,
}

impl Periodicity {
    /// `None` for fewer than two peaks. Ties go to the smallest spacing.
    pub fn from_peak_ticks(peak_ticks: &[usize]) -> Option<Self> {
        if peak_ticks.len() < 2 {
            return None;
        }

        let mut sorted = peak_ticks.to_vec();
        sorted.sort_unstable();
        let spacings: Vec<usize> = sorted.windows(2).map(|pair| pair[1] - pair[0]).collect();

        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for &spacing in &spacings {
            *counts.entry(spacing).or_insert(0) += 1;
        }
        let mut period = 0;
        let mut best = 0;
        for (&spacing, &count) in &counts {
            if count > best {
                best = count;
                period = spacing;
            }
        }

        Some(Self {
            period,
            fraction: best as f64 / spacings.len() as f64,
            spacings,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolaritySummary {
    pub polarity: Polarity,
    pub roi_count: usize,
    pub heights: Vec<f64>,
    /// Absent when any ROI of this polarity came without an area.
    pub areas: Option<Vec<f64>>,
    pub height: MeanRms,
    pub area: Option<MeanRms>,
    pub underflow_count: usize,
    pub overflow_count: usize,
    pub saturated_count: usize,
    pub height_min: f64,
    pub height_max: f64,
    pub periodicity: Option<Periodicity>,
    pub peak_codes: Vec<u16>,
    pub sticky: StickyCodeMetrics,
}

impl PolaritySummary {
    fn from_rois(polarity: Polarity, rois: &[&Roi], raw_codes: &[u16]) -> Option<Self> {
        let heights: Vec<f64> = rois.iter().map(|roi| roi.height(polarity)).collect();
        let height = MeanRms::from_values(&heights)?;
        let areas: Option<Vec<f64>> = rois
            .iter()
            .map(|roi| roi.area.map(f64::abs))
            .collect();
        let area = areas.as_deref().and_then(MeanRms::from_values);

        let peak_ticks: Vec<usize> = rois.iter().map(|roi| roi.peak_tick(polarity)).collect();
        let peak_codes: Vec<u16> = peak_ticks
            .iter()
            .filter_map(|&tick| raw_codes.get(tick).copied())
            .collect();

        Some(Self {
            polarity,
            roi_count: rois.len(),
            height_min: heights.iter().copied().fold(f64::INFINITY, f64::min),
            height_max: heights.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            heights,
            areas,
            height,
            area,
            underflow_count: rois.iter().filter(|roi| roi.n_underflow > 0).count(),
            overflow_count: rois.iter().filter(|roi| roi.n_overflow > 0).count(),
            saturated_count: rois.iter().filter(|roi| roi.has_flow()).count(),
            periodicity: Periodicity::from_peak_ticks(&peak_ticks),
            sticky: StickyCodeMetrics::from_codes(&peak_codes),
            peak_codes,
        })
    }

    pub fn values(&self, kind: ValueKind) -> Option<&[f64]> {
        match kind {
            ValueKind::Height => Some(&self.heights),
            ValueKind::Area => self.areas.as_deref(),
        }
    }

    pub fn stats(&self, kind: ValueKind) -> Option<&MeanRms> {
        match kind {
            ValueKind::Height => Some(&self.height),
            ValueKind::Area => self.area.as_ref(),
        }
    }

    pub fn mean(&self, kind: ValueKind) -> Option<f64> {
        self.stats(kind).map(|stats| stats.mean)
    }

    pub fn rms(&self, kind: ValueKind) -> Option<f64> {
        self.stats(kind).map(|stats| stats.rms)
    }

    pub fn has_saturation(&self) -> bool {
        self.saturated_count > 0
    }
}

/// Identity of one (channel, event) pass and its upstream scalars.
#[derive(Debug, Clone, PartialEq)]
pub struct EventHeader {
    pub channel: usize,
    pub event: usize,
    pub pedestal: f64,
    pub charge_fc: f64,
    pub charge_ke: f64,
    pub sample_unit: SampleUnit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub channel: usize,
    pub event: usize,
    pub pedestal: f64,
    pub charge_fc: f64,
    pub charge_ke: f64,
    pub sample_unit: SampleUnit,
    pub n_ticks: usize,
    pub roi_count: usize,
    pub excluded_roi_count: usize,
    pub positive: Option<PolaritySummary>,
    pub negative: Option<PolaritySummary>,
    pub tick_mod: Option<TickModSummary>,
}

impl EventSummary {
    pub fn polarity(&self, polarity: Polarity) -> Option<&PolaritySummary> {
        match polarity {
            Polarity::Positive => self.positive.as_ref(),
            Polarity::Negative => self.negative.as_ref(),
        }
    }

    pub fn has_signal(&self) -> bool {
        self.charge_fc > 0.0
    }
}

pub fn extract(
    header: EventHeader,
    samples: &[f64],
    raw_codes: &[u16],
    rois: &[Roi],
    policy: EdgeExclusionPolicy,
) -> EventSummary {
    let n_ticks = if samples.is_empty() {
        raw_codes.len()
    } else {
        samples.len()
    };

    let mut positive = Vec::new();
    let mut negative = Vec::new();
    let mut excluded_roi_count = 0;
    for roi in rois {
        if policy.excludes(roi, n_ticks) {
            excluded_roi_count += 1;
            continue;
        }
        match roi.polarity() {
            Polarity::Positive => positive.push(roi),
            Polarity::Negative => negative.push(roi),
        }
    }

    EventSummary {
        channel: header.channel,
        event: header.event,
        pedestal: header.pedestal,
        charge_fc: header.charge_fc,
        charge_ke: header.charge_ke,
        sample_unit: header.sample_unit,
        n_ticks,
        roi_count: rois.len(),
        excluded_roi_count,
        positive: PolaritySummary::from_rois(Polarity::Positive, &positive, raw_codes),
        negative: PolaritySummary::from_rois(Polarity::Negative, &negative, raw_codes),
        tick_mod: None,
    }
}
