//! Phase-folded analysis of a periodically pulsed waveform.
//!
//! Samples are grouped by `tick % period`; each phase collects the calibrated
//! signal and the raw codes so that a sticky code at the pulse peak can be told
//! apart from a genuine response. Phases whose mean exceeds the signal threshold
//! count as signal, the rest as pedestal; the event-level efficiencies pool the
//! samples of each group.

use super::sticky::StickyCodeMetrics;
use crate::common::constants::ADC_MAX_CODE;
use crate::numerics::MeanRms;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickModPhase {
    pub phase: usize,
    pub signal: MeanRms,
    /// Raw codes at the digitizer limits.
    pub flow_count: usize,
    pub sticky: StickyCodeMetrics,
    /// Fraction of samples within the efficiency window of the phase mean.
    pub efficiency: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickModCuts {
    pub efficiency_window: f64,
    /// Phase means above this are signal phases.
    pub signal_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickModSummary {
    pub period: usize,
    #[serde(flatten)]
    pub cuts: TickModCuts,
    /// Pedestal of the pulsed event.
    pub pedestal: f64,
    pub phases: Vec<TickModPhase>,
    pub min_phase: Option<usize>,
    pub max_phase: Option<usize>,
    pub signal_efficiency: Option<f64>,
    pub pedestal_efficiency: Option<f64>,
}

impl TickModSummary {
    pub fn phase(&self, phase: usize) -> Option<&TickModPhase> {
        self.phases.iter().find(|entry| entry.phase == phase)
    }
}

#[derive(Default)]
struct EfficiencyTally {
    within: usize,
    total: usize,
}

impl EfficiencyTally {
    fn fraction(&self) -> Option<f64> {
        (self.total > 0).then(|| self.within as f64 / self.total as f64)
    }
}

/// `None` for a zero period or an empty waveform.
pub fn analyze_tick_mod(
    samples: &[f64],
    raw_codes: &[u16],
    period: usize,
    pedestal: f64,
    cuts: TickModCuts,
) -> Option<TickModSummary> {
    let n_ticks = if raw_codes.is_empty() {
        samples.len()
    } else {
        samples.len().min(raw_codes.len())
    };
    if period == 0 || n_ticks == 0 {
        return None;
    }

    let mut signals: Vec<Vec<f64>> = vec![Vec::new(); period];
    let mut codes: Vec<Vec<u16>> = vec![Vec::new(); period];
    for tick in 0..n_ticks {
        signals[tick % period].push(samples[tick]);
        if let Some(&code) = raw_codes.get(tick) {
            codes[tick % period].push(code);
        }
    }

    let mut phases = Vec::with_capacity(period);
    let mut signal_tally = EfficiencyTally::default();
    let mut pedestal_tally = EfficiencyTally::default();
    for (phase, (values, phase_codes)) in signals.iter().zip(&codes).enumerate() {
        let Some(signal) = MeanRms::from_values(values) else {
            continue;
        };
        let within = values
            .iter()
            .filter(|value| (*value - signal.mean).abs() <= cuts.efficiency_window)
            .count();
        let tally = if signal.mean > cuts.signal_threshold {
            &mut signal_tally
        } else {
            &mut pedestal_tally
        };
        tally.within += within;
        tally.total += values.len();
        phases.push(TickModPhase {
            phase,
            signal,
            flow_count: phase_codes
                .iter()
                .filter(|&&code| code == 0 || code >= ADC_MAX_CODE)
                .count(),
            sticky: StickyCodeMetrics::from_codes(phase_codes),
            efficiency: within as f64 / values.len() as f64,
        });
    }

    let min_phase = phases
        .iter()
        .min_by(|lhs, rhs| lhs.signal.mean.total_cmp(&rhs.signal.mean))
        .map(|entry| entry.phase);
    let max_phase = phases
        .iter()
        .max_by(|lhs, rhs| lhs.signal.mean.total_cmp(&rhs.signal.mean))
        .map(|entry| entry.phase);

    Some(TickModSummary {
        period,
        cuts,
        pedestal,
        phases,
        min_phase,
        max_phase,
        signal_efficiency: signal_tally.fraction(),
        pedestal_efficiency: pedestal_tally.fraction(),
    })
}
