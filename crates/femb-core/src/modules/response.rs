//! Charge/signal response points for one channel.

use super::features::EventSummary;
use crate::common::config::{FitRequest, SignalParameters};
use crate::domain::{Polarity, ScanDescriptor};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePoint {
    pub event: usize,
    pub polarity: Polarity,
    /// Signed injected charge [ke].
    pub x: f64,
    /// Signed mean signal.
    pub y: f64,
    pub dy: f64,
    /// Uncertainty used for fit weights; inflated for saturated points.
    pub dy_fit: f64,
    pub saturated: bool,
    pub keep_for_fit: bool,
    pub pedestal: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePoints {
    pub points: Vec<ResponsePoint>,
    /// Indices into `points` that do not feed the fit.
    pub excluded: Vec<usize>,
    /// Signal-carrying events that produced no point, with the reason.
    pub skipped: Vec<SkippedEvent>,
}

impl ResponsePoints {
    pub fn eligible(&self) -> impl Iterator<Item = &ResponsePoint> {
        self.points.iter().filter(|point| point.keep_for_fit)
    }

    pub fn eligible_count(&self) -> usize {
        self.eligible().count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedEvent {
    pub event: usize,
    pub polarity: Polarity,
    pub reason: String,
}

/// Builds points in injection order, the positive sequence before the negative one.
///
/// `summaries` is indexed by event; `None` marks an event whose processing failed.
pub fn build_response_points(
    scan: &ScanDescriptor,
    summaries: &[Option<&EventSummary>],
    request: FitRequest,
    signal: SignalParameters,
    model_handles_saturation: bool,
) -> ResponsePoints {
    let mut result = ResponsePoints::default();

    for &polarity in request.polarity.polarities() {
        for event in scan.first_signal_event()..summaries.len() {
            let Some(charge_ke) = scan.charge_ke(event).filter(|charge| *charge > 0.0) else {
                continue;
            };

            let Some(summary) = summaries[event] else {
                skip(&mut result, event, polarity, "event summary unavailable");
                continue;
            };
            let Some(polarity_summary) = summary.polarity(polarity) else {
                skip(&mut result, event, polarity, "no pulses of this polarity");
                continue;
            };
            let (Some(mean), Some(rms)) = (
                polarity_summary.mean(request.kind),
                polarity_summary.rms(request.kind),
            ) else {
                skip(
                    &mut result,
                    event,
                    polarity,
                    &format!("no {} values", request.kind.as_str()),
                );
                continue;
            };

            let saturated = polarity_summary.has_saturation();
            let dy = rms.max(signal.dsig_min);
            let dy_fit = if saturated { dy.max(signal.dsig_flow) } else { dy };
            let keep_for_fit =
                !scan.excluded_from_fit(event) && (!saturated || model_handles_saturation);

            if !keep_for_fit {
                result.excluded.push(result.points.len());
            }
            result.points.push(ResponsePoint {
                event,
                polarity,
                x: scan.polarity_convention.charge_sign(polarity) * charge_ke,
                y: polarity.sign() * mean,
                dy,
                dy_fit,
                saturated,
                keep_for_fit,
                pedestal: summary.pedestal,
            });
        }
    }

    result
}

fn skip(result: &mut ResponsePoints, event: usize, polarity: Polarity, reason: &str) {
    debug!(event, %polarity, reason, "skipping response point");
    result.skipped.push(SkippedEvent {
        event,
        polarity,
        reason: reason.to_string(),
    });
}
