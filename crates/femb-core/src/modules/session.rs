//! Demand-driven calibration pass over one scan.
//!
//! A session owns the scan, the waveform source, the processor pipeline and the
//! memo caches. Event summaries are computed at most once per (channel, event)
//! and channel calibrations at most once per channel; failures are cached too,
//! so a failing stage is never re-run. The first successfully processed event
//! fixes the sample unit of the scan.

use super::calibration::{
    ChannelConstants, IncompleteCalibration, MissingCalibration, build_calibration_table,
};
use super::features::{EdgeExclusionPolicy, EventHeader, EventSummary, extract};
use super::fit::{FitOptions, FitOutcome, GainFit, ResponseModelKind, fit_response, select_model};
use super::processors::{
    ChannelEventRecord, ProcessorError, ResultFields, fields, float_field, rois_from_fields,
    str_field,
};
use super::quality::{DeviationSummary, Distribution, channel_deviations, combine_deviations};
use super::response::{ResponsePoints, build_response_points};
use super::sticky::StickyCodeMetrics;
use super::tickmod::{TickModCuts, analyze_tick_mod};
use super::{AdcChannelProcessor, CalibrationTable, WaveformSource};
use crate::common::config::{CalibrationConfig, FitRequest};
use crate::common::constants::fc_to_ke;
use crate::domain::{
    FembError, FembResult, Polarity, PulseSource, SampleUnit, ScanDescriptor, ValueKind,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelFit {
    pub request: FitRequest,
    pub model_kind: ResponseModelKind,
    pub points: ResponsePoints,
    pub outcome: FitOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFailure {
    pub event: usize,
    pub error: FembError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCalibration {
    pub channel: usize,
    pub sample_unit: String,
    pub fits: Vec<ChannelFit>,
    /// Peak-tick codes of every signal event, both polarities.
    pub sticky: StickyCodeMetrics,
    pub deviation: Option<DeviationSummary>,
    pub event_failures: Vec<EventFailure>,
    pub warnings: Vec<String>,
}

impl ChannelCalibration {
    pub fn fit(&self, request: FitRequest) -> Option<&ChannelFit> {
        self.fits.iter().find(|fit| fit.request == request)
    }

    /// Combined-polarity height fit feeding the calibration table.
    pub fn canonical(&self) -> Option<&GainFit> {
        self.fit(FitRequest::CANONICAL)
            .and_then(|fit| fit.outcome.performed())
    }

    fn constants(&self) -> ChannelConstants {
        let canonical = self.canonical();
        ChannelConstants {
            channel: self.channel,
            processed: true,
            gain: canonical.map(GainFit::gain),
            raw_low_saturation: canonical.and_then(|fit| fit.raw_low_saturation),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ChannelOutcome {
    Processed(ChannelCalibration),
    Failed { channel: usize, error: FembError },
}

impl ChannelOutcome {
    pub fn channel(&self) -> usize {
        match self {
            Self::Processed(calibration) => calibration.channel,
            Self::Failed { channel, .. } => *channel,
        }
    }

    pub fn calibration(&self) -> Option<&ChannelCalibration> {
        match self {
            Self::Processed(calibration) => Some(calibration),
            Self::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CalibrationStatus {
    Complete { table: CalibrationTable },
    Incomplete { missing: Vec<MissingCalibration> },
    /// Calibrated scans do not produce new constants.
    NotApplicable,
}

impl CalibrationStatus {
    pub fn table(&self) -> Option<&CalibrationTable> {
        match self {
            Self::Complete { table } => Some(table),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardCalibration {
    pub label: String,
    pub sample_unit: Option<String>,
    pub channels: Vec<ChannelOutcome>,
    /// Design gain [ADC count / ke] for the scan's preamp setting.
    pub nominal_gain: Option<f64>,
    /// Canonical-fit gains over channels with a performed fit.
    pub gain: Option<Distribution>,
    pub chi_square_per_dof: Option<Distribution>,
    pub deviation: Option<DeviationSummary>,
    pub calibration: CalibrationStatus,
}

impl BoardCalibration {
    pub fn failed_channels(&self) -> impl Iterator<Item = usize> + '_ {
        self.channels
            .iter()
            .filter(|outcome| outcome.calibration().is_none())
            .map(ChannelOutcome::channel)
    }
}

/// One row per (channel, event, polarity) with signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PulseRecord {
    pub board: u32,
    pub gain_index: usize,
    pub shaping_index: usize,
    pub external_pulser: bool,
    pub channel: usize,
    pub event: usize,
    pub polarity: Polarity,
    pub charge_ke: f64,
    pub mean: f64,
    pub rms: f64,
    pub max_fraction: Option<f64>,
    pub classic_fraction: Option<f64>,
    pub saturated_count: usize,
    pub values: Vec<f64>,
}

pub struct CalibrationSession {
    scan: ScanDescriptor,
    config: CalibrationConfig,
    source: Option<Box<dyn WaveformSource>>,
    processors: Vec<Box<dyn AdcChannelProcessor>>,
    sample_unit: Option<SampleUnit>,
    events: BTreeMap<(usize, usize), FembResult<EventSummary>>,
    channels: BTreeMap<usize, FembResult<ChannelCalibration>>,
}

impl CalibrationSession {
    pub fn new(scan: ScanDescriptor, config: CalibrationConfig) -> Self {
        Self {
            scan,
            config,
            source: None,
            processors: Vec::new(),
            sample_unit: None,
            events: BTreeMap::new(),
            channels: BTreeMap::new(),
        }
    }

    pub fn with_source(mut self, source: impl WaveformSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_processor(mut self, processor: impl AdcChannelProcessor + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    pub fn with_processors(mut self, processors: Vec<Box<dyn AdcChannelProcessor>>) -> Self {
        self.processors.extend(processors);
        self
    }

    pub fn scan(&self) -> &ScanDescriptor {
        &self.scan
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Unit fixed by the first processed event, if any.
    pub fn sample_unit(&self) -> Option<&SampleUnit> {
        self.sample_unit.as_ref()
    }

    fn reader(&self) -> FembResult<&dyn WaveformSource> {
        self.source.as_deref().ok_or_else(|| {
            FembError::missing_upstream(
                "INPUT.READER_UNAVAILABLE",
                "no waveform source is attached to the session",
            )
        })
    }

    pub fn channel_count(&self) -> FembResult<usize> {
        Ok(self.reader()?.channel_count())
    }

    pub fn event_count(&self) -> FembResult<usize> {
        Ok(self.reader()?.event_count())
    }

    pub fn process_channel_event(
        &mut self,
        channel: usize,
        event: usize,
    ) -> FembResult<&EventSummary> {
        let key = (channel, event);
        if !self.events.contains_key(&key) {
            let result = self.compute_event(channel, event);
            if let Err(error) = &result {
                debug!(channel, event, code = error.code(), "event processing failed");
            }
            self.events.insert(key, result);
        }
        match self.events.get(&key) {
            Some(Ok(summary)) => Ok(summary),
            Some(Err(error)) => Err(error.clone()),
            None => Err(FembError::internal(
                "SYS.EVENT_CACHE",
                format!("no cached result for channel {channel} event {event}"),
            )),
        }
    }

    fn compute_event(&mut self, channel: usize, event: usize) -> FembResult<EventSummary> {
        let raw = self.reader()?.read(event, channel)?;
        if self.processors.is_empty() {
            return Err(FembError::missing_upstream(
                "INPUT.NO_PROCESSORS",
                "no ADC channel processors are configured",
            ));
        }

        let mut record = ChannelEventRecord::new(channel, event, raw);
        let mut results = ResultFields::new();
        for processor in &self.processors {
            let produced = processor.process(&mut record).map_err(|error| {
                let error = FembError::from(error);
                FembError::new(
                    error.category(),
                    error.code(),
                    format!("processor '{}': {}", processor.name(), error.message()),
                )
            })?;
            results.extend(produced);
        }

        let pedestal = match record.pedestal {
            Some(pedestal) => pedestal,
            None => float_field(&results, fields::PEDESTAL)?,
        };
        let unit = match &record.sample_unit {
            Some(label) => SampleUnit::parse(label),
            None => SampleUnit::parse(str_field(&results, fields::SAMPLE_UNIT)?),
        };
        self.lock_sample_unit(&unit)?;

        let rois = if self.config.roi_mode.finds_rois() {
            rois_from_fields(&results).map_err(|error| match error {
                ProcessorError::MissingField {
                    field: fields::ROI_COUNT,
                } => FembError::inconsistent(
                    "DATA.ROI_COUNT_MISSING",
                    format!(
                        "ROI finding is enabled but no processor reported '{}'",
                        fields::ROI_COUNT
                    ),
                ),
                other => FembError::from(other),
            })?
        } else {
            Vec::new()
        };

        let charge_fc = self.scan.charge_fc(event).unwrap_or_else(|| {
            debug!(event, "no charge defined for event; treating as pedestal-only");
            0.0
        });
        let header = EventHeader {
            channel,
            event,
            pedestal,
            charge_fc,
            charge_ke: fc_to_ke(charge_fc),
            sample_unit: unit,
        };
        let policy = EdgeExclusionPolicy::for_mode(self.config.roi_mode, self.config.tick_period);
        let mut summary = extract(header, &record.samples, &record.raw, &rois, policy);
        if let Some(period) = self.config.tick_period {
            summary.tick_mod = analyze_tick_mod(
                &record.samples,
                &record.raw,
                period,
                pedestal,
                TickModCuts {
                    efficiency_window: self.config.tick_mod_efficiency_window,
                    signal_threshold: self.config.tick_mod_signal_threshold,
                },
            );
        }
        Ok(summary)
    }

    fn lock_sample_unit(&mut self, unit: &SampleUnit) -> FembResult<()> {
        if self.config.calibration_mode.is_calibrated() && !unit.is_calibrated() {
            return Err(FembError::inconsistent(
                "DATA.UNIT_MISMATCH",
                format!(
                    "calibration mode '{}' requires calibrated samples but the processors produced '{unit}'",
                    self.config.calibration_mode.as_str()
                ),
            ));
        }
        match &self.sample_unit {
            Some(locked) if locked != unit => Err(FembError::inconsistent(
                "DATA.SAMPLE_UNIT_CHANGED",
                format!("sample unit changed from '{locked}' to '{unit}' within the scan"),
            )),
            Some(_) => Ok(()),
            None => {
                info!(unit = %unit, "sample unit fixed for scan");
                self.sample_unit = Some(unit.clone());
                Ok(())
            }
        }
    }

    pub fn process_channel(&mut self, channel: usize) -> FembResult<&ChannelCalibration> {
        if !self.channels.contains_key(&channel) {
            let result = self.compute_channel(channel);
            match &result {
                Ok(calibration) => info!(
                    channel,
                    fits = calibration.fits.len(),
                    failures = calibration.event_failures.len(),
                    "channel processed"
                ),
                Err(error) => warn!(channel, code = error.code(), "{}", error.message()),
            }
            self.channels.insert(channel, result);
        }
        match self.channels.get(&channel) {
            Some(Ok(calibration)) => Ok(calibration),
            Some(Err(error)) => Err(error.clone()),
            None => Err(FembError::internal(
                "SYS.CHANNEL_CACHE",
                format!("no cached result for channel {channel}"),
            )),
        }
    }

    fn compute_channel(&mut self, channel: usize) -> FembResult<ChannelCalibration> {
        let event_count = self.event_count()?;

        let mut event_failures = Vec::new();
        for event in 0..event_count {
            if let Err(error) = self.process_channel_event(channel, event) {
                if error.category().aborts_channel() {
                    return Err(error);
                }
                event_failures.push(EventFailure { event, error });
            }
        }

        let summaries: Vec<Option<&EventSummary>> = (0..event_count)
            .map(|event| {
                self.events
                    .get(&(channel, event))
                    .and_then(|result| result.as_ref().ok())
            })
            .collect();
        let unit = self.sample_unit.clone().unwrap_or(SampleUnit::AdcCount);
        let signal = self.config.signal_parameters(&unit);
        let options = FitOptions::from_config(&self.config, &unit);

        let mut requests = self.config.fit_requests.clone();
        if !unit.is_calibrated() && !requests.contains(&FitRequest::CANONICAL) {
            requests.push(FitRequest::CANONICAL);
        }

        let mut warnings = Vec::new();
        if self.config.roi_mode.finds_rois() {
            for summary in summaries.iter().flatten() {
                if summary.has_signal()
                    && summary.positive.is_none()
                    && summary.negative.is_none()
                {
                    warn!(channel, event = summary.event, "signal event has no retained ROIs");
                    warnings.push(format!(
                        "event {}: no retained ROIs ({} found, {} excluded)",
                        summary.event, summary.roi_count, summary.excluded_roi_count
                    ));
                }
            }
        }

        let mut fits = Vec::with_capacity(requests.len());
        for request in requests {
            let model_kind =
                select_model(request.polarity, unit.is_calibrated(), self.scan.pulse_source);
            let points = build_response_points(
                &self.scan,
                &summaries,
                request,
                signal,
                model_kind.handles_saturation(),
            );
            let outcome = fit_response(&points.points, model_kind, &options);
            match &outcome {
                FitOutcome::Performed(fit) if fit.few_points => warnings.push(format!(
                    "{}: only {} fit-eligible points",
                    request.label(),
                    fit.eligible_count
                )),
                FitOutcome::NotPerformed { reason } => {
                    warn!(
                        channel,
                        request = %request.label(),
                        reason = %reason,
                        "fit not performed"
                    );
                    warnings.push(format!("{}: fit not performed: {reason}", request.label()));
                }
                FitOutcome::Performed(_) => {}
            }
            fits.push(ChannelFit {
                request,
                model_kind,
                points,
                outcome,
            });
        }

        let peak_codes: Vec<u16> = summaries
            .iter()
            .flatten()
            .filter(|summary| summary.has_signal())
            .flat_map(|summary| {
                Polarity::ALL
                    .into_iter()
                    .filter_map(move |polarity| summary.polarity(polarity))
            })
            .flat_map(|polarity_summary| polarity_summary.peak_codes.iter().copied())
            .collect();

        let deviation = self.config.calibration_mode.deviation_kind().map(|kind| {
            channel_deviations(
                summaries.iter().flatten().copied(),
                kind,
                self.config.deviation_tail_limit(),
            )
        });

        Ok(ChannelCalibration {
            channel,
            sample_unit: unit.label().to_string(),
            fits,
            sticky: StickyCodeMetrics::from_codes(&peak_codes),
            deviation,
            event_failures,
            warnings,
        })
    }

    /// Processes every channel, then aggregates board metrics and constants.
    pub fn process_all(&mut self) -> FembResult<BoardCalibration> {
        let channel_count = self.channel_count()?;
        info!(
            scan = %self.scan.label(),
            channels = channel_count,
            "starting board calibration"
        );

        let mut outcomes = Vec::with_capacity(channel_count);
        for channel in 0..channel_count {
            let outcome = match self.process_channel(channel) {
                Ok(calibration) => ChannelOutcome::Processed(calibration.clone()),
                Err(error) => ChannelOutcome::Failed { channel, error },
            };
            outcomes.push(outcome);
        }

        let processed: Vec<&ChannelCalibration> = outcomes
            .iter()
            .filter_map(ChannelOutcome::calibration)
            .collect();
        let gains: Vec<f64> = processed
            .iter()
            .filter_map(|calibration| calibration.canonical())
            .map(GainFit::gain)
            .collect();
        let chi_squares: Vec<f64> = processed
            .iter()
            .filter_map(|calibration| calibration.canonical())
            .filter_map(GainFit::chi_square_per_dof)
            .collect();
        let deviations: Vec<&DeviationSummary> = processed
            .iter()
            .filter_map(|calibration| calibration.deviation.as_ref())
            .collect();
        let deviation = (!deviations.is_empty()).then(|| combine_deviations(deviations));

        let calibration = self.board_constants(&outcomes);
        if let CalibrationStatus::Incomplete { missing } = &calibration {
            warn!(missing = missing.len(), "calibration table incomplete");
        }

        Ok(BoardCalibration {
            label: self.scan.label(),
            sample_unit: self.sample_unit.as_ref().map(|unit| unit.label().to_string()),
            nominal_gain: self.scan.nominal_gain_adc_per_ke(),
            gain: Distribution::from_values(&gains),
            chi_square_per_dof: Distribution::from_values(&chi_squares),
            deviation,
            calibration,
            channels: outcomes,
        })
    }

    fn board_constants(&self, outcomes: &[ChannelOutcome]) -> CalibrationStatus {
        let calibrated = self.config.calibration_mode.is_calibrated()
            || self.sample_unit.as_ref().is_some_and(SampleUnit::is_calibrated);
        if calibrated {
            return CalibrationStatus::NotApplicable;
        }

        let constants: Vec<ChannelConstants> = outcomes
            .iter()
            .map(|outcome| match outcome {
                ChannelOutcome::Processed(calibration) => calibration.constants(),
                ChannelOutcome::Failed { channel, .. } => ChannelConstants {
                    channel: *channel,
                    processed: false,
                    gain: None,
                    raw_low_saturation: None,
                },
            })
            .collect();
        match build_calibration_table(self.scan.label(), &constants, self.config.adc_floor_margin) {
            Ok(table) => CalibrationStatus::Complete { table },
            Err(IncompleteCalibration { missing }) => CalibrationStatus::Incomplete { missing },
        }
    }

    /// Flat pulse rows for every successfully processed signal event.
    pub fn pulse_records(&mut self) -> FembResult<Vec<PulseRecord>> {
        let channel_count = self.channel_count()?;
        let event_count = self.event_count()?;
        let kind = self
            .config
            .calibration_mode
            .deviation_kind()
            .unwrap_or(ValueKind::Height);

        for channel in 0..channel_count {
            for event in 0..event_count {
                // Failures stay cached and are reported by the channel pass.
                let _ = self.process_channel_event(channel, event);
            }
        }

        let mut records = Vec::new();
        for (&(channel, event), result) in &self.events {
            let Ok(summary) = result else {
                continue;
            };
            if channel >= channel_count || event >= event_count || !summary.has_signal() {
                continue;
            }
            for polarity in Polarity::ALL {
                let Some(polarity_summary) = summary.polarity(polarity) else {
                    continue;
                };
                let (Some(stats), Some(values)) =
                    (polarity_summary.stats(kind), polarity_summary.values(kind))
                else {
                    continue;
                };
                records.push(PulseRecord {
                    board: self.scan.board,
                    gain_index: self.scan.gain_index,
                    shaping_index: self.scan.shaping_index,
                    external_pulser: self.scan.pulse_source == PulseSource::External,
                    channel,
                    event,
                    polarity,
                    charge_ke: summary.charge_ke,
                    mean: stats.mean,
                    rms: stats.rms,
                    max_fraction: polarity_summary.sticky.max_fraction,
                    classic_fraction: polarity_summary.sticky.classic_fraction,
                    saturated_count: polarity_summary.saturated_count,
                    values: values.to_vec(),
                });
            }
        }
        Ok(records)
    }
}
