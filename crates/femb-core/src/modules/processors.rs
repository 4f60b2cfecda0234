//! Processor boundary and the reference processor pipeline.
//!
//! Processors exchange results through a generic name to value map; the engine
//! reads only the names listed in [`fields`]. The reference processors cover
//! pedestal finding, sample filling (raw or gain-calibrated) and two ROI
//! finders, enough to drive a calibration pass end to end.

use super::AdcChannelProcessor;
use super::calibration::CalibrationTable;
use super::features::Roi;
use crate::common::constants::ADC_MAX_CODE;
use crate::domain::{FembError, RoiMode, SampleUnit};
use serde::Serialize;
use std::collections::BTreeMap;

pub mod fields {
    pub const PEDESTAL: &str = "pedestal";
    pub const SAMPLE_UNIT: &str = "sampleUnit";
    pub const ROI_COUNT: &str = "roiCount";
    pub const ROI_TICK0S: &str = "roiTick0s";
    pub const ROI_NTICKS: &str = "roiNTicks";
    pub const ROI_SIG_MINS: &str = "roiSigMins";
    pub const ROI_SIG_MAXS: &str = "roiSigMaxs";
    pub const ROI_TICK_MINS: &str = "roiTickMins";
    pub const ROI_TICK_MAXS: &str = "roiTickMaxs";
    pub const ROI_NUNDERFLOWS: &str = "roiNUnderflows";
    pub const ROI_NOVERFLOWS: &str = "roiNOverflows";
    pub const ROI_SIG_AREAS: &str = "roiSigAreas";
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Str(String),
    IntVec(Vec<i64>),
    FloatVec(Vec<f64>),
}

impl FieldValue {
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::IntVec(_) => "int array",
            Self::FloatVec(_) => "float array",
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_float_vec(&self) -> Option<Vec<f64>> {
        match self {
            Self::FloatVec(values) => Some(values.clone()),
            Self::IntVec(values) => Some(values.iter().map(|&value| value as f64).collect()),
            _ => None,
        }
    }

    pub fn as_int_vec(&self) -> Option<&[i64]> {
        match self {
            Self::IntVec(values) => Some(values),
            _ => None,
        }
    }
}

pub type ResultFields = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SampleFlag {
    #[default]
    Normal,
    Underflow,
    Overflow,
}

/// Working state shared by the stages of one (channel, event) pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEventRecord {
    pub channel: usize,
    pub event: usize,
    pub raw: Vec<u16>,
    pub pedestal: Option<f64>,
    /// Pedestal-subtracted and possibly calibrated samples.
    pub samples: Vec<f64>,
    pub flags: Vec<SampleFlag>,
    pub sample_unit: Option<String>,
}

impl ChannelEventRecord {
    pub fn new(channel: usize, event: usize, raw: Vec<u16>) -> Self {
        Self {
            channel,
            event,
            raw,
            pedestal: None,
            samples: Vec::new(),
            flags: Vec::new(),
            sample_unit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessorError {
    #[error("processor '{processor}' requires {requirement} from an earlier stage")]
    MissingUpstream {
        processor: String,
        requirement: &'static str,
    },
    #[error("result field '{field}' is missing")]
    MissingField { field: &'static str },
    #[error("result field '{field}' is {found}, expected {expected}")]
    FieldType {
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("result field '{field}' has {found} entries, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("result field '{field}' holds invalid value {value}")]
    InvalidValue { field: &'static str, value: i64 },
    #[error("no calibration constants for channel {channel}")]
    MissingCalibration { channel: usize },
}

impl From<ProcessorError> for FembError {
    fn from(error: ProcessorError) -> Self {
        match error {
            ProcessorError::MissingUpstream { .. } | ProcessorError::MissingField { .. } => {
                FembError::missing_upstream("INPUT.PROCESSOR_RESULT", error.to_string())
            }
            ProcessorError::MissingCalibration { .. } => {
                FembError::missing_upstream("INPUT.CALIBRATION_CHANNEL", error.to_string())
            }
            ProcessorError::FieldType { .. }
            | ProcessorError::LengthMismatch { .. }
            | ProcessorError::InvalidValue { .. } => {
                FembError::inconsistent("DATA.PROCESSOR_FIELD", error.to_string())
            }
        }
    }
}

fn required<'a>(
    fields: &'a ResultFields,
    field: &'static str,
) -> Result<&'a FieldValue, ProcessorError> {
    fields.get(field).ok_or(ProcessorError::MissingField { field })
}

pub fn float_field(fields: &ResultFields, field: &'static str) -> Result<f64, ProcessorError> {
    let value = required(fields, field)?;
    value.as_float().ok_or(ProcessorError::FieldType {
        field,
        expected: "float",
        found: value.type_name(),
    })
}

pub fn str_field<'a>(
    fields: &'a ResultFields,
    field: &'static str,
) -> Result<&'a str, ProcessorError> {
    let value = required(fields, field)?;
    value.as_str().ok_or(ProcessorError::FieldType {
        field,
        expected: "string",
        found: value.type_name(),
    })
}

fn count_field(fields: &ResultFields, field: &'static str) -> Result<usize, ProcessorError> {
    let value = required(fields, field)?;
    let count = value.as_int().ok_or(ProcessorError::FieldType {
        field,
        expected: "int",
        found: value.type_name(),
    })?;
    usize::try_from(count).map_err(|_| ProcessorError::InvalidValue { field, value: count })
}

fn float_array(
    fields: &ResultFields,
    field: &'static str,
    expected: usize,
) -> Result<Vec<f64>, ProcessorError> {
    let value = required(fields, field)?;
    let values = value.as_float_vec().ok_or(ProcessorError::FieldType {
        field,
        expected: "float array",
        found: value.type_name(),
    })?;
    if values.len() != expected {
        return Err(ProcessorError::LengthMismatch {
            field,
            expected,
            found: values.len(),
        });
    }
    Ok(values)
}

fn index_array(
    fields: &ResultFields,
    field: &'static str,
    expected: usize,
) -> Result<Vec<usize>, ProcessorError> {
    let value = required(fields, field)?;
    let values = value.as_int_vec().ok_or(ProcessorError::FieldType {
        field,
        expected: "int array",
        found: value.type_name(),
    })?;
    if values.len() != expected {
        return Err(ProcessorError::LengthMismatch {
            field,
            expected,
            found: values.len(),
        });
    }
    values
        .iter()
        .map(|&value| {
            usize::try_from(value).map_err(|_| ProcessorError::InvalidValue { field, value })
        })
        .collect()
}

/// ROIs from the parallel `roi*` arrays; `roiSigAreas` is optional.
pub fn rois_from_fields(fields: &ResultFields) -> Result<Vec<Roi>, ProcessorError> {
    let count = count_field(fields, fields::ROI_COUNT)?;
    let tick0s = index_array(fields, fields::ROI_TICK0S, count)?;
    let n_ticks = index_array(fields, fields::ROI_NTICKS, count)?;
    let sig_mins = float_array(fields, fields::ROI_SIG_MINS, count)?;
    let sig_maxs = float_array(fields, fields::ROI_SIG_MAXS, count)?;
    let tick_mins = index_array(fields, fields::ROI_TICK_MINS, count)?;
    let tick_maxs = index_array(fields, fields::ROI_TICK_MAXS, count)?;
    let underflows = index_array(fields, fields::ROI_NUNDERFLOWS, count)?;
    let overflows = index_array(fields, fields::ROI_NOVERFLOWS, count)?;
    let areas = if fields.contains_key(fields::ROI_SIG_AREAS) {
        Some(float_array(fields, fields::ROI_SIG_AREAS, count)?)
    } else {
        None
    };

    Ok((0..count)
        .map(|index| Roi {
            tick0: tick0s[index],
            n_ticks: n_ticks[index],
            area: areas.as_ref().map(|areas| areas[index]),
            sig_min: sig_mins[index],
            sig_max: sig_maxs[index],
            tick_min: tick_mins[index],
            tick_max: tick_maxs[index],
            n_underflow: underflows[index],
            n_overflow: overflows[index],
        })
        .collect())
}

pub fn rois_to_fields(rois: &[Roi]) -> ResultFields {
    let ints = |select: fn(&Roi) -> usize| {
        FieldValue::IntVec(rois.iter().map(|roi| select(roi) as i64).collect())
    };
    let floats =
        |select: fn(&Roi) -> f64| FieldValue::FloatVec(rois.iter().map(select).collect());

    let mut result = ResultFields::new();
    result.insert(fields::ROI_COUNT.to_string(), FieldValue::Int(rois.len() as i64));
    result.insert(fields::ROI_TICK0S.to_string(), ints(|roi| roi.tick0));
    result.insert(fields::ROI_NTICKS.to_string(), ints(|roi| roi.n_ticks));
    result.insert(fields::ROI_SIG_MINS.to_string(), floats(|roi| roi.sig_min));
    result.insert(fields::ROI_SIG_MAXS.to_string(), floats(|roi| roi.sig_max));
    result.insert(fields::ROI_TICK_MINS.to_string(), ints(|roi| roi.tick_min));
    result.insert(fields::ROI_TICK_MAXS.to_string(), ints(|roi| roi.tick_max));
    result.insert(fields::ROI_NUNDERFLOWS.to_string(), ints(|roi| roi.n_underflow));
    result.insert(fields::ROI_NOVERFLOWS.to_string(), ints(|roi| roi.n_overflow));
    let areas: Option<Vec<f64>> = rois.iter().map(|roi| roi.area).collect();
    if let Some(areas) = areas {
        result.insert(fields::ROI_SIG_AREAS.to_string(), FieldValue::FloatVec(areas));
    }
    result
}

/// Pedestal as the median raw code.
#[derive(Debug, Clone, Copy, Default)]
pub struct MedianPedestalFinder;

impl AdcChannelProcessor for MedianPedestalFinder {
    fn name(&self) -> &str {
        "median-pedestal"
    }

    fn process(&self, record: &mut ChannelEventRecord) -> Result<ResultFields, ProcessorError> {
        if record.raw.is_empty() {
            return Err(ProcessorError::MissingUpstream {
                processor: self.name().to_string(),
                requirement: "raw samples",
            });
        }
        let mut sorted = record.raw.clone();
        sorted.sort_unstable();
        let middle = sorted.len() / 2;
        let pedestal = if sorted.len() % 2 == 0 {
            0.5 * (f64::from(sorted[middle - 1]) + f64::from(sorted[middle]))
        } else {
            f64::from(sorted[middle])
        };

        record.pedestal = Some(pedestal);
        let mut result = ResultFields::new();
        result.insert(fields::PEDESTAL.to_string(), FieldValue::Float(pedestal));
        Ok(result)
    }
}

/// Fills `samples` with `raw - pedestal`, scaled by the channel's inverse gain
/// when a calibration table is supplied, and flags digitizer-limit samples.
#[derive(Debug, Clone, Default)]
pub struct PedestalSubtractedSampleFiller {
    calibration: Option<CalibrationTable>,
}

impl PedestalSubtractedSampleFiller {
    pub const CALIBRATED_UNIT: &'static str = "ke";

    pub fn adc() -> Self {
        Self { calibration: None }
    }

    pub fn calibrated(table: CalibrationTable) -> Self {
        Self {
            calibration: Some(table),
        }
    }
}

impl AdcChannelProcessor for PedestalSubtractedSampleFiller {
    fn name(&self) -> &str {
        "pedestal-subtracted-samples"
    }

    fn process(&self, record: &mut ChannelEventRecord) -> Result<ResultFields, ProcessorError> {
        let pedestal = record.pedestal.ok_or_else(|| ProcessorError::MissingUpstream {
            processor: self.name().to_string(),
            requirement: "a pedestal",
        })?;

        let (scale, floor, unit) = match &self.calibration {
            Some(table) => {
                let entry = table
                    .entry(record.channel)
                    .ok_or(ProcessorError::MissingCalibration {
                        channel: record.channel,
                    })?;
                (
                    entry.inverse_gain,
                    Some(entry.adc_floor),
                    Self::CALIBRATED_UNIT.to_string(),
                )
            }
            None => (1.0, None, SampleUnit::AdcCount.label().to_string()),
        };

        record.samples = record
            .raw
            .iter()
            .map(|&code| scale * (f64::from(code) - pedestal))
            .collect();
        record.flags = record
            .raw
            .iter()
            .map(|&code| {
                if code == 0 || floor.is_some_and(|floor| i64::from(code) <= floor) {
                    SampleFlag::Underflow
                } else if code >= ADC_MAX_CODE {
                    SampleFlag::Overflow
                } else {
                    SampleFlag::Normal
                }
            })
            .collect();
        record.sample_unit = Some(unit.clone());

        let mut result = ResultFields::new();
        result.insert(fields::SAMPLE_UNIT.to_string(), FieldValue::Str(unit));
        Ok(result)
    }
}

fn measure_roi(samples: &[f64], flags: &[SampleFlag], tick0: usize, n_ticks: usize) -> Roi {
    let mut roi = Roi {
        tick0,
        n_ticks,
        area: Some(0.0),
        sig_min: f64::INFINITY,
        sig_max: f64::NEG_INFINITY,
        tick_min: tick0,
        tick_max: tick0,
        n_underflow: 0,
        n_overflow: 0,
    };
    let mut area = 0.0;
    for tick in tick0..tick0 + n_ticks {
        let value = samples[tick];
        area += value;
        if value < roi.sig_min {
            roi.sig_min = value;
            roi.tick_min = tick;
        }
        if value > roi.sig_max {
            roi.sig_max = value;
            roi.tick_max = tick;
        }
        match flags.get(tick) {
            Some(SampleFlag::Underflow) => roi.n_underflow += 1,
            Some(SampleFlag::Overflow) => roi.n_overflow += 1,
            _ => {}
        }
    }
    roi.area = Some(area);
    roi
}

fn require_samples<'a>(
    processor: &dyn AdcChannelProcessor,
    record: &'a ChannelEventRecord,
) -> Result<&'a [f64], ProcessorError> {
    if record.samples.is_empty() {
        return Err(ProcessorError::MissingUpstream {
            processor: processor.name().to_string(),
            requirement: "filled samples",
        });
    }
    Ok(&record.samples)
}

/// ROIs around runs of samples with `|signal| > threshold`, padded and merged.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdRoiFinder {
    pub threshold: f64,
    pub padding: usize,
}

impl ThresholdRoiFinder {
    pub fn new(threshold: f64, padding: usize) -> Self {
        Self { threshold, padding }
    }
}

impl AdcChannelProcessor for ThresholdRoiFinder {
    fn name(&self) -> &str {
        "threshold-roi-finder"
    }

    fn process(&self, record: &mut ChannelEventRecord) -> Result<ResultFields, ProcessorError> {
        let samples = require_samples(self, record)?;
        let n_ticks = samples.len();

        let mut spans: Vec<(usize, usize)> = Vec::new();
        let mut tick = 0;
        while tick < n_ticks {
            if samples[tick].abs() <= self.threshold {
                tick += 1;
                continue;
            }
            let start = tick;
            while tick < n_ticks && samples[tick].abs() > self.threshold {
                tick += 1;
            }
            let begin = start.saturating_sub(self.padding);
            let end = (tick + self.padding).min(n_ticks);
            match spans.last_mut() {
                Some(last) if begin <= last.1 => last.1 = last.1.max(end),
                _ => spans.push((begin, end)),
            }
        }

        let rois: Vec<Roi> = spans
            .iter()
            .map(|&(begin, end)| measure_roi(samples, &record.flags, begin, end - begin))
            .collect();
        Ok(rois_to_fields(&rois))
    }
}

/// One ROI per injection period, starting at tick 0; the last may be partial.
#[derive(Debug, Clone, Copy)]
pub struct TickModRoiFinder {
    pub period: usize,
}

impl AdcChannelProcessor for TickModRoiFinder {
    fn name(&self) -> &str {
        "tickmod-roi-finder"
    }

    fn process(&self, record: &mut ChannelEventRecord) -> Result<ResultFields, ProcessorError> {
        if self.period == 0 {
            return Err(ProcessorError::InvalidValue {
                field: "period",
                value: 0,
            });
        }
        let samples = require_samples(self, record)?;
        let rois: Vec<Roi> = (0..samples.len())
            .step_by(self.period)
            .map(|tick0| {
                let n_ticks = self.period.min(samples.len() - tick0);
                measure_roi(samples, &record.flags, tick0, n_ticks)
            })
            .collect();
        Ok(rois_to_fields(&rois))
    }
}

pub const DEFAULT_ROI_PADDING: usize = 3;

/// Pedestal, sample filling and the ROI finder matching `roi_mode`.
///
/// Tick-mod ROI finding without a period falls back to the threshold finder.
pub fn reference_pipeline(
    roi_mode: RoiMode,
    tick_period: Option<usize>,
    roi_threshold: f64,
    calibration: Option<CalibrationTable>,
) -> Vec<Box<dyn AdcChannelProcessor>> {
    let filler = match calibration {
        Some(table) => PedestalSubtractedSampleFiller::calibrated(table),
        None => PedestalSubtractedSampleFiller::adc(),
    };
    let mut pipeline: Vec<Box<dyn AdcChannelProcessor>> =
        vec![Box::new(MedianPedestalFinder), Box::new(filler)];
    match (roi_mode, tick_period) {
        (RoiMode::None, _) => {}
        (RoiMode::TickMod, Some(period)) => pipeline.push(Box::new(TickModRoiFinder { period })),
        (RoiMode::Peak, _) | (RoiMode::TickMod, None) => pipeline.push(Box::new(
            ThresholdRoiFinder::new(roi_threshold, DEFAULT_ROI_PADDING),
        )),
    }
    pipeline
}

#[cfg(test)]
mod tests {
    use super::{
        ChannelEventRecord, FieldValue, MedianPedestalFinder, PedestalSubtractedSampleFiller,
        ProcessorError, ResultFields, SampleFlag, ThresholdRoiFinder, TickModRoiFinder, fields,
        float_field, reference_pipeline, rois_from_fields, rois_to_fields, str_field,
    };
    use crate::domain::RoiMode;
    use crate::domain::{FembErrorCategory, FembError};
    use crate::modules::AdcChannelProcessor;
    use crate::modules::calibration::{CalibrationEntry, CalibrationTable};
    use crate::modules::features::Roi;

    fn pulsed_raw() -> Vec<u16> {
        let mut raw = vec![500_u16; 200];
        for (offset, height) in [20, 80, 100, 60, 10].iter().enumerate() {
            raw[50 + offset] = 500 + height;
            raw[150 + offset] = 500 - height;
        }
        raw
    }

    #[test]
    fn pedestal_is_the_median_code() {
        let mut record = ChannelEventRecord::new(0, 0, pulsed_raw());
        let result = MedianPedestalFinder.process(&mut record).expect("pedestal");
        assert_eq!(float_field(&result, fields::PEDESTAL), Ok(500.0));
        assert_eq!(record.pedestal, Some(500.0));

        let mut even = ChannelEventRecord::new(0, 0, vec![10, 20, 30, 40]);
        MedianPedestalFinder.process(&mut even).expect("pedestal");
        assert_eq!(even.pedestal, Some(25.0));

        let mut empty = ChannelEventRecord::new(0, 0, Vec::new());
        assert!(matches!(
            MedianPedestalFinder.process(&mut empty),
            Err(ProcessorError::MissingUpstream { .. })
        ));
    }

    #[test]
    fn sample_filler_needs_a_pedestal() {
        let mut record = ChannelEventRecord::new(0, 0, pulsed_raw());
        let error = PedestalSubtractedSampleFiller::adc()
            .process(&mut record)
            .expect_err("no pedestal yet");
        assert_eq!(
            FembError::from(error).category(),
            FembErrorCategory::MissingUpstreamData
        );
    }

    #[test]
    fn calibrated_filler_scales_and_flags_samples() {
        let table = CalibrationTable {
            label: "femb01_g2_s2".to_string(),
            unit: "ke/ADC count".to_string(),
            entries: vec![CalibrationEntry {
                channel: 3,
                inverse_gain: 0.02,
                adc_floor: 120,
            }],
        };
        let filler = PedestalSubtractedSampleFiller::calibrated(table);
        let mut record = ChannelEventRecord::new(3, 0, vec![600, 100, 4095, 1100]);
        record.pedestal = Some(600.0);

        let result = filler.process(&mut record).expect("samples");
        assert_eq!(str_field(&result, fields::SAMPLE_UNIT), Ok("ke"));
        assert_eq!(record.samples[0], 0.0);
        assert!((record.samples[3] - 10.0).abs() < 1.0e-12);
        assert_eq!(
            record.flags,
            vec![
                SampleFlag::Normal,
                SampleFlag::Underflow,
                SampleFlag::Overflow,
                SampleFlag::Normal
            ]
        );

        let mut other = ChannelEventRecord::new(4, 0, vec![600]);
        other.pedestal = Some(600.0);
        assert_eq!(
            filler.process(&mut other),
            Err(ProcessorError::MissingCalibration { channel: 4 })
        );
    }

    #[test]
    fn threshold_finder_reports_both_polarities() {
        let mut record = ChannelEventRecord::new(0, 0, pulsed_raw());
        MedianPedestalFinder.process(&mut record).expect("pedestal");
        PedestalSubtractedSampleFiller::adc()
            .process(&mut record)
            .expect("samples");

        let result = ThresholdRoiFinder::new(15.0, 2)
            .process(&mut record)
            .expect("rois");
        let rois = rois_from_fields(&result).expect("roi fields");
        assert_eq!(rois.len(), 2);

        let positive = &rois[0];
        assert_eq!(positive.tick0, 48);
        assert_eq!(positive.n_ticks, 9);
        assert_eq!(positive.sig_max, 100.0);
        assert_eq!(positive.tick_max, 52);
        assert_eq!(positive.area, Some(270.0));

        let negative = &rois[1];
        assert_eq!(negative.sig_min, -100.0);
        assert_eq!(negative.tick_min, 152);
        assert_eq!(negative.area, Some(-270.0));
    }

    #[test]
    fn tickmod_finder_covers_the_window_with_a_partial_tail() {
        let mut record = ChannelEventRecord::new(0, 0, vec![500; 25]);
        record.samples = vec![0.0; 25];
        let result = TickModRoiFinder { period: 10 }
            .process(&mut record)
            .expect("rois");
        let rois = rois_from_fields(&result).expect("roi fields");
        let spans: Vec<(usize, usize)> = rois.iter().map(|roi| (roi.tick0, roi.n_ticks)).collect();
        assert_eq!(spans, vec![(0, 10), (10, 10), (20, 5)]);
    }

    #[test]
    fn roi_fields_round_trip_without_areas() {
        let rois = vec![Roi {
            tick0: 10,
            n_ticks: 5,
            area: None,
            sig_min: -3.0,
            sig_max: 40.0,
            tick_min: 14,
            tick_max: 12,
            n_underflow: 0,
            n_overflow: 1,
        }];
        let result = rois_to_fields(&rois);
        assert!(!result.contains_key(fields::ROI_SIG_AREAS));
        assert_eq!(rois_from_fields(&result).expect("roi fields"), rois);
    }

    #[test]
    fn malformed_roi_fields_are_rejected() {
        assert_eq!(
            rois_from_fields(&ResultFields::new()),
            Err(ProcessorError::MissingField {
                field: fields::ROI_COUNT
            })
        );

        let mut result = rois_to_fields(&[]);
        result.insert(fields::ROI_COUNT.to_string(), FieldValue::Int(1));
        assert!(matches!(
            rois_from_fields(&result),
            Err(ProcessorError::LengthMismatch { .. })
        ));

        result.insert(fields::ROI_COUNT.to_string(), FieldValue::Float(1.0));
        assert!(matches!(
            rois_from_fields(&result),
            Err(ProcessorError::FieldType { .. })
        ));
        assert_eq!(rois_from_fields(&rois_to_fields(&[])), Ok(Vec::new()));
    }

    #[test]
    fn reference_pipeline_follows_roi_mode() {
        let names = |mode, period| -> Vec<String> {
            reference_pipeline(mode, period, 10.0, None)
                .iter()
                .map(|processor| processor.name().to_string())
                .collect()
        };
        assert_eq!(names(RoiMode::None, None).len(), 2);
        assert_eq!(
            names(RoiMode::Peak, Some(50)).last().map(String::as_str),
            Some("threshold-roi-finder")
        );
        assert_eq!(
            names(RoiMode::TickMod, Some(50)).last().map(String::as_str),
            Some("tickmod-roi-finder")
        );
        assert_eq!(
            names(RoiMode::TickMod, None).last().map(String::as_str),
            Some("threshold-roi-finder")
        );
    }
}
