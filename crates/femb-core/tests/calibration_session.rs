use femb_core::common::config::{CalibrationConfig, FitRequest, SignalParameters};
use femb_core::domain::{
    CalibrationMode, ChargeRule, FembErrorCategory, Polarity, PolarityConvention,
    PolaritySelection, PulseSource, RoiMode, SampleUnit, ScanDescriptor, ValueKind,
};
use femb_core::modules::calibration::{CalibrationEntry, CalibrationField};
use femb_core::modules::features::{EventHeader, extract};
use femb_core::modules::processors::{
    MedianPedestalFinder, PedestalSubtractedSampleFiller, ThresholdRoiFinder, fields,
    rois_to_fields,
};
use femb_core::modules::{
    AdcChannelProcessor, CalibrationSession, CalibrationStatus, CalibrationTable,
    ChannelEventRecord, ChannelOutcome, EdgeExclusionPolicy, FieldValue, InMemoryWaveformSource,
    ProcessorError, ResponseModelKind, ResultFields, Roi, StickyCodeMetrics,
    build_response_points, reference_pipeline,
};
use std::cell::Cell;
use std::rc::Rc;

const PULSE_SHAPE: [f64; 5] = [0.1, 0.4, 1.0, 0.4, 0.1];
const N_TICKS: usize = 220;
const PEDESTAL: u16 = 2000;
const INJECTED_GAIN: f64 = 50.0;
const POSITIVE_NOISE: [f64; 10] = [2.0, -2.0, 1.0, -3.0, 2.0, -1.0, 3.0, -2.0, 1.0, -2.0];
const NEGATIVE_NOISE: [f64; 10] = [-1.0, 2.0, -2.0, 3.0, -1.0, 2.0, -3.0, 1.0, -2.0, 2.0];

/// Pedestal plus pulses given as (peak tick, signed peak height), clamped to `[floor, 4095]`.
fn waveform(n_ticks: usize, pedestal: u16, pulses: &[(usize, f64)], floor: u16) -> Vec<u16> {
    let mut codes = vec![pedestal; n_ticks];
    for &(peak, height) in pulses {
        for (offset, fraction) in PULSE_SHAPE.iter().enumerate() {
            let tick = peak + offset - 2;
            let value = f64::from(pedestal) + (fraction * height).round();
            codes[tick] = value.clamp(f64::from(floor), 4095.0) as u16;
        }
    }
    codes
}

fn half_fc_scan() -> ScanDescriptor {
    ScanDescriptor::new(2, 2, 2, PulseSource::External).with_charge_rule(ChargeRule::Table {
        charges_fc: (1..=10).map(|step| 0.5 * step as f64).collect(),
    })
}

/// Ten events with one positive and one negative pulse each, at 50 ADC/ke plus a
/// fixed residual pattern of about two counts.
fn gain_scan_source(scan: &ScanDescriptor, channels: usize) -> InMemoryWaveformSource {
    InMemoryWaveformSource::new(gain_scan_events(scan, channels)).expect("rectangular waveforms")
}

fn gain_scan_events(scan: &ScanDescriptor, channels: usize) -> Vec<Vec<Vec<u16>>> {
    (0..10)
        .map(|event| {
            let charge_ke = scan.charge_ke(event).expect("charge table covers the scan");
            let nominal = (INJECTED_GAIN * charge_ke).round();
            let pulses = [
                (60, nominal + POSITIVE_NOISE[event]),
                (160, -(nominal + NEGATIVE_NOISE[event])),
            ];
            vec![waveform(N_TICKS, PEDESTAL, &pulses, 0); channels]
        })
        .collect()
}

fn adc_session(channels: usize) -> CalibrationSession {
    let scan = half_fc_scan();
    let source = gain_scan_source(&scan, channels);
    let config = CalibrationConfig::default();
    let pipeline = reference_pipeline(config.roi_mode, config.tick_period, 20.0, None);
    CalibrationSession::new(scan, config)
        .with_source(source)
        .with_processors(pipeline)
}

struct CountingPedestal {
    calls: Rc<Cell<usize>>,
}

impl AdcChannelProcessor for CountingPedestal {
    fn name(&self) -> &str {
        "counting-pedestal"
    }

    fn process(&self, record: &mut ChannelEventRecord) -> Result<ResultFields, ProcessorError> {
        self.calls.set(self.calls.get() + 1);
        MedianPedestalFinder.process(record)
    }
}

/// Reports a fixed ROI list and unit without looking at the samples.
struct ScriptedRois {
    rois: Vec<Roi>,
    unit_for_event: fn(usize) -> &'static str,
}

impl AdcChannelProcessor for ScriptedRois {
    fn name(&self) -> &str {
        "scripted-rois"
    }

    fn process(&self, record: &mut ChannelEventRecord) -> Result<ResultFields, ProcessorError> {
        record.samples = vec![0.0; record.raw.len()];
        let mut result = rois_to_fields(&self.rois);
        result.insert(fields::PEDESTAL.to_string(), FieldValue::Float(500.0));
        result.insert(
            fields::SAMPLE_UNIT.to_string(),
            FieldValue::Str((self.unit_for_event)(record.event).to_string()),
        );
        Ok(result)
    }
}

struct RejectChannel(usize);

impl AdcChannelProcessor for RejectChannel {
    fn name(&self) -> &str {
        "reject-channel"
    }

    fn process(&self, record: &mut ChannelEventRecord) -> Result<ResultFields, ProcessorError> {
        if record.channel == self.0 {
            return Err(ProcessorError::LengthMismatch {
                field: fields::ROI_TICK0S,
                expected: 2,
                found: 1,
            });
        }
        Ok(ResultFields::new())
    }
}

fn roi(tick0: usize, sig_min: f64, sig_max: f64, area: Option<f64>) -> Roi {
    Roi {
        tick0,
        n_ticks: 10,
        area,
        sig_min,
        sig_max,
        tick_min: tick0 + 5,
        tick_max: tick0 + 3,
        n_underflow: 0,
        n_overflow: 0,
    }
}

#[test]
fn board_pass_recovers_the_injected_gain() {
    let mut session = adc_session(2);
    let board = session.process_all().expect("board pass should run");

    assert_eq!(board.label, "femb02_g2_s2");
    assert_eq!(board.sample_unit.as_deref(), Some("ADC count"));
    assert!(board.nominal_gain.is_some_and(|gain| gain > 0.0));
    assert_eq!(board.channels.len(), 2);
    for outcome in &board.channels {
        let calibration = outcome.calibration().expect("channel should be processed");
        let canonical_fit = calibration
            .fit(FitRequest::CANONICAL)
            .expect("canonical fit is always requested");
        assert_eq!(canonical_fit.model_kind, ResponseModelKind::TwoSided);
        assert_eq!(canonical_fit.points.points.len(), 20);

        let fit = calibration.canonical().expect("canonical fit should be performed");
        let relative = (fit.gain() - INJECTED_GAIN).abs() / INJECTED_GAIN;
        assert!(relative < 0.01, "gain {} should be within 1%", fit.gain());
        let chi_square_per_dof = fit.chi_square_per_dof().expect("dof > 0");
        assert!(
            (0.5..=2.0).contains(&chi_square_per_dof),
            "chi2/dof {chi_square_per_dof} should be near one"
        );
        assert!(fit.model.low().is_none());
        assert!(fit.model.high().is_none());
        assert_eq!(fit.window.len(), 20);
        assert!(fit.gain_error().expect("refit uncertainty") > 0.0);
        assert!(calibration.deviation.is_none());
    }

    let gains = board.gain.expect("gain distribution");
    assert_eq!(gains.summary.count, 2);
    assert!(gains.summary.rms < 1.0e-9);

    // Nothing saturates low, so no underflow floor can be derived.
    let CalibrationStatus::Incomplete { missing } = &board.calibration else {
        panic!("expected an incomplete table");
    };
    assert_eq!(missing.len(), 2);
    assert!(
        missing
            .iter()
            .all(|entry| entry.field == CalibrationField::LowSaturation)
    );
}

#[test]
fn inverted_scans_still_produce_gain_constants() {
    let mut scan = half_fc_scan();
    scan.polarity_convention = PolarityConvention::Inverted;
    let source = gain_scan_source(&scan, 1);
    let config = CalibrationConfig::default();
    let pipeline = reference_pipeline(config.roi_mode, config.tick_period, 20.0, None);
    let mut session = CalibrationSession::new(scan, config)
        .with_source(source)
        .with_processors(pipeline);
    let board = session.process_all().expect("board pass should run");

    let calibration = board.channels[0]
        .calibration()
        .expect("channel should be processed");
    let fit = calibration.canonical().expect("canonical fit should be performed");
    assert!(fit.gain() < 0.0, "inverted charge sign gives gain {}", fit.gain());

    match &board.calibration {
        CalibrationStatus::Incomplete { missing } => assert!(
            missing
                .iter()
                .all(|entry| entry.field != CalibrationField::Gain)
        ),
        CalibrationStatus::Complete { table } => assert!(table.entries[0].inverse_gain > 0.0),
        CalibrationStatus::NotApplicable => panic!("raw ADC scans produce constants"),
    }
}

#[test]
fn signal_events_without_rois_are_flagged() {
    let scan = half_fc_scan();
    let mut events = gain_scan_events(&scan, 1);
    events[3] = vec![vec![PEDESTAL; N_TICKS]];
    let source = InMemoryWaveformSource::new(events).expect("rectangular waveforms");
    let config = CalibrationConfig::default();
    let pipeline = reference_pipeline(config.roi_mode, config.tick_period, 20.0, None);
    let mut session = CalibrationSession::new(scan, config)
        .with_source(source)
        .with_processors(pipeline);

    let calibration = session.process_channel(0).expect("channel should be processed");
    let flagged: Vec<&String> = calibration
        .warnings
        .iter()
        .filter(|warning| warning.starts_with("event "))
        .collect();
    assert_eq!(flagged, ["event 3: no retained ROIs (0 found, 0 excluded)"]);
    assert!(calibration.canonical().is_some());
}

#[test]
fn event_summaries_are_computed_once() {
    let calls = Rc::new(Cell::new(0));
    let scan = half_fc_scan();
    let source = gain_scan_source(&scan, 1);
    let mut session = CalibrationSession::new(scan, CalibrationConfig::default())
        .with_source(source)
        .with_processor(CountingPedestal {
            calls: Rc::clone(&calls),
        })
        .with_processor(PedestalSubtractedSampleFiller::adc())
        .with_processor(femb_core::modules::processors::ThresholdRoiFinder::new(20.0, 3));

    let first = session
        .process_channel_event(0, 3)
        .expect("summary")
        .clone();
    let second = session
        .process_channel_event(0, 3)
        .expect("summary")
        .clone();
    assert_eq!(first, second);
    assert_eq!(calls.get(), 1);

    session.process_channel(0).expect("channel");
    session.process_channel(0).expect("cached channel");
    assert_eq!(calls.get(), 10);
}

#[test]
fn polarities_are_sign_symmetric_through_the_processor_boundary() {
    let scan = ScanDescriptor::new(1, 2, 2, PulseSource::External);
    let source = InMemoryWaveformSource::new(vec![vec![vec![500; 1000]]]).expect("source");
    let mut session = CalibrationSession::new(scan, CalibrationConfig::default())
        .with_source(source)
        .with_processor(ScriptedRois {
            rois: vec![
                roi(100, -5.0, 100.0, Some(500.0)),
                roi(400, -80.0, 4.0, Some(-400.0)),
            ],
            unit_for_event: |_| "ADC count",
        });

    let summary = session.process_channel_event(0, 0).expect("summary");
    let positive = summary.polarity(Polarity::Positive).expect("positive pulses");
    let negative = summary.polarity(Polarity::Negative).expect("negative pulses");
    assert_eq!(positive.mean(ValueKind::Height), Some(100.0));
    assert_eq!(negative.mean(ValueKind::Height), Some(80.0));
    assert_eq!(positive.mean(ValueKind::Area), Some(500.0));
    assert_eq!(negative.mean(ValueKind::Area), Some(400.0));
    assert_eq!(positive.rms(ValueKind::Height), Some(0.0));
    assert_eq!(negative.rms(ValueKind::Height), Some(0.0));
}

#[test]
fn sticky_fractions_stay_in_bounds() {
    let groups: [&[u16]; 4] = [
        &[64, 64, 65, 127, 128, 300],
        &[1, 2, 3, 4, 5],
        &[4095; 7],
        &[511, 512, 513, 512, 512, 640, 641],
    ];
    for codes in groups {
        let metrics = StickyCodeMetrics::from_codes(codes);
        let s1 = metrics.max_fraction.expect("non-empty");
        let classic = metrics.classic_fraction.expect("non-empty");
        assert!((0.0..=1.0).contains(&s1));
        assert!((0.0..=1.0).contains(&classic));
        assert!(s1 >= 1.0 / codes.len() as f64);
    }

    let distinct = StickyCodeMetrics::from_codes(&[10, 20, 30, 40]);
    assert_eq!(distinct.max_fraction, Some(0.25));
    assert_eq!(StickyCodeMetrics::from_codes(&[]).max_fraction, None);
}

#[test]
fn saturated_points_are_inflated_or_excluded() {
    let scan = ScanDescriptor::new(1, 2, 2, PulseSource::External);
    let signal = SignalParameters::adc_defaults();
    let summary_for = |event: usize, height: f64, overflow: usize| {
        let charge_fc = scan.charge_fc(event).expect("table entry");
        let mut pulse = roi(100, -1.0, height, None);
        pulse.n_overflow = overflow;
        extract(
            EventHeader {
                channel: 0,
                event,
                pedestal: 500.0,
                charge_fc,
                charge_ke: scan.charge_ke(event).expect("table entry"),
                sample_unit: SampleUnit::AdcCount,
            },
            &[0.0; 400],
            &[],
            &[pulse],
            EdgeExclusionPolicy::WindowEdges,
        )
    };

    let summaries: Vec<_> = (0..6)
        .map(|event| {
            let height = 10.0 * (event + 1) as f64;
            summary_for(event, height, usize::from(event == 5))
        })
        .collect();
    let refs: Vec<_> = summaries.iter().map(Some).collect();
    let request = FitRequest::new(PolaritySelection::Positive, ValueKind::Height);

    let points = build_response_points(&scan, &refs, request, signal, true);
    assert_eq!(points.points.len(), 6);
    let saturated = &points.points[5];
    assert!(saturated.saturated);
    assert_eq!(saturated.dy, signal.dsig_min);
    assert_eq!(saturated.dy_fit, signal.dsig_flow);
    assert!(saturated.dy_fit > points.points[0].dy_fit);
    assert_eq!(points.eligible_count(), 6);

    // A model without saturation levels must not see the flagged point.
    let points = build_response_points(&scan, &refs, request, signal, false);
    assert_eq!(points.excluded, vec![5]);
    assert_eq!(points.eligible_count(), 5);
}

#[test]
fn channel_failures_stay_isolated() {
    let scan = half_fc_scan();
    let source = gain_scan_source(&scan, 2);
    let config = CalibrationConfig::default();
    let mut pipeline = reference_pipeline(config.roi_mode, None, 20.0, None);
    pipeline.push(Box::new(RejectChannel(1)));
    let mut session = CalibrationSession::new(scan, config)
        .with_source(source)
        .with_processors(pipeline);

    let board = session.process_all().expect("board pass");
    assert!(board.channels[0].calibration().is_some());
    let ChannelOutcome::Failed { channel, error } = &board.channels[1] else {
        panic!("channel 1 should fail");
    };
    assert_eq!(*channel, 1);
    assert_eq!(error.category(), FembErrorCategory::InconsistentData);
    assert_eq!(board.failed_channels().collect::<Vec<_>>(), vec![1]);

    let CalibrationStatus::Incomplete { missing } = &board.calibration else {
        panic!("expected an incomplete table");
    };
    assert!(missing.iter().any(|entry| {
        entry.channel == 1 && entry.field == CalibrationField::Channel
    }));
}

#[test]
fn calibrated_mode_rejects_raw_adc_samples() {
    let scan = half_fc_scan();
    let source = gain_scan_source(&scan, 1);
    let config = CalibrationConfig {
        calibration_mode: CalibrationMode::Height,
        ..CalibrationConfig::default()
    };
    let pipeline = reference_pipeline(config.roi_mode, None, 20.0, None);
    let mut session = CalibrationSession::new(scan, config)
        .with_source(source)
        .with_processors(pipeline);

    let error = session.process_channel(0).expect_err("unit mismatch is fatal");
    assert_eq!(error.code(), "DATA.UNIT_MISMATCH");
    assert_eq!(error.exit_code(), 3);
}

#[test]
fn a_unit_change_within_the_scan_is_fatal() {
    let scan = half_fc_scan();
    let source = gain_scan_source(&scan, 1);
    let mut session = CalibrationSession::new(scan, CalibrationConfig::default())
        .with_source(source)
        .with_processor(ScriptedRois {
            rois: Vec::new(),
            unit_for_event: |event| if event == 0 { "ADC count" } else { "ke" },
        });

    session.process_channel_event(0, 0).expect("first event fixes the unit");
    assert_eq!(session.sample_unit(), Some(&SampleUnit::AdcCount));
    let error = session
        .process_channel_event(0, 1)
        .expect_err("unit changed");
    assert_eq!(error.code(), "DATA.SAMPLE_UNIT_CHANGED");
    assert!(session.process_channel(0).is_err());
}

#[test]
fn roi_finding_requires_a_roi_count() {
    let scan = half_fc_scan();
    let source = gain_scan_source(&scan, 1);
    let mut session = CalibrationSession::new(scan, CalibrationConfig::default())
        .with_source(source)
        .with_processor(MedianPedestalFinder)
        .with_processor(PedestalSubtractedSampleFiller::adc());

    let error = session
        .process_channel_event(0, 0)
        .expect_err("no ROI finder ran");
    assert_eq!(error.code(), "DATA.ROI_COUNT_MISSING");
    assert_eq!(error.category(), FembErrorCategory::InconsistentData);

    // Zero ROIs is a valid answer.
    let scan = half_fc_scan();
    let source = InMemoryWaveformSource::new(vec![vec![vec![PEDESTAL; N_TICKS]]]).expect("source");
    let pipeline = reference_pipeline(RoiMode::Peak, None, 20.0, None);
    let mut session = CalibrationSession::new(scan, CalibrationConfig::default())
        .with_source(source)
        .with_processors(pipeline);
    let summary = session.process_channel_event(0, 0).expect("summary");
    assert_eq!(summary.roi_count, 0);
    assert!(summary.positive.is_none());
}

#[test]
fn calibrated_scans_report_deviations_instead_of_constants() {
    let scan = half_fc_scan();
    let source = gain_scan_source(&scan, 2);
    let config = CalibrationConfig {
        calibration_mode: CalibrationMode::Height,
        ..CalibrationConfig::default()
    };
    let table = CalibrationTable {
        label: scan.label(),
        unit: "ke/ADC count".to_string(),
        entries: (0..2)
            .map(|channel| CalibrationEntry {
                channel,
                inverse_gain: 1.0 / INJECTED_GAIN,
                adc_floor: 0,
            })
            .collect(),
    };
    let pipeline = reference_pipeline(config.roi_mode, None, 1.0, Some(table));
    let mut session = CalibrationSession::new(scan, config)
        .with_source(source)
        .with_processors(pipeline);

    let board = session.process_all().expect("board pass");
    assert_eq!(board.sample_unit.as_deref(), Some("ke"));
    assert_eq!(board.calibration, CalibrationStatus::NotApplicable);

    let calibration = board.channels[0].calibration().expect("processed");
    let canonical_fit = calibration
        .fit(FitRequest::CANONICAL)
        .expect("canonical request is in the default set");
    assert_eq!(canonical_fit.model_kind, ResponseModelKind::Linear);
    let deviation = calibration.deviation.as_ref().expect("calibrated scan");
    assert_eq!(deviation.bulk_count, 20);
    assert_eq!(deviation.tail_count, 0);
    assert!(deviation.bulk.as_ref().expect("bulk").mean.abs() < 0.1);

    let board_deviation = board.deviation.as_ref().expect("board deviation");
    assert_eq!(board_deviation.bulk_count, 40);
    assert_eq!(board_deviation.tail_fraction, Some(0.0));

    let records = session.pulse_records().expect("pulse records");
    assert_eq!(records.len(), 40);
    let record = &records[0];
    assert_eq!(record.board, 2);
    assert!(record.external_pulser);
    assert_eq!(record.values.len(), 1);
}

#[test]
fn tick_mod_scans_fold_the_pulse_train() {
    let scan = ScanDescriptor::new(1, 2, 2, PulseSource::External);
    let pulses: Vec<(usize, f64)> = (0..4).map(|period| (50 * period + 20, 300.0)).collect();
    let source =
        InMemoryWaveformSource::new(vec![vec![waveform(200, 500, &pulses, 0)]]).expect("source");
    let config = CalibrationConfig {
        roi_mode: RoiMode::TickMod,
        tick_period: Some(50),
        ..CalibrationConfig::default()
    };
    let pipeline = reference_pipeline(config.roi_mode, config.tick_period, 20.0, None);
    let mut session = CalibrationSession::new(scan, config)
        .with_source(source)
        .with_processors(pipeline);

    let summary = session.process_channel_event(0, 0).expect("summary");
    assert_eq!(summary.roi_count, 4);
    // First and final periods touch the window edges.
    assert_eq!(summary.excluded_roi_count, 2);
    let positive = summary.polarity(Polarity::Positive).expect("pulses");
    assert_eq!(positive.mean(ValueKind::Height), Some(300.0));

    let tick_mod = summary.tick_mod.as_ref().expect("tick period configured");
    assert_eq!(tick_mod.period, 50);
    assert_eq!(tick_mod.max_phase, Some(20));
    let peak = tick_mod.phase(20).expect("peak phase");
    assert_eq!(peak.signal.mean, 300.0);
    assert_eq!(peak.sticky.max_code, Some(800));
    assert_eq!(tick_mod.pedestal, summary.pedestal);
    assert_eq!(tick_mod.signal_efficiency, Some(1.0));
    assert_eq!(tick_mod.pedestal_efficiency, Some(1.0));
}
