use super::{ClockSource, PolarityConvention, PulseSource};
use crate::common::constants::{
    EXTERNAL_PULSER_STEP_FC, EXTERNAL_PULSER_STEPS, INJECTION_CAPACITANCE_FF,
    INTERNAL_DAC_STEP_MV, NOMINAL_ADC_GAIN_PER_MV, PREAMP_GAIN_MV_PER_FC,
    fc_to_ke,
};
use serde::{Deserialize, Serialize};

/// Rule mapping an event (DAC step) index to the injected charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChargeRule {
    /// Calibrated lookup table [fC] indexed by step.
    #[serde(rename_all = "camelCase")]
    Table { charges_fc: Vec<f64> },
    /// `capacitance x voltage step x step index`.
    #[serde(rename_all = "camelCase")]
    LinearStep { capacitance_ff: f64, step_mv: f64 },
}

impl ChargeRule {
    pub fn for_source(source: PulseSource) -> Self {
        match source {
            PulseSource::External => Self::nominal_external_table(),
            PulseSource::Internal => Self::LinearStep {
                capacitance_ff: INJECTION_CAPACITANCE_FF,
                step_mv: INTERNAL_DAC_STEP_MV,
            },
        }
    }

    /// External pulser table; the first step already carries signal.
    pub fn nominal_external_table() -> Self {
        Self::Table {
            charges_fc: (1..=EXTERNAL_PULSER_STEPS)
                .map(|step| step as f64 * EXTERNAL_PULSER_STEP_FC)
                .collect(),
        }
    }

    pub fn charge_fc(&self, event: usize) -> Option<f64> {
        match self {
            Self::Table { charges_fc } => charges_fc.get(event).copied(),
            Self::LinearStep {
                capacitance_ff,
                step_mv,
            } => Some(capacitance_ff * step_mv * 1.0e-3 * event as f64),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanDescriptor {
    pub board: u32,
    pub gain_index: usize,
    pub shaping_index: usize,
    pub pulse_source: PulseSource,
    #[serde(default)]
    pub clock_source: ClockSource,
    #[serde(default = "default_is_cold")]
    pub is_cold: bool,
    #[serde(default)]
    pub polarity_convention: PolarityConvention,
    #[serde(default)]
    pub charge_rule: Option<ChargeRule>,
}

fn default_is_cold() -> bool {
    true
}

impl ScanDescriptor {
    pub fn new(
        board: u32,
        gain_index: usize,
        shaping_index: usize,
        pulse_source: PulseSource,
    ) -> Self {
        Self {
            board,
            gain_index,
            shaping_index,
            pulse_source,
            clock_source: ClockSource::External,
            is_cold: true,
            polarity_convention: PolarityConvention::Normal,
            charge_rule: None,
        }
    }

    pub fn with_charge_rule(mut self, rule: ChargeRule) -> Self {
        self.charge_rule = Some(rule);
        self
    }

    pub fn charge_fc(&self, event: usize) -> Option<f64> {
        match &self.charge_rule {
            Some(rule) => rule.charge_fc(event),
            None => ChargeRule::for_source(self.pulse_source).charge_fc(event),
        }
    }

    pub fn charge_ke(&self, event: usize) -> Option<f64> {
        self.charge_fc(event).map(fc_to_ke)
    }

    /// First event index carrying signal.
    pub fn first_signal_event(&self) -> usize {
        match self.pulse_source {
            PulseSource::External => 0,
            PulseSource::Internal => 1,
        }
    }

    /// Internal pulser steps below two are outside the source's linear range.
    pub fn excluded_from_fit(&self, event: usize) -> bool {
        self.pulse_source == PulseSource::Internal && event < 2
    }

    pub fn preamp_gain_mv_per_fc(&self) -> Option<f64> {
        PREAMP_GAIN_MV_PER_FC.get(self.gain_index).copied()
    }

    /// Design gain [ADC count / ke] from the preamp and ADC gains.
    pub fn nominal_gain_adc_per_ke(&self) -> Option<f64> {
        self.preamp_gain_mv_per_fc()
            .map(|mv_per_fc| mv_per_fc * NOMINAL_ADC_GAIN_PER_MV / fc_to_ke(1.0))
    }

    pub fn label(&self) -> String {
        format!(
            "femb{:02}_g{}_s{}",
            self.board, self.gain_index, self.shaping_index
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{ChargeRule, ScanDescriptor};
    use crate::domain::PulseSource;

    #[test]
    fn internal_pulser_uses_linear_capacitance_steps() {
        let scan = ScanDescriptor::new(1, 2, 2, PulseSource::Internal);
        assert_eq!(scan.charge_fc(0), Some(0.0));
        let step = scan.charge_fc(4).expect("linear rule covers every step");
        assert!((step - 4.0 * 3.43125).abs() < 1.0e-9);
        assert_eq!(scan.first_signal_event(), 1);
        assert!(scan.excluded_from_fit(1));
        assert!(!scan.excluded_from_fit(2));
    }

    #[test]
    fn external_pulser_table_carries_signal_from_first_step() {
        let scan = ScanDescriptor::new(1, 2, 2, PulseSource::External);
        assert!(scan.charge_fc(0).expect("table entry") > 0.0);
        assert_eq!(scan.first_signal_event(), 0);
        assert!(!scan.excluded_from_fit(0));
        assert_eq!(scan.charge_fc(1000), None);
    }

    #[test]
    fn custom_table_overrides_source_default() {
        let scan = ScanDescriptor::new(7, 3, 1, PulseSource::External).with_charge_rule(
            ChargeRule::Table {
                charges_fc: vec![0.0, 10.0],
            },
        );
        assert_eq!(scan.charge_fc(1), Some(10.0));
        assert_eq!(scan.charge_fc(2), None);
        assert_eq!(scan.label(), "femb07_g3_s1");
    }

    #[test]
    fn nominal_gain_follows_preamp_gain_index() {
        let scan = ScanDescriptor::new(1, 2, 2, PulseSource::Internal);
        let gain = scan.nominal_gain_adc_per_ke().expect("gain index 2 is tabulated");
        assert!((gain - 14.0 * 3.0 / 6.24151).abs() < 1.0e-9);
        let unknown = ScanDescriptor::new(1, 9, 2, PulseSource::Internal);
        assert_eq!(unknown.nominal_gain_adc_per_ke(), None);
    }

    #[test]
    fn scan_descriptor_reads_camel_case_json() {
        let scan: ScanDescriptor = serde_json::from_str(
            r#"{
                "board": 3,
                "gainIndex": 2,
                "shapingIndex": 1,
                "pulseSource": "internal",
                "chargeRule": { "kind": "table", "chargesFc": [0.0, 5.0] }
            }"#,
        )
        .expect("scan should parse");
        assert_eq!(scan.board, 3);
        assert!(scan.is_cold);
        assert_eq!(scan.charge_fc(1), Some(5.0));
    }
}
