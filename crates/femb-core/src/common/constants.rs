//! FEMB test-stand constants shared by the scan model and the reference processors.

/// Electrons per femtocoulomb.
pub const ELECTRONS_PER_FC: f64 = 6241.51;
/// Internal pulser injection capacitance [fF].
pub const INJECTION_CAPACITANCE_FF: f64 = 183.0;
/// Internal pulser DAC voltage step [mV].
pub const INTERNAL_DAC_STEP_MV: f64 = 18.75;
/// Nominal external pulser charge step [fC].
pub const EXTERNAL_PULSER_STEP_FC: f64 = 5.62;
/// Number of entries in the nominal external pulser charge table.
pub const EXTERNAL_PULSER_STEPS: usize = 32;
/// Nominal ADC gain [ADC count / mV].
pub const NOMINAL_ADC_GAIN_PER_MV: f64 = 3.0;
/// Preamplifier gain [mV/fC] by gain index.
pub const PREAMP_GAIN_MV_PER_FC: [f64; 4] = [4.7, 7.8, 14.0, 25.0];
/// Largest code of the 12-bit digitizer.
pub const ADC_MAX_CODE: u16 = 4095;
/// Modulus of the low-order bit pattern checked for sticky codes.
pub const STICKY_CODE_MODULUS: u16 = 64;

/// Convert a charge in fC to ke.
pub fn fc_to_ke(charge_fc: f64) -> f64 {
    charge_fc * ELECTRONS_PER_FC / 1000.0
}
