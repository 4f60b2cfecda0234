//! Sticky-code metrics for a group of raw digitizer codes.
//!
//! A healthy channel spreads its codes over neighbouring values. Stuck low-order
//! bits show up as an excess of codes at `code % 64` equal to 0, 1 or 63, and a
//! single dominant code shows up as a large mode fraction.

use crate::common::constants::STICKY_CODE_MODULUS;
use crate::numerics::stable_sum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickyCodeMetrics {
    pub count: usize,
    pub max_code: Option<u16>,
    pub max_count: usize,
    pub mean: Option<f64>,
    pub mean_excluding_max: Option<f64>,
    /// Fraction of codes equal to the most frequent one (`s1`).
    pub max_fraction: Option<f64>,
    pub mod0_fraction: Option<f64>,
    pub mod1_fraction: Option<f64>,
    pub mod63_fraction: Option<f64>,
    /// `mod0 + mod63`.
    pub classic_fraction: Option<f64>,
}

impl StickyCodeMetrics {
    pub fn from_codes(codes: &[u16]) -> Self {
        if codes.is_empty() {
            return Self::default();
        }

        let mut counts: HashMap<u16, usize> = HashMap::new();
        let mut max_code = codes[0];
        let mut max_count = 0;
        let mut mod_counts = [0_usize; 3];
        for &code in codes {
            let count = counts.entry(code).or_insert(0);
            *count += 1;
            // Strict comparison keeps the first code to reach the maximum.
            if *count > max_count {
                max_count = *count;
                max_code = code;
            }
            match code % STICKY_CODE_MODULUS {
                0 => mod_counts[0] += 1,
                1 => mod_counts[1] += 1,
                residue if residue == STICKY_CODE_MODULUS - 1 => mod_counts[2] += 1,
                _ => {}
            }
        }

        let total = codes.len() as f64;
        let values: Vec<f64> = codes.iter().map(|&code| f64::from(code)).collect();
        let others: Vec<f64> = codes
            .iter()
            .filter(|&&code| code != max_code)
            .map(|&code| f64::from(code))
            .collect();
        let mean_excluding_max =
            (!others.is_empty()).then(|| stable_sum(&others) / others.len() as f64);

        let mod0 = mod_counts[0] as f64 / total;
        let mod63 = mod_counts[2] as f64 / total;

        Self {
            count: codes.len(),
            max_code: Some(max_code),
            max_count,
            mean: Some(stable_sum(&values) / total),
            mean_excluding_max,
            max_fraction: Some(max_count as f64 / total),
            mod0_fraction: Some(mod0),
            mod1_fraction: Some(mod_counts[1] as f64 / total),
            mod63_fraction: Some(mod63),
            classic_fraction: Some(mod0 + mod63),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
