use crate::domain::{PolaritySelection, PulseSource};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseModelKind {
    /// Linear, saturating above.
    ClippedAbove,
    /// Linear, saturating below.
    ClippedBelow,
    /// Linear, saturating on both sides.
    TwoSided,
    /// Two-sided saturation with a dead zone `|x| <= x0` around zero charge.
    ChargeOffset,
    Linear,
}

impl ResponseModelKind {
    pub const fn allows_low(self) -> bool {
        matches!(self, Self::ClippedBelow | Self::TwoSided | Self::ChargeOffset)
    }

    pub const fn allows_high(self) -> bool {
        matches!(self, Self::ClippedAbove | Self::TwoSided | Self::ChargeOffset)
    }

    pub const fn has_offset(self) -> bool {
        matches!(self, Self::ChargeOffset)
    }

    pub const fn handles_saturation(self) -> bool {
        !matches!(self, Self::Linear)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClippedAbove => "clippedAbove",
            Self::ClippedBelow => "clippedBelow",
            Self::TwoSided => "twoSided",
            Self::ChargeOffset => "chargeOffset",
            Self::Linear => "linear",
        }
    }
}

pub fn select_model(
    selection: PolaritySelection,
    calibrated: bool,
    source: PulseSource,
) -> ResponseModelKind {
    match (selection, calibrated, source) {
        (PolaritySelection::Positive, _, _) => ResponseModelKind::ClippedAbove,
        (PolaritySelection::Negative, _, _) => ResponseModelKind::ClippedBelow,
        (PolaritySelection::Both, true, _) => ResponseModelKind::Linear,
        (PolaritySelection::Both, false, PulseSource::External) => ResponseModelKind::TwoSided,
        (PolaritySelection::Both, false, PulseSource::Internal) => ResponseModelKind::ChargeOffset,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub value: f64,
    pub error: Option<f64>,
}

impl Estimate {
    pub const fn new(value: f64, error: f64) -> Self {
        Self {
            value,
            error: Some(error),
        }
    }

    pub const fn without_error(value: f64) -> Self {
        Self { value, error: None }
    }
}

/// `sign(x) * max(|x| - offset, 0)`.
pub fn charge_transform(x: f64, offset: f64) -> f64 {
    if x == 0.0 {
        return 0.0;
    }
    x.signum() * (x.abs() - offset).max(0.0)
}

pub fn clip(value: f64, low: Option<f64>, high: Option<f64>) -> f64 {
    let value = low.map_or(value, |low| value.max(low));
    high.map_or(value, |high| value.min(high))
}

/// Fitted response through the origin. Saturation levels are in signal units.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ResponseModel {
    ClippedAbove {
        gain: Estimate,
        high: Option<Estimate>,
    },
    ClippedBelow {
        gain: Estimate,
        low: Option<Estimate>,
    },
    TwoSided {
        gain: Estimate,
        low: Option<Estimate>,
        high: Option<Estimate>,
    },
    ChargeOffset {
        gain: Estimate,
        offset: Estimate,
        low: Option<Estimate>,
        high: Option<Estimate>,
    },
    Linear {
        gain: Estimate,
    },
}

impl ResponseModel {
    pub(super) fn from_parts(
        kind: ResponseModelKind,
        gain: Estimate,
        low: Option<Estimate>,
        high: Option<Estimate>,
        offset: Option<Estimate>,
    ) -> Self {
        match kind {
            ResponseModelKind::ClippedAbove => Self::ClippedAbove { gain, high },
            ResponseModelKind::ClippedBelow => Self::ClippedBelow { gain, low },
            ResponseModelKind::TwoSided => Self::TwoSided { gain, low, high },
            ResponseModelKind::ChargeOffset => Self::ChargeOffset {
                gain,
                offset: offset.unwrap_or(Estimate::without_error(0.0)),
                low,
                high,
            },
            ResponseModelKind::Linear => Self::Linear { gain },
        }
    }

    pub fn kind(&self) -> ResponseModelKind {
        match self {
            Self::ClippedAbove { .. } => ResponseModelKind::ClippedAbove,
            Self::ClippedBelow { .. } => ResponseModelKind::ClippedBelow,
            Self::TwoSided { .. } => ResponseModelKind::TwoSided,
            Self::ChargeOffset { .. } => ResponseModelKind::ChargeOffset,
            Self::Linear { .. } => ResponseModelKind::Linear,
        }
    }

    pub fn gain(&self) -> Estimate {
        match self {
            Self::ClippedAbove { gain, .. }
            | Self::ClippedBelow { gain, .. }
            | Self::TwoSided { gain, .. }
            | Self::ChargeOffset { gain, .. }
            | Self::Linear { gain } => *gain,
        }
    }

    pub fn low(&self) -> Option<Estimate> {
        match self {
            Self::ClippedBelow { low, .. }
            | Self::TwoSided { low, .. }
            | Self::ChargeOffset { low, .. } => *low,
            Self::ClippedAbove { .. } | Self::Linear { .. } => None,
        }
    }

    pub fn high(&self) -> Option<Estimate> {
        match self {
            Self::ClippedAbove { high, .. }
            | Self::TwoSided { high, .. }
            | Self::ChargeOffset { high, .. } => *high,
            Self::ClippedBelow { .. } | Self::Linear { .. } => None,
        }
    }

    pub fn offset(&self) -> Option<Estimate> {
        match self {
            Self::ChargeOffset { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    pub fn transform(&self, x: f64) -> f64 {
        charge_transform(x, self.offset().map_or(0.0, |offset| offset.value))
    }

    pub fn predict(&self, x: f64) -> f64 {
        clip(
            self.gain().value * self.transform(x),
            self.low().map(|low| low.value),
            self.high().map(|high| high.value),
        )
    }

    /// Same saturation and offset with a replaced gain.
    pub fn with_gain(&self, gain: Estimate) -> Self {
        Self::from_parts(self.kind(), gain, self.low(), self.high(), self.offset())
    }
}
