pub mod config;
pub mod constants;

pub use config::{
    CalibrationConfig, ConfigError, FitRequest, SignalParameters, load_calibration_config,
};
