pub mod calibration;
pub mod features;
pub mod fit;
pub mod processors;
pub mod quality;
pub mod response;
pub mod serialization;
pub mod session;
pub mod source;
pub mod sticky;
pub mod tickmod;

mod traits;

pub use calibration::{
    CalibrationLoadError, CalibrationTable, IncompleteCalibration, build_calibration_table,
    load_calibration_table,
};
pub use features::{EdgeExclusionPolicy, EventSummary, PolaritySummary, Roi};
pub use fit::{
    FitOptions, FitOutcome, GainFit, ResponseModel, ResponseModelKind, fit_response, select_model,
};
pub use processors::{
    ChannelEventRecord, FieldValue, ProcessorError, ResultFields, reference_pipeline,
};
pub use response::{ResponsePoint, ResponsePoints, build_response_points};
pub use session::{
    BoardCalibration, CalibrationSession, CalibrationStatus, ChannelCalibration, ChannelOutcome,
    PulseRecord,
};
pub use source::{InMemoryWaveformSource, ScanFile, SourceError, load_scan_file};
pub use sticky::StickyCodeMetrics;
pub use traits::{AdcChannelProcessor, WaveformSource};
