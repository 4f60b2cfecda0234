use std::error::Error;
use std::fmt::{Display, Formatter};

pub type FembResult<T> = Result<T, FembError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum FembErrorCategory {
    Success,
    InputValidation,
    MissingUpstreamData,
    InconsistentData,
    ComputationError,
    IoSystemError,
    InternalError,
}

impl FembErrorCategory {
    pub const fn exit_status(self) -> ExitStatus {
        match self {
            Self::Success => ExitStatus {
                exit_code: 0,
                category_name: "Success",
                status_class: "OK",
            },
            Self::InputValidation => ExitStatus {
                exit_code: 2,
                category_name: "InputValidation",
                status_class: "INPUT_FATAL",
            },
            Self::MissingUpstreamData => ExitStatus {
                exit_code: 2,
                category_name: "MissingUpstreamData",
                status_class: "INPUT_MISSING",
            },
            Self::InconsistentData => ExitStatus {
                exit_code: 3,
                category_name: "InconsistentData",
                status_class: "DATA_FATAL",
            },
            Self::ComputationError => ExitStatus {
                exit_code: 4,
                category_name: "ComputationError",
                status_class: "FIT_FATAL",
            },
            Self::IoSystemError => ExitStatus {
                exit_code: 5,
                category_name: "IoSystemError",
                status_class: "IO_FATAL",
            },
            Self::InternalError => ExitStatus {
                exit_code: 6,
                category_name: "InternalError",
                status_class: "SYS_FATAL",
            },
        }
    }

    pub const fn exit_code(self) -> i32 {
        self.exit_status().exit_code
    }

    pub const fn category_name(self) -> &'static str {
        self.exit_status().category_name
    }

    pub const fn status_class(self) -> &'static str {
        self.exit_status().status_class
    }

    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::Success)
    }

    /// Fatal for the whole channel rather than for a single event.
    pub const fn aborts_channel(self) -> bool {
        matches!(self, Self::InconsistentData | Self::InternalError)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub exit_code: i32,
    pub category_name: &'static str,
    pub status_class: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FembError {
    category: FembErrorCategory,
    code: &'static str,
    message: String,
}

impl FembError {
    pub fn new(
        category: FembErrorCategory,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code,
            message: message.into(),
        }
    }

    pub fn input_validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(FembErrorCategory::InputValidation, code, message)
    }

    pub fn missing_upstream(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(FembErrorCategory::MissingUpstreamData, code, message)
    }

    pub fn inconsistent(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(FembErrorCategory::InconsistentData, code, message)
    }

    pub fn computation(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(FembErrorCategory::ComputationError, code, message)
    }

    pub fn io_system(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(FembErrorCategory::IoSystemError, code, message)
    }

    pub fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(FembErrorCategory::InternalError, code, message)
    }

    pub const fn category(&self) -> FembErrorCategory {
        self.category
    }

    pub const fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exit_code(&self) -> i32 {
        self.category.exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        let severity = if self.category.is_fatal() {
            "ERROR"
        } else {
            "INFO"
        };
        format!("{}: [{}] {}", severity, self.code, self.message)
    }

    pub fn fatal_exit_line(&self) -> Option<String> {
        self.category
            .is_fatal()
            .then(|| format!("FATAL EXIT CODE: {}", self.exit_code()))
    }
}

impl Display for FembError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.category.category_name(),
            self.code,
            self.message
        )
    }
}

impl Error for FembError {}

impl serde::Serialize for FembError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("FembError", 4)?;
        state.serialize_field("category", self.category.category_name())?;
        state.serialize_field("statusClass", self.category.status_class())?;
        state.serialize_field("code", self.code)?;
        state.serialize_field("message", &self.message)?;
        state.end()
    }
}
