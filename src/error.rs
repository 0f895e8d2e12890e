use serde::Serialize;

use crate::types::ComputationKind;

/// Maximum number of characters of external diagnostic text carried in an error.
pub const EXCERPT_CHARS: usize = 200;

/// HTTP-agnostic status class a collaborator maps to its own transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    ClientError,
    ServerError,
    GatewayTimeout,
    ClientClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum BaselineError {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidDateRange { start: String, end: String },

    #[error("Date range too large: {start} to {end} exceeds {max_years} years")]
    DateRangeTooLarge {
        start: String,
        end: String,
        max_years: u32,
    },

    #[error("Invalid project id: {0}")]
    InvalidProjectId(String),

    #[error("Geospatial computation environment is not configured")]
    EnvironmentNotConfigured { detail: String },

    #[error("{kind} computation timed out after {secs} seconds")]
    ComputationTimeout { kind: ComputationKind, secs: u64 },

    #[error("{kind} computation was cancelled")]
    ComputationCancelled { kind: ComputationKind },

    #[error("{kind} computation failed (exit code {exit_code:?})")]
    ComputationExecutionFailed {
        kind: ComputationKind,
        exit_code: Option<i32>,
        excerpt: Option<String>,
    },

    #[error("{kind} computation reported an internal error")]
    ComputationRuntimeError {
        kind: ComputationKind,
        excerpt: Option<String>,
    },

    #[error("Could not parse computation output: {excerpt}")]
    ResultParseError { excerpt: String },

    #[error("Computation result is missing fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Computation result has an invalid shape: {0}")]
    InvalidResultShape(String),

    #[error("Farm file error: {0}")]
    FarmFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type BaselineResult<T> = Result<T, BaselineError>;

impl BaselineError {
    /// Stable machine-readable code for the collaborator layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidGeometry(_) => "INVALID_GEOMETRY",
            Self::InvalidDate(_) => "INVALID_DATE",
            Self::InvalidDateRange { .. } => "INVALID_DATE_RANGE",
            Self::DateRangeTooLarge { .. } => "DATE_RANGE_TOO_LARGE",
            Self::InvalidProjectId(_) => "INVALID_PROJECT_ID",
            Self::EnvironmentNotConfigured { .. } => "ENVIRONMENT_NOT_CONFIGURED",
            Self::ComputationTimeout { .. } => "COMPUTATION_TIMEOUT",
            Self::ComputationCancelled { .. } => "COMPUTATION_CANCELLED",
            Self::ComputationExecutionFailed { .. } => "COMPUTATION_EXECUTION_FAILED",
            Self::ComputationRuntimeError { .. } => "COMPUTATION_RUNTIME_ERROR",
            Self::ResultParseError { .. } => "RESULT_PARSE_ERROR",
            Self::MissingFields(_) => "MISSING_FIELDS",
            Self::InvalidResultShape(_) => "INVALID_RESULT_SHAPE",
            Self::FarmFile(_) => "FARM_FILE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    pub fn status_class(&self) -> StatusClass {
        match self {
            Self::InvalidGeometry(_)
            | Self::InvalidDate(_)
            | Self::InvalidDateRange { .. }
            | Self::DateRangeTooLarge { .. }
            | Self::InvalidProjectId(_)
            | Self::FarmFile(_) => StatusClass::ClientError,
            Self::ComputationTimeout { .. } => StatusClass::GatewayTimeout,
            Self::ComputationCancelled { .. } => StatusClass::ClientClosed,
            _ => StatusClass::ServerError,
        }
    }

    /// Caller input errors. These never reach the external computation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidGeometry(_)
                | Self::InvalidDate(_)
                | Self::InvalidDateRange { .. }
                | Self::DateRangeTooLarge { .. }
                | Self::InvalidProjectId(_)
        )
    }

    /// Failures of the external computation or of its output, the set the
    /// carbon estimator may replace with a local approximation.
    pub fn is_computation_failure(&self) -> bool {
        matches!(
            self,
            Self::EnvironmentNotConfigured { .. }
                | Self::ComputationTimeout { .. }
                | Self::ComputationExecutionFailed { .. }
                | Self::ComputationRuntimeError { .. }
                | Self::ResultParseError { .. }
                | Self::MissingFields(_)
                | Self::InvalidResultShape(_)
                | Self::Io(_)
                | Self::Serialization(_)
        )
    }

    /// Message safe to show to end users. Never includes internal paths.
    pub fn public_message(&self) -> String {
        match self {
            Self::ComputationExecutionFailed {
                excerpt: Some(excerpt),
                ..
            }
            | Self::ComputationRuntimeError {
                excerpt: Some(excerpt),
                ..
            } => format!("{}: {}", self, excerpt),
            Self::Io(_) | Self::Serialization(_) => {
                "Internal error while preparing computation inputs".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// First [`EXCERPT_CHARS`] characters of `text`, trimmed.
pub fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
