use thiserror::Error;

pub type Result<T> = std::result::Result<T, SurvivalError>;

#[derive(Error, Debug)]
pub enum SurvivalError {
    #[error("expected {expected} columns (age;year;nodes;status), found {found} at line {line}")]
    InvalidColumnCount { expected: usize, found: usize, line: u64 },

    #[error("can't read input: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed delimited file: {0}")]
    Csv(#[from] csv::Error),

    #[error("bad config: {message}")]
    Config { message: String },

    #[error("dimensions don't match: {message}")]
    InvalidDimensions { message: String },

    #[error("optimization blew up: {message}")]
    OptimizationFailed { message: String },

    #[error("model not fitted yet - call fit() first")]
    ModelNotFitted,

    #[error("bad parameter: {parameter} = {value}")]
    InvalidParameter { parameter: String, value: String },

    #[error("numerical issues: {message}")]
    NumericalError { message: String },

    #[error("survival data is broken: {message}")]
    InvalidSurvivalData { message: String },

    #[error("group '{group}' has no subjects")]
    EmptyGroup { group: String },

    #[error("plotting failed: {message}")]
    Plot { message: String },
}

impl SurvivalError {
    pub fn invalid_column_count(found: usize, line: u64) -> Self {
        Self::InvalidColumnCount { expected: crate::dataset::N_COLUMNS, found, line }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    pub fn invalid_dimensions(message: impl Into<String>) -> Self {
        Self::InvalidDimensions { message: message.into() }
    }

    pub fn optimization_failed(message: impl Into<String>) -> Self {
        Self::OptimizationFailed { message: message.into() }
    }

    pub fn invalid_parameter(parameter: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
        }
    }

    pub fn numerical_error(message: impl Into<String>) -> Self {
        Self::NumericalError { message: message.into() }
    }

    pub fn invalid_survival_data(message: impl Into<String>) -> Self {
        Self::InvalidSurvivalData { message: message.into() }
    }

    pub fn empty_group(group: impl Into<String>) -> Self {
        Self::EmptyGroup { group: group.into() }
    }

    pub fn plot(message: impl Into<String>) -> Self {
        Self::Plot { message: message.into() }
    }
}

impl From<serde_yaml::Error> for SurvivalError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl<E> From<plotters::drawing::DrawingAreaErrorKind<E>> for SurvivalError
where
    E: std::error::Error + Send + Sync,
{
    fn from(err: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        Self::plot(err.to_string())
    }
}
