use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("InvalidData: {0}")]
    InvalidData(String),

    #[error("Data not loaded: {0}")]
    NotLoaded(String),

    #[error(
        "Data loss at {location}: original total {original}, converted total {converted} \
         (relative difference {relative_difference:.4})"
    )]
    DataLoss {
        location: String,
        original: f64,
        converted: f64,
        relative_difference: f64,
    },

    #[error("Attribution invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(feature = "python")]
impl From<FlowError> for pyo3::PyErr {
    fn from(err: FlowError) -> pyo3::PyErr {
        use pyo3::exceptions::{PyRuntimeError, PyValueError};
        match err {
            FlowError::Configuration(_) => PyValueError::new_err(err.to_string()),
            other => PyRuntimeError::new_err(other.to_string()),
        }
    }
}

#[cfg(feature = "python")]
impl From<pyo3::PyErr> for FlowError {
    fn from(err: pyo3::PyErr) -> Self {
        FlowError::General(err.to_string())
    }
}
