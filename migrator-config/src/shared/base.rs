use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// A field holds a value outside of its accepted range.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// A load map entry could not be parsed.
    #[error("Invalid load map entry `{entry}`: expected `metric=value`")]
    InvalidLoadMapEntry { entry: String },
    /// A metric has a critical threshold lower than its max threshold.
    #[error(
        "Critical load for `{metric}` ({critical}) must be greater than or equal to its max load ({max})"
    )]
    CriticalLoadBelowMaxLoad {
        metric: String,
        max: f64,
        critical: f64,
    },
}
