use thiserror::Error;

/// Errors returned by the salary resolution entry points.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SalaryError {
    /// A salary, allowance or income was negative, zero where a positive
    /// amount is required, NaN or infinite.
    #[error("invalid {field}: {value}")]
    InvalidAmount { field: &'static str, value: f64 },

    #[error("unknown tax year '{0}'")]
    UnknownTaxYear(String),

    #[error("unknown age band '{0}'")]
    UnknownAgeBand(String),

    /// Every backward strategy failed to reach the target net salary.
    #[error(
        "could not resolve a basic salary for net salary {target_net:.2} \
         (searched {lower_bound:.2} to {upper_bound:.2})"
    )]
    UnresolvableBackwardCalculation {
        target_net: f64,
        lower_bound: f64,
        upper_bound: f64,
        best_basic: Option<f64>,
        best_net: Option<f64>,
    },
}

impl SalaryError {
    pub fn invalid_amount(field: &'static str, value: f64) -> Self {
        SalaryError::InvalidAmount { field, value }
    }
}

/// Requires a finite amount strictly above zero.
pub(crate) fn require_positive(field: &'static str, value: f64) -> Result<f64, SalaryError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(SalaryError::invalid_amount(field, value))
    }
}

/// Requires a finite amount of zero or more.
pub(crate) fn require_non_negative(field: &'static str, value: f64) -> Result<f64, SalaryError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(SalaryError::invalid_amount(field, value))
    }
}
