//! Error types for the dlm crate.

/// Error type for all fallible operations in the dlm crate.
///
/// Variants fall in two groups. Configuration errors are raised before any
/// recursion runs and never touch chain state. Numerical failures are raised
/// mid-recursion and carry the time step they were detected at.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DlmError {
    /// Returned when a parameter vector does not match the model structure.
    #[error("parameter vector has length {got}, model structure expects {expected}")]
    ParameterLength {
        /// Length required by the structure.
        expected: usize,
        /// Length supplied.
        got: usize,
    },

    /// Returned when a variance slot of the parameter vector is negative or not finite.
    #[error("variance parameter at index {index} is invalid ({value})")]
    NegativeVariance {
        /// Position in the parameter vector.
        index: usize,
        /// Offending value.
        value: f64,
    },

    /// Returned when model matrices have inconsistent shapes or invalid entries.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// Returned when prior hyperparameters are unusable.
    #[error("invalid prior: {0}")]
    InvalidPrior(String),

    /// Returned when the observation matrix is malformed.
    #[error("invalid observations: {0}")]
    InvalidObservations(String),

    /// Returned when a sampler configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Returned when a recursion cannot factor a covariance at some time step.
    #[error("numerical failure at time step {timestep}: {reason}")]
    NumericalFailure {
        /// Time step (1-based for observation steps, 0 for the initial state).
        timestep: usize,
        /// What could not be computed.
        reason: String,
    },

    /// Returned when a conjugate draw is not positive definite.
    #[error("sampled {block} covariance is not positive definite")]
    NonPositiveDefiniteDraw {
        /// Either `"observation"` or `"state"`.
        block: &'static str,
    },
}

impl DlmError {
    /// True for errors detected before any recursion runs.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DlmError::ParameterLength { .. }
                | DlmError::NegativeVariance { .. }
                | DlmError::InvalidModel(_)
                | DlmError::InvalidPrior(_)
                | DlmError::InvalidObservations(_)
                | DlmError::InvalidConfig(_)
        )
    }

    /// True for failures raised while filtering, sampling or drawing variances.
    pub fn is_numerical(&self) -> bool {
        matches!(
            self,
            DlmError::NumericalFailure { .. } | DlmError::NonPositiveDefiniteDraw { .. }
        )
    }

    pub(crate) fn numerical(timestep: usize, reason: impl Into<String>) -> Self {
        DlmError::NumericalFailure {
            timestep,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_parameter_length() {
        let err = DlmError::ParameterLength {
            expected: 16,
            got: 15,
        };
        assert_eq!(
            err.to_string(),
            "parameter vector has length 15, model structure expects 16"
        );
        assert!(err.is_configuration());
        assert!(!err.is_numerical());
    }

    #[test]
    fn error_negative_variance() {
        let err = DlmError::NegativeVariance {
            index: 3,
            value: -0.5,
        };
        assert_eq!(
            err.to_string(),
            "variance parameter at index 3 is invalid (-0.5)"
        );
        assert!(err.is_configuration());
    }

    #[test]
    fn error_numerical_failure() {
        let err = DlmError::numerical(12, "innovation covariance is singular");
        assert_eq!(
            err.to_string(),
            "numerical failure at time step 12: innovation covariance is singular"
        );
        assert!(err.is_numerical());
        assert!(!err.is_configuration());
    }

    #[test]
    fn error_non_positive_draw() {
        let err = DlmError::NonPositiveDefiniteDraw { block: "state" };
        assert_eq!(
            err.to_string(),
            "sampled state covariance is not positive definite"
        );
        assert!(err.is_numerical());
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_impl<T: Send + Sync + std::error::Error>() {}
        assert_impl::<DlmError>();
    }
}
