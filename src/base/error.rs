use crate::StrError;
use thiserror::Error;

/// Defines the errors raised while running a coupled simulation
///
/// All variants are fatal: the drivers stop at the first error and nothing is retried.
#[derive(Debug, Error)]
pub enum FsiError {
    /// Invalid parameters, mismatched element degrees, missing regions, unmatched point constraints
    #[error("configuration error: {0}")]
    Config(String),

    /// A linear solve did not reach its tolerance within the allotted iterations
    #[error("{solver} did not converge after {iterations} iterations (residual = {residual:e})")]
    Convergence {
        solver: &'static str,
        iterations: usize,
        residual: f64,
    },

    /// Failure of a numerical kernel (singular Jacobian, sparse matrix misuse, ill-conditioned block)
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Payload size mismatch or an inconsistent exchange with a peer
    #[error("coupling protocol error: {0}")]
    Protocol(String),

    /// Failure reading or writing files
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure encoding or decoding JSON files
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Converts the messages of the setters and mesh builders into configuration errors
///
/// Failures of numerical kernels are wrapped with [FsiError::numerical] instead.
impl From<StrError> for FsiError {
    fn from(message: StrError) -> Self {
        FsiError::Config(message.to_string())
    }
}

impl FsiError {
    /// Wraps the message of a failing numerical kernel
    pub fn numerical(message: StrError) -> Self {
        FsiError::Numerical(message.to_string())
    }

    /// Returns true if this is a configuration error
    pub fn is_config(&self) -> bool {
        matches!(self, FsiError::Config(_))
    }

    /// Returns true if this is a protocol error
    pub fn is_protocol(&self) -> bool {
        matches!(self, FsiError::Protocol(_))
    }

    /// Returns true if this is a numerical error
    pub fn is_numerical(&self) -> bool {
        matches!(self, FsiError::Numerical(_))
    }

    /// Returns true if this is a convergence error
    pub fn is_convergence(&self) -> bool {
        matches!(self, FsiError::Convergence { .. })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::FsiError;

    #[test]
    fn str_error_becomes_config_error() {
        let err: FsiError = "region id is out of range".into();
        assert!(err.is_config());
        assert_eq!(err.to_string(), "configuration error: region id is out of range");
    }

    #[test]
    fn numerical_error_works() {
        let err = FsiError::numerical("determinant of Jacobian is zero");
        assert!(err.is_numerical());
        assert!(!err.is_config());
        assert_eq!(err.to_string(), "numerical error: determinant of Jacobian is zero");
    }

    #[test]
    fn convergence_error_displays_diagnostics() {
        let err = FsiError::Convergence {
            solver: "CG",
            iterations: 12,
            residual: 0.5,
        };
        assert!(err.is_convergence());
        assert_eq!(err.to_string(), "CG did not converge after 12 iterations (residual = 5e-1)");
    }
}
