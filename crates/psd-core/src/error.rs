//! Error types for the psd workspace

use thiserror::Error;

/// psd error type
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration: malformed bin geometry, bad weight/mode
    /// selection, mismatched initial guesses or table shapes. Raised
    /// before any numeric work starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// Numeric computation failed inside the optimizer or linear algebra.
    #[error("computation error: {0}")]
    Computation(String),

    /// The nonlinear fit stopped without converging, either on its
    /// iteration budget or because no further decrease could be found.
    /// `last_params` carries the best parameters seen so far as a
    /// diagnostic; they are not a usable fit result.
    #[error("fit did not converge within {iterations} iterations")]
    FitConvergence {
        /// Iterations consumed before the run stopped.
        iterations: u64,
        /// Flattened `[n, gm, gsd]` per mode at the last optimizer state.
        last_params: Vec<f64>,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = Error::Config("bins must be positive".into());
        assert_eq!(e.to_string(), "configuration error: bins must be positive");

        let e = Error::FitConvergence { iterations: 500, last_params: vec![1.0, 0.5, 1.8] };
        assert_eq!(e.to_string(), "fit did not converge within 500 iterations");
    }

    #[test]
    fn test_convergence_error_keeps_diagnostics() {
        let e = Error::FitConvergence { iterations: 42, last_params: vec![2.0, 0.1, 1.5] };
        match e {
            Error::FitConvergence { iterations, last_params } => {
                assert_eq!(iterations, 42);
                assert_eq!(last_params.len(), 3);
            }
            _ => panic!("wrong variant"),
        }
    }
}
