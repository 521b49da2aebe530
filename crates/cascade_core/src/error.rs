use thiserror::Error;

/// Errors produced by the numerical core.
///
/// Degenerate-but-valid outcomes (zero renormalizations past a transient,
/// zero Poincaré crossings) are `Ok` values, not errors; callers can always
/// tell "nothing observed" apart from "computation failed".
#[derive(Debug, Error)]
pub enum CascadeError {
    /// A caller-supplied setting is unusable. Raised before any numerical
    /// work begins and never caught internally.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// NaN/Inf appeared in a propagated state or tangent, or the adaptive
    /// step size collapsed without meeting tolerances.
    #[error("numerical divergence at t = {t}: {detail}")]
    NumericalDivergence { t: f64, detail: String },
}

impl CascadeError {
    pub fn invalid(message: impl Into<String>) -> Self {
        CascadeError::InvalidConfiguration(message.into())
    }

    pub fn divergence(t: f64, detail: impl Into<String>) -> Self {
        CascadeError::NumericalDivergence {
            t,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CascadeError>;
