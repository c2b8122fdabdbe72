//! Error types for spectrum validation, preprocessing and library construction.

use thiserror::Error;

use crate::data::technique::Technique;

/// Errors raised while validating or transforming spectra.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpectrumError {
    /// A spectrum needs at least one data point.
    #[error("empty spectrum: at least one data point is required")]
    EmptySpectrum,

    /// X and Y arrays differ in length.
    #[error("length mismatch: {x_len} x values, {y_len} y values")]
    LengthMismatch {
        x_len: usize,
        y_len: usize,
    },

    /// NaN or infinite value in the input.
    #[error("non-finite value at index {index}")]
    NonFinite { index: usize },

    /// Evenly spaced input with more than one point but first x == last x.
    #[error("degenerate axis: first x equals last x ({x}) for {count} points")]
    DegenerateAxis { x: f64, count: usize },

    /// Numeric code outside the known constants.
    #[error("unknown {kind} code {code}")]
    UnknownCode { kind: &'static str, code: u32 },

    /// Unit that cannot be converted into the technique's native convention.
    #[error("{unit} cannot be reconciled with {technique}")]
    UnitMismatch { unit: String, technique: Technique },

    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    /// A database grid differs from the one registered for its technique.
    #[error("database '{name}' does not share the {technique} library grid")]
    GridMismatch { name: String, technique: Technique },

    #[error("invalid band shape: {0}")]
    InvalidBand(String),

    #[error("numerical failure: {0}")]
    Numerical(String),
}

impl SpectrumError {
    /// True for errors caused by a malformed query rather than by the library or engine.
    pub fn is_input_error(&self) -> bool {
        !matches!(
            self,
            SpectrumError::GridMismatch { .. }
                | SpectrumError::InvalidGrid(_)
                | SpectrumError::InvalidBand(_)
                | SpectrumError::Numerical(_)
        )
    }
}
