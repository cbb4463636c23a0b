use thiserror::Error;

/// Errors that can occur while computing a t-SNE embedding
///
/// Every variant is fatal for the run it was raised in: no partial embedding
/// is returned. Numerical edge cases (coincident points, vanishing
/// normalisers) are not errors; they are floored to the smallest positive
/// value instead.
#[derive(Error, Debug)]
pub enum TsneError {
    /// The perplexity needs at least `3 * perplexity` other points.
    #[error("perplexity {perplexity} is too large for {n} data points (need n - 1 >= 3 * perplexity)")]
    PerplexityTooLarge { n: usize, perplexity: f64 },
    /// Zero points or zero input dimensions.
    #[error("invalid input dimensions: {n} points with {dim} features")]
    InvalidDimensions { n: usize, dim: usize },
    /// Only 2D and 3D embeddings are supported.
    #[error("unsupported output dimensionality {0}; only 2 or 3 are supported")]
    UnsupportedOutputDim(usize),
    /// A caller-provided buffer does not match `n * dim`.
    #[error("buffer `{name}` has length {actual}, expected {expected}")]
    BufferSize {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    /// Any other parameter outside its valid range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// A working buffer could not be allocated.
    #[error("failed to allocate buffer `{name}` with {len} elements")]
    Allocation { name: &'static str, len: usize },
}

impl TsneError {
    /// Integer status of the error, as reported by the command-line tool
    ///
    /// ### Returns
    ///
    /// `2` for an unsupported output dimensionality, `1` for everything else.
    pub fn status_code(&self) -> i32 {
        match self {
            TsneError::UnsupportedOutputDim(_) => 2,
            _ => 1,
        }
    }
}
