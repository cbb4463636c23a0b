pub mod forces;
pub mod objective;
pub mod tsne_optimiser;

use crate::error::TsneError;

/// A source of t-SNE gradient terms over a `D`-dimensional embedding
///
/// The optimiser only sees this interface; exact dense affinities and the
/// Barnes-Hut approximation over the sparse graph are the two
/// implementations. The affinities behind a provider stay untouched for the
/// whole run, early exaggeration is a scalar the provider applies to the
/// attractive term.
pub trait ForceProvider<T> {
    /// Number of points the provider was built for
    fn n_points(&self) -> usize;

    /// Set the multiplier applied to the affinities in the attractive term
    fn set_exaggeration(&mut self, factor: T);

    /// Attractive forces `Σ_j e * p_ij * q_ij * (y_i - y_j)`
    ///
    /// ### Params
    ///
    /// * `embd` - Row-major embedding with `D` coordinates per point
    /// * `pos_f` - Output with `n * D` entries; overwritten
    fn attractive_forces<const D: usize>(&self, embd: &[T], pos_f: &mut [T]);

    /// Unnormalised repulsive forces `Σ_j q_ij² (y_i - y_j)`
    ///
    /// ### Params
    ///
    /// * `embd` - Row-major embedding with `D` coordinates per point
    /// * `neg_f` - Output with `n * D` entries; overwritten
    ///
    /// ### Returns
    ///
    /// The normaliser `Z = Σ_{i != j} q_ij` (possibly approximated)
    fn repulsive_forces<const D: usize>(&self, embd: &[T], neg_f: &mut [T]) -> T;

    /// KL divergence between the affinities and the Student-t similarities
    /// of the embedding
    ///
    /// While an exaggeration `e != 1` is set, this is the objective the
    /// exaggerated gradient descends, `e * KL + (e - 1) ln(N (N - 1) / Z)`.
    fn kl_divergence<const D: usize>(&self, embd: &[T]) -> Result<T, TsneError>;
}
