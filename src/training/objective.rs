use num_traits::{Float, FromPrimitive};
use rayon::prelude::*;
use std::iter::Sum;

use crate::data::structures::*;
use crate::error::TsneError;
use crate::utils::bh_tree::SpaceTree;
use crate::utils::math::{squared_euclidean, try_alloc};

/// Objective minimised while the affinities are exaggerated by `e`
///
/// Scaling `p` by `e` in the attractive term makes the gradient descend
/// `e * KL - (e - 1) ln Z`. Adding `(e - 1) ln(N (N - 1))` keeps the value
/// non-negative (every `q_ij <= 1`) and reduces it to the plain KL divergence
/// at `e = 1`.
///
/// ### Params
///
/// * `kl` - KL divergence against the un-exaggerated affinities
/// * `exaggeration` - Current multiplier `e`
/// * `sum_q` - Normaliser `Z` of the Student-t similarities
/// * `n` - Number of points
///
/// ### Returns
///
/// The exaggerated cost
fn exaggerated_cost<T>(kl: T, exaggeration: T, sum_q: T, n: usize) -> T
where
    T: Float + FromPrimitive,
{
    if exaggeration == T::one() {
        return kl;
    }
    let n_pairs = T::from_usize(n * n.saturating_sub(1)).unwrap().max(T::one());
    exaggeration * kl + (exaggeration - T::one()) * (n_pairs / sum_q).ln()
}

/// Exact KL divergence for dense affinities
///
/// Builds the full Student-t similarity matrix: `q_ij = 1 / (1 + d_ij²)`,
/// the diagonal set to the smallest positive value, normalised by its total.
/// The cost is `Σ p_ij ln((p_ij + ε) / (q_ij + ε))` with `ε` the smallest
/// positive value, so zero entries never hit the logarithm. With an
/// exaggeration other than 1 the value is the exaggerated objective (see
/// `exaggerated_cost`).
///
/// ### Params
///
/// * `p` - Symmetric affinities summing to 1
/// * `embd` - Row-major embedding with `D` coordinates per point
/// * `exaggeration` - Current multiplier on the affinities
///
/// ### Returns
///
/// The KL divergence
pub fn kl_divergence_dense<T, const D: usize>(
    p: &DenseAffinities<T>,
    embd: &[T],
    exaggeration: T,
) -> T
where
    T: Float + FromPrimitive + Send + Sync + Sum,
{
    let n = p.n;
    let floor = T::min_positive_value();

    let q_row = |i: usize, j: usize| -> T {
        if i == j {
            floor
        } else {
            let yi = &embd[i * D..(i + 1) * D];
            let yj = &embd[j * D..(j + 1) * D];
            T::one() / (T::one() + squared_euclidean(yi, yj))
        }
    };

    let row_sums: Vec<T> = (0..n)
        .into_par_iter()
        .map(|i| (0..n).map(|j| q_row(i, j)).fold(T::zero(), |acc, q| acc + q))
        .collect();
    let sum_q = row_sums.iter().fold(floor, |acc, &s| acc + s);

    let row_costs: Vec<T> = (0..n)
        .into_par_iter()
        .map(|i| {
            p.row(i)
                .iter()
                .enumerate()
                .fold(T::zero(), |acc, (j, &p_ij)| {
                    let q_ij = q_row(i, j) / sum_q;
                    acc + p_ij * ((p_ij + floor) / (q_ij + floor)).ln()
                })
        })
        .collect();

    let kl = row_costs.iter().fold(T::zero(), |acc, &c| acc + c);
    exaggerated_cost(kl, exaggeration, sum_q, n)
}

/// Approximate KL divergence for a sparse affinity graph
///
/// The normaliser `Z` comes from a Barnes-Hut tree over the embedding; the
/// sum then only runs over the stored edges. This is a monitoring estimate,
/// not the exact objective.
///
/// ### Params
///
/// * `graph` - Symmetric affinity graph summing to 1
/// * `embd` - Row-major embedding with `D` coordinates per point
/// * `theta` - Barnes-Hut opening angle used for `Z`
/// * `exaggeration` - Current multiplier on the affinities
///
/// ### Returns
///
/// The estimated KL divergence, or an error if the force scratch buffer
/// cannot be allocated
pub fn kl_divergence_sparse<T, const D: usize>(
    graph: &CsrGraph<T>,
    embd: &[T],
    theta: T,
    exaggeration: T,
) -> Result<T, TsneError>
where
    T: Float + FromPrimitive + Send + Sync + Sum,
{
    let floor = T::min_positive_value();

    let tree = SpaceTree::<T, D>::new(embd);
    let mut scratch = try_alloc(embd.len(), T::zero(), "kl_scratch")?;
    let sum_q = tree.compute_all_non_edge_forces(theta, &mut scratch).max(floor);

    let row_costs: Vec<T> = (0..graph.n_vertices)
        .into_par_iter()
        .map(|i| {
            let yi = &embd[i * D..(i + 1) * D];
            graph.row(i).fold(T::zero(), |acc, (j, p_ij)| {
                let yj = &embd[j * D..(j + 1) * D];
                let q_ij = T::one() / (T::one() + squared_euclidean(yi, yj)) / sum_q;
                acc + p_ij * ((p_ij + floor) / (q_ij + floor)).ln()
            })
        })
        .collect();

    let kl = row_costs.iter().fold(T::zero(), |acc, &c| acc + c);
    Ok(exaggerated_cost(kl, exaggeration, sum_q, graph.n_vertices))
}

///////////
// Tests //
///////////
