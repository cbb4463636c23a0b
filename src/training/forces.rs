use num_traits::{Float, FromPrimitive};
use rayon::prelude::*;
use std::iter::Sum;

use crate::data::structures::*;
use crate::error::TsneError;
use crate::training::objective::*;
use crate::training::ForceProvider;
use crate::utils::bh_tree::*;
use crate::utils::math::squared_euclidean;

///////////
// Exact //
///////////

/// Exact O(N²) gradient terms over dense affinities
///
/// Used when `theta == 0`.
///
/// ### Fields
///
/// * `p` - Symmetric dense affinities summing to 1
/// * `exaggeration` - Current multiplier on `p` in the attractive term
pub struct ExactForces<'a, T> {
    p: &'a DenseAffinities<T>,
    exaggeration: T,
}

impl<'a, T> ExactForces<'a, T>
where
    T: Float,
{
    /// Generate a new exact provider (no exaggeration)
    pub fn new(p: &'a DenseAffinities<T>) -> Self {
        Self {
            p,
            exaggeration: T::one(),
        }
    }
}

impl<T> ForceProvider<T> for ExactForces<'_, T>
where
    T: Float + FromPrimitive + Send + Sync + Sum,
{
    fn n_points(&self) -> usize {
        self.p.n
    }

    fn set_exaggeration(&mut self, factor: T) {
        self.exaggeration = factor;
    }

    fn attractive_forces<const D: usize>(&self, embd: &[T], pos_f: &mut [T]) {
        let n = self.p.n;
        let exag = self.exaggeration;

        pos_f.par_chunks_mut(D).enumerate().for_each(|(i, out)| {
            out.iter_mut().for_each(|f| *f = T::zero());
            let yi = &embd[i * D..(i + 1) * D];
            let p_row = self.p.row(i);
            for j in 0..n {
                if j == i {
                    continue;
                }
                let yj = &embd[j * D..(j + 1) * D];
                let q = T::one() / (T::one() + squared_euclidean(yi, yj));
                let mult = exag * p_row[j] * q;
                for d in 0..D {
                    out[d] = out[d] + mult * (yi[d] - yj[d]);
                }
            }
        });
    }

    fn repulsive_forces<const D: usize>(&self, embd: &[T], neg_f: &mut [T]) -> T {
        let n = self.p.n;

        let partial_z: Vec<T> = neg_f
            .par_chunks_mut(D)
            .enumerate()
            .map(|(i, out)| {
                out.iter_mut().for_each(|f| *f = T::zero());
                let yi = &embd[i * D..(i + 1) * D];
                let mut sum_q = T::zero();
                for j in 0..n {
                    if j == i {
                        continue;
                    }
                    let yj = &embd[j * D..(j + 1) * D];
                    let q = T::one() / (T::one() + squared_euclidean(yi, yj));
                    sum_q = sum_q + q;
                    let mult = q * q;
                    for d in 0..D {
                        out[d] = out[d] + mult * (yi[d] - yj[d]);
                    }
                }
                sum_q
            })
            .collect();

        partial_z.iter().fold(T::zero(), |acc, &z| acc + z)
    }

    fn kl_divergence<const D: usize>(&self, embd: &[T]) -> Result<T, TsneError> {
        Ok(kl_divergence_dense::<T, D>(self.p, embd, self.exaggeration))
    }
}

////////////////
// Barnes-Hut //
////////////////

/// Barnes-Hut gradient terms over a sparse affinity graph
///
/// Attraction is exact along the stored edges; repulsion comes from a
/// space-partitioning tree rebuilt from the embedding on every call.
///
/// ### Fields
///
/// * `graph` - Symmetric sparse affinities summing to 1
/// * `theta` - Barnes-Hut opening angle
/// * `exaggeration` - Current multiplier on the affinities in the attractive
///   term
pub struct BarnesHutForces<'a, T> {
    graph: &'a CsrGraph<T>,
    theta: T,
    exaggeration: T,
}

impl<'a, T> BarnesHutForces<'a, T>
where
    T: Float,
{
    /// Generate a new Barnes-Hut provider (no exaggeration)
    pub fn new(graph: &'a CsrGraph<T>, theta: T) -> Self {
        Self {
            graph,
            theta,
            exaggeration: T::one(),
        }
    }
}

impl<T> ForceProvider<T> for BarnesHutForces<'_, T>
where
    T: Float + FromPrimitive + Send + Sync + Sum,
{
    fn n_points(&self) -> usize {
        self.graph.n_vertices
    }

    fn set_exaggeration(&mut self, factor: T) {
        self.exaggeration = factor;
    }

    fn attractive_forces<const D: usize>(&self, embd: &[T], pos_f: &mut [T]) {
        edge_forces::<T, D>(embd, self.graph, self.exaggeration, pos_f);
    }

    fn repulsive_forces<const D: usize>(&self, embd: &[T], neg_f: &mut [T]) -> T {
        let tree = SpaceTree::<T, D>::new(embd);
        tree.compute_all_non_edge_forces(self.theta, neg_f)
    }

    fn kl_divergence<const D: usize>(&self, embd: &[T]) -> Result<T, TsneError> {
        kl_divergence_sparse::<T, D>(self.graph, embd, self.theta, self.exaggeration)
    }
}

///////////
// Tests //
///////////
