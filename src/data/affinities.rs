use num_traits::{Float, FromPrimitive, ToPrimitive};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::iter::Sum;

use crate::data::nearest_neighbours::*;
use crate::data::structures::*;
use crate::error::TsneError;
use crate::utils::math::{squared_distance_matrix, try_alloc};

////////////
// Params //
////////////

/// Parameters of the perplexity calibration
///
/// ### Fields
///
/// * `tol` - Tolerance on `|H - ln(perplexity)|` (typically 1e-5)
/// * `max_iter` - Maximum number of bisection steps per row (typically 200)
/// * `k_factor` - Neighbours per point as a multiple of the perplexity in
///   the sparse mode (typically 3)
#[derive(Clone, Debug)]
pub struct AffinityParams<T> {
    pub tol: T,
    pub max_iter: usize,
    pub k_factor: T,
}

impl<T> Default for AffinityParams<T>
where
    T: Float + FromPrimitive,
{
    fn default() -> Self {
        Self {
            tol: T::from_f64(1e-5).unwrap(),
            max_iter: 200,
            k_factor: T::from_f64(3.0).unwrap(),
        }
    }
}

/// Check that there are enough points for the perplexity
///
/// ### Params
///
/// * `n` - Number of points
/// * `perplexity` - Target perplexity
///
/// ### Returns
///
/// `Ok(())` if `perplexity > 0` and `n - 1 >= 3 * perplexity`.
pub fn check_perplexity<T>(n: usize, perplexity: T) -> Result<(), TsneError>
where
    T: Float + ToPrimitive,
{
    let perp = perplexity.to_f64().unwrap_or(f64::NAN);
    if !(perp > 0.0) {
        return Err(TsneError::InvalidParameter(format!(
            "perplexity must be positive, got {}",
            perp
        )));
    }
    if (n as f64) - 1.0 < 3.0 * perp {
        return Err(TsneError::PerplexityTooLarge {
            n,
            perplexity: perp,
        });
    }
    Ok(())
}

//////////////////
// Beta search  //
//////////////////

/// Outcome of the bandwidth search for one row
///
/// ### Fields
///
/// * `beta` - Precision (`1 / 2σ²`) that produced the row
/// * `entropy` - Entropy of the row in nats
/// * `n_iter` - Number of kernel evaluations
/// * `converged` - Whether `|entropy - ln(perplexity)| < tol` was reached
#[derive(Clone, Copy, Debug)]
pub struct BetaSearch<T> {
    pub beta: T,
    pub entropy: T,
    pub n_iter: usize,
    pub converged: bool,
}

/// Calibrate one row of Gaussian affinities to the target perplexity
///
/// Bisection over the precision β: starts at β = 1, doubles or halves it
/// until the entropy target is bracketed, then bisects. If the budget runs
/// out the last evaluated row is kept.
///
/// ### Params
///
/// * `dist_sq` - Squared distances from the point to the candidates
/// * `skip` - Position of the point itself in `dist_sq`, if present. Its
///   affinity is forced to the smallest positive value.
/// * `perplexity` - Target perplexity
/// * `tol` - Entropy tolerance
/// * `max_iter` - Maximum number of bisection steps
/// * `probs` - Output row; same length as `dist_sq`. Sums to 1 on return.
///
/// ### Returns
///
/// The `BetaSearch` describing the row.
pub fn search_beta<T>(
    dist_sq: &[T],
    skip: Option<usize>,
    perplexity: T,
    tol: T,
    max_iter: usize,
    probs: &mut [T],
) -> BetaSearch<T>
where
    T: Float + FromPrimitive,
{
    let two = T::one() + T::one();
    let tiny = T::min_positive_value();
    let target = perplexity.ln();

    let mut beta = T::one();
    let mut min_beta: Option<T> = None;
    let mut max_beta: Option<T> = None;

    let mut used_beta = beta;
    let mut entropy = T::zero();
    let mut sum_p = tiny;
    let mut n_iter = 0;
    let mut converged = false;

    while !converged && n_iter < max_iter {
        // Gaussian kernel row for the current beta
        for (p, &d) in probs.iter_mut().zip(dist_sq) {
            *p = (-beta * d).exp();
        }
        if let Some(s) = skip {
            probs[s] = tiny;
        }

        sum_p = tiny;
        let mut weighted = T::zero();
        for (i, (&p, &d)) in probs.iter().zip(dist_sq).enumerate() {
            sum_p = sum_p + p;
            if Some(i) != skip {
                weighted = weighted + d * p;
            }
        }
        entropy = beta * weighted / sum_p + sum_p.ln();
        used_beta = beta;
        n_iter += 1;

        let h_diff = entropy - target;
        if h_diff.abs() < tol {
            converged = true;
        } else if h_diff > T::zero() {
            // too flat: narrow the kernel
            min_beta = Some(beta);
            beta = match max_beta {
                Some(max_b) => (beta + max_b) / two,
                None => beta * two,
            };
        } else {
            // too peaked: widen the kernel
            max_beta = Some(beta);
            beta = match min_beta {
                Some(min_b) => (beta + min_b) / two,
                None => beta / two,
            };
        }
    }

    for p in probs.iter_mut() {
        *p = *p / sum_p;
    }

    BetaSearch {
        beta: used_beta,
        entropy,
        n_iter,
        converged,
    }
}

///////////
// Exact //
///////////

/// Row-calibrated Gaussian affinities over all pairs (not yet symmetric)
///
/// ### Params
///
/// * `x` - Row-major input data
/// * `n` - Number of points
/// * `dim` - Number of features
/// * `perplexity` - Target perplexity
/// * `params` - Calibration parameters
///
/// ### Returns
///
/// The conditional `P(j|i)` matrix; every row sums to 1 and the diagonal is
/// ~0.
pub fn gaussian_perplexity_dense<T>(
    x: &[T],
    n: usize,
    dim: usize,
    perplexity: T,
    params: &AffinityParams<T>,
) -> Result<DenseAffinities<T>, TsneError>
where
    T: Float + FromPrimitive + Send + Sync,
{
    let dd = squared_distance_matrix(x, n, dim)?;
    let mut values = try_alloc(n * n, T::zero(), "p_matrix")?;

    let n_unconverged: usize = values
        .par_chunks_mut(n)
        .zip(dd.par_chunks(n))
        .enumerate()
        .map(|(i, (row, dist_row))| {
            let res = search_beta(
                dist_row,
                Some(i),
                perplexity,
                params.tol,
                params.max_iter,
                row,
            );
            usize::from(!res.converged)
        })
        .sum();

    if n_unconverged > 0 {
        log::debug!(
            "Perplexity search did not converge for {} of {} rows.",
            n_unconverged,
            n
        );
    }

    Ok(DenseAffinities { values, n })
}

/// Symmetrise a dense affinity matrix in place
///
/// `P[i][j] = P[j][i] = P[i][j] + P[j][i]`, followed by normalisation to a
/// total of 1.
pub fn symmetrise_dense<T>(p: &mut DenseAffinities<T>)
where
    T: Float + Send + Sync + Sum,
{
    let n = p.n;
    for i in 0..n {
        for j in (i + 1)..n {
            let sym = p.values[i * n + j] + p.values[j * n + i];
            p.values[i * n + j] = sym;
            p.values[j * n + i] = sym;
        }
    }
    p.normalise();
}

/// Exact-mode input affinities
///
/// Calibrates every row, symmetrises and normalises.
pub fn exact_affinities<T>(
    x: &[T],
    n: usize,
    dim: usize,
    perplexity: T,
    params: &AffinityParams<T>,
) -> Result<DenseAffinities<T>, TsneError>
where
    T: Float + FromPrimitive + Send + Sync + Sum,
{
    check_perplexity(n, perplexity)?;
    let mut p = gaussian_perplexity_dense(x, n, dim, perplexity, params)?;
    symmetrise_dense(&mut p);
    Ok(p)
}

////////////
// Sparse //
////////////

/// Row-calibrated Gaussian affinities over the k nearest neighbours
///
/// ### Params
///
/// * `perplexity` - Target perplexity
/// * `k` - Neighbours per point (excluding the point itself)
/// * `knn` - Nearest neighbour collaborator
/// * `params` - Calibration parameters
///
/// ### Returns
///
/// The directed graph of `P(j|i)`; row `i` holds its `k` neighbours in order
/// of increasing distance and sums to 1.
pub fn gaussian_perplexity_sparse<T, K>(
    perplexity: T,
    k: usize,
    knn: &K,
    params: &AffinityParams<T>,
) -> CsrGraph<T>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync + Sum,
    K: NearestNeighbours<T> + ?Sized,
{
    let n = knn.n_points();

    let mut k = k;
    if k >= n {
        log::warn!(
            "k = {} neighbours requested for {} points; using k = {}.",
            k,
            n,
            n.saturating_sub(1)
        );
        k = n.saturating_sub(1);
    }
    if T::from_usize(k).unwrap() < perplexity {
        log::warn!(
            "k = {} is smaller than the perplexity {:.2}; rows will not reach the entropy target.",
            k,
            perplexity.to_f64().unwrap_or(f64::NAN)
        );
    }

    let rows: Vec<(Vec<(usize, T)>, bool)> = (0..n)
        .into_par_iter()
        .map(|i| {
            let neighbours: Vec<(usize, T)> = knn
                .query(i, k)
                .into_iter()
                .filter(|&(j, _)| j != i)
                .take(k)
                .collect();

            let dist_sq: Vec<T> = neighbours.iter().map(|&(_, d)| d * d).collect();
            let mut probs = vec![T::zero(); dist_sq.len()];
            let res = search_beta(
                &dist_sq,
                None,
                perplexity,
                params.tol,
                params.max_iter,
                &mut probs,
            );

            let row = neighbours
                .iter()
                .zip(probs)
                .map(|(&(j, _), p)| (j, p))
                .collect();
            (row, res.converged)
        })
        .collect();

    let n_unconverged = rows.iter().filter(|(_, c)| !c).count();
    if n_unconverged > 0 {
        log::debug!(
            "Perplexity search did not converge for {} of {} rows.",
            n_unconverged,
            n
        );
    }

    CsrGraph::from_rows(rows.into_iter().map(|(row, _)| row).collect())
}

/// Symmetrise a directed sparse affinity graph
///
/// For every directed edge `i -> j`: if `j -> i` exists as well, both merge
/// into one undirected edge of weight `(p_ij + p_ji) / 2`; otherwise the
/// reverse edge is inserted with weight `p_ij / 2`. Both directions are
/// stored. The reverse-edge lookup goes through a hash map per row.
///
/// ### Params
///
/// * `graph` - Directed graph (at most one entry per `(i, j)`)
///
/// ### Returns
///
/// The symmetric graph; it is not renormalised.
pub fn symmetrise_sparse<T>(graph: &CsrGraph<T>) -> CsrGraph<T>
where
    T: Float + FromPrimitive + Send + Sync + Sum,
{
    let n = graph.n_vertices;
    let two = T::one() + T::one();

    let lookup: Vec<FxHashMap<usize, T>> = (0..n)
        .into_par_iter()
        .map(|i| graph.row(i).collect())
        .collect();

    let mut rows: Vec<Vec<(usize, T)>> = vec![Vec::new(); n];
    for i in 0..n {
        for (j, p_ij) in graph.row(i) {
            match lookup[j].get(&i) {
                Some(&p_ji) => {
                    // shared edge: add it once, from the lower index
                    if i < j {
                        let w = (p_ij + p_ji) / two;
                        rows[i].push((j, w));
                        rows[j].push((i, w));
                    } else if i == j {
                        rows[i].push((i, p_ij));
                    }
                }
                None => {
                    let w = p_ij / two;
                    rows[i].push((j, w));
                    rows[j].push((i, w));
                }
            }
        }
    }

    CsrGraph::from_rows(rows)
}

/// Approximate-mode input affinities
///
/// Calibrates every point over its `k` nearest neighbours, symmetrises and
/// normalises.
pub fn knn_affinities<T, K>(
    perplexity: T,
    k: usize,
    knn: &K,
    params: &AffinityParams<T>,
) -> Result<CsrGraph<T>, TsneError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync + Sum,
    K: NearestNeighbours<T> + ?Sized,
{
    check_perplexity(knn.n_points(), perplexity)?;
    let directed = gaussian_perplexity_sparse(perplexity, k, knn, params);
    let mut graph = symmetrise_sparse(&directed);
    graph.normalise();
    Ok(graph)
}

/// Input affinities for a t-SNE run
///
/// `theta == 0` selects the exact dense mode; any other value the sparse
/// mode with `k = k_factor * perplexity` exact Euclidean neighbours.
///
/// ### Params
///
/// * `x` - Row-major input data
/// * `n` - Number of points
/// * `dim` - Number of features
/// * `perplexity` - Target perplexity
/// * `theta` - Barnes-Hut opening angle of the run
/// * `params` - Calibration parameters
///
/// ### Returns
///
/// Symmetric affinities summing to 1.
pub fn compute_affinities<T>(
    x: &[T],
    n: usize,
    dim: usize,
    perplexity: T,
    theta: T,
    params: &AffinityParams<T>,
) -> Result<Affinities<T>, TsneError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync + Sum,
{
    if theta == T::zero() {
        exact_affinities(x, n, dim, perplexity, params).map(Affinities::Dense)
    } else {
        let k = (params.k_factor * perplexity).to_usize().unwrap_or(0);
        let knn = ExactNeighbours::euclidean(x, n, dim);
        knn_affinities(perplexity, k, &knn, params).map(Affinities::Sparse)
    }
}

///////////
// Tests //
///////////
