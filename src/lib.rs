#![allow(clippy::needless_range_loop)] // I like loops ... !

pub mod data;
pub mod error;
pub mod prelude;
pub mod training;
pub mod utils;

use faer::MatRef;
use num_traits::{Float, FromPrimitive, ToPrimitive};
use std::{
    default::Default,
    iter::Sum,
    marker::{Send, Sync},
    time::Instant,
};
use thousands::*;

use crate::data::affinities::*;
use crate::data::init::*;
use crate::data::structures::*;
use crate::error::TsneError;
use crate::training::forces::*;
use crate::training::tsne_optimiser::*;
use crate::utils::math::*;

////////////
// Params //
////////////

/// Stores the parameters of a t-SNE run
///
/// ### Fields
///
/// * `n_dim` - Output dimensionality; `2` or `3`.
/// * `perplexity` - Target perplexity of the input affinities.
/// * `theta` - Barnes-Hut opening angle. `0` runs the exact O(N²) algorithm
///   on dense affinities; anything larger runs Barnes-Hut on the sparse kNN
///   graph.
/// * `seed` - Seed for the random initialisation; `0` uses a fixed default.
/// * `skip_random_init` - Use the caller's `y_out` as the initial embedding.
/// * `normalise_input` - Centre the input and scale it by its largest
///   absolute value before computing affinities.
/// * `affinity_params` - Parameters of the perplexity calibration.
/// * `optim_params` - Parameters of the gradient descent.
#[derive(Debug, Clone)]
pub struct TsneParams<T> {
    pub n_dim: usize,
    pub perplexity: T,
    pub theta: T,
    pub seed: u64,
    pub skip_random_init: bool,
    pub normalise_input: bool,
    pub affinity_params: AffinityParams<T>,
    pub optim_params: TsneOptimParams<T>,
}

impl<T> TsneParams<T>
where
    T: Float + FromPrimitive,
{
    /// Generate new t-SNE parameters
    ///
    /// If everything is set to `None`, the usual defaults are used.
    ///
    /// ### Params
    ///
    /// * `n_dim` - How many dimensions to return. Default `2`.
    /// * `perplexity` - Target perplexity. Default `30`.
    /// * `theta` - Barnes-Hut opening angle. Default `0.5`.
    /// * `seed` - Random seed. Default `0` (fixed default seed).
    /// * `optim_params` - Further optimiser parameters.
    ///
    /// ### Returns
    ///
    /// The parameters; random initialisation and input normalisation are on.
    pub fn new(
        n_dim: Option<usize>,
        perplexity: Option<T>,
        theta: Option<T>,
        seed: Option<u64>,
        optim_params: Option<TsneOptimParams<T>>,
    ) -> Self {
        let n_dim = n_dim.unwrap_or(2);
        let perplexity = perplexity.unwrap_or(T::from_f64(30.0).unwrap());
        let theta = theta.unwrap_or(T::from_f64(0.5).unwrap());
        let seed = seed.unwrap_or(0);
        let optim_params = optim_params.unwrap_or_default();

        Self {
            n_dim,
            perplexity,
            theta,
            seed,
            skip_random_init: false,
            normalise_input: true,
            affinity_params: AffinityParams::default(),
            optim_params,
        }
    }

    /// Check the parameters that do not depend on the data
    fn validate(&self) -> Result<(), TsneError> {
        if self.n_dim != 2 && self.n_dim != 3 {
            return Err(TsneError::UnsupportedOutputDim(self.n_dim));
        }
        if !(self.theta >= T::zero()) {
            return Err(TsneError::InvalidParameter(
                "theta must be non-negative".into(),
            ));
        }
        if self.affinity_params.max_iter == 0 {
            return Err(TsneError::InvalidParameter(
                "the perplexity search needs at least one iteration".into(),
            ));
        }
        self.optim_params.validate()
    }
}

impl<T> Default for TsneParams<T>
where
    T: Float + FromPrimitive,
{
    fn default() -> Self {
        Self::new(None, None, None, None, None)
    }
}

////////////
// Report //
////////////

/// Summary of a finished t-SNE run
///
/// ### Fields
///
/// * `n_points` - Number of embedded points
/// * `n_dim` - Output dimensionality
/// * `checkpoints` - `(iteration, cost)` at every cost evaluation; the KL
///   divergence, or the exaggerated objective while early exaggeration is on
/// * `sparsity` - Stored affinity entries divided by `N²`
#[derive(Debug, Clone)]
pub struct TsneReport<T> {
    pub n_points: usize,
    pub n_dim: usize,
    pub checkpoints: Vec<(usize, T)>,
    pub sparsity: f64,
}

impl<T> TsneReport<T>
where
    T: Float,
{
    /// KL divergence at the last checkpoint, if any was taken
    pub fn final_cost(&self) -> Option<T> {
        self.checkpoints.last().map(|&(_, c)| c)
    }

    /// Landmark indices for the output file (every point is its own landmark)
    pub fn landmarks(&self) -> Vec<usize> {
        (0..self.n_points).collect()
    }

    /// Per-point costs for the output file (not computed; all zero)
    pub fn costs(&self) -> Vec<T> {
        vec![T::zero(); self.n_points]
    }
}

/// Integer status of a run
///
/// ### Returns
///
/// `0` on success, otherwise `TsneError::status_code()`.
pub fn status_code<R>(res: &Result<R, TsneError>) -> i32 {
    match res {
        Ok(_) => 0,
        Err(e) => e.status_code(),
    }
}

/////////
// Run //
/////////

/// Optimise a `D`-dimensional embedding against the computed affinities
fn fit<T, const D: usize>(
    affinities: &Affinities<T>,
    y: &mut [T],
    params: &TsneParams<T>,
    verbose: bool,
) -> Result<Vec<(usize, T)>, TsneError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync + Sum,
{
    match affinities {
        Affinities::Dense(p) => {
            let mut provider = ExactForces::new(p);
            optimise_tsne::<T, _, D>(y, &mut provider, &params.optim_params, verbose)
        }
        Affinities::Sparse(graph) => {
            let mut provider = BarnesHutForces::new(graph, params.theta);
            optimise_tsne::<T, _, D>(y, &mut provider, &params.optim_params, verbose)
        }
    }
}

/// Run t-SNE on a row-major data buffer
///
/// 1. Validate every precondition (no buffer is allocated before this)
/// 2. Optionally centre and scale a working copy of the input
/// 3. Compute the input affinities: dense and exact for `theta == 0`,
///    otherwise over the `3 * perplexity` nearest neighbours
/// 4. Initialise the embedding with small Gaussian noise (unless
///    `skip_random_init` is set)
/// 5. Run the gradient descent with the exact or the Barnes-Hut forces
///
/// ### Params
///
/// * `x` - Input data, `n` rows with `dim` features, row-major
/// * `n` - Number of points
/// * `dim` - Number of input features
/// * `y_out` - Embedding buffer with `n * params.n_dim` entries, row-major.
///   Read as the initial embedding if `skip_random_init` is set; holds the
///   final embedding on success.
/// * `params` - The t-SNE parameters
/// * `verbose` - Controls verbosity of the function
///
/// ### Returns
///
/// The run report, or the error that stopped the run
pub fn run<T>(
    x: &[T],
    n: usize,
    dim: usize,
    y_out: &mut [T],
    params: &TsneParams<T>,
    verbose: bool,
) -> Result<TsneReport<T>, TsneError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync + Sum,
{
    if n == 0 || dim == 0 {
        return Err(TsneError::InvalidDimensions { n, dim });
    }
    params.validate()?;
    crate::ensure_len!(x, n * dim, "x");
    crate::ensure_len!(y_out, n * params.n_dim, "y_out");
    check_perplexity(n, params.perplexity)?;

    let exact = params.theta == T::zero();
    if verbose {
        println!(
            "Using n = {}, dim = {}, perplexity = {:.2}, theta = {:.2} ({} mode)",
            n.separate_with_underscores(),
            dim,
            params.perplexity.to_f64().unwrap_or(f64::NAN),
            params.theta.to_f64().unwrap_or(f64::NAN),
            if exact { "exact" } else { "Barnes-Hut" }
        );
    }

    let start_total = Instant::now();

    let mut x_work = try_alloc(n * dim, T::zero(), "x_work")?;
    x_work.copy_from_slice(x);
    if params.normalise_input {
        zero_mean(&mut x_work, n, dim);
        max_abs_scale(&mut x_work);
    }

    let start_affinities = Instant::now();
    let affinities = compute_affinities(
        &x_work,
        n,
        dim,
        params.perplexity,
        params.theta,
        &params.affinity_params,
    )?;
    drop(x_work);

    if verbose {
        println!(
            "Computed input affinities ({} stored entries, sparsity {:.4}) in {:.2?}.",
            affinities.n_stored().separate_with_underscores(),
            affinities.sparsity(),
            start_affinities.elapsed()
        );
    }

    if !params.skip_random_init {
        let init = gaussian_layout(
            n,
            params.n_dim,
            resolve_seed(params.seed),
            Some(params.optim_params.init_std),
        )?;
        y_out.copy_from_slice(&init);
    }

    let checkpoints = match params.n_dim {
        2 => fit::<T, 2>(&affinities, y_out, params, verbose)?,
        3 => fit::<T, 3>(&affinities, y_out, params, verbose)?,
        other => return Err(TsneError::UnsupportedOutputDim(other)),
    };

    if verbose {
        println!(
            "Fitting performed in {:.2?}. t-SNE complete!",
            start_total.elapsed()
        );
    }

    Ok(TsneReport {
        n_points: n,
        n_dim: params.n_dim,
        checkpoints,
        sparsity: affinities.sparsity(),
    })
}

/// Run t-SNE dimensionality reduction on a matrix
///
/// ### Params
///
/// * `data` - Input data matrix (samples × features)
/// * `params` - The t-SNE parameters. `skip_random_init` is ignored; the
///   embedding is always initialised randomly.
/// * `verbose` - Controls verbosity of the function.
///
/// ### Returns
///
/// Embedding coordinates as `Vec<Vec<T>>` where outer vector has length
/// `n_dim` and inner vectors have length `n_samples`. Each outer element
/// represents one embedding dimension.
///
/// ### Example
///
/// ```ignore
/// use faer::Mat;
/// let data = Mat::from_fn(1000, 50, |_, _| rand::random::<f64>());
/// let embedding = tsne(data.as_ref(), &TsneParams::default(), false)?;
/// // embedding[0] contains x-coordinates for all points
/// // embedding[1] contains y-coordinates for all points
/// ```
pub fn tsne<T>(
    data: MatRef<T>,
    params: &TsneParams<T>,
    verbose: bool,
) -> Result<Vec<Vec<T>>, TsneError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync + Sum,
{
    let n_samples = data.nrows();
    let n_features = data.ncols();

    let mut x = try_alloc(n_samples * n_features, T::zero(), "x")?;
    for i in 0..n_samples {
        for j in 0..n_features {
            x[i * n_features + j] = data[(i, j)];
        }
    }

    let params = TsneParams {
        skip_random_init: false,
        ..params.clone()
    };
    let mut embd = try_alloc(n_samples * params.n_dim, T::zero(), "embedding")?;
    run(&x, n_samples, n_features, &mut embd, &params, verbose)?;

    // transpose: from [n_samples][n_dim] to [n_dim][n_samples]
    let mut transposed = Vec::with_capacity(params.n_dim);
    for dim_idx in 0..params.n_dim {
        let mut column = try_alloc(n_samples, T::zero(), "embedding_column")?;
        for (sample_idx, v) in column.iter_mut().enumerate() {
            *v = embd[sample_idx * params.n_dim + dim_idx];
        }
        transposed.push(column);
    }

    Ok(transposed)
}

///////////
// Tests //
///////////
