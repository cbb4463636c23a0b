use num_traits::{Float, FromPrimitive, ToPrimitive};
use std::time::Instant;
use thousands::*;

use crate::ensure_len;
use crate::error::TsneError;
use crate::training::ForceProvider;
use crate::utils::math::*;

//////////
// tSNE //
//////////

/////////////
// Globals //
/////////////

const TSNE_MAX_ITER: usize = 1000;
const TSNE_LR: f64 = 200.0;
const TSNE_STOP_LYING_ITER: usize = 250;
const TSNE_MOMENTUM_SWITCH_ITER: usize = 250;
const TSNE_EARLY_EXAG: f64 = 12.0;
const TSNE_INITIAL_MOMENTUM: f64 = 0.5;
const TSNE_FINAL_MOMENTUM: f64 = 0.8;
const TSNE_MIN_GAIN: f64 = 0.01;
const TSNE_GAIN_BONUS: f64 = 0.2;
const TSNE_GAIN_DECAY: f64 = 0.8;
const TSNE_INIT_STD: f64 = 1e-4;
const TSNE_COST_EVERY: usize = 50;

////////////////
// Structures //
////////////////

/// t-SNE specific optimisation parameters
///
/// ### Fields
///
/// * `max_iter` - Number of gradient descent iterations (typically 1000)
/// * `lr` - Learning rate
/// * `stop_lying_iter` - Iteration at which early exaggeration ends
/// * `mom_switch_iter` - Iteration at which the momentum switches from
///   `initial_momentum` to `final_momentum`
/// * `early_exag_factor` - The factor to exaggerate in the early iterations
/// * `initial_momentum` - Momentum before `mom_switch_iter`
/// * `final_momentum` - Momentum after `mom_switch_iter`
/// * `min_gain` - Floor on the adaptive gains
/// * `gain_bonus` - Added to a gain when gradient and velocity disagree in sign
/// * `gain_decay` - Multiplied onto a gain otherwise
/// * `init_std` - Standard deviation of the random initial embedding
/// * `cost_every` - KL divergence checkpoint interval
#[derive(Clone, Debug)]
pub struct TsneOptimParams<T> {
    pub max_iter: usize,
    pub lr: T,
    pub stop_lying_iter: usize,
    pub mom_switch_iter: usize,
    pub early_exag_factor: T,
    pub initial_momentum: T,
    pub final_momentum: T,
    pub min_gain: T,
    pub gain_bonus: T,
    pub gain_decay: T,
    pub init_std: T,
    pub cost_every: usize,
}

impl<T> TsneOptimParams<T>
where
    T: Float + FromPrimitive,
{
    /// Generate a new instance
    ///
    /// The schedule constants not listed here keep their defaults.
    ///
    /// ### Params
    ///
    /// * `max_iter` - Number of iterations
    /// * `lr` - Learning rate
    /// * `stop_lying_iter` - Iteration at which early exaggeration ends
    /// * `mom_switch_iter` - Iteration at which the momentum switches
    /// * `early_exag_factor` - Early exaggeration factor
    ///
    /// ### Returns
    ///
    /// Initialised self
    pub fn new(
        max_iter: Option<usize>,
        lr: Option<T>,
        stop_lying_iter: Option<usize>,
        mom_switch_iter: Option<usize>,
        early_exag_factor: Option<T>,
    ) -> Self {
        let default = Self::default();

        Self {
            max_iter: max_iter.unwrap_or(default.max_iter),
            lr: lr.unwrap_or(default.lr),
            stop_lying_iter: stop_lying_iter.unwrap_or(default.stop_lying_iter),
            mom_switch_iter: mom_switch_iter.unwrap_or(default.mom_switch_iter),
            early_exag_factor: early_exag_factor.unwrap_or(default.early_exag_factor),
            ..default
        }
    }

    /// Check the parameters before any work is done
    pub fn validate(&self) -> Result<(), TsneError> {
        if !(self.lr > T::zero()) {
            return Err(TsneError::InvalidParameter(
                "learning rate must be positive".into(),
            ));
        }
        if !(self.early_exag_factor > T::zero()) {
            return Err(TsneError::InvalidParameter(
                "early exaggeration factor must be positive".into(),
            ));
        }
        if !(self.min_gain > T::zero()) {
            return Err(TsneError::InvalidParameter(
                "minimum gain must be positive".into(),
            ));
        }
        if self.cost_every == 0 {
            return Err(TsneError::InvalidParameter(
                "cost_every must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl<T: Float + FromPrimitive> Default for TsneOptimParams<T> {
    fn default() -> Self {
        Self {
            max_iter: TSNE_MAX_ITER,
            lr: T::from_f64(TSNE_LR).unwrap(),
            stop_lying_iter: TSNE_STOP_LYING_ITER,
            mom_switch_iter: TSNE_MOMENTUM_SWITCH_ITER,
            early_exag_factor: T::from_f64(TSNE_EARLY_EXAG).unwrap(),
            initial_momentum: T::from_f64(TSNE_INITIAL_MOMENTUM).unwrap(),
            final_momentum: T::from_f64(TSNE_FINAL_MOMENTUM).unwrap(),
            min_gain: T::from_f64(TSNE_MIN_GAIN).unwrap(),
            gain_bonus: T::from_f64(TSNE_GAIN_BONUS).unwrap(),
            gain_decay: T::from_f64(TSNE_GAIN_DECAY).unwrap(),
            init_std: T::from_f64(TSNE_INIT_STD).unwrap(),
            cost_every: TSNE_COST_EVERY,
        }
    }
}

///////////////
// Optimiser //
///////////////

/// Adaptive gain update for t-SNE gradient descent
///
/// Implements per-parameter adaptive learning rates: gains increase when the
/// gradient's sign differs from the velocity's sign, decrease otherwise.
///
/// ### Params
///
/// * `val` - Current parameter value to update
/// * `update` - Accumulated momentum vector for this parameter
/// * `gain` - Adaptive gain (learning rate multiplier) for this parameter
/// * `grad` - Current gradient for this parameter
/// * `momentum` - Momentum coefficient (typically 0.5 early, 0.8 later)
/// * `params` - Learning rate and gain schedule
#[inline(always)]
fn update_parameter<T>(
    val: &mut T,
    update: &mut T,
    gain: &mut T,
    grad: T,
    momentum: T,
    params: &TsneOptimParams<T>,
) where
    T: Float,
{
    if sign(grad) != sign(*update) {
        *gain = *gain + params.gain_bonus;
    } else {
        *gain = *gain * params.gain_decay;
    }
    *gain = (*gain).max(params.min_gain);

    *update = momentum * *update - params.lr * *gain * grad;
    *val = *val + *update;
}

/// Optimise a `D`-dimensional embedding with t-SNE gradient descent
///
/// Each iteration queries the provider for attractive and repulsive terms
/// (`grad = pos - neg / Z`), updates the adaptive gains and the momentum
/// velocity, moves the embedding and re-centres it to zero mean.
/// Exaggeration is active until the end of iteration `stop_lying_iter`; the
/// momentum switches after iteration `mom_switch_iter`. The KL divergence is
/// evaluated every `cost_every` iterations and at the last one.
///
/// ### Params
///
/// * `embd` - Row-major embedding (`n * D` entries), updated in place
/// * `provider` - Source of the gradient terms
/// * `params` - Optimisation parameters
/// * `verbose` - Print a progress line at every checkpoint
///
/// ### Returns
///
/// The `(iteration, KL divergence)` checkpoints, or an error if the buffers
/// cannot be allocated or the embedding has the wrong size.
pub fn optimise_tsne<T, F, const D: usize>(
    embd: &mut [T],
    provider: &mut F,
    params: &TsneOptimParams<T>,
    verbose: bool,
) -> Result<Vec<(usize, T)>, TsneError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync,
    F: ForceProvider<T>,
{
    let n = provider.n_points();
    ensure_len!(embd, n * D, "embedding");
    params.validate()?;

    let mut pos_f = try_alloc(n * D, T::zero(), "pos_f")?;
    let mut neg_f = try_alloc(n * D, T::zero(), "neg_f")?;
    let mut update = try_alloc(n * D, T::zero(), "update")?;
    let mut gains = try_alloc(n * D, T::one(), "gains")?;

    let floor = T::min_positive_value();
    let mut momentum = params.initial_momentum;
    provider.set_exaggeration(params.early_exag_factor);

    let mut checkpoints = Vec::new();
    let mut start = Instant::now();

    if verbose {
        println!(
            "Learning embedding of {} points in {} dimensions...",
            n.separate_with_underscores(),
            D
        );
    }

    for iter in 0..params.max_iter {
        provider.attractive_forces::<D>(embd, &mut pos_f);
        let z = provider.repulsive_forces::<D>(embd, &mut neg_f).max(floor);

        for k in 0..n * D {
            let grad = pos_f[k] - neg_f[k] / z;
            update_parameter(
                &mut embd[k],
                &mut update[k],
                &mut gains[k],
                grad,
                momentum,
                params,
            );
        }

        zero_mean(embd, n, D);

        if iter == params.stop_lying_iter {
            provider.set_exaggeration(T::one());
        }
        if iter == params.mom_switch_iter {
            momentum = params.final_momentum;
        }

        if iter > 0 && (iter % params.cost_every == 0 || iter == params.max_iter - 1) {
            let cost = provider.kl_divergence::<D>(embd)?;
            checkpoints.push((iter, cost));

            if verbose {
                println!(
                    "Iteration {}: KL divergence is {} ({} iterations in {:.2?})",
                    iter,
                    cost.to_f64().unwrap_or(f64::NAN),
                    params.cost_every,
                    start.elapsed()
                );
            }
            start = Instant::now();
        }
    }

    Ok(checkpoints)
}

///////////
// Tests //
///////////
