use num_traits::{Float, FromPrimitive, ToPrimitive};
use rand::{
    rngs::StdRng,
    {Rng, SeedableRng},
};
use rand_distr::StandardNormal;

use crate::error::TsneError;
use crate::utils::math::try_alloc;

/// Seed used when the caller passes `0`
pub const DEFAULT_SEED: u64 = 0xDEADBEEF;

/// Default standard deviation of the Gaussian initialisation
pub const GAUSSIAN_STD: f64 = 1e-4;

/////////////
// Helpers //
/////////////

/// Resolve the user-facing seed
///
/// ### Params
///
/// * `seed` - User seed; `0` means "use the fixed default seed"
///
/// ### Returns
///
/// The seed for the random number generator
pub fn resolve_seed(seed: u64) -> u64 {
    if seed == 0 {
        DEFAULT_SEED
    } else {
        seed
    }
}

//////////////
// Gaussian //
//////////////

/// Gaussian initialisation of the embedding
///
/// Draws every coordinate i.i.d. from `N(0, std²)`. The generator is local to
/// the call, so the same seed always yields the same layout.
///
/// ### Params
///
/// * `n_samples` - Number of samples to initialise
/// * `n_comp` - Dimensionality of the embedding
/// * `seed` - Seed for the generator (already resolved)
/// * `std` - Standard deviation (`None` for `GAUSSIAN_STD`)
///
/// ### Returns
///
/// Row-major embedding with `n_samples * n_comp` entries
pub fn gaussian_layout<T>(
    n_samples: usize,
    n_comp: usize,
    seed: u64,
    std: Option<T>,
) -> Result<Vec<T>, TsneError>
where
    T: Float + FromPrimitive + ToPrimitive,
{
    let std = std
        .unwrap_or(T::from_f64(GAUSSIAN_STD).unwrap())
        .to_f64()
        .unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut embedding = try_alloc(n_samples * n_comp, T::zero(), "embedding")?;

    for v in embedding.iter_mut() {
        *v = T::from_f64(rng.sample::<f64, _>(StandardNormal) * std).unwrap();
    }

    Ok(embedding)
}

///////////
// Tests //
///////////
