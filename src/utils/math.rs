use num_traits::{Float, FromPrimitive};
use rayon::prelude::*;

use crate::error::TsneError;

///////////////
// Distances //
///////////////

/// Squared Euclidean distance between two points
///
/// ### Params
///
/// * `a` - Coordinates of point a
/// * `b` - Coordinates of point b
///
/// ### Returns
///
/// `||a - b||²`
#[inline(always)]
pub fn squared_euclidean<T>(a: &[T], b: &[T]) -> T
where
    T: Float,
{
    a.iter()
        .zip(b)
        .fold(T::zero(), |acc, (&x, &y)| acc + (x - y) * (x - y))
}

/// Euclidean distance between two points
///
/// The default metric for the nearest neighbour search.
#[inline]
pub fn euclidean_distance<T>(a: &[T], b: &[T]) -> T
where
    T: Float,
{
    squared_euclidean(a, b).sqrt()
}

/// Full pairwise squared Euclidean distance matrix
///
/// ### Params
///
/// * `x` - Row-major data with `n` rows and `dim` columns
/// * `n` - Number of points
/// * `dim` - Number of features
///
/// ### Returns
///
/// Row-major `n x n` matrix of squared distances (zero diagonal), or an
/// allocation error.
pub fn squared_distance_matrix<T>(x: &[T], n: usize, dim: usize) -> Result<Vec<T>, TsneError>
where
    T: Float + Send + Sync,
{
    let mut dd = try_alloc(n * n, T::zero(), "distance_matrix")?;

    dd.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        let xi = &x[i * dim..(i + 1) * dim];
        for (j, d) in row.iter_mut().enumerate() {
            if i != j {
                *d = squared_euclidean(xi, &x[j * dim..(j + 1) * dim]);
            }
        }
    });

    Ok(dd)
}

//////////////////
// Centre/scale //
//////////////////

/// Per-column mean of a row-major matrix
pub fn column_means<T>(x: &[T], n: usize, dim: usize) -> Vec<T>
where
    T: Float + FromPrimitive,
{
    let mut mean = vec![T::zero(); dim];
    for row in x.chunks_exact(dim).take(n) {
        for (m, &v) in mean.iter_mut().zip(row) {
            *m = *m + v;
        }
    }
    let n_float = T::from_usize(n.max(1)).unwrap();
    mean.iter_mut().for_each(|m| *m = *m / n_float);
    mean
}

/// Make a row-major matrix zero-mean per column, in place
///
/// ### Params
///
/// * `x` - Row-major data with `n` rows and `dim` columns
/// * `n` - Number of rows
/// * `dim` - Number of columns
pub fn zero_mean<T>(x: &mut [T], n: usize, dim: usize)
where
    T: Float + FromPrimitive + Send + Sync,
{
    let mean = column_means(x, n, dim);
    x.par_chunks_exact_mut(dim).for_each(|row| {
        for (v, &m) in row.iter_mut().zip(&mean) {
            *v = *v - m;
        }
    });
}

/// Divide every entry by the largest absolute value
///
/// Leaves the data untouched if it is all zeros.
pub fn max_abs_scale<T>(x: &mut [T])
where
    T: Float + Send + Sync,
{
    let max_abs = x.iter().fold(T::zero(), |acc, v| acc.max(v.abs()));
    if max_abs > T::zero() {
        x.par_iter_mut().for_each(|v| *v = *v / max_abs);
    }
}

/////////////
// Helpers //
/////////////

/// Sign function with `sign(0) == 0`
#[inline(always)]
pub fn sign<T>(x: T) -> T
where
    T: Float,
{
    if x == T::zero() {
        T::zero()
    } else if x < T::zero() {
        -T::one()
    } else {
        T::one()
    }
}

/// Allocate a buffer without aborting the process on failure
///
/// ### Params
///
/// * `len` - Number of elements
/// * `fill` - Initial value of every element
/// * `name` - Name of the buffer for the error report
///
/// ### Returns
///
/// The filled buffer or `TsneError::Allocation`.
pub fn try_alloc<T>(len: usize, fill: T, name: &'static str) -> Result<Vec<T>, TsneError>
where
    T: Clone,
{
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| TsneError::Allocation { name, len })?;
    buf.resize(len, fill);
    Ok(buf)
}
