use num_traits::Float;

use crate::utils::math::euclidean_distance;

/// Metric used by the neighbour search
pub type Metric<T> = fn(&[T], &[T]) -> T;

/// Nearest neighbour collaborator for the sparse affinity builder
///
/// Implementations answer "the `k + 1` stored points closest to stored point
/// `query`", which includes the query itself. Any index structure (vantage
/// point tree, HNSW, ...) can sit behind this trait.
pub trait NearestNeighbours<T>: Sync {
    /// Number of stored points
    fn n_points(&self) -> usize;

    /// The `k + 1` nearest stored points to `query`
    ///
    /// ### Params
    ///
    /// * `query` - Index of the query point
    /// * `k` - Number of neighbours excluding the query itself
    ///
    /// ### Returns
    ///
    /// `(index, distance)` pairs sorted by ascending distance. The query
    /// point comes first among points at distance zero.
    fn query(&self, query: usize, k: usize) -> Vec<(usize, T)>;
}

/// Brute-force nearest neighbour search over a row-major data buffer
///
/// ### Fields
///
/// * `data` - Row-major data (`n` rows with `dim` features)
/// * `n` - Number of points
/// * `dim` - Number of features
/// * `metric` - Distance function
pub struct ExactNeighbours<'a, T> {
    data: &'a [T],
    n: usize,
    dim: usize,
    metric: Metric<T>,
}

impl<'a, T> ExactNeighbours<'a, T>
where
    T: Float,
{
    /// Generate a new exact search with a custom metric
    pub fn new(data: &'a [T], n: usize, dim: usize, metric: Metric<T>) -> Self {
        debug_assert_eq!(data.len(), n * dim);
        Self {
            data,
            n,
            dim,
            metric,
        }
    }

    /// Generate a new exact search with the Euclidean metric
    pub fn euclidean(data: &'a [T], n: usize, dim: usize) -> Self {
        Self::new(data, n, dim, euclidean_distance::<T>)
    }

    #[inline]
    fn row(&self, i: usize) -> &[T] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }
}

impl<T> NearestNeighbours<T> for ExactNeighbours<'_, T>
where
    T: Float + Send + Sync,
{
    fn n_points(&self) -> usize {
        self.n
    }

    fn query(&self, query: usize, k: usize) -> Vec<(usize, T)> {
        let q = self.row(query);
        let mut candidates: Vec<(usize, T)> = (0..self.n)
            .map(|j| (j, (self.metric)(q, self.row(j))))
            .collect();

        // ties broken by "is the query", then by index
        let order = |a: &(usize, T), b: &(usize, T)| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then((a.0 != query).cmp(&(b.0 != query)))
                .then(a.0.cmp(&b.0))
        };

        let keep = (k + 1).min(self.n);
        if keep < candidates.len() {
            candidates.select_nth_unstable_by(keep - 1, order);
            candidates.truncate(keep);
        }
        candidates.sort_unstable_by(order);

        candidates
    }
}

///////////
// Tests //
///////////
