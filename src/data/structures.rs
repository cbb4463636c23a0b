use num_traits::{Float, FromPrimitive};
use rayon::prelude::*;
use std::iter::Sum;

use crate::assert_same_len;
use crate::error::TsneError;

/////////////////////
// Data structures //
/////////////////////

/////////
// CSR //
/////////

/// Sparse affinity graph in CSR (compressed sparse row) format
///
/// Row `i` owns the entries `indptr[i]..indptr[i + 1]` of `indices` and
/// `values`. Column indices within a row are not required to be sorted.
///
/// ### Fields
///
/// * `indptr` - Row offsets with `n_vertices + 1` entries, `indptr[0] == 0`
/// * `indices` - Column (neighbour) index of every stored entry
/// * `values` - Non-negative affinity of every stored entry
/// * `n_vertices` - The number of vertices in the graph
#[derive(Clone, Debug)]
pub struct CsrGraph<T> {
    pub indptr: Vec<usize>,
    pub indices: Vec<usize>,
    pub values: Vec<T>,
    pub n_vertices: usize,
}

impl<T> CsrGraph<T>
where
    T: Float + FromPrimitive + Send + Sync + Sum,
{
    /// Generate a new CSR graph, checking the structural invariants
    ///
    /// ### Params
    ///
    /// * `indptr` - Row offsets (`n_vertices + 1` entries, monotonically
    ///   non-decreasing, starting at 0)
    /// * `indices` - Column indices (all `< n_vertices`)
    /// * `values` - Values (same length as `indices`)
    ///
    /// ### Returns
    ///
    /// The graph or `TsneError::InvalidParameter` describing the violation.
    pub fn new(indptr: Vec<usize>, indices: Vec<usize>, values: Vec<T>) -> Result<Self, TsneError> {
        if indptr.is_empty() || indptr[0] != 0 {
            return Err(TsneError::InvalidParameter(
                "CSR row offsets must start at 0".into(),
            ));
        }
        if indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(TsneError::InvalidParameter(
                "CSR row offsets must be non-decreasing".into(),
            ));
        }
        let n_vertices = indptr.len() - 1;
        let nnz = indptr[n_vertices];
        if indices.len() != nnz || values.len() != nnz {
            return Err(TsneError::InvalidParameter(format!(
                "CSR expects {} entries, got {} indices and {} values",
                nnz,
                indices.len(),
                values.len()
            )));
        }
        if indices.iter().any(|&j| j >= n_vertices) {
            return Err(TsneError::InvalidParameter(
                "CSR column index out of range".into(),
            ));
        }

        Ok(Self {
            indptr,
            indices,
            values,
            n_vertices,
        })
    }

    /// Assemble a CSR graph from per-row adjacency lists
    ///
    /// ### Params
    ///
    /// * `rows` - For every vertex the `(neighbour, value)` pairs, in storage
    ///   order
    ///
    /// ### Returns
    ///
    /// The graph with rows stored in the given order.
    pub fn from_rows(rows: Vec<Vec<(usize, T)>>) -> Self {
        let n_vertices = rows.len();
        let nnz: usize = rows.iter().map(|r| r.len()).sum();

        let mut indptr = Vec::with_capacity(n_vertices + 1);
        let mut indices = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);

        indptr.push(0);
        for row in rows {
            for (j, v) in row {
                indices.push(j);
                values.push(v);
            }
            indptr.push(indices.len());
        }

        Self {
            indptr,
            indices,
            values,
            n_vertices,
        }
    }

    /// Number of stored (directed) entries
    #[inline]
    pub fn n_entries(&self) -> usize {
        assert_same_len!(self.indices, self.values);
        self.values.len()
    }

    /// Iterate over the `(neighbour, value)` pairs of row `i`
    #[inline]
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, T)> + '_ {
        let (start, end) = (self.indptr[i], self.indptr[i + 1]);
        self.indices[start..end]
            .iter()
            .copied()
            .zip(self.values[start..end].iter().copied())
    }

    /// Sum of the values of row `i`
    pub fn row_sum(&self, i: usize) -> T {
        self.row(i).map(|(_, v)| v).sum()
    }

    /// Total weight stored in the graph
    pub fn total(&self) -> T {
        self.values.iter().copied().sum()
    }

    /// Look up the value of entry `(i, j)` via a linear scan of row `i`
    pub fn get(&self, i: usize, j: usize) -> Option<T> {
        self.row(i).find(|&(c, _)| c == j).map(|(_, v)| v)
    }

    /// Divide all values by their total so that they sum to 1
    ///
    /// A graph with zero total weight is left as is.
    pub fn normalise(&mut self) {
        let total = self.total();
        if total > T::zero() {
            self.values.par_iter_mut().for_each(|v| *v = *v / total);
        }
    }

    /// Generate an edge list from the CSR
    ///
    /// ### Returns
    ///
    /// A vector of `(row, col, value)` tuples in storage order
    pub fn to_edge_list(&self) -> Vec<(usize, usize, T)> {
        (0..self.n_vertices)
            .flat_map(|i| self.row(i).map(move |(j, v)| (i, j, v)))
            .collect()
    }
}

///////////
// Dense //
///////////

/// Dense N x N affinity matrix, row-major
///
/// ### Fields
///
/// * `values` - The `n * n` entries
/// * `n` - Number of points
#[derive(Clone, Debug)]
pub struct DenseAffinities<T> {
    pub values: Vec<T>,
    pub n: usize,
}

impl<T> DenseAffinities<T>
where
    T: Float + Send + Sync + Sum,
{
    /// Row `i` of the matrix
    #[inline]
    pub fn row(&self, i: usize) -> &[T] {
        &self.values[i * self.n..(i + 1) * self.n]
    }

    /// Entry `(i, j)`
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> T {
        self.values[i * self.n + j]
    }

    /// Total weight of the matrix
    pub fn total(&self) -> T {
        self.values.iter().copied().sum()
    }

    /// Divide all entries by their total so that they sum to 1
    pub fn normalise(&mut self) {
        let total = self.total();
        if total > T::zero() {
            self.values.par_iter_mut().for_each(|v| *v = *v / total);
        }
    }
}

////////////////
// Affinities //
////////////////

/// The input affinities of a t-SNE run
///
/// Exact runs (`theta == 0`) keep the full matrix; Barnes-Hut runs keep the
/// symmetrised k-nearest neighbour graph.
#[derive(Clone, Debug)]
pub enum Affinities<T> {
    /// Full N x N matrix
    Dense(DenseAffinities<T>),
    /// Sparse symmetric kNN graph
    Sparse(CsrGraph<T>),
}

impl<T> Affinities<T>
where
    T: Float + FromPrimitive + Send + Sync + Sum,
{
    /// Number of points the affinities were computed for
    pub fn n_points(&self) -> usize {
        match self {
            Affinities::Dense(p) => p.n,
            Affinities::Sparse(g) => g.n_vertices,
        }
    }

    /// Number of stored entries
    pub fn n_stored(&self) -> usize {
        match self {
            Affinities::Dense(p) => p.values.len(),
            Affinities::Sparse(g) => g.n_entries(),
        }
    }

    /// Fraction of the N x N matrix that is stored
    pub fn sparsity(&self) -> f64 {
        let n = self.n_points() as f64;
        if n == 0.0 {
            return 0.0;
        }
        self.n_stored() as f64 / (n * n)
    }

    /// Total weight (1 after normalisation)
    pub fn total(&self) -> T {
        match self {
            Affinities::Dense(p) => p.total(),
            Affinities::Sparse(g) => g.total(),
        }
    }
}

///////////
// Tests //
///////////
