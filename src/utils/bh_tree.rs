use num_traits::{Float, FromPrimitive};
use rayon::prelude::*;

use crate::data::structures::CsrGraph;
use crate::utils::math::squared_euclidean;

/////////////
// Globals //
/////////////

/// Cells at this depth stop subdividing and collect every further point.
///
/// Points closer than `width / 2^MAX_TREE_DEPTH` share a leaf instead of
/// splitting the cell until the float widths underflow.
pub const MAX_TREE_DEPTH: usize = 48;

/// Smallest padding added to the half-width of the root cell
const BOUNDARY_PADDING: f64 = 1e-5;

/// Padding of the root cell in units of `T::epsilon()` times the largest
/// coordinate magnitude on the axis
///
/// Covers the rounding of `centre ± half_width` once a fixed padding falls
/// below one ulp of the coordinates (f32 beyond a few hundred units).
const RELATIVE_PADDING: f64 = 16.0;

//////////
// Cell //
//////////

/// A cell in the flattened space-partitioning tree
///
/// ### Fields
///
/// * `centre` - Geometric centre of the axis-aligned box
/// * `half_width` - Half-extent of the box per axis
/// * `centre_of_mass` - Running mean of all points inside the cell
/// * `cum_size` - Number of points inside the cell (including descendants)
/// * `first_child` - Index of the first of the `2^D` contiguous children in
///   the arena; `None` for leaves.
/// * `point_indices` - Points stored in this leaf. One point normally;
///   several only for coincident points or cells at `MAX_TREE_DEPTH`. Empty
///   for internal cells.
/// * `depth` - Depth of the cell (root is 0)
#[derive(Debug, Clone)]
pub struct Cell<T, const D: usize> {
    pub centre: [T; D],
    pub half_width: [T; D],
    pub centre_of_mass: [T; D],
    pub cum_size: usize,
    pub first_child: Option<usize>,
    pub point_indices: Vec<usize>,
    pub depth: usize,
}

impl<T, const D: usize> Cell<T, D>
where
    T: Float,
{
    fn new(centre: [T; D], half_width: [T; D], depth: usize) -> Self {
        Self {
            centre,
            half_width,
            centre_of_mass: [T::zero(); D],
            cum_size: 0,
            first_child: None,
            point_indices: Vec::new(),
            depth,
        }
    }

    /// Check if this is a leaf cell
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.first_child.is_none()
    }

    /// Does the (closed) box of the cell contain the point
    #[inline]
    pub fn contains_point(&self, point: &[T; D]) -> bool {
        (0..D).all(|d| {
            point[d] >= self.centre[d] - self.half_width[d]
                && point[d] <= self.centre[d] + self.half_width[d]
        })
    }

    /// Squared diagonal half-width of the cell
    #[inline]
    pub fn squared_size(&self) -> T {
        self.half_width
            .iter()
            .fold(T::zero(), |acc, &w| acc + w * w)
    }

    /// Index (`0..2^D`) of the child quadrant a point falls into
    ///
    /// Bit `d` is set if the point lies strictly above the centre on axis
    /// `d`; points on the centre plane go to the lower child.
    #[inline]
    fn child_offset(&self, point: &[T; D]) -> usize {
        (0..D).fold(0, |acc, d| {
            if point[d] > self.centre[d] {
                acc | (1 << d)
            } else {
                acc
            }
        })
    }
}

///////////////
// SpaceTree //
///////////////

/// Barnes-Hut space-partitioning tree over a `D`-dimensional embedding
///
/// Quadtree for `D = 2`, octree for `D = 3`. The cells live in one flat
/// arena; children of a cell are `2^D` consecutive entries. The tree borrows
/// the embedding it was built from and is read-only once constructed, so the
/// force queries can run concurrently.
pub struct SpaceTree<'a, T, const D: usize> {
    data: &'a [T],
    nodes: Vec<Cell<T, D>>,
    n_points: usize,
}

impl<'a, T, const D: usize> SpaceTree<'a, T, D>
where
    T: Float + FromPrimitive + Send + Sync,
{
    const N_CHILDREN: usize = 1 << D;

    /// Build the tree from the current embedding
    ///
    /// The root cell is the (slightly padded) bounding box of all points.
    ///
    /// ### Params
    ///
    /// * `data` - Row-major embedding with `D` coordinates per point
    pub fn new(data: &'a [T]) -> Self {
        let (centre, half_width) = Self::bounding_box(data);
        Self::build(data, centre, half_width)
    }

    /// Build the tree inside an explicit boundary
    ///
    /// If any point lies outside the given box, the box is grown to cover it
    /// before a single point is inserted.
    ///
    /// ### Params
    ///
    /// * `data` - Row-major embedding with `D` coordinates per point
    /// * `centre` - Centre of the root cell
    /// * `half_width` - Half-extent of the root cell per axis
    pub fn with_boundary(data: &'a [T], centre: [T; D], half_width: [T; D]) -> Self {
        let (data_centre, data_half_width) = Self::bounding_box(data);
        let mut centre = centre;
        let mut half_width = half_width;

        let mut grown = false;
        if !data.is_empty() {
            for d in 0..D {
                let lo = (centre[d] - half_width[d]).min(data_centre[d] - data_half_width[d]);
                let hi = (centre[d] + half_width[d]).max(data_centre[d] + data_half_width[d]);
                let two = T::one() + T::one();
                if lo < centre[d] - half_width[d] || hi > centre[d] + half_width[d] {
                    grown = true;
                    centre[d] = (lo + hi) / two;
                    half_width[d] = (hi - lo) / two;
                }
            }
        }
        if grown {
            log::debug!("Tree boundary did not cover all points; grown to fit.");
        }

        Self::build(data, centre, half_width)
    }

    /// Padded bounding box of the embedding as `(centre, half_width)`
    fn bounding_box(data: &[T]) -> ([T; D], [T; D]) {
        let mut min = [T::infinity(); D];
        let mut max = [T::neg_infinity(); D];
        for p in data.chunks_exact(D) {
            for d in 0..D {
                min[d] = min[d].min(p[d]);
                max[d] = max[d].max(p[d]);
            }
        }

        let two = T::one() + T::one();
        let padding = T::from_f64(BOUNDARY_PADDING).unwrap();
        let relative = T::from_f64(RELATIVE_PADDING).unwrap() * T::epsilon();
        let mut centre = [T::zero(); D];
        let mut half_width = [padding; D];
        if !data.is_empty() {
            for d in 0..D {
                let magnitude = min[d].abs().max(max[d].abs());
                centre[d] = (min[d] + max[d]) / two;
                half_width[d] = (max[d] - min[d]) / two + padding.max(relative * magnitude);
            }
        }
        (centre, half_width)
    }

    /// Insert every point into a fresh root cell
    fn build(data: &'a [T], centre: [T; D], half_width: [T; D]) -> Self {
        let n_points = data.len() / D;
        let mut nodes = Vec::with_capacity(2 * n_points.max(1));
        nodes.push(Cell::new(centre, half_width, 0));

        let mut tree = Self {
            data,
            nodes,
            n_points,
        };

        for idx in 0..n_points {
            // the root always covers the data, so a miss is a defect (e.g. NaN)
            assert!(
                tree.insert(idx),
                "point {} lies outside the root cell of the tree",
                idx
            );
        }

        tree
    }

    /// Coordinates of point `idx`
    #[inline(always)]
    fn point(&self, idx: usize) -> [T; D] {
        std::array::from_fn(|d| self.data[idx * D + d])
    }

    /// Insert point `idx` of the embedding
    ///
    /// ### Returns
    ///
    /// `false` if the point lies outside the root cell (nothing is changed).
    pub(crate) fn insert(&mut self, idx: usize) -> bool {
        let point = self.point(idx);
        if !self.nodes[0].contains_point(&point) {
            return false;
        }
        self.insert_from(0, idx, &point);
        true
    }

    /// Insert a point starting at cell `start`, which must contain it
    fn insert_from(&mut self, start: usize, idx: usize, point: &[T; D]) {
        let mut node_idx = start;

        loop {
            // every cell on the path counts the point
            let cell = &mut self.nodes[node_idx];
            cell.cum_size += 1;
            let n = T::from_usize(cell.cum_size).unwrap();
            let old_weight = (n - T::one()) / n;
            for d in 0..D {
                cell.centre_of_mass[d] = cell.centre_of_mass[d] * old_weight + point[d] / n;
            }

            if cell.is_leaf() {
                if cell.point_indices.is_empty() {
                    cell.point_indices.push(idx);
                    return;
                }

                // coincident points cannot be separated geometrically
                let held = cell.point_indices[0];
                let duplicate = (0..D).all(|d| self.data[held * D + d] == point[d]);
                if duplicate || cell.depth >= MAX_TREE_DEPTH {
                    self.nodes[node_idx].point_indices.push(idx);
                    return;
                }

                self.subdivide(node_idx);
            }

            let cell = &self.nodes[node_idx];
            let Some(first) = cell.first_child else {
                unreachable!("internal cell without children");
            };
            node_idx = first + cell.child_offset(point);
        }
    }

    /// Split a leaf into `2^D` children and push its points down
    ///
    /// The leaf's own count and centre of mass already include the held
    /// points, so they are only re-counted in the children.
    fn subdivide(&mut self, node_idx: usize) {
        let two = T::one() + T::one();
        let first_child = self.nodes.len();
        let (centre, half_width, depth) = {
            let cell = &self.nodes[node_idx];
            (cell.centre, cell.half_width, cell.depth)
        };

        for offset in 0..Self::N_CHILDREN {
            let mut child_centre = centre;
            let mut child_half_width = half_width;
            for d in 0..D {
                child_half_width[d] = half_width[d] / two;
                if offset & (1 << d) != 0 {
                    child_centre[d] = centre[d] + child_half_width[d];
                } else {
                    child_centre[d] = centre[d] - child_half_width[d];
                }
            }
            self.nodes
                .push(Cell::new(child_centre, child_half_width, depth + 1));
        }

        let held = std::mem::take(&mut self.nodes[node_idx].point_indices);
        self.nodes[node_idx].first_child = Some(first_child);

        for h in held {
            let p = self.point(h);
            let child = first_child + self.nodes[node_idx].child_offset(&p);
            self.insert_from(child, h, &p);
        }
    }

    ////////////
    // Forces //
    ////////////

    /// Exact attractive forces along the stored sparse edges
    ///
    /// ### Params
    ///
    /// * `graph` - Symmetric affinity graph
    /// * `pos_f` - Output buffer with `n * D` entries; overwritten
    pub fn compute_edge_forces(&self, graph: &CsrGraph<T>, pos_f: &mut [T]) {
        edge_forces::<T, D>(self.data, graph, T::one(), pos_f);
    }

    /// Approximate repulsive force on one point (Barnes-Hut)
    ///
    /// A cell is summarised by its centre of mass when
    /// `cell_size / sqrt(dist²) < theta`, where `cell_size` is the diagonal
    /// half-width. Leaves are always evaluated point by point, skipping the
    /// query point itself. `theta == 0` gives the exact O(N) sum.
    ///
    /// ### Params
    ///
    /// * `point_index` - Index of the query point in the embedding
    /// * `theta` - Barnes-Hut opening angle
    /// * `neg_f` - Output with `D` entries; overwritten with the unnormalised
    ///   repulsive force `Σ q² (y_i - y_j)`
    ///
    /// ### Returns
    ///
    /// The partial normaliser `Σ q` for this point.
    pub fn compute_non_edge_forces(&self, point_index: usize, theta: T, neg_f: &mut [T]) -> T {
        let point = self.point(point_index);
        neg_f.iter_mut().for_each(|f| *f = T::zero());

        let theta_sq = theta * theta;
        let mut sum_q = T::zero();
        let mut diff = [T::zero(); D];

        let mut stack = Vec::with_capacity(64);
        stack.push(0);

        while let Some(node_idx) = stack.pop() {
            let cell = &self.nodes[node_idx];
            if cell.cum_size == 0 {
                continue;
            }

            if cell.is_leaf() {
                for &j in &cell.point_indices {
                    if j == point_index {
                        continue;
                    }
                    let other = &self.data[j * D..(j + 1) * D];
                    let q = T::one() / (T::one() + squared_euclidean(&point, other));
                    sum_q = sum_q + q;
                    let mult = q * q;
                    for d in 0..D {
                        neg_f[d] = neg_f[d] + mult * (point[d] - other[d]);
                    }
                }
                continue;
            }

            for d in 0..D {
                diff[d] = point[d] - cell.centre_of_mass[d];
            }
            let dist_sq = diff.iter().fold(T::zero(), |acc, &x| acc + x * x);

            if cell.squared_size() < theta_sq * dist_sq {
                let q = T::one() / (T::one() + dist_sq);
                let mass = T::from_usize(cell.cum_size).unwrap();
                sum_q = sum_q + mass * q;
                let mult = mass * q * q;
                for d in 0..D {
                    neg_f[d] = neg_f[d] + mult * diff[d];
                }
            } else if let Some(first) = cell.first_child {
                stack.extend(first..first + Self::N_CHILDREN);
            }
        }

        sum_q
    }

    /// Repulsive forces and normaliser for all points in parallel
    ///
    /// ### Params
    ///
    /// * `theta` - Barnes-Hut opening angle
    /// * `neg_f` - Output buffer with `n * D` entries; overwritten
    ///
    /// ### Returns
    ///
    /// The global normaliser `Z`, summed in point order.
    pub fn compute_all_non_edge_forces(&self, theta: T, neg_f: &mut [T]) -> T {
        let partial_z: Vec<T> = neg_f
            .par_chunks_mut(D)
            .enumerate()
            .map(|(i, out)| self.compute_non_edge_forces(i, theta, out))
            .collect();

        partial_z.iter().fold(T::zero(), |acc, &z| acc + z)
    }

    /////////////////
    // Diagnostics //
    /////////////////

    /// The cell arena
    pub fn nodes(&self) -> &[Cell<T, D>] {
        &self.nodes
    }

    /// The root cell
    pub fn root(&self) -> &Cell<T, D> {
        &self.nodes[0]
    }

    /// Number of cells in the arena
    pub fn n_cells(&self) -> usize {
        self.nodes.len()
    }

    /// Number of points the tree was built from
    pub fn n_points(&self) -> usize {
        self.n_points
    }

    /// Depth of the deepest cell (a lone root has depth 1)
    pub fn depth(&self) -> usize {
        self.nodes.iter().map(|c| c.depth + 1).max().unwrap_or(0)
    }

    /// All point indices stored in the leaves, in depth-first order
    pub fn all_indices(&self) -> Vec<usize> {
        let mut indices = Vec::with_capacity(self.n_points);
        let mut stack = vec![0];
        while let Some(node_idx) = stack.pop() {
            let cell = &self.nodes[node_idx];
            match cell.first_child {
                None => indices.extend_from_slice(&cell.point_indices),
                Some(first) => stack.extend((first..first + Self::N_CHILDREN).rev()),
            }
        }
        indices
    }

    /// Leaf cell holding point `idx`, found by geometric descent
    pub fn locate(&self, idx: usize) -> Option<usize> {
        let point = self.point(idx);
        if !self.nodes[0].contains_point(&point) {
            return None;
        }
        let mut node_idx = 0;
        loop {
            let cell = &self.nodes[node_idx];
            match cell.first_child {
                None => return cell.point_indices.contains(&idx).then_some(node_idx),
                Some(first) => node_idx = first + cell.child_offset(&point),
            }
        }
    }

    /// Check the structural invariants of the tree
    ///
    /// * every stored point lies inside the box of its leaf
    /// * every internal cell's count equals the sum of its children's counts
    /// * the root counts every point of the embedding
    pub fn is_correct(&self) -> bool {
        if self.nodes[0].cum_size != self.n_points {
            return false;
        }
        self.nodes.iter().all(|cell| match cell.first_child {
            None => {
                cell.point_indices.len() == cell.cum_size
                    && cell
                        .point_indices
                        .iter()
                        .all(|&idx| cell.contains_point(&self.point(idx)))
            }
            Some(first) => {
                cell.point_indices.is_empty()
                    && self.nodes[first..first + Self::N_CHILDREN]
                        .iter()
                        .map(|c| c.cum_size)
                        .sum::<usize>()
                        == cell.cum_size
            }
        })
    }
}

/// Exact attractive forces along the edges of a sparse graph
///
/// `pos_f[i] = scale * Σ_j p_ij q_ij (y_i - y_j)` with
/// `q_ij = 1 / (1 + ||y_i - y_j||²)`, computed in parallel over rows.
///
/// ### Params
///
/// * `embd` - Row-major embedding with `D` coordinates per point
/// * `graph` - Affinity graph
/// * `scale` - Multiplier on the affinities (early exaggeration)
/// * `pos_f` - Output buffer with `n * D` entries; overwritten
pub fn edge_forces<T, const D: usize>(embd: &[T], graph: &CsrGraph<T>, scale: T, pos_f: &mut [T])
where
    T: Float + Send + Sync,
{
    pos_f.par_chunks_mut(D).enumerate().for_each(|(i, out)| {
        out.iter_mut().for_each(|f| *f = T::zero());
        let yi = &embd[i * D..(i + 1) * D];
        let (start, end) = (graph.indptr[i], graph.indptr[i + 1]);
        for (&j, &p) in graph.indices[start..end]
            .iter()
            .zip(&graph.values[start..end])
        {
            let yj = &embd[j * D..(j + 1) * D];
            let q = T::one() / (T::one() + squared_euclidean(yi, yj));
            let mult = scale * p * q;
            for d in 0..D {
                out[d] = out[d] + mult * (yi[d] - yj[d]);
            }
        }
    });
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    /// Helper: flat 2D embedding from tuples
    fn embd_from_tuples(pts: &[(f64, f64)]) -> Vec<f64> {
        pts.iter().flat_map(|&(x, y)| [x, y]).collect()
    }

    /// Helper: exact O(N) repulsion for one point
    fn brute_force_repulsion(embd: &[f64], i: usize) -> (f64, f64, f64) {
        let n = embd.len() / 2;
        let (mut fx, mut fy, mut sum_q) = (0.0, 0.0, 0.0);
        for j in 0..n {
            if j == i {
                continue;
            }
            let dx = embd[2 * i] - embd[2 * j];
            let dy = embd[2 * i + 1] - embd[2 * j + 1];
            let q = 1.0 / (1.0 + dx * dx + dy * dy);
            sum_q += q;
            fx += q * q * dx;
            fy += q * q * dy;
        }
        (fx, fy, sum_q)
    }

    #[test]
    fn test_single_point_tree() {
        let embd = embd_from_tuples(&[(1.0, 2.0)]);
        let tree = SpaceTree::<f64, 2>::new(&embd);

        assert_eq!(tree.n_cells(), 1);
        let root = tree.root();
        assert_relative_eq!(root.centre_of_mass[0], 1.0);
        assert_relative_eq!(root.centre_of_mass[1], 2.0);
        assert_eq!(root.cum_size, 1);
        assert_eq!(root.point_indices, vec![0]);
        assert!(root.is_leaf());
    }

    #[test]
    fn test_two_points_subdivide() {
        let embd = embd_from_tuples(&[(0.0, 0.0), (10.0, 10.0)]);
        let tree = SpaceTree::<f64, 2>::new(&embd);

        let root = tree.root();
        assert_eq!(root.cum_size, 2);
        assert_relative_eq!(root.centre_of_mass[0], 5.0);
        assert_relative_eq!(root.centre_of_mass[1], 5.0);
        assert!(!root.is_leaf());
        assert!(root.point_indices.is_empty());
        // root + 4 children
        assert_eq!(tree.n_cells(), 5);
        assert!(tree.is_correct());
    }

    #[test]
    fn test_coincident_points_share_leaf() {
        let embd = embd_from_tuples(&[(5.0, 5.0), (5.0, 5.0), (5.0, 5.0)]);
        let tree = SpaceTree::<f64, 2>::new(&embd);

        let root = tree.root();
        assert_eq!(root.cum_size, 3);
        assert!(root.is_leaf());
        assert_eq!(root.point_indices, vec![0, 1, 2]);
        assert!(tree.is_correct());
    }

    #[test]
    fn test_coincident_points_after_subdivision() {
        let embd = embd_from_tuples(&[(0.0, 0.0), (3.0, 3.0), (3.0, 3.0), (3.0, 3.0)]);
        let tree = SpaceTree::<f64, 2>::new(&embd);

        assert!(tree.is_correct());
        let leaf = tree.locate(2).unwrap();
        assert_eq!(tree.nodes()[leaf].point_indices, vec![1, 2, 3]);
        assert_eq!(tree.locate(1), Some(leaf));
    }

    #[test]
    fn test_near_coincident_points_terminate() {
        let embd = embd_from_tuples(&[(1.0, 1.0), (1.0 + 1e-15, 1.0), (1.0, 1.0 + 1e-15)]);
        let tree = SpaceTree::<f64, 2>::new(&embd);

        assert_eq!(tree.root().cum_size, 3);
        assert!(tree.depth() <= MAX_TREE_DEPTH + 1);
        let mut idx = tree.all_indices();
        idx.sort_unstable();
        assert_eq!(idx, vec![0, 1, 2]);
    }

    #[test]
    fn test_mass_conservation_and_locatable() {
        let embd = embd_from_tuples(&[
            (0.0, 0.0),
            (1.0, 0.0),
            (0.0, 1.0),
            (1.0, 1.0),
            (0.5, 0.5),
            (2.0, 2.0),
            (3.0, 1.0),
        ]);
        let tree = SpaceTree::<f64, 2>::new(&embd);

        assert_eq!(tree.root().cum_size, 7);
        assert!(tree.is_correct());

        let mut idx = tree.all_indices();
        idx.sort_unstable();
        assert_eq!(idx, (0..7).collect::<Vec<_>>());

        for i in 0..7 {
            let leaf = tree.locate(i).expect("point should be locatable");
            assert!(tree.nodes()[leaf].is_leaf());
        }
    }

    #[test]
    fn test_centre_of_mass_correctness() {
        let embd = embd_from_tuples(&[(0.0, 0.0), (4.0, 0.0), (0.0, 4.0), (4.0, 4.0)]);
        let tree = SpaceTree::<f64, 2>::new(&embd);

        let root = tree.root();
        assert_relative_eq!(root.centre_of_mass[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(root.centre_of_mass[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_explicit_boundary_grows() {
        let embd = embd_from_tuples(&[(0.0, 0.0), (10.0, -4.0), (-3.0, 7.0)]);
        let tree = SpaceTree::<f64, 2>::with_boundary(&embd, [0.0, 0.0], [1.0, 1.0]);

        assert_eq!(tree.root().cum_size, 3);
        assert!(tree.is_correct());
        for i in 0..3 {
            assert!(tree.locate(i).is_some());
        }
    }

    #[test]
    fn test_explicit_boundary_kept_if_valid() {
        let embd = embd_from_tuples(&[(0.5, 0.5), (-0.5, -0.5)]);
        let tree = SpaceTree::<f64, 2>::with_boundary(&embd, [0.0, 0.0], [2.0, 2.0]);

        assert_relative_eq!(tree.root().half_width[0], 2.0);
        assert_relative_eq!(tree.root().centre[1], 0.0);
    }

    #[test]
    fn test_octree_structure() {
        let embd = vec![
            0.0, 0.0, 0.0, //
            1.0, 1.0, 1.0, //
            -1.0, 0.5, 2.0, //
            0.3, -0.7, 0.1, //
        ];
        let tree = SpaceTree::<f64, 3>::new(&embd);

        assert_eq!(tree.root().cum_size, 4);
        assert!(tree.is_correct());
        // subdivided cells have eight children
        assert_eq!((tree.n_cells() - 1) % 8, 0);
        assert_relative_eq!(tree.root().centre_of_mass[2], 0.775, epsilon = 1e-12);
    }

    #[test]
    fn test_no_self_interaction_single_point() {
        let embd = embd_from_tuples(&[(0.0, 0.0)]);
        let tree = SpaceTree::<f64, 2>::new(&embd);

        let mut f = [0.0; 2];
        let sum_q = tree.compute_non_edge_forces(0, 0.5, &mut f);

        assert_relative_eq!(f[0], 0.0);
        assert_relative_eq!(f[1], 0.0);
        assert_relative_eq!(sum_q, 0.0);
    }

    #[test]
    fn test_coincident_points_finite_forces() {
        let embd = embd_from_tuples(&[(5.0, 5.0), (5.0, 5.0), (5.0, 5.0)]);
        let tree = SpaceTree::<f64, 2>::new(&embd);

        for i in 0..3 {
            let mut f = [0.0; 2];
            let sum_q = tree.compute_non_edge_forces(i, 0.5, &mut f);
            assert!(f.iter().all(|v| v.is_finite()));
            // the two other points at distance 0 give q = 1 each
            assert_relative_eq!(sum_q, 2.0);
        }
    }

    #[test]
    fn test_force_symmetry_two_points() {
        let embd = embd_from_tuples(&[(0.0, 0.0), (2.0, 0.0)]);
        let tree = SpaceTree::<f64, 2>::new(&embd);

        let mut f0 = [0.0; 2];
        let mut f1 = [0.0; 2];
        tree.compute_non_edge_forces(0, 0.5, &mut f0);
        tree.compute_non_edge_forces(1, 0.5, &mut f1);

        assert_relative_eq!(f0[0], -f1[0], epsilon = 1e-12);
        assert!(f0[0] < 0.0, "Point 0 should be pushed left");
        assert!(f1[0] > 0.0, "Point 1 should be pushed right");
        assert_relative_eq!(f0[1], 0.0);
        // q = 1 / (1 + 4)
        assert_relative_eq!(f1[0], 2.0 / 25.0, epsilon = 1e-12);
    }

    #[test]
    fn test_theta_zero_is_exact() {
        let mut pts = Vec::new();
        for i in 0..7 {
            for j in 0..6 {
                pts.push((i as f64 * 1.3 + 0.1 * j as f64, j as f64 * 0.7 - 0.05 * i as f64));
            }
        }
        let embd = embd_from_tuples(&pts);
        let tree = SpaceTree::<f64, 2>::new(&embd);

        for i in 0..pts.len() {
            let mut f = [0.0; 2];
            let sum_q = tree.compute_non_edge_forces(i, 0.0, &mut f);
            let (fx, fy, sq) = brute_force_repulsion(&embd, i);
            assert_relative_eq!(f[0], fx, epsilon = 1e-12);
            assert_relative_eq!(f[1], fy, epsilon = 1e-12);
            assert_relative_eq!(sum_q, sq, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_barnes_hut_approximation_reasonable() {
        let mut pts = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                pts.push((i as f64 * 2.0, j as f64 * 2.0));
            }
        }
        let embd = embd_from_tuples(&pts);
        let tree = SpaceTree::<f64, 2>::new(&embd);

        let test_idx = 23;
        let mut exact = [0.0; 2];
        let mut approx = [0.0; 2];
        let sq_exact = tree.compute_non_edge_forces(test_idx, 0.0, &mut exact);
        let sq_approx = tree.compute_non_edge_forces(test_idx, 0.5, &mut approx);

        assert_relative_eq!(sq_approx, sq_exact, max_relative = 0.1);
        for d in 0..2 {
            if exact[d].abs() > 1e-6 {
                assert!(
                    ((approx[d] - exact[d]) / exact[d]).abs() < 0.5,
                    "axis {} error too large: exact {} approx {}",
                    d,
                    exact[d],
                    approx[d]
                );
            }
        }
    }

    #[test]
    fn test_all_non_edge_forces_matches_single() {
        let embd = embd_from_tuples(&[(0.0, 0.0), (1.0, 0.5), (-2.0, 1.0), (0.3, -1.5)]);
        let tree = SpaceTree::<f64, 2>::new(&embd);

        let mut neg_f = vec![0.0; 8];
        let z = tree.compute_all_non_edge_forces(0.5, &mut neg_f);

        let mut z_manual = 0.0;
        for i in 0..4 {
            let mut f = [0.0; 2];
            z_manual += tree.compute_non_edge_forces(i, 0.5, &mut f);
            assert_relative_eq!(neg_f[2 * i], f[0]);
            assert_relative_eq!(neg_f[2 * i + 1], f[1]);
        }
        assert_relative_eq!(z, z_manual, epsilon = 1e-12);
    }

    #[test]
    fn test_no_nan_or_inf_forces() {
        let configs: Vec<Vec<(f64, f64)>> = vec![
            vec![(0.0, 0.0), (0.0, 0.0), (0.0, 0.0)],
            vec![(0.0, 0.0), (1e-10, 0.0)],
            vec![(0.0, 0.0), (1e-8, 1e-8), (100.0, 100.0)],
            vec![(1e6, 1e6), (1e6 + 1.0, 1e6)],
        ];

        for (cfg_idx, pts) in configs.iter().enumerate() {
            let embd = embd_from_tuples(pts);
            let tree = SpaceTree::<f64, 2>::new(&embd);
            assert!(tree.is_correct(), "config {} tree incorrect", cfg_idx);

            for i in 0..pts.len() {
                let mut f = [0.0; 2];
                let sum_q = tree.compute_non_edge_forces(i, 0.5, &mut f);
                assert!(
                    f[0].is_finite() && f[1].is_finite(),
                    "Config {}, point {}: non-finite force",
                    cfg_idx,
                    i
                );
                assert!(sum_q.is_finite() && sum_q >= 0.0);
            }
        }
    }

    #[test]
    fn test_no_nan_or_inf_forces_f32_large_coordinates() {
        let mut rng = StdRng::seed_from_u64(123);
        let known: Vec<f32> = vec![
            -289.91345, 136.75424, -184.83624, -102.00784, 112.13293, 283.716, -265.13507,
            -159.98204, 179.69104, -276.95883,
        ];

        let mut configs = vec![known];
        for scale in [300.0_f32, 1000.0, 5000.0] {
            for _ in 0..200 {
                configs.push((0..10).map(|_| rng.random_range(-scale..scale)).collect());
            }
        }

        for (cfg_idx, embd) in configs.iter().enumerate() {
            let n = embd.len() / 2;
            let tree = SpaceTree::<f32, 2>::new(embd);
            assert_eq!(tree.nodes[0].cum_size, n, "config {} lost points", cfg_idx);

            let mut indices = tree.all_indices();
            indices.sort_unstable();
            assert_eq!(indices, (0..n).collect::<Vec<_>>());

            for i in 0..n {
                let mut f = [0.0_f32; 2];
                let sum_q = tree.compute_non_edge_forces(i, 0.5, &mut f);
                assert!(
                    f[0].is_finite() && f[1].is_finite(),
                    "Config {}, point {}: non-finite force",
                    cfg_idx,
                    i
                );
                assert!(sum_q.is_finite() && sum_q >= 0.0);
            }
        }
    }

    #[test]
    fn test_edge_forces() {
        let embd = embd_from_tuples(&[(0.0, 0.0), (1.0, 0.0), (0.0, 2.0)]);
        let graph = CsrGraph::from_rows(vec![
            vec![(1, 0.25), (2, 0.25)],
            vec![(0, 0.25)],
            vec![(0, 0.25)],
        ]);
        let tree = SpaceTree::<f64, 2>::new(&embd);

        let mut pos_f = vec![0.0; 6];
        tree.compute_edge_forces(&graph, &mut pos_f);

        // point 0: 0.25 * 0.5 * (-1, 0) + 0.25 * 0.2 * (0, -2)
        assert_relative_eq!(pos_f[0], -0.125, epsilon = 1e-12);
        assert_relative_eq!(pos_f[1], -0.1, epsilon = 1e-12);
        assert_relative_eq!(pos_f[2], 0.125, epsilon = 1e-12);
        assert_relative_eq!(pos_f[5], 0.1, epsilon = 1e-12);

        let mut scaled = vec![0.0; 6];
        edge_forces::<f64, 2>(&embd, &graph, 12.0, &mut scaled);
        assert_relative_eq!(scaled[0], -1.5, epsilon = 1e-12);
    }
}
