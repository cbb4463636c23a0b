use faer::Mat;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Generate isotropic Gaussian blobs
///
/// Every cluster gets a random centre in `[-spread, spread]^dim` and the same
/// number of points (the first `n_samples % n_clusters` clusters get one
/// extra). Rows are shuffled so that labels are not sorted.
///
/// ### Params
///
/// * `n_samples` - Number of points
/// * `dim` - Number of features
/// * `n_clusters` - Number of clusters
/// * `cluster_std` - Standard deviation within each cluster
/// * `spread` - Half-width of the box the centres are drawn from
/// * `seed` - Random seed for reproducibility
///
/// ### Returns
///
/// Tuple of the data matrix `(n_samples, dim)` and the cluster label of every
/// row
pub fn generate_gaussian_blobs(
    n_samples: usize,
    dim: usize,
    n_clusters: usize,
    cluster_std: f64,
    spread: f64,
    seed: u64,
) -> (Mat<f64>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let n_clusters = n_clusters.max(1);

    let centres: Vec<Vec<f64>> = (0..n_clusters)
        .map(|_| (0..dim).map(|_| rng.random_range(-spread..spread)).collect())
        .collect();

    let mut labels: Vec<usize> = (0..n_samples).map(|i| i % n_clusters).collect();
    labels.shuffle(&mut rng);

    let mut data = Mat::<f64>::zeros(n_samples, dim);
    for (i, &cluster_idx) in labels.iter().enumerate() {
        let centre = &centres[cluster_idx];
        for j in 0..dim {
            let noise: f64 = rng.sample(StandardNormal);
            data[(i, j)] = centre[j] + noise * cluster_std;
        }
    }

    (data, labels)
}
