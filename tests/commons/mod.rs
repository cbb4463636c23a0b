#![allow(dead_code)]

use faer::Mat;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Create two well-separated Gaussian clusters
///
/// The first `n_per_cluster` rows sit around the origin, the rest around
/// `(offset, offset, ...)`.
pub fn create_two_clusters(
    n_per_cluster: usize,
    n_dim: usize,
    offset: f64,
    seed: u64,
) -> (Vec<f64>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();

    let mut data = Vec::with_capacity(2 * n_per_cluster * n_dim);
    let mut labels = Vec::with_capacity(2 * n_per_cluster);
    for cluster_id in 0..2 {
        let centre = cluster_id as f64 * offset;
        for _ in 0..n_per_cluster {
            for _ in 0..n_dim {
                data.push(centre + noise.sample(&mut rng));
            }
            labels.push(cluster_id);
        }
    }

    (data, labels)
}

/// Row-major buffer to a `faer` matrix
pub fn to_mat(data: &[f64], n: usize, n_dim: usize) -> Mat<f64> {
    Mat::from_fn(n, n_dim, |i, j| data[i * n_dim + j])
}

/// Mean intra- and inter-cluster distances of a row-major embedding
pub fn cluster_distances(embd: &[f64], labels: &[usize], d: usize) -> (f64, f64) {
    let n = labels.len();
    let (mut intra, mut n_intra, mut inter, mut n_inter) = (0.0, 0, 0.0, 0);
    for i in 0..n {
        for j in (i + 1)..n {
            let dist = (0..d)
                .map(|k| (embd[i * d + k] - embd[j * d + k]).powi(2))
                .sum::<f64>()
                .sqrt();
            if labels[i] == labels[j] {
                intra += dist;
                n_intra += 1;
            } else {
                inter += dist;
                n_inter += 1;
            }
        }
    }
    (intra / n_intra as f64, inter / n_inter as f64)
}
