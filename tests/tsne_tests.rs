#![allow(clippy::needless_range_loop)]

mod commons;
use commons::*;

use approx::assert_relative_eq;
use bhtsne_rs::data::affinities::*;
use bhtsne_rs::data::synthetic::generate_gaussian_blobs;
use bhtsne_rs::prelude::*;
use bhtsne_rs::utils::bh_tree::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Helper: short optimisation schedule
fn optim(max_iter: usize) -> TsneOptimParams<f64> {
    TsneOptimParams {
        max_iter,
        ..TsneOptimParams::default()
    }
}

/// Helper: entropy of a distribution in nats
fn entropy(probs: &[f64]) -> f64 {
    probs
        .iter()
        .filter(|&&p| p > 1e-300)
        .map(|&p| -p * p.ln())
        .sum()
}

/// Test 1: two Gaussian clusters end up separated, the reported cost never
/// increases
#[test]
fn tsne_integration_01_two_clusters_barnes_hut() {
    let (data, labels) = create_two_clusters(25, 10, 10.0, 42);
    let mut y = vec![0.0; 50 * 2];

    let params = TsneParams::new(Some(2), Some(10.0), Some(0.5), Some(42), Some(optim(500)));
    let report = run(&data, 50, 10, &mut y, &params, false).unwrap();

    assert!(y.iter().all(|v| v.is_finite()));

    let (intra, inter) = cluster_distances(&y, &labels, 2);
    assert!(
        inter > 2.0 * intra,
        "clusters not separated: intra {:.3}, inter {:.3}",
        intra,
        inter
    );

    let iters: Vec<usize> = report.checkpoints.iter().map(|c| c.0).collect();
    assert_eq!(iters.first(), Some(&50));
    assert_eq!(iters.last(), Some(&499));
    assert_eq!(iters.len(), 10);

    // the exaggerated objective is reported before iteration 250, the plain
    // KL divergence afterwards; both only ever go down
    for w in report.checkpoints.windows(2) {
        assert!(
            w[1].1 <= w[0].1 * 1.05 + 1e-6,
            "cost increased from {} (iteration {}) to {} (iteration {})",
            w[0].1,
            w[0].0,
            w[1].1,
            w[1].0
        );
    }
    assert!(report.sparsity < 1.0);
}

/// Test 2: exact mode (theta = 0) separates the same clusters
#[test]
fn tsne_integration_02_two_clusters_exact() {
    let (data, labels) = create_two_clusters(20, 5, 10.0, 7);
    let mut y = vec![0.0; 40 * 2];

    let params = TsneParams::new(Some(2), Some(5.0), Some(0.0), Some(7), Some(optim(400)));
    let report = run(&data, 40, 5, &mut y, &params, false).unwrap();

    let (intra, inter) = cluster_distances(&y, &labels, 2);
    assert!(inter > 2.0 * intra, "intra {:.3}, inter {:.3}", intra, inter);
    assert_relative_eq!(report.sparsity, 1.0);
    assert!(report.final_cost().unwrap().is_finite());
}

/// Test 3: too large a perplexity fails before anything is touched
#[test]
fn tsne_integration_03_perplexity_precondition() {
    let (data, _) = create_two_clusters(10, 4, 5.0, 1);
    let mut y = vec![0.0; 20 * 2];

    let params = TsneParams::new(None, Some(10.0), None, None, Some(optim(10)));
    let res = run(&data, 20, 4, &mut y, &params, false);

    assert_ne!(status_code(&res), 0);
    assert!(matches!(
        res,
        Err(TsneError::PerplexityTooLarge { n: 20, .. })
    ));
    assert!(y.iter().all(|v| *v == 0.0));
}

/// Test 4: unsupported output dimensionality maps to status 2
#[test]
fn tsne_integration_04_unsupported_dim() {
    let (data, _) = create_two_clusters(10, 4, 5.0, 1);
    let mut y = vec![0.0; 20];

    let params = TsneParams::new(Some(1), Some(3.0), None, None, Some(optim(10)));
    let res = run(&data, 20, 4, &mut y, &params, false);

    assert_eq!(status_code(&res), 2);
}

/// Test 5: a fixed seed reproduces the embedding bit for bit
#[test]
fn tsne_integration_05_reproducible() {
    let (data, _) = create_two_clusters(15, 6, 8.0, 3);
    let params = TsneParams::new(Some(2), Some(5.0), Some(0.5), Some(123), Some(optim(150)));

    let mut y1 = vec![0.0; 60];
    let mut y2 = vec![0.0; 60];
    let r1 = run(&data, 30, 6, &mut y1, &params, false).unwrap();
    let r2 = run(&data, 30, 6, &mut y2, &params, false).unwrap();

    assert_eq!(y1, y2);
    assert_eq!(r1.checkpoints, r2.checkpoints);

    let other = TsneParams {
        seed: 124,
        ..params.clone()
    };
    let mut y3 = vec![0.0; 60];
    run(&data, 30, 6, &mut y3, &other, false).unwrap();
    assert_ne!(y1, y3);
}

/// Test 6: seed 0 is the fixed default seed, not a fresh random one
#[test]
fn tsne_integration_06_default_seed() {
    let (data, _) = create_two_clusters(15, 6, 8.0, 3);
    let zero = TsneParams::new(Some(2), Some(5.0), Some(0.5), Some(0), Some(optim(60)));
    let fixed = TsneParams {
        seed: 0xDEADBEEF,
        ..zero.clone()
    };

    let mut y0 = vec![0.0; 60];
    let mut y1 = vec![0.0; 60];
    run(&data, 30, 6, &mut y0, &zero, false).unwrap();
    run(&data, 30, 6, &mut y1, &fixed, false).unwrap();

    assert_eq!(y0, y1);
}

/// Test 7: 3D embedding through the octree
#[test]
fn tsne_integration_07_three_dimensions() {
    let (data, labels) = create_two_clusters(20, 8, 10.0, 11);
    let mut y = vec![0.0; 40 * 3];

    let params = TsneParams::new(Some(3), Some(5.0), Some(0.5), Some(5), Some(optim(400)));
    let report = run(&data, 40, 8, &mut y, &params, false).unwrap();

    assert_eq!(report.n_dim, 3);
    assert!(y.iter().all(|v| v.is_finite()));
    let (intra, inter) = cluster_distances(&y, &labels, 3);
    assert!(inter > 2.0 * intra, "intra {:.3}, inter {:.3}", intra, inter);

    for k in 0..3 {
        let mean = (0..40).map(|i| y[i * 3 + k]).sum::<f64>() / 40.0;
        assert!(mean.abs() < 1e-8);
    }
}

/// Test 8: matrix entry point returns one vector per output dimension
#[test]
fn tsne_integration_08_matrix_entry() {
    let (data, _) = create_two_clusters(15, 4, 8.0, 9);
    let mat = to_mat(&data, 30, 4);

    let params = TsneParams::new(Some(2), Some(5.0), None, Some(1), Some(optim(100)));
    let embd = tsne(mat.as_ref(), &params, false).unwrap();

    assert_eq!(embd.len(), 2);
    assert_eq!(embd[0].len(), 30);
    assert_eq!(embd[1].len(), 30);

    let mut y = vec![0.0; 60];
    run(&data, 30, 4, &mut y, &params, false).unwrap();
    for i in 0..30 {
        assert_eq!(embd[0][i], y[2 * i]);
        assert_eq!(embd[1][i], y[2 * i + 1]);
    }
}

/// Test 9: sparse affinities are calibrated, symmetric and normalised
#[test]
fn tsne_integration_09_sparse_affinities() {
    let (data, _) = create_two_clusters(30, 5, 6.0, 21);
    let n = 60;
    let perplexity = 8.0;
    let params = AffinityParams::default();

    let knn = ExactNeighbours::euclidean(&data, n, 5);
    let directed = gaussian_perplexity_sparse(perplexity, 24, &knn, &params);
    for i in 0..n {
        let row: Vec<f64> = directed.row(i).map(|(_, p)| p).collect();
        assert_eq!(row.len(), 24);
        assert_relative_eq!(row.iter().sum::<f64>(), 1.0, epsilon = 1e-10);
        assert!((entropy(&row) - perplexity.ln()).abs() < 1e-4);
    }

    let graph = knn_affinities(perplexity, 24, &knn, &params).unwrap();
    assert_relative_eq!(graph.total(), 1.0, epsilon = 1e-10);
    for (i, j, w) in graph.to_edge_list() {
        assert_ne!(i, j);
        assert!(w >= 0.0);
        assert_relative_eq!(graph.get(j, i).unwrap(), w);
    }

    let via_dispatch = compute_affinities(&data, n, 5, perplexity, 0.5, &params).unwrap();
    match via_dispatch {
        Affinities::Sparse(g) => {
            assert_eq!(g.indices, graph.indices);
            assert_eq!(g.values, graph.values);
        }
        Affinities::Dense(_) => panic!("theta > 0 must give sparse affinities"),
    }
}

/// Test 10: dense affinities are symmetric with an empty diagonal
#[test]
fn tsne_integration_10_dense_affinities() {
    let (data, _) = create_two_clusters(12, 3, 4.0, 5);
    let n = 24;

    let p = exact_affinities(&data, n, 3, 5.0, &AffinityParams::default()).unwrap();

    assert_relative_eq!(p.total(), 1.0, epsilon = 1e-10);
    for i in 0..n {
        assert!(p.get(i, i) < 1e-300);
        for j in 0..n {
            assert!(p.get(i, j) >= 0.0);
            assert_eq!(p.get(i, j), p.get(j, i));
        }
    }
}

/// Test 11: the tree is correct on random point clouds and exact at
/// theta = 0
#[test]
fn tsne_integration_11_tree_random_clouds() {
    let mut rng = StdRng::seed_from_u64(99);

    for &n in &[1usize, 2, 17, 200] {
        let embd: Vec<f64> = (0..2 * n).map(|_| rng.random_range(-5.0..5.0)).collect();
        let tree = SpaceTree::<f64, 2>::new(&embd);

        assert!(tree.is_correct());
        assert_eq!(tree.root().cum_size, n);
        let mut idx = tree.all_indices();
        idx.sort_unstable();
        assert_eq!(idx, (0..n).collect::<Vec<_>>());

        let mut neg_tree = vec![0.0; 2 * n];
        let z_tree = tree.compute_all_non_edge_forces(0.0, &mut neg_tree);

        let mut z_brute = 0.0;
        for i in 0..n {
            let (mut fx, mut fy) = (0.0, 0.0);
            for j in 0..n {
                if i == j {
                    continue;
                }
                let dx = embd[2 * i] - embd[2 * j];
                let dy = embd[2 * i + 1] - embd[2 * j + 1];
                let q = 1.0 / (1.0 + dx * dx + dy * dy);
                z_brute += q;
                fx += q * q * dx;
                fy += q * q * dy;
            }
            assert_relative_eq!(neg_tree[2 * i], fx, epsilon = 1e-10);
            assert_relative_eq!(neg_tree[2 * i + 1], fy, epsilon = 1e-10);
        }
        assert_relative_eq!(z_tree, z_brute, max_relative = 1e-10);
    }

    let cloud: Vec<f64> = (0..3 * 150).map(|_| rng.random_range(-1.0..1.0)).collect();
    let octree = SpaceTree::<f64, 3>::new(&cloud);
    assert!(octree.is_correct());
    assert_eq!(octree.all_indices().len(), 150);
}

/// Test 12: a custom neighbour provider plugs into the sparse builder
#[test]
fn tsne_integration_12_custom_neighbours() {
    struct RingNeighbours {
        n: usize,
    }

    impl NearestNeighbours<f64> for RingNeighbours {
        fn n_points(&self) -> usize {
            self.n
        }

        fn query(&self, query: usize, k: usize) -> Vec<(usize, f64)> {
            let mut res = vec![(query, 0.0)];
            for step in 1..=k {
                let j = (query + step) % self.n;
                res.push((j, step as f64));
            }
            res
        }
    }

    let knn = RingNeighbours { n: 40 };
    let graph = knn_affinities(4.0, 12, &knn, &AffinityParams::default()).unwrap();

    assert_eq!(graph.n_vertices, 40);
    // every forward edge gets a halved reverse twin
    assert_eq!(graph.n_entries(), 2 * 40 * 12);
    assert_relative_eq!(graph.total(), 1.0, epsilon = 1e-10);
}

/// Test 13: several blobs through the matrix entry point
#[test]
fn tsne_integration_13_gaussian_blobs() {
    let (data, labels) = generate_gaussian_blobs(60, 6, 3, 0.5, 10.0, 17);

    let params = TsneParams::new(Some(2), Some(5.0), Some(0.5), Some(17), Some(optim(400)));
    let embd = tsne(data.as_ref(), &params, false).unwrap();

    let flat: Vec<f64> = (0..60).flat_map(|i| [embd[0][i], embd[1][i]]).collect();
    let (intra, inter) = cluster_distances(&flat, &labels, 2);
    assert!(inter > 2.0 * intra, "intra {:.3}, inter {:.3}", intra, inter);
}
