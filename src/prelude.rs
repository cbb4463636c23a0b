pub use crate::data::affinities::{compute_affinities, AffinityParams};
pub use crate::data::init::{gaussian_layout, resolve_seed};
pub use crate::data::nearest_neighbours::{ExactNeighbours, NearestNeighbours};
pub use crate::data::structures::{Affinities, CsrGraph, DenseAffinities};
pub use crate::error::TsneError;
pub use crate::training::forces::{BarnesHutForces, ExactForces};
pub use crate::training::tsne_optimiser::{optimise_tsne, TsneOptimParams};
pub use crate::training::ForceProvider;
pub use crate::{run, status_code, tsne, TsneParams, TsneReport};
