//! Exploratory analysis: PCA, sample distances, clustering

mod cluster;
mod distance;
mod pca;

pub use cluster::{average_linkage, Dendrogram, MergeStep};
pub use distance::sample_distances;
pub use pca::{principal_components, PcaResult};
