//! # divseq
//!
//! `divseq` selects diverse, representative subsets of biological sequences
//! and builds approximate guide trees from unaligned sequences. Every record
//! is reduced to its k-mer frequency vector; divergence between records is
//! measured with either the Jensen-Shannon divergence or the summed standard
//! deviation of k-mer frequencies.
//!
//! The entry points in [`api`] take [`Record`]s and do their own validation:
//!
//! - [`select_n_most`] ranks records by how much each adds to the divergence
//!   of the whole collection;
//! - [`select_max`] grows a maximally divergent subset within size bounds;
//! - [`build_cluster_tree`] and [`build_cluster_tree_parallel`] build
//!   average-linkage trees, the latter from independently clustered
//!   partitions;
//! - [`distance_matrix`] and [`mash_matrix`] compute pairwise distances.

pub mod api;
pub mod cluster;
pub mod config;
pub mod error;
pub mod kmer;
pub mod mash;
pub mod matrix;
pub mod profile;
pub mod record;
pub mod select;
pub mod stats;
pub mod tree;
pub mod working_set;

pub use api::{
    build_cluster_tree, build_cluster_tree_parallel, distance_matrix, mash_matrix, select_max,
    select_max_with, select_n_most,
};
pub use config::{MashConfig, MaxConfig, MaxObjective};
pub use error::{DivseqError, ErrorKind, Result};
pub use matrix::{DivergenceMatrix, Metric};
pub use record::{MoleculeType, Record};
pub use stats::Stat;
pub use tree::{ClusterTree, TreeNode};
