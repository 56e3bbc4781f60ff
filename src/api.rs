//! Record-level entry points
//!
//! Each function validates and profiles its records first, so every
//! precondition and data error surfaces before any selection or clustering
//! work starts.

use crate::cluster::{cluster_profiles, cluster_profiles_parallel};
use crate::config::{MashConfig, MaxConfig};
use crate::error::{DivseqError, Result};
use crate::matrix::{DivergenceMatrix, Metric};
use crate::mash;
use crate::profile::profile_records;
use crate::record::{MoleculeType, Record};
use crate::select::{max_divergent, n_most, Selection};
use crate::stats::Stat;
use crate::tree::ClusterTree;
use tracing::info;

fn chosen(records: &[Record], selection: &Selection) -> Vec<Record> {
    selection
        .indices
        .iter()
        .map(|&i| records[i].clone())
        .collect()
}

/// The `n` records contributing most to the collection's divergence, most
/// divergent first
pub fn select_n_most(
    records: &[Record],
    n: usize,
    k: usize,
    moltype: MoleculeType,
    stat: Stat,
    seed: Option<u64>,
) -> Result<Vec<Record>> {
    if n == 0 {
        return Err(DivseqError::InvalidN { n });
    }
    let profiles = profile_records(records, k, moltype)?;
    let selection = n_most(&profiles, n, stat, seed)?;
    Ok(chosen(records, &selection))
}

/// Greedy maximally divergent subset of between `min_size` and `max_size`
/// records, in input order
pub fn select_max(
    records: &[Record],
    min_size: usize,
    max_size: usize,
    k: usize,
    moltype: MoleculeType,
    stat: Stat,
    seed: Option<u64>,
) -> Result<Vec<Record>> {
    let config = MaxConfig::new(min_size, max_size)?;
    select_max_with(records, &config, k, moltype, stat, seed)
}

/// [`select_max`] with every search parameter exposed
pub fn select_max_with(
    records: &[Record],
    config: &MaxConfig,
    k: usize,
    moltype: MoleculeType,
    stat: Stat,
    seed: Option<u64>,
) -> Result<Vec<Record>> {
    config.validate()?;
    if records.len() < config.min_size && !records.is_empty() {
        return Err(DivseqError::InsufficientRecords {
            available: records.len(),
            min_size: config.min_size,
        });
    }
    let profiles = profile_records(records, k, moltype)?;
    let selection = max_divergent(&profiles, config, stat, seed)?;
    Ok(chosen(records, &selection))
}

pub fn build_cluster_tree(
    records: &[Record],
    k: usize,
    moltype: MoleculeType,
    stat: Stat,
) -> Result<ClusterTree> {
    let profiles = profile_records(records, k, moltype)?;
    cluster_profiles(&profiles, stat)
}

/// Approximate tree built from `num_workers` independently clustered
/// partitions; see [`cluster_profiles_parallel`]
pub fn build_cluster_tree_parallel(
    records: &[Record],
    k: usize,
    moltype: MoleculeType,
    stat: Stat,
    num_workers: usize,
    seed: Option<u64>,
) -> Result<ClusterTree> {
    if num_workers == 0 {
        return Err(DivseqError::InvalidWorkers {
            workers: num_workers,
        });
    }
    let profiles = profile_records(records, k, moltype)?;
    cluster_profiles_parallel(&profiles, stat, num_workers, seed)
}

/// Pairwise matrix of `records` under a frequency-vector metric
pub fn distance_matrix(
    records: &[Record],
    k: usize,
    moltype: MoleculeType,
    metric: Metric,
) -> Result<DivergenceMatrix> {
    let profiles = profile_records(records, k, moltype)?;
    info!("Computing {} matrix for {} records", metric, profiles.len());
    Ok(DivergenceMatrix::build(&profiles, metric))
}

/// Pairwise mash distances of `records`
pub fn mash_matrix(
    records: &[Record],
    k: usize,
    moltype: MoleculeType,
    config: &MashConfig,
) -> Result<DivergenceMatrix> {
    mash::mash_matrix(records, k, moltype, config)
}
