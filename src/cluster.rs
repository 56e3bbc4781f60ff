//! Average-linkage agglomerative clustering of k-mer profiles
//!
//! [`cluster_profiles`] builds the exact average-linkage (UPGMA) tree from
//! the full pairwise matrix with `kodama`. [`cluster_profiles_parallel`] trades accuracy
//! for throughput: records are split into blocks that are clustered
//! independently, and the block trees are then joined using only the
//! divergences between block representatives (mean frequency vectors). The
//! partitioned tree is reproducible for a fixed input order, worker count
//! and seed, but it is an approximation of the sequential one.

use crate::error::{DivseqError, Result};
use crate::matrix::{DivergenceMatrix, Metric};
use crate::profile::KmerProfile;
use crate::stats::Stat;
use crate::tree::{ClusterTree, TreeNode};
use crate::working_set::Aggregate;
use kodama::{linkage, Method};
use ndarray::Array2;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, info};

/// Joins weighted `nodes` into a single tree by average linkage.
///
/// Used to join partition trees, where every node stands for a whole block.
/// `sizes[i]` is the number of leaves under `nodes[i]` and `dist` the
/// symmetric divergence between them. The pair with the smallest divergence
/// is merged first; among equal divergences the pair found first in
/// row-major order wins. The merged cluster takes the lower slot, so a
/// cluster is always addressed by its lowest member position. Merge heights
/// never drop below the heights of the merged children.
pub fn average_linkage(
    nodes: Vec<TreeNode>,
    sizes: Vec<usize>,
    mut dist: Array2<f64>,
) -> Result<TreeNode> {
    let n = nodes.len();
    if n == 0 {
        return Err(DivseqError::EmptyRecords);
    }
    if sizes.len() != n {
        return Err(DivseqError::DimensionMismatch {
            left: n,
            right: sizes.len(),
        });
    }
    if dist.nrows() != n || dist.ncols() != n {
        return Err(DivseqError::DimensionMismatch {
            left: n,
            right: dist.nrows().max(dist.ncols()),
        });
    }

    let mut slots: Vec<Option<TreeNode>> = nodes.into_iter().map(Some).collect();
    let mut sizes = sizes;
    let mut active: Vec<usize> = (0..n).collect();

    while active.len() > 1 {
        let (i, j, d) = closest_pair(&dist, &active);

        let (Some(left), Some(right)) = (slots[i].take(), slots[j].take()) else {
            unreachable!("active slots always hold a node");
        };
        let height = d.max(left.height()).max(right.height());
        slots[i] = Some(TreeNode::internal(left, right, height));

        // Lance-Williams update for average linkage
        let (ni, nj) = (sizes[i] as f64, sizes[j] as f64);
        for &k in active.iter().filter(|&&k| k != i && k != j) {
            let updated = (ni * dist[[i, k]] + nj * dist[[j, k]]) / (ni + nj);
            dist[[i, k]] = updated;
            dist[[k, i]] = updated;
        }
        sizes[i] += sizes[j];
        active.retain(|&k| k != j);
    }

    slots
        .into_iter()
        .flatten()
        .next()
        .ok_or(DivseqError::EmptyRecords)
}

// (row, column, divergence) of the first minimum in row-major order
fn closest_pair(dist: &Array2<f64>, active: &[usize]) -> (usize, usize, f64) {
    active
        .par_iter()
        .enumerate()
        .filter_map(|(pos, &i)| {
            let mut best: Option<(usize, f64)> = None;
            for &j in &active[pos + 1..] {
                let d = dist[[i, j]];
                if best.map_or(true, |(_, current)| d < current) {
                    best = Some((j, d));
                }
            }
            best.map(|(j, d)| (i, j, d))
        })
        .reduce_with(|a, b| {
            if b.2 < a.2 || (b.2 == a.2 && b.0 < a.0) {
                b
            } else {
                a
            }
        })
        .unwrap_or((0, 0, f64::INFINITY))
}

/// Average-linkage tree over `leaves` from their condensed (upper-triangle,
/// row-major) divergences.
///
/// Merge heights are the `kodama` dissimilarities, raised where needed so a
/// parent never sits below its children.
pub fn linkage_tree(leaves: Vec<TreeNode>, mut condensed: Vec<f64>) -> Result<TreeNode> {
    let n = leaves.len();
    if n == 0 {
        return Err(DivseqError::EmptyRecords);
    }
    let expected = n * (n - 1) / 2;
    if condensed.len() != expected {
        return Err(DivseqError::DimensionMismatch {
            left: expected,
            right: condensed.len(),
        });
    }
    if n == 1 {
        return leaves.into_iter().next().ok_or(DivseqError::EmptyRecords);
    }

    let dendrogram = linkage(&mut condensed, n, Method::Average);

    // Cluster label `n + s` is the node created by step `s`
    let mut clusters: Vec<Option<TreeNode>> = leaves.into_iter().map(Some).collect();
    clusters.reserve(n - 1);
    for (step, merge) in dendrogram.steps().iter().enumerate() {
        let left = clusters.get_mut(merge.cluster1).and_then(Option::take);
        let right = clusters.get_mut(merge.cluster2).and_then(Option::take);
        let (Some(left), Some(right)) = (left, right) else {
            return Err(DivseqError::LinkageStep { step });
        };
        let height = merge.dissimilarity.max(left.height()).max(right.height());
        clusters.push(Some(TreeNode::internal(left, right, height)));
    }

    clusters
        .pop()
        .flatten()
        .ok_or(DivseqError::LinkageStep { step: n - 2 })
}

/// Exact average-linkage tree over the pairwise `stat` divergences
pub fn cluster_profiles(profiles: &[KmerProfile], stat: Stat) -> Result<ClusterTree> {
    if profiles.is_empty() {
        return Err(DivseqError::EmptyRecords);
    }
    info!("Clustering {} records by average linkage", profiles.len());

    let matrix = DivergenceMatrix::build(profiles, Metric::Divergence(stat));
    let leaves = profiles
        .iter()
        .map(|p| TreeNode::leaf(p.id.clone(), p.index))
        .collect();
    let root = linkage_tree(leaves, matrix.condensed().to_vec())?;

    debug!("Tree height {:.6}", root.height());
    Ok(ClusterTree::new(root))
}

/// Sub-tree of one block together with the block's mean profile
struct Partition {
    tree: TreeNode,
    representative: KmerProfile,
    size: usize,
}

fn cluster_partition(
    partition: usize,
    block: &[usize],
    profiles: &[KmerProfile],
    stat: Stat,
) -> Result<Partition> {
    let metric = Metric::Divergence(stat);
    let ids = block.iter().map(|&i| profiles[i].id.clone()).collect();
    let matrix = DivergenceMatrix::from_fn(ids, |a, b| {
        metric.distance(&profiles[block[a]], &profiles[block[b]])
    });

    let leaves = block
        .iter()
        .map(|&i| TreeNode::leaf(profiles[i].id.clone(), profiles[i].index))
        .collect();
    let tree = linkage_tree(leaves, matrix.condensed().to_vec())?;

    let mean = Aggregate::from_profiles(block.iter().map(|&i| &profiles[i]))?.mean();
    let representative =
        KmerProfile::from_frequencies(partition, format!("partition_{}", partition), mean);

    debug!(
        "Partition {} clustered {} records, height {:.6}",
        partition,
        block.len(),
        tree.height()
    );
    Ok(Partition {
        tree,
        representative,
        size: block.len(),
    })
}

/// Cut `order` into `parts` contiguous blocks whose sizes differ by at most one
fn balanced_blocks(order: &[usize], parts: usize) -> Vec<&[usize]> {
    let base = order.len() / parts;
    let extra = order.len() % parts;
    let mut blocks = Vec::with_capacity(parts);
    let mut start = 0;
    for b in 0..parts {
        let len = base + usize::from(b < extra);
        blocks.push(&order[start..start + len]);
        start += len;
    }
    blocks
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// All partition results, or one error naming the lowest failed partition
fn collect_outcomes<T>(outcomes: Vec<std::thread::Result<Result<T>>>) -> Result<Vec<T>> {
    let mut results = Vec::with_capacity(outcomes.len());
    let mut first_failure: Option<(usize, String)> = None;
    let mut failed = 0;

    for (partition, outcome) in outcomes.into_iter().enumerate() {
        let reason = match outcome {
            Ok(Ok(result)) => {
                results.push(result);
                continue;
            }
            Ok(Err(err)) => err.to_string(),
            Err(payload) => panic_reason(payload),
        };
        failed += 1;
        first_failure.get_or_insert((partition, reason));
    }

    match first_failure {
        Some((partition, reason)) => Err(DivseqError::PartitionFailed {
            partition,
            failed,
            reason,
        }),
        None => Ok(results),
    }
}

/// Runs `task` for every block on `pool`.
///
/// A panic inside `task` is caught per block, so the remaining blocks still
/// finish before the failures are reported together.
fn run_partitions<T, F>(pool: &rayon::ThreadPool, blocks: &[&[usize]], task: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize, &[usize]) -> Result<T> + Sync,
{
    let outcomes: Vec<std::thread::Result<Result<T>>> = pool.install(|| {
        blocks
            .par_iter()
            .enumerate()
            .map(|(partition, block)| catch_unwind(AssertUnwindSafe(|| task(partition, *block))))
            .collect()
    });
    collect_outcomes(outcomes)
}

fn build_pool(threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| DivseqError::ThreadPool {
            reason: e.to_string(),
        })
}

/// Partitioned average-linkage tree built with up to `num_workers` threads.
///
/// The record order (input order, or a permutation drawn from `seed`) is
/// cut into `min(num_workers, N)` balanced blocks, one pool thread per
/// block. Each block is clustered exactly; the block trees are joined by
/// average linkage over the divergences of their representatives, weighted
/// by block size. Any worker error or panic fails the whole build.
pub fn cluster_profiles_parallel(
    profiles: &[KmerProfile],
    stat: Stat,
    num_workers: usize,
    seed: Option<u64>,
) -> Result<ClusterTree> {
    if num_workers == 0 {
        return Err(DivseqError::InvalidWorkers {
            workers: num_workers,
        });
    }
    if profiles.is_empty() {
        return Err(DivseqError::EmptyRecords);
    }

    let mut order: Vec<usize> = (0..profiles.len()).collect();
    if let Some(seed) = seed {
        order.shuffle(&mut StdRng::seed_from_u64(seed));
    }
    let parts = num_workers.min(profiles.len());
    let blocks = balanced_blocks(&order, parts);
    info!(
        "Clustering {} records in {} partitions ({} workers requested)",
        profiles.len(),
        parts,
        num_workers
    );

    let pool = build_pool(parts)?;
    let partitions = run_partitions(&pool, &blocks, |partition, block| {
        cluster_partition(partition, block, profiles, stat)
    })?;

    if partitions.len() == 1 {
        let root = partitions
            .into_iter()
            .next()
            .map(|p| p.tree)
            .ok_or(DivseqError::EmptyRecords)?;
        return Ok(ClusterTree::new(root));
    }

    let representatives: Vec<KmerProfile> = partitions
        .iter()
        .map(|p| p.representative.clone())
        .collect();
    let matrix = DivergenceMatrix::build(&representatives, Metric::Divergence(stat));
    let sizes = partitions.iter().map(|p| p.size).collect();
    let trees = partitions.into_iter().map(|p| p.tree).collect();
    let root = average_linkage(trees, sizes, matrix.into_values())?;

    debug!("Joined {} partition trees, height {:.6}", parts, root.height());
    Ok(ClusterTree::new(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::profile::profile_records;
    use crate::record::{MoleculeType, Record};
    use rand::Rng;
    use std::collections::BTreeSet;

    const SCENARIO: [&str; 4] = [
        "AACAGATCCGCTGGTTAACG",
        "AAAAAAAAAAAAAAAAAAAT",
        "AAAAAAAAAAAAAAAAAAAC",
        "AAAAAAAAAAAAAAAAAAAG",
    ];

    const MIXED: [&str; 9] = [
        "ACGTTGCAACGGTACCATGA",
        "TTTTGCAAGGCATTTTGCAA",
        "GGGCCCAAATTTGCGGGCCC",
        "ACACACACGTGTGTACACAC",
        "CCCCCCCCAAAAATCCCCCC",
        "ATATATATATATATATGCGC",
        "ACGTTGCAACGGTACCATGT",
        "GATTACAGATTACAGATTAC",
        "TGCATGCATTTGGCCAAGTC",
    ];

    fn profiles(seqs: &[&str]) -> Vec<KmerProfile> {
        let records: Vec<Record> = seqs
            .iter()
            .enumerate()
            .map(|(i, s)| Record::new(format!("r{}", i), *s, MoleculeType::Dna))
            .collect();
        profile_records(&records, 2, MoleculeType::Dna).unwrap()
    }

    fn internal_heights(node: &TreeNode, out: &mut Vec<f64>) {
        if let TreeNode::Internal { left, right, height } = node {
            out.push(*height);
            internal_heights(left, out);
            internal_heights(right, out);
        }
    }

    fn leaf_indices(node: &TreeNode) -> BTreeSet<usize> {
        node.leaves().into_iter().map(|(_, i)| i).collect()
    }

    #[test]
    fn test_tree_is_bijection() {
        let profiles = profiles(&MIXED);
        for stat in [Stat::Jsd, Stat::Stdev] {
            let tree = cluster_profiles(&profiles, stat).unwrap();
            assert_eq!(tree.leaf_count(), MIXED.len());
            assert_eq!(tree.internal_count(), MIXED.len() - 1);
            let ids: BTreeSet<&str> = tree.leaf_ids().into_iter().collect();
            let expected: BTreeSet<&str> = profiles.iter().map(|p| p.id.as_str()).collect();
            assert_eq!(ids, expected);
        }
    }

    #[test]
    fn test_scenario_groups_similar_records() {
        let profiles = profiles(&SCENARIO);
        for stat in [Stat::Jsd, Stat::Stdev] {
            let tree = cluster_profiles(&profiles, stat).unwrap();
            let TreeNode::Internal { left, right, height } = &tree.root else {
                panic!("expected an internal root");
            };
            let (uniform, similar) = if left.is_leaf() { (left, right) } else { (right, left) };
            assert_eq!(leaf_indices(uniform), BTreeSet::from([0]));
            assert_eq!(leaf_indices(similar), BTreeSet::from([1, 2, 3]));
            assert!(similar.height() < *height);
        }
    }

    fn heights_sorted(node: &TreeNode) -> Vec<f64> {
        let mut heights = Vec::new();
        internal_heights(node, &mut heights);
        heights.sort_by(f64::total_cmp);
        heights
    }

    fn assert_heights_non_decreasing(node: &TreeNode) {
        if let TreeNode::Internal { left, right, height } = node {
            assert!(left.height() <= *height && right.height() <= *height);
            assert_heights_non_decreasing(left);
            assert_heights_non_decreasing(right);
        }
    }

    #[test]
    fn test_linkage_tree_matches_weighted_linkage() {
        let profiles = profiles(&MIXED);
        let matrix = DivergenceMatrix::build(&profiles, Metric::Divergence(Stat::Jsd));
        let leaves: Vec<TreeNode> = profiles
            .iter()
            .map(|p| TreeNode::leaf(p.id.clone(), p.index))
            .collect();

        let from_steps = linkage_tree(leaves.clone(), matrix.condensed().to_vec()).unwrap();
        let weighted =
            average_linkage(leaves, vec![1; profiles.len()], matrix.into_values()).unwrap();

        let (a, b) = (heights_sorted(&from_steps), heights_sorted(&weighted));
        assert_eq!(a.len(), MIXED.len() - 1);
        for (h, e) in a.iter().zip(b.iter()) {
            assert!((h - e).abs() < 1e-9, "{} != {}", h, e);
        }
        assert_eq!(
            cluster_profiles(&profiles, Stat::Jsd).unwrap().root,
            from_steps
        );
    }

    #[test]
    fn test_linkage_tree_shapes() {
        let single = linkage_tree(vec![TreeNode::leaf("a", 0)], Vec::new()).unwrap();
        assert_eq!(single, TreeNode::leaf("a", 0));

        let pair = vec![TreeNode::leaf("a", 0), TreeNode::leaf("b", 1)];
        assert!(linkage_tree(pair.clone(), vec![0.5, 0.5]).is_err());
        assert!(linkage_tree(Vec::new(), Vec::new()).is_err());
        let root = linkage_tree(pair, vec![0.5]).unwrap();
        assert_eq!(root.height(), 0.5);
    }

    #[test]
    fn test_many_records() {
        let mut rng = StdRng::seed_from_u64(9);
        let records: Vec<Record> = (0..300)
            .map(|i| {
                let seq: String = (0..40).map(|_| b"ACGT"[rng.gen_range(0..4)] as char).collect();
                Record::new(format!("r{}", i), seq, MoleculeType::Dna)
            })
            .collect();
        let profiles = profile_records(&records, 3, MoleculeType::Dna).unwrap();

        let tree = cluster_profiles(&profiles, Stat::Jsd).unwrap();
        assert_eq!(tree.leaf_count(), 300);
        assert_eq!(tree.internal_count(), 299);
        assert_eq!(leaf_indices(&tree.root), (0..300).collect::<BTreeSet<_>>());
        assert_heights_non_decreasing(&tree.root);
    }

    #[test]
    fn test_ties_merge_lowest_pair() {
        let dist = Array2::from_shape_vec(
            (3, 3),
            vec![0.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0],
        )
        .unwrap();
        let leaves = vec![TreeNode::leaf("a", 0), TreeNode::leaf("b", 1), TreeNode::leaf("c", 2)];
        let root = average_linkage(leaves, vec![1, 1, 1], dist).unwrap();
        let tree = ClusterTree::new(root);
        insta::assert_snapshot!(tree.to_newick(), @"((a:1,b:1):0,c:1);");
    }

    #[test]
    fn test_linkage_rejects_bad_shapes() {
        let leaves = vec![TreeNode::leaf("a", 0), TreeNode::leaf("b", 1)];
        assert!(average_linkage(leaves.clone(), vec![1], Array2::zeros((2, 2))).is_err());
        assert!(average_linkage(leaves, vec![1, 1], Array2::zeros((3, 3))).is_err());
        assert!(average_linkage(Vec::new(), Vec::new(), Array2::zeros((0, 0))).is_err());
    }

    #[test]
    fn test_single_worker_equals_sequential() {
        let profiles = profiles(&MIXED);
        let sequential = cluster_profiles(&profiles, Stat::Jsd).unwrap();
        let parallel = cluster_profiles_parallel(&profiles, Stat::Jsd, 1, None).unwrap();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_parallel_is_deterministic() {
        let profiles = profiles(&MIXED);
        for workers in [2, 3, 4, 20] {
            let a = cluster_profiles_parallel(&profiles, Stat::Stdev, workers, Some(5)).unwrap();
            let b = cluster_profiles_parallel(&profiles, Stat::Stdev, workers, Some(5)).unwrap();
            assert_eq!(a, b);
            assert_eq!(a.leaf_count(), MIXED.len());
            assert_eq!(a.internal_count(), MIXED.len() - 1);
            let indices = leaf_indices(&a.root);
            assert_eq!(indices, (0..MIXED.len()).collect::<BTreeSet<_>>());
        }
    }

    #[test]
    fn test_parallel_zero_workers() {
        let profiles = profiles(&SCENARIO);
        let err = cluster_profiles_parallel(&profiles, Stat::Jsd, 0, None).unwrap_err();
        assert!(matches!(err, DivseqError::InvalidWorkers { workers: 0 }));
    }

    #[test]
    fn test_more_workers_than_records() {
        let profiles = profiles(&SCENARIO);
        let tree = cluster_profiles_parallel(&profiles, Stat::Jsd, 10_000, None).unwrap();
        assert_eq!(tree.leaf_count(), SCENARIO.len());
        assert_eq!(tree.internal_count(), SCENARIO.len() - 1);
    }

    #[test]
    fn test_balanced_blocks() {
        let order: Vec<usize> = (0..7).collect();
        let sizes: Vec<usize> = balanced_blocks(&order, 3).iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![3, 2, 2]);
        assert_eq!(balanced_blocks(&order, 7).len(), 7);
    }

    #[test]
    fn test_failures_are_aggregated() {
        let outcomes: Vec<std::thread::Result<Result<u8>>> = vec![
            Ok(Ok(1)),
            Err(Box::new("boom")),
            Ok(Err(DivseqError::EmptyRecords)),
            Ok(Ok(4)),
        ];
        let err = collect_outcomes(outcomes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Computation);
        insta::assert_snapshot!(err.to_string(), @"partition 1 failed (2 partition(s) failed in total): boom");

        let ok: Vec<std::thread::Result<Result<u8>>> = vec![Ok(Ok(1)), Ok(Ok(2))];
        assert_eq!(collect_outcomes(ok).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_worker_panic_fails_build() {
        let profiles = profiles(&MIXED);
        let order: Vec<usize> = (0..profiles.len()).collect();
        let blocks = balanced_blocks(&order, 3);
        let pool = build_pool(2).unwrap();

        let result = run_partitions(&pool, &blocks, |partition, block| {
            if partition == 1 {
                panic!("block of {} records rejected", block.len());
            }
            cluster_partition(partition, block, &profiles, Stat::Jsd)
        });
        let Err(err) = result else {
            panic!("expected the panicking partition to fail the run");
        };
        assert_eq!(err.kind(), ErrorKind::Computation);
        insta::assert_snapshot!(err.to_string(), @"partition 1 failed (1 partition(s) failed in total): block of 3 records rejected");

        let sizes = run_partitions(&pool, &blocks, |_, block| Ok(block.len())).unwrap();
        assert_eq!(sizes, vec![3, 3, 3]);
    }
}
