//! Bottom-sketch mash distance (Ondov et al., 2016)
//!
//! A sketch keeps the `sketch_size` smallest distinct hashes of a record's
//! k-mers. Unlike the frequency profiles, sketches never allocate a dense
//! vector, so `k` is only limited by the 64-bit k-mer index.

use crate::config::MashConfig;
use crate::error::{DivseqError, Result};
use crate::kmer::KmerCounter;
use crate::matrix::DivergenceMatrix;
use crate::profile::validate_records;
use crate::record::{MoleculeType, Record};
use fxhash::FxHashSet;
use rayon::prelude::*;
use tracing::info;

/// Sorted, distinct k-mer hashes of one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MashSketch {
    pub id: String,
    pub hashes: Vec<u64>,
}

impl MashSketch {
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// Bottom sketch of `record`
pub fn sketch(record: &Record, counter: &KmerCounter, config: &MashConfig) -> MashSketch {
    let distinct: FxHashSet<u64> = counter
        .indices(record.seq())
        .map(|index| {
            let index = if config.canonical {
                index.min(counter.reverse_complement(index))
            } else {
                index
            };
            fxhash::hash64(&index)
        })
        .collect();

    let mut hashes: Vec<u64> = distinct.into_iter().collect();
    hashes.sort_unstable();
    hashes.truncate(config.sketch_size);

    MashSketch {
        id: record.id().to_string(),
        hashes,
    }
}

/// Mash distance between two sketches built with the same `k` and
/// `sketch_size`, in `[0, 1]`
pub fn mash_distance(left: &MashSketch, right: &MashSketch, k: usize, sketch_size: usize) -> f64 {
    let (mut l, mut r) = (0, 0);
    let mut shared = 0usize;
    let mut union = 0usize;

    while union < sketch_size && l < left.len() && r < right.len() {
        match left.hashes[l].cmp(&right.hashes[r]) {
            std::cmp::Ordering::Less => l += 1,
            std::cmp::Ordering::Greater => r += 1,
            std::cmp::Ordering::Equal => {
                l += 1;
                r += 1;
                shared += 1;
            }
        }
        union += 1;
    }
    if union < sketch_size {
        union += (left.len() - l) + (right.len() - r);
        union = union.min(sketch_size);
    }

    if shared == union {
        return 0.0;
    }
    if shared == 0 {
        return 1.0;
    }
    let jaccard = shared as f64 / union as f64;
    let distance = -(2.0 * jaccard / (1.0 + jaccard)).ln() / k as f64;
    distance.min(1.0)
}

/// Pairwise mash distances of `records`
pub fn mash_matrix(
    records: &[Record],
    k: usize,
    moltype: MoleculeType,
    config: &MashConfig,
) -> Result<DivergenceMatrix> {
    config.validate(moltype)?;
    let counter = KmerCounter::new(k, moltype)?;
    validate_records(records, k, moltype)?;

    info!(
        "Sketching {} records (k={}, sketch_size={}, canonical={})",
        records.len(),
        k,
        config.sketch_size,
        config.canonical
    );
    let sketches: Vec<MashSketch> = records
        .par_iter()
        .map(|record| sketch(record, &counter, config))
        .collect();

    if let Some(empty) = sketches.iter().find(|s| s.is_empty()) {
        return Err(DivseqError::NoValidKmers {
            id: empty.id.clone(),
            k,
        });
    }

    let ids = sketches.iter().map(|s| s.id.clone()).collect();
    Ok(DivergenceMatrix::from_fn(ids, |i, j| {
        mash_distance(&sketches[i], &sketches[j], k, config.sketch_size)
    }))
}
