//! Per-record k-mer profiles derived from validated records

use crate::error::{DivseqError, Result};
use crate::kmer::{KmerCounter, KmerVector};
use crate::record::{MoleculeType, Record};
use fxhash::FxHashSet;
use rayon::prelude::*;
use tracing::{debug, info};

/// Normalized k-mer spectrum of one record, with the summaries the
/// divergence statistics need
#[derive(Debug, Clone)]
pub struct KmerProfile {
    /// Position of the record in the input collection
    pub index: usize,
    pub id: String,
    pub freqs: KmerVector,
    pub squares: KmerVector,
    /// Shannon entropy of `freqs`, in bits
    pub entropy: f64,
    pub valid_kmers: usize,
}

impl KmerProfile {
    /// Profile from a frequency vector directly
    pub fn from_frequencies(index: usize, id: impl Into<String>, freqs: KmerVector) -> Self {
        let squares = freqs.squared();
        let entropy = freqs.entropy();
        Self {
            index,
            id: id.into(),
            freqs,
            squares,
            entropy,
            valid_kmers: 0,
        }
    }

    fn from_counts(index: usize, id: &str, counts: KmerVector) -> Self {
        let valid_kmers = counts.total() as usize;
        let mut profile = Self::from_frequencies(index, id, counts.normalized());
        profile.valid_kmers = valid_kmers;
        profile
    }
}

/// Validate `records` and count their k-mers.
///
/// Every check runs before any counting: the collection must be non-empty,
/// identifiers unique, each record of `moltype` with only symbols of that
/// alphabet, and at least `k` long. A record whose windows all overlap gaps
/// or ambiguity codes is rejected after counting.
pub fn profile_records(
    records: &[Record],
    k: usize,
    moltype: MoleculeType,
) -> Result<Vec<KmerProfile>> {
    let counter = KmerCounter::dense(k, moltype)?;
    validate_records(records, k, moltype)?;

    info!(
        "Counting {}-mers for {} records ({} dimensions)",
        k,
        records.len(),
        counter.vector_len()
    );

    let profiles: Vec<KmerProfile> = records
        .par_iter()
        .enumerate()
        .map(|(index, record)| {
            counter
                .count(record.seq())
                .map(|counts| KmerProfile::from_counts(index, record.id(), counts))
        })
        .collect::<Result<Vec<KmerProfile>>>()?;

    if let Some(empty) = profiles.iter().find(|p| p.valid_kmers == 0) {
        return Err(DivseqError::NoValidKmers {
            id: empty.id.clone(),
            k,
        });
    }

    debug!(
        "Counted {} valid k-mers in total",
        profiles.iter().map(|p| p.valid_kmers).sum::<usize>()
    );

    Ok(profiles)
}

pub(crate) fn validate_records(records: &[Record], k: usize, moltype: MoleculeType) -> Result<()> {
    if records.is_empty() {
        return Err(DivseqError::EmptyRecords);
    }

    let mut seen: FxHashSet<&str> = FxHashSet::default();
    for record in records {
        if !seen.insert(record.id()) {
            return Err(DivseqError::DuplicateId {
                id: record.id().to_string(),
            });
        }
        record.validate(moltype)?;
        if record.len() < k {
            return Err(DivseqError::SequenceTooShort {
                id: record.id().to_string(),
                len: record.len(),
                k,
            });
        }
    }

    Ok(())
}
