//! Dense k-mer counting over a fixed molecule alphabet
//!
//! A k-mer is indexed in base `|alphabet|` with its first symbol most
//! significant, so for DNA (`TCAG`) and `k = 2`, `TT` is 0, `TC` is 1 and
//! `GG` is 15.

use crate::error::{DivseqError, Result};
use crate::record::MoleculeType;
use ndarray::{Array1, Zip};

/// Largest dense vector the counter will allocate (entries)
pub const MAX_VECTOR_LEN: usize = 1 << 26;

/// Entries at or below this magnitude are treated as absent
pub const ZERO_TOLERANCE: f64 = 1e-12;

/// Counts k-mers of a single word size over one molecule alphabet
#[derive(Debug, Clone)]
pub struct KmerCounter {
    k: usize,
    moltype: MoleculeType,
    num_states: u64,
    // |alphabet|^(k-1), drops the leading symbol when rolling
    prefix_modulus: u64,
    num_kmers: u64,
}

impl KmerCounter {
    /// Counter able to index every k-mer in a `u64`
    pub fn new(k: usize, moltype: MoleculeType) -> Result<Self> {
        if k == 0 {
            return Err(DivseqError::InvalidK { k });
        }
        let num_states = moltype.num_states() as u64;
        let overflow = || DivseqError::IndexOverflow {
            k,
            states: moltype.num_states(),
        };
        let exponent = u32::try_from(k).map_err(|_| overflow())?;
        let num_kmers = num_states.checked_pow(exponent).ok_or_else(overflow)?;

        Ok(Self {
            k,
            moltype,
            num_states,
            prefix_modulus: num_kmers / num_states,
            num_kmers,
        })
    }

    /// Counter whose dense vectors fit in memory
    pub fn dense(k: usize, moltype: MoleculeType) -> Result<Self> {
        let counter = Self::new(k, moltype)?;
        counter.check_dense()?;
        Ok(counter)
    }

    fn check_dense(&self) -> Result<()> {
        if self.num_kmers > MAX_VECTOR_LEN as u64 {
            return Err(DivseqError::VectorTooLarge {
                len: usize::try_from(self.num_kmers).unwrap_or(usize::MAX),
                limit: MAX_VECTOR_LEN,
            });
        }
        Ok(())
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn moltype(&self) -> MoleculeType {
        self.moltype
    }

    /// Number of distinct k-mers, `|alphabet|^k`
    pub fn num_kmers(&self) -> u64 {
        self.num_kmers
    }

    /// Length of the dense vectors produced by [`KmerCounter::count`]
    pub fn vector_len(&self) -> usize {
        self.num_kmers as usize
    }

    /// Indices of every valid k-mer window, in sequence order
    pub fn indices<'a>(&'a self, seq: &'a [u8]) -> KmerIndices<'a> {
        KmerIndices {
            counter: self,
            seq,
            pos: 0,
            run: 0,
            index: 0,
        }
    }

    /// Count vector of `seq`.
    ///
    /// Windows overlapping a gap or ambiguity code are skipped, and a
    /// sequence shorter than `k` yields the zero vector. Fails with
    /// `VectorTooLarge` when the alphabet and `k` exceed the dense limit.
    pub fn count(&self, seq: &[u8]) -> Result<KmerVector> {
        self.check_dense()?;
        let mut counts = Array1::<f64>::zeros(self.vector_len());
        for index in self.indices(seq) {
            counts[index as usize] += 1.0;
        }
        Ok(KmerVector(counts))
    }

    /// Decode a k-mer index back into its symbols
    pub fn decode(&self, mut index: u64) -> String {
        let states = self.moltype.states();
        let mut symbols = vec![b'?'; self.k];
        for slot in symbols.iter_mut().rev() {
            *slot = states[(index % self.num_states) as usize];
            index /= self.num_states;
        }
        String::from_utf8_lossy(&symbols).into_owned()
    }

    /// Index of the reverse complement of a nucleotide k-mer
    pub fn reverse_complement(&self, mut index: u64) -> u64 {
        let mut rc = 0;
        for _ in 0..self.k {
            let state = (index % self.num_states) as u8;
            rc = rc * self.num_states + self.moltype.complement(state) as u64;
            index /= self.num_states;
        }
        rc
    }
}

/// Rolling iterator over the k-mer indices of a sequence
pub struct KmerIndices<'a> {
    counter: &'a KmerCounter,
    seq: &'a [u8],
    pos: usize,
    // consecutive valid symbols ending at `pos`
    run: usize,
    index: u64,
}

impl Iterator for KmerIndices<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let counter = self.counter;
        while self.pos < self.seq.len() {
            let byte = self.seq[self.pos];
            self.pos += 1;

            match counter.moltype.state(byte) {
                Some(state) => {
                    self.index =
                        (self.index % counter.prefix_modulus) * counter.num_states + state as u64;
                    self.run += 1;
                    if self.run >= counter.k {
                        return Some(self.index);
                    }
                }
                None => {
                    self.run = 0;
                    self.index = 0;
                }
            }
        }
        None
    }
}

/// Dense numeric vector indexed by k-mer, holding counts or frequencies
#[derive(Debug, Clone, PartialEq)]
pub struct KmerVector(pub Array1<f64>);

impl KmerVector {
    pub fn zeros(len: usize) -> Self {
        Self(Array1::zeros(len))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.0.sum()
    }

    pub fn as_array(&self) -> &Array1<f64> {
        &self.0
    }

    fn check_len(&self, other: &KmerVector) -> Result<()> {
        if self.len() != other.len() {
            return Err(DivseqError::DimensionMismatch {
                left: self.len(),
                right: other.len(),
            });
        }
        Ok(())
    }

    /// Element-wise `self += delta`
    pub fn add(&mut self, delta: &KmerVector) -> Result<()> {
        self.check_len(delta)?;
        self.0 += &delta.0;
        Ok(())
    }

    /// Element-wise `self -= delta`
    pub fn remove(&mut self, delta: &KmerVector) -> Result<()> {
        self.check_len(delta)?;
        self.0 -= &delta.0;
        Ok(())
    }

    /// Frequencies summing to one, or the zero vector when nothing was counted
    pub fn normalized(&self) -> KmerVector {
        let total = self.total();
        if total <= 0.0 {
            return KmerVector::zeros(self.len());
        }
        KmerVector(&self.0 / total)
    }

    /// Element-wise squares
    pub fn squared(&self) -> KmerVector {
        KmerVector(self.0.mapv(|v| v * v))
    }

    /// Shannon entropy in bits of a frequency vector
    pub fn entropy(&self) -> f64 {
        self.0
            .iter()
            .filter(|&&p| p > ZERO_TOLERANCE)
            .map(|&p| -p * p.log2())
            .sum()
    }

    /// Largest absolute element-wise difference
    pub fn max_abs_diff(&self, other: &KmerVector) -> f64 {
        let mut max = 0.0_f64;
        Zip::from(&self.0).and(&other.0).for_each(|a, b| {
            max = max.max((a - b).abs());
        });
        max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn valid_windows(seq: &[u8], k: usize, moltype: MoleculeType) -> usize {
        seq.windows(k)
            .filter(|w| w.iter().all(|&b| moltype.state(b).is_some()))
            .count()
    }

    #[test]
    fn test_count_sums_to_valid_windows() {
        let dna = MoleculeType::Dna;
        let seqs: [&[u8]; 5] = [b"ACGTACGTTG", b"ACNGTA-CGT", b"NNNN", b"acgtnacgt", b"A"];
        for k in 1..=4 {
            let counter = KmerCounter::dense(k, dna).unwrap();
            for seq in seqs {
                let counts = counter.count(seq).unwrap();
                assert_eq!(counts.len(), 4usize.pow(k as u32));
                assert_eq!(counts.total() as usize, valid_windows(seq, k, dna));
            }
        }
    }

    #[test]
    fn test_partial_windows_skipped() {
        let counter = KmerCounter::dense(3, MoleculeType::Dna).unwrap();
        let kmers: Vec<String> = counter
            .indices(b"ACGNTTAC")
            .map(|i| counter.decode(i))
            .collect();
        assert_eq!(kmers, vec!["ACG", "TTA", "TAC"]);
    }

    #[test]
    fn test_index_order() {
        let counter = KmerCounter::dense(2, MoleculeType::Dna).unwrap();
        let idx: Vec<u64> = counter.indices(b"TTCGG").collect();
        assert_eq!(idx, vec![0, 1, 7, 15]);
        insta::assert_snapshot!(counter.decode(7), @"CG");
    }

    #[test]
    fn test_short_sequence_zero_vector() {
        let counter = KmerCounter::dense(5, MoleculeType::Dna).unwrap();
        let counts = counter.count(b"ACG").unwrap();
        assert_eq!(counts.total(), 0.0);
        let freqs = counts.normalized();
        assert!(freqs.0.iter().all(|&v| v == 0.0));
        assert_eq!(freqs.entropy(), 0.0);
    }

    #[test]
    fn test_protein_alphabet() {
        let counter = KmerCounter::dense(2, MoleculeType::Protein).unwrap();
        assert_eq!(counter.vector_len(), 400);
        let counts = counter.count(b"MKVLX*AW").unwrap();
        assert_eq!(counts.total(), 4.0);
    }

    #[test]
    fn test_invalid_k() {
        let err = KmerCounter::new(0, MoleculeType::Dna).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(KmerCounter::new(31, MoleculeType::Dna).is_ok());
        assert!(KmerCounter::new(32, MoleculeType::Dna).is_err());
        assert!(KmerCounter::dense(16, MoleculeType::Dna).is_err());
    }

    #[test]
    fn test_count_refuses_oversized_vectors() {
        let counter = KmerCounter::new(20, MoleculeType::Dna).unwrap();
        assert_eq!(counter.indices(b"ACGTACGTACGTACGTACGTA").count(), 2);
        let err = counter.count(b"ACGTACGTACGTACGTACGTA").unwrap_err();
        assert!(matches!(
            err,
            DivseqError::VectorTooLarge { limit: MAX_VECTOR_LEN, .. }
        ));

        let protein = KmerCounter::new(7, MoleculeType::Protein).unwrap();
        assert!(protein.count(b"MKVLAWMKV").is_err());
    }

    #[test]
    fn test_reverse_complement() {
        let counter = KmerCounter::new(4, MoleculeType::Dna).unwrap();
        let idx = counter.indices(b"AACG").next().unwrap();
        assert_eq!(counter.decode(counter.reverse_complement(idx)), "CGTT");
    }

    #[test]
    fn test_add_remove_roundtrip() {
        let counter = KmerCounter::dense(2, MoleculeType::Dna).unwrap();
        let original = counter.count(b"ACGTTGCA").unwrap();
        let delta = counter.count(b"GGGCCCAT").unwrap();
        let mut v = original.clone();
        v.add(&delta).unwrap();
        assert_eq!(v.total(), original.total() + delta.total());
        v.remove(&delta).unwrap();
        assert_eq!(v, original);

        let other = KmerCounter::dense(3, MoleculeType::Dna).unwrap().count(b"ACGT").unwrap();
        assert!(v.add(&other).is_err());
    }

    #[test]
    fn test_entropy() {
        let counter = KmerCounter::dense(1, MoleculeType::Dna).unwrap();
        assert!((counter.count(b"ACGT").unwrap().normalized().entropy() - 2.0).abs() < 1e-12);
        assert_eq!(counter.count(b"AAAA").unwrap().normalized().entropy(), 0.0);
    }
}
