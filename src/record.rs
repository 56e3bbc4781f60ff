//! Input records and molecule alphabets

use crate::error::{DivseqError, Result};
use serde::Serialize;
use std::{fmt, str::FromStr};

const DNA_STATES: &[u8] = b"TCAG";
const RNA_STATES: &[u8] = b"UCAG";
const PROTEIN_STATES: &[u8] = b"ACDEFGHIKLMNPQRSTVWY";

// Gaps, missing data and IUPAC ambiguity codes
const NUCLEOTIDE_DEGENERATE: &[u8] = b"-.?NRYWSKMBDHV";
const PROTEIN_DEGENERATE: &[u8] = b"-.?XBZJUO*";

/// Molecule type of a record, fixing its symbol alphabet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MoleculeType {
    Dna,
    Rna,
    Protein,
}

/// Classification of a single sequence byte under a molecule type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    /// Canonical state, with its index in the alphabet
    State(u8),
    /// Gap or ambiguity code, never counted
    Degenerate,
    /// Not part of this molecule type
    Invalid,
}

impl MoleculeType {
    /// Canonical states in index order
    pub fn states(&self) -> &'static [u8] {
        match self {
            Self::Dna => DNA_STATES,
            Self::Rna => RNA_STATES,
            Self::Protein => PROTEIN_STATES,
        }
    }

    pub fn num_states(&self) -> usize {
        self.states().len()
    }

    fn degenerate(&self) -> &'static [u8] {
        match self {
            Self::Dna | Self::Rna => NUCLEOTIDE_DEGENERATE,
            Self::Protein => PROTEIN_DEGENERATE,
        }
    }

    /// Index of `byte` in the strict alphabet, case-insensitive
    #[inline]
    pub fn state(&self, byte: u8) -> Option<u8> {
        let upper = byte.to_ascii_uppercase();
        self.states()
            .iter()
            .position(|&s| s == upper)
            .map(|i| i as u8)
    }

    pub fn classify(&self, byte: u8) -> Symbol {
        if let Some(state) = self.state(byte) {
            return Symbol::State(state);
        }
        if self.degenerate().contains(&byte.to_ascii_uppercase()) {
            Symbol::Degenerate
        } else {
            Symbol::Invalid
        }
    }

    /// Whether states have a Watson-Crick complement
    pub fn is_nucleic(&self) -> bool {
        matches!(self, Self::Dna | Self::Rna)
    }

    /// Complement of a nucleotide state index.
    ///
    /// # Notes
    /// In `TCAG`/`UCAG` order the complement of state `s` is `(s + 2) % 4`.
    #[inline]
    pub fn complement(&self, state: u8) -> u8 {
        (state + 2) % 4
    }
}

impl fmt::Display for MoleculeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dna => "dna",
            Self::Rna => "rna",
            Self::Protein => "protein",
        };
        f.write_str(name)
    }
}

impl FromStr for MoleculeType {
    type Err = DivseqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dna" => Ok(Self::Dna),
            "rna" => Ok(Self::Rna),
            "protein" | "aa" => Ok(Self::Protein),
            _ => Err(DivseqError::UnknownMoleculeType { name: s.to_string() }),
        }
    }
}

/// A named sequence handed to the core by the loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    id: String,
    moltype: MoleculeType,
    seq: Vec<u8>,
}

impl Record {
    pub fn new(id: impl Into<String>, seq: impl Into<Vec<u8>>, moltype: MoleculeType) -> Self {
        Self {
            id: id.into(),
            moltype,
            seq: seq.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn moltype(&self) -> MoleculeType {
        self.moltype
    }

    pub fn seq(&self) -> &[u8] {
        &self.seq
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Check the record against the molecule type requested by the caller
    pub fn validate(&self, moltype: MoleculeType) -> Result<()> {
        if self.moltype != moltype {
            return Err(DivseqError::MoleculeTypeMismatch {
                id: self.id.clone(),
                expected: moltype.to_string(),
                found: self.moltype.to_string(),
            });
        }

        match self
            .seq
            .iter()
            .position(|&b| moltype.classify(b) == Symbol::Invalid)
        {
            Some(position) => Err(DivseqError::InvalidSymbol {
                id: self.id.clone(),
                symbol: self.seq[position] as char,
                position,
                moltype: moltype.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_moltype() {
        assert_eq!("DNA".parse::<MoleculeType>().unwrap(), MoleculeType::Dna);
        assert_eq!("protein".parse::<MoleculeType>().unwrap(), MoleculeType::Protein);
        let err = "peptide".parse::<MoleculeType>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }

    #[test]
    fn test_classify() {
        let dna = MoleculeType::Dna;
        assert_eq!(dna.classify(b'T'), Symbol::State(0));
        assert_eq!(dna.classify(b'g'), Symbol::State(3));
        assert_eq!(dna.classify(b'N'), Symbol::Degenerate);
        assert_eq!(dna.classify(b'-'), Symbol::Degenerate);
        assert_eq!(dna.classify(b'U'), Symbol::Invalid);
        assert_eq!(MoleculeType::Rna.classify(b'U'), Symbol::State(0));
        assert_eq!(MoleculeType::Protein.classify(b'W'), Symbol::State(18));
    }

    #[test]
    fn test_complement() {
        let dna = MoleculeType::Dna;
        let comp = |b: u8| dna.states()[dna.complement(dna.state(b).unwrap()) as usize];
        assert_eq!(comp(b'A'), b'T');
        assert_eq!(comp(b'T'), b'A');
        assert_eq!(comp(b'C'), b'G');
        assert_eq!(comp(b'G'), b'C');
    }

    #[test]
    fn test_validate_symbols() {
        let ok = Record::new("s1", "ACGTN-acgt", MoleculeType::Dna);
        assert!(ok.validate(MoleculeType::Dna).is_ok());

        let protein_in_dna = Record::new("s2", "ACGTEF", MoleculeType::Dna);
        let err = protein_in_dna.validate(MoleculeType::Dna).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
        assert!(err.to_string().contains("'E' at position 4"));
    }

    #[test]
    fn test_validate_moltype() {
        let rec = Record::new("s1", "ACGU", MoleculeType::Rna);
        let err = rec.validate(MoleculeType::Dna).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"record 's1' is rna, expected dna");
    }
}
