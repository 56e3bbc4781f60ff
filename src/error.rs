use custom_error::custom_error;

custom_error! { pub DivseqError
    InvalidK{k: usize} = "k-mer length needs to be larger than zero, got {k}",
    IndexOverflow{k: usize, states: usize} = "{states}^{k} k-mers do not fit a 64-bit index",
    VectorTooLarge{len: usize, limit: usize} = "k-mer vector of length {len} exceeds the limit of {limit}",
    DimensionMismatch{left: usize, right: usize} = "k-mer vector lengths differ: left={left}, right={right}",
    EmptyRecords = "no records provided",
    IndexOutOfBounds{index: usize, len: usize} = "record index {index} is out of bounds for {len} records",
    DuplicateId{id: String} = "record identifier '{id}' occurs more than once",
    InvalidN{n: usize} = "number of records to select needs to be larger than zero, got {n}",
    InvalidMinSize{min_size: usize} = "min_size needs to be larger than zero, got {min_size}",
    MinExceedsMax{min_size: usize, max_size: usize} = "min_size ({min_size}) exceeds max_size ({max_size})",
    InsufficientRecords{available: usize, min_size: usize} = "only {available} records available, min_size is {min_size}",
    InvalidThreshold{threshold: f64} = "threshold needs to be a finite number, got {threshold}",
    UnknownObjective{name: String} = "unknown max objective '{name}' (expected one of: total, mean, mean-delta)",
    EmptyAggregate = "cannot remove a profile from an empty aggregate",
    InvalidWorkers{workers: usize} = "number of workers needs to be larger than zero, got {workers}",
    InvalidSketchSize{size: usize} = "mash sketch size needs to be larger than zero, got {size}",
    CanonicalUnsupported{moltype: String} = "canonical k-mers are only supported for nucleotides, not {moltype}",
    UnknownStat{name: String} = "unknown divergence statistic '{name}' (expected one of: jsd, stdev)",
    UnknownMoleculeType{name: String} = "unknown molecule type '{name}' (expected one of: dna, rna, protein)",
    UnknownMetric{name: String} = "unknown distance metric '{name}' (expected one of: jsd, stdev, euclidean, mash)",
    NonFiniteStatistic{id: String} = "divergence statistic is not finite for record '{id}'",
    MoleculeTypeMismatch{id: String, expected: String, found: String} = "record '{id}' is {found}, expected {expected}",
    InvalidSymbol{id: String, symbol: char, position: usize, moltype: String} = "record '{id}' has symbol '{symbol}' at position {position}, not valid for {moltype}",
    SequenceTooShort{id: String, len: usize, k: usize} = "record '{id}' has length {len}, shorter than k={k}",
    NoValidKmers{id: String, k: usize} = "record '{id}' contains no valid k-mers of length {k}",
    PartitionFailed{partition: usize, failed: usize, reason: String} = "partition {partition} failed ({failed} partition(s) failed in total): {reason}",
    ThreadPool{reason: String} = "could not build worker pool: {reason}",
    LinkageStep{step: usize} = "linkage step {step} joins a cluster that does not exist",
}

/// Broad class of a [`DivseqError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid parameters or input shape, detected before any computation
    Precondition,
    /// A record's content cannot be used
    Data,
    /// Failure while computing in parallel
    Computation,
}

impl DivseqError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MoleculeTypeMismatch { .. }
            | Self::InvalidSymbol { .. }
            | Self::SequenceTooShort { .. }
            | Self::NoValidKmers { .. } => ErrorKind::Data,
            Self::PartitionFailed { .. } | Self::ThreadPool { .. } | Self::LinkageStep { .. } => {
                ErrorKind::Computation
            }
            _ => ErrorKind::Precondition,
        }
    }
}

pub type Result<T> = std::result::Result<T, DivseqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(DivseqError::InvalidK { k: 0 }.kind(), ErrorKind::Precondition);
        assert_eq!(
            DivseqError::NoValidKmers { id: "s1".into(), k: 3 }.kind(),
            ErrorKind::Data
        );
        let failed = DivseqError::PartitionFailed {
            partition: 2,
            failed: 1,
            reason: "boom".into(),
        };
        assert_eq!(failed.kind(), ErrorKind::Computation);
        assert_eq!(
            DivseqError::InvalidThreshold { threshold: f64::NAN }.kind(),
            ErrorKind::Precondition
        );
    }

    #[test]
    fn test_message_names_offender() {
        let err = DivseqError::SequenceTooShort { id: "seq7".into(), len: 2, k: 4 };
        insta::assert_snapshot!(err.to_string(), @"record 'seq7' has length 2, shorter than k=4");
    }
}
