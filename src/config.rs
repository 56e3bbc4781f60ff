//! Tunable parameters for the selection and distance stages

use crate::error::{DivseqError, Result};
use crate::record::MoleculeType;
use serde::Serialize;
use std::{fmt, str::FromStr};

/// Default number of incremental updates between aggregate re-syncs
pub const DEFAULT_RESYNC_EVERY: usize = 64;

/// Default cap on drop-phase swap iterations
pub const DEFAULT_SWAP_LIMIT: usize = 16;

/// Quantity the max search maximises over a candidate set `S`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaxObjective {
    /// The set statistic `D(S)`
    #[default]
    Total,
    /// `D(S) / |S|`
    Mean,
    /// Mean member score over `S`
    MeanDelta,
}

impl fmt::Display for MaxObjective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Total => f.write_str("total"),
            Self::Mean => f.write_str("mean"),
            Self::MeanDelta => f.write_str("mean-delta"),
        }
    }
}

impl FromStr for MaxObjective {
    type Err = DivseqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "total" => Ok(Self::Total),
            "mean" => Ok(Self::Mean),
            "mean-delta" => Ok(Self::MeanDelta),
            _ => Err(DivseqError::UnknownObjective { name: s.to_string() }),
        }
    }
}

/// Parameters of the maximally divergent set search
#[derive(Debug, Clone, PartialEq)]
pub struct MaxConfig {
    /// Never return fewer members than this
    pub min_size: usize,

    /// Never return more members than this (capped at the record count)
    pub max_size: usize,

    /// What growth, swaps and trimming try to raise
    pub objective: MaxObjective,

    /// A candidate is admitted once `min_size` is reached only if it raises
    /// the objective by more than this
    pub threshold: f64,

    /// Maximum number of drop-phase swaps (0 disables the drop phase)
    pub swap_limit: usize,

    /// After growth and swaps, shrink towards `min_size` and keep the size
    /// with the highest set statistic
    pub trim: bool,

    /// Re-sync the working aggregate every this many updates
    pub resync_every: usize,
}

impl Default for MaxConfig {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: usize::MAX,
            objective: MaxObjective::Total,
            threshold: 0.0,
            swap_limit: DEFAULT_SWAP_LIMIT,
            trim: false,
            resync_every: DEFAULT_RESYNC_EVERY,
        }
    }
}

impl MaxConfig {
    pub fn new(min_size: usize, max_size: usize) -> Result<Self> {
        let config = Self {
            min_size,
            max_size,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_size == 0 {
            return Err(DivseqError::InvalidMinSize {
                min_size: self.min_size,
            });
        }
        if self.min_size > self.max_size {
            return Err(DivseqError::MinExceedsMax {
                min_size: self.min_size,
                max_size: self.max_size,
            });
        }
        if !self.threshold.is_finite() {
            return Err(DivseqError::InvalidThreshold {
                threshold: self.threshold,
            });
        }
        Ok(())
    }

    /// Log configuration parameters via tracing
    pub fn print(&self) {
        tracing::info!("Max-divergent configuration:");
        tracing::info!("  min_size = {}", self.min_size);
        if self.max_size == usize::MAX {
            tracing::info!("  max_size = all records");
        } else {
            tracing::info!("  max_size = {}", self.max_size);
        }
        tracing::info!("  objective = {}", self.objective);
        tracing::debug!("  threshold = {}", self.threshold);
        tracing::debug!("  swap_limit = {}", self.swap_limit);
        tracing::debug!("  trim = {}", self.trim);
        tracing::debug!("  resync_every = {}", self.resync_every);
    }
}

/// Parameters of the mash distance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MashConfig {
    /// Number of smallest k-mer hashes kept per sequence
    pub sketch_size: usize,

    /// Treat a k-mer and its reverse complement as the same k-mer
    pub canonical: bool,
}

impl Default for MashConfig {
    fn default() -> Self {
        Self {
            sketch_size: 2000,
            canonical: false,
        }
    }
}

impl MashConfig {
    pub fn validate(&self, moltype: MoleculeType) -> Result<()> {
        if self.sketch_size == 0 {
            return Err(DivseqError::InvalidSketchSize {
                size: self.sketch_size,
            });
        }
        if self.canonical && !moltype.is_nucleic() {
            return Err(DivseqError::CanonicalUnsupported {
                moltype: moltype.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MaxConfig::default();
        assert_eq!(config.min_size, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_sizes() {
        assert!(MaxConfig::new(3, 10).is_ok());
        assert!(matches!(
            MaxConfig::new(0, 10),
            Err(DivseqError::InvalidMinSize { min_size: 0 })
        ));
        assert!(matches!(
            MaxConfig::new(5, 4),
            Err(DivseqError::MinExceedsMax { min_size: 5, max_size: 4 })
        ));
    }

    #[test]
    fn test_validate_threshold() {
        for threshold in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let config = MaxConfig { threshold, ..MaxConfig::default() };
            let err = config.validate().unwrap_err();
            assert!(matches!(err, DivseqError::InvalidThreshold { .. }));
        }
        let config = MaxConfig { threshold: -0.5, ..MaxConfig::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_objective_names() {
        for objective in [MaxObjective::Total, MaxObjective::Mean, MaxObjective::MeanDelta] {
            assert_eq!(objective.to_string().parse::<MaxObjective>().unwrap(), objective);
        }
        assert_eq!("mean_delta".parse::<MaxObjective>().unwrap(), MaxObjective::MeanDelta);
        assert!("median".parse::<MaxObjective>().is_err());
    }

    #[test]
    fn test_validate_mash() {
        let config = MashConfig { sketch_size: 0, canonical: false };
        assert!(config.validate(MoleculeType::Dna).is_err());

        let config = MashConfig { sketch_size: 10, canonical: true };
        assert!(config.validate(MoleculeType::Rna).is_ok());
        assert!(config.validate(MoleculeType::Protein).is_err());
    }
}
