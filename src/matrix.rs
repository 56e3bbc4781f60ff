//! Symmetric pairwise divergence matrices

use crate::error::{DivseqError, Result};
use crate::profile::KmerProfile;
use crate::stats::{DivergenceScorer, Stat};
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use std::{fmt, str::FromStr};
use tracing::debug;

/// Pairwise measure between two k-mer profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Two-member set statistic
    Divergence(Stat),
    /// L2 distance between frequency vectors
    Euclidean,
}

impl Metric {
    pub fn distance(&self, a: &KmerProfile, b: &KmerProfile) -> f64 {
        match self {
            Self::Divergence(stat) => DivergenceScorer::new(*stat).pairwise(a, b),
            Self::Euclidean => a
                .freqs
                .0
                .iter()
                .zip(b.freqs.0.iter())
                .map(|(x, y)| (x - y).powi(2))
                .sum::<f64>()
                .sqrt(),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Divergence(stat) => write!(f, "{}", stat),
            Self::Euclidean => f.write_str("euclidean"),
        }
    }
}

impl FromStr for Metric {
    type Err = DivseqError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("euclidean") {
            return Ok(Self::Euclidean);
        }
        s.parse::<Stat>()
            .map(Self::Divergence)
            .map_err(|_| DivseqError::UnknownMetric { name: s.to_string() })
    }
}

/// Labelled N x N matrix, symmetric with a zero diagonal
#[derive(Debug, Clone, PartialEq)]
pub struct DivergenceMatrix {
    ids: Vec<String>,
    values: Array2<f64>,
}

impl DivergenceMatrix {
    /// Pairwise matrix of `profiles` under `metric`
    pub fn build(profiles: &[KmerProfile], metric: Metric) -> Self {
        let ids = profiles.iter().map(|p| p.id.clone()).collect();
        Self::from_fn(ids, |i, j| metric.distance(&profiles[i], &profiles[j]))
    }

    /// Matrix whose entry `(i, j)`, `i < j`, is `f(i, j)`.
    ///
    /// Rows are filled in parallel; each row computes its upper triangle and
    /// the lower triangle is mirrored afterwards.
    pub fn from_fn<F>(ids: Vec<String>, f: F) -> Self
    where
        F: Fn(usize, usize) -> f64 + Sync,
    {
        let n = ids.len();
        debug!("Computing {} pairwise values", n * n.saturating_sub(1) / 2);

        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| ((i + 1)..n).map(|j| f(i, j)).collect())
            .collect();

        let mut values = Array2::<f64>::zeros((n, n));
        for (i, row) in rows.into_iter().enumerate() {
            for (offset, value) in row.into_iter().enumerate() {
                let j = i + 1 + offset;
                values[[i, j]] = value;
                values[[j, i]] = value;
            }
        }

        Self { ids, values }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        self.values.get([i, j]).copied()
    }

    /// Upper triangle in row-major order, the layout `kodama` expects
    pub fn condensed(&self) -> Array1<f64> {
        let n = self.len();
        let mut condensed = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                condensed.push(self.values[[i, j]]);
            }
        }
        Array1::from(condensed)
    }

    pub fn into_values(self) -> Array2<f64> {
        self.values
    }
}
