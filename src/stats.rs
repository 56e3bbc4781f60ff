//! Divergence statistics over k-mer frequency vectors
//!
//! Both statistics are defined for a set of records through its
//! [`Aggregate`]; a record's score is how much the set statistic drops when
//! the record is taken out.

use crate::error::{DivseqError, Result};
use crate::kmer::ZERO_TOLERANCE;
use crate::profile::KmerProfile;
use crate::working_set::Aggregate;
use itertools::{izip, Either};
use serde::Serialize;
use std::{fmt, str::FromStr};

// Variances below this are rounding noise from `E[x^2] - E[x]^2`
const VARIANCE_TOLERANCE: f64 = 1e-14;

/// Divergence statistic, selectable by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stat {
    /// Jensen-Shannon divergence of the set: `H(mean) - mean(H_i)`, in bits
    Jsd,
    /// Sum over k-mers of the population standard deviation of frequencies
    Stdev,
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jsd => f.write_str("jsd"),
            Self::Stdev => f.write_str("stdev"),
        }
    }
}

impl FromStr for Stat {
    type Err = DivseqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "jsd" | "delta_jsd" => Ok(Self::Jsd),
            "stdev" | "std" => Ok(Self::Stdev),
            _ => Err(DivseqError::UnknownStat { name: s.to_string() }),
        }
    }
}

#[derive(Clone, Copy)]
enum Adjust<'a> {
    Keep,
    Add(&'a KmerProfile),
    Remove(&'a KmerProfile),
}

/// Scores records against an aggregate with one [`Stat`]
#[derive(Debug, Clone, Copy)]
pub struct DivergenceScorer {
    stat: Stat,
}

impl DivergenceScorer {
    pub fn new(stat: Stat) -> Self {
        Self { stat }
    }

    pub fn stat(&self) -> Stat {
        self.stat
    }

    /// Statistic of the whole set; zero for fewer than two members
    pub fn set_divergence(&self, aggregate: &Aggregate) -> f64 {
        self.divergence(aggregate, Adjust::Keep)
    }

    /// Contribution of `member` to the set it is part of.
    ///
    /// `aggregate` must include `member`. A one-member set scores zero.
    pub fn score(&self, member: &KmerProfile, aggregate: &Aggregate) -> Result<f64> {
        let value = self.divergence(aggregate, Adjust::Keep)
            - self.divergence(aggregate, Adjust::Remove(member));
        finite(value, &member.id)
    }

    /// Change of the set statistic if `candidate` were added
    pub fn marginal(&self, candidate: &KmerProfile, aggregate: &Aggregate) -> Result<f64> {
        let value = self.divergence(aggregate, Adjust::Add(candidate))
            - self.divergence(aggregate, Adjust::Keep);
        finite(value, &candidate.id)
    }

    /// Statistic of the two-member set `{a, b}`
    pub fn pairwise(&self, a: &KmerProfile, b: &KmerProfile) -> f64 {
        let (p, q) = (&a.freqs.0, &b.freqs.0);
        match self.stat {
            Stat::Jsd => {
                let mixed: f64 = p
                    .iter()
                    .zip(q.iter())
                    .map(|(x, y)| (x + y) / 2.0)
                    .filter(|&m| m > ZERO_TOLERANCE)
                    .map(|m| -m * m.log2())
                    .sum();
                mixed - (a.entropy + b.entropy) / 2.0
            }
            Stat::Stdev => p.iter().zip(q.iter()).map(|(x, y)| (x - y).abs() / 2.0).sum(),
        }
    }

    fn divergence(&self, aggregate: &Aggregate, adjust: Adjust<'_>) -> f64 {
        let (size, entropy_sum) = match adjust {
            Adjust::Keep => (aggregate.size, aggregate.entropy_sum),
            Adjust::Add(p) => (aggregate.size + 1, aggregate.entropy_sum + p.entropy),
            Adjust::Remove(p) => (aggregate.size.saturating_sub(1), aggregate.entropy_sum - p.entropy),
        };
        if size <= 1 {
            return 0.0;
        }
        let n = size as f64;

        // per k-mer (sum of frequencies, sum of squared frequencies)
        let columns = match adjust {
            Adjust::Keep => Either::Left(
                aggregate
                    .sum
                    .0
                    .iter()
                    .zip(aggregate.sum_sq.0.iter())
                    .map(|(&s, &q)| (s, q)),
            ),
            Adjust::Add(p) | Adjust::Remove(p) => {
                let sign = if matches!(adjust, Adjust::Add(_)) { 1.0 } else { -1.0 };
                Either::Right(
                    izip!(
                        aggregate.sum.0.iter(),
                        aggregate.sum_sq.0.iter(),
                        p.freqs.0.iter(),
                        p.squares.0.iter()
                    )
                    .map(move |(&s, &q, &f, &f2)| (s + sign * f, q + sign * f2)),
                )
            }
        };

        match self.stat {
            Stat::Jsd => {
                let mixed: f64 = columns
                    .map(|(s, _)| s / n)
                    .filter(|&m| m > ZERO_TOLERANCE)
                    .map(|m| -m * m.log2())
                    .sum();
                mixed - entropy_sum / n
            }
            Stat::Stdev => columns
                .map(|(s, q)| {
                    let mean = s / n;
                    let variance = q / n - mean * mean;
                    if variance > VARIANCE_TOLERANCE {
                        variance.sqrt()
                    } else {
                        0.0
                    }
                })
                .sum(),
        }
    }
}

fn finite(value: f64, id: &str) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DivseqError::NonFiniteStatistic { id: id.to_string() })
    }
}
