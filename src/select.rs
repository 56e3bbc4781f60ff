//! Divergence-driven subset selection
//!
//! Two policies share the scoring machinery of [`DivergenceScorer`]:
//! [`n_most`] ranks every record once against the whole collection, while
//! [`max_divergent`] grows a [`WorkingSet`] greedily and then tries to improve
//! it by swapping out its weakest member.

use crate::config::{MaxConfig, MaxObjective};
use crate::error::{DivseqError, Result};
use crate::profile::KmerProfile;
use crate::stats::{DivergenceScorer, Stat};
use crate::working_set::{Aggregate, WorkingSet};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info, warn};

/// Outcome of a selection policy
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Positions of the chosen profiles
    pub indices: Vec<usize>,
    /// Member score of each chosen profile, parallel to `indices`
    pub scores: Vec<f64>,
    /// Set statistic of the chosen subset
    pub set_divergence: f64,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Tie-breaking rank of every position: identity, or a seeded permutation
fn tie_ranks(n: usize, rng: Option<&mut StdRng>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    if let Some(rng) = rng {
        order.shuffle(rng);
    }
    let mut ranks = vec![0; n];
    for (rank, &position) in order.iter().enumerate() {
        ranks[position] = rank;
    }
    ranks
}

/// The `n` profiles contributing most to the divergence of the whole
/// collection, in descending score order.
///
/// Scores are computed once against the full-set aggregate. Equal scores
/// keep input order, or the order of a permutation drawn from `seed`.
pub fn n_most(
    profiles: &[KmerProfile],
    n: usize,
    stat: Stat,
    seed: Option<u64>,
) -> Result<Selection> {
    if n == 0 {
        return Err(DivseqError::InvalidN { n });
    }
    if profiles.is_empty() {
        return Err(DivseqError::EmptyRecords);
    }
    if n > profiles.len() {
        warn!(
            "Requested {} records but only {} available, returning all",
            n,
            profiles.len()
        );
    }

    let scorer = DivergenceScorer::new(stat);
    let aggregate = Aggregate::from_profiles(profiles)?;
    let scores = profiles
        .par_iter()
        .map(|p| scorer.score(p, &aggregate))
        .collect::<Vec<Result<f64>>>()
        .into_iter()
        .collect::<Result<Vec<f64>>>()?;

    let mut rng = seed.map(StdRng::seed_from_u64);
    let ranks = tie_ranks(profiles.len(), rng.as_mut());
    let mut order: Vec<usize> = (0..profiles.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .total_cmp(&scores[a])
            .then_with(|| ranks[a].cmp(&ranks[b]))
    });
    order.truncate(n);

    let chosen = Aggregate::from_profiles(order.iter().map(|&i| &profiles[i]))?;
    let selection = Selection {
        scores: order.iter().map(|&i| scores[i]).collect(),
        indices: order,
        set_divergence: scorer.set_divergence(&chosen),
    };
    info!(
        "Selected {} of {} records, {} = {:.6}",
        selection.len(),
        profiles.len(),
        stat,
        selection.set_divergence
    );
    Ok(selection)
}

/// A subset of size within `[min_size, max_size]` that greedily maximises
/// the set statistic.
///
/// Growth starts from the first record, or from a seeded random one, and
/// admits the candidate with the largest marginal gain until `max_size` is
/// reached or, past `min_size`, admitting it would not raise the configured
/// [`MaxObjective`] by more than the threshold. The drop phase then swaps
/// the lowest-scoring member for the best outside candidate while that
/// strictly improves the objective, at most `swap_limit` times. Members are
/// returned in input order.
pub fn max_divergent(
    profiles: &[KmerProfile],
    config: &MaxConfig,
    stat: Stat,
    seed: Option<u64>,
) -> Result<Selection> {
    config.validate()?;
    if profiles.is_empty() {
        return Err(DivseqError::EmptyRecords);
    }
    if profiles.len() < config.min_size {
        return Err(DivseqError::InsufficientRecords {
            available: profiles.len(),
            min_size: config.min_size,
        });
    }
    config.print();

    let max_size = config.max_size.min(profiles.len());
    let scorer = DivergenceScorer::new(stat);

    let mut rng = seed.map(StdRng::seed_from_u64);
    let start = match rng.as_mut() {
        Some(rng) => rng.gen_range(0..profiles.len()),
        None => 0,
    };
    let ranks = tie_ranks(profiles.len(), rng.as_mut());

    let mut ws = WorkingSet::new(profiles, config.resync_every);
    ws.insert(start)?;
    debug!("Starting from record '{}'", profiles[start].id);

    grow(&mut ws, &scorer, &ranks, config, max_size)?;
    info!(
        "Growth stopped at {} members, {} = {:.6}",
        ws.len(),
        stat,
        scorer.set_divergence(ws.aggregate())
    );

    let swaps = drop_phase(&mut ws, &scorer, &ranks, config)?;
    if swaps > 0 {
        info!("Drop phase made {} swap(s)", swaps);
    }

    let mut members = ws.members().to_vec();
    if config.trim {
        members = trim_phase(&mut ws, &scorer, &ranks, config)?;
    }
    members.sort_unstable();

    let aggregate = Aggregate::from_profiles(members.iter().map(|&i| &profiles[i]))?;
    let scores = members
        .iter()
        .map(|&i| scorer.score(&profiles[i], &aggregate))
        .collect::<Result<Vec<f64>>>()?;

    let selection = Selection {
        indices: members,
        scores,
        set_divergence: scorer.set_divergence(&aggregate),
    };
    info!(
        "Selected {} of {} records, {} = {:.6}",
        selection.len(),
        profiles.len(),
        stat,
        selection.set_divergence
    );
    Ok(selection)
}

fn grow(
    ws: &mut WorkingSet<'_>,
    scorer: &DivergenceScorer,
    ranks: &[usize],
    config: &MaxConfig,
    max_size: usize,
) -> Result<()> {
    while ws.len() < max_size {
        let Some((candidate, gain)) = best_candidate(ws, scorer, ranks, None)? else {
            break;
        };
        if ws.len() < config.min_size {
            ws.insert(candidate)?;
            debug!(
                "Admitted '{}' (gain {:.6}), size {}",
                ws.profiles()[candidate].id,
                gain,
                ws.len()
            );
            continue;
        }

        let before = objective_value(ws, scorer, config.objective)?;
        ws.insert(candidate)?;
        let after = objective_value(ws, scorer, config.objective)?;
        if after - before <= config.threshold {
            ws.remove(candidate)?;
            debug!(
                "No candidate raises the {} objective by more than {}",
                config.objective, config.threshold
            );
            break;
        }
        debug!(
            "Admitted '{}' ({} objective {:.6} -> {:.6}), size {}",
            ws.profiles()[candidate].id,
            config.objective,
            before,
            after,
            ws.len()
        );
    }
    Ok(())
}

/// Returns the number of swaps kept
fn drop_phase(
    ws: &mut WorkingSet<'_>,
    scorer: &DivergenceScorer,
    ranks: &[usize],
    config: &MaxConfig,
) -> Result<usize> {
    let mut swaps = 0;
    for _ in 0..config.swap_limit {
        if ws.len() < 2 || ws.len() == ws.profiles().len() {
            break;
        }
        let current = objective_value(ws, scorer, config.objective)?;
        let lowest = lowest_member(ws, scorer, ranks)?;
        ws.remove(lowest)?;

        if let Some((candidate, _)) = best_candidate(ws, scorer, ranks, Some(lowest))? {
            ws.insert(candidate)?;
            let swapped = objective_value(ws, scorer, config.objective)?;
            if swapped > current + config.threshold {
                swaps += 1;
                debug!(
                    "Swapped '{}' for '{}', {:.6} -> {:.6}",
                    ws.profiles()[lowest].id,
                    ws.profiles()[candidate].id,
                    current,
                    swapped
                );
                continue;
            }
            ws.remove(candidate)?;
        }

        ws.insert(lowest)?;
        break;
    }
    Ok(swaps)
}

/// Shrinks `ws` to `min_size`, returning the members of the size with the
/// highest objective (larger sets win ties)
fn trim_phase(
    ws: &mut WorkingSet<'_>,
    scorer: &DivergenceScorer,
    ranks: &[usize],
    config: &MaxConfig,
) -> Result<Vec<usize>> {
    let mut best_value = objective_value(ws, scorer, config.objective)?;
    let mut best = ws.members().to_vec();

    while ws.len() > config.min_size {
        let lowest = lowest_member(ws, scorer, ranks)?;
        ws.remove(lowest)?;
        let value = objective_value(ws, scorer, config.objective)?;
        if value > best_value {
            best_value = value;
            best = ws.members().to_vec();
        }
    }

    debug!(
        "Trimmed to {} members, {} objective {:.6}",
        best.len(),
        config.objective,
        best_value
    );
    Ok(best)
}

/// Value of `objective` for the current members of `ws`, zero when empty
fn objective_value(
    ws: &WorkingSet<'_>,
    scorer: &DivergenceScorer,
    objective: MaxObjective,
) -> Result<f64> {
    if ws.is_empty() {
        return Ok(0.0);
    }
    let total = scorer.set_divergence(ws.aggregate());
    match objective {
        MaxObjective::Total => Ok(total),
        MaxObjective::Mean => Ok(total / ws.len() as f64),
        MaxObjective::MeanDelta => {
            let profiles = ws.profiles();
            let scores = ws
                .members()
                .par_iter()
                .map(|&i| scorer.score(&profiles[i], ws.aggregate()))
                .collect::<Vec<Result<f64>>>()
                .into_iter()
                .collect::<Result<Vec<f64>>>()?;
            Ok(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }
}

/// Non-member with the largest marginal gain; ties go to the lowest rank
fn best_candidate(
    ws: &WorkingSet<'_>,
    scorer: &DivergenceScorer,
    ranks: &[usize],
    exclude: Option<usize>,
) -> Result<Option<(usize, f64)>> {
    let candidates: Vec<(usize, &KmerProfile)> = ws
        .non_members()
        .filter(|&(i, _)| Some(i) != exclude)
        .collect();

    let gains = candidates
        .par_iter()
        .map(|&(i, p)| scorer.marginal(p, ws.aggregate()).map(|gain| (i, gain)))
        .collect::<Vec<Result<(usize, f64)>>>();

    let mut best: Option<(usize, f64)> = None;
    for gain in gains {
        let (i, value) = gain?;
        let better = match best {
            None => true,
            Some((j, current)) => value > current || (value == current && ranks[i] < ranks[j]),
        };
        if better {
            best = Some((i, value));
        }
    }
    Ok(best)
}

/// Member with the smallest score; ties go to the highest rank
fn lowest_member(
    ws: &WorkingSet<'_>,
    scorer: &DivergenceScorer,
    ranks: &[usize],
) -> Result<usize> {
    let profiles = ws.profiles();
    let scores = ws
        .members()
        .par_iter()
        .map(|&i| scorer.score(&profiles[i], ws.aggregate()).map(|score| (i, score)))
        .collect::<Vec<Result<(usize, f64)>>>();

    let mut lowest: Option<(usize, f64)> = None;
    for score in scores {
        let (i, value) = score?;
        let lower = match lowest {
            None => true,
            Some((j, current)) => value < current || (value == current && ranks[i] > ranks[j]),
        };
        if lower {
            lowest = Some((i, value));
        }
    }
    lowest.map(|(i, _)| i).ok_or(DivseqError::EmptyRecords)
}
