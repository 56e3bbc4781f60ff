//! Mutable candidate subset with an incrementally maintained aggregate

use crate::error::{DivseqError, Result};
use crate::kmer::KmerVector;
use crate::profile::KmerProfile;
use tracing::debug;

/// Sum of member vectors, squared vectors and entropies
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub sum: KmerVector,
    pub sum_sq: KmerVector,
    pub entropy_sum: f64,
    pub size: usize,
}

impl Aggregate {
    pub fn new(len: usize) -> Self {
        Self {
            sum: KmerVector::zeros(len),
            sum_sq: KmerVector::zeros(len),
            entropy_sum: 0.0,
            size: 0,
        }
    }

    /// Aggregate of every profile yielded by `profiles`
    pub fn from_profiles<'a, I>(profiles: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a KmerProfile>,
    {
        let mut profiles = profiles.into_iter().peekable();
        let len = profiles.peek().map_or(0, |p| p.freqs.len());
        let mut aggregate = Self::new(len);
        for profile in profiles {
            aggregate.add(profile)?;
        }
        Ok(aggregate)
    }

    pub fn add(&mut self, profile: &KmerProfile) -> Result<()> {
        self.sum.add(&profile.freqs)?;
        self.sum_sq.add(&profile.squares)?;
        self.entropy_sum += profile.entropy;
        self.size += 1;
        Ok(())
    }

    pub fn remove(&mut self, profile: &KmerProfile) -> Result<()> {
        if self.size == 0 {
            return Err(DivseqError::EmptyAggregate);
        }
        self.sum.remove(&profile.freqs)?;
        self.sum_sq.remove(&profile.squares)?;
        self.entropy_sum -= profile.entropy;
        self.size -= 1;
        Ok(())
    }

    /// Mean frequency vector, zero for an empty aggregate
    pub fn mean(&self) -> KmerVector {
        if self.size == 0 {
            return KmerVector::zeros(self.sum.len());
        }
        KmerVector(&self.sum.0 / self.size as f64)
    }

    /// Largest deviation from `other` over every summed quantity
    pub fn max_abs_diff(&self, other: &Aggregate) -> f64 {
        self.sum
            .max_abs_diff(&other.sum)
            .max(self.sum_sq.max_abs_diff(&other.sum_sq))
            .max((self.entropy_sum - other.entropy_sum).abs())
    }
}

/// Members of the subset under construction, indexing into a profile slice
#[derive(Debug, Clone)]
pub struct WorkingSet<'a> {
    profiles: &'a [KmerProfile],
    members: Vec<usize>,
    is_member: Vec<bool>,
    aggregate: Aggregate,
    updates: usize,
    resync_every: usize,
}

impl<'a> WorkingSet<'a> {
    /// Empty set; the aggregate is rebuilt from scratch every `resync_every`
    /// updates (0 disables re-syncing)
    pub fn new(profiles: &'a [KmerProfile], resync_every: usize) -> Self {
        let len = profiles.first().map_or(0, |p| p.freqs.len());
        Self {
            profiles,
            members: Vec::new(),
            is_member: vec![false; profiles.len()],
            aggregate: Aggregate::new(len),
            updates: 0,
            resync_every,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.is_member.get(index).copied().unwrap_or(false)
    }

    /// Member indices in admission order
    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    pub fn profiles(&self) -> &'a [KmerProfile] {
        self.profiles
    }

    /// Positions and profiles not currently in the set
    pub fn non_members(&self) -> impl Iterator<Item = (usize, &'a KmerProfile)> + '_ {
        let profiles = self.profiles;
        profiles
            .iter()
            .enumerate()
            .filter(move |(i, _)| !self.is_member[*i])
    }

    pub fn insert(&mut self, index: usize) -> Result<()> {
        let profile = self.profile(index)?;
        if self.is_member[index] {
            return Ok(());
        }
        self.aggregate.add(profile)?;
        self.members.push(index);
        self.is_member[index] = true;
        self.updated()
    }

    pub fn remove(&mut self, index: usize) -> Result<()> {
        let profile = self.profile(index)?;
        if !self.is_member[index] {
            return Ok(());
        }
        self.aggregate.remove(profile)?;
        self.members.retain(|&m| m != index);
        self.is_member[index] = false;
        self.updated()
    }

    /// Rebuild the aggregate from the current members
    pub fn resync(&mut self) -> Result<()> {
        let profiles = self.profiles;
        self.aggregate = Aggregate::from_profiles(self.members.iter().map(|&i| &profiles[i]))?;
        if self.aggregate.size == 0 {
            self.aggregate = Aggregate::new(profiles.first().map_or(0, |p| p.freqs.len()));
        }
        self.updates = 0;
        Ok(())
    }

    fn profile(&self, index: usize) -> Result<&'a KmerProfile> {
        self.profiles
            .get(index)
            .ok_or(DivseqError::IndexOutOfBounds {
                index,
                len: self.profiles.len(),
            })
    }

    fn updated(&mut self) -> Result<()> {
        self.updates += 1;
        if self.resync_every > 0 && self.updates >= self.resync_every {
            debug!("Re-syncing aggregate of {} members", self.members.len());
            self.resync()?;
        }
        Ok(())
    }
}
