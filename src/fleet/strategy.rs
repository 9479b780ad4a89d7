//! Server selection strategies
//!
//! Each strategy is a pure function over a non-empty candidate slice. The
//! candidate order is meaningful: least-loaded and fastest resolve ties in
//! favor of the first candidate, and geo resolves equal region priorities in
//! favor of the first region seen.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::server::Server;
use crate::error::FleetError;

/// How the router picks one server among the healthy candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    LeastLoaded,
    Fastest,
    Geo,
    Weighted,
}

impl LoadBalancingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalancingStrategy::RoundRobin => "round-robin",
            LoadBalancingStrategy::LeastLoaded => "least-loaded",
            LoadBalancingStrategy::Fastest => "fastest",
            LoadBalancingStrategy::Geo => "geo",
            LoadBalancingStrategy::Weighted => "weighted",
        }
    }
}

impl fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadBalancingStrategy {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round-robin" => Ok(LoadBalancingStrategy::RoundRobin),
            "least-loaded" => Ok(LoadBalancingStrategy::LeastLoaded),
            "fastest" => Ok(LoadBalancingStrategy::Fastest),
            "geo" => Ok(LoadBalancingStrategy::Geo),
            "weighted" => Ok(LoadBalancingStrategy::Weighted),
            other => Err(FleetError::Invalid(
                "load balancing strategy",
                other.to_string(),
            )),
        }
    }
}

/// Cyclic pick; the cursor persists across calls
pub fn select_round_robin<'a>(candidates: &[&'a Server], cursor: &AtomicUsize) -> Option<&'a Server> {
    if candidates.is_empty() {
        return None;
    }
    let index = cursor.fetch_add(1, Ordering::Relaxed);
    candidates.get(index % candidates.len()).copied()
}

/// Lowest `load * 100 / capacity`; zero-capacity servers rank last
pub fn select_least_loaded<'a>(candidates: &[&'a Server]) -> Option<&'a Server> {
    candidates
        .iter()
        .copied()
        .min_by_key(|s| s.utilization().unwrap_or(u64::MAX))
}

/// Lowest observed response time
pub fn select_fastest<'a>(candidates: &[&'a Server]) -> Option<&'a Server> {
    candidates.iter().copied().min_by_key(|s| s.response_time)
}

/// Uniform pick inside the best-priority region present among the candidates.
///
/// `priority_of` maps a region name to its priority; unknown regions rank last.
pub fn select_geo<'a, R: Rng + ?Sized>(
    candidates: &[&'a Server],
    priority_of: impl Fn(&str) -> i32,
    rng: &mut R,
) -> Option<&'a Server> {
    let best_region = &candidates
        .iter()
        .min_by_key(|s| priority_of(&s.region))?
        .region;

    let pool: Vec<&'a Server> = candidates
        .iter()
        .copied()
        .filter(|s| &s.region == best_region)
        .collect();

    pool.choose(rng).copied()
}

/// Random pick proportional to weight; uniform when every weight is zero
pub fn select_weighted<'a, R: Rng + ?Sized>(
    candidates: &[&'a Server],
    rng: &mut R,
) -> Option<&'a Server> {
    let total: u64 = candidates.iter().map(|s| s.weight as u64).sum();
    if total == 0 {
        return candidates.choose(rng).copied();
    }

    let mut target = rng.gen_range(0..total);
    for &server in candidates {
        let weight = server.weight as u64;
        if target < weight {
            return Some(server);
        }
        target -= weight;
    }

    candidates.first().copied()
}
