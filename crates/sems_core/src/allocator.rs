//! Two-level max-min fair allocation of the station power budget.
//!
//! Every call recomputes the whole station from the configuration and the
//! active sessions: first each charger shares its own ceiling between its
//! sessions, then the charger-level results are reconciled against the grid
//! capacity with the configured [`GridPolicy`].
//!
//! Arithmetic is done in whole watts. Every division rounds down, so charger
//! and grid sums can never exceed their ceilings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tracing::error;

use crate::{AllocationError, Kilowatts, Session, StationConfig};

const WATTS_PER_KW: f64 = 1000.0;
// Keeps sums of a few thousand sessions far away from u64::MAX
const MAX_WATTS: u64 = 1 << 48;

/// Convert kW to whole watts, rounding down.
///
/// The result never converts back to more than `power`:
/// `to_kilowatts(to_watts(p)) <= p` for every finite `p`.
pub fn to_watts(power: Kilowatts) -> u64 {
    if !(power.is_finite() && power > 0.0) {
        return 0;
    }
    // Absorb binary noise such as 133.333 * 1000 = 133332.99999999999
    let mut watts = ((power * WATTS_PER_KW + 1e-6).floor() as u64).min(MAX_WATTS);
    while watts > 0 && to_kilowatts(watts) > power {
        watts -= 1;
    }
    watts
}

pub fn to_kilowatts(watts: u64) -> Kilowatts {
    watts as f64 / WATTS_PER_KW
}

/// Sum kW figures produced by [`to_kilowatts`] without accumulating float error.
pub fn sum_kilowatts(powers: impl IntoIterator<Item = Kilowatts>) -> Kilowatts {
    let watts = powers
        .into_iter()
        .map(|power| (power * WATTS_PER_KW).round().max(0.0) as u64)
        .sum();
    to_kilowatts(watts)
}

/// Max-min fair share of `capacity` between `demands`.
///
/// Demands below the running equal share are served in full and the rest is
/// split evenly between the remaining ones. Results are returned in the order
/// of `demands`.
pub fn max_min_fair_share(demands: &[u64], capacity: u64) -> Vec<u64> {
    let mut order: Vec<usize> = (0..demands.len()).collect();
    order.sort_by_key(|&i| demands[i]);

    let mut shares = vec![0; demands.len()];
    let mut remaining = capacity;
    for (position, &i) in order.iter().enumerate() {
        let unsatisfied = (order.len() - position) as u64;
        let equal_share = remaining / unsatisfied;
        if demands[i] <= equal_share {
            shares[i] = demands[i];
            remaining -= demands[i];
        } else {
            // Everybody left asks for more than the equal share
            for &j in &order[position..] {
                shares[j] = equal_share;
            }
            break;
        }
    }
    shares
}

/// How charger-level allocations are brought back under the grid capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GridPolicy {
    /// Scale every allocation by `grid_capacity / total` when the total exceeds the grid.
    #[default]
    ProportionalScaling,
    /// Run a second max-min pass at the grid level, using the charger-level
    /// allocations as demands.
    MaxMinFair,
}

impl GridPolicy {
    pub fn reconcile(self, allocations: &[u64], grid_capacity: u64) -> Vec<u64> {
        let total: u64 = allocations.iter().sum();
        if total <= grid_capacity {
            return allocations.to_vec();
        }

        match self {
            GridPolicy::ProportionalScaling => allocations
                .iter()
                .map(|&watts| (watts as u128 * grid_capacity as u128 / total as u128) as u64)
                .collect(),
            GridPolicy::MaxMinFair => max_min_fair_share(allocations, grid_capacity),
        }
    }
}

/// Power assigned to each session by one engine run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    watts: BTreeMap<uuid::Uuid, u64>,
}

impl Allocation {
    pub fn len(&self) -> usize {
        self.watts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watts.is_empty()
    }

    pub fn power(&self, session_id: &uuid::Uuid) -> Option<Kilowatts> {
        self.watts.get(session_id).copied().map(to_kilowatts)
    }

    pub fn watts(&self, session_id: &uuid::Uuid) -> Option<u64> {
        self.watts.get(session_id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (uuid::Uuid, Kilowatts)> + '_ {
        self.watts
            .iter()
            .map(|(session_id, &watts)| (*session_id, to_kilowatts(watts)))
    }

    pub fn total_watts(&self) -> u64 {
        self.watts.values().sum()
    }

    pub fn total_power(&self) -> Kilowatts {
        to_kilowatts(self.total_watts())
    }
}

/// A capacity limit, kept both as the kW input and as whole watts.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Ceiling {
    watts: u64,
    power: Kilowatts,
}

impl Ceiling {
    fn new(power: Kilowatts) -> Self {
        Ceiling {
            watts: to_watts(power),
            power,
        }
    }

    fn exceeded_by(&self, watts: u64) -> bool {
        watts > self.watts || to_kilowatts(watts) > self.power
    }
}

#[derive(Debug)]
struct Grant<'a> {
    session_id: uuid::Uuid,
    charger_id: &'a str,
    demand: Ceiling,
    allocated_w: u64,
}

/// A ceiling that [`clamp_and_reconcile`] had to enforce by cutting allocations.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Trim<'a> {
    Vehicle {
        session_id: uuid::Uuid,
        excess_w: u64,
    },
    Charger {
        charger_id: &'a str,
        excess_w: u64,
    },
    Grid {
        excess_w: u64,
    },
}

/// Pure allocation function over a configuration and a session snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocationEngine {
    policy: GridPolicy,
}

impl AllocationEngine {
    pub fn new(policy: GridPolicy) -> Self {
        AllocationEngine { policy }
    }

    pub fn policy(&self) -> GridPolicy {
        self.policy
    }

    /// Compute the allocation of every active session.
    ///
    /// Fails when a session sits on an unknown charger or when the result
    /// breaks a ceiling; nothing is returned in that case.
    pub fn allocate(
        &self,
        config: &StationConfig,
        sessions: &[Session],
    ) -> Result<Allocation, AllocationError> {
        let mut chargers: BTreeMap<&str, Ceiling> = BTreeMap::new();
        let mut grants = Vec::with_capacity(sessions.len());
        for session in sessions.iter().filter(|s| s.is_active()) {
            let charger_id = session.connector_id.charger_id.as_str();
            let Some(charger) = config.charger(charger_id) else {
                return Err(AllocationError::UnknownCharger {
                    session_id: session.session_id,
                    charger_id: charger_id.to_string(),
                });
            };
            chargers.insert(charger_id, Ceiling::new(charger.max_power));
            grants.push(Grant {
                session_id: session.session_id,
                charger_id,
                demand: Ceiling::new(session.vehicle_max_power),
                allocated_w: 0,
            });
        }
        let grid = Ceiling::new(config.grid_capacity);

        // Charger level
        for (charger_id, max_power) in &chargers {
            let mut charger_grants: Vec<&mut Grant> = grants
                .iter_mut()
                .filter(|g| g.charger_id == *charger_id)
                .collect();
            let demands: Vec<u64> = charger_grants.iter().map(|g| g.demand.watts).collect();
            let shares = max_min_fair_share(&demands, max_power.watts);
            for (grant, share) in charger_grants.iter_mut().zip(shares) {
                grant.allocated_w = share;
            }
        }

        // Grid level
        let charger_level: Vec<u64> = grants.iter().map(|g| g.allocated_w).collect();
        let reconciled = self.policy.reconcile(&charger_level, grid.watts);
        for (grant, watts) in grants.iter_mut().zip(reconciled) {
            grant.allocated_w = watts;
        }

        for trim in clamp_and_reconcile(&mut grants, &chargers, grid.watts) {
            match trim {
                Trim::Vehicle {
                    session_id,
                    excess_w,
                } => error!(%session_id, excess_w, "Allocation cut back to the vehicle ceiling"),
                Trim::Charger {
                    charger_id,
                    excess_w,
                } => error!(charger_id, excess_w, "Allocation cut back to the charger ceiling"),
                Trim::Grid { excess_w } => error!(
                    excess_w,
                    grid_capacity_w = grid.watts,
                    "Allocation cut back to the grid capacity"
                ),
            }
        }
        check_invariants(&grants, &chargers, grid)?;

        Ok(Allocation {
            watts: grants
                .iter()
                .map(|g| (g.session_id, g.allocated_w))
                .collect(),
        })
    }
}

/// Remove `total - ceiling` from the largest allocations first and return
/// how much was removed.
fn trim_excess(mut allocations: Vec<&mut u64>, ceiling: u64) -> u64 {
    let total: u64 = allocations.iter().map(|watts| **watts).sum();
    let Some(excess) = total.checked_sub(ceiling).filter(|&excess| excess > 0) else {
        return 0;
    };
    allocations.sort_by(|a, b| b.cmp(a));
    let mut left = excess;
    for watts in allocations {
        let cut = left.min(*watts);
        *watts -= cut;
        left -= cut;
        if left == 0 {
            break;
        }
    }
    excess
}

/// Clamp every grant to its vehicle ceiling, then bring each charger and the
/// grid back under their ceilings. Every cut is reported.
fn clamp_and_reconcile<'a>(
    grants: &mut [Grant<'a>],
    chargers: &BTreeMap<&'a str, Ceiling>,
    grid_capacity: u64,
) -> Vec<Trim<'a>> {
    let mut trims = Vec::new();
    for grant in grants.iter_mut() {
        if grant.allocated_w > grant.demand.watts {
            trims.push(Trim::Vehicle {
                session_id: grant.session_id,
                excess_w: grant.allocated_w - grant.demand.watts,
            });
            grant.allocated_w = grant.demand.watts;
        }
    }
    for (&charger_id, max_power) in chargers {
        let excess_w = trim_excess(
            grants
                .iter_mut()
                .filter(|g| g.charger_id == charger_id)
                .map(|g| &mut g.allocated_w)
                .collect(),
            max_power.watts,
        );
        if excess_w > 0 {
            trims.push(Trim::Charger {
                charger_id,
                excess_w,
            });
        }
    }
    let excess_w = trim_excess(
        grants.iter_mut().map(|g| &mut g.allocated_w).collect(),
        grid_capacity,
    );
    if excess_w > 0 {
        trims.push(Trim::Grid { excess_w });
    }
    trims
}

fn check_invariants(
    grants: &[Grant],
    chargers: &BTreeMap<&str, Ceiling>,
    grid: Ceiling,
) -> Result<(), AllocationError> {
    if let Some(grant) = grants.iter().find(|g| g.demand.exceeded_by(g.allocated_w)) {
        return Err(AllocationError::SessionOverDemand {
            session_id: grant.session_id,
            allocated_w: grant.allocated_w,
            demand_w: grant.demand.watts,
        });
    }

    for (charger_id, max_power) in chargers {
        let allocated_w: u64 = grants
            .iter()
            .filter(|g| g.charger_id == *charger_id)
            .map(|g| g.allocated_w)
            .sum();
        if max_power.exceeded_by(allocated_w) {
            return Err(AllocationError::ChargerOverCapacity {
                charger_id: charger_id.to_string(),
                allocated_w,
                max_power_w: max_power.watts,
            });
        }
    }

    let allocated_w: u64 = grants.iter().map(|g| g.allocated_w).sum();
    if grid.exceeded_by(allocated_w) {
        return Err(AllocationError::GridOverCapacity {
            allocated_w,
            grid_capacity_w: grid.watts,
        });
    }

    Ok(())
}
