//! Gate/drain pools and the pairing list.

use crate::bench::output::{Assignment, OutputId, Role};
use crate::error::{BenchError, BenchResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An ordered `(gate, drain)` association, activated and deactivated as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pairing {
    /// Gate output
    pub gate: OutputId,
    /// Drain output
    pub drain: OutputId,
}

impl Pairing {
    /// Build a pairing.
    pub fn new(gate: OutputId, drain: OutputId) -> Self {
        Self { gate, drain }
    }
}

impl fmt::Display for Pairing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.gate, self.drain)
    }
}

/// A pairing plus whether its last ramp left it powered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingStatus {
    /// The pairing
    pub pairing: Pairing,
    /// Last completed ramp was an activation
    pub active: bool,
}

/// Candidate pools seeded from the static assignments, plus the pairing list.
///
/// An output is either in its pool or in exactly one pairing, never both.
#[derive(Debug, Clone, Default)]
pub struct PairingPool {
    seed_gates: Vec<OutputId>,
    seed_drains: Vec<OutputId>,
    gates: Vec<OutputId>,
    drains: Vec<OutputId>,
    pairings: Vec<PairingStatus>,
}

impl PairingPool {
    /// Seed the pools from assignments. Unassigned outputs are not pairable.
    pub fn from_assignments(assignments: &[Assignment]) -> BenchResult<Self> {
        let mut pool = Self::default();
        for assignment in assignments {
            let id = assignment.output_id()?;
            let seed = match assignment.role {
                Role::Gate => &mut pool.seed_gates,
                Role::Drain => &mut pool.seed_drains,
                Role::Unassigned => continue,
            };
            if !seed.contains(&id) {
                seed.push(id);
            }
        }
        pool.gates = pool.seed_gates.clone();
        pool.drains = pool.seed_drains.clone();
        Ok(pool)
    }

    /// Gates not currently paired, in declaration order.
    pub fn available_gates(&self) -> &[OutputId] {
        &self.gates
    }

    /// Drains not currently paired, in declaration order.
    pub fn available_drains(&self) -> &[OutputId] {
        &self.drains
    }

    /// Pairings in creation order.
    pub fn pairings(&self) -> &[PairingStatus] {
        &self.pairings
    }

    /// Whether `pairing` is in the list.
    pub fn contains(&self, pairing: &Pairing) -> bool {
        self.position(pairing).is_some()
    }

    fn position(&self, pairing: &Pairing) -> Option<usize> {
        self.pairings.iter().position(|p| &p.pairing == pairing)
    }

    /// Pair an available gate with an available drain.
    pub fn pair(&mut self, gate: &OutputId, drain: &OutputId) -> BenchResult<Pairing> {
        let pairing = Pairing::new(gate.clone(), drain.clone());
        if self.contains(&pairing) {
            return Err(BenchError::DuplicatePairing {
                gate: gate.to_string(),
                drain: drain.to_string(),
            });
        }
        let gate_idx = self.gates.iter().position(|g| g == gate).ok_or_else(|| {
            BenchError::InvalidSelection(format!("{gate} is not an available gate"))
        })?;
        let drain_idx = self.drains.iter().position(|d| d == drain).ok_or_else(|| {
            BenchError::InvalidSelection(format!("{drain} is not an available drain"))
        })?;

        self.gates.remove(gate_idx);
        self.drains.remove(drain_idx);
        self.pairings.push(PairingStatus {
            pairing: pairing.clone(),
            active: false,
        });
        Ok(pairing)
    }

    /// Dissolve a pairing and return both outputs to their pools.
    pub fn unpair(&mut self, pairing: &Pairing) -> BenchResult<()> {
        let idx = self
            .position(pairing)
            .ok_or_else(|| BenchError::NotFound(format!("pairing {pairing}")))?;
        self.pairings.remove(idx);
        restore(&mut self.gates, &self.seed_gates, &pairing.gate);
        restore(&mut self.drains, &self.seed_drains, &pairing.drain);
        Ok(())
    }

    /// Record whether a pairing is powered.
    pub fn set_active(&mut self, pairing: &Pairing, active: bool) {
        if let Some(idx) = self.position(pairing) {
            self.pairings[idx].active = active;
        }
    }
}

/// Put `id` back into `pool`, keeping seed order.
fn restore(pool: &mut Vec<OutputId>, seed: &[OutputId], id: &OutputId) {
    if pool.contains(id) {
        return;
    }
    pool.push(id.clone());
    pool.sort_by_key(|o| seed.iter().position(|s| s == o).unwrap_or(usize::MAX));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(supply: &str, output: &str, role: Role) -> Assignment {
        Assignment {
            supply: supply.into(),
            output: output.into(),
            role,
        }
    }

    fn pool() -> PairingPool {
        PairingPool::from_assignments(&[
            assignment("PS1", "Output1", Role::Gate),
            assignment("PS1", "Output2", Role::Gate),
            assignment("PS2", "Output1", Role::Unassigned),
            assignment("PS2", "Output2", Role::Drain),
            assignment("PS4", "Output1", Role::Drain),
        ])
        .unwrap()
    }

    #[test]
    fn seeds_by_role() {
        let pool = pool();
        assert_eq!(
            pool.available_gates(),
            &[OutputId::new("PS1", 1), OutputId::new("PS1", 2)]
        );
        assert_eq!(
            pool.available_drains(),
            &[OutputId::new("PS2", 2), OutputId::new("PS4", 1)]
        );
        assert!(pool.pairings().is_empty());
    }

    #[test]
    fn pair_unpair_round_trip_restores_order() {
        let mut pool = pool();
        let before = pool.clone();
        let pairing = pool
            .pair(&OutputId::new("PS1", 1), &OutputId::new("PS2", 2))
            .unwrap();

        assert_eq!(pool.available_gates(), &[OutputId::new("PS1", 2)]);
        assert_eq!(pool.available_drains(), &[OutputId::new("PS4", 1)]);
        assert_eq!(pool.pairings().len(), 1);

        pool.unpair(&pairing).unwrap();
        assert_eq!(pool.available_gates(), before.available_gates());
        assert_eq!(pool.available_drains(), before.available_drains());
        assert!(pool.pairings().is_empty());
    }

    #[test]
    fn rejects_unavailable_and_duplicate() {
        let mut pool = pool();
        let gate = OutputId::new("PS1", 1);
        let drain = OutputId::new("PS2", 2);
        pool.pair(&gate, &drain).unwrap();

        assert!(matches!(
            pool.pair(&gate, &drain),
            Err(BenchError::DuplicatePairing { .. })
        ));
        assert!(matches!(
            pool.pair(&gate, &OutputId::new("PS4", 1)),
            Err(BenchError::InvalidSelection(_))
        ));
        // unassigned outputs are never selectable
        assert!(matches!(
            pool.pair(&OutputId::new("PS1", 2), &OutputId::new("PS2", 1)),
            Err(BenchError::InvalidSelection(_))
        ));
        // a drain used as a gate
        assert!(matches!(
            pool.pair(&OutputId::new("PS4", 1), &OutputId::new("PS4", 1)),
            Err(BenchError::InvalidSelection(_))
        ));
        assert_eq!(pool.pairings().len(), 1);
    }

    #[test]
    fn unpair_unknown_is_not_found() {
        let mut pool = pool();
        let ghost = Pairing::new(OutputId::new("PS1", 1), OutputId::new("PS2", 2));
        assert!(matches!(pool.unpair(&ghost), Err(BenchError::NotFound(_))));
    }

    #[test]
    fn active_flag_tracks_pairing() {
        let mut pool = pool();
        let pairing = pool
            .pair(&OutputId::new("PS1", 2), &OutputId::new("PS4", 1))
            .unwrap();
        pool.set_active(&pairing, true);
        assert!(pool.pairings()[0].active);
        assert_eq!(pairing.to_string(), "PS1 Output2 -> PS4 Output1");
    }
}
