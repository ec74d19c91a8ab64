// Circuit Building — Selecting the relay path for one send
//
// A circuit is always exactly three distinct relays: entry, middle, exit.
// Relays are drawn uniformly at random without replacement; the draw
// order is the hop order.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::directory::RelayRecord;

/// Number of relays in every circuit
pub const HOP_COUNT: usize = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CircuitError {
    #[error("Not enough relays for a circuit: {available} known, 3 required")]
    InsufficientRelays { available: usize },
    #[error("Duplicate relay {0} in path")]
    DuplicateRelay(u32),
}

/// Ordered relay path: `hops[0]` is the entry hop, `hops[2]` the exit.
///
/// Serialized as a bare array of hops; deserializing goes through
/// [`Circuit::from_hops`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "[RelayRecord; HOP_COUNT]",
    into = "[RelayRecord; HOP_COUNT]"
)]
pub struct Circuit {
    hops: [RelayRecord; HOP_COUNT],
}

impl Circuit {
    /// Build a circuit from an explicit path, rejecting repeated relays.
    pub fn from_hops(hops: [RelayRecord; HOP_COUNT]) -> Result<Self, CircuitError> {
        for (i, hop) in hops.iter().enumerate() {
            if hops[..i].iter().any(|earlier| earlier.id == hop.id) {
                return Err(CircuitError::DuplicateRelay(hop.id));
            }
        }
        Ok(Self { hops })
    }

    pub fn hops(&self) -> &[RelayRecord] {
        &self.hops
    }

    pub fn entry(&self) -> &RelayRecord {
        &self.hops[0]
    }

    pub fn exit(&self) -> &RelayRecord {
        &self.hops[HOP_COUNT - 1]
    }

    /// Relay ids in hop order
    pub fn relay_ids(&self) -> Vec<u32> {
        self.hops.iter().map(|hop| hop.id).collect()
    }
}

impl TryFrom<[RelayRecord; HOP_COUNT]> for Circuit {
    type Error = CircuitError;

    fn try_from(hops: [RelayRecord; HOP_COUNT]) -> Result<Self, Self::Error> {
        Self::from_hops(hops)
    }
}

impl From<Circuit> for [RelayRecord; HOP_COUNT] {
    fn from(circuit: Circuit) -> Self {
        circuit.hops
    }
}

/// Pick a random three-hop circuit from a directory snapshot.
pub fn select_circuit(relays: &[RelayRecord]) -> Result<Circuit, CircuitError> {
    select_circuit_with_rng(relays, &mut rand::thread_rng())
}

/// [`select_circuit`] with a caller-provided RNG
pub fn select_circuit_with_rng<R: Rng + ?Sized>(
    relays: &[RelayRecord],
    rng: &mut R,
) -> Result<Circuit, CircuitError> {
    let candidates = distinct_relays(relays);
    if candidates.len() < HOP_COUNT {
        return Err(CircuitError::InsufficientRelays {
            available: candidates.len(),
        });
    }

    let mut chosen = candidates.choose_multiple(rng, HOP_COUNT).cloned();
    match (chosen.next(), chosen.next(), chosen.next()) {
        (Some(entry), Some(middle), Some(exit)) => Circuit::from_hops([entry, middle, exit]),
        _ => Err(CircuitError::InsufficientRelays {
            available: candidates.len(),
        }),
    }
}

/// One candidate per relay id. A relay that registered more than once is
/// represented by its latest registration.
fn distinct_relays(relays: &[RelayRecord]) -> Vec<RelayRecord> {
    let mut latest: HashMap<u32, usize> = HashMap::new();
    for (index, relay) in relays.iter().enumerate() {
        latest.insert(relay.id, index);
    }

    relays
        .iter()
        .enumerate()
        .filter(|(index, relay)| latest.get(&relay.id) == Some(index))
        .map(|(_, relay)| relay.clone())
        .collect()
}
