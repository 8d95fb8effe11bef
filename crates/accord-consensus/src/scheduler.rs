use accord_core::{hash_blake3, Hash, PublicKey};
use serde::{Deserialize, Serialize};

use crate::status::ShadowRole;

/// Seed for an epoch's validator selection: hash of the previous epoch's
/// finalized tip and the epoch id. Every honest node recomputes it locally.
pub fn epoch_seed(finalized_tip: Hash, epoch_id: u64) -> Hash {
    let mut data = Vec::with_capacity(40);
    data.extend_from_slice(finalized_tip.as_bytes());
    data.extend_from_slice(&epoch_id.to_le_bytes());
    hash_blake3(&data)
}

/// Approvals required for a commit: ceil(threshold x active set size),
/// clamped into [1, active set size].
pub fn quorum_size(threshold: f64, active_len: usize) -> usize {
    if active_len == 0 {
        return 0;
    }
    let raw = (threshold * active_len as f64).ceil() as usize;
    raw.clamp(1, active_len)
}

/// Running production statistics for one epoch
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EpochStats {
    pub blocks_produced: u64,
    pub total_transactions: u64,
    pub participation_rate: f64,
}

/// The deterministic schedule for one epoch: active subset and coordinator
/// rotation. A pure function of (seed, pool); no communication involved.
#[derive(Debug, Clone)]
pub struct EpochSchedule {
    pub epoch_id: u64,
    pub seed: Hash,
    pub start_slot: u64,
    pub end_slot: u64,
    /// Selected active subset, in selection order
    pub active: Vec<PublicKey>,
    /// The full eligible pool the subset was drawn from
    pub pool: Vec<PublicKey>,
}

impl EpochSchedule {
    /// Select the active subset: score every pool member with
    /// blake3(seed || pubkey), order by (score, pubkey), take the first
    /// `active_set_size`. Deposit size never enters the score, so selection
    /// probability is wealth-independent. A pool smaller than the target
    /// size becomes the active set wholesale.
    pub fn derive(
        seed: Hash,
        pool: &[PublicKey],
        epoch_id: u64,
        epoch_length_slots: u64,
        active_set_size: usize,
    ) -> Self {
        let mut scored: Vec<(Hash, PublicKey)> = pool
            .iter()
            .map(|pk| {
                let mut data = Vec::with_capacity(64);
                data.extend_from_slice(seed.as_bytes());
                data.extend_from_slice(pk.as_bytes());
                (hash_blake3(&data), *pk)
            })
            .collect();
        scored.sort();

        let take = active_set_size.min(scored.len());
        let active: Vec<PublicKey> = scored.into_iter().take(take).map(|(_, pk)| pk).collect();

        let start_slot = epoch_id * epoch_length_slots;
        EpochSchedule {
            epoch_id,
            seed,
            start_slot,
            end_slot: start_slot + epoch_length_slots - 1,
            active,
            pool: pool.to_vec(),
        }
    }

    /// The coordinator for a slot: deterministic rotation over the active set
    pub fn coordinator_for(&self, slot: u64) -> Option<PublicKey> {
        if self.active.is_empty() {
            return None;
        }
        let index = (slot as usize) % self.active.len();
        self.active.get(index).copied()
    }

    pub fn is_slot_coordinator(&self, id: &PublicKey, slot: u64) -> bool {
        self.coordinator_for(slot) == Some(*id)
    }

    /// The standby rank of a validator for a slot, if any. Shadows are the
    /// next validators in rotation order after the coordinator.
    pub fn shadow_rank(&self, id: &PublicKey, slot: u64) -> Option<ShadowRole> {
        let len = self.active.len();
        if len < 2 {
            return None;
        }
        let base = (slot as usize) % len;
        if self.active[(base + 1) % len] == *id {
            return Some(ShadowRole::Shadow1);
        }
        if len >= 3 && self.active[(base + 2) % len] == *id {
            return Some(ShadowRole::Shadow2);
        }
        None
    }

    pub fn contains(&self, id: &PublicKey) -> bool {
        self.active.contains(id)
    }

    pub fn slot_range(&self) -> std::ops::RangeInclusive<u64> {
        self.start_slot..=self.end_slot
    }
}

/// Snapshot of one epoch for status and archival
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochInfo {
    pub id: u64,
    pub start_slot: u64,
    pub end_slot: u64,
    pub active_validators: Vec<PublicKey>,
    pub total_validator_pool: Vec<PublicKey>,
    pub current_slot: u64,
    pub current_coordinator: Option<PublicKey>,
    pub start_time: u64,
    pub end_time: u64,
    pub stats: EpochStats,
}

impl EpochInfo {
    pub fn from_schedule(
        schedule: &EpochSchedule,
        current_slot: u64,
        genesis_time: u64,
        slot_ms: u64,
        stats: EpochStats,
    ) -> Self {
        EpochInfo {
            id: schedule.epoch_id,
            start_slot: schedule.start_slot,
            end_slot: schedule.end_slot,
            active_validators: schedule.active.clone(),
            total_validator_pool: schedule.pool.clone(),
            current_slot,
            current_coordinator: schedule.coordinator_for(current_slot),
            start_time: genesis_time + schedule.start_slot * slot_ms,
            end_time: genesis_time + (schedule.end_slot + 1) * slot_ms,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_core::KeyPair;

    fn pool(n: usize) -> Vec<PublicKey> {
        (0..n).map(|_| KeyPair::generate().public).collect()
    }

    #[test]
    fn test_selection_is_deterministic() {
        let pool = pool(20);
        let seed = epoch_seed(hash_blake3(b"tip"), 4);

        let a = EpochSchedule::derive(seed, &pool, 4, 32, 7);
        let b = EpochSchedule::derive(seed, &pool, 4, 32, 7);
        assert_eq!(a.active, b.active);

        // Coordinator answers reproduce across independent invocations
        for slot in 0..100 {
            assert_eq!(a.coordinator_for(slot), b.coordinator_for(slot));
        }
    }

    #[test]
    fn test_active_set_size_is_min_of_pool_and_target() {
        let seed = epoch_seed(Hash::ZERO, 0);

        let large = pool(20);
        assert_eq!(EpochSchedule::derive(seed, &large, 0, 32, 7).active.len(), 7);

        let small = pool(3);
        let schedule = EpochSchedule::derive(seed, &small, 0, 32, 7);
        assert_eq!(schedule.active.len(), 3);
        // The whole pool is active, rotation still deterministic
        for slot in 0..9 {
            assert_eq!(
                schedule.coordinator_for(slot),
                schedule.coordinator_for(slot + 3)
            );
        }
    }

    #[test]
    fn test_different_seeds_differ() {
        let pool = pool(30);
        let a = EpochSchedule::derive(epoch_seed(hash_blake3(b"a"), 1), &pool, 1, 32, 7);
        let b = EpochSchedule::derive(epoch_seed(hash_blake3(b"b"), 2), &pool, 2, 32, 7);
        // Statistically near-certain with 30 candidates
        assert_ne!(a.active, b.active);
    }

    #[test]
    fn test_rotation_covers_active_set() {
        let pool = pool(7);
        let schedule = EpochSchedule::derive(epoch_seed(Hash::ZERO, 0), &pool, 0, 32, 7);

        let mut seen = std::collections::HashSet::new();
        for slot in 0..7 {
            seen.insert(schedule.coordinator_for(slot).unwrap());
        }
        assert_eq!(seen.len(), 7);
    }

    #[test]
    fn test_shadow_ranks_follow_rotation() {
        let pool = pool(7);
        let schedule = EpochSchedule::derive(epoch_seed(Hash::ZERO, 0), &pool, 0, 32, 7);

        let slot = 3;
        let coordinator = schedule.coordinator_for(slot).unwrap();
        let shadow1 = schedule.active[(3 + 1) % 7];
        let shadow2 = schedule.active[(3 + 2) % 7];

        assert_eq!(schedule.shadow_rank(&coordinator, slot), None);
        assert_eq!(schedule.shadow_rank(&shadow1, slot), Some(ShadowRole::Shadow1));
        assert_eq!(schedule.shadow_rank(&shadow2, slot), Some(ShadowRole::Shadow2));
    }

    #[test]
    fn test_quorum_size_rounding() {
        // The documented property: 0.67 x 7 requires 5 approvals
        assert_eq!(quorum_size(0.67, 7), 5);
        assert_eq!(quorum_size(0.67, 4), 3);
        assert_eq!(quorum_size(0.67, 3), 3);
        assert_eq!(quorum_size(0.67, 1), 1);
        assert_eq!(quorum_size(1.0, 7), 7);
        // Never exceeds the set, never reaches zero for a non-empty set
        assert_eq!(quorum_size(0.01, 7), 1);
        assert_eq!(quorum_size(0.0, 0), 0);
    }

    #[test]
    fn test_epoch_seed_depends_on_tip_and_epoch() {
        let tip = hash_blake3(b"tip");
        assert_ne!(epoch_seed(tip, 1), epoch_seed(tip, 2));
        assert_ne!(epoch_seed(tip, 1), epoch_seed(hash_blake3(b"other"), 1));
        assert_eq!(epoch_seed(tip, 1), epoch_seed(tip, 1));
    }
}
