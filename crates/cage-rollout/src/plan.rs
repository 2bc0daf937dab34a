//! Batch planning — pure arithmetic over the rollout counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Smallest k such that 2^0 + 2^1 + ... + 2^(k−1) ≥ `original`, i.e.
/// the number of exponentially growing batches needed to replace
/// `original` tasks.
pub fn estimate_roll_out_count(original: u64) -> u32 {
    let mut k = 0u32;
    while pow2(k) - 1 < original {
        k += 1;
    }
    k
}

/// Size of the next batch: doubles every round, clipped so the total
/// never exceeds `original`.
pub fn batch_size(roll_out_count: u32, replaced: u64, original: u64) -> u64 {
    pow2(roll_out_count).min(original.saturating_sub(replaced))
}

fn pow2(exp: u32) -> u64 {
    1u64.checked_shl(exp).unwrap_or(u64::MAX)
}

/// Mutable rollout counters, owned exclusively by the driver.
///
/// `replaced` is atomic because a batch's workers bump it concurrently;
/// `roll_out_count` is only touched by the driver task after a batch
/// has joined.
#[derive(Debug)]
pub struct RolloutState {
    /// Running count of the current service, snapshotted once after the
    /// next service reached STABLE. The size rollback restores.
    pub original_running_count: u64,
    pub estimated_roll_out_count: u32,
    pub replaced: AtomicU64,
    pub roll_out_count: u32,
}

impl RolloutState {
    pub fn new(original_running_count: u64) -> Self {
        Self {
            original_running_count,
            estimated_roll_out_count: estimate_roll_out_count(original_running_count),
            replaced: AtomicU64::new(0),
            roll_out_count: 0,
        }
    }

    pub fn replaced_count(&self) -> u64 {
        self.replaced.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_known_values() {
        assert_eq!(estimate_roll_out_count(1), 1);
        assert_eq!(estimate_roll_out_count(2), 2);
        assert_eq!(estimate_roll_out_count(10), 4);
    }

    #[test]
    fn estimate_boundaries() {
        assert_eq!(estimate_roll_out_count(0), 0);
        // 2^k − 1 boundaries: 1, 3, 7, 15.
        assert_eq!(estimate_roll_out_count(3), 2);
        assert_eq!(estimate_roll_out_count(4), 3);
        assert_eq!(estimate_roll_out_count(7), 3);
        assert_eq!(estimate_roll_out_count(8), 4);
        assert_eq!(estimate_roll_out_count(15), 4);
    }

    #[test]
    fn estimate_is_the_unique_exponent() {
        for n in 0..500u64 {
            let k = estimate_roll_out_count(n);
            assert!(pow2(k) - 1 >= n, "n={n} k={k}");
            if k > 0 {
                assert!(pow2(k - 1) - 1 < n, "n={n} k={k}");
            }
        }
    }

    #[test]
    fn batch_size_known_values() {
        assert_eq!(batch_size(0, 0, 4), 1);
        assert_eq!(batch_size(1, 1, 6), 2);
        assert_eq!(batch_size(2, 6, 15), 4);
        assert_eq!(batch_size(3, 14, 15), 1);
    }

    #[test]
    fn batch_size_never_over_replaces() {
        for roll_out_count in 0..8u32 {
            for original in 0..40u64 {
                for replaced in 0..=original {
                    let size = batch_size(roll_out_count, replaced, original);
                    assert!(size <= original - replaced);
                    assert!(size <= pow2(roll_out_count));
                }
            }
        }
    }

    #[test]
    fn state_derives_estimate_from_snapshot() {
        let state = RolloutState::new(10);
        assert_eq!(state.estimated_roll_out_count, 4);
        assert_eq!(state.replaced_count(), 0);
        assert_eq!(state.roll_out_count, 0);
    }
}
