//! Pluggable attribution policy (§4.3). The only concrete policy in scope
//! is [`InterleavePolicy`]; `Policy` is a trait so alternative placement
//! strategies can be added without touching the attribution engine.

#![forbid(unsafe_code)]

use cxlmem_model::PebsSample;

/// Decides, given one epoch's PEBS sample (if any), how a miss should be
/// split across the `num_of_region` emulated regions.
///
/// Implementations must return weights summing to `1.0` (within floating
/// point tolerance) ordered by ascending region id — callers rely on this
/// for a stable, reproducible attribution order.
pub trait Policy {
    fn distribute(&self, num_of_region: usize, pebs: Option<&PebsSample>) -> Vec<(u32, f64)>;
}

/// Splits misses evenly across regions unless a PEBS sample with a non-zero
/// total is available, in which case each region gets the fraction of
/// samples whose address fell inside it.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterleavePolicy;

impl Policy for InterleavePolicy {
    fn distribute(&self, num_of_region: usize, pebs: Option<&PebsSample>) -> Vec<(u32, f64)> {
        let equal_split = || {
            let w = 1.0 / num_of_region as f64;
            (0..num_of_region).map(|i| (i as u32, w)).collect()
        };

        match pebs {
            Some(p) if p.total > 0 => p
                .sample
                .iter()
                .enumerate()
                .map(|(i, &s)| (i as u32, s as f64 / p.total as f64))
                .collect(),
            _ => equal_split(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(weights: &[(u32, f64)]) -> f64 {
        weights.iter().map(|(_, w)| w).sum()
    }

    #[test]
    fn no_pebs_splits_evenly() {
        let p = InterleavePolicy;
        let w = p.distribute(4, None);
        assert_eq!(w.len(), 4);
        assert!((sum(&w) - 1.0).abs() < 1e-9);
        assert!(w.iter().all(|(_, x)| (*x - 0.25).abs() < 1e-9));
    }

    #[test]
    fn pebs_zero_total_falls_back_to_equal_split() {
        let p = InterleavePolicy;
        let pebs = PebsSample {
            total: 0,
            llcmiss: 0,
            sample: vec![0, 0],
        };
        let w = p.distribute(2, Some(&pebs));
        assert!((sum(&w) - 1.0).abs() < 1e-9);
        assert_eq!(w, vec![(0, 0.5), (1, 0.5)]);
    }

    #[test]
    fn pebs_with_total_weighs_by_sample_share() {
        let p = InterleavePolicy;
        let pebs = PebsSample {
            total: 100,
            llcmiss: 0,
            sample: vec![75, 25],
        };
        let w = p.distribute(2, Some(&pebs));
        assert!((sum(&w) - 1.0).abs() < 1e-9);
        assert_eq!(w, vec![(0, 0.75), (1, 0.25)]);
    }

    #[test]
    fn weights_are_ordered_by_ascending_region_id() {
        let p = InterleavePolicy;
        let pebs = PebsSample {
            total: 10,
            llcmiss: 0,
            sample: vec![1, 2, 3, 4],
        };
        let w = p.distribute(4, Some(&pebs));
        let ids: Vec<u32> = w.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }
}
