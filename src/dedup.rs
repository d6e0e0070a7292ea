//! Duplicate capture rejection.
//!
//! Background triggers can fire more than once for the same physical event.
//! History is small and bounded, so a linear scan is enough.

use crate::config::DedupConfig;
use crate::point::CapturedPoint;

/// Why a candidate was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateReason {
    /// Another entry has the same id.
    SameId {
        /// The clashing id.
        existing_id: u64,
    },
    /// Another entry sits at the same place within the time window.
    NearDuplicate {
        /// The entry the candidate collides with.
        existing_id: u64,
    },
}

/// Parameterized duplicate filter.
#[derive(Debug, Clone, Copy)]
pub struct DedupFilter {
    epsilon_deg: f64,
    window_ms: u64,
}

impl DedupFilter {
    /// Build a filter from explicit parameters.
    #[must_use]
    pub fn new(epsilon_deg: f64, window_ms: u64) -> Self {
        Self {
            epsilon_deg,
            window_ms,
        }
    }

    /// Build a filter from the `[dedup]` config section.
    #[must_use]
    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(
            config.coordinate_epsilon_deg,
            config.window_secs.saturating_mul(1000),
        )
    }

    /// Returns `true` if `candidate` should be kept.
    #[must_use]
    pub fn accept(&self, candidate: &CapturedPoint, recent: &[CapturedPoint]) -> bool {
        self.rejection(candidate, recent).is_none()
    }

    /// First reason `candidate` duplicates an entry of `recent`, if any.
    #[must_use]
    pub fn rejection(
        &self,
        candidate: &CapturedPoint,
        recent: &[CapturedPoint],
    ) -> Option<DuplicateReason> {
        recent.iter().find_map(|existing| {
            if existing.id == candidate.id {
                Some(DuplicateReason::SameId {
                    existing_id: existing.id,
                })
            } else if existing.same_place(candidate, self.epsilon_deg)
                && existing.millis_apart(candidate) <= self.window_ms
            {
                Some(DuplicateReason::NearDuplicate {
                    existing_id: existing.id,
                })
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(id: u64, lat: f64, lng: f64) -> CapturedPoint {
        CapturedPoint {
            id,
            latitude: lat,
            longitude: lng,
            accuracy: 10.0,
            captured_at: id,
            context: None,
        }
    }

    fn filter() -> DedupFilter {
        DedupFilter::from_config(&DedupConfig::default())
    }

    #[test]
    fn empty_history_accepts() {
        assert!(filter().accept(&at(1, 12.9, 77.6), &[]));
    }

    #[test]
    fn same_id_is_rejected_even_far_away() {
        let recent = [at(1_000, 12.9, 77.6)];
        assert_eq!(
            filter().rejection(&at(1_000, 40.0, -3.0), &recent),
            Some(DuplicateReason::SameId { existing_id: 1_000 })
        );
    }

    #[test]
    fn same_place_inside_window_is_rejected() {
        let recent = [at(0, 12.971_600, 77.594_600)];
        let candidate = at(10_000, 12.971_605, 77.594_604);
        assert_eq!(
            filter().rejection(&candidate, &recent),
            Some(DuplicateReason::NearDuplicate { existing_id: 0 })
        );
    }

    #[test]
    fn same_place_outside_window_is_accepted() {
        let recent = [at(0, 12.9716, 77.5946)];
        let candidate = at(300_000, 12.9716, 77.5946);
        assert!(filter().accept(&candidate, &recent));
    }

    #[test]
    fn different_place_inside_window_is_accepted() {
        let recent = [at(0, 12.9716, 77.5946)];
        let candidate = at(5_000, 12.9726, 77.5946);
        assert!(filter().accept(&candidate, &recent));
    }

    #[test]
    fn window_bound_is_inclusive() {
        let f = DedupFilter::new(1e-5, 45_000);
        let recent = [at(0, 1.0, 1.0)];
        assert!(!f.accept(&at(45_000, 1.0, 1.0), &recent));
        assert!(f.accept(&at(45_001, 1.0, 1.0), &recent));
    }
}
