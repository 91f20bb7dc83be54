//! Eviction policy.
//!
//! Deciding what to remove is a pure function over a ledger snapshot and an
//! injected "now"; applying the removal is the ledger's single atomic
//! write. Two rules, in order, against the user's ordered list:
//!
//! 1. count cap: over `max_sets_per_category`, oldest first
//! 2. age cap: `assigned_at` strictly before `now - max_age_months`
//!    (whole calendar months, day clamped)

use serde::{Deserialize, Serialize};

use crate::core::{CoreError, InvalidRecord, SetId, WallClock};

/// Runtime-mutable eviction knobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionParams {
    max_sets_per_category: usize,
    max_age_months: u32,
}

impl EvictionParams {
    pub const DEFAULT_MAX_SETS: usize = 10;
    pub const DEFAULT_MAX_AGE_MONTHS: u32 = 2;

    pub fn new(max_sets_per_category: usize, max_age_months: u32) -> Result<Self, CoreError> {
        if max_sets_per_category == 0 {
            return Err(InvalidRecord {
                reason: "max_sets_per_category must be positive".into(),
            }
            .into());
        }
        if max_age_months == 0 {
            return Err(InvalidRecord {
                reason: "max_age_months must be positive".into(),
            }
            .into());
        }
        Ok(Self {
            max_sets_per_category,
            max_age_months,
        })
    }

    pub fn max_sets_per_category(&self) -> usize {
        self.max_sets_per_category
    }

    pub fn max_age_months(&self) -> u32 {
        self.max_age_months
    }

    /// The age horizon: entries assigned strictly before this are expired.
    pub fn horizon(&self, now: WallClock) -> WallClock {
        now.months_earlier(self.max_age_months)
    }
}

impl Default for EvictionParams {
    fn default() -> Self {
        Self {
            max_sets_per_category: Self::DEFAULT_MAX_SETS,
            max_age_months: Self::DEFAULT_MAX_AGE_MONTHS,
        }
    }
}

/// Why a set-id was dropped. Tags surface in eviction reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvictReason {
    ExceededCap,
    AgeExpired,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedEviction {
    pub set_id: SetId,
    pub reason: EvictReason,
}

/// What to remove, in list order. Never adds; deterministic for a given
/// snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionPlan {
    pub remove: Vec<PlannedEviction>,
}

impl EvictionPlan {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty()
    }

    pub fn len(&self) -> usize {
        self.remove.len()
    }

    pub fn set_ids(&self) -> Vec<SetId> {
        self.remove.iter().map(|p| p.set_id.clone()).collect()
    }
}

/// Plan evictions for one (user, category) snapshot.
///
/// `entries` is the ordered list with reconciled timestamps, oldest first.
pub fn plan(entries: &[(SetId, WallClock)], params: &EvictionParams, now: WallClock) -> EvictionPlan {
    let horizon = params.horizon(now);
    let over_cap = entries
        .len()
        .saturating_sub(params.max_sets_per_category());

    let mut remove = Vec::new();
    for (index, (set_id, assigned_at)) in entries.iter().enumerate() {
        if index < over_cap {
            remove.push(PlannedEviction {
                set_id: set_id.clone(),
                reason: EvictReason::ExceededCap,
            });
        } else if *assigned_at < horizon {
            remove.push(PlannedEviction {
                set_id: set_id.clone(),
                reason: EvictReason::AgeExpired,
            });
        }
    }
    EvictionPlan { remove }
}

/// Count-cap-only plan that reserves room for one incoming assignment.
///
/// Used by the allocator at append time so a user holding exactly the cap
/// drops exactly their oldest; no-op when nothing will be appended.
pub fn plan_for_incoming(entries: &[(SetId, WallClock)], params: &EvictionParams) -> EvictionPlan {
    let over = (entries.len() + 1).saturating_sub(params.max_sets_per_category());
    let remove = entries
        .iter()
        .take(over)
        .map(|(set_id, _)| PlannedEviction {
            set_id: set_id.clone(),
            reason: EvictReason::ExceededCap,
        })
        .collect();
    EvictionPlan { remove }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use crate::core::WallClockSource;

    const MONTH_MS: u64 = 31 * 24 * 60 * 60 * 1000;

    fn set(s: &str) -> SetId {
        SetId::parse(s).unwrap()
    }

    fn entry(s: &str, at: u64) -> (SetId, WallClock) {
        (set(s), WallClock(at))
    }

    fn params(max_sets: usize, max_age_months: u32) -> EvictionParams {
        EvictionParams::new(max_sets, max_age_months).unwrap()
    }

    #[test]
    fn rejects_non_positive_params() {
        assert!(EvictionParams::new(0, 2).is_err());
        assert!(EvictionParams::new(10, 0).is_err());
    }

    #[test]
    fn under_cap_and_fresh_removes_nothing() {
        let now = ManualClock::at(10 * MONTH_MS).now();
        let entries = vec![entry("s1", now.0 - 1000), entry("s2", now.0 - 500)];
        assert!(plan(&entries, &params(3, 2), now).is_empty());
    }

    #[test]
    fn count_cap_drops_oldest_first() {
        let now = WallClock(10 * MONTH_MS);
        let entries = vec![
            entry("s1", now.0 - 40),
            entry("s2", now.0 - 30),
            entry("s3", now.0 - 20),
            entry("s4", now.0 - 10),
            entry("s5", now.0 - 5),
        ];
        let plan = plan(&entries, &params(3, 2), now);
        assert_eq!(plan.set_ids(), vec![set("s1"), set("s2")]);
        assert!(plan.remove.iter().all(|p| p.reason == EvictReason::ExceededCap));
    }

    #[test]
    fn age_cap_marks_expired_entries() {
        // now = 2026-07-15; horizon at 2 months = 2026-05-15.
        let now = WallClock(1_784_118_600_000); // 2026-07-15T12:30:00Z
        let expired = now.months_earlier(3);
        let fresh = WallClock(now.0 - 7 * 24 * 60 * 60 * 1000);
        let entries = vec![
            (set("x"), expired),
            (set("y"), expired),
            (set("z"), fresh),
        ];
        let plan = plan(&entries, &params(10, 2), now);
        assert_eq!(plan.set_ids(), vec![set("x"), set("y")]);
        assert!(plan.remove.iter().all(|p| p.reason == EvictReason::AgeExpired));
    }

    #[test]
    fn entry_exactly_at_horizon_survives() {
        let now = WallClock(1_784_118_600_000);
        let horizon = params(10, 2).horizon(now);
        let entries = vec![(set("edge"), horizon), (set("older"), WallClock(horizon.0 - 1))];
        let plan = plan(&entries, &params(10, 2), now);
        assert_eq!(plan.set_ids(), vec![set("older")]);
    }

    #[test]
    fn count_cap_takes_precedence_over_age() {
        let now = WallClock(1_784_118_600_000);
        let expired = now.months_earlier(3);
        // Four entries, cap of two: first two go for cap, third for age.
        let entries = vec![
            (set("a"), expired),
            (set("b"), expired),
            (set("c"), expired),
            (set("d"), WallClock(now.0 - 100)),
        ];
        let plan = plan(&entries, &params(2, 2), now);
        assert_eq!(
            plan.remove,
            vec![
                PlannedEviction {
                    set_id: set("a"),
                    reason: EvictReason::ExceededCap
                },
                PlannedEviction {
                    set_id: set("b"),
                    reason: EvictReason::ExceededCap
                },
                PlannedEviction {
                    set_id: set("c"),
                    reason: EvictReason::AgeExpired
                },
            ]
        );
    }

    #[test]
    fn incoming_plan_makes_room_at_exact_cap() {
        let now = WallClock(10 * MONTH_MS);
        let entries = vec![
            entry("a", now.0 - 30),
            entry("b", now.0 - 20),
            entry("c", now.0 - 10),
        ];
        let plan = plan_for_incoming(&entries, &params(3, 2));
        assert_eq!(plan.set_ids(), vec![set("a")]);

        let under = vec![entry("a", now.0 - 30)];
        assert!(plan_for_incoming(&under, &params(3, 2)).is_empty());
    }

    #[test]
    fn plans_are_deterministic() {
        let now = WallClock(1_784_118_600_000);
        let entries = vec![
            (set("a"), now.months_earlier(4)),
            (set("b"), WallClock(now.0 - 10)),
        ];
        let p = params(10, 2);
        assert_eq!(plan(&entries, &p, now), plan(&entries, &p, now));
    }
}
