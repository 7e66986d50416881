use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use tracing::{debug, warn};

use super::{FeatureRequirements, Plan};
use crate::store::{KeyValueStore, USAGE_COUNT_KEY};

/// Result of recording one violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ViolationTally {
    pub(crate) count: usize,
    pub(crate) report_due: bool,
}

/// Page-session violation counter with its two escalation thresholds.
///
/// The count lives only as long as the session.
#[derive(Debug)]
pub(crate) struct ViolationTracker {
    count: AtomicUsize,
    escalated: AtomicBool,
    escalation_threshold: usize,
    report_threshold: usize,
}

impl ViolationTracker {
    pub(crate) fn new(escalation_threshold: usize, report_threshold: usize) -> Self {
        Self {
            count: AtomicUsize::new(0),
            escalated: AtomicBool::new(false),
            escalation_threshold,
            report_threshold,
        }
    }

    /// Counts one violation. A report is due whenever the new count is above
    /// the report threshold.
    pub(crate) fn record(&self) -> ViolationTally {
        let count = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        ViolationTally {
            count,
            report_due: count > self.report_threshold,
        }
    }

    /// Returns true if unauthorized usage should escalate, i.e. the count is
    /// above the escalation threshold. Marks the session escalated.
    pub(crate) fn check_escalation(&self) -> bool {
        let over = self.count() > self.escalation_threshold;

        if over && !self.escalated.swap(true, Ordering::AcqRel) {
            warn!(
                violations = self.count(),
                threshold = self.escalation_threshold,
                "Tolerated unauthorized attempts exceeded"
            );
        }

        over
    }

    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub(crate) fn is_escalated(&self) -> bool {
        self.escalated.load(Ordering::Acquire)
    }
}

/// Billable actions counted against the free quota.
#[derive(Debug)]
pub(crate) struct ArticleTracker {
    count: AtomicUsize,
    quota: usize,
}

impl ArticleTracker {
    pub(crate) fn new(quota: usize) -> Self {
        Self {
            count: AtomicUsize::new(0),
            quota,
        }
    }

    /// Counts one billable action on the free plan, returning
    /// (`new_count`, `limit_reached`). Other plans are not counted.
    pub(crate) fn track(&self, plan: Plan) -> Option<(usize, bool)> {
        if plan != Plan::Free {
            return None;
        }

        let count = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        Some((count, count >= self.quota))
    }

    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub(crate) fn quota(&self) -> usize {
        self.quota
    }
}

/// Persisted count of license checks that found no license at all.
#[derive(Clone)]
pub(crate) struct UnlicensedUsageCounter {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for UnlicensedUsageCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlicensedUsageCounter")
            .finish_non_exhaustive()
    }
}

impl UnlicensedUsageCounter {
    pub(crate) fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Increments the stored count and returns the value it had before.
    /// Unreadable values count as zero.
    pub(crate) fn increment(&self) -> u64 {
        let mut previous = 0;

        let result = self.store.update(USAGE_COUNT_KEY, &mut |current| {
            previous = current
                .as_deref()
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .unwrap_or(0);
            Some(previous.saturating_add(1).to_string())
        });

        if let Err(err) = result {
            warn!(?err, "Failed to update unlicensed usage count");
        }

        previous
    }

    pub(crate) fn current(&self) -> u64 {
        match self.store.get(USAGE_COUNT_KEY) {
            Ok(raw) => raw.and_then(|raw| raw.trim().parse().ok()).unwrap_or(0),
            Err(err) => {
                warn!(?err, "Failed to read unlicensed usage count");
                0
            }
        }
    }
}

/// What `check_premium_access` should do for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PremiumDecision {
    pub(crate) allowed: bool,
    /// Plan to offer when access is denied.
    pub(crate) upgrade_to: Option<Plan>,
    pub(crate) violation: bool,
}

/// Gates `feature` for a session on `plan`.
///
/// Any mapped premium feature requested while unauthorized is a violation,
/// whatever the outcome.
pub(crate) fn premium_decision(
    features: &FeatureRequirements,
    plan: Plan,
    authorized: bool,
    feature: &str,
) -> PremiumDecision {
    let Some(required) = features.required_plan(feature) else {
        return PremiumDecision {
            allowed: true,
            upgrade_to: None,
            violation: false,
        };
    };

    let violation = !authorized && required != Plan::Free;
    let allowed = plan.satisfies(required);

    debug!(feature, %plan, %required, allowed, violation, "Premium access decision");

    PremiumDecision {
        allowed,
        upgrade_to: (!allowed).then_some(required),
        violation,
    }
}
