use std::sync::Arc;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::{Identity, ViolationReason};
use crate::store::{
    self, FEATURE_USAGE_KEY, KeyValueStore, LICENSE_VIOLATIONS_KEY, TRACKING_LOG_KEY,
    VIOLATION_REPORT_KEY,
};

/// Type-specific part of a [`TrackingEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub(crate) enum TrackingEventKind {
    PageView {
        url: String,
        license_key: Option<String>,
    },
    FeatureUsage {
        feature: String,
    },
    ContentCopy {
        content_length: usize,
    },
    UnauthorizedUsage {
        url: String,
        user_agent: Option<String>,
        referrer: Option<String>,
    },
    Violation {
        reason: ViolationReason,
        message: String,
        violation_count: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TrackingEvent {
    #[serde(flatten)]
    pub(crate) kind: TrackingEventKind,
    pub(crate) session_id: String,
    pub(crate) fingerprint: String,
    pub(crate) domain: String,
    pub(crate) timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) authorized: Option<bool>,
}

impl TrackingEvent {
    pub(crate) fn new(
        kind: TrackingEventKind,
        identity: &Identity,
        domain: &str,
        authorized: Option<bool>,
    ) -> Self {
        Self {
            kind,
            session_id: identity.session_id.clone(),
            fingerprint: identity.fingerprint.clone(),
            domain: domain.to_owned(),
            timestamp: Utc::now(),
            authorized,
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self.kind {
            TrackingEventKind::PageView { .. } => "page_view",
            TrackingEventKind::FeatureUsage { .. } => "feature_usage",
            TrackingEventKind::ContentCopy { .. } => "content_copy",
            TrackingEventKind::UnauthorizedUsage { .. } => "unauthorized_usage",
            TrackingEventKind::Violation { .. } => "violation",
        }
    }
}

/// Snapshot staged for later transmission once violations escalate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ViolationReport {
    pub(crate) violations: Vec<serde_json::Value>,
    pub(crate) session_id: String,
    pub(crate) fingerprint: String,
    pub(crate) domain: String,
    pub(crate) timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeatureUsageEntry {
    pub(crate) feature: String,
    pub(crate) domain: String,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) licensed: bool,
}

/// Evidence appended when an unlicensed origin keeps using the tool past the
/// free quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UnlicensedUsageReport {
    pub(crate) domain: String,
    pub(crate) user_agent: Option<String>,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) usage_count: u64,
    pub(crate) fingerprint: String,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TrackingCaps {
    pub(crate) tracking_log: usize,
    pub(crate) feature_usage: usize,
    pub(crate) license_violations: usize,
}

/// Persisted, capped logs written by the tracker and the tamper detectors.
///
/// Writes are best-effort: a failing store is logged and never interrupts
/// enforcement.
#[derive(Clone)]
pub(crate) struct TrackingLog {
    store: Arc<dyn KeyValueStore>,
    caps: TrackingCaps,
}

impl std::fmt::Debug for TrackingLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingLog")
            .field("caps", &self.caps)
            .finish_non_exhaustive()
    }
}

impl TrackingLog {
    pub(crate) fn new(store: Arc<dyn KeyValueStore>, caps: TrackingCaps) -> Self {
        Self { store, caps }
    }

    pub(crate) fn record(&self, event: &TrackingEvent) {
        match store::append_capped(
            self.store.as_ref(),
            TRACKING_LOG_KEY,
            event,
            self.caps.tracking_log,
        ) {
            Ok(retained) => trace!(event_type = event.type_name(), retained, "Tracked event"),
            Err(err) => warn!(event_type = event.type_name(), ?err, "Failed to store tracking event"),
        }
    }

    pub(crate) fn record_feature_usage(&self, entry: &FeatureUsageEntry) {
        if let Err(err) = store::append_capped(
            self.store.as_ref(),
            FEATURE_USAGE_KEY,
            entry,
            self.caps.feature_usage,
        ) {
            warn!(feature = %entry.feature, ?err, "Failed to store feature usage");
        }
    }

    pub(crate) fn record_unlicensed_usage(&self, report: &UnlicensedUsageReport) {
        if let Err(err) = store::append_capped(
            self.store.as_ref(),
            LICENSE_VIOLATIONS_KEY,
            report,
            self.caps.license_violations,
        ) {
            warn!(?err, "Failed to store unlicensed usage report");
        }
    }

    /// Raw log entries, oldest first. Entries this build cannot interpret are
    /// kept as-is.
    pub(crate) fn raw_entries(&self) -> Vec<serde_json::Value> {
        store::read_sequence(self.store.as_ref(), TRACKING_LOG_KEY)
    }

    pub(crate) fn events(&self) -> Vec<TrackingEvent> {
        self.raw_entries()
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect()
    }

    pub(crate) fn feature_usage(&self) -> Vec<FeatureUsageEntry> {
        store::read_sequence(self.store.as_ref(), FEATURE_USAGE_KEY)
    }

    pub(crate) fn unlicensed_usage_reports(&self) -> Vec<UnlicensedUsageReport> {
        store::read_sequence(self.store.as_ref(), LICENSE_VIOLATIONS_KEY)
    }

    pub(crate) fn clear(&self) -> anyhow::Result<()> {
        self.store.remove(TRACKING_LOG_KEY)
    }

    /// Snapshots the current log into the staged violation report.
    pub(crate) fn stage_report(&self, identity: &Identity, domain: &str) -> anyhow::Result<()> {
        let report = ViolationReport {
            violations: self.raw_entries(),
            session_id: identity.session_id.clone(),
            fingerprint: identity.fingerprint.clone(),
            domain: domain.to_owned(),
            timestamp: Utc::now(),
        };

        let value = serde_json::to_string(&report).context("Failed to serialize violation report")?;
        self.store.set(VIOLATION_REPORT_KEY, &value)
    }

    pub(crate) fn staged_report(&self) -> Option<ViolationReport> {
        let raw = match self.store.get(VIOLATION_REPORT_KEY) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(?err, "Failed to read staged violation report");
                return None;
            }
        };

        serde_json::from_str(&raw)
            .inspect_err(|err| warn!(%err, "Staged violation report is malformed"))
            .ok()
    }
}
