use std::sync::{Arc, PoisonError, RwLock};

use base64::prelude::*;
use chrono::Utc;
use serde::Serialize;
use tokio::{
    sync::mpsc::UnboundedReceiver,
    task::JoinSet,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, instrument, trace, warn};

use super::{
    Identity, Plan, ViolationReason,
    gate::AccessGate,
    identity::identify,
    license::{LicenseLookup, LicenseStore},
    messages::BlockNotice,
    tamper,
    tracker::{
        ArticleTracker, UnlicensedUsageCounter, ViolationTally, ViolationTracker,
        premium_decision,
    },
    tracking::{
        FeatureUsageEntry, TrackingCaps, TrackingEvent, TrackingEventKind, TrackingLog,
        UnlicensedUsageReport, ViolationReport,
    },
    validator::{Validation, validate},
};
use crate::{
    config::Config,
    history::{AnalysisEntry, AnalysisHistory},
    host::Host,
    store::KeyValueStore,
    surface::{DomMutation, Interaction, Surface},
};

pub(crate) const HISTORY_FEATURE: &str = "save-history";

/// Collaborators an [`EnforcementContext`] is built from.
pub(crate) struct EnforcementDeps {
    pub(crate) config: Config,
    pub(crate) store: Arc<dyn KeyValueStore>,
    pub(crate) host: Arc<dyn Host>,
    pub(crate) surface: Arc<dyn Surface>,
}

/// Usage statistics for display.
#[derive(Debug, Clone)]
pub(crate) struct UsageInfo {
    pub(crate) domain: String,
    pub(crate) authorized: bool,
    pub(crate) plan: Plan,
    pub(crate) violations: usize,
    pub(crate) escalated: bool,
    pub(crate) articles: usize,
    pub(crate) article_quota: usize,
    pub(crate) unlicensed_checks: u64,
    pub(crate) blocked: bool,
}

impl std::fmt::Display for UsageInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Domain: {} | Licensed: {} | Plan: {} | Articles: {}/{} | Violations: {}{} | Unlicensed checks: {}{}",
            self.domain,
            if self.authorized { "yes" } else { "no" },
            self.plan,
            self.articles,
            self.article_quota,
            self.violations,
            if self.escalated { " (escalated)" } else { "" },
            self.unlicensed_checks,
            if self.blocked { " | BLOCKED" } else { "" },
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WatermarkPayload<'a> {
    domain: &'a str,
    timestamp: i64,
    fingerprint: &'a str,
    session_id: &'a str,
    authorized: bool,
}

/// Enforcement state for one page session.
///
/// Constructed explicitly with [`EnforcementContext::initialize`]; periodic
/// checks and feed consumers run only after [`EnforcementContext::start`].
pub(crate) struct EnforcementContext {
    config: Config,
    identity: Identity,
    domain: String,
    host: Arc<dyn Host>,
    surface: Arc<dyn Surface>,
    licenses: LicenseStore,
    log: TrackingLog,
    history: AnalysisHistory,
    unlicensed_usage: UnlicensedUsageCounter,
    violations: ViolationTracker,
    articles: ArticleTracker,
    license_state: RwLock<Validation>,
    gate: AccessGate,
}

impl std::fmt::Debug for EnforcementContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnforcementContext")
            .field("identity", &self.identity)
            .field("domain", &self.domain)
            .field("violations", &self.violations)
            .field("articles", &self.articles)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl EnforcementContext {
    /// Runs the startup sequence: identity, initial license check, page view,
    /// watermark.
    #[instrument(skip(deps))]
    pub(crate) fn initialize(deps: EnforcementDeps) -> Arc<Self> {
        let EnforcementDeps {
            config,
            store,
            host,
            surface,
        } = deps;

        let identity = identify(host.as_ref(), Utc::now(), config.fingerprint_len);
        let domain = host.hostname();

        let caps = TrackingCaps {
            tracking_log: config.tracking_log_cap,
            feature_usage: config.feature_usage_cap,
            license_violations: config.license_violations_cap,
        };

        let context = Arc::new(Self {
            identity,
            domain,
            host,
            surface,
            licenses: LicenseStore::new(store.clone()),
            log: TrackingLog::new(store.clone(), caps),
            history: AnalysisHistory::new(store.clone(), config.analysis_history_cap),
            unlicensed_usage: UnlicensedUsageCounter::new(store),
            violations: ViolationTracker::new(
                config.usage_escalation_threshold,
                config.report_threshold,
            ),
            articles: ArticleTracker::new(config.free_article_quota),
            license_state: RwLock::new(Validation {
                authorized: false,
                plan: Plan::Free,
                license_key: None,
                reason: None,
            }),
            gate: AccessGate::new(),
            config,
        });

        context.check_license();
        context.track_page_view();
        context.insert_watermark();

        info!(
            session_id = %context.identity.session_id,
            domain = %context.domain,
            authorized = context.is_authorized(),
            plan = %context.user_plan(),
            "Enforcement initialized"
        );

        context
    }

    /// Spawns license re-validation, the tamper detectors and the feed
    /// consumers. The returned handle owns every task.
    pub(crate) fn start(
        self: &Arc<Self>,
        mutations: UnboundedReceiver<DomMutation>,
        interactions: UnboundedReceiver<Interaction>,
    ) -> EnforcementTasks {
        let mut tasks = JoinSet::new();

        tasks.spawn(revalidate_license(Arc::clone(self)));
        tasks.spawn(tamper::check_protection_scripts(Arc::clone(self)));
        tasks.spawn(tamper::watch_devtools(Arc::clone(self)));
        tasks.spawn(tamper::observe_mutations(Arc::clone(self), mutations));
        tasks.spawn(consume_interactions(Arc::clone(self), interactions));

        debug!(tasks = tasks.len(), "Enforcement tasks started");

        EnforcementTasks { tasks }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn host(&self) -> &dyn Host {
        self.host.as_ref()
    }

    pub(crate) fn identity(&self) -> &Identity {
        &self.identity
    }

    pub(crate) fn domain(&self) -> &str {
        &self.domain
    }

    fn license_state(&self) -> Validation {
        self.license_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn is_authorized(&self) -> bool {
        self.license_state().authorized
    }

    pub(crate) fn user_plan(&self) -> Plan {
        self.license_state().plan
    }

    pub(crate) fn violation_count(&self) -> usize {
        self.violations.count()
    }

    pub(crate) fn is_blocked(&self) -> bool {
        self.gate.is_blocked()
    }

    /// Reads and validates the stored license, records the outcome and
    /// updates the session's authorization.
    #[instrument(level = "debug", skip(self), fields(domain = %self.domain))]
    pub(crate) fn check_license(&self) -> Validation {
        let lookup = self.licenses.read();

        match &lookup {
            LicenseLookup::Absent => self.check_unlicensed_usage(),
            LicenseLookup::Malformed(err) => debug!(%err, "Stored license is malformed"),
            LicenseLookup::Present(_) => {}
        }

        let validation = validate(&lookup, &self.domain);

        let previous = std::mem::replace(
            &mut *self
                .license_state
                .write()
                .unwrap_or_else(PoisonError::into_inner),
            validation.clone(),
        );

        if previous.authorized != validation.authorized || previous.plan != validation.plan {
            info!(
                authorized = validation.authorized,
                plan = %validation.plan,
                "License state changed"
            );
        }

        if let Some(reason) = validation.reason {
            self.log_violation(reason);
        }

        if !validation.authorized {
            self.track_unauthorized_usage();
        }

        validation
    }

    fn check_unlicensed_usage(&self) {
        let previous = self.unlicensed_usage.increment();

        if previous > self.config.free_article_quota as u64 {
            warn!(
                usage_count = previous + 1,
                quota = self.config.free_article_quota,
                "Unlicensed usage beyond free limits"
            );

            self.log.record_unlicensed_usage(&UnlicensedUsageReport {
                domain: self.domain.clone(),
                user_agent: self.host.user_agent(),
                timestamp: Utc::now(),
                usage_count: previous + 1,
                fingerprint: self.identity.fingerprint.clone(),
            });

            self.surface
                .show_license_warning(&self.domain, &self.identity.fingerprint);
        }
    }

    fn event(&self, kind: TrackingEventKind, authorized: Option<bool>) -> TrackingEvent {
        TrackingEvent::new(kind, &self.identity, &self.domain, authorized)
    }

    /// Records a policy breach and stages a report once the count passes the
    /// report threshold.
    pub(crate) fn log_violation(&self, reason: ViolationReason) -> ViolationTally {
        let tally = self.violations.record();

        self.log.record(&self.event(
            TrackingEventKind::Violation {
                reason,
                message: reason.message().to_owned(),
                violation_count: tally.count,
            },
            None,
        ));

        warn!(
            reason = reason.code(),
            violations = tally.count,
            "Content Optimizer violation: {}",
            reason.message()
        );

        if tally.report_due {
            self.stage_violation_report();
        }

        tally
    }

    fn track_unauthorized_usage(&self) {
        self.log.record(&self.event(
            TrackingEventKind::UnauthorizedUsage {
                url: self.host.href(),
                user_agent: self.host.user_agent(),
                referrer: self.host.referrer(),
            },
            None,
        ));

        if self.violations.check_escalation() {
            self.stage_violation_report();
        }
    }

    fn stage_violation_report(&self) {
        match self.log.stage_report(&self.identity, &self.domain) {
            Ok(()) => info!(
                violations = self.violations.count(),
                "Violation report staged for transmission"
            ),
            Err(err) => warn!(?err, "Failed to stage violation report"),
        }
    }

    fn track_page_view(&self) {
        let state = self.license_state();
        self.log.record(&self.event(
            TrackingEventKind::PageView {
                url: self.host.href(),
                license_key: state.license_key,
            },
            Some(state.authorized),
        ));
    }

    fn insert_watermark(&self) {
        let payload = WatermarkPayload {
            domain: &self.domain,
            timestamp: Utc::now().timestamp_millis(),
            fingerprint: &self.identity.fingerprint,
            session_id: &self.identity.session_id,
            authorized: self.is_authorized(),
        };

        match serde_json::to_string(&payload) {
            Ok(json) => self
                .surface
                .insert_watermark(&self.config.watermark_attribute, &BASE64_STANDARD.encode(json)),
            Err(err) => warn!(%err, "Failed to encode watermark payload"),
        }
    }

    /// Handles one document-level input event. Input is ignored once the
    /// session is blocked.
    pub(crate) fn handle_interaction(&self, interaction: &Interaction) {
        if self.is_blocked() {
            trace!(?interaction, "Interaction swallowed");
            return;
        }

        match interaction {
            Interaction::Click {
                feature: Some(feature),
                premium,
            } => {
                self.track_feature_usage(feature);
                if *premium {
                    self.log.record_feature_usage(&FeatureUsageEntry {
                        feature: feature.clone(),
                        domain: self.domain.clone(),
                        timestamp: Utc::now(),
                        licensed: self.user_plan() != Plan::Free,
                    });
                }
            }
            Interaction::Click { feature: None, .. } | Interaction::KeyDown => {}
            Interaction::Copy { selection_len } => {
                if *selection_len > self.config.copy_tracking_min_len {
                    self.log.record(&self.event(
                        TrackingEventKind::ContentCopy {
                            content_length: *selection_len,
                        },
                        Some(self.is_authorized()),
                    ));
                }
            }
        }
    }

    fn track_feature_usage(&self, feature: &str) {
        let authorized = self.is_authorized();
        self.log.record(&self.event(
            TrackingEventKind::FeatureUsage {
                feature: feature.to_owned(),
            },
            Some(authorized),
        ));

        if self.config.premium_features.is_premium(feature) && !authorized {
            self.log_violation(ViolationReason::UnauthorizedPremiumAccess);
        }
    }

    /// Returns whether `feature` may run now. Denials for insufficient plans
    /// show an upgrade prompt; premium requests while unauthorized are
    /// violations.
    #[instrument(level = "debug", skip(self))]
    pub(crate) fn check_premium_access(&self, feature: &str) -> bool {
        if self.is_blocked() {
            return false;
        }

        let state = self.license_state();
        let decision = premium_decision(
            &self.config.premium_features,
            state.plan,
            state.authorized,
            feature,
        );

        if decision.violation {
            self.log_violation(ViolationReason::UnauthorizedPremiumAccess);
        }

        if let Some(required) = decision.upgrade_to {
            self.surface.show_upgrade_prompt(feature, required);
        }

        decision.allowed
    }

    /// Counts one billable analysis against the free quota.
    pub(crate) fn track_article_usage(&self) {
        if self.is_blocked() {
            return;
        }

        if let Some((count, limit_reached)) = self.articles.track(self.user_plan()) {
            debug!(count, quota = self.articles.quota(), "Tracked article usage");
            if limit_reached {
                self.surface.show_limit_reached(self.articles.quota());
            }
        }
    }

    pub(crate) fn save_analysis(&self, content: &str, keyword: &str, score: f64) -> bool {
        if !self.check_premium_access(HISTORY_FEATURE) {
            return false;
        }

        match self.history.save(&AnalysisEntry::new(content, keyword, score)) {
            Ok(()) => true,
            Err(err) => {
                warn!(?err, "Failed to save analysis");
                false
            }
        }
    }

    pub(crate) fn load_history(&self) -> Vec<AnalysisEntry> {
        if !self.check_premium_access(HISTORY_FEATURE) {
            return vec![];
        }

        self.history.load()
    }

    pub(crate) fn tracking_data(&self) -> Vec<TrackingEvent> {
        self.log.events()
    }

    pub(crate) fn staged_report(&self) -> Option<ViolationReport> {
        self.log.staged_report()
    }

    /// Clears the tracking log. Only licensed, unblocked sessions may do so.
    pub(crate) fn clear_tracking_data(&self) -> bool {
        if self.is_blocked() || !self.is_authorized() {
            return false;
        }

        match self.log.clear() {
            Ok(()) => {
                info!("Tracking data cleared");
                true
            }
            Err(err) => {
                warn!(?err, "Failed to clear tracking data");
                false
            }
        }
    }

    /// Removes the stored license. Only licensed, unblocked sessions may do
    /// so; the session keeps its current authorization until the next check.
    pub(crate) fn clear_license(&self) -> anyhow::Result<bool> {
        if self.is_blocked() || !self.is_authorized() {
            return Ok(false);
        }

        self.licenses.clear()?;
        info!("License record cleared");
        Ok(true)
    }

    /// Replaces the page with the access-denied notice. Idempotent and
    /// terminal for the session.
    pub(crate) fn block_access(&self) -> bool {
        self.gate.block(self.surface.as_ref(), || BlockNotice {
            session_id: self.identity.session_id.clone(),
            fingerprint: self.identity.fingerprint.clone(),
            domain: self.domain.clone(),
            timestamp: Utc::now(),
            violation_count: self.violations.count(),
        })
    }

    pub(crate) fn usage_info(&self) -> UsageInfo {
        let state = self.license_state();
        UsageInfo {
            domain: self.domain.clone(),
            authorized: state.authorized,
            plan: state.plan,
            violations: self.violations.count(),
            escalated: self.violations.is_escalated(),
            articles: self.articles.count(),
            article_quota: self.articles.quota(),
            unlicensed_checks: self.unlicensed_usage.current(),
            blocked: self.is_blocked(),
        }
    }
}

/// Handle owning every task spawned by [`EnforcementContext::start`].
/// Dropping it aborts them.
#[derive(Debug)]
pub(crate) struct EnforcementTasks {
    tasks: JoinSet<()>,
}

impl EnforcementTasks {
    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Cancels all tasks and waits for them to finish.
    pub(crate) async fn shutdown(mut self) {
        self.tasks.shutdown().await;
        debug!("Enforcement tasks stopped");
    }
}

/// First tick one period from now, like a browser interval timer.
pub(crate) fn periodic(period: std::time::Duration) -> tokio::time::Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn revalidate_license(context: Arc<EnforcementContext>) {
    let mut interval = periodic(context.config.license_revalidation_interval());

    loop {
        interval.tick().await;
        let validation = context.check_license();
        debug!(authorized = validation.authorized, "Periodic license check");
    }
}

async fn consume_interactions(
    context: Arc<EnforcementContext>,
    mut interactions: UnboundedReceiver<Interaction>,
) {
    while let Some(interaction) = interactions.recv().await {
        context.handle_interaction(&interaction);
    }

    debug!("Interaction feed closed");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc::unbounded_channel;

    use super::*;
    use crate::{
        host::{HostProfile, SimulatedHost},
        license_enforcement::license::LicenseRecord,
        store::{LICENSE_KEY, MemoryStore, TRACKING_LOG_KEY, USAGE_COUNT_KEY, VIOLATION_REPORT_KEY},
        surface::testing::{RecordingSurface, SurfaceCall},
    };

    struct Harness {
        context: Arc<EnforcementContext>,
        store: Arc<MemoryStore>,
        surface: Arc<RecordingSurface>,
    }

    fn pro_record() -> LicenseRecord {
        LicenseRecord::new(
            "CO-AB12-CD34-EF56-GH78".to_owned(),
            vec!["example.com".to_owned()],
            Plan::Pro,
        )
    }

    fn harness(origin: &str, record: Option<&LicenseRecord>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        if let Some(record) = record {
            LicenseStore::new(store.clone()).write(record).unwrap();
        }

        let mut profile = HostProfile::for_url(&format!("https://{origin}/optimizer"));
        profile.scripts = vec![
            format!("https://{origin}/js/protected-core.js"),
            format!("https://{origin}/js/premium.js"),
        ];
        let surface = Arc::new(RecordingSurface::default());

        let context = EnforcementContext::initialize(EnforcementDeps {
            config: Config::default(),
            store: store.clone(),
            host: Arc::new(SimulatedHost::new(profile).unwrap()),
            surface: surface.clone(),
        });

        Harness {
            context,
            store,
            surface,
        }
    }

    fn violations(context: &EnforcementContext, reason: ViolationReason) -> usize {
        context
            .tracking_data()
            .iter()
            .filter(|event| {
                matches!(&event.kind, TrackingEventKind::Violation { reason: r, .. } if *r == reason)
            })
            .count()
    }

    #[test]
    fn pro_license_on_listed_origin_is_authorized() {
        let Harness { context, .. } = harness("example.com", Some(&pro_record()));

        assert!(context.is_authorized());
        assert_eq!(context.user_plan(), Plan::Pro);
        assert!(context.check_premium_access("ai-suggestions"));
        assert_eq!(context.violation_count(), 0);
    }

    #[test]
    fn license_on_foreign_origin_logs_one_domain_violation() {
        let Harness { context, .. } = harness("other.com", Some(&pro_record()));

        assert!(!context.is_authorized());
        assert_eq!(context.user_plan(), Plan::Free);
        assert_eq!(context.violation_count(), 1);
        assert_eq!(violations(&context, ViolationReason::UnauthorizedDomain), 1);
    }

    #[test]
    fn malformed_license_logs_format_violation() {
        let store = Arc::new(MemoryStore::new());
        store.set(LICENSE_KEY, "{\"key\":").unwrap();
        let context = EnforcementContext::initialize(EnforcementDeps {
            config: Config::default(),
            store: store.clone(),
            host: Arc::new(SimulatedHost::new(HostProfile::for_url("https://example.com/")).unwrap()),
            surface: Arc::new(RecordingSurface::default()),
        });

        assert!(!context.is_authorized());
        assert_eq!(violations(&context, ViolationReason::InvalidLicenseFormat), 1);
        assert_eq!(store.get(USAGE_COUNT_KEY).unwrap(), None);
    }

    #[test]
    fn startup_records_page_view_unauthorized_usage_and_watermark() {
        let Harness {
            context, surface, ..
        } = harness("example.com", None);

        let types = context
            .tracking_data()
            .iter()
            .map(TrackingEvent::type_name)
            .collect::<Vec<_>>();
        assert_eq!(types, vec!["unauthorized_usage", "page_view"]);
        assert_eq!(context.violation_count(), 0);

        let payload = surface
            .calls()
            .into_iter()
            .find_map(|call| match call {
                SurfaceCall::Watermark { attribute, payload } => {
                    assert_eq!(attribute, "data-co-watermark");
                    Some(payload)
                }
                _ => None,
            })
            .unwrap();
        let payload: serde_json::Value =
            serde_json::from_slice(&BASE64_STANDARD.decode(payload).unwrap()).unwrap();
        assert_eq!(payload["domain"], "example.com");
        assert_eq!(payload["sessionId"], context.identity().session_id.as_str());
        assert_eq!(payload["authorized"], false);
    }

    #[test]
    fn sixth_premium_violation_stages_report() {
        let Harness { context, store, .. } = harness("example.com", None);

        for _ in 0..5 {
            assert!(!context.check_premium_access("export-pdf"));
        }
        assert_eq!(context.violation_count(), 5);
        assert_eq!(store.get(VIOLATION_REPORT_KEY).unwrap(), None);

        assert!(!context.check_premium_access("export-pdf"));
        assert_eq!(context.violation_count(), 6);

        let report = context.staged_report().unwrap();
        assert_eq!(report.domain, "example.com");
        assert_eq!(report.fingerprint, context.identity().fingerprint);
        assert!(!report.violations.is_empty());
    }

    #[test]
    fn denied_premium_access_shows_upgrade_prompt() {
        let Harness {
            context, surface, ..
        } = harness("example.com", None);

        assert!(!context.check_premium_access("white-label"));

        assert_eq!(
            surface.count(|call| *call
                == SurfaceCall::UpgradePrompt {
                    feature: "white-label".to_owned(),
                    required: Plan::Agency,
                }),
            1
        );
    }

    #[test]
    fn unauthorized_usage_escalates_above_threshold() {
        let Harness { context, store, .. } = harness("example.com", None);

        for _ in 0..4 {
            context.check_premium_access("ai-suggestions");
        }
        assert_eq!(store.get(VIOLATION_REPORT_KEY).unwrap(), None);

        context.check_license();

        assert!(context.usage_info().escalated);
        assert!(context.staged_report().is_some());
    }

    #[test]
    fn repeated_unlicensed_checks_warn_after_free_quota() {
        let Harness {
            context, surface, ..
        } = harness("example.com", None);

        for _ in 0..6 {
            context.check_license();
        }

        // Seven checks including startup; only the last saw a previous count
        // above the quota.
        assert_eq!(context.usage_info().unlicensed_checks, 7);
        assert_eq!(
            surface.count(|call| matches!(call, SurfaceCall::LicenseWarning { .. })),
            1
        );
        assert_eq!(context.log.unlicensed_usage_reports().len(), 1);
    }

    #[test]
    fn free_quota_notice_does_not_block() {
        let free = LicenseRecord::new(
            "CO-AB12-CD34-EF56-GH78".to_owned(),
            vec!["example.com".to_owned()],
            Plan::Free,
        );
        let Harness {
            context, surface, ..
        } = harness("example.com", Some(&free));

        for _ in 0..5 {
            context.track_article_usage();
        }

        assert_eq!(
            surface.count(|call| *call == SurfaceCall::LimitReached { quota: 5 }),
            1
        );
        assert!(!context.is_blocked());
        assert!(context.check_premium_access("readability"));
    }

    #[test]
    fn paid_plans_do_not_count_articles() {
        let Harness { context, .. } = harness("example.com", Some(&pro_record()));

        context.track_article_usage();

        assert_eq!(context.usage_info().articles, 0);
    }

    #[test]
    fn history_is_gated_on_premium_access() {
        let Harness { context, .. } = harness("example.com", Some(&pro_record()));
        assert!(context.save_analysis("some words here", "seo", 81.0));
        assert_eq!(context.load_history().len(), 1);

        let Harness { context, .. } = harness("example.com", None);
        assert!(!context.save_analysis("some words here", "seo", 81.0));
        assert!(context.load_history().is_empty());
        assert_eq!(context.violation_count(), 2);
    }

    #[test]
    fn clearing_tracking_data_requires_authorization() {
        let Harness { context, store, .. } = harness("example.com", None);
        assert!(!context.clear_tracking_data());
        assert!(store.get(TRACKING_LOG_KEY).unwrap().is_some());

        let Harness { context, store, .. } = harness("example.com", Some(&pro_record()));
        assert!(context.clear_tracking_data());
        assert_eq!(store.get(TRACKING_LOG_KEY).unwrap(), None);
    }

    #[test]
    fn clearing_license_requires_authorization() {
        let Harness { context, store, .. } = harness("other.com", Some(&pro_record()));
        assert!(!context.clear_license().unwrap());
        assert!(store.get(LICENSE_KEY).unwrap().is_some());

        let Harness { context, store, .. } = harness("example.com", Some(&pro_record()));
        assert!(context.clear_license().unwrap());
        assert_eq!(store.get(LICENSE_KEY).unwrap(), None);
    }

    #[test]
    fn clicks_and_copies_are_tracked() {
        let Harness { context, .. } = harness("example.com", None);

        context.handle_interaction(&Interaction::Click {
            feature: Some("competitor-analysis".to_owned()),
            premium: true,
        });
        context.handle_interaction(&Interaction::Click {
            feature: Some("keyword-density".to_owned()),
            premium: false,
        });
        context.handle_interaction(&Interaction::Copy { selection_len: 50 });
        context.handle_interaction(&Interaction::Copy { selection_len: 51 });

        let types = context
            .tracking_data()
            .iter()
            .map(TrackingEvent::type_name)
            .filter(|t| *t != "unauthorized_usage" && *t != "page_view")
            .collect::<Vec<_>>();
        assert_eq!(
            types,
            vec!["feature_usage", "violation", "feature_usage", "content_copy"]
        );
        assert_eq!(context.log.feature_usage().len(), 1);
        assert!(!context.log.feature_usage()[0].licensed);
    }

    #[test]
    fn block_access_is_idempotent_and_swallows_input() {
        let Harness {
            context, surface, ..
        } = harness("example.com", Some(&pro_record()));

        assert!(context.block_access());
        assert!(!context.block_access());

        let before = context.tracking_data().len();
        context.handle_interaction(&Interaction::Copy { selection_len: 500 });
        assert_eq!(context.tracking_data().len(), before);
        assert!(!context.check_premium_access("ai-suggestions"));

        assert_eq!(
            surface.count(|call| matches!(call, SurfaceCall::BlockNotice { .. })),
            1
        );
    }

    #[test]
    fn blocked_session_ignores_quota_and_clearing() {
        let Harness {
            context,
            store,
            surface,
        } = harness("example.com", Some(&pro_record()));
        context.block_access();

        context.track_article_usage();
        assert!(!context.clear_tracking_data());
        assert!(!context.clear_license().unwrap());

        assert_eq!(context.usage_info().articles, 0);
        assert!(store.get(TRACKING_LOG_KEY).unwrap().is_some());
        assert!(store.get(LICENSE_KEY).unwrap().is_some());
        assert_eq!(
            surface.count(|call| matches!(call, SurfaceCall::LimitReached { .. })),
            0
        );
    }

    #[test]
    fn usage_info_renders_summary() {
        let Harness { context, .. } = harness("example.com", Some(&pro_record()));

        let summary = context.usage_info().to_string();

        assert!(summary.contains("Domain: example.com"));
        assert!(summary.contains("Plan: pro"));
        assert!(!summary.contains("BLOCKED"));
    }

    #[tokio::test(start_paused = true)]
    async fn revoked_license_is_picked_up_by_periodic_check() {
        let Harness { context, store, .. } = harness("example.com", Some(&pro_record()));
        let (_mutation_tx, mutation_rx) = unbounded_channel();
        let (_interaction_tx, interaction_rx) = unbounded_channel();
        let tasks = context.start(mutation_rx, interaction_rx);
        assert_eq!(tasks.len(), 5);

        store.remove(LICENSE_KEY).unwrap();
        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(context.is_authorized());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!context.is_authorized());
        assert_eq!(context.user_plan(), Plan::Free);

        tasks.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn interaction_feed_is_consumed_after_start() {
        let Harness { context, .. } = harness("example.com", Some(&pro_record()));
        let (_mutation_tx, mutation_rx) = unbounded_channel();
        let (interaction_tx, interaction_rx) = unbounded_channel();
        let tasks = context.start(mutation_rx, interaction_rx);

        interaction_tx
            .send(Interaction::Copy { selection_len: 120 })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(
            context
                .tracking_data()
                .iter()
                .any(|event| event.type_name() == "content_copy")
        );

        tasks.shutdown().await;
    }
}
