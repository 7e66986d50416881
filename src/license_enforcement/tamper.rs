//! Tamper detectors. Each one only records violations or blocks access; none
//! of them tries to repair what it detected.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use super::{ViolationReason, state::EnforcementContext, state::periodic};
use crate::{host::WindowMetrics, surface::DomMutation};

/// Number of watermark nodes removed by `mutation`, descendants of removed
/// subtrees included.
pub(crate) fn watermark_removals(mutation: &DomMutation, attribute: &str) -> usize {
    match mutation {
        DomMutation::ChildList { removed } => removed
            .iter()
            .map(|node| node.count_with_attribute(attribute))
            .sum(),
        DomMutation::Attributes { .. } => 0,
    }
}

/// Designated scripts with no loaded script source containing their name.
pub(crate) fn missing_scripts<'a>(required: &'a [String], loaded: &[String]) -> Vec<&'a str> {
    required
        .iter()
        .filter(|name| !loaded.iter().any(|src| src.contains(name.as_str())))
        .map(String::as_str)
        .collect()
}

/// Open/closed state of the devtools window-gap heuristic.
#[derive(Debug, Default)]
pub(crate) struct DevToolsHeuristic {
    open: bool,
}

impl DevToolsHeuristic {
    /// Updates the state from `metrics`, returning true only on the
    /// closed-to-open edge.
    pub(crate) fn observe(&mut self, metrics: WindowMetrics, threshold: u32) -> bool {
        let open = metrics.exceeds_gap(threshold);
        let opened = open && !self.open;
        self.open = open;
        opened
    }
}

impl EnforcementContext {
    /// Logs one watermark violation per removed watermark node.
    pub(crate) fn handle_mutation(&self, mutation: &DomMutation) -> usize {
        let removals = watermark_removals(mutation, &self.config().watermark_attribute);

        for _ in 0..removals {
            self.log_violation(ViolationReason::WatermarkRemoval);
        }

        removals
    }

    /// Checks that every protection script is still loaded. A missing script
    /// is logged and blocks access immediately.
    pub(crate) fn check_scripts(&self) -> bool {
        let loaded = self.host().loaded_scripts();
        let missing = missing_scripts(&self.config().protection_scripts, &loaded);

        if missing.is_empty() {
            return true;
        }

        info!(?missing, "Protection scripts missing");
        self.log_violation(ViolationReason::ProtectionScriptsRemoved);
        self.block_access();
        false
    }
}

pub(crate) async fn observe_mutations(
    context: Arc<EnforcementContext>,
    mut mutations: UnboundedReceiver<DomMutation>,
) {
    while let Some(mutation) = mutations.recv().await {
        context.handle_mutation(&mutation);
    }

    debug!("Mutation feed closed");
}

pub(crate) async fn check_protection_scripts(context: Arc<EnforcementContext>) {
    let mut interval = periodic(context.config().script_check_interval());

    loop {
        interval.tick().await;
        if !context.check_scripts() {
            break;
        }
    }
}

pub(crate) async fn watch_devtools(context: Arc<EnforcementContext>) {
    let mut interval = periodic(context.config().devtools_check_interval());
    let threshold = context.config().devtools_gap_threshold_px;
    let mut heuristic = DevToolsHeuristic::default();

    loop {
        interval.tick().await;
        if heuristic.observe(context.host().window_metrics(), threshold) {
            context.log_violation(ViolationReason::DevtoolsAccessed);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use tokio::sync::mpsc::unbounded_channel;

    use super::*;
    use crate::{
        config::Config,
        host::{Host as _, HostProfile, SimulatedHost},
        license_enforcement::{state::EnforcementDeps, tracking::TrackingEventKind},
        store::MemoryStore,
        surface::{
            RemovedNode,
            testing::{RecordingSurface, SurfaceCall},
        },
    };

    const WATERMARK: &str = "data-co-watermark";

    fn context() -> (Arc<EnforcementContext>, Arc<SimulatedHost>, Arc<RecordingSurface>) {
        let mut profile = HostProfile::for_url("https://example.com/");
        profile.scripts = vec![
            "https://cdn.example.com/protected-core.js?v=3".to_owned(),
            "https://cdn.example.com/premium.js".to_owned(),
        ];
        let host = Arc::new(SimulatedHost::new(profile).unwrap());
        let surface = Arc::new(RecordingSurface::default());

        let context = EnforcementContext::initialize(EnforcementDeps {
            config: Config::default(),
            store: Arc::new(MemoryStore::new()),
            host: host.clone(),
            surface: surface.clone(),
        });

        (context, host, surface)
    }

    fn watermark_count(context: &EnforcementContext) -> usize {
        context
            .tracking_data()
            .iter()
            .filter(|event| {
                matches!(
                    event.kind,
                    TrackingEventKind::Violation {
                        reason: ViolationReason::WatermarkRemoval,
                        ..
                    }
                )
            })
            .count()
    }

    #[test]
    fn missing_scripts_lists_only_absent_names() {
        let required = vec!["protected-core.js".to_owned(), "premium.js".to_owned()];
        let loaded = vec!["/static/premium.js".to_owned()];

        assert_eq!(missing_scripts(&required, &loaded), vec!["protected-core.js"]);
        let all_loaded = vec!["/a/protected-core.js".to_owned(), "/b/premium.js".to_owned()];
        assert!(missing_scripts(&required, &all_loaded).is_empty());
    }

    #[test]
    fn devtools_heuristic_reports_rising_edges_only() {
        let closed = WindowMetrics::default();
        let open = WindowMetrics {
            inner_width: closed.outer_width - 400,
            ..closed
        };
        let mut heuristic = DevToolsHeuristic::default();

        let edges = [closed, open, open, closed, open]
            .into_iter()
            .map(|metrics| heuristic.observe(metrics, 160))
            .collect::<Vec<_>>();

        assert_eq!(edges, vec![false, true, false, false, true]);
    }

    #[test]
    fn unrelated_removals_are_ignored() {
        let (context, _, _) = context();

        let removed = context.handle_mutation(&DomMutation::ChildList {
            removed: vec![RemovedNode::with_attribute("class", "ad")],
        });
        context.handle_mutation(&DomMutation::Attributes {
            name: WATERMARK.to_owned(),
        });

        assert_eq!(removed, 0);
        assert_eq!(context.violation_count(), 0);
    }

    #[test]
    fn nested_watermark_removal_is_detected() {
        let (context, _, _) = context();

        context.handle_mutation(&DomMutation::ChildList {
            removed: vec![RemovedNode {
                attributes: HashMap::new(),
                children: vec![RemovedNode::with_attribute(WATERMARK, "payload")],
            }],
        });

        assert_eq!(watermark_count(&context), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn watermark_removal_is_logged_once_per_event() {
        let (context, _, surface) = context();
        let (mutation_tx, mutation_rx) = unbounded_channel();
        let (_interaction_tx, interaction_rx) = unbounded_channel();
        let tasks = context.start(mutation_rx, interaction_rx);

        let removal = DomMutation::ChildList {
            removed: vec![RemovedNode::with_attribute(WATERMARK, "payload")],
        };
        mutation_tx.send(removal.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(watermark_count(&context), 1);

        mutation_tx.send(removal).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(watermark_count(&context), 2);
        assert!(!context.is_blocked());
        assert_eq!(
            surface.count(|call| matches!(call, SurfaceCall::BlockNotice { .. })),
            0
        );

        tasks.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn removed_protection_script_blocks_on_next_check() {
        let (context, host, surface) = context();
        let (_mutation_tx, mutation_rx) = unbounded_channel();
        let (_interaction_tx, interaction_rx) = unbounded_channel();
        let tasks = context.start(mutation_rx, interaction_rx);

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert!(!context.is_blocked());

        assert_eq!(host.remove_scripts("premium.js"), 1);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(context.is_blocked());
        assert_eq!(context.violation_count(), 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(
            surface.count(|call| matches!(call, SurfaceCall::BlockNotice { .. })),
            1
        );
        assert_eq!(context.violation_count(), 1);

        tasks.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn opening_devtools_logs_one_violation_per_opening() {
        let (context, host, _) = context();
        let (_mutation_tx, mutation_rx) = unbounded_channel();
        let (_interaction_tx, interaction_rx) = unbounded_channel();
        let tasks = context.start(mutation_rx, interaction_rx);

        let closed = host.window_metrics();
        let open = WindowMetrics {
            inner_height: 200,
            ..closed
        };

        host.resize(open);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(context.violation_count(), 1);

        host.resize(closed);
        tokio::time::sleep(Duration::from_secs(1)).await;
        host.resize(open);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(context.violation_count(), 2);

        tasks.shutdown().await;
    }
}
