use std::collections::HashMap;

use colored::Colorize as _;
use tracing::{info, warn};

use crate::license_enforcement::{
    Plan,
    messages::{self, BlockNotice},
};

/// Presentation collaborator for the enforcement core.
///
/// Implementations decide how each notice looks; the core only decides when
/// it appears.
pub(crate) trait Surface: Send + Sync {
    /// Adds a hidden node carrying `attribute=payload` to the document body.
    fn insert_watermark(&self, attribute: &str, payload: &str);

    fn show_upgrade_prompt(&self, feature: &str, required: Plan);

    fn show_limit_reached(&self, quota: usize);

    fn show_license_warning(&self, domain: &str, license_id: &str);

    /// Replaces the whole visible surface with the terminal block notice.
    fn replace_with_block_notice(&self, notice: &BlockNotice);

    /// Stops further pointer and keyboard input from reaching the page.
    fn swallow_interaction(&self);
}

/// A node removed from the document, with its attributes and removed
/// descendants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RemovedNode {
    pub(crate) attributes: HashMap<String, String>,
    pub(crate) children: Vec<RemovedNode>,
}

impl RemovedNode {
    pub(crate) fn with_attribute(name: &str, value: &str) -> Self {
        Self {
            attributes: HashMap::from([(name.to_owned(), value.to_owned())]),
            children: vec![],
        }
    }

    /// Counts nodes in this subtree, itself included, that carry `attribute`.
    pub(crate) fn count_with_attribute(&self, attribute: &str) -> usize {
        usize::from(self.attributes.contains_key(attribute))
            + self
                .children
                .iter()
                .map(|child| child.count_with_attribute(attribute))
                .sum::<usize>()
    }
}

/// Change notification from the document body subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DomMutation {
    ChildList { removed: Vec<RemovedNode> },
    Attributes { name: String },
}

/// User input observed at the document level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Interaction {
    /// Click on a control. `feature` is the nearest feature name, `premium`
    /// whether that control is marked as a premium feature.
    Click {
        feature: Option<String>,
        premium: bool,
    },
    Copy { selection_len: usize },
    KeyDown,
}

/// Renders notices to stderr, in the same boxed style as the CLI's other
/// call-to-action messages.
#[derive(Debug, Default)]
pub(crate) struct ConsoleSurface;

impl Surface for ConsoleSurface {
    fn insert_watermark(&self, attribute: &str, payload: &str) {
        info!(attribute, payload_len = payload.len(), "Watermark inserted");
    }

    fn show_upgrade_prompt(&self, feature: &str, required: Plan) {
        eprintln!("{}", messages::upgrade_prompt(feature, required).blue());
    }

    fn show_limit_reached(&self, quota: usize) {
        eprintln!("{}", messages::limit_reached(quota).yellow());
    }

    fn show_license_warning(&self, domain: &str, license_id: &str) {
        eprintln!("{}", messages::license_warning(domain, license_id).red());
    }

    fn replace_with_block_notice(&self, notice: &BlockNotice) {
        eprintln!("{}", messages::block_notice(notice).red().bold());
    }

    fn swallow_interaction(&self) {
        warn!("Page interaction disabled");
    }
}
