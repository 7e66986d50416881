use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Subscription tier that determines which premium features are unlocked.
///
/// Tiers are totally ordered by [`Plan::rank`]: `Free < Pro < Agency`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Plan {
    #[default]
    Free,
    Pro,
    Agency,
}

impl Plan {
    pub(crate) fn rank(self) -> u8 {
        match self {
            Plan::Free => 0,
            Plan::Pro => 1,
            Plan::Agency => 2,
        }
    }

    pub(crate) fn satisfies(self, required: Plan) -> bool {
        self.rank() >= required.rank()
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Plan::Free => write!(f, "free"),
            Plan::Pro => write!(f, "pro"),
            Plan::Agency => write!(f, "agency"),
        }
    }
}

/// Static mapping from feature name to the minimum plan that unlocks it.
///
/// Features absent from the map are free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct FeatureRequirements(BTreeMap<String, Plan>);

impl FeatureRequirements {
    pub(crate) fn required_plan(&self, feature: &str) -> Option<Plan> {
        self.0.get(feature).copied()
    }

    pub(crate) fn is_premium(&self, feature: &str) -> bool {
        self.required_plan(feature)
            .is_some_and(|plan| plan != Plan::Free)
    }
}

impl Default for FeatureRequirements {
    fn default() -> Self {
        Self(
            [
                ("competitor-analysis", Plan::Pro),
                ("ai-suggestions", Plan::Pro),
                ("export-pdf", Plan::Pro),
                ("save-history", Plan::Pro),
                ("team-collaboration", Plan::Agency),
                ("api-access", Plan::Agency),
                ("white-label", Plan::Agency),
            ]
            .into_iter()
            .map(|(feature, plan)| (feature.to_owned(), plan))
            .collect(),
        )
    }
}
