use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{self, ANALYSIS_HISTORY_KEY, KeyValueStore};

const PREVIEW_CHARS: usize = 100;

/// One saved content analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AnalysisEntry {
    pub(crate) date: DateTime<Utc>,
    pub(crate) keyword: String,
    pub(crate) score: f64,
    pub(crate) word_count: usize,
    pub(crate) preview: String,
}

impl AnalysisEntry {
    pub(crate) fn new(content: &str, keyword: &str, score: f64) -> Self {
        Self {
            date: Utc::now(),
            keyword: keyword.to_owned(),
            score,
            word_count: content.split_whitespace().count(),
            preview: format!("{}...", content.chars().take(PREVIEW_CHARS).collect::<String>()),
        }
    }
}

impl std::fmt::Display for AnalysisEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - Score: {} - {} ({} words)\n    {}",
            self.keyword,
            self.score,
            self.date.format("%Y-%m-%d"),
            self.word_count,
            self.preview
        )
    }
}

#[derive(Clone)]
pub(crate) struct AnalysisHistory {
    store: Arc<dyn KeyValueStore>,
    cap: usize,
}

impl std::fmt::Debug for AnalysisHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisHistory")
            .field("cap", &self.cap)
            .finish_non_exhaustive()
    }
}

impl AnalysisHistory {
    pub(crate) fn new(store: Arc<dyn KeyValueStore>, cap: usize) -> Self {
        Self { store, cap }
    }

    pub(crate) fn save(&self, entry: &AnalysisEntry) -> anyhow::Result<()> {
        store::append_capped(self.store.as_ref(), ANALYSIS_HISTORY_KEY, entry, self.cap)?;
        Ok(())
    }

    pub(crate) fn load(&self) -> Vec<AnalysisEntry> {
        store::read_sequence(self.store.as_ref(), ANALYSIS_HISTORY_KEY)
    }
}
