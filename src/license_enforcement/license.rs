use std::{
    collections::HashSet,
    sync::{Arc, LazyLock},
};

use anyhow::Context as _;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use tracing::{instrument, warn};

use super::Plan;
use crate::store::{KeyValueStore, LICENSE_KEY};

static LICENSE_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^CO-[A-Z0-9]{4}-[A-Z0-9]{4}-[A-Z0-9]{4}-[A-Z0-9]{4}$").unwrap()
});

/// Returns true if `key` has the `CO-XXXX-XXXX-XXXX-XXXX` shape, where each
/// `X` is an uppercase ASCII letter or digit.
pub(crate) fn is_well_formed_key(key: &str) -> bool {
    LICENSE_KEY_RE.is_match(key)
}

/// License record written by the activation flow.
///
/// Fields are read leniently: a missing, null or mistyped field takes its
/// default, so only a value that is not a JSON object is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LicenseRecord {
    #[serde(default, deserialize_with = "lenient")]
    pub(crate) key: Option<String>,
    #[serde(default, deserialize_with = "domain_list")]
    pub(crate) domains: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub(crate) plan: Plan,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn domain_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let mut domains: Vec<String> = lenient(deserializer)?;
    let mut seen = HashSet::new();
    domains.retain(|domain| seen.insert(domain.clone()));
    Ok(domains)
}

impl LicenseRecord {
    pub(crate) fn new(key: String, domains: Vec<String>, plan: Plan) -> Self {
        let mut record = Self {
            key: Some(key),
            domains: vec![],
            plan,
        };
        for domain in domains {
            record.add_domain(domain);
        }
        record
    }

    /// Adds a domain, keeping first-insertion order and no duplicates.
    pub(crate) fn add_domain(&mut self, domain: String) {
        if !self.domains.contains(&domain) {
            self.domains.push(domain);
        }
    }

    pub(crate) fn covers(&self, origin: &str) -> bool {
        self.domains.iter().any(|domain| domain == origin)
    }
}

/// Outcome of reading the stored license.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LicenseLookup {
    Absent,
    /// A value is stored but could not be parsed as a license record.
    Malformed(String),
    Present(LicenseRecord),
}

#[derive(Clone)]
pub(crate) struct LicenseStore {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for LicenseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseStore").finish_non_exhaustive()
    }
}

impl LicenseStore {
    pub(crate) fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    #[instrument(level = "debug", skip(self))]
    pub(crate) fn read(&self) -> LicenseLookup {
        let raw = match self.store.get(LICENSE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return LicenseLookup::Absent,
            Err(err) => {
                warn!(?err, "Failed to read stored license, treating as absent");
                return LicenseLookup::Absent;
            }
        };

        let value = match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(value @ serde_json::Value::Object(_)) => value,
            Ok(other) => return LicenseLookup::Malformed(format!("expected an object, found {other}")),
            Err(err) => return LicenseLookup::Malformed(err.to_string()),
        };

        match serde_json::from_value::<LicenseRecord>(value) {
            Ok(record) => LicenseLookup::Present(record),
            Err(err) => LicenseLookup::Malformed(err.to_string()),
        }
    }

    pub(crate) fn write(&self, record: &LicenseRecord) -> anyhow::Result<()> {
        let value = serde_json::to_string(record).context("Failed to serialize license record")?;
        self.store.set(LICENSE_KEY, &value)
    }

    pub(crate) fn clear(&self) -> anyhow::Result<()> {
        self.store.remove(LICENSE_KEY)
    }
}
