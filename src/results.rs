//! Terminal outcomes and the per-asset result store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome status of a finished tree.
///
/// Statuses other than the three known ones are carried through verbatim so
/// catalogs can define their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    Pass,
    Fail,
    NotApplicable,
    Other(String),
}

impl Status {
    /// A dependency with this status makes dependent trees ineligible.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Fail | Self::NotApplicable)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::NotApplicable => "NOT_APPLICABLE",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for Status {
    fn from(s: String) -> Self {
        match s.as_str() {
            "PASS" => Self::Pass,
            "FAIL" => Self::Fail,
            "NOT_APPLICABLE" => Self::NotApplicable,
            _ => Self::Other(s),
        }
    }
}

impl From<Status> for String {
    fn from(s: Status) -> Self {
        s.as_str().to_string()
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal result definition: a status plus whatever fields the catalog
/// attaches to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: Status,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Outcome {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            fields: serde_json::Map::new(),
        }
    }

    /// Result stamped on trees skipped because of a blocking dependency.
    pub fn not_applicable() -> Self {
        Self::new(Status::NotApplicable)
    }
}

/// Outcomes recorded for one asset, keyed by tree id.
pub type AssetResults = BTreeMap<String, Outcome>;

/// Outcomes for every asset of a session: `asset_id -> tree_id -> Outcome`.
///
/// Entries are only ever added. Once a tree has an outcome for an asset it
/// keeps it for the life of the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultStore(BTreeMap<String, AssetResults>);

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bucket for an asset, created empty if absent. Existing entries are
    /// left untouched.
    pub fn bucket_mut(&mut self, asset_id: &str) -> &mut AssetResults {
        self.0.entry(asset_id.to_string()).or_default()
    }

    pub fn bucket(&self, asset_id: &str) -> Option<&AssetResults> {
        self.0.get(asset_id)
    }

    pub fn get(&self, asset_id: &str, tree_id: &str) -> Option<&Outcome> {
        self.0.get(asset_id).and_then(|bucket| bucket.get(tree_id))
    }

    /// Record an outcome unless one already exists. Returns whether it was
    /// written.
    pub fn record(&mut self, asset_id: &str, tree_id: &str, outcome: Outcome) -> bool {
        record_once(self.bucket_mut(asset_id), tree_id, outcome)
    }

    pub fn assets(&self) -> impl Iterator<Item = (&String, &AssetResults)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Insert into a single asset bucket without overwriting.
pub(crate) fn record_once(bucket: &mut AssetResults, tree_id: &str, outcome: Outcome) -> bool {
    if bucket.contains_key(tree_id) {
        return false;
    }
    bucket.insert(tree_id.to_string(), outcome);
    true
}
