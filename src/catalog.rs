//! Decision-tree catalog.
//!
//! The catalog document is `{"trees": [...], "results": {...}}`. Trees are
//! resolved into a typed graph when loaded: every `true`/`false` edge becomes
//! either [`Target::Node`] or [`Target::Outcome`], so a transition never has
//! to guess which id space an edge points into. Catalogs whose node ids
//! collide with result ids, or whose edges dangle, are rejected here.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

use crate::error::CatalogError;
use crate::results::Outcome;

/// Result id used for auto-skipped trees when the catalog defines it.
pub const NOT_APPLICABLE_RESULT_ID: &str = "result_na";

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[serde(default)]
    trees: Vec<RawTree>,
    #[serde(default)]
    results: HashMap<String, Outcome>,
}

#[derive(Debug, Deserialize)]
struct RawTree {
    id: String,
    #[serde(default)]
    title: String,
    root: String,
    nodes: HashMap<String, RawNode>,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(rename = "true")]
    on_true: String,
    #[serde(rename = "false")]
    on_false: String,
    #[serde(flatten)]
    fields: serde_json::Map<String, serde_json::Value>,
}

/// Where an answer leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Another question in the same tree.
    Node(String),
    /// A terminal result id in the catalog's result map.
    Outcome(String),
}

impl Target {
    pub fn id(&self) -> &str {
        match self {
            Self::Node(id) | Self::Outcome(id) => id,
        }
    }
}

/// A question with two outgoing edges.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub on_true: Target,
    pub on_false: Target,
    /// Catalog-defined fields (question text, hints, ...).
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Node {
    pub fn branch(&self, answer: bool) -> &Target {
        if answer {
            &self.on_true
        } else {
            &self.on_false
        }
    }

    /// JSON rendering sent to clients.
    pub fn to_value(&self) -> serde_json::Value {
        let mut map = self.fields.clone();
        map.insert("id".into(), self.id.clone().into());
        map.insert("true".into(), self.on_true.id().into());
        map.insert("false".into(), self.on_false.id().into());
        serde_json::Value::Object(map)
    }
}

/// A binary-branching question graph evaluated once per asset.
#[derive(Debug, Clone)]
pub struct Tree {
    pub id: String,
    pub title: String,
    pub root: String,
    pub nodes: HashMap<String, Node>,
    /// Tree ids whose recorded outcome gates this tree.
    pub dependencies: Vec<String>,
}

impl Tree {
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }
}

/// Immutable, validated set of trees and terminal results.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    trees: Vec<Tree>,
    results: HashMap<String, Outcome>,
}

impl Catalog {
    /// Catalog with no trees; every session start fails against it.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse and validate a catalog document.
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let raw: RawCatalog = serde_json::from_str(json)?;
        Self::from_raw(raw)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, CatalogError> {
        let raw: RawCatalog = serde_json::from_value(value)?;
        Self::from_raw(raw)
    }

    /// Load a catalog file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json_str(&content)?;
        info!(
            path = %path.display(),
            trees = catalog.trees.len(),
            results = catalog.results.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    /// Load a catalog file, falling back to an empty catalog when the file
    /// does not exist. Any other failure is returned.
    pub fn load_or_empty<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        match Self::from_file(path.as_ref()) {
            Err(CatalogError::Io { path, source }) if source.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "catalog file not found, starting with an empty catalog");
                Ok(Self::empty())
            }
            other => other,
        }
    }

    fn from_raw(raw: RawCatalog) -> Result<Self, CatalogError> {
        let results = raw.results;
        let mut tree_ids = HashSet::with_capacity(raw.trees.len());
        for tree in &raw.trees {
            if !tree_ids.insert(tree.id.clone()) {
                return Err(CatalogError::Invalid(format!("duplicate tree id '{}'", tree.id)));
            }
        }

        let mut trees = Vec::with_capacity(raw.trees.len());
        for raw_tree in raw.trees {
            trees.push(resolve_tree(raw_tree, &results)?);
        }

        for tree in &trees {
            for dep in &tree.dependencies {
                if !tree_ids.contains(dep) {
                    warn!(tree_id = %tree.id, dependency = %dep, "dependency on unknown tree, treated as non-blocking");
                }
            }
        }

        Ok(Self { trees, results })
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn tree(&self, index: usize) -> Option<&Tree> {
        self.trees.get(index)
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn outcome(&self, result_id: &str) -> Option<&Outcome> {
        self.results.get(result_id)
    }

    /// Result stamped on trees skipped by the dependency resolver.
    pub fn not_applicable(&self) -> Outcome {
        self.results
            .get(NOT_APPLICABLE_RESULT_ID)
            .cloned()
            .unwrap_or_else(Outcome::not_applicable)
    }
}

fn resolve_tree(raw: RawTree, results: &HashMap<String, Outcome>) -> Result<Tree, CatalogError> {
    let node_ids: HashSet<&str> = raw.nodes.keys().map(String::as_str).collect();

    if let Some(clash) = node_ids.iter().find(|id| results.contains_key(**id)) {
        return Err(CatalogError::Invalid(format!(
            "tree '{}': node id '{}' collides with a result id",
            raw.id, clash
        )));
    }
    if !node_ids.contains(raw.root.as_str()) {
        return Err(CatalogError::Invalid(format!(
            "tree '{}': root '{}' is not a node of the tree",
            raw.id, raw.root
        )));
    }

    let target = |node_id: &str, edge: &str, to: String| -> Result<Target, CatalogError> {
        if node_ids.contains(to.as_str()) {
            Ok(Target::Node(to))
        } else if results.contains_key(&to) {
            Ok(Target::Outcome(to))
        } else {
            Err(CatalogError::Invalid(format!(
                "tree '{}': node '{}' {} edge points to unknown id '{}'",
                raw.id, node_id, edge, to
            )))
        }
    };

    let mut nodes = HashMap::with_capacity(raw.nodes.len());
    for (id, node) in &raw.nodes {
        let resolved = Node {
            id: id.clone(),
            on_true: target(id, "true", node.on_true.clone())?,
            on_false: target(id, "false", node.on_false.clone())?,
            fields: node.fields.clone(),
        };
        nodes.insert(id.clone(), resolved);
    }

    Ok(Tree {
        id: raw.id,
        title: raw.title,
        root: raw.root,
        nodes,
        dependencies: raw.dependencies,
    })
}
