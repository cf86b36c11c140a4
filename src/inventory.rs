//! Inbound data contract: node records as served by an inventory backend,
//! and the trait a backend implements.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use crate::error::FetchError;

/// A file listed inside a directory or a synthetic group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub size: u64,
}

impl FileRef {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        Self {
            name: leaf_name(&path),
            path,
            size,
        }
    }
}

/// A child reference is either an identifier or an embedded record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChildEntry {
    Id(String),
    Node(Box<NodeRecord>),
}

/// One node as returned by node-by-path / node-by-id lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(default, alias = "node_id")]
    pub id: Option<String>,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, alias = "isDirectory")]
    pub is_directory: bool,
    #[serde(default)]
    pub file_count: Option<u64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub children: Vec<ChildEntry>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub children_ids: Vec<String>,
    #[serde(default, alias = "isSynthetic")]
    pub is_synthetic: bool,
    #[serde(default, alias = "originalFiles", deserialize_with = "null_as_default")]
    pub original_files: Vec<FileRef>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub fn leaf_name(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("/")
        .to_string()
}

impl NodeRecord {
    pub fn directory(path: impl Into<String>, size: u64, children: &[&str]) -> Self {
        let path = path.into();
        Self {
            id: None,
            name: leaf_name(&path),
            path,
            size,
            is_directory: true,
            file_count: None,
            children: children.iter().map(|c| ChildEntry::Id(c.to_string())).collect(),
            children_ids: Vec::new(),
            is_synthetic: false,
            original_files: Vec::new(),
        }
    }

    pub fn file(path: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        Self {
            id: None,
            name: leaf_name(&path),
            path,
            size,
            is_directory: false,
            file_count: None,
            children: Vec::new(),
            children_ids: Vec::new(),
            is_synthetic: false,
            original_files: Vec::new(),
        }
    }

    /// Identity used for child references: the id when present, else the path.
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.path)
    }

    /// All child references, embedded records reduced to their keys.
    pub fn child_refs(&self) -> Vec<String> {
        let mut refs: Vec<String> = self
            .children
            .iter()
            .map(|entry| match entry {
                ChildEntry::Id(id) => id.clone(),
                ChildEntry::Node(node) => node.key().to_string(),
            })
            .collect();
        for id in &self.children_ids {
            if !refs.contains(id) {
                refs.push(id.clone());
            }
        }
        refs
    }

    /// Split embedded children out into standalone records; the returned
    /// parent references them by key only.
    pub fn flatten(mut self) -> Vec<NodeRecord> {
        let mut out = Vec::new();
        let refs = self.child_refs();
        for entry in std::mem::take(&mut self.children) {
            if let ChildEntry::Node(node) = entry {
                out.extend(node.flatten());
            }
        }
        self.children = refs.into_iter().map(ChildEntry::Id).collect();
        self.children_ids.clear();
        out.insert(0, self);
        out
    }
}

/// What a navigation round needs from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchQuery {
    Path(String),
    Ids(Vec<String>),
}

/// A backend serving inventory nodes by path or identifier.
pub trait InventorySource: Send + Sync {
    fn node_by_path(&self, path: &str) -> Result<NodeRecord, FetchError>;

    fn node_by_id(&self, id: &str) -> Result<NodeRecord, FetchError>;

    /// Batch lookup. Unknown ids are skipped; other failures abort the batch.
    fn nodes_by_ids(&self, ids: &[String]) -> Result<Vec<NodeRecord>, FetchError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match self.node_by_id(id) {
                Ok(record) => out.push(record),
                Err(FetchError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }

    fn execute(&self, query: &FetchQuery) -> Result<Vec<NodeRecord>, FetchError> {
        match query {
            FetchQuery::Path(path) => Ok(vec![self.node_by_path(path)?]),
            FetchQuery::Ids(ids) => self.nodes_by_ids(ids),
        }
    }
}

/// Inventory held fully in memory, addressed by key and by path.
#[derive(Debug, Clone, Default)]
pub struct MemoryInventory {
    nodes: HashMap<String, NodeRecord>,
    by_path: HashMap<String, String>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: NodeRecord) {
        for flat in record.flatten() {
            let key = flat.key().to_string();
            self.by_path.insert(flat.path.clone(), key.clone());
            self.nodes.insert(key, flat);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Parse a precomputed hierarchy artifact. Returns the inventory and the
    /// artifact's root path.
    pub fn from_artifact_json(json: &str) -> Result<(Self, String), FetchError> {
        let artifact: Artifact = serde_json::from_str(json)?;
        let mut inventory = Self::new();
        for (id, mut record) in artifact.hierarchy.nodes {
            if record.id.is_none() {
                record.id = Some(id);
            }
            inventory.insert(record);
        }
        let root = inventory
            .nodes
            .get(&artifact.hierarchy.root_node_id)
            .map(|root| root.path.clone())
            .ok_or_else(|| FetchError::NotFound(artifact.hierarchy.root_node_id.clone()))?;
        let taken = artifact
            .snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.date.as_deref())
            .unwrap_or("unknown");
        tracing::info!(
            version = %artifact.version,
            snapshot = taken,
            nodes = inventory.len(),
            root = %root,
            "loaded hierarchy artifact"
        );
        Ok((inventory, root))
    }
}

impl InventorySource for MemoryInventory {
    fn node_by_path(&self, path: &str) -> Result<NodeRecord, FetchError> {
        self.by_path
            .get(path)
            .and_then(|key| self.nodes.get(key))
            .cloned()
            .ok_or_else(|| FetchError::NotFound(path.to_string()))
    }

    fn node_by_id(&self, id: &str) -> Result<NodeRecord, FetchError> {
        self.nodes
            .get(id)
            .cloned()
            .or_else(|| self.node_by_path(id).ok())
            .ok_or_else(|| FetchError::NotFound(id.to_string()))
    }
}

/// Snapshot summary carried by an artifact.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotInfo {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub file_count: u64,
}

#[derive(Debug, Deserialize)]
struct Artifact {
    #[serde(default)]
    version: String,
    #[serde(default)]
    snapshot: Option<SnapshotInfo>,
    hierarchy: Hierarchy,
}

#[derive(Debug, Deserialize)]
struct Hierarchy {
    root_node_id: String,
    nodes: HashMap<String, NodeRecord>,
}
