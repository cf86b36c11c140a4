use indextree::{Arena, NodeId};
use std::collections::HashMap;

use crate::cache::TreeCache;
use crate::inventory::{FileRef, NodeRecord};
use crate::util::stable_hash;

/// Name of the pseudo-node folding a directory's direct files together.
pub const FILE_GROUP_NAME: &str = "__files__";

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Directory,
    File,
    /// All direct files of one directory.
    FileGroup { files: Vec<FileRef> },
}

/// Represents a node in the view hierarchy
#[derive(Debug, Clone)]
pub struct ViewNode {
    pub path: String,
    pub name: String,
    pub kind: NodeKind,
    /// Declared size in bytes.
    pub size: u64,
    /// Partition weight: `max(size, 1)` for leaves, sum of children otherwise.
    pub weight: f64,
    /// Depth below the view root (root = 0).
    pub depth: u8,
}

/// View hierarchy rooted at the current effective path, bounded to the
/// preview depth, stored in an arena.
pub struct FileTree {
    arena: Arena<ViewNode>,
    root: NodeId,
    path_to_node: HashMap<String, NodeId>,
    fingerprint: u64,
}

impl FileTree {
    /// Build the tree from cached records. `None` when the root is not cached.
    pub fn build(cache: &TreeCache, root_path: &str, preview_depth: u8) -> Option<Self> {
        let record = cache.get(root_path)?;
        let mut arena = Arena::new();
        let root = arena.new_node(Self::node_from_record(record, 0));
        let mut tree = Self {
            arena,
            root,
            path_to_node: HashMap::from([(record.path.clone(), root)]),
            fingerprint: 0,
        };

        tree.expand(cache, root, record, preview_depth);
        tree.calculate_weights(root);
        tree.fingerprint = tree.compute_fingerprint();
        Some(tree)
    }

    fn node_from_record(record: &NodeRecord, depth: u8) -> ViewNode {
        let kind = if record.is_synthetic {
            NodeKind::FileGroup {
                files: record.original_files.clone(),
            }
        } else if record.is_directory {
            NodeKind::Directory
        } else {
            NodeKind::File
        };
        ViewNode {
            path: record.path.clone(),
            name: record.name.clone(),
            kind,
            size: record.size,
            weight: 0.0,
            depth,
        }
    }

    fn expand(&mut self, cache: &TreeCache, node_id: NodeId, record: &NodeRecord, preview_depth: u8) {
        let depth = self.arena[node_id].get().depth;
        if depth >= preview_depth || !record.is_directory || record.is_synthetic {
            return;
        }

        let mut dirs: Vec<&NodeRecord> = Vec::new();
        let mut files: Vec<FileRef> = Vec::new();
        let mut loose_size = 0u64;
        for reference in record.child_refs() {
            let Some(child) = cache.resolve(&reference) else {
                continue;
            };
            if child.is_synthetic {
                if child.original_files.is_empty() {
                    loose_size = loose_size.saturating_add(child.size);
                }
                files.extend(child.original_files.iter().cloned());
            } else if child.is_directory {
                dirs.push(child);
            } else {
                files.push(FileRef {
                    name: child.name.clone(),
                    path: child.path.clone(),
                    size: child.size,
                });
            }
        }

        dirs.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));
        dirs.dedup_by(|a, b| a.path == b.path);
        for dir in dirs {
            let child_id = self.append(node_id, Self::node_from_record(dir, depth + 1));
            self.expand(cache, child_id, dir, preview_depth);
        }

        if !files.is_empty() || loose_size > 0 {
            files.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));
            files.dedup_by(|a, b| a.path == b.path);
            let size = files
                .iter()
                .fold(loose_size, |acc, file| acc.saturating_add(file.size));
            let parent_path = record.path.trim_end_matches('/');
            let group = ViewNode {
                path: format!("{parent_path}/{FILE_GROUP_NAME}"),
                name: FILE_GROUP_NAME.to_string(),
                kind: NodeKind::FileGroup { files },
                size,
                weight: 0.0,
                depth: depth + 1,
            };
            self.append(node_id, group);
        }
    }

    fn append(&mut self, parent: NodeId, node: ViewNode) -> NodeId {
        let path = node.path.clone();
        let node_id = self.arena.new_node(node);
        parent.append(node_id, &mut self.arena);
        self.path_to_node.insert(path, node_id);
        node_id
    }

    /// Calculate partition weights for all nodes (bottom-up)
    fn calculate_weights(&mut self, node_id: NodeId) -> f64 {
        let children: Vec<NodeId> = node_id.children(&self.arena).collect();
        let weight = if children.is_empty() {
            self.arena[node_id].get().size.max(1) as f64
        } else {
            children
                .into_iter()
                .map(|child| self.calculate_weights(child))
                .sum()
        };
        self.arena[node_id].get_mut().weight = weight;
        weight
    }

    fn compute_fingerprint(&self) -> u64 {
        let signature: Vec<(&str, u64)> = self
            .root
            .descendants(&self.arena)
            .map(|id| {
                let node = self.arena[id].get();
                (node.path.as_str(), node.weight.to_bits())
            })
            .collect();
        stable_hash(&signature)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &ViewNode {
        self.arena[id].get()
    }

    pub fn root_node(&self) -> &ViewNode {
        self.node(self.root)
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        id.children(&self.arena)
    }

    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.path_to_node.get(path).copied()
    }

    /// Identity of the node set: paths and weights in tree order.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn total_weight(&self) -> f64 {
        self.root_node().weight
    }

    pub fn len(&self) -> usize {
        self.path_to_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path_to_node.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(tree: &FileTree, id: NodeId) -> Vec<String> {
        tree.children(id).map(|c| tree.node(c).name.clone()).collect()
    }

    #[test]
    fn test_file_group_bounds_branching() {
        let mut cache = TreeCache::new();
        let mut children: Vec<String> = (0..500).map(|i| format!("/r/f{i}")).collect();
        children.push("/r/a".to_string());
        children.push("/r/b".to_string());
        let refs: Vec<&str> = children.iter().map(String::as_str).collect();
        cache.insert(NodeRecord::directory("/r", 0, &refs));
        for i in 0..500 {
            cache.insert(NodeRecord::file(format!("/r/f{i}"), 10));
        }
        cache.insert(NodeRecord::directory("/r/a", 9000, &[]));
        cache.insert(NodeRecord::directory("/r/b", 100, &[]));

        let tree = FileTree::build(&cache, "/r", 2).unwrap();
        assert_eq!(names(&tree, tree.root()), vec!["a", "b", FILE_GROUP_NAME]);

        let group = tree.find("/r/__files__").unwrap();
        match &tree.node(group).kind {
            NodeKind::FileGroup { files } => assert_eq!(files.len(), 500),
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(tree.node(group).size, 5000);
        assert_eq!(tree.total_weight(), 9000.0 + 100.0 + 5000.0);
    }

    #[test]
    fn test_preview_depth_bounds_recursion() {
        let mut cache = TreeCache::new();
        cache.insert(NodeRecord::directory("/r", 30, &["/r/a"]));
        cache.insert(NodeRecord::directory("/r/a", 30, &["/r/a/b"]));
        cache.insert(NodeRecord::directory("/r/a/b", 30, &["/r/a/b/c"]));
        cache.insert(NodeRecord::file("/r/a/b/c", 30));

        let tree = FileTree::build(&cache, "/r", 2).unwrap();
        let b = tree.find("/r/a/b").unwrap();
        assert_eq!(tree.node(b).depth, 2);
        assert_eq!(tree.children(b).count(), 0);
        assert!(tree.find("/r/a/b/c").is_none());
    }

    #[test]
    fn test_zero_sizes_weigh_one() {
        let mut cache = TreeCache::new();
        cache.insert(NodeRecord::directory("/r", 0, &["/r/a", "/r/b"]));
        cache.insert(NodeRecord::directory("/r/a", 0, &[]));
        cache.insert(NodeRecord::directory("/r/b", 0, &[]));

        let tree = FileTree::build(&cache, "/r", 2).unwrap();
        assert_eq!(tree.total_weight(), 2.0);
    }

    #[test]
    fn test_synthetic_backend_node_joins_group() {
        let mut cache = TreeCache::new();
        cache.insert(NodeRecord::directory("/r", 30, &["/r/__files__", "/r/loose"]));
        let mut synthetic = NodeRecord::file("/r/__files__", 20);
        synthetic.is_synthetic = true;
        synthetic.original_files = vec![FileRef::new("/r/x", 12), FileRef::new("/r/y", 8)];
        cache.insert(synthetic);
        cache.insert(NodeRecord::file("/r/loose", 10));

        let tree = FileTree::build(&cache, "/r", 2).unwrap();
        assert_eq!(tree.children(tree.root()).count(), 1);
        let group = tree.find("/r/__files__").unwrap();
        assert_eq!(tree.node(group).size, 30);
    }

    #[test]
    fn test_fingerprint_tracks_node_set() {
        let mut cache = TreeCache::new();
        cache.insert(NodeRecord::directory("/r", 10, &["/r/a"]));
        cache.insert(NodeRecord::file("/r/a", 10));
        let before = FileTree::build(&cache, "/r", 2).unwrap().fingerprint();
        assert_eq!(before, FileTree::build(&cache, "/r", 2).unwrap().fingerprint());

        cache.insert(NodeRecord::file("/r/a", 11));
        assert_ne!(before, FileTree::build(&cache, "/r", 2).unwrap().fingerprint());
    }

    #[test]
    fn test_missing_root() {
        assert!(FileTree::build(&TreeCache::new(), "/r", 2).is_none());
    }
}
