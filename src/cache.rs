use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::geometry::Viewport;
use crate::inventory::{FetchQuery, NodeRecord};
use crate::partition::PartitionLayout;

/// Node records fetched so far for the active snapshot, addressed by path
/// with a secondary id index. Cleared wholesale when the snapshot changes.
#[derive(Debug, Default)]
pub struct TreeCache {
    records: HashMap<String, NodeRecord>,
    id_to_path: HashMap<String, String>,
    unavailable: HashSet<String>,
    version: u64,
}

impl TreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: NodeRecord) {
        for flat in record.flatten() {
            if let Some(id) = &flat.id {
                self.id_to_path.insert(id.clone(), flat.path.clone());
            }
            self.unavailable.remove(flat.key());
            self.unavailable.remove(&flat.path);
            self.records.insert(flat.path.clone(), flat);
        }
        self.version += 1;
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = NodeRecord>) {
        for record in records {
            self.insert(record);
        }
    }

    pub fn get(&self, path: &str) -> Option<&NodeRecord> {
        self.records.get(path)
    }

    /// Look a child reference up by id first, then by path.
    pub fn resolve(&self, reference: &str) -> Option<&NodeRecord> {
        self.id_to_path
            .get(reference)
            .and_then(|path| self.records.get(path))
            .or_else(|| self.records.get(reference))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.records.contains_key(path)
    }

    /// Remember a reference the backend could not serve.
    pub fn mark_unavailable(&mut self, reference: impl Into<String>) {
        self.unavailable.insert(reference.into());
        self.version += 1;
    }

    pub fn is_unavailable(&self, reference: &str) -> bool {
        self.unavailable.contains(reference)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.id_to_path.clear();
        self.unavailable.clear();
        self.version += 1;
    }

    /// Bumped on every change, so derived views can tell when to rebuild.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The next query needed before `path` can be shown `depth` levels deep,
    /// or `None` when everything in that window is cached (or known missing).
    pub fn next_missing(&self, path: &str, depth: u8) -> Option<FetchQuery> {
        let Some(root) = self.get(path) else {
            return Some(FetchQuery::Path(path.to_string()));
        };

        let mut frontier = vec![root];
        for _ in 0..depth {
            let mut missing = Vec::new();
            let mut next = Vec::new();
            for record in &frontier {
                if !record.is_directory || record.is_synthetic {
                    continue;
                }
                for reference in record.child_refs() {
                    match self.resolve(&reference) {
                        Some(child) => next.push(child),
                        None if self.is_unavailable(&reference) => {}
                        None => {
                            if !missing.contains(&reference) {
                                missing.push(reference);
                            }
                        }
                    }
                }
            }
            if !missing.is_empty() {
                return Some(FetchQuery::Ids(missing));
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        None
    }
}

const MAX_ENTRIES_PER_PATH: usize = 4;

#[derive(Debug, Clone)]
struct GeometryEntry {
    viewport: Viewport,
    fingerprint: u64,
    layout: Arc<PartitionLayout>,
}

/// Computed partitions keyed by view root and viewport size.
#[derive(Debug, Default)]
pub struct GeometryCache {
    entries: HashMap<String, Vec<GeometryEntry>>,
}

impl GeometryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hit needs a viewport within a pixel and the same node-set fingerprint.
    pub fn get(&self, path: &str, viewport: Viewport, fingerprint: u64) -> Option<Arc<PartitionLayout>> {
        self.entries.get(path)?.iter().find_map(|entry| {
            (entry.viewport.matches(&viewport) && entry.fingerprint == fingerprint)
                .then(|| Arc::clone(&entry.layout))
        })
    }

    pub fn insert(
        &mut self,
        path: &str,
        viewport: Viewport,
        fingerprint: u64,
        layout: Arc<PartitionLayout>,
    ) {
        let slot = self.entries.entry(path.to_string()).or_default();
        slot.retain(|entry| !entry.viewport.matches(&viewport));
        slot.push(GeometryEntry {
            viewport,
            fingerprint,
            layout,
        });
        if slot.len() > MAX_ENTRIES_PER_PATH {
            slot.remove(0);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use pretty_assertions::assert_eq;

    fn seeded() -> TreeCache {
        let mut cache = TreeCache::new();
        cache.insert(NodeRecord::directory("/r", 30, &["/r/a", "/r/b", "/r/f"]));
        cache
    }

    #[test]
    fn test_next_missing_walks_levels() {
        let mut cache = TreeCache::new();
        assert_eq!(cache.next_missing("/r", 2), Some(FetchQuery::Path("/r".to_string())));

        cache = seeded();
        assert_eq!(
            cache.next_missing("/r", 2),
            Some(FetchQuery::Ids(vec![
                "/r/a".to_string(),
                "/r/b".to_string(),
                "/r/f".to_string()
            ]))
        );

        cache.insert(NodeRecord::directory("/r/a", 20, &["/r/a/x"]));
        cache.insert(NodeRecord::directory("/r/b", 5, &[]));
        cache.insert(NodeRecord::file("/r/f", 5));
        assert_eq!(
            cache.next_missing("/r", 2),
            Some(FetchQuery::Ids(vec!["/r/a/x".to_string()]))
        );
        // One level deep is already complete.
        assert_eq!(cache.next_missing("/r", 1), None);

        cache.insert(NodeRecord::file("/r/a/x", 20));
        assert_eq!(cache.next_missing("/r", 2), None);
    }

    #[test]
    fn test_unavailable_refs_do_not_block() {
        let mut cache = seeded();
        cache.insert(NodeRecord::directory("/r/a", 20, &[]));
        cache.insert(NodeRecord::file("/r/f", 5));
        cache.mark_unavailable("/r/b");
        assert_eq!(cache.next_missing("/r", 2), None);
    }

    #[test]
    fn test_resolve_by_id() {
        let mut cache = TreeCache::new();
        let mut record = NodeRecord::file("/r/f", 5);
        record.id = Some("file_7".to_string());
        cache.insert(record);
        assert_eq!(cache.resolve("file_7").map(|r| r.path.as_str()), Some("/r/f"));
        assert_eq!(cache.resolve("/r/f").map(|r| r.size), Some(5));
        assert!(cache.resolve("file_8").is_none());
    }

    #[test]
    fn test_geometry_cache_tolerance_and_fingerprint() {
        let mut cache = GeometryCache::new();
        let viewport = Viewport::new(800.0, 600.0);
        let layout = Arc::new(PartitionLayout::empty("/r", viewport, Rect::new(0.0, 0.0, 800.0, 600.0).to_polygon()));
        cache.insert("/r", viewport, 42, Arc::clone(&layout));

        let hit = cache.get("/r", Viewport::new(800.4, 600.0), 42).unwrap();
        assert!(Arc::ptr_eq(&hit, &layout));
        assert!(cache.get("/r", Viewport::new(810.0, 600.0), 42).is_none());
        assert!(cache.get("/r", viewport, 43).is_none());

        // Same viewport replaces the entry wholesale.
        cache.insert("/r", viewport, 43, Arc::clone(&layout));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_geometry_cache_bounded_per_path() {
        let mut cache = GeometryCache::new();
        for i in 0..10 {
            let viewport = Viewport::new(100.0 + 10.0 * i as f32, 100.0);
            let layout = Arc::new(PartitionLayout::empty("/r", viewport, viewport.rect().to_polygon()));
            cache.insert("/r", viewport, 1, layout);
        }
        assert_eq!(cache.len(), MAX_ENTRIES_PER_PATH);
    }
}
