use dashmap::DashMap;
use jwalk::WalkDir;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::FetchError;
use crate::inventory::{FetchQuery, InventorySource, MemoryInventory, NodeRecord};

/// Subdirectories served per directory, largest first.
pub const FOLDER_LIMIT: usize = 500;
/// Files served per directory, largest first.
pub const FILE_LIMIT: usize = 50;

const PROGRESS_EMIT_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone)]
struct FileNode {
    path: PathBuf,
    size: u64,
    is_dir: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScanStats {
    pub total_files: u64,
    pub total_dirs: u64,
    pub total_size: u64,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Discovering,
    Processing,
}

#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub phase: ScanPhase,
    pub discovered_entries: u64,
    pub processed_entries: u64,
    pub total_entries: Option<u64>,
}

impl ScanProgress {
    pub fn fraction(&self) -> Option<f32> {
        match self.phase {
            ScanPhase::Discovering => None,
            ScanPhase::Processing => {
                let total = self.total_entries?;
                if total == 0 {
                    Some(1.0)
                } else {
                    Some((self.processed_entries as f32 / total as f32).clamp(0.0, 1.0))
                }
            }
        }
    }
}

pub type ProgressReporter = Arc<dyn Fn(ScanProgress) + Send + Sync>;

/// Inventory produced by scanning a local directory. Node ids are paths.
#[derive(Debug, Clone)]
pub struct LocalInventory {
    inventory: MemoryInventory,
    root: String,
    stats: ScanStats,
}

impl LocalInventory {
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }
}

impl InventorySource for LocalInventory {
    fn node_by_path(&self, path: &str) -> Result<NodeRecord, FetchError> {
        self.inventory.node_by_path(path)
    }

    fn node_by_id(&self, id: &str) -> Result<NodeRecord, FetchError> {
        self.inventory.node_by_id(id)
    }

    fn execute(&self, query: &FetchQuery) -> Result<Vec<NodeRecord>, FetchError> {
        self.inventory.execute(query)
    }
}

/// Parallel file system crawler producing an inventory
pub struct FileCrawler {
    file_count: Arc<AtomicU64>,
    dir_count: Arc<AtomicU64>,
    total_size: Arc<AtomicU64>,
}

impl FileCrawler {
    pub fn new() -> Self {
        Self {
            file_count: Arc::new(AtomicU64::new(0)),
            dir_count: Arc::new(AtomicU64::new(0)),
            total_size: Arc::new(AtomicU64::new(0)),
        }
    }

    fn emit_progress(reporter: &Option<ProgressReporter>, progress: ScanProgress) {
        if let Some(cb) = reporter {
            cb(progress);
        }
    }

    fn should_emit_progress(last_emit_ms: &AtomicU64, elapsed_ms: u64) -> bool {
        let previous = last_emit_ms.load(Ordering::Relaxed);
        if elapsed_ms.saturating_sub(previous) < PROGRESS_EMIT_INTERVAL_MS {
            return false;
        }

        last_emit_ms
            .compare_exchange(previous, elapsed_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    fn processing_parallelism() -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        (cores * 2).clamp(4, 64)
    }

    /// Scan `root` and build an inventory serving it.
    pub fn scan<P: AsRef<Path>>(
        &mut self,
        root: P,
        reporter: Option<ProgressReporter>,
    ) -> Result<LocalInventory, FetchError> {
        let root_path = root.as_ref().to_path_buf();
        if !root_path.is_dir() {
            return Err(FetchError::NotFound(root_path.display().to_string()));
        }
        let start = Instant::now();

        self.file_count.store(0, Ordering::Relaxed);
        self.dir_count.store(0, Ordering::Relaxed);
        self.total_size.store(0, Ordering::Relaxed);

        let scan_threads = Self::processing_parallelism();
        let walker = WalkDir::new(&root_path)
            .skip_hidden(false)
            .parallelism(jwalk::Parallelism::RayonNewPool(scan_threads))
            .process_read_dir(|_, _, _, children| {
                children.retain(|entry| {
                    entry
                        .as_ref()
                        .map(|dir_entry| !Self::should_skip_path(&dir_entry.path()))
                        .unwrap_or(true)
                });
            });

        let mut entries = Vec::new();
        let mut discovery_last_emit = Instant::now();
        for entry in walker.into_iter().flatten() {
            if entry.depth == 0 {
                continue;
            }
            entries.push(entry);
            if discovery_last_emit.elapsed().as_millis() as u64 >= PROGRESS_EMIT_INTERVAL_MS {
                discovery_last_emit = Instant::now();
                Self::emit_progress(
                    &reporter,
                    ScanProgress {
                        phase: ScanPhase::Discovering,
                        discovered_entries: entries.len() as u64,
                        processed_entries: 0,
                        total_entries: None,
                    },
                );
            }
        }

        let total_entries = entries.len() as u64;
        let processed_entries = AtomicU64::new(0);
        let processing_last_emit_ms = AtomicU64::new(0);
        let processing_started = Instant::now();

        let process_entries = || {
            entries
                .par_iter()
                .filter_map(|entry| {
                    let processed_now = processed_entries.fetch_add(1, Ordering::Relaxed) + 1;
                    let metadata = entry.metadata().ok()?;
                    let size = metadata.len();
                    let is_dir = metadata.is_dir();

                    if is_dir {
                        self.dir_count.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.file_count.fetch_add(1, Ordering::Relaxed);
                        self.total_size.fetch_add(size, Ordering::Relaxed);
                    }

                    let elapsed_ms = processing_started.elapsed().as_millis() as u64;
                    if processed_now == total_entries
                        || Self::should_emit_progress(&processing_last_emit_ms, elapsed_ms)
                    {
                        Self::emit_progress(
                            &reporter,
                            ScanProgress {
                                phase: ScanPhase::Processing,
                                discovered_entries: total_entries,
                                processed_entries: processed_now,
                                total_entries: Some(total_entries),
                            },
                        );
                    }

                    Some(FileNode {
                        path: entry.path(),
                        size,
                        is_dir,
                    })
                })
                .collect::<Vec<_>>()
        };

        let nodes = ThreadPoolBuilder::new()
            .num_threads(scan_threads)
            .build()
            .map(|pool| pool.install(process_entries))
            .unwrap_or_else(|_| process_entries());

        let dir_sizes = Self::accumulate_dir_sizes(&root_path, &nodes);
        let inventory = Self::build_inventory(&root_path, &nodes, &dir_sizes);

        let stats = ScanStats {
            total_files: self.file_count.load(Ordering::Relaxed),
            total_dirs: self.dir_count.load(Ordering::Relaxed),
            total_size: self.total_size.load(Ordering::Relaxed),
            duration_ms: start.elapsed().as_millis(),
        };
        tracing::info!(
            root = %root_path.display(),
            files = stats.total_files,
            dirs = stats.total_dirs,
            nodes = inventory.len(),
            duration_ms = stats.duration_ms as u64,
            "scan complete"
        );

        Ok(LocalInventory {
            inventory,
            root: path_key(&root_path),
            stats,
        })
    }

    /// Cumulative size of every directory under (and including) the root.
    fn accumulate_dir_sizes(root: &Path, nodes: &[FileNode]) -> DashMap<PathBuf, u64> {
        let sizes: DashMap<PathBuf, u64> = DashMap::new();
        sizes.insert(root.to_path_buf(), 0);
        nodes.par_iter().for_each(|node| {
            if node.is_dir {
                sizes.entry(node.path.clone()).or_insert(0);
                return;
            }
            for ancestor in node.path.ancestors().skip(1) {
                *sizes.entry(ancestor.to_path_buf()).or_insert(0) += node.size;
                if ancestor == root {
                    break;
                }
            }
        });
        sizes
    }

    fn build_inventory(
        root: &Path,
        nodes: &[FileNode],
        dir_sizes: &DashMap<PathBuf, u64>,
    ) -> MemoryInventory {
        let mut dirs: HashMap<&Path, Vec<(String, u64)>> = HashMap::new();
        let mut files: HashMap<&Path, Vec<(String, u64)>> = HashMap::new();
        let mut inventory = MemoryInventory::new();

        for node in nodes {
            let Some(parent) = node.path.parent() else {
                continue;
            };
            if node.is_dir {
                let size = dir_sizes.get(&node.path).map(|s| *s).unwrap_or(0);
                dirs.entry(parent).or_default().push((path_key(&node.path), size));
            } else {
                files.entry(parent).or_default().push((path_key(&node.path), node.size));
                if node.size > 0 {
                    inventory.insert(NodeRecord::file(path_key(&node.path), node.size));
                }
            }
        }

        let mut directories: Vec<&Path> = vec![root];
        directories.extend(nodes.iter().filter(|n| n.is_dir).map(|n| n.path.as_path()));
        for dir in directories {
            let size = dir_sizes.get(dir).map(|s| *s).unwrap_or(0);
            if size == 0 && dir != root {
                continue;
            }
            let kept_dirs = Self::largest(dirs.get(dir), FOLDER_LIMIT);
            let kept_files = Self::largest(files.get(dir), FILE_LIMIT);
            let file_count = files.get(dir).map_or(0, |f| f.len()) as u64;

            let children: Vec<&str> = kept_dirs
                .iter()
                .chain(kept_files.iter())
                .map(|(path, _)| path.as_str())
                .collect();
            let mut record = NodeRecord::directory(path_key(dir), size, &children);
            record.file_count = Some(file_count);
            inventory.insert(record);
        }
        inventory
    }

    /// Entries with positive size, largest first, truncated to `limit`.
    fn largest(entries: Option<&Vec<(String, u64)>>, limit: usize) -> Vec<(String, u64)> {
        let mut kept: Vec<(String, u64)> = entries
            .map(|e| e.iter().filter(|(_, size)| *size > 0).cloned().collect())
            .unwrap_or_default();
        kept.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        kept.truncate(limit);
        kept
    }

    fn should_skip_path(path: &Path) -> bool {
        let mut matched = 0usize;
        const DOCKER_VM_PATH: [&str; 5] = ["Library", "Containers", "com.docker.docker", "Data", "vms"];

        for component in path.components() {
            let Some(part) = component.as_os_str().to_str() else {
                continue;
            };

            if part == DOCKER_VM_PATH[matched] {
                matched += 1;
                if matched == DOCKER_VM_PATH.len() {
                    return true;
                }
            }
        }

        false
    }
}

impl Default for FileCrawler {
    fn default() -> Self {
        Self::new()
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_file(path: &Path, len: usize) {
        fs::write(path, vec![0u8; len]).unwrap();
    }

    #[test]
    fn test_scan_builds_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir(root.join("a")).unwrap();
        fs::create_dir(root.join("empty")).unwrap();
        write_file(&root.join("a/x.bin"), 100);
        write_file(&root.join("top.bin"), 40);
        write_file(&root.join("zero.bin"), 0);

        let mut crawler = FileCrawler::new();
        let scanned = crawler.scan(root, None).unwrap();
        assert_eq!(scanned.stats().total_files, 3);
        assert_eq!(scanned.stats().total_size, 140);

        let root_record = scanned.node_by_path(scanned.root()).unwrap();
        assert_eq!(root_record.size, 140);
        assert_eq!(root_record.file_count, Some(2));
        // Empty directory and zero-size file are not served.
        let children = root_record.child_refs();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0], path_key(&root.join("a")));

        let a = scanned.node_by_id(&children[0]).unwrap();
        assert!(a.is_directory);
        assert_eq!(a.size, 100);
        assert!(scanned.node_by_path(&path_key(&root.join("zero.bin"))).is_err());
    }

    #[test]
    fn test_scan_applies_file_limit() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..(FILE_LIMIT + 10) {
            write_file(&dir.path().join(format!("f{i:03}.dat")), i + 1);
        }
        let mut crawler = FileCrawler::new();
        let scanned = crawler.scan(dir.path(), None).unwrap();
        let root_record = scanned.node_by_path(scanned.root()).unwrap();
        assert_eq!(root_record.child_refs().len(), FILE_LIMIT);
        assert_eq!(root_record.file_count, Some((FILE_LIMIT + 10) as u64));
    }

    #[test]
    fn test_scan_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut crawler = FileCrawler::new();
        assert!(matches!(
            crawler.scan(dir.path().join("nope"), None),
            Err(FetchError::NotFound(_))
        ));
    }

    #[test]
    fn test_progress_fraction() {
        let progress = ScanProgress {
            phase: ScanPhase::Processing,
            discovered_entries: 10,
            processed_entries: 5,
            total_entries: Some(10),
        };
        assert_eq!(progress.fraction(), Some(0.5));
    }

    #[test]
    fn test_skip_abnormal_docker_vm_path() {
        let docker_vm_file = Path::new(
            "/Users/demo/Library/Containers/com.docker.docker/Data/vms/0/data/Docker.raw",
        );
        let normal_file = Path::new("/Users/demo/Documents/test.txt");

        assert!(FileCrawler::should_skip_path(docker_vm_file));
        assert!(!FileCrawler::should_skip_path(normal_file));
    }
}
