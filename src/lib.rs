//! Drill-down spatial map of a filesystem inventory.
//!
//! A view root is partitioned into weighted polygonal cells (power diagram,
//! with a treemap fallback), the loose files of each directory are packed as
//! size-bucketed bubbles, and everything is emitted as five ordered draw
//! passes. [`Explorer`] ties the caches, navigation and rendering together for
//! a host UI.

pub mod cache;
pub mod config;
pub mod crawler;
pub mod error;
pub mod explorer;
pub mod geometry;
pub mod inventory;
pub mod loader;
pub mod nav;
pub mod packing;
pub mod partition;
pub mod physics;
pub mod render;
pub mod tree;
pub mod treemap;
pub mod util;
pub mod watch;

pub use cache::{GeometryCache, TreeCache};
pub use config::VizConfig;
pub use crawler::{FileCrawler, LocalInventory, ScanProgress};
pub use error::{ConfigError, FetchError, WatchError};
pub use explorer::Explorer;
pub use geometry::{Polygon, Rect, Viewport};
pub use inventory::{FetchQuery, FileRef, InventorySource, MemoryInventory, NodeRecord};
pub use loader::{BackgroundLoader, FetchResponse};
pub use nav::{FetchRequest, NavOutcome, NavPhase, Navigator, Ticket};
pub use partition::{PartitionCell, PartitionLayout};
pub use render::{RenderFrame, RenderPipeline, Rgba};
pub use tree::{FileTree, NodeKind, FILE_GROUP_NAME};
pub use watch::SnapshotWatcher;
