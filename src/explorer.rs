use glam::Vec2;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::{GeometryCache, TreeCache};
use crate::config::VizConfig;
use crate::error::FetchError;
use crate::geometry::Viewport;
use crate::inventory::NodeRecord;
use crate::nav::{NavOutcome, NavPhase, Navigator, Ticket};
use crate::partition::{partition, PartitionCell, PartitionLayout};
use crate::render::{DragHandle, RenderFrame, RenderPipeline};
use crate::tree::{FileTree, NodeKind};

#[derive(Debug, Clone)]
struct ShownView {
    path: String,
    cache_version: u64,
    viewport: Viewport,
    layout: Arc<PartitionLayout>,
}

/// The engine as seen by a host: owns the caches, the navigator and the
/// render pipeline, and answers every question the UI asks about the map.
///
/// Fetches are not performed here. Navigation calls return
/// [`NavOutcome::Fetch`] and the host reports back through
/// [`Explorer::complete_fetch`].
pub struct Explorer {
    config: VizConfig,
    cache: TreeCache,
    geometry: GeometryCache,
    navigator: Navigator,
    pipeline: RenderPipeline,
    shown: Option<ShownView>,
    hovered: Option<String>,
    selected: Option<String>,
}

impl Explorer {
    pub fn new(base_root: impl Into<String>, config: VizConfig) -> Self {
        let navigator = Navigator::new(
            base_root,
            config.partition.preview_depth,
            config.navigation.fetch_timeout(),
        );
        let pipeline = RenderPipeline::new(config.render.clone(), config.packing.clone());
        Self {
            config,
            cache: TreeCache::new(),
            geometry: GeometryCache::new(),
            navigator,
            pipeline,
            shown: None,
            hovered: None,
            selected: None,
        }
    }

    pub fn config(&self) -> &VizConfig {
        &self.config
    }

    pub fn cache(&self) -> &TreeCache {
        &self.cache
    }

    pub fn geometry_cache(&self) -> &GeometryCache {
        &self.geometry
    }

    pub fn phase(&self) -> &NavPhase {
        self.navigator.phase()
    }

    pub fn is_locked(&self) -> bool {
        self.navigator.is_locked()
    }

    pub fn base_root(&self) -> &str {
        self.navigator.base_root()
    }

    pub fn effective_path(&self) -> &str {
        self.navigator.effective_path()
    }

    pub fn breadcrumbs(&self) -> Vec<String> {
        self.navigator.breadcrumbs()
    }

    /// Load the initial view.
    pub fn start(&mut self) -> NavOutcome {
        self.navigator.start(&self.cache, Instant::now())
    }

    pub fn drill_down(&mut self, path: &str) -> NavOutcome {
        let outcome = self.navigator.drill_down(path, &self.cache, Instant::now());
        self.after_navigation(&outcome);
        outcome
    }

    pub fn go_back(&mut self) -> NavOutcome {
        let outcome = self.navigator.go_back(&self.cache, Instant::now());
        self.after_navigation(&outcome);
        outcome
    }

    pub fn go_to_breadcrumb(&mut self, path: &str) -> NavOutcome {
        let outcome = self.navigator.go_to_breadcrumb(path, &self.cache, Instant::now());
        self.after_navigation(&outcome);
        outcome
    }

    pub fn retry(&mut self) -> NavOutcome {
        self.navigator.retry(&self.cache, Instant::now())
    }

    pub fn complete_fetch(&mut self, ticket: Ticket, result: Result<Vec<NodeRecord>, FetchError>) -> NavOutcome {
        self.navigator
            .complete(ticket, result, &mut self.cache, Instant::now())
    }

    pub fn check_timeout(&mut self) -> NavOutcome {
        self.navigator.check_timeout(Instant::now())
    }

    /// Switch to a new snapshot rooted at `base_root`. Every cache is dropped
    /// and navigation restarts from the root.
    pub fn set_snapshot(&mut self, base_root: impl Into<String>) -> NavOutcome {
        let base_root = base_root.into();
        tracing::info!(root = %base_root, "snapshot changed, clearing caches");
        self.cache.clear();
        self.geometry.clear();
        self.pipeline.clear();
        self.shown = None;
        self.hovered = None;
        self.selected = None;
        self.navigator.reset(base_root);
        self.start()
    }

    fn after_navigation(&mut self, outcome: &NavOutcome) {
        if matches!(outcome, NavOutcome::Ready | NavOutcome::Fetch(_)) {
            self.hovered = None;
            self.selected = None;
            self.pipeline.end_drag();
        }
    }

    /// Partition of the current view for `viewport`.
    ///
    /// While a navigation is loading the previously shown layout is kept, so
    /// the map never flashes a half-fetched window.
    pub fn layout(&mut self, viewport: Viewport) -> Option<Arc<PartitionLayout>> {
        if self.navigator.is_locked() {
            return self.shown.as_ref().map(|shown| Arc::clone(&shown.layout));
        }

        let path = self.navigator.effective_path().to_string();
        let version = self.cache.version();
        if let Some(shown) = &self.shown {
            if shown.path == path && shown.cache_version == version && shown.viewport.matches(&viewport) {
                return Some(Arc::clone(&shown.layout));
            }
        }

        let Some(tree) = FileTree::build(&self.cache, &path, self.config.partition.preview_depth) else {
            self.shown = None;
            return None;
        };
        let fingerprint = tree.fingerprint();
        let layout = match self.geometry.get(&path, viewport, fingerprint) {
            Some(hit) => hit,
            None => {
                let computed = Arc::new(partition(&tree, viewport, &self.config.partition));
                self.geometry
                    .insert(&path, viewport, fingerprint, Arc::clone(&computed));
                computed
            }
        };

        self.shown = Some(ShownView {
            path,
            cache_version: version,
            viewport,
            layout: Arc::clone(&layout),
        });
        Some(layout)
    }

    /// Render the current view.
    pub fn frame(&mut self, viewport: Viewport) -> Option<RenderFrame> {
        let layout = self.layout(viewport)?;
        Some(self.pipeline.render(&layout))
    }

    /// Cells of the last computed layout.
    pub fn cells(&self) -> &[PartitionCell] {
        self.shown
            .as_ref()
            .map(|shown| shown.layout.cells.as_slice())
            .unwrap_or(&[])
    }

    fn cell(&self, path: Option<&String>) -> Option<&PartitionCell> {
        let path = path?;
        self.shown.as_ref()?.layout.find(path)
    }

    fn cell_at(&self, point: Vec2) -> Option<&PartitionCell> {
        self.shown.as_ref()?.layout.hit_test(point)
    }

    pub fn hovered(&self) -> Option<&PartitionCell> {
        self.cell(self.hovered.as_ref())
    }

    pub fn selected(&self) -> Option<&PartitionCell> {
        self.cell(self.selected.as_ref())
    }

    /// Track the pointer. Returns the depth-1 cell under it.
    pub fn set_hover(&mut self, point: Option<Vec2>) -> Option<&PartitionCell> {
        self.hovered = point
            .and_then(|point| self.cell_at(point))
            .map(|cell| cell.path.clone());
        self.hovered()
    }

    /// Select the cell under `point` without navigating.
    pub fn select(&mut self, point: Vec2) -> Option<&PartitionCell> {
        self.selected = self.cell_at(point).map(|cell| cell.path.clone());
        self.selected()
    }

    /// Primary click: directories are drilled into, file groups are selected.
    pub fn click(&mut self, point: Vec2) -> NavOutcome {
        let Some(cell) = self.cell_at(point) else {
            return NavOutcome::Ignored;
        };
        match cell.kind {
            NodeKind::Directory => {
                let path = cell.path.clone();
                self.drill_down(&path)
            }
            NodeKind::File | NodeKind::FileGroup { .. } => {
                self.selected = Some(cell.path.clone());
                NavOutcome::Ignored
            }
        }
    }

    /// Advance bubble relaxation. Returns whether anything moved.
    pub fn tick(&mut self) -> bool {
        self.pipeline.tick()
    }

    pub fn is_animating(&self) -> bool {
        self.pipeline.is_animating()
    }

    /// Grab the bubble under `point`, if there is one.
    pub fn begin_drag(&mut self, point: Vec2) -> bool {
        match self.pipeline.bubble_at(point) {
            Some(handle) => self.pipeline.start_drag(handle),
            None => false,
        }
    }

    pub fn bubble_at(&self, point: Vec2) -> Option<DragHandle> {
        self.pipeline.bubble_at(point)
    }

    pub fn drag_to(&mut self, point: Vec2) -> Option<Vec2> {
        self.pipeline.drag_to(point)
    }

    pub fn end_drag(&mut self) {
        self.pipeline.end_drag();
    }

    pub fn is_dragging(&self) -> bool {
        self.pipeline.is_dragging()
    }
}
