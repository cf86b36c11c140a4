//! Five ordered draw passes built from one partition layout.
//!
//! Z-order: background fills (depth 1), preview fills (depth 2), bubbles,
//! labels, hit areas. The frame is toolkit-agnostic; the host maps shapes to
//! its own painter. Bubble groups survive across frames while their cell
//! polygon and file set are unchanged, so repeated renders reuse positions and
//! keep relaxing; a changed group is rebuilt and its old simulation dropped.

use glam::Vec2;
use std::collections::HashMap;

use crate::config::{PackingConfig, RenderConfig};
use crate::geometry::{Polygon, Viewport};
use crate::inventory::FileRef;
use crate::packing::{files_fingerprint, pack, SIZE_BUCKETS};
use crate::partition::{PartitionCell, PartitionLayout};
use crate::physics::Relaxation;
use crate::tree::NodeKind;
use crate::util::format_size;

/// Scales sqrt(cell area) to a font size before clamping.
const LABEL_SCALE: f32 = 0.08;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn with_opacity(self, opacity: f32) -> Self {
        Self {
            a: (opacity.clamp(0.0, 1.0) * 255.0).round() as u8,
            ..self
        }
    }
}

/// Position of `size` on the fixed severity scale: 0 at 1 MB or less, 1 at
/// 1 TB or more, logarithmic in between.
pub fn severity(size: u64) -> f32 {
    let magnitude = (size.max(1) as f64).log10() as f32;
    ((magnitude - 6.0) / 6.0).clamp(0.0, 1.0)
}

/// Temperature palette: cool blues, purple, warm amber, coral.
pub fn severity_color(severity: f32) -> Rgba {
    let t = severity.clamp(0.0, 1.0);
    let (r, g, b) = if t < 0.15 {
        let k = t / 0.15;
        (59.0 + 80.0 * k, 130.0 + 35.0 * k, 246.0)
    } else if t < 0.4 {
        (139.0, 92.0, 246.0)
    } else if t < 0.7 {
        let k = (t - 0.4) / 0.3;
        (245.0 + 6.0 * k, 158.0 + 33.0 * k, 11.0 + 25.0 * k)
    } else {
        let k = (t - 0.7) / 0.3;
        (239.0 + 9.0 * k, 68.0 + 45.0 * k, 68.0 + 45.0 * k)
    };
    Rgba::new(r as u8, g as u8, b as u8, 255)
}

#[derive(Debug, Clone, PartialEq)]
pub struct FillShape {
    pub cell_id: u64,
    pub path: String,
    pub polygon: Polygon,
    pub color: Rgba,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BubbleShape {
    /// Cell the bubble belongs to.
    pub cell_id: u64,
    pub center: Vec2,
    pub radius: f32,
    pub color: Rgba,
    pub file: FileRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelShape {
    pub cell_id: u64,
    pub position: Vec2,
    pub text: String,
    pub detail: String,
    pub font_size: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HitArea {
    pub cell_id: u64,
    pub path: String,
    pub polygon: Polygon,
    /// Directories can be drilled into; file groups only host bubbles.
    pub navigable: bool,
}

/// One frame's draw passes, in paint order.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderFrame {
    pub generation: u64,
    pub viewport: Viewport,
    pub background: Vec<FillShape>,
    pub preview: Vec<FillShape>,
    pub bubbles: Vec<BubbleShape>,
    pub labels: Vec<LabelShape>,
    pub hit_areas: Vec<HitArea>,
}

impl RenderFrame {
    /// Topmost hit area under `point`.
    pub fn hit_test(&self, point: Vec2) -> Option<&HitArea> {
        self.hit_areas.iter().rev().find(|area| area.polygon.contains(point))
    }
}

/// Identifies one bubble in one group instance. A handle taken before its
/// group was rebuilt no longer resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragHandle {
    pub group: String,
    pub generation: u64,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct GroupKey {
    polygon: u64,
    files: u64,
}

struct BubbleGroup {
    key: GroupKey,
    cell_id: u64,
    /// Frame generation that created this group.
    generation: u64,
    relaxation: Relaxation,
}

pub struct RenderPipeline {
    render: RenderConfig,
    packing: PackingConfig,
    groups: HashMap<String, BubbleGroup>,
    generation: u64,
    dragging: Option<DragHandle>,
}

impl RenderPipeline {
    pub fn new(render: RenderConfig, packing: PackingConfig) -> Self {
        Self {
            render,
            packing,
            groups: HashMap::new(),
            generation: 0,
            dragging: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Build the five passes for `layout`.
    pub fn render(&mut self, layout: &PartitionLayout) -> RenderFrame {
        self.generation += 1;
        self.sync_groups(layout);

        let mut frame = RenderFrame {
            generation: self.generation,
            viewport: layout.viewport,
            background: Vec::new(),
            preview: Vec::new(),
            bubbles: Vec::new(),
            labels: Vec::new(),
            hit_areas: Vec::new(),
        };
        let mut rejected = 0usize;

        for cell in &layout.cells {
            if !cell.polygon.is_valid() {
                rejected += 1;
                continue;
            }
            let color = severity_color(severity(cell.size));
            match cell.depth {
                1 => {
                    frame.background.push(FillShape {
                        cell_id: cell.cell_id,
                        path: cell.path.clone(),
                        polygon: cell.polygon.clone(),
                        color: color.with_opacity(self.render.background_opacity),
                    });
                    if let Some(label) = self.label_for(cell, layout.viewport) {
                        frame.labels.push(label);
                    }
                    frame.hit_areas.push(HitArea {
                        cell_id: cell.cell_id,
                        path: cell.path.clone(),
                        polygon: cell.polygon.clone(),
                        navigable: cell.kind == NodeKind::Directory,
                    });
                }
                2 => frame.preview.push(FillShape {
                    cell_id: cell.cell_id,
                    path: cell.path.clone(),
                    polygon: cell.polygon.clone(),
                    color: color.with_opacity(self.render.preview_opacity),
                }),
                _ => {}
            }
        }

        let mut paths: Vec<&String> = self.groups.keys().collect();
        paths.sort();
        for path in paths {
            let group = &self.groups[path];
            for bubble in group.relaxation.bubbles() {
                if !bubble.is_finite() {
                    rejected += 1;
                    continue;
                }
                let severity = bubble.bucket as f32 / (SIZE_BUCKETS.len() - 1) as f32;
                frame.bubbles.push(BubbleShape {
                    cell_id: group.cell_id,
                    center: bubble.center,
                    radius: bubble.radius,
                    color: severity_color(severity),
                    file: bubble.file.clone(),
                });
            }
        }

        if rejected > 0 {
            tracing::debug!(rejected, "filtered malformed geometry");
        }
        frame
    }

    /// Keep groups whose polygon and files are unchanged; rebuild the rest.
    fn sync_groups(&mut self, layout: &PartitionLayout) {
        let mut live: HashMap<String, BubbleGroup> = HashMap::new();
        for cell in layout.cells_at_depth(1) {
            let NodeKind::FileGroup { files } = &cell.kind else {
                continue;
            };
            if files.is_empty() || !cell.polygon.is_valid() {
                continue;
            }
            let key = GroupKey {
                polygon: cell.polygon.fingerprint(),
                files: files_fingerprint(files),
            };
            match self.groups.remove(&cell.path) {
                Some(group) if group.key == key => {
                    live.insert(cell.path.clone(), group);
                }
                _ => {
                    let bubbles = pack(&cell.polygon, files, self.packing.max_bubbles, &self.packing);
                    tracing::debug!(path = %cell.path, bubbles = bubbles.len(), "packed file group");
                    live.insert(
                        cell.path.clone(),
                        BubbleGroup {
                            key,
                            cell_id: cell.cell_id,
                            generation: self.generation,
                            relaxation: Relaxation::new(cell.polygon.clone(), bubbles, &self.packing),
                        },
                    );
                }
            }
        }
        // Whatever is left was replaced or disappeared; its simulation ends here.
        for group in self.groups.values_mut() {
            group.relaxation.stop();
        }
        self.groups = live;

        if let Some(handle) = &self.dragging {
            if !self.resolves(handle) {
                self.dragging = None;
            }
        }
    }

    fn label_for(&self, cell: &PartitionCell, viewport: Viewport) -> Option<LabelShape> {
        if cell.area < self.render.min_label_area {
            return None;
        }
        let max_font = (viewport.short_side() * self.render.max_font_fraction).max(self.render.min_font_size);
        let font_size = (cell.area.sqrt() * LABEL_SCALE).clamp(self.render.min_font_size, max_font);
        let text = match &cell.kind {
            NodeKind::FileGroup { files } => format!("{} files", files.len()),
            _ => cell.name.clone(),
        };
        Some(LabelShape {
            cell_id: cell.cell_id,
            position: cell.centroid,
            text,
            detail: format_size(cell.size),
            font_size,
        })
    }

    /// Advance every live relaxation by one tick. Returns whether any moved.
    pub fn tick(&mut self) -> bool {
        let mut active = false;
        for group in self.groups.values_mut() {
            active |= group.relaxation.step();
        }
        active
    }

    pub fn is_animating(&self) -> bool {
        self.groups.values().any(|group| !group.relaxation.is_settled())
    }

    /// Bubble under `point`, if any.
    pub fn bubble_at(&self, point: Vec2) -> Option<DragHandle> {
        self.groups.iter().find_map(|(path, group)| {
            group.relaxation.bubble_at(point).map(|index| DragHandle {
                group: path.clone(),
                generation: group.generation,
                index,
            })
        })
    }

    fn resolves(&self, handle: &DragHandle) -> bool {
        self.groups
            .get(&handle.group)
            .is_some_and(|group| group.generation == handle.generation)
    }

    pub fn start_drag(&mut self, handle: DragHandle) -> bool {
        if !self.resolves(&handle) {
            return false;
        }
        let Some(group) = self.groups.get_mut(&handle.group) else {
            return false;
        };
        if !group.relaxation.start_drag(handle.index) {
            return false;
        }
        self.dragging = Some(handle);
        true
    }

    /// Move the dragged bubble; returns its accepted center.
    pub fn drag_to(&mut self, point: Vec2) -> Option<Vec2> {
        let handle = self.dragging.as_ref()?;
        self.groups.get_mut(&handle.group)?.relaxation.drag_to(point)
    }

    pub fn end_drag(&mut self) {
        if let Some(handle) = self.dragging.take() {
            if let Some(group) = self.groups.get_mut(&handle.group) {
                group.relaxation.end_drag();
            }
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging.is_some()
    }

    /// Drop every bubble group.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.dragging = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TreeCache;
    use crate::config::PartitionConfig;
    use crate::inventory::NodeRecord;
    use crate::packing::is_valid_packing;
    use crate::partition::partition;
    use crate::tree::FileTree;

    const MB: u64 = 1024 * 1024;

    fn layout_for(viewport: Viewport) -> PartitionLayout {
        let mut cache = TreeCache::new();
        let mut refs = vec!["/r/a".to_string(), "/r/b".to_string()];
        refs.extend((0..12).map(|i| format!("/r/f{i}")));
        let refs: Vec<&str> = refs.iter().map(String::as_str).collect();
        cache.insert(NodeRecord::directory("/r", 0, &refs));
        cache.insert(NodeRecord::directory("/r/a", 400 * MB, &["/r/a/x", "/r/a/y"]));
        cache.insert(NodeRecord::directory("/r/b", 100 * MB, &[]));
        cache.insert(NodeRecord::directory("/r/a/x", 300 * MB, &[]));
        cache.insert(NodeRecord::file("/r/a/y", 100 * MB));
        for i in 0..12 {
            cache.insert(NodeRecord::file(format!("/r/f{i}"), (i + 1) * 20 * MB));
        }
        let tree = FileTree::build(&cache, "/r", 2).unwrap();
        partition(&tree, viewport, &PartitionConfig::default())
    }

    fn pipeline() -> RenderPipeline {
        RenderPipeline::new(RenderConfig::default(), PackingConfig::default())
    }

    #[test]
    fn test_passes_follow_partition() {
        let layout = layout_for(Viewport::new(900.0, 600.0));
        let frame = pipeline().render(&layout);

        assert_eq!(frame.background.len(), 3);
        assert_eq!(frame.preview.len(), 2);
        assert_eq!(frame.hit_areas.len(), frame.background.len());
        for (fill, hit) in frame.background.iter().zip(&frame.hit_areas) {
            assert_eq!(fill.polygon, hit.polygon);
        }
        assert!(frame.preview.iter().all(|fill| fill.color.a < frame.background[0].color.a));
        assert!(!frame.bubbles.is_empty());
        assert!(frame.bubbles.iter().all(|b| b.radius > 0.0 && b.center.is_finite()));

        let navigable: Vec<bool> = frame.hit_areas.iter().map(|h| h.navigable).collect();
        assert_eq!(navigable.iter().filter(|n| **n).count(), 2);
    }

    #[test]
    fn test_labels_sized_and_thresholded() {
        let viewport = Viewport::new(900.0, 600.0);
        let layout = layout_for(viewport);
        let frame = pipeline().render(&layout);
        let config = RenderConfig::default();
        for label in &frame.labels {
            assert!(label.font_size >= config.min_font_size);
            assert!(label.font_size <= viewport.short_side() * config.max_font_fraction + 1e-3);
        }

        let mut quiet = RenderPipeline::new(
            RenderConfig {
                min_label_area: f32::MAX,
                ..RenderConfig::default()
            },
            PackingConfig::default(),
        );
        assert!(quiet.render(&layout).labels.is_empty());
    }

    #[test]
    fn test_bubbles_reused_for_same_geometry() {
        let layout = layout_for(Viewport::new(900.0, 600.0));
        let mut pipeline = pipeline();
        let first = pipeline.render(&layout);
        let second = pipeline.render(&layout);
        assert_eq!(first.bubbles, second.bubbles);
        assert_eq!(second.generation, first.generation + 1);

        let handle = pipeline.bubble_at(first.bubbles[0].center).unwrap();
        pipeline.render(&layout_for(Viewport::new(700.0, 600.0)));
        assert_eq!(pipeline.group_count(), 1);
        // The group was rebuilt for the new polygon, so the old handle is stale.
        assert!(!pipeline.start_drag(handle));
    }

    #[test]
    fn test_ticks_keep_bubbles_contained() {
        let layout = layout_for(Viewport::new(900.0, 600.0));
        let mut pipeline = pipeline();
        pipeline.render(&layout);
        while pipeline.tick() {}
        assert!(!pipeline.is_animating());

        let frame = pipeline.render(&layout);
        let group = layout.find("/r/__files__").unwrap();
        let bubbles: Vec<crate::packing::Bubble> = frame
            .bubbles
            .iter()
            .map(|b| crate::packing::Bubble {
                center: b.center,
                radius: b.radius,
                file: b.file.clone(),
                bucket: 0,
            })
            .collect();
        assert!(is_valid_packing(&group.polygon, &bubbles, PackingConfig::default().gap));
    }

    #[test]
    fn test_drag_through_pipeline() {
        let layout = layout_for(Viewport::new(900.0, 600.0));
        let mut pipeline = pipeline();
        let frame = pipeline.render(&layout);
        let handle = pipeline.bubble_at(frame.bubbles[0].center).unwrap();

        assert!(pipeline.start_drag(handle));
        let center = pipeline.drag_to(Vec2::new(-100.0, -100.0)).unwrap();
        let group = layout.find("/r/__files__").unwrap();
        assert!(group.polygon.contains(center));
        pipeline.end_drag();
        assert!(!pipeline.is_dragging());
        assert!(pipeline.is_animating());
    }

    #[test]
    fn test_malformed_cells_filtered() {
        let mut layout = layout_for(Viewport::new(900.0, 600.0));
        layout.cells[0].polygon = Polygon::new(vec![
            Vec2::new(f32::NAN, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, 1.0),
        ]);
        let frame = pipeline().render(&layout);
        assert_eq!(frame.background.len(), 2);
        assert_eq!(frame.hit_areas.len(), 2);
    }

    #[test]
    fn test_severity_scale() {
        assert_eq!(severity(0), 0.0);
        assert_eq!(severity(1_000_000_000_000), 1.0);
        assert!(severity(1_000_000_000) > severity(10_000_000));
        assert_eq!(severity_color(0.0), Rgba::new(59, 130, 246, 255));
    }
}
