//! Space partitioning: every level of the view tree is subdivided into
//! polygonal cells whose areas follow the children's weights.
//!
//! A level is first attempted as a weighted power diagram (Voronoi with
//! additive weights) clipped to the parent cell and relaxed toward the target
//! areas. If that does not produce valid cells within tolerance, the level is
//! laid out by the proportional fallbacks in [`crate::treemap`], which never
//! fail.

use glam::Vec2;
use indextree::NodeId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::f32::consts::{PI, TAU};

use crate::config::PartitionConfig;
use crate::geometry::{Polygon, Viewport};
use crate::tree::{FileTree, NodeKind};
use crate::treemap::{proportional_layout, TreemapItem};
use crate::util::stable_hash;

const SEED_ATTEMPTS: u64 = 32;
const MIN_SITE_SEPARATION: f32 = 0.5;
const MIN_ADAPT_RATIO: f32 = 0.5;
const MAX_ADAPT_RATIO: f32 = 2.0;
const WEIGHT_FLOOR: f32 = 1e-3;

/// One node's on-screen region.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionCell {
    /// Opaque identity, stable for a given path and depth.
    pub cell_id: u64,
    pub path: String,
    pub name: String,
    pub kind: NodeKind,
    pub size: u64,
    pub weight: f64,
    /// 1 for children of the view root, 2 for the preview level.
    pub depth: u8,
    /// Index of the enclosing cell in [`PartitionLayout::cells`].
    pub parent: Option<usize>,
    pub polygon: Polygon,
    pub centroid: Vec2,
    pub area: f32,
}

/// Flattened partition of one view: depth-1 cells first, then depth 2.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionLayout {
    pub root_path: String,
    pub viewport: Viewport,
    pub clip: Polygon,
    pub cells: Vec<PartitionCell>,
    /// Levels that were laid out by the fallback instead of the power diagram.
    pub fallback_levels: usize,
}

impl PartitionLayout {
    pub fn empty(root_path: &str, viewport: Viewport, clip: Polygon) -> Self {
        Self {
            root_path: root_path.to_string(),
            viewport,
            clip,
            cells: Vec::new(),
            fallback_levels: 0,
        }
    }

    pub fn cells_at_depth(&self, depth: u8) -> impl Iterator<Item = &PartitionCell> + '_ {
        self.cells.iter().filter(move |cell| cell.depth == depth)
    }

    pub fn find(&self, path: &str) -> Option<&PartitionCell> {
        self.cells.iter().find(|cell| cell.path == path)
    }

    /// Depth-1 cell under `point`.
    pub fn hit_test(&self, point: Vec2) -> Option<&PartitionCell> {
        self.cells_at_depth(1).find(|cell| cell.polygon.contains(point))
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// A generator of the power diagram: an identity hash and a target weight.
#[derive(Debug, Clone, Copy)]
pub struct Site {
    pub key: u64,
    pub weight: f64,
}

/// Partition `tree` into the padded viewport, down to the preview depth.
pub fn partition(tree: &FileTree, viewport: Viewport, config: &PartitionConfig) -> PartitionLayout {
    let clip = viewport.rect().inset(config.viewport_padding).to_polygon();
    let mut layout = PartitionLayout::empty(&tree.root_node().path, viewport, clip.clone());

    let mut queue: VecDeque<(NodeId, Polygon, Option<usize>)> = VecDeque::new();
    queue.push_back((tree.root(), clip, None));

    while let Some((node_id, region, parent)) = queue.pop_front() {
        let children: Vec<NodeId> = tree.children(node_id).collect();
        if children.is_empty() {
            continue;
        }
        let depth = tree.node(node_id).depth + 1;
        let sites: Vec<Site> = children
            .iter()
            .map(|&id| {
                let node = tree.node(id);
                Site {
                    key: stable_hash(&node.path),
                    weight: node.weight,
                }
            })
            .collect();

        let (polygons, fell_back) = subdivide(&sites, &region, config);
        if fell_back {
            layout.fallback_levels += 1;
        }

        for (&child, polygon) in children.iter().zip(polygons) {
            let node = tree.node(child);
            if !polygon.is_valid() {
                tracing::debug!(path = %node.path, "dropping degenerate cell");
                continue;
            }
            let index = layout.cells.len();
            if node.kind == NodeKind::Directory && depth < config.preview_depth {
                queue.push_back((child, polygon.clone(), Some(index)));
            }
            layout.cells.push(PartitionCell {
                cell_id: stable_hash(&(node.path.as_str(), depth)),
                path: node.path.clone(),
                name: node.name.clone(),
                kind: node.kind.clone(),
                size: node.size,
                weight: node.weight,
                depth,
                parent,
                centroid: polygon.centroid(),
                area: polygon.area(),
                polygon,
            });
        }
    }

    tracing::debug!(
        root = %layout.root_path,
        cells = layout.cells.len(),
        fallback_levels = layout.fallback_levels,
        "partition computed"
    );
    layout
}

/// Subdivide `clip` among `sites`, returning one polygon per site (in order)
/// and whether the fallback layout was used.
pub fn subdivide(sites: &[Site], clip: &Polygon, config: &PartitionConfig) -> (Vec<Polygon>, bool) {
    match sites.len() {
        0 => return (Vec::new(), false),
        1 => return (vec![clip.clone()], false),
        _ => {}
    }
    if clip.is_valid() && sites.len() <= config.max_power_sites {
        if let Some(cells) = PowerDiagram::new(sites, clip).solve(config) {
            return (cells, false);
        }
    }
    tracing::debug!(sites = sites.len(), "power diagram rejected, using fallback layout");
    (fallback_layout(sites, clip), true)
}

fn fallback_layout(sites: &[Site], clip: &Polygon) -> Vec<Polygon> {
    let items: Vec<TreemapItem> = sites
        .iter()
        .enumerate()
        .map(|(index, site)| TreemapItem {
            weight: site.weight.max(1.0),
            index,
        })
        .collect();
    let mut out = vec![Polygon::default(); sites.len()];
    for cell in proportional_layout(&items, clip) {
        out[cell.index] = cell.polygon;
    }
    out
}

/// Iterative power-diagram solver for one level.
struct PowerDiagram<'a> {
    clip: &'a Polygon,
    clip_area: f32,
    targets: Vec<f32>,
    positions: Vec<Vec2>,
    weights: Vec<f32>,
    keys: Vec<u64>,
}

impl<'a> PowerDiagram<'a> {
    fn new(sites: &[Site], clip: &'a Polygon) -> Self {
        let clip_area = clip.area();
        let total: f64 = sites.iter().map(|site| site.weight.max(1.0)).sum();
        let targets: Vec<f32> = sites
            .iter()
            .map(|site| (site.weight.max(1.0) / total) as f32 * clip_area)
            .collect();
        let keys: Vec<u64> = sites.iter().map(|site| site.key).collect();

        let mut diagram = Self {
            clip,
            clip_area,
            weights: targets.iter().map(|target| target / PI).collect(),
            positions: Vec::new(),
            targets,
            keys,
        };
        diagram.positions = diagram.seed_positions();
        diagram.separate_coincident();
        diagram.cap_weights();
        diagram
    }

    /// Deterministic initial sites: random points inside the clip, seeded
    /// from each site's key.
    fn seed_positions(&self) -> Vec<Vec2> {
        let centroid = self.clip.centroid();
        let Some((min, max)) = self.clip.bounds() else {
            return vec![centroid; self.keys.len()];
        };
        self.keys
            .iter()
            .map(|&key| {
                let mut rng = StdRng::seed_from_u64(stable_hash(&key));
                (0..SEED_ATTEMPTS)
                    .map(|_| {
                        Vec2::new(
                            rng.gen_range(min.x..=max.x),
                            rng.gen_range(min.y..=max.y),
                        )
                    })
                    .find(|point| self.clip.contains(*point))
                    .unwrap_or(centroid)
            })
            .collect()
    }

    /// Nudge sites that sit on top of an earlier one.
    fn separate_coincident(&mut self) {
        for i in 1..self.positions.len() {
            for j in 0..i {
                if self.positions[i].distance(self.positions[j]) >= MIN_SITE_SEPARATION {
                    continue;
                }
                let mut rng = StdRng::seed_from_u64(stable_hash(&(self.keys[i], j)));
                let direction = Vec2::from_angle(rng.gen_range(0.0..TAU));
                let nudge = direction * MIN_SITE_SEPARATION * 2.0;
                let forward = self.positions[i] + nudge;
                self.positions[i] = if self.clip.contains(forward) {
                    forward
                } else {
                    self.positions[i] - nudge
                };
            }
        }
    }

    /// Keep every site inside its own cell: no weight exceeds the squared
    /// distance to the nearest other site.
    fn cap_weights(&mut self) {
        for i in 0..self.positions.len() {
            let nearest = self
                .positions
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, other)| self.positions[i].distance_squared(*other))
                .fold(f32::INFINITY, f32::min);
            self.weights[i] = self.weights[i].min(nearest).max(WEIGHT_FLOOR);
        }
    }

    fn cells(&self) -> Vec<Polygon> {
        let n = self.positions.len();
        (0..n)
            .map(|i| {
                let mut cell = self.clip.clone();
                for j in 0..n {
                    if i == j {
                        continue;
                    }
                    let normal = self.positions[j] - self.positions[i];
                    if normal.length_squared() <= f32::EPSILON {
                        continue;
                    }
                    let midpoint = (self.positions[i] + self.positions[j]) * 0.5;
                    let offset = normal.dot(midpoint) + 0.5 * (self.weights[i] - self.weights[j]);
                    cell = cell.clip_half_plane(normal, offset);
                    if cell.is_empty() {
                        break;
                    }
                }
                cell
            })
            .collect()
    }

    /// Worst area miss of `cells`: absolute (relative to the clip area) and
    /// per cell (relative to that cell's own target).
    fn error(&self, cells: &[Polygon]) -> AreaError {
        cells.iter().zip(&self.targets).fold(AreaError::default(), |worst, (cell, &target)| {
            let miss = (cell.area() - target).abs();
            AreaError {
                absolute: worst.absolute.max(miss / self.clip_area),
                relative: worst.relative.max(miss / target.max(f32::EPSILON)),
            }
        })
    }

    /// Relax sites and weights; `None` when no acceptable diagram was found.
    fn solve(mut self, config: &PartitionConfig) -> Option<Vec<Polygon>> {
        let mut best: Option<(AreaError, Vec<Polygon>)> = None;

        for _ in 0..config.max_iterations {
            let cells = self.cells();
            let error = self.error(&cells);
            let valid = cells.iter().all(Polygon::is_valid);
            let score = error.score(config);
            if valid && best.as_ref().map_or(true, |(best_error, _)| score < best_error.score(config)) {
                best = Some((error, cells.clone()));
            }
            if valid
                && error.absolute <= config.convergence_tolerance
                && error.relative <= config.cell_tolerance
            {
                break;
            }

            for (i, cell) in cells.iter().enumerate() {
                if cell.is_valid() {
                    self.positions[i] = cell.centroid();
                }
                let ratio = (self.targets[i] / cell.area().max(f32::EPSILON))
                    .clamp(MIN_ADAPT_RATIO, MAX_ADAPT_RATIO);
                self.weights[i] *= ratio;
            }
            self.separate_coincident();
            self.cap_weights();
        }

        let (error, cells) = best?;
        if error.score(config) <= 1.0 {
            Some(cells)
        } else {
            tracing::debug!(
                absolute = error.absolute,
                relative = error.relative,
                "power diagram did not converge"
            );
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AreaError {
    absolute: f32,
    relative: f32,
}

impl AreaError {
    /// Above 1.0 when either bound of the acceptance check is broken.
    fn score(&self, config: &PartitionConfig) -> f32 {
        (self.absolute / config.acceptance_tolerance).max(self.relative / config.cell_tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TreeCache;
    use crate::inventory::NodeRecord;

    fn tree_of(sizes: &[u64]) -> FileTree {
        let mut cache = TreeCache::new();
        let paths: Vec<String> = (0..sizes.len()).map(|i| format!("/r/d{i}")).collect();
        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        cache.insert(NodeRecord::directory("/r", sizes.iter().sum(), &refs));
        for (path, &size) in paths.iter().zip(sizes) {
            cache.insert(NodeRecord::directory(path.clone(), size, &[]));
        }
        FileTree::build(&cache, "/r", 2).unwrap()
    }

    fn config() -> PartitionConfig {
        PartitionConfig {
            viewport_padding: 0.0,
            ..PartitionConfig::default()
        }
    }

    #[test]
    fn test_areas_follow_weights() {
        let tree = tree_of(&[6, 3, 1]);
        let layout = partition(&tree, Viewport::new(600.0, 400.0), &config());
        let clip_area = layout.clip.area();

        assert_eq!(layout.cells.len(), 3);
        for (cell, expected) in layout.cells.iter().zip([0.6, 0.3, 0.1]) {
            assert!(cell.polygon.is_valid());
            let share = cell.area / clip_area;
            assert!((share - expected).abs() < 0.05, "{} got {share}", cell.path);
        }
    }

    #[test]
    fn test_depth_one_cells_cover_clip() {
        let tree = tree_of(&[50, 20, 20, 5, 3, 1, 1]);
        let layout = partition(&tree, Viewport::new(1024.0, 768.0), &config());
        let total: f32 = layout.cells_at_depth(1).map(|cell| cell.area).sum();
        let clip_area = layout.clip.area();
        assert!((total - clip_area).abs() / clip_area < 0.01);
    }

    #[test]
    fn test_zero_size_is_safe() {
        let tree = tree_of(&[0, 0, 10]);
        let layout = partition(&tree, Viewport::new(300.0, 300.0), &config());
        assert_eq!(layout.cells.len(), 3);
        for cell in &layout.cells {
            assert!(cell.polygon.is_valid());
            assert!(cell.area > 0.0);
            assert!(cell.centroid.is_finite());
        }
    }

    #[test]
    fn test_deterministic_and_viewport_sensitive() {
        let tree = tree_of(&[6, 3, 1, 1]);
        let a = partition(&tree, Viewport::new(800.0, 600.0), &config());
        let b = partition(&tree, Viewport::new(800.0, 600.0), &config());
        assert_eq!(a, b);

        let c = partition(&tree, Viewport::new(500.0, 600.0), &config());
        assert_ne!(a.cells[0].polygon, c.cells[0].polygon);
        let clip_area = c.clip.area();
        let total: f32 = c.cells_at_depth(1).map(|cell| cell.area).sum();
        assert!((total - clip_area).abs() / clip_area < 0.01);
    }

    #[test]
    fn test_preview_cells_nest_inside_parents() {
        let mut cache = TreeCache::new();
        cache.insert(NodeRecord::directory("/r", 100, &["/r/a", "/r/b"]));
        cache.insert(NodeRecord::directory("/r/a", 70, &["/r/a/x", "/r/a/y"]));
        cache.insert(NodeRecord::directory("/r/b", 30, &[]));
        cache.insert(NodeRecord::directory("/r/a/x", 40, &[]));
        cache.insert(NodeRecord::file("/r/a/y", 30));
        let tree = FileTree::build(&cache, "/r", 2).unwrap();

        let layout = partition(&tree, Viewport::new(640.0, 480.0), &config());
        assert_eq!(layout.cells_at_depth(1).count(), 2);
        assert_eq!(layout.cells_at_depth(2).count(), 2);
        // Depth 1 first.
        assert!(layout.cells[..2].iter().all(|cell| cell.depth == 1));

        for cell in layout.cells_at_depth(2) {
            let parent = &layout.cells[cell.parent.unwrap()];
            assert_eq!(parent.path, "/r/a");
            assert!(parent.polygon.contains(cell.centroid));
        }
        let a = layout.find("/r/a").unwrap();
        let children: f32 = layout.cells_at_depth(2).map(|cell| cell.area).sum();
        assert!((children - a.area).abs() / a.area < 0.01);
    }

    #[test]
    fn test_subdivide_triangle() {
        let triangle = Polygon::new(vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(400.0, 0.0),
            Vec2::new(0.0, 400.0),
        ]);
        let sites = [
            Site { key: 1, weight: 3.0 },
            Site { key: 2, weight: 1.0 },
        ];
        let (cells, _) = subdivide(&sites, &triangle, &config());
        let total = triangle.area();
        assert!((cells[0].area() / total - 0.75).abs() < 0.05);
        assert!((cells[1].area() / total - 0.25).abs() < 0.05);
    }

    #[test]
    fn test_too_many_sites_fall_back() {
        let sizes: Vec<u64> = (1..=20).collect();
        let tree = tree_of(&sizes);
        let config = PartitionConfig {
            max_power_sites: 10,
            ..config()
        };
        let layout = partition(&tree, Viewport::new(800.0, 600.0), &config);
        assert_eq!(layout.fallback_levels, 1);
        assert_eq!(layout.cells.len(), 20);
        let clip_area = layout.clip.area();
        let total_weight: f64 = sizes.iter().sum::<u64>() as f64;
        for cell in &layout.cells {
            let expected = (cell.weight / total_weight) as f32;
            assert!((cell.area / clip_area - expected).abs() < 0.01);
            assert!(cell.polygon.as_axis_rect().is_some());
        }
    }

    #[test]
    fn test_small_cells_match_their_own_targets() {
        let config = PartitionConfig::default();
        for case in 0..12u64 {
            let mut sizes = vec![1000 + case * 7];
            sizes.extend((0..2 + case % 8).map(|i| 1 + (i * 5 + case) % 20));
            let tree = tree_of(&sizes);
            let layout = partition(&tree, Viewport::new(1000.0, 700.0), &config);

            let clip_area = layout.clip.area();
            let total_weight = tree.total_weight();
            for cell in layout.cells_at_depth(1) {
                let target = (cell.weight / total_weight) as f32 * clip_area;
                let miss = (cell.area - target).abs() / target;
                assert!(
                    miss <= config.cell_tolerance + 1e-3,
                    "case {case} {}: target {target} got {}",
                    cell.path,
                    cell.area
                );
            }
        }
    }

    #[test]
    fn test_hit_test_depth_one() {
        let tree = tree_of(&[1, 1]);
        let layout = partition(&tree, Viewport::new(200.0, 100.0), &config());
        let cell = layout.cells[0].clone();
        assert_eq!(layout.hit_test(cell.centroid).map(|c| c.path.clone()), Some(cell.path));
        assert!(layout.hit_test(Vec2::new(-5.0, -5.0)).is_none());
    }
}
