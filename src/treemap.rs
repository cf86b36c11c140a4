//! Proportional subdivisions that always succeed. Used whenever the power
//! diagram cannot produce an acceptable partition.

use glam::Vec2;

use crate::geometry::{Polygon, Rect};

/// Item to be laid out, weight in arbitrary positive units.
#[derive(Debug, Clone, Copy)]
pub struct TreemapItem {
    pub weight: f64,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct LayoutCell {
    pub polygon: Polygon,
    pub index: usize,
}

/// Pick the best available fallback for the region.
pub fn proportional_layout(items: &[TreemapItem], region: &Polygon) -> Vec<LayoutCell> {
    match region.as_axis_rect() {
        Some(rect) => SquarifiedTreemap::layout(items, rect)
            .into_iter()
            .map(|(index, rect)| LayoutCell {
                polygon: rect.to_polygon(),
                index,
            })
            .collect(),
        None => slice_layout(items, region),
    }
}

/// Squarified Treemap Algorithm (Bruls, Huizing, van Wijk)
pub struct SquarifiedTreemap;

impl SquarifiedTreemap {
    pub fn layout(items: &[TreemapItem], container: Rect) -> Vec<(usize, Rect)> {
        let total: f64 = items.iter().map(|item| item.weight.max(0.0)).sum();
        if items.is_empty() || total <= 0.0 || container.area() <= 0.0 {
            return Vec::new();
        }

        let scale = container.area() as f64 / total;
        let mut areas: Vec<(usize, f32)> = items
            .iter()
            .map(|item| (item.index, (item.weight.max(0.0) * scale) as f32))
            .collect();
        areas.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut result = Vec::with_capacity(items.len());
        let mut container = container;
        let mut row: Vec<(usize, f32)> = Vec::new();
        let mut pending = areas.into_iter().peekable();

        while let Some(&next) = pending.peek() {
            if row.is_empty() {
                row.push(next);
                pending.next();
                continue;
            }
            let current = Self::worst_aspect_ratio(&row, container);
            row.push(next);
            if Self::worst_aspect_ratio(&row, container) <= current {
                pending.next();
            } else {
                row.pop();
                container = Self::place_row(&row, container, &mut result);
                row.clear();
            }
        }
        if !row.is_empty() {
            Self::place_row(&row, container, &mut result);
        }
        result
    }

    fn worst_aspect_ratio(row: &[(usize, f32)], container: Rect) -> f32 {
        let total: f32 = row.iter().map(|(_, area)| area).sum();
        let side = container.short_side();
        if total <= 0.0 || side <= 0.0 {
            return f32::INFINITY;
        }
        let max_area = row.iter().map(|(_, a)| *a).fold(0.0f32, f32::max);
        let min_area = row.iter().map(|(_, a)| *a).fold(f32::INFINITY, f32::min);
        let wide = (side * side * max_area) / (total * total);
        let narrow = (total * total) / (side * side * min_area.max(f32::MIN_POSITIVE));
        wide.max(narrow)
    }

    /// Lay the row along the short side; return the rectangle left over.
    fn place_row(row: &[(usize, f32)], container: Rect, out: &mut Vec<(usize, Rect)>) -> Rect {
        let total: f32 = row.iter().map(|(_, area)| area).sum();
        let horizontal = container.width >= container.height;
        let length = if horizontal { container.height } else { container.width };
        let breadth = if length > 0.0 { total / length } else { 0.0 };

        let mut offset = 0.0f32;
        for &(index, area) in row {
            let span = if total > 0.0 { area / total * length } else { 0.0 };
            let rect = if horizontal {
                Rect::new(container.x, container.y + offset, breadth, span)
            } else {
                Rect::new(container.x + offset, container.y, span, breadth)
            };
            out.push((index, rect));
            offset += span;
        }

        if horizontal {
            Rect::new(
                container.x + breadth,
                container.y,
                (container.width - breadth).max(0.0),
                container.height,
            )
        } else {
            Rect::new(
                container.x,
                container.y + breadth,
                container.width,
                (container.height - breadth).max(0.0),
            )
        }
    }
}

const SLICE_BISECTION_STEPS: usize = 40;

/// Recursive binary slicing of an arbitrary (convex) polygon. Each cut runs
/// across the longer bounding-box axis at the position that splits the area in
/// the weight ratio of the two halves.
pub fn slice_layout(items: &[TreemapItem], region: &Polygon) -> Vec<LayoutCell> {
    let mut sorted: Vec<TreemapItem> = items
        .iter()
        .copied()
        .map(|item| TreemapItem {
            weight: item.weight.max(0.0),
            index: item.index,
        })
        .collect();
    sorted.sort_by(|a, b| b.weight.total_cmp(&a.weight));

    let mut out = Vec::with_capacity(sorted.len());
    slice_recursive(&sorted, region.clone(), &mut out);
    out
}

fn slice_recursive(items: &[TreemapItem], region: Polygon, out: &mut Vec<LayoutCell>) {
    match items {
        [] => {}
        [only] => out.push(LayoutCell {
            polygon: region,
            index: only.index,
        }),
        _ => {
            let total: f64 = items.iter().map(|item| item.weight).sum();
            let split = split_point(items, total);
            let (first, second) = items.split_at(split);
            let first_weight: f64 = first.iter().map(|item| item.weight).sum();
            let fraction = if total > 0.0 {
                (first_weight / total) as f32
            } else {
                split as f32 / items.len() as f32
            };

            let (a, b) = cut_polygon(&region, fraction);
            slice_recursive(first, a, out);
            slice_recursive(second, b, out);
        }
    }
}

/// Index splitting the (descending) items into two halves of similar weight.
fn split_point(items: &[TreemapItem], total: f64) -> usize {
    let half = total / 2.0;
    let mut acc = 0.0;
    for (i, item) in items.iter().enumerate() {
        acc += item.weight;
        if acc >= half {
            return (i + 1).clamp(1, items.len() - 1);
        }
    }
    items.len() / 2
}

fn cut_polygon(region: &Polygon, fraction: f32) -> (Polygon, Polygon) {
    let Some((min, max)) = region.bounds() else {
        return (region.clone(), region.clone());
    };
    let along_x = (max.x - min.x) >= (max.y - min.y);
    let (axis, lo, hi) = if along_x {
        (Vec2::X, min.x, max.x)
    } else {
        (Vec2::Y, min.y, max.y)
    };

    let total_area = region.area();
    let target = total_area * fraction.clamp(0.0, 1.0);
    let (mut lo_t, mut hi_t) = (lo, hi);
    for _ in 0..SLICE_BISECTION_STEPS {
        let mid = 0.5 * (lo_t + hi_t);
        if region.clip_half_plane(axis, mid).area() < target {
            lo_t = mid;
        } else {
            hi_t = mid;
        }
    }
    let cut = 0.5 * (lo_t + hi_t);
    (
        region.clip_half_plane(axis, cut),
        region.clip_half_plane(-axis, -cut),
    )
}
