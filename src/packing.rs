use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;

use crate::config::PackingConfig;
use crate::geometry::Polygon;
use crate::inventory::FileRef;
use crate::util::stable_hash;

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;

/// A fixed size band with its on-screen radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeBucket {
    /// Exclusive upper bound in bytes; the last band is open.
    pub upper: u64,
    pub radius: f32,
    pub label: &'static str,
}

/// Global size bands. A file's radius depends only on its size, never on the
/// cell it is drawn in.
pub const SIZE_BUCKETS: [SizeBucket; 10] = [
    SizeBucket { upper: 100 * KB, radius: 3.0, label: "< 100 KB" },
    SizeBucket { upper: MB, radius: 4.0, label: "100 KB - 1 MB" },
    SizeBucket { upper: 10 * MB, radius: 5.0, label: "1 - 10 MB" },
    SizeBucket { upper: 100 * MB, radius: 6.5, label: "10 - 100 MB" },
    SizeBucket { upper: 500 * MB, radius: 8.0, label: "100 - 500 MB" },
    SizeBucket { upper: GB, radius: 10.0, label: "500 MB - 1 GB" },
    SizeBucket { upper: 2 * GB, radius: 12.0, label: "1 - 2 GB" },
    SizeBucket { upper: 5 * GB, radius: 15.0, label: "2 - 5 GB" },
    SizeBucket { upper: 10 * GB, radius: 18.0, label: "5 - 10 GB" },
    SizeBucket { upper: u64::MAX, radius: 22.0, label: ">= 10 GB" },
];

pub fn bucket_for(size: u64) -> usize {
    SIZE_BUCKETS
        .iter()
        .position(|bucket| size < bucket.upper)
        .unwrap_or(SIZE_BUCKETS.len() - 1)
}

pub fn radius_for(size: u64) -> f32 {
    SIZE_BUCKETS[bucket_for(size)].radius
}

/// A file drawn as a disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Bubble {
    pub center: Vec2,
    pub radius: f32,
    pub file: FileRef,
    pub bucket: usize,
}

impl Bubble {
    pub fn contains(&self, point: Vec2) -> bool {
        self.center.distance_squared(point) <= self.radius * self.radius
    }

    pub fn is_finite(&self) -> bool {
        self.center.is_finite() && self.radius.is_finite() && self.radius > 0.0
    }
}

/// Identity of a file set, order-independent.
pub fn files_fingerprint(files: &[FileRef]) -> u64 {
    let mut entries: Vec<(&str, u64)> = files.iter().map(|f| (f.path.as_str(), f.size)).collect();
    entries.sort_unstable();
    stable_hash(&entries)
}

/// Place up to `max_count` of the largest files inside `polygon`.
///
/// Files are tried largest first at random points of the polygon's bounding
/// disk; a file with no contained, non-overlapping spot after
/// `placement_attempts` tries is left out. The random stream is seeded from the
/// polygon and the file set, so identical inputs place identically.
pub fn pack(polygon: &Polygon, files: &[FileRef], max_count: usize, config: &PackingConfig) -> Vec<Bubble> {
    if !polygon.is_valid() || files.is_empty() || max_count == 0 {
        return Vec::new();
    }

    let mut ordered: Vec<&FileRef> = files.iter().collect();
    ordered.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));
    ordered.truncate(max_count);

    let seed = stable_hash(&(polygon.fingerprint(), files_fingerprint(files)));
    let mut rng = StdRng::seed_from_u64(seed);
    let centroid = polygon.centroid();
    let reach = polygon.bounding_radius();

    let mut placed: Vec<Bubble> = Vec::with_capacity(ordered.len());
    let mut dropped = 0usize;
    for file in ordered {
        let bucket = bucket_for(file.size);
        let radius = SIZE_BUCKETS[bucket].radius;
        let spot = (0..config.placement_attempts).find_map(|_| {
            let angle = rng.gen_range(0.0..TAU);
            let distance = reach * rng.gen::<f32>().sqrt();
            let candidate = centroid + Vec2::from_angle(angle) * distance;
            fits(polygon, &placed, candidate, radius, config.gap).then_some(candidate)
        });
        match spot {
            Some(center) => placed.push(Bubble {
                center,
                radius,
                file: file.clone(),
                bucket,
            }),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        tracing::debug!(placed = placed.len(), dropped, "files left unplaced");
    }
    placed
}

fn fits(polygon: &Polygon, placed: &[Bubble], center: Vec2, radius: f32, gap: f32) -> bool {
    polygon.contains_disk(center, radius)
        && placed
            .iter()
            .all(|other| other.center.distance(center) >= other.radius + radius + gap)
}

/// Every disk inside `polygon` and no two disks closer than `min_gap`.
pub fn is_valid_packing(polygon: &Polygon, bubbles: &[Bubble], min_gap: f32) -> bool {
    const TOLERANCE: f32 = 1e-3;
    bubbles.iter().enumerate().all(|(i, bubble)| {
        bubble.is_finite()
            && polygon.contains(bubble.center)
            && polygon.distance_to_boundary(bubble.center) >= bubble.radius - TOLERANCE
            && bubbles[i + 1..].iter().all(|other| {
                bubble.center.distance(other.center) >= bubble.radius + other.radius + min_gap - TOLERANCE
            })
    })
}
