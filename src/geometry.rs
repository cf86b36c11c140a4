use glam::Vec2;

use crate::util::stable_hash;

const POINT_EPSILON: f32 = 1e-4;
const AREA_EPSILON: f32 = 1e-3;

/// Axis-aligned rectangle in pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn short_side(&self) -> f32 {
        self.width.min(self.height)
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.x + self.width * 0.5, self.y + self.height * 0.5)
    }

    pub fn inset(&self, amount: f32) -> Rect {
        let amount = amount.min(self.width * 0.5).min(self.height * 0.5).max(0.0);
        Rect::new(
            self.x + amount,
            self.y + amount,
            self.width - 2.0 * amount,
            self.height - 2.0 * amount,
        )
    }

    pub fn to_polygon(&self) -> Polygon {
        Polygon::new(vec![
            Vec2::new(self.x, self.y),
            Vec2::new(self.x + self.width, self.y),
            Vec2::new(self.x + self.width, self.y + self.height),
            Vec2::new(self.x, self.y + self.height),
        ])
    }
}

/// Pixel bounds the host draws into. Geometry is computed with the origin at
/// (0, 0); the host translates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width.max(0.0), self.height.max(0.0))
    }

    pub fn short_side(&self) -> f32 {
        self.width.min(self.height).max(0.0)
    }

    /// Viewports within a pixel of each other share geometry.
    pub fn matches(&self, other: &Viewport) -> bool {
        (self.width - other.width).abs() <= 1.0 && (self.height - other.height).abs() <= 1.0
    }
}

/// Simple polygon stored as an ordered vertex ring (no repeated closing vertex).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Polygon {
    points: Vec<Vec2>,
}

impl Polygon {
    pub fn new(points: Vec<Vec2>) -> Self {
        let mut cleaned: Vec<Vec2> = Vec::with_capacity(points.len());
        for point in points {
            if cleaned
                .last()
                .map_or(true, |last: &Vec2| last.distance_squared(point) > POINT_EPSILON * POINT_EPSILON)
            {
                cleaned.push(point);
            }
        }
        while cleaned.len() > 1
            && cleaned[0].distance_squared(cleaned[cleaned.len() - 1]) <= POINT_EPSILON * POINT_EPSILON
        {
            cleaned.pop();
        }
        Self { points: cleaned }
    }

    pub fn points(&self) -> &[Vec2] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn edges(&self) -> impl Iterator<Item = (Vec2, Vec2)> + '_ {
        let n = self.points.len();
        (0..n).map(move |i| (self.points[i], self.points[(i + 1) % n]))
    }

    pub fn signed_area(&self) -> f32 {
        if self.points.len() < 3 {
            return 0.0;
        }
        0.5 * self.edges().map(|(a, b)| a.perp_dot(b)).sum::<f32>()
    }

    pub fn area(&self) -> f32 {
        self.signed_area().abs()
    }

    /// Area centroid; falls back to the vertex mean for degenerate rings.
    pub fn centroid(&self) -> Vec2 {
        if self.points.is_empty() {
            return Vec2::ZERO;
        }
        let signed = self.signed_area();
        if signed.abs() <= AREA_EPSILON {
            let sum: Vec2 = self.points.iter().copied().sum();
            return sum / self.points.len() as f32;
        }
        // Relative to the first vertex to keep f32 error small on large coordinates.
        let origin = self.points[0];
        let mut acc = Vec2::ZERO;
        for (a, b) in self.edges() {
            let (a, b) = (a - origin, b - origin);
            acc += (a + b) * a.perp_dot(b);
        }
        origin + acc / (6.0 * signed)
    }

    pub fn bounds(&self) -> Option<(Vec2, Vec2)> {
        let first = *self.points.first()?;
        let mut min = first;
        let mut max = first;
        for point in &self.points {
            min = min.min(*point);
            max = max.max(*point);
        }
        Some((min, max))
    }

    /// Largest distance from the centroid to any vertex.
    pub fn bounding_radius(&self) -> f32 {
        let centroid = self.centroid();
        self.points
            .iter()
            .map(|p| p.distance(centroid))
            .fold(0.0, f32::max)
    }

    pub fn is_finite(&self) -> bool {
        self.points.iter().all(|p| p.is_finite())
    }

    /// At least three finite vertices enclosing a positive area.
    pub fn is_valid(&self) -> bool {
        self.points.len() >= 3 && self.is_finite() && self.area() > AREA_EPSILON
    }

    /// Even-odd point containment.
    pub fn contains(&self, point: Vec2) -> bool {
        if self.points.len() < 3 {
            return false;
        }
        let mut inside = false;
        for (a, b) in self.edges() {
            if (a.y > point.y) != (b.y > point.y) {
                let x_cross = a.x + (point.y - a.y) / (b.y - a.y) * (b.x - a.x);
                if point.x < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }

    pub fn distance_to_boundary(&self, point: Vec2) -> f32 {
        self.edges()
            .map(|(a, b)| distance_to_segment(point, a, b))
            .fold(f32::INFINITY, f32::min)
    }

    /// True when the whole disk lies inside the polygon.
    pub fn contains_disk(&self, center: Vec2, radius: f32) -> bool {
        self.contains(center) && self.distance_to_boundary(center) >= radius
    }

    /// Keep the part of the polygon where `normal · x <= offset`.
    pub fn clip_half_plane(&self, normal: Vec2, offset: f32) -> Polygon {
        let n = self.points.len();
        if n == 0 {
            return Polygon::default();
        }
        let mut out = Vec::with_capacity(n + 2);
        for (a, b) in self.edges() {
            let da = normal.dot(a) - offset;
            let db = normal.dot(b) - offset;
            let a_in = da <= 0.0;
            let b_in = db <= 0.0;
            if a_in {
                out.push(a);
            }
            if a_in != b_in {
                let t = da / (da - db);
                out.push(a + (b - a) * t);
            }
        }
        Polygon::new(out)
    }

    /// The rectangle this polygon describes, if it is an axis-aligned one.
    pub fn as_axis_rect(&self) -> Option<Rect> {
        if self.points.len() != 4 {
            return None;
        }
        let (min, max) = self.bounds()?;
        let on_corner = |p: &Vec2| {
            ((p.x - min.x).abs() < POINT_EPSILON || (p.x - max.x).abs() < POINT_EPSILON)
                && ((p.y - min.y).abs() < POINT_EPSILON || (p.y - max.y).abs() < POINT_EPSILON)
        };
        if self.points.iter().all(on_corner) && self.area() > AREA_EPSILON {
            Some(Rect::new(min.x, min.y, max.x - min.x, max.y - min.y))
        } else {
            None
        }
    }

    /// Hash of the vertex ring quantized to 1/100 px, used as a cache key.
    pub fn fingerprint(&self) -> u64 {
        let quantized: Vec<(i64, i64)> = self
            .points
            .iter()
            .map(|p| ((p.x * 100.0).round() as i64, (p.y * 100.0).round() as i64))
            .collect();
        stable_hash(&quantized)
    }
}

pub fn distance_to_segment(point: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f32::EPSILON {
        return point.distance(a);
    }
    let t = ((point - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    point.distance(a + ab * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: f32) -> Polygon {
        Rect::new(0.0, 0.0, size, size).to_polygon()
    }

    #[test]
    fn test_area_and_centroid() {
        let poly = square(10.0);
        assert!((poly.area() - 100.0).abs() < 1e-3);
        let c = poly.centroid();
        assert!((c.x - 5.0).abs() < 1e-3 && (c.y - 5.0).abs() < 1e-3);
    }

    #[test]
    fn test_centroid_of_triangle() {
        let tri = Polygon::new(vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(6.0, 0.0),
            Vec2::new(0.0, 6.0),
        ]);
        let c = tri.centroid();
        assert!((c.x - 2.0).abs() < 1e-3 && (c.y - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_contains_and_disk() {
        let poly = square(10.0);
        assert!(poly.contains(Vec2::new(5.0, 5.0)));
        assert!(!poly.contains(Vec2::new(11.0, 5.0)));
        assert!(poly.contains_disk(Vec2::new(5.0, 5.0), 4.9));
        assert!(!poly.contains_disk(Vec2::new(2.0, 5.0), 3.0));
    }

    #[test]
    fn test_clip_half_plane_halves_square() {
        let poly = square(10.0);
        let left = poly.clip_half_plane(Vec2::new(1.0, 0.0), 4.0);
        assert!((left.area() - 40.0).abs() < 1e-3);
        let right = poly.clip_half_plane(Vec2::new(-1.0, 0.0), -4.0);
        assert!((right.area() - 60.0).abs() < 1e-3);
    }

    #[test]
    fn test_clip_outside_is_empty() {
        let poly = square(10.0);
        let none = poly.clip_half_plane(Vec2::new(1.0, 0.0), -1.0);
        assert!(!none.is_valid());
    }

    #[test]
    fn test_axis_rect_detection() {
        assert!(square(4.0).as_axis_rect().is_some());
        let tri = Polygon::new(vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(6.0, 0.0),
            Vec2::new(0.0, 6.0),
        ]);
        assert!(tri.as_axis_rect().is_none());
    }

    #[test]
    fn test_invalid_polygons() {
        assert!(!Polygon::new(vec![Vec2::ZERO, Vec2::ONE]).is_valid());
        assert!(!Polygon::new(vec![Vec2::ZERO, Vec2::new(f32::NAN, 1.0), Vec2::ONE]).is_valid());
    }

    #[test]
    fn test_viewport_matching_tolerance() {
        let a = Viewport::new(800.0, 600.0);
        assert!(a.matches(&Viewport::new(800.6, 599.5)));
        assert!(!a.matches(&Viewport::new(802.0, 600.0)));
    }
}
