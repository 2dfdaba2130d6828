use crate::switch_linking::model::{JointNumber, SegmentSwitchLink, SwitchId};
use geo::{Coord, Distance, Euclidean, Point, Rect};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::ops::Range;

// --- Planar helpers (layout space, metres) ---

pub fn line_length(a: Coord<f64>, b: Coord<f64>) -> f64 {
    Euclidean.distance(Point::from(a), Point::from(b))
}

pub fn is_same_point(a: Coord<f64>, b: Coord<f64>, tolerance: f64) -> bool {
    line_length(a, b) <= tolerance
}

/// Where a projected point falls relative to the geometry it was projected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntersectType {
    Before,
    Within,
    After,
}

/// Unclamped projection parameter of `point` on the line through `start` and `end`.
/// 0.0 is `start`, 1.0 is `end`.
pub fn project_on_line(start: Coord<f64>, end: Coord<f64>, point: Coord<f64>) -> f64 {
    let d = end - start;
    let len_sq = d.x * d.x + d.y * d.y;
    if len_sq == 0.0 {
        return 0.0;
    }
    let v = point - start;
    (v.x * d.x + v.y * d.y) / len_sq
}

pub fn interpolate(start: Coord<f64>, end: Coord<f64>, t: f64) -> Coord<f64> {
    start + (end - start) * t
}

/// Closest point on the line segment `start..end`
pub fn closest_point_on_line(start: Coord<f64>, end: Coord<f64>, point: Coord<f64>) -> Coord<f64> {
    let t = project_on_line(start, end, point).clamp(0.0, 1.0);
    interpolate(start, end, t)
}

pub fn point_distance_to_line(start: Coord<f64>, end: Coord<f64>, point: Coord<f64>) -> f64 {
    line_length(closest_point_on_line(start, end, point), point)
}

/// Direction of the vector `from -> to` in radians, counter-clockwise from the x axis.
pub fn direction_between_points(from: Coord<f64>, to: Coord<f64>) -> f64 {
    (to.y - from.y).atan2(to.x - from.x)
}

/// Absolute difference of two directions, normalized to `[0, PI]`.
pub fn angle_diff_rads(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(std::f64::consts::TAU);
    if diff > std::f64::consts::PI {
        std::f64::consts::TAU - diff
    } else {
        diff
    }
}

pub fn rotate_around_point(center: Coord<f64>, rads: f64, point: Coord<f64>) -> Coord<f64> {
    let (sin, cos) = rads.sin_cos();
    let v = point - center;
    Coord {
        x: center.x + v.x * cos - v.y * sin,
        y: center.y + v.x * sin + v.y * cos,
    }
}

pub fn dot(a: Coord<f64>, b: Coord<f64>) -> f64 {
    a.x * b.x + a.y * b.y
}

// --- Bounding boxes ---

/// Axis aligned box in layout space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox(pub Rect<f64>);

impl BoundingBox {
    pub fn new(a: Coord<f64>, b: Coord<f64>) -> Self {
        Self(Rect::new(a, b))
    }

    pub fn from_points<I: IntoIterator<Item = Coord<f64>>>(points: I) -> Option<Self> {
        points.into_iter().fold(None, |acc: Option<BoundingBox>, p| match acc {
            None => Some(BoundingBox::new(p, p)),
            Some(bbox) => Some(bbox.including(p)),
        })
    }

    /// Square box of side `2 * radius` centered at `center`
    pub fn around_point(center: Coord<f64>, radius: f64) -> Self {
        let r = Coord {
            x: radius,
            y: radius,
        };
        Self::new(center - r, center + r)
    }

    /// Square box of side `size` centered at `center`
    pub fn centered_at(center: Coord<f64>, size: f64) -> Self {
        Self::around_point(center, size / 2.0)
    }

    pub fn min(&self) -> Coord<f64> {
        self.0.min()
    }

    pub fn max(&self) -> Coord<f64> {
        self.0.max()
    }

    pub fn width(&self) -> f64 {
        self.0.width()
    }

    pub fn height(&self) -> f64 {
        self.0.height()
    }

    pub fn max_dimension(&self) -> f64 {
        self.width().max(self.height())
    }

    pub fn center(&self) -> Coord<f64> {
        self.0.center()
    }

    pub fn including(&self, p: Coord<f64>) -> Self {
        let min = self.min();
        let max = self.max();
        Self::new(
            Coord {
                x: min.x.min(p.x),
                y: min.y.min(p.y),
            },
            Coord {
                x: max.x.max(p.x),
                y: max.y.max(p.y),
            },
        )
    }

    pub fn union(&self, other: &BoundingBox) -> Self {
        self.including(other.min()).including(other.max())
    }

    /// Grow every side outward by `amount`
    pub fn expanded(&self, amount: f64) -> Self {
        let d = Coord {
            x: amount,
            y: amount,
        };
        Self::new(self.min() - d, self.max() + d)
    }

    /// Scale around the center
    pub fn scaled(&self, factor: f64) -> Self {
        let c = self.center();
        let half = Coord {
            x: self.width() * factor / 2.0,
            y: self.height() * factor / 2.0,
        };
        Self::new(c - half, c + half)
    }

    pub fn contains(&self, p: Coord<f64>) -> bool {
        let min = self.min();
        let max = self.max();
        p.x >= min.x && p.x <= max.x && p.y >= min.y && p.y <= max.y
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min().x <= other.max().x
            && other.min().x <= self.max().x
            && self.min().y <= other.max().y
            && other.min().y <= self.max().y
    }

    /// Gap between two boxes, 0.0 when they touch or overlap.
    pub fn distance_to(&self, other: &BoundingBox) -> f64 {
        let dx = (other.min().x - self.max().x)
            .max(self.min().x - other.max().x)
            .max(0.0);
        let dy = (other.min().y - self.max().y)
            .max(self.min().y - other.max().y)
            .max(0.0);
        dx.hypot(dy)
    }
}

// --- Segments ---

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SegmentRecord {
    points: Vec<Coord<f64>>,
    #[serde(default)]
    start_m: f64,
    #[serde(default)]
    switch: Option<SegmentSwitchLink>,
}

/// Result of looking up a position by M on a segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointSeek {
    /// Index of the segment point nearest to the requested M
    pub index: usize,
    pub point: Coord<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// M on the owning track
    pub m: f64,
    pub point: Coord<f64>,
    pub distance: f64,
    pub intersect: IntersectType,
}

/// A polyline piece of a track. Every point carries a cumulative segment-local M,
/// the segment itself knows where it starts on the track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SegmentRecord", into = "SegmentRecord")]
pub struct Segment {
    points: Vec<Coord<f64>>,
    point_ms: Vec<f64>,
    start_m: f64,
    switch: Option<SegmentSwitchLink>,
}

impl TryFrom<SegmentRecord> for Segment {
    type Error = String;

    fn try_from(record: SegmentRecord) -> Result<Self, Self::Error> {
        if record.points.len() < 2 {
            return Err(format!(
                "segment needs at least two points, got {}",
                record.points.len()
            ));
        }
        Ok(Segment::new(record.points, record.start_m, record.switch))
    }
}

impl From<Segment> for SegmentRecord {
    fn from(segment: Segment) -> Self {
        SegmentRecord {
            points: segment.points,
            start_m: segment.start_m,
            switch: segment.switch,
        }
    }
}

impl Segment {
    pub fn new(points: Vec<Coord<f64>>, start_m: f64, switch: Option<SegmentSwitchLink>) -> Self {
        assert!(
            points.len() >= 2,
            "segment needs at least two points, got {}",
            points.len()
        );
        let mut point_ms = Vec::with_capacity(points.len());
        let mut m = 0.0;
        point_ms.push(m);
        for (a, b) in points.iter().tuple_windows() {
            m += line_length(*a, *b);
            point_ms.push(m);
        }
        Self {
            points,
            point_ms,
            start_m,
            switch,
        }
    }

    pub fn points(&self) -> &[Coord<f64>] {
        &self.points
    }

    /// Segment-local cumulative M of every point, starting at 0.0
    pub fn point_ms(&self) -> &[f64] {
        &self.point_ms
    }

    pub fn start_m(&self) -> f64 {
        self.start_m
    }

    pub fn length(&self) -> f64 {
        self.point_ms[self.point_ms.len() - 1]
    }

    pub fn end_m(&self) -> f64 {
        self.start_m + self.length()
    }

    pub fn start_point(&self) -> Coord<f64> {
        self.points[0]
    }

    pub fn end_point(&self) -> Coord<f64> {
        self.points[self.points.len() - 1]
    }

    /// Start to end vector
    pub fn direction(&self) -> Coord<f64> {
        self.end_point() - self.start_point()
    }

    pub fn switch(&self) -> Option<&SegmentSwitchLink> {
        self.switch.as_ref()
    }

    pub fn switch_id(&self) -> Option<SwitchId> {
        self.switch.map(|s| s.switch_id)
    }

    pub fn start_joint(&self) -> Option<JointNumber> {
        self.switch.and_then(|s| s.start_joint)
    }

    pub fn end_joint(&self) -> Option<JointNumber> {
        self.switch.and_then(|s| s.end_joint)
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.points
            .iter()
            .skip(1)
            .fold(BoundingBox::new(self.points[0], self.points[0]), |bbox, p| {
                bbox.including(*p)
            })
    }

    pub fn with_start_m(&self, start_m: f64) -> Self {
        Self {
            start_m,
            ..self.clone()
        }
    }

    pub fn with_switch(&self, switch: Option<SegmentSwitchLink>) -> Self {
        Self {
            switch,
            ..self.clone()
        }
    }

    pub fn without_switch(&self) -> Self {
        self.with_switch(None)
    }

    /// Closest point to `target` anywhere on the segment.
    pub fn closest_point(&self, target: Coord<f64>) -> Projection {
        let last_line = self.points.len() - 2;
        let mut best: Option<(usize, f64, f64, Coord<f64>)> = None;
        for (i, (a, b)) in self.points.iter().tuple_windows().enumerate() {
            let t = project_on_line(*a, *b, target);
            let point = interpolate(*a, *b, t.clamp(0.0, 1.0));
            let distance = line_length(point, target);
            if best.is_none_or(|(_, _, d, _)| distance < d) {
                best = Some((i, t, distance, point));
            }
        }
        // at least one line exists, guaranteed by the constructor
        let (i, t, distance, point) = best.unwrap_or((0, 0.0, 0.0, self.points[0]));
        let tc = t.clamp(0.0, 1.0);
        let m = self.start_m + self.point_ms[i] + tc * (self.point_ms[i + 1] - self.point_ms[i]);
        let intersect = if i == 0 && t < 0.0 {
            IntersectType::Before
        } else if i == last_line && t > 1.0 {
            IntersectType::After
        } else {
            IntersectType::Within
        };
        Projection {
            m,
            point,
            distance,
            intersect,
        }
    }

    /// Position at track M `m`, clamped to the segment. Also reports the nearest segment point.
    pub fn seek_point_at_m(&self, m: f64) -> PointSeek {
        let local = (m - self.start_m).clamp(0.0, self.length());
        let line = self
            .point_ms
            .partition_point(|pm| *pm <= local)
            .saturating_sub(1)
            .min(self.points.len() - 2);
        let (m0, m1) = (self.point_ms[line], self.point_ms[line + 1]);
        let t = if m1 > m0 { (local - m0) / (m1 - m0) } else { 0.0 };
        let point = interpolate(self.points[line], self.points[line + 1], t);
        let index = if local - m0 <= m1 - local {
            line
        } else {
            line + 1
        };
        PointSeek { index, point }
    }

    pub fn point_at_m(&self, m: f64) -> Coord<f64> {
        self.seek_point_at_m(m).point
    }

    /// Sub-segment of points `from..=to`. The slice keeps its place on the track.
    pub fn slice(&self, from: usize, to: usize) -> Option<Segment> {
        if from >= to || to >= self.points.len() {
            return None;
        }
        Some(Segment::new(
            self.points[from..=to].to_vec(),
            self.start_m + self.point_ms[from],
            self.switch,
        ))
    }

    /// Split at track M `m`. An existing point within `tolerance` is reused as the split
    /// point, otherwise a new point is interpolated. Returns the segment unchanged when `m`
    /// is within `tolerance` of either end.
    pub fn split_at_m(&self, m: f64, tolerance: f64) -> (Segment, Option<Segment>) {
        let local = m - self.start_m;
        if local <= tolerance || local >= self.length() - tolerance {
            return (self.clone(), None);
        }

        let last = self.points.len() - 1;
        let existing = (1..last).find(|i| (self.point_ms[*i] - local).abs() <= tolerance);
        let (before, after, split_m) = match existing {
            Some(i) => (
                self.points[..=i].to_vec(),
                self.points[i..].to_vec(),
                self.start_m + self.point_ms[i],
            ),
            None => {
                let line = self
                    .point_ms
                    .partition_point(|pm| *pm <= local)
                    .saturating_sub(1)
                    .min(last - 1);
                let split_point = self.point_at_m(m);
                let mut before = self.points[..=line].to_vec();
                before.push(split_point);
                let mut after = vec![split_point];
                after.extend_from_slice(&self.points[line + 1..]);
                (before, after, m)
            }
        };

        (
            Segment::new(before, self.start_m, self.switch),
            Some(Segment::new(after, split_m, self.switch)),
        )
    }
}

// --- Track geometry ---

/// Closest point over a run of segments. Before/After are only reported past the ends
/// of the whole run.
pub fn closest_point_on_segments(segments: &[Segment], target: Coord<f64>) -> Option<Projection> {
    let last = segments.len().checked_sub(1)?;
    segments
        .iter()
        .enumerate()
        .map(|(i, segment)| {
            let mut projection = segment.closest_point(target);
            projection.intersect = match projection.intersect {
                IntersectType::Before if i != 0 => IntersectType::Within,
                IntersectType::After if i != last => IntersectType::Within,
                other => other,
            };
            projection
        })
        .min_by(|a, b| a.distance.total_cmp(&b.distance))
}

pub fn closest_segment_index(segments: &[Segment], target: Coord<f64>) -> Option<usize> {
    segments
        .iter()
        .enumerate()
        .map(|(i, s)| (i, s.closest_point(target).distance))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

/// Point at M over a run of segments, None when `m` is further than `snap` outside it.
pub fn point_at_m_on_segments(segments: &[Segment], m: f64, snap: f64) -> Option<Coord<f64>> {
    let (first, last) = (segments.first()?, segments.last()?);
    if m < first.start_m - snap || m > last.end_m() + snap {
        return None;
    }
    let m = m.clamp(first.start_m, last.end_m());
    let index = segments
        .partition_point(|s| s.end_m() < m)
        .min(segments.len() - 1);
    Some(segments[index].point_at_m(m))
}

/// A maximal run of segments between topology nodes (switch joints or track ends).
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub index: usize,
    pub segment_range: Range<usize>,
    pub start_m: f64,
    pub end_m: f64,
}

impl Edge {
    pub fn length(&self) -> f64 {
        self.end_m - self.start_m
    }

    pub fn contains_segment(&self, segment_index: usize) -> bool {
        self.segment_range.contains(&segment_index)
    }
}

/// Ordered segments of a track, contiguous in M.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Segment>", into = "Vec<Segment>")]
pub struct TrackGeometry {
    segments: Vec<Segment>,
}

impl From<Vec<Segment>> for TrackGeometry {
    fn from(segments: Vec<Segment>) -> Self {
        TrackGeometry::new(segments)
    }
}

impl From<TrackGeometry> for Vec<Segment> {
    fn from(geometry: TrackGeometry) -> Self {
        geometry.segments
    }
}

impl TrackGeometry {
    /// Chains segment start Ms so the track stays contiguous, starting from the first
    /// segment's own start M.
    pub fn new(segments: Vec<Segment>) -> Self {
        let mut m = segments.first().map(|s| s.start_m).unwrap_or(0.0);
        let segments = segments
            .into_iter()
            .map(|segment| {
                let chained = segment.with_start_m(m);
                m = chained.end_m();
                chained
            })
            .collect();
        Self { segments }
    }

    /// One unlinked segment per polyline, starting from M 0.0
    pub fn from_polylines(polylines: Vec<Vec<Coord<f64>>>) -> Self {
        Self::new(
            polylines
                .into_iter()
                .map(|points| Segment::new(points, 0.0, None))
                .collect(),
        )
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn start_m(&self) -> f64 {
        self.segments.first().map(|s| s.start_m).unwrap_or(0.0)
    }

    pub fn end_m(&self) -> f64 {
        self.segments.last().map(|s| s.end_m()).unwrap_or(0.0)
    }

    pub fn start_point(&self) -> Option<Coord<f64>> {
        self.segments.first().map(|s| s.start_point())
    }

    pub fn end_point(&self) -> Option<Coord<f64>> {
        self.segments.last().map(|s| s.end_point())
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.segments
            .iter()
            .map(|s| s.bounding_box())
            .reduce(|a, b| a.union(&b))
    }

    pub fn closest_point(&self, target: Coord<f64>) -> Option<Projection> {
        closest_point_on_segments(&self.segments, target)
    }

    /// Index of the segment nearest to `target`
    pub fn closest_segment_index(&self, target: Coord<f64>) -> Option<usize> {
        closest_segment_index(&self.segments, target)
    }

    /// Point at track M, or None when `m` is further than `snap` outside the track.
    pub fn point_at_m(&self, m: f64, snap: f64) -> Option<Coord<f64>> {
        point_at_m_on_segments(&self.segments, m, snap)
    }

    pub fn edges(&self) -> Vec<Edge> {
        let mut edges = Vec::new();
        let mut start = 0;
        for i in 1..=self.segments.len() {
            let boundary = i == self.segments.len()
                || self.segments[i - 1].end_joint().is_some()
                || self.segments[i].start_joint().is_some();
            if boundary {
                edges.push(Edge {
                    index: edges.len(),
                    segment_range: start..i,
                    start_m: self.segments[start].start_m,
                    end_m: self.segments[i - 1].end_m(),
                });
                start = i;
            }
        }
        edges
    }

    /// Point at an edge-local M, None outside the edge.
    pub fn point_at_edge_m(&self, edge: &Edge, m_on_edge: f64) -> Option<Coord<f64>> {
        if m_on_edge < 0.0 || m_on_edge > edge.length() {
            return None;
        }
        self.point_at_m(edge.start_m + m_on_edge, 0.0)
    }

    pub fn switch_ids(&self) -> Vec<SwitchId> {
        self.segments
            .iter()
            .filter_map(|s| s.switch_id())
            .unique()
            .collect()
    }

    pub fn contains_switch(&self, switch_id: SwitchId) -> bool {
        self.segments
            .iter()
            .any(|s| s.switch_id() == Some(switch_id))
    }

    pub fn without_switches(&self, switch_ids: &[SwitchId]) -> Self {
        Self {
            segments: self
                .segments
                .iter()
                .map(|s| match s.switch_id() {
                    Some(id) if switch_ids.contains(&id) => s.without_switch(),
                    _ => s.clone(),
                })
                .collect(),
        }
    }

    pub fn without_switch(&self, switch_id: SwitchId) -> Self {
        self.without_switches(&[switch_id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::coord;

    fn straight(from_x: f64, to_x: f64) -> Vec<Coord<f64>> {
        let mut points = Vec::new();
        let mut x = from_x;
        while x < to_x {
            points.push(coord! { x: x, y: 0.0 });
            x += 1.0;
        }
        points.push(coord! { x: to_x, y: 0.0 });
        points
    }

    #[test]
    fn test_angle_diff_wraps() {
        let d = angle_diff_rads(std::f64::consts::PI - 0.01, -std::f64::consts::PI + 0.01);
        assert!((d - 0.02).abs() < 1e-9);
        assert!(angle_diff_rads(0.5, 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_rotate_around_point() {
        let p = rotate_around_point(
            coord! { x: 1.0, y: 1.0 },
            std::f64::consts::FRAC_PI_2,
            coord! { x: 2.0, y: 1.0 },
        );
        assert!((p.x - 1.0).abs() < 1e-9);
        assert!((p.y - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_bbox_distance_and_scaling() {
        let a = BoundingBox::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 });
        let b = BoundingBox::new(coord! { x: 4.0, y: 5.0 }, coord! { x: 6.0, y: 6.0 });
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-9);
        assert_eq!(a.distance_to(&a), 0.0);

        let scaled = a.scaled(3.0);
        assert!((scaled.width() - 3.0).abs() < 1e-9);
        assert_eq!(scaled.center(), a.center());
    }

    #[test]
    fn test_segment_ms_and_seek() {
        let segment = Segment::new(straight(0.0, 10.0), 100.0, None);
        assert!((segment.length() - 10.0).abs() < 1e-9);
        assert!((segment.end_m() - 110.0).abs() < 1e-9);

        let seek = segment.seek_point_at_m(103.4);
        assert_eq!(seek.index, 3);
        assert!((seek.point.x - 3.4).abs() < 1e-9);

        let seek = segment.seek_point_at_m(103.6);
        assert_eq!(seek.index, 4);
    }

    #[test]
    fn test_closest_point_intersect_type() {
        let segment = Segment::new(straight(0.0, 10.0), 0.0, None);
        let before = segment.closest_point(coord! { x: -2.0, y: 0.5 });
        assert_eq!(before.intersect, IntersectType::Before);
        assert_eq!(before.m, 0.0);

        let within = segment.closest_point(coord! { x: 4.5, y: 0.3 });
        assert_eq!(within.intersect, IntersectType::Within);
        assert!((within.m - 4.5).abs() < 1e-9);
        assert!((within.distance - 0.3).abs() < 1e-9);

        let after = segment.closest_point(coord! { x: 12.0, y: 0.0 });
        assert_eq!(after.intersect, IntersectType::After);
    }

    #[test]
    fn test_split_inserts_point_or_reuses_vertex() {
        let segment = Segment::new(straight(0.0, 10.0), 20.0, None);

        let (before, after) = segment.split_at_m(24.5, 0.01);
        let after = after.expect("split");
        assert!((before.end_m() - 24.5).abs() < 1e-9);
        assert!((after.start_m() - 24.5).abs() < 1e-9);
        assert!((after.end_m() - 30.0).abs() < 1e-9);
        assert_eq!(before.end_point(), after.start_point());

        let (before, after) = segment.split_at_m(26.005, 0.01);
        let after = after.expect("split");
        assert_eq!(before.points().len(), 7);
        assert!((after.start_m() - 26.0).abs() < 1e-9);

        let (unchanged, none) = segment.split_at_m(29.995, 0.01);
        assert!(none.is_none());
        assert_eq!(unchanged, segment);
    }

    #[test]
    fn test_slice_keeps_track_m() {
        let segment = Segment::new(straight(0.0, 10.0), 5.0, None);
        let slice = segment.slice(2, 6).expect("slice");
        assert!((slice.start_m() - 7.0).abs() < 1e-9);
        assert!((slice.length() - 4.0).abs() < 1e-9);
        assert!(segment.slice(6, 6).is_none());
        assert!(segment.slice(2, 11).is_none());
    }

    #[test]
    fn test_track_geometry_chains_ms_and_edges() {
        let link = |start, end| SegmentSwitchLink {
            switch_id: SwitchId(1),
            start_joint: start,
            end_joint: end,
        };
        let geometry = TrackGeometry::new(vec![
            Segment::new(straight(0.0, 10.0), 0.0, None),
            Segment::new(straight(10.0, 20.0), 0.0, Some(link(Some(JointNumber(1)), None))),
            Segment::new(straight(20.0, 30.0), 0.0, Some(link(None, Some(JointNumber(2))))),
            Segment::new(straight(30.0, 40.0), 0.0, None),
        ]);
        assert!((geometry.segments()[2].start_m() - 20.0).abs() < 1e-9);
        assert!((geometry.end_m() - 40.0).abs() < 1e-9);

        let edges = geometry.edges();
        assert_eq!(edges.len(), 3);
        assert_eq!(edges[0].segment_range, 0..1);
        assert_eq!(edges[1].segment_range, 1..3);
        assert_eq!(edges[2].segment_range, 3..4);
        assert!((edges[1].start_m - 10.0).abs() < 1e-9);

        let p = geometry
            .point_at_edge_m(&edges[1], 15.0)
            .expect("point on edge");
        assert!((p.x - 25.0).abs() < 1e-9);
        assert!(geometry.point_at_edge_m(&edges[1], 25.0).is_none());
    }

    #[test]
    fn test_point_at_m_snap() {
        let geometry = TrackGeometry::from_polylines(vec![straight(0.0, 10.0)]);
        assert!(geometry.point_at_m(10.05, 0.1).is_some());
        assert!(geometry.point_at_m(10.2, 0.1).is_none());
        assert!(geometry.point_at_m(-0.2, 0.1).is_none());
    }

    #[test]
    fn test_without_switch_clears_only_that_switch() {
        let geometry = TrackGeometry::new(vec![
            Segment::new(
                straight(0.0, 10.0),
                0.0,
                Some(SegmentSwitchLink::body(SwitchId(1))),
            ),
            Segment::new(
                straight(10.0, 20.0),
                0.0,
                Some(SegmentSwitchLink::body(SwitchId(2))),
            ),
        ]);
        let cleared = geometry.without_switch(SwitchId(1));
        assert_eq!(cleared.switch_ids(), vec![SwitchId(2)]);
        assert!(geometry.contains_switch(SwitchId(1)));
    }
}
