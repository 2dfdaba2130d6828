//! Read-only windows over a track's segments.
//!
//! A crop keeps only the segments that touch the window, sliced to their first and last
//! in-window point. Crop-local M starts at 0.0 at the first kept point; `start_m` is the
//! track M of that point, so `to_track_m` recovers positions on the source track.

use crate::switch_linking::geometry::{
    self, BoundingBox, Projection, Segment, TrackGeometry,
};
use crate::switch_linking::model::TrackId;
use geo::Coord;
use itertools::Itertools;
use std::borrow::Cow;
use std::ops::RangeInclusive;

/// Snapping used when deciding whether a point lies inside an M window.
pub const M_WINDOW_SNAP: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
pub struct CroppedAlignment<'a> {
    pub track_id: TrackId,
    start_m: f64,
    /// Source track index of every kept segment
    source_indices: Vec<usize>,
    segments: Cow<'a, [Segment]>,
}

/// Identity crop: borrows the whole track, offset 0.
pub fn crop_nothing(track_id: TrackId, geometry: &TrackGeometry) -> CroppedAlignment<'_> {
    CroppedAlignment {
        track_id,
        start_m: 0.0,
        source_indices: (0..geometry.segments().len()).collect(),
        segments: Cow::Borrowed(geometry.segments()),
    }
}

pub fn crop_to_bbox(
    track_id: TrackId,
    geometry: &TrackGeometry,
    bbox: &BoundingBox,
) -> CroppedAlignment<'static> {
    crop_nothing(track_id, geometry).crop_to_bbox(bbox)
}

impl<'a> CroppedAlignment<'a> {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Track M of crop-local M 0.0
    pub fn start_m(&self) -> f64 {
        self.start_m
    }

    /// Source track index of the first kept segment
    pub fn start_segment_index(&self) -> usize {
        self.source_indices.first().copied().unwrap_or(0)
    }

    pub fn source_segment_index(&self, crop_index: usize) -> usize {
        self.source_indices[crop_index]
    }

    pub fn to_track_m(&self, local_m: f64) -> f64 {
        self.start_m + local_m
    }

    pub fn to_local_m(&self, track_m: f64) -> f64 {
        track_m - self.start_m
    }

    pub fn length(&self) -> f64 {
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

    /// Closest point, M is crop-local
    pub fn closest_point(&self, target: Coord<f64>) -> Option<Projection> {
        geometry::closest_point_on_segments(&self.segments, target)
    }

    pub fn closest_segment_index(&self, target: Coord<f64>) -> Option<usize> {
        geometry::closest_segment_index(&self.segments, target)
    }

    /// Point at crop-local M
    pub fn point_at_m(&self, local_m: f64, snap: f64) -> Option<Coord<f64>> {
        geometry::point_at_m_on_segments(&self.segments, local_m, snap)
    }

    /// Every consecutive point pair of every segment
    pub fn lines(&self) -> impl Iterator<Item = (Coord<f64>, Coord<f64>)> + '_ {
        self.segments
            .iter()
            .flat_map(|s| s.points().iter().copied().tuple_windows())
    }

    pub fn crop_to_bbox(&self, bbox: &BoundingBox) -> CroppedAlignment<'static> {
        self.crop_by(|segment| {
            if !bbox.intersects(&segment.bounding_box()) {
                return None;
            }
            let points = segment.points();
            let first = points.iter().position(|p| bbox.contains(*p))?;
            let last = points.iter().rposition(|p| bbox.contains(*p))?;
            Some((first, last))
        })
    }

    /// Window by crop-local M, both ends inclusive.
    pub fn crop_to_m_range(&self, range: RangeInclusive<f64>) -> CroppedAlignment<'static> {
        let (from, to) = (*range.start() - M_WINDOW_SNAP, *range.end() + M_WINDOW_SNAP);
        self.crop_by(|segment| {
            if segment.end_m() < from || segment.start_m() > to {
                return None;
            }
            let in_window = |m: &f64| {
                let m = segment.start_m() + m;
                m >= from && m <= to
            };
            let ms = segment.point_ms();
            let first = ms.iter().position(in_window)?;
            let last = ms.iter().rposition(in_window)?;
            Some((first, last))
        })
    }

    fn crop_by<F>(&self, window: F) -> CroppedAlignment<'static>
    where
        F: Fn(&Segment) -> Option<(usize, usize)>,
    {
        let kept: Vec<(usize, Segment)> = self
            .segments
            .iter()
            .enumerate()
            .filter_map(|(i, segment)| {
                let (first, last) = window(segment)?;
                segment
                    .slice(first, last)
                    .map(|slice| (self.source_indices[i], slice))
            })
            .collect();

        let rebase = kept.first().map(|(_, s)| s.start_m()).unwrap_or(0.0);
        let (source_indices, segments): (Vec<usize>, Vec<Segment>) = kept
            .into_iter()
            .map(|(i, s)| (i, s.with_start_m(s.start_m() - rebase)))
            .unzip();

        CroppedAlignment {
            track_id: self.track_id,
            start_m: self.start_m + rebase,
            source_indices: if segments.is_empty() {
                vec![self.start_segment_index()]
            } else {
                source_indices
            },
            segments: Cow::Owned(segments),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::coord;

    fn track() -> TrackGeometry {
        // three 10 m segments along the x axis, 1 m point spacing
        TrackGeometry::from_polylines(
            (0..3)
                .map(|s| {
                    (0..=10)
                        .map(|i| coord! { x: (s * 10 + i) as f64, y: 0.0 })
                        .collect()
                })
                .collect(),
        )
    }

    #[test]
    fn test_crop_nothing_borrows() {
        let geometry = track();
        let crop = crop_nothing(TrackId(1), &geometry);
        assert!(matches!(crop.segments, Cow::Borrowed(_)));
        assert_eq!(crop.segments().len(), 3);
        assert_eq!(crop.start_m(), 0.0);
        assert_eq!(crop.to_track_m(12.5), 12.5);
    }

    #[test]
    fn test_crop_to_bbox_rebases() {
        let geometry = track();
        let bbox = BoundingBox::new(coord! { x: 14.5, y: -1.0 }, coord! { x: 25.5, y: 1.0 });
        let crop = crop_to_bbox(TrackId(1), &geometry, &bbox);

        assert_eq!(crop.segments().len(), 2);
        assert_eq!(crop.start_segment_index(), 1);
        assert_eq!(crop.source_segment_index(1), 2);
        assert!((crop.start_m() - 15.0).abs() < 1e-9);
        assert_eq!(crop.segments()[0].start_m(), 0.0);
        assert!((crop.length() - 10.0).abs() < 1e-9);

        let p = crop.point_at_m(3.0, 0.0).expect("point");
        assert!((p.x - 18.0).abs() < 1e-9);
        assert!((crop.to_track_m(3.0) - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_crop_drops_single_point_slices() {
        let geometry = track();
        // only x = 10 is inside, which is the end of segment 0 and the start of segment 1
        let bbox = BoundingBox::new(coord! { x: 9.5, y: -1.0 }, coord! { x: 10.5, y: 1.0 });
        let crop = crop_to_bbox(TrackId(1), &geometry, &bbox);
        assert!(crop.is_empty());
    }

    #[test]
    fn test_crop_of_crop_composes_offsets() {
        let geometry = track();
        let bbox = BoundingBox::new(coord! { x: 5.0, y: -1.0 }, coord! { x: 30.0, y: 1.0 });
        let outer = crop_to_bbox(TrackId(1), &geometry, &bbox);
        assert!((outer.start_m() - 5.0).abs() < 1e-9);

        let inner = outer.crop_to_m_range(7.0..=12.0);
        assert!((inner.start_m() - 12.0).abs() < 1e-9);
        assert_eq!(inner.start_segment_index(), 1);
        assert!((inner.length() - 5.0).abs() < 1e-9);
        let p = inner.point_at_m(0.0, 0.0).expect("point");
        assert!((p.x - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_m_window_snaps() {
        let geometry = track();
        let crop = crop_nothing(TrackId(1), &geometry).crop_to_m_range(2.00005..=4.99995);
        assert!((crop.start_m() - 2.0).abs() < 1e-9);
        assert!((crop.length() - 3.0).abs() < 1e-9);
    }
}
