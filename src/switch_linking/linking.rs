//! Writes a suggested switch into track geometry and topology.

use crate::switch_linking::config::LinkingConfig;
use crate::switch_linking::geometry::{Segment, TrackGeometry};
use crate::switch_linking::matching::{SegmentLinks, SuggestedSwitch, SwitchLinkingTrackLinks};
use crate::switch_linking::model::{
    JointNumber, LocationTrack, SegmentSwitchLink, SwitchId, TopologyLink, TracksById,
};
use itertools::Itertools;
use log::{debug, warn};
use std::collections::BTreeMap;

/// A joint resolved onto a concrete segment of the track being linked.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ResolvedJoint {
    number: JointNumber,
    segment_index: usize,
    m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JointPosition {
    First,
    Middle,
    Last,
}

/// Segment holding track M `m`. A first or middle joint on a segment boundary belongs to
/// the segment after it, a last joint to the one before.
fn segment_index_at_m(
    segments: &[Segment],
    m: f64,
    position: JointPosition,
    tolerance: f64,
) -> usize {
    let index = match position {
        JointPosition::First | JointPosition::Middle => {
            segments.partition_point(|s| s.end_m() <= m + tolerance)
        }
        JointPosition::Last => segments.partition_point(|s| s.end_m() < m - tolerance),
    };
    index.min(segments.len().saturating_sub(1))
}

fn resolve_joints(geometry: &TrackGeometry, links: &SegmentLinks, tolerance: f64) -> Vec<ResolvedJoint> {
    let count = links.joints().len();
    links
        .joints()
        .iter()
        .enumerate()
        .map(|(i, joint)| {
            let position = if i == 0 {
                JointPosition::First
            } else if i + 1 == count {
                JointPosition::Last
            } else {
                JointPosition::Middle
            };
            ResolvedJoint {
                number: joint.number,
                segment_index: segment_index_at_m(geometry.segments(), joint.m, position, tolerance),
                m: joint.m,
            }
        })
        .collect()
}

/// Moves a joint that landed on another switch's segments onto the nearest free segment
/// boundary, if that boundary is close enough.
fn snap_out_of_overlap(
    segments: &[Segment],
    joint: ResolvedJoint,
    switch_id: SwitchId,
    config: &LinkingConfig,
) -> ResolvedJoint {
    let index = joint.segment_index;
    let Some(foreign) = segments[index].switch_id().filter(|s| *s != switch_id) else {
        return joint;
    };
    let last = segments.len() - 1;
    let limit = config.max_overlap_correction;

    let backward = (1..=index)
        .rev()
        .take_while(|i| segments[*i].switch_id() == Some(foreign))
        .find(|i| segments[i - 1].switch_id().is_none())
        .filter(|i| joint.m - segments[*i].start_m() <= limit)
        .map(|i| ResolvedJoint {
            segment_index: i - 1,
            m: segments[i].start_m(),
            ..joint
        });
    let forward = || {
        (index..last)
            .take_while(|i| segments[*i].switch_id() == Some(foreign))
            .find(|i| segments[i + 1].switch_id().is_none())
            .filter(|i| segments[*i].end_m() - joint.m <= limit)
            .map(|i| ResolvedJoint {
                segment_index: i + 1,
                m: segments[i].end_m(),
                ..joint
            })
    };

    match backward.or_else(forward) {
        Some(snapped) => {
            debug!(
                "snapped joint {} from m {:.3} to {:.3} out of switch {}",
                joint.number, joint.m, snapped.m, foreign
            );
            snapped
        }
        None => {
            warn!(
                "joint {} at m {:.3} overlaps switch {} with no free boundary within {} m",
                joint.number, joint.m, foreign, limit
            );
            joint
        }
    }
}

fn set_start(segment: &Segment, switch_id: SwitchId, joint: JointNumber) -> Segment {
    segment.with_switch(Some(SegmentSwitchLink {
        switch_id,
        start_joint: Some(joint),
        end_joint: None,
    }))
}

fn set_end(segment: &Segment, switch_id: SwitchId, joint: JointNumber) -> Segment {
    segment.with_switch(Some(SegmentSwitchLink {
        switch_id,
        start_joint: None,
        end_joint: Some(joint),
    }))
}

/// Keeps whatever start the segment already has for this switch and sets its end joint.
fn with_end_joint(segment: &Segment, switch_id: SwitchId, joint: JointNumber) -> Segment {
    let link = segment
        .switch()
        .copied()
        .filter(|l| l.switch_id == switch_id)
        .unwrap_or(SegmentSwitchLink::body(switch_id));
    segment.with_switch(Some(SegmentSwitchLink {
        end_joint: Some(joint),
        ..link
    }))
}

fn as_body(segment: &Segment, switch_id: SwitchId) -> Segment {
    segment.with_switch(Some(SegmentSwitchLink::body(switch_id)))
}

struct SegmentPlace {
    first: bool,
    last: bool,
}

/// Links one segment: splits it at every joint inside it and assigns the pieces.
fn link_segment(
    segment: &Segment,
    joints: &[ResolvedJoint],
    place: SegmentPlace,
    switch_id: SwitchId,
    config: &LinkingConfig,
) -> Vec<Segment> {
    if joints.is_empty() {
        return vec![as_body(segment, switch_id)];
    }
    let single = joints.len() == 1;
    let last_joint = joints.len() - 1;
    let same = config.same_point_tolerance;

    joints
        .iter()
        .enumerate()
        .fold(Vec::new(), |mut acc: Vec<Segment>, (i, joint)| {
            let previous = acc.pop().unwrap_or_else(|| segment.clone());
            let j = joint.number;
            let at_start = (joint.m - segment.start_m()).abs() <= same;
            let at_end = (joint.m - segment.end_m()).abs() <= same;

            if at_start {
                acc.push(set_start(&previous, switch_id, j));
                return acc;
            }
            if at_end {
                acc.push(if single {
                    set_end(&previous, switch_id, j)
                } else {
                    with_end_joint(&previous, switch_id, j)
                });
                return acc;
            }

            let (before, after) = match previous.split_at_m(joint.m, config.new_point_tolerance) {
                (before, Some(after)) => (before, after),
                // too close to an end to cut, link the whole piece instead
                (whole, None) => {
                    let nearer_start =
                        joint.m - whole.start_m() < whole.end_m() - joint.m;
                    acc.push(if nearer_start && i == 0 {
                        set_start(&whole, switch_id, j)
                    } else {
                        with_end_joint(&whole, switch_id, j)
                    });
                    return acc;
                }
            };

            let (before, after) = if single {
                if place.first {
                    (before.without_switch(), set_start(&after, switch_id, j))
                } else if place.last {
                    (set_end(&before, switch_id, j), after.without_switch())
                } else {
                    (as_body(&before, switch_id), set_start(&after, switch_id, j))
                }
            } else if i == 0 {
                let before = if place.first {
                    before.without_switch()
                } else {
                    as_body(&before, switch_id)
                };
                (before, set_start(&after, switch_id, j))
            } else if i == last_joint {
                let after = if place.last {
                    after.without_switch()
                } else {
                    as_body(&after, switch_id)
                };
                (with_end_joint(&before, switch_id, j), after)
            } else {
                (
                    with_end_joint(&before, switch_id, j),
                    set_start(&after, switch_id, j),
                )
            };
            acc.push(before);
            acc.push(after);
            acc
        })
}

/// Joins consecutive linked pieces so a piece left open at its end continues into the
/// joint the next piece starts at.
fn combine_linked_pieces(pieces: Vec<Vec<Segment>>, switch_id: SwitchId) -> Vec<Segment> {
    let ours = |s: &Segment| s.switch_id() == Some(switch_id);
    pieces
        .into_iter()
        .fold(Vec::new(), |mut combined: Vec<Segment>, current| {
            let Some(first) = current.first() else {
                return combined;
            };
            let mut rest = current.iter().skip(1).cloned().collect::<Vec<_>>();
            match combined.last_mut() {
                Some(previous) if ours(previous) && ours(first) => {
                    if previous.start_joint().is_some()
                        && previous.end_joint().is_none()
                        && first.start_joint().is_some()
                    {
                        if let Some(start) = first.start_joint() {
                            *previous = with_end_joint(previous, switch_id, start);
                        }
                        combined.push(first.clone());
                    } else if previous.end_joint().is_some()
                        && first.start_joint().is_none()
                        && first.end_joint().is_some()
                    {
                        let link = SegmentSwitchLink {
                            switch_id,
                            start_joint: previous.end_joint(),
                            end_joint: first.end_joint(),
                        };
                        combined.push(first.with_switch(Some(link)));
                    } else {
                        combined.push(first.clone());
                    }
                }
                _ => combined.push(first.clone()),
            }
            combined.append(&mut rest);
            combined
        })
}

/// Switches whose segments lie between the first and last joint of `links`. Linking
/// removes them from the whole track.
pub fn overridden_switches(
    geometry: &TrackGeometry,
    links: &SegmentLinks,
    switch_id: SwitchId,
    config: &LinkingConfig,
) -> Vec<SwitchId> {
    let resolved = snapped_joints(geometry, links, switch_id, config);
    segment_range(&resolved)
        .map(|range| switches_in_range(geometry.segments(), range, switch_id))
        .unwrap_or_default()
}

fn snapped_joints(
    geometry: &TrackGeometry,
    links: &SegmentLinks,
    switch_id: SwitchId,
    config: &LinkingConfig,
) -> Vec<ResolvedJoint> {
    resolve_joints(geometry, links, config.same_point_tolerance)
        .into_iter()
        .map(|joint| snap_out_of_overlap(geometry.segments(), joint, switch_id, config))
        .collect()
}

fn segment_range(joints: &[ResolvedJoint]) -> Option<std::ops::RangeInclusive<usize>> {
    let (min, max) = joints
        .iter()
        .map(|j| j.segment_index)
        .minmax()
        .into_option()?;
    Some(min..=max)
}

fn switches_in_range(
    segments: &[Segment],
    range: std::ops::RangeInclusive<usize>,
    switch_id: SwitchId,
) -> Vec<SwitchId> {
    segments[range]
        .iter()
        .filter_map(|s| s.switch_id())
        .filter(|s| *s != switch_id)
        .unique()
        .collect()
}

/// Writes segment links for `switch_id` into a geometry that no longer carries the switch.
pub fn link_segments(
    geometry: &TrackGeometry,
    switch_id: SwitchId,
    links: &SegmentLinks,
    config: &LinkingConfig,
) -> TrackGeometry {
    if geometry.is_empty() {
        return geometry.clone();
    }
    let resolved = snapped_joints(geometry, links, switch_id, config);
    let Some(range) = segment_range(&resolved) else {
        return geometry.clone();
    };
    let overridden = switches_in_range(geometry.segments(), range.clone(), switch_id);
    if !overridden.is_empty() {
        debug!("linking {} overrides switches {:?}", switch_id, overridden);
    }
    let stripped = geometry.without_switches(&overridden);
    let segments = stripped.segments();

    let mut by_segment: BTreeMap<usize, Vec<ResolvedJoint>> = BTreeMap::new();
    for joint in &resolved {
        by_segment.entry(joint.segment_index).or_default().push(*joint);
    }

    let (first, last) = (*range.start(), *range.end());
    let pieces: Vec<Vec<Segment>> = range
        .clone()
        .map(|index| {
            let joints = by_segment.get(&index).map(Vec::as_slice).unwrap_or_default();
            link_segment(
                &segments[index],
                joints,
                SegmentPlace {
                    first: index == first,
                    last: index == last,
                },
                switch_id,
                config,
            )
        })
        .collect();

    let linked = segments[..first]
        .iter()
        .cloned()
        .chain(combine_linked_pieces(pieces, switch_id))
        .chain(segments[last + 1..].iter().cloned())
        .collect();
    TrackGeometry::new(linked)
}

/// Removes every link to `switch_id` from the track and its geometry.
pub fn clear_links_to_switch(
    track: &LocationTrack,
    geometry: &TrackGeometry,
    switch_id: SwitchId,
) -> (LocationTrack, TrackGeometry) {
    (
        track.without_topology_links_to(switch_id),
        geometry.without_switch(switch_id),
    )
}

/// Clears `switch_id` from every given track.
pub fn clear_links_from_tracks(tracks: &TracksById, switch_id: SwitchId) -> TracksById {
    tracks
        .iter()
        .map(|(id, (track, geometry))| (*id, clear_links_to_switch(track, geometry, switch_id)))
        .collect()
}

/// Applies a suggestion to the given tracks as links of `switch_id`. Returns the tracks
/// that changed, in track id order.
pub fn apply_suggested_switch(
    suggested: &SuggestedSwitch,
    switch_id: SwitchId,
    tracks: &TracksById,
    config: &LinkingConfig,
) -> Vec<(LocationTrack, TrackGeometry)> {
    let detached = &suggested.detached_switches;
    tracks
        .iter()
        .filter_map(|(id, (track, geometry))| {
            let (cleared_track, cleared_geometry) = clear_links_to_switch(track, geometry, switch_id);
            let cleared_track = detached
                .iter()
                .fold(cleared_track, |t, s| t.without_topology_links_to(*s));
            let cleared_geometry = cleared_geometry.without_switches(detached);

            let (linked_track, linked_geometry) = match suggested.track_links.get(id) {
                Some(SwitchLinkingTrackLinks::Segments(links)) => (
                    cleared_track,
                    link_segments(&cleared_geometry, switch_id, links, config),
                ),
                Some(SwitchLinkingTrackLinks::Topology(link)) => (
                    cleared_track.with_topology_link(
                        link.track_end,
                        TopologyLink {
                            switch_id,
                            joint: link.joint,
                        },
                    ),
                    cleared_geometry,
                ),
                Some(SwitchLinkingTrackLinks::Delinked) | None => (cleared_track, cleared_geometry),
            };

            let changed = linked_track != *track || linked_geometry != *geometry;
            changed.then_some((linked_track, linked_geometry))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::switch_linking::matching::{SwitchLinkingJoint, TopologyTrackLink};
    use crate::switch_linking::model::{StructureId, SwitchRef, TrackEnd, TrackId};
    use geo::coord;

    fn j(n: u32) -> JointNumber {
        JointNumber(n)
    }

    fn line(from: f64, to: f64) -> Vec<geo::Coord<f64>> {
        (0..=((to - from) as usize))
            .map(|i| coord! { x: from + i as f64, y: 0.0 })
            .collect()
    }

    fn links(joints: &[(u32, f64)]) -> SegmentLinks {
        SegmentLinks::new(
            joints
                .iter()
                .map(|(n, m)| SwitchLinkingJoint {
                    number: j(*n),
                    m: *m,
                    location: coord! { x: *m, y: 0.0 },
                })
                .collect(),
        )
    }

    fn layout(geometry: &TrackGeometry) -> Vec<(f64, f64, Option<SwitchId>, Option<u32>, Option<u32>)> {
        geometry
            .segments()
            .iter()
            .map(|s| {
                (
                    s.start_m(),
                    s.end_m(),
                    s.switch_id(),
                    s.start_joint().map(|j| j.0),
                    s.end_joint().map(|j| j.0),
                )
            })
            .collect()
    }

    const OWN: SwitchId = SwitchId(1);
    const FOREIGN: SwitchId = SwitchId(9);

    #[test]
    fn test_links_joints_inside_one_segment() {
        let geometry = TrackGeometry::new(vec![Segment::new(line(0.0, 100.0), 0.0, None)]);
        let linked = link_segments(
            &geometry,
            OWN,
            &links(&[(1, 20.0), (5, 30.0), (2, 40.0)]),
            &LinkingConfig::default(),
        );
        assert_eq!(
            layout(&linked),
            vec![
                (0.0, 20.0, None, None, None),
                (20.0, 30.0, Some(OWN), Some(1), Some(5)),
                (30.0, 40.0, Some(OWN), Some(5), Some(2)),
                (40.0, 100.0, None, None, None),
            ]
        );
    }

    #[test]
    fn test_joint_on_segment_boundary_continues_previous_piece() {
        let geometry = TrackGeometry::new(vec![
            Segment::new(line(0.0, 30.0), 0.0, None),
            Segment::new(line(30.0, 60.0), 0.0, None),
            Segment::new(line(60.0, 100.0), 0.0, None),
        ]);
        let linked = link_segments(
            &geometry,
            OWN,
            &links(&[(1, 20.0), (5, 30.0), (2, 70.0)]),
            &LinkingConfig::default(),
        );
        assert_eq!(
            layout(&linked),
            vec![
                (0.0, 20.0, None, None, None),
                (20.0, 30.0, Some(OWN), Some(1), Some(5)),
                (30.0, 60.0, Some(OWN), Some(5), None),
                (60.0, 70.0, Some(OWN), None, Some(2)),
                (70.0, 100.0, None, None, None),
            ]
        );
        assert_eq!(linked.end_m(), 100.0);
    }

    fn with_foreign_switch() -> TrackGeometry {
        TrackGeometry::new(vec![
            Segment::new(line(0.0, 40.0), 0.0, None),
            Segment::new(
                line(40.0, 60.0),
                0.0,
                Some(SegmentSwitchLink {
                    switch_id: FOREIGN,
                    start_joint: Some(j(1)),
                    end_joint: Some(j(2)),
                }),
            ),
            Segment::new(line(60.0, 100.0), 0.0, None),
        ])
    }

    #[test]
    fn test_overlapping_end_joint_snaps_back_to_free_boundary() {
        let geometry = with_foreign_switch();
        let joints = links(&[(1, 20.0), (2, 42.0)]);
        let config = LinkingConfig::default();

        assert!(overridden_switches(&geometry, &joints, OWN, &config).is_empty());
        let linked = link_segments(&geometry, OWN, &joints, &config);
        assert_eq!(
            layout(&linked),
            vec![
                (0.0, 20.0, None, None, None),
                (20.0, 40.0, Some(OWN), Some(1), Some(2)),
                (40.0, 60.0, Some(FOREIGN), Some(1), Some(2)),
                (60.0, 100.0, None, None, None),
            ]
        );
    }

    #[test]
    fn test_overlap_too_deep_overrides_other_switch() {
        let geometry = with_foreign_switch();
        let joints = links(&[(1, 20.0), (2, 50.0)]);
        let config = LinkingConfig::default();

        assert_eq!(
            overridden_switches(&geometry, &joints, OWN, &config),
            vec![FOREIGN]
        );
        let linked = link_segments(&geometry, OWN, &joints, &config);
        assert!(!linked.contains_switch(FOREIGN));
        assert_eq!(
            layout(&linked),
            vec![
                (0.0, 20.0, None, None, None),
                (20.0, 40.0, Some(OWN), Some(1), None),
                (40.0, 50.0, Some(OWN), None, Some(2)),
                (50.0, 60.0, None, None, None),
                (60.0, 100.0, None, None, None),
            ]
        );
    }

    #[test]
    fn test_apply_sets_topology_and_clears_stale_links() {
        let mut stale = LocationTrack::new(TrackId(3), "stale");
        stale.topology_end = Some(TopologyLink {
            switch_id: OWN,
            joint: j(2),
        });
        let untouched = LocationTrack::new(TrackId(4), "untouched");
        let branch = LocationTrack::new(TrackId(5), "branch");
        let short = || TrackGeometry::new(vec![Segment::new(line(0.0, 10.0), 0.0, None)]);
        let tracks: TracksById = [
            (TrackId(3), (stale, short())),
            (TrackId(4), (untouched, short())),
            (TrackId(5), (branch, short())),
        ]
        .into_iter()
        .collect();

        let suggested = SuggestedSwitch {
            structure_id: StructureId(1),
            switch_ref: SwitchRef::Existing(OWN),
            joints: Vec::new(),
            track_links: [
                (TrackId(3), SwitchLinkingTrackLinks::Delinked),
                (
                    TrackId(5),
                    SwitchLinkingTrackLinks::Topology(TopologyTrackLink {
                        joint: j(3),
                        track_end: TrackEnd::Start,
                    }),
                ),
            ]
            .into_iter()
            .collect(),
            detached_switches: Vec::new(),
        };

        let changed = apply_suggested_switch(&suggested, OWN, &tracks, &LinkingConfig::default());
        let ids: Vec<_> = changed.iter().map(|(t, _)| t.id).collect();
        assert_eq!(ids, vec![TrackId(3), TrackId(5)]);
        assert_eq!(changed[0].0.topology_end, None);
        assert_eq!(
            changed[1].0.topology_start,
            Some(TopologyLink {
                switch_id: OWN,
                joint: j(3),
            })
        );
    }

    #[test]
    fn test_apply_strips_detached_switch() {
        let track = LocationTrack::new(TrackId(1), "through");
        let tracks: TracksById = [(TrackId(1), (track, with_foreign_switch()))]
            .into_iter()
            .collect();
        let suggested = SuggestedSwitch {
            structure_id: StructureId(1),
            switch_ref: SwitchRef::Existing(OWN),
            joints: Vec::new(),
            track_links: [(
                TrackId(1),
                SwitchLinkingTrackLinks::Segments(links(&[(1, 45.0), (2, 55.0)])),
            )]
            .into_iter()
            .collect(),
            detached_switches: vec![FOREIGN],
        };

        let changed = apply_suggested_switch(&suggested, OWN, &tracks, &LinkingConfig::default());
        assert_eq!(changed.len(), 1);
        let geometry = &changed[0].1;
        assert!(!geometry.contains_switch(FOREIGN));
        assert_eq!(geometry.switch_ids(), vec![OWN]);
    }
}
