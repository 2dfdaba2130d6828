use crate::switch_linking::config::LinkingConfig;
use crate::switch_linking::cropping::{CroppedAlignment, crop_nothing};
use crate::switch_linking::geometry::{Segment, TrackGeometry, closest_point_on_line, dot, line_length};
use crate::switch_linking::grid_search::{SamplingGrid, find_best_fits_for_grid};
use crate::switch_linking::model::{JointNumber, LocationAccuracy, RelativeDirection, TrackId};
use crate::switch_linking::structure::{RigidTransform, StructureJoint, SwitchStructure};
use geo::Coord;
use itertools::Itertools;
use log::trace;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JointMatchKind {
    /// Joint sits on the first point of a segment
    Start,
    /// Joint sits on the last point of a segment
    End,
    /// Joint sits somewhere along a segment
    Line,
}

/// One candidate place for a joint on a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FittedSwitchJointMatch {
    pub track_id: TrackId,
    /// Segment index on the full track
    pub segment_index: usize,
    /// M on the full track
    pub m: f64,
    pub kind: JointMatchKind,
    pub joint: JointNumber,
    pub distance: f64,
    /// Closest approach of the track to the joint, shared by all matches of the joint on this track
    pub distance_to_alignment: f64,
    pub direction: RelativeDirection,
    pub location: Coord<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedSwitchJoint {
    pub number: JointNumber,
    pub location: Coord<f64>,
    pub accuracy: Option<LocationAccuracy>,
    pub matches: Vec<FittedSwitchJointMatch>,
}

/// A structure placed in layout space with candidate track positions for its joints.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedSwitch {
    pub structure: Arc<SwitchStructure>,
    pub joints: Vec<FittedSwitchJoint>,
}

impl FittedSwitch {
    pub fn joint(&self, number: JointNumber) -> Option<&FittedSwitchJoint> {
        self.joints.iter().find(|j| j.number == number)
    }

    pub fn has_matches(&self) -> bool {
        self.joints.iter().any(|j| !j.matches.is_empty())
    }

    pub fn matched_tracks(&self) -> Vec<TrackId> {
        self.joints
            .iter()
            .flat_map(|j| j.matches.iter().map(|m| m.track_id))
            .unique()
            .collect()
    }
}

/// The ways a structure can be positioned before fitting.
#[derive(Debug, Clone, PartialEq)]
pub enum FitRequest {
    /// Joints already positioned in layout space
    ByJoints {
        joints: Vec<StructureJoint>,
        accuracy: Option<LocationAccuracy>,
    },
    ByTransform {
        transform: RigidTransform,
        accuracy: Option<LocationAccuracy>,
    },
    /// Blind search around a single point
    ByPoint { location: Coord<f64> },
}

/// Single entry point for fitting. `previously_linked` only affects blind search scoring.
pub fn fit(
    request: &FitRequest,
    structure: &Arc<SwitchStructure>,
    tracks: &[(TrackId, &TrackGeometry)],
    previously_linked: &[TrackId],
    config: &LinkingConfig,
) -> Option<FittedSwitch> {
    let uncropped = || -> Vec<CroppedAlignment> {
        tracks
            .iter()
            .map(|(id, geometry)| crop_nothing(*id, geometry))
            .collect()
    };
    match request {
        FitRequest::ByJoints { joints, accuracy } => Some(fit_switch(
            joints,
            structure,
            &uncropped(),
            *accuracy,
            config,
        )),
        FitRequest::ByTransform {
            transform,
            accuracy,
        } => Some(fit_switch(
            &structure.place_joints(transform),
            structure,
            &uncropped(),
            *accuracy,
            config,
        )),
        FitRequest::ByPoint { location } => find_best_fits_for_grid(
            &SamplingGrid::single(*location),
            structure,
            tracks,
            previously_linked,
            config,
        )
        .first_found(),
    }
}

struct PossibleSegment<'s> {
    segment: &'s Segment,
    crop_index: usize,
    closest_point_index: usize,
    distance: f64,
    direction: RelativeDirection,
}

fn possibly_matchable_segments<'s>(
    track: &'s CroppedAlignment,
    joint: Coord<f64>,
    principal: Coord<f64>,
    config: &LinkingConfig,
) -> Vec<PossibleSegment<'s>> {
    let max_distance = config
        .segment_end_tolerance
        .max(config.joint_match_tolerance);
    let Some(closest) = track.closest_segment_index(joint) else {
        return Vec::new();
    };
    let first = closest.saturating_sub(1);
    let last = (closest + 1).min(track.segments().len() - 1);

    (first..=last)
        .filter_map(|crop_index| {
            let segment = &track.segments()[crop_index];
            let projection = segment.closest_point(joint);
            if projection.distance >= max_distance {
                return None;
            }
            let direction = if dot(segment.direction(), principal) >= 0.0 {
                RelativeDirection::Along
            } else {
                RelativeDirection::Against
            };
            Some(PossibleSegment {
                segment,
                crop_index,
                closest_point_index: segment.seek_point_at_m(projection.m).index,
                distance: projection.distance,
                direction,
            })
        })
        .collect()
}

/// Closest points of consecutive lines walking away from the starting point, while they
/// stay under `tolerance`.
fn line_matches(
    points: impl Iterator<Item = Coord<f64>>,
    joint: Coord<f64>,
    tolerance: f64,
) -> Vec<(Coord<f64>, f64)> {
    points
        .tuple_windows()
        .map(|(a, b)| {
            let closest = closest_point_on_line(a, b, joint);
            (closest, line_length(closest, joint))
        })
        .take_while(|(_, d)| *d < tolerance)
        .collect()
}

fn find_joint_matches(
    joint: &StructureJoint,
    track: &CroppedAlignment,
    principal: Coord<f64>,
    config: &LinkingConfig,
) -> Vec<FittedSwitchJointMatch> {
    let location = joint.location;
    let possible = possibly_matchable_segments(track, location, principal, config);
    let Some(distance_to_alignment) = possible.iter().map(|p| p.distance).reduce(f64::min) else {
        return Vec::new();
    };

    possible
        .iter()
        .flat_map(|p| {
            let segment = p.segment;
            let make = |kind, m: f64, distance, at| FittedSwitchJointMatch {
                track_id: track.track_id,
                segment_index: track.source_segment_index(p.crop_index),
                m: track.to_track_m(m),
                kind,
                joint: joint.number,
                distance,
                distance_to_alignment,
                direction: p.direction,
                location: at,
            };

            let mut matches = Vec::new();
            let start_distance = line_length(segment.start_point(), location);
            if start_distance <= config.segment_end_tolerance {
                matches.push(make(
                    JointMatchKind::Start,
                    segment.start_m(),
                    start_distance,
                    segment.start_point(),
                ));
            }
            let end_distance = line_length(segment.end_point(), location);
            if end_distance <= config.segment_end_tolerance {
                matches.push(make(
                    JointMatchKind::End,
                    segment.end_m(),
                    end_distance,
                    segment.end_point(),
                ));
            }

            let points = segment.points();
            let forward = line_matches(
                points[p.closest_point_index..].iter().copied(),
                location,
                config.joint_match_tolerance,
            );
            let backward = line_matches(
                points[..=p.closest_point_index].iter().rev().copied(),
                location,
                config.joint_match_tolerance,
            );
            matches.extend(forward.into_iter().chain(backward).map(|(at, distance)| {
                make(
                    JointMatchKind::Line,
                    segment.closest_point(at).m,
                    distance,
                    at,
                )
            }));
            matches
        })
        .collect()
}

/// Direction of the longest structure alignment in layout space.
fn principal_direction(joints: &[StructureJoint], structure: &SwitchStructure) -> Coord<f64> {
    let alignment = structure.longest_alignment();
    let find = |n: JointNumber| joints.iter().find(|j| j.number == n).map(|j| j.location);
    match (find(alignment.first()), find(alignment.last())) {
        (Some(first), Some(last)) => last - first,
        _ => Coord { x: 0.0, y: 0.0 },
    }
}

fn best_matches_for_joint(
    matches: Vec<FittedSwitchJointMatch>,
    is_first: bool,
    is_last: bool,
) -> Vec<FittedSwitchJointMatch> {
    let of_kind = |keep: &dyn Fn(JointMatchKind) -> bool| -> Vec<FittedSwitchJointMatch> {
        matches.iter().filter(|m| keep(m.kind)).copied().collect()
    };
    let or_else = |preferred: Vec<_>, fallback: &dyn Fn() -> Vec<_>| {
        if preferred.is_empty() {
            fallback()
        } else {
            preferred
        }
    };
    if is_first {
        // nearest joint never ends a segment
        or_else(of_kind(&|k| k == JointMatchKind::Start), &|| {
            of_kind(&|k| k != JointMatchKind::End)
        })
    } else if is_last {
        or_else(of_kind(&|k| k == JointMatchKind::End), &|| {
            of_kind(&|k| k != JointMatchKind::Start)
        })
    } else {
        or_else(of_kind(&|k| k != JointMatchKind::Line), &|| matches.clone())
    }
}

/// A joint at a segment boundary matches both the start of the later segment and the end
/// of the earlier one. Both are kept at the same M so that very short segments can't
/// reorder the joints.
fn select_match(candidates: Vec<FittedSwitchJointMatch>) -> Vec<FittedSwitchJointMatch> {
    let starts: Vec<_> = candidates
        .iter()
        .filter(|m| m.kind == JointMatchKind::Start)
        .collect();
    let ends: Vec<_> = candidates
        .iter()
        .filter(|m| m.kind == JointMatchKind::End)
        .collect();
    if let ([start], [end]) = (starts.as_slice(), ends.as_slice()) {
        if end.segment_index + 1 == start.segment_index {
            let shared = FittedSwitchJointMatch {
                m: start.m,
                location: start.location,
                ..**end
            };
            return vec![**start, shared];
        }
    }
    candidates
        .into_iter()
        .min_by(|a, b| a.distance.total_cmp(&b.distance))
        .into_iter()
        .collect()
}

/// Finds per-joint matches of an already positioned structure on the given tracks.
pub fn fit_switch(
    joints: &[StructureJoint],
    structure: &Arc<SwitchStructure>,
    tracks: &[CroppedAlignment],
    accuracy: Option<LocationAccuracy>,
    config: &LinkingConfig,
) -> FittedSwitch {
    let principal = principal_direction(joints, structure);

    let mut selected: Vec<FittedSwitchJointMatch> = Vec::new();
    for track in tracks.iter().filter(|t| !t.is_empty()) {
        let matches: Vec<FittedSwitchJointMatch> = joints
            .iter()
            .flat_map(|joint| find_joint_matches(joint, track, principal, config))
            .collect();
        if matches.is_empty() {
            continue;
        }

        let by_m = matches
            .iter()
            .sorted_by(|a, b| a.m.total_cmp(&b.m))
            .collect::<Vec<_>>();
        let nearest = by_m[0].joint;
        let farthest = by_m[by_m.len() - 1].joint;

        for joint in joints {
            let joint_matches: Vec<_> = matches
                .iter()
                .filter(|m| m.joint == joint.number)
                .copied()
                .collect();
            if joint_matches.is_empty() {
                continue;
            }
            let candidates =
                best_matches_for_joint(joint_matches, joint.number == nearest, joint.number == farthest);
            selected.extend(select_match(candidates));
        }
    }

    trace!(
        "fitted {} to {} tracks with {} matches",
        structure.type_name(),
        tracks.len(),
        selected.len()
    );

    FittedSwitch {
        structure: Arc::clone(structure),
        joints: joints
            .iter()
            .map(|joint| FittedSwitchJoint {
                number: joint.number,
                location: joint.location,
                accuracy,
                matches: selected
                    .iter()
                    .filter(|m| m.joint == joint.number)
                    .copied()
                    .collect(),
            })
            .collect(),
    }
}
