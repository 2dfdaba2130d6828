//! Turns a fit into concrete per-track link suggestions.
//!
//! Joint matches are mapped onto track edges, every edge's joint sequence is validated
//! (or completed) against the structure alignments, and one sequence is picked per track.

use crate::switch_linking::config::LinkingConfig;
use crate::switch_linking::fitting::FittedSwitch;
use crate::switch_linking::geometry::{Edge, TrackGeometry, line_length};
use crate::switch_linking::model::{
    JointNumber, LocationAccuracy, RelativeDirection, StructureId, SwitchId, SwitchRef, TrackEnd,
    TrackId, TracksById,
};
use crate::switch_linking::structure::{StructureAlignment, SwitchJointRole, SwitchStructure};
use geo::Coord;
use itertools::Itertools;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId {
    pub track_id: TrackId,
    pub edge_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointOnEdge {
    pub joint: JointNumber,
    pub role: SwitchJointRole,
    pub m_on_edge: f64,
    pub direction: RelativeDirection,
    pub location: Coord<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuggestedSwitchJoint {
    pub number: JointNumber,
    pub role: SwitchJointRole,
    pub location: Coord<f64>,
    pub accuracy: Option<LocationAccuracy>,
}

/// A joint to link at track M `m`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwitchLinkingJoint {
    pub number: JointNumber,
    pub m: f64,
    pub location: Coord<f64>,
}

/// Joints to write into a track's segments, strictly increasing in M.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<SwitchLinkingJoint>", into = "Vec<SwitchLinkingJoint>")]
pub struct SegmentLinks {
    joints: Vec<SwitchLinkingJoint>,
}

fn strictly_increasing(joints: &[SwitchLinkingJoint]) -> bool {
    joints.iter().tuple_windows().all(|(a, b)| a.m < b.m)
}

impl SegmentLinks {
    pub fn new(joints: Vec<SwitchLinkingJoint>) -> Self {
        assert!(!joints.is_empty(), "segment links need at least one joint");
        assert!(
            strictly_increasing(&joints),
            "segment link joints must be strictly increasing in M: {:?}",
            joints.iter().map(|j| j.m).collect::<Vec<_>>()
        );
        Self { joints }
    }

    pub fn joints(&self) -> &[SwitchLinkingJoint] {
        &self.joints
    }
}

impl TryFrom<Vec<SwitchLinkingJoint>> for SegmentLinks {
    type Error = String;

    fn try_from(joints: Vec<SwitchLinkingJoint>) -> Result<Self, Self::Error> {
        if joints.is_empty() || !strictly_increasing(&joints) {
            return Err("segment link joints must be non-empty and strictly increasing in M".into());
        }
        Ok(Self { joints })
    }
}

impl From<SegmentLinks> for Vec<SwitchLinkingJoint> {
    fn from(links: SegmentLinks) -> Self {
        links.joints
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyTrackLink {
    pub joint: JointNumber,
    pub track_end: TrackEnd,
}

/// What linking the switch does to one track. A track is linked either through its
/// segments or through a topology end, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "links", rename_all = "snake_case")]
pub enum SwitchLinkingTrackLinks {
    Delinked,
    Segments(SegmentLinks),
    Topology(TopologyTrackLink),
}

impl SwitchLinkingTrackLinks {
    pub fn is_linked(&self) -> bool {
        !matches!(self, SwitchLinkingTrackLinks::Delinked)
    }

    /// Joint numbers this link attaches to the track
    pub fn joint_numbers(&self) -> Vec<JointNumber> {
        match self {
            SwitchLinkingTrackLinks::Delinked => Vec::new(),
            SwitchLinkingTrackLinks::Segments(links) => {
                links.joints().iter().map(|j| j.number).collect()
            }
            SwitchLinkingTrackLinks::Topology(link) => vec![link.joint],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedSwitch {
    pub structure_id: StructureId,
    pub switch_ref: SwitchRef,
    pub joints: Vec<SuggestedSwitchJoint>,
    pub track_links: BTreeMap<TrackId, SwitchLinkingTrackLinks>,
    /// Other switches whose bodies overlapped this one and must be unlinked
    #[serde(default)]
    pub detached_switches: Vec<SwitchId>,
}

impl SuggestedSwitch {
    pub fn joint(&self, number: JointNumber) -> Option<&SuggestedSwitchJoint> {
        self.joints.iter().find(|j| j.number == number)
    }

    pub fn linked_tracks(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.track_links
            .iter()
            .filter(|(_, links)| links.is_linked())
            .map(|(id, _)| *id)
    }
}

type JointsByEdge = BTreeMap<EdgeId, Vec<JointOnEdge>>;
type EdgesByTrack = BTreeMap<TrackId, Vec<Edge>>;

struct MatchContext<'a> {
    fit: &'a FittedSwitch,
    structure: &'a SwitchStructure,
    tracks: &'a TracksById,
    edges: EdgesByTrack,
    config: &'a LinkingConfig,
}

impl MatchContext<'_> {
    fn geometry(&self, track_id: TrackId) -> Option<&TrackGeometry> {
        self.tracks.get(&track_id).map(|(_, geometry)| geometry)
    }

    fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id.track_id)?.get(id.edge_index)
    }

    fn fitted_location(&self, joint: JointNumber) -> Option<Coord<f64>> {
        self.fit.joint(joint).map(|j| j.location)
    }
}

fn edges_by_track(tracks: &TracksById) -> EdgesByTrack {
    tracks
        .iter()
        .map(|(id, (_, geometry))| (*id, geometry.edges()))
        .collect()
}

/// Step 1: every joint match as a joint on the edge containing its segment.
fn map_fit_to_edges(ctx: &MatchContext) -> JointsByEdge {
    let mut by_edge = JointsByEdge::new();
    for joint in &ctx.fit.joints {
        for m in &joint.matches {
            let Some(edges) = ctx.edges.get(&m.track_id) else {
                continue;
            };
            let Some(edge) = edges.iter().find(|e| e.contains_segment(m.segment_index)) else {
                continue;
            };
            let on_edge = JointOnEdge {
                joint: joint.number,
                role: ctx.structure.role(joint.number),
                m_on_edge: m.m - edge.start_m,
                direction: m.direction,
                location: m.location,
            };
            let entry = by_edge
                .entry(EdgeId {
                    track_id: m.track_id,
                    edge_index: edge.index,
                })
                .or_default();
            let duplicate = entry.iter().any(|e| {
                e.joint == on_edge.joint
                    && (e.m_on_edge - on_edge.m_on_edge).abs() <= ctx.config.same_point_tolerance
            });
            if !duplicate {
                entry.push(on_edge);
            }
        }
    }
    for joints in by_edge.values_mut() {
        joints.sort_by(|a, b| a.m_on_edge.total_cmp(&b.m_on_edge));
    }
    by_edge
}

/// Step 2: other switches whose body edge contains one of our middle joints.
fn find_enclosing_switches(
    ctx: &MatchContext,
    by_edge: &JointsByEdge,
    own: Option<SwitchId>,
) -> Vec<SwitchId> {
    by_edge
        .iter()
        .filter(|(_, joints)| {
            joints
                .iter()
                .any(|j| !ctx.structure.is_end_joint(j.joint))
        })
        .filter_map(|(edge_id, _)| {
            let geometry = ctx.geometry(edge_id.track_id)?;
            let edge = ctx.edge(*edge_id)?;
            let first = &geometry.segments()[edge.segment_range.start];
            let last = &geometry.segments()[edge.segment_range.end - 1];
            let enclosing = first.switch_id()?;
            let bounded = first.start_joint().is_some()
                && last.switch_id() == Some(enclosing)
                && last.end_joint().is_some();
            (bounded && Some(enclosing) != own).then_some(enclosing)
        })
        .unique()
        .collect()
}

fn non_math_joints<I: IntoIterator<Item = (JointNumber, SwitchJointRole)>>(
    joints: I,
) -> BTreeSet<JointNumber> {
    joints
        .into_iter()
        .filter(|(_, role)| *role != SwitchJointRole::Math)
        .map(|(joint, _)| joint)
        .collect()
}

fn validate_sequence(
    ctx: &MatchContext,
    alignment: &StructureAlignment,
    joints: &[JointOnEdge],
    edge: &Edge,
) -> bool {
    let structure_set = non_math_joints(
        alignment
            .joints
            .iter()
            .map(|j| (*j, ctx.structure.role(*j))),
    );
    let sequence_set = non_math_joints(joints.iter().map(|j| (j.joint, j.role)));
    structure_set == sequence_set && fits_split_alignment(ctx, alignment, joints, edge)
}

/// The inner joint of a split alignment must sit at an edge end.
fn fits_split_alignment(
    ctx: &MatchContext,
    alignment: &StructureAlignment,
    joints: &[JointOnEdge],
    edge: &Edge,
) -> bool {
    let Some(inner) = alignment.inner_joint else {
        return true;
    };
    let snap = ctx.config.inner_joint_snap_distance;
    match joints.iter().find(|j| j.joint == inner) {
        None => true,
        Some(j) => j.m_on_edge < snap || (j.m_on_edge - edge.length()).abs() < snap,
    }
}

fn toss_extra_joints(alignment: &StructureAlignment, joints: &[JointOnEdge]) -> Vec<JointOnEdge> {
    joints
        .iter()
        .filter(|j| alignment.contains(j.joint))
        .copied()
        .collect()
}

/// A single non-math joint close to an edge end, snapped onto that end.
fn as_topology_variant(
    ctx: &MatchContext,
    edge_id: EdgeId,
    joints: &[JointOnEdge],
) -> Option<JointOnEdge> {
    let [single] = joints else {
        return None;
    };
    if single.role == SwitchJointRole::Math {
        return None;
    }
    let geometry = ctx.geometry(edge_id.track_id)?;
    let edge = ctx.edge(edge_id)?;
    let point = geometry.point_at_edge_m(edge, single.m_on_edge)?;
    let fitted = ctx.fitted_location(single.joint)?;
    let topology = ctx.config.topology_distance;
    let at_start = single.m_on_edge < topology;
    let at_end = edge.length() - single.m_on_edge < topology;
    if !(at_start || at_end) || line_length(point, fitted) >= topology {
        return None;
    }
    let m_on_edge = if at_start { 0.0 } else { edge.length() };
    Some(JointOnEdge {
        m_on_edge,
        location: geometry.point_at_edge_m(edge, m_on_edge)?,
        ..*single
    })
}

/// Synthesizes the alignment joints missing from the edge at the edge ends, using a
/// matched middle joint as the root that tells which end each missing joint belongs to.
fn complete_sequence(
    ctx: &MatchContext,
    alignment: &StructureAlignment,
    edge_id: EdgeId,
    joints: &[JointOnEdge],
) -> Option<Vec<JointOnEdge>> {
    let middle = alignment.middle_joints();
    let root = joints.iter().find(|j| middle.contains(&j.joint))?;
    let geometry = ctx.geometry(edge_id.track_id)?;
    let edge = ctx.edge(edge_id)?;

    let order: Vec<JointNumber> = match root.direction {
        RelativeDirection::Along => alignment.joints.clone(),
        RelativeDirection::Against => alignment.joints.iter().rev().copied().collect(),
    };
    let position = |joint: JointNumber| order.iter().position(|j| *j == joint);
    let root_position = position(root.joint)?;

    let synthesized = alignment
        .joints
        .iter()
        .filter(|number| !joints.iter().any(|j| j.joint == **number))
        .filter_map(|missing| {
            let before_root = position(*missing)? < root_position;
            let m_on_edge = if before_root { 0.0 } else { edge.length() };
            let location = geometry.point_at_edge_m(edge, m_on_edge)?;
            let fitted = ctx.fitted_location(*missing)?;
            (line_length(fitted, location) <= ctx.config.joint_node_adjustment_tolerance).then_some(
                JointOnEdge {
                    joint: *missing,
                    role: ctx.structure.role(*missing),
                    m_on_edge,
                    direction: root.direction,
                    location,
                },
            )
        });

    let completed: Vec<JointOnEdge> = joints
        .iter()
        .copied()
        .chain(synthesized)
        .sorted_by(|a, b| a.m_on_edge.total_cmp(&b.m_on_edge))
        .collect();
    let completed_set: BTreeSet<JointNumber> = completed.iter().map(|j| j.joint).collect();
    let alignment_set: BTreeSet<JointNumber> = alignment.joints.iter().copied().collect();
    (completed_set == alignment_set).then_some(completed)
}

/// Step 3: every acceptable joint sequence of an edge.
fn sequence_variants(
    ctx: &MatchContext,
    edge_id: EdgeId,
    joints: &[JointOnEdge],
) -> Vec<Vec<JointOnEdge>> {
    let Some(edge) = ctx.edge(edge_id) else {
        return Vec::new();
    };
    let alignments = ctx.structure.alignments();

    let topology = as_topology_variant(ctx, edge_id, joints).map(|j| vec![j]);
    let valid = alignments
        .iter()
        .filter(|alignment| validate_sequence(ctx, alignment, joints, edge))
        .map(|alignment| toss_extra_joints(alignment, joints));
    let completed = alignments.iter().filter_map(|alignment| {
        let completed = complete_sequence(ctx, alignment, edge_id, joints)?;
        validate_sequence(ctx, alignment, &completed, edge)
            .then(|| toss_extra_joints(alignment, &completed))
    });

    topology
        .into_iter()
        .chain(valid)
        .chain(completed)
        .filter(|sequence| !sequence.is_empty())
        .collect()
}

/// Topology candidates for tracks the fit never touched: a fitted joint near a track end.
fn topology_links_to_unmatched_tracks(ctx: &MatchContext) -> Vec<(EdgeId, Vec<JointOnEdge>)> {
    let matched: BTreeSet<TrackId> = ctx.fit.matched_tracks().into_iter().collect();
    ctx.tracks
        .iter()
        .filter(|(id, _)| !matched.contains(id))
        .flat_map(|(id, (_, geometry))| {
            let edges = ctx.edges.get(id).map(Vec::as_slice).unwrap_or_default();
            let ends = [
                edges.first().zip(geometry.start_point()).map(|(e, p)| (e, p, 0.0)),
                edges
                    .last()
                    .zip(geometry.end_point())
                    .map(|(e, p)| (e, p, e.length())),
            ];
            ends.into_iter().flatten().flat_map(move |(edge, point, m_on_edge)| {
                ctx.fit
                    .joints
                    .iter()
                    .filter(move |joint| {
                        line_length(joint.location, point) <= ctx.config.topology_distance
                    })
                    .map(move |joint| {
                        (
                            EdgeId {
                                track_id: *id,
                                edge_index: edge.index,
                            },
                            vec![JointOnEdge {
                                joint: joint.number,
                                role: ctx.structure.role(joint.number),
                                m_on_edge,
                                direction: RelativeDirection::Along,
                                location: point,
                            }],
                        )
                    })
            })
        })
        .collect()
}

/// Step 4: one sequence per track, preferring those reusing the most joints the fit found
/// on that track. Ties keep production order.
fn pick_best_by_track(
    candidates: Vec<(EdgeId, Vec<JointOnEdge>)>,
    original: &JointsByEdge,
) -> Vec<(EdgeId, Vec<JointOnEdge>)> {
    let mut hits: BTreeMap<TrackId, BTreeSet<JointNumber>> = BTreeMap::new();
    for (edge_id, joints) in original {
        hits.entry(edge_id.track_id)
            .or_default()
            .extend(joints.iter().map(|j| j.joint));
    }
    let reused = |edge_id: &EdgeId, joints: &[JointOnEdge]| {
        let on_track = hits.get(&edge_id.track_id);
        joints
            .iter()
            .filter(|j| on_track.is_some_and(|set| set.contains(&j.joint)))
            .count()
    };
    candidates
        .into_iter()
        .sorted_by_key(|(edge_id, joints)| std::cmp::Reverse(reused(edge_id, joints)))
        .unique_by(|(edge_id, _)| edge_id.track_id)
        .collect()
}

/// Step 5 for one track: a lone joint at the very start or end of the track becomes a
/// topology link, everything else a segment link.
fn track_link(
    ctx: &MatchContext,
    edge_id: EdgeId,
    joints: &[JointOnEdge],
) -> Option<SwitchLinkingTrackLinks> {
    let edge = ctx.edge(edge_id)?;
    let edge_count = ctx.edges.get(&edge_id.track_id)?.len();
    let tolerance = ctx.config.same_point_tolerance;
    if let [single] = joints {
        if edge.index == 0 && single.m_on_edge <= tolerance {
            return Some(SwitchLinkingTrackLinks::Topology(TopologyTrackLink {
                joint: single.joint,
                track_end: TrackEnd::Start,
            }));
        }
        if edge.index + 1 == edge_count && edge.length() - single.m_on_edge <= tolerance {
            return Some(SwitchLinkingTrackLinks::Topology(TopologyTrackLink {
                joint: single.joint,
                track_end: TrackEnd::End,
            }));
        }
    }
    let linking_joints: Vec<SwitchLinkingJoint> = joints
        .iter()
        .map(|j| SwitchLinkingJoint {
            number: j.joint,
            m: edge.start_m + j.m_on_edge,
            location: j.location,
        })
        .collect();
    Some(SwitchLinkingTrackLinks::Segments(SegmentLinks::new(
        linking_joints,
    )))
}

/// A sequence must name each joint once and strictly advance along the edge.
fn is_linkable(joints: &[JointOnEdge]) -> bool {
    joints.iter().map(|j| j.joint).all_unique()
        && joints
            .iter()
            .tuple_windows()
            .all(|(a, b)| a.m_on_edge < b.m_on_edge)
}

/// Matches a fit to the given tracks. The tracks must no longer carry links to the switch
/// being matched. Every given track gets an entry; those the switch doesn't link are
/// `Delinked`.
pub fn match_fitted_switch_to_tracks(
    fit: &FittedSwitch,
    cleared_tracks: &TracksById,
    switch_ref: SwitchRef,
    config: &LinkingConfig,
) -> SuggestedSwitch {
    let own = switch_ref.id();
    if let Some(id) = own {
        assert!(
            cleared_tracks.values().all(|(track, geometry)| {
                !geometry.contains_switch(id) && track.topology_switches().all(|s| s != id)
            }),
            "switch {} must be cleared from tracks before matching",
            id
        );
    }
    let structure = fit.structure.as_ref();

    let ctx = MatchContext {
        fit,
        structure,
        tracks: cleared_tracks,
        edges: edges_by_track(cleared_tracks),
        config,
    };
    let initial = map_fit_to_edges(&ctx);
    let detached = find_enclosing_switches(&ctx, &initial, own);

    let working: TracksById;
    let ctx = if detached.is_empty() {
        ctx
    } else {
        debug!("detaching overlapping switches {:?}", detached);
        working = cleared_tracks
            .iter()
            .map(|(id, (track, geometry))| {
                let track = detached
                    .iter()
                    .fold(track.clone(), |t, s| t.without_topology_links_to(*s));
                (*id, (track, geometry.without_switches(&detached)))
            })
            .collect();
        MatchContext {
            fit,
            structure,
            tracks: &working,
            edges: edges_by_track(&working),
            config,
        }
    };
    let by_edge = if detached.is_empty() {
        initial
    } else {
        map_fit_to_edges(&ctx)
    };

    let mut candidates: Vec<(EdgeId, Vec<JointOnEdge>)> = by_edge
        .iter()
        .flat_map(|(edge_id, joints)| {
            sequence_variants(&ctx, *edge_id, joints)
                .into_iter()
                .map(move |sequence| (*edge_id, sequence))
        })
        .collect();
    candidates.extend(topology_links_to_unmatched_tracks(&ctx));
    candidates.retain(|(edge_id, sequence)| {
        let ok = is_linkable(sequence);
        if !ok {
            trace!("dropping unordered sequence on {:?}", edge_id);
        }
        ok
    });

    let mut track_links: BTreeMap<TrackId, SwitchLinkingTrackLinks> = cleared_tracks
        .keys()
        .map(|id| (*id, SwitchLinkingTrackLinks::Delinked))
        .collect();
    for (edge_id, sequence) in pick_best_by_track(candidates, &by_edge) {
        if let Some(link) = track_link(&ctx, edge_id, &sequence) {
            track_links.insert(edge_id.track_id, link);
        }
    }
    debug!(
        "matched {} to {} of {} tracks",
        structure.type_name(),
        track_links.values().filter(|l| l.is_linked()).count(),
        track_links.len()
    );

    SuggestedSwitch {
        structure_id: structure.id(),
        switch_ref,
        joints: fit
            .joints
            .iter()
            .map(|j| SuggestedSwitchJoint {
                number: j.number,
                role: structure.role(j.number),
                location: j.location,
                accuracy: j.accuracy,
            })
            .collect(),
        track_links,
        detached_switches: detached,
    }
}
