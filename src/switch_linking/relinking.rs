//! Re-establishes switch links after a track's geometry changed, and previews what
//! doing so would produce.

use ahash::AHashSet;
use crate::switch_linking::coord_transform::CoordinateTransform;
use crate::switch_linking::error::LayoutSourceError;
use crate::switch_linking::fitting::{FitRequest, fit};
use crate::switch_linking::geometry::{BoundingBox, Segment, TrackGeometry, is_same_point};
use crate::switch_linking::layout_source::LayoutSource;
use crate::switch_linking::linking::apply_suggested_switch;
use crate::switch_linking::matching::SuggestedSwitch;
use crate::switch_linking::model::{
    JointNumber, LayoutSwitch, LocationTrack, SwitchId, SwitchRef, TrackId, TracksById,
};
use crate::switch_linking::service::{
    SuggestionWithTracks, SwitchLinkingService, is_linked_to, match_on_tracks, switches_on_track,
};
use crate::switch_linking::structure::SwitchStructure;
use itertools::Itertools;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Max distance between a linked segment end and the switch joint it names
pub const JOINT_LOCATION_DELTA: f64 = 0.5;
/// Consecutive linked segments closer than this are continuous
pub const LAYOUT_COORDINATE_DELTA: f64 = 0.001;

const SWITCH_LOCATION_TRACK: &str = "validation.layout.switch.location-track";
const SWITCH_TRACK_LINKAGE: &str = "validation.layout.switch.track-linkage";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelinkingOutcome {
    Relinked,
    NotAutomaticallyLinkable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSwitchRelinkingResult {
    pub switch_id: SwitchId,
    pub outcome: RelinkingOutcome,
}

/// Everything relinking one track changed. Nothing is stored by the service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackRelinking {
    pub results: Vec<TrackSwitchRelinkingResult>,
    pub switches: Vec<LayoutSwitch>,
    pub changed_tracks: TracksById,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LayoutValidationIssueType {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutValidationIssue {
    pub issue_type: LayoutValidationIssueType,
    pub localization_key: String,
    pub params: BTreeMap<String, String>,
}

impl LayoutValidationIssue {
    fn new(issue_type: LayoutValidationIssueType, key: String, params: &[(&str, String)]) -> Self {
        Self {
            issue_type,
            localization_key: key,
            params: params
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchRelinkingValidationResult {
    pub switch_id: SwitchId,
    pub suggestion: Option<SuggestedSwitch>,
    pub issues: Vec<LayoutValidationIssue>,
}

struct RelinkedSwitch {
    suggestion: SuggestionWithTracks,
    switch: LayoutSwitch,
    changed: Vec<(LocationTrack, TrackGeometry)>,
}

fn with_changes(tracks: TracksById, changed: &TracksById) -> TracksById {
    tracks
        .into_iter()
        .map(|(id, track)| {
            let track = changed.get(&id).cloned().unwrap_or(track);
            (id, track)
        })
        .collect()
}

impl<L: LayoutSource, T: CoordinateTransform> SwitchLinkingService<'_, L, T> {
    /// Switches linked to the track, then switches with a joint within topology distance
    /// of its geometry.
    pub fn switches_on_track_and_nearby(
        &self,
        track: &LocationTrack,
        geometry: &TrackGeometry,
    ) -> Result<Vec<SwitchId>, LayoutSourceError> {
        let mut ids = switches_on_track(track, geometry);
        let Some(bbox) = geometry.bounding_box() else {
            return Ok(ids);
        };
        let distance = self.config().topology_distance;
        for switch_id in self.layout().switches_near(&bbox.expanded(distance)) {
            if ids.contains(&switch_id) {
                continue;
            }
            let switch = self.layout().layout_switch(switch_id)?;
            let touches = switch.joints.iter().any(|joint| {
                geometry
                    .closest_point(joint.location)
                    .is_some_and(|p| p.distance < distance)
            });
            if touches {
                ids.push(switch_id);
            }
        }
        Ok(ids)
    }

    /// Refits the switch at its presentation joint over the layout with `changed` tracks
    /// substituted, and links it. `None` when no fit links any track.
    fn relink_switch(
        &self,
        switch_id: SwitchId,
        changed: &TracksById,
    ) -> Result<Option<RelinkedSwitch>, LayoutSourceError> {
        let switch = self.layout().layout_switch(switch_id)?;
        let structure = self.layout().switch_structure(switch.structure_id)?;
        let location = self.presentation_joint_location(switch_id)?;
        let config = self.config();

        let mut originally_linked =
            with_changes(self.originally_linked_tracks(switch_id)?, changed);
        originally_linked.extend(
            changed
                .iter()
                .filter(|(_, (track, geometry))| is_linked_to(track, geometry, switch_id))
                .map(|(id, track)| (*id, track.clone())),
        );
        let nearby_ids = self
            .layout()
            .tracks_near(&BoundingBox::centered_at(location, config.track_search_area));
        let nearby = with_changes(self.layout().tracks_with_geometry(&nearby_ids)?, changed);
        let track_refs: Vec<(TrackId, &TrackGeometry)> =
            nearby.iter().map(|(id, (_, geometry))| (*id, geometry)).collect();
        let previously_linked: Vec<TrackId> = originally_linked.keys().copied().collect();

        let Some(fitted) = fit(
            &FitRequest::ByPoint { location },
            &structure,
            &track_refs,
            &previously_linked,
            config,
        ) else {
            debug!("no fit for switch {} at {:?}", switch.name, location);
            return Ok(None);
        };
        let relevant = with_changes(
            self.relevant_tracks_for_fit(&fitted, Some(switch_id), &originally_linked)?,
            changed,
        );
        let suggestion = match_on_tracks(&fitted, relevant, SwitchRef::Existing(switch_id), config);
        if suggestion.suggested.linked_tracks().next().is_none() {
            debug!("fit for switch {} links no tracks", switch.name);
            return Ok(None);
        }
        let changed_tracks = apply_suggested_switch(
            &suggestion.suggested,
            switch_id,
            &suggestion.relevant_tracks,
            config,
        );
        let switch = self.linked_switch(&suggestion.suggested, switch_id)?;
        Ok(Some(RelinkedSwitch {
            suggestion,
            switch,
            changed: changed_tracks,
        }))
    }

    /// Relinks every switch on or next to the track in turn. Tracks changed by one switch
    /// are seen by the next.
    pub fn relink_track(&self, track_id: TrackId) -> Result<TrackRelinking, LayoutSourceError> {
        let (track, geometry) = self.layout().track_with_geometry(track_id)?;
        let mut relinking = TrackRelinking::default();
        for switch_id in self.switches_on_track_and_nearby(&track, &geometry)? {
            let outcome = match self.relink_switch(switch_id, &relinking.changed_tracks)? {
                Some(relinked) => {
                    relinking.changed_tracks.extend(
                        relinked
                            .changed
                            .into_iter()
                            .map(|(track, geometry)| (track.id, (track, geometry))),
                    );
                    relinking.switches.push(relinked.switch);
                    RelinkingOutcome::Relinked
                }
                None => {
                    warn!("switch {} on track {} could not be relinked", switch_id, track.name);
                    RelinkingOutcome::NotAutomaticallyLinkable
                }
            };
            relinking.results.push(TrackSwitchRelinkingResult { switch_id, outcome });
        }
        info!(
            "relinked {} switches of track {}, {} tracks changed",
            relinking.results.len(),
            track.name,
            relinking.changed_tracks.len()
        );
        Ok(relinking)
    }

    /// What relinking the track would do to each of its switches, without threading
    /// changes from one switch to the next.
    pub fn validate_relinking_track(
        &self,
        track_id: TrackId,
    ) -> Result<Vec<SwitchRelinkingValidationResult>, LayoutSourceError> {
        let (track, geometry) = self.layout().track_with_geometry(track_id)?;
        self.switches_on_track_and_nearby(&track, &geometry)?
            .into_iter()
            .map(|switch_id| self.validate_switch_relinking(switch_id, &track))
            .collect()
    }

    fn validate_switch_relinking(
        &self,
        switch_id: SwitchId,
        source: &LocationTrack,
    ) -> Result<SwitchRelinkingValidationResult, LayoutSourceError> {
        let current = self.layout().layout_switch(switch_id)?;
        let Some(relinked) = self.relink_switch(switch_id, &TracksById::new())? else {
            return Ok(SwitchRelinkingValidationResult {
                switch_id,
                suggestion: None,
                issues: vec![LayoutValidationIssue::new(
                    LayoutValidationIssueType::Error,
                    format!("{}.relinking-failed", SWITCH_TRACK_LINKAGE),
                    &[("switch", current.name)],
                )],
            });
        };
        let structure = self.layout().switch_structure(relinked.switch.structure_id)?;

        let mut after = relinked.suggestion.relevant_tracks.clone();
        after.extend(
            relinked
                .changed
                .into_iter()
                .map(|(track, geometry)| (track.id, (track, geometry))),
        );
        let linked_after: Vec<(LocationTrack, TrackGeometry)> = after
            .into_values()
            .filter(|(track, geometry)| is_linked_to(track, geometry, switch_id))
            .collect();
        let mut issues = validate_switch_structure_links(&relinked.switch, &structure, &linked_after)
            .into_iter()
            .map(|issue| LayoutValidationIssue {
                issue_type: LayoutValidationIssueType::Warning,
                ..issue
            })
            .collect::<Vec<_>>();

        let suggested = relinked.suggestion.suggested;
        let still_linked: AHashSet<TrackId> = suggested.linked_tracks().collect();
        let loses_links = self
            .layout()
            .tracks_linked_to_switch(switch_id)
            .iter()
            .any(|id| !still_linked.contains(id));
        if loses_links {
            issues.push(LayoutValidationIssue::new(
                LayoutValidationIssueType::Error,
                "validation.layout.split.track-links-missing-after-relinking".to_string(),
                &[
                    ("switchName", current.name.clone()),
                    ("sourceName", source.name.clone()),
                ],
            ));
        }
        Ok(SwitchRelinkingValidationResult {
            switch_id,
            suggestion: Some(suggested),
            issues,
        })
    }
}

/// Joint sequences a linked track may carry: every alignment, plus its halves when the
/// presentation joint sits in its middle.
fn structure_joint_groups(structure: &SwitchStructure) -> Vec<Vec<JointNumber>> {
    let presentation = structure.presentation_joint();
    structure
        .alignments()
        .iter()
        .flat_map(|alignment| {
            let joints = &alignment.joints;
            let split = joints
                .iter()
                .position(|j| *j == presentation)
                .filter(|i| *i != 0 && *i != joints.len() - 1);
            let halves = split
                .map(|i| vec![joints[..=i].to_vec(), joints[i..].to_vec()])
                .unwrap_or_default();
            std::iter::once(joints.clone()).chain(halves)
        })
        .collect()
}

fn joint_group_matches(track_joints: &[JointNumber], structure_joints: &[JointNumber]) -> bool {
    if !track_joints.iter().all(|j| structure_joints.contains(j)) {
        return false;
    }
    match (track_joints.first(), track_joints.last()) {
        (Some(first), Some(last)) if track_joints.len() > 1 => {
            let (start, end) = (structure_joints[0], structure_joints[structure_joints.len() - 1]);
            (*first, *last) == (start, end) || (*first, *last) == (end, start)
        }
        _ => true,
    }
}

fn segment_joints(segments: &[&Segment]) -> Vec<JointNumber> {
    segments
        .iter()
        .flat_map(|s| s.start_joint().into_iter().chain(s.end_joint()))
        .dedup()
        .collect()
}

fn segments_continuous(segments: &[&Segment]) -> bool {
    segments
        .iter()
        .tuple_windows()
        .all(|(a, b)| is_same_point(a.end_point(), b.start_point(), LAYOUT_COORDINATE_DELTA))
}

fn joint_at(switch: &LayoutSwitch, number: JointNumber, point: geo::Coord<f64>) -> bool {
    switch
        .joint(number)
        .is_some_and(|j| is_same_point(j.location, point, JOINT_LOCATION_DELTA))
}

fn segment_joints_agree(switch: &LayoutSwitch, segment: &Segment) -> bool {
    segment
        .start_joint()
        .is_none_or(|n| joint_at(switch, n, segment.start_point()))
        && segment
            .end_joint()
            .is_none_or(|n| joint_at(switch, n, segment.end_point()))
}

fn topology_joints_agree(switch: &LayoutSwitch, track: &LocationTrack, geometry: &TrackGeometry) -> bool {
    let start = track
        .topology_start
        .filter(|l| l.switch_id == switch.id)
        .map(|l| (l.joint, geometry.start_point()));
    let end = track
        .topology_end
        .filter(|l| l.switch_id == switch.id)
        .map(|l| (l.joint, geometry.end_point()));
    start
        .into_iter()
        .chain(end)
        .all(|(joint, point)| point.is_some_and(|p| joint_at(switch, joint, p)))
}

fn has_joint_link(geometry: &TrackGeometry, switch_id: SwitchId, joint: JointNumber) -> bool {
    geometry.segments().iter().any(|s| {
        s.switch_id() == Some(switch_id)
            && (s.start_joint() == Some(joint) || s.end_joint() == Some(joint))
    })
}

fn track_names_issue(key: &str, tracks: &[&LocationTrack]) -> Option<LayoutValidationIssue> {
    (!tracks.is_empty()).then(|| {
        LayoutValidationIssue::new(
            LayoutValidationIssueType::Error,
            format!("{}.{}", SWITCH_LOCATION_TRACK, key),
            &[(
                "locationTracks",
                tracks.iter().map(|t| t.name.as_str()).unique().join(", "),
            )],
        )
    })
}

/// Checks the links `tracks` carry to `switch` against its structure: linked segments
/// must be continuous, sit on the switch joints and follow a structure alignment, and
/// every alignment must be covered by some track.
pub fn validate_switch_structure_links(
    switch: &LayoutSwitch,
    structure: &SwitchStructure,
    tracks: &[(LocationTrack, TrackGeometry)],
) -> Vec<LayoutValidationIssue> {
    let segment_groups: Vec<(&LocationTrack, Vec<&Segment>)> = tracks
        .iter()
        .map(|(track, geometry)| {
            let linked = geometry
                .segments()
                .iter()
                .filter(|s| s.switch_id() == Some(switch.id))
                .collect::<Vec<_>>();
            (track, linked)
        })
        .filter(|(_, linked)| !linked.is_empty())
        .collect();
    let groups = structure_joint_groups(structure);

    let discontinuous: Vec<&LocationTrack> = segment_groups
        .iter()
        .filter(|(_, linked)| !segments_continuous(linked))
        .map(|(track, _)| *track)
        .collect();
    let mismatched: Vec<&LocationTrack> = segment_groups
        .iter()
        .filter(|(_, linked)| !linked.iter().all(|s| segment_joints_agree(switch, s)))
        .map(|(track, _)| *track)
        .chain(
            tracks
                .iter()
                .filter(|(track, geometry)| !topology_joints_agree(switch, track, geometry))
                .map(|(track, _)| track),
        )
        .collect();
    let wrong_sequence: Vec<&LocationTrack> = segment_groups
        .iter()
        .filter(|(_, linked)| {
            let joints = segment_joints(linked);
            !groups.iter().any(|group| joint_group_matches(&joints, group))
        })
        .map(|(track, _)| *track)
        .collect();

    let unconnected: Vec<String> = structure
        .alignments()
        .iter()
        .filter(|alignment| {
            !tracks.iter().any(|(_, geometry)| {
                has_joint_link(geometry, switch.id, alignment.first())
                    && has_joint_link(geometry, switch.id, alignment.last())
            })
        })
        .map(|alignment| alignment.joints.iter().map(|j| j.0).join("-"))
        .collect();
    let unconnected_issue = (!unconnected.is_empty()).then(|| {
        LayoutValidationIssue::new(
            LayoutValidationIssueType::Warning,
            format!("{}.switch-alignment-not-connected", SWITCH_TRACK_LINKAGE),
            &[
                ("switch", switch.name.clone()),
                ("alignments", unconnected.join(", ")),
            ],
        )
    });

    [
        track_names_issue("not-continuous", &discontinuous),
        track_names_issue("joint-location-mismatch", &mismatched).map(|issue| LayoutValidationIssue {
            issue_type: LayoutValidationIssueType::Warning,
            ..issue
        }),
        track_names_issue("wrong-joint-sequence", &wrong_sequence),
        unconnected_issue,
    ]
    .into_iter()
    .flatten()
    .collect()
}
