//! Layout level entry points: finds, fits and links switches using the records of a
//! `LayoutSource`.

use crate::switch_linking::config::LinkingConfig;
use crate::switch_linking::coord_transform::CoordinateTransform;
use crate::switch_linking::error::{FittingFailure, LayoutSourceError};
use crate::switch_linking::fitting::{FitRequest, FittedSwitch, fit};
use crate::switch_linking::geometry::{BoundingBox, TrackGeometry};
use crate::switch_linking::grid_search::{PointAssociation, SamplingGrid, find_best_fits_for_grid};
use crate::switch_linking::layout_source::{LayoutSource, TrackRecord};
use crate::switch_linking::linking::{apply_suggested_switch, clear_links_from_tracks};
use crate::switch_linking::matching::{SuggestedSwitch, match_fitted_switch_to_tracks};
use crate::switch_linking::model::{
    LAYOUT_SRID, LayoutSwitch, LayoutSwitchJoint, LocationAccuracy, LocationTrack, PlanSwitchId,
    StructureId, SwitchId, SwitchRef, TrackId, TracksById,
};
use crate::switch_linking::structure::{RigidTransform, StructureJoint, SwitchStructure};
use geo::Coord;
use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// What to search for: an existing switch (keeping its structure) or a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuggestionTarget {
    Switch(SwitchId),
    Structure(StructureId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SuggestionWithTracks {
    pub suggested: SuggestedSwitch,
    /// The tracks named in `suggested.track_links`, as they were before linking
    pub relevant_tracks: TracksById,
}

/// Result of writing a suggestion into the layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkingResult {
    pub switch: LayoutSwitch,
    pub changed_tracks: Vec<TrackRecord>,
}

pub(crate) fn is_linked_to(
    track: &LocationTrack,
    geometry: &TrackGeometry,
    switch_id: SwitchId,
) -> bool {
    geometry.contains_switch(switch_id) || track.topology_switches().any(|s| s == switch_id)
}

/// Switches a track is linked to through its segments or topology, in first seen order.
pub fn switches_on_track(track: &LocationTrack, geometry: &TrackGeometry) -> Vec<SwitchId> {
    track
        .topology_start
        .iter()
        .map(|l| l.switch_id)
        .chain(geometry.switch_ids())
        .chain(track.topology_end.iter().map(|l| l.switch_id))
        .unique()
        .collect()
}

/// Box around the points where `tracks` currently attach to the switch: segment ends that
/// carry a joint and topology ends.
pub fn switch_bounds_from_tracks(tracks: &TracksById, switch_id: SwitchId) -> Option<BoundingBox> {
    let points = tracks.values().flat_map(|(track, geometry)| {
        let segment_points = geometry
            .segments()
            .iter()
            .filter(|s| s.switch_id() == Some(switch_id))
            .flat_map(|s| {
                let start = s.start_joint().map(|_| s.start_point());
                let end = s.end_joint().map(|_| s.end_point());
                start.into_iter().chain(end)
            })
            .collect::<Vec<_>>();
        let topology_start = track
            .topology_start
            .filter(|l| l.switch_id == switch_id)
            .and_then(|_| geometry.start_point());
        let topology_end = track
            .topology_end
            .filter(|l| l.switch_id == switch_id)
            .and_then(|_| geometry.end_point());
        segment_points
            .into_iter()
            .chain(topology_start)
            .chain(topology_end)
    });
    BoundingBox::from_points(points)
}

/// Matches `fit` against `relevant` tracks. Links to the switch are cleared first; of
/// the delinked tracks only those that were linked to the switch before are kept.
pub fn match_on_tracks(
    fit: &FittedSwitch,
    relevant: TracksById,
    switch_ref: SwitchRef,
    config: &LinkingConfig,
) -> SuggestionWithTracks {
    let own = switch_ref.id();
    let cleared = match own {
        Some(id) => clear_links_from_tracks(&relevant, id),
        None => relevant.clone(),
    };
    let mut suggested = match_fitted_switch_to_tracks(fit, &cleared, switch_ref, config);
    suggested.track_links.retain(|id, links| {
        links.is_linked()
            || own.is_some_and(|switch_id| {
                relevant
                    .get(id)
                    .is_some_and(|(track, geometry)| is_linked_to(track, geometry, switch_id))
            })
    });
    let relevant_tracks = relevant
        .into_iter()
        .filter(|(id, _)| suggested.track_links.contains_key(id))
        .collect();
    SuggestionWithTracks {
        suggested,
        relevant_tracks,
    }
}

pub struct SwitchLinkingService<'a, L, T> {
    layout: &'a L,
    transform: &'a T,
    config: &'a LinkingConfig,
}

impl<'a, L: LayoutSource, T: CoordinateTransform> SwitchLinkingService<'a, L, T> {
    pub fn new(layout: &'a L, transform: &'a T, config: &'a LinkingConfig) -> Self {
        Self {
            layout,
            transform,
            config,
        }
    }

    pub fn layout(&self) -> &'a L {
        self.layout
    }

    pub fn config(&self) -> &'a LinkingConfig {
        self.config
    }

    fn load(&self, ids: impl IntoIterator<Item = TrackId>) -> Result<TracksById, LayoutSourceError> {
        let ids: Vec<TrackId> = ids.into_iter().collect();
        self.layout.tracks_with_geometry(&ids)
    }

    fn target_structure(
        &self,
        target: SuggestionTarget,
    ) -> Result<(Arc<SwitchStructure>, SwitchRef), LayoutSourceError> {
        match target {
            SuggestionTarget::Switch(id) => {
                let switch = self.layout.layout_switch(id)?;
                Ok((
                    self.layout.switch_structure(switch.structure_id)?,
                    SwitchRef::Existing(id),
                ))
            }
            SuggestionTarget::Structure(id) => {
                Ok((self.layout.switch_structure(id)?, SwitchRef::Unsaved))
            }
        }
    }

    pub fn originally_linked_tracks(
        &self,
        switch_id: SwitchId,
    ) -> Result<TracksById, LayoutSourceError> {
        self.load(self.layout.tracks_linked_to_switch(switch_id))
    }

    /// Tracks a fit may touch: the ones linked before, the ones near where they attach
    /// to the switch, and the ones near the fitted joints.
    pub fn relevant_tracks_for_fit(
        &self,
        fit: &FittedSwitch,
        switch_id: Option<SwitchId>,
        originally_linked: &TracksById,
    ) -> Result<TracksById, LayoutSourceError> {
        let mut ids: BTreeSet<TrackId> = BTreeSet::new();
        if let Some(bounds) = switch_id.and_then(|id| switch_bounds_from_tracks(originally_linked, id)) {
            ids.extend(self.layout.tracks_near(&bounds));
        }
        if let Some(bounds) = BoundingBox::from_points(fit.joints.iter().map(|j| j.location)) {
            ids.extend(
                self.layout
                    .tracks_near(&bounds.expanded(self.config.track_search_area)),
            );
        }
        let mut tracks = self.load(ids.into_iter().filter(|id| !originally_linked.contains_key(id)))?;
        tracks.extend(originally_linked.clone());
        Ok(tracks)
    }

    /// Best suggestion per grid point, each with the tracks it links or delinks.
    pub fn suggest_switches_at_grid(
        &self,
        grid: &SamplingGrid,
        target: SuggestionTarget,
    ) -> Result<PointAssociation<SuggestionWithTracks>, LayoutSourceError> {
        let (structure, switch_ref) = self.target_structure(target)?;
        let originally_linked = match switch_ref.id() {
            Some(id) => self.originally_linked_tracks(id)?,
            None => TracksById::new(),
        };
        let nearby = self.load(
            self.layout
                .tracks_near(&grid.bounds().expanded(self.config.track_search_area)),
        )?;
        let track_refs: Vec<(TrackId, &TrackGeometry)> =
            nearby.iter().map(|(id, (_, geometry))| (*id, geometry)).collect();
        let previously_linked: Vec<TrackId> = originally_linked.keys().copied().collect();
        debug!(
            "suggesting {} at {} points over {} tracks",
            switch_ref,
            grid.points().len(),
            track_refs.len()
        );

        let fits = find_best_fits_for_grid(
            grid,
            &structure,
            &track_refs,
            &previously_linked,
            self.config,
        );
        fits.try_map(|_, fit| {
            let relevant = self.relevant_tracks_for_fit(&fit, switch_ref.id(), &originally_linked)?;
            Ok(Some(match_on_tracks(&fit, relevant, switch_ref, self.config)))
        })
    }

    pub fn suggest_switch_at_point(
        &self,
        location: Coord<f64>,
        target: SuggestionTarget,
    ) -> Result<Option<SuggestedSwitch>, LayoutSourceError> {
        Ok(self
            .suggest_switches_at_grid(&SamplingGrid::single(location), target)?
            .first_found()
            .map(|s| s.suggested))
    }

    /// Places a plan switch by its designed joints and fits it onto nearby tracks.
    pub fn fit_plan_switch(&self, id: PlanSwitchId) -> Result<FittedSwitch, FittingFailure> {
        let plan = self.layout.plan_switch(id)?;
        if plan.joints.len() < 2 {
            return Err(FittingFailure::LessThanTwoJoints);
        }
        let structure_id = plan.structure_id.ok_or(FittingFailure::NoSwitchStructureId)?;
        let structure = self.layout.switch_structure(structure_id)?;
        if plan.linked_tracks.is_empty() {
            return Err(FittingFailure::RelatedTracksNotLinked);
        }
        let srid = plan.srid.ok_or(FittingFailure::NoSridOnPlan)?;

        let measured = plan
            .joints
            .iter()
            .map(|joint| {
                Ok(StructureJoint {
                    number: joint.number,
                    location: self.transform.transform(joint.location, srid, LAYOUT_SRID)?,
                })
            })
            .collect::<Result<Vec<_>, FittingFailure>>()?;
        let transform =
            RigidTransform::from_joints(&measured, &structure).ok_or(FittingFailure::InvalidJoints)?;
        let joints = structure.place_alignment_joints(&transform);
        let accuracy = plan
            .measurement_method
            .map(|m| m.location_accuracy())
            .unwrap_or(LocationAccuracy::DigitizedAerialImage);

        let mut ids: BTreeSet<TrackId> = plan.linked_tracks.iter().copied().collect();
        if let Some(bounds) = BoundingBox::from_points(joints.iter().map(|j| j.location)) {
            ids.extend(
                self.layout
                    .tracks_near(&bounds.scaled(self.config.plan_switch_search_factor)),
            );
        }
        let tracks = self.load(ids)?;
        let track_refs: Vec<(TrackId, &TrackGeometry)> =
            tracks.iter().map(|(id, (_, geometry))| (*id, geometry)).collect();
        debug!("fitting plan switch {} ({}) over {} tracks", id, plan.name, track_refs.len());

        fit(
            &FitRequest::ByJoints {
                joints,
                accuracy: Some(accuracy),
            },
            &structure,
            &track_refs,
            &[],
            self.config,
        )
        .ok_or(FittingFailure::InvalidJoints)
    }

    pub fn suggest_plan_switch(&self, id: PlanSwitchId) -> Result<SuggestedSwitch, FittingFailure> {
        let fit = self.fit_plan_switch(id)?;
        let relevant = self.relevant_tracks_for_fit(&fit, None, &TracksById::new())?;
        Ok(match_on_tracks(&fit, relevant, SwitchRef::Unsaved, self.config).suggested)
    }

    /// The switch record as it reads after linking `suggested` as `switch_id`. A switch
    /// that doesn't exist yet is named after its structure.
    pub fn linked_switch(
        &self,
        suggested: &SuggestedSwitch,
        switch_id: SwitchId,
    ) -> Result<LayoutSwitch, LayoutSourceError> {
        let joints = suggested
            .joints
            .iter()
            .map(|j| LayoutSwitchJoint {
                number: j.number,
                location: j.location,
                accuracy: j.accuracy,
            })
            .collect();
        match self.layout.layout_switch(switch_id) {
            Ok(existing) => Ok(LayoutSwitch {
                structure_id: suggested.structure_id,
                joints,
                ..existing
            }),
            Err(LayoutSourceError::SwitchNotFound(_)) => {
                let structure = self.layout.switch_structure(suggested.structure_id)?;
                Ok(LayoutSwitch {
                    id: switch_id,
                    name: structure.type_name().to_string(),
                    structure_id: suggested.structure_id,
                    joints,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Applies `suggested` as links of `switch_id`. Nothing is written back; the caller
    /// stores the returned switch and tracks.
    pub fn link_switch(
        &self,
        suggested: &SuggestedSwitch,
        switch_id: SwitchId,
    ) -> Result<LinkingResult, LayoutSourceError> {
        let mut ids: BTreeSet<TrackId> = suggested.track_links.keys().copied().collect();
        ids.extend(self.layout.tracks_linked_to_switch(switch_id));
        let tracks = self.load(ids)?;
        let changed = apply_suggested_switch(suggested, switch_id, &tracks, self.config);
        let switch = self.linked_switch(suggested, switch_id)?;
        info!(
            "linked switch {} ({}) changing {} tracks",
            switch_id,
            switch.name,
            changed.len()
        );
        Ok(LinkingResult {
            switch,
            changed_tracks: changed.into_iter().map(TrackRecord::from).collect(),
        })
    }

    pub fn presentation_joint_location(
        &self,
        switch_id: SwitchId,
    ) -> Result<Coord<f64>, LayoutSourceError> {
        let switch = self.layout.layout_switch(switch_id)?;
        let structure = self.layout.switch_structure(switch.structure_id)?;
        let number = structure.presentation_joint();
        switch
            .joint(number)
            .map(|j| j.location)
            .ok_or(LayoutSourceError::MissingJoint {
                switch: switch_id,
                joint: number,
            })
    }

    /// A fresh suggestion for every switch the track is linked to, searched at the
    /// switch's presentation joint.
    pub fn track_switch_suggestions(
        &self,
        track_id: TrackId,
    ) -> Result<Vec<(SwitchId, Option<SuggestedSwitch>)>, LayoutSourceError> {
        let (track, geometry) = self.layout.track_with_geometry(track_id)?;
        switches_on_track(&track, &geometry)
            .into_iter()
            .map(|switch_id| {
                let location = self.presentation_joint_location(switch_id)?;
                let suggestion =
                    self.suggest_switch_at_point(location, SuggestionTarget::Switch(switch_id))?;
                Ok((switch_id, suggestion))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::switch_linking::coord_transform::TangentPlaneTransform;
    use crate::switch_linking::layout_source::{InMemoryLayout, PlanSwitch, PlanSwitchJoint};
    use crate::switch_linking::matching::SwitchLinkingTrackLinks;
    use crate::switch_linking::geometry::Segment;
    use crate::switch_linking::model::{
        JointNumber, MeasurementMethod, SegmentSwitchLink, Srid, TopologyLink,
    };
    use crate::switch_linking::test_data::{BRANCH_TRACK, THROUGH_TRACK, yv60_300_1_9_o, yv_layout};
    use geo::coord;

    fn plan(id: i64, joints: &[(u32, f64, f64)]) -> PlanSwitch {
        PlanSwitch {
            id: PlanSwitchId(id),
            name: format!("plan {}", id),
            structure_id: Some(StructureId(1)),
            joints: joints
                .iter()
                .map(|(n, x, y)| PlanSwitchJoint {
                    number: JointNumber(*n),
                    location: coord! { x: *x, y: *y },
                })
                .collect(),
            srid: Some(LAYOUT_SRID),
            measurement_method: Some(MeasurementMethod::TrackInspection),
            linked_tracks: vec![THROUGH_TRACK],
        }
    }

    fn layout(plans: Vec<PlanSwitch>) -> InMemoryLayout {
        let structure = yv60_300_1_9_o();
        let tracks = yv_layout(&structure)
            .tracks
            .into_iter()
            .map(|(id, geometry)| (LocationTrack::new(id, format!("track {}", id.0)), geometry))
            .collect();
        InMemoryLayout::new(vec![structure], tracks, Vec::new(), plans)
    }

    #[test]
    fn test_suggests_new_switch_at_point() {
        let layout = layout(Vec::new());
        let transform = TangentPlaneTransform::default();
        let config = LinkingConfig::default();
        let service = SwitchLinkingService::new(&layout, &transform, &config);

        let suggested = service
            .suggest_switch_at_point(coord! { x: 0.5, y: 0.2 }, SuggestionTarget::Structure(StructureId(1)))
            .expect("layout lookups")
            .expect("suggestion");
        assert_eq!(suggested.switch_ref, SwitchRef::Unsaved);
        assert_eq!(
            suggested.linked_tracks().collect::<Vec<_>>(),
            vec![THROUGH_TRACK, BRANCH_TRACK]
        );
        assert!(matches!(
            suggested.track_links.get(&BRANCH_TRACK),
            Some(SwitchLinkingTrackLinks::Segments(_))
        ));
    }

    #[test]
    fn test_unknown_target_is_an_error() {
        let layout = layout(Vec::new());
        let transform = TangentPlaneTransform::default();
        let config = LinkingConfig::default();
        let service = SwitchLinkingService::new(&layout, &transform, &config);
        assert_eq!(
            service
                .suggest_switch_at_point(coord! { x: 0.0, y: 0.0 }, SuggestionTarget::Switch(SwitchId(9)))
                .err(),
            Some(LayoutSourceError::SwitchNotFound(SwitchId(9)))
        );
    }

    #[test]
    fn test_link_new_switch_names_it_after_structure() {
        let layout = layout(Vec::new());
        let transform = TangentPlaneTransform::default();
        let config = LinkingConfig::default();
        let service = SwitchLinkingService::new(&layout, &transform, &config);
        let suggested = service
            .suggest_switch_at_point(coord! { x: 0.5, y: 0.2 }, SuggestionTarget::Structure(StructureId(1)))
            .expect("layout lookups")
            .expect("suggestion");

        let result = service.link_switch(&suggested, SwitchId(10)).expect("linked");
        assert_eq!(result.switch.name, "YV60-300-1:9-O");
        assert_eq!(result.switch.joints.len(), suggested.joints.len());
        let changed: Vec<TrackId> = result.changed_tracks.iter().map(|t| t.track.id).collect();
        assert_eq!(changed, vec![THROUGH_TRACK, BRANCH_TRACK]);
        assert!(
            result
                .changed_tracks
                .iter()
                .all(|t| t.geometry.contains_switch(SwitchId(10)))
        );
    }

    #[test]
    fn test_plan_switch_preconditions() {
        let mut no_structure = plan(2, &[(1, 0.0, 0.0), (2, 34.43, 0.0)]);
        no_structure.structure_id = None;
        let mut no_tracks = plan(3, &[(1, 0.0, 0.0), (2, 34.43, 0.0)]);
        no_tracks.linked_tracks.clear();
        let mut no_srid = plan(4, &[(1, 0.0, 0.0), (2, 34.43, 0.0)]);
        no_srid.srid = None;
        let layout = layout(vec![
            plan(1, &[(1, 0.0, 0.0)]),
            no_structure,
            no_tracks,
            no_srid,
            plan(5, &[(1, 0.0, 0.0), (2, 30.0, 0.0)]),
            {
                let mut unknown_srid = plan(6, &[(1, 0.0, 0.0), (2, 34.43, 0.0)]);
                unknown_srid.srid = Some(Srid(2393));
                unknown_srid
            },
        ]);
        let transform = TangentPlaneTransform::default();
        let config = LinkingConfig::default();
        let service = SwitchLinkingService::new(&layout, &transform, &config);

        let failure = |id| service.fit_plan_switch(PlanSwitchId(id)).err();
        assert_eq!(failure(1), Some(FittingFailure::LessThanTwoJoints));
        assert_eq!(failure(2), Some(FittingFailure::NoSwitchStructureId));
        assert_eq!(failure(3), Some(FittingFailure::RelatedTracksNotLinked));
        assert_eq!(failure(4), Some(FittingFailure::NoSridOnPlan));
        assert_eq!(failure(5), Some(FittingFailure::InvalidJoints));
        assert!(matches!(failure(6), Some(FittingFailure::Transform(_))));
        assert!(matches!(failure(99), Some(FittingFailure::Source(_))));
    }

    #[test]
    fn test_plan_switch_fits_with_plan_accuracy() {
        let layout = layout(vec![plan(1, &[(1, 0.0, 0.0), (2, 34.43, 0.0)])]);
        let transform = TangentPlaneTransform::default();
        let config = LinkingConfig::default();
        let service = SwitchLinkingService::new(&layout, &transform, &config);

        let fit = service.fit_plan_switch(PlanSwitchId(1)).expect("fit");
        let j1 = fit.joint(JointNumber(1)).expect("joint 1");
        assert_eq!(j1.accuracy, Some(LocationAccuracy::MeasuredGeodetically));
        // the branch track is found through the search box, not the plan's track list
        assert!(j1.matches.iter().any(|m| m.track_id == BRANCH_TRACK));

        let suggested = service.suggest_plan_switch(PlanSwitchId(1)).expect("suggestion");
        assert_eq!(suggested.switch_ref, SwitchRef::Unsaved);
        assert!(suggested.linked_tracks().any(|t| t == THROUGH_TRACK));
    }

    #[test]
    fn test_switch_bounds_and_switches_on_track() {
        let switch = SwitchId(3);
        let mut track = LocationTrack::new(TrackId(1), "a");
        track.topology_end = Some(TopologyLink {
            switch_id: SwitchId(4),
            joint: JointNumber(1),
        });
        let geometry = TrackGeometry::new(vec![
            Segment::new(
                vec![coord! { x: 0.0, y: 0.0 }, coord! { x: 5.0, y: 0.0 }],
                0.0,
                Some(SegmentSwitchLink {
                    switch_id: switch,
                    start_joint: Some(JointNumber(1)),
                    end_joint: None,
                }),
            ),
            Segment::new(
                vec![coord! { x: 5.0, y: 0.0 }, coord! { x: 9.0, y: 1.0 }],
                5.0,
                Some(SegmentSwitchLink {
                    switch_id: switch,
                    start_joint: None,
                    end_joint: Some(JointNumber(2)),
                }),
            ),
        ]);
        assert_eq!(switches_on_track(&track, &geometry), vec![switch, SwitchId(4)]);

        let tracks: TracksById = [(TrackId(1), (track, geometry))].into_iter().collect();
        let bounds = switch_bounds_from_tracks(&tracks, switch).expect("bounds");
        assert_eq!(bounds.min(), coord! { x: 0.0, y: 0.0 });
        assert_eq!(bounds.max(), coord! { x: 9.0, y: 1.0 });
        assert!(switch_bounds_from_tracks(&tracks, SwitchId(8)).is_none());
    }
}
