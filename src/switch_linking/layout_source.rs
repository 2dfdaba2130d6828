//! Narrow interfaces to the layout record store, plus an in-memory implementation backed
//! by R-trees.

use crate::switch_linking::error::LayoutSourceError;
use crate::switch_linking::geometry::{BoundingBox, TrackGeometry};
use crate::switch_linking::model::{
    JointNumber, LayoutSwitch, LocationTrack, MeasurementMethod, PlanSwitchId, Srid,
    StructureId, SwitchId, TrackId, TracksById,
};
use crate::switch_linking::structure::SwitchStructure;
use geo::Coord;
use log::debug;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{AABB, RTree};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub trait StructureCatalog {
    fn switch_structure(&self, id: StructureId) -> Result<Arc<SwitchStructure>, LayoutSourceError>;
}

/// Track records of one layout context (draft or official).
pub trait TrackGeometrySource {
    fn track_with_geometry(
        &self,
        id: TrackId,
    ) -> Result<(LocationTrack, TrackGeometry), LayoutSourceError>;

    /// Tracks with geometry inside or crossing `bbox`, in id order
    fn tracks_near(&self, bbox: &BoundingBox) -> Vec<TrackId>;

    /// Tracks with a segment or topology link to the switch, in id order
    fn tracks_linked_to_switch(&self, switch_id: SwitchId) -> Vec<TrackId>;

    fn tracks_with_geometry(&self, ids: &[TrackId]) -> Result<TracksById, LayoutSourceError> {
        ids.iter()
            .map(|id| self.track_with_geometry(*id).map(|t| (*id, t)))
            .collect()
    }
}

pub trait SwitchSource {
    fn layout_switch(&self, id: SwitchId) -> Result<LayoutSwitch, LayoutSourceError>;

    /// Switches with a joint inside `bbox`, in id order
    fn switches_near(&self, bbox: &BoundingBox) -> Vec<SwitchId>;
}

pub trait PlanSwitchSource {
    fn plan_switch(&self, id: PlanSwitchId) -> Result<PlanSwitch, LayoutSourceError>;
}

/// Everything the linking service reads from the layout.
pub trait LayoutSource: StructureCatalog + TrackGeometrySource + SwitchSource + PlanSwitchSource {}

impl<T> LayoutSource for T where
    T: StructureCatalog + TrackGeometrySource + SwitchSource + PlanSwitchSource
{
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanSwitchJoint {
    pub number: JointNumber,
    /// In the plan's own coordinate system
    pub location: Coord<f64>,
}

/// A switch as designed in an imported plan, with the layout tracks that were linked to
/// the plan geometry it sits on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSwitch {
    pub id: PlanSwitchId,
    pub name: String,
    #[serde(default)]
    pub structure_id: Option<StructureId>,
    pub joints: Vec<PlanSwitchJoint>,
    #[serde(default)]
    pub srid: Option<Srid>,
    #[serde(default)]
    pub measurement_method: Option<MeasurementMethod>,
    #[serde(default)]
    pub linked_tracks: Vec<TrackId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    #[serde(flatten)]
    pub track: LocationTrack,
    pub geometry: TrackGeometry,
}

impl From<(LocationTrack, TrackGeometry)> for TrackRecord {
    fn from((track, geometry): (LocationTrack, TrackGeometry)) -> Self {
        Self { track, geometry }
    }
}

/// Self-contained layout as read by the command line tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutScenario {
    #[serde(default)]
    pub structures: Vec<SwitchStructure>,
    #[serde(default)]
    pub tracks: Vec<TrackRecord>,
    #[serde(default)]
    pub switches: Vec<LayoutSwitch>,
    #[serde(default)]
    pub plan_switches: Vec<PlanSwitch>,
}

type TrackIndex = RTree<GeomWithData<Rectangle<[f64; 2]>, TrackId>>;
type SwitchIndex = RTree<GeomWithData<[f64; 2], SwitchId>>;

fn to_envelope(bbox: &BoundingBox) -> AABB<[f64; 2]> {
    AABB::from_corners([bbox.min().x, bbox.min().y], [bbox.max().x, bbox.max().y])
}

/// One rectangle per segment, so long tracks don't make every query hit them.
fn build_track_index(tracks: &TracksById) -> TrackIndex {
    let items: Vec<_> = tracks
        .iter()
        .flat_map(|(id, (_, geometry))| {
            geometry.segments().iter().map(move |segment| {
                let bbox = segment.bounding_box();
                GeomWithData::new(
                    Rectangle::from_corners([bbox.min().x, bbox.min().y], [bbox.max().x, bbox.max().y]),
                    *id,
                )
            })
        })
        .collect();
    RTree::bulk_load(items)
}

fn build_switch_index(switches: &BTreeMap<SwitchId, LayoutSwitch>) -> SwitchIndex {
    let items: Vec<_> = switches
        .values()
        .flat_map(|switch| {
            switch
                .joints
                .iter()
                .map(|joint| GeomWithData::new([joint.location.x, joint.location.y], switch.id))
        })
        .collect();
    RTree::bulk_load(items)
}

/// Whole layout held in memory. Implements every source trait.
#[derive(Debug, Clone)]
pub struct InMemoryLayout {
    structures: BTreeMap<StructureId, Arc<SwitchStructure>>,
    tracks: TracksById,
    switches: BTreeMap<SwitchId, LayoutSwitch>,
    plan_switches: BTreeMap<PlanSwitchId, PlanSwitch>,
    track_index: TrackIndex,
    switch_index: SwitchIndex,
}

impl InMemoryLayout {
    pub fn new(
        structures: Vec<SwitchStructure>,
        tracks: Vec<(LocationTrack, TrackGeometry)>,
        switches: Vec<LayoutSwitch>,
        plan_switches: Vec<PlanSwitch>,
    ) -> Self {
        let tracks: TracksById = tracks
            .into_iter()
            .map(|(track, geometry)| (track.id, (track, geometry)))
            .collect();
        let switches: BTreeMap<_, _> = switches.into_iter().map(|s| (s.id, s)).collect();
        debug!(
            "indexing {} tracks and {} switches",
            tracks.len(),
            switches.len()
        );
        Self {
            structures: structures
                .into_iter()
                .map(|s| (s.id(), Arc::new(s)))
                .collect(),
            track_index: build_track_index(&tracks),
            switch_index: build_switch_index(&switches),
            tracks,
            switches,
            plan_switches: plan_switches.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    pub fn from_scenario(scenario: LayoutScenario) -> Self {
        Self::new(
            scenario.structures,
            scenario
                .tracks
                .into_iter()
                .map(|t| (t.track, t.geometry))
                .collect(),
            scenario.switches,
            scenario.plan_switches,
        )
    }

    pub fn tracks(&self) -> &TracksById {
        &self.tracks
    }

    /// Stores changed tracks (e.g. from applying a suggestion) and reindexes.
    pub fn update_tracks(&mut self, changed: Vec<(LocationTrack, TrackGeometry)>) {
        for (track, geometry) in changed {
            self.tracks.insert(track.id, (track, geometry));
        }
        self.track_index = build_track_index(&self.tracks);
    }

    pub fn upsert_switch(&mut self, switch: LayoutSwitch) {
        self.switches.insert(switch.id, switch);
        self.switch_index = build_switch_index(&self.switches);
    }
}

impl StructureCatalog for InMemoryLayout {
    fn switch_structure(&self, id: StructureId) -> Result<Arc<SwitchStructure>, LayoutSourceError> {
        self.structures
            .get(&id)
            .cloned()
            .ok_or(LayoutSourceError::StructureNotFound(id))
    }
}

impl TrackGeometrySource for InMemoryLayout {
    fn track_with_geometry(
        &self,
        id: TrackId,
    ) -> Result<(LocationTrack, TrackGeometry), LayoutSourceError> {
        self.tracks
            .get(&id)
            .cloned()
            .ok_or(LayoutSourceError::TrackNotFound(id))
    }

    fn tracks_near(&self, bbox: &BoundingBox) -> Vec<TrackId> {
        self.track_index
            .locate_in_envelope_intersecting(&to_envelope(bbox))
            .map(|item| item.data)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn tracks_linked_to_switch(&self, switch_id: SwitchId) -> Vec<TrackId> {
        self.tracks
            .iter()
            .filter(|(_, (track, geometry))| {
                geometry.contains_switch(switch_id)
                    || track.topology_switches().any(|s| s == switch_id)
            })
            .map(|(id, _)| *id)
            .collect()
    }
}

impl SwitchSource for InMemoryLayout {
    fn layout_switch(&self, id: SwitchId) -> Result<LayoutSwitch, LayoutSourceError> {
        self.switches
            .get(&id)
            .cloned()
            .ok_or(LayoutSourceError::SwitchNotFound(id))
    }

    fn switches_near(&self, bbox: &BoundingBox) -> Vec<SwitchId> {
        self.switch_index
            .locate_in_envelope(&to_envelope(bbox))
            .map(|item| item.data)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl PlanSwitchSource for InMemoryLayout {
    fn plan_switch(&self, id: PlanSwitchId) -> Result<PlanSwitch, LayoutSourceError> {
        self.plan_switches
            .get(&id)
            .cloned()
            .ok_or(LayoutSourceError::PlanSwitchNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::switch_linking::geometry::Segment;
    use crate::switch_linking::model::{LayoutSwitchJoint, SegmentSwitchLink, TopologyLink};
    use crate::switch_linking::test_data::{straight_track, yv60_300_1_9_o};
    use geo::coord;

    fn layout() -> InMemoryLayout {
        let mut linked_end = LocationTrack::new(TrackId(3), "topology");
        linked_end.topology_start = Some(TopologyLink {
            switch_id: SwitchId(7),
            joint: JointNumber(2),
        });
        InMemoryLayout::new(
            vec![yv60_300_1_9_o()],
            vec![
                (
                    LocationTrack::new(TrackId(1), "near"),
                    straight_track(coord! { x: 0.0, y: 0.0 }, coord! { x: 100.0, y: 0.0 }, 10),
                ),
                (
                    LocationTrack::new(TrackId(2), "far"),
                    TrackGeometry::new(vec![Segment::new(
                        vec![coord! { x: 500.0, y: 500.0 }, coord! { x: 600.0, y: 500.0 }],
                        0.0,
                        Some(SegmentSwitchLink::body(SwitchId(7))),
                    )]),
                ),
                (
                    linked_end,
                    straight_track(coord! { x: 1000.0, y: 0.0 }, coord! { x: 1100.0, y: 0.0 }, 2),
                ),
            ],
            vec![LayoutSwitch {
                id: SwitchId(7),
                name: "V007".into(),
                structure_id: StructureId(1),
                joints: vec![LayoutSwitchJoint {
                    number: JointNumber(1),
                    location: coord! { x: 50.0, y: 0.0 },
                    accuracy: None,
                }],
            }],
            Vec::new(),
        )
    }

    #[test]
    fn test_spatial_queries() {
        let layout = layout();
        let bbox = BoundingBox::around_point(coord! { x: 50.0, y: 5.0 }, 10.0);
        assert_eq!(layout.tracks_near(&bbox), vec![TrackId(1)]);
        assert_eq!(layout.switches_near(&bbox), vec![SwitchId(7)]);
        let empty = BoundingBox::around_point(coord! { x: 300.0, y: 300.0 }, 10.0);
        assert!(layout.tracks_near(&empty).is_empty());
        assert!(layout.switches_near(&empty).is_empty());
    }

    #[test]
    fn test_lookups_and_links() {
        let layout = layout();
        assert_eq!(
            layout.tracks_linked_to_switch(SwitchId(7)),
            vec![TrackId(2), TrackId(3)]
        );
        assert!(layout.switch_structure(StructureId(1)).is_ok());
        assert_eq!(
            layout.switch_structure(StructureId(99)).err(),
            Some(LayoutSourceError::StructureNotFound(StructureId(99)))
        );
        assert_eq!(
            layout.track_with_geometry(TrackId(42)).err(),
            Some(LayoutSourceError::TrackNotFound(TrackId(42)))
        );
        assert!(layout.tracks_with_geometry(&[TrackId(1), TrackId(42)]).is_err());
    }

    #[test]
    fn test_update_tracks_reindexes() {
        let mut layout = layout();
        layout.update_tracks(vec![(
            LocationTrack::new(TrackId(1), "moved"),
            straight_track(coord! { x: 300.0, y: 290.0 }, coord! { x: 300.0, y: 310.0 }, 2),
        )]);
        let bbox = BoundingBox::around_point(coord! { x: 300.0, y: 300.0 }, 10.0);
        assert_eq!(layout.tracks_near(&bbox), vec![TrackId(1)]);
    }

    #[test]
    fn test_scenario_json() {
        let json = r#"{
            "tracks": [{
                "id": 5,
                "name": "001",
                "geometry": [{ "points": [{"x": 0.0, "y": 0.0}, {"x": 10.0, "y": 0.0}], "start_m": 0.0 }]
            }]
        }"#;
        let scenario: LayoutScenario = serde_json::from_str(json).expect("scenario");
        let layout = InMemoryLayout::from_scenario(scenario);
        let (track, geometry) = layout.track_with_geometry(TrackId(5)).expect("track");
        assert_eq!(track.name, "001");
        assert_eq!(geometry.end_m(), 10.0);
    }
}
