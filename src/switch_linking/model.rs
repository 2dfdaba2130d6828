use crate::switch_linking::geometry::TrackGeometry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Typed wrapper for location track IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub i64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Typed wrapper for layout switch IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SwitchId(pub i64);

impl fmt::Display for SwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Typed wrapper for switch structure (catalog) IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructureId(pub i64);

impl fmt::Display for StructureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ss{}", self.0)
    }
}

/// Typed wrapper for switches defined in an imported plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanSwitchId(pub i64);

impl fmt::Display for PlanSwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ps{}", self.0)
    }
}

/// Spatial reference system identifier (EPSG code)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Srid(pub u32);

/// ETRS89 / TM35FIN, the metric system all layout geometry is stored in.
pub const LAYOUT_SRID: Srid = Srid(3067);
pub const WGS_84_SRID: Srid = Srid(4326);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JointNumber(pub u32);

impl fmt::Display for JointNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "J{}", self.0)
    }
}

/// The switch a linking operation is performed for. A switch that only exists
/// as a suggestion has no stored identity yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwitchRef {
    Unsaved,
    Existing(SwitchId),
}

impl SwitchRef {
    pub fn id(&self) -> Option<SwitchId> {
        match self {
            SwitchRef::Unsaved => None,
            SwitchRef::Existing(id) => Some(*id),
        }
    }
}

impl fmt::Display for SwitchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchRef::Unsaved => write!(f, "unsaved"),
            SwitchRef::Existing(id) => write!(f, "{}", id),
        }
    }
}

/// How trustworthy a joint location is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationAccuracy {
    DesignedGeolocation,
    OfficiallyMeasuredGeodetically,
    MeasuredGeodetically,
    DigitizedAerialImage,
    GeometryCalculated,
}

/// Measurement method declared on an imported plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasurementMethod {
    VerifiedDesignedGeometry,
    OfficiallyMeasuredGeodetically,
    TrackInspection,
    DigitizedAerialImage,
    UnverifiedDesignedGeometry,
}

impl MeasurementMethod {
    pub fn location_accuracy(&self) -> LocationAccuracy {
        match self {
            MeasurementMethod::VerifiedDesignedGeometry => LocationAccuracy::DesignedGeolocation,
            MeasurementMethod::OfficiallyMeasuredGeodetically => {
                LocationAccuracy::OfficiallyMeasuredGeodetically
            }
            MeasurementMethod::TrackInspection => LocationAccuracy::MeasuredGeodetically,
            MeasurementMethod::DigitizedAerialImage => LocationAccuracy::DigitizedAerialImage,
            MeasurementMethod::UnverifiedDesignedGeometry => LocationAccuracy::MeasuredGeodetically,
        }
    }
}

/// Direction of a track relative to the principal axis of a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelativeDirection {
    Along,
    Against,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackEnd {
    Start,
    End,
}

/// A track end connected to a switch without the track running through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopologyLink {
    pub switch_id: SwitchId,
    pub joint: JointNumber,
}

/// Switch ownership of a single geometry segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentSwitchLink {
    pub switch_id: SwitchId,
    pub start_joint: Option<JointNumber>,
    pub end_joint: Option<JointNumber>,
}

impl SegmentSwitchLink {
    pub fn body(switch_id: SwitchId) -> Self {
        Self {
            switch_id,
            start_joint: None,
            end_joint: None,
        }
    }
}

/// Location track metadata. Geometry is held separately in a `TrackGeometry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationTrack {
    pub id: TrackId,
    pub name: String,
    #[serde(default)]
    pub topology_start: Option<TopologyLink>,
    #[serde(default)]
    pub topology_end: Option<TopologyLink>,
}

impl LocationTrack {
    pub fn new(id: TrackId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            topology_start: None,
            topology_end: None,
        }
    }

    pub fn topology_switches(&self) -> impl Iterator<Item = SwitchId> + '_ {
        self.topology_start
            .iter()
            .chain(self.topology_end.iter())
            .map(|link| link.switch_id)
    }

    pub fn without_topology_links_to(&self, switch_id: SwitchId) -> Self {
        let keep = |link: &Option<TopologyLink>| link.filter(|l| l.switch_id != switch_id);
        Self {
            topology_start: keep(&self.topology_start),
            topology_end: keep(&self.topology_end),
            ..self.clone()
        }
    }

    pub fn with_topology_link(&self, end: TrackEnd, link: TopologyLink) -> Self {
        match end {
            TrackEnd::Start => Self {
                topology_start: Some(link),
                ..self.clone()
            },
            TrackEnd::End => Self {
                topology_end: Some(link),
                ..self.clone()
            },
        }
    }
}

/// Tracks with their geometry, keyed and iterated in track id order.
pub type TracksById = BTreeMap<TrackId, (LocationTrack, TrackGeometry)>;

/// Switch as it currently exists in the layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutSwitch {
    pub id: SwitchId,
    pub name: String,
    pub structure_id: StructureId,
    pub joints: Vec<LayoutSwitchJoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutSwitchJoint {
    pub number: JointNumber,
    pub location: geo::Coord<f64>,
    #[serde(default)]
    pub accuracy: Option<LocationAccuracy>,
}

impl LayoutSwitch {
    pub fn joint(&self, number: JointNumber) -> Option<&LayoutSwitchJoint> {
        self.joints.iter().find(|j| j.number == number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_link_clearing_keeps_other_switches() {
        let mut track = LocationTrack::new(TrackId(1), "track");
        track.topology_start = Some(TopologyLink {
            switch_id: SwitchId(5),
            joint: JointNumber(1),
        });
        track.topology_end = Some(TopologyLink {
            switch_id: SwitchId(6),
            joint: JointNumber(2),
        });

        let cleared = track.without_topology_links_to(SwitchId(5));
        assert_eq!(cleared.topology_start, None);
        assert_eq!(cleared.topology_end.map(|l| l.switch_id), Some(SwitchId(6)));
    }

    #[test]
    fn test_measurement_method_accuracy() {
        assert_eq!(
            MeasurementMethod::TrackInspection.location_accuracy(),
            LocationAccuracy::MeasuredGeodetically
        );
        assert_eq!(
            MeasurementMethod::VerifiedDesignedGeometry.location_accuracy(),
            LocationAccuracy::DesignedGeolocation
        );
    }

    #[test]
    fn test_switch_ref_id() {
        assert_eq!(SwitchRef::Unsaved.id(), None);
        assert_eq!(SwitchRef::Existing(SwitchId(3)).id(), Some(SwitchId(3)));
    }
}
