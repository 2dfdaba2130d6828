//! Shared fixtures: a YV60-300-1:9-O turnout and simple track layouts around it.

use crate::switch_linking::geometry::{Segment, TrackGeometry};
use crate::switch_linking::model::{JointNumber, StructureId, TrackId};
use crate::switch_linking::structure::{
    RigidTransform, StructureAlignment, StructureJoint, SwitchStructure,
};
use geo::{Coord, coord};

fn joint(number: u32, x: f64, y: f64) -> StructureJoint {
    StructureJoint {
        number: JointNumber(number),
        location: coord! { x: x, y: y },
    }
}

/// Right hand 1:9 turnout. Joint 1 is the switch front, 5 the math point, 2 the straight
/// end and 3 the diverging end.
pub fn yv60_300_1_9_o() -> SwitchStructure {
    SwitchStructure::new(
        StructureId(1),
        "YV60-300-1:9-O",
        JointNumber(1),
        vec![
            joint(1, 0.0, 0.0),
            joint(5, 16.615, 0.0),
            joint(2, 34.430, 0.0),
            joint(3, 34.321, -1.967),
        ],
        vec![
            StructureAlignment::new(vec![JointNumber(1), JointNumber(5), JointNumber(2)]),
            StructureAlignment::new(vec![JointNumber(1), JointNumber(3)]),
        ],
    )
    .expect("valid structure")
}

/// Straight structure with joints 1, 5 and 2 ten metres apart.
pub fn straight_structure() -> SwitchStructure {
    SwitchStructure::new(
        StructureId(2),
        "straight",
        JointNumber(1),
        vec![joint(1, 0.0, 0.0), joint(5, 10.0, 0.0), joint(2, 20.0, 0.0)],
        vec![
            StructureAlignment::new(vec![JointNumber(1), JointNumber(5), JointNumber(2)]),
            StructureAlignment::new(vec![JointNumber(1), JointNumber(2)]),
        ],
    )
    .expect("valid structure")
}

pub fn identity() -> RigidTransform {
    RigidTransform {
        translation: coord! { x: 0.0, y: 0.0 },
        rotation: 0.0,
        reference: coord! { x: 0.0, y: 0.0 },
        mirrored: false,
    }
}

/// Single segment track with `steps` evenly spaced lines.
pub fn straight_track(from: Coord<f64>, to: Coord<f64>, steps: usize) -> TrackGeometry {
    let points = (0..=steps)
        .map(|i| from + (to - from) * (i as f64 / steps as f64))
        .collect();
    TrackGeometry::from_polylines(vec![points])
}

/// Track that leaves the origin along the YV diverging curve, passes joint 3 and runs on
/// straight for another 30 m.
pub fn diverging_track() -> TrackGeometry {
    let (end_x, end_y) = (34.321, -1.967);
    let mut points: Vec<Coord<f64>> = (0..=34)
        .map(|i| {
            let x = end_x * i as f64 / 34.0;
            coord! { x: x, y: end_y * (x / end_x).powi(2) }
        })
        .collect();
    let slope = 2.0 * end_y / end_x;
    points.extend((1..=30).map(|k| {
        let dx = k as f64;
        coord! { x: end_x + dx, y: end_y + slope * dx }
    }));
    TrackGeometry::new(vec![Segment::new(points, 0.0, None)])
}

pub struct YvLayout {
    pub tracks: Vec<(TrackId, TrackGeometry)>,
    pub placed_joints: Vec<StructureJoint>,
}

pub const THROUGH_TRACK: TrackId = TrackId(1);
pub const BRANCH_TRACK: TrackId = TrackId(2);

/// A through track on the x axis from -50 to 100 and a branch track starting at the
/// origin, with the structure placed at its catalog coordinates.
pub fn yv_layout(structure: &SwitchStructure) -> YvLayout {
    YvLayout {
        tracks: vec![
            (
                THROUGH_TRACK,
                straight_track(coord! { x: -50.0, y: 0.0 }, coord! { x: 100.0, y: 0.0 }, 150),
            ),
            (BRANCH_TRACK, diverging_track()),
        ],
        placed_joints: structure.place_joints(&identity()),
    }
}
