use crate::switch_linking::error::StructureError;
use crate::switch_linking::geometry::{
    BoundingBox, direction_between_points, line_length, rotate_around_point,
};
use crate::switch_linking::model::{JointNumber, StructureId};
use geo::Coord;
use serde::{Deserialize, Serialize};

/// Catalog joint in the structure's local coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StructureJoint {
    pub number: JointNumber,
    pub location: Coord<f64>,
}

/// One routable path through a switch. `inner_joint` marks the split point of a
/// branching path, where the linked track may be split into two edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureAlignment {
    pub joints: Vec<JointNumber>,
    #[serde(default)]
    pub inner_joint: Option<JointNumber>,
}

impl StructureAlignment {
    pub fn new(joints: Vec<JointNumber>) -> Self {
        Self {
            joints,
            inner_joint: None,
        }
    }

    pub fn contains(&self, joint: JointNumber) -> bool {
        self.joints.contains(&joint)
    }

    pub fn first(&self) -> JointNumber {
        self.joints[0]
    }

    pub fn last(&self) -> JointNumber {
        self.joints[self.joints.len() - 1]
    }

    /// Joints strictly between the alignment ends, or the split inner joint when there are none
    pub fn middle_joints(&self) -> Vec<JointNumber> {
        let inner = &self.joints[1..self.joints.len() - 1];
        if inner.is_empty() {
            self.inner_joint.into_iter().collect()
        } else {
            inner.to_vec()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwitchJointRole {
    /// The presentation joint
    Main,
    /// First or last joint of some alignment
    Connection,
    /// Mechanical reference point inside the switch
    Math,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SwitchStructureRecord {
    id: StructureId,
    type_name: String,
    presentation_joint: JointNumber,
    joints: Vec<StructureJoint>,
    alignments: Vec<StructureAlignment>,
}

/// Idealized switch description from the switch library. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SwitchStructureRecord", into = "SwitchStructureRecord")]
pub struct SwitchStructure {
    id: StructureId,
    type_name: String,
    presentation_joint: JointNumber,
    joints: Vec<StructureJoint>,
    alignments: Vec<StructureAlignment>,
    shared_joint: JointNumber,
}

impl TryFrom<SwitchStructureRecord> for SwitchStructure {
    type Error = StructureError;

    fn try_from(r: SwitchStructureRecord) -> Result<Self, Self::Error> {
        SwitchStructure::new(r.id, r.type_name, r.presentation_joint, r.joints, r.alignments)
    }
}

impl From<SwitchStructure> for SwitchStructureRecord {
    fn from(s: SwitchStructure) -> Self {
        SwitchStructureRecord {
            id: s.id,
            type_name: s.type_name,
            presentation_joint: s.presentation_joint,
            joints: s.joints,
            alignments: s.alignments,
        }
    }
}

impl SwitchStructure {
    pub fn new(
        id: StructureId,
        type_name: impl Into<String>,
        presentation_joint: JointNumber,
        joints: Vec<StructureJoint>,
        alignments: Vec<StructureAlignment>,
    ) -> Result<Self, StructureError> {
        if joints.is_empty() {
            return Err(StructureError::NoJoints(id));
        }
        if alignments.is_empty() {
            return Err(StructureError::NoAlignments(id));
        }
        for (index, alignment) in alignments.iter().enumerate() {
            if alignment.joints.len() < 2 {
                return Err(StructureError::ShortAlignment {
                    structure: id,
                    alignment: index,
                });
            }
            let unknown = alignment
                .joints
                .iter()
                .chain(alignment.inner_joint.iter())
                .find(|j| !joints.iter().any(|sj| sj.number == **j));
            if let Some(joint) = unknown {
                return Err(StructureError::UnknownAlignmentJoint {
                    structure: id,
                    alignment: index,
                    joint: *joint,
                });
            }
        }
        if !alignments.iter().any(|a| a.contains(presentation_joint)) {
            return Err(StructureError::PresentationJointNotOnAlignment {
                structure: id,
                joint: presentation_joint,
            });
        }

        // presentation joint first, then catalog order
        let shared_joint = std::iter::once(presentation_joint)
            .chain(joints.iter().map(|j| j.number))
            .find(|number| alignments.iter().filter(|a| a.contains(*number)).count() >= 2)
            .ok_or(StructureError::NoSharedJoint(id))?;

        Ok(Self {
            id,
            type_name: type_name.into(),
            presentation_joint,
            joints,
            alignments,
            shared_joint,
        })
    }

    pub fn id(&self) -> StructureId {
        self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn presentation_joint(&self) -> JointNumber {
        self.presentation_joint
    }

    pub fn joints(&self) -> &[StructureJoint] {
        &self.joints
    }

    pub fn alignments(&self) -> &[StructureAlignment] {
        &self.alignments
    }

    pub fn joint(&self, number: JointNumber) -> Option<&StructureJoint> {
        self.joints.iter().find(|j| j.number == number)
    }

    pub fn joint_location(&self, number: JointNumber) -> Option<Coord<f64>> {
        self.joint(number).map(|j| j.location)
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let first = self.joints[0].location;
        self.joints
            .iter()
            .fold(BoundingBox::new(first, first), |bbox, j| {
                bbox.including(j.location)
            })
    }

    /// Joints that appear on at least one alignment, in catalog order
    pub fn alignment_joints(&self) -> Vec<StructureJoint> {
        self.joints
            .iter()
            .filter(|j| self.alignments.iter().any(|a| a.contains(j.number)))
            .copied()
            .collect()
    }

    pub fn role(&self, number: JointNumber) -> SwitchJointRole {
        if number == self.presentation_joint {
            SwitchJointRole::Main
        } else if self
            .alignments
            .iter()
            .any(|a| a.first() == number || a.last() == number)
        {
            SwitchJointRole::Connection
        } else {
            SwitchJointRole::Math
        }
    }

    /// First or last joint of some alignment
    pub fn is_end_joint(&self, number: JointNumber) -> bool {
        self.alignments
            .iter()
            .any(|a| a.first() == number || a.last() == number)
    }

    /// The joint shared by two or more alignments, preferring the presentation joint.
    pub fn shared_joint(&self) -> JointNumber {
        self.shared_joint
    }

    pub fn alignments_through(&self, joint: JointNumber) -> Vec<&StructureAlignment> {
        self.alignments.iter().filter(|a| a.contains(joint)).collect()
    }

    /// Joint of `alignment` farthest (straight line) from `from`
    pub fn farthest_joint(
        &self,
        from: JointNumber,
        alignment: &StructureAlignment,
    ) -> Option<StructureJoint> {
        let origin = self.joint_location(from)?;
        alignment
            .joints
            .iter()
            .filter_map(|number| self.joint(*number))
            .fold(None, |best: Option<StructureJoint>, joint| match best {
                Some(b) if line_length(origin, b.location) >= line_length(origin, joint.location) => {
                    Some(b)
                }
                _ => Some(*joint),
            })
    }

    /// Alignment with the longest straight distance between its end joints
    pub fn longest_alignment(&self) -> &StructureAlignment {
        let length = |a: &StructureAlignment| match (
            self.joint_location(a.first()),
            self.joint_location(a.last()),
        ) {
            (Some(s), Some(e)) => line_length(s, e),
            _ => 0.0,
        };
        self.alignments
            .iter()
            .fold(&self.alignments[0], |best, a| {
                if length(a) > length(best) { a } else { best }
            })
    }

    /// All joints placed in layout space
    pub fn place_joints(&self, transform: &RigidTransform) -> Vec<StructureJoint> {
        self.joints
            .iter()
            .map(|j| StructureJoint {
                number: j.number,
                location: transform.apply(j.location),
            })
            .collect()
    }

    /// Alignment joints placed in layout space
    pub fn place_alignment_joints(&self, transform: &RigidTransform) -> Vec<StructureJoint> {
        self.alignment_joints()
            .into_iter()
            .map(|j| StructureJoint {
                number: j.number,
                location: transform.apply(j.location),
            })
            .collect()
    }
}

/// Maps structure-local joint coordinates into layout space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    pub translation: Coord<f64>,
    /// Radians, counter-clockwise
    pub rotation: f64,
    /// Rotation center in (possibly mirrored) local coordinates
    pub reference: Coord<f64>,
    /// Local coordinates are reflected across the structure's x axis before rotating
    pub mirrored: bool,
}

const MAX_JOINT_DISTANCE_DIFFERENCE: f64 = 0.1;

fn reflect(p: Coord<f64>) -> Coord<f64> {
    Coord { x: p.x, y: -p.y }
}

fn signed_area(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

impl RigidTransform {
    /// Derives the transform from measured joint locations paired with the structure's
    /// alignment joints. Needs two pairs whose measured spacing agrees with the catalog
    /// within 0.1 m.
    pub fn from_joints(
        measured: &[StructureJoint],
        structure: &SwitchStructure,
    ) -> Option<RigidTransform> {
        let ideal = structure.alignment_joints();
        let pairs: Vec<(Coord<f64>, Coord<f64>)> = measured
            .iter()
            .filter_map(|m| {
                ideal
                    .iter()
                    .find(|i| i.number == m.number)
                    .map(|i| (m.location, i.location))
            })
            .collect();

        if pairs.len() < 2 {
            return None;
        }
        let (m0, i0) = pairs[0];
        let (m1, i1) = pairs[1];
        if (line_length(m0, m1) - line_length(i0, i1)).abs() > MAX_JOINT_DISTANCE_DIFFERENCE {
            return None;
        }

        let mirrored = pairs.get(2).is_some_and(|(m2, i2)| {
            let measured_area = signed_area(m0, m1, *m2);
            let ideal_area = signed_area(i0, i1, *i2);
            measured_area * ideal_area < 0.0
        });
        let (i0, i1) = if mirrored {
            (reflect(i0), reflect(i1))
        } else {
            (i0, i1)
        };

        Some(RigidTransform {
            translation: m0 - i0,
            rotation: direction_between_points(m0, m1) - direction_between_points(i0, i1),
            reference: i0,
            mirrored,
        })
    }

    pub fn apply(&self, local: Coord<f64>) -> Coord<f64> {
        let p = if self.mirrored { reflect(local) } else { local };
        rotate_around_point(self.reference, self.rotation, p) + self.translation
    }
}
