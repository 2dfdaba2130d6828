use crate::switch_linking::model::{
    JointNumber, PlanSwitchId, Srid, StructureId, SwitchId, TrackId,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Catalog data that cannot describe a usable switch structure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StructureError {
    #[error("structure {0} has no joints")]
    NoJoints(StructureId),
    #[error("structure {0} has no alignments")]
    NoAlignments(StructureId),
    #[error("structure {structure} alignment {alignment} has fewer than two joints")]
    ShortAlignment { structure: StructureId, alignment: usize },
    #[error("structure {structure} alignment {alignment} refers to unknown joint {joint}")]
    UnknownAlignmentJoint {
        structure: StructureId,
        alignment: usize,
        joint: JointNumber,
    },
    #[error("structure {structure} presentation joint {joint} is not on any alignment")]
    PresentationJointNotOnAlignment {
        structure: StructureId,
        joint: JointNumber,
    },
    #[error("structure {0} has no joint shared by two alignments")]
    NoSharedJoint(StructureId),
}

/// Failures of the layout data collaborators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayoutSourceError {
    #[error("location track {0} not found")]
    TrackNotFound(TrackId),
    #[error("layout switch {0} not found")]
    SwitchNotFound(SwitchId),
    #[error("switch structure {0} not found")]
    StructureNotFound(StructureId),
    #[error("plan switch {0} not found")]
    PlanSwitchNotFound(PlanSwitchId),
    #[error("invalid switch structure: {0}")]
    InvalidStructure(#[from] StructureError),
    #[error("switch {switch} has no joint {joint}")]
    MissingJoint { switch: SwitchId, joint: JointNumber },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("no transformation from EPSG:{} to EPSG:{}", .from.0, .to.0)]
    Unsupported { from: Srid, to: Srid },
    #[error("coordinate ({x}, {y}) is outside the valid area of EPSG:{}", .srid.0)]
    OutOfBounds { x: f64, y: f64, srid: Srid },
}

/// Why a switch from an imported plan could not be fitted onto the layout.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FittingFailure {
    #[error("switch has fewer than two joints")]
    LessThanTwoJoints,
    #[error("switch has no switch structure id")]
    NoSwitchStructureId,
    #[error("plan has no coordinate system")]
    NoSridOnPlan,
    #[error("switch joints do not match the switch structure")]
    InvalidJoints,
    #[error("no location tracks are linked to the switch through plan geometry")]
    RelatedTracksNotLinked,
    #[error(transparent)]
    Source(#[from] LayoutSourceError),
    #[error(transparent)]
    Transform(#[from] TransformError),
}

impl FittingFailure {
    /// Stable reason code for API consumers
    pub fn reason(&self) -> FittingFailureReason {
        match self {
            FittingFailure::LessThanTwoJoints => FittingFailureReason::LessThanTwoJoints,
            FittingFailure::NoSwitchStructureId => FittingFailureReason::NoSwitchStructureId,
            FittingFailure::NoSridOnPlan => FittingFailureReason::NoSridOnPlan,
            FittingFailure::InvalidJoints => FittingFailureReason::InvalidJoints,
            FittingFailure::RelatedTracksNotLinked => FittingFailureReason::RelatedTracksNotLinked,
            FittingFailure::Source(_) | FittingFailure::Transform(_) => {
                FittingFailureReason::SourceUnavailable
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FittingFailureReason {
    LessThanTwoJoints,
    NoSwitchStructureId,
    NoSridOnPlan,
    InvalidJoints,
    RelatedTracksNotLinked,
    SourceUnavailable,
}
