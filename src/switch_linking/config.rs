use crate::switch_linking::scheduling::Scheduling;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extra credit weights used when ranking competing fits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Maximum bonus for placing the farthest joint far from the query point
    pub farthest_joint_weight: f64,
    /// Bonus per joint matched on a track the switch was linked to before
    pub prior_link_weight: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            farthest_joint_weight: 0.5,
            prior_link_weight: 0.1,
        }
    }
}

/// Tolerances of the fitting and linking pipeline. All distances are metres in layout space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkingConfig {
    /// Max distance between a joint and a matched track line
    pub joint_match_tolerance: f64,
    /// Max distance between a joint and a matched segment start or end point
    pub segment_end_tolerance: f64,
    pub max_line_intersection_distance: f64,
    /// Tracks whose overall directions differ less than this are never intersected
    pub max_parallel_angle_degrees: f64,
    pub intersection_chunk_size: usize,
    /// Joint M equal to a segment end within this is linked to that end
    pub same_point_tolerance: f64,
    /// Reuse an existing point instead of adding one when splitting within this
    pub new_point_tolerance: f64,
    pub max_overlap_correction: f64,
    pub inner_joint_snap_distance: f64,
    /// Max distance of a track end from a joint for a topology link
    pub topology_distance: f64,
    /// Max distance of a completed joint from its fitted location
    pub joint_node_adjustment_tolerance: f64,
    pub track_snap_distance: f64,
    pub track_search_area: f64,
    /// Grid bounds are expanded by this times the structure's larger dimension
    pub grid_crop_expansion_factor: f64,
    /// Per point search box side is this times the structure's larger dimension
    pub point_search_box_factor: f64,
    /// Plan switch fitting considers tracks in the joint box scaled by this
    pub plan_switch_search_factor: f64,
    pub scoring: ScoringConfig,
    pub scheduling: Scheduling,
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            joint_match_tolerance: 0.2,
            segment_end_tolerance: 0.5,
            max_line_intersection_distance: 0.5,
            max_parallel_angle_degrees: 1.0,
            intersection_chunk_size: 10,
            same_point_tolerance: 0.001,
            new_point_tolerance: 0.01,
            max_overlap_correction: 5.0,
            inner_joint_snap_distance: 1.0,
            topology_distance: 1.0,
            joint_node_adjustment_tolerance: 0.5,
            track_snap_distance: 0.1,
            track_search_area: 10.0,
            grid_crop_expansion_factor: 1.125,
            point_search_box_factor: 2.25,
            plan_switch_search_factor: 1.5,
            scoring: ScoringConfig::default(),
            scheduling: Scheduling::default(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl LinkingConfig {
    /// Reads a JSON config. Missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_scheduling(self, scheduling: Scheduling) -> Self {
        Self { scheduling, ..self }
    }
}
