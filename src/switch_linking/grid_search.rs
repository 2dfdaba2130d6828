//! Blind switch placement: for every sample point, seed rigid transforms from nearby
//! track intersections, fit the structure at each and keep the best scoring fit.

use crate::switch_linking::config::{LinkingConfig, ScoringConfig};
use crate::switch_linking::cropping::{CroppedAlignment, crop_to_bbox};
use crate::switch_linking::fitting::{FittedSwitch, fit_switch};
use crate::switch_linking::geometry::{BoundingBox, IntersectType, TrackGeometry, line_length};
use crate::switch_linking::intersections::{
    TrackIntersection, closest_intersections, closest_point_as_intersection,
    find_all_intersections, track_pairs,
};
use crate::switch_linking::model::{JointNumber, LocationAccuracy, TrackId};
use crate::switch_linking::structure::{
    RigidTransform, StructureAlignment, StructureJoint, SwitchStructure,
};
use geo::Coord;
use log::{debug, trace};
use std::sync::Arc;

/// Number of real intersections per sample point used as transform seeds
const SEED_INTERSECTIONS: usize = 2;

/// Candidate locations for a blind search.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingGrid {
    points: Vec<Coord<f64>>,
}

impl SamplingGrid {
    pub fn new(points: Vec<Coord<f64>>) -> Self {
        assert!(!points.is_empty(), "sampling grid needs at least one point");
        Self { points }
    }

    pub fn single(point: Coord<f64>) -> Self {
        Self::new(vec![point])
    }

    pub fn points(&self) -> &[Coord<f64>] {
        &self.points
    }

    pub fn bounds(&self) -> BoundingBox {
        let first = self.points[0];
        self.points
            .iter()
            .fold(BoundingBox::new(first, first), |bbox, p| bbox.including(*p))
    }
}

/// Per sample point results, in grid order. Points without a result keep `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct PointAssociation<T> {
    entries: Vec<(Coord<f64>, Option<T>)>,
}

impl<T> PointAssociation<T> {
    pub fn new(entries: Vec<(Coord<f64>, Option<T>)>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index).and_then(|(_, r)| r.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Coord<f64>, Option<&T>)> {
        self.entries.iter().map(|(p, r)| (*p, r.as_ref()))
    }

    pub fn map<R, F>(self, mut f: F) -> PointAssociation<R>
    where
        F: FnMut(Coord<f64>, T) -> Option<R>,
    {
        PointAssociation {
            entries: self
                .entries
                .into_iter()
                .map(|(p, r)| (p, r.and_then(|r| f(p, r))))
                .collect(),
        }
    }

    /// Like `map`, stopping at the first error
    pub fn try_map<R, E, F>(self, mut f: F) -> Result<PointAssociation<R>, E>
    where
        F: FnMut(Coord<f64>, T) -> Result<Option<R>, E>,
    {
        let entries = self
            .entries
            .into_iter()
            .map(|(p, r)| match r {
                Some(r) => f(p, r).map(|mapped| (p, mapped)),
                None => Ok((p, None)),
            })
            .collect::<Result<Vec<_>, E>>()?;
        Ok(PointAssociation { entries })
    }

    pub fn into_results(self) -> Vec<Option<T>> {
        self.entries.into_iter().map(|(_, r)| r).collect()
    }

    /// Result of the first point that has one
    pub fn first_found(self) -> Option<T> {
        self.entries.into_iter().find_map(|(_, r)| r)
    }
}

/// Intersections that seed transforms for `point`: the best real intersections plus the
/// closest point fallback of every track pair, restricted to `point_box`.
pub fn seed_intersections(
    tracks: &[CroppedAlignment],
    all_intersections: &[TrackIntersection],
    point: Coord<f64>,
    point_box: &BoundingBox,
) -> Vec<TrackIntersection> {
    let mut seeds = closest_intersections(all_intersections, point, SEED_INTERSECTIONS);
    for (a, b) in track_pairs(tracks.len()) {
        if let Some(fallback) = closest_point_as_intersection(tracks, a, b, point) {
            seeds.push(fallback);
        }
    }
    let mut unique: Vec<TrackIntersection> = Vec::with_capacity(seeds.len());
    for seed in seeds {
        if point_box.contains(seed.point) && !unique.contains(&seed) {
            unique.push(seed);
        }
    }
    unique
}

/// Transforms that put `shared` at the track position nearest to `point` and the farthest
/// joint of `alignment` one joint distance backward or forward along the track.
fn transforms_along_track(
    point: Coord<f64>,
    track: &CroppedAlignment,
    alignment: &StructureAlignment,
    shared: JointNumber,
    structure: &SwitchStructure,
    snap: f64,
) -> Vec<RigidTransform> {
    let (Some(farthest), Some(shared_location)) = (
        structure.farthest_joint(shared, alignment),
        structure.joint_location(shared),
    ) else {
        return Vec::new();
    };
    let distance = line_length(shared_location, farthest.location);
    let Some(projection) = track.closest_point(point) else {
        return Vec::new();
    };
    if projection.intersect != IntersectType::Within {
        return Vec::new();
    }
    let Some(fix) = track.point_at_m(projection.m, snap) else {
        return Vec::new();
    };

    [
        track.point_at_m(projection.m - distance, snap),
        track.point_at_m(projection.m + distance, snap),
    ]
    .into_iter()
    .flatten()
    .filter_map(|target| {
        RigidTransform::from_joints(
            &[
                StructureJoint {
                    number: shared,
                    location: fix,
                },
                StructureJoint {
                    number: farthest.number,
                    location: target,
                },
            ],
            structure,
        )
    })
    .collect()
}

fn candidate_transforms(
    tracks: &[CroppedAlignment],
    seed: &TrackIntersection,
    structure: &SwitchStructure,
    config: &LinkingConfig,
) -> Vec<RigidTransform> {
    let shared = structure.shared_joint();
    let through = structure.alignments_through(shared);
    let (Some(first), Some(second)) = (through.first(), through.get(1)) else {
        return Vec::new();
    };
    [seed.track_a, seed.track_b]
        .into_iter()
        .flat_map(|track| {
            [*first, *second].into_iter().flat_map(move |alignment| {
                transforms_along_track(
                    seed.point,
                    &tracks[track],
                    alignment,
                    shared,
                    structure,
                    config.track_snap_distance,
                )
            })
        })
        .collect()
}

/// Score of a fit for a sample point. Higher is better.
pub fn score_fit(
    fit: &FittedSwitch,
    farthest_joint: JointNumber,
    max_farthest_distance: f64,
    point: Coord<f64>,
    previously_linked: &[TrackId],
    scoring: &ScoringConfig,
) -> f64 {
    let alignment_joints: Vec<JointNumber> = fit
        .structure
        .alignment_joints()
        .iter()
        .map(|j| j.number)
        .collect();
    fit.joints
        .iter()
        .filter(|joint| alignment_joints.contains(&joint.number))
        .map(|joint| {
            let match_score = joint
                .matches
                .iter()
                .map(|m| (1.0 - m.distance_to_alignment).max(0.0))
                .reduce(f64::max)
                .unwrap_or(0.0);
            let farthest_score = if joint.number == farthest_joint && max_farthest_distance > 0.0 {
                line_length(point, joint.location) / max_farthest_distance
                    * scoring.farthest_joint_weight
            } else {
                0.0
            };
            let prior_score = if joint
                .matches
                .iter()
                .any(|m| previously_linked.contains(&m.track_id))
            {
                scoring.prior_link_weight
            } else {
                0.0
            };
            match_score + farthest_score + prior_score
        })
        .sum()
}

/// Highest scoring fit, the earliest candidate wins ties.
pub fn select_best_fit(
    fits: Vec<FittedSwitch>,
    point: Coord<f64>,
    previously_linked: &[TrackId],
    scoring: &ScoringConfig,
) -> Option<FittedSwitch> {
    let first = fits.first()?;
    let structure = Arc::clone(&first.structure);
    let shared = structure.shared_joint();
    let farthest_joint = structure
        .alignments_through(shared)
        .first()
        .and_then(|alignment| structure.farthest_joint(shared, alignment))
        .map(|j| j.number)
        .unwrap_or(shared);

    let max_farthest_distance = fits
        .iter()
        .filter_map(|fit| fit.joint(farthest_joint))
        .map(|joint| line_length(point, joint.location))
        .fold(0.0, f64::max);

    let mut best: Option<(f64, FittedSwitch)> = None;
    for fit in fits {
        let score = score_fit(
            &fit,
            farthest_joint,
            max_farthest_distance,
            point,
            previously_linked,
            scoring,
        );
        trace!("fit candidate at {:?} scored {:.3}", point, score);
        if best.as_ref().is_none_or(|(s, _)| score > *s) {
            best = Some((score, fit));
        }
    }
    best.map(|(_, fit)| fit)
}

fn best_fit_for_point(
    point: Coord<f64>,
    structure: &Arc<SwitchStructure>,
    tracks: &[CroppedAlignment],
    all_intersections: &[TrackIntersection],
    previously_linked: &[TrackId],
    config: &LinkingConfig,
) -> Option<FittedSwitch> {
    let point_box = BoundingBox::centered_at(
        point,
        structure.bounding_box().max_dimension() * config.point_search_box_factor,
    );
    let seeds = seed_intersections(tracks, all_intersections, point, &point_box);
    let transforms: Vec<RigidTransform> = seeds
        .iter()
        .flat_map(|seed| candidate_transforms(tracks, seed, structure, config))
        .collect();

    let fits: Vec<FittedSwitch> = config
        .scheduling
        .map(&transforms, |transform| {
            fit_switch(
                &structure.place_joints(transform),
                structure,
                tracks,
                Some(LocationAccuracy::GeometryCalculated),
                config,
            )
        })
        .into_iter()
        .filter(FittedSwitch::has_matches)
        .collect();

    debug!(
        "{} seeds, {} transforms, {} usable fits at {:?}",
        seeds.len(),
        transforms.len(),
        fits.len(),
        point
    );
    select_best_fit(fits, point, previously_linked, &config.scoring)
}

/// Best fit of `structure` at every grid point. `previously_linked` lists the tracks the
/// switch was linked to before the search; matches on them earn extra credit.
pub fn find_best_fits_for_grid(
    grid: &SamplingGrid,
    structure: &Arc<SwitchStructure>,
    tracks: &[(TrackId, &TrackGeometry)],
    previously_linked: &[TrackId],
    config: &LinkingConfig,
) -> PointAssociation<FittedSwitch> {
    let expansion = structure.bounding_box().max_dimension() * config.grid_crop_expansion_factor;
    let grid_box = grid.bounds().expanded(expansion);
    let cropped: Vec<CroppedAlignment> = tracks
        .iter()
        .map(|(id, geometry)| crop_to_bbox(*id, geometry, &grid_box))
        .filter(|crop| !crop.is_empty())
        .collect();
    let all_intersections = find_all_intersections(&cropped, config);
    debug!(
        "grid search over {} points, {} tracks, {} intersections",
        grid.points().len(),
        cropped.len(),
        all_intersections.len()
    );

    let results = config.scheduling.map(grid.points(), |point| {
        best_fit_for_point(
            *point,
            structure,
            &cropped,
            &all_intersections,
            previously_linked,
            config,
        )
    });
    PointAssociation::new(grid.points().iter().copied().zip(results).collect())
}
