//! End to end runs over small layouts, from blind search to written links.

use crate::switch_linking::config::LinkingConfig;
use crate::switch_linking::coord_transform::TangentPlaneTransform;
use crate::switch_linking::cropping::crop_nothing;
use crate::switch_linking::error::{FittingFailure, FittingFailureReason};
use crate::switch_linking::geometry::{BoundingBox, line_length};
use crate::switch_linking::grid_search::{SamplingGrid, seed_intersections};
use crate::switch_linking::intersections::find_all_intersections;
use crate::switch_linking::layout_source::{InMemoryLayout, LayoutScenario, SwitchSource};
use crate::switch_linking::matching::{SuggestedSwitch, SwitchLinkingTrackLinks};
use crate::switch_linking::model::{LocationTrack, PlanSwitchId, StructureId, SwitchId, TrackId};
use crate::switch_linking::scheduling::Scheduling;
use crate::switch_linking::service::{SuggestionTarget, SwitchLinkingService};
use crate::switch_linking::test_data::{
    BRANCH_TRACK, THROUGH_TRACK, straight_track, yv60_300_1_9_o, yv_layout,
};
use geo::coord;
use itertools::Itertools;

const SWITCH: SwitchId = SwitchId(10);

fn yv_in_memory() -> InMemoryLayout {
    let structure = yv60_300_1_9_o();
    let tracks = yv_layout(&structure)
        .tracks
        .into_iter()
        .map(|(id, geometry)| (LocationTrack::new(id, format!("track {}", id.0)), geometry))
        .collect();
    InMemoryLayout::new(vec![structure], tracks, Vec::new(), Vec::new())
}

fn new_switch_target() -> SuggestionTarget {
    SuggestionTarget::Structure(StructureId(1))
}

fn assert_same_links(a: &SuggestedSwitch, b: &SuggestedSwitch) {
    assert_eq!(
        a.track_links.keys().collect::<Vec<_>>(),
        b.track_links.keys().collect::<Vec<_>>()
    );
    for (track_id, links) in &a.track_links {
        let other = &b.track_links[track_id];
        assert_eq!(links.joint_numbers(), other.joint_numbers(), "track {}", track_id);
        if let (SwitchLinkingTrackLinks::Segments(x), SwitchLinkingTrackLinks::Segments(y)) = (links, other) {
            for (p, q) in x.joints().iter().zip(y.joints()) {
                assert!((p.m - q.m).abs() < 1e-3, "{} moved from {} to {}", p.number, p.m, q.m);
            }
        }
    }
}

#[test]
fn test_linking_then_refitting_reproduces_links() {
    let mut layout = yv_in_memory();
    let transform = TangentPlaneTransform::default();
    let config = LinkingConfig::default();

    let first = {
        let service = SwitchLinkingService::new(&layout, &transform, &config);
        let suggested = service
            .suggest_switch_at_point(coord! { x: 0.5, y: 0.2 }, new_switch_target())
            .expect("layout lookups")
            .expect("suggestion");
        let result = service.link_switch(&suggested, SWITCH).expect("linked");
        layout.update_tracks(
            result
                .changed_tracks
                .into_iter()
                .map(|t| (t.track, t.geometry))
                .collect(),
        );
        layout.upsert_switch(result.switch);
        suggested
    };

    let service = SwitchLinkingService::new(&layout, &transform, &config);
    let location = service.presentation_joint_location(SWITCH).expect("joint 1");
    let second = service
        .suggest_switch_at_point(location, SuggestionTarget::Switch(SWITCH))
        .expect("layout lookups")
        .expect("refit");

    assert_same_links(&first, &second);
    for joint in &first.joints {
        let refitted = second.joint(joint.number).expect("same joints");
        assert!(line_length(joint.location, refitted.location) < 1e-3);
    }

    let per_track = service.track_switch_suggestions(BRANCH_TRACK).expect("suggestions");
    assert_eq!(per_track.len(), 1);
    assert_eq!(per_track[0].0, SWITCH);
    let from_track = per_track[0].1.as_ref().expect("suggestion for linked switch");
    assert_same_links(&first, from_track);
    assert_eq!(layout.layout_switch(SWITCH).map(|s| s.joints.len()).ok(), Some(4));
}

#[test]
fn test_suggestions_are_deterministic_and_ordered() {
    let layout = yv_in_memory();
    let transform = TangentPlaneTransform::default();
    let parallel = LinkingConfig::default();
    let sequential = LinkingConfig::default().with_scheduling(Scheduling::Sequential);
    let grid = SamplingGrid::new(
        (-2..=2)
            .cartesian_product(-1..=1)
            .map(|(x, y)| coord! { x: x as f64, y: y as f64 * 0.5 })
            .collect(),
    );

    let run = |config: &LinkingConfig| {
        SwitchLinkingService::new(&layout, &transform, config)
            .suggest_switches_at_grid(&grid, new_switch_target())
            .expect("layout lookups")
    };
    let first = run(&parallel);
    assert_eq!(first, run(&parallel));
    assert_eq!(first, run(&sequential));

    let found: Vec<_> = first.iter().filter_map(|(_, s)| s).collect();
    assert!(!found.is_empty());
    for suggestion in found {
        for (track_id, links) in &suggestion.suggested.track_links {
            if let SwitchLinkingTrackLinks::Segments(segments) = links {
                assert!(
                    segments.joints().iter().tuple_windows().all(|(a, b)| a.m < b.m),
                    "track {} links out of order",
                    track_id
                );
            }
            assert!(suggestion.relevant_tracks.contains_key(track_id));
        }
    }
}

#[test]
fn test_one_joint_plan_switch_from_scenario_file() {
    let json = r#"{
        "plan_switches": [{
            "id": 1,
            "name": "V001",
            "structure_id": 1,
            "joints": [{ "number": 1, "location": { "x": 24.95, "y": 60.18 } }],
            "srid": 4326,
            "linked_tracks": [1]
        }]
    }"#;
    let scenario: LayoutScenario = serde_json::from_str(json).expect("scenario");
    let layout = InMemoryLayout::from_scenario(scenario);
    let transform = TangentPlaneTransform::default();
    let config = LinkingConfig::default();
    let service = SwitchLinkingService::new(&layout, &transform, &config);

    let failure = service.fit_plan_switch(PlanSwitchId(1)).err();
    assert_eq!(failure, Some(FittingFailure::LessThanTwoJoints));
    assert_eq!(
        failure.map(|f| f.reason()),
        Some(FittingFailureReason::LessThanTwoJoints)
    );
}

#[test]
fn test_near_miss_beyond_two_best_does_not_seed() {
    // A runs along the x axis, B and C cross it at x 0.5 and 5.5, D stops 0.3 m short of it
    let a = straight_track(coord! { x: -30.0, y: 0.0 }, coord! { x: 30.0, y: 0.0 }, 60);
    let b = straight_track(coord! { x: 0.5, y: -20.5 }, coord! { x: 0.5, y: 19.5 }, 40);
    let c = straight_track(coord! { x: 5.5, y: -20.5 }, coord! { x: 5.5, y: 19.5 }, 40);
    let d = straight_track(coord! { x: -5.0, y: 0.3 }, coord! { x: -5.0, y: 20.3 }, 20);
    let tracks = vec![
        crop_nothing(TrackId(1), &a),
        crop_nothing(TrackId(2), &b),
        crop_nothing(TrackId(3), &c),
        crop_nothing(TrackId(4), &d),
    ];
    let all = find_all_intersections(&tracks, &LinkingConfig::default());
    assert!(
        all.iter()
            .any(|i| i.point.x < -4.0 && (i.distance - 0.3).abs() < 1e-9),
        "the near miss is found"
    );

    let point = coord! { x: 1.0, y: 0.0 };
    let seeds = seed_intersections(&tracks, &all, point, &BoundingBox::centered_at(point, 20.0));
    let genuine = |x: f64| {
        seeds
            .iter()
            .any(|s| s.distance == 0.0 && line_length(s.point, coord! { x: x, y: 0.0 }) < 1e-9)
    };
    assert!(genuine(0.5));
    assert!(genuine(5.5));
    assert!(seeds.iter().all(|s| s.point.x > -4.0), "{:?}", seeds);
}

#[test]
fn test_grid_suggestion_reports_relevant_tracks() {
    let layout = yv_in_memory();
    let transform = TangentPlaneTransform::default();
    let config = LinkingConfig::default();
    let service = SwitchLinkingService::new(&layout, &transform, &config);

    let grid = SamplingGrid::new(vec![coord! { x: 0.5, y: 0.2 }, coord! { x: 500.0, y: 500.0 }]);
    let results = service
        .suggest_switches_at_grid(&grid, new_switch_target())
        .expect("layout lookups");
    assert_eq!(results.len(), 2);
    let found = results.get(0).expect("suggestion at the branch point");
    assert_eq!(
        found.relevant_tracks.keys().copied().collect::<Vec<_>>(),
        vec![THROUGH_TRACK, BRANCH_TRACK]
    );
    assert!(results.get(1).is_none());
}
