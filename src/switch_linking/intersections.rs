use crate::switch_linking::config::LinkingConfig;
use crate::switch_linking::cropping::CroppedAlignment;
use crate::switch_linking::geometry::{
    BoundingBox, angle_diff_rads, direction_between_points, line_length, point_distance_to_line,
};
use geo::algorithm::line_intersection::{LineIntersection, line_intersection};
use geo::{Coord, Line};
use ordered_float::OrderedFloat;

/// A place where two tracks cross or nearly touch. `track_a` and `track_b` index the
/// track list the intersection was computed from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackIntersection {
    pub point: Coord<f64>,
    /// 0.0 for a true crossing, otherwise the near miss distance
    pub distance: f64,
    pub track_a: usize,
    pub track_b: usize,
}

struct LineChunk {
    bbox: BoundingBox,
    lines: Vec<(Coord<f64>, Coord<f64>)>,
}

fn chunk_lines(alignment: &CroppedAlignment, chunk_size: usize) -> Vec<LineChunk> {
    let lines: Vec<_> = alignment.lines().collect();
    lines
        .chunks(chunk_size.max(1))
        .filter_map(|chunk| {
            let bbox = BoundingBox::from_points(chunk.iter().flat_map(|(a, b)| [*a, *b]))?;
            Some(LineChunk {
                bbox,
                lines: chunk.to_vec(),
            })
        })
        .collect()
}

fn start_end_direction(alignment: &CroppedAlignment) -> Option<f64> {
    Some(direction_between_points(
        alignment.start_point()?,
        alignment.end_point()?,
    ))
}

/// Exact crossing of two lines, or the closest end-point-to-line approach within `max_distance`.
fn intersect_lines(
    a: (Coord<f64>, Coord<f64>),
    b: (Coord<f64>, Coord<f64>),
    max_distance: f64,
) -> Option<(Coord<f64>, f64)> {
    if let Some(LineIntersection::SinglePoint { intersection, .. }) =
        line_intersection(Line::new(a.0, a.1), Line::new(b.0, b.1))
    {
        return Some((intersection, 0.0));
    }
    [(a, b.0), (a, b.1), (b, a.0), (b, a.1)]
        .into_iter()
        .map(|((start, end), point)| (point, point_distance_to_line(start, end, point)))
        .min_by(|x, y| x.1.total_cmp(&y.1))
        .filter(|(_, distance)| *distance <= max_distance)
}

/// All crossings and near misses between two tracks. Tracks running in nearly the same
/// direction are treated as parallel and yield nothing.
pub fn find_intersections(
    tracks: &[CroppedAlignment],
    track_a: usize,
    track_b: usize,
    config: &LinkingConfig,
) -> Vec<TrackIntersection> {
    let (a, b) = (&tracks[track_a], &tracks[track_b]);
    let direction_diff = match (start_end_direction(a), start_end_direction(b)) {
        (Some(da), Some(db)) => angle_diff_rads(da, db).to_degrees(),
        _ => return Vec::new(),
    };
    if direction_diff < config.max_parallel_angle_degrees {
        return Vec::new();
    }

    let max_distance = config.max_line_intersection_distance;
    let chunks_a = chunk_lines(a, config.intersection_chunk_size);
    let chunks_b = chunk_lines(b, config.intersection_chunk_size);

    let mut intersections = Vec::new();
    for chunk_a in &chunks_a {
        for chunk_b in chunks_b
            .iter()
            .filter(|c| chunk_a.bbox.distance_to(&c.bbox) <= max_distance)
        {
            for line_a in &chunk_a.lines {
                for line_b in &chunk_b.lines {
                    if let Some((point, distance)) = intersect_lines(*line_a, *line_b, max_distance)
                    {
                        intersections.push(TrackIntersection {
                            point,
                            distance,
                            track_a,
                            track_b,
                        });
                    }
                }
            }
        }
    }
    intersections
}

/// Intersections of every unordered track pair.
pub fn find_all_intersections(
    tracks: &[CroppedAlignment],
    config: &LinkingConfig,
) -> Vec<TrackIntersection> {
    track_pairs(tracks.len())
        .flat_map(|(a, b)| find_intersections(tracks, a, b, config))
        .collect()
}

pub fn track_pairs(count: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..count).flat_map(move |a| (a + 1..count).map(move |b| (a, b)))
}

/// Closest point of either track to `desired`, presented as an intersection of the pair.
pub fn closest_point_as_intersection(
    tracks: &[CroppedAlignment],
    track_a: usize,
    track_b: usize,
    desired: Coord<f64>,
) -> Option<TrackIntersection> {
    [track_a, track_b]
        .into_iter()
        .filter_map(|i| tracks[i].closest_point(desired))
        .map(|p| p.point)
        .min_by(|p, q| line_length(*p, desired).total_cmp(&line_length(*q, desired)))
        .map(|point| TrackIntersection {
            point,
            distance: 0.0,
            track_a,
            track_b,
        })
}

/// Residual distance first, then proximity to `desired`
fn point_key(
    intersection: &TrackIntersection,
    desired: Coord<f64>,
) -> (OrderedFloat<f64>, OrderedFloat<f64>) {
    (
        OrderedFloat(intersection.distance),
        OrderedFloat(line_length(intersection.point, desired)),
    )
}

/// The `count` best intersections for `desired`.
pub fn closest_intersections(
    intersections: &[TrackIntersection],
    desired: Coord<f64>,
    count: usize,
) -> Vec<TrackIntersection> {
    let mut sorted = intersections.to_vec();
    sorted.sort_by_cached_key(|i| point_key(i, desired));
    sorted.truncate(count);
    sorted
}
