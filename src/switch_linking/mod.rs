// Switch fitting and linking: places catalog switch structures onto track geometry and
// rewrites the track segments to carry the links.

pub mod config;
pub mod coord_transform;
pub mod cropping;
pub mod error;
pub mod fitting;
pub mod geometry;
pub mod grid_search;
pub mod intersections;
pub mod layout_source;
pub mod linking;
pub mod matching;
pub mod model;
pub mod relinking;
pub mod scheduling;
pub mod service;
pub mod structure;

#[cfg(test)]
mod scenario_tests;
#[cfg(test)]
mod test_data;
