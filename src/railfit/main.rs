// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use anyhow::{Context, Result};
use clap::Parser;
use geo::{Coord, coord};
use log::{info, warn};
use railfit::switch_linking::config::LinkingConfig;
use railfit::switch_linking::coord_transform::{CoordinateTransform, TangentPlaneTransform};
use railfit::switch_linking::error::FittingFailureReason;
use railfit::switch_linking::grid_search::SamplingGrid;
use railfit::switch_linking::layout_source::{InMemoryLayout, LayoutScenario, TrackRecord};
use railfit::switch_linking::matching::SuggestedSwitch;
use railfit::switch_linking::model::{
    LAYOUT_SRID, LayoutSwitch, PlanSwitchId, StructureId, SwitchId, TrackId, WGS_84_SRID,
};
use railfit::switch_linking::relinking::TrackSwitchRelinkingResult;
use railfit::switch_linking::scheduling::Scheduling;
use railfit::switch_linking::service::{LinkingResult, SuggestionTarget, SwitchLinkingService};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Layout scenario JSON: structures, tracks, switches and plan switches
    #[arg(long, env = "RAILFIT_LAYOUT")]
    layout: PathBuf,

    /// Linking tolerances as JSON, missing fields keep their defaults
    #[arg(long, env = "RAILFIT_CONFIG")]
    config: Option<PathBuf>,

    /// Run grid points one after another instead of on the rayon pool
    #[arg(long, default_value_t = false)]
    sequential: bool,

    /// Points are given as WGS84 longitude,latitude
    #[arg(long, default_value_t = false)]
    wgs84: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Suggest a switch at one or more points
    Suggest {
        /// Search point as x,y. Repeat to search a grid
        #[arg(long = "point", required = true, value_parser = parse_point)]
        points: Vec<Coord<f64>>,
        /// Refit an existing switch, keeping its structure
        #[arg(long, conflicts_with = "structure_id", required_unless_present = "structure_id")]
        switch_id: Option<i64>,
        /// Structure of a new switch
        #[arg(long)]
        structure_id: Option<i64>,
        /// Link the first suggestion found as this switch
        #[arg(long)]
        link_as: Option<i64>,
    },
    /// Fit a switch from an imported plan onto the layout tracks
    FitPlanSwitch {
        #[arg(long)]
        id: i64,
    },
    /// Relink every switch on or next to a track
    RelinkTrack {
        #[arg(long)]
        track_id: i64,
        /// Only report what relinking would break
        #[arg(long, default_value_t = false)]
        validate: bool,
    },
}

fn parse_point(s: &str) -> Result<Coord<f64>, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got '{}'", s))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<f64>()
            .map_err(|e| format!("bad coordinate '{}': {}", v, e))
    };
    Ok(coord! { x: parse(x)?, y: parse(y)? })
}

#[derive(Serialize)]
struct PointSuggestion {
    point: Coord<f64>,
    suggestion: Option<SuggestedSwitch>,
}

#[derive(Serialize)]
struct SuggestOutput {
    suggestions: Vec<PointSuggestion>,
    linked: Option<LinkingResult>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum PlanFitOutput {
    Fitted(SuggestedSwitch),
    Failed {
        failure: FittingFailureReason,
        message: String,
    },
}

#[derive(Serialize)]
struct RelinkOutput {
    results: Vec<TrackSwitchRelinkingResult>,
    switches: Vec<LayoutSwitch>,
    changed_tracks: Vec<TrackRecord>,
}

fn load_scenario(path: &Path) -> Result<LayoutScenario> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading layout {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing layout {}", path.display()))
}

fn print_json<S: Serialize>(value: &S) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => LinkingConfig::from_json_file(path)?,
        None => LinkingConfig::default(),
    };
    if args.sequential {
        config = config.with_scheduling(Scheduling::Sequential);
    }

    let start = Instant::now();
    let scenario = load_scenario(&args.layout)?;
    info!(
        "Loaded {} structures, {} tracks, {} switches, {} plan switches in {:?}",
        scenario.structures.len(),
        scenario.tracks.len(),
        scenario.switches.len(),
        scenario.plan_switches.len(),
        start.elapsed()
    );
    let layout = InMemoryLayout::from_scenario(scenario);
    let transform = TangentPlaneTransform::default();
    let service = SwitchLinkingService::new(&layout, &transform, &config);

    match args.cmd {
        Command::Suggest {
            points,
            switch_id,
            structure_id,
            link_as,
        } => {
            let points = if args.wgs84 {
                points
                    .into_iter()
                    .map(|p| transform.transform(p, WGS_84_SRID, LAYOUT_SRID))
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                points
            };
            let target = match (switch_id, structure_id) {
                (Some(id), _) => SuggestionTarget::Switch(SwitchId(id)),
                (None, Some(id)) => SuggestionTarget::Structure(StructureId(id)),
                (None, None) => anyhow::bail!("either --switch-id or --structure-id is needed"),
            };

            let start = Instant::now();
            let results = service.suggest_switches_at_grid(&SamplingGrid::new(points), target)?;
            info!(
                "Searched {} points in {:?}",
                results.len(),
                start.elapsed()
            );

            let suggestions: Vec<PointSuggestion> = results
                .iter()
                .map(|(point, found)| PointSuggestion {
                    point,
                    suggestion: found.map(|s| s.suggested.clone()),
                })
                .collect();
            let linked = match (link_as, suggestions.iter().find_map(|s| s.suggestion.as_ref())) {
                (Some(id), Some(suggested)) => Some(service.link_switch(suggested, SwitchId(id))?),
                (Some(id), None) => {
                    warn!("Nothing found to link as switch {}", id);
                    None
                }
                (None, _) => None,
            };
            print_json(&SuggestOutput {
                suggestions,
                linked,
            })?;
        }
        Command::FitPlanSwitch { id } => {
            let output = match service.suggest_plan_switch(PlanSwitchId(id)) {
                Ok(suggested) => PlanFitOutput::Fitted(suggested),
                Err(failure) => PlanFitOutput::Failed {
                    failure: failure.reason(),
                    message: failure.to_string(),
                },
            };
            print_json(&output)?;
        }
        Command::RelinkTrack { track_id, validate } => {
            if validate {
                print_json(&service.validate_relinking_track(TrackId(track_id))?)?;
            } else {
                let relinking = service.relink_track(TrackId(track_id))?;
                print_json(&RelinkOutput {
                    results: relinking.results,
                    switches: relinking.switches,
                    changed_tracks: relinking
                        .changed_tracks
                        .into_values()
                        .map(TrackRecord::from)
                        .collect(),
                })?;
            }
        }
    }

    Ok(())
}
