use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use rayon::prelude::*;
use tracing::{info, warn};

use zone_discipline::config::EngineConfig;
use zone_discipline::dataset::{MatchBundle, build_dataset};
use zone_discipline::dataset_store::{open_db, save_dataset};
use zone_discipline::statsbomb;

fn main() -> Result<()> {
    zone_discipline::init_tracing();
    let config = EngineConfig::load();

    if has_flag("--list") {
        for c in statsbomb::fetch_competitions()? {
            println!(
                "{:>4} {:>4}  {} {}",
                c.competition_id, c.season_id, c.competition_name, c.season_name
            );
        }
        return Ok(());
    }

    let pairs = parse_competition_seasons();
    if pairs.is_empty() {
        return Err(anyhow!(
            "usage: build_dataset --list | --competition <id> --season <id> [--competition .. --season ..] [--db <path>] [--limit <n>]"
        ));
    }
    let db_path = parse_value_arg("--db")
        .map(PathBuf::from)
        .or_else(|| config.db_path.clone())
        .context("unable to resolve sqlite path")?;
    let limit = parse_value_arg("--limit").and_then(|v| v.parse::<usize>().ok());

    let mut infos = Vec::new();
    for (competition_id, season_id) in &pairs {
        let matches = statsbomb::fetch_matches(*competition_id, *season_id)
            .with_context(|| format!("fetch matches {competition_id}/{season_id}"))?;
        info!(competition_id, season_id, matches = matches.len(), "match list loaded");
        infos.extend(matches);
    }
    if let Some(n) = limit {
        infos.truncate(n);
    }

    let bundles: Vec<MatchBundle> = infos
        .into_par_iter()
        .filter_map(|info| match statsbomb::fetch_events(info.match_id) {
            Ok(events) => Some(MatchBundle { info, events }),
            Err(err) => {
                warn!(match_id = info.match_id, error = %err, "events unavailable, match skipped");
                None
            }
        })
        .collect();

    let (dataset, summary) = build_dataset(&bundles, &config.grid, config.card_treatment);
    let mut conn = open_db(&db_path)?;
    save_dataset(&mut conn, &dataset)?;

    let overview = dataset.summary();
    println!("Dataset build complete");
    println!("DB: {}", db_path.display());
    println!(
        "Matches: {} seen, {} team-matches built, {} skipped",
        summary.matches_seen,
        summary.team_matches_built,
        summary.skipped.len()
    );
    println!(
        "Fouls: {} located, {} discarded without location",
        summary.located_fouls, summary.discarded_fouls
    );
    println!(
        "Referees: {}  mean fouls per team-match: {:.2}",
        overview.referees, overview.mean_fouls_per_team_match
    );
    println!("Norms: {}", overview.norms_version);
    for reason in summary.skipped.iter().take(8) {
        println!(" - {reason}");
    }
    Ok(())
}

fn parse_competition_seasons() -> Vec<(u64, u64)> {
    let competitions = parse_all_values("--competition");
    let seasons = parse_all_values("--season");
    competitions
        .iter()
        .zip(seasons.iter())
        .filter_map(|(c, s)| Some((c.parse().ok()?, s.parse().ok()?)))
        .collect()
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}

fn parse_all_values(name: &str) -> Vec<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{name}=");
    let mut out = Vec::new();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(v) = arg.strip_prefix(&prefix)
            && !v.trim().is_empty()
        {
            out.push(v.trim().to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            out.push(next.trim().to_string());
        }
    }
    out
}

fn parse_value_arg(name: &str) -> Option<String> {
    parse_all_values(name).into_iter().next()
}
