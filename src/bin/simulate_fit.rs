use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use zone_discipline::config::EngineConfig;
use zone_discipline::modeler::{Term, ZoneModelSet, fit};
use zone_discipline::synthetic::{LeagueSpec, LeagueTruth, generate};

#[derive(Debug, Serialize)]
struct FeatureRecovery {
    truth: f64,
    mean_estimate: f64,
    zones_covering_truth: usize,
    zones: usize,
}

#[derive(Debug, Serialize)]
struct RecoveryReport {
    seed: u64,
    teams: usize,
    seasons: usize,
    team_matches: usize,
    zones_fitted: usize,
    features: BTreeMap<String, FeatureRecovery>,
    referee_effect_correlation: Option<f64>,
    directness_slope_correlation: Option<f64>,
}

fn main() -> Result<()> {
    zone_discipline::init_tracing();
    let config = EngineConfig::load();

    let mut spec = LeagueSpec::default();
    if let Some(seed) = parse_value_arg("--seed").and_then(|v| v.parse().ok()) {
        spec.seed = seed;
    }
    if let Some(teams) = parse_value_arg("--teams").and_then(|v| v.parse().ok()) {
        spec.teams = teams;
    }
    if let Some(seasons) = parse_value_arg("--seasons").and_then(|v| v.parse().ok()) {
        spec.seasons = seasons;
    }
    if has_flag("--double-round") {
        spec.rounds = 2;
    }

    let (dataset, truth) = generate(&spec);
    let set = fit(&dataset, &config.fit)?;
    let report = recovery_report(&spec, dataset.team_matches.len(), &set, &truth);

    println!("Synthetic league: seed={} teams={} seasons={}", spec.seed, spec.teams, spec.seasons);
    println!("Team-matches: {}  zones fitted: {}", report.team_matches, report.zones_fitted);
    for (name, f) in &report.features {
        println!(
            "  z_{name:<18} truth={:+.3} mean={:+.3} covered {}/{}",
            f.truth, f.mean_estimate, f.zones_covering_truth, f.zones
        );
    }
    if let Some(r) = report.referee_effect_correlation {
        println!("Referee effect correlation: {r:.3}");
    }
    if let Some(r) = report.directness_slope_correlation {
        println!("Referee directness slope correlation: {r:.3}");
    }

    if let Some(out) = parse_value_arg("--out").map(PathBuf::from) {
        let json = serde_json::to_string_pretty(&report).context("serialize recovery report")?;
        fs::write(&out, json).with_context(|| format!("write {}", out.display()))?;
        println!("Report: {}", out.display());
    }
    Ok(())
}

fn recovery_report(
    spec: &LeagueSpec,
    team_matches: usize,
    set: &ZoneModelSet,
    truth: &LeagueTruth,
) -> RecoveryReport {
    let fitted: Vec<_> = set.available().collect();
    let mut features = BTreeMap::new();
    for (name, beta) in &truth.feature_effects {
        let term = Term::Feature {
            feature: name.clone(),
        };
        let stats: Vec<_> = fitted
            .iter()
            .filter_map(|m| m.coefficient(&term).map(|c| c.stat))
            .collect();
        if stats.is_empty() {
            continue;
        }
        features.insert(
            name.clone(),
            FeatureRecovery {
                truth: *beta,
                mean_estimate: stats.iter().map(|s| s.estimate).sum::<f64>() / stats.len() as f64,
                zones_covering_truth: stats
                    .iter()
                    .filter(|s| s.ci_lower <= *beta && *beta <= s.ci_upper)
                    .count(),
                zones: stats.len(),
            },
        );
    }

    // Mean estimated deviation per referee across zones, paired with truth.
    let mut effect_pairs = Vec::new();
    let mut slope_pairs = Vec::new();
    for entry in set.referees.entries() {
        let mean_of = |term: Term| {
            let vals: Vec<f64> = fitted
                .iter()
                .filter_map(|m| m.coefficient(&term).map(|c| c.stat.estimate))
                .collect();
            (!vals.is_empty()).then(|| vals.iter().sum::<f64>() / vals.len() as f64)
        };
        if let (Some(est), Some(t)) = (
            mean_of(Term::Referee { referee: entry.id }),
            truth.referee_effects.get(&entry.name),
        ) {
            effect_pairs.push((est, *t));
        }
        if let (Some(est), Some(t)) = (
            mean_of(Term::RefereeSlope {
                referee: entry.id,
                feature: "directness".to_string(),
            }),
            truth.referee_directness_slopes.get(&entry.name),
        ) {
            slope_pairs.push((est, *t));
        }
    }

    RecoveryReport {
        seed: spec.seed,
        teams: spec.teams,
        seasons: spec.seasons,
        team_matches,
        zones_fitted: fitted.len(),
        features,
        referee_effect_correlation: correlation(&effect_pairs),
        directness_slope_correlation: correlation(&slope_pairs),
    }
}

fn correlation(pairs: &[(f64, f64)]) -> Option<f64> {
    let n = pairs.len() as f64;
    if pairs.len() < 3 {
        return None;
    }
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (x, y) in pairs {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx).powi(2);
        syy += (y - my).powi(2);
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    Some(sxy / (sxx * syy).sqrt())
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}

fn parse_value_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(v) = arg.strip_prefix(&prefix)
            && !v.trim().is_empty()
        {
            return Some(v.trim().to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}
