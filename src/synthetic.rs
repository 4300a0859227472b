//! Seeded synthetic league with known coefficients. Used to check that the
//! modeler recovers what it should and to drive benchmarks; the engine never
//! consults it when answering requests.

use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Gamma, Normal, Poisson};

use crate::dataset::Dataset;
use crate::discipline::{Exposure, ZoneDisciplineRecord};
use crate::features::RawTeamMatchFeatures;
use crate::zones::{Third, ZoneGrid};

pub const DEFAULT_REFEREES: &[&str] = &[
    "Antonio Mateu Lahoz",
    "Clément Turpin",
    "Daniele Orsato",
    "Danny Makkelie",
    "Felix Brych",
    "Anthony Taylor",
    "Szymon Marciniak",
    "Björn Kuipers",
    "Michael Oliver",
    "Carlos del Cerro Grande",
];

#[derive(Debug, Clone)]
pub struct LeagueSpec {
    pub seed: u64,
    pub teams: usize,
    pub seasons: usize,
    /// 1 = single round robin, 2 = home and away.
    pub rounds: usize,
    pub referees: Vec<String>,
    pub grid: ZoneGrid,
    /// NB2 dispersion of the generated counts.
    pub alpha: f64,
    /// Zones that never see a foul.
    pub silent_zones: Vec<usize>,
    pub feature_effects: BTreeMap<String, f64>,
    pub home_effect: f64,
    pub referee_effect_sd: f64,
    /// Per-referee deviation of the directness slope.
    pub referee_slope_sd: f64,
}

impl Default for LeagueSpec {
    fn default() -> Self {
        Self {
            seed: 7,
            teams: 20,
            seasons: 3,
            rounds: 1,
            referees: DEFAULT_REFEREES.iter().map(|s| s.to_string()).collect(),
            grid: ZoneGrid::default(),
            alpha: 0.3,
            silent_zones: Vec::new(),
            feature_effects: [
                ("ppda", -0.08),
                ("directness", 0.12),
                ("possession_share", -0.10),
                ("block_height_x", 0.05),
                ("wing_share", 0.03),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
            home_effect: -0.05,
            referee_effect_sd: 0.20,
            referee_slope_sd: 0.15,
        }
    }
}

/// Coefficients the counts were drawn from.
#[derive(Debug, Clone, PartialEq)]
pub struct LeagueTruth {
    pub zone_intercepts: Vec<f64>,
    pub feature_effects: BTreeMap<String, f64>,
    pub referee_effects: BTreeMap<String, f64>,
    pub referee_directness_slopes: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy)]
struct TeamStyle {
    ppda: f64,
    directness: f64,
    possession_share: f64,
    block_height_x: f64,
    wing_share: f64,
    counter_rate: f64,
}

pub fn generate(spec: &LeagueSpec) -> (Dataset, LeagueTruth) {
    let mut rng = ChaCha8Rng::seed_from_u64(spec.seed);
    let std_normal = |rng: &mut ChaCha8Rng| -> f64 { rng.sample(rand_distr::StandardNormal) };

    let styles: Vec<TeamStyle> = (0..spec.teams)
        .map(|_| TeamStyle {
            ppda: (10.0 + 2.5 * std_normal(&mut rng)).max(3.0),
            directness: (0.45 + 0.08 * std_normal(&mut rng)).clamp(0.05, 0.95),
            possession_share: (0.5 + 0.06 * std_normal(&mut rng)).clamp(0.25, 0.75),
            block_height_x: (45.0 + 6.0 * std_normal(&mut rng)).clamp(20.0, 80.0),
            wing_share: (0.55 + 0.06 * std_normal(&mut rng)).clamp(0.2, 0.9),
            counter_rate: (0.08 + 0.03 * std_normal(&mut rng)).clamp(0.0, 0.4),
        })
        .collect();

    let referee_effects: BTreeMap<String, f64> = spec
        .referees
        .iter()
        .map(|r| (r.clone(), spec.referee_effect_sd * std_normal(&mut rng)))
        .collect();
    let referee_directness_slopes: BTreeMap<String, f64> = spec
        .referees
        .iter()
        .map(|r| (r.clone(), spec.referee_slope_sd * std_normal(&mut rng)))
        .collect();

    let zones = spec.grid.zones();
    // Roughly 12 fouls per team-match spread over the grid, most of them in
    // the middle third and the fewest near the opponent's goal.
    let zone_intercepts: Vec<f64> = zones
        .iter()
        .map(|z| {
            let third = match z.third {
                Third::Defensive => 0.0,
                Third::Middle => 0.35,
                Third::Attacking => -0.45,
            };
            (12.0 / zones.len() as f64 / 420.0).ln() + third + 0.05 * std_normal(&mut rng)
        })
        .collect();

    let mut raw = Vec::new();
    let mut match_id = 1_000u64;
    for season in 0..spec.seasons {
        for round in 0..spec.rounds.max(1) {
            for home in 0..spec.teams {
                for away in 0..spec.teams {
                    let paired = if round % 2 == 0 { home < away } else { home > away };
                    if home == away || !paired {
                        continue;
                    }
                    match_id += 1;
                    let referee = spec.referees[rng.gen_range(0..spec.referees.len())].clone();
                    for (team, opp, is_home) in [(home, away, true), (away, home, false)] {
                        raw.push(team_row(
                            &mut rng,
                            match_id,
                            team,
                            opp,
                            is_home,
                            &styles[team],
                            &referee,
                            season,
                        ));
                    }
                }
            }
        }
    }

    let staged = Dataset::assemble(spec.grid, raw, Vec::new());
    let mut records = Vec::with_capacity(staged.team_matches.len() * zones.len());
    for tm in &staged.team_matches {
        let referee = tm.referee.clone().unwrap_or_default();
        let ref_effect = referee_effects.get(&referee).copied().unwrap_or(0.0);
        let ref_slope = referee_directness_slopes.get(&referee).copied().unwrap_or(0.0);
        let mut eta_base = ref_effect + if tm.home { spec.home_effect } else { 0.0 };
        for (feature, beta) in &spec.feature_effects {
            eta_base += beta * tm.z(feature).unwrap_or(0.0);
        }
        eta_base += ref_slope * tm.z("directness").unwrap_or(0.0);
        let exposure = Exposure {
            opp_passes: rng.gen_range(300.0..550.0_f64).round(),
            minutes: rng.gen_range(92.0..99.0_f64).round(),
        };
        for zone in &zones {
            let fouls = if spec.silent_zones.contains(&zone.id) {
                0
            } else {
                let mu = (zone_intercepts[zone.id] + eta_base + exposure.opp_passes.ln()).exp();
                draw_nb(&mut rng, mu, spec.alpha)
            };
            let yellow_cards = (0..fouls).filter(|_| rng.gen_bool(0.12)).count() as u32;
            let red_cards = (0..fouls).filter(|_| rng.gen_bool(0.01)).count() as u32;
            records.push(ZoneDisciplineRecord {
                match_id: tm.match_id,
                team: tm.team.clone(),
                zone_id: zone.id,
                fouls,
                yellow_cards,
                red_cards,
                exposure,
            });
        }
    }

    let dataset = Dataset::with_norms(spec.grid, staged.norms, staged.raw, records);
    let truth = LeagueTruth {
        zone_intercepts,
        feature_effects: spec.feature_effects.clone(),
        referee_effects,
        referee_directness_slopes,
    };
    (dataset, truth)
}

#[allow(clippy::too_many_arguments)]
fn team_row(
    rng: &mut ChaCha8Rng,
    match_id: u64,
    team: usize,
    opp: usize,
    home: bool,
    style: &TeamStyle,
    referee: &str,
    season: usize,
) -> RawTeamMatchFeatures {
    let mut jitter = |sd: f64| -> f64 {
        Normal::new(0.0, sd)
            .map(|d| d.sample(&mut *rng))
            .unwrap_or(0.0)
    };
    let values = [
        ("ppda", (style.ppda + jitter(1.5)).max(2.0)),
        ("directness", (style.directness + jitter(0.05)).clamp(0.0, 1.0)),
        (
            "possession_share",
            (style.possession_share + jitter(0.04)).clamp(0.1, 0.9),
        ),
        ("block_height_x", (style.block_height_x + jitter(4.0)).clamp(0.0, 120.0)),
        ("wing_share", (style.wing_share + jitter(0.04)).clamp(0.0, 1.0)),
        ("counter_rate", (style.counter_rate + jitter(0.02)).clamp(0.0, 1.0)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    RawTeamMatchFeatures {
        match_id,
        team: team_name(team),
        opponent: team_name(opp),
        referee: Some(referee.to_string()),
        home,
        competition_id: Some(1),
        season_id: Some(season as u64 + 1),
        values,
    }
}

pub fn team_name(idx: usize) -> String {
    format!("Team {:02}", idx + 1)
}

fn draw_nb(rng: &mut ChaCha8Rng, mu: f64, alpha: f64) -> u32 {
    let lambda = if alpha > 0.0 {
        Gamma::new(1.0 / alpha, alpha * mu)
            .map(|g| g.sample(&mut *rng))
            .unwrap_or(mu)
    } else {
        mu
    };
    Poisson::new(lambda.max(1e-12))
        .map(|p| p.sample(&mut *rng))
        .unwrap_or(0.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_league() {
        let spec = LeagueSpec {
            teams: 4,
            seasons: 1,
            ..Default::default()
        };
        let (a, _) = generate(&spec);
        let (b, _) = generate(&spec);
        assert_eq!(a.records, b.records);
        assert_eq!(a.team_matches.len(), 12);
        assert_eq!(a.records.len(), 12 * spec.grid.zone_count());
    }

    #[test]
    fn silent_zone_has_no_fouls() {
        let spec = LeagueSpec {
            teams: 4,
            seasons: 1,
            silent_zones: vec![0],
            ..Default::default()
        };
        let (ds, _) = generate(&spec);
        assert!(ds.records.iter().filter(|r| r.zone_id == 0).all(|r| r.fouls == 0));
    }
}
