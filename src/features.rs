use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::events::{Event, FROM_COUNTER, MatchInfo, SHOT};
use crate::zones::{Channel, PITCH_LENGTH, Third};

/// Passes at or beyond this length count as long.
const LONG_PASS_LENGTH: f64 = 30.0;
/// Opponent passes inside their own first two-thirds are the ones a press
/// is trying to prevent.
const PRESS_ZONE_OPP_MAX_X: f64 = PITCH_LENGTH * 2.0 / 3.0;
/// Same region seen from the pressing team's frame.
const PRESS_ZONE_OWN_MIN_X: f64 = PITCH_LENGTH - PRESS_ZONE_OPP_MAX_X;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureCategory {
    Playstyle,
    Discipline,
    Spatial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureSpec {
    pub name: &'static str,
    pub category: FeatureCategory,
    pub description: &'static str,
}

const fn playstyle(name: &'static str, description: &'static str) -> FeatureSpec {
    FeatureSpec {
        name,
        category: FeatureCategory::Playstyle,
        description,
    }
}

pub const PLAYSTYLE_FEATURES: &[FeatureSpec] = &[
    playstyle("ppda", "Passes per defensive action (lower = more intense pressing)"),
    playstyle("block_height_x", "Average x position of defensive actions"),
    playstyle("def_share_def_third", "Share of defensive actions in own third"),
    playstyle("def_share_mid_third", "Share of defensive actions in middle third"),
    playstyle("def_share_att_third", "Share of defensive actions in attacking third"),
    playstyle("possession_share", "Team share of all passes in the match"),
    playstyle("passes_per_possession", "Average passes per team possession"),
    playstyle("avg_pass_length", "Mean pass length"),
    playstyle("long_pass_share", "Share of passes of 30 units or longer"),
    playstyle("forward_pass_share", "Share of passes that gain ground"),
    playstyle("directness", "Forward progress per unit of pass distance, per possession"),
    playstyle("left_share", "Share of passes started in the left channel"),
    playstyle("center_share", "Share of passes started in the central channel"),
    playstyle("right_share", "Share of passes started in the right channel"),
    playstyle("wing_share", "Share of passes started in either wide channel"),
    playstyle("cross_share", "Share of passes that are crosses"),
    playstyle("through_ball_share", "Share of passes that are through balls"),
    playstyle("counter_rate", "Share of possessions started from a counter"),
    playstyle("xg_mean", "Mean expected goals per shot"),
    playstyle("passes_to_shot", "Passes per shot"),
];

pub const DISCIPLINE_FEATURES: &[FeatureSpec] = &[
    FeatureSpec {
        name: "fouls_committed",
        category: FeatureCategory::Discipline,
        description: "Fouls committed (Foul Committed and Bad Behaviour events)",
    },
    FeatureSpec {
        name: "yellow_cards",
        category: FeatureCategory::Discipline,
        description: "Yellow cards received",
    },
    FeatureSpec {
        name: "red_cards",
        category: FeatureCategory::Discipline,
        description: "Red cards received, including second yellows",
    },
    FeatureSpec {
        name: "fouls_per_opp_pass",
        category: FeatureCategory::Discipline,
        description: "Fouls committed per opponent pass",
    },
];

pub const SPATIAL_FEATURES: &[FeatureSpec] = &[
    FeatureSpec {
        name: "foul_grid",
        category: FeatureCategory::Spatial,
        description: "Foul counts per pitch zone",
    },
    FeatureSpec {
        name: "foul_share_by_third",
        category: FeatureCategory::Spatial,
        description: "Share of located fouls per pitch third",
    },
    FeatureSpec {
        name: "foul_share_by_channel",
        category: FeatureCategory::Spatial,
        description: "Share of located fouls per pitch channel",
    },
];

/// Feature names grouped by category, each mapped to its description.
pub fn feature_catalog() -> BTreeMap<FeatureCategory, BTreeMap<&'static str, &'static str>> {
    let mut out: BTreeMap<FeatureCategory, BTreeMap<&'static str, &'static str>> = BTreeMap::new();
    for spec in PLAYSTYLE_FEATURES
        .iter()
        .chain(DISCIPLINE_FEATURES)
        .chain(SPATIAL_FEATURES)
    {
        out.entry(spec.category)
            .or_default()
            .insert(spec.name, spec.description);
    }
    out
}

pub fn is_playstyle_feature(name: &str) -> bool {
    PLAYSTYLE_FEATURES.iter().any(|f| f.name == name)
}

/// Unstandardized playstyle values for one team in one match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTeamMatchFeatures {
    pub match_id: u64,
    pub team: String,
    pub opponent: String,
    pub referee: Option<String>,
    pub home: bool,
    pub competition_id: Option<u64>,
    pub season_id: Option<u64>,
    /// Optional features (shot based) are absent when the team had no shots.
    pub values: BTreeMap<String, f64>,
}

impl RawTeamMatchFeatures {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// Computes playstyle scalars for `team`. Fails rather than defaulting when
/// an input needed by a core feature is missing from the event stream.
pub fn extract_team_match_features(
    events: &[Event],
    info: &MatchInfo,
    team: &str,
) -> Result<RawTeamMatchFeatures, EngineError> {
    let incomplete = |reason: &str| EngineError::data_incomplete(info.match_id, team, reason);
    let Some(opponent) = info.opponent_of(team) else {
        return Err(incomplete("team did not play in this match"));
    };

    let team_passes: Vec<&Event> = events.iter().filter(|e| e.is_pass() && e.is_by(team)).collect();
    let opp_passes: Vec<&Event> = events
        .iter()
        .filter(|e| e.is_pass() && e.is_by(opponent))
        .collect();
    if team_passes.is_empty() {
        return Err(incomplete("no passes by team"));
    }
    if opp_passes.is_empty() {
        return Err(incomplete("no opponent passes"));
    }

    let def_actions: Vec<&Event> = events
        .iter()
        .filter(|e| e.is_defensive_action() && e.is_by(team))
        .collect();
    if def_actions.is_empty() {
        return Err(incomplete("no pressure or defensive action events"));
    }

    let mut values = BTreeMap::new();

    // Pressing.
    let press_passes = opp_passes
        .iter()
        .filter(|e| e.xy().is_some_and(|(x, _)| x < PRESS_ZONE_OPP_MAX_X))
        .count();
    let press_actions = def_actions
        .iter()
        .filter(|e| e.xy().is_some_and(|(x, _)| x >= PRESS_ZONE_OWN_MIN_X))
        .count();
    if press_actions == 0 {
        return Err(incomplete("no located defensive actions in pressing zone"));
    }
    values.insert("ppda".into(), press_passes as f64 / press_actions as f64);

    let located_def: Vec<f64> = def_actions
        .iter()
        .filter_map(|e| e.xy())
        .map(|(x, _)| x.clamp(0.0, PITCH_LENGTH))
        .collect();
    let n_def = located_def.len() as f64;
    values.insert(
        "block_height_x".into(),
        located_def.iter().sum::<f64>() / n_def,
    );
    for (name, third) in [
        ("def_share_def_third", Third::Defensive),
        ("def_share_mid_third", Third::Middle),
        ("def_share_att_third", Third::Attacking),
    ] {
        let n = located_def.iter().filter(|x| Third::of_x(**x) == third).count();
        values.insert(name.into(), n as f64 / n_def);
    }

    // Possession.
    let n_team = team_passes.len() as f64;
    values.insert(
        "possession_share".into(),
        n_team / (n_team + opp_passes.len() as f64),
    );

    let mut possession_pattern: HashMap<u32, Option<&str>> = HashMap::new();
    for e in events {
        let Some(id) = e.possession else { continue };
        let owned = e.possession_team.as_ref().is_some_and(|t| t.name == team);
        if owned {
            possession_pattern.entry(id).or_insert(e.play_pattern_name());
        }
    }
    if possession_pattern.is_empty() {
        return Err(incomplete("no possession sequences for team"));
    }
    let n_poss = possession_pattern.len() as f64;
    values.insert("passes_per_possession".into(), n_team / n_poss);
    let counters = possession_pattern
        .values()
        .filter(|p| **p == Some(FROM_COUNTER))
        .count();
    values.insert("counter_rate".into(), counters as f64 / n_poss);

    // Pass geometry.
    let geometry: Vec<PassGeometry> = team_passes.iter().filter_map(|e| PassGeometry::of(e)).collect();
    if geometry.is_empty() {
        return Err(incomplete("no located passes"));
    }
    let n_geo = geometry.len() as f64;
    values.insert(
        "avg_pass_length".into(),
        geometry.iter().map(|g| g.length).sum::<f64>() / n_geo,
    );
    values.insert(
        "long_pass_share".into(),
        geometry.iter().filter(|g| g.length >= LONG_PASS_LENGTH).count() as f64 / n_geo,
    );
    values.insert(
        "forward_pass_share".into(),
        geometry.iter().filter(|g| g.gain > 0.0).count() as f64 / n_geo,
    );
    values.insert("directness".into(), directness(&geometry));

    let mut lanes = [0usize; 3];
    for g in &geometry {
        let idx = match Channel::of_y(g.start_y) {
            Channel::Left => 0,
            Channel::Central => 1,
            Channel::Right => 2,
        };
        lanes[idx] += 1;
    }
    let left = lanes[0] as f64 / n_geo;
    let right = lanes[2] as f64 / n_geo;
    values.insert("left_share".into(), left);
    values.insert("center_share".into(), lanes[1] as f64 / n_geo);
    values.insert("right_share".into(), right);
    values.insert("wing_share".into(), left + right);

    let flag_share = |pick: fn(&Event) -> bool| {
        team_passes.iter().filter(|e| pick(e)).count() as f64 / n_team
    };
    values.insert(
        "cross_share".into(),
        flag_share(|e| e.pass.as_ref().and_then(|p| p.cross).unwrap_or(false)),
    );
    values.insert(
        "through_ball_share".into(),
        flag_share(|e| e.pass.as_ref().and_then(|p| p.through_ball).unwrap_or(false)),
    );

    // Shots are optional: a team without shots simply has no shot features.
    let xgs: Vec<f64> = events
        .iter()
        .filter(|e| e.type_name() == SHOT && e.is_by(team))
        .map(|e| e.shot.as_ref().and_then(|s| s.statsbomb_xg).unwrap_or(0.0))
        .collect();
    if !xgs.is_empty() {
        values.insert(
            "xg_mean".into(),
            xgs.iter().sum::<f64>() / xgs.len() as f64,
        );
        values.insert("passes_to_shot".into(), n_team / xgs.len() as f64);
    }

    validate_ranges(&values).map_err(|reason| incomplete(&reason))?;

    Ok(RawTeamMatchFeatures {
        match_id: info.match_id,
        team: team.to_string(),
        opponent: opponent.to_string(),
        referee: info.referee.clone(),
        home: team == info.home_team,
        competition_id: info.competition_id,
        season_id: info.season_id,
        values,
    })
}

#[derive(Debug, Clone, Copy)]
struct PassGeometry {
    possession: Option<u32>,
    start_y: f64,
    length: f64,
    gain: f64,
}

impl PassGeometry {
    fn of(e: &Event) -> Option<Self> {
        let (sx, sy) = e.xy()?;
        let (ex, ey) = e.pass_end()?;
        let length = e
            .pass
            .as_ref()
            .and_then(|p| p.length)
            .filter(|l| l.is_finite())
            .unwrap_or_else(|| (ex - sx).hypot(ey - sy));
        Some(Self {
            possession: e.possession,
            start_y: sy,
            length,
            gain: ex - sx,
        })
    }
}

/// Mean over possessions (two or more passes) of forward gain per unit of
/// distance. A match whose possessions are all single passes is measured as
/// one pooled sequence.
fn directness(passes: &[PassGeometry]) -> f64 {
    let mut by_poss: BTreeMap<u32, (f64, f64, usize)> = BTreeMap::new();
    for p in passes {
        let Some(id) = p.possession else { continue };
        let slot = by_poss.entry(id).or_insert((0.0, 0.0, 0));
        slot.0 += p.gain.max(0.0);
        slot.1 += p.length;
        slot.2 += 1;
    }
    let scores: Vec<f64> = by_poss
        .values()
        .filter(|(_, dist, n)| *n >= 2 && *dist > 0.0)
        .map(|(gain, dist, _)| gain / dist)
        .collect();
    if !scores.is_empty() {
        return scores.iter().sum::<f64>() / scores.len() as f64;
    }
    let gain: f64 = passes.iter().map(|p| p.gain.max(0.0)).sum();
    let dist: f64 = passes.iter().map(|p| p.length).sum();
    if dist > 0.0 { gain / dist } else { 0.0 }
}

const SHARE_FEATURES: &[&str] = &[
    "possession_share",
    "long_pass_share",
    "forward_pass_share",
    "left_share",
    "center_share",
    "right_share",
    "wing_share",
    "cross_share",
    "through_ball_share",
    "counter_rate",
    "def_share_def_third",
    "def_share_mid_third",
    "def_share_att_third",
];

fn validate_ranges(values: &BTreeMap<String, f64>) -> Result<(), String> {
    for (name, v) in values {
        if !v.is_finite() {
            return Err(format!("{name} is not finite"));
        }
    }
    for name in SHARE_FEATURES {
        if let Some(v) = values.get(*name)
            && !(0.0..=1.0 + 1e-9).contains(v)
        {
            return Err(format!("{name}={v} outside [0, 1]"));
        }
    }
    if let Some(v) = values.get("block_height_x")
        && !(0.0..=PITCH_LENGTH).contains(v)
    {
        return Err(format!("block_height_x={v} outside [0, {PITCH_LENGTH}]"));
    }
    Ok(())
}

/// Distinct feature names across rows, sorted.
pub fn observed_feature_names(rows: &[RawTeamMatchFeatures]) -> BTreeSet<String> {
    rows.iter().flat_map(|r| r.values.keys().cloned()).collect()
}
