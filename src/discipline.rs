use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::events::Event;
use crate::zones::{Channel, Third, ZoneGrid};

const YELLOW: &str = "Yellow Card";
const SECOND_YELLOW: &str = "Second Yellow";
const RED: &str = "Red Card";
const MAX_MINUTES: f64 = 120.0;

/// How a second yellow is tallied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardTreatment {
    /// Counts once as a yellow and once as a red.
    #[default]
    Separate,
    /// Counts as a red only.
    RedOnly,
}

impl CardTreatment {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "separate" => Some(CardTreatment::Separate),
            "red_only" | "red" => Some(CardTreatment::RedOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposureMetric {
    #[default]
    OppPasses,
    Minutes,
}

impl ExposureMetric {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "opp_passes" | "opponent_passes" => Some(ExposureMetric::OppPasses),
            "minutes" => Some(ExposureMetric::Minutes),
            _ => None,
        }
    }
}

/// Observation opportunity for a team-match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Exposure {
    /// Opponent passes, floored at 1.
    pub opp_passes: f64,
    /// Minutes played, in [1, 120].
    pub minutes: f64,
}

impl Exposure {
    pub fn value(&self, metric: ExposureMetric) -> f64 {
        match metric {
            ExposureMetric::OppPasses => self.opp_passes,
            ExposureMetric::Minutes => self.minutes,
        }
    }

    pub fn log_offset(&self, metric: ExposureMetric) -> f64 {
        self.value(metric).max(1.0).ln()
    }
}

pub fn compute_exposure(events: &[Event], team: &str) -> Exposure {
    let opp_passes = events
        .iter()
        .filter(|e| e.is_pass() && e.team_name().is_some_and(|t| t != team))
        .count();
    let last_minute = events.iter().map(|e| e.minute).max().unwrap_or(0);
    Exposure {
        opp_passes: (opp_passes as f64).max(1.0),
        minutes: (last_minute as f64).clamp(1.0, MAX_MINUTES),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneDisciplineRecord {
    pub match_id: u64,
    pub team: String,
    pub zone_id: usize,
    pub fouls: u32,
    pub yellow_cards: u32,
    pub red_cards: u32,
    pub exposure: Exposure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMatchDiscipline {
    pub match_id: u64,
    pub team: String,
    /// One record per zone, ordered by zone id.
    pub records: Vec<ZoneDisciplineRecord>,
    /// Located fouls; equals the sum over `records`.
    pub total_fouls: u32,
    /// Foul events dropped for lacking a location.
    pub discarded_fouls: u32,
    pub yellow_cards: u32,
    pub red_cards: u32,
    pub fouls_per_opp_pass: f64,
    pub third_shares: BTreeMap<String, f64>,
    pub channel_shares: BTreeMap<String, f64>,
}

/// Assigns each of `team`'s foul and bad-behaviour events to a zone.
pub fn extract_zone_discipline(
    events: &[Event],
    match_id: u64,
    team: &str,
    grid: &ZoneGrid,
    treatment: CardTreatment,
) -> TeamMatchDiscipline {
    let exposure = compute_exposure(events, team);
    let mut records: Vec<ZoneDisciplineRecord> = grid
        .zones()
        .iter()
        .map(|z| ZoneDisciplineRecord {
            match_id,
            team: team.to_string(),
            zone_id: z.id,
            fouls: 0,
            yellow_cards: 0,
            red_cards: 0,
            exposure,
        })
        .collect();

    let mut discarded = 0u32;
    let mut by_third: BTreeMap<String, u32> = BTreeMap::new();
    let mut by_channel: BTreeMap<String, u32> = BTreeMap::new();
    for ev in events.iter().filter(|e| e.is_foul() && e.is_by(team)) {
        let Some((x, y)) = ev.xy() else {
            discarded += 1;
            warn!(
                match_id,
                team,
                event_index = ev.index,
                kind = ev.type_name(),
                "foul discarded: missing location"
            );
            continue;
        };
        let zone_id = grid.zone_of(x, y);
        let Some(rec) = records.get_mut(zone_id) else {
            continue;
        };
        rec.fouls += 1;
        let (yellow, red) = card_counts(ev.card_name(), treatment);
        rec.yellow_cards += yellow;
        rec.red_cards += red;
        if let Some(zone) = grid.zone(zone_id) {
            *by_third.entry(zone.third.label().to_string()).or_default() += 1;
            *by_channel.entry(zone.channel.label().to_string()).or_default() += 1;
        }
    }

    let total_fouls: u32 = records.iter().map(|r| r.fouls).sum();
    let shares = |counts: BTreeMap<String, u32>, labels: &[&str]| {
        labels
            .iter()
            .map(|label| {
                let n = counts.get(*label).copied().unwrap_or(0);
                let share = if total_fouls > 0 {
                    n as f64 / total_fouls as f64
                } else {
                    0.0
                };
                (label.to_string(), share)
            })
            .collect::<BTreeMap<_, _>>()
    };
    let third_labels = [Third::Defensive, Third::Middle, Third::Attacking].map(Third::label);
    let channel_labels = [Channel::Left, Channel::Central, Channel::Right].map(Channel::label);

    TeamMatchDiscipline {
        match_id,
        team: team.to_string(),
        total_fouls,
        discarded_fouls: discarded,
        yellow_cards: records.iter().map(|r| r.yellow_cards).sum(),
        red_cards: records.iter().map(|r| r.red_cards).sum(),
        fouls_per_opp_pass: total_fouls as f64 / exposure.opp_passes,
        third_shares: shares(by_third, &third_labels),
        channel_shares: shares(by_channel, &channel_labels),
        records,
    }
}

fn card_counts(card: Option<&str>, treatment: CardTreatment) -> (u32, u32) {
    match (card, treatment) {
        (Some(YELLOW), _) => (1, 0),
        (Some(RED), _) => (0, 1),
        (Some(SECOND_YELLOW), CardTreatment::Separate) => (1, 1),
        (Some(SECOND_YELLOW), CardTreatment::RedOnly) => (0, 1),
        _ => (0, 0),
    }
}
