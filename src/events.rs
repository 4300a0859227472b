use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Named {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: String,
}

impl Named {
    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassDetail {
    #[serde(default)]
    pub end_location: Option<Vec<f64>>,
    #[serde(default)]
    pub length: Option<f64>,
    #[serde(default)]
    pub cross: Option<bool>,
    #[serde(default)]
    pub through_ball: Option<bool>,
    #[serde(default)]
    pub outcome: Option<Named>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShotDetail {
    #[serde(default)]
    pub statsbomb_xg: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardDetail {
    #[serde(default)]
    pub card: Option<Named>,
}

/// One StatsBomb event. Coordinates are in the acting team's frame
/// (attacking towards x = 120).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub period: u8,
    #[serde(default)]
    pub minute: u32,
    #[serde(default)]
    pub second: u32,
    #[serde(rename = "type")]
    pub kind: Named,
    #[serde(default)]
    pub team: Option<Named>,
    #[serde(default)]
    pub possession: Option<u32>,
    #[serde(default)]
    pub possession_team: Option<Named>,
    #[serde(default)]
    pub play_pattern: Option<Named>,
    #[serde(default)]
    pub location: Option<Vec<f64>>,
    #[serde(default)]
    pub pass: Option<PassDetail>,
    #[serde(default)]
    pub shot: Option<ShotDetail>,
    #[serde(default)]
    pub foul_committed: Option<CardDetail>,
    #[serde(default)]
    pub bad_behaviour: Option<CardDetail>,
}

pub const PASS: &str = "Pass";
pub const SHOT: &str = "Shot";
pub const FOUL_COMMITTED: &str = "Foul Committed";
pub const BAD_BEHAVIOUR: &str = "Bad Behaviour";
pub const DEFENSIVE_ACTIONS: &[&str] = &["Pressure", "Tackle", "Interception", "Duel"];
pub const FROM_COUNTER: &str = "From Counter";

impl Event {
    pub fn type_name(&self) -> &str {
        &self.kind.name
    }

    pub fn team_name(&self) -> Option<&str> {
        self.team.as_ref().map(|t| t.name.as_str())
    }

    pub fn is_by(&self, team: &str) -> bool {
        self.team_name() == Some(team)
    }

    pub fn xy(&self) -> Option<(f64, f64)> {
        point(self.location.as_deref())
    }

    pub fn pass_end(&self) -> Option<(f64, f64)> {
        point(self.pass.as_ref()?.end_location.as_deref())
    }

    pub fn is_pass(&self) -> bool {
        self.type_name() == PASS
    }

    pub fn is_defensive_action(&self) -> bool {
        DEFENSIVE_ACTIONS.contains(&self.type_name())
    }

    pub fn is_foul(&self) -> bool {
        matches!(self.type_name(), FOUL_COMMITTED | BAD_BEHAVIOUR)
    }

    /// Card attached to a foul or bad-behaviour event.
    pub fn card_name(&self) -> Option<&str> {
        let detail = match self.type_name() {
            FOUL_COMMITTED => self.foul_committed.as_ref(),
            BAD_BEHAVIOUR => self.bad_behaviour.as_ref(),
            _ => None,
        }?;
        detail.card.as_ref().map(|c| c.name.as_str())
    }

    pub fn play_pattern_name(&self) -> Option<&str> {
        self.play_pattern.as_ref().map(|p| p.name.as_str())
    }
}

fn point(loc: Option<&[f64]>) -> Option<(f64, f64)> {
    let loc = loc?;
    let (x, y) = (*loc.first()?, *loc.get(1)?);
    (x.is_finite() && y.is_finite()).then_some((x, y))
}

/// Team names in order of first appearance.
pub fn teams_in(events: &[Event]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in events.iter().filter_map(Event::team_name) {
        if !out.iter().any(|t| t == name) {
            out.push(name.to_string());
        }
    }
    out
}

pub fn parse_events_json(raw: &str) -> Result<Vec<Event>> {
    serde_json::from_str(raw).context("invalid statsbomb events json")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchInfo {
    pub match_id: u64,
    pub match_date: Option<String>,
    pub competition_id: Option<u64>,
    pub season_id: Option<u64>,
    pub season_name: Option<String>,
    pub home_team: String,
    pub away_team: String,
    pub referee: Option<String>,
}

impl MatchInfo {
    pub fn opponent_of(&self, team: &str) -> Option<&str> {
        if team == self.home_team {
            Some(&self.away_team)
        } else if team == self.away_team {
            Some(&self.home_team)
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMatch {
    match_id: u64,
    #[serde(default)]
    match_date: Option<String>,
    #[serde(default)]
    competition: Option<RawCompetition>,
    #[serde(default)]
    season: Option<RawSeason>,
    home_team: RawHomeTeam,
    away_team: RawAwayTeam,
    #[serde(default)]
    referee: Option<Named>,
}

#[derive(Debug, Deserialize)]
struct RawCompetition {
    competition_id: u64,
}

#[derive(Debug, Deserialize)]
struct RawSeason {
    season_id: u64,
    #[serde(default)]
    season_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawHomeTeam {
    home_team_name: String,
}

#[derive(Debug, Deserialize)]
struct RawAwayTeam {
    away_team_name: String,
}

pub fn parse_matches_json(raw: &str) -> Result<Vec<MatchInfo>> {
    let rows: Vec<RawMatch> =
        serde_json::from_str(raw).context("invalid statsbomb matches json")?;
    Ok(rows
        .into_iter()
        .map(|m| MatchInfo {
            match_id: m.match_id,
            match_date: m.match_date,
            competition_id: m.competition.map(|c| c.competition_id),
            season_id: m.season.as_ref().map(|s| s.season_id),
            season_name: m.season.and_then(|s| s.season_name),
            home_team: m.home_team.home_team_name,
            away_team: m.away_team.away_team_name,
            referee: m
                .referee
                .map(|r| r.name)
                .filter(|name| !name.trim().is_empty()),
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitionSeason {
    pub competition_id: u64,
    pub season_id: u64,
    #[serde(default)]
    pub competition_name: String,
    #[serde(default)]
    pub season_name: String,
}

pub fn parse_competitions_json(raw: &str) -> Result<Vec<CompetitionSeason>> {
    serde_json::from_str(raw).context("invalid statsbomb competitions json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_is_read_from_matching_detail() {
        let raw = r#"[{"type":{"name":"Bad Behaviour"},"team":{"name":"A"},
            "bad_behaviour":{"card":{"id":7,"name":"Yellow Card"}},
            "foul_committed":{"card":{"name":"Red Card"}}}]"#;
        let events = parse_events_json(raw).unwrap();
        assert_eq!(events[0].card_name(), Some("Yellow Card"));
        assert!(events[0].is_foul());
        assert_eq!(events[0].xy(), None);
    }

    #[test]
    fn three_dimensional_location_keeps_xy() {
        let ev = Event {
            location: Some(vec![110.0, 40.0, 1.2]),
            ..Default::default()
        };
        assert_eq!(ev.xy(), Some((110.0, 40.0)));
    }

    #[test]
    fn teams_in_keeps_first_appearance_order() {
        let mk = |t: &str| Event {
            team: Some(Named::new(t)),
            ..Default::default()
        };
        let events = vec![mk("B"), mk("A"), mk("B")];
        assert_eq!(teams_in(&events), vec!["B".to_string(), "A".to_string()]);
    }
}
