use std::collections::HashMap;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::discipline::{CardTreatment, TeamMatchDiscipline, ZoneDisciplineRecord, extract_zone_discipline};
use crate::events::{Event, MatchInfo};
use crate::features::{PLAYSTYLE_FEATURES, RawTeamMatchFeatures, extract_team_match_features};
use crate::standardize::{NormSet, TeamMatchFeatures};
use crate::zones::ZoneGrid;

/// One match as loaded from the event source.
#[derive(Debug, Clone)]
pub struct MatchBundle {
    pub info: MatchInfo,
    pub events: Vec<Event>,
}

/// Everything the modeler consumes: standardized team-match rows and the
/// per-zone discipline records keyed by the same (match, team).
#[derive(Debug, Clone)]
pub struct Dataset {
    pub grid: ZoneGrid,
    pub norms: NormSet,
    pub raw: Vec<RawTeamMatchFeatures>,
    pub team_matches: Vec<TeamMatchFeatures>,
    pub records: Vec<ZoneDisciplineRecord>,
}

impl Dataset {
    /// Standardizes `raw` against norms fitted on `raw` itself.
    pub fn assemble(
        grid: ZoneGrid,
        raw: Vec<RawTeamMatchFeatures>,
        records: Vec<ZoneDisciplineRecord>,
    ) -> Self {
        let names = playstyle_names();
        let norms = NormSet::fit(&raw, &names);
        Self::with_norms(grid, norms, raw, records)
    }

    pub fn with_norms(
        grid: ZoneGrid,
        norms: NormSet,
        raw: Vec<RawTeamMatchFeatures>,
        records: Vec<ZoneDisciplineRecord>,
    ) -> Self {
        let team_matches = raw.iter().map(|r| norms.standardize(r)).collect();
        Self {
            grid,
            norms,
            raw,
            team_matches,
            records,
        }
    }

    pub fn team_match_index(&self) -> HashMap<(u64, &str), &TeamMatchFeatures> {
        self.team_matches
            .iter()
            .map(|t| ((t.match_id, t.team.as_str()), t))
            .collect()
    }

    pub fn summary(&self) -> DatasetSummary {
        let mut referees: Vec<&str> = self
            .team_matches
            .iter()
            .filter_map(|t| t.referee.as_deref())
            .collect();
        referees.sort_unstable();
        referees.dedup();
        let mut matches: Vec<u64> = self.team_matches.iter().map(|t| t.match_id).collect();
        matches.sort_unstable();
        matches.dedup();
        let total_fouls: u64 = self.records.iter().map(|r| r.fouls as u64).sum();
        let n = self.team_matches.len();
        DatasetSummary {
            team_matches: n,
            matches: matches.len(),
            referees: referees.len(),
            zone_records: self.records.len(),
            total_fouls,
            mean_fouls_per_team_match: if n > 0 {
                total_fouls as f64 / n as f64
            } else {
                0.0
            },
            norms_version: self.norms.version.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub team_matches: usize,
    pub matches: usize,
    pub referees: usize,
    pub zone_records: usize,
    pub total_fouls: u64,
    pub mean_fouls_per_team_match: f64,
    pub norms_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildSummary {
    pub matches_seen: usize,
    pub team_matches_built: usize,
    pub skipped: Vec<String>,
    pub located_fouls: u64,
    pub discarded_fouls: u64,
}

pub fn playstyle_names() -> Vec<String> {
    PLAYSTYLE_FEATURES.iter().map(|f| f.name.to_string()).collect()
}

/// Extracts both teams of every match. Team-matches that fail extraction are
/// skipped and reported; they never enter the dataset with placeholder values.
pub fn build_dataset(
    matches: &[MatchBundle],
    grid: &ZoneGrid,
    treatment: CardTreatment,
) -> (Dataset, BuildSummary) {
    type Extracted = Result<(RawTeamMatchFeatures, TeamMatchDiscipline), String>;
    let per_match: Vec<Vec<Extracted>> = matches
        .par_iter()
        .map(|m| {
            [m.info.home_team.as_str(), m.info.away_team.as_str()]
                .into_iter()
                .map(|team| -> Extracted {
                    let raw = extract_team_match_features(&m.events, &m.info, team)
                        .map_err(|e| e.to_string())?;
                    let discipline =
                        extract_zone_discipline(&m.events, m.info.match_id, team, grid, treatment);
                    Ok((raw, discipline))
                })
                .collect()
        })
        .collect();

    let mut summary = BuildSummary {
        matches_seen: matches.len(),
        ..Default::default()
    };
    let mut raw = Vec::new();
    let mut records = Vec::new();
    for outcome in per_match.into_iter().flatten() {
        match outcome {
            Ok((features, discipline)) => {
                summary.located_fouls += discipline.total_fouls as u64;
                summary.discarded_fouls += discipline.discarded_fouls as u64;
                raw.push(features);
                records.extend(discipline.records);
            }
            Err(reason) => {
                warn!(%reason, "team-match skipped");
                summary.skipped.push(reason);
            }
        }
    }
    summary.team_matches_built = raw.len();
    info!(
        matches = summary.matches_seen,
        team_matches = summary.team_matches_built,
        skipped = summary.skipped.len(),
        "dataset built"
    );
    (Dataset::assemble(*grid, raw, records), summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Named;

    #[test]
    fn incomplete_match_is_skipped_not_zeroed() {
        let bundle = MatchBundle {
            info: MatchInfo {
                match_id: 9,
                match_date: None,
                competition_id: None,
                season_id: None,
                season_name: None,
                home_team: "A".into(),
                away_team: "B".into(),
                referee: Some("R".into()),
            },
            events: vec![Event {
                kind: Named::new("Pass"),
                team: Some(Named::new("A")),
                ..Default::default()
            }],
        };
        let (ds, summary) = build_dataset(&[bundle], &ZoneGrid::default(), CardTreatment::Separate);
        assert_eq!(summary.team_matches_built, 0);
        assert_eq!(summary.skipped.len(), 2);
        assert!(ds.records.is_empty());
        assert!(ds.team_matches.is_empty());
    }
}
