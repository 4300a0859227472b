use anyhow::{Context, Result};

use crate::events::{
    CompetitionSeason, Event, MatchInfo, parse_competitions_json, parse_events_json,
    parse_matches_json,
};
use crate::http_cache::fetch_text_cached;
use crate::http_client::http_client;

const DEFAULT_BASE_URL: &str = "https://raw.githubusercontent.com/statsbomb/open-data/master/data";

/// Base URL of the open-data tree; `STATSBOMB_BASE_URL` points it at a mirror.
pub fn base_url() -> String {
    std::env::var("STATSBOMB_BASE_URL")
        .ok()
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

pub fn competitions_url() -> String {
    format!("{}/competitions.json", base_url())
}

pub fn matches_url(competition_id: u64, season_id: u64) -> String {
    format!("{}/matches/{competition_id}/{season_id}.json", base_url())
}

pub fn events_url(match_id: u64) -> String {
    format!("{}/events/{match_id}.json", base_url())
}

pub fn fetch_competitions() -> Result<Vec<CompetitionSeason>> {
    let body = fetch_text_cached(http_client()?, &competitions_url())
        .context("fetch competitions")?;
    parse_competitions_json(&body)
}

pub fn fetch_matches(competition_id: u64, season_id: u64) -> Result<Vec<MatchInfo>> {
    let body = fetch_text_cached(http_client()?, &matches_url(competition_id, season_id))
        .with_context(|| format!("fetch matches {competition_id}/{season_id}"))?;
    parse_matches_json(&body)
}

pub fn fetch_events(match_id: u64) -> Result<Vec<Event>> {
    let body = fetch_text_cached(http_client()?, &events_url(match_id))
        .with_context(|| format!("fetch events for match {match_id}"))?;
    parse_events_json(&body).with_context(|| format!("parse events for match {match_id}"))
}
