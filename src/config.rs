use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::discipline::{CardTreatment, ExposureMetric};
use crate::http_cache::app_cache_dir;
use crate::zones::{DEFAULT_X_BINS, DEFAULT_Y_BINS, ZoneGrid};

pub const DEFAULT_BASE_FEATURES: &[&str] = &[
    "ppda",
    "directness",
    "possession_share",
    "block_height_x",
    "wing_share",
];
pub const DEFAULT_INTERACTION_FEATURES: &[&str] = &["directness", "ppda"];
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";

/// Settings for one batch fit. Serialized into the model artifact so a
/// loaded model set remembers how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    pub min_zone_samples: usize,
    pub min_zone_events: u64,
    pub min_referee_matches: usize,
    pub base_features: Vec<String>,
    pub interaction_features: Vec<String>,
    pub exposure: ExposureMetric,
    pub significance_level: f64,
    pub referee_ridge: f64,
    pub max_iters: usize,
    pub tolerance: f64,
    pub deadline_secs: u64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            min_zone_samples: 30,
            min_zone_events: 3,
            min_referee_matches: 5,
            base_features: DEFAULT_BASE_FEATURES.iter().map(|s| s.to_string()).collect(),
            interaction_features: DEFAULT_INTERACTION_FEATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exposure: ExposureMetric::default(),
            significance_level: 0.05,
            referee_ridge: 1.0,
            max_iters: 100,
            tolerance: 1e-8,
            deadline_secs: 600,
        }
    }
}

impl FitConfig {
    /// Zero leaves no time at all: every batch fitted against it is discarded.
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    /// Base features plus any interaction feature not already listed.
    pub fn design_features(&self) -> Vec<String> {
        let mut out = self.base_features.clone();
        for f in &self.interaction_features {
            if !out.contains(f) {
                out.push(f.clone());
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub grid: ZoneGrid,
    pub fit: FitConfig,
    pub card_treatment: CardTreatment,
    pub z_clip: f64,
    pub db_path: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    pub bind_addr: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grid: ZoneGrid::default(),
            fit: FitConfig::default(),
            card_treatment: CardTreatment::default(),
            z_clip: 4.0,
            db_path: app_cache_dir().map(|d| d.join("dataset.sqlite")),
            model_path: app_cache_dir().map(|d| d.join("zone_models.json")),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
        }
    }
}

impl EngineConfig {
    /// Reads `.env` (if present) and then the process environment.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.grid = ZoneGrid::new(
            env_parse("ZONE_GRID_X_BINS").unwrap_or(DEFAULT_X_BINS),
            env_parse("ZONE_GRID_Y_BINS").unwrap_or(DEFAULT_Y_BINS),
        );

        let fit = &mut cfg.fit;
        if let Some(v) = env_parse("ZONE_MIN_SAMPLES") {
            fit.min_zone_samples = v;
        }
        if let Some(v) = env_parse("ZONE_MIN_EVENTS") {
            fit.min_zone_events = v;
        }
        if let Some(v) = env_parse("ZONE_MIN_REFEREE_MATCHES") {
            fit.min_referee_matches = v;
        }
        if let Some(v) = env_list("ZONE_BASE_FEATURES") {
            fit.base_features = v;
        }
        if let Some(v) = env_list("ZONE_INTERACTION_FEATURES") {
            fit.interaction_features = v;
        }
        if let Some(raw) = env_string("ZONE_EXPOSURE") {
            match ExposureMetric::parse(&raw) {
                Some(m) => fit.exposure = m,
                None => warn!(value = %raw, "ignoring unknown ZONE_EXPOSURE"),
            }
        }
        if let Some(v) = env_parse::<f64>("ZONE_SIGNIFICANCE_ALPHA").filter(|v| *v > 0.0 && *v < 1.0) {
            fit.significance_level = v;
        }
        if let Some(v) = env_parse::<f64>("ZONE_REFEREE_RIDGE").filter(|v| *v >= 0.0) {
            fit.referee_ridge = v;
        }
        if let Some(v) = env_parse("ZONE_MAX_ITERS") {
            fit.max_iters = v;
        }
        if let Some(v) = env_parse::<f64>("ZONE_TOLERANCE").filter(|v| *v > 0.0) {
            fit.tolerance = v;
        }
        if let Some(v) = env_parse::<u64>("ZONE_FIT_DEADLINE_SECS").filter(|v| *v > 0) {
            fit.deadline_secs = v;
        }

        if let Some(raw) = env_string("ZONE_CARD_TREATMENT") {
            match CardTreatment::parse(&raw) {
                Some(t) => cfg.card_treatment = t,
                None => warn!(value = %raw, "ignoring unknown ZONE_CARD_TREATMENT"),
            }
        }
        if let Some(v) = env_parse::<f64>("ZONE_Z_CLIP").filter(|v| *v > 0.0) {
            cfg.z_clip = v;
        }
        if let Some(v) = env_string("ZONE_DB_PATH") {
            cfg.db_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env_string("ZONE_MODEL_PATH") {
            cfg.model_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env_string("ZONE_BIND_ADDR") {
            cfg.bind_addr = v;
        }
        cfg
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    let parsed = raw.parse::<T>().ok();
    if parsed.is_none() {
        warn!(key, value = %raw, "ignoring unparsable setting");
    }
    parsed
}

/// Comma separated list; feature names may carry a `z_` prefix.
pub fn parse_feature_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.strip_prefix("z_").unwrap_or(s).to_string())
        .collect()
}

fn env_list(key: &str) -> Option<Vec<String>> {
    let list = parse_feature_list(&env_string(key)?);
    (!list.is_empty()).then_some(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_list_strips_prefix_and_blanks() {
        assert_eq!(
            parse_feature_list("z_ppda, directness,, "),
            vec!["ppda".to_string(), "directness".to_string()]
        );
    }

    #[test]
    fn design_features_dedupes_interactions() {
        let mut fit = FitConfig::default();
        fit.interaction_features = vec!["ppda".into(), "counter_rate".into()];
        let f = fit.design_features();
        assert_eq!(f.len(), DEFAULT_BASE_FEATURES.len() + 1);
        assert_eq!(f.last().map(String::as_str), Some("counter_rate"));
    }
}
