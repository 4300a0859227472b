//! Read-only queries over a fitted [`ZoneModelSet`]: foul prediction,
//! referee slopes and referee intercept effects.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::glm::{WaldStat, normal_critical};
use crate::modeler::{ModelSetDiagnostics, RefereeInput, Term, ZoneModel, ZoneModelSet};
use crate::referee::{RefereeId, RefereeRef};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    /// Raw feature values, or `z_`-prefixed standardized ones.
    pub team_features: BTreeMap<String, f64>,
    #[serde(default)]
    pub referee_name: Option<String>,
    #[serde(default)]
    pub is_home: Option<bool>,
    /// Exposure in the unit the models were fitted with.
    #[serde(default)]
    pub exposure: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefereeStatus {
    Known,
    Unseen,
    NotProvided,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefereeResolution {
    pub name: Option<String>,
    pub referee_id: Option<RefereeId>,
    pub status: RefereeStatus,
    /// Zones predicted with the population-average referee effect.
    pub fallback_zones: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonePrediction {
    pub zone_id: usize,
    pub zone: String,
    pub x_range: [f64; 2],
    pub y_range: [f64; 2],
    pub description: String,
    pub expected_fouls: f64,
    pub lower: f64,
    pub upper: f64,
    pub population_mean: f64,
    pub deviation: f64,
    pub referee_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub total_expected: f64,
    pub total_lower: f64,
    pub total_upper: f64,
    pub hottest_zone: String,
    pub hottest_zone_id: usize,
    pub hottest_deviation: f64,
    pub lowest_zone: String,
    pub lowest_zone_id: usize,
    pub zones_predicted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub feature_set: String,
    pub norms_version: String,
    pub referee: RefereeResolution,
    pub zones: Vec<ZonePrediction>,
    pub summary: PredictionSummary,
    /// Standardized values actually used, after clipping.
    pub standardized: BTreeMap<String, f64>,
    pub clipped_features: Vec<String>,
    pub defaulted_features: Vec<String>,
    pub ignored_features: Vec<String>,
    /// Zones without a usable model (thresholded or not converged).
    pub unavailable_zones: Vec<usize>,
}

struct Standardized {
    z: BTreeMap<String, f64>,
    clipped: Vec<String>,
    defaulted: Vec<String>,
    ignored: Vec<String>,
}

fn standardize_request(
    set: &ZoneModelSet,
    features: &BTreeMap<String, f64>,
    z_clip: f64,
) -> Result<Standardized, EngineError> {
    if features.is_empty() {
        return Err(EngineError::InvalidRequest(
            "team_features is empty".to_string(),
        ));
    }
    let mut supplied: BTreeMap<String, f64> = BTreeMap::new();
    let mut ignored = Vec::new();
    // Raw values with no reference norm stand at the mean.
    let mut unnormed = Vec::new();
    // z_ values win over raw ones for the same feature.
    for (name, value) in features {
        if !value.is_finite() {
            return Err(EngineError::InvalidRequest(format!(
                "feature {name} is not a finite number"
            )));
        }
        if let Some(base) = name.strip_prefix("z_") {
            if set.schema.contains(base) {
                supplied.insert(base.to_string(), *value);
            } else {
                ignored.push(name.clone());
            }
        } else if set.schema.contains(name) {
            if features.contains_key(&format!("z_{name}")) {
                continue;
            }
            let z = match set.norms.pooled.z(name, *value) {
                Some(z) => z,
                None => {
                    unnormed.push(name.clone());
                    0.0
                }
            };
            supplied.insert(name.clone(), z);
        } else {
            ignored.push(name.clone());
        }
    }
    if supplied.is_empty() {
        return Err(EngineError::InvalidRequest(format!(
            "none of the model features ({}) were supplied",
            set.schema.features.join(", ")
        )));
    }

    let mut z = BTreeMap::new();
    let mut clipped = Vec::new();
    let mut defaulted = unnormed;
    for feature in &set.schema.features {
        let value = match supplied.get(feature) {
            Some(v) => *v,
            None => {
                defaulted.push(feature.clone());
                0.0
            }
        };
        let bounded = value.clamp(-z_clip, z_clip);
        if bounded != value {
            clipped.push(feature.clone());
        }
        z.insert(feature.clone(), bounded);
    }
    Ok(Standardized {
        z,
        clipped,
        defaulted,
        ignored,
    })
}

/// Expected fouls per zone for one team profile under one referee.
///
/// A referee without own terms in a zone (unseen, or below the match
/// threshold there) gets that zone's population-average referee effect and
/// the zone is flagged as a fallback.
pub fn predict_fouls(
    set: &ZoneModelSet,
    request: &PredictionRequest,
    z_clip: f64,
) -> Result<PredictionResult, EngineError> {
    if !set.has_available() {
        return Err(EngineError::ModelUnavailable);
    }
    if let Some(e) = request.exposure
        && !(e.is_finite() && e > 0.0)
    {
        return Err(EngineError::InvalidRequest(format!(
            "exposure must be positive, got {e}"
        )));
    }
    let input = standardize_request(set, &request.team_features, z_clip)?;

    let name = request
        .referee_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let resolved = name.map(|n| set.referees.resolve(n));
    let referee_id = resolved.as_ref().and_then(RefereeRef::known_id);
    let status = match (&resolved, referee_id) {
        (None, _) => RefereeStatus::NotProvided,
        (Some(_), Some(_)) => RefereeStatus::Known,
        (Some(_), None) => RefereeStatus::Unseen,
    };

    let crit = normal_critical(set.config.significance_level);
    let mut zones = Vec::new();
    let mut total_var = 0.0;
    let mut fallback_zones = Vec::new();
    for model in set.available() {
        let referee = match referee_id {
            Some(id) if model.has_referee(id) => RefereeInput::Specific(id),
            _ => RefereeInput::PopulationAverage,
        };
        let fallback = referee == RefereeInput::PopulationAverage;
        if fallback {
            fallback_zones.push(model.zone_id());
        }
        let home = match request.is_home {
            Some(true) => 1.0,
            Some(false) => 0.0,
            None => model.home_share,
        };
        let exposure = request.exposure.unwrap_or(model.mean_exposure).max(1e-9);
        let offset = exposure.ln();
        let row = model.design_row(&input.z, home, referee);
        let (eta, var) = model.linear_predictor(&row);
        let sd = var.sqrt();
        let expected = (eta + offset).exp();
        total_var += expected * expected * var;
        zones.push(ZonePrediction {
            zone_id: model.zone_id(),
            zone: model.zone.label(),
            x_range: [model.zone.x_min, model.zone.x_max],
            y_range: [model.zone.y_min, model.zone.y_max],
            description: model.zone.description(),
            expected_fouls: expected,
            lower: (eta - crit * sd + offset).exp(),
            upper: (eta + crit * sd + offset).exp(),
            population_mean: model.population_mean,
            deviation: expected - model.population_mean,
            referee_fallback: fallback,
        });
    }

    let summary = summarize(&zones, total_var.sqrt() * crit);
    Ok(PredictionResult {
        feature_set: set.schema.version.clone(),
        norms_version: set.norms.version.clone(),
        referee: RefereeResolution {
            name: name.map(str::to_string),
            referee_id,
            status,
            fallback_zones,
        },
        zones,
        summary,
        standardized: input.z,
        clipped_features: input.clipped,
        defaulted_features: input.defaulted,
        ignored_features: input.ignored,
        unavailable_zones: set
            .models
            .iter()
            .filter(|m| !m.available)
            .map(ZoneModel::zone_id)
            .collect(),
    })
}

/// Hottest zone = largest deviation from the zone's own mean; ties keep the
/// lowest zone id so there is always exactly one.
fn summarize(zones: &[ZonePrediction], half_width: f64) -> PredictionSummary {
    let total: f64 = zones.iter().map(|z| z.expected_fouls).sum();
    let mut hottest = &zones[0];
    let mut lowest = &zones[0];
    for z in &zones[1..] {
        if z.deviation > hottest.deviation {
            hottest = z;
        }
        if z.deviation < lowest.deviation {
            lowest = z;
        }
    }
    PredictionSummary {
        total_expected: total,
        total_lower: (total - half_width).max(0.0),
        total_upper: total + half_width,
        hottest_zone: hottest.zone.clone(),
        hottest_zone_id: hottest.zone_id,
        hottest_deviation: hottest.deviation,
        lowest_zone: lowest.zone.clone(),
        lowest_zone_id: lowest.zone_id,
        zones_predicted: zones.len(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefereeSlope {
    pub zone_id: usize,
    pub zone: String,
    pub referee: String,
    pub referee_id: RefereeId,
    pub feature: String,
    /// Deviation from the zone's population slope.
    pub slope: WaldStat,
    /// Population slope plus the deviation.
    pub total_slope: WaldStat,
    pub significant: bool,
    /// The referee has no own slope term here; `slope` is the
    /// population-average deviation.
    pub population_average: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlopeSummary {
    pub count: usize,
    pub significant: usize,
    pub population_average: usize,
    pub mean_slope: Option<f64>,
    pub min_slope: Option<f64>,
    pub max_slope: Option<f64>,
    pub zones: usize,
    pub referees: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefereeSlopeReport {
    pub feature: String,
    pub feature_set: String,
    pub slopes: Vec<RefereeSlope>,
    pub summary: SlopeSummary,
}

/// Every referee's slope on `feature` in every fitted zone.
pub fn referee_slopes(set: &ZoneModelSet, feature: &str) -> Result<RefereeSlopeReport, EngineError> {
    if !set.has_available() {
        return Err(EngineError::ModelUnavailable);
    }
    let name = feature.trim();
    let name = name.strip_prefix("z_").unwrap_or(name);
    if !set.schema.is_interaction(name) {
        return Err(EngineError::UnknownFeature {
            feature: feature.to_string(),
        });
    }
    let sig = set.config.significance_level;
    let mut slopes = Vec::new();
    for model in set.available() {
        let Some(main) = model.position(&Term::Feature {
            feature: name.to_string(),
        }) else {
            continue;
        };
        let average = population_slope_weights(model, name);
        for entry in set.referees.entries() {
            let own = model.position(&Term::RefereeSlope {
                referee: entry.id,
                feature: name.to_string(),
            });
            let deviation: Vec<(usize, f64)> = match own {
                Some(j) => vec![(j, 1.0)],
                None => average.clone(),
            };
            let mut total = deviation.clone();
            total.push((main, 1.0));
            let slope = model.combination(&deviation, sig);
            slopes.push(RefereeSlope {
                zone_id: model.zone_id(),
                zone: model.zone.label(),
                referee: entry.name.clone(),
                referee_id: entry.id,
                feature: name.to_string(),
                slope,
                total_slope: model.combination(&total, sig),
                significant: own.is_some() && slope.significant(),
                population_average: own.is_none(),
            });
        }
    }
    let summary = slope_summary(&slopes);
    Ok(RefereeSlopeReport {
        feature: name.to_string(),
        feature_set: set.schema.version.clone(),
        slopes,
        summary,
    })
}

fn population_slope_weights(model: &ZoneModel, feature: &str) -> Vec<(usize, f64)> {
    model
        .referee_weights
        .iter()
        .filter_map(|(referee, w)| {
            model
                .position(&Term::RefereeSlope {
                    referee: *referee,
                    feature: feature.to_string(),
                })
                .map(|j| (j, *w))
        })
        .collect()
}

fn slope_summary(slopes: &[RefereeSlope]) -> SlopeSummary {
    let own: Vec<f64> = slopes
        .iter()
        .filter(|s| !s.population_average)
        .map(|s| s.slope.estimate)
        .collect();
    let zones: BTreeSet<usize> = slopes.iter().map(|s| s.zone_id).collect();
    let referees: BTreeSet<RefereeId> = slopes.iter().map(|s| s.referee_id).collect();
    SlopeSummary {
        count: slopes.len(),
        significant: slopes.iter().filter(|s| s.significant).count(),
        population_average: slopes.len() - own.len(),
        mean_slope: (!own.is_empty()).then(|| own.iter().sum::<f64>() / own.len() as f64),
        min_slope: own.iter().copied().reduce(f64::min),
        max_slope: own.iter().copied().reduce(f64::max),
        zones: zones.len(),
        referees: referees.len(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefereeEffect {
    pub zone_id: usize,
    pub zone: String,
    pub referee: String,
    pub referee_id: RefereeId,
    /// Intercept deviation on the log scale.
    pub effect: WaldStat,
    pub rate_ratio: f64,
    pub significant: bool,
    /// Share of the zone's training rows this referee officiated.
    pub weight: f64,
}

/// Intercept deviations of every referee with own terms, zone by zone.
pub fn referee_effects(set: &ZoneModelSet) -> Result<Vec<RefereeEffect>, EngineError> {
    if !set.has_available() {
        return Err(EngineError::ModelUnavailable);
    }
    let mut out = Vec::new();
    for model in set.available() {
        for (referee, weight) in &model.referee_weights {
            let Some(coef) = model.coefficient(&Term::Referee { referee: *referee }) else {
                continue;
            };
            out.push(RefereeEffect {
                zone_id: model.zone_id(),
                zone: model.zone.label(),
                referee: set.referees.name(*referee).unwrap_or("?").to_string(),
                referee_id: *referee,
                effect: coef.stat,
                rate_ratio: coef.stat.estimate.exp(),
                significant: coef.stat.significant(),
                weight: *weight,
            });
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub available: bool,
    pub total_models: usize,
    pub zones_analyzed: usize,
    pub feature_set: Option<String>,
    pub norms_version: Option<String>,
    pub generated_at: Option<String>,
    pub diagnostics: Option<ModelSetDiagnostics>,
}

pub fn model_status(set: Option<&ZoneModelSet>) -> ModelStatus {
    match set {
        Some(set) => {
            let diagnostics = set.diagnostics();
            ModelStatus {
                available: set.has_available(),
                total_models: set.models.len(),
                zones_analyzed: diagnostics.zones_analyzed,
                feature_set: Some(set.schema.version.clone()),
                norms_version: Some(set.norms.version.clone()),
                generated_at: Some(set.generated_at.clone()),
                diagnostics: Some(diagnostics),
            }
        }
        None => ModelStatus {
            available: false,
            total_models: 0,
            zones_analyzed: 0,
            feature_set: None,
            norms_version: None,
            generated_at: None,
            diagnostics: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FitConfig;
    use crate::modeler::fit;
    use crate::synthetic::{LeagueSpec, generate};
    use once_cell::sync::Lazy;

    static MODELS: Lazy<ZoneModelSet> = Lazy::new(|| {
        let spec = LeagueSpec {
            teams: 10,
            seasons: 2,
            rounds: 2,
            referees: crate::synthetic::DEFAULT_REFEREES[..4]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ..Default::default()
        };
        let (dataset, _) = generate(&spec);
        fit(&dataset, &FitConfig::default()).unwrap()
    });

    fn request(referee: Option<&str>) -> PredictionRequest {
        PredictionRequest {
            team_features: [("z_directness".to_string(), 0.5), ("ppda".to_string(), 9.0)]
                .into_iter()
                .collect(),
            referee_name: referee.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn known_referee_uses_own_terms() {
        let out = predict_fouls(&MODELS, &request(Some("daniele orsato")), 4.0).unwrap();
        assert_eq!(out.referee.status, RefereeStatus::Known);
        assert!(out.zones.iter().any(|z| !z.referee_fallback));
        for z in &out.zones {
            assert!(z.lower <= z.expected_fouls && z.expected_fouls <= z.upper);
        }
        assert!(out.defaulted_features.contains(&"wing_share".to_string()));
    }

    #[test]
    fn unseen_referee_falls_back_everywhere() {
        let out = predict_fouls(&MODELS, &request(Some("Nobody Atall")), 4.0).unwrap();
        assert_eq!(out.referee.status, RefereeStatus::Unseen);
        assert!(out.zones.iter().all(|z| z.referee_fallback));
        assert_eq!(out.referee.fallback_zones.len(), out.zones.len());
    }

    #[test]
    fn empty_or_unknown_features_are_rejected() {
        let mut req = request(None);
        req.team_features.clear();
        assert!(matches!(
            predict_fouls(&MODELS, &req, 4.0),
            Err(EngineError::InvalidRequest(_))
        ));
        req.team_features.insert("shoe_size".into(), 44.0);
        assert!(matches!(
            predict_fouls(&MODELS, &req, 4.0),
            Err(EngineError::InvalidRequest(_))
        ));
    }

    #[test]
    fn extreme_z_is_clipped_and_reported() {
        let mut req = request(None);
        req.team_features.insert("z_ppda".into(), 12.5);
        let out = predict_fouls(&MODELS, &req, 4.0).unwrap();
        assert_eq!(out.standardized["ppda"], 4.0);
        assert_eq!(out.clipped_features, vec!["ppda".to_string()]);
    }

    #[test]
    fn slopes_reject_non_interaction_features() {
        assert!(matches!(
            referee_slopes(&MODELS, "wing_share"),
            Err(EngineError::UnknownFeature { .. })
        ));
        let report = referee_slopes(&MODELS, "z_directness").unwrap();
        assert_eq!(report.feature, "directness");
        for s in &report.slopes {
            if s.significant {
                assert!(s.slope.ci_lower > 0.0 || s.slope.ci_upper < 0.0);
                assert!(!s.population_average);
            }
        }
    }

    #[test]
    fn status_without_models() {
        let status = model_status(None);
        assert!(!status.available);
        assert_eq!(status.total_models, 0);
    }
}
