use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::FitConfig;
use crate::dataset::Dataset;
use crate::error::EngineError;
use crate::glm::{DispersionTest, Design, GlmOptions, WaldStat, dot, fit_negative_binomial};
use crate::referee::{RefereeId, RefereeRegistry};
use crate::standardize::NormSet;
use crate::zones::{Zone, ZoneGrid};

pub const ARTIFACT_VERSION: u32 = 1;

/// One column of a zone's design matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Term {
    Intercept,
    Feature { feature: String },
    Home,
    Referee { referee: RefereeId },
    RefereeSlope { referee: RefereeId, feature: String },
}

impl Term {
    pub fn label(&self, registry: &RefereeRegistry) -> String {
        let name = |r: &RefereeId| registry.name(*r).unwrap_or("?").to_string();
        match self {
            Term::Intercept => "intercept".to_string(),
            Term::Feature { feature } => format!("z_{feature}"),
            Term::Home => "home_indicator".to_string(),
            Term::Referee { referee } => format!("referee[{}]", name(referee)),
            Term::RefereeSlope { referee, feature } => {
                format!("z_{feature}:referee[{}]", name(referee))
            }
        }
    }

    fn penalized(&self) -> bool {
        matches!(self, Term::Referee { .. } | Term::RefereeSlope { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficient {
    pub term: Term,
    pub name: String,
    #[serde(flatten)]
    pub stat: WaldStat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FitStatus {
    Fitted,
    InsufficientData {
        samples: usize,
        events: u64,
        min_samples: usize,
        min_events: u64,
    },
    ConvergenceFailed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneDiagnostics {
    #[serde(flatten)]
    pub status: FitStatus,
    pub converged: bool,
    pub iterations: usize,
    pub n_obs: usize,
    pub df_model: usize,
    pub df_resid: usize,
    pub total_fouls: u64,
    pub log_likelihood: Option<f64>,
    pub aic: Option<f64>,
    pub bic: Option<f64>,
    pub deviance: Option<f64>,
    pub pearson_chi2: Option<f64>,
    pub dispersion: Option<DispersionTest>,
}

/// Named, versioned list of predictors a model set was fitted against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub name: String,
    pub version: String,
    pub features: Vec<String>,
    pub interaction_features: Vec<String>,
}

impl FeatureSchema {
    pub fn new(name: &str, features: Vec<String>, interaction_features: Vec<String>) -> Self {
        let mut hasher = Sha256::new();
        for f in &features {
            hasher.update(f.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update([1u8]);
        for f in &interaction_features {
            hasher.update(f.as_bytes());
            hasher.update([0u8]);
        }
        let digest = format!("{:x}", hasher.finalize());
        Self {
            name: name.to_string(),
            version: format!("{name}-{}", &digest[..12]),
            features,
            interaction_features,
        }
    }

    pub fn contains(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    pub fn is_interaction(&self, feature: &str) -> bool {
        self.interaction_features.iter().any(|f| f == feature)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneModel {
    pub zone: Zone,
    pub available: bool,
    pub feature_set: String,
    pub terms: Vec<Term>,
    pub coefficients: Vec<Coefficient>,
    /// Row-major covariance of the coefficients.
    pub covariance: Vec<f64>,
    pub alpha: f64,
    /// Share of training rows refereed by each referee with own terms.
    pub referee_weights: BTreeMap<RefereeId, f64>,
    pub home_share: f64,
    pub mean_exposure: f64,
    /// Mean foul count per team-match in this zone.
    pub population_mean: f64,
    pub diagnostics: ZoneDiagnostics,
}

/// How the referee enters a design row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RefereeInput {
    Specific(RefereeId),
    PopulationAverage,
}

impl ZoneModel {
    pub fn zone_id(&self) -> usize {
        self.zone.id
    }

    pub fn beta(&self) -> impl Iterator<Item = f64> + '_ {
        self.coefficients.iter().map(|c| c.stat.estimate)
    }

    pub fn position(&self, term: &Term) -> Option<usize> {
        self.terms.iter().position(|t| t == term)
    }

    pub fn coefficient(&self, term: &Term) -> Option<&Coefficient> {
        self.position(term).map(|i| &self.coefficients[i])
    }

    pub fn has_referee(&self, referee: RefereeId) -> bool {
        self.referee_weights.contains_key(&referee)
    }

    /// Design row for one prediction. Referees without own terms use the
    /// population average: each referee column weighted by its share.
    pub fn design_row(&self, z: &BTreeMap<String, f64>, home: f64, referee: RefereeInput) -> Vec<f64> {
        let weight = |r: &RefereeId| match referee {
            RefereeInput::Specific(id) if id == *r => 1.0,
            RefereeInput::Specific(_) => 0.0,
            RefereeInput::PopulationAverage => self.referee_weights.get(r).copied().unwrap_or(0.0),
        };
        self.terms
            .iter()
            .map(|term| match term {
                Term::Intercept => 1.0,
                Term::Feature { feature } => z.get(feature).copied().unwrap_or(0.0),
                Term::Home => home,
                Term::Referee { referee } => weight(referee),
                Term::RefereeSlope { referee, feature } => {
                    weight(referee) * z.get(feature).copied().unwrap_or(0.0)
                }
            })
            .collect()
    }

    /// Linear predictor (without offset) and its variance.
    pub fn linear_predictor(&self, row: &[f64]) -> (f64, f64) {
        let beta: Vec<f64> = self.beta().collect();
        let eta = dot(row, &beta);
        let p = beta.len();
        let mut var = 0.0;
        for i in 0..p {
            if row[i] == 0.0 {
                continue;
            }
            for j in 0..p {
                var += row[i] * self.covariance[i * p + j] * row[j];
            }
        }
        (eta, var.max(0.0))
    }

    /// Linear combination `sum w_i * beta_i` with its Wald summary.
    pub fn combination(&self, weights: &[(usize, f64)], sig_level: f64) -> WaldStat {
        let p = self.coefficients.len();
        let estimate: f64 = weights
            .iter()
            .map(|(i, w)| w * self.coefficients[*i].stat.estimate)
            .sum();
        let mut var = 0.0;
        for (i, wi) in weights {
            for (j, wj) in weights {
                var += wi * wj * self.covariance[i * p + j];
            }
        }
        WaldStat::new(estimate, var.max(0.0).sqrt(), sig_level)
    }
}

/// Immutable result of one batch fit; replaced wholesale on refit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneModelSet {
    pub version: u32,
    pub generated_at: String,
    pub schema: FeatureSchema,
    pub norms: NormSet,
    pub referees: RefereeRegistry,
    pub grid: ZoneGrid,
    pub config: FitConfig,
    pub models: Vec<ZoneModel>,
}

impl ZoneModelSet {
    pub fn available(&self) -> impl Iterator<Item = &ZoneModel> {
        self.models.iter().filter(|m| m.available)
    }

    pub fn has_available(&self) -> bool {
        self.models.iter().any(|m| m.available)
    }

    pub fn model(&self, zone_id: usize) -> Option<&ZoneModel> {
        self.models.iter().find(|m| m.zone.id == zone_id)
    }

    pub fn diagnostics(&self) -> ModelSetDiagnostics {
        let fitted: Vec<&ZoneModel> = self.available().collect();
        let n = fitted.len();
        let mean = |f: &dyn Fn(&ZoneModel) -> Option<f64>| {
            let vals: Vec<f64> = fitted.iter().filter_map(|m| f(m)).collect();
            if vals.is_empty() {
                None
            } else {
                Some(vals.iter().sum::<f64>() / vals.len() as f64)
            }
        };
        let mut feature_significance = BTreeMap::new();
        for feature in &self.schema.features {
            let term = Term::Feature {
                feature: feature.clone(),
            };
            let significant = fitted
                .iter()
                .filter(|m| m.coefficient(&term).is_some_and(|c| c.stat.significant()))
                .count();
            let share = if n > 0 { significant as f64 / n as f64 } else { 0.0 };
            feature_significance.insert(feature.clone(), share);
        }
        ModelSetDiagnostics {
            zones_total: self.models.len(),
            zones_analyzed: n,
            convergence_rate: if self.models.is_empty() {
                0.0
            } else {
                self.models
                    .iter()
                    .filter(|m| m.diagnostics.converged)
                    .count() as f64
                    / self.models.len() as f64
            },
            average_aic: mean(&|m| m.diagnostics.aic),
            average_nobs: mean(&|m| Some(m.diagnostics.n_obs as f64)),
            overdispersed_zones: fitted
                .iter()
                .filter(|m| m.diagnostics.dispersion.is_some_and(|d| d.overdispersed))
                .count(),
            feature_significance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSetDiagnostics {
    pub zones_total: usize,
    pub zones_analyzed: usize,
    pub convergence_rate: f64,
    pub average_aic: Option<f64>,
    pub average_nobs: Option<f64>,
    pub overdispersed_zones: usize,
    /// Share of fitted zones where the feature's main effect is significant.
    pub feature_significance: BTreeMap<String, f64>,
}

/// One modeling row: a zone record joined with its team-match features.
#[derive(Debug, Clone)]
struct Observation {
    fouls: f64,
    log_exposure: f64,
    exposure: f64,
    home: f64,
    referee: Option<RefereeId>,
    z: Vec<f64>,
}

/// Fits every zone of `dataset.grid` independently. Zones that cannot be
/// fitted come back with `available = false` and the reason in their
/// diagnostics; only an expired deadline fails the whole batch.
pub fn fit(dataset: &Dataset, config: &FitConfig) -> Result<ZoneModelSet, EngineError> {
    let started = Instant::now();
    let deadline = config.deadline();
    let features = config.design_features();
    let schema = FeatureSchema::new(
        "playstyle",
        features.clone(),
        config.interaction_features.clone(),
    );

    // Stable referee ids: sorted by name.
    let mut names: Vec<&str> = dataset
        .team_matches
        .iter()
        .filter_map(|t| t.referee.as_deref())
        .collect();
    names.sort_unstable();
    let mut referees = RefereeRegistry::new();
    for name in names {
        referees.intern(name);
    }

    let mut matches_per_referee: HashMap<RefereeId, BTreeSet<u64>> = HashMap::new();
    for tm in &dataset.team_matches {
        if let Some(id) = tm.referee.as_deref().and_then(|r| referees.resolve(r).known_id()) {
            matches_per_referee.entry(id).or_default().insert(tm.match_id);
        }
    }
    let eligible: BTreeSet<RefereeId> = matches_per_referee
        .iter()
        .filter(|(_, m)| m.len() >= config.min_referee_matches)
        .map(|(id, _)| *id)
        .collect();
    debug!(
        referees = referees.len(),
        eligible = eligible.len(),
        "referee registry built"
    );

    let index = dataset.team_match_index();
    let mut by_zone: BTreeMap<usize, Vec<Observation>> = BTreeMap::new();
    let mut unmatched = 0usize;
    let mut incomplete = 0usize;
    for rec in &dataset.records {
        let Some(tm) = index.get(&(rec.match_id, rec.team.as_str())) else {
            unmatched += 1;
            continue;
        };
        let z: Option<Vec<f64>> = features.iter().map(|f| tm.z(f)).collect();
        let Some(z) = z else {
            incomplete += 1;
            continue;
        };
        let exposure = rec.exposure.value(config.exposure);
        by_zone.entry(rec.zone_id).or_default().push(Observation {
            fouls: rec.fouls as f64,
            log_exposure: rec.exposure.log_offset(config.exposure),
            exposure,
            home: if tm.home { 1.0 } else { 0.0 },
            referee: tm
                .referee
                .as_deref()
                .and_then(|r| referees.resolve(r).known_id()),
            z,
        });
    }
    if unmatched > 0 || incomplete > 0 {
        warn!(unmatched, incomplete, "zone records left out of the fit");
    }

    let expired = AtomicBool::new(false);
    let empty = Vec::new();
    let zones = dataset.grid.zones();
    let models: Vec<ZoneModel> = zones
        .par_iter()
        .map(|zone| {
            if expired.load(Ordering::Relaxed) || started.elapsed() > deadline {
                expired.store(true, Ordering::Relaxed);
            }
            let rows = by_zone.get(&zone.id).unwrap_or(&empty);
            let ctx = ZoneFitContext {
                zone: *zone,
                rows,
                features: &features,
                schema: &schema,
                eligible: &eligible,
                config,
                expired: &expired,
            };
            let model = ctx.fit();
            if started.elapsed() > deadline {
                expired.store(true, Ordering::Relaxed);
            }
            model
        })
        .collect();

    if expired.load(Ordering::Relaxed) {
        warn!(deadline_secs = config.deadline_secs, "fit deadline exceeded, batch discarded");
        return Err(EngineError::DeadlineExceeded {
            deadline_secs: config.deadline_secs,
        });
    }

    let set = ZoneModelSet {
        version: ARTIFACT_VERSION,
        generated_at: chrono::Utc::now().to_rfc3339(),
        schema,
        norms: dataset.norms.clone(),
        referees,
        grid: dataset.grid,
        config: config.clone(),
        models,
    };
    let diag = set.diagnostics();
    info!(
        zones = diag.zones_total,
        analyzed = diag.zones_analyzed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "zone models fitted"
    );
    Ok(set)
}

struct ZoneFitContext<'a> {
    zone: Zone,
    rows: &'a [Observation],
    features: &'a [String],
    schema: &'a FeatureSchema,
    eligible: &'a BTreeSet<RefereeId>,
    config: &'a FitConfig,
    expired: &'a AtomicBool,
}

impl ZoneFitContext<'_> {
    fn fit(&self) -> ZoneModel {
        let n = self.rows.len();
        let events: u64 = self.rows.iter().map(|r| r.fouls as u64).sum();
        let mut model = self.unavailable(FitStatus::Fitted, events);

        if self.expired.load(Ordering::Relaxed) {
            model.diagnostics.status = FitStatus::ConvergenceFailed {
                reason: "fit deadline exceeded".to_string(),
            };
            return model;
        }
        if n < self.config.min_zone_samples || events < self.config.min_zone_events {
            let err = EngineError::InsufficientData {
                zone_id: self.zone.id,
                samples: n,
                events,
                min_samples: self.config.min_zone_samples,
                min_events: self.config.min_zone_events,
            };
            info!(zone = %self.zone.label(), "{err}");
            model.diagnostics.status = FitStatus::InsufficientData {
                samples: n,
                events,
                min_samples: self.config.min_zone_samples,
                min_events: self.config.min_zone_events,
            };
            return model;
        }

        let mut per_referee: BTreeMap<RefereeId, usize> = BTreeMap::new();
        for r in self.rows {
            if let Some(id) = r.referee
                && self.eligible.contains(&id)
            {
                *per_referee.entry(id).or_default() += 1;
            }
        }
        let own_terms: Vec<RefereeId> = per_referee.keys().copied().collect();
        let terms = self.terms(&own_terms);
        let design = self.design(&terms);

        let opts = GlmOptions {
            max_iters: self.config.max_iters,
            tolerance: self.config.tolerance,
        };
        let fitted = match fit_negative_binomial(&design, &opts) {
            Ok(f) if f.converged => f,
            Ok(f) => {
                let err = EngineError::Convergence {
                    zone_id: self.zone.id,
                    reason: format!("no convergence after {} iterations", f.iterations),
                };
                warn!(zone = %self.zone.label(), "{err}");
                model.diagnostics.iterations = f.iterations;
                model.diagnostics.status = FitStatus::ConvergenceFailed {
                    reason: err.to_string(),
                };
                return model;
            }
            Err(reason) => {
                let err = EngineError::Convergence {
                    zone_id: self.zone.id,
                    reason,
                };
                warn!(zone = %self.zone.label(), "{err}");
                model.diagnostics.status = FitStatus::ConvergenceFailed {
                    reason: err.to_string(),
                };
                return model;
            }
        };

        let p = terms.len();
        let k = (p + 1) as f64;
        let ll = fitted.log_likelihood;
        let sig = self.config.significance_level;
        model.coefficients = terms
            .iter()
            .enumerate()
            .map(|(j, term)| Coefficient {
                term: term.clone(),
                name: column_name(term),
                stat: WaldStat::new(fitted.beta[j], fitted.std_error(j), sig),
            })
            .collect();
        model.terms = terms;
        model.covariance = fitted.covariance.clone();
        model.alpha = fitted.alpha;
        model.referee_weights = per_referee
            .iter()
            .map(|(id, count)| (*id, *count as f64 / n as f64))
            .collect();
        model.available = true;
        model.diagnostics = ZoneDiagnostics {
            status: FitStatus::Fitted,
            converged: true,
            iterations: fitted.iterations,
            n_obs: n,
            df_model: p.saturating_sub(1),
            df_resid: n.saturating_sub(p),
            total_fouls: events,
            log_likelihood: Some(ll),
            aic: Some(-2.0 * ll + 2.0 * k),
            bic: Some(-2.0 * ll + (n as f64).ln() * k),
            deviance: Some(fitted.deviance),
            pearson_chi2: Some(fitted.pearson_chi2),
            dispersion: Some(fitted.dispersion),
        };
        debug!(
            zone = %self.zone.label(),
            n,
            iterations = fitted.iterations,
            alpha = fitted.alpha,
            "zone fitted"
        );
        model
    }

    fn unavailable(&self, status: FitStatus, events: u64) -> ZoneModel {
        let n = self.rows.len();
        let mean = |f: fn(&Observation) -> f64| {
            if n == 0 {
                0.0
            } else {
                self.rows.iter().map(f).sum::<f64>() / n as f64
            }
        };
        ZoneModel {
            zone: self.zone,
            available: false,
            feature_set: self.schema.version.clone(),
            terms: Vec::new(),
            coefficients: Vec::new(),
            covariance: Vec::new(),
            alpha: 0.0,
            referee_weights: BTreeMap::new(),
            home_share: mean(|r| r.home),
            mean_exposure: mean(|r| r.exposure),
            population_mean: mean(|r| r.fouls),
            diagnostics: ZoneDiagnostics {
                status,
                converged: false,
                iterations: 0,
                n_obs: n,
                df_model: 0,
                df_resid: 0,
                total_fouls: events,
                log_likelihood: None,
                aic: None,
                bic: None,
                deviance: None,
                pearson_chi2: None,
                dispersion: None,
            },
        }
    }

    fn terms(&self, own_terms: &[RefereeId]) -> Vec<Term> {
        let mut terms = vec![Term::Intercept];
        terms.extend(self.features.iter().map(|f| Term::Feature { feature: f.clone() }));
        terms.push(Term::Home);
        terms.extend(own_terms.iter().map(|r| Term::Referee { referee: *r }));
        for feature in &self.schema.interaction_features {
            terms.extend(own_terms.iter().map(|r| Term::RefereeSlope {
                referee: *r,
                feature: feature.clone(),
            }));
        }
        terms
    }

    fn design(&self, terms: &[Term]) -> Design {
        let feature_idx: HashMap<&str, usize> = self
            .features
            .iter()
            .enumerate()
            .map(|(i, f)| (f.as_str(), i))
            .collect();
        let zval = |obs: &Observation, f: &str| feature_idx.get(f).map(|i| obs.z[*i]).unwrap_or(0.0);
        let mut design = Design {
            columns: terms.iter().map(column_name).collect(),
            penalty: terms
                .iter()
                .map(|t| if t.penalized() { self.config.referee_ridge } else { 0.0 })
                .collect(),
            ..Default::default()
        };
        design.x.reserve(self.rows.len() * terms.len());
        for obs in self.rows {
            for term in terms {
                let v = match term {
                    Term::Intercept => 1.0,
                    Term::Feature { feature } => zval(obs, feature),
                    Term::Home => obs.home,
                    Term::Referee { referee } => (obs.referee == Some(*referee)) as u8 as f64,
                    Term::RefereeSlope { referee, feature } => {
                        if obs.referee == Some(*referee) {
                            zval(obs, feature)
                        } else {
                            0.0
                        }
                    }
                };
                design.x.push(v);
            }
            design.y.push(obs.fouls);
            design.offset.push(obs.log_exposure);
        }
        design
    }
}

fn column_name(term: &Term) -> String {
    match term {
        Term::Intercept => "intercept".to_string(),
        Term::Feature { feature } => format!("z_{feature}"),
        Term::Home => "home_indicator".to_string(),
        Term::Referee { referee } => format!("referee_{}", referee.0),
        Term::RefereeSlope { referee, feature } => format!("z_{feature}:referee_{}", referee.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_version_tracks_feature_list() {
        let a = FeatureSchema::new("playstyle", vec!["ppda".into()], vec![]);
        let b = FeatureSchema::new("playstyle", vec!["ppda".into()], vec![]);
        let c = FeatureSchema::new("playstyle", vec!["ppda".into()], vec!["ppda".into()]);
        assert_eq!(a.version, b.version);
        assert_ne!(a.version, c.version);
        assert!(c.is_interaction("ppda"));
    }

    #[test]
    fn term_labels_name_referees() {
        let mut reg = RefereeRegistry::new();
        let id = reg.intern("Daniele Orsato").unwrap();
        let t = Term::RefereeSlope {
            referee: id,
            feature: "directness".into(),
        };
        assert_eq!(t.label(&reg), "z_directness:referee[Daniele Orsato]");
        assert!(t.penalized());
        assert!(!Term::Home.penalized());
    }
}
