use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::features::RawTeamMatchFeatures;

/// Populations smaller than this are standardized against the pooled norms.
pub const MIN_POPULATION_ROWS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureNorm {
    pub mean: f64,
    pub std: f64,
    pub n: usize,
}

impl FeatureNorm {
    pub fn z(&self, x: f64) -> f64 {
        if self.std > 1e-12 {
            (x - self.mean) / self.std
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceNorms {
    pub population: String,
    pub features: BTreeMap<String, FeatureNorm>,
}

impl ReferenceNorms {
    pub fn fit<'a>(
        population: &str,
        rows: impl IntoIterator<Item = &'a RawTeamMatchFeatures>,
        names: &[String],
    ) -> Self {
        let mut columns: BTreeMap<&str, Vec<f64>> =
            names.iter().map(|n| (n.as_str(), Vec::new())).collect();
        for row in rows {
            for (name, col) in columns.iter_mut() {
                if let Some(v) = row.get(name) {
                    col.push(v);
                }
            }
        }
        let features = columns
            .into_iter()
            .map(|(name, col)| (name.to_string(), column_norm(col)))
            .collect();
        Self {
            population: population.to_string(),
            features,
        }
    }

    pub fn z(&self, name: &str, x: f64) -> Option<f64> {
        self.features.get(name).map(|n| n.z(finite_or(x, n)))
    }
}

fn finite_or(x: f64, norm: &FeatureNorm) -> f64 {
    if x.is_finite() {
        x
    } else if x > 0.0 {
        norm.mean + 10.0 * norm.std
    } else {
        norm.mean - 10.0 * norm.std
    }
}

/// Mean and sample standard deviation. Infinite entries (a team with no
/// pressing actions has unbounded PPDA) take the largest finite value.
fn column_norm(mut col: Vec<f64>) -> FeatureNorm {
    let finite_max = col
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    col.retain(|v| !v.is_nan());
    for v in col.iter_mut() {
        if v.is_infinite() {
            *v = if finite_max.is_finite() { finite_max } else { 0.0 };
        }
    }
    let n = col.len();
    if n == 0 {
        return FeatureNorm {
            mean: 0.0,
            std: 0.0,
            n,
        };
    }
    let mean = col.iter().sum::<f64>() / n as f64;
    let std = if n > 1 {
        (col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
    } else {
        0.0
    };
    FeatureNorm { mean, std, n }
}

pub fn population_key(row: &RawTeamMatchFeatures) -> String {
    match (row.competition_id, row.season_id) {
        (Some(c), Some(s)) => format!("{c}:{s}"),
        _ => "unknown".to_string(),
    }
}

/// Versioned reference populations: one per competition-season plus a pooled
/// fallback. The version is a content hash, so identical inputs reproduce
/// identical z-scores and an identical version string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormSet {
    pub version: String,
    pub feature_names: Vec<String>,
    pub pooled: ReferenceNorms,
    pub by_population: BTreeMap<String, ReferenceNorms>,
}

impl NormSet {
    pub fn fit(rows: &[RawTeamMatchFeatures], feature_names: &[String]) -> Self {
        let pooled = ReferenceNorms::fit("pooled", rows, feature_names);
        let mut groups: BTreeMap<String, Vec<&RawTeamMatchFeatures>> = BTreeMap::new();
        for row in rows {
            groups.entry(population_key(row)).or_default().push(row);
        }
        let by_population = groups
            .into_iter()
            .filter(|(_, members)| members.len() >= MIN_POPULATION_ROWS)
            .map(|(key, members)| {
                let norms = ReferenceNorms::fit(&key, members.iter().copied(), feature_names);
                (key, norms)
            })
            .collect();
        let mut out = Self {
            version: String::new(),
            feature_names: feature_names.to_vec(),
            pooled,
            by_population,
        };
        out.version = out.fingerprint();
        out
    }

    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for name in &self.feature_names {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
        }
        for norms in std::iter::once(&self.pooled).chain(self.by_population.values()) {
            hasher.update(norms.population.as_bytes());
            for (name, n) in &norms.features {
                hasher.update(name.as_bytes());
                hasher.update(n.mean.to_le_bytes());
                hasher.update(n.std.to_le_bytes());
                hasher.update((n.n as u64).to_le_bytes());
            }
        }
        let digest = format!("{:x}", hasher.finalize());
        format!("norms-{}", &digest[..16])
    }

    pub fn norms_for(&self, row: &RawTeamMatchFeatures) -> &ReferenceNorms {
        self.by_population
            .get(&population_key(row))
            .unwrap_or(&self.pooled)
    }

    pub fn standardize(&self, row: &RawTeamMatchFeatures) -> TeamMatchFeatures {
        let norms = self.norms_for(row);
        let z = self
            .feature_names
            .iter()
            .filter_map(|name| {
                let v = row.get(name)?;
                Some((name.clone(), norms.z(name, v)?))
            })
            .collect();
        TeamMatchFeatures {
            match_id: row.match_id,
            team: row.team.clone(),
            opponent: row.opponent.clone(),
            referee: row.referee.clone(),
            home: row.home,
            norms_version: self.version.clone(),
            population: norms.population.clone(),
            raw: row.values.clone(),
            z,
        }
    }
}

/// Standardized playstyle record for one team in one match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMatchFeatures {
    pub match_id: u64,
    pub team: String,
    pub opponent: String,
    pub referee: Option<String>,
    pub home: bool,
    pub norms_version: String,
    pub population: String,
    pub raw: BTreeMap<String, f64>,
    pub z: BTreeMap<String, f64>,
}

impl TeamMatchFeatures {
    pub fn z(&self, name: &str) -> Option<f64> {
        self.z.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(match_id: u64, ppda: f64) -> RawTeamMatchFeatures {
        RawTeamMatchFeatures {
            match_id,
            team: "A".into(),
            opponent: "B".into(),
            referee: None,
            home: true,
            competition_id: Some(1),
            season_id: Some(2),
            values: [("ppda".to_string(), ppda)].into_iter().collect(),
        }
    }

    #[test]
    fn zscores_use_sample_std() {
        let rows = vec![row(1, 8.0), row(2, 10.0), row(3, 12.0)];
        let norms = NormSet::fit(&rows, &["ppda".to_string()]);
        let f = norms.standardize(&rows[2]);
        assert!((f.z("ppda").unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(f.population, "pooled");
    }

    #[test]
    fn infinite_values_take_finite_max() {
        let n = column_norm(vec![1.0, 3.0, f64::INFINITY]);
        assert_eq!(n.n, 3);
        assert!((n.mean - 7.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn constant_column_gives_zero() {
        let rows = vec![row(1, 5.0), row(2, 5.0)];
        let norms = NormSet::fit(&rows, &["ppda".to_string()]);
        assert_eq!(norms.standardize(&rows[0]).z("ppda"), Some(0.0));
    }

    #[test]
    fn version_is_reproducible() {
        let rows = vec![row(1, 8.0), row(2, 10.0)];
        let names = vec!["ppda".to_string()];
        assert_eq!(NormSet::fit(&rows, &names).version, NormSet::fit(&rows, &names).version);
        let other = vec![row(1, 8.0), row(2, 11.0)];
        assert_ne!(NormSet::fit(&rows, &names).version, NormSet::fit(&other, &names).version);
    }

    #[test]
    fn large_population_gets_own_norms() {
        let rows: Vec<_> = (0..MIN_POPULATION_ROWS as u64).map(|i| row(i, i as f64)).collect();
        let norms = NormSet::fit(&rows, &["ppda".to_string()]);
        assert_eq!(norms.standardize(&rows[0]).population, "1:2");
    }
}
