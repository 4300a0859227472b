use once_cell::sync::Lazy;

use zone_discipline::config::FitConfig;
use zone_discipline::error::EngineError;
use zone_discipline::glm::WaldStat;
use zone_discipline::modeler::{ZoneModelSet, fit};
use zone_discipline::prediction::{
    PredictionRequest, RefereeStatus, predict_fouls, referee_effects, referee_slopes,
};
use zone_discipline::synthetic::{LeagueSpec, generate};

static MODELS: Lazy<ZoneModelSet> = Lazy::new(|| {
    let (dataset, _) = generate(&LeagueSpec::default());
    fit(&dataset, &FitConfig::default()).unwrap()
});

fn scenario(referee: &str) -> PredictionRequest {
    PredictionRequest {
        team_features: [
            ("z_directness".to_string(), 0.5),
            ("z_ppda".to_string(), 12.5),
            ("possession_share".to_string(), 0.6),
        ]
        .into_iter()
        .collect(),
        referee_name: Some(referee.to_string()),
        ..Default::default()
    }
}

#[test]
fn scenario_prediction_is_plausible_with_one_hottest_zone() {
    let out = predict_fouls(&MODELS, &scenario("Antonio Mateu Lahoz"), 4.0).unwrap();
    assert_eq!(out.referee.status, RefereeStatus::Known);
    assert!(
        (5.0..=25.0).contains(&out.summary.total_expected),
        "total {}",
        out.summary.total_expected
    );
    assert!(out.summary.total_lower <= out.summary.total_expected);
    assert!(out.summary.total_expected <= out.summary.total_upper);

    let max_dev = out
        .zones
        .iter()
        .map(|z| z.deviation)
        .fold(f64::NEG_INFINITY, f64::max);
    let hottest: Vec<_> = out
        .zones
        .iter()
        .filter(|z| z.zone_id == out.summary.hottest_zone_id)
        .collect();
    assert_eq!(hottest.len(), 1);
    assert_eq!(hottest[0].deviation, max_dev);
    assert_eq!(hottest[0].zone, out.summary.hottest_zone);

    assert_eq!(out.standardized["ppda"], 4.0);
    assert!(out.clipped_features.contains(&"ppda".to_string()));
    assert!(out.ignored_features.is_empty());
    assert_eq!(out.zones.len(), MODELS.available().count());
}

#[test]
fn zone_predictions_carry_spatial_context() {
    let out = predict_fouls(&MODELS, &scenario("Antonio Mateu Lahoz"), 4.0).unwrap();
    let z = out.zones.iter().find(|z| z.zone_id == 7).unwrap();
    assert_eq!(z.zone, "x2_y1");
    assert_eq!(z.x_range, [48.0, 72.0]);
    assert_eq!(z.description, "middle third, central channel");
    assert!(z.lower < z.expected_fouls && z.expected_fouls < z.upper);
    assert!((z.deviation - (z.expected_fouls - z.population_mean)).abs() < 1e-12);
}

#[test]
fn unseen_referee_gets_flagged_population_average() {
    let out = predict_fouls(&MODELS, &scenario("Pierluigi Collina"), 4.0).unwrap();
    assert_eq!(out.referee.status, RefereeStatus::Unseen);
    assert!(out.zones.iter().all(|z| z.referee_fallback));

    // The population average is not the zero-effect prediction: it weights
    // each referee's deviation by their share of the zone's matches.
    let no_referee = PredictionRequest {
        referee_name: None,
        ..scenario("")
    };
    let anon = predict_fouls(&MODELS, &no_referee, 4.0).unwrap();
    assert_eq!(anon.referee.status, RefereeStatus::NotProvided);
    for (a, b) in out.zones.iter().zip(&anon.zones) {
        assert!((a.expected_fouls - b.expected_fouls).abs() < 1e-12);
    }
}

#[test]
fn unaccented_spelling_finds_the_same_referee() {
    let accented = predict_fouls(&MODELS, &scenario("Clément Turpin"), 4.0).unwrap();
    let plain = predict_fouls(&MODELS, &scenario("CLEMENT TURPIN"), 4.0).unwrap();
    assert_eq!(plain.referee.status, RefereeStatus::Known);
    assert_eq!(plain.referee.referee_id, accented.referee.referee_id);
    assert!(plain.referee.fallback_zones.is_empty());
    assert_eq!(plain.summary.total_expected, accented.summary.total_expected);
}

#[test]
fn raw_feature_without_a_norm_is_reported_as_defaulted() {
    let mut set = MODELS.clone();
    set.norms.pooled.features.remove("possession_share");
    let out = predict_fouls(&set, &scenario("Felix Brych"), 4.0).unwrap();
    assert_eq!(out.standardized["possession_share"], 0.0);
    assert!(out.defaulted_features.contains(&"possession_share".to_string()));
    assert!(!out.defaulted_features.contains(&"directness".to_string()));
    assert!(out.ignored_features.is_empty());
}

#[test]
fn referee_identity_changes_the_prediction() {
    let a = predict_fouls(&MODELS, &scenario("Antonio Mateu Lahoz"), 4.0).unwrap();
    let b = predict_fouls(&MODELS, &scenario("Felix Brych"), 4.0).unwrap();
    assert_ne!(a.summary.total_expected, b.summary.total_expected);
}

#[test]
fn slopes_flag_only_intervals_excluding_zero() {
    let report = referee_slopes(&MODELS, "directness").unwrap();
    assert_eq!(report.summary.referees, 10);
    assert_eq!(report.summary.zones, MODELS.available().count());
    assert_eq!(report.slopes.len(), 10 * report.summary.zones);
    let sig = MODELS.config.significance_level;
    for s in &report.slopes {
        let excludes_zero = s.slope.ci_lower > 0.0 || s.slope.ci_upper < 0.0;
        assert_eq!(s.significant, excludes_zero && !s.population_average);
        if !excludes_zero {
            let flipped = WaldStat::new(-s.slope.estimate, s.slope.std_error, sig);
            assert!(!flipped.significant());
        }
        assert!(s.slope.ci_lower <= s.slope.estimate && s.slope.estimate <= s.slope.ci_upper);
    }
}

#[test]
fn unknown_slope_feature_is_an_error_in_the_engine() {
    assert_eq!(
        referee_slopes(&MODELS, "shoe_size").unwrap_err(),
        EngineError::UnknownFeature {
            feature: "shoe_size".to_string()
        }
    );
}

#[test]
fn referee_effects_cover_every_referee_with_terms() {
    let effects = referee_effects(&MODELS).unwrap();
    let zones = MODELS.available().count();
    assert_eq!(effects.len(), 10 * zones);
    for e in &effects {
        assert!((e.rate_ratio - e.effect.estimate.exp()).abs() < 1e-12);
        assert!(e.weight > 0.0 && e.weight < 1.0);
    }
}

#[test]
fn empty_model_set_is_unavailable() {
    let (dataset, _) = generate(&LeagueSpec {
        teams: 4,
        seasons: 1,
        ..Default::default()
    });
    let config = FitConfig {
        min_zone_samples: 1_000,
        ..Default::default()
    };
    let set = fit(&dataset, &config).unwrap();
    assert_eq!(
        predict_fouls(&set, &scenario("Antonio Mateu Lahoz"), 4.0).unwrap_err(),
        EngineError::ModelUnavailable
    );
}
