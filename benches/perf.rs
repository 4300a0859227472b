use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use zone_discipline::config::FitConfig;
use zone_discipline::discipline::{CardTreatment, extract_zone_discipline};
use zone_discipline::events::{MatchInfo, parse_events_json};
use zone_discipline::features::extract_team_match_features;
use zone_discipline::modeler::fit;
use zone_discipline::prediction::{PredictionRequest, predict_fouls, referee_slopes};
use zone_discipline::synthetic::{DEFAULT_REFEREES, LeagueSpec, generate};
use zone_discipline::zones::ZoneGrid;

const EVENTS_JSON: &str = include_str!("../tests/fixtures/statsbomb_events.json");

fn fixture_info() -> MatchInfo {
    MatchInfo {
        match_id: 3788741,
        match_date: None,
        competition_id: Some(55),
        season_id: Some(43),
        season_name: None,
        home_team: "Spain".to_string(),
        away_team: "Germany".to_string(),
        referee: Some("Antonio Mateu Lahoz".to_string()),
    }
}

fn small_league() -> LeagueSpec {
    LeagueSpec {
        teams: 10,
        seasons: 2,
        rounds: 2,
        referees: DEFAULT_REFEREES[..5].iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

fn bench_zone_of(c: &mut Criterion) {
    let grid = ZoneGrid::default();
    c.bench_function("zone_of_grid_sweep", |b| {
        b.iter(|| {
            let mut acc = 0usize;
            for i in 0..120 {
                for j in 0..80 {
                    acc += grid.zone_of(black_box(i as f64 + 0.5), black_box(j as f64 + 0.5));
                }
            }
            black_box(acc);
        })
    });
}

fn bench_extraction(c: &mut Criterion) {
    let events = parse_events_json(EVENTS_JSON).expect("valid fixture json");
    let info = fixture_info();
    let grid = ZoneGrid::default();
    c.bench_function("team_match_extraction", |b| {
        b.iter(|| {
            let features = extract_team_match_features(black_box(&events), &info, "Spain").unwrap();
            let discipline =
                extract_zone_discipline(black_box(&events), 3788741, "Spain", &grid, CardTreatment::Separate);
            black_box((features.values.len(), discipline.total_fouls));
        })
    });
}

fn bench_zone_fit(c: &mut Criterion) {
    let (dataset, _) = generate(&small_league());
    let config = FitConfig::default();
    let mut group = c.benchmark_group("zone_fit");
    group.sample_size(10);
    group.bench_function("fit_all_zones", |b| {
        b.iter(|| {
            let set = fit(black_box(&dataset), &config).unwrap();
            black_box(set.models.len());
        })
    });
    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let (dataset, _) = generate(&small_league());
    let set = fit(&dataset, &FitConfig::default()).unwrap();
    let request = PredictionRequest {
        team_features: [("z_directness".to_string(), 0.5), ("ppda".to_string(), 9.0)]
            .into_iter()
            .collect(),
        referee_name: Some("Antonio Mateu Lahoz".to_string()),
        ..Default::default()
    };
    c.bench_function("predict_fouls", |b| {
        b.iter(|| {
            let out = predict_fouls(black_box(&set), black_box(&request), 4.0).unwrap();
            black_box(out.summary.total_expected);
        })
    });
    c.bench_function("referee_slopes", |b| {
        b.iter(|| {
            let report = referee_slopes(black_box(&set), "directness").unwrap();
            black_box(report.slopes.len());
        })
    });
}

criterion_group!(
    perf,
    bench_zone_of,
    bench_extraction,
    bench_zone_fit,
    bench_queries
);
criterion_main!(perf);
