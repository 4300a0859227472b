use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use tower::ServiceExt;

use zone_discipline::api::{AppState, build_router};
use zone_discipline::config::{EngineConfig, FitConfig};
use zone_discipline::model_store::ModelStore;
use zone_discipline::modeler::{ZoneModelSet, fit};
use zone_discipline::synthetic::{DEFAULT_REFEREES, LeagueSpec, generate};

static MODELS: Lazy<ZoneModelSet> = Lazy::new(|| {
    let spec = LeagueSpec {
        teams: 10,
        seasons: 2,
        rounds: 2,
        referees: DEFAULT_REFEREES[..4].iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    };
    let (dataset, _) = generate(&spec);
    fit(&dataset, &FitConfig::default()).unwrap()
});

fn app() -> Router {
    let config = EngineConfig {
        db_path: None,
        model_path: None,
        ..Default::default()
    };
    let state = AppState::new(ModelStore::with_models(MODELS.clone()), config);
    build_router(Arc::new(state))
}

async fn send(req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let resp = app().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).expect("response should be an envelope");
    (status, json)
}

fn predict(body: &'static str) -> Request<Body> {
    Request::post("/api/analytics/predict-fouls")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn empty_predict_body_is_unprocessable() {
    let (status, body) = send(predict("")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn broken_json_is_a_bad_request() {
    let (status, body) = send(predict("{\"team_features\": ")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn missing_team_features_is_unprocessable() {
    let (status, _) = send(predict(r#"{"referee_name": "Felix Brych"}"#)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let (status, _) = send(predict(r#"{"team_features": {}}"#)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn predict_returns_zones_and_summary() {
    let (status, body) = send(predict(
        r#"{"team_features": {"z_directness": 0.5, "z_ppda": 1.0, "possession_share": 0.55},
            "referee_name": "Antonio Mateu Lahoz"}"#,
    ))
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body.get("error").is_none());
    let data = &body["data"];
    assert_eq!(data["referee"]["status"], "known");
    assert!(data["zones"].as_array().unwrap().len() >= 10);
    assert!(data["summary"]["total_expected"].as_f64().unwrap() > 0.0);
    assert!(data["summary"]["hottest_zone"].is_string());
}

#[tokio::test]
async fn status_reports_loaded_models() {
    let (status, body) = send(get("/api/analytics/zone-models/status")).await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["available"], true);
    assert_eq!(data["total_models"], 15);
    assert!(data["zones_analyzed"].as_u64().unwrap() >= 10);
    assert!(data["diagnostics"]["convergence_rate"].as_f64().is_some());
}

#[tokio::test]
async fn slopes_for_interaction_feature() {
    let (status, body) = send(get("/api/analytics/zone-models/referee-slopes/directness")).await;
    assert_eq!(status, StatusCode::OK);
    let slopes = body["data"]["slopes"].as_array().unwrap();
    assert!(!slopes.is_empty());
    assert!(slopes[0]["slope"]["ci_lower"].is_number());
    assert_eq!(body["data"]["summary"]["referees"], 4);
}

#[tokio::test]
async fn slopes_for_unknown_feature_are_empty_not_an_error() {
    let (status, body) = send(get("/api/analytics/zone-models/referee-slopes/shoe_size")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["data"]["slopes"].as_array().unwrap().is_empty());
    assert_eq!(body["data"]["summary"]["count"], 0);
}

#[tokio::test]
async fn referee_effects_endpoint_lists_effects() {
    let (status, body) = send(get("/api/analytics/zone-models/referee-effects")).await;
    assert_eq!(status, StatusCode::OK);
    let effects = body["data"].as_array().unwrap();
    assert!(!effects.is_empty());
    assert!(effects[0]["rate_ratio"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn features_include_model_schema() {
    let (status, body) = send(get("/api/analytics/available-features")).await;
    assert_eq!(status, StatusCode::OK);
    let model_features = body["data"]["model_features"].as_array().unwrap();
    assert!(model_features.iter().any(|f| f == "directness"));
    assert!(body["data"]["categories"]["spatial"].is_object());
}
