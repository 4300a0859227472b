//! HTTP facade over the engine. Every response uses the same envelope:
//! `{success, data, error?}`.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::dataset_store::{load_team_match, open_db};
use crate::error::EngineError;
use crate::events::{MatchInfo, teams_in};
use crate::features::{FeatureCategory, extract_team_match_features, feature_catalog};
use crate::model_store::ModelStore;
use crate::prediction::{
    PredictionRequest, RefereeSlopeReport, SlopeSummary, model_status, predict_fouls,
    referee_effects, referee_slopes,
};
use crate::standardize::{NormSet, TeamMatchFeatures};
use crate::statsbomb;

pub struct AppState {
    pub models: ModelStore,
    pub config: EngineConfig,
}

impl AppState {
    pub fn new(models: ModelStore, config: EngineConfig) -> Self {
        Self { models, config }
    }
}

#[derive(Debug, Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn ok<T: Serialize>(data: T) -> Response {
    Json(Envelope {
        success: true,
        data: Some(data),
        error: None,
    })
    .into_response()
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::UnknownFeature { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = self.status.as_u16(), error = %self.message, "request failed");
        let body = Envelope::<()> {
            success: false,
            data: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult = std::result::Result<Response, ApiError>;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/analytics/zone-models/status", get(status_handler))
        .route("/api/analytics/available-features", get(features_handler))
        .route(
            "/api/analytics/team-match-features/{match_id}",
            get(team_match_features_handler),
        )
        .route("/api/analytics/predict-fouls", post(predict_handler))
        .route(
            "/api/analytics/zone-models/referee-slopes/{feature}",
            get(slopes_handler),
        )
        .route(
            "/api/analytics/zone-models/referee-effects",
            get(effects_handler),
        )
        .with_state(state)
}

async fn status_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let snapshot = state.models.snapshot();
    Ok(ok(model_status(snapshot.as_deref())))
}

#[derive(Debug, Serialize)]
struct FeatureCatalogResponse {
    categories: BTreeMap<FeatureCategory, BTreeMap<&'static str, &'static str>>,
    /// Features the loaded models were fitted on, empty without models.
    model_features: Vec<String>,
    interaction_features: Vec<String>,
}

async fn features_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let snapshot = state.models.snapshot();
    let (model_features, interaction_features) = snapshot
        .as_deref()
        .map(|s| {
            (
                s.schema.features.clone(),
                s.schema.interaction_features.clone(),
            )
        })
        .unwrap_or_default();
    Ok(ok(FeatureCatalogResponse {
        categories: feature_catalog(),
        model_features,
        interaction_features,
    }))
}

async fn predict_handler(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(EngineError::InvalidRequest("request body is empty".to_string()).into());
    }
    let value: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("malformed json: {e}")))?;
    let request: PredictionRequest = serde_json::from_value(value)
        .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;
    let set = state.models.snapshot().ok_or(EngineError::ModelUnavailable)?;
    let result = predict_fouls(&set, &request, state.config.z_clip)?;
    Ok(ok(result))
}

async fn slopes_handler(
    State(state): State<Arc<AppState>>,
    Path(feature): Path<String>,
) -> ApiResult {
    let set = state.models.snapshot().ok_or(EngineError::ModelUnavailable)?;
    match referee_slopes(&set, &feature) {
        Ok(report) => Ok(ok(report)),
        Err(EngineError::UnknownFeature { .. }) => {
            info!(%feature, "slope query for a feature without referee terms");
            Ok(ok(RefereeSlopeReport {
                feature,
                feature_set: set.schema.version.clone(),
                slopes: Vec::new(),
                summary: SlopeSummary::default(),
            }))
        }
        Err(e) => Err(e.into()),
    }
}

async fn effects_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let set = state.models.snapshot().ok_or(EngineError::ModelUnavailable)?;
    Ok(ok(referee_effects(&set)?))
}

#[derive(Debug, Serialize)]
pub struct MatchFeaturesResponse {
    pub match_id: u64,
    pub source: &'static str,
    pub teams: Vec<TeamMatchFeatures>,
}

async fn team_match_features_handler(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<String>,
) -> ApiResult {
    let match_id: u64 = match_id.trim().parse().map_err(|_| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("invalid match id '{match_id}'"),
        )
    })?;
    let worker = Arc::clone(&state);
    let loaded = tokio::task::spawn_blocking(move || load_match_features(&worker, match_id))
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    match loaded {
        Ok(resp) => Ok(ok(resp)),
        Err(e) => Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{e:#}"),
        )),
    }
}

/// Stored rows when the dataset has the match, otherwise a live extraction
/// standardized against the norms of the loaded models.
fn load_match_features(state: &AppState, match_id: u64) -> Result<MatchFeaturesResponse> {
    if let Some(path) = state.config.db_path.as_deref()
        && path.exists()
    {
        let conn = open_db(path)?;
        let teams = load_team_match(&conn, match_id)?;
        if !teams.is_empty() {
            return Ok(MatchFeaturesResponse {
                match_id,
                source: "dataset",
                teams,
            });
        }
    }

    let norms: NormSet = state
        .models
        .snapshot()
        .map(|s| s.norms.clone())
        .ok_or_else(|| anyhow!("match {match_id} is not in the dataset and no reference norms are loaded"))?;
    let events = statsbomb::fetch_events(match_id)?;
    let teams = teams_in(&events);
    let [home, away] = teams.as_slice() else {
        return Err(anyhow!("match {match_id}: expected two teams, found {}", teams.len()));
    };
    let info = MatchInfo {
        match_id,
        match_date: None,
        competition_id: None,
        season_id: None,
        season_name: None,
        home_team: home.clone(),
        away_team: away.clone(),
        referee: None,
    };
    let mut out = Vec::with_capacity(2);
    for team in [home, away] {
        let raw = extract_team_match_features(&events, &info, team)
            .with_context(|| format!("extract features for {team}"))?;
        out.push(norms.standardize(&raw));
    }
    Ok(MatchFeaturesResponse {
        match_id,
        source: "statsbomb",
        teams: out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn empty_state() -> Arc<AppState> {
        let config = EngineConfig {
            db_path: None,
            model_path: None,
            ..Default::default()
        };
        Arc::new(AppState::new(ModelStore::new(), config))
    }

    async fn call(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn status_reports_missing_models() {
        let (status, body) = call(
            build_router(empty_state()),
            Request::builder()
                .uri("/api/analytics/zone-models/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["available"], false);
    }

    #[tokio::test]
    async fn predict_without_models_is_unavailable() {
        let (status, body) = call(
            build_router(empty_state()),
            Request::post("/api/analytics/predict-fouls")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"team_features":{"z_ppda":1.0}}"#))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn catalog_lists_categories() {
        let (status, body) = call(
            build_router(empty_state()),
            Request::builder()
                .uri("/api/analytics/available-features")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["categories"]["playstyle"]["ppda"].is_string());
        assert!(body["data"]["categories"]["discipline"].is_object());
    }

    #[tokio::test]
    async fn bad_match_id_is_a_server_error() {
        let (status, body) = call(
            build_router(empty_state()),
            Request::builder()
                .uri("/api/analytics/team-match-features/not-a-number")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
    }
}
