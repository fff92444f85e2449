/**
 * API REST - Serveur HTTP du contrôleur
 *
 * RÔLE : exposer le service des unités (registration, lecture, suppression,
 * tokens, statut en cache) et l'état du contrôleur.
 *
 * FONCTIONNEMENT :
 * - Axum, réponses JSON au format { code, message, data }
 * - Header x-api-key obligatoire sauf /health et POST /units/register
 * - Lecture statut = cache uniquement, jamais d'appel réseau dans la requête
 */

use crate::cache::StatusCache;
use crate::error::UnitError;
use crate::health::{ControllerHealth, HealthTracker};
use crate::models::{RegistrationKind, RegistrationRequest};
use crate::units::UnitService;
use axum::extract::{Path, Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub units: UnitService,
    pub cache: Arc<StatusCache>,
    pub health: HealthTracker,
    pub api_key: Option<Arc<str>>,
}

#[derive(Debug, Serialize)]
struct Envelope<T: Serialize> {
    code: u16,
    message: String,
    data: Option<T>,
}

fn reply<T: Serialize>(status: StatusCode, message: &str, data: Option<T>) -> Response {
    let body = Envelope {
        code: status.as_u16(),
        message: message.to_string(),
        data,
    };
    (status, Json(body)).into_response()
}

/// Conversion erreur service -> réponse HTTP
struct ApiError(UnitError);

impl From<UnitError> for ApiError {
    fn from(e: UnitError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            UnitError::Validation(_) => StatusCode::BAD_REQUEST,
            UnitError::NotFound(_) => StatusCode::NOT_FOUND,
            UnitError::Store(e) => {
                error!(error = %e, "store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        reply::<()>(status, &self.0.to_string(), None)
    }
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    let path = req.uri().path().to_owned();

    // health + registration des unités toujours accessibles
    if path == "/health" || (path == "/units/register" && req.method() == Method::POST) {
        return Ok(next.run(req).await);
    }

    // token d'unité : lecture de sa propre fiche / info uniquement
    if req.method() == Method::GET {
        if let Some(unit_id) = bearer_unit(&app, &req) {
            if unit_read_path(&path, &unit_id) {
                return Ok(next.run(req).await);
            }
        }
    }

    let Some(expected) = app.api_key.as_deref() else {
        warn!("FLEET_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

fn bearer_unit(app: &AppState, req: &Request) -> Option<String> {
    let header = req.headers().get("authorization")?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?;
    app.units.validate_token(token.trim())
}

fn unit_read_path(path: &str, unit_id: &str) -> bool {
    match path.strip_prefix("/units/").and_then(|rest| rest.strip_prefix(unit_id)) {
        Some("") | Some("/info") => true,
        _ => false,
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/units", get(list_units))
        .route("/units/register", post(register_unit))
        .route("/units/{unit_id}", get(get_unit).delete(delete_unit))
        .route("/units/{unit_id}/token", get(get_token))
        .route("/units/{unit_id}/info", get(get_unit_info))
        .fallback(|| async { reply::<()>(StatusCode::NOT_FOUND, "API not found", None) })
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

// GET /system/health (503 si la boucle de sync est arrêtée)
async fn get_system_health(
    State(app): State<AppState>,
) -> Result<(StatusCode, Json<ControllerHealth>), ApiError> {
    let units = app.units.list_units().await?;
    let status = if app.health.sync_alive() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(app.health.get_health(units.len(), &app.cache))))
}

// POST /units/register
async fn register_unit(
    State(app): State<AppState>,
    Json(req): Json<RegistrationRequest>,
) -> Result<Response, ApiError> {
    let outcome = app.units.register(req).await?;
    let message = match (&outcome.kind, outcome.status_cached) {
        (RegistrationKind::New, true) => "unit registered successfully",
        (RegistrationKind::New, false) => "unit registered, status pending",
        (RegistrationKind::Reregistered { .. }, true) => "unit re-registered successfully",
        (RegistrationKind::Reregistered { .. }, false) => "unit re-registered, status pending",
    };
    Ok(reply(StatusCode::OK, message, Some(outcome.unit)))
}

// GET /units
async fn list_units(State(app): State<AppState>) -> Result<Response, ApiError> {
    let units = app.units.list_units().await?;
    Ok(reply(StatusCode::OK, "units listed successfully", Some(units)))
}

// GET /units/{unit_id}
async fn get_unit(State(app): State<AppState>, Path(unit_id): Path<String>) -> Result<Response, ApiError> {
    let unit = app.units.get_unit(&unit_id).await?;
    Ok(reply(StatusCode::OK, "unit found", Some(unit)))
}

// DELETE /units/{unit_id}
async fn delete_unit(State(app): State<AppState>, Path(unit_id): Path<String>) -> Result<Response, ApiError> {
    app.units.delete_unit(&unit_id).await?;
    Ok(reply::<()>(StatusCode::OK, "unit deleted successfully", None))
}

// GET /units/{unit_id}/token
async fn get_token(State(app): State<AppState>, Path(unit_id): Path<String>) -> Result<Response, ApiError> {
    let token = app.units.issue_token(&unit_id).await?;
    Ok(reply(StatusCode::OK, "unit token issued", Some(token)))
}

// GET /units/{unit_id}/info (cache uniquement)
async fn get_unit_info(State(app): State<AppState>, Path(unit_id): Path<String>) -> Result<Response, ApiError> {
    app.units.get_unit(&unit_id).await?;
    match app.units.cached_status(&unit_id) {
        Some(status) => Ok(reply(StatusCode::OK, "unit info found", Some(status.as_ref().clone()))),
        None => Ok(reply::<()>(StatusCode::OK, "unit info not available yet", None)),
    }
}
