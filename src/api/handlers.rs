use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{ApiError, AppState};
use crate::ai::recipes::DEFAULT_SUGGESTIONS;
use crate::ai::{DishIdea, LlmClient, MealType, Recipe, RecipeSuggestor};
use crate::pipeline::CaptureStatus;
use crate::storage::{LogEntry, Order};

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    limit: Option<usize>,
    #[serde(default)]
    order: Order,
}

#[derive(Debug, Deserialize)]
pub struct RecipeQuery {
    meal_type: Option<String>,
    #[serde(alias = "num")]
    num_suggestions: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct FullRecipeRequest {
    name: String,
    #[serde(default, rename = "requiredAmounts", alias = "required_amounts")]
    required_amounts: BTreeMap<String, f64>,
}

fn query<T>(q: Result<Query<T>, QueryRejection>) -> ApiResult<T> {
    q.map(|Query(t)| t)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

fn meal_type(raw: Option<&str>) -> ApiResult<MealType> {
    Ok(raw.map(str::parse::<MealType>).transpose()?.unwrap_or_default())
}

fn suggestor<C>(state: &AppState<C>) -> ApiResult<Arc<RecipeSuggestor<C>>> {
    state.recipes.clone().ok_or_else(|| {
        ApiError::unavailable("Recipe suggestions need a model API key (set OPENAI_API_KEY)")
    })
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "message": "Server is running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn list_log<C>(
    State(state): State<AppState<C>>,
    q: Result<Query<LogQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    let q = query(q)?;
    Ok(Json(state.log.entries(q.limit, q.order).await?))
}

pub async fn get_entry<C>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> ApiResult<Json<LogEntry>> {
    state
        .log
        .entry(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("No log entry with id {}", id)))
}

pub async fn delete_entry<C>(
    State(state): State<AppState<C>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.log.delete_entry(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("No log entry with id {}", id)))
    }
}

pub async fn recipes<C: LlmClient>(
    State(state): State<AppState<C>>,
    q: Result<Query<RecipeQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Recipe>>> {
    let q = query(q)?;
    let meal_type = meal_type(q.meal_type.as_deref())?;
    let count = q.num_suggestions.unwrap_or(DEFAULT_SUGGESTIONS);

    let suggestor = suggestor(&state)?;
    let ingredients = state.log.ingredients().await?;
    Ok(Json(suggestor.suggest(&ingredients, meal_type, count).await?))
}

pub async fn dishes<C: LlmClient>(
    State(state): State<AppState<C>>,
    q: Result<Query<RecipeQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<DishIdea>>> {
    let q = query(q)?;
    let meal_type = meal_type(q.meal_type.as_deref())?;

    let suggestor = suggestor(&state)?;
    let ingredients = state.log.ingredients().await?;
    Ok(Json(suggestor.dish_ideas(&ingredients, meal_type).await?))
}

pub async fn full_recipe<C: LlmClient>(
    State(state): State<AppState<C>>,
    body: Result<Json<FullRecipeRequest>, JsonRejection>,
) -> ApiResult<Json<Recipe>> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let suggestor = suggestor(&state)?;
    Ok(Json(
        suggestor
            .full_recipe(&request.name, &request.required_amounts)
            .await?,
    ))
}

pub async fn trigger_capture<C>(State(state): State<AppState<C>>) -> ApiResult<impl IntoResponse> {
    let handle = state
        .capture
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("No capture pipeline in this mode"))?;
    handle.trigger()?;
    tracing::info!("Capture requested over HTTP");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "started", "message": "Capture started" })),
    ))
}

pub async fn capture_status<C>(State(state): State<AppState<C>>) -> ApiResult<Json<CaptureStatus>> {
    state
        .capture
        .as_ref()
        .map(|handle| Json(handle.status()))
        .ok_or_else(|| ApiError::unavailable("No capture pipeline in this mode"))
}
