use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::domain::{
    BaseUpdate, EffectiveValueView, EntityId, EntityKind, EntryFilter, EvaluationContext,
    OverrideId,
};
use super::repository::{OverrideRepository, RegistryRepository};
use super::service::{OverrideRequest, OverrideService, OverrideServiceError};

type SharedService<R, O> = Arc<OverrideService<R, O>>;

/// Router builder exposing registry reads, effective values and override edits.
pub fn registry_router<R, O>(service: SharedService<R, O>) -> Router
where
    R: RegistryRepository + 'static,
    O: OverrideRepository + 'static,
{
    Router::new()
        .route("/api/v1/registry/entries", get(list_handler::<R, O>))
        .route(
            "/api/v1/registry/entries/:entity_id",
            get(entry_handler::<R, O>),
        )
        .route(
            "/api/v1/registry/entries/:entity_id/base",
            put(update_base_handler::<R, O>),
        )
        .route(
            "/api/v1/registry/entries/:entity_id/effective",
            get(effective_handler::<R, O>),
        )
        .route(
            "/api/v1/registry/entries/:entity_id/overrides",
            get(overrides_handler::<R, O>),
        )
        .route(
            "/api/v1/registry/effective",
            get(effective_batch_handler::<R, O>),
        )
        .route("/api/v1/overrides", post(upsert_handler::<R, O>))
        .route(
            "/api/v1/overrides/:override_id",
            delete(remove_handler::<R, O>),
        )
        .with_state(service)
}

/// Query string for dashboard-wide effective values.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct BatchQuery {
    vertical: Option<String>,
    market: Option<String>,
    organization_id: Option<String>,
    app_id: Option<String>,
    kind: Option<EntityKind>,
    family: Option<String>,
    tag: Option<String>,
}

impl BatchQuery {
    fn split(self) -> (EntryFilter, EvaluationContext) {
        (
            EntryFilter {
                kind: self.kind,
                family: self.family,
                tag: self.tag,
            },
            EvaluationContext {
                vertical: self.vertical,
                market: self.market,
                organization_id: self.organization_id,
                app_id: self.app_id,
            },
        )
    }
}

pub(crate) async fn list_handler<R, O>(
    State(service): State<SharedService<R, O>>,
    filter: Result<Query<EntryFilter>, QueryRejection>,
) -> Response
where
    R: RegistryRepository + 'static,
    O: OverrideRepository + 'static,
{
    let Query(filter) = match filter {
        Ok(filter) => filter,
        Err(rejection) => return json_error(rejection.status(), rejection.body_text()),
    };
    match service.list_entries(&filter) {
        Ok(entries) => (StatusCode::OK, axum::Json(entries)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn entry_handler<R, O>(
    State(service): State<SharedService<R, O>>,
    Path(entity_id): Path<String>,
) -> Response
where
    R: RegistryRepository + 'static,
    O: OverrideRepository + 'static,
{
    match service.get_entry(&EntityId(entity_id)) {
        Ok(entry) => (StatusCode::OK, axum::Json(entry)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn update_base_handler<R, O>(
    State(service): State<SharedService<R, O>>,
    Path(entity_id): Path<String>,
    update: Result<axum::Json<BaseUpdate>, JsonRejection>,
) -> Response
where
    R: RegistryRepository + 'static,
    O: OverrideRepository + 'static,
{
    let axum::Json(update) = match update {
        Ok(update) => update,
        Err(rejection) => return json_error(rejection.status(), rejection.body_text()),
    };
    match service.update_base(&EntityId(entity_id), update) {
        Ok(entry) => (StatusCode::OK, axum::Json(entry)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn effective_handler<R, O>(
    State(service): State<SharedService<R, O>>,
    Path(entity_id): Path<String>,
    context: Result<Query<EvaluationContext>, QueryRejection>,
) -> Response
where
    R: RegistryRepository + 'static,
    O: OverrideRepository + 'static,
{
    let Query(context) = match context {
        Ok(context) => context,
        Err(rejection) => return json_error(rejection.status(), rejection.body_text()),
    };
    match service.compute_effective(&EntityId(entity_id), &context) {
        Ok(value) => (StatusCode::OK, axum::Json(value.view())).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn effective_batch_handler<R, O>(
    State(service): State<SharedService<R, O>>,
    query: Result<Query<BatchQuery>, QueryRejection>,
) -> Response
where
    R: RegistryRepository + 'static,
    O: OverrideRepository + 'static,
{
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return json_error(rejection.status(), rejection.body_text()),
    };
    let (filter, context) = query.split();
    match service.compute_effective_batch(&filter, &context) {
        Ok(values) => {
            let views: Vec<EffectiveValueView> = values.iter().map(|value| value.view()).collect();
            (StatusCode::OK, axum::Json(views)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn overrides_handler<R, O>(
    State(service): State<SharedService<R, O>>,
    Path(entity_id): Path<String>,
) -> Response
where
    R: RegistryRepository + 'static,
    O: OverrideRepository + 'static,
{
    match service.list_overrides(&EntityId(entity_id)) {
        Ok(records) => (StatusCode::OK, axum::Json(records)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn upsert_handler<R, O>(
    State(service): State<SharedService<R, O>>,
    request: Result<axum::Json<OverrideRequest>, JsonRejection>,
) -> Response
where
    R: RegistryRepository + 'static,
    O: OverrideRepository + 'static,
{
    let axum::Json(request) = match request {
        Ok(request) => request,
        Err(rejection) => return json_error(rejection.status(), rejection.body_text()),
    };
    match service.upsert_override(request) {
        Ok(record) => (StatusCode::OK, axum::Json(record)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn remove_handler<R, O>(
    State(service): State<SharedService<R, O>>,
    Path(override_id): Path<String>,
) -> Response
where
    R: RegistryRepository + 'static,
    O: OverrideRepository + 'static,
{
    match service.remove_override(&OverrideId(override_id)) {
        Ok(removed) => (StatusCode::OK, axum::Json(json!({ "removed": removed }))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) fn status_for(error: &OverrideServiceError) -> StatusCode {
    match error {
        OverrideServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        OverrideServiceError::Validation(_) | OverrideServiceError::InvalidScope(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        OverrideServiceError::Conflict { .. } | OverrideServiceError::Ambiguous(_) => {
            StatusCode::CONFLICT
        }
        OverrideServiceError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: OverrideServiceError) -> Response {
    let status = status_for(&error);
    if status.is_server_error() {
        error!(%error, "registry request failed");
    }
    json_error(status, error.to_string())
}

/// Extractor failures use the same `{ "error": ... }` body as service errors.
fn json_error(status: StatusCode, message: String) -> Response {
    let payload = json!({
        "error": message,
    });
    (status, axum::Json(payload)).into_response()
}
