//! CSV export route handler.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::instrument;

use cartpool_core::{Item, OrderId};

use crate::db::ItemRepository;
use crate::error::{AppError, Result};
use crate::services::IdentityService;
use crate::services::export::{ExportGroup, export_csv};
use crate::state::AppState;

use super::load_order;

/// Query parameters for the export download.
#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub group_by: ExportGroup,
}

/// Download the order as CSV.
///
/// GET /orders/{id}/export?group_by=person|product
///
/// While privacy is active only admins may export, since the file contains
/// every participant's items. The export itself is never filtered: whoever
/// may export sees all of it, that being the point of the file.
#[instrument(skip(state, session), fields(order_id = %id, group_by = ?query.group_by))]
pub async fn download(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<OrderId>,
    Query(query): Query<ExportQuery>,
) -> Result<Response> {
    let order = load_order(&state, id).await?;
    let identity = IdentityService::new(&session).resolve(&order).await?;
    if order.privacy_active() && !identity.is_admin() {
        return Err(AppError::Forbidden(
            "only admins can export this order".to_owned(),
        ));
    }

    let items: Vec<Item> = ItemRepository::new(state.pool())
        .list_for_order(order.id)
        .await?;
    let export = export_csv(&order, &items, query.group_by)?;

    tracing::info!(order_id = %order.id, rows = items.len(), "order exported");
    let headers = [
        (
            header::CONTENT_TYPE,
            "text/csv; charset=utf-8".to_owned(),
        ),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", export.filename),
        ),
    ];
    Ok((headers, export.body).into_response())
}
