//! Item route handlers.
//!
//! All three mutations run the same way: capability check, transactional
//! write (item + revision bump), then broadcast of the committed state.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use serde::Deserialize;
use tower_sessions::Session;
use tracing::instrument;

use cartpool_core::{Actor, Item, ItemId, OrderEvent, OrderId};

use crate::db::ItemRepository;
use crate::error::{AppError, Result};
use crate::services::IdentityService;
use crate::state::AppState;

use super::load_order;

/// Payload for adding an item.
#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    /// Name to list the item under. Ignored for invite-bound guests, whose
    /// items always carry their invited name.
    #[serde(default)]
    pub owner_name: Option<String>,
    pub product_name: String,
    #[serde(default)]
    pub product_sku: Option<String>,
    #[serde(default)]
    pub product_url: Option<String>,
    /// Free-form amount; usually a number, but "2 boxes" is fine too.
    #[serde(default)]
    pub quantity: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Payload for editing an item. Ownership fields are not editable.
#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub product_name: String,
    #[serde(default)]
    pub product_sku: Option<String>,
    #[serde(default)]
    pub product_url: Option<String>,
    #[serde(default)]
    pub quantity: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Trim an optional field, mapping whitespace-only input to absent.
fn clean(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

/// Add an item to an order.
///
/// POST /orders/{id}/items
///
/// Guests' items carry their invited name regardless of the payload.
/// Anonymous users' chosen name is remembered in the session so their next
/// item (and their identity in other orders) defaults to it.
#[instrument(skip(state, session, body), fields(order_id = %id, product = %body.product_name))]
pub async fn add(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<OrderId>,
    Json(body): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<Item>)> {
    let order = load_order(&state, id).await?;
    let service = IdentityService::new(&session);
    let identity = service.resolve(&order).await?;
    if !state
        .capabilities(&identity, &order, Utc::now())
        .can_add_item()
    {
        return Err(AppError::Forbidden(
            "you cannot add items to this order".to_owned(),
        ));
    }

    let product_name = body.product_name.trim();
    if product_name.is_empty() {
        return Err(AppError::BadRequest("product_name is required".to_owned()));
    }

    let owner_name = match &identity.actor {
        Actor::Guest { name } => name.clone(),
        Actor::Anonymous { .. } => {
            let name = clean(body.owner_name.clone())
                .unwrap_or_else(|| identity.display_name.clone());
            service.remember_display_name(&name).await?;
            name
        }
        Actor::Authenticated { .. } => {
            clean(body.owner_name.clone()).unwrap_or_else(|| identity.display_name.clone())
        }
    };

    let item = Item {
        id: ItemId::new(),
        order_id: order.id,
        owner: identity.key(),
        owner_name,
        product_name: product_name.to_owned(),
        product_sku: clean(body.product_sku),
        product_url: clean(body.product_url),
        quantity: clean(body.quantity).unwrap_or_else(|| "1".to_owned()),
        note: clean(body.note),
        added_at: Utc::now(),
    };

    let revision = ItemRepository::new(state.pool()).insert(&item).await?;
    let mut order = order;
    order.revision = revision;
    state
        .rooms()
        .publish(&order, OrderEvent::ItemAdded { item: item.clone() });

    tracing::info!(order_id = %order.id, item_id = %item.id, "item added");
    Ok((StatusCode::CREATED, Json(item)))
}

/// Edit an item.
///
/// PUT /orders/{id}/items/{item_id}
///
/// The owner key, owner name, and creation time never change on edit; only
/// the product fields do.
#[instrument(skip(state, session, body), fields(order_id = %id, item_id = %item_id))]
pub async fn update(
    State(state): State<AppState>,
    session: Session,
    Path((id, item_id)): Path<(OrderId, ItemId)>,
    Json(body): Json<UpdateItemRequest>,
) -> Result<Json<Item>> {
    let order = load_order(&state, id).await?;
    let identity = IdentityService::new(&session).resolve(&order).await?;

    let existing = ItemRepository::new(state.pool())
        .get(order.id, item_id)
        .await?
        .ok_or_else(|| AppError::NotFound("item".to_owned()))?;
    if !state
        .capabilities(&identity, &order, Utc::now())
        .can_edit_item(&existing)
    {
        return Err(AppError::Forbidden(
            "you cannot edit this item".to_owned(),
        ));
    }

    let product_name = body.product_name.trim();
    if product_name.is_empty() {
        return Err(AppError::BadRequest("product_name is required".to_owned()));
    }

    let updated = Item {
        product_name: product_name.to_owned(),
        product_sku: clean(body.product_sku),
        product_url: clean(body.product_url),
        quantity: clean(body.quantity).unwrap_or_else(|| "1".to_owned()),
        note: clean(body.note),
        ..existing
    };

    let revision = ItemRepository::new(state.pool()).update(&updated).await?;
    let mut order = order;
    order.revision = revision;
    state.rooms().publish(
        &order,
        OrderEvent::ItemUpdated {
            item: updated.clone(),
        },
    );

    tracing::info!(order_id = %order.id, item_id = %updated.id, "item updated");
    Ok(Json(updated))
}

/// Remove an item.
///
/// DELETE /orders/{id}/items/{item_id}
///
/// The broadcast carries the removed item's last state so clients can drop
/// it from their view without refetching.
#[instrument(skip(state, session), fields(order_id = %id, item_id = %item_id))]
pub async fn remove(
    State(state): State<AppState>,
    session: Session,
    Path((id, item_id)): Path<(OrderId, ItemId)>,
) -> Result<StatusCode> {
    let order = load_order(&state, id).await?;
    let identity = IdentityService::new(&session).resolve(&order).await?;

    let existing = ItemRepository::new(state.pool())
        .get(order.id, item_id)
        .await?
        .ok_or_else(|| AppError::NotFound("item".to_owned()))?;
    if !state
        .capabilities(&identity, &order, Utc::now())
        .can_delete_item(&existing)
    {
        return Err(AppError::Forbidden(
            "you cannot remove this item".to_owned(),
        ));
    }

    let revision = ItemRepository::new(state.pool())
        .delete(order.id, item_id)
        .await?;
    let mut order = order;
    order.revision = revision;
    state
        .rooms()
        .publish(&order, OrderEvent::ItemDeleted { item: existing });

    tracing::info!(order_id = %order.id, item_id = %item_id, "item removed");
    Ok(StatusCode::NO_CONTENT)
}
