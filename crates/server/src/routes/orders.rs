//! Order route handlers.
//!
//! Creation, snapshots, link claiming, and the admin-only mutations
//! (invites, deadline, sign-in policy).

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::instrument;
use url::Url;

use cartpool_core::token::{AdminPayload, InvalidToken, InvitePayload};
use cartpool_core::{CapabilitySet, Item, Order, OrderEvent, OrderId};

use crate::db::{ItemRepository, NewOrder, OrderRepository};
use crate::error::{AppError, Result, add_breadcrumb, set_sentry_user};
use crate::realtime::ViewerInfo;
use crate::services::IdentityService;
use crate::state::AppState;

use super::load_order;

/// Payload for creating an order.
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub vendor_name: String,
    pub vendor_url: String,
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub creator_name: Option<String>,
    #[serde(default)]
    pub invite_only: bool,
    #[serde(default)]
    pub allow_oidc: bool,
    #[serde(default)]
    pub privacy_mode: bool,
}

/// Response for order creation.
#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order: Order,
    /// Admin link for sharing with co-organizers. Keep it secret.
    pub admin_url: String,
}

/// Full order view for one caller.
#[derive(Debug, Serialize)]
pub struct OrderSnapshot {
    pub order: Order,
    pub viewer: ViewerInfo,
    pub items: Vec<Item>,
    pub capabilities: CapabilitySet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_url: Option<String>,
}

/// Response for claiming an invite or admin link.
#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub order: Order,
    pub viewer: ViewerInfo,
}

/// Payload for minting an invite link.
#[derive(Debug, Deserialize)]
pub struct IssueInviteRequest {
    pub guest_name: String,
}

/// Response for a minted invite link.
#[derive(Debug, Serialize)]
pub struct IssueInviteResponse {
    pub guest_name: String,
    pub token: String,
    pub join_url: String,
}

/// Payload for moving the deadline.
#[derive(Debug, Deserialize)]
pub struct ChangeDeadlineRequest {
    pub deadline: DateTime<Utc>,
}

/// Payload for changing the sign-in policy.
#[derive(Debug, Deserialize)]
pub struct ChangeSettingsRequest {
    pub allow_oidc: bool,
}

/// Create an order.
///
/// POST /orders
///
/// The creating session becomes admin of the order immediately. Signed-in
/// creators additionally get durable admin standing via `creator_subject`,
/// which survives session loss.
#[instrument(skip(state, session, body), fields(vendor = %body.vendor_name))]
pub async fn create(
    State(state): State<AppState>,
    session: Session,
    Json(body): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>)> {
    let vendor_name = body.vendor_name.trim();
    if vendor_name.is_empty() {
        return Err(AppError::BadRequest("vendor_name is required".to_owned()));
    }
    let vendor_url = body.vendor_url.trim();
    if Url::parse(vendor_url).is_err() {
        return Err(AppError::BadRequest(
            "vendor_url must be a valid URL".to_owned(),
        ));
    }
    if body.deadline <= Utc::now() {
        return Err(AppError::BadRequest(
            "deadline must be in the future".to_owned(),
        ));
    }
    if body.privacy_mode && !body.invite_only {
        return Err(AppError::BadRequest(
            "privacy_mode requires invite_only".to_owned(),
        ));
    }

    let service = IdentityService::new(&session);
    let identity_state = service.state().await?;

    let given_name = body
        .creator_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(ToOwned::to_owned);
    let Some(creator_name) = given_name.clone().or_else(|| {
        identity_state
            .authenticated
            .as_ref()
            .map(|user| {
                user.display_name
                    .clone()
                    .unwrap_or_else(|| user.subject.clone())
            })
            .or_else(|| identity_state.display_name.clone())
    }) else {
        return Err(AppError::BadRequest("creator_name is required".to_owned()));
    };
    if let (None, Some(name)) = (&identity_state.authenticated, &given_name) {
        service.remember_display_name(name).await?;
    }

    let order = OrderRepository::new(state.pool())
        .create(NewOrder {
            vendor_name: vendor_name.to_owned(),
            vendor_url: vendor_url.to_owned(),
            deadline: body.deadline,
            creator_name,
            creator_subject: identity_state
                .authenticated
                .as_ref()
                .map(|user| user.subject.clone()),
            invite_only: body.invite_only,
            allow_oidc: body.allow_oidc,
            privacy_mode: body.privacy_mode,
        })
        .await?;

    service.grant_admin(order.id).await?;

    let token = state.tokens().issue_admin(&AdminPayload::new(order.id))?;
    let admin_url = state.admin_url(order.id, &token);

    add_breadcrumb("order", "order created", Some(&[("vendor", vendor_name)]));
    tracing::info!(order_id = %order.id, "order created");
    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse { order, admin_url }),
    ))
}

/// List orders created by the calling signed-in user.
///
/// GET /orders
///
/// Anonymous and guest sessions have no durable creator standing, so they
/// get an empty list.
pub async fn index(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<Vec<Order>>> {
    let identity_state = IdentityService::new(&session).state().await?;
    let Some(user) = identity_state.authenticated else {
        return Ok(Json(Vec::new()));
    };
    let orders = OrderRepository::new(state.pool())
        .list_by_creator(&user.subject)
        .await?;
    Ok(Json(orders))
}

/// Fetch an order snapshot for the calling identity.
///
/// GET /orders/{id}
///
/// Items are filtered to what the caller may see; admins also get a fresh
/// admin link (tokens are stateless, so re-minting costs nothing).
pub async fn show(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderSnapshot>> {
    let order = load_order(&state, id).await?;
    let identity = IdentityService::new(&session).resolve(&order).await?;
    let capabilities = state.capabilities(&identity, &order, Utc::now());

    let items: Vec<Item> = ItemRepository::new(state.pool())
        .list_for_order(order.id)
        .await?
        .into_iter()
        .filter(|item| capabilities.can_view_item(item))
        .collect();
    let capability_set = capabilities.summary();

    let admin_url = if identity.is_admin() {
        let token = state.tokens().issue_admin(&AdminPayload::new(order.id))?;
        Some(state.admin_url(order.id, &token))
    } else {
        None
    };

    Ok(Json(OrderSnapshot {
        viewer: ViewerInfo::from(&identity),
        order,
        items,
        capabilities: capability_set,
        admin_url,
    }))
}

/// Claim an invite link.
///
/// GET /orders/{id}/join/{token}
///
/// Binds the guest identity named by the token to this session, for this
/// order only. Deterministic: presenting the same link again resolves to
/// the same identity. Verification failure is opaque - tampered, truncated,
/// and misdirected tokens all read the same from outside.
#[instrument(skip(state, session, token), fields(order_id = %id))]
pub async fn claim_invite(
    State(state): State<AppState>,
    session: Session,
    Path((id, token)): Path<(OrderId, String)>,
) -> Result<Json<ClaimResponse>> {
    let payload = state.tokens().verify_invite(&token)?;
    if payload.order_id != id {
        return Err(InvalidToken.into());
    }
    let order = load_order(&state, id).await?;

    let service = IdentityService::new(&session);
    service.bind_guest(order.id, &payload.guest_name).await?;
    let identity = service.resolve(&order).await?;
    set_sentry_user(&identity.key(), Some(&identity.display_name));

    add_breadcrumb("auth", "invite claimed", None);
    tracing::info!(order_id = %order.id, "invite claimed");
    Ok(Json(ClaimResponse {
        viewer: ViewerInfo::from(&identity),
        order,
    }))
}

/// Claim an admin link.
///
/// GET /orders/{id}/admin/{token}
///
/// Marks this session as admin for the order the token names. Failure is
/// opaque, same as invite claiming.
#[instrument(skip(state, session, token), fields(order_id = %id))]
pub async fn claim_admin(
    State(state): State<AppState>,
    session: Session,
    Path((id, token)): Path<(OrderId, String)>,
) -> Result<Json<ClaimResponse>> {
    let payload = state.tokens().verify_admin(&token)?;
    if payload.order_id != id {
        return Err(InvalidToken.into());
    }
    let order = load_order(&state, id).await?;

    let service = IdentityService::new(&session);
    service.grant_admin(order.id).await?;
    let identity = service.resolve(&order).await?;
    set_sentry_user(&identity.key(), Some(&identity.display_name));

    add_breadcrumb("auth", "admin claimed", None);
    tracing::info!(order_id = %order.id, "admin claimed");
    Ok(Json(ClaimResponse {
        viewer: ViewerInfo::from(&identity),
        order,
    }))
}

/// Mint an invite link for a guest.
///
/// POST /orders/{id}/invites
///
/// Admin only. The token is stateless; nothing is stored about it. The
/// revision bump plus broadcast lets connected clients show that an invite
/// went out without revealing the link itself.
#[instrument(skip(state, session, body), fields(order_id = %id))]
pub async fn issue_invite(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<OrderId>,
    Json(body): Json<IssueInviteRequest>,
) -> Result<Json<IssueInviteResponse>> {
    let order = load_order(&state, id).await?;
    let identity = IdentityService::new(&session).resolve(&order).await?;
    if !state
        .capabilities(&identity, &order, Utc::now())
        .can_issue_invites()
    {
        return Err(AppError::Forbidden(
            "only admins can issue invites".to_owned(),
        ));
    }

    let guest_name = body.guest_name.trim();
    if guest_name.is_empty() {
        return Err(AppError::BadRequest("guest_name is required".to_owned()));
    }

    let token = state
        .tokens()
        .issue_invite(&InvitePayload::new(order.id, guest_name))?;
    let join_url = state.join_url(order.id, &token);

    let revision = OrderRepository::new(state.pool())
        .bump_revision(order.id)
        .await?;
    let mut order = order;
    order.revision = revision;
    state.rooms().publish(
        &order,
        OrderEvent::InviteIssued {
            guest_name: guest_name.to_owned(),
        },
    );

    tracing::info!(order_id = %order.id, "invite issued");
    Ok(Json(IssueInviteResponse {
        guest_name: guest_name.to_owned(),
        token,
        join_url,
    }))
}

/// Move the order deadline.
///
/// POST /orders/{id}/deadline
///
/// Admin only. Any direction, any number of times: moving it into the past
/// is how an organizer closes an order early.
#[instrument(skip(state, session, body), fields(order_id = %id))]
pub async fn change_deadline(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<OrderId>,
    Json(body): Json<ChangeDeadlineRequest>,
) -> Result<Json<Order>> {
    let order = load_order(&state, id).await?;
    let identity = IdentityService::new(&session).resolve(&order).await?;
    if !state
        .capabilities(&identity, &order, Utc::now())
        .can_extend_deadline()
    {
        return Err(AppError::Forbidden(
            "only admins can change the deadline".to_owned(),
        ));
    }

    let updated = OrderRepository::new(state.pool())
        .set_deadline(id, body.deadline)
        .await?;
    state.rooms().publish(
        &updated,
        OrderEvent::DeadlineChanged {
            deadline: updated.deadline,
        },
    );

    tracing::info!(order_id = %updated.id, deadline = %updated.deadline, "deadline changed");
    Ok(Json(updated))
}

/// Change the order's sign-in policy.
///
/// POST /orders/{id}/settings
///
/// Admin only. Not broadcast: the policy only matters to the next person
/// who opens the order.
#[instrument(skip(state, session, body), fields(order_id = %id))]
pub async fn change_settings(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<OrderId>,
    Json(body): Json<ChangeSettingsRequest>,
) -> Result<Json<Order>> {
    let order = load_order(&state, id).await?;
    let identity = IdentityService::new(&session).resolve(&order).await?;
    if !state
        .capabilities(&identity, &order, Utc::now())
        .can_change_settings()
    {
        return Err(AppError::Forbidden(
            "only admins can change settings".to_owned(),
        ));
    }

    let updated = OrderRepository::new(state.pool())
        .set_allow_oidc(id, body.allow_oidc)
        .await?;

    tracing::info!(order_id = %updated.id, allow_oidc = updated.allow_oidc, "settings changed");
    Ok(Json(updated))
}
