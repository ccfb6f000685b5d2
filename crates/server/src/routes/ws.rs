//! Live order event stream.
//!
//! One websocket per open order view. The connection subscribes to the
//! order's room first and loads the snapshot second, so nothing committed
//! can fall between the two; clients treat item events as idempotent
//! upserts, which makes the overlap harmless.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tower_sessions::Session;
use tracing::instrument;

use cartpool_core::{Identity, Item, Order, OrderId};

use crate::db::ItemRepository;
use crate::error::Result;
use crate::realtime::{ConnectionLifecycle, ConnectionState, SnapshotFrame};
use crate::services::IdentityService;
use crate::state::AppState;

use super::load_order;

/// Open the live event stream for an order.
///
/// GET /orders/{id}/ws
///
/// Identity is resolved from the session before the upgrade; whoever the
/// caller is at that moment is who the stream is filtered for, for the
/// whole life of the connection.
#[instrument(skip(state, session, upgrade), fields(order_id = %id))]
pub async fn stream(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<OrderId>,
    upgrade: WebSocketUpgrade,
) -> Result<Response> {
    let order = load_order(&state, id).await?;
    let identity = IdentityService::new(&session).resolve(&order).await?;
    Ok(upgrade.on_upgrade(move |socket| serve_connection(state, socket, order, identity)))
}

/// Drive one websocket from snapshot to close.
async fn serve_connection(state: AppState, mut socket: WebSocket, order: Order, identity: Identity) {
    let ws_config = state.config().ws;
    let mut lifecycle = ConnectionLifecycle::new(ws_config.client_timeout);
    let mut subscription = state.rooms().subscribe(order.id, identity.clone());

    let items = match ItemRepository::new(state.pool())
        .list_for_order(order.id)
        .await
    {
        Ok(items) => items,
        Err(error) => {
            tracing::error!(order_id = %order.id, %error, "failed to load snapshot items");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let capabilities = state.capabilities(&identity, &order, Utc::now());
    let visible: Vec<Item> = items
        .into_iter()
        .filter(|item| capabilities.can_view_item(item))
        .collect();
    let capability_set = capabilities.summary();

    let snapshot = SnapshotFrame::new(
        subscription.joined_seq(),
        order.clone(),
        &identity,
        visible,
        capability_set,
    );
    let Ok(snapshot_json) = serde_json::to_string(&snapshot) else {
        tracing::error!(order_id = %order.id, "failed to serialize snapshot");
        return;
    };
    if socket.send(Message::Text(snapshot_json.into())).await.is_err() {
        return;
    }
    lifecycle.register();
    tracing::debug!(
        order_id = %order.id,
        connection_id = %subscription.connection_id(),
        joined_seq = subscription.joined_seq(),
        "stream registered"
    );

    let mut heartbeat = tokio::time::interval(ws_config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    while lifecycle.state() == ConnectionState::Registered {
        tokio::select! {
            frame = subscription.recv() => match frame {
                Some(frame) => {
                    if socket.send(Message::Text(frame.as_ref().into())).await.is_err() {
                        lifecycle.close();
                    }
                }
                // The room dropped us: slow consumer eviction or a poisoned
                // room. Either way nothing more will arrive.
                None => lifecycle.drain(),
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Close(_))) | None => lifecycle.drain(),
                Some(Ok(_)) => lifecycle.touch(),
                Some(Err(_)) => lifecycle.close(),
            },
            _ = heartbeat.tick() => {
                if lifecycle.expired() {
                    tracing::debug!(
                        order_id = %order.id,
                        connection_id = %subscription.connection_id(),
                        "evicting silent connection"
                    );
                    lifecycle.drain();
                } else if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    lifecycle.close();
                }
            }
        }
    }

    // Dropping the subscription unsubscribes from the room; frames already
    // handed to the socket flush with the close handshake.
    drop(subscription);
    if lifecycle.state() == ConnectionState::Draining {
        let _ = socket.send(Message::Close(None)).await;
    }
    lifecycle.close();
    tracing::debug!(order_id = %order.id, "stream closed");
}
