//! Auth boundary route handlers.
//!
//! Authentication itself lives in the fronting reverse proxy; these routes
//! only accept or discard the identity it forwards. With no proxy
//! configured, the deployment is anonymous-and-guests only and login does
//! not exist.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use serde::Serialize;
use tower_sessions::Session;
use tracing::instrument;

use cartpool_core::Actor;

use crate::error::{AppError, Result, clear_sentry_user, set_sentry_user};
use crate::models::session::AuthenticatedUser;
use crate::services::IdentityService;
use crate::state::AppState;

/// Current session description.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Describe the calling session.
///
/// GET /auth/session
pub async fn session(session: Session) -> Result<Json<SessionResponse>> {
    let state = IdentityService::new(&session).state().await?;
    Ok(Json(match state.authenticated {
        Some(user) => SessionResponse {
            authenticated: true,
            subject: Some(user.subject),
            display_name: user.display_name,
        },
        None => SessionResponse {
            authenticated: false,
            subject: None,
            display_name: state.display_name,
        },
    }))
}

/// Accept a proxy-forwarded identity into the session.
///
/// POST /auth/login
///
/// The proxy is trusted to have verified the subject header it forwards;
/// this handler never sees credentials. A configured proxy that forwarded
/// nothing means the caller is not signed in at the proxy.
#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    headers: HeaderMap,
) -> Result<Json<SessionResponse>> {
    let Some(proxy) = state.config().auth_proxy.as_ref() else {
        return Err(AppError::NotFound("login".to_owned()));
    };

    let subject = headers
        .get(proxy.subject_header.as_str())
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| AppError::Forbidden("no forwarded identity".to_owned()))?;
    let display_name = headers
        .get(proxy.name_header.as_str())
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned);

    let user = AuthenticatedUser {
        subject,
        display_name,
    };
    IdentityService::new(&session).login(&user).await?;
    set_sentry_user(
        &Actor::Authenticated {
            subject: user.subject.clone(),
        }
        .key(),
        user.display_name.as_deref(),
    );

    tracing::info!("user signed in");
    Ok(Json(SessionResponse {
        authenticated: true,
        subject: Some(user.subject),
        display_name: user.display_name,
    }))
}

/// Clear the session entirely.
///
/// POST /auth/logout
///
/// Drops authentication along with guest bindings and admin grants; the
/// next request starts from a fresh anonymous session.
pub async fn logout(session: Session) -> Result<StatusCode> {
    IdentityService::new(&session).logout().await?;
    clear_sentry_user();
    tracing::info!("session cleared");
    Ok(StatusCode::NO_CONTENT)
}
