use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::{HeaderMap, header::AUTHORIZATION};
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, Header};
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;
use crate::models::{TenantContext, TenantId};
use crate::settings::Settings;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ACTOR_HEADER: &str = "x-actor-id";

pub fn verify_token(
    settings: &Settings,
    auth: Option<Authorization<Bearer>>,
    query_token: Option<&str>,
) -> Result<(), ApiError> {
    let provided_token = auth
        .map(|a| a.token().to_string())
        .or_else(|| query_token.map(|s| s.to_string()));
    match provided_token {
        Some(token) if token == settings.auth_token => Ok(()),
        _ => Err(ApiError::Unauthorized(
            "Invalid authentication token".into(),
        )),
    }
}

fn uuid_header(headers: &HeaderMap, name: &str) -> Result<Option<Uuid>, ApiError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
        .map(Some)
        .ok_or_else(|| ApiError::BadRequest(format!("{name} header must be a UUID")))
}

/// Builds the tenant scope of a request from its `X-Tenant-Id` header and
/// the optional `X-Actor-Id` of the staff member or member calling.
pub fn tenant_context(headers: &HeaderMap) -> Result<TenantContext, ApiError> {
    let tenant = uuid_header(headers, TENANT_HEADER)?
        .ok_or_else(|| ApiError::BadRequest(format!("missing {TENANT_HEADER} header")))?;
    let ctx = TenantContext::new(TenantId::from(tenant));
    Ok(match uuid_header(headers, ACTOR_HEADER)? {
        Some(actor) => ctx.with_actor(actor),
        None => ctx,
    })
}

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Authenticated tenant scope of a request.
#[derive(Debug, Clone, Copy)]
pub struct Tenant(pub TenantContext);

impl FromRequestParts<AppState> for Tenant {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let bearer =
            Authorization::<Bearer>::decode(&mut parts.headers.get_all(AUTHORIZATION).iter()).ok();
        let query = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .map(|Query(query)| query)
            .unwrap_or_default();
        verify_token(&state.settings, bearer, query.token.as_deref())?;
        tenant_context(&parts.headers).map(Tenant)
    }
}
