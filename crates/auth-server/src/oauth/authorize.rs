//! OAuth 2.0 Authorization Endpoint
//!
//! Validates the request and redirects back to the client with either a
//! freshly minted authorization code or an error. Clients on the allow-list
//! are approved without user interaction.

use std::sync::Arc;

use axum::{
    extract::{RawQuery, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use url::Url;

use crate::codec::TokenClass;
use crate::error::OAuthError;
use crate::AppState;

/// Authorization request parameters
///
/// Every field is optional at the extraction layer so that missing values
/// produce an OAuth error redirect rather than a bare 400.
#[derive(Debug, Default)]
pub struct AuthorizeRequest {
    /// Must be "code"
    pub response_type: Option<String>,

    pub client_id: Option<String>,

    /// Where to send the user back to
    pub redirect_uri: Option<String>,

    /// Opaque client state, echoed back untouched
    pub state: Option<String>,
}

impl AuthorizeRequest {
    /// Collect parameters from decoded query pairs
    ///
    /// The first occurrence of a repeated parameter wins and unknown
    /// parameters are ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut request = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_ref() {
                "response_type" => &mut request.response_type,
                "client_id" => &mut request.client_id,
                "redirect_uri" => &mut request.redirect_uri,
                "state" => &mut request.state,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into());
            }
        }
        request
    }

    /// Parse a raw query string; never fails
    pub fn from_query(query: &str) -> Self {
        Self::from_pairs(url::form_urlencoded::parse(query.as_bytes()).into_owned())
    }
}

/// Result of processing an authorization request
#[derive(Debug, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    /// 302 to this location
    Redirect(String),
    /// Internal failure; answered directly since the redirect target can't be trusted
    Failed(OAuthError),
}

/// Process an authorization request issued at `now`
pub fn authorize(
    state: &AppState,
    params: &AuthorizeRequest,
    now: DateTime<Utc>,
) -> AuthorizeOutcome {
    let client_state = present(&params.state);

    let (Some(client_id), Some(response_type), Some(redirect_uri)) = (
        present(&params.client_id),
        present(&params.response_type),
        present(&params.redirect_uri),
    ) else {
        tracing::debug!("Authorization request is missing required parameters");
        // Still redirects when redirect_uri itself is absent, yielding a relative location
        return AuthorizeOutcome::Redirect(error_redirect(
            present(&params.redirect_uri).unwrap_or_default(),
            &OAuthError::InvalidRequest("missing_required_parameters".to_string()),
            client_state,
        ));
    };

    if response_type != "code" {
        tracing::debug!("Unsupported response_type {:?} from client {}", response_type, client_id);
        return AuthorizeOutcome::Redirect(error_redirect(
            redirect_uri,
            &OAuthError::UnsupportedResponseType("Only code response type is supported".to_string()),
            client_state,
        ));
    }

    if !state.clients.is_allowed(client_id) {
        tracing::warn!("Rejected authorization request from unknown client {}", client_id);
        return AuthorizeOutcome::Redirect(error_redirect(
            redirect_uri,
            &OAuthError::UnauthorizedClient("Client ID is not authorized".to_string()),
            client_state,
        ));
    }

    let code = match state
        .codec
        .mint(TokenClass::AuthorizationCode, client_id, redirect_uri, now)
    {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Failed to issue authorization code: {}", e);
            return AuthorizeOutcome::Failed(OAuthError::ServerError);
        }
    };

    let mut redirect_url = match Url::parse(redirect_uri) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!("Cannot redirect to {:?}: {}", redirect_uri, e);
            return AuthorizeOutcome::Failed(OAuthError::ServerError);
        }
    };
    {
        let mut query = redirect_url.query_pairs_mut();
        query.append_pair("code", &code);
        if let Some(s) = client_state {
            query.append_pair("state", s);
        }
    }

    tracing::info!("Issued authorization code for client {}", client_id);

    AuthorizeOutcome::Redirect(redirect_url.into())
}

/// Handler for `GET /authorize`
pub async fn handler(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Response {
    let params = AuthorizeRequest::from_query(query.as_deref().unwrap_or_default());

    match authorize(&state, &params, Utc::now()) {
        AuthorizeOutcome::Redirect(location) => found(location),
        AuthorizeOutcome::Failed(error) => error.into_response(),
    }
}

/// 302 Found with a Location header
fn found(location: String) -> Response {
    match HeaderValue::try_from(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(e) => {
            tracing::warn!("Redirect location is not a valid header value: {}", e);
            OAuthError::ServerError.into_response()
        }
    }
}

/// Treat empty query values the same as missing ones
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Build the error redirect location for `redirect_uri`
fn error_redirect(redirect_uri: &str, error: &OAuthError, state: Option<&str>) -> String {
    // Parameters go before any fragment
    let (base, fragment) = match redirect_uri.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (redirect_uri, None),
    };
    let separator = if base.contains('?') { '&' } else { '?' };
    let mut url = format!("{}{}error={}", base, separator, error.code());
    if let Some(description) = error.description() {
        url.push_str(&format!("&error_description={}", urlencoding::encode(description)));
    }
    if let Some(s) = state {
        url.push_str(&format!("&state={}", urlencoding::encode(s)));
    }
    if let Some(fragment) = fragment {
        url.push('#');
        url.push_str(fragment);
    }
    url
}

mod urlencoding {
    pub fn encode(s: &str) -> String {
        url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
    }
}
