//! OAuth 2.0 Token Endpoint
//!
//! Exchanges an authorization code for an access token and a refresh token.

use std::sync::Arc;

use axum::{
    extract::{FromRequest, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::TokenClass;
use crate::config::ExpiresIn;
use crate::error::OAuthError;
use crate::AppState;

/// Token request (form-encoded or JSON)
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    /// Must be "authorization_code"
    #[serde(default)]
    pub grant_type: Option<String>,

    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub redirect_uri: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,
}

/// Successful token response
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: String,
}

/// Exchange an authorization code at `now`
pub fn exchange(
    state: &AppState,
    request: &TokenRequest,
    now: DateTime<Utc>,
) -> Result<TokenResponse, OAuthError> {
    if request.grant_type.as_deref() != Some("authorization_code") {
        return Err(OAuthError::UnsupportedGrantType(
            "Only authorization_code grant type is supported".to_string(),
        ));
    }

    // A missing code fails verification like any other bad code
    let code = request.code.as_deref().unwrap_or_default();
    let Some(claims) = state
        .codec
        .verify(TokenClass::AuthorizationCode, code, now)
    else {
        return Err(OAuthError::InvalidGrant("Invalid authorization code".to_string()));
    };

    let (Some(redirect_uri), Some(client_id)) = (
        request.redirect_uri.as_deref(),
        request.client_id.as_deref(),
    ) else {
        return Err(OAuthError::InvalidRequest(
            "redirect_uri and client_id are required".to_string(),
        ));
    };

    let policy = &state.config.exchange;

    if policy.verify_code_binding {
        if claims.client_id != client_id {
            tracing::warn!(
                "Code issued to {} presented by client {}",
                claims.client_id,
                client_id
            );
            return Err(OAuthError::InvalidGrant(
                "client_id does not match the authorization code".to_string(),
            ));
        }
        if claims.redirect_uri != redirect_uri {
            return Err(OAuthError::InvalidGrant(
                "redirect_uri does not match the authorization code".to_string(),
            ));
        }
    }

    if policy.single_use_codes && state.replay.mark_used(code, claims.expires_at, now) {
        tracing::warn!("Authorization code for client {} was replayed", claims.client_id);
        return Err(OAuthError::InvalidGrant(
            "Authorization code has already been used".to_string(),
        ));
    }

    let expires_in = match policy.expires_in {
        ExpiresIn::CodeRemaining => claims.remaining_secs(now),
        ExpiresIn::AccessToken => {
            u64::try_from(state.codec.lifetime(TokenClass::Access).num_seconds()).unwrap_or(0)
        }
    };

    // Tokens carry the request's client and redirect, not the code's
    let mint = |class: TokenClass| {
        state.codec.mint(class, client_id, redirect_uri, now).map_err(|e| {
            tracing::error!("Failed to issue {} token: {}", class, e);
            OAuthError::InvalidRequest("Invalid request parameters".to_string())
        })
    };
    let access_token = mint(TokenClass::Access)?;
    let refresh_token = mint(TokenClass::Refresh)?;

    tracing::info!("Issued access token for client {}", client_id);

    Ok(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
        expires_in,
        refresh_token,
    })
}

/// Handler for `POST /token`
pub async fn handler(
    State(state): State<Arc<AppState>>,
    TokenForm(request): TokenForm,
) -> Response {
    match exchange(&state, &request, Utc::now()) {
        Ok(tokens) => {
            let mut response = (StatusCode::OK, Json(tokens)).into_response();
            // RFC 6749 Section 5.1
            let headers = response.headers_mut();
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
            response
        }
        Err(error) => {
            tracing::debug!("Token request rejected: {}", error);
            error.into_response()
        }
    }
}

/// Token request body, accepted as JSON or as a form
///
/// Any body that fails to parse is answered with `invalid_request`.
#[derive(Debug)]
pub struct TokenForm(pub TokenRequest);

impl<S> FromRequest<S> for TokenForm
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| {
                ct.trim_start()
                    .to_ascii_lowercase()
                    .starts_with("application/json")
            });

        let parsed = if is_json {
            Json::<TokenRequest>::from_request(req, state)
                .await
                .map(|Json(request)| request)
                .map_err(|e| e.body_text())
        } else {
            Form::<TokenRequest>::from_request(req, state)
                .await
                .map(|Form(request)| request)
                .map_err(|e| e.body_text())
        };

        parsed.map(TokenForm).map_err(|reason| {
            tracing::debug!("Unparseable token request: {}", reason);
            OAuthError::InvalidRequest("Invalid request parameters".to_string()).into_response()
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::config::{Config, ExchangeConfig};
    use crate::replay::ReplayGuard;

    const CLIENT: &str = "web-app";
    const REDIRECT: &str = "https://app.example/cb";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn state_with(exchange: ExchangeConfig) -> AppState {
        let mut config = Config::default();
        config.allow_clients([CLIENT.to_string()]);
        config.exchange = exchange;
        AppState::new(config, "https://auth.example".to_string()).unwrap()
    }

    fn state() -> AppState {
        state_with(ExchangeConfig::default())
    }

    fn code(state: &AppState, issued_at: DateTime<Utc>) -> String {
        state
            .codec
            .mint(TokenClass::AuthorizationCode, CLIENT, REDIRECT, issued_at)
            .unwrap()
    }

    fn request(code: &str) -> TokenRequest {
        TokenRequest {
            grant_type: Some("authorization_code".to_string()),
            code: Some(code.to_string()),
            redirect_uri: Some(REDIRECT.to_string()),
            client_id: Some(CLIENT.to_string()),
        }
    }

    #[test]
    fn test_exchange_issues_tokens() {
        let state = state();
        let code = code(&state, t0());
        let now = t0() + Duration::seconds(30);

        let response = exchange(&state, &request(&code), now).unwrap();
        assert_eq!(response.token_type, "bearer");
        assert_eq!(response.expires_in, 570);

        let access = state
            .codec
            .verify(TokenClass::Access, &response.access_token, now)
            .unwrap();
        assert_eq!(access.client_id, CLIENT);
        assert_eq!(access.expires_at, now + Duration::hours(1));

        let refresh = state
            .codec
            .verify(TokenClass::Refresh, &response.refresh_token, now)
            .unwrap();
        assert_eq!(refresh.redirect_uri, REDIRECT);
        assert_eq!(refresh.expires_at, now + Duration::days(1));
    }

    #[test]
    fn test_unsupported_grant_type_wins_over_code_validity() {
        let state = state();
        let valid = code(&state, t0());
        for (grant_type, code) in [
            (Some("refresh_token"), valid.as_str()),
            (Some("client_credentials"), "garbage"),
            (None, valid.as_str()),
        ] {
            let mut req = request(code);
            req.grant_type = grant_type.map(str::to_string);
            let err = exchange(&state, &req, t0()).unwrap_err();
            assert_eq!(err.code(), "unsupported_grant_type");
        }
    }

    #[test]
    fn test_missing_fields() {
        let state = state();
        let code = code(&state, t0());

        let mut req = request(&code);
        req.client_id = None;
        assert_eq!(exchange(&state, &req, t0()).unwrap_err().code(), "invalid_request");

        let mut req = request(&code);
        req.redirect_uri = None;
        assert_eq!(exchange(&state, &req, t0()).unwrap_err().code(), "invalid_request");
    }

    #[test]
    fn test_missing_code_is_invalid_grant() {
        let state = state();
        let mut req = request("");
        req.code = None;
        assert_eq!(
            exchange(&state, &req, t0()).unwrap_err(),
            OAuthError::InvalidGrant("Invalid authorization code".to_string())
        );

        // A bad code is reported before missing client fields
        req.client_id = None;
        assert_eq!(exchange(&state, &req, t0()).unwrap_err().code(), "invalid_grant");
    }

    /// Replay store that treats every code as already exchanged
    struct AlwaysUsed;

    impl ReplayGuard for AlwaysUsed {
        fn mark_used(&self, _code: &str, _expires_at: DateTime<Utc>, _now: DateTime<Utc>) -> bool {
            true
        }
    }

    #[test]
    fn test_custom_replay_guard() {
        let state = state_with(ExchangeConfig {
            single_use_codes: true,
            ..ExchangeConfig::default()
        })
        .with_replay_guard(Arc::new(AlwaysUsed));
        let code = code(&state, t0());

        let err = exchange(&state, &request(&code), t0()).unwrap_err();
        assert_eq!(
            err,
            OAuthError::InvalidGrant("Authorization code has already been used".to_string())
        );
    }

    #[tokio::test]
    async fn test_json_content_type_is_case_insensitive() {
        let body = serde_json::json!({
            "grant_type": "authorization_code",
            "code": "abc",
            "redirect_uri": REDIRECT,
            "client_id": CLIENT,
        });
        let req = axum::http::Request::post("/token")
            .header(header::CONTENT_TYPE, "Application/JSON; charset=UTF-8")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap();

        let TokenForm(parsed) = TokenForm::from_request(req, &()).await.unwrap();
        assert_eq!(parsed.code.as_deref(), Some("abc"));
        assert_eq!(parsed.client_id.as_deref(), Some(CLIENT));
    }

    #[test]
    fn test_expired_code() {
        let state = state();
        let code = code(&state, t0());

        let err = exchange(&state, &request(&code), t0() + Duration::minutes(10)).unwrap_err();
        assert_eq!(
            err,
            OAuthError::InvalidGrant("Invalid authorization code".to_string())
        );
        assert!(exchange(&state, &request(&code), t0() + Duration::seconds(599)).is_ok());
    }

    #[test]
    fn test_tampered_code() {
        let state = state();
        let mut code = code(&state, t0());
        code.push('x');
        let err = exchange(&state, &request(&code), t0()).unwrap_err();
        assert_eq!(err.code(), "invalid_grant");
    }

    #[test]
    fn test_binding_not_checked_by_default() {
        let state = state();
        let code = code(&state, t0());
        let mut req = request(&code);
        req.client_id = Some("someone-else".to_string());
        req.redirect_uri = Some("https://other.example/cb".to_string());

        let response = exchange(&state, &req, t0()).unwrap();
        let access = state
            .codec
            .verify(TokenClass::Access, &response.access_token, t0())
            .unwrap();
        assert_eq!(access.client_id, "someone-else");
        assert_eq!(access.redirect_uri, "https://other.example/cb");
    }

    #[test]
    fn test_binding_checked_when_enabled() {
        let state = state_with(ExchangeConfig {
            verify_code_binding: true,
            ..ExchangeConfig::default()
        });
        let code = code(&state, t0());

        let mut req = request(&code);
        req.client_id = Some("someone-else".to_string());
        assert_eq!(exchange(&state, &req, t0()).unwrap_err().code(), "invalid_grant");

        let mut req = request(&code);
        req.redirect_uri = Some("https://other.example/cb".to_string());
        assert_eq!(exchange(&state, &req, t0()).unwrap_err().code(), "invalid_grant");

        assert!(exchange(&state, &request(&code), t0()).is_ok());
    }

    #[test]
    fn test_replay_allowed_by_default() {
        let state = state();
        let code = code(&state, t0());
        assert!(exchange(&state, &request(&code), t0()).is_ok());
        assert!(exchange(&state, &request(&code), t0()).is_ok());
    }

    #[test]
    fn test_single_use_when_enabled() {
        let state = state_with(ExchangeConfig {
            single_use_codes: true,
            ..ExchangeConfig::default()
        });
        let code = code(&state, t0());

        assert!(exchange(&state, &request(&code), t0()).is_ok());
        let err = exchange(&state, &request(&code), t0() + Duration::seconds(1)).unwrap_err();
        assert_eq!(
            err,
            OAuthError::InvalidGrant("Authorization code has already been used".to_string())
        );
    }

    #[test]
    fn test_binding_failure_does_not_burn_code() {
        let state = state_with(ExchangeConfig {
            verify_code_binding: true,
            single_use_codes: true,
            ..ExchangeConfig::default()
        });
        let code = code(&state, t0());

        let mut req = request(&code);
        req.client_id = Some("someone-else".to_string());
        assert!(exchange(&state, &req, t0()).is_err());
        assert!(exchange(&state, &request(&code), t0()).is_ok());
    }

    #[test]
    fn test_expires_in_from_access_token() {
        let state = state_with(ExchangeConfig {
            expires_in: ExpiresIn::AccessToken,
            ..ExchangeConfig::default()
        });
        let code = code(&state, t0());
        let response = exchange(&state, &request(&code), t0() + Duration::minutes(5)).unwrap();
        assert_eq!(response.expires_in, 3600);
    }

    #[test]
    fn test_response_shape() {
        let state = state();
        let code = code(&state, t0());
        let response = exchange(&state, &request(&code), t0()).unwrap();
        let body = serde_json::to_value(&response).unwrap();

        let mut keys: Vec<&str> = body.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["access_token", "expires_in", "refresh_token", "token_type"]);
        assert_eq!(body["expires_in"], 600);
    }
}
