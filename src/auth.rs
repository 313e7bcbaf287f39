use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::config::ClientConfig;
use crate::error::Error;
use crate::pkce;
use crate::types::{Jwt, User};
use crate::wallet::WalletSignature;

const XAUTH_PATH: &str = "/api/v1/user/xauth";
const WALLET_AUTH_PATH: &str = "/api/v1/user/metamask-auth";
const FITCOIN_PATH: &str = "/api/v1/fitcoin";
const ETHEREUM_ADDRESS_PATH: &str = "/api/v1/user/ethereum-address";

/// Backend authentication client.
///
/// Builds the X authorization URL and performs the exchanges against the
/// backend. Nothing here touches storage: callers persist the returned grant.
#[derive(Debug, Clone)]
pub struct AuthClient {
    config: ClientConfig,
    http: reqwest::Client,
}

/// Authorization URL with the PKCE parameters to keep until the callback.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: String,
    pub code_verifier: String,
}

/// A successful sign-in: the backend's user record and a fresh session token.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct AuthGrant {
    pub user: User,
    pub jwt: Jwt,
}

/// Body shared by both sign-in endpoints: `{success, user, jwt}`.
#[derive(Deserialize)]
struct AuthResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    user: Option<User>,
    #[serde(default)]
    jwt: Option<String>,
}

impl AuthClient {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Generate the X authorization URL with fresh PKCE parameters.
    #[must_use]
    pub fn authorization_url(&self) -> AuthorizationRequest {
        let state = pkce::generate_state();
        let code_verifier = pkce::generate_code_verifier();
        let code_challenge = pkce::generate_code_challenge(&code_verifier);
        let scope = self.config.scopes.join(" ");

        let mut url = self.config.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.x_client_id)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("scope", &scope)
            .append_pair("state", &state)
            .append_pair("code_challenge", &code_challenge)
            .append_pair("code_challenge_method", pkce::CHALLENGE_METHOD);

        AuthorizationRequest {
            url,
            state,
            code_verifier,
        }
    }

    /// Exchange an X authorization code for a backend session.
    ///
    /// `bearer` links the X account to an existing session when present; the
    /// header is sent with an empty token otherwise.
    ///
    /// # Errors
    ///
    /// [`Error::Network`] / [`Error::Timeout`] on transport failure,
    /// [`Error::BackendRejected`] on a non-2xx status,
    /// [`Error::MalformedResponse`] if the body is not a successful grant.
    pub async fn exchange_oauth_code(
        &self,
        code: &str,
        code_verifier: &str,
        bearer: Option<&Jwt>,
    ) -> Result<AuthGrant, Error> {
        const OPERATION: &str = "X code exchange";

        let request = self
            .http
            .post(self.config.endpoint(XAUTH_PATH)?)
            .bearer_auth(bearer.map(Jwt::as_str).unwrap_or_default())
            .json(&json!({ "code": code, "code_verifier": code_verifier }));

        let response = self.send(request, OPERATION).await?;
        Self::read_grant(response, OPERATION).await
    }

    /// Exchange a wallet signature for a backend session.
    ///
    /// # Errors
    ///
    /// Same contract as [`exchange_oauth_code`](Self::exchange_oauth_code).
    pub async fn exchange_wallet_signature(
        &self,
        signature: &WalletSignature,
    ) -> Result<AuthGrant, Error> {
        const OPERATION: &str = "wallet signature exchange";

        let request = self
            .http
            .post(self.config.endpoint(WALLET_AUTH_PATH)?)
            .json(signature);

        let response = self.send(request, OPERATION).await?;
        Self::read_grant(response, OPERATION).await
    }

    /// Credit one fitcoin to the signed-in account.
    ///
    /// # Errors
    ///
    /// [`Error::BackendRejected`] on a non-2xx status, transport errors otherwise.
    pub async fn add_fitcoin(&self, jwt: &Jwt) -> Result<(), Error> {
        let request = self
            .http
            .post(self.config.endpoint(FITCOIN_PATH)?)
            .bearer_auth(jwt.as_str())
            .json(&json!({}));

        self.send(request, "add fitcoin").await.map(drop)
    }

    /// Attach an Ethereum address to the signed-in account.
    ///
    /// # Errors
    ///
    /// [`Error::BackendRejected`] on a non-2xx status, transport errors otherwise.
    pub async fn register_ethereum_address(&self, address: &str, jwt: &Jwt) -> Result<(), Error> {
        let request = self
            .http
            .post(self.config.endpoint(ETHEREUM_ADDRESS_PATH)?)
            .bearer_auth(jwt.as_str())
            .json(&json!({ "address": address }));

        self.send(request, "register ethereum address").await.map(drop)
    }

    /// Sends with the configured timeout and checks the HTTP status.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        let response = request
            .timeout(self.config.http_timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, operation))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let detail = response.text().await.unwrap_or_default();
        tracing::warn!(operation, status, "Backend rejected request");
        Err(Error::BackendRejected {
            operation,
            status,
            detail,
        })
    }

    async fn read_grant(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<AuthGrant, Error> {
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, operation))?;
        parse_grant(&body, operation)
    }
}

fn transport_error(e: reqwest::Error, operation: &'static str) -> Error {
    if e.is_timeout() {
        Error::Timeout { operation }
    } else {
        Error::Network(e)
    }
}

fn parse_grant(body: &[u8], operation: &'static str) -> Result<AuthGrant, Error> {
    let malformed = |reason: String| Error::MalformedResponse { operation, reason };

    let parsed: AuthResponse =
        serde_json::from_slice(body).map_err(|e| malformed(e.to_string()))?;

    if !parsed.success {
        return Err(malformed("success is not true".into()));
    }
    let user = parsed.user.ok_or_else(|| malformed("missing user".into()))?;
    let jwt = parsed
        .jwt
        .filter(|t| !t.is_empty())
        .ok_or_else(|| malformed("missing jwt".into()))?;

    Ok(AuthGrant {
        user,
        jwt: Jwt::new(jwt),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;

    fn test_config() -> ClientConfig {
        ClientConfig::new(
            "test-client",
            "https://example.com/index.html".parse().unwrap(),
            "https://example.com".parse().unwrap(),
            "wss://example.com/socket/websocket".parse().unwrap(),
        )
    }

    fn query(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn test_authorization_url_contains_pkce() {
        let client = AuthClient::new(test_config());
        let req = client.authorization_url();

        assert!(req.url.as_str().starts_with("https://twitter.com/i/oauth2/authorize?"));
        assert_eq!(query(&req.url, "response_type").as_deref(), Some("code"));
        assert_eq!(query(&req.url, "client_id").as_deref(), Some("test-client"));
        assert_eq!(
            query(&req.url, "redirect_uri").as_deref(),
            Some("https://example.com/index.html")
        );
        assert_eq!(
            query(&req.url, "scope").as_deref(),
            Some("tweet.read users.read follows.read")
        );
        assert_eq!(query(&req.url, "code_challenge_method").as_deref(), Some("S256"));
        assert_eq!(query(&req.url, "state"), Some(req.state.clone()));
        assert_eq!(
            query(&req.url, "code_challenge"),
            Some(pkce::generate_code_challenge(&req.code_verifier))
        );
    }

    #[test]
    fn test_authorization_url_unique_per_call() {
        let client = AuthClient::new(test_config());
        let req1 = client.authorization_url();
        let req2 = client.authorization_url();

        assert_ne!(req1.state, req2.state);
        assert_ne!(req1.code_verifier, req2.code_verifier);
    }

    #[test]
    fn test_parse_grant_success() {
        let grant = parse_grant(
            br#"{"success": true, "user": {"id": "u1", "fitcoins": 0}, "jwt": "t1"}"#,
            "test",
        )
        .unwrap();

        assert_eq!(grant.user.id, UserId::from("u1"));
        assert_eq!(grant.jwt.as_str(), "t1");
    }

    #[test]
    fn test_parse_grant_rejects_incomplete_bodies() {
        let cases: [&[u8]; 5] = [
            br#"{"success": false, "user": {"id": "u1"}, "jwt": "t1"}"#,
            br#"{"success": true, "jwt": "t1"}"#,
            br#"{"success": true, "user": {"id": "u1"}}"#,
            br#"{"user": {"id": "u1"}, "jwt": "t1"}"#,
            b"<html>oops</html>",
        ];
        for body in cases {
            assert!(
                matches!(parse_grant(body, "test"), Err(Error::MalformedResponse { .. })),
                "{}",
                String::from_utf8_lossy(body)
            );
        }
    }
}
