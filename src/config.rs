use std::time::Duration;

use url::Url;

use crate::error::Error;

const DEFAULT_AUTHORIZE_URL: &str = "https://twitter.com/i/oauth2/authorize";
const DEFAULT_SCOPES: [&str; 3] = ["tweet.read", "users.read", "follows.read"];

/// Client configuration: identity provider, backend and realtime endpoints.
///
/// Required fields are constructor parameters; everything else has a default
/// and a `with_*` override.
///
/// ```rust,ignore
/// use fitcoin_session::ClientConfig;
///
/// let config = ClientConfig::new(
///     "x-client-id",
///     "https://app.example.com/index.html".parse()?,
///     "https://app.example.com".parse()?,
///     "wss://app.example.com/socket/websocket".parse()?,
/// )
/// .with_http_timeout(std::time::Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ClientConfig {
    pub(crate) x_client_id: String,
    pub(crate) redirect_uri: Url,
    pub(crate) backend_url: Url,
    pub(crate) socket_url: Url,
    pub(crate) authorize_url: Url,
    pub(crate) scopes: Vec<String>,
    pub(crate) http_timeout: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) join_timeout: Duration,
    pub(crate) heartbeat_interval: Duration,
}

impl ClientConfig {
    #[must_use]
    pub fn new(
        x_client_id: impl Into<String>,
        redirect_uri: Url,
        backend_url: Url,
        socket_url: Url,
    ) -> Self {
        Self {
            x_client_id: x_client_id.into(),
            redirect_uri,
            backend_url,
            socket_url,
            authorize_url: DEFAULT_AUTHORIZE_URL.parse().expect("valid default URL"),
            scopes: DEFAULT_SCOPES.iter().map(|s| (*s).to_string()).collect(),
            http_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `FITCOIN_X_CLIENT_ID`: X OAuth 2.0 client ID
    /// - `FITCOIN_REDIRECT_URI`: OAuth redirect URI (exact match with the backend registration)
    /// - `FITCOIN_BACKEND_URL`: backend base URL
    /// - `FITCOIN_SOCKET_URL`: Phoenix websocket endpoint
    ///
    /// # Optional env vars
    /// - `FITCOIN_X_AUTHORIZE_URL`: override the X authorize endpoint
    /// - `FITCOIN_X_SCOPES`: comma-separated OAuth scopes
    /// - `FITCOIN_HTTP_TIMEOUT_SECS`: per-request HTTP timeout
    /// - `FITCOIN_HEARTBEAT_SECS`: channel heartbeat interval
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if required vars are missing or values are invalid.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| Error::Config(format!("{key} is required")))
        };
        let parse_url = |key: &str, value: String| {
            value
                .parse::<Url>()
                .map_err(|e| Error::Config(format!("{key}: {e}")))
        };
        let parse_secs = |key: &str, value: String| {
            value
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| Error::Config(format!("{key}: {e}")))
        };

        let client_id = required("FITCOIN_X_CLIENT_ID")?;
        let redirect_uri = parse_url("FITCOIN_REDIRECT_URI", required("FITCOIN_REDIRECT_URI")?)?;
        let backend_url = parse_url("FITCOIN_BACKEND_URL", required("FITCOIN_BACKEND_URL")?)?;
        let socket_url = parse_url("FITCOIN_SOCKET_URL", required("FITCOIN_SOCKET_URL")?)?;

        let mut config = Self::new(client_id, redirect_uri, backend_url, socket_url);

        if let Some(value) = lookup("FITCOIN_X_AUTHORIZE_URL") {
            config = config.with_authorize_url(parse_url("FITCOIN_X_AUTHORIZE_URL", value)?);
        }
        if let Some(scopes) = lookup("FITCOIN_X_SCOPES") {
            config = config.with_scopes(
                scopes
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }
        if let Some(value) = lookup("FITCOIN_HTTP_TIMEOUT_SECS") {
            config = config.with_http_timeout(parse_secs("FITCOIN_HTTP_TIMEOUT_SECS", value)?);
        }
        if let Some(value) = lookup("FITCOIN_HEARTBEAT_SECS") {
            config = config.with_heartbeat_interval(parse_secs("FITCOIN_HEARTBEAT_SECS", value)?);
        }

        if !matches!(config.socket_url.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "FITCOIN_SOCKET_URL: expected ws:// or wss://, got {}",
                config.socket_url.scheme()
            )));
        }

        Ok(config)
    }

    /// Override the X authorization endpoint.
    #[must_use]
    pub fn with_authorize_url(mut self, url: Url) -> Self {
        self.authorize_url = url;
        self
    }

    /// Override the OAuth scopes (default: `tweet.read users.read follows.read`).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn x_client_id(&self) -> &str {
        &self.x_client_id
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    #[must_use]
    pub fn backend_url(&self) -> &Url {
        &self.backend_url
    }

    #[must_use]
    pub fn socket_url(&self) -> &Url {
        &self.socket_url
    }

    #[must_use]
    pub fn authorize_url(&self) -> &Url {
        &self.authorize_url
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    /// Resolve a backend API path against the configured base URL.
    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.backend_url
            .join(path)
            .map_err(|e| Error::Config(format!("backend URL {path}: {e}")))
    }
}
