use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("HTTP error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{operation} rejected by backend (status {status}): {detail}")]
    BackendRejected {
        operation: &'static str,
        status: u16,
        detail: String,
    },

    #[error("{operation} returned a malformed response: {reason}")]
    MalformedResponse {
        operation: &'static str,
        reason: String,
    },

    #[error("No wallet available")]
    WalletUnavailable,

    #[error("User declined the wallet request")]
    UserDeclined,

    #[error("Wallet error: {0}")]
    Wallet(String),

    /// The backend accepted the token but no longer knows the user.
    #[error("Session invalidated by backend: {reason}")]
    SessionInvalidated { reason: String },

    #[error("Channel join rejected: {0}")]
    JoinRejected(String),

    #[error("Channel connection closed")]
    ChannelClosed,

    #[error("Websocket error: {0}")]
    Transport(Box<tungstenite::Error>),

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("No stored PKCE code verifier for the OAuth callback")]
    MissingVerifier,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Self::Transport(Box::new(e))
    }
}
