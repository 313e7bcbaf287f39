use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::{error, info, warn};
use url::Url;

use crate::auth::{AuthClient, AuthGrant};
use crate::channel::{ChannelClient, ChannelHandler, ChannelState, ConnectOutcome};
use crate::config::ClientConfig;
use crate::error::Error;
use crate::storage::{KeyValueStore, SessionStore};
use crate::types::{Session, User};
use crate::wallet::{self, WalletProvider};

/// Query parameters X appends to the redirect URI.
const CALLBACK_PARAMS: [&str; 2] = ["code", "state"];

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SessionEvent {
    /// The in-memory user was replaced (sign-in or channel snapshot).
    UserUpdated(User),
    /// Session removed from storage and memory. `reason` is set when the
    /// backend invalidated it.
    SessionCleared { reason: Option<String> },
    /// The channel closed after being joined. No reconnect is attempted.
    ChannelDisconnected,
    /// A user-triggered operation failed.
    Error(String),
}

/// What happened during [`SessionController::bootstrap`].
#[derive(Debug)]
#[non_exhaustive]
pub struct Bootstrap {
    /// A complete session was found in storage.
    pub session_restored: bool,
    /// Outcome of the X redirect exchange, if the URL carried a code.
    pub oauth: Option<Result<User, Error>>,
    /// URL to show instead of the current one, with the callback parameters
    /// removed. Set only after a successful exchange.
    pub rewritten_url: Option<Url>,
    pub channel: Result<ConnectOutcome, Error>,
}

#[derive(Debug, Default)]
struct SessionState {
    session: Option<Session>,
    user: Option<User>,
}

/// State shared with the channel's reader task.
struct Shared<S> {
    store: SessionStore<S>,
    state: RwLock<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl<S: KeyValueStore> Shared<S> {
    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn set_user(&self, user: User) {
        self.state.write().await.user = Some(user.clone());
        self.publish(SessionEvent::UserUpdated(user));
    }

    async fn clear(&self, reason: Option<String>) -> Result<(), Error> {
        let cleared = self.store.clear();
        if let Err(e) = &cleared {
            error!(error = %e, "Clearing stored session failed");
        }
        *self.state.write().await = SessionState::default();
        self.publish(SessionEvent::SessionCleared { reason });
        cleared
    }
}

impl<S: KeyValueStore> ChannelHandler for Shared<S> {
    async fn on_user(&self, user: User) {
        self.set_user(user).await;
    }

    async fn on_invalidated(&self, reason: String) {
        info!(reason = %reason, "Clearing invalidated session");
        let _ = self.clear(Some(reason)).await;
    }

    async fn on_disconnected(&self) {
        self.publish(SessionEvent::ChannelDisconnected);
    }
}

/// Owns the session, the user record and the channel connection.
///
/// ```rust,ignore
/// let controller = SessionController::new(config, FileStore::open("session.json")?);
/// let report = controller.bootstrap(&page_url).await;
/// ```
pub struct SessionController<S: KeyValueStore> {
    auth: AuthClient,
    channel: ChannelClient,
    shared: Arc<Shared<S>>,
}

impl<S: KeyValueStore> SessionController<S> {
    #[must_use]
    pub fn new(config: ClientConfig, storage: S) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            channel: ChannelClient::new(&config),
            auth: AuthClient::new(config),
            shared: Arc::new(Shared {
                store: SessionStore::new(storage),
                state: RwLock::new(SessionState::default()),
                events,
            }),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.auth = self.auth.with_http_client(client);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore<S> {
        &self.shared.store
    }

    pub async fn session(&self) -> Option<Session> {
        self.shared.state.read().await.session.clone()
    }

    pub async fn user(&self) -> Option<User> {
        self.shared.state.read().await.user.clone()
    }

    pub async fn channel_state(&self) -> ChannelState {
        self.channel.state().await
    }

    /// Page-load sequence: restore the stored session, complete an X redirect
    /// if `page_url` carries a code, then join the channel.
    ///
    /// Each step settles before the next begins. Failures are logged, published
    /// as [`SessionEvent::Error`] and returned in the report; none of them stop
    /// the later steps.
    pub async fn bootstrap(&self, page_url: &Url) -> Bootstrap {
        let session_restored = match self.restore_session().await {
            Ok(restored) => restored,
            Err(e) => {
                error!(error = %e, "Reading stored session failed");
                self.shared.publish(SessionEvent::Error(e.to_string()));
                false
            }
        };
        if session_restored {
            info!("Found existing session");
        } else {
            info!("No existing session found");
        }

        let (oauth, rewritten_url) = match callback_code(page_url) {
            Some(code) => {
                info!("Completing X sign-in redirect");
                match self.complete_oauth_redirect(&code).await {
                    Ok(user) => (Some(Ok(user)), Some(strip_callback_params(page_url))),
                    Err(e) => (Some(Err(e)), None),
                }
            }
            None => (None, None),
        };

        let channel = self.connect_channel().await;

        Bootstrap {
            session_restored,
            oauth,
            rewritten_url,
            channel,
        }
    }

    /// Load the stored session into memory. Returns whether one was found.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`] if the store cannot be read.
    pub async fn restore_session(&self) -> Result<bool, Error> {
        let session = self.shared.store.load()?;
        let restored = session.is_some();
        self.shared.state.write().await.session = session;
        Ok(restored)
    }

    /// Start an X sign-in: store a fresh PKCE verifier and return the URL the
    /// UI must navigate to.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`] if the verifier cannot be stored.
    pub fn begin_oauth_login(&self) -> Result<Url, Error> {
        let request = self.auth.authorization_url();
        self.shared
            .store
            .save_code_verifier(&request.code_verifier)
            .inspect_err(|e| error!(error = %e, "Storing PKCE verifier failed"))?;
        info!("Redirecting to X for sign-in");
        Ok(request.url)
    }

    /// Exchange the code from an X redirect, bearing the current session token.
    ///
    /// The stored verifier is consumed either way. On failure the previous
    /// session is left as it was. On success any channel joined for the
    /// previous session is closed; [`connect_channel`](Self::connect_channel)
    /// joins as the new user.
    ///
    /// # Errors
    ///
    /// [`Error::MissingVerifier`] without a stored verifier (no request is
    /// made), otherwise the exchange and storage errors.
    pub async fn complete_oauth_redirect(&self, code: &str) -> Result<User, Error> {
        let result = async {
            let verifier = self
                .shared
                .store
                .take_code_verifier()?
                .ok_or(Error::MissingVerifier)?;
            let bearer = self.session().await.map(|s| s.jwt);
            let grant = self
                .auth
                .exchange_oauth_code(code, &verifier, bearer.as_ref())
                .await?;
            self.adopt(grant).await
        }
        .await;

        self.report("X sign-in", result)
    }

    /// Sign in with a wallet signature, then join the channel as the new user.
    ///
    /// # Errors
    ///
    /// [`Error::WalletUnavailable`], [`Error::UserDeclined`] and the exchange
    /// errors; nothing is stored on those. [`Error::SessionInvalidated`] if the
    /// backend rejects the new session at join time, which clears it again.
    /// Other join failures are logged and the user is still returned.
    pub async fn login_with_wallet<W: WalletProvider>(&self, wallet: &W) -> Result<User, Error> {
        let result = async {
            let signature = wallet::sign_challenge(wallet).await?;
            let grant = self.auth.exchange_wallet_signature(&signature).await?;
            self.adopt(grant).await
        }
        .await;
        let user = self.report("Wallet sign-in", result)?;

        match self.connect_channel().await {
            Err(e @ Error::SessionInvalidated { .. }) => self.report("Wallet sign-in", Err(e)),
            Err(e) => {
                warn!(error = %e, "Channel join after wallet sign-in failed");
                Ok(user)
            }
            Ok(_) => Ok(user),
        }
    }

    /// Join the channel with the in-memory session.
    ///
    /// Without a session this is a no-op ([`ConnectOutcome::Skipped`]).
    ///
    /// # Errors
    ///
    /// See [`ChannelClient::connect`]. On [`Error::SessionInvalidated`] the
    /// session has already been cleared.
    pub async fn connect_channel(&self) -> Result<ConnectOutcome, Error> {
        let session = self.session().await;
        self.channel
            .connect(session.as_ref(), self.shared.clone())
            .await
            .inspect_err(|e| warn!(error = %e, "Channel not joined"))
    }

    /// Credit one fitcoin to the signed-in account.
    ///
    /// # Errors
    ///
    /// [`Error::NotAuthenticated`] without a session, otherwise backend errors.
    pub async fn add_fitcoin(&self) -> Result<(), Error> {
        let result = async {
            let session = self.session().await.ok_or(Error::NotAuthenticated)?;
            self.auth.add_fitcoin(&session.jwt).await
        }
        .await;
        self.report("Add fitcoin", result)
    }

    /// Attach the wallet's first account to the signed-in user.
    /// Returns the address that was sent.
    ///
    /// # Errors
    ///
    /// [`Error::NotAuthenticated`] without a session, wallet errors, backend errors.
    pub async fn register_ethereum_address<W: WalletProvider>(
        &self,
        wallet: &W,
    ) -> Result<String, Error> {
        let result = async {
            let session = self.session().await.ok_or(Error::NotAuthenticated)?;
            let address = wallet::request_address(wallet).await?;
            self.auth
                .register_ethereum_address(&address, &session.jwt)
                .await?;
            Ok::<_, Error>(address)
        }
        .await;
        self.report("Register ethereum address", result)
    }

    /// Sign out locally: close the channel and drop the session everywhere.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`] if the store could not be cleared; memory is
    /// cleared regardless.
    pub async fn clear_session(&self) -> Result<(), Error> {
        self.channel.disconnect().await;
        self.shared.clear(None).await
    }

    /// Persist a grant and make it the current session and user.
    ///
    /// A channel joined for the previous session is closed first, so none of
    /// its frames land on the new one.
    async fn adopt(&self, grant: AuthGrant) -> Result<User, Error> {
        self.channel.disconnect().await;

        let AuthGrant { user, jwt } = grant;
        let session = Session::new(jwt, user.id.clone());
        self.shared.store.save(&session)?;

        self.shared.state.write().await.session = Some(session);
        self.shared.set_user(user.clone()).await;
        info!(user_id = %user.id, "Signed in");
        Ok(user)
    }

    fn report<T>(&self, operation: &'static str, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(e) = &result {
            error!(operation, error = %e, "Operation failed");
            self.shared
                .publish(SessionEvent::Error(format!("{operation} failed: {e}")));
        }
        result
    }
}

/// The non-empty `code` query parameter of an X redirect, if present.
fn callback_code(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.into_owned())
        .filter(|code| !code.is_empty())
}

/// `url` without the X callback parameters; other parameters are kept.
fn strip_callback_params(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !CALLBACK_PARAMS.iter().any(|param| key == param))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut clean = url.clone();
    if kept.is_empty() {
        clean.set_query(None);
    } else {
        clean.query_pairs_mut().clear().extend_pairs(kept);
    }
    clean
}
