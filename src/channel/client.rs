use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard, RwLock, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};
use url::Url;

use super::frame::{Frame, Inbound, ReplyStatus, invalid_session_reason, reply_reason};
use crate::config::ClientConfig;
use crate::error::Error;
use crate::types::{Session, User};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Lifecycle of the single channel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    /// Websocket handshake in flight.
    Connecting,
    SocketOpen,
    Joining,
    Joined,
    /// The backend refused the join. Terminal until the next explicit connect.
    Failed,
}

impl ChannelState {
    /// A connection attempt is in flight or established.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::SocketOpen | Self::Joining | Self::Joined
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// No session: nothing was attempted.
    Skipped,
    /// A connection is already joining or joined.
    AlreadyActive,
    Joined,
    /// [`ChannelClient::disconnect`] ran before the join settled. The socket
    /// was closed and the handler was not called.
    Cancelled,
}

/// Receives what the channel learns about the session.
///
/// Callbacks run on the channel's reader task, one at a time, in frame order.
pub trait ChannelHandler: Send + Sync + 'static {
    /// A full user snapshot (join reply, `phx_reply`, or `profile_update`).
    fn on_user(&self, user: User) -> impl Future<Output = ()> + Send;

    /// The backend no longer knows the session's user. The channel has
    /// already stopped and will not rejoin.
    fn on_invalidated(&self, reason: String) -> impl Future<Output = ()> + Send;

    /// The socket or channel closed while joined.
    fn on_disconnected(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

struct Connection {
    outbound: mpsc::Sender<Message>,
    reader: JoinHandle<()>,
    heartbeat: AbortHandle,
}

// The writer task is left to drain: it ends once every sender is gone.
impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.heartbeat.abort();
    }
}

/// Phoenix channel client for the per-user topic.
///
/// Holds at most one connection. There is no automatic reconnect: after a
/// close the state returns to [`ChannelState::Disconnected`] and stays there
/// until [`connect`](Self::connect) is called again.
///
/// Every connect attempt is tagged with the current generation.
/// [`disconnect`](Self::disconnect) bumps it, and an attempt or reader task
/// from an older generation never touches the state or the handler again.
/// Lock order: `generation`, then `connection`, then `state`.
pub struct ChannelClient {
    socket_url: Url,
    connect_timeout: Duration,
    join_timeout: Duration,
    heartbeat_interval: Duration,
    state: Arc<RwLock<ChannelState>>,
    refs: Arc<AtomicU64>,
    generation: Arc<Mutex<u64>>,
    connection: Mutex<Option<Connection>>,
}

impl ChannelClient {
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            socket_url: config.socket_url.clone(),
            connect_timeout: config.connect_timeout,
            join_timeout: config.join_timeout,
            heartbeat_interval: config.heartbeat_interval,
            state: Arc::new(RwLock::new(ChannelState::Disconnected)),
            refs: Arc::new(AtomicU64::new(0)),
            generation: Arc::new(Mutex::new(0)),
            connection: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> ChannelState {
        *self.state.read().await
    }

    /// Open the socket and join `user:<user_id>` with the session token.
    ///
    /// Without a session nothing is attempted. While another attempt is in
    /// flight or joined this is a no-op. A [`disconnect`](Self::disconnect)
    /// before the join settles yields [`ConnectOutcome::Cancelled`].
    ///
    /// # Errors
    ///
    /// - [`Error::SessionInvalidated`] if the backend reports the user unknown
    ///   (the handler's `on_invalidated` has run by then)
    /// - [`Error::JoinRejected`] for any other join refusal
    /// - [`Error::Transport`], [`Error::ChannelClosed`] or [`Error::Timeout`]
    ///   if the socket fails before the join settles
    pub async fn connect<H: ChannelHandler>(
        &self,
        session: Option<&Session>,
        handler: Arc<H>,
    ) -> Result<ConnectOutcome, Error> {
        let Some(session) = session else {
            debug!("No session; skipping channel join");
            return Ok(ConnectOutcome::Skipped);
        };

        let generation = {
            let generation = self.generation.lock().await;
            let mut state = self.state.write().await;
            if state.is_active() {
                debug!(state = ?*state, "Channel already connecting or joined");
                return Ok(ConnectOutcome::AlreadyActive);
            }
            *state = ChannelState::Connecting;
            *generation
        };

        self.open_and_join(session, handler, generation).await
    }

    /// Close the socket, if any, and return to `Disconnected`.
    ///
    /// An attempt still in flight is cancelled: it closes its socket and
    /// returns [`ConnectOutcome::Cancelled`] without calling the handler.
    pub async fn disconnect(&self) {
        let mut generation = self.generation.lock().await;
        *generation += 1;

        let connection = self.connection.lock().await.take();
        let mut state = self.state.write().await;
        if let Some(connection) = connection {
            let _ = connection.outbound.try_send(Message::Close(None));
            info!("Channel disconnected");
        } else if state.is_active() {
            info!(state = ?*state, "Cancelling pending channel connect");
        }
        *state = ChannelState::Disconnected;
    }

    async fn open_and_join<H: ChannelHandler>(
        &self,
        session: &Session,
        handler: Arc<H>,
        generation: u64,
    ) -> Result<ConnectOutcome, Error> {
        let topic = session.topic();
        info!(url = %self.socket_url, topic = %topic, "Connecting channel");

        let connected = timeout(self.connect_timeout, connect_async(self.socket_url.as_str())).await;
        let ws = match connected {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => return Err(self.abandon(generation, e.into()).await),
            Err(_) => {
                let e = Error::Timeout {
                    operation: "channel connect",
                };
                return Err(self.abandon(generation, e).await);
            }
        };

        let (mut write, mut read) = ws.split();
        if !self.advance(generation, ChannelState::SocketOpen).await {
            return Ok(cancelled(&mut write).await);
        }
        debug!("Socket open");

        let join_ref = next_ref(&self.refs);
        if !self.advance(generation, ChannelState::Joining).await {
            return Ok(cancelled(&mut write).await);
        }
        let join = Frame::join(&topic, &session.jwt, &join_ref);
        if let Err(e) = write.send(Message::text(join.encode())).await {
            return Err(self.abandon(generation, e.into()).await);
        }

        let reply = match timeout(self.join_timeout, await_reply(&mut read, &topic, &join_ref)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(self.abandon(generation, e).await),
            Err(_) => {
                let _ = write.send(Message::Close(None)).await;
                let e = Error::Timeout {
                    operation: "channel join",
                };
                return Err(self.abandon(generation, e).await);
            }
        };

        // Held until the connection is stored, so a concurrent `disconnect`
        // either waits for it or voids this attempt.
        let Some(_current) = current(&self.generation, generation).await else {
            return Ok(cancelled(&mut write).await);
        };

        let (status, response) = reply;
        if let Some(reason) = invalid_session_reason(&response) {
            let reason = reason.to_owned();
            warn!(reason = %reason, "Backend no longer knows this user");
            self.set_state(ChannelState::Failed).await;
            let _ = write.send(Message::Close(None)).await;
            handler.on_invalidated(reason.clone()).await;
            return Err(Error::SessionInvalidated { reason });
        }
        if status == ReplyStatus::Error {
            let reason = reply_reason(&response);
            warn!(reason = %reason, "Channel join rejected");
            self.set_state(ChannelState::Failed).await;
            let _ = write.send(Message::Close(None)).await;
            return Err(Error::JoinRejected(reason));
        }

        self.set_state(ChannelState::Joined).await;
        info!(topic = %topic, "Channel joined");
        if let Some(user) = User::from_snapshot(&response) {
            handler.on_user(user).await;
        }

        let (outbound, outbound_rx) = mpsc::channel::<Message>(32);
        tokio::spawn(write_loop(write, outbound_rx));
        let heartbeat = tokio::spawn(heartbeat_loop(
            outbound.clone(),
            self.heartbeat_interval,
            self.refs.clone(),
        ))
        .abort_handle();
        let reader = tokio::spawn(read_loop(
            read,
            topic,
            outbound.clone(),
            heartbeat.clone(),
            ReaderContext {
                state: self.state.clone(),
                generations: self.generation.clone(),
                generation,
            },
            handler,
        ));

        *self.connection.lock().await = Some(Connection {
            outbound,
            reader,
            heartbeat,
        });
        Ok(ConnectOutcome::Joined)
    }

    /// Give up on an attempt that never reached a join decision.
    async fn abandon(&self, generation: u64, e: Error) -> Error {
        error!(error = %e, "Channel connection failed");
        self.advance(generation, ChannelState::Disconnected).await;
        e
    }

    /// Move to `next` if the attempt from `generation` is still current.
    async fn advance(&self, generation: u64, next: ChannelState) -> bool {
        match current(&self.generation, generation).await {
            Some(_current) => {
                self.set_state(next).await;
                true
            }
            None => false,
        }
    }

    async fn set_state(&self, next: ChannelState) {
        *self.state.write().await = next;
    }
}

/// The generation lock, if `generation` is still the live one.
async fn current(generations: &Mutex<u64>, generation: u64) -> Option<MutexGuard<'_, u64>> {
    let guard = generations.lock().await;
    (*guard == generation).then_some(guard)
}

async fn cancelled(write: &mut WsWrite) -> ConnectOutcome {
    debug!("Channel connect cancelled by disconnect");
    let _ = write.send(Message::Close(None)).await;
    ConnectOutcome::Cancelled
}

/// What the reader task needs to report back, scoped to one generation.
struct ReaderContext {
    state: Arc<RwLock<ChannelState>>,
    generations: Arc<Mutex<u64>>,
    generation: u64,
}

impl ReaderContext {
    async fn current(&self) -> Option<MutexGuard<'_, u64>> {
        current(&self.generations, self.generation).await
    }
}

fn next_ref(refs: &AtomicU64) -> String {
    (refs.fetch_add(1, Ordering::Relaxed) + 1).to_string()
}

/// Wait for the reply to `reference` on `topic`, skipping everything else.
async fn await_reply(
    read: &mut WsRead,
    topic: &str,
    reference: &str,
) -> Result<(ReplyStatus, serde_json::Value), Error> {
    while let Some(message) = read.next().await {
        let text = match message? {
            Message::Text(text) => text,
            Message::Close(_) => return Err(Error::ChannelClosed),
            _ => continue,
        };
        let Some(frame) = Frame::decode(text.as_str()) else {
            continue;
        };
        if frame.topic != topic {
            continue;
        }
        match frame.classify() {
            Inbound::Reply {
                reference: Some(r),
                status,
                response,
            } if r == reference => return Ok((status, response)),
            Inbound::ChannelError | Inbound::ChannelClosed => return Err(Error::ChannelClosed),
            other => debug!(frame = ?other, "Ignoring frame before join reply"),
        }
    }
    Err(Error::ChannelClosed)
}

async fn write_loop(mut write: WsWrite, mut outbound: mpsc::Receiver<Message>) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = write.send(message).await {
            debug!(error = %e, "Channel writer stopped");
            break;
        }
        if closing {
            break;
        }
    }
}

async fn heartbeat_loop(outbound: mpsc::Sender<Message>, period: Duration, refs: Arc<AtomicU64>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately; the join just proved liveness.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let frame = Frame::heartbeat(&next_ref(&refs));
        if outbound.send(Message::text(frame.encode())).await.is_err() {
            break;
        }
    }
}

async fn read_loop<H: ChannelHandler>(
    mut read: WsRead,
    topic: String,
    outbound: mpsc::Sender<Message>,
    heartbeat: AbortHandle,
    context: ReaderContext,
    handler: Arc<H>,
) {
    let invalidated = loop {
        let text = match read.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Ping(data))) => {
                let _ = outbound.send(Message::Pong(data)).await;
                continue;
            }
            Some(Ok(Message::Close(_))) | None => {
                info!("Channel socket closed");
                break None;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!(error = %e, "Channel socket error");
                break None;
            }
        };

        let Some(frame) = Frame::decode(text.as_str()) else {
            debug!("Ignoring non-frame message");
            continue;
        };
        if frame.topic != topic {
            continue;
        }

        match frame.classify() {
            Inbound::Reply { response, .. } => {
                if let Some(reason) = invalid_session_reason(&response) {
                    break Some(reason.to_owned());
                }
                if let Some(user) = User::from_snapshot(&response) {
                    let Some(_current) = context.current().await else {
                        return;
                    };
                    handler.on_user(user).await;
                }
            }
            Inbound::ProfileUpdate(payload) => {
                let Some(user) = payload.get("user").and_then(User::from_snapshot) else {
                    warn!("profile_update without a user");
                    continue;
                };
                let Some(_current) = context.current().await else {
                    return;
                };
                handler.on_user(user).await;
            }
            Inbound::ChannelError | Inbound::ChannelClosed => {
                info!(event = %frame.event, "Channel closed by server");
                break None;
            }
            Inbound::Other(event) => debug!(event = %event, "Ignoring channel event"),
        }
    };

    heartbeat.abort();
    let _ = outbound.send(Message::Close(None)).await;

    let Some(_current) = context.current().await else {
        debug!("Channel reader superseded by disconnect");
        return;
    };
    match invalidated {
        Some(reason) => {
            warn!(reason = %reason, "Backend no longer knows this user");
            *context.state.write().await = ChannelState::Failed;
            handler.on_invalidated(reason).await;
        }
        None => {
            *context.state.write().await = ChannelState::Disconnected;
            handler.on_disconnected().await;
        }
    }
}
