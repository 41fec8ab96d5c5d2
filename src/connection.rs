//! The single duplex connection to the game server.
//!
//! [`Connection`] owns a background loop task that holds at most one live
//! [`Transport`]. Handles talk to the loop over an unbounded command channel
//! and return as soon as the command is queued; inbound text frames come out
//! of the `mpsc::Receiver<String>` returned by [`Connection::start`].
//!
//! # Reconnect policy
//!
//! - [`connect`](Outbox::connect) is idempotent: it is a no-op while a
//!   connection is open or an attempt is in flight.
//! - A send issued while not open starts a connect and is deferred. Deferred
//!   messages go out, in order, as soon as the connection opens. Any still
//!   waiting once the retry delay has passed are dropped, logged, and counted
//!   in [`dropped_messages`](Connection::dropped_messages).
//! - Transport errors and server-initiated closes flip the state to
//!   [`ConnectionState::Closed`]. The next send reconnects.
//!
//! There is no backoff or jitter: one fixed delay bounds the outbound queue.
//!
//! # Example
//!
//! ```rust,ignore
//! let (connection, mut frames) = Connection::start(connector, &ClientConfig::default());
//! connection.send(&ClientMessage::GetGames)?;
//! while let Some(frame) = frames.recv().await {
//!     router.dispatch(&frame);
//! }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{RaceError, Result};
use crate::protocol::ClientMessage;
use crate::transport::{Connector, Transport};

/// Lifecycle of the underlying link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Open,
}

enum Command {
    Connect,
    Send(String),
}

// ── Outbox ──────────────────────────────────────────────────────────

/// Cloneable sending half of a [`Connection`].
///
/// Models that only need to send messages and observe connectivity hold an
/// `Outbox` rather than the connection itself.
#[derive(Debug, Clone)]
pub struct Outbox {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl Outbox {
    /// Queue `msg` for sending.
    ///
    /// Delivery is fire-and-forget: if the connection is down the message is
    /// deferred once and then dropped (see the module docs).
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::NotConnected`] if the connection loop has exited,
    /// or [`RaceError::Serialization`] if `msg` cannot be encoded.
    pub fn send(&self, msg: &ClientMessage) -> Result<()> {
        let json = msg.to_json()?;
        debug!(kind = %msg.message_type(), "queueing message");
        self.cmd_tx
            .send(Command::Send(json))
            .map_err(|_| RaceError::NotConnected)
    }

    /// Ask the loop to open a connection if none is open or in flight.
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::NotConnected`] if the connection loop has exited.
    pub fn connect(&self) -> Result<()> {
        self.cmd_tx
            .send(Command::Connect)
            .map_err(|_| RaceError::NotConnected)
    }

    pub fn is_open(&self) -> bool {
        *self.state.borrow() == ConnectionState::Open
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

// ── Connection ──────────────────────────────────────────────────────

/// Owner of the connection loop task.
///
/// Dropping the `Connection` aborts the loop; [`shutdown`](Self::shutdown)
/// closes the transport gracefully first.
pub struct Connection {
    outbox: Outbox,
    dropped: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl Connection {
    /// Spawn the connection loop and start connecting right away.
    ///
    /// Returns the connection and the receiver of inbound text frames, in
    /// arrival order.
    #[must_use = "the frame receiver must be drained or inbound messages are lost"]
    pub fn start<C: Connector>(
        connector: C,
        config: &ClientConfig,
    ) -> (Self, mpsc::Receiver<String>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        let (frame_tx, frame_rx) = mpsc::channel::<String>(config.frame_channel_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let dropped = Arc::new(AtomicU64::new(0));

        // Cannot fail: the receiver is still in scope.
        let _ = cmd_tx.send(Command::Connect);

        let link = Link {
            connector: Arc::new(connector),
            transport: None,
            pending: None,
            deferred: VecDeque::new(),
            frame_tx,
            state_tx,
            retry_delay: config.send_retry_delay,
            dropped: Arc::clone(&dropped),
        };
        let task = tokio::spawn(link.run(cmd_rx, shutdown_rx));

        let connection = Self {
            outbox: Outbox {
                cmd_tx,
                state: state_rx,
            },
            dropped,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };
        (connection, frame_rx)
    }

    /// A cloneable sending handle.
    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    /// See [`Outbox::send`].
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::NotConnected`] if the connection loop has exited.
    pub fn send(&self, msg: &ClientMessage) -> Result<()> {
        self.outbox.send(msg)
    }

    /// See [`Outbox::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`RaceError::NotConnected`] if the connection loop has exited.
    pub fn connect(&self) -> Result<()> {
        self.outbox.connect()
    }

    pub fn is_open(&self) -> bool {
        self.outbox.is_open()
    }

    pub fn state(&self) -> ConnectionState {
        self.outbox.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.outbox.subscribe_state()
    }

    /// Messages given up on because the connection never opened in time or
    /// the transport rejected them.
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    /// Close the transport and stop the loop.
    ///
    /// The loop gets `shutdown_timeout` to close gracefully before it is aborted.
    pub async fn shutdown(&mut self) {
        debug!("connection shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("connection loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("connection loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("connection loop aborted: {join_err}");
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("dropped", &self.dropped_messages())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Loop ────────────────────────────────────────────────────────────

struct Deferred {
    deadline: Instant,
    json: String,
}

/// State owned by the connection loop task.
struct Link<C: Connector> {
    connector: Arc<C>,
    transport: Option<C::Transport>,
    pending: Option<JoinHandle<Result<C::Transport>>>,
    deferred: VecDeque<Deferred>,
    frame_tx: mpsc::Sender<String>,
    state_tx: watch::Sender<ConnectionState>,
    retry_delay: Duration,
    dropped: Arc<AtomicU64>,
}

impl<C: Connector> Link<C> {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        debug!("connection loop started");

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Connect) => self.start_connect(),
                    Some(Command::Send(json)) => self.send_or_defer(json).await,
                    None => {
                        debug!("command channel closed, shutting down connection loop");
                        self.close().await;
                        break;
                    }
                },

                _ = &mut shutdown_rx => {
                    debug!("shutdown signal received");
                    self.close().await;
                    break;
                }

                joined = wait_connect(&mut self.pending) => {
                    self.pending = None;
                    self.finish_connect(joined).await;
                }

                () = next_deadline(&self.deferred) => self.expire_deferred(),

                incoming = recv_frame(&mut self.transport) => self.deliver(incoming).await,
            }
        }

        debug!("connection loop exited");
    }

    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                debug!(from = ?current, to = ?next, "connection state changed");
                *current = next;
                true
            }
        });
    }

    fn start_connect(&mut self) {
        if self.transport.is_some() || self.pending.is_some() {
            debug!("connect ignored: already open or in flight");
            return;
        }
        info!("connecting");
        self.set_state(ConnectionState::Connecting);
        let connector = Arc::clone(&self.connector);
        self.pending = Some(tokio::spawn(async move { connector.connect().await }));
    }

    async fn finish_connect(&mut self, joined: std::result::Result<Result<C::Transport>, JoinError>) {
        match joined {
            Ok(Ok(transport)) => {
                info!("connection open");
                self.transport = Some(transport);
                self.set_state(ConnectionState::Open);
                self.flush_deferred().await;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "connect failed");
                self.set_state(ConnectionState::Closed);
            }
            Err(e) => {
                error!(error = %e, "connect task failed");
                self.set_state(ConnectionState::Closed);
            }
        }
    }

    async fn send_or_defer(&mut self, json: String) {
        if self.transport.is_some() {
            self.transmit(json).await;
            return;
        }
        warn!(
            delay = ?self.retry_delay,
            "not connected; reconnecting before send"
        );
        self.start_connect();
        self.deferred.push_back(Deferred {
            deadline: Instant::now() + self.retry_delay,
            json,
        });
    }

    async fn flush_deferred(&mut self) {
        while self.transport.is_some() {
            let Some(next) = self.deferred.pop_front() else {
                break;
            };
            self.transmit(next.json).await;
            debug!("deferred message sent after reconnect");
        }
    }

    fn expire_deferred(&mut self) {
        let now = Instant::now();
        while self
            .deferred
            .front()
            .is_some_and(|front| front.deadline <= now)
        {
            self.deferred.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            error!("dropping message: still not connected after retry delay");
        }
    }

    async fn transmit(&mut self, json: String) {
        let Some(transport) = self.transport.as_mut() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if let Err(e) = transport.send(json).await {
            warn!(error = %e, "send failed; closing connection");
            self.dropped.fetch_add(1, Ordering::Relaxed);
            self.transport = None;
            self.set_state(ConnectionState::Closed);
        }
    }

    async fn deliver(&mut self, incoming: Option<Result<String>>) {
        match incoming {
            Some(Ok(text)) => {
                if self.frame_tx.send(text).await.is_err() {
                    debug!("frame receiver dropped; discarding inbound frame");
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "transport error; connection closed");
                self.transport = None;
                self.set_state(ConnectionState::Closed);
            }
            None => {
                info!("connection closed by server");
                self.transport = None;
                self.set_state(ConnectionState::Closed);
            }
        }
    }

    async fn close(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                debug!(error = %e, "transport close failed");
            }
        }
        if !self.deferred.is_empty() {
            let count = self.deferred.len() as u64;
            self.dropped.fetch_add(count, Ordering::Relaxed);
            warn!(count, "dropping deferred messages on shutdown");
            self.deferred.clear();
        }
        self.set_state(ConnectionState::Closed);
    }
}

async fn wait_connect<T>(
    pending: &mut Option<JoinHandle<Result<T>>>,
) -> std::result::Result<Result<T>, JoinError> {
    match pending {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn next_deadline(deferred: &VecDeque<Deferred>) {
    match deferred.front() {
        Some(front) => tokio::time::sleep_until(front.deadline).await,
        None => std::future::pending().await,
    }
}

async fn recv_frame<T: Transport>(transport: &mut Option<T>) -> Option<Result<String>> {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Mutex as StdMutex;

    /// Transport whose inbound side is fed by the test through `to_client`.
    struct LoopbackTransport {
        incoming: mpsc::UnboundedReceiver<String>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for LoopbackTransport {
        async fn send(&mut self, message: String) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            self.incoming.recv().await.map(Ok)
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Server {
        connects: AtomicUsize,
        refuse: AtomicBool,
        to_client: StdMutex<Option<mpsc::UnboundedSender<String>>>,
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[derive(Clone, Default)]
    struct LoopbackConnector(Arc<Server>);

    #[async_trait]
    impl Connector for LoopbackConnector {
        type Transport = LoopbackTransport;

        async fn connect(&self) -> Result<LoopbackTransport> {
            self.0.connects.fetch_add(1, Ordering::SeqCst);
            if self.0.refuse.load(Ordering::SeqCst) {
                return Err(RaceError::Connect("refused".into()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            *self.0.to_client.lock().unwrap() = Some(tx);
            Ok(LoopbackTransport {
                incoming: rx,
                sent: Arc::clone(&self.0.sent),
            })
        }
    }

    async fn wait_for_state(connection: &Connection, state: ConnectionState) {
        let mut rx = connection.subscribe_state();
        rx.wait_for(|s| *s == state).await.unwrap();
    }

    #[tokio::test]
    async fn starts_connecting_immediately() {
        let connector = LoopbackConnector::default();
        let (connection, _frames) = Connection::start(connector.clone(), &ClientConfig::default());

        wait_for_state(&connection, ConnectionState::Open).await;
        assert!(connection.is_open());
        assert_eq!(connector.0.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_connect_while_open_keeps_one_link() {
        let connector = LoopbackConnector::default();
        let (mut connection, _frames) =
            Connection::start(connector.clone(), &ClientConfig::default());
        wait_for_state(&connection, ConnectionState::Open).await;

        connection.connect().unwrap();
        connection.connect().unwrap();
        // A send is processed after both connects, so once it lands they have been handled.
        connection.send(&ClientMessage::GetGames).unwrap();
        while connector.0.sent.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }

        assert_eq!(connector.0.connects.load(Ordering::SeqCst), 1);
        connection.shutdown().await;
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn inbound_frames_arrive_in_order() {
        let connector = LoopbackConnector::default();
        let (connection, mut frames) =
            Connection::start(connector.clone(), &ClientConfig::default());
        wait_for_state(&connection, ConnectionState::Open).await;

        let tx = connector.0.to_client.lock().unwrap().clone().unwrap();
        for n in 0..3 {
            tx.send(format!("frame-{n}")).unwrap();
        }
        for n in 0..3 {
            assert_eq!(frames.recv().await.unwrap(), format!("frame-{n}"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn send_is_dropped_when_connect_keeps_failing() {
        let connector = LoopbackConnector::default();
        connector.0.refuse.store(true, Ordering::SeqCst);
        let config = ClientConfig::default().with_send_retry_delay(Duration::from_secs(2));
        let (connection, _frames) = Connection::start(connector.clone(), &config);
        // Let the initial attempt fail before sending.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(connection.state(), ConnectionState::Closed);

        connection.send(&ClientMessage::GetGames).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(connection.dropped_messages(), 1);
        assert!(connector.0.sent.lock().unwrap().is_empty());
        // Initial connect plus the one triggered by the send.
        assert_eq!(connector.0.connects.load(Ordering::SeqCst), 2);
    }
}
