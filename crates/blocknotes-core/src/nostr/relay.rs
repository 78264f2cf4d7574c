//! Connection to a single relay and the subscriptions opened over it.
//!
//! A dispatcher task owns the client's notification stream and routes each
//! EVENT / EOSE / CLOSED frame to the [`Subscription`] registered under its id.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};

use crate::constants::NETWORK_TIMEOUT_SECS;

/// How long `connect` waits for the relay to report itself connected
const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(5);
const VERIFY_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How often the status monitor checks for relay-initiated disconnects
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);
const NOTICE_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    /// The operation needs a connected relay
    #[error("relay is {0}")]
    NotConnected(ConnectionState),

    #[error("relay client error: {0}")]
    Client(String),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("relay did not report connected within {0:?}")]
    NoRelayConnected(Duration),
}

/// One item delivered on a subscription, in relay send order
#[derive(Debug, Clone)]
pub enum SubscriptionItem {
    Event(Box<Event>),
    /// End of stored events. Delivered at most once.
    Eose,
}

/// Anything that can open a filtered subscription.
pub trait RelaySubscriber: Send + Sync + 'static {
    fn subscribe(
        &self,
        filter: Filter,
    ) -> impl Future<Output = Result<Subscription, RelayError>> + Send;
}

/// Live subscription handle. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    rx: mpsc::UnboundedReceiver<SubscriptionItem>,
    close_tx: mpsc::UnboundedSender<String>,
    eose_seen: bool,
    closed: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        rx: mpsc::UnboundedReceiver<SubscriptionItem>,
        close_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            id,
            rx,
            close_tx,
            eose_seen: false,
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Next event or EOSE. `None` once unsubscribed or the relay closed it.
    pub async fn next(&mut self) -> Option<SubscriptionItem> {
        loop {
            if self.closed {
                return None;
            }
            match self.rx.recv().await? {
                SubscriptionItem::Eose if self.eose_seen => continue,
                SubscriptionItem::Eose => {
                    self.eose_seen = true;
                    return Some(SubscriptionItem::Eose);
                }
                item => return Some(item),
            }
        }
    }

    /// Stop delivery on this subscription only. Safe to call repeatedly.
    pub fn unsubscribe(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.rx.close();
        let _ = self.close_tx.send(self.id.clone());
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

type Routes = HashMap<String, mpsc::UnboundedSender<SubscriptionItem>>;

/// Per-connection handles, replaced on every successful connect
struct Session {
    client: Client,
    close_tx: mpsc::UnboundedSender<String>,
    cancel_tx: watch::Sender<bool>,
}

struct Shared {
    url: String,
    state: watch::Sender<ConnectionState>,
    routes: Mutex<Routes>,
    notices: broadcast::Sender<String>,
    session: Mutex<Option<Session>>,
}

impl Shared {
    /// Drop the session and every route, leaving the Disconnected state
    fn teardown(&self) -> Option<Client> {
        let session = self.session.lock().take();
        self.routes.lock().clear();
        self.state.send_replace(ConnectionState::Disconnected);
        session.map(|s| {
            let _ = s.cancel_tx.send(true);
            s.client
        })
    }
}

/// Lifecycle of one relay: Disconnected → Connecting → Connected, and back to
/// Disconnected on failure, on `disconnect`, or when the relay drops us.
/// There is no automatic reconnect.
pub struct RelayConnection {
    shared: Arc<Shared>,
    verify_timeout: Duration,
}

impl RelayConnection {
    pub fn new(url: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                state,
                routes: Mutex::new(HashMap::new()),
                notices,
                session: Mutex::new(None),
            }),
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
        }
    }

    /// Override how long `connect` polls for the relay to come up
    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Relay NOTICE messages. Diagnostic only.
    pub fn notices(&self) -> broadcast::Receiver<String> {
        self.shared.notices.subscribe()
    }

    /// Connect to the relay.
    ///
    /// Idempotent: when already Connected this returns at once, and when
    /// another caller is Connecting it waits for that attempt's outcome.
    pub async fn connect(&self) -> Result<(), RelayError> {
        let started = self.shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });

        if !started {
            return self.wait_for_attempt().await;
        }

        tracing::info!(url = %self.shared.url, "connecting to relay");
        match self.establish().await {
            Ok((session, close_rx)) => {
                self.start(session, close_rx);
                tracing::info!(url = %self.shared.url, "relay connected");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(url = %self.shared.url, error = %e, "relay connect failed");
                self.shared.state.send_replace(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn wait_for_attempt(&self) -> Result<(), RelayError> {
        let mut rx = self.shared.state.subscribe();
        let state = *rx
            .wait_for(|s| *s != ConnectionState::Connecting)
            .await
            .map_err(|e| RelayError::Client(e.to_string()))?;
        match state {
            ConnectionState::Connected => Ok(()),
            other => Err(RelayError::NotConnected(other)),
        }
    }

    async fn establish(&self) -> Result<(Session, mpsc::UnboundedReceiver<String>), RelayError> {
        let client = Client::builder().build();
        client
            .add_relay(self.shared.url.as_str())
            .await
            .map_err(|e| RelayError::Client(e.to_string()))?;

        let timeout = Duration::from_secs(NETWORK_TIMEOUT_SECS);
        tokio::time::timeout(timeout, client.connect())
            .await
            .map_err(|_| RelayError::Timeout(timeout))?;

        // Status flips asynchronously after connect() returns
        let verify_start = Instant::now();
        loop {
            let connected = client
                .relays()
                .await
                .values()
                .any(|r| r.status() == RelayStatus::Connected);
            if connected {
                tracing::debug!(elapsed = ?verify_start.elapsed(), "relay reported connected");
                break;
            }
            if verify_start.elapsed() >= self.verify_timeout {
                client.disconnect().await;
                return Err(RelayError::NoRelayConnected(self.verify_timeout));
            }
            tokio::time::sleep(VERIFY_POLL_INTERVAL).await;
        }

        let (close_tx, close_rx) = mpsc::unbounded_channel();
        let (cancel_tx, _) = watch::channel(false);
        let session = Session {
            client,
            close_tx,
            cancel_tx,
        };
        Ok((session, close_rx))
    }

    fn start(&self, session: Session, close_rx: mpsc::UnboundedReceiver<String>) {
        let client = session.client.clone();
        let cancel_rx = session.cancel_tx.subscribe();
        // Taken before any REQ can go out
        let notifications = client.notifications();

        *self.shared.session.lock() = Some(session);
        self.shared.state.send_replace(ConnectionState::Connected);

        tokio::spawn(dispatch(
            self.shared.clone(),
            client.clone(),
            notifications,
            close_rx,
            cancel_rx.clone(),
        ));
        tokio::spawn(monitor_status(self.shared.clone(), client, cancel_rx));
    }

    /// Open a subscription. Fails fast unless Connected.
    ///
    /// The route is registered before the REQ goes out, so nothing the relay
    /// sends for this id can be missed.
    pub async fn subscribe(&self, filter: Filter) -> Result<Subscription, RelayError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(RelayError::NotConnected(state));
        }
        let (client, close_tx) = {
            let session = self.shared.session.lock();
            match session.as_ref() {
                Some(s) => (s.client.clone(), s.close_tx.clone()),
                None => return Err(RelayError::NotConnected(state)),
            }
        };

        let id = SubscriptionId::generate();
        let key = id.to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.routes.lock().insert(key.clone(), tx);

        if let Err(e) = client.subscribe_with_id(id, filter, None).await {
            self.shared.routes.lock().remove(&key);
            return Err(RelayError::Client(e.to_string()));
        }

        tracing::debug!(subscription = %key, "subscribed");
        Ok(Subscription::new(key, rx, close_tx))
    }

    /// Close every subscription and the socket
    pub async fn disconnect(&self) {
        if let Some(client) = self.shared.teardown() {
            client.disconnect().await;
            tracing::info!(url = %self.shared.url, "relay disconnected");
        }
    }
}

impl RelaySubscriber for RelayConnection {
    fn subscribe(
        &self,
        filter: Filter,
    ) -> impl Future<Output = Result<Subscription, RelayError>> + Send {
        RelayConnection::subscribe(self, filter)
    }
}

/// Route pool notifications to subscriptions and forward unsubscribes
async fn dispatch(
    shared: Arc<Shared>,
    client: Client,
    mut notifications: broadcast::Receiver<RelayPoolNotification>,
    mut close_rx: mpsc::UnboundedReceiver<String>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = cancel_rx.changed() => {
                if *cancel_rx.borrow() {
                    break;
                }
            }
            Some(id) = close_rx.recv() => {
                shared.routes.lock().remove(&id);
                client.unsubscribe(&SubscriptionId::new(id.clone())).await;
                tracing::debug!(subscription = %id, "unsubscribed");
            }
            result = notifications.recv() => match result {
                Ok(RelayPoolNotification::Event { subscription_id, event, .. }) => {
                    route(&shared, &subscription_id.to_string(), SubscriptionItem::Event(event));
                }
                Ok(RelayPoolNotification::Message { message, .. }) => match message {
                    RelayMessage::EndOfStoredEvents(id) => {
                        route(&shared, &id.to_string(), SubscriptionItem::Eose);
                    }
                    RelayMessage::Notice(notice) => {
                        let notice = notice.to_string();
                        tracing::warn!(url = %shared.url, %notice, "relay notice");
                        let _ = shared.notices.send(notice);
                    }
                    RelayMessage::Closed { subscription_id, message } => {
                        let id = subscription_id.to_string();
                        tracing::warn!(subscription = %id, reason = %message, "relay closed subscription");
                        shared.routes.lock().remove(&id);
                    }
                    _ => {}
                },
                Ok(RelayPoolNotification::Shutdown) => {
                    tracing::warn!(url = %shared.url, "relay pool shut down");
                    shared.teardown();
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "notification stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    tracing::debug!(url = %shared.url, "dispatcher stopped");
}

fn route(shared: &Shared, id: &str, item: SubscriptionItem) {
    let mut routes = shared.routes.lock();
    let Some(tx) = routes.get(id) else {
        return;
    };
    if tx.send(item).is_err() {
        routes.remove(id);
    }
}

/// Detect the relay dropping the connection
async fn monitor_status(shared: Arc<Shared>, client: Client, mut cancel_rx: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(STATUS_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel_rx.changed() => {
                if *cancel_rx.borrow() {
                    return;
                }
            }
            _ = interval.tick() => {
                let connected = client
                    .relays()
                    .await
                    .values()
                    .any(|r| r.status() == RelayStatus::Connected);
                if !connected {
                    tracing::warn!(url = %shared.url, "relay connection lost");
                    shared.teardown();
                    return;
                }
            }
        }
    }
}
