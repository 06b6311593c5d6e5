use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use derive_builder::Builder;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use serde_json::Value;
use tokio::sync::{Mutex, oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::store::client::{
    StatusEvent, StatusStoreError, StatusStoreTrait, StatusSubscription, Subscribers,
};
use crate::store::document::{get_path, leaves, set_path};
use crate::store::status::{ShadeStatus, StatusPath};

pub const DEFAULT_ROOT_TOPIC: &str = "clothsline_status";
const CLIENT_ID_PREFIX: &str = "nimbus";

#[derive(Builder, Clone, Debug)]
#[builder(setter(into))]
pub struct MqttStoreOptions {
    pub host: String,
    #[builder(default = "1883")]
    pub port: u16,
    #[builder(default)]
    pub user: Option<String>,
    #[builder(default)]
    pub password: Option<String>,
    #[builder(default = "DEFAULT_ROOT_TOPIC.to_string()")]
    pub root_topic: String,
    /// How long to wait after SUBACK for retained leaves before the first
    /// snapshot is published.
    #[builder(default = "Duration::from_millis(500)")]
    pub settle: Duration,
    /// How long a write waits for the broker to echo each published leaf.
    #[builder(default = "Duration::from_secs(5)")]
    pub write_timeout: Duration,
}

impl MqttStoreOptions {
    pub fn builder() -> MqttStoreOptionsBuilder {
        MqttStoreOptionsBuilder::default()
    }
}

fn generate_client_id() -> String {
    format!("{CLIENT_ID_PREFIX}_{}", Uuid::new_v4().simple())
}

/// Leaf paths of the record schema, e.g. `countdownModel/secondsLeft`.
fn schema_leaves() -> impl Iterator<Item = &'static str> {
    StatusPath::ALL
        .into_iter()
        .filter(|p| !matches!(p, StatusPath::Root | StatusPath::CountdownModel))
        .map(|p| p.as_str())
}

fn is_under(key: &str, prefix: &str) -> bool {
    prefix.is_empty() || key == prefix || key.starts_with(&format!("{prefix}/"))
}

type EchoWaiter = (Vec<u8>, oneshot::Sender<()>);

struct MqttShared {
    leaves: DashMap<String, Value>,
    subscribers: Subscribers,
    /// Guards the synced flag so a new subscriber never misses the first snapshot.
    synced: Mutex<bool>,
    synced_watch: watch::Sender<bool>,
    /// Bumped on every resync; settle timers of older subscriptions are ignored.
    generation: AtomicU64,
    connected: AtomicBool,
    /// Own publishes waiting for the broker to send them back, by leaf key.
    pending: DashMap<String, Vec<EchoWaiter>>,
    closed: watch::Sender<bool>,
}

impl MqttShared {
    fn new() -> Self {
        Self {
            leaves: DashMap::new(),
            subscribers: Subscribers::default(),
            synced: Mutex::new(false),
            synced_watch: watch::channel(false).0,
            generation: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            pending: DashMap::new(),
            closed: watch::channel(false).0,
        }
    }

    fn document(&self) -> Value {
        let mut document = Value::Null;
        for entry in self.leaves.iter() {
            let segments: Vec<&str> = entry.key().split('/').collect();
            set_path(&mut document, &segments, entry.value().clone());
        }
        document
    }

    fn snapshot(&self) -> StatusEvent {
        ShadeStatus::from_snapshot(&self.document())
    }

    async fn mark_synced(&self, generation: u64) {
        let mut synced = self.synced.lock().await;
        if generation != self.generation.load(Ordering::SeqCst) {
            debug!("Ignoring settle timer of an older subscription");
            return;
        }
        if !*synced {
            *synced = true;
            self.synced_watch.send_replace(true);
            info!("Status store synchronized ({} leaves)", self.leaves.len());
            self.subscribers.notify(self.snapshot()).await;
        }
    }

    async fn publish_update(&self) {
        if *self.synced.lock().await {
            self.subscribers.notify(self.snapshot()).await;
        }
    }

    /// Forgets every leaf so the retained replay of a new session rebuilds the
    /// record. Deletions made while offline are never replayed by the broker.
    async fn begin_resync(&self) -> u64 {
        let mut synced = self.synced.lock().await;
        *synced = false;
        self.synced_watch.send_replace(false);
        self.leaves.clear();
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn apply_leaf(&self, key: &str, payload: &[u8]) {
        self.resolve_echo(key, payload);
        if payload.is_empty() {
            debug!("Leaf {key} removed");
            self.leaves.remove(key);
        } else {
            match serde_json::from_slice::<Value>(payload) {
                Ok(value) => {
                    debug!("Leaf {key} = {value}");
                    self.leaves.insert(key.to_string(), value);
                }
                Err(e) => {
                    error!("Failed to parse leaf {key}: {e}");
                    self.subscribers
                        .notify(Err(StatusStoreError::Malformed(e.to_string())))
                        .await;
                    return;
                }
            }
        }
        self.publish_update().await;
    }

    fn expect_echo(&self, key: &str, payload: &[u8]) -> oneshot::Receiver<()> {
        let (sender, receiver) = oneshot::channel();
        let mut waiters = self.pending.entry(key.to_string()).or_default();
        waiters.retain(|(_, sender)| !sender.is_closed());
        waiters.push((payload.to_vec(), sender));
        receiver
    }

    fn resolve_echo(&self, key: &str, payload: &[u8]) {
        if let Some(mut waiters) = self.pending.get_mut(key) {
            let mut index = 0;
            while index < waiters.len() {
                if waiters[index].0 == payload {
                    let (_, sender) = waiters.swap_remove(index);
                    let _ = sender.send(());
                } else {
                    index += 1;
                }
            }
        }
        self.pending.remove_if(key, |_, waiters| waiters.is_empty());
    }

    /// Fails every write still waiting for its echo.
    fn connection_lost(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.pending.clear();
    }
}

/// Status store backed by retained MQTT topics, one topic per record leaf
/// (`<root>/manualShade`, `<root>/countdownModel/secondsLeft`, ...).
pub struct MqttStatusStore {
    client: AsyncClient,
    root_topic: String,
    shared: Arc<MqttShared>,
    sync_timeout: Duration,
    write_timeout: Duration,
}

impl MqttStatusStore {
    pub async fn connect(options: MqttStoreOptions) -> Result<Self, StatusStoreError> {
        let mut mqtt_options = MqttOptions::new(generate_client_id(), options.host, options.port);
        mqtt_options.set_keep_alive(Duration::from_secs(5));
        mqtt_options.set_max_packet_size(128 * 1024, 128 * 1024);
        if let Some(user) = options.user {
            mqtt_options.set_credentials(user, options.password.unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options.clone(), 10);
        info!("Connecting to MQTT broker at {:?}", mqtt_options.broker_address());

        let shared = Arc::new(MqttShared::new());

        let filter = format!("{}/#", options.root_topic);
        client
            .subscribe(filter.clone(), QoS::AtLeastOnce)
            .await
            .map_err(|e| StatusStoreError::Connection(format!("Failed to subscribe: {e}")))?;
        info!("Subscribed to topic: {filter}");

        let shared_ = shared.clone();
        let client_ = client.clone();
        let root_topic = options.root_topic.clone();
        let settle = options.settle;
        tokio::spawn(async move {
            Self::run_eventloop(eventloop, client_, shared_, root_topic, settle).await
        });

        Ok(Self {
            client,
            root_topic: options.root_topic,
            shared,
            sync_timeout: settle + Duration::from_secs(5),
            write_timeout: options.write_timeout,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Asks the event loop to close the session and waits until the
    /// DISCONNECT packet has left, so nothing queued before it is lost.
    pub async fn disconnect(&self) -> Result<(), StatusStoreError> {
        if !self.is_connected() {
            debug!("Not connected, nothing to disconnect");
            return Ok(());
        }
        let mut closed = self.shared.closed.subscribe();
        self.client
            .try_disconnect()
            .map_err(|e| StatusStoreError::Connection(format!("Disconnect error: {e}")))?;
        match tokio::time::timeout(self.write_timeout, closed.wait_for(|closed| *closed)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(StatusStoreError::Connection(e.to_string())),
            Err(_) => Err(StatusStoreError::Connection(
                "Timed out waiting for disconnect".to_string(),
            )),
        }
    }

    async fn run_eventloop(
        mut eventloop: EventLoop,
        client: AsyncClient,
        shared: Arc<MqttShared>,
        root_topic: String,
        settle: Duration,
    ) {
        let prefix = format!("{root_topic}/");
        let filter = format!("{root_topic}/#");
        let mut connected_once = false;
        let mut generation = 0;
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    shared.connected.store(true, Ordering::SeqCst);
                    if connected_once {
                        info!("Reconnected, resynchronizing status");
                        generation = shared.begin_resync().await;
                        if let Err(e) = client.try_subscribe(filter.clone(), QoS::AtLeastOnce) {
                            warn!("Failed to resubscribe: {e}");
                        }
                    }
                    connected_once = true;
                }
                Ok(Event::Incoming(Packet::SubAck(_))) => {
                    let shared = shared.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(settle).await;
                        shared.mark_synced(generation).await;
                    });
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Some(key) = publish.topic.strip_prefix(&prefix) {
                        shared.apply_leaf(key, &publish.payload).await;
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("Disconnected from broker");
                    shared.connection_lost();
                    shared.closed.send_replace(true);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Connection error: {e:?}");
                    shared.connection_lost();
                    shared
                        .subscribers
                        .notify(Err(StatusStoreError::Connection(e.to_string())))
                        .await;
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Waits for the retained record of the current session. Writes made
    /// before that may fail with "not connected".
    pub async fn wait_ready(&self) -> Result<(), StatusStoreError> {
        self.wait_synced(StatusPath::Root).await
    }

    async fn wait_synced(&self, path: StatusPath) -> Result<(), StatusStoreError> {
        let mut receiver = self.shared.synced_watch.subscribe();
        match tokio::time::timeout(self.sync_timeout, receiver.wait_for(|synced| *synced)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(StatusStoreError::Read {
                path,
                message: e.to_string(),
            }),
            Err(_) => Err(StatusStoreError::Read {
                path,
                message: "timed out waiting for retained status".to_string(),
            }),
        }
    }

    async fn publish_leaf(
        &self,
        path: StatusPath,
        key: &str,
        value: Option<&Value>,
    ) -> Result<(), StatusStoreError> {
        let payload = match value {
            Some(value) => serde_json::to_vec(value).map_err(|e| StatusStoreError::Write {
                path,
                message: format!("Serialization error: {e}"),
            })?,
            None => Vec::new(),
        };
        let write_error = |message: String| StatusStoreError::Write { path, message };
        if !self.is_connected() {
            return Err(write_error("not connected to broker".to_string()));
        }

        let topic = format!("{}/{key}", self.root_topic);
        debug!("Publishing {topic} ({} bytes)", payload.len());
        let echo = self.shared.expect_echo(key, &payload);
        self.client
            .try_publish(topic, QoS::AtLeastOnce, true, payload)
            .map_err(|e| write_error(e.to_string()))?;

        match tokio::time::timeout(self.write_timeout, echo).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(write_error("connection lost".to_string())),
            Err(_) => Err(write_error("no acknowledgement from broker".to_string())),
        }
    }

    fn keys_under(&self, prefix: &str) -> BTreeSet<String> {
        self.shared
            .leaves
            .iter()
            .map(|entry| entry.key().clone())
            .chain(schema_leaves().map(str::to_string))
            .filter(|key| is_under(key, prefix))
            .collect()
    }
}

#[async_trait]
impl StatusStoreTrait for MqttStatusStore {
    async fn read(&self, path: StatusPath) -> Result<Value, StatusStoreError> {
        self.wait_synced(path).await?;
        let document = self.shared.document();
        Ok(get_path(&document, path.segments())
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn write(&self, path: StatusPath, value: Value) -> Result<(), StatusStoreError> {
        if value.is_null() {
            return self.delete(path).await;
        }
        let prefix = path.as_str();
        let new_leaves = leaves(prefix, &value);
        if matches!(path, StatusPath::Root | StatusPath::CountdownModel) {
            for key in self.keys_under(prefix) {
                if !new_leaves.iter().any(|(k, _)| *k == key) {
                    self.publish_leaf(path, &key, None).await?;
                }
            }
        }
        for (key, leaf) in &new_leaves {
            self.publish_leaf(path, key, Some(leaf)).await?;
        }
        Ok(())
    }

    async fn delete(&self, path: StatusPath) -> Result<(), StatusStoreError> {
        for key in self.keys_under(path.as_str()) {
            self.publish_leaf(path, &key, None).await?;
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<StatusSubscription, StatusStoreError> {
        let synced = self.shared.synced.lock().await;
        let initial = if *synced {
            Some(self.shared.snapshot())
        } else {
            None
        };
        Ok(self.shared.subscribers.add(initial).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_leaves_skip_composites() {
        let all: Vec<&str> = schema_leaves().collect();
        assert!(all.contains(&"countdownModel/secondsLeft"));
        assert!(!all.contains(&"countdownModel"));
        assert!(!all.contains(&""));
        assert_eq!(all.len(), 6);
    }

    #[test]
    fn prefix_matching() {
        assert!(is_under("countdownModel/secondsLeft", "countdownModel"));
        assert!(is_under("manualShade", ""));
        assert!(is_under("manualShade", "manualShade"));
        assert!(!is_under("countdownModelX", "countdownModel"));
    }

    #[test]
    fn options_defaults() {
        let options = MqttStoreOptions::builder()
            .host("broker.local")
            .build()
            .unwrap();
        assert_eq!(options.port, 1883);
        assert_eq!(options.root_topic, DEFAULT_ROOT_TOPIC);
        assert_eq!(options.user, None);
        assert_eq!(options.write_timeout, Duration::from_secs(5));
    }

    #[test]
    fn document_assembles_leaves() {
        let shared = MqttShared::new();
        shared
            .leaves
            .insert("automaticMode".to_string(), Value::Bool(false));
        shared
            .leaves
            .insert("countdownModel/secondsLeft".to_string(), Value::from(120));
        let status = shared.snapshot().unwrap();
        assert!(!status.automatic_mode);
        assert_eq!(status.seconds_left(), Some(120));
    }

    #[tokio::test]
    async fn echo_resolves_matching_write_only() {
        let shared = MqttShared::new();
        let mut echo = shared.expect_echo("manualShade", b"20");

        shared.apply_leaf("manualShade", b"45").await;
        assert!(echo.try_recv().is_err());
        assert_eq!(
            shared.leaves.get("manualShade").map(|v| v.value().clone()),
            Some(Value::from(45))
        );

        shared.apply_leaf("manualShade", b"20").await;
        assert!(echo.await.is_ok());
        assert!(shared.pending.is_empty());
    }

    #[tokio::test]
    async fn lost_connection_fails_pending_writes() {
        let shared = MqttShared::new();
        shared.connected.store(true, Ordering::SeqCst);
        let echo = shared.expect_echo("countdownModel/secondsLeft", b"");

        shared.connection_lost();
        assert!(echo.await.is_err());
        assert!(!shared.connected.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn resync_drops_leaves_deleted_while_offline() {
        let shared = MqttShared::new();
        let mut subscription = shared.subscribers.add(None).await;
        shared.apply_leaf("automaticMode", b"false").await;
        shared.apply_leaf("countdownModel/secondsLeft", b"300").await;
        shared.mark_synced(0).await;
        let status = subscription.next().await.unwrap().unwrap();
        assert_eq!(status.seconds_left(), Some(300));

        // New session: the broker only replays what is still retained.
        let generation = shared.begin_resync().await;
        assert_eq!(generation, 1);
        assert!(!*shared.synced_watch.borrow());
        shared.apply_leaf("automaticMode", b"false").await;
        shared.mark_synced(0).await;
        let quiet = tokio::time::timeout(Duration::from_millis(50), subscription.next()).await;
        assert!(quiet.is_err());

        shared.mark_synced(generation).await;
        let status = subscription.next().await.unwrap().unwrap();
        assert!(!status.automatic_mode);
        assert_eq!(status.seconds_left(), None);
    }

    #[tokio::test]
    async fn writes_fail_fast_without_broker() {
        let options = MqttStoreOptions::builder()
            .host("127.0.0.1")
            .port(1u16)
            .build()
            .unwrap();
        let store = MqttStatusStore::connect(options).await.unwrap();
        assert!(!store.is_connected());

        for _ in 0..20 {
            let result = tokio::time::timeout(
                Duration::from_secs(1),
                store.write(StatusPath::ManualShade, Value::from(20)),
            )
            .await
            .expect("write must not block while disconnected");
            assert!(matches!(
                result,
                Err(StatusStoreError::Write {
                    path: StatusPath::ManualShade,
                    ..
                })
            ));
        }

        let result = store.delete(StatusPath::CountdownModel).await;
        assert!(matches!(result, Err(StatusStoreError::Write { .. })));
        assert!(store.disconnect().await.is_ok());
    }
}
