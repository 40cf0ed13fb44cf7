use std::{
    collections::VecDeque,
    io::ErrorKind,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{mpsc, Mutex},
    time::MissedTickBehavior,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use homekeeper_common::{
    store::{NetworkField, NetworkSettings, STORE_SIZE},
    Broadcaster, Command, Engine, EngineAction, Inbound, MemoryStore, Message, NetworkConfig,
    NodeVariant, RuntimeConfig, MAX_INBOUND_PER_LINK,
};

use crate::{
    links::{MqttLink, StdioLink, UplinkLink, UplinkTarget, MAX_MESSAGE_BYTES},
    plant::SimulatedPlant,
};

const INBOX_DEPTH: usize = 64;

#[derive(Clone)]
struct AppState {
    engine: Arc<Mutex<Engine<MemoryStore>>>,
    inbox: mpsc::Sender<String>,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    nvram_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// On-disk form of the node's config store.
#[derive(Debug, Serialize, Deserialize)]
struct NvramImage {
    bytes: Vec<u8>,
}

/// Everything the control loop owns besides the engine.
struct NodeHost {
    links: Broadcaster,
    plant: SimulatedPlant,
    uplink: Option<UplinkTarget>,
    network: NetworkConfig,
}

pub async fn run() -> anyhow::Result<()> {
    // stdout is the serial console
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime, |key| std::env::var(key).ok());
    runtime.sanitize();

    let (backend, blank) = match store.load_nvram().await {
        Ok(Some(bytes)) => (MemoryStore::from_image(bytes, STORE_SIZE), false),
        Ok(None) => (MemoryStore::default(), true),
        Err(err) => {
            warn!("failed to load nvram image, starting blank: {err:#}");
            (MemoryStore::default(), true)
        }
    };
    let mut engine = Engine::for_variant(runtime.engine.clone(), &runtime.thresholds, backend);
    if blank {
        info!("formatting blank config store");
        if let Err(err) = engine.format_store() {
            warn!("config store format failed: {err:#}");
        }
    }

    let mut links = Broadcaster::new();
    links.add(Box::new(StdioLink::spawn()));
    links.add(Box::new(MqttLink::spawn(&runtime.network)));
    let uplink = if runtime.network.uplink_enabled {
        match uplink_addr(engine.network().ok().as_ref(), &runtime.network) {
            Some(addr) => {
                let (link, target) = UplinkLink::spawn(addr, &runtime.network);
                links.add(Box::new(link));
                Some(target)
            }
            None => {
                warn!("uplink enabled but no server address is configured");
                None
            }
        }
    } else {
        None
    };
    info!("links: {}", links.link_names().join(", "));

    let mut host = NodeHost {
        links,
        plant: SimulatedPlant::new(runtime.engine.variant, &runtime.plant),
        uplink,
        network: runtime.network.clone(),
    };

    let raw = raw_tick(&engine);
    let actions = engine.boot(raw);
    host.apply(&mut engine, actions);
    info!("{} node booted", engine.config().variant.as_str());
    if let Some(image) = take_dirty_image(&mut engine) {
        if let Err(err) = store.save_nvram(&image).await {
            warn!("failed to persist nvram image: {err:#}");
        }
    }

    let (inbox, inbox_rx) = mpsc::channel(INBOX_DEPTH);
    let app_state = AppState {
        engine: Arc::new(Mutex::new(engine)),
        inbox,
    };
    spawn_control_loop(
        app_state.clone(),
        host,
        inbox_rx,
        store,
        Duration::from_millis(runtime.engine.poll_interval_ms),
    );

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/message", post(handle_post_message))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], runtime.network.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn apply_env_overrides(runtime: &mut RuntimeConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(raw) = lookup("HOMEKEEPER_VARIANT") {
        match NodeVariant::parse(&raw) {
            Some(variant) => runtime.select_variant(variant),
            None => warn!("ignoring unknown HOMEKEEPER_VARIANT {raw:?}"),
        }
    }
    let network = &mut runtime.network;
    if let Some(host) = lookup("MQTT_HOST") {
        network.mqtt_host = host;
    }
    if let Some(port) = lookup("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
        network.mqtt_port = port;
    }
    if let Some(user) = lookup("MQTT_USER") {
        network.mqtt_user = user;
    }
    if let Some(pass) = lookup("MQTT_PASS") {
        network.mqtt_pass = pass;
    }
    if let Some(port) = lookup("HOMEKEEPER_HTTP_PORT").and_then(|value| value.parse::<u16>().ok()) {
        network.http_port = port;
    }
}

/// The stored server wins once both its address and port are set.
fn uplink_addr(stored: Option<&NetworkSettings>, network: &NetworkConfig) -> Option<SocketAddrV4> {
    if let Some(settings) = stored {
        if settings.server_ip != [0; 4] && settings.server_port != 0 {
            return Some(SocketAddrV4::new(settings.server_ip.into(), settings.server_port));
        }
    }
    let ip = network.fallback_server.parse::<Ipv4Addr>().ok()?;
    (network.fallback_server_port != 0).then(|| SocketAddrV4::new(ip, network.fallback_server_port))
}

fn spawn_control_loop(
    app_state: AppState,
    mut host: NodeHost,
    mut inbox: mpsc::Receiver<String>,
    store: AppStore,
    poll_interval: Duration,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            host.plant.advance(monotonic_ms());

            let image = {
                let mut engine = app_state.engine.lock().await;
                let raw = raw_tick(&engine);
                let actions = engine.tick(raw, &mut host.plant);
                host.apply(&mut engine, actions);

                let mut inbound = host.links.poll(MAX_INBOUND_PER_LINK);
                for _ in 0..MAX_INBOUND_PER_LINK {
                    let Ok(payload) = inbox.try_recv() else {
                        break;
                    };
                    inbound.push(Inbound {
                        link: "http".to_string(),
                        payload,
                    });
                }
                for message in inbound {
                    host.handle_inbound(&mut engine, message);
                }
                take_dirty_image(&mut engine)
            };

            if let Some(image) = image {
                if let Err(err) = store.save_nvram(&image).await {
                    warn!("failed to persist nvram image: {err:#}");
                }
            }
        }
    });
}

impl NodeHost {
    fn handle_inbound(&mut self, engine: &mut Engine<MemoryStore>, message: Inbound) {
        match Command::parse(&message.payload) {
            Ok(Some(command)) => {
                let actions = engine.execute(command);
                self.apply(engine, actions);
            }
            Ok(None) => {}
            Err(err) => debug!("dropping {} message: {err}", message.link),
        }
    }

    /// Carries out engine actions in order. Actuator feedback can produce
    /// further actions; those run before anything queued after the drive.
    fn apply(&mut self, engine: &mut Engine<MemoryStore>, actions: Vec<EngineAction>) {
        let mut pending: VecDeque<EngineAction> = actions.into();
        while let Some(action) = pending.pop_front() {
            match action {
                EngineAction::Drive { node, on } => {
                    let before = self.plant.output(node);
                    let feedback = engine.drive(&mut self.plant, node, on);
                    if self.plant.output(node) != before {
                        let rule = engine.circuit_name(node).unwrap_or("manual");
                        info!("{node} ({rule}) switched {}", if on { "on" } else { "off" });
                    }
                    for follow_up in feedback.into_iter().rev() {
                        pending.push_front(follow_up);
                    }
                }
                EngineAction::Publish(message) => self.publish(&message, false),
                EngineAction::PublishLocal(message) => self.publish(&message, true),
                EngineAction::NetworkUpdated(field) => match field {
                    NetworkField::ServerIp(_) | NetworkField::ServerPort(_) => {
                        self.retarget_uplink(engine)
                    }
                    _ => info!("network credentials updated"),
                },
                EngineAction::StoreFailed(err) => warn!("config store access failed: {err:#}"),
            }
        }
    }

    fn publish(&mut self, message: &Message, local_only: bool) {
        match self.links.publish(message, local_only) {
            Ok(failures) => {
                for err in failures {
                    warn!("publish failed: {err:#}");
                }
            }
            Err(err) => warn!("message serialization failed: {err}"),
        }
    }

    fn retarget_uplink(&self, engine: &Engine<MemoryStore>) {
        let Some(uplink) = &self.uplink else {
            return;
        };
        match engine.network() {
            Ok(settings) => {
                if let Some(addr) = uplink_addr(Some(&settings), &self.network) {
                    info!("uplink server set to {addr}");
                    uplink.retarget(addr);
                }
            }
            Err(err) => warn!("failed to read uplink server from store: {err:#}"),
        }
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.engine.lock().await.status();
    Json(status)
}

async fn handle_post_message(State(state): State<AppState>, body: String) -> impl IntoResponse {
    if body.len() > MAX_MESSAGE_BYTES {
        return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Message too large");
    }
    match state.inbox.try_send(body) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(mpsc::error::TrySendError::Full(_)) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Inbound queue is full")
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Control loop is not running")
        }
    }
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("HOMEKEEPER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            nvram_path: Arc::new(data_dir.join("nvram.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
                .with_context(|| format!("invalid {}", self.runtime_path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// `None` when the node has never been formatted.
    async fn load_nvram(&self) -> anyhow::Result<Option<Vec<u8>>> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.nvram_path.as_ref()).await {
            Ok(raw) => {
                let image = serde_json::from_slice::<NvramImage>(&raw)
                    .with_context(|| format!("invalid {}", self.nvram_path.display()))?;
                Ok(Some(image.bytes))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_nvram(&self, bytes: &[u8]) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.nvram_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec(&NvramImage {
            bytes: bytes.to_vec(),
        })?;
        tokio::fs::write(&path, payload)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

fn take_dirty_image(engine: &mut Engine<MemoryStore>) -> Option<Vec<u8>> {
    engine
        .store_mut()
        .backend_mut()
        .take_dirty()
        .then(|| engine.store().backend().image().to_vec())
}

/// The free-running tick counter the engine's clock extends.
fn raw_tick(engine: &Engine<MemoryStore>) -> u64 {
    monotonic_ms() % engine.config().tick_modulus_ms
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

pub(crate) fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
