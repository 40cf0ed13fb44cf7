use std::{net::SocketAddrV4, time::Duration};

use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::{mpsc, watch},
    time::timeout,
};
use tracing::{debug, info, warn};

use homekeeper_common::{
    LinkRecovery, LinkScope, NetworkConfig, RecoveryPolicy, RecoveryStep, Transport,
    TransportError, STATUS_OFFLINE, STATUS_ONLINE, TOPIC_COMMANDS, TOPIC_CONTROLLER_STATUS,
    TOPIC_EVENTS,
};

use crate::host::monotonic_ms;

/// Inbound messages above this size are dropped before parsing.
pub const MAX_MESSAGE_BYTES: usize = 512;

const LINK_QUEUE_DEPTH: usize = 64;

fn disconnected(link: &str) -> TransportError {
    TransportError::Disconnected(link.to_string())
}

fn queue_error(link: &str, err: mpsc::error::TrySendError<String>) -> TransportError {
    match err {
        mpsc::error::TrySendError::Full(_) => TransportError::Backlog(link.to_string()),
        mpsc::error::TrySendError::Closed(_) => disconnected(link),
    }
}

/// Broker link standing in for the radio bus.
pub struct MqttLink {
    client: AsyncClient,
    inbound: mpsc::Receiver<String>,
}

impl MqttLink {
    pub fn spawn(network: &NetworkConfig) -> Self {
        let mut options = MqttOptions::new(
            network.mqtt_client_id.clone(),
            network.mqtt_host.clone(),
            network.mqtt_port,
        );
        if !network.mqtt_user.is_empty() {
            options.set_credentials(network.mqtt_user.clone(), network.mqtt_pass.clone());
        }
        options.set_last_will(LastWill::new(
            TOPIC_CONTROLLER_STATUS,
            STATUS_OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));

        let (client, mut eventloop) = AsyncClient::new(options, LINK_QUEUE_DEPTH);
        let (tx, inbound) = mpsc::channel(LINK_QUEUE_DEPTH);
        let subscriber = client.clone();

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("mqtt connected");
                        if let Err(err) = subscriber.subscribe(TOPIC_COMMANDS, QoS::AtMostOnce).await {
                            warn!("mqtt subscribe failed: {err}");
                        }
                        if let Err(err) = subscriber
                            .publish(TOPIC_CONTROLLER_STATUS, QoS::AtLeastOnce, true, STATUS_ONLINE)
                            .await
                        {
                            warn!("mqtt status publish failed: {err}");
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(message))) => {
                        if message.payload.len() > MAX_MESSAGE_BYTES {
                            warn!(
                                "dropping oversized MQTT payload on topic {} ({} bytes)",
                                message.topic,
                                message.payload.len()
                            );
                            continue;
                        }
                        match String::from_utf8(message.payload.to_vec()) {
                            Ok(payload) => {
                                if tx.try_send(payload).is_err() {
                                    warn!("mqtt inbound queue full, dropping message");
                                }
                            }
                            Err(err) => debug!("non utf8 mqtt payload: {err}"),
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("mqtt poll error: {err}");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        Self { client, inbound }
    }
}

impl Transport for MqttLink {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn send(&mut self, payload: &str) -> Result<(), TransportError> {
        self.client
            .try_publish(TOPIC_EVENTS, QoS::AtMostOnce, false, payload.to_string())
            .map_err(|err| TransportError::Io {
                link: "mqtt".to_string(),
                reason: err.to_string(),
            })
    }

    fn try_receive(&mut self) -> Option<String> {
        self.inbound.try_recv().ok()
    }
}

/// Line-oriented console on stdin/stdout, the node's serial port.
pub struct StdioLink {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<String>,
}

impl StdioLink {
    pub fn spawn() -> Self {
        let (outbound, mut lines_out) = mpsc::channel::<String>(LINK_QUEUE_DEPTH);
        let (tx, inbound) = mpsc::channel(LINK_QUEUE_DEPTH);

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() || line.len() > MAX_MESSAGE_BYTES {
                            continue;
                        }
                        if tx.try_send(line.to_string()).is_err() {
                            warn!("console inbound queue full, dropping line");
                        }
                    }
                    Ok(None) => {
                        info!("console input closed");
                        break;
                    }
                    Err(err) => {
                        warn!("console read failed: {err}");
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(line) = lines_out.recv().await {
                let written = async {
                    stdout.write_all(line.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                    stdout.flush().await
                };
                if let Err(err) = written.await {
                    warn!("console write failed: {err}");
                    break;
                }
            }
        });

        Self { outbound, inbound }
    }
}

impl Transport for StdioLink {
    fn name(&self) -> &str {
        "console"
    }

    fn scope(&self) -> LinkScope {
        LinkScope::Local
    }

    fn send(&mut self, payload: &str) -> Result<(), TransportError> {
        self.outbound
            .try_send(payload.to_string())
            .map_err(|err| queue_error("console", err))
    }

    fn try_receive(&mut self) -> Option<String> {
        self.inbound.try_recv().ok()
    }
}

/// Outbound-only TCP link to the log server.
pub struct UplinkLink {
    outbound: mpsc::Sender<String>,
}

/// Points a running uplink at a new server.
#[derive(Clone)]
pub struct UplinkTarget(watch::Sender<SocketAddrV4>);

impl UplinkTarget {
    pub fn retarget(&self, addr: SocketAddrV4) {
        self.0.send_if_modified(|current| {
            let changed = *current != addr;
            *current = addr;
            changed
        });
    }
}

impl UplinkLink {
    pub fn spawn(addr: SocketAddrV4, network: &NetworkConfig) -> (Self, UplinkTarget) {
        let (outbound, lines) = mpsc::channel(LINK_QUEUE_DEPTH);
        let (target_tx, target) = watch::channel(addr);
        let policy = RecoveryPolicy::with_grace(network.uplink_grace_ms);
        let send_timeout = Duration::from_millis(network.uplink_send_timeout_ms);

        tokio::spawn(run_uplink(lines, target, policy, send_timeout));
        (Self { outbound }, UplinkTarget(target_tx))
    }
}

impl Transport for UplinkLink {
    fn name(&self) -> &str {
        "uplink"
    }

    fn send(&mut self, payload: &str) -> Result<(), TransportError> {
        self.outbound
            .try_send(payload.to_string())
            .map_err(|err| queue_error("uplink", err))
    }

    fn try_receive(&mut self) -> Option<String> {
        None
    }
}

async fn run_uplink(
    mut lines: mpsc::Receiver<String>,
    mut target: watch::Receiver<SocketAddrV4>,
    policy: RecoveryPolicy,
    send_timeout: Duration,
) {
    let mut recovery = LinkRecovery::new(policy, monotonic_ms());
    let mut stream: Option<TcpStream> = None;

    while let Some(line) = lines.recv().await {
        if target.has_changed().unwrap_or(false) {
            target.borrow_and_update();
            stream = None;
        }

        if stream.is_none() {
            let addr = *target.borrow();
            match timeout(send_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(connected)) => {
                    info!("uplink connected to {addr}");
                    recovery.on_connected(monotonic_ms());
                    stream = Some(connected);
                }
                Ok(Err(err)) => debug!("uplink connect to {addr} failed: {err}"),
                Err(_) => debug!("uplink connect to {addr} timed out"),
            }
        }

        let sent = match stream.as_mut() {
            Some(conn) => matches!(
                timeout(send_timeout, write_line(conn, &line)).await,
                Ok(Ok(()))
            ),
            None => false,
        };

        let now = monotonic_ms();
        if sent {
            recovery.on_success(now);
            continue;
        }

        match recovery.on_failure(now, stream.is_some()) {
            RecoveryStep::Retry => {}
            step @ RecoveryStep::Reconnect => {
                warn!("uplink silent, {} ({})", step.as_str(), recovery.reconnects());
                stream = None;
            }
            step @ RecoveryStep::Reinitialize => {
                warn!("uplink still failing, {}", step.as_str());
                stream = None;
                target.mark_changed();
            }
        }
    }
}

async fn write_line(stream: &mut TcpStream, line: &str) -> std::io::Result<()> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await
}
