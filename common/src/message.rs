//! Wire messages exchanged with other nodes, the gateway and the phone app.
//!
//! Every object carries a short `m` tag. Timestamps travel in seconds while
//! the engine keeps milliseconds, so conversion happens only here.

use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};

use crate::{
    error::MessageError,
    sensors::UNKNOWN_SENSOR_VALUE,
    store::{NetworkField, CREDENTIAL_LEN, UID_LEN},
    types::{NodeId, SensorId, Timestamp},
};

pub const TAG_STATUS: &str = "csr";
pub const TAG_NODE_STATE: &str = "nsc";
pub const TAG_CLOCK: &str = "cls";
pub const TAG_CONFIG: &str = "cfg";

/// Bit set in `ns` while the actuator is in error.
pub const NODE_ERROR_BIT: u16 = 0x8000;

pub fn wire_secs(ms: Timestamp) -> u64 {
    ms / 1_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    pub id: NodeId,
    pub state: bool,
    pub error: bool,
    pub switched_at: Option<Timestamp>,
    pub forced: bool,
    pub force_until: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorStatus {
    pub id: SensorId,
    pub value: Option<i16>,
    pub ts: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSample {
    pub id: SensorId,
    pub value: i16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigEntry {
    Calibration { id: SensorId, factor: f64 },
    SensorUid { id: SensorId, uid: [u8; UID_LEN] },
    Threshold { id: SensorId, value: i16 },
    Network(NetworkField),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    NodeStatus(NodeStatus),
    SensorStatus(SensorStatus),
    NodeStateChanged {
        node: NodeStatus,
        sensors: Vec<SensorSample>,
    },
    ClockSync {
        now: Timestamp,
        epoch: u64,
    },
    Configuration(ConfigEntry),
}

impl Message {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::NodeStatus(_) | Self::SensorStatus(_) => TAG_STATUS,
            Self::NodeStateChanged { .. } => TAG_NODE_STATE,
            Self::ClockSync { .. } => TAG_CLOCK,
            Self::Configuration(_) => TAG_CONFIG,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Serialize)]
struct NodeWire {
    id: u8,
    ns: u16,
    ts: u64,
    ff: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    ft: Option<u64>,
}

impl From<&NodeStatus> for NodeWire {
    fn from(node: &NodeStatus) -> Self {
        let mut ns = u16::from(node.state);
        if node.error {
            ns |= NODE_ERROR_BIT;
        }
        Self {
            id: node.id.0,
            ns,
            ts: node.switched_at.map(wire_secs).unwrap_or(0),
            ff: u8::from(node.forced),
            ft: node.forced.then(|| wire_secs(node.force_until)),
        }
    }
}

#[derive(Serialize)]
struct SensorWire {
    id: u8,
    v: i16,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<u64>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum SensorConfigWire {
    Calibration { id: u8, cf: f64 },
    Uid { id: u8, uid: String },
    Threshold { id: u8, v: i16 },
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("m", self.tag())?;
        match self {
            Self::NodeStatus(node) => map.serialize_entry("n", &NodeWire::from(node))?,
            Self::SensorStatus(sensor) => map.serialize_entry(
                "s",
                &SensorWire {
                    id: sensor.id.0,
                    v: sensor.value.unwrap_or(UNKNOWN_SENSOR_VALUE),
                    ts: sensor.ts.map(wire_secs),
                },
            )?,
            Self::NodeStateChanged { node, sensors } => {
                let wire = NodeWire::from(node);
                map.serialize_entry("id", &wire.id)?;
                map.serialize_entry("ns", &wire.ns)?;
                map.serialize_entry("ts", &wire.ts)?;
                map.serialize_entry("ff", &wire.ff)?;
                if let Some(ft) = wire.ft {
                    map.serialize_entry("ft", &ft)?;
                }
                let samples: Vec<SensorWire> = sensors
                    .iter()
                    .map(|sample| SensorWire {
                        id: sample.id.0,
                        v: sample.value,
                        ts: None,
                    })
                    .collect();
                map.serialize_entry("s", &samples)?;
            }
            Self::ClockSync { now, epoch } => {
                map.serialize_entry("ts", &wire_secs(*now))?;
                map.serialize_entry("oc", epoch)?;
            }
            Self::Configuration(entry) => match entry {
                ConfigEntry::Calibration { id, factor } => map.serialize_entry(
                    "s",
                    &SensorConfigWire::Calibration {
                        id: id.0,
                        cf: *factor,
                    },
                )?,
                ConfigEntry::SensorUid { id, uid } => map.serialize_entry(
                    "s",
                    &SensorConfigWire::Uid {
                        id: id.0,
                        uid: format_uid(uid),
                    },
                )?,
                ConfigEntry::Threshold { id, value } => map.serialize_entry(
                    "s",
                    &SensorConfigWire::Threshold {
                        id: id.0,
                        v: *value,
                    },
                )?,
                ConfigEntry::Network(field) => match field {
                    NetworkField::RemoteAp(value) => map.serialize_entry("rap", value)?,
                    NetworkField::RemotePassword(value) => map.serialize_entry("rpw", value)?,
                    NetworkField::LocalAp(value) => map.serialize_entry("lap", value)?,
                    NetworkField::LocalPassword(value) => map.serialize_entry("lpw", value)?,
                    NetworkField::ServerIp(ip) => map.serialize_entry("sip", &format_ip(ip))?,
                    NetworkField::ServerPort(port) => map.serialize_entry("sp", port)?,
                },
            },
        }
        map.end()
    }
}

/// Decoded inbound request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ClockSync,
    ReportAll,
    SensorUpdate {
        id: SensorId,
        value: i16,
    },
    Force {
        id: NodeId,
        state: bool,
        duration_secs: Option<u64>,
    },
    Unforce {
        id: NodeId,
    },
    SetCalibration {
        id: SensorId,
        factor: f64,
    },
    SetSensorUid {
        id: SensorId,
        uid: [u8; UID_LEN],
    },
    SetThreshold {
        id: SensorId,
        value: i16,
    },
    SetNetwork(NetworkField),
    ReportConfiguration,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    m: String,
    id: Option<u8>,
    ns: Option<i64>,
    ft: Option<u64>,
    n: Option<serde_json::Value>,
    s: Option<SensorPayload>,
    rap: Option<String>,
    rpw: Option<String>,
    lap: Option<String>,
    lpw: Option<String>,
    sip: Option<String>,
    sp: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct SensorPayload {
    id: Option<u8>,
    v: Option<f64>,
    cf: Option<f64>,
    uid: Option<String>,
}

impl Command {
    /// `Ok(None)` means a well-formed message that asks for nothing, such as
    /// another node's status broadcast.
    pub fn parse(raw: &str) -> Result<Option<Self>, MessageError> {
        let envelope: Envelope = serde_json::from_str(raw.trim())?;
        match envelope.m.as_str() {
            TAG_CLOCK => Ok(Some(Self::ClockSync)),
            TAG_STATUS => parse_status(envelope),
            TAG_NODE_STATE => parse_node_state(envelope).map(Some),
            TAG_CONFIG => parse_config(envelope).map(Some),
            other => Err(MessageError::UnknownTag(other.to_string())),
        }
    }
}

fn parse_status(envelope: Envelope) -> Result<Option<Command>, MessageError> {
    if envelope.n.is_some() {
        return Ok(None);
    }
    let Some(sensor) = envelope.s else {
        return Ok(Some(Command::ReportAll));
    };
    let id = sensor.id.ok_or(MessageError::MissingField("s.id"))?;
    let value = sensor.v.ok_or(MessageError::MissingField("s.v"))?;
    Ok(Some(Command::SensorUpdate {
        id: SensorId(id),
        value: to_i16(value),
    }))
}

fn parse_node_state(envelope: Envelope) -> Result<Command, MessageError> {
    let id = NodeId(envelope.id.ok_or(MessageError::MissingField("id"))?);
    match envelope.ns {
        Some(0) | Some(1) => Ok(Command::Force {
            id,
            state: envelope.ns == Some(1),
            duration_secs: envelope.ft,
        }),
        Some(other) => Err(MessageError::InvalidState(other)),
        None => Ok(Command::Unforce { id }),
    }
}

fn parse_config(envelope: Envelope) -> Result<Command, MessageError> {
    if let Some(sensor) = envelope.s {
        let id = SensorId(sensor.id.ok_or(MessageError::MissingField("s.id"))?);
        if let Some(factor) = sensor.cf {
            return Ok(Command::SetCalibration { id, factor });
        }
        if let Some(uid) = sensor.uid {
            return Ok(Command::SetSensorUid {
                id,
                uid: parse_uid(&uid)?,
            });
        }
        if let Some(value) = sensor.v {
            return Ok(Command::SetThreshold {
                id,
                value: to_i16(value),
            });
        }
        return Err(MessageError::MissingField("s.cf"));
    }

    let field = if let Some(value) = envelope.rap {
        NetworkField::RemoteAp(credential(value)?)
    } else if let Some(value) = envelope.rpw {
        NetworkField::RemotePassword(credential(value)?)
    } else if let Some(value) = envelope.lap {
        NetworkField::LocalAp(credential(value)?)
    } else if let Some(value) = envelope.lpw {
        NetworkField::LocalPassword(credential(value)?)
    } else if let Some(value) = envelope.sip {
        NetworkField::ServerIp(parse_ip(&value)?)
    } else if let Some(port) = envelope.sp {
        NetworkField::ServerPort(port)
    } else {
        return Ok(Command::ReportConfiguration);
    };
    Ok(Command::SetNetwork(field))
}

fn to_i16(value: f64) -> i16 {
    value.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

fn credential(value: String) -> Result<String, MessageError> {
    if value.len() >= CREDENTIAL_LEN {
        return Err(MessageError::CredentialTooLong {
            max: CREDENTIAL_LEN - 1,
        });
    }
    Ok(value)
}

pub fn parse_uid(raw: &str) -> Result<[u8; UID_LEN], MessageError> {
    let invalid = || MessageError::InvalidUid(raw.to_string());
    if raw.len() != UID_LEN * 2 || !raw.is_ascii() {
        return Err(invalid());
    }
    let mut uid = [0u8; UID_LEN];
    for (index, byte) in uid.iter_mut().enumerate() {
        let pair = &raw[index * 2..index * 2 + 2];
        *byte = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
    }
    Ok(uid)
}

pub fn format_uid(uid: &[u8; UID_LEN]) -> String {
    uid.iter().map(|byte| format!("{byte:02X}")).collect()
}

pub fn parse_ip(raw: &str) -> Result<[u8; 4], MessageError> {
    let invalid = || MessageError::InvalidAddress(raw.to_string());
    let mut ip = [0u8; 4];
    let mut parts = raw.trim().split('.');
    for octet in &mut ip {
        *octet = parts
            .next()
            .and_then(|part| part.parse::<u8>().ok())
            .ok_or_else(invalid)?;
    }
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok(ip)
}

pub fn format_ip(ip: &[u8; 4]) -> String {
    format!("{}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3])
}
