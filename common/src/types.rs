use std::fmt;

use serde::{Deserialize, Serialize};

/// Extended milliseconds since boot, corrected for counter wraparound.
pub type Timestamp = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(pub u8);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}", self.0)
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sensor {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeVariant {
    CentralUnit,
    Ventilation,
    HeaterReset,
    Boiler,
}

impl NodeVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CentralUnit => "central_unit",
            Self::Ventilation => "ventilation",
            Self::HeaterReset => "heater_reset",
            Self::Boiler => "boiler",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "central_unit" | "central" => Some(Self::CentralUnit),
            "ventilation" => Some(Self::Ventilation),
            "heater_reset" => Some(Self::HeaterReset),
            "boiler" => Some(Self::Boiler),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportMode {
    /// One entry of the report order per interval.
    RoundRobin,
    /// Every node and sensor each interval.
    Full,
}

/// Actuator identifiers. The number doubles as the output pin on the
/// controller boards, so it is stable across firmware revisions.
pub mod node {
    use super::NodeId;

    pub const SUPPLY: NodeId = NodeId(22);
    pub const HEATING: NodeId = NodeId(24);
    pub const FLOOR: NodeId = NodeId(26);
    pub const HOTWATER: NodeId = NodeId(28);
    pub const CIRCULATION: NodeId = NodeId(30);
    pub const BOILER: NodeId = NodeId(32);
    pub const STANDBY_HEATER: NodeId = NodeId(34);
    pub const SOLAR_PRIMARY: NodeId = NodeId(36);
    pub const SOLAR_SECONDARY: NodeId = NodeId(38);
    pub const HEATING_VALVE: NodeId = NodeId(40);

    pub const VENTILATION: NodeId = NodeId(44);
    pub const PV_SWITCH: NodeId = NodeId(46);

    pub const HEATER_RESET: NodeId = NodeId(6);
}

pub mod sensor {
    use super::SensorId;

    pub const SUPPLY: SensorId = SensorId(54);
    pub const REVERSE: SensorId = SensorId(55);
    pub const TANK: SensorId = SensorId(56);
    pub const BOILER: SensorId = SensorId(57);
    pub const MIX: SensorId = SensorId(58);
    pub const STANDBY_HEATER: SensorId = SensorId(59);
    pub const BOILER_POWER: SensorId = SensorId(60);
    pub const SOLAR_PRIMARY: SensorId = SensorId(61);
    pub const SOLAR_SECONDARY: SensorId = SensorId(62);
    pub const ROOM_TEMP: SensorId = SensorId(74);
    pub const ROOM_HUMIDITY: SensorId = SensorId(75);

    pub const TEMP_IN: SensorId = SensorId(78);
    pub const HUMIDITY_IN: SensorId = SensorId(79);
    pub const TEMP_OUT: SensorId = SensorId(80);
    pub const HUMIDITY_OUT: SensorId = SensorId(81);
    pub const AC_VOLTAGE: SensorId = SensorId(82);
    pub const AC_CURRENT: SensorId = SensorId(83);
    pub const AC_POWER: SensorId = SensorId(84);
    pub const AC_ENERGY: SensorId = SensorId(85);
    pub const WATER_PUMP_POWER: SensorId = SensorId(86);

    pub const HEATER_ROOM_TEMP: SensorId = SensorId(86);
    pub const HEATER_ROOM_HUMIDITY: SensorId = SensorId(87);
    pub const HEATER_CURRENT: SensorId = SensorId(88);

    /// Room temperature below which the standby heater engages.
    pub const TH_ROOM_STANDBY: SensorId = SensorId(201);
    /// Room temperature at which primary heating is satisfied.
    pub const TH_ROOM_PRIMARY: SensorId = SensorId(202);
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub id: NodeId,
    pub state: bool,
    pub forced: bool,
    #[serde(rename = "permanentlyForced")]
    pub permanently_forced: bool,
    #[serde(rename = "forceUntilMs")]
    pub force_until_ms: Option<Timestamp>,
    #[serde(rename = "lastSwitchMs")]
    pub last_switch_ms: Option<Timestamp>,
    pub error: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorView {
    pub id: SensorId,
    pub value: Option<i16>,
    #[serde(rename = "sampledAtMs")]
    pub sampled_at_ms: Option<Timestamp>,
    pub calibration: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdView {
    pub id: SensorId,
    pub value: i16,
}

/// Snapshot served by the local status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub variant: &'static str,
    #[serde(rename = "nowMs")]
    pub now_ms: Timestamp,
    pub epoch: u64,
    pub nodes: Vec<NodeView>,
    pub sensors: Vec<SensorView>,
    pub thresholds: Vec<ThresholdView>,
    #[serde(rename = "storeWrites")]
    pub store_writes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_parse_accepts_short_alias() {
        assert_eq!(NodeVariant::parse("Central"), Some(NodeVariant::CentralUnit));
        assert_eq!(NodeVariant::parse("boiler"), Some(NodeVariant::Boiler));
        assert_eq!(NodeVariant::parse("thermostat"), None);
    }

    #[test]
    fn variant_round_trips_through_serde() {
        let raw = serde_json::to_string(&NodeVariant::HeaterReset).unwrap();
        assert_eq!(raw, "\"heater_reset\"");
        assert_eq!(
            serde_json::from_str::<NodeVariant>(&raw).unwrap(),
            NodeVariant::HeaterReset
        );
    }
}
