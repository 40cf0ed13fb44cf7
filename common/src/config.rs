use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    clock::DEFAULT_TICK_MODULUS_MS,
    types::{NodeVariant, ReportMode},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub variant: NodeVariant,
    pub tick_modulus_ms: u64,
    pub poll_interval_ms: u64,
    pub sensor_read_interval_ms: u64,
    pub control_interval_ms: u64,
    pub status_report_interval_ms: u64,
    pub report_mode: ReportMode,
    pub min_dwell_ms: u64,
    pub actuator_retry_ms: u64,
    /// Age after which a wired sensor no longer counts as evidence.
    pub sensor_validity_ms: u64,
    pub room_validity_ms: u64,
}

impl EngineConfig {
    pub fn for_variant(variant: NodeVariant) -> Self {
        let base = Self {
            variant,
            tick_modulus_ms: DEFAULT_TICK_MODULUS_MS,
            poll_interval_ms: 100,
            sensor_read_interval_ms: 5_000,
            control_interval_ms: 5_000,
            status_report_interval_ms: 5_000,
            report_mode: ReportMode::RoundRobin,
            min_dwell_ms: 60_000,
            actuator_retry_ms: 30_000,
            sensor_validity_ms: 30_000,
            room_validity_ms: 1_800_000,
        };
        match variant {
            NodeVariant::CentralUnit => base,
            NodeVariant::Ventilation => Self {
                sensor_read_interval_ms: 10_000,
                control_interval_ms: 10_000,
                status_report_interval_ms: 60_000,
                report_mode: ReportMode::Full,
                min_dwell_ms: 30_000,
                sensor_validity_ms: 60_000,
                ..base
            },
            NodeVariant::HeaterReset => Self {
                sensor_read_interval_ms: 10_000,
                control_interval_ms: 10_000,
                status_report_interval_ms: 10_000,
                report_mode: ReportMode::Full,
                min_dwell_ms: 300_000,
                sensor_validity_ms: 60_000,
                ..base
            },
            NodeVariant::Boiler => Self {
                sensor_read_interval_ms: 1_000,
                control_interval_ms: 10_000,
                status_report_interval_ms: 60_000,
                report_mode: ReportMode::Full,
                sensor_validity_ms: 10_000,
                ..base
            },
        }
    }

    /// Longest override the clock can represent without a second wrap.
    pub fn max_override_ms(&self) -> u64 {
        self.tick_modulus_ms
    }

    pub fn sanitize(&mut self) {
        self.tick_modulus_ms = self.tick_modulus_ms.max(60_000);
        self.poll_interval_ms = self.poll_interval_ms.clamp(10, 1_000);
        self.sensor_read_interval_ms = self.sensor_read_interval_ms.max(self.poll_interval_ms);
        self.control_interval_ms = self.control_interval_ms.max(self.poll_interval_ms);
        self.sensor_validity_ms = self.sensor_validity_ms.max(self.sensor_read_interval_ms);
        self.status_report_interval_ms = self.status_report_interval_ms.max(1_000);
        self.actuator_retry_ms = self.actuator_retry_ms.max(1_000);
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_variant(NodeVariant::CentralUnit)
    }
}

/// Hotwater transfer pump between the heat tank and the boiler.
/// Deltas are `tank - boiler`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HotwaterThresholds {
    pub on_delta: i16,
    pub off_delta: i16,
    pub cooling_min: i16,
    pub cooling_hysteresis: i16,
}

impl HotwaterThresholds {
    pub fn central() -> Self {
        Self {
            on_delta: 3,
            off_delta: 2,
            cooling_min: 46,
            cooling_hysteresis: 2,
        }
    }

    /// On at tank >= boiler, off below boiler - 3.
    pub fn boiler() -> Self {
        Self {
            on_delta: -1,
            off_delta: -4,
            cooling_min: 46,
            cooling_hysteresis: 2,
        }
    }
}

/// Partial `hotwater` object; missing fields keep the variant's constants.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HotwaterPatch {
    on_delta: Option<i16>,
    off_delta: Option<i16>,
    cooling_min: Option<i16>,
    cooling_hysteresis: Option<i16>,
}

impl HotwaterPatch {
    fn over(self, base: HotwaterThresholds) -> HotwaterThresholds {
        HotwaterThresholds {
            on_delta: self.on_delta.unwrap_or(base.on_delta),
            off_delta: self.off_delta.unwrap_or(base.off_delta),
            cooling_min: self.cooling_min.unwrap_or(base.cooling_min),
            cooling_hysteresis: self.cooling_hysteresis.unwrap_or(base.cooling_hysteresis),
        }
    }
}

fn central_hotwater<'de, D: Deserializer<'de>>(de: D) -> Result<HotwaterThresholds, D::Error> {
    HotwaterPatch::deserialize(de).map(|patch| patch.over(HotwaterThresholds::central()))
}

fn boiler_hotwater<'de, D: Deserializer<'de>>(de: D) -> Result<HotwaterThresholds, D::Error> {
    HotwaterPatch::deserialize(de).map(|patch| patch.over(HotwaterThresholds::boiler()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralThresholds {
    pub supply_on_delta: i16,
    pub supply_low_temp: i16,
    pub supply_low_min_on_ms: u64,
    pub heating_on: i16,
    pub heating_off: i16,
    pub floor_on: i16,
    pub floor_off: i16,
    pub valve_tank_min: i16,
    pub valve_tank_hysteresis: i16,
    #[serde(deserialize_with = "central_hotwater")]
    pub hotwater: HotwaterThresholds,
    pub circulation_min: i16,
    pub circulation_cooling: i16,
    pub circulation_active_ms: u64,
    pub circulation_passive_ms: u64,
    pub solar_critical: i16,
    pub solar_critical_hysteresis: i16,
    pub solar_primary_on_delta: i16,
    pub solar_primary_off_delta: i16,
    pub solar_coldstart_ms: u64,
    pub solar_secondary_on_delta: i16,
    pub standby_tank_min: i16,
    pub room_standby_default: i16,
    pub room_primary_default: i16,
}

impl Default for CentralThresholds {
    fn default() -> Self {
        Self {
            supply_on_delta: 5,
            supply_low_temp: 50,
            supply_low_min_on_ms: 1_200_000,
            heating_on: 40,
            heating_off: 36,
            floor_on: 35,
            floor_off: 26,
            valve_tank_min: 3,
            valve_tank_hysteresis: 2,
            hotwater: HotwaterThresholds::central(),
            circulation_min: 50,
            circulation_cooling: 61,
            circulation_active_ms: 180_000,
            circulation_passive_ms: 3_420_000,
            solar_critical: 110,
            solar_critical_hysteresis: 10,
            solar_primary_on_delta: 9,
            solar_primary_off_delta: 0,
            solar_coldstart_ms: 600_000,
            solar_secondary_on_delta: 0,
            standby_tank_min: 3,
            room_standby_default: 10,
            room_primary_default: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VentilationThresholds {
    pub on_delta: i16,
    pub off_delta: i16,
    pub pv_min_voltage: i16,
}

impl Default for VentilationThresholds {
    fn default() -> Self {
        Self {
            on_delta: 3,
            off_delta: 0,
            pv_min_voltage: 160,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaterResetThresholds {
    pub room_max: i16,
    pub active_current_ma: i16,
    pub idle_ms: u64,
    pub reset_ms: u64,
}

impl Default for HeaterResetThresholds {
    fn default() -> Self {
        Self {
            room_max: 18,
            active_current_ma: 100,
            idle_ms: 900_000,
            reset_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoilerThresholds {
    #[serde(deserialize_with = "boiler_hotwater")]
    pub hotwater: HotwaterThresholds,
    pub min_temp: i16,
    pub max_active_ms: u64,
    pub passive_ratio: u64,
}

impl Default for BoilerThresholds {
    fn default() -> Self {
        Self {
            hotwater: HotwaterThresholds::boiler(),
            min_temp: 0,
            max_active_ms: 900_000,
            passive_ratio: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub central: CentralThresholds,
    pub ventilation: VentilationThresholds,
    pub heater_reset: HeaterResetThresholds,
    pub boiler: BoilerThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub mqtt_client_id: String,
    pub http_port: u16,
    pub uplink_enabled: bool,
    /// Used until the store holds a server address.
    pub fallback_server: String,
    pub fallback_server_port: u16,
    pub uplink_grace_ms: u64,
    pub uplink_send_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            mqtt_client_id: "homekeeper-controller".to_string(),
            http_port: 8084,
            uplink_enabled: false,
            fallback_server: "127.0.0.1".to_string(),
            fallback_server_port: 80,
            uplink_grace_ms: 300_000,
            uplink_send_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlantConfig {
    /// Nodes whose simulated actuator never reaches the commanded state.
    pub stuck_nodes: Vec<u8>,
    pub ambient_temp: f64,
    pub mains_voltage: f64,
}

impl Default for PlantConfig {
    fn default() -> Self {
        Self {
            stuck_nodes: Vec::new(),
            ambient_temp: 18.0,
            mains_voltage: 228.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub engine: EngineConfig,
    pub thresholds: Thresholds,
    pub network: NetworkConfig,
    pub plant: PlantConfig,
}

impl RuntimeConfig {
    /// Switches variant and resets timing to that variant's defaults.
    pub fn select_variant(&mut self, variant: NodeVariant) {
        if self.engine.variant != variant {
            self.engine = EngineConfig::for_variant(variant);
            if variant == NodeVariant::Ventilation {
                self.network.uplink_grace_ms = 180_000;
            }
        }
    }

    pub fn sanitize(&mut self) {
        self.engine.sanitize();
        if self.network.mqtt_port == 0 {
            self.network.mqtt_port = 1883;
        }
        self.network.uplink_send_timeout_ms = self.network.uplink_send_timeout_ms.clamp(100, 10_000);
        self.thresholds.boiler.passive_ratio = self.thresholds.boiler.passive_ratio.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_defaults_differ_where_expected() {
        let central = EngineConfig::for_variant(NodeVariant::CentralUnit);
        let ventilation = EngineConfig::for_variant(NodeVariant::Ventilation);
        assert_eq!(central.min_dwell_ms, 60_000);
        assert_eq!(central.report_mode, ReportMode::RoundRobin);
        assert_eq!(ventilation.min_dwell_ms, 30_000);
        assert_eq!(ventilation.status_report_interval_ms, 60_000);
    }

    #[test]
    fn hotwater_constants_are_per_variant() {
        let thresholds = Thresholds::default();
        assert_eq!(thresholds.central.hotwater.on_delta, 3);
        assert_eq!(thresholds.boiler.hotwater.on_delta, -1);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let runtime: RuntimeConfig =
            serde_json::from_str(r#"{"engine":{"variant":"boiler"},"thresholds":{"boiler":{"min_temp":30}}}"#)
                .unwrap();
        assert_eq!(runtime.engine.variant, NodeVariant::Boiler);
        assert_eq!(runtime.thresholds.boiler.min_temp, 30);
        assert_eq!(runtime.thresholds.boiler.max_active_ms, 900_000);
        assert_eq!(runtime.network.mqtt_port, 1883);
    }

    #[test]
    fn partial_hotwater_keeps_variant_constants() {
        let runtime: RuntimeConfig = serde_json::from_str(
            r#"{"engine":{"variant":"boiler"},"thresholds":{"central":{"hotwater":{"on_delta":4}},"boiler":{"hotwater":{"cooling_min":50}}}}"#,
        )
        .unwrap();
        assert_eq!(runtime.engine.variant, NodeVariant::Boiler);

        let central = runtime.thresholds.central.hotwater;
        assert_eq!(central.on_delta, 4);
        assert_eq!(central.off_delta, 2);
        assert_eq!(central.cooling_min, 46);

        let boiler = runtime.thresholds.boiler.hotwater;
        assert_eq!(boiler.on_delta, -1);
        assert_eq!(boiler.off_delta, -4);
        assert_eq!(boiler.cooling_min, 50);
    }

    #[test]
    fn sensor_validity_never_undercuts_the_read_interval() {
        let mut engine = EngineConfig::for_variant(NodeVariant::Boiler);
        assert_eq!(engine.sensor_validity_ms, 10_000);
        engine.sensor_read_interval_ms = 20_000;
        engine.sensor_validity_ms = 0;
        engine.sanitize();
        assert_eq!(engine.sensor_validity_ms, 20_000);
    }

    #[test]
    fn sanitize_clamps_degenerate_values() {
        let mut runtime = RuntimeConfig::default();
        runtime.engine.tick_modulus_ms = 5;
        runtime.engine.poll_interval_ms = 0;
        runtime.thresholds.boiler.passive_ratio = 0;
        runtime.sanitize();
        assert_eq!(runtime.engine.tick_modulus_ms, 60_000);
        assert_eq!(runtime.engine.poll_interval_ms, 10);
        assert_eq!(runtime.thresholds.boiler.passive_ratio, 1);
    }

    #[test]
    fn select_variant_swaps_timing() {
        let mut runtime = RuntimeConfig::default();
        runtime.select_variant(NodeVariant::Ventilation);
        assert_eq!(runtime.engine.min_dwell_ms, 30_000);
        assert_eq!(runtime.network.uplink_grace_ms, 180_000);
    }
}
