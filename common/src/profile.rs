use crate::{
    config::Thresholds,
    registry::NodeSpec,
    sensors::{SensorKind, DEFAULT_NOISE_THRESHOLD},
    types::{node, sensor, NodeId, NodeVariant, SensorId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportEntry {
    Sensor(SensorId),
    Node(NodeId),
    Threshold(SensorId),
}

/// Fixed tables describing one node variant.
#[derive(Debug, Clone)]
pub struct NodeProfile {
    pub variant: NodeVariant,
    pub nodes: Vec<NodeSpec>,
    pub sensors: Vec<(SensorId, SensorKind)>,
    /// Store slot order for calibration factors and bus addresses.
    pub calibrated: &'static [SensorId],
    /// Store slot order for thresholds.
    pub thresholds: &'static [SensorId],
    pub threshold_defaults: Vec<(SensorId, i16)>,
    pub report_order: Vec<ReportEntry>,
}

const CENTRAL_CALIBRATED: &[SensorId] = &[
    sensor::SUPPLY,
    sensor::REVERSE,
    sensor::TANK,
    sensor::BOILER,
    sensor::MIX,
    sensor::STANDBY_HEATER,
    sensor::SOLAR_PRIMARY,
    sensor::SOLAR_SECONDARY,
];
const CENTRAL_THRESHOLDS: &[SensorId] = &[sensor::TH_ROOM_STANDBY, sensor::TH_ROOM_PRIMARY];
const VENTILATION_CALIBRATED: &[SensorId] = &[
    sensor::TEMP_IN,
    sensor::TEMP_OUT,
    sensor::AC_VOLTAGE,
    sensor::AC_CURRENT,
];
const HEATER_RESET_CALIBRATED: &[SensorId] = &[sensor::HEATER_ROOM_TEMP, sensor::HEATER_CURRENT];
const BOILER_CALIBRATED: &[SensorId] = &[sensor::TANK, sensor::BOILER];

fn specs(ids: &[NodeId]) -> Vec<NodeSpec> {
    ids.iter()
        .enumerate()
        .map(|(bit, id)| NodeSpec {
            id: *id,
            bit: bit as u8,
        })
        .collect()
}

impl NodeProfile {
    pub fn for_variant(variant: NodeVariant, thresholds: &Thresholds) -> Self {
        match variant {
            NodeVariant::CentralUnit => Self::central_unit(thresholds),
            NodeVariant::Ventilation => Self::ventilation(),
            NodeVariant::HeaterReset => Self::heater_reset(),
            NodeVariant::Boiler => Self::boiler(),
        }
    }

    fn central_unit(thresholds: &Thresholds) -> Self {
        use ReportEntry::{Node, Sensor, Threshold};

        let nodes = specs(&[
            node::SUPPLY,
            node::HEATING,
            node::FLOOR,
            node::HOTWATER,
            node::CIRCULATION,
            node::STANDBY_HEATER,
            node::SOLAR_PRIMARY,
            node::SOLAR_SECONDARY,
            node::HEATING_VALVE,
        ]);
        let mut sensors: Vec<(SensorId, SensorKind)> = CENTRAL_CALIBRATED
            .iter()
            .map(|id| (*id, SensorKind::Direct))
            .collect();
        sensors.push((sensor::BOILER_POWER, SensorKind::Binary));
        sensors.push((sensor::ROOM_TEMP, SensorKind::Remote));
        sensors.push((sensor::ROOM_HUMIDITY, SensorKind::Remote));

        let report_order = vec![
            Sensor(sensor::SUPPLY),
            Sensor(sensor::REVERSE),
            Sensor(sensor::TANK),
            Sensor(sensor::MIX),
            Sensor(sensor::STANDBY_HEATER),
            Sensor(sensor::BOILER),
            Sensor(sensor::ROOM_TEMP),
            Sensor(sensor::ROOM_HUMIDITY),
            Sensor(sensor::BOILER_POWER),
            Sensor(sensor::SOLAR_PRIMARY),
            Sensor(sensor::SOLAR_SECONDARY),
            Node(node::SUPPLY),
            Node(node::HEATING),
            Threshold(sensor::TH_ROOM_PRIMARY),
            Node(node::FLOOR),
            Node(node::HOTWATER),
            Node(node::CIRCULATION),
            Node(node::STANDBY_HEATER),
            Threshold(sensor::TH_ROOM_STANDBY),
            Node(node::SOLAR_PRIMARY),
            Node(node::SOLAR_SECONDARY),
            Node(node::HEATING_VALVE),
        ];

        Self {
            variant: NodeVariant::CentralUnit,
            nodes,
            sensors,
            calibrated: CENTRAL_CALIBRATED,
            thresholds: CENTRAL_THRESHOLDS,
            threshold_defaults: vec![
                (sensor::TH_ROOM_STANDBY, thresholds.central.room_standby_default),
                (sensor::TH_ROOM_PRIMARY, thresholds.central.room_primary_default),
            ],
            report_order,
        }
    }

    fn ventilation() -> Self {
        let ids = [node::VENTILATION, node::PV_SWITCH];
        let mut sensors: Vec<(SensorId, SensorKind)> = [
            sensor::TEMP_IN,
            sensor::HUMIDITY_IN,
            sensor::TEMP_OUT,
            sensor::HUMIDITY_OUT,
            sensor::AC_VOLTAGE,
            sensor::AC_CURRENT,
            sensor::AC_POWER,
            sensor::AC_ENERGY,
        ]
        .into_iter()
        .map(|id| (id, SensorKind::Direct))
        .collect();
        sensors.push((sensor::WATER_PUMP_POWER, SensorKind::Binary));

        Self::flat(NodeVariant::Ventilation, &ids, sensors, VENTILATION_CALIBRATED)
    }

    fn heater_reset() -> Self {
        let sensors = [
            sensor::HEATER_ROOM_TEMP,
            sensor::HEATER_ROOM_HUMIDITY,
            sensor::HEATER_CURRENT,
        ]
        .into_iter()
        .map(|id| (id, SensorKind::Direct))
        .collect();

        Self::flat(
            NodeVariant::HeaterReset,
            &[node::HEATER_RESET],
            sensors,
            HEATER_RESET_CALIBRATED,
        )
    }

    fn boiler() -> Self {
        let filtered = SensorKind::Filtered {
            noise_threshold: DEFAULT_NOISE_THRESHOLD,
        };
        Self::flat(
            NodeVariant::Boiler,
            &[node::HOTWATER, node::BOILER],
            vec![(sensor::TANK, filtered), (sensor::BOILER, filtered)],
            BOILER_CALIBRATED,
        )
    }

    // Sensors first, then nodes, no thresholds.
    fn flat(
        variant: NodeVariant,
        ids: &[NodeId],
        sensors: Vec<(SensorId, SensorKind)>,
        calibrated: &'static [SensorId],
    ) -> Self {
        let report_order = sensors
            .iter()
            .map(|(id, _)| ReportEntry::Sensor(*id))
            .chain(ids.iter().map(|id| ReportEntry::Node(*id)))
            .collect();
        Self {
            variant,
            nodes: specs(ids),
            sensors,
            calibrated,
            thresholds: &[],
            threshold_defaults: Vec::new(),
            report_order,
        }
    }
}
