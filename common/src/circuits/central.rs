use crate::{
    circuits::{Circuit, CircuitContext},
    config::{CentralThresholds, HotwaterThresholds},
    types::{node, sensor, NodeId, SensorId},
};

const SUPPLY_SENSORS: &[SensorId] = &[sensor::SUPPLY, sensor::REVERSE];
const HEATING_SENSORS: &[SensorId] = &[sensor::TANK, sensor::MIX, sensor::STANDBY_HEATER];
const VALVE_SENSORS: &[SensorId] = &[sensor::TANK];
const HOTWATER_SENSORS: &[SensorId] = &[sensor::TANK, sensor::BOILER];
const CIRCULATION_SENSORS: &[SensorId] = &[sensor::BOILER, sensor::TANK];
const SOLAR_PRIMARY_SENSORS: &[SensorId] = &[sensor::SOLAR_PRIMARY, sensor::BOILER];
const SOLAR_SECONDARY_SENSORS: &[SensorId] = &[sensor::SOLAR_SECONDARY, sensor::BOILER];
const STANDBY_SENSORS: &[SensorId] = &[sensor::TANK, sensor::ROOM_TEMP];

pub fn circuits(t: &CentralThresholds) -> Vec<Box<dyn Circuit>> {
    vec![
        Box::new(Supply { t: t.clone() }),
        Box::new(HeatingLoop::heating(t)),
        Box::new(HeatingLoop::floor(t)),
        Box::new(HeatingValve { t: t.clone() }),
        Box::new(Hotwater::new(node::HOTWATER, t.hotwater)),
        Box::new(Circulation { t: t.clone() }),
        Box::new(SolarPrimary { t: t.clone() }),
        Box::new(SolarSecondary { t: t.clone() }),
        Box::new(StandbyHeater { t: t.clone() }),
    ]
}

fn room_standby_threshold(ctx: &CircuitContext<'_>, t: &CentralThresholds) -> i16 {
    ctx.threshold(sensor::TH_ROOM_STANDBY, t.room_standby_default)
}

/// Warm enough for the standby heater to rest. A stale room reading counts
/// as warm so a silent room sensor cannot keep the heater running.
fn room_reached_min(ctx: &CircuitContext<'_>, t: &CentralThresholds) -> bool {
    ctx.fresh(sensor::ROOM_TEMP)
        .map_or(true, |room| room > room_standby_threshold(ctx, t))
}

fn room_failed_min(ctx: &CircuitContext<'_>, t: &CentralThresholds) -> bool {
    ctx.fresh(sensor::ROOM_TEMP)
        .is_some_and(|room| room < room_standby_threshold(ctx, t))
}

fn room_satisfied(ctx: &CircuitContext<'_>, t: &CentralThresholds) -> bool {
    let threshold = ctx.threshold(sensor::TH_ROOM_PRIMARY, t.room_primary_default);
    ctx.fresh(sensor::ROOM_TEMP)
        .is_some_and(|room| room >= threshold)
}

/// Primary heat source pump.
#[derive(Debug)]
pub struct Supply {
    t: CentralThresholds,
}

impl Circuit for Supply {
    fn node(&self) -> NodeId {
        node::SUPPLY
    }

    fn name(&self) -> &'static str {
        "supply"
    }

    fn required_sensors(&self, _on: bool) -> &[SensorId] {
        SUPPLY_SENSORS
    }

    fn should_turn_on(&self, ctx: &CircuitContext<'_>) -> bool {
        ctx.temp(sensor::SUPPLY) >= ctx.temp(sensor::REVERSE) + self.t.supply_on_delta
    }

    fn should_turn_off(&self, ctx: &CircuitContext<'_>) -> bool {
        let supply = ctx.temp(sensor::SUPPLY);
        if supply > ctx.temp(sensor::REVERSE) {
            return false;
        }
        // a cold start needs time before the delta settles
        supply > self.t.supply_low_temp || ctx.held_for(self.t.supply_low_min_on_ms)
    }
}

/// Radiator and floor loops share one rule with different setpoints.
#[derive(Debug)]
pub struct HeatingLoop {
    node: NodeId,
    name: &'static str,
    on_temp: i16,
    off_temp: i16,
    hold_while_supply: bool,
    t: CentralThresholds,
}

impl HeatingLoop {
    pub fn heating(t: &CentralThresholds) -> Self {
        Self {
            node: node::HEATING,
            name: "heating",
            on_temp: t.heating_on,
            off_temp: t.heating_off,
            hold_while_supply: true,
            t: t.clone(),
        }
    }

    pub fn floor(t: &CentralThresholds) -> Self {
        Self {
            node: node::FLOOR,
            name: "floor",
            on_temp: t.floor_on,
            off_temp: t.floor_off,
            hold_while_supply: false,
            t: t.clone(),
        }
    }

    fn source_temp(&self, ctx: &CircuitContext<'_>) -> i16 {
        let standby = ctx.temp(sensor::STANDBY_HEATER);
        if ctx.is_on(node::HEATING_VALVE) {
            standby
        } else {
            ctx.temp(sensor::TANK)
                .max(ctx.temp(sensor::MIX))
                .max(standby)
        }
    }
}

impl Circuit for HeatingLoop {
    fn node(&self) -> NodeId {
        self.node
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn required_sensors(&self, _on: bool) -> &[SensorId] {
        HEATING_SENSORS
    }

    fn should_turn_on(&self, ctx: &CircuitContext<'_>) -> bool {
        self.source_temp(ctx) >= self.on_temp
            && (!room_satisfied(ctx, &self.t) || ctx.is_on(node::STANDBY_HEATER))
    }

    fn should_turn_off(&self, ctx: &CircuitContext<'_>) -> bool {
        let standby_on = ctx.is_on(node::STANDBY_HEATER);
        if self.source_temp(ctx) < self.off_temp {
            if self.hold_while_supply && ctx.is_on(node::SUPPLY) {
                return false;
            }
            if !standby_on {
                return true;
            }
            let standby = ctx.temp(sensor::STANDBY_HEATER);
            standby <= ctx.temp(sensor::MIX) && standby <= ctx.temp(sensor::TANK)
        } else {
            room_satisfied(ctx, &self.t) && !standby_on
        }
    }
}

/// Routes the standby heater's output into the heating loops.
#[derive(Debug)]
pub struct HeatingValve {
    t: CentralThresholds,
}

impl Circuit for HeatingValve {
    fn node(&self) -> NodeId {
        node::HEATING_VALVE
    }

    fn name(&self) -> &'static str {
        "heating_valve"
    }

    fn required_sensors(&self, _on: bool) -> &[SensorId] {
        VALVE_SENSORS
    }

    fn should_turn_on(&self, ctx: &CircuitContext<'_>) -> bool {
        ctx.is_on(node::STANDBY_HEATER)
            && (ctx.is_on(node::HEATING) || ctx.is_on(node::FLOOR))
            && ctx.temp(sensor::TANK) >= self.t.valve_tank_min + self.t.valve_tank_hysteresis
    }

    fn should_turn_off(&self, ctx: &CircuitContext<'_>) -> bool {
        let tank = ctx.temp(sensor::TANK);
        if tank < self.t.valve_tank_min {
            return true;
        }
        if ctx.is_on(node::STANDBY_HEATER) {
            return false;
        }
        ctx.is_on(node::SUPPLY)
            || ((ctx.is_on(node::HEATING) || ctx.is_on(node::FLOOR))
                && tank > ctx.temp(sensor::STANDBY_HEATER))
    }
}

/// Tank to boiler transfer pump. While the solar loop feeds the boiler it
/// runs the other way and dumps surplus boiler heat into the tank.
#[derive(Debug)]
pub struct Hotwater {
    node: NodeId,
    t: HotwaterThresholds,
}

impl Hotwater {
    pub fn new(node: NodeId, t: HotwaterThresholds) -> Self {
        Self { node, t }
    }

    fn cooling(ctx: &CircuitContext<'_>) -> bool {
        ctx.is_on(node::SOLAR_SECONDARY)
    }
}

impl Circuit for Hotwater {
    fn node(&self) -> NodeId {
        self.node
    }

    fn name(&self) -> &'static str {
        "hotwater"
    }

    fn required_sensors(&self, _on: bool) -> &[SensorId] {
        HOTWATER_SENSORS
    }

    fn should_turn_on(&self, ctx: &CircuitContext<'_>) -> bool {
        let tank = ctx.temp(sensor::TANK);
        let boiler = ctx.temp(sensor::BOILER);
        if Self::cooling(ctx) {
            boiler >= self.t.cooling_min && tank < boiler
        } else {
            tank - boiler > self.t.on_delta
        }
    }

    fn should_turn_off(&self, ctx: &CircuitContext<'_>) -> bool {
        let tank = ctx.temp(sensor::TANK);
        let boiler = ctx.temp(sensor::BOILER);
        if Self::cooling(ctx) {
            boiler < self.t.cooling_min - self.t.cooling_hysteresis || tank >= boiler
        } else {
            tank - boiler <= self.t.off_delta
        }
    }
}

/// Hot water circulation through the house, run in short bursts.
#[derive(Debug)]
pub struct Circulation {
    t: CentralThresholds,
}

impl Circulation {
    fn boiler_power_on(ctx: &CircuitContext<'_>) -> bool {
        ctx.value(sensor::BOILER_POWER).is_some_and(|power| power > 0)
    }
}

impl Circuit for Circulation {
    fn node(&self) -> NodeId {
        node::CIRCULATION
    }

    fn name(&self) -> &'static str {
        "circulation"
    }

    fn required_sensors(&self, _on: bool) -> &[SensorId] {
        CIRCULATION_SENSORS
    }

    fn should_turn_on(&self, ctx: &CircuitContext<'_>) -> bool {
        let boiler = ctx.temp(sensor::BOILER);
        let solar = ctx.is_on(node::SOLAR_SECONDARY);
        let rested = ctx.held_for(self.t.circulation_passive_ms);

        if boiler >= self.t.circulation_cooling {
            if solar {
                ctx.temp(sensor::TANK) >= self.t.circulation_cooling || rested
            } else {
                Self::boiler_power_on(ctx) && rested
            }
        } else if boiler >= self.t.circulation_min {
            rested && (solar || Self::boiler_power_on(ctx))
        } else {
            false
        }
    }

    fn should_turn_off(&self, ctx: &CircuitContext<'_>) -> bool {
        if !ctx.held_for(self.t.circulation_active_ms) {
            return false;
        }
        // keep dumping solar surplus while both ends are hot
        let dumping = ctx.temp(sensor::BOILER) >= self.t.circulation_cooling
            && ctx.is_on(node::SOLAR_SECONDARY)
            && ctx.temp(sensor::TANK) >= self.t.circulation_cooling;
        !dumping
    }
}

/// Solar collector loop pump.
#[derive(Debug)]
pub struct SolarPrimary {
    t: CentralThresholds,
}

impl Circuit for SolarPrimary {
    fn node(&self) -> NodeId {
        node::SOLAR_PRIMARY
    }

    fn name(&self) -> &'static str {
        "solar_primary"
    }

    fn required_sensors(&self, _on: bool) -> &[SensorId] {
        SOLAR_PRIMARY_SENSORS
    }

    fn should_turn_on(&self, ctx: &CircuitContext<'_>) -> bool {
        let solar = ctx.temp(sensor::SOLAR_PRIMARY);
        solar < self.t.solar_critical - self.t.solar_critical_hysteresis
            && solar > ctx.temp(sensor::BOILER) + self.t.solar_primary_on_delta
    }

    fn should_turn_off(&self, ctx: &CircuitContext<'_>) -> bool {
        let solar = ctx.temp(sensor::SOLAR_PRIMARY);
        if solar >= self.t.solar_critical {
            return true;
        }
        ctx.held_for(self.t.solar_coldstart_ms)
            && solar <= ctx.temp(sensor::BOILER) + self.t.solar_primary_off_delta
            && !ctx.is_on(node::HOTWATER)
    }
}

/// Boiler coil pump fed by the solar loop.
#[derive(Debug)]
pub struct SolarSecondary {
    t: CentralThresholds,
}

impl Circuit for SolarSecondary {
    fn node(&self) -> NodeId {
        node::SOLAR_SECONDARY
    }

    fn name(&self) -> &'static str {
        "solar_secondary"
    }

    fn required_sensors(&self, _on: bool) -> &[SensorId] {
        SOLAR_SECONDARY_SENSORS
    }

    fn should_turn_on(&self, ctx: &CircuitContext<'_>) -> bool {
        ctx.is_on(node::SOLAR_PRIMARY)
            && ctx.temp(sensor::SOLAR_SECONDARY)
                > ctx.temp(sensor::BOILER) + self.t.solar_secondary_on_delta
    }

    fn should_turn_off(&self, ctx: &CircuitContext<'_>) -> bool {
        !ctx.is_on(node::SOLAR_PRIMARY)
    }
}

/// Electric heater that keeps the house above a minimum when the primary
/// source is idle.
#[derive(Debug)]
pub struct StandbyHeater {
    t: CentralThresholds,
}

impl Circuit for StandbyHeater {
    fn node(&self) -> NodeId {
        node::STANDBY_HEATER
    }

    fn name(&self) -> &'static str {
        "standby_heater"
    }

    fn required_sensors(&self, _on: bool) -> &[SensorId] {
        STANDBY_SENSORS
    }

    fn should_turn_on(&self, ctx: &CircuitContext<'_>) -> bool {
        !ctx.is_on(node::SUPPLY)
            && (ctx.temp(sensor::TANK) < self.t.standby_tank_min || room_failed_min(ctx, &self.t))
    }

    fn should_turn_off(&self, ctx: &CircuitContext<'_>) -> bool {
        ctx.is_on(node::SUPPLY)
            || (ctx.temp(sensor::TANK) > room_standby_threshold(ctx, &self.t)
                && room_reached_min(ctx, &self.t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuits::testing::Bench;

    const ALL: &[NodeId] = &[
        node::SUPPLY,
        node::HEATING,
        node::FLOOR,
        node::HOTWATER,
        node::CIRCULATION,
        node::STANDBY_HEATER,
        node::SOLAR_PRIMARY,
        node::SOLAR_SECONDARY,
        node::HEATING_VALVE,
    ];

    fn t() -> CentralThresholds {
        CentralThresholds::default()
    }

    #[test]
    fn supply_follows_the_reverse_delta() {
        let circuit = Supply { t: t() };
        let mut bench = Bench::new(ALL);
        bench.set(sensor::SUPPLY, 64).set(sensor::REVERSE, 60);
        assert!(!circuit.should_turn_on(&bench.ctx(node::SUPPLY)));
        bench.set(sensor::SUPPLY, 65);
        assert!(circuit.should_turn_on(&bench.ctx(node::SUPPLY)));
    }

    #[test]
    fn cold_supply_waits_before_turning_off() {
        let circuit = Supply { t: t() };
        let mut bench = Bench::new(ALL);
        bench.set(sensor::SUPPLY, 40).set(sensor::REVERSE, 40);
        bench.since_switch = Some(600_000);
        assert!(!circuit.should_turn_off(&bench.ctx(node::SUPPLY)));
        bench.since_switch = Some(1_200_000);
        assert!(circuit.should_turn_off(&bench.ctx(node::SUPPLY)));

        bench.set(sensor::SUPPLY, 55).set(sensor::REVERSE, 56);
        bench.since_switch = Some(1_000);
        assert!(circuit.should_turn_off(&bench.ctx(node::SUPPLY)));
    }

    #[test]
    fn heating_waits_for_a_cold_room() {
        let circuit = HeatingLoop::heating(&t());
        let mut bench = Bench::new(ALL);
        bench
            .set(sensor::TANK, 45)
            .set(sensor::MIX, 30)
            .set(sensor::STANDBY_HEATER, 20)
            .set(sensor::ROOM_TEMP, 22);
        assert!(!circuit.should_turn_on(&bench.ctx(node::HEATING)));

        bench.set(sensor::ROOM_TEMP, 19);
        assert!(circuit.should_turn_on(&bench.ctx(node::HEATING)));
    }

    #[test]
    fn heating_stays_on_while_supply_runs() {
        let circuit = HeatingLoop::heating(&t());
        let mut bench = Bench::new(ALL);
        bench
            .set(sensor::TANK, 30)
            .set(sensor::MIX, 30)
            .set(sensor::STANDBY_HEATER, 20);
        bench.on(node::HEATING).on(node::SUPPLY);
        assert!(!circuit.should_turn_off(&bench.ctx(node::HEATING)));

        let floor = HeatingLoop::floor(&t());
        bench.set(sensor::TANK, 20).set(sensor::MIX, 20);
        assert!(floor.should_turn_off(&bench.ctx(node::FLOOR)));
    }

    #[test]
    fn heating_uses_standby_temp_when_valve_open() {
        let circuit = HeatingLoop::heating(&t());
        let mut bench = Bench::new(ALL);
        bench
            .set(sensor::TANK, 60)
            .set(sensor::MIX, 50)
            .set(sensor::STANDBY_HEATER, 30);
        bench.on(node::HEATING_VALVE);
        assert!(!circuit.should_turn_on(&bench.ctx(node::HEATING)));
    }

    #[test]
    fn valve_closes_on_a_frozen_tank() {
        let circuit = HeatingValve { t: t() };
        let mut bench = Bench::new(ALL);
        bench.set(sensor::TANK, 2);
        bench.on(node::STANDBY_HEATER);
        assert!(circuit.should_turn_off(&bench.ctx(node::HEATING_VALVE)));

        bench.set(sensor::TANK, 5).on(node::FLOOR);
        assert!(circuit.should_turn_on(&bench.ctx(node::HEATING_VALVE)));
    }

    #[test]
    fn hotwater_switches_direction_in_cooling_mode() {
        let circuit = Hotwater::new(node::HOTWATER, t().hotwater);
        let mut bench = Bench::new(ALL);
        bench.set(sensor::TANK, 50).set(sensor::BOILER, 46);
        assert!(circuit.should_turn_on(&bench.ctx(node::HOTWATER)));

        bench.on(node::SOLAR_SECONDARY);
        assert!(!circuit.should_turn_on(&bench.ctx(node::HOTWATER)));
        bench.set(sensor::TANK, 40).set(sensor::BOILER, 48);
        assert!(circuit.should_turn_on(&bench.ctx(node::HOTWATER)));
        bench.set(sensor::BOILER, 43);
        assert!(circuit.should_turn_off(&bench.ctx(node::HOTWATER)));
    }

    #[test]
    fn hotwater_hysteresis_band() {
        let circuit = Hotwater::new(node::HOTWATER, t().hotwater);
        let mut bench = Bench::new(ALL);
        bench.set(sensor::TANK, 53).set(sensor::BOILER, 50);
        assert!(!circuit.should_turn_on(&bench.ctx(node::HOTWATER)));
        assert!(!circuit.should_turn_off(&bench.ctx(node::HOTWATER)));
        bench.set(sensor::TANK, 52);
        assert!(circuit.should_turn_off(&bench.ctx(node::HOTWATER)));
    }

    #[test]
    fn circulation_runs_in_bursts() {
        let circuit = Circulation { t: t() };
        let mut bench = Bench::new(ALL);
        bench
            .set(sensor::BOILER, 55)
            .set(sensor::TANK, 40)
            .set(sensor::BOILER_POWER, 1);

        bench.since_switch = Some(1_000_000);
        assert!(!circuit.should_turn_on(&bench.ctx(node::CIRCULATION)));
        bench.since_switch = Some(3_420_000);
        assert!(circuit.should_turn_on(&bench.ctx(node::CIRCULATION)));

        bench.on(node::CIRCULATION);
        bench.since_switch = Some(60_000);
        assert!(!circuit.should_turn_off(&bench.ctx(node::CIRCULATION)));
        bench.since_switch = Some(180_000);
        assert!(circuit.should_turn_off(&bench.ctx(node::CIRCULATION)));
    }

    #[test]
    fn circulation_dumps_solar_surplus() {
        let circuit = Circulation { t: t() };
        let mut bench = Bench::new(ALL);
        bench.set(sensor::BOILER, 70).set(sensor::TANK, 65);
        bench.on(node::SOLAR_SECONDARY);
        bench.since_switch = Some(10_000);
        assert!(circuit.should_turn_on(&bench.ctx(node::CIRCULATION)));

        bench.since_switch = Some(500_000);
        assert!(!circuit.should_turn_off(&bench.ctx(node::CIRCULATION)));
    }

    #[test]
    fn cold_boiler_never_circulates() {
        let circuit = Circulation { t: t() };
        let mut bench = Bench::new(ALL);
        bench
            .set(sensor::BOILER, 45)
            .set(sensor::TANK, 40)
            .set(sensor::BOILER_POWER, 1);
        assert!(!circuit.should_turn_on(&bench.ctx(node::CIRCULATION)));
    }

    #[test]
    fn solar_primary_protects_against_overheat() {
        let circuit = SolarPrimary { t: t() };
        let mut bench = Bench::new(ALL);
        bench.set(sensor::SOLAR_PRIMARY, 105).set(sensor::BOILER, 50);
        assert!(!circuit.should_turn_on(&bench.ctx(node::SOLAR_PRIMARY)));
        bench.set(sensor::SOLAR_PRIMARY, 95);
        assert!(circuit.should_turn_on(&bench.ctx(node::SOLAR_PRIMARY)));
        bench.set(sensor::SOLAR_PRIMARY, 110);
        assert!(circuit.should_turn_off(&bench.ctx(node::SOLAR_PRIMARY)));
    }

    #[test]
    fn solar_primary_cold_start_grace() {
        let circuit = SolarPrimary { t: t() };
        let mut bench = Bench::new(ALL);
        bench.set(sensor::SOLAR_PRIMARY, 40).set(sensor::BOILER, 50);
        bench.since_switch = Some(300_000);
        assert!(!circuit.should_turn_off(&bench.ctx(node::SOLAR_PRIMARY)));
        bench.since_switch = Some(600_000);
        assert!(circuit.should_turn_off(&bench.ctx(node::SOLAR_PRIMARY)));
        bench.on(node::HOTWATER);
        assert!(!circuit.should_turn_off(&bench.ctx(node::SOLAR_PRIMARY)));
    }

    #[test]
    fn solar_secondary_follows_primary() {
        let circuit = SolarSecondary { t: t() };
        let mut bench = Bench::new(ALL);
        bench.set(sensor::SOLAR_SECONDARY, 60).set(sensor::BOILER, 50);
        assert!(!circuit.should_turn_on(&bench.ctx(node::SOLAR_SECONDARY)));
        bench.on(node::SOLAR_PRIMARY);
        assert!(circuit.should_turn_on(&bench.ctx(node::SOLAR_SECONDARY)));
        assert!(!circuit.should_turn_off(&bench.ctx(node::SOLAR_SECONDARY)));
    }

    #[test]
    fn standby_heater_guards_room_minimum() {
        let circuit = StandbyHeater { t: t() };
        let mut bench = Bench::new(ALL);
        bench.thresholds.insert(sensor::TH_ROOM_STANDBY, 12);
        bench.set(sensor::TANK, 20).set(sensor::ROOM_TEMP, 11);
        assert!(circuit.should_turn_on(&bench.ctx(node::STANDBY_HEATER)));

        bench.on(node::SUPPLY);
        assert!(!circuit.should_turn_on(&bench.ctx(node::STANDBY_HEATER)));
        assert!(circuit.should_turn_off(&bench.ctx(node::STANDBY_HEATER)));
    }

    #[test]
    fn stale_room_reading_counts_as_warm() {
        let circuit = StandbyHeater { t: t() };
        let mut bench = Bench::new(ALL);
        bench.set(sensor::TANK, 20).set(sensor::ROOM_TEMP, 5);
        assert!(!circuit.should_turn_off(&bench.ctx(node::STANDBY_HEATER)));

        bench.now += 1_800_001;
        assert!(circuit.should_turn_off(&bench.ctx(node::STANDBY_HEATER)));
        assert!(!circuit.should_turn_on(&bench.ctx(node::STANDBY_HEATER)));
    }
}
