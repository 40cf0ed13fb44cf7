use crate::{
    circuits::{central::Hotwater, Circuit, CircuitContext},
    config::BoilerThresholds,
    types::{node, sensor, NodeId, SensorId},
};

const BOILER_SENSORS: &[SensorId] = &[sensor::BOILER];

pub fn circuits(t: &BoilerThresholds) -> Vec<Box<dyn Circuit>> {
    vec![
        Box::new(Hotwater::new(node::HOTWATER, t.hotwater)),
        Box::new(BoilerHeater::new(t.clone())),
    ]
}

/// Electric boiler element with a power-save rest period that scales with
/// how long it just ran.
#[derive(Debug)]
pub struct BoilerHeater {
    t: BoilerThresholds,
    cooldown_ms: u64,
}

impl BoilerHeater {
    pub fn new(t: BoilerThresholds) -> Self {
        Self { t, cooldown_ms: 0 }
    }

    pub fn cooldown_ms(&self) -> u64 {
        self.cooldown_ms
    }
}

impl Circuit for BoilerHeater {
    fn node(&self) -> NodeId {
        node::BOILER
    }

    fn name(&self) -> &'static str {
        "boiler"
    }

    fn required_sensors(&self, _on: bool) -> &[SensorId] {
        BOILER_SENSORS
    }

    fn should_turn_on(&self, ctx: &CircuitContext<'_>) -> bool {
        if ctx.is_on(node::HOTWATER) {
            return false;
        }
        if ctx.is_forced(node::HOTWATER) {
            return true;
        }
        ctx.temp(sensor::BOILER) <= self.t.min_temp || ctx.held_for(self.cooldown_ms)
    }

    fn should_turn_off(&self, ctx: &CircuitContext<'_>) -> bool {
        if ctx.is_on(node::HOTWATER) {
            return true;
        }
        if ctx.is_forced(node::HOTWATER) {
            return false;
        }
        ctx.temp(sensor::BOILER) > self.t.min_temp && ctx.held_for(self.t.max_active_ms)
    }

    fn switched(&mut self, on: bool, held_ms: Option<u64>) {
        if !on {
            let active = held_ms.unwrap_or(0).min(self.t.max_active_ms);
            self.cooldown_ms = active * self.t.passive_ratio;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuits::testing::Bench;

    const NODES: &[NodeId] = &[node::HOTWATER, node::BOILER];

    #[test]
    fn legacy_hotwater_constants() {
        let circuit = Hotwater::new(node::HOTWATER, BoilerThresholds::default().hotwater);
        let mut bench = Bench::new(NODES);
        bench.set(sensor::TANK, 50).set(sensor::BOILER, 50);
        assert!(circuit.should_turn_on(&bench.ctx(node::HOTWATER)));
        assert!(!circuit.should_turn_off(&bench.ctx(node::HOTWATER)));
        bench.set(sensor::TANK, 47);
        assert!(!circuit.should_turn_off(&bench.ctx(node::HOTWATER)));
        bench.set(sensor::TANK, 46);
        assert!(circuit.should_turn_off(&bench.ctx(node::HOTWATER)));
    }

    #[test]
    fn cooldown_scales_with_run_time() {
        let mut circuit = BoilerHeater::new(BoilerThresholds::default());
        circuit.switched(false, Some(120_000));
        assert_eq!(circuit.cooldown_ms(), 360_000);

        circuit.switched(false, Some(5_000_000));
        assert_eq!(circuit.cooldown_ms(), 2_700_000);

        circuit.switched(true, Some(1));
        assert_eq!(circuit.cooldown_ms(), 2_700_000);
    }

    #[test]
    fn rests_for_the_cooldown() {
        let mut circuit = BoilerHeater::new(BoilerThresholds::default());
        circuit.switched(false, Some(900_000));
        let mut bench = Bench::new(NODES);
        bench.set(sensor::BOILER, 45);
        bench.since_switch = Some(2_000_000);
        assert!(!circuit.should_turn_on(&bench.ctx(node::BOILER)));
        bench.since_switch = Some(2_700_000);
        assert!(circuit.should_turn_on(&bench.ctx(node::BOILER)));
    }

    #[test]
    fn yields_to_hotwater_transfer() {
        let circuit = BoilerHeater::new(BoilerThresholds::default());
        let mut bench = Bench::new(NODES);
        bench.set(sensor::BOILER, 45);
        bench.on(node::HOTWATER);
        assert!(circuit.should_turn_off(&bench.ctx(node::BOILER)));
        assert!(!circuit.should_turn_on(&bench.ctx(node::BOILER)));
    }

    #[test]
    fn forced_hotwater_keeps_boiler_heating() {
        let circuit = BoilerHeater::new(BoilerThresholds::default());
        let mut bench = Bench::new(NODES);
        bench.set(sensor::BOILER, 45).forced(node::HOTWATER);
        bench.since_switch = Some(10_000_000);
        assert!(!circuit.should_turn_off(&bench.ctx(node::BOILER)));
        assert!(circuit.should_turn_on(&bench.ctx(node::BOILER)));
    }

    #[test]
    fn powersave_after_max_active() {
        let circuit = BoilerHeater::new(BoilerThresholds::default());
        let mut bench = Bench::new(NODES);
        bench.set(sensor::BOILER, 45);
        bench.since_switch = Some(899_999);
        assert!(!circuit.should_turn_off(&bench.ctx(node::BOILER)));
        bench.since_switch = Some(900_000);
        assert!(circuit.should_turn_off(&bench.ctx(node::BOILER)));
    }
}
