use crate::{
    error::ActuatorFault,
    types::{NodeId, SensorId},
};

/// Hardware or simulated sensor bus. `None` when the device did not answer.
pub trait SensorSource {
    fn sample(&mut self, id: SensorId) -> Option<f64>;
}

impl<F> SensorSource for F
where
    F: FnMut(SensorId) -> Option<f64>,
{
    fn sample(&mut self, id: SensorId) -> Option<f64> {
        self(id)
    }
}

/// Relay or valve output. Fails when the feedback line disagrees.
pub trait Actuator {
    fn drive(&mut self, node: NodeId, on: bool) -> Result<(), ActuatorFault>;
}
