/// Every outbound node message, in wire form.
pub const TOPIC_EVENTS: &str = "homekeeper/events";
/// Inbound messages for the controller: overrides, config, remote readings.
pub const TOPIC_COMMANDS: &str = "homekeeper/commands";

pub const TOPIC_CONTROLLER_STATUS: &str = "homekeeper/controller/status";
pub const TOPIC_SENSOR_STATUS: &str = "homekeeper/sensor/status";

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";
