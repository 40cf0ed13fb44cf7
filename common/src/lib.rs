pub mod circuits;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod link;
pub mod message;
pub mod ports;
pub mod profile;
pub mod registry;
pub mod sensors;
pub mod store;
pub mod topics;
pub mod transport;
pub mod types;

pub use clock::Clock;
pub use config::{EngineConfig, NetworkConfig, PlantConfig, RuntimeConfig, Thresholds};
pub use engine::{Engine, EngineAction};
pub use error::{ActuatorFault, MessageError, StoreError, TransportError};
pub use link::{LinkRecovery, RecoveryPolicy, RecoveryStep};
pub use message::{Command, Message};
pub use ports::{Actuator, SensorSource};
pub use profile::NodeProfile;
pub use store::{ConfigStore, MemoryStore, NodeStore};
pub use topics::*;
pub use transport::{Broadcaster, Inbound, LinkScope, Transport, MAX_INBOUND_PER_LINK};
pub use types::{EngineStatus, NodeId, NodeVariant, ReportMode, SensorId, Timestamp};
