//! Outbound fan-out and inbound polling across every link a node has.

use crate::{error::TransportError, message::Message};

/// Inbound messages taken from one link per poll, so a chatty link cannot
/// starve the control loop.
pub const MAX_INBOUND_PER_LINK: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkScope {
    /// Serial console or the node's own access point.
    Local,
    /// Broker, radio mesh or uplink server.
    Remote,
}

pub trait Transport: Send {
    fn name(&self) -> &str;

    fn scope(&self) -> LinkScope {
        LinkScope::Remote
    }

    /// Best effort. Must return within a bounded time.
    fn send(&mut self, payload: &str) -> Result<(), TransportError>;

    fn try_receive(&mut self) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub link: String,
    pub payload: String,
}

#[derive(Default)]
pub struct Broadcaster {
    links: Vec<Box<dyn Transport>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, link: Box<dyn Transport>) {
        self.links.push(link);
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn link_names(&self) -> Vec<String> {
        self.links.iter().map(|link| link.name().to_string()).collect()
    }

    /// Sends to every link, or only local ones. A failing link never stops
    /// delivery to the rest; the failures are returned for logging.
    pub fn publish(
        &mut self,
        message: &Message,
        local_only: bool,
    ) -> Result<Vec<TransportError>, serde_json::Error> {
        let payload = message.to_json()?;
        Ok(self.publish_raw(&payload, local_only))
    }

    pub fn publish_raw(&mut self, payload: &str, local_only: bool) -> Vec<TransportError> {
        self.links
            .iter_mut()
            .filter(|link| !local_only || link.scope() == LinkScope::Local)
            .filter_map(|link| link.send(payload).err())
            .collect()
    }

    /// Drains pending messages, link by link, up to `max_per_link` each.
    pub fn poll(&mut self, max_per_link: usize) -> Vec<Inbound> {
        let mut inbound = Vec::new();
        for link in &mut self.links {
            for _ in 0..max_per_link {
                let Some(payload) = link.try_receive() else {
                    break;
                };
                inbound.push(Inbound {
                    link: link.name().to_string(),
                    payload,
                });
            }
        }
        inbound
    }
}
