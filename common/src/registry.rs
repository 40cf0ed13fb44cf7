use serde::Serialize;

use crate::types::{NodeId, Timestamp};

/// Static description of one actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSpec {
    pub id: NodeId,
    pub bit: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub bit: u8,
    pub state: bool,
    pub forced: bool,
    pub permanently_forced: bool,
    pub last_switch: Option<Timestamp>,
    /// Absolute expiry of a temporary override; 0 means permanent.
    pub force_until: Timestamp,
    pub overflow_continuation: bool,
    /// Set with the time of the failed drive while the actuator disagrees.
    pub error_since: Option<Timestamp>,
}

impl Node {
    fn new(spec: NodeSpec) -> Self {
        Self {
            id: spec.id,
            bit: spec.bit,
            state: false,
            forced: false,
            permanently_forced: false,
            last_switch: None,
            force_until: 0,
            overflow_continuation: false,
            error_since: None,
        }
    }

    fn mask(&self) -> u16 {
        1 << self.bit
    }
}

/// What a flip produced, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlipOutcome {
    pub id: NodeId,
    pub state: bool,
    pub switched_at: Timestamp,
    pub forced: bool,
    pub force_until: Timestamp,
}

#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
}

impl NodeRegistry {
    pub fn new(specs: &[NodeSpec]) -> Self {
        Self {
            nodes: specs.iter().copied().map(Node::new).collect(),
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| node.id == id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|node| node.id).collect()
    }

    pub fn state(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(|node| node.state)
    }

    pub fn forced(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(|node| node.forced)
    }

    pub fn permanently_forced(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(|node| node.permanently_forced)
    }

    pub fn state_register(&self) -> u16 {
        self.register(|node| node.state)
    }

    pub fn forced_register(&self) -> u16 {
        self.register(|node| node.forced)
    }

    pub fn permanent_register(&self) -> u16 {
        self.register(|node| node.permanently_forced)
    }

    /// Boot-time resync: only permanent overrides survive a reset, and only
    /// their commanded state is trusted.
    pub fn restore(&mut self, state_register: u16, forced_register: u16) {
        for node in &mut self.nodes {
            let mask = node.mask();
            let permanent = forced_register & mask != 0;
            node.forced = permanent;
            node.permanently_forced = permanent;
            node.force_until = 0;
            node.overflow_continuation = false;
            node.state = permanent && state_register & mask != 0;
        }
    }

    pub fn flip(&mut self, id: NodeId, now: Timestamp) -> Option<FlipOutcome> {
        let node = self.get_mut(id)?;
        node.state = !node.state;
        node.last_switch = Some(now);
        Some(FlipOutcome {
            id,
            state: node.state,
            switched_at: now,
            forced: node.forced,
            force_until: node.force_until,
        })
    }

    pub fn clear_overflow_continuation(&mut self) {
        for node in &mut self.nodes {
            node.overflow_continuation = false;
        }
    }

    fn register(&self, bit_of: impl Fn(&Node) -> bool) -> u16 {
        self.nodes
            .iter()
            .filter(|node| bit_of(node))
            .fold(0, |register, node| register | node.mask())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> NodeRegistry {
        NodeRegistry::new(&[
            NodeSpec {
                id: NodeId(22),
                bit: 0,
            },
            NodeSpec {
                id: NodeId(24),
                bit: 1,
            },
            NodeSpec {
                id: NodeId(40),
                bit: 8,
            },
        ])
    }

    #[test]
    fn flip_toggles_and_stamps() {
        let mut registry = registry();
        let outcome = registry.flip(NodeId(24), 5_000).unwrap();
        assert!(outcome.state);
        assert_eq!(registry.get(NodeId(24)).unwrap().last_switch, Some(5_000));
        assert_eq!(registry.state_register(), 0b10);

        registry.flip(NodeId(24), 9_000);
        assert!(!registry.state(NodeId(24)));
    }

    #[test]
    fn flip_of_unknown_node_is_ignored() {
        let mut registry = registry();
        assert_eq!(registry.flip(NodeId(99), 0), None);
        assert_eq!(registry.state_register(), 0);
    }

    #[test]
    fn restore_keeps_only_permanent_state() {
        let mut registry = registry();
        // 22 and 40 were on, only 40 was permanently forced
        registry.restore(0b1_0000_0001, 0b1_0000_0000);

        assert!(!registry.state(NodeId(22)));
        assert!(!registry.forced(NodeId(22)));
        assert!(registry.state(NodeId(40)));
        assert!(registry.forced(NodeId(40)));
        assert!(registry.permanently_forced(NodeId(40)));
        assert_eq!(registry.permanent_register(), 0x100);
    }

    #[test]
    fn restore_forced_off_node_stays_off() {
        let mut registry = registry();
        registry.restore(0, 0b10);
        assert!(registry.forced(NodeId(24)));
        assert!(!registry.state(NodeId(24)));
    }

    #[test]
    fn wrap_resync_clears_every_continuation() {
        let mut registry = registry();
        for id in registry.ids() {
            registry.get_mut(id).unwrap().overflow_continuation = true;
        }
        registry.clear_overflow_continuation();
        assert!(registry.iter().all(|node| !node.overflow_continuation));
    }
}
