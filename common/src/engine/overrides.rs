use super::{Engine, EngineAction};
use crate::{
    store::ConfigStore,
    types::{NodeId, Timestamp},
};

impl<S: ConfigStore> Engine<S> {
    /// True while an override holds the node. An expired temporary override
    /// is released here, with one status report.
    pub fn is_in_forced_mode(&mut self, id: NodeId, actions: &mut Vec<EngineAction>) -> bool {
        let now = self.clock.now();
        let Some(node) = self.registry.get_mut(id) else {
            return false;
        };
        if !node.forced {
            return false;
        }
        if node.force_until == 0 || node.overflow_continuation || now < node.force_until {
            return true;
        }

        node.forced = false;
        node.permanently_forced = false;
        self.report_node(id, actions);
        false
    }

    /// Puts the node under manual control until `until`, or for good when
    /// `until` is 0. Windows longer than one counter period are shortened.
    pub fn force(&mut self, id: NodeId, state: bool, until: Timestamp) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        let now = self.clock.now();
        let until = self.clamp_override(until);
        let permanent = until == 0;

        let Some(node) = self.registry.get_mut(id) else {
            return actions;
        };
        let was_permanent = node.permanently_forced;
        node.forced = true;
        node.permanently_forced = permanent;
        node.force_until = until;
        if !permanent && now > until {
            node.overflow_continuation = true;
        }
        let needs_flip = node.state != state;

        let flipped = needs_flip && self.flip(id, Vec::new(), &mut actions);
        if permanent || was_permanent {
            self.persist_forced(&mut actions);
        }
        if !flipped {
            self.report_node(id, &mut actions);
        }
        actions
    }

    /// Returns the node to automatic control in whatever state it is in.
    pub fn unforce(&mut self, id: NodeId) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        let Some(node) = self.registry.get_mut(id) else {
            return actions;
        };
        let was_permanent = node.permanently_forced;
        node.forced = false;
        node.permanently_forced = false;
        node.overflow_continuation = false;

        if was_permanent {
            self.persist_forced(&mut actions);
        }
        self.report_node(id, &mut actions);
        actions
    }

    fn clamp_override(&self, until: Timestamp) -> Timestamp {
        if until == 0 {
            return 0;
        }
        let limit = self
            .clock
            .now()
            .saturating_add(self.config.max_override_ms());
        until.min(limit)
    }
}
