//! The message bus: an order-preserving `type_id -> [PluginId]` dispatch
//! table and synchronous fan-out (§4.C).
//!
//! Plugin load order is observable: a plugin registered for a type earlier
//! sees a broadcast of that type before one registered later. `IndexMap`
//! gives that ordering for free on both the outer map and the inner lists
//! (insertion order, not sorted).

use std::collections::HashSet;

use dsme_core::{MessageTypeId, PluginId};
use indexmap::IndexMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("plugin {plugin} is already subscribed to message type {type_id:#010x}")]
    AlreadySubscribed { type_id: MessageTypeId, plugin: PluginId },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub dispatched: u64,
    pub unknown_type_warnings: u64,
}

/// Central registry and dispatcher. Owned by the main loop; plugins never
/// see it directly, they go through the host API surface in `crate::plugins`.
pub struct MessageBus {
    handlers: IndexMap<MessageTypeId, Vec<PluginId>>,
    warned_unknown: HashSet<MessageTypeId>,
    dispatched: u64,
}

impl MessageBus {
    pub fn new() -> Self {
        MessageBus { handlers: IndexMap::new(), warned_unknown: HashSet::new(), dispatched: 0 }
    }

    /// Registers `plugin` as a handler for `type_id`. Idempotent: a second
    /// subscription for the same `(type_id, plugin)` pair is a no-op
    /// rather than a duplicate dispatch.
    pub fn subscribe(&mut self, type_id: MessageTypeId, plugin: PluginId) -> Result<(), BusError> {
        let list = self.handlers.entry(type_id).or_default();
        if list.contains(&plugin) {
            return Err(BusError::AlreadySubscribed { type_id, plugin });
        }
        list.push(plugin);
        Ok(())
    }

    /// Removes every subscription held by `plugin`, called on unload.
    pub fn unsubscribe_all(&mut self, plugin: PluginId) {
        for list in self.handlers.values_mut() {
            list.retain(|&p| p != plugin);
        }
    }

    pub fn subscribers(&self, type_id: MessageTypeId) -> &[PluginId] {
        self.handlers.get(&type_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Synchronously calls `dispatch` once per subscriber, in registration
    /// order. If nobody is subscribed, logs (via the caller-supplied
    /// `on_unknown`) at most once per distinct unregistered `type_id`.
    pub fn broadcast(
        &mut self,
        type_id: MessageTypeId,
        mut dispatch: impl FnMut(PluginId),
        mut on_unknown: impl FnMut(MessageTypeId),
    ) {
        match self.handlers.get(&type_id) {
            Some(list) if !list.is_empty() => {
                for plugin in list.clone() {
                    dispatch(plugin);
                    self.dispatched += 1;
                }
            }
            _ => {
                if self.warned_unknown.insert(type_id) {
                    on_unknown(type_id);
                }
            }
        }
    }

    pub fn stats(&self) -> Stats {
        Stats { dispatched: self.dispatched, unknown_type_warnings: self.warned_unknown.len() as u64 }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsme_core::PluginId;

    #[test]
    fn dispatches_to_subscribers_in_registration_order() {
        let mut bus = MessageBus::new();
        let first = PluginId::from(0);
        let second = PluginId::from(1);
        bus.subscribe(0x0003_0001, first).unwrap();
        bus.subscribe(0x0003_0001, second).unwrap();

        let mut order = Vec::new();
        bus.broadcast(0x0003_0001, |p| order.push(p), |_| panic!("should have subscribers"));
        assert_eq!(order, vec![first, second]);
        assert_eq!(bus.stats().dispatched, 2);
    }

    #[test]
    fn duplicate_subscription_is_rejected() {
        let mut bus = MessageBus::new();
        let plugin = PluginId::from(0);
        bus.subscribe(0x0003_0001, plugin).unwrap();
        assert!(bus.subscribe(0x0003_0001, plugin).is_err());
    }

    #[test]
    fn unsubscribe_all_removes_from_every_type() {
        let mut bus = MessageBus::new();
        let plugin = PluginId::from(0);
        bus.subscribe(1, plugin).unwrap();
        bus.subscribe(2, plugin).unwrap();
        bus.unsubscribe_all(plugin);
        assert!(bus.subscribers(1).is_empty());
        assert!(bus.subscribers(2).is_empty());
    }

    #[test]
    fn unknown_type_warns_exactly_once() {
        let mut bus = MessageBus::new();
        let mut warnings = 0;
        bus.broadcast(42, |_| {}, |_| warnings += 1);
        bus.broadcast(42, |_| {}, |_| warnings += 1);
        assert_eq!(warnings, 1);
        assert_eq!(bus.stats().unknown_type_warnings, 1);
    }
}
