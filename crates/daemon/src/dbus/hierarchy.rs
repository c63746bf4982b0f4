//! The `service_name -> object_path -> interface_name -> {method|signal}`
//! registration tree §4.G describes, plus the well-known-name request state
//! machine (`unrequested -> requested -> acquired | rejected`).
//!
//! Every binding — whether it came from a plugin through the ABI or from
//! the daemon's own fixed request/signal interfaces registered at startup —
//! lives in the same tree and is released the same way, which is what lets
//! §8's invariant hold uniformly: after a plugin unloads, a call into one of
//! its former bindings finds nothing here and the dispatcher replies
//! "unknown method" without ever touching the unloaded plugin.

use std::collections::HashMap;

use dsme_core::abi::{CDbusMethodCallback, CDbusSignalCallback};
use dsme_core::{DbusBindingId, PluginId};
use slab::Slab;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameState {
    Unrequested,
    Requested,
    Acquired,
    Rejected,
}

#[derive(Clone, Copy)]
pub struct MethodBinding {
    pub owner: PluginId,
    pub privileged: bool,
    pub callback: CDbusMethodCallback,
    pub user_data: usize,
}

#[derive(Clone)]
pub struct SignalBinding {
    pub owner: PluginId,
    pub interface: Option<String>,
    pub member: Option<String>,
    pub callback: CDbusSignalCallback,
    pub user_data: usize,
}

impl SignalBinding {
    /// `type='signal'[,interface='…'][,member='…']` (§4.G "Binding").
    pub fn match_rule(&self) -> String {
        let mut rule = String::from("type='signal'");
        if let Some(iface) = &self.interface {
            rule.push_str(&format!(",interface='{iface}'"));
        }
        if let Some(member) = &self.member {
            rule.push_str(&format!(",member='{member}'"));
        }
        rule
    }

    pub fn matches(&self, interface: &str, member: &str) -> bool {
        self.interface.as_deref().map(|i| i == interface).unwrap_or(true)
            && self.member.as_deref().map(|m| m == member).unwrap_or(true)
    }
}

struct MethodRecord {
    service: String,
    object: String,
    interface: String,
    member: String,
    binding: MethodBinding,
}

#[derive(Default)]
struct InterfaceNode {
    methods: Vec<DbusBindingId>,
}

#[derive(Default)]
struct ObjectNode {
    interfaces: HashMap<String, InterfaceNode>,
}

struct ServiceNode {
    state: NameState,
    objects: HashMap<String, ObjectNode>,
}

impl ServiceNode {
    fn is_empty(&self) -> bool {
        self.objects.values().all(|o| o.interfaces.is_empty())
    }
}

/// What the caller should do after a binding is removed: whether the
/// service node it lived under became empty and its well-known name
/// (if any was requested beyond the primary connection name) should be
/// released on the bus.
#[derive(Debug, Default)]
pub struct UnbindOutcome {
    pub service_now_empty: Option<String>,
}

#[derive(Default)]
pub struct Hierarchy {
    services: HashMap<String, ServiceNode>,
    methods: Slab<MethodRecord>,
    signals: Slab<SignalBinding>,
}

impl Hierarchy {
    pub fn new() -> Self {
        Hierarchy { services: HashMap::new(), methods: Slab::new(), signals: Slab::new() }
    }

    /// Marks `service` as wanted on the bus if it isn't already tracked,
    /// returning its current request state.
    pub fn touch_service(&mut self, service: &str) -> NameState {
        self.services
            .entry(service.to_string())
            .or_insert_with(|| ServiceNode { state: NameState::Unrequested, objects: HashMap::new() })
            .state
    }

    pub fn set_service_state(&mut self, service: &str, state: NameState) {
        if let Some(node) = self.services.get_mut(service) {
            node.state = state;
        }
    }

    pub fn requested_services(&self) -> Vec<String> {
        self.services
            .iter()
            .filter(|(_, n)| n.state == NameState::Unrequested)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn bind_method(
        &mut self,
        service: &str,
        object: &str,
        interface: &str,
        member: &str,
        binding: MethodBinding,
    ) -> DbusBindingId {
        let record = MethodRecord {
            service: service.to_string(),
            object: object.to_string(),
            interface: interface.to_string(),
            member: member.to_string(),
            binding,
        };
        let key = self.methods.insert(record);
        let id = DbusBindingId::from(key);
        let service_node = self
            .services
            .entry(service.to_string())
            .or_insert_with(|| ServiceNode { state: NameState::Unrequested, objects: HashMap::new() });
        service_node
            .objects
            .entry(object.to_string())
            .or_default()
            .interfaces
            .entry(interface.to_string())
            .or_default()
            .methods
            .push(id);
        id
    }

    pub fn unbind_method(&mut self, id: DbusBindingId) -> Option<UnbindOutcome> {
        if !self.methods.contains(id.index()) {
            return None;
        }
        let record = self.methods.remove(id.index());
        let mut outcome = UnbindOutcome::default();
        if let Some(service_node) = self.services.get_mut(&record.service) {
            if let Some(object_node) = service_node.objects.get_mut(&record.object) {
                if let Some(iface_node) = object_node.interfaces.get_mut(&record.interface) {
                    iface_node.methods.retain(|m| *m != id);
                    if iface_node.methods.is_empty() {
                        object_node.interfaces.remove(&record.interface);
                    }
                }
                if object_node.interfaces.is_empty() {
                    service_node.objects.remove(&record.object);
                }
            }
            if service_node.is_empty() {
                outcome.service_now_empty = Some(record.service.clone());
            }
        }
        Some(outcome)
    }

    pub fn find_method(&self, object: &str, interface: &str, member: &str) -> Option<(DbusBindingId, MethodBinding)> {
        self.methods
            .iter()
            .find(|(_, r)| r.object == object && r.interface == interface && r.member == member)
            .map(|(key, r)| (DbusBindingId::from(key), r.binding))
    }

    /// Every `(interface, members)` pair registered at `object`, for
    /// `Introspect` XML assembly.
    pub fn interfaces_at(&self, object: &str) -> Vec<(String, Vec<String>)> {
        let mut by_interface: HashMap<String, Vec<String>> = HashMap::new();
        for (_, r) in self.methods.iter().filter(|(_, r)| r.object == object) {
            by_interface.entry(r.interface.clone()).or_default().push(r.member.clone());
        }
        by_interface.into_iter().collect()
    }

    /// Object paths registered anywhere that are strict children of
    /// `prefix` (§4.G: unregistered prefixes are introspected as
    /// `<node name="…"/>`).
    pub fn child_nodes(&self, prefix: &str) -> Vec<String> {
        let mut children: Vec<String> = self
            .methods
            .iter()
            .filter_map(|(_, r)| child_segment(prefix, &r.object))
            .collect();
        children.sort();
        children.dedup();
        children
    }

    pub fn bind_signal(&mut self, binding: SignalBinding) -> DbusBindingId {
        DbusBindingId::from(self.signals.insert(binding))
    }

    pub fn unbind_signal(&mut self, id: DbusBindingId) -> Option<SignalBinding> {
        self.signals.contains(id.index()).then(|| self.signals.remove(id.index()))
    }

    pub fn signals_matching(&self, interface: &str, member: &str) -> Vec<SignalBinding> {
        self.signals.iter().filter(|(_, s)| s.matches(interface, member)).map(|(_, s)| s.clone()).collect()
    }

    /// True if `interface`/`member` was registered as an outbound signal by
    /// any method binding's owning plugin sharing that object (§4.G
    /// "Outbound signals are verified against the registered interface
    /// table before sending"). A plugin is allowed to emit a signal on any
    /// interface/member pair it (or any plugin) declared a method under, or
    /// that some plugin declared a signal binding for — either is evidence
    /// the interface is real, not a typo.
    pub fn interface_member_is_known(&self, object: &str, interface: &str, member: &str) -> bool {
        let known_method = self.methods.iter().any(|(_, r)| r.object == object && r.interface == interface);
        let known_signal =
            self.signals.iter().any(|(_, s)| s.interface.as_deref() == Some(interface) && s.member.as_deref() == Some(member));
        known_method || known_signal
    }

    /// Removes every binding owned by `owner`, releasing empty service
    /// nodes along the way. Returns the set of now-empty service names so
    /// the caller can release their well-known names on the bus.
    pub fn release_owned_by(&mut self, owner: PluginId) -> Vec<String> {
        let method_ids: Vec<DbusBindingId> = self
            .methods
            .iter()
            .filter(|(_, r)| r.binding.owner == owner)
            .map(|(k, _)| DbusBindingId::from(k))
            .collect();
        let mut released_services = Vec::new();
        for id in method_ids {
            if let Some(outcome) = self.unbind_method(id) {
                if let Some(service) = outcome.service_now_empty {
                    released_services.push(service);
                }
            }
        }
        let signal_ids: Vec<DbusBindingId> =
            self.signals.iter().filter(|(_, s)| s.owner == owner).map(|(k, _)| DbusBindingId::from(k)).collect();
        for id in signal_ids {
            self.unbind_signal(id);
        }
        released_services
    }
}

impl Default for Hierarchy {
    fn default() -> Self {
        Self::new()
    }
}

/// If `object` is a strict descendant of `prefix`, returns the next path
/// segment after `prefix` (the immediate child node name Introspect should
/// report). Returns `None` if `object == prefix` or it isn't a descendant.
fn child_segment(prefix: &str, object: &str) -> Option<String> {
    let prefix = prefix.trim_end_matches('/');
    let rest = object.strip_prefix(prefix)?.strip_prefix('/')?;
    if rest.is_empty() {
        return None;
    }
    Some(rest.split('/').next().unwrap_or(rest).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsme_core::PluginId;

    unsafe extern "C" fn noop_method(
        _sender: dsme_core::abi::CEndpoint,
        _args_ptr: *const u8,
        _args_len: usize,
        _reply_buf: *mut u8,
        _reply_cap: usize,
        _reply_len: *mut usize,
        _user_data: *mut std::ffi::c_void,
    ) -> i32 {
        0
    }

    unsafe extern "C" fn noop_signal(
        _sender: dsme_core::abi::CEndpoint,
        _args_ptr: *const u8,
        _args_len: usize,
        _user_data: *mut std::ffi::c_void,
    ) {
    }

    fn binding(owner: PluginId) -> MethodBinding {
        MethodBinding { owner, privileged: false, callback: noop_method, user_data: 0 }
    }

    #[test]
    fn bind_then_find_round_trips() {
        let mut h = Hierarchy::new();
        let owner = PluginId::from(0);
        h.bind_method("com.example.svc", "/o", "com.example.iface", "do_thing", binding(owner));
        let (_, found) = h.find_method("/o", "com.example.iface", "do_thing").unwrap();
        assert_eq!(found.owner, owner);
    }

    #[test]
    fn unbind_prunes_empty_nodes_and_reports_empty_service() {
        let mut h = Hierarchy::new();
        let owner = PluginId::from(0);
        let id = h.bind_method("com.example.svc", "/o", "com.example.iface", "do_thing", binding(owner));
        let outcome = h.unbind_method(id).unwrap();
        assert_eq!(outcome.service_now_empty.as_deref(), Some("com.example.svc"));
        assert!(h.find_method("/o", "com.example.iface", "do_thing").is_none());
        assert!(h.interfaces_at("/o").is_empty());
    }

    #[test]
    fn unload_releases_only_owning_plugins_bindings() {
        let mut h = Hierarchy::new();
        let a = PluginId::from(0);
        let b = PluginId::from(1);
        h.bind_method("svc", "/o", "iface.a", "m", binding(a));
        h.bind_method("svc", "/o", "iface.b", "m", binding(b));
        h.release_owned_by(a);
        assert!(h.find_method("/o", "iface.a", "m").is_none());
        assert!(h.find_method("/o", "iface.b", "m").is_some());
    }

    #[test]
    fn signal_match_rule_includes_only_set_fields() {
        let binding = SignalBinding {
            owner: PluginId::from(0),
            interface: Some("org.freedesktop.DBus".into()),
            member: None,
            callback: noop_signal,
            user_data: 0,
        };
        assert_eq!(binding.match_rule(), "type='signal',interface='org.freedesktop.DBus'");
    }

    #[test]
    fn child_nodes_reports_immediate_descendants_only() {
        let mut h = Hierarchy::new();
        h.bind_method("svc", "/com/nokia/dsme/request/extra", "iface", "m", binding(PluginId::from(0)));
        let children = h.child_nodes("/com/nokia/dsme");
        assert_eq!(children, vec!["request".to_string()]);
    }
}
