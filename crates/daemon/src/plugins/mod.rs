//! The plugin manager: `dlopen`s plugin `cdylib`s, owns their resolved
//! handler tables, and tracks which plugin is "current" while one of its
//! handlers is executing (§4.D, §4.E).

mod api;
mod loader;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};

use dsme_core::abi::{CEndpoint, CPluginApi, CENDPOINT_KIND_PLUGIN};
use dsme_core::{MessageTypeId, PluginId, CORE_PLUGIN};
use slab::Slab;
use thiserror::Error;

use crate::bus::MessageBus;
use crate::dbus::hierarchy::{MethodBinding, SignalBinding};
use crate::dbus::{invoke_method_callback, invoke_signal_callback, DbusProxy};
use crate::logger::Logger;
use crate::mainloop::TimerService;

use api::{
    host_bind_dbus_method, host_bind_dbus_signal, host_broadcast, host_create_timer, host_destroy_timer, host_log,
    host_unbind_dbus_method, host_unbind_dbus_signal, host_emit_dbus_signal, HostState,
};
use loader::LoadedPlugin;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("failed to dlopen plugin at {path:?}: {source}")]
    DlOpen { path: PathBuf, source: libloading::Error },

    #[error("plugin at {path:?} is missing required symbol {symbol}")]
    MissingSymbol { path: PathBuf, symbol: &'static str },

    #[error("plugin at {path:?} returned nonzero from dsme_plugin_init: {code}")]
    InitFailed { path: PathBuf, code: i32 },

    #[error("a plugin named {0:?} is already loaded")]
    AlreadyLoaded(String),

    #[error("no plugin loaded with handle {0}")]
    NotLoaded(PluginId),
}

struct PluginSlot {
    name: String,
    plugin: LoadedPlugin,
}

pub(crate) fn cendpoint_for_plugin(id: PluginId) -> CEndpoint {
    CEndpoint { kind: CENDPOINT_KIND_PLUGIN, index: id.index(), pid: 0, uid: 0, gid: 0 }
}

/// Owns every loaded plugin. Always held behind a `Box` so the `HostState`
/// it hands out to plugins (as `CPluginApi::host`) has a stable address
/// independent of where the `Box<PluginManager>` handle itself lives.
pub struct PluginManager {
    slots: Slab<PluginSlot>,
    by_name: HashMap<String, PluginId>,
    host: Box<HostState>,
}

impl PluginManager {
    /// `timers`, `bus`, and `dbus` must outlive every plugin loaded through
    /// the returned manager — in practice they're owned by the same
    /// top-level daemon struct that owns this manager and never move after
    /// startup.
    pub fn new(timers: *mut TimerService, bus: *mut MessageBus, dbus: *mut DbusProxy, logger: Logger) -> Box<Self> {
        let mut boxed = Box::new(PluginManager {
            slots: Slab::new(),
            by_name: HashMap::new(),
            host: Box::new(HostState {
                timers,
                bus,
                dbus,
                logger,
                current: Cell::new(CORE_PLUGIN),
                manager: std::ptr::null_mut(),
                timer_callbacks: RefCell::new(HashMap::new()),
            }),
        });
        let self_ptr: *mut PluginManager = &mut *boxed;
        boxed.host.manager = self_ptr;
        boxed
    }

    fn api(&self) -> CPluginApi {
        CPluginApi {
            host: (&*self.host as *const HostState) as *mut c_void,
            create_timer: host_create_timer,
            destroy_timer: host_destroy_timer,
            broadcast: host_broadcast,
            log: host_log,
            bind_dbus_method: host_bind_dbus_method,
            unbind_dbus_method: host_unbind_dbus_method,
            bind_dbus_signal: host_bind_dbus_signal,
            unbind_dbus_signal: host_unbind_dbus_signal,
            emit_dbus_signal: host_emit_dbus_signal,
        }
    }

    /// Loads `path`, calls its `init`, and registers every declared
    /// handler with the bus in the plugin's declaration order.
    pub fn load(&mut self, path: &Path, name: String) -> Result<PluginId, PluginError> {
        if self.by_name.contains_key(&name) {
            return Err(PluginError::AlreadyLoaded(name));
        }

        let id = PluginId::from(self.slots.vacant_key());
        let prev_current = self.host.current.replace(id);
        let api = self.api();
        let loaded = LoadedPlugin::load(path, &api);
        self.host.current.set(prev_current);
        let loaded = loaded?;

        let handlers = loaded.handlers.clone();
        let inserted_key = self.slots.insert(PluginSlot { name: name.clone(), plugin: loaded });
        debug_assert_eq!(inserted_key, id.index());
        self.by_name.insert(name, id);

        // SAFETY: `self.host.bus` outlives this manager by construction.
        let bus = unsafe { &mut *self.host.bus };
        for handler in &handlers {
            // A plugin declaring the same type twice in its own table is a
            // plugin bug, not a reason to fail the whole load.
            let _ = bus.subscribe(handler.type_id as MessageTypeId, id);
        }

        Ok(id)
    }

    /// Calls `fini`, releases every bus subscription and timer the plugin
    /// owned, and `dlclose`s its library.
    pub fn unload(&mut self, id: PluginId) -> Result<(), PluginError> {
        if !self.slots.contains(id.index()) {
            return Err(PluginError::NotLoaded(id));
        }
        let slot = self.slots.remove(id.index());
        slot.plugin.call_fini();
        self.by_name.remove(&slot.name);

        // SAFETY: see `load`.
        let bus = unsafe { &mut *self.host.bus };
        bus.unsubscribe_all(id);
        // SAFETY: see `load`.
        let timers = unsafe { &mut *self.host.timers };
        timers.release_owned_by(id);
        // SAFETY: see `load`.
        let dbus = unsafe { &mut *self.host.dbus };
        dbus.release_owned_by(id);

        Ok(())
    }

    pub fn loaded_names(&self) -> Vec<&str> {
        self.slots.iter().map(|(_, slot)| slot.name.as_str()).collect()
    }

    pub fn plugin_id(&self, name: &str) -> Option<PluginId> {
        self.by_name.get(name).copied()
    }

    pub fn current_plugin(&self) -> PluginId {
        self.host.current.get()
    }

    /// Synchronously fans `type_id` out to every subscribed plugin's
    /// matching handler, in subscription order, attributing each call to
    /// that plugin as "current" for its duration.
    pub fn dispatch(&mut self, sender: CEndpoint, type_id: u32, body: &[u8], extra: Option<&[u8]>) {
        let (extra_ptr, extra_len) = match extra {
            Some(e) => (e.as_ptr(), e.len()),
            None => (std::ptr::null(), 0),
        };
        let slots = &self.slots;
        let current = &self.host.current;
        // SAFETY: see `load`.
        let bus = unsafe { &mut *self.host.bus };
        bus.broadcast(
            type_id as MessageTypeId,
            |plugin| {
                let Some(slot) = slots.get(plugin.index()) else { return };
                let Some(entry) = slot.plugin.handlers.iter().find(|h| h.type_id == type_id) else { return };
                let prev = current.replace(plugin);
                // SAFETY: `entry.handler` was resolved from a still-loaded
                // library; `body`/`extra` are valid for this call only.
                unsafe {
                    (entry.handler)(sender, body.as_ptr(), body.len(), extra_ptr, extra_len);
                }
                current.set(prev);
            },
            |_unknown_type_id| {},
        );
    }

    /// Invokes the C callback registered for a plugin-owned timer, with
    /// `owner` pushed as "current" for the callback's duration and
    /// unconditionally restored afterward (§4.C "Dispatch"). Returns `true`
    /// if the callback asked to keep the timer armed (§4.C "Callback return
    /// value ≠ 0 re-arms a repeating timer; return 0 destroys it") — the
    /// caller (`crate::lifecycle::fire_expired_timers`) is the one that
    /// actually rearms or cancels the `TimerService` entry based on this.
    /// A `false` return also forgets this timer's callback entry, since
    /// nothing will invoke it again.
    pub fn fire_timer(&self, id: dsme_core::TimerId, owner: PluginId) -> bool {
        let entry = self.host.timer_callbacks.borrow().get(&id).copied();
        let Some((callback, user_data)) = entry else { return false };
        let prev = self.host.current.replace(owner);
        // SAFETY: `callback` was supplied by the plugin via `create_timer`
        // together with `user_data`, which the plugin owns for as long as
        // the timer is armed.
        let rc = unsafe { callback(user_data as *mut c_void) };
        self.host.current.set(prev);
        let keep_running = rc != 0;
        if !keep_running {
            self.host.timer_callbacks.borrow_mut().remove(&id);
        }
        keep_running
    }

    /// Invokes a bound D-Bus method's callback with `binding.owner` pushed
    /// as "current" for the call's duration (§4.G "Dispatch"). The caller
    /// (`crate::lifecycle`) looked `binding` up via `DbusProxy::find_method`
    /// moments earlier, so `binding.owner` is guaranteed still loaded.
    pub fn fire_dbus_method(&self, binding: &MethodBinding, sender: CEndpoint, args: &[u8]) -> (i32, Vec<u8>) {
        let prev = self.host.current.replace(binding.owner);
        // SAFETY: `binding.callback` was supplied by `binding.owner` via
        // `bind_dbus_method` and that plugin is still loaded (see above).
        let result = unsafe { invoke_method_callback(binding, sender, args) };
        self.host.current.set(prev);
        result
    }

    /// Same as [`Self::fire_dbus_method`] for a matched signal binding.
    pub fn fire_dbus_signal(&self, binding: &SignalBinding, sender: CEndpoint, args: &[u8]) {
        let prev = self.host.current.replace(binding.owner);
        // SAFETY: see `fire_dbus_method`.
        unsafe { invoke_signal_callback(binding, sender, args) };
        self.host.current.set(prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_name_is_rejected_before_dlopen() {
        let mut timers = TimerService::new();
        let mut bus = MessageBus::new();
        let mut dbus = DbusProxy::new();
        let logger = crate::logger::Logger::open(crate::logger::Method::None, 3, 16).unwrap();
        let mut manager = PluginManager::new(&mut timers, &mut bus, &mut dbus, logger);
        manager.by_name.insert("heartbeat".into(), PluginId::from(0));
        let err = manager.load(Path::new("/nonexistent.so"), "heartbeat".into());
        assert!(matches!(err, Err(PluginError::AlreadyLoaded(_))));
    }

    #[test]
    fn unload_of_unknown_handle_errors() {
        let mut timers = TimerService::new();
        let mut bus = MessageBus::new();
        let mut dbus = DbusProxy::new();
        let logger = crate::logger::Logger::open(crate::logger::Method::None, 3, 16).unwrap();
        let mut manager = PluginManager::new(&mut timers, &mut bus, &mut dbus, logger);
        assert!(manager.unload(PluginId::from(42)).is_err());
    }
}
