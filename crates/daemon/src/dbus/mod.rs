//! The D-Bus proxy (§4.G).
//!
//! Rather than registering a compile-time-fixed interface with `zbus`'s
//! `ObjectServer`, this proxy installs a single message filter on the raw
//! connection (a [`zbus::MessageStream`]) and dispatches every incoming
//! method call and signal itself against the `hierarchy` registration tree
//! — the same tree a plugin's `bind_methods`/`bind_signals` ABI calls
//! populate (§4.G "Binding"). That is what lets method/signal bindings be
//! scoped to plugin lifetimes: unloading a plugin removes its entries from
//! this one tree, and the dispatcher simply finds nothing there afterward.
//! The six fixed `com.nokia.dsme.request` methods (§6) are just another set
//! of entries in the same tree, owned by [`dsme_core::CORE_PLUGIN`] and
//! never unbound.

pub mod hierarchy;
mod introspect;

use std::ffi::c_void;
use std::time::Duration;

use dsme_core::abi::{CDbusMethodCallback, CDbusSignalCallback, CEndpoint, CENDPOINT_KIND_CORE, DBUS_METHOD_REPLY_CAPACITY};
use dsme_core::{DbusBindingId, DeviceState, PluginId};
use futures_util::StreamExt;
use thiserror::Error;
use zbus::{Connection, Message, MessageStream, MessageType};

use crate::env::{DBUS_REQUEST_INTERFACE, DBUS_REQUEST_OBJECT_PATH, DBUS_SERVICE_NAME, DBUS_SIGNAL_INTERFACE, DBUS_SIGNAL_OBJECT_PATH};
use hierarchy::{Hierarchy, MethodBinding, NameState, SignalBinding};

pub use introspect::introspect_xml;

#[derive(Debug, Error)]
pub enum DbusError {
    #[error("D-Bus connection failed: {0}")]
    Connect(#[from] zbus::Error),

    #[error("not connected to the bus")]
    NotConnected,

    #[error("caller is not permitted to invoke this method")]
    AccessDenied,
}

/// How often to retry connecting to the system bus when it's unavailable
/// at startup or drops out from under us, and how often pending name
/// requests / match-rule changes are reconciled against the live
/// connection (§4.G "polls once per second as a fallback").
pub const RECONNECT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The six fixed methods §6 names on `com.nokia.dsme.request`, decoded
/// from the message body by member name rather than through the plugin
/// ABI's byte-oriented calling convention (these are core-owned, not
/// plugin-owned, so there is no FFI boundary to cross).
#[derive(Debug)]
pub enum CoreRequest {
    GetVersion,
    GetState,
    ReqPowerup,
    ReqReboot,
    ReqShutdown,
    InhibitShutdown { inhibit: bool },
}

#[derive(Debug)]
pub enum CoreReply {
    Version(String),
    State(String),
    Ack,
}

/// One fully-classified incoming D-Bus event, handed to `crate::lifecycle`
/// for the parts that need access to the plugin manager and device state
/// (privilege checks, firing plugin callbacks, mirroring into the internal
/// bus) — the proxy itself only owns connection plumbing and the
/// registration tree.
pub enum DbusEvent {
    Introspect { reply_to: Message, object: String },
    Peer { reply_to: Message, member: String },
    CoreRequest { reply_to: Message, request: CoreRequest, caller_uid: Option<u32> },
    PluginMethod { reply_to: Message, id: DbusBindingId, binding: MethodBinding, caller_uid: Option<u32>, args: Vec<u8> },
    UnknownMethod { reply_to: Message },
    Signal { interface: String, member: String, args: Vec<u8> },
    /// The bus-local `Disconnected` signal (§4.G "On receiving the bus's
    /// local `Disconnected` signal, the proxy creates a marker file and
    /// requests a reboot").
    BusDisconnected,
}

/// A signal a plugin asked to emit via `emit_dbus_signal`, queued because
/// the trampoline that receives the ABI call is synchronous while sending
/// actually requires an `async` round trip on the connection.
pub struct PendingSignal {
    pub object: String,
    pub interface: String,
    pub member: String,
    pub body: Vec<u8>,
}

pub struct DbusProxy {
    connection: Option<Connection>,
    stream: Option<MessageStream>,
    hierarchy: Hierarchy,
    names_to_release: Vec<String>,
    pending_signals: Vec<PendingSignal>,
}

impl DbusProxy {
    pub fn new() -> Self {
        DbusProxy {
            connection: None,
            stream: None,
            hierarchy: Hierarchy::new(),
            names_to_release: Vec::new(),
            pending_signals: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Attempts one connection to the system bus and claims the primary
    /// well-known name. The six core request methods are (re-)registered
    /// into the hierarchy on every successful connect so Introspect always
    /// reports them, even across a reconnect.
    pub async fn try_connect(&mut self) -> Result<(), DbusError> {
        let connection = zbus::ConnectionBuilder::system()?.name(DBUS_SERVICE_NAME)?.build().await?;
        self.stream = Some(MessageStream::from(&connection));
        self.hierarchy.touch_service(DBUS_SERVICE_NAME);
        self.hierarchy.set_service_state(DBUS_SERVICE_NAME, NameState::Acquired);
        self.connection = Some(connection);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.connection = None;
        self.stream = None;
    }

    /// Awaits and classifies the next message off the connection. Pending
    /// forever while disconnected, so it's always safe to include in the
    /// main loop's `select!`.
    pub async fn next_event(&mut self) -> Option<DbusEvent> {
        let Some(stream) = self.stream.as_mut() else {
            std::future::pending::<()>().await;
            unreachable!();
        };
        let msg = match stream.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(_)) | None => {
                self.disconnect();
                return Some(DbusEvent::BusDisconnected);
            }
        };
        self.classify(msg).await
    }

    async fn classify(&self, msg: Message) -> Option<DbusEvent> {
        let header = msg.header().ok()?;
        match msg.message_type() {
            MessageType::MethodCall => {
                let interface = header.interface().ok().flatten().map(|i| i.to_string());
                let member = header.member().ok().flatten()?.to_string();
                let path = header.path().ok().flatten().map(|p| p.to_string()).unwrap_or_default();

                if interface.as_deref() == Some("org.freedesktop.DBus.Introspectable") && member == "Introspect" {
                    return Some(DbusEvent::Introspect { reply_to: msg, object: path });
                }
                if interface.as_deref() == Some("org.freedesktop.DBus.Peer") {
                    return Some(DbusEvent::Peer { reply_to: msg, member });
                }
                if path == DBUS_REQUEST_OBJECT_PATH && interface.as_deref() == Some(DBUS_REQUEST_INTERFACE) {
                    let request = match member.as_str() {
                        "get_version" => CoreRequest::GetVersion,
                        "get_state" => CoreRequest::GetState,
                        "req_powerup" => CoreRequest::ReqPowerup,
                        "req_reboot" => CoreRequest::ReqReboot,
                        "req_shutdown" => CoreRequest::ReqShutdown,
                        "inhibit_shutdown" => CoreRequest::InhibitShutdown { inhibit: msg.body::<bool>().unwrap_or(false) },
                        _ => return Some(DbusEvent::UnknownMethod { reply_to: msg }),
                    };
                    let caller_uid = self.resolve_uid(&msg).await;
                    return Some(DbusEvent::CoreRequest { reply_to: msg, request, caller_uid });
                }
                let Some(interface) = interface else { return Some(DbusEvent::UnknownMethod { reply_to: msg }) };
                match self.hierarchy.find_method(&path, &interface, &member) {
                    Some((id, binding)) => {
                        let args = msg.body::<Vec<u8>>().unwrap_or_default();
                        let caller_uid = self.resolve_uid(&msg).await;
                        Some(DbusEvent::PluginMethod { reply_to: msg, id, binding, caller_uid, args })
                    }
                    None => Some(DbusEvent::UnknownMethod { reply_to: msg }),
                }
            }
            MessageType::Signal => {
                let interface = header.interface().ok().flatten()?.to_string();
                let member = header.member().ok().flatten()?.to_string();
                if interface == "org.freedesktop.DBus.Local" && member == "Disconnected" {
                    return Some(DbusEvent::BusDisconnected);
                }
                let args = msg.body::<Vec<u8>>().unwrap_or_default();
                Some(DbusEvent::Signal { interface, member, args })
            }
            _ => None,
        }
    }

    /// `GetConnectionUnixUser`: a synchronous round-trip accepted as design
    /// debt (§5 "Synchronous D-Bus blocking calls").
    async fn resolve_uid(&self, msg: &Message) -> Option<u32> {
        let header = msg.header().ok()?;
        let sender = header.sender().ok().flatten()?;
        let connection = self.connection.as_ref()?;
        let dbus_proxy = zbus::fdo::DBusProxy::new(connection).await.ok()?;
        dbus_proxy.get_connection_unix_user(sender.to_owned().into()).await.ok()
    }

    pub async fn reply(&self, call: &Message, body: impl serde::Serialize + zbus::zvariant::Type) -> Result<(), DbusError> {
        let connection = self.connection.as_ref().ok_or(DbusError::NotConnected)?;
        connection.reply(call, &body).await?;
        Ok(())
    }

    pub async fn reply_error(&self, call: &Message, name: &str, message: &str) -> Result<(), DbusError> {
        let connection = self.connection.as_ref().ok_or(DbusError::NotConnected)?;
        connection.reply_error(call, name, &(message,)).await?;
        Ok(())
    }

    pub fn introspect_xml(&self, object: &str) -> String {
        let request_methods = ["get_version", "get_state", "req_powerup", "req_reboot", "req_shutdown", "inhibit_shutdown"];
        let signal_members = [
            "state_change_ind",
            "save_unsaved_data_ind",
            "battery_empty_ind",
            "thermal_shutdown_ind",
            "shutdown_ind",
            "state_req_denied_ind",
        ];
        let extra: &[(&str, &[&str])] = if object == DBUS_REQUEST_OBJECT_PATH {
            &[(DBUS_REQUEST_INTERFACE, &request_methods)]
        } else if object == DBUS_SIGNAL_OBJECT_PATH {
            &[(DBUS_SIGNAL_INTERFACE, &signal_members)]
        } else {
            &[]
        };
        introspect::introspect_xml_with_extra(&self.hierarchy, object, extra)
    }

    // --- plugin-facing binding API (§4.G "Binding"), mirrored 1:1 by the
    // `host_bind_dbus_*`/`host_unbind_dbus_*` ABI trampolines in
    // `crate::plugins::api`. ---

    pub fn bind_method(
        &mut self,
        service: &str,
        object: &str,
        interface: &str,
        member: &str,
        owner: PluginId,
        privileged: bool,
        callback: CDbusMethodCallback,
        user_data: usize,
    ) -> DbusBindingId {
        self.hierarchy.bind_method(service, object, interface, member, MethodBinding { owner, privileged, callback, user_data })
    }

    pub fn unbind_method(&mut self, id: DbusBindingId) {
        if let Some(outcome) = self.hierarchy.unbind_method(id) {
            if let Some(name) = outcome.service_now_empty {
                if name != DBUS_SERVICE_NAME {
                    self.names_to_release.push(name);
                }
            }
        }
    }

    pub fn bind_signal(
        &mut self,
        interface: Option<String>,
        member: Option<String>,
        owner: PluginId,
        callback: CDbusSignalCallback,
        user_data: usize,
    ) -> DbusBindingId {
        self.hierarchy.bind_signal(SignalBinding { owner, interface, member, callback, user_data })
    }

    pub fn unbind_signal(&mut self, id: DbusBindingId) {
        self.hierarchy.unbind_signal(id);
    }

    /// Releases every binding `owner` held (method or signal), queuing the
    /// well-known name release for the next `reconcile()` if a service
    /// became empty. Called from `PluginManager::unload`.
    pub fn release_owned_by(&mut self, owner: PluginId) {
        for name in self.hierarchy.release_owned_by(owner) {
            if name != DBUS_SERVICE_NAME {
                self.names_to_release.push(name);
            }
        }
    }

    pub fn interface_member_is_known(&self, object: &str, interface: &str, member: &str) -> bool {
        self.hierarchy.interface_member_is_known(object, interface, member)
    }

    /// Every signal binding whose filter matches `interface`/`member`,
    /// across every owning plugin (§4.G "For signals, every matching
    /// handler is invoked in its owner's context").
    pub fn signals_matching(&self, interface: &str, member: &str) -> Vec<SignalBinding> {
        self.hierarchy.signals_matching(interface, member)
    }

    /// Queues a plugin-emitted signal for sending on the next
    /// `reconcile()` tick (see `host_emit_dbus_signal`).
    pub fn queue_signal(&mut self, object: String, interface: String, member: String, body: Vec<u8>) {
        self.pending_signals.push(PendingSignal { object, interface, member, body });
    }

    pub async fn emit_raw_signal(&self, object: &str, interface: &str, member: &str, body: &[u8]) -> Result<(), DbusError> {
        let connection = self.connection.as_ref().ok_or(DbusError::NotConnected)?;
        connection.emit_signal(Option::<()>::None, object, interface, member, &body.to_vec()).await?;
        Ok(())
    }

    /// Requests any service names plugins have asked to own but that
    /// haven't been requested yet, and releases any that became empty
    /// (§4.G "a service-name request state machine
    /// `{unrequested -> requested -> acquired | rejected}`"). Called once
    /// per reconnect-poll tick while connected.
    pub async fn reconcile(&mut self) {
        let Some(connection) = self.connection.clone() else { return };
        let Ok(dbus_proxy) = zbus::fdo::DBusProxy::new(&connection).await else { return };

        for name in self.hierarchy.requested_services() {
            self.hierarchy.set_service_state(&name, NameState::Requested);
            let Ok(well_known) = zbus::names::WellKnownName::try_from(name.as_str()) else { continue };
            let state = match dbus_proxy.request_name(well_known, zbus::fdo::RequestNameFlags::DoNotQueue.into()).await {
                Ok(_) => NameState::Acquired,
                Err(_) => NameState::Rejected,
            };
            self.hierarchy.set_service_state(&name, state);
        }

        for name in self.names_to_release.drain(..) {
            if let Ok(well_known) = zbus::names::WellKnownName::try_from(name.as_str()) {
                let _ = dbus_proxy.release_name(well_known).await;
            }
        }

        let pending: Vec<PendingSignal> = self.pending_signals.drain(..).collect();
        for signal in pending {
            let _ = self.emit_raw_signal(&signal.object, &signal.interface, &signal.member, &signal.body).await;
        }
    }

    pub async fn state_change_ind(&self, state: DeviceState) -> Result<(), DbusError> {
        self.emit_indication("state_change_ind", state.as_str()).await
    }

    pub async fn save_unsaved_data_ind(&self) -> Result<(), DbusError> {
        self.emit_indication("save_unsaved_data_ind", ()).await
    }

    pub async fn battery_empty_ind(&self) -> Result<(), DbusError> {
        self.emit_indication("battery_empty_ind", ()).await
    }

    pub async fn thermal_shutdown_ind(&self) -> Result<(), DbusError> {
        self.emit_indication("thermal_shutdown_ind", ()).await
    }

    pub async fn shutdown_ind(&self) -> Result<(), DbusError> {
        self.emit_indication("shutdown_ind", ()).await
    }

    pub async fn state_req_denied_ind(&self, action: &str, reason: &str) -> Result<(), DbusError> {
        self.emit_indication("state_req_denied_ind", (action, reason)).await
    }

    async fn emit_indication(&self, signal: &str, body: impl serde::Serialize + zbus::zvariant::Type) -> Result<(), DbusError> {
        let connection = self.connection.as_ref().ok_or(DbusError::NotConnected)?;
        connection.emit_signal(Option::<()>::None, DBUS_SIGNAL_OBJECT_PATH, DBUS_SIGNAL_INTERFACE, signal, &body).await?;
        Ok(())
    }
}

impl Default for DbusProxy {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper used by `crate::plugins::api::host_*` trampolines to build the
/// `CEndpoint` a D-Bus-originated call presents to a plugin callback:
/// there is no socket-client or plugin sender, so this is attributed to
/// the core, carrying whatever uid `GetConnectionUnixUser` resolved.
pub fn dbus_sender_cendpoint(caller_uid: Option<u32>) -> CEndpoint {
    CEndpoint { kind: CENDPOINT_KIND_CORE, index: 0, pid: 0, uid: caller_uid.unwrap_or(u32::MAX), gid: 0 }
}

/// Invokes a plugin's bound method callback with a fixed-capacity reply
/// buffer (§`DBUS_METHOD_REPLY_CAPACITY`), returning the callback's status
/// and the bytes it wrote.
///
/// # Safety
/// `binding.callback` must be a function pointer resolved from a plugin
/// that is still loaded (callers only ever reach this through
/// `PluginManager::fire_dbus_method`, which pushes the owning plugin as
/// "current" for the duration of this call).
pub unsafe fn invoke_method_callback(binding: &MethodBinding, sender: CEndpoint, args: &[u8]) -> (i32, Vec<u8>) {
    let mut reply_buf = vec![0u8; DBUS_METHOD_REPLY_CAPACITY];
    let mut reply_len: usize = 0;
    let rc = unsafe {
        (binding.callback)(
            sender,
            args.as_ptr(),
            args.len(),
            reply_buf.as_mut_ptr(),
            reply_buf.len(),
            &mut reply_len as *mut usize,
            binding.user_data as *mut c_void,
        )
    };
    reply_buf.truncate(reply_len.min(reply_buf.len()));
    (rc, reply_buf)
}

/// # Safety
/// Same contract as [`invoke_method_callback`].
pub unsafe fn invoke_signal_callback(binding: &SignalBinding, sender: CEndpoint, args: &[u8]) {
    unsafe {
        (binding.callback)(sender, args.as_ptr(), args.len(), binding.user_data as *mut c_void);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dbus_sender_defaults_to_unknown_uid() {
        let c = dbus_sender_cendpoint(None);
        assert_eq!(c.kind, CENDPOINT_KIND_CORE);
        assert_eq!(c.uid, u32::MAX);
    }

    #[test]
    fn dbus_sender_carries_resolved_uid() {
        let c = dbus_sender_cendpoint(Some(1000));
        assert_eq!(c.uid, 1000);
    }
}
