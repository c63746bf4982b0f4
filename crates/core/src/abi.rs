//! C ABI shared between the daemon's plugin manager and every `cdylib`
//! plugin it `dlopen`s. This is the one module in the workspace that trades
//! Rust's usual safety guarantees for a stable cross-compilation-unit
//! boundary — everything above the plugin manager works with safe,
//! high-level types built on top of this.
//!
//! A plugin exports exactly three `#[no_mangle] extern "C"` symbols:
//! `dsme_plugin_init`, `dsme_plugin_fini`, `dsme_plugin_message_handlers`.

use std::ffi::c_void;
use std::os::raw::c_char;

/// Opaque token identifying the sender of a dispatched message, passed by
/// value across the ABI boundary so a handler never has to chase a pointer
/// into the host's address space.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CEndpoint {
    /// 0 = core, 1 = plugin, 2 = socket client.
    pub kind: u8,
    /// Plugin arena index when `kind == 1`; client arena index when
    /// `kind == 2`; unused when `kind == 0`.
    pub index: usize,
    /// Peer credentials, populated only when `kind == 2`.
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

pub const CENDPOINT_KIND_CORE: u8 = 0;
pub const CENDPOINT_KIND_PLUGIN: u8 = 1;
pub const CENDPOINT_KIND_CLIENT: u8 = 2;

/// A single `{type_id, handler, expected_body_size}` binding, the exact shape
/// §4.D describes a plugin's static registration array as containing.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct CHandlerEntry {
    pub type_id: u32,
    pub expected_body_size: usize,
    /// Invoked with the sender, the raw body bytes, and the optional extra
    /// tail (null pointer + 0 length when absent).
    pub handler: unsafe extern "C" fn(
        sender: CEndpoint,
        body_ptr: *const u8,
        body_len: usize,
        extra_ptr: *const u8,
        extra_len: usize,
    ),
}

/// The plugin's handler table, returned by value (as a borrowed slice: the
/// plugin owns a `'static` array and just hands out a pointer/length pair).
#[repr(C)]
pub struct CHandlerTable {
    pub entries: *const CHandlerEntry,
    pub count: usize,
}

/// Callback the host invokes when a plugin-owned timer fires.
pub type CTimerCallback = unsafe extern "C" fn(user_data: *mut c_void) -> i32;

/// Callback the host invokes when a bound D-Bus method is called on a
/// plugin's behalf (§4.G "Binding"). `args` is the method call's body,
/// marshaled as an opaque byte array (this ABI carries D-Bus payloads the
/// same way it carries wire payloads: as bytes, not as typed D-Bus
/// signatures). The plugin writes its reply into `reply_buf` (capacity
/// `reply_cap`) and stores the number of bytes written through
/// `reply_len`; returning 0 sends that reply, non-zero sends a D-Bus error
/// reply naming this method.
pub type CDbusMethodCallback = unsafe extern "C" fn(
    sender: CEndpoint,
    args_ptr: *const u8,
    args_len: usize,
    reply_buf: *mut u8,
    reply_cap: usize,
    reply_len: *mut usize,
    user_data: *mut c_void,
) -> i32;

/// Callback the host invokes when a matched D-Bus signal arrives for a
/// plugin's binding (§4.G "Binding" / "bind_signals").
pub type CDbusSignalCallback =
    unsafe extern "C" fn(sender: CEndpoint, args_ptr: *const u8, args_len: usize, user_data: *mut c_void);

/// Functions the host exposes back to a plugin while it is "current"
/// (§4.E). Every call implicitly attributes the created resource to
/// whichever plugin is executing — the plugin never passes its own id.
#[repr(C)]
pub struct CPluginApi {
    pub host: *mut c_void,

    /// Create a timer; `interval_ms == 0` creates a one-shot idle source.
    /// Returns an opaque non-negative handle, or -1 on failure.
    pub create_timer: unsafe extern "C" fn(
        host: *mut c_void,
        interval_ms: u32,
        callback: CTimerCallback,
        user_data: *mut c_void,
    ) -> i64,

    pub destroy_timer: unsafe extern "C" fn(host: *mut c_void, handle: i64) -> i32,

    /// Broadcast a raw message; `extra_ptr`/`extra_len` may be null/0.
    pub broadcast: unsafe extern "C" fn(
        host: *mut c_void,
        type_id: u32,
        body_ptr: *const u8,
        body_len: usize,
        extra_ptr: *const u8,
        extra_len: usize,
    ) -> i32,

    /// Emit one log line attributed to this plugin.
    pub log: unsafe extern "C" fn(
        host: *mut c_void,
        priority: u8,
        file: *const c_char,
        func: *const c_char,
        text: *const c_char,
    ),

    /// Bind a method handler at `service`/`object`/`interface`/`member`
    /// (§4.G "bind_methods"). `privileged != 0` routes the call through the
    /// same uid check §6 documents for `req_shutdown`. Returns a
    /// non-negative binding handle, or -1 on failure.
    pub bind_dbus_method: unsafe extern "C" fn(
        host: *mut c_void,
        service: *const c_char,
        object: *const c_char,
        interface: *const c_char,
        member: *const c_char,
        privileged: i32,
        callback: CDbusMethodCallback,
        user_data: *mut c_void,
    ) -> i64,

    pub unbind_dbus_method: unsafe extern "C" fn(host: *mut c_void, handle: i64) -> i32,

    /// Bind a signal filter (§4.G "bind_signals"). `interface`/`member` may
    /// each be null to match any value of that field, producing a match
    /// rule of the form `type='signal'[,interface='…'][,member='…']`.
    pub bind_dbus_signal: unsafe extern "C" fn(
        host: *mut c_void,
        interface: *const c_char,
        member: *const c_char,
        callback: CDbusSignalCallback,
        user_data: *mut c_void,
    ) -> i64,

    pub unbind_dbus_signal: unsafe extern "C" fn(host: *mut c_void, handle: i64) -> i32,

    /// Emit a signal previously declared via `bind_dbus_method`'s sibling
    /// registration (verified against the registered interface table per
    /// §4.G "Outbound signals" before sending; a plugin emitting an
    /// unregistered signal gets a logged warning and no signal is sent).
    pub emit_dbus_signal: unsafe extern "C" fn(
        host: *mut c_void,
        object: *const c_char,
        interface: *const c_char,
        member: *const c_char,
        body_ptr: *const u8,
        body_len: usize,
    ) -> i32,
}

/// `int dsme_plugin_init(const CPluginApi *api)` — returns 0 on success.
pub type CInitFn = unsafe extern "C" fn(api: *const CPluginApi) -> i32;
/// `void dsme_plugin_fini(void)`.
pub type CFiniFn = unsafe extern "C" fn();
/// `CHandlerTable dsme_plugin_message_handlers(void)`.
pub type CHandlersFn = unsafe extern "C" fn() -> CHandlerTable;

/// Capacity of the reply buffer a host passes into [`CDbusMethodCallback`].
/// Plugin-bound D-Bus methods are a systems-daemon control surface, not a
/// bulk-data channel, so a fixed small cap keeps the host from needing a
/// cross-FFI allocation handoff.
pub const DBUS_METHOD_REPLY_CAPACITY: usize = 4096;

pub const INIT_SYMBOL: &[u8] = b"dsme_plugin_init";
pub const FINI_SYMBOL: &[u8] = b"dsme_plugin_fini";
pub const HANDLERS_SYMBOL: &[u8] = b"dsme_plugin_message_handlers";
