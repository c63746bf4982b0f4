//! The `host_*` trampolines wired into every plugin's [`CPluginApi`], plus
//! the shared state they close over.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::{c_void, CStr};
use std::os::raw::c_char;
use std::time::Duration;

use dsme_core::abi::{CDbusMethodCallback, CDbusSignalCallback, CTimerCallback};
use dsme_core::{DbusBindingId, PluginId, TimerId};

use crate::bus::MessageBus;
use crate::dbus::DbusProxy;
use crate::logger::{Logger, Priority};
use crate::mainloop::TimerService;

use super::PluginManager;

/// State every `host_*` trampoline reaches through its opaque `host`
/// pointer. Lives inside a `Box<PluginManager>`; `manager` is filled in
/// immediately after that box is allocated (see `PluginManager::new`), so
/// it stays valid for exactly as long as the manager itself does.
pub(super) struct HostState {
    pub timers: *mut TimerService,
    pub bus: *mut MessageBus,
    pub dbus: *mut DbusProxy,
    pub logger: Logger,
    pub current: Cell<PluginId>,
    pub manager: *mut PluginManager,
    pub timer_callbacks: RefCell<HashMap<TimerId, (CTimerCallback, usize)>>,
}

impl HostState {
    pub fn current_plugin(&self) -> PluginId {
        self.current.get()
    }
}

unsafe fn c_str_or_empty<'a>(ptr: *const c_char) -> &'a str {
    if ptr.is_null() {
        return "";
    }
    // SAFETY: the plugin is documented (§4.D) to pass a NUL-terminated
    // string valid for the duration of this call.
    unsafe { CStr::from_ptr(ptr) }.to_str().unwrap_or("")
}

/// Like [`c_str_or_empty`], but a null pointer stays `None` rather than
/// collapsing to `""` — needed for `bind_dbus_signal`'s optional
/// `interface`/`member` filters, where "unset" and "empty string" mean
/// different things (§4.G "may each be null to match any value").
unsafe fn c_str_opt<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// # Safety
/// `host` must be the `*mut c_void` this plugin was handed in its
/// `CPluginApi`, cast from a live `HostState`.
pub(super) unsafe extern "C" fn host_create_timer(
    host: *mut c_void,
    interval_ms: u32,
    callback: CTimerCallback,
    user_data: *mut c_void,
) -> i64 {
    let state = unsafe { &*(host as *const HostState) };
    let timers = unsafe { &mut *state.timers };
    let delay = Duration::from_millis(interval_ms as u64);
    let interval = if interval_ms == 0 { None } else { Some(delay) };
    let id = timers.create(delay, interval, state.current_plugin());
    state.timer_callbacks.borrow_mut().insert(id, (callback, user_data as usize));
    id.index() as i64
}

/// # Safety
/// Same contract as [`host_create_timer`].
pub(super) unsafe extern "C" fn host_destroy_timer(host: *mut c_void, handle: i64) -> i32 {
    if handle < 0 {
        return -1;
    }
    let state = unsafe { &*(host as *const HostState) };
    let timers = unsafe { &mut *state.timers };
    let id = TimerId::from(handle as usize);
    state.timer_callbacks.borrow_mut().remove(&id);
    match timers.cancel(id) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// # Safety
/// Same contract as [`host_create_timer`]; `body_ptr`/`extra_ptr` must be
/// valid for `body_len`/`extra_len` bytes (or null with a zero length).
pub(super) unsafe extern "C" fn host_broadcast(
    host: *mut c_void,
    type_id: u32,
    body_ptr: *const u8,
    body_len: usize,
    extra_ptr: *const u8,
    extra_len: usize,
) -> i32 {
    let state = unsafe { &*(host as *const HostState) };
    let manager = unsafe { &mut *state.manager };
    let body: &[u8] = if body_ptr.is_null() { &[] } else { unsafe { std::slice::from_raw_parts(body_ptr, body_len) } };
    let extra: Option<&[u8]> =
        if extra_ptr.is_null() { None } else { Some(unsafe { std::slice::from_raw_parts(extra_ptr, extra_len) }) };

    let sender = super::cendpoint_for_plugin(state.current_plugin());
    manager.dispatch(sender, type_id, body, extra);
    0
}

/// # Safety
/// `file`, `func`, and `text` must each be null or a valid NUL-terminated
/// C string for the duration of this call.
pub(super) unsafe extern "C" fn host_log(
    host: *mut c_void,
    priority: u8,
    file: *const c_char,
    func: *const c_char,
    text: *const c_char,
) {
    let state = unsafe { &*(host as *const HostState) };
    let Some(priority) = Priority::from_level(priority) else { return };
    let file = unsafe { c_str_or_empty(file) };
    let func = unsafe { c_str_or_empty(func) };
    let text = unsafe { c_str_or_empty(text) };
    state.logger.log(priority, file, func, format_args!("{text}"));
}

/// # Safety
/// `host` as in [`host_create_timer`]; `service`/`object`/`interface`/
/// `member` must each be a valid NUL-terminated C string.
pub(super) unsafe extern "C" fn host_bind_dbus_method(
    host: *mut c_void,
    service: *const c_char,
    object: *const c_char,
    interface: *const c_char,
    member: *const c_char,
    privileged: i32,
    callback: CDbusMethodCallback,
    user_data: *mut c_void,
) -> i64 {
    let state = unsafe { &*(host as *const HostState) };
    let service = unsafe { c_str_or_empty(service) };
    let object = unsafe { c_str_or_empty(object) };
    let interface = unsafe { c_str_or_empty(interface) };
    let member = unsafe { c_str_or_empty(member) };
    let dbus = unsafe { &mut *state.dbus };
    let id = dbus.bind_method(
        service,
        object,
        interface,
        member,
        state.current_plugin(),
        privileged != 0,
        callback,
        user_data as usize,
    );
    id.index() as i64
}

/// # Safety
/// Same contract as [`host_create_timer`].
pub(super) unsafe extern "C" fn host_unbind_dbus_method(host: *mut c_void, handle: i64) -> i32 {
    if handle < 0 {
        return -1;
    }
    let state = unsafe { &*(host as *const HostState) };
    let dbus = unsafe { &mut *state.dbus };
    dbus.unbind_method(DbusBindingId::from(handle as usize));
    0
}

/// # Safety
/// `host` as above; `interface`/`member` may each be null (§4.G "may each
/// be null to match any value of that field").
pub(super) unsafe extern "C" fn host_bind_dbus_signal(
    host: *mut c_void,
    interface: *const c_char,
    member: *const c_char,
    callback: CDbusSignalCallback,
    user_data: *mut c_void,
) -> i64 {
    let state = unsafe { &*(host as *const HostState) };
    let interface = unsafe { c_str_opt(interface) }.map(str::to_string);
    let member = unsafe { c_str_opt(member) }.map(str::to_string);
    let dbus = unsafe { &mut *state.dbus };
    let id = dbus.bind_signal(interface, member, state.current_plugin(), callback, user_data as usize);
    id.index() as i64
}

/// # Safety
/// Same contract as [`host_create_timer`].
pub(super) unsafe extern "C" fn host_unbind_dbus_signal(host: *mut c_void, handle: i64) -> i32 {
    if handle < 0 {
        return -1;
    }
    let state = unsafe { &*(host as *const HostState) };
    let dbus = unsafe { &mut *state.dbus };
    dbus.unbind_signal(DbusBindingId::from(handle as usize));
    0
}

/// # Safety
/// `host` as above; `object`/`interface`/`member` must be valid
/// NUL-terminated strings; `body_ptr` must be valid for `body_len` bytes
/// (or null with a zero length).
///
/// `DbusProxy::emit_raw_signal` is `async` and this trampoline runs
/// synchronously inside a plugin's handler call, so the signal is queued
/// here and actually sent on the next `reconcile()` tick.
pub(super) unsafe extern "C" fn host_emit_dbus_signal(
    host: *mut c_void,
    object: *const c_char,
    interface: *const c_char,
    member: *const c_char,
    body_ptr: *const u8,
    body_len: usize,
) -> i32 {
    let state = unsafe { &*(host as *const HostState) };
    let object = unsafe { c_str_or_empty(object) };
    let interface = unsafe { c_str_or_empty(interface) };
    let member = unsafe { c_str_or_empty(member) };
    let dbus = unsafe { &mut *state.dbus };
    if !dbus.interface_member_is_known(object, interface, member) {
        state.logger.log(
            Priority::Warning,
            "plugins/api.rs",
            "host_emit_dbus_signal",
            format_args!("plugin tried to emit unregistered signal {interface}.{member}"),
        );
        return -1;
    }
    let body = if body_ptr.is_null() {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(body_ptr, body_len) }.to_vec()
    };
    dbus.queue_signal(object.to_string(), interface.to_string(), member.to_string(), body);
    0
}
