//! A minimal `cdylib` plugin exercising the `dsmed` plugin ABI end to end:
//! it registers a handler for `HEARTBEAT` and arms a repeating timer that
//! broadcasts a plugin-private message every tick.
//!
//! The plugin is deliberately stateless beyond the one API handle and timer
//! id it needs: `dsmed` never loads two copies of the same library into one
//! process, so module-level statics are safe here the same way they are in
//! any single-instance C plugin.

use std::cell::UnsafeCell;
use std::ffi::{c_void, CString};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dsme_core::abi::{CEndpoint, CHandlerEntry, CHandlerTable, CPluginApi};

/// Plugin-private message type, outside [`dsme_core::BuiltinCatalog`] —
/// the host carries it through as `Message::Raw` (§9 "open-ended registry").
const HEARTBEAT_TICK_TYPE: u32 = 0x4845_0001;

/// Interval between the plugin's own timer ticks.
const TICK_INTERVAL_MS: u32 = 5_000;

struct ApiCell(UnsafeCell<Option<CPluginApi>>);

// SAFETY: `dsmed` only ever calls into this plugin from the single thread
// that owns its main loop, so there is never concurrent access to the cell
// despite the raw pointers and function pointers inside `CPluginApi`.
unsafe impl Sync for ApiCell {}

static API: ApiCell = ApiCell(UnsafeCell::new(None));
static TIMER_HANDLE: AtomicI64 = AtomicI64::new(-1);
static HEARTBEATS_SEEN: AtomicU64 = AtomicU64::new(0);
static TICKS_SENT: AtomicU64 = AtomicU64::new(0);

fn api() -> Option<CPluginApi> {
    // SAFETY: only ever written once, from `dsme_plugin_init`, before any
    // other entry point can be called.
    unsafe { *API.0.get() }
}

fn log(priority: u8, text: &str) {
    let Some(api) = api() else { return };
    let Ok(file) = CString::new("demo-heartbeat-plugin") else { return };
    let Ok(func) = CString::new("tick") else { return };
    let Ok(text) = CString::new(text) else { return };
    // SAFETY: `api.log` was supplied by the host and remains valid for the
    // lifetime of this plugin; all three C strings outlive this call.
    unsafe { (api.log)(api.host, priority, file.as_ptr(), func.as_ptr(), text.as_ptr()) };
}

unsafe extern "C" fn on_heartbeat(
    _sender: CEndpoint,
    _body_ptr: *const u8,
    _body_len: usize,
    _extra_ptr: *const u8,
    _extra_len: usize,
) {
    let seen = HEARTBEATS_SEEN.fetch_add(1, Ordering::Relaxed) + 1;
    log(6, &format!("heartbeat #{seen} observed"));
}

unsafe extern "C" fn on_tick(_user_data: *mut c_void) -> i32 {
    let Some(api) = api() else { return 0 };
    let sent = TICKS_SENT.fetch_add(1, Ordering::Relaxed) + 1;
    let body = sent.to_ne_bytes();
    // SAFETY: `api.broadcast` was supplied by the host; `body` is valid for
    // the duration of this call.
    unsafe {
        (api.broadcast)(api.host, HEARTBEAT_TICK_TYPE, body.as_ptr(), body.len(), std::ptr::null(), 0);
    }
    log(7, &format!("tick #{sent} sent"));
    1
}

static HANDLERS: [CHandlerEntry; 1] =
    [CHandlerEntry { type_id: dsme_core::type_id::HEARTBEAT, expected_body_size: 0, handler: on_heartbeat }];

/// `int dsme_plugin_init(const CPluginApi *api)`.
///
/// # Safety
/// `api` must point to a live, fully-initialized `CPluginApi` for the
/// duration of this call, per the host-side ABI contract.
#[no_mangle]
pub unsafe extern "C" fn dsme_plugin_init(api: *const CPluginApi) -> i32 {
    if api.is_null() {
        return -1;
    }
    // SAFETY: caller guarantees `api` is valid for a single read; the
    // resulting value is moved into `API` and never read back through the
    // original pointer.
    let api_value = unsafe { std::ptr::read(api) };
    // SAFETY: single-threaded init, see `ApiCell`'s SAFETY comment.
    unsafe { *API.0.get() = Some(api_value) };

    // SAFETY: `create_timer` was supplied by the host and is valid now that
    // `API` has been populated above.
    let handle = unsafe {
        (api_value.create_timer)(api_value.host, TICK_INTERVAL_MS, on_tick, std::ptr::null_mut())
    };
    if handle < 0 {
        return -1;
    }
    TIMER_HANDLE.store(handle, Ordering::Relaxed);
    0
}

/// `void dsme_plugin_fini(void)`.
#[no_mangle]
pub extern "C" fn dsme_plugin_fini() {
    let handle = TIMER_HANDLE.swap(-1, Ordering::Relaxed);
    if handle >= 0 {
        if let Some(api) = api() {
            // SAFETY: `destroy_timer` was supplied by the host; `handle`
            // was returned by this plugin's own earlier `create_timer` call.
            unsafe { (api.destroy_timer)(api.host, handle) };
        }
    }
    // SAFETY: single-threaded teardown, see `ApiCell`'s SAFETY comment.
    unsafe { *API.0.get() = None };
}

/// `CHandlerTable dsme_plugin_message_handlers(void)`.
#[no_mangle]
pub extern "C" fn dsme_plugin_message_handlers() -> CHandlerTable {
    CHandlerTable { entries: HANDLERS.as_ptr(), count: HANDLERS.len() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_table_exposes_exactly_the_heartbeat_entry() {
        let table = dsme_plugin_message_handlers();
        assert_eq!(table.count, 1);
        // SAFETY: `table.entries` points at the static `HANDLERS` array for
        // the duration of this test.
        let entries = unsafe { std::slice::from_raw_parts(table.entries, table.count) };
        assert_eq!(entries[0].type_id, dsme_core::type_id::HEARTBEAT);
    }

    #[test]
    fn init_rejects_a_null_api_pointer() {
        // SAFETY: explicitly testing the null-pointer guard.
        let rc = unsafe { dsme_plugin_init(std::ptr::null()) };
        assert_eq!(rc, -1);
    }
}
