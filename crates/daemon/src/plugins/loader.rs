//! `dlopen`-based resolution of a plugin's three required symbols (§4.D).

use dsme_core::abi::{CHandlerEntry, CHandlersFn, CInitFn, CPluginApi, FINI_SYMBOL, HANDLERS_SYMBOL, INIT_SYMBOL};
use libloading::{Library, Symbol};

use super::PluginError;

/// A `dlopen`ed plugin with its three resolved entry points. The handler
/// table is copied out of the plugin's `'static` array immediately (the
/// pointer/length pair `dsme_plugin_message_handlers` returns is only
/// guaranteed valid while the library stays loaded, which it does for as
/// long as this struct lives).
pub struct LoadedPlugin {
    pub library: Library,
    pub handlers: Vec<CHandlerEntry>,
    fini: unsafe extern "C" fn(),
}

impl LoadedPlugin {
    /// Opens `path`, calls `dsme_plugin_init(api)`, and copies out the
    /// handler table. On any failure the library is dropped (and therefore
    /// `dlclose`d) before returning.
    pub fn load(path: &std::path::Path, api: &CPluginApi) -> Result<Self, PluginError> {
        // SAFETY: plugins are operator-provided `cdylib`s named on the
        // command line (§6 `-p`); loading arbitrary code is the feature.
        let library = unsafe { Library::new(path) }
            .map_err(|source| PluginError::DlOpen { path: path.to_path_buf(), source })?;

        // SAFETY: symbol types match the `extern "C"` signatures the
        // plugin is documented (§4.D) to export under these exact names.
        let init: Symbol<CInitFn> = unsafe { library.get(INIT_SYMBOL) }
            .map_err(|_| PluginError::MissingSymbol { path: path.to_path_buf(), symbol: "dsme_plugin_init" })?;
        let handlers_fn: Symbol<CHandlersFn> = unsafe { library.get(HANDLERS_SYMBOL) }
            .map_err(|_| PluginError::MissingSymbol {
                path: path.to_path_buf(),
                symbol: "dsme_plugin_message_handlers",
            })?;
        let fini: Symbol<unsafe extern "C" fn()> = unsafe { library.get(FINI_SYMBOL) }
            .map_err(|_| PluginError::MissingSymbol { path: path.to_path_buf(), symbol: "dsme_plugin_fini" })?;

        // SAFETY: `api` outlives this call; the plugin is documented to
        // treat it as call-scoped during `init` and may retain `api.host`
        // (but not `api` itself) for later calls.
        let rc = unsafe { init(api as *const CPluginApi) };
        if rc != 0 {
            return Err(PluginError::InitFailed { path: path.to_path_buf(), code: rc });
        }

        // SAFETY: the returned pointer/length describe a `'static` array
        // owned by the plugin; copying it out now is well-defined.
        let table = unsafe { handlers_fn() };
        let handlers = if table.entries.is_null() || table.count == 0 {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(table.entries, table.count) }.to_vec()
        };

        Ok(LoadedPlugin { library, handlers, fini: *fini })
    }

    pub fn call_fini(&self) {
        // SAFETY: resolved once at load time from a library that is still
        // loaded (we hold `self.library`).
        unsafe {
            (self.fini)();
        }
    }
}
