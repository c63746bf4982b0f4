//! Startup sequencing and the single `tokio::select!` loop body that ties
//! every component (§4.A–§4.H) together. This is the one module that holds
//! the bus, plugin manager, socket server, D-Bus proxy, and watchdog relay
//! as collaborators rather than hidden globals (§9 "Global mutable state").

use std::cell::Cell;
use std::path::PathBuf;
use std::time::Instant;

use dsme_core::abi::{CEndpoint, CENDPOINT_KIND_CLIENT, CENDPOINT_KIND_CORE, CENDPOINT_KIND_PLUGIN};
use dsme_core::{ClientId, DeviceState, Endpoint, Message, PeerCredentials};
use dsme_wire::{decode_message, encode_parts, Frame, WireError};
use thiserror::Error;
use tokio::signal::unix::{signal, Signal, SignalKind};
use zbus::Message as DbusMessage;

use crate::bus::MessageBus;
use crate::cli::Cli;
use crate::dbus::{dbus_sender_cendpoint, CoreReply, CoreRequest, DbusEvent, DbusProxy, RECONNECT_POLL_INTERVAL};
use crate::logger::{Logger, DEFAULT_RING_CAPACITY};
use crate::mainloop::{ExitReason, MainLoop, TimerService};
use crate::plugins::PluginManager;
use crate::registry;
use crate::socket::{ProtocolError, SocketEvent, SocketServer};
use crate::watchdog::Watchdog;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Logger(#[from] crate::logger::LoggerError),

    #[error(transparent)]
    Socket(#[from] ProtocolError),

    #[error(transparent)]
    Plugin(#[from] crate::plugins::PluginError),

    #[error("failed to read plugin registry at {path:?}: {source}")]
    Registry { path: PathBuf, source: std::io::Error },

    #[error("failed to install signal handler: {0}")]
    Signal(std::io::Error),
}

/// Uids allowed to invoke privileged D-Bus methods in addition to uid 0
/// (§4.G). The concrete allow-list is policy external to this daemon (§1
/// "deliberately out of scope"); this stays empty so "root only" is the
/// default until an operator-owned plugin extends it.
const PRIVILEGED_UIDS: &[u32] = &[];

/// Owns every long-lived collaborator and runs the cooperative loop that
/// polls them. `main_loop` and `bus` are boxed so the raw pointers handed
/// to `plugins` (which plugin callbacks dereference for the lifetime of
/// the daemon) stay valid even though `Daemon` itself may move.
pub struct Daemon {
    main_loop: Box<MainLoop>,
    bus: Box<MessageBus>,
    dbus: Box<DbusProxy>,
    plugins: Box<PluginManager>,
    socket: SocketServer,
    watchdog: Watchdog,
    logger: Logger,
    device_state: Cell<DeviceState>,
    sigterm: Signal,
    sigint: Signal,
}

/// Runs startup exactly as §4.E "init(names)" describes: loads every
/// enumerated plugin in order, aborting the whole sequence on the first
/// failure, after the logger and sockets are ready to receive them.
pub async fn startup(cli: Cli) -> Result<Daemon, LifecycleError> {
    let logger = Logger::open(cli.logging_method(), cli.verbosity, DEFAULT_RING_CAPACITY)?;
    for pattern in &cli.include {
        logger.include(pattern);
    }
    for pattern in &cli.exclude {
        logger.exclude(pattern);
    }

    let mut main_loop = Box::new(MainLoop::new());
    let mut bus = Box::new(MessageBus::new());
    let mut dbus = Box::new(DbusProxy::new());
    let timers_ptr: *mut TimerService = main_loop.timers();
    let bus_ptr: *mut MessageBus = &mut *bus;
    let dbus_ptr: *mut DbusProxy = &mut *dbus;
    let mut plugins = PluginManager::new(timers_ptr, bus_ptr, dbus_ptr, logger.clone());

    let modules_conf = crate::env::modules_conf_path();
    let config_file = modules_conf.exists().then_some(modules_conf.as_path());
    let startup_paths = registry::resolve_startup_plugins(&cli.plugins, config_file)
        .map_err(|source| LifecycleError::Registry { path: modules_conf.clone(), source })?;

    for path in &startup_paths {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        plugins.load(path, name)?;
    }

    let socket_path = crate::env::socket_path();
    let socket = SocketServer::bind(&socket_path)?;

    let sigterm = signal(SignalKind::terminate()).map_err(LifecycleError::Signal)?;
    let sigint = signal(SignalKind::interrupt()).map_err(LifecycleError::Signal)?;

    if cli.signal_parent {
        let _ = nix::sys::signal::kill(nix::unistd::getppid(), nix::sys::signal::Signal::SIGUSR1);
    }

    Ok(Daemon {
        main_loop,
        bus,
        dbus,
        plugins,
        socket,
        // Running under `--valgrind` is a debugging aid for attaching a
        // slow instrumented process; a supervisor enforcing heartbeat
        // timing against that process would just be noise.
        watchdog: Watchdog::new(!cli.valgrind),
        logger,
        device_state: Cell::new(DeviceState::NotSet),
        sigterm,
        sigint,
    })
}

impl Daemon {
    /// Drives the cooperative loop until `quit()` has been requested by any
    /// source, then returns the highest exit code ever set (§4.B).
    pub async fn run(mut self) -> i32 {
        self.main_loop.mark_running();
        let mut reconnect = tokio::time::interval(RECONNECT_POLL_INTERVAL);
        reconnect.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if self.main_loop.quit_flag().requested().is_some() {
                break;
            }

            let deadline = self.main_loop.timers().next_deadline();
            let sleep = match deadline {
                Some(instant) => tokio::time::sleep_until(instant.into()),
                None => tokio::time::sleep(std::time::Duration::from_secs(3600)),
            };
            tokio::pin!(sleep);

            tokio::select! {
                _ = &mut sleep, if deadline.is_some() => {
                    self.fire_expired_timers();
                }
                _ = self.sigterm.recv() => {
                    self.main_loop.quit(0, ExitReason::Requested);
                }
                _ = self.sigint.recv() => {
                    self.main_loop.quit(0, ExitReason::Requested);
                }
                event = self.socket.next_event() => {
                    self.handle_socket_event(event).await;
                }
                ping = self.watchdog.next_ping(), if self.watchdog.enabled() => {
                    self.handle_watchdog_ping(ping).await;
                }
                event = self.dbus.next_event(), if self.dbus.is_connected() => {
                    if let Some(event) = event {
                        self.handle_dbus_event(event).await;
                    }
                }
                _ = reconnect.tick() => {
                    if self.dbus.is_connected() {
                        // §4.G "On connect, previously requested well-known
                        // names are acquired... releases the well-known
                        // name if the service becomes empty": reconciled on
                        // the same cadence so plugin binds/unbinds made
                        // since the last tick take effect.
                        self.dbus.reconcile().await;
                    } else if self.dbus.try_connect().await.is_ok() {
                        self.dbus.reconcile().await;
                        self.dispatch(Endpoint::Core, Message::DbusConnected).await;
                    }
                }
            }
        }

        self.main_loop.mark_stopped();
        self.logger.close();
        self.main_loop.exit_code()
    }

    /// §4.C "Callback return value ≠ 0 re-arms a repeating timer; return 0
    /// destroys it": `TimerService::expired` only collects due timers, it
    /// never prejudges their fate, so the actual rearm/cancel decision is
    /// made here from the callback's own return value.
    fn fire_expired_timers(&mut self) {
        let now = Instant::now();
        let fired = self.main_loop.timers().expired(now);
        for (id, owner) in fired {
            let keep_running = self.plugins.fire_timer(id, owner);
            if keep_running {
                self.main_loop.timers().rearm(id, now);
            } else {
                let _ = self.main_loop.timers().cancel(id);
            }
        }
    }

    async fn handle_watchdog_ping(&mut self, ping: std::io::Result<()>) {
        match ping {
            Ok(()) => {
                if self.watchdog.pong().await.is_err() {
                    self.main_loop.quit(1, ExitReason::WatchdogFailure);
                    return;
                }
                self.dispatch(Endpoint::Core, Message::Heartbeat).await;
            }
            Err(_) => {
                self.watchdog.on_failure(self.main_loop.quit_flag());
                self.main_loop.quit(1, ExitReason::WatchdogFailure);
            }
        }
    }

    async fn handle_socket_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Accepted(_id) => {}
            SocketEvent::Idle => {}
            SocketEvent::AcceptFailed(err) => {
                tracing::warn!(%err, "failed to accept socket connection");
            }
            SocketEvent::Frame(id, Ok(frame)) => {
                self.handle_client_frame(id, frame).await;
            }
            SocketEvent::Frame(id, Err(err)) => {
                self.reject_client(id, err);
            }
        }
    }

    fn reject_client(&mut self, id: ClientId, err: WireError) {
        tracing::warn!(client = %id, %err, "closing client after protocol error");
        self.socket.disconnect(id);
    }

    async fn handle_client_frame(&mut self, id: ClientId, frame: Frame) {
        let mut msg = match decode_message(frame.type_id, &frame.payload) {
            Ok(msg) => msg,
            Err(err) => return self.reject_client(id, err),
        };

        // Old-client compatibility kludge (§4.F, §9 open question): a
        // client that should send PONG but sends PING instead gets
        // corrected before fan-out rather than dropped.
        if matches!(msg, Message::Ping) {
            msg = Message::Pong;
        }

        if self.apply_logging_control(&msg) {
            return;
        }
        if matches!(msg, Message::Close) {
            self.socket.disconnect(id);
            return;
        }

        let credentials = self.socket.credentials(id).unwrap_or(PeerCredentials::UNKNOWN);
        self.dispatch(Endpoint::Client(id, credentials), msg.clone()).await;

        // §4.F "from-socket broadcast": also fan out to every other
        // connected client, suppressing the source.
        let (type_id, body, extra) = encode_parts(&msg);
        self.socket.broadcast_except(id, type_id, &body, extra.as_deref()).await;
    }

    fn apply_logging_control(&self, msg: &Message) -> bool {
        match msg {
            Message::SetLoggingVerbosity { verbosity } => {
                self.logger.set_verbosity(*verbosity);
                true
            }
            Message::AddLoggingInclude { pattern } => {
                self.logger.include(pattern);
                true
            }
            Message::AddLoggingExclude { pattern } => {
                self.logger.exclude(pattern);
                true
            }
            Message::UseLoggingDefaults => {
                self.logger.clear_rules();
                true
            }
            _ => false,
        }
    }

    /// Dispatches one message to every plugin handler registered for its
    /// type, attributing it to `sender`, then opportunistically mirrors the
    /// handful of indication messages onto their D-Bus signal if connected.
    async fn dispatch(&mut self, sender: Endpoint, msg: Message) {
        if let Message::StateChangeInd { state } = &msg {
            self.device_state.set(*state);
        }

        let cendpoint = to_cendpoint(sender);
        let (type_id, body, extra) = encode_parts(&msg);
        self.plugins.dispatch(cendpoint, type_id, &body, extra.as_deref());

        if self.dbus.is_connected() {
            let _ = match &msg {
                Message::StateChangeInd { state } => self.dbus.state_change_ind(*state).await,
                Message::SaveUnsavedDataInd => self.dbus.save_unsaved_data_ind().await,
                Message::BatteryEmptyInd => self.dbus.battery_empty_ind().await,
                Message::ThermalShutdownInd => self.dbus.thermal_shutdown_ind().await,
                Message::ShutdownInd => self.dbus.shutdown_ind().await,
                Message::StateReqDeniedInd { action, reason } => {
                    self.dbus.state_req_denied_ind(action, reason).await
                }
                _ => Ok(()),
            };
        }
    }

    /// Drives one classified D-Bus event (§4.G "Dispatch"): introspection
    /// and `org.freedesktop.DBus.Peer` are answered directly, the six fixed
    /// request methods go through [`Self::handle_core_request`], a bound
    /// plugin method is privilege-checked against `binding.privileged` and
    /// invoked under its owner's context, and a matched signal is fanned
    /// out to every binding that matches it.
    async fn handle_dbus_event(&mut self, event: DbusEvent) {
        match event {
            DbusEvent::Introspect { reply_to, object } => {
                let xml = self.dbus.introspect_xml(&object);
                let _ = self.dbus.reply(&reply_to, xml).await;
            }
            DbusEvent::Peer { reply_to, member } => match member.as_str() {
                "Ping" => {
                    let _ = self.dbus.reply(&reply_to, ()).await;
                }
                "GetMachineId" => {
                    let _ = self.dbus.reply(&reply_to, machine_id()).await;
                }
                _ => {
                    let _ = self
                        .dbus
                        .reply_error(&reply_to, "org.freedesktop.DBus.Error.UnknownMethod", "no such method")
                        .await;
                }
            },
            DbusEvent::CoreRequest { reply_to, request, caller_uid } => {
                self.handle_core_request(reply_to, request, caller_uid).await;
            }
            DbusEvent::PluginMethod { reply_to, id: _, binding, caller_uid, args } => {
                if binding.privileged {
                    let creds = PeerCredentials { pid: 0, uid: caller_uid.unwrap_or(u32::MAX), gid: 0 };
                    if !creds.is_privileged(PRIVILEGED_UIDS) {
                        let _ = self
                            .dbus
                            .reply_error(&reply_to, "org.freedesktop.DBus.Error.AccessDenied", "caller is not privileged")
                            .await;
                        return;
                    }
                }
                let sender = dbus_sender_cendpoint(caller_uid);
                let (status, reply_body) = self.plugins.fire_dbus_method(&binding, sender, &args);
                if status == 0 {
                    let _ = self.dbus.reply(&reply_to, reply_body).await;
                } else {
                    let _ = self.dbus.reply_error(&reply_to, "org.freedesktop.DBus.Error.Failed", "plugin method failed").await;
                }
            }
            DbusEvent::UnknownMethod { reply_to } => {
                let _ = self.dbus.reply_error(&reply_to, "org.freedesktop.DBus.Error.UnknownMethod", "no such method").await;
            }
            DbusEvent::Signal { interface, member, args } => {
                let sender = dbus_sender_cendpoint(None);
                for binding in self.dbus.signals_matching(&interface, &member) {
                    self.plugins.fire_dbus_signal(&binding, sender, &args);
                }
            }
            DbusEvent::BusDisconnected => {
                // §4.G: "the proxy creates a marker file and requests a reboot".
                if let Err(source) = std::fs::write(crate::env::DBUS_FAILED_MARKER_PATH, b"") {
                    tracing::warn!(%source, "failed to write dbus-failed marker file");
                }
                self.dispatch(Endpoint::Core, Message::RebootReq).await;
            }
        }
    }

    /// The six fixed `com.nokia.dsme.request` methods (§6); `req_powerup`,
    /// `req_reboot`, `req_shutdown`, and `inhibit_shutdown` are privileged,
    /// `get_version`/`get_state` are open to anyone (§4.G).
    async fn handle_core_request(&mut self, reply_to: DbusMessage, request: CoreRequest, caller_uid: Option<u32>) {
        let privileged = matches!(
            request,
            CoreRequest::ReqPowerup | CoreRequest::ReqReboot | CoreRequest::ReqShutdown | CoreRequest::InhibitShutdown { .. }
        );
        if privileged {
            let creds = PeerCredentials { pid: 0, uid: caller_uid.unwrap_or(u32::MAX), gid: 0 };
            if !creds.is_privileged(PRIVILEGED_UIDS) {
                let _ = self
                    .dbus
                    .reply_error(&reply_to, "org.freedesktop.DBus.Error.AccessDenied", "caller is not privileged")
                    .await;
                return;
            }
        }

        let reply = match request {
            CoreRequest::GetVersion => CoreReply::Version(env!("CARGO_PKG_VERSION").to_string()),
            CoreRequest::GetState => CoreReply::State(self.device_state.get().as_str().to_string()),
            CoreRequest::ReqPowerup => {
                self.dispatch(Endpoint::Core, Message::PowerupReq).await;
                CoreReply::Ack
            }
            CoreRequest::ReqReboot => {
                self.dispatch(Endpoint::Core, Message::RebootReq).await;
                CoreReply::Ack
            }
            CoreRequest::ReqShutdown => {
                self.dispatch(Endpoint::Core, Message::ShutdownReq).await;
                CoreReply::Ack
            }
            CoreRequest::InhibitShutdown { inhibit } => {
                self.dispatch(Endpoint::Core, Message::InhibitShutdown { inhibit }).await;
                CoreReply::Ack
            }
        };
        let _ = match reply {
            CoreReply::Version(v) => self.dbus.reply(&reply_to, v).await,
            CoreReply::State(s) => self.dbus.reply(&reply_to, s).await,
            CoreReply::Ack => self.dbus.reply(&reply_to, ()).await,
        };
    }
}

/// `GetMachineId` (§4.G's standard `Peer` interface): reads the host's
/// `/etc/machine-id`, falling back to a fixed all-zero UUID when it's
/// unreadable (a container or a machine that hasn't initialized one yet).
fn machine_id() -> String {
    std::fs::read_to_string("/etc/machine-id")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "00000000000000000000000000000000".to_string())
}

fn to_cendpoint(sender: Endpoint) -> CEndpoint {
    match sender {
        Endpoint::Core => CEndpoint { kind: CENDPOINT_KIND_CORE, index: 0, pid: 0, uid: 0, gid: 0 },
        Endpoint::Plugin(id) => {
            CEndpoint { kind: CENDPOINT_KIND_PLUGIN, index: id.index(), pid: 0, uid: 0, gid: 0 }
        }
        Endpoint::Client(id, creds) => {
            CEndpoint { kind: CENDPOINT_KIND_CLIENT, index: id.index(), pid: creds.pid, uid: creds.uid, gid: creds.gid }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsme_core::PluginId;

    #[test]
    fn core_endpoint_has_no_credentials() {
        let c = to_cendpoint(Endpoint::Core);
        assert_eq!(c.kind, CENDPOINT_KIND_CORE);
    }

    #[test]
    fn plugin_endpoint_carries_its_index() {
        let c = to_cendpoint(Endpoint::Plugin(PluginId::from(3)));
        assert_eq!(c.kind, CENDPOINT_KIND_PLUGIN);
        assert_eq!(c.index, 3);
    }

    #[test]
    fn client_endpoint_carries_peer_credentials() {
        let creds = PeerCredentials { pid: 42, uid: 1000, gid: 1000 };
        let c = to_cendpoint(Endpoint::Client(ClientId::from(1), creds));
        assert_eq!(c.kind, CENDPOINT_KIND_CLIENT);
        assert_eq!(c.uid, 1000);
        assert_eq!(c.pid, 42);
    }
}
