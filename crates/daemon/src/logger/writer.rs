//! Background writer thread: wakes on an eventfd, drains the ring buffer,
//! and renders entries to the selected backend (§4.A).

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::ring::{LogSlot, RingBuffer};
use super::{LoggerError, Method};

enum Backend {
    None,
    Stderr,
    Syslog,
    File(File),
}

impl Backend {
    fn open(method: Method) -> Result<Self, LoggerError> {
        Ok(match method {
            Method::None => Backend::None,
            Method::Stderr => Backend::Stderr,
            Method::Syslog => {
                // SAFETY: `openlog` with a static ident and no prior call on
                // this thread; `libc::syslog` is reentrant-safe to call
                // repeatedly afterwards.
                unsafe {
                    libc::openlog(c"dsme".as_ptr(), libc::LOG_PID | libc::LOG_CONS, libc::LOG_DAEMON);
                }
                Backend::Syslog
            }
            Method::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(|source| LoggerError::FileOpen { path: path.clone(), source })?;
                Backend::File(file)
            }
        })
    }

    fn emit(&mut self, slot: &LogSlot) {
        match self {
            Backend::None => {}
            Backend::Stderr => {
                let _ = writeln!(
                    std::io::stderr(),
                    "{} {}:{}: {}",
                    slot.priority.as_str(),
                    slot.file(),
                    slot.func(),
                    slot.text()
                );
            }
            Backend::Syslog => {
                let line = format!("{}:{}: {}", slot.file(), slot.func(), slot.text());
                let level = syslog_level(slot.priority);
                if let Ok(c_line) = std::ffi::CString::new(line) {
                    // SAFETY: `c_line` is a valid NUL-terminated buffer for
                    // the duration of this call.
                    unsafe {
                        libc::syslog(level, c"%s".as_ptr(), c_line.as_ptr());
                    }
                }
            }
            Backend::File(file) => {
                let _ = writeln!(
                    file,
                    "{} {}:{}: {}",
                    slot.priority.as_str(),
                    slot.file(),
                    slot.func(),
                    slot.text()
                );
            }
        }
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        if matches!(self, Backend::Syslog) {
            // SAFETY: balances the `openlog` call in `Backend::open`.
            unsafe {
                libc::closelog();
            }
        }
    }
}

fn syslog_level(priority: super::Priority) -> i32 {
    use super::Priority::*;
    match priority {
        Emerg => libc::LOG_EMERG,
        Alert => libc::LOG_ALERT,
        Crit => libc::LOG_CRIT,
        Err => libc::LOG_ERR,
        Warning => libc::LOG_WARNING,
        Notice => libc::LOG_NOTICE,
        Info => libc::LOG_INFO,
        Debug => libc::LOG_DEBUG,
    }
}

fn create_eventfd() -> std::io::Result<RawFd> {
    // SAFETY: `eventfd(2)` with no shared memory; the returned fd is owned
    // exclusively by this call site. Deliberately blocking: the writer
    // thread parks in `read` until the producer side notifies it.
    let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(fd)
}

pub struct Writer {
    eventfd: RawFd,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    ring: Arc<RingBuffer>,
    backend: Arc<parking_lot::Mutex<Backend>>,
}

impl Writer {
    pub fn spawn(method: Method, ring: Arc<RingBuffer>) -> Result<Self, LoggerError> {
        let eventfd = create_eventfd().map_err(LoggerError::EventFd)?;
        let backend = Arc::new(parking_lot::Mutex::new(Backend::open(method)?));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_ring = ring.clone();
        let thread_backend = backend.clone();
        let thread_shutdown = shutdown.clone();
        let handle = std::thread::Builder::new()
            .name("dsme-logger".into())
            .spawn(move || writer_loop(eventfd, thread_ring, thread_backend, thread_shutdown))
            .map_err(LoggerError::ThreadSpawn)?;

        Ok(Writer { eventfd, shutdown, handle: Some(handle), ring, backend })
    }

    /// Wake the writer thread. Producer-side; returns an error if the
    /// eventfd write fails (buffer full counts as success, it's already
    /// armed).
    pub fn notify(&self) -> std::io::Result<()> {
        let value: u64 = 1;
        // SAFETY: `self.eventfd` is valid for the lifetime of `self`.
        let ret = unsafe {
            libc::write(self.eventfd, (&value as *const u64).cast(), std::mem::size_of::<u64>())
        };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    /// Write one entry directly from the calling thread, used only when
    /// the writer thread could not be reached (§4.A failure semantics).
    pub fn emit_sync(&self, slot: &LogSlot) {
        self.backend.lock().emit(slot);
    }

    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.notify();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        // Flush anything the writer thread published right before exiting
        // but didn't get a chance to drain, from this (the main) thread.
        let backend = self.backend.clone();
        self.ring.drain(|slot| backend.lock().emit(slot));
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        // SAFETY: closing a fd we exclusively own.
        unsafe {
            libc::close(self.eventfd);
        }
    }
}

fn writer_loop(
    eventfd: RawFd,
    ring: Arc<RingBuffer>,
    backend: Arc<parking_lot::Mutex<Backend>>,
    shutdown: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 8];
    loop {
        // SAFETY: `eventfd` stays valid for the duration of this thread;
        // `buf` is sized for the 8-byte eventfd counter.
        let ret = unsafe { libc::read(eventfd, buf.as_mut_ptr().cast(), buf.len()) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                std::thread::yield_now();
            }
        }
        ring.drain(|slot| backend.lock().emit(slot));
        if shutdown.load(Ordering::SeqCst) {
            ring.drain(|slot| backend.lock().emit(slot));
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_backend_opens_without_error() {
        let ring = Arc::new(RingBuffer::new(8));
        let writer = Writer::spawn(Method::Stderr, ring).unwrap();
        writer.shutdown();
    }

    #[test]
    fn file_backend_creates_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dsme.log");
        let ring = Arc::new(RingBuffer::new(8));
        assert!(ring.try_push(LogSlot::new(super::super::Priority::Info, "a.rs", "f", "hello")));
        let writer = Writer::spawn(Method::File(path.clone()), ring).unwrap();
        writer.notify().unwrap();
        writer.shutdown();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("hello"));
    }
}
