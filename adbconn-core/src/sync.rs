//! eventfd-backed signalling primitives shared across threads.
//!
//! - [`WakeSignal`] interrupts the worker's `poll` from another thread.
//! - [`WriteGuard`] is a single-token lock on the debug socket. It lives
//!   in an eventfd rather than a `Mutex` because a duplicate of the
//!   descriptor is handed to the agent, which takes and returns the same
//!   token around its own writes.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::eventfd::{EfdFlags, EventFd};

use crate::error::AdbConnError;

/// Initial eventfd value: no wakeup pending.
const IDLE: u32 = 0;
/// Initial eventfd value: the single write token is available.
const UNLOCKED: u32 = 1;

// ── WakeSignal ───────────────────────────────────────────────────

pub struct WakeSignal {
    event: EventFd,
}

impl WakeSignal {
    /// Create an unsignalled wake channel.
    pub fn new() -> Result<Self, AdbConnError> {
        let event =
            EventFd::from_value_and_flags(IDLE, EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)?;
        Ok(Self { event })
    }

    pub fn notify(&self) -> Result<(), AdbConnError> {
        retry_eintr(|| self.event.write(1))?;
        Ok(())
    }

    /// Consume any pending signal without blocking.
    pub fn drain(&self) {
        match retry_eintr(|| self.event.read()) {
            Ok(_) | Err(Errno::EAGAIN) => {}
            Err(e) => tracing::debug!("wake channel drain failed: {e}"),
        }
    }

    /// Sleep for up to `timeout`, returning early with `true` if signalled.
    /// Timeouts beyond `u16::MAX` milliseconds are cut to that.
    pub fn wait(&self, timeout: Duration) -> Result<bool, AdbConnError> {
        let millis = timeout.as_millis().min(u16::MAX as u128) as u16;
        let mut fds = [PollFd::new(self.event.as_fd(), PollFlags::POLLIN)];
        let ready = retry_eintr(|| poll(&mut fds, PollTimeout::from(millis)))?;
        Ok(ready > 0)
    }
}

impl AsFd for WakeSignal {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.event.as_fd()
    }
}

// ── WriteGuard ───────────────────────────────────────────────────

pub struct WriteGuard {
    event: EventFd,
}

/// Holds the write token until dropped.
#[must_use = "the token is returned as soon as the lock is dropped"]
pub struct WriteGuardLock<'a> {
    guard: &'a WriteGuard,
    token: u64,
}

impl WriteGuard {
    /// Create an unlocked guard.
    pub fn new() -> Result<Self, AdbConnError> {
        let event = EventFd::from_value_and_flags(UNLOCKED, EfdFlags::EFD_CLOEXEC)?;
        Ok(Self { event })
    }

    /// Block until the token is available and take it.
    pub fn lock(&self) -> Result<WriteGuardLock<'_>, AdbConnError> {
        let token = retry_eintr(|| self.event.read())?;
        Ok(WriteGuardLock { guard: self, token })
    }

    /// A new descriptor for the same eventfd, for handing to the agent.
    pub fn duplicate(&self) -> Result<OwnedFd, AdbConnError> {
        Ok(self.event.as_fd().try_clone_to_owned()?)
    }
}

impl AsFd for WriteGuard {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.event.as_fd()
    }
}

impl Drop for WriteGuardLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = retry_eintr(|| self.guard.event.write(self.token)) {
            tracing::error!("failed to release write guard: {e}");
        }
    }
}

pub(crate) fn retry_eintr<T>(mut f: impl FnMut() -> nix::Result<T>) -> nix::Result<T> {
    loop {
        match f() {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    #[test]
    fn wait_times_out_without_signal() {
        let wake = WakeSignal::new().unwrap();
        let started = Instant::now();
        assert!(!wake.wait(Duration::from_millis(20)).unwrap());
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn notify_interrupts_wait_until_drained() {
        let wake = WakeSignal::new().unwrap();
        wake.notify().unwrap();
        assert!(wake.wait(Duration::from_secs(5)).unwrap());
        assert!(wake.wait(Duration::from_millis(1)).unwrap());

        wake.drain();
        assert!(!wake.wait(Duration::from_millis(1)).unwrap());
        // Draining an empty channel is harmless.
        wake.drain();
    }

    #[test]
    fn write_guard_excludes_other_threads() {
        let guard = Arc::new(WriteGuard::new().unwrap());
        let entered = Arc::new(AtomicBool::new(false));

        let lock = guard.lock().unwrap();
        let handle = {
            let guard = Arc::clone(&guard);
            let entered = Arc::clone(&entered);
            std::thread::spawn(move || {
                let _lock = guard.lock().unwrap();
                entered.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst));
        drop(lock);
        handle.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }

    #[test]
    fn duplicate_shares_the_token() {
        let guard = WriteGuard::new().unwrap();
        let mut shared = std::fs::File::from(guard.duplicate().unwrap());

        // Take the token through the duplicate, as the agent would.
        let mut token = [0u8; 8];
        shared.read_exact(&mut token).unwrap();
        assert_eq!(u64::from_ne_bytes(token), 1);
        shared.write_all(&token).unwrap();
        let _lock = guard.lock().unwrap();
    }
}
