//! Named auto-reset turn tokens.
//!
//! A token is a POSIX named semaphore that only ever holds 0 or 1. Raising
//! it posts once; a waiter consumes the post, which resets the token. The
//! crate never raises a token that is already raised, so the count can be
//! read as a boolean "signalled" state.

use crate::error::{Error, Result};
use rustix::io::Errno;
use std::ffi::CString;
use std::io;
use std::ptr::NonNull;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn last_errno() -> Errno {
    Errno::from_raw_os_error(io::Error::last_os_error().raw_os_error().unwrap_or(0))
}

/// A named binary signal shared between processes.
pub struct TurnToken {
    sem: NonNull<libc::sem_t>,
    name: String,
    created: bool,
}

// SAFETY: a named semaphore handle may be used from any thread; the
// semaphore operations are themselves thread-safe.
unsafe impl Send for TurnToken {}

impl TurnToken {
    /// Create a new, unsignalled token.
    ///
    /// # Errors
    ///
    /// Returns `ResourceCreation` if the name is taken or the system limit
    /// on semaphores is reached.
    pub fn create(name: &str) -> Result<Self> {
        let c_name = Self::c_name(name)?;
        let mode: libc::c_uint = 0o600;
        let initial: libc::c_uint = 0;
        // SAFETY: c_name is NUL-terminated; O_CREAT takes mode and value.
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                mode,
                initial,
            )
        };
        let sem = Self::check(sem).map_err(|source| Error::ResourceCreation {
            what: format!("turn token {name}"),
            source,
        })?;

        tracing::debug!(name, "created turn token");
        Ok(Self {
            sem,
            name: name.to_string(),
            created: true,
        })
    }

    /// Open a token created by the other process.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it does not exist yet.
    pub fn open(name: &str) -> Result<Self> {
        let c_name = Self::c_name(name)?;
        // SAFETY: c_name is NUL-terminated.
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        let sem = Self::check(sem).map_err(|e| {
            if e == Errno::NOENT {
                Error::NotFound(format!("turn token {name}"))
            } else {
                Error::System(e)
            }
        })?;

        tracing::debug!(name, "opened turn token");
        Ok(Self {
            sem,
            name: name.to_string(),
            created: false,
        })
    }

    fn c_name(name: &str) -> Result<CString> {
        CString::new(name)
            .map_err(|_| Error::InvalidConfig(format!("token name {name:?} contains NUL")))
    }

    fn check(sem: *mut libc::sem_t) -> std::result::Result<NonNull<libc::sem_t>, Errno> {
        if sem == libc::SEM_FAILED {
            return Err(last_errno());
        }
        NonNull::new(sem).ok_or_else(last_errno)
    }

    /// Name of the token.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Result<i32> {
        let mut value: libc::c_int = 0;
        // SAFETY: sem is a valid open semaphore.
        if unsafe { libc::sem_getvalue(self.sem.as_ptr(), &mut value) } != 0 {
            return Err(Error::System(last_errno()));
        }
        Ok(value)
    }

    /// Whether the token is currently signalled.
    pub fn is_raised(&self) -> Result<bool> {
        Ok(self.value()? > 0)
    }

    /// Signal the token, waking one waiter.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolViolation` if the token is already signalled: the
    /// peer has not consumed the previous signal.
    pub fn raise(&self) -> Result<()> {
        if self.is_raised()? {
            tracing::error!(name = %self.name, "token raised twice");
            return Err(Error::ProtocolViolation(format!(
                "{} raised while already signalled",
                self.name
            )));
        }
        // SAFETY: sem is a valid open semaphore.
        if unsafe { libc::sem_post(self.sem.as_ptr()) } != 0 {
            return Err(Error::System(last_errno()));
        }
        Ok(())
    }

    /// Block until the token is signalled, then reset it.
    ///
    /// With a timeout, gives up with `Disconnected` once it elapses.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        match timeout {
            None => self.wait_forever(),
            Some(timeout) => self.wait_until(timeout),
        }
    }

    fn wait_forever(&self) -> Result<()> {
        loop {
            // SAFETY: sem is a valid open semaphore.
            if unsafe { libc::sem_wait(self.sem.as_ptr()) } == 0 {
                return Ok(());
            }
            match last_errno() {
                Errno::INTR => continue,
                e => return Err(Error::System(e)),
            }
        }
    }

    fn wait_until(&self, timeout: Duration) -> Result<()> {
        // sem_timedwait measures against CLOCK_REALTIME.
        let deadline = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            + timeout;
        // SAFETY: timespec is plain data; zero is a valid value.
        let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
        ts.tv_sec = deadline.as_secs() as libc::time_t;
        ts.tv_nsec = deadline.subsec_nanos() as _;

        loop {
            // SAFETY: sem is a valid open semaphore, ts is initialised.
            if unsafe { libc::sem_timedwait(self.sem.as_ptr(), &ts) } == 0 {
                return Ok(());
            }
            match last_errno() {
                Errno::INTR => continue,
                Errno::TIMEDOUT => {
                    tracing::warn!(name = %self.name, ?timeout, "peer did not signal in time");
                    return Err(Error::Disconnected { waited: timeout });
                }
                e => return Err(Error::System(e)),
            }
        }
    }

    /// Consume the signal if the token is raised, without blocking.
    ///
    /// Returns whether a signal was consumed.
    pub fn try_observe(&self) -> Result<bool> {
        loop {
            // SAFETY: sem is a valid open semaphore.
            if unsafe { libc::sem_trywait(self.sem.as_ptr()) } == 0 {
                return Ok(true);
            }
            match last_errno() {
                Errno::INTR => continue,
                Errno::AGAIN => return Ok(false),
                e => return Err(Error::System(e)),
            }
        }
    }
}

impl std::fmt::Debug for TurnToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnToken")
            .field("name", &self.name)
            .field("created", &self.created)
            .finish()
    }
}

impl Drop for TurnToken {
    fn drop(&mut self) {
        // SAFETY: sem came from sem_open and is closed exactly once.
        unsafe {
            libc::sem_close(self.sem.as_ptr());
        }
        if self.created {
            if let Ok(c_name) = CString::new(self.name.as_str()) {
                // SAFETY: c_name is NUL-terminated.
                if unsafe { libc::sem_unlink(c_name.as_ptr()) } != 0 {
                    tracing::warn!(
                        name = %self.name,
                        error = %last_errno(),
                        "failed to unlink turn token"
                    );
                }
            }
        }
    }
}
