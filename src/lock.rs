//! Advisory repository locking.
//!
//! A lock is a directory entry whose *content* is the owner identity
//! `<hostname>:<pid>`. On Unix the entry is a symlink, because symlink
//! creation is atomic together with its content even over network
//! filesystems; platforms without symlinks fall back to a plain file
//! created with `create_new`.
//!
//! Two lock names guard the repository: `wlock` (working copy) and `lock`
//! (store). They must be acquired in that order. A cooperating process that
//! finds the entry present reads the owner: a foreign host or a live local
//! pid means the lock is held; a dead local pid is a stale lock and is
//! broken under a `<name>.break` meta-lock so two breakers cannot race.
//!
//! Handles are re-entrant: acquiring an already-held handle bumps a
//! refcount and only the final release unlinks the entry. A handle can also
//! be lent to a subprocess: `prepare_inherit` hands out the owner string
//! (exported via `HX_<NAME>_OWNER`), the child adopts the on-disk entry as
//! its own, and the parent calls `reacquire` once the child is done.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use thiserror::Error;

/// Attempts at atomic creation before giving up on a vanishing lock file.
const CREATE_RETRIES: u32 = 5;

#[derive(Debug, Error)]
pub enum LockError {
    /// Another owner holds the lock.
    #[error("lock '{}' is held by {locker}", path.display())]
    Held { path: PathBuf, locker: String },

    /// The filesystem refused the lock operation.
    #[error("lock unavailable: {0}")]
    Unavailable(#[from] io::Error),

    /// The inheritance API was called out of order. A caller bug.
    #[error("lock inheritance contract violation: {0}")]
    Contract(&'static str),
}

/// An advisory lock held by one process to control access to a repository.
///
/// Non-cooperating processes can ignore the scheme and stomp all over the
/// repository, so don't do that.
pub struct Lock {
    path: PathBuf,
    name: String,
    held: u32,
    /// pid at acquisition time; release from any other pid is a no-op
    /// (we forked, and are not the parent).
    pid: u32,
    /// Owner string recorded on disk when this handle adopted a parent
    /// process's lock instead of creating its own entry.
    parent_owner: Option<String>,
    inherited: bool,
    releasefn: Option<Box<dyn Fn()>>,
    postrelease: Vec<Box<dyn FnOnce()>>,
}

impl Lock {
    /// Acquire the lock `name` inside `dir`.
    ///
    /// `timeout` semantics: `0` fails immediately when held, a negative
    /// value retries forever, and a positive value sleeps one second per
    /// retry for up to `timeout` attempts.
    pub fn acquire(dir: &Path, name: &str, timeout: i64) -> Result<Self, LockError> {
        let mut lock = Self {
            path: dir.join(name),
            name: name.to_string(),
            held: 0,
            pid: std::process::id(),
            parent_owner: None,
            inherited: false,
            releasefn: None,
            postrelease: Vec::new(),
        };

        let mut remaining = timeout;
        loop {
            match lock.try_lock() {
                Ok(()) => return Ok(lock),
                Err(LockError::Held { path, locker }) => {
                    if remaining == 0 {
                        return Err(LockError::Held { path, locker });
                    }
                    std::thread::sleep(Duration::from_secs(1));
                    if remaining > 0 {
                        remaining -= 1;
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Re-enter an already-held lock. The entry is unlinked only when
    /// `release` has been called once per acquisition.
    pub fn acquire_recursive(&mut self) {
        debug_assert!(self.held > 0);
        self.held += 1;
    }

    /// Register a callback to run on final release, before the entry is
    /// unlinked.
    pub fn set_releasefn(&mut self, f: Box<dyn Fn()>) {
        self.releasefn = Some(f);
    }

    /// Register a callback to run after the entry has been unlinked.
    pub fn add_postrelease(&mut self, f: Box<dyn FnOnce()>) {
        self.postrelease.push(f);
    }

    pub fn is_held(&self) -> bool {
        self.held > 0
    }

    /// Environment variable a child process reads to adopt this lock.
    pub fn inherit_env_var(name: &str) -> String {
        format!("HX_{}_OWNER", name.to_ascii_uppercase().replace('.', "_"))
    }

    fn try_lock(&mut self) -> Result<(), LockError> {
        if self.held > 0 {
            self.held += 1;
            return Ok(());
        }
        let owner = owner_string();
        let mut retry = CREATE_RETRIES;
        loop {
            match make_lock(&self.path, &owner) {
                Ok(()) => {
                    self.held = 1;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    // A parent process may have exported its ownership to us.
                    if let Ok(parent) = std::env::var(Self::inherit_env_var(&self.name)) {
                        if read_lock(&self.path)?.as_deref() == Some(parent.as_str()) {
                            self.held = 1;
                            self.parent_owner = Some(parent);
                            return Ok(());
                        }
                    }
                    match self.test_lock()? {
                        Some(locker) => {
                            return Err(LockError::Held {
                                path: self.path.clone(),
                                locker,
                            })
                        }
                        None => {
                            // stale entry was broken; retry creation
                            retry -= 1;
                            if retry == 0 {
                                return Err(LockError::Unavailable(e));
                            }
                        }
                    }
                }
                Err(e) => return Err(LockError::Unavailable(e)),
            }
        }
    }

    /// Return the owner if the on-disk lock is valid, else break it and
    /// return None.
    ///
    /// An owner that does not parse as `host:pid` cannot be probed, so it is
    /// reported as-is. Breaking happens under a `<name>.break` meta-lock:
    /// without it two processes could both observe a dead pid and one would
    /// unlink the other's freshly created lock.
    fn test_lock(&self) -> Result<Option<String>, LockError> {
        let locker = match read_lock(&self.path)? {
            Some(l) => l,
            // lock vanished between create and read; caller retries
            None => return Ok(None),
        };
        let Some((host, pid)) = locker.split_once(':') else {
            return Ok(Some(locker));
        };
        if host != local_hostname() {
            return Ok(Some(locker));
        }
        let Ok(pid) = pid.parse::<u32>() else {
            return Ok(Some(locker));
        };
        if pid_is_alive(pid) {
            return Ok(Some(locker));
        }

        let break_name = format!("{}.break", self.name);
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        match Lock::acquire(dir, &break_name, 0) {
            Ok(mut meta) => {
                let result = match std::fs::remove_file(&self.path) {
                    Ok(()) => Ok(None),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(LockError::Unavailable(e)),
                };
                meta.release();
                result
            }
            Err(_) => Ok(Some(locker)),
        }
    }

    /// Prepare for the lock to be inherited by a subprocess.
    ///
    /// Returns the owner string the child will recognize. Communicating it
    /// to the child is the caller's job, typically via the environment
    /// variable from `inherit_env_var`. The local `releasefn` runs but the
    /// on-disk entry stays in place until `reacquire` and a final release.
    pub fn prepare_inherit(&mut self) -> Result<String, LockError> {
        if self.held == 0 {
            return Err(LockError::Contract(
                "prepare_inherit can only be called while the lock is held",
            ));
        }
        if self.inherited {
            return Err(LockError::Contract(
                "prepare_inherit cannot be called while the lock is already inherited",
            ));
        }
        if let Some(f) = &self.releasefn {
            f();
        }
        self.inherited = true;
        match &self.parent_owner {
            Some(owner) => Ok(owner.clone()),
            None => Ok(owner_string()),
        }
    }

    /// Take the lock back after an inheriting subprocess has finished.
    pub fn reacquire(&mut self) -> Result<(), LockError> {
        if !self.inherited {
            return Err(LockError::Contract(
                "reacquire can only be called after prepare_inherit",
            ));
        }
        self.inherited = false;
        Ok(())
    }

    /// Release the lock and run callbacks.
    ///
    /// If the lock has been acquired multiple times, the actual release is
    /// delayed to the last call.
    pub fn release(&mut self) {
        if self.held > 1 {
            self.held -= 1;
            return;
        }
        if self.held == 1 {
            self.held = 0;
            if std::process::id() != self.pid {
                // we forked, and are not the parent
                return;
            }
            if let Some(f) = self.releasefn.take() {
                f();
            }
            // An inherited entry still belongs to someone else: either a
            // child we lent it to, or the parent we adopted it from.
            if !self.inherited && self.parent_owner.is_none() {
                let _ = std::fs::remove_file(&self.path);
            }
            for callback in self.postrelease.drain(..) {
                callback();
            }
        }
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if self.held > 0 {
            // ensure the entry is removed even if recursive locking occurred
            self.held = 1;
            self.release();
        }
    }
}

/// Owner identity recorded on disk: `<hostname>:<pid>`.
pub fn owner_string() -> String {
    format!("{}:{}", local_hostname(), std::process::id())
}

fn local_hostname() -> &'static str {
    static HOST: OnceLock<String> = OnceLock::new();
    HOST.get_or_init(hostname_uncached)
}

#[cfg(unix)]
fn hostname_uncached() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc == 0 {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        if let Ok(name) = std::str::from_utf8(&buf[..end]) {
            if !name.is_empty() {
                return name.to_string();
            }
        }
    }
    "localhost".to_string()
}

#[cfg(not(unix))]
fn hostname_uncached() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    // Signal 0 probes existence without delivering anything. EPERM means
    // the process exists but belongs to someone else.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> bool {
    // No cheap probe available; assume alive so we never break a valid lock.
    true
}

/// Atomically create the lock entry with `owner` as its content.
#[cfg(unix)]
fn make_lock(path: &Path, owner: &str) -> io::Result<()> {
    std::os::unix::fs::symlink(owner, path)
}

#[cfg(not(unix))]
fn make_lock(path: &Path, owner: &str) -> io::Result<()> {
    use std::io::Write;
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    f.write_all(owner.as_bytes())
}

/// Read the lock owner, or None if no entry exists.
fn read_lock(path: &Path) -> Result<Option<String>, LockError> {
    match std::fs::read_link(path) {
        Ok(target) => return Ok(Some(target.to_string_lossy().into_owned())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        // plain-file fallback locks land here with EINVAL
        Err(_) => {}
    }
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents.trim().to_string())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(LockError::Unavailable(e)),
    }
}
