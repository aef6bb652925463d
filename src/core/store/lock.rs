// Copyright 2019 Zhizhesihai (Beijing) Technology Limited.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::core::store::directory::Directory;

use crate::error::ErrorKind::{AlreadyClosed, LockObtainFailed, LockReleaseFailed};
use crate::error::{Error, Result};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Name of the lock guarding an index against concurrent writers.
pub const WRITE_LOCK_NAME: &str = "write.lock";

/// How long `obtain_lock_with_timeout` sleeps between two attempts.
pub const LOCK_POLL_INTERVAL_MS: u64 = 1000;

/// Timeout value meaning "retry forever".
pub const LOCK_OBTAIN_WAIT_FOREVER: i64 = -1;

/// An exclusive lock on some named resource of a `Directory`.
///
/// The lock is released by `close` or, failing that, when dropped.
pub trait Lock: Sync + Send {
    /// Releases exclusive access.
    fn close(&self) -> Result<()>;

    /// Best effort check that this lock is still valid.
    fn ensure_valid(&self) -> Result<()>;
}

/// Base trait for locking implementations. `Directory` uses
/// instances of this trait to implement `obtain_lock`.
pub trait LockFactory: Send + Sync {
    /// Return a new obtained lock identified by `lock_name` within the
    /// directory identified by `dir_id`.
    fn obtain_lock(&self, dir_id: &str, lock_name: &str) -> Result<Box<dyn Lock>>;
}

/// Implements in-process locking: locks are only exclusive among users of
/// the same factory instance.
#[derive(Default, Clone)]
pub struct SingleInstanceLockFactory {
    locks: Arc<Mutex<HashSet<String>>>,
}

impl SingleInstanceLockFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockFactory for SingleInstanceLockFactory {
    fn obtain_lock(&self, dir_id: &str, lock_name: &str) -> Result<Box<dyn Lock>> {
        let key = format!("{}/{}", dir_id, lock_name);
        let mut locks = self.locks.lock()?;
        if !locks.insert(key.clone()) {
            bail!(LockObtainFailed(format!(
                "lock instance already obtained: {}",
                key
            )));
        }
        Ok(Box::new(SingleInstanceLock {
            lock_name: key,
            locks: Arc::clone(&self.locks),
            closed: AtomicBool::new(false),
        }))
    }
}

struct SingleInstanceLock {
    lock_name: String,
    locks: Arc<Mutex<HashSet<String>>>,
    closed: AtomicBool,
}

impl SingleInstanceLock {
    fn release(&self) -> Result<()> {
        if !self.locks.lock()?.remove(&self.lock_name) {
            bail!(LockReleaseFailed(format!(
                "lock was already released: {}",
                self.lock_name
            )));
        }
        Ok(())
    }
}

impl Lock for SingleInstanceLock {
    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.release()
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            bail!(AlreadyClosed(format!(
                "lock instance already released: {}",
                self.lock_name
            )));
        }
        // check the lock set, in case someone cleared it behind our back
        if !self.locks.lock()?.contains(&self.lock_name) {
            bail!(AlreadyClosed(format!(
                "lock instance was invalidated from map: {}",
                self.lock_name
            )));
        }
        Ok(())
    }
}

impl Drop for SingleInstanceLock {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.release() {
                warn!("release lock '{}' on drop failed: {:?}", self.lock_name, e);
            }
        }
    }
}

/// Tries to obtain `lock_name` on `dir`, retrying every
/// `LOCK_POLL_INTERVAL_MS` until `timeout_ms` elapsed.
///
/// A `timeout_ms` of `LOCK_OBTAIN_WAIT_FOREVER` never gives up.
pub fn obtain_lock_with_timeout(
    dir: &dyn Directory,
    lock_name: &str,
    timeout_ms: i64,
) -> Result<Box<dyn Lock>> {
    let start = Instant::now();
    let mut last_failure: Option<Error>;
    loop {
        match dir.obtain_lock(lock_name) {
            Ok(lock) => return Ok(lock),
            Err(e) => last_failure = Some(e),
        }
        let elapsed = start.elapsed().as_millis() as i64;
        if timeout_ms != LOCK_OBTAIN_WAIT_FOREVER && elapsed >= timeout_ms {
            break;
        }
        let sleep_ms = if timeout_ms == LOCK_OBTAIN_WAIT_FOREVER {
            LOCK_POLL_INTERVAL_MS
        } else {
            LOCK_POLL_INTERVAL_MS.min((timeout_ms - elapsed) as u64)
        };
        thread::sleep(Duration::from_millis(sleep_ms));
    }
    let reason = last_failure
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    bail!(LockObtainFailed(format!(
        "lock obtain timed out after {}ms on '{}' in {}: {}",
        timeout_ms, lock_name, dir, reason
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::directory::RAMDirectory;
    use crate::error::ErrorKind;

    #[test]
    fn test_single_instance_lock() {
        let factory = SingleInstanceLockFactory::new();
        let lock = factory.obtain_lock("dir", WRITE_LOCK_NAME).unwrap();
        lock.ensure_valid().unwrap();

        match factory.obtain_lock("dir", WRITE_LOCK_NAME) {
            Err(Error(ErrorKind::LockObtainFailed(_), _)) => {}
            _ => panic!("second obtain must fail"),
        }
        // a different directory id is a different lock
        let other = factory.obtain_lock("other", WRITE_LOCK_NAME).unwrap();

        lock.close().unwrap();
        assert!(lock.ensure_valid().is_err());
        // close is idempotent
        lock.close().unwrap();
        drop(other);

        let again = factory.obtain_lock("dir", WRITE_LOCK_NAME).unwrap();
        drop(again);
        factory.obtain_lock("other", WRITE_LOCK_NAME).unwrap();
    }

    #[test]
    fn test_obtain_lock_timeout() {
        let dir = RAMDirectory::new();
        let held = dir.obtain_lock(WRITE_LOCK_NAME).unwrap();

        let start = Instant::now();
        match obtain_lock_with_timeout(&dir, WRITE_LOCK_NAME, 50) {
            Err(Error(ErrorKind::LockObtainFailed(msg), _)) => {
                assert!(msg.contains("timed out"));
            }
            _ => panic!("expected lock timeout"),
        }
        assert!(start.elapsed() >= Duration::from_millis(50));

        drop(held);
        obtain_lock_with_timeout(&dir, WRITE_LOCK_NAME, 50).unwrap();
    }
}
