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

use std::mem;
use std::sync::{Arc, Mutex, RwLock, TryLockError};

use crate::error::ErrorKind::{AlreadyClosed, IllegalState, Poisoned};
use crate::error::Result;

/// Notified around every `maybe_refresh` of a `ReferenceManager`.
pub trait RefreshListener: Send + Sync {
    /// Called right before a refresh attempt.
    fn before_refresh(&self) -> Result<()> {
        Ok(())
    }

    /// Called after a refresh attempt, `did_refresh` telling whether a new
    /// reference was swapped in.
    fn after_refresh(&self, did_refresh: bool) -> Result<()>;
}

/// State shared by every `ReferenceManager`: the current reference, the lock
/// serializing refreshes and the refresh listeners.
pub struct ReferenceManagerBase<T> {
    current: RwLock<Option<Arc<T>>>,
    refresh_lock: Mutex<()>,
    listeners: Mutex<Vec<Arc<dyn RefreshListener>>>,
}

impl<T> ReferenceManagerBase<T> {
    pub fn new(current: Arc<T>) -> Self {
        ReferenceManagerBase {
            current: RwLock::new(Some(current)),
            refresh_lock: Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// The current reference, `None` once closed. The reference count is
    /// not incremented.
    pub fn current(&self) -> Result<Option<Arc<T>>> {
        Ok(self.current.read()?.clone())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.current.read()?.is_none() {
            bail!(AlreadyClosed("this ReferenceManager is closed".into()));
        }
        Ok(())
    }

    fn is_current(&self, reference: &Arc<T>) -> Result<bool> {
        Ok(match &*self.current.read()? {
            Some(current) => Arc::ptr_eq(current, reference),
            None => false,
        })
    }

    pub fn add_listener(&self, listener: Arc<dyn RefreshListener>) -> Result<()> {
        self.listeners.lock()?.push(listener);
        Ok(())
    }

    pub fn remove_listener(&self, listener: &Arc<dyn RefreshListener>) -> Result<()> {
        self.listeners.lock()?.retain(|l| !Arc::ptr_eq(l, listener));
        Ok(())
    }

    fn listeners(&self) -> Result<Vec<Arc<dyn RefreshListener>>> {
        Ok(self.listeners.lock()?.clone())
    }
}

/// Utility to safely share instances of a certain type across multiple
/// threads, while periodically refreshing them. A reference is closed only
/// once all threads have finished using it.
///
/// Every `acquire` must be matched by one `release`, after which the
/// released reference must not be used anymore.
pub trait ReferenceManager<T> {
    fn base(&self) -> &ReferenceManagerBase<T>;

    /// Decrements the reference count of `reference`, closing it on zero.
    fn dec_ref(&self, reference: &T) -> Result<()>;

    /// Refreshes `reference` if needed. Returns `None` if no refresh was
    /// needed, otherwise a new reference owned by this manager.
    fn refresh_if_needed(&self, reference: &Arc<T>) -> Result<Option<Arc<T>>>;

    /// Tries to increment the reference count of `reference`, false if it
    /// was already closed.
    fn try_inc_ref(&self, reference: &T) -> Result<bool>;

    fn ref_count(&self, reference: &T) -> usize;

    /// Obtains the current reference.
    fn acquire(&self) -> Result<Arc<T>> {
        loop {
            let current = match self.base().current()? {
                Some(current) => current,
                None => bail!(AlreadyClosed("this ReferenceManager is closed".into())),
            };
            if self.try_inc_ref(&current)? {
                return Ok(current);
            }
            // a concurrent refresh may have closed it, but if it is still
            // current it was released more times than acquired
            if self.ref_count(&current) == 0 && self.base().is_current(&current)? {
                bail!(IllegalState(
                    "the current reference has already been closed, it was released more \
                     times than acquired"
                        .into()
                ));
            }
        }
    }

    /// Releases a reference obtained from `acquire`.
    fn release(&self, reference: Arc<T>) -> Result<()> {
        self.dec_ref(&reference)
    }

    /// Closes this manager so that it cannot be acquired anymore. The current
    /// reference is released, references still held by callers stay usable
    /// until they are released. Closing twice is a no-op.
    fn close(&self) -> Result<()> {
        let old = self.base().current.write()?.take();
        if let Some(old) = old {
            self.release(old)?;
            self.after_close()?;
        }
        Ok(())
    }

    /// Called after `close`, so implementations can free any resources.
    fn after_close(&self) -> Result<()> {
        Ok(())
    }

    /// Makes `new_reference` current and releases the previous one.
    fn swap_reference(&self, new_reference: Arc<T>) -> Result<()> {
        let mut current = match self.base().current.write() {
            Ok(current) => current,
            Err(_) => {
                self.release(new_reference)?;
                bail!(Poisoned);
            }
        };
        if current.is_none() {
            drop(current);
            self.release(new_reference)?;
            bail!(AlreadyClosed("this ReferenceManager is closed".into()));
        }
        let old = mem::replace(&mut *current, Some(new_reference));
        drop(current);
        match old {
            Some(old) => self.release(old),
            None => Ok(()),
        }
    }

    /// Refreshes the current reference unless another thread is already
    /// doing it.
    ///
    /// Returns true if the calling thread either refreshed or found no
    /// change to refresh, false if another thread is currently refreshing.
    /// Calls do not wait for a concurrent refresh to complete.
    fn maybe_refresh(&self) -> Result<bool> {
        self.base().ensure_open()?;
        match self.base().refresh_lock.try_lock() {
            Ok(_guard) => {
                self.do_maybe_refresh()?;
                Ok(true)
            }
            Err(TryLockError::WouldBlock) => Ok(false),
            Err(TryLockError::Poisoned(_)) => bail!(Poisoned),
        }
    }

    /// Like `maybe_refresh`, but waits for a concurrent refresh to finish
    /// and then refreshes again.
    fn maybe_refresh_blocking(&self) -> Result<()> {
        self.base().ensure_open()?;
        let _guard = self.base().refresh_lock.lock()?;
        self.do_maybe_refresh()
    }

    fn do_maybe_refresh(&self) -> Result<()> {
        let listeners = self.base().listeners()?;
        for listener in &listeners {
            listener.before_refresh()?;
        }
        let reference = self.acquire()?;
        let res = match self.refresh_if_needed(&reference) {
            Ok(Some(new_reference)) => self.swap_reference(new_reference).map(|_| true),
            Ok(None) => Ok(false),
            Err(e) => Err(e),
        };
        let released = self.release(reference);
        let did_refresh = res?;
        released?;
        if did_refresh {
            debug!("reference manager swapped in a refreshed reference");
        }
        for listener in &listeners {
            listener.after_refresh(did_refresh)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A counted resource whose refresh bumps its generation.
    #[derive(Debug)]
    struct Counted {
        generation: usize,
        refs: AtomicUsize,
    }

    impl Counted {
        fn new(generation: usize) -> Arc<Counted> {
            Arc::new(Counted {
                generation,
                refs: AtomicUsize::new(1),
            })
        }
    }

    struct CountedManager {
        base: ReferenceManagerBase<Counted>,
        changed: AtomicUsize,
    }

    impl ReferenceManager<Counted> for CountedManager {
        fn base(&self) -> &ReferenceManagerBase<Counted> {
            &self.base
        }

        fn dec_ref(&self, reference: &Counted) -> Result<()> {
            if reference.refs.fetch_sub(1, Ordering::AcqRel) == 0 {
                bail!(IllegalState("released too often".into()));
            }
            Ok(())
        }

        fn refresh_if_needed(&self, reference: &Arc<Counted>) -> Result<Option<Arc<Counted>>> {
            if self.changed.swap(0, Ordering::AcqRel) > 0 {
                Ok(Some(Counted::new(reference.generation + 1)))
            } else {
                Ok(None)
            }
        }

        fn try_inc_ref(&self, reference: &Counted) -> Result<bool> {
            let mut count = reference.refs.load(Ordering::Acquire);
            while count > 0 {
                match reference.refs.compare_exchange(
                    count,
                    count + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return Ok(true),
                    Err(actual) => count = actual,
                }
            }
            Ok(false)
        }

        fn ref_count(&self, reference: &Counted) -> usize {
            reference.refs.load(Ordering::Acquire)
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        refreshed: AtomicUsize,
        attempts: AtomicUsize,
    }

    impl RefreshListener for RecordingListener {
        fn before_refresh(&self) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::AcqRel);
            Ok(())
        }

        fn after_refresh(&self, did_refresh: bool) -> Result<()> {
            if did_refresh {
                self.refreshed.fetch_add(1, Ordering::AcqRel);
            }
            Ok(())
        }
    }

    fn manager() -> CountedManager {
        CountedManager {
            base: ReferenceManagerBase::new(Counted::new(0)),
            changed: AtomicUsize::new(0),
        }
    }

    #[test]
    fn test_acquire_release_and_refresh() {
        let manager = manager();
        let listener = Arc::new(RecordingListener::default());
        manager.base().add_listener(listener.clone()).unwrap();

        let first = manager.acquire().unwrap();
        assert_eq!(manager.ref_count(&first), 2);
        assert!(manager.maybe_refresh().unwrap());
        assert_eq!(listener.attempts.load(Ordering::Acquire), 1);
        assert_eq!(listener.refreshed.load(Ordering::Acquire), 0);

        manager.changed.store(1, Ordering::Release);
        manager.maybe_refresh_blocking().unwrap();
        assert_eq!(listener.refreshed.load(Ordering::Acquire), 1);

        let second = manager.acquire().unwrap();
        assert_eq!(second.generation, 1);
        // the old reference survives until released
        assert_eq!(manager.ref_count(&first), 1);
        let old = Arc::clone(&first);
        manager.release(first).unwrap();
        assert_eq!(manager.ref_count(&old), 0);
        manager.release(second).unwrap();
    }

    #[test]
    fn test_close() {
        let manager = manager();
        let held = manager.acquire().unwrap();
        manager.close().unwrap();
        manager.close().unwrap();
        assert!(manager.acquire().is_err());
        assert!(manager.maybe_refresh().is_err());
        assert_eq!(manager.ref_count(&held), 1);
        manager.release(held).unwrap();
    }

    #[test]
    fn test_over_released_current_is_detected() {
        let manager = manager();
        let current = manager.acquire().unwrap();
        manager.release(Arc::clone(&current)).unwrap();
        manager.release(current).unwrap();
        let err = manager.acquire().unwrap_err();
        assert!(format!("{}", err).contains("released more times"));
    }
}
