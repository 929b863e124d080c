//! Handle-to-session table.
//!
//! The registry is an ordinary value owned by whatever manages session
//! lifetimes (the host application or a connection manager); there is no
//! global instance. Hosts refer to sessions by an opaque [`SessionHandle`].
//! The registry maps handles to live sessions so that an event arriving for
//! a handle that was already released fails cleanly with
//! [`Error::HandleNotFound`] instead of touching freed state.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::debug;

use crate::{error::Error, session::Session};

/// Opaque session identity issued by a [`SessionRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(u64);

impl SessionHandle {
    /// Raw value, for logging or FFI.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shared, lockable session.
pub type SharedSession = Arc<Mutex<Session>>;

/// Concurrent handle-to-session table.
///
/// Lookups and registration may happen from any thread. Operations on one
/// session are serialized by its own mutex; the table lock is never held
/// while a session runs.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionHandle, SharedSession>>,
    next_handle: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self { sessions: Mutex::new(HashMap::new()), next_handle: AtomicU64::new(1) }
    }

    /// Issue a handle that has never been used by this registry.
    pub fn next_handle(&self) -> SessionHandle {
        SessionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Register `session` under a fresh handle.
    pub fn register(&self, session: Session) -> SessionHandle {
        let handle = self.next_handle();
        self.table().insert(handle, Arc::new(Mutex::new(session)));
        debug!(%handle, "session registered");
        handle
    }

    /// Register `session` under `handle`.
    ///
    /// # Errors
    ///
    /// [`Error::SessionAlreadyExist`] if `handle` is taken.
    pub fn insert(&self, handle: SessionHandle, session: Session) -> Result<(), Error> {
        let mut table = self.table();
        if table.contains_key(&handle) {
            return Err(Error::SessionAlreadyExist);
        }
        table.insert(handle, Arc::new(Mutex::new(session)));
        debug!(%handle, "session registered");
        Ok(())
    }

    /// Shared reference to the session behind `handle`.
    pub fn lookup(&self, handle: SessionHandle) -> Option<SharedSession> {
        self.table().get(&handle).cloned()
    }

    /// Remove `handle` and release the session's buffers.
    ///
    /// # Errors
    ///
    /// [`Error::HandleNotFound`] if `handle` is not registered.
    pub fn unregister(&self, handle: SessionHandle) -> Result<(), Error> {
        let session = self.table().remove(&handle).ok_or(Error::HandleNotFound)?;
        session.lock().unwrap_or_else(PoisonError::into_inner).release();
        debug!(%handle, "session unregistered");
        Ok(())
    }

    /// Run `f` on the session behind `handle`.
    ///
    /// Waits while another thread is operating on the same session, so a
    /// write completion from the transport thread is never lost to
    /// contention with the application thread. Handlers already hold
    /// `&mut Session` and must use it rather than re-entering through the
    /// registry; the session's own reentrancy guard reports
    /// [`Error::Busy`] for calls made that way.
    ///
    /// # Errors
    ///
    /// - [`Error::HandleNotFound`] if `handle` is not registered
    /// - whatever `f` returns
    pub fn with_session<R>(
        &self,
        handle: SessionHandle,
        f: impl FnOnce(&mut Session) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let session = self.lookup(handle).ok_or(Error::HandleNotFound)?;
        let mut guard = session.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Registered handles, in no particular order.
    pub fn handles(&self) -> Vec<SessionHandle> {
        self.table().keys().copied().collect()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<SessionHandle, SharedSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, thread, time::Duration};

    use bytes::Bytes;

    use super::*;
    use crate::{
        config::SessionConfig,
        env::SystemEnv,
        session::SessionHandler,
        writer::WriteCompletion,
    };

    struct Sink;

    impl SessionHandler for Sink {
        fn on_write_start(
            &mut self,
            _session: &mut Session,
            _data: Bytes,
        ) -> Result<WriteCompletion, Error> {
            Ok(WriteCompletion::Done)
        }
    }

    fn session() -> Session {
        Session::new(SessionConfig::default(), Arc::new(SystemEnv), Box::new(Sink)).unwrap()
    }

    #[test]
    fn handles_are_unique() {
        let registry = SessionRegistry::new();
        let a = registry.register(session());
        let b = registry.register(session());
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn released_handle_is_not_found() {
        let registry = SessionRegistry::new();
        let handle = registry.register(session());
        registry.unregister(handle).unwrap();

        assert!(registry.lookup(handle).is_none());
        assert_eq!(registry.unregister(handle), Err(Error::HandleNotFound));
        assert_eq!(
            registry.with_session(handle, |s| s.post_message(b"x")),
            Err(Error::HandleNotFound)
        );
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let registry = SessionRegistry::new();
        let handle = registry.next_handle();
        registry.insert(handle, session()).unwrap();
        assert_eq!(registry.insert(handle, session()), Err(Error::SessionAlreadyExist));
    }

    #[test]
    fn contended_session_waits_instead_of_failing() {
        let registry = SessionRegistry::new();
        let handle = registry.register(session());
        let shared = registry.lookup(handle).unwrap();
        let (locked_tx, locked_rx) = mpsc::channel();

        let holder = thread::spawn(move || {
            let _guard = shared.lock().unwrap();
            locked_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
        });

        locked_rx.recv().unwrap();
        assert_eq!(registry.with_session(handle, |s| Ok(s.session_id())), Ok(0));
        holder.join().unwrap();
    }

    #[test]
    fn concurrent_registration() {
        let registry = Arc::new(SessionRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || (0..16).map(|_| registry.register(session())).count())
            })
            .collect();

        let total: usize = threads.into_iter().map(|t| t.join().unwrap()).sum();
        assert_eq!(total, 128);
        assert_eq!(registry.len(), 128);
        assert_eq!(registry.handles().len(), 128);
    }
}
