//! Versioned, copy-on-write session storage.
//!
//! Readers take an immutable snapshot and keep it for as long as they
//! like; edits build a new session and swap it in only when they succeed.

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::session::Session;

/// An immutable view of the session at one version.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    version: u64,
    session: Arc<Session>,
}

impl SessionSnapshot {
    /// Version the snapshot was taken at.
    pub fn version(&self) -> u64 {
        self.version
    }
}

impl Deref for SessionSnapshot {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

/// Shared holder of the current session.
#[derive(Debug, Default)]
pub struct SessionStore {
    current: RwLock<SessionSnapshot>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            version: 0,
            session: Arc::new(Session::default()),
        }
    }
}

impl SessionStore {
    /// Create a store holding `session` at version 0.
    pub fn new(session: Session) -> Self {
        Self {
            current: RwLock::new(SessionSnapshot {
                version: 0,
                session: Arc::new(session),
            }),
        }
    }

    /// Take a consistent snapshot of the current session.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.current.read().clone()
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Apply an edit to a copy of the session and commit it if it succeeds.
    ///
    /// On error the stored session and version are left untouched.
    pub fn update<T, E>(&self, edit: impl FnOnce(&mut Session) -> Result<T, E>) -> Result<T, E> {
        let mut current = self.current.write();
        let mut next = Session::clone(&current.session);
        let output = edit(&mut next)?;

        current.version += 1;
        current.session = Arc::new(next);
        debug!(version = current.version, "Session updated");
        Ok(output)
    }

    /// Replace the whole session, e.g. after loading a document.
    pub fn replace(&self, session: Session) {
        let mut current = self.current.write();
        current.version += 1;
        current.session = Arc::new(session);
    }
}
