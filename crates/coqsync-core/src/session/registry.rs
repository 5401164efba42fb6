//! Open documents, keyed by handle.
//!
//! Each document owns one backend. Starting a backend takes a while, so it
//! happens outside the registry lock; if two callers race to open the same
//! handle, the loser's fresh document is shut down and the winner's is
//! returned.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::DocumentState;

use super::error::SessionError;
use super::process::ProcessSession;

/// Opaque key for an open document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentHandle(pub String);

impl DocumentHandle {
    /// A fresh random handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DocumentHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for DocumentHandle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type SharedDocument = Arc<Mutex<DocumentState>>;

/// A document plus its session, so the session can be checked and shut
/// down while another thread holds the document for a long call.
struct Entry {
    document: SharedDocument,
    session: Arc<ProcessSession>,
}

#[derive(Default)]
pub struct SessionRegistry {
    documents: Mutex<HashMap<DocumentHandle, Entry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn documents(&self) -> MutexGuard<'_, HashMap<DocumentHandle, Entry>> {
        self.documents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, handle: &DocumentHandle) -> Option<SharedDocument> {
        self.documents()
            .get(handle)
            .map(|entry| Arc::clone(&entry.document))
    }

    pub fn contains(&self, handle: &DocumentHandle) -> bool {
        self.documents().contains_key(handle)
    }

    /// Return the document for `handle`, creating it with `create` if absent.
    pub fn get_or_try_insert_with<F>(
        &self,
        handle: &DocumentHandle,
        create: F,
    ) -> Result<SharedDocument, SessionError>
    where
        F: FnOnce() -> Result<DocumentState, SessionError>,
    {
        if let Some(existing) = self.get(handle) {
            return Ok(existing);
        }

        let created = create()?;

        let mut documents = self.documents();
        if let Some(existing) = documents.get(handle) {
            let existing = Arc::clone(&existing.document);
            drop(documents);
            log::debug!("Document {} opened concurrently; discarding duplicate", handle);
            created.close();
            return Ok(existing);
        }
        let session = created.session_handle();
        let document = Arc::new(Mutex::new(created));
        documents.insert(
            handle.clone(),
            Entry {
                document: Arc::clone(&document),
                session,
            },
        );
        log::info!("Opened document {}", handle);
        Ok(document)
    }

    /// Remove `handle` and shut its backend down.
    ///
    /// Does not wait for the document lock, so a call blocked on this
    /// document's backend fails instead of delaying the close. Returns false
    /// if it was not open.
    pub fn close(&self, handle: &DocumentHandle) -> bool {
        let Some(entry) = self.documents().remove(handle) else {
            return false;
        };
        shut_down(handle, &entry.session);
        true
    }

    /// Close every document; returns how many were open.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.documents().drain().collect();
        for (handle, entry) in &drained {
            shut_down(handle, &entry.session);
        }
        drained.len()
    }

    /// Close documents whose backend has died.
    pub fn prune_dead(&self) -> Vec<DocumentHandle> {
        let dead: Vec<_> = {
            let mut documents = self.documents();
            let handles: Vec<_> = documents
                .iter()
                .filter(|(_, entry)| !entry.session.is_alive())
                .map(|(handle, _)| handle.clone())
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| documents.remove(&handle).map(|entry| (handle, entry)))
                .collect()
        };
        for (handle, entry) in &dead {
            shut_down(handle, &entry.session);
        }
        dead.into_iter().map(|(handle, _)| handle).collect()
    }

    pub fn handles(&self) -> Vec<DocumentHandle> {
        let mut handles: Vec<_> = self.documents().keys().cloned().collect();
        handles.sort();
        handles
    }

    pub fn len(&self) -> usize {
        self.documents().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents().is_empty()
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// The session's own once-only guard makes this safe to reach twice.
fn shut_down(handle: &DocumentHandle, session: &ProcessSession) {
    let exit = session.shutdown();
    log::info!("Closed document {} (exit {:?})", handle, exit.and_then(|e| e.code));
}
