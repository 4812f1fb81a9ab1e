//! Process-wide single-instance session registry
//!
//! At most one authorized session exists at a time. A slot is claimed with
//! [`SessionRegistry::acquire`] before the session is built and becomes
//! visible through [`SessionRegistry::current`] once installed.

use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

enum Slot<S> {
    Vacant,
    Launching(Uuid),
    Ready(Uuid, Arc<S>),
}

/// Where a given session currently stands in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Launching,
    Ready,
    /// Slot is empty or belongs to another session
    Gone,
}

pub struct SessionRegistry<S> {
    slot: Mutex<Slot<S>>,
}

impl<S: Send + Sync> SessionRegistry<S> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot::Vacant),
        })
    }

    /// Claim the slot for a new session
    pub fn acquire(self: &Arc<Self>) -> RecorderResult<SessionLease<S>> {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Vacant) {
            return Err(RecorderError::AlreadyRunning);
        }
        let id = Uuid::new_v4();
        *slot = Slot::Launching(id);
        Ok(SessionLease {
            registry: self.clone(),
            id,
            installed: false,
        })
    }

    pub fn is_occupied(&self) -> bool {
        !matches!(*self.slot.lock(), Slot::Vacant)
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Ready(..))
    }

    pub fn status_of(&self, id: Uuid) -> SlotStatus {
        match &*self.slot.lock() {
            Slot::Launching(current) if *current == id => SlotStatus::Launching,
            Slot::Ready(current, _) if *current == id => SlotStatus::Ready,
            _ => SlotStatus::Gone,
        }
    }

    /// The installed session, if any
    pub fn current(&self) -> Option<Arc<S>> {
        match &*self.slot.lock() {
            Slot::Ready(_, session) => Some(session.clone()),
            _ => None,
        }
    }

    /// The installed session, or `None` after vacating a slot still launching
    ///
    /// A vacated launch can no longer install; its builder finishes the
    /// session instead.
    pub fn current_or_cancel_launch(&self) -> Option<Arc<S>> {
        let mut slot = self.slot.lock();
        match &*slot {
            Slot::Ready(_, session) => Some(session.clone()),
            Slot::Launching(id) => {
                tracing::debug!("[{}] Session launch cancelled", id);
                *slot = Slot::Vacant;
                None
            }
            Slot::Vacant => None,
        }
    }

    /// Vacate the slot if it still belongs to `id`
    pub fn release(&self, id: Uuid) -> bool {
        let mut slot = self.slot.lock();
        let owned = match &*slot {
            Slot::Launching(current) | Slot::Ready(current, _) => *current == id,
            Slot::Vacant => false,
        };
        if owned {
            *slot = Slot::Vacant;
            tracing::debug!("[{}] Session slot released", id);
        }
        owned
    }

    fn install(&self, id: Uuid, session: Arc<S>) -> bool {
        let mut slot = self.slot.lock();
        match &*slot {
            Slot::Launching(current) if *current == id => {
                *slot = Slot::Ready(id, session);
                true
            }
            _ => false,
        }
    }
}

/// Claim on the registry slot; vacates it on drop unless installed
pub struct SessionLease<S: Send + Sync> {
    registry: Arc<SessionRegistry<S>>,
    id: Uuid,
    installed: bool,
}

impl<S: Send + Sync> SessionLease<S> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Publish the built session; returns false if the slot was released meanwhile
    pub fn install(mut self, session: Arc<S>) -> bool {
        self.installed = self.registry.install(self.id, session);
        self.installed
    }
}

impl<S: Send + Sync> Drop for SessionLease<S> {
    fn drop(&mut self) {
        if !self.installed {
            self.registry.release(self.id);
        }
    }
}
