//! Transaction boundary around a storage [`Session`].
//!
//! The helper moves `Ready -> Open -> Ready`. Any failing primitive closes
//! the session and moves it to the absorbing `Poisoned` state; from then on
//! every call returns the original error.

use crate::CoreError;
use dockyard_store::{Session, StoreError};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperState {
    Ready,
    Open,
    Poisoned,
}

pub struct TransactionHelper<S: Session> {
    session: S,
    state: HelperState,
    poison: Option<Arc<StoreError>>,
}

impl<S: Session> TransactionHelper<S> {
    pub fn new(session: S) -> Self {
        Self {
            session,
            state: HelperState::Ready,
            poison: None,
        }
    }

    pub fn state(&self) -> HelperState {
        self.state
    }

    /// Read access to the session, e.g. for read-through lookups.
    pub fn session(&self) -> Result<&S, CoreError> {
        self.guard()?;
        Ok(&self.session)
    }

    /// The error that poisoned the helper, if any.
    pub fn poison_cause(&self) -> Option<&StoreError> {
        self.poison.as_deref()
    }

    fn guard(&self) -> Result<(), CoreError> {
        match &self.poison {
            Some(cause) => Err(CoreError::Poisoned(Arc::clone(cause))),
            None => Ok(()),
        }
    }

    fn poison(&mut self, cause: StoreError) -> CoreError {
        warn!("transaction helper poisoned: {cause}");
        let cause = Arc::new(cause);
        self.session.close();
        self.state = HelperState::Poisoned;
        self.poison = Some(Arc::clone(&cause));
        CoreError::Poisoned(cause)
    }

    pub fn begin(&mut self) -> Result<(), CoreError> {
        self.guard()?;
        match self.session.begin() {
            Ok(()) => {
                self.state = HelperState::Open;
                Ok(())
            }
            Err(e) => Err(self.poison(e)),
        }
    }

    /// No-op unless a transaction is open.
    pub fn commit(&mut self) -> Result<(), CoreError> {
        self.guard()?;
        if self.state != HelperState::Open {
            return Ok(());
        }
        match self.session.commit() {
            Ok(()) => {
                self.state = HelperState::Ready;
                Ok(())
            }
            Err(e) => Err(self.poison(e)),
        }
    }

    /// No-op unless a transaction is open.
    pub fn rollback(&mut self) -> Result<(), CoreError> {
        self.guard()?;
        if self.state != HelperState::Open {
            return Ok(());
        }
        match self.session.rollback() {
            Ok(()) => {
                self.state = HelperState::Ready;
                Ok(())
            }
            Err(e) => Err(self.poison(e)),
        }
    }

    pub fn clear(&mut self) -> Result<(), CoreError> {
        self.guard()?;
        self.session.clear().map_err(|e| self.poison(e))
    }

    /// Run `work` as one unit: commit whatever is open, discard stray
    /// staged writes, begin, then commit on `Ok` or roll back on `Err`.
    pub fn run_in_transaction<T>(
        &mut self,
        work: impl FnOnce(&mut S) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        self.commit()?;
        self.clear()?;
        self.begin()?;
        match work(&mut self.session) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                debug!("unit of work failed, rolling back: {e}");
                self.rollback()?;
                Err(e)
            }
        }
    }
}
