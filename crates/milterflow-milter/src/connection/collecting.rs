//! Recording transport.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::MilterTransport;
use crate::command::Modification;
use crate::error::{Error, Result};
use crate::types::{Action, Negotiated, Reply};

/// Something sent through a [`CollectingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transmitted {
    /// Plain action.
    Action(Action),
    /// Custom reply.
    Reply(Reply),
    /// Message modification.
    Modification(Modification),
    /// Transport closed.
    Closed,
}

#[derive(Debug, Default)]
struct State {
    sent: Vec<Transmitted>,
    fail_modifications: bool,
    fail_all: bool,
}

/// Transport that records everything sent through it.
///
/// Clones share the same log, so a test can keep one handle while a session
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct CollectingTransport {
    negotiated: Negotiated,
    state: Arc<Mutex<State>>,
}

impl CollectingTransport {
    /// Creates a transport with the given negotiated options.
    #[must_use]
    pub fn new(negotiated: Negotiated) -> Self {
        Self {
            negotiated,
            state: Arc::default(),
        }
    }

    /// Makes every following modification fail.
    pub fn fail_modifications(&self, fail: bool) {
        self.lock().fail_modifications = fail;
    }

    /// Makes every following write fail, as if the peer disconnected.
    pub fn fail_all(&self, fail: bool) {
        self.lock().fail_all = fail;
    }

    /// Returns a copy of everything sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Transmitted> {
        self.lock().sent.clone()
    }

    /// Takes everything sent so far, leaving the log empty.
    #[must_use]
    pub fn take(&self) -> Vec<Transmitted> {
        std::mem::take(&mut self.lock().sent)
    }

    /// Returns only the modifications sent so far.
    #[must_use]
    pub fn modifications(&self) -> Vec<Modification> {
        self.lock()
            .sent
            .iter()
            .filter_map(|t| match t {
                Transmitted::Modification(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, item: Transmitted) -> Result<()> {
        let mut state = self.lock();
        if state.fail_all {
            return Err(Error::Closed);
        }
        state.sent.push(item);
        Ok(())
    }
}

#[async_trait]
impl MilterTransport for CollectingTransport {
    fn negotiated(&self) -> Negotiated {
        self.negotiated
    }

    async fn send_action(&mut self, action: Action) -> Result<()> {
        self.record(Transmitted::Action(action))
    }

    async fn send_reply(&mut self, reply: &Reply) -> Result<()> {
        self.record(Transmitted::Reply(reply.clone()))
    }

    async fn send_modification(&mut self, modification: Modification) -> Result<()> {
        if self.lock().fail_modifications {
            return Err(Error::Protocol(format!(
                "{} rejected by peer",
                modification.name()
            )));
        }
        self.record(Transmitted::Modification(modification))
    }

    async fn close(&mut self) -> Result<()> {
        self.record(Transmitted::Closed)
    }
}
