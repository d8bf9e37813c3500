//! # State Store
//!
//! Where the agent keeps state across restarts.
//!
//! [`checkin_db::Database`] is the production store; [`MemoryStateStore`]
//! keeps everything in process for hosts that don't want a database file.

use std::sync::Mutex;

use async_trait::async_trait;

use checkin_core::{PersistedState, TransactionReceipt};
use checkin_db::Database;

use crate::error::AgentResult;

/// Persistence seam used by the agent.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the saved state, `None` on first run.
    async fn load_state(&self) -> AgentResult<Option<PersistedState>>;

    async fn save_state(&self, state: &PersistedState) -> AgentResult<()>;

    async fn enqueue_receipt(&self, receipt: &TransactionReceipt) -> AgentResult<()>;

    /// Queued receipts, oldest first.
    async fn pending_receipts(&self) -> AgentResult<Vec<TransactionReceipt>>;

    async fn remove_receipts(&self, ids: &[String]) -> AgentResult<()>;
}

#[async_trait]
impl StateStore for Database {
    async fn load_state(&self) -> AgentResult<Option<PersistedState>> {
        Ok(self.agent_state().load().await?)
    }

    async fn save_state(&self, state: &PersistedState) -> AgentResult<()> {
        Ok(self.agent_state().save(state).await?)
    }

    async fn enqueue_receipt(&self, receipt: &TransactionReceipt) -> AgentResult<()> {
        Ok(self.receipt_outbox().enqueue(receipt).await?)
    }

    async fn pending_receipts(&self) -> AgentResult<Vec<TransactionReceipt>> {
        Ok(self.receipt_outbox().pending().await?)
    }

    async fn remove_receipts(&self, ids: &[String]) -> AgentResult<()> {
        self.receipt_outbox().remove(ids).await?;
        Ok(())
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<PersistedState>>,
    receipts: Mutex<Vec<TransactionReceipt>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing document.
    pub fn with_state(state: PersistedState) -> Self {
        MemoryStateStore {
            state: Mutex::new(Some(state)),
            receipts: Mutex::new(Vec::new()),
        }
    }

    /// Last saved document.
    pub fn saved(&self) -> Option<PersistedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load_state(&self) -> AgentResult<Option<PersistedState>> {
        Ok(self.saved())
    }

    async fn save_state(&self, state: &PersistedState) -> AgentResult<()> {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = Some(state.clone());
        Ok(())
    }

    async fn enqueue_receipt(&self, receipt: &TransactionReceipt) -> AgentResult<()> {
        let mut receipts = self.receipts.lock().unwrap_or_else(|e| e.into_inner());
        if !receipts.iter().any(|r| r.id == receipt.id) {
            receipts.push(receipt.clone());
        }
        Ok(())
    }

    async fn pending_receipts(&self) -> AgentResult<Vec<TransactionReceipt>> {
        Ok(self.receipts.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn remove_receipts(&self, ids: &[String]) -> AgentResult<()> {
        self.receipts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|r| !ids.contains(&r.id));
        Ok(())
    }
}
