//! # Repository Module
//!
//! Database repository implementations for the check-in agent.
//!
//! ## Available Repositories
//!
//! - [`AgentStateRepository`] - Versioned state document (one row)
//! - [`ReceiptOutboxRepository`] - Transaction receipts awaiting upload

pub mod receipts;
pub mod state;

pub use receipts::ReceiptOutboxRepository;
pub use state::AgentStateRepository;
