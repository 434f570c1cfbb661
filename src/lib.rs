//! Client library for the Mock Chat training backend.
//!
//! The backend (HTTP + SSE) is an external collaborator; this crate is
//! the client side: request wrappers in [`api`], the persisted session
//! in [`session`], the push-channel plumbing in [`stream`], and the
//! per-view live-update reconciliation — dedup ledger, optimistic send,
//! scroll and notification policies — in [`view`].

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod session;
pub mod stream;
pub mod view;

pub use api::{ApiClient, ConversationFilter};
pub use config::ClientConfig;
pub use error::ChatError;
pub use model::{Conversation, Message, Role, StreamEvent, UserProfile};
pub use session::{Session, SessionStore};
pub use stream::{StreamHandle, StreamState};
pub use view::{ConversationView, MessageLedger, ViewUpdate};
