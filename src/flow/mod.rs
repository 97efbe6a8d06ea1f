//! Conversation flow: per-session context and the special-case handler that
//! runs before generic routing.

pub mod context;
pub mod handler;

pub use context::{ConversationContext, DialogueTurn, CONTEXT_KEY};
pub use handler::{FlowCase, FlowHandler, FlowResponse};
