//! The chat-model seam.
//!
//! The hosted LLM provider is an external collaborator: the engine only ever
//! talks to it through [`ChatModel`]. Tests substitute a scripted
//! implementation; a production binary wires in a real provider client.

use async_trait::async_trait;

use crate::error::Result;
use crate::messages::Message;

/// A chat-completion model.
///
/// Implementations receive the full transcript and return a single [`Message`]
/// (normally [`Message::Ai`]). Timeouts are the caller's concern: graph nodes
/// wrap calls in `tokio::time::timeout` and degrade gracefully when the model
/// does not answer.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate the next message for the given transcript.
    async fn generate(&self, messages: &[Message]) -> Result<Message>;

    /// Identifier of the underlying model, for logging.
    fn model_name(&self) -> &str;
}
