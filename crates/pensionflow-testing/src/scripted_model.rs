//! A chat model that replays a scripted sequence of completions.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use pensionflow::error::{Error, Result};
use pensionflow::language_models::ChatModel;
use pensionflow::messages::Message;

/// Replays queued responses in order, recording every transcript it was
/// given. Once the queue is empty it returns the fallback response, or a
/// model error if none is set.
///
/// ```
/// # use pensionflow_testing::ScriptedChatModel;
/// let model = ScriptedChatModel::new()
///     .with_response("Final Answer: your balance is 50000")
///     .with_fallback("Final Answer: done");
/// ```
#[derive(Clone)]
pub struct ScriptedChatModel {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    responses: VecDeque<Result<String>>,
    fallback: Option<String>,
    transcripts: Vec<Vec<Message>>,
}

impl Default for ScriptedChatModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedChatModel {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                responses: VecDeque::new(),
                fallback: None,
                transcripts: Vec::new(),
            })),
        }
    }

    /// Queues a successful completion.
    #[must_use]
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.inner.lock().responses.push_back(Ok(text.into()));
        self
    }

    /// Queues a model failure.
    #[must_use]
    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.inner
            .lock()
            .responses
            .push_back(Err(Error::model(message.into())));
        self
    }

    /// Sets the completion returned once the queue is exhausted.
    #[must_use]
    pub fn with_fallback(self, text: impl Into<String>) -> Self {
        self.inner.lock().fallback = Some(text.into());
        self
    }

    /// Number of `generate` calls observed so far.
    pub fn call_count(&self) -> usize {
        self.inner.lock().transcripts.len()
    }

    /// The transcripts passed to each `generate` call, in order.
    pub fn transcripts(&self) -> Vec<Vec<Message>> {
        self.inner.lock().transcripts.clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn generate(&self, messages: &[Message]) -> Result<Message> {
        let mut inner = self.inner.lock();
        inner.transcripts.push(messages.to_vec());
        match inner.responses.pop_front() {
            Some(Ok(text)) => Ok(Message::ai(text)),
            Some(Err(err)) => Err(err),
            None => match &inner.fallback {
                Some(text) => Ok(Message::ai(text.clone())),
                None => Err(Error::model("scripted model exhausted")),
            },
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
