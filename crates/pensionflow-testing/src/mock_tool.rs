//! A configurable mock tool.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use pensionflow::error::{Error, Result};
use pensionflow::tools::{Tool, ToolInput};

type Handler = dyn Fn(&ToolInput) -> Result<String> + Send + Sync;

/// A tool whose behavior is scripted by the test.
///
/// Defaults to echoing a fixed response; a handler closure can inspect the
/// input instead. `fail_next` makes exactly one upcoming call return an
/// error, for exercising error-as-observation paths.
pub struct MockTool {
    name: String,
    description: String,
    response: String,
    handler: Option<Box<Handler>>,
    call_count: Arc<Mutex<usize>>,
    fail_next: Arc<Mutex<bool>>,
}

impl MockTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: "Mock tool response".to_string(),
            response: "{\"mock\": true}".to_string(),
            handler: None,
            call_count: Arc::new(Mutex::new(0)),
            fail_next: Arc::new(Mutex::new(false)),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = response.into();
        self
    }

    #[must_use]
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ToolInput) -> Result<String> + Send + Sync + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Makes the next call fail with a tool error.
    pub fn fail_next(&self) {
        *self.fail_next.lock() = true;
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn args_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "input": {"type": "string"}
            }
        })
    }

    async fn call(&self, input: ToolInput) -> Result<String> {
        *self.call_count.lock() += 1;
        let mut fail = self.fail_next.lock();
        if *fail {
            *fail = false;
            return Err(Error::tool_error("mock tool failure"));
        }
        drop(fail);

        match &self.handler {
            Some(handler) => handler(&input),
            None => Ok(self.response.clone()),
        }
    }
}
