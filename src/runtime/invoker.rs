//! Agent invocation boundary
//!
//! The engine never talks to a language model directly: every agent call goes
//! through the `AgentInvoker` capability. The production implementation posts
//! to an external agent gateway over HTTP; tests swap in scripted mocks.
//! The invoker is treated as a single blocking call; retry and rate limiting
//! internal to the gateway are its own business.

use crate::error::EngineError;
use async_trait::async_trait;
use serde_json::Value;

/// Opaque LLM call capability.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Invoke the agent identified by `agent_ref` with the given input object
    /// and return its output object.
    async fn invoke(&self, agent_ref: &str, input: &Value) -> Result<Value, EngineError>;
}

/// HTTP-backed invoker posting to `{base_url}/agents/{agent_ref}/invoke`.
#[derive(Debug, Clone)]
pub struct HttpAgentInvoker {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAgentInvoker {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AgentInvoker for HttpAgentInvoker {
    async fn invoke(&self, agent_ref: &str, input: &Value) -> Result<Value, EngineError> {
        let url = format!("{}/agents/{}/invoke", self.base_url, agent_ref);
        tracing::debug!("invoking agent '{}' at {}", agent_ref, url);

        let response = self
            .client
            .post(&url)
            .json(input)
            .send()
            .await
            .map_err(|e| EngineError::AgentInvocation {
                agent_ref: agent_ref.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::AgentInvocation {
                agent_ref: agent_ref.to_string(),
                message: format!("gateway returned {}: {}", status, body),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| EngineError::AgentInvocation {
                agent_ref: agent_ref.to_string(),
                message: format!("invalid gateway response: {}", e),
            })
    }
}

#[cfg(test)]
pub mod mock {
    //! Scripted invokers for engine tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Returns a canned output per agent_ref, counting calls.
    pub struct ScriptedInvoker {
        outputs: HashMap<String, Value>,
        pub calls: AtomicU32,
        inputs: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedInvoker {
        pub fn new(outputs: Vec<(&str, Value)>) -> Self {
            Self {
                outputs: outputs
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                calls: AtomicU32::new(0),
                inputs: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn recorded_inputs(&self) -> Vec<(String, Value)> {
            self.inputs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AgentInvoker for ScriptedInvoker {
        async fn invoke(&self, agent_ref: &str, input: &Value) -> Result<Value, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inputs
                .lock()
                .unwrap()
                .push((agent_ref.to_string(), input.clone()));
            match self.outputs.get(agent_ref) {
                Some(output) => Ok(output.clone()),
                None => Err(EngineError::AgentInvocation {
                    agent_ref: agent_ref.to_string(),
                    message: "no scripted output".to_string(),
                }),
            }
        }
    }

    /// Always fails, counting attempts. For retry budget tests.
    pub struct FailingInvoker {
        pub calls: AtomicU32,
    }

    impl FailingInvoker {
        pub fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
            }
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AgentInvoker for FailingInvoker {
        async fn invoke(&self, agent_ref: &str, _input: &Value) -> Result<Value, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::AgentInvocation {
                agent_ref: agent_ref.to_string(),
                message: "scripted failure".to_string(),
            })
        }
    }

    /// Sleeps past any reasonable deadline before answering. For timeout tests.
    pub struct SlowInvoker {
        pub delay: Duration,
        pub calls: AtomicU32,
    }

    impl SlowInvoker {
        pub fn new(delay: Duration) -> Self {
            Self {
                delay,
                calls: AtomicU32::new(0),
            }
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AgentInvoker for SlowInvoker {
        async fn invoke(&self, _agent_ref: &str, _input: &Value) -> Result<Value, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(Value::Null)
        }
    }
}
