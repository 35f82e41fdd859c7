//! Replays canned replies instead of calling a real backend.
//!
//! A script maps task names to the replies the backend should give, one
//! per plan-act step:
//!
//! ```yaml
//! research:
//!   - |
//!     Action: web_search
//!     Action Input: {"query": "EV market"}
//!   - "Final Answer: three bullet points"
//! draft:
//!   - error: backend overloaded
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use super::backend::{GenerationBackend, GenerationRequest};
use crate::core::source;
use crate::error::GenerationError;
use crate::Result;

/// One scripted reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ScriptedReply {
    Text(String),
    Error { error: String },
}

impl From<&str> for ScriptedReply {
    fn from(text: &str) -> Self {
        ScriptedReply::Text(text.to_string())
    }
}

#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a script from a YAML or TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let script: HashMap<String, Vec<ScriptedReply>> = source::read(path)?;
        let backend = Self::new();
        for (task, replies) in script {
            for reply in replies {
                backend.push(&task, reply);
            }
        }
        Ok(backend)
    }

    /// Queue a reply for `task`.
    pub fn push(&self, task: &str, reply: impl Into<ScriptedReply>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies
                .entry(task.to_string())
                .or_default()
                .push_back(reply.into());
        }
    }

    pub fn with_reply(self, task: &str, reply: impl Into<ScriptedReply>) -> Self {
        self.push(task, reply);
        self
    }

    pub fn with_error(self, task: &str, message: &str) -> Self {
        self.push(
            task,
            ScriptedReply::Error {
                error: message.to_string(),
            },
        );
        self
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Replies not yet consumed, across all tasks.
    pub fn remaining(&self) -> usize {
        self.replies
            .lock()
            .map(|r| r.values().map(VecDeque::len).sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, GenerationError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = self
            .replies
            .lock()
            .map_err(|_| GenerationError::Backend("script state poisoned".to_string()))?
            .get_mut(&request.task)
            .and_then(VecDeque::pop_front);

        match next {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Error { error }) => Err(GenerationError::Backend(error)),
            None => Err(GenerationError::ScriptExhausted(request.task.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(task: &str) -> GenerationRequest {
        GenerationRequest {
            task: task.to_string(),
            role: "Writer".to_string(),
            prompt: format!("do {}", task),
            step: 0,
            final_only: false,
        }
    }

    #[tokio::test]
    async fn test_replies_in_order_per_task() {
        let backend = ScriptedBackend::new()
            .with_reply("T1", "first")
            .with_reply("T2", "other")
            .with_reply("T1", "second");

        assert_eq!(backend.generate(&request("T1")).await.unwrap(), "first");
        assert_eq!(backend.generate(&request("T1")).await.unwrap(), "second");
        assert_eq!(backend.generate(&request("T2")).await.unwrap(), "other");
        assert_eq!(backend.remaining(), 0);
        assert_eq!(backend.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_script() {
        let backend = ScriptedBackend::new();
        let err = backend.generate(&request("T1")).await.unwrap_err();
        assert_eq!(err, GenerationError::ScriptExhausted("T1".to_string()));
    }

    #[tokio::test]
    async fn test_scripted_error() {
        let backend = ScriptedBackend::new().with_error("T1", "overloaded");
        let err = backend.generate(&request("T1")).await.unwrap_err();
        assert_eq!(err, GenerationError::Backend("overloaded".to_string()));
    }

    #[tokio::test]
    async fn test_load_yaml_script() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.yaml");
        std::fs::write(
            &path,
            "research:\n  - \"Final Answer: facts\"\ndraft:\n  - error: down\n",
        )
        .unwrap();

        let backend = ScriptedBackend::load(&path).unwrap();
        assert_eq!(backend.remaining(), 2);
        assert_eq!(
            backend.generate(&request("research")).await.unwrap(),
            "Final Answer: facts"
        );
        assert!(matches!(
            backend.generate(&request("draft")).await,
            Err(GenerationError::Backend(_))
        ));
    }
}
