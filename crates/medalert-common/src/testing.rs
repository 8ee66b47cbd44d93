//! Scripted stand-ins for the provider clients.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::cache::CacheStore;
use crate::gemini::{GeminiClientError, TextGenerator};
use crate::ocr_space::{OcrError, TextRecognizer};

pub(crate) enum Reply {
    Text(&'static str),
    Empty,
    Fail(&'static str),
}

/// Answers each call with the next scripted reply and records every prompt.
pub(crate) struct ScriptedGenerator {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedGenerator {
    pub(crate) fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub(crate) fn models(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
    ) -> Result<Option<String>, GeminiClientError> {
        self.calls
            .lock()
            .unwrap()
            .push((model.to_string(), prompt.to_string()));
        match self.replies.lock().unwrap().pop_front() {
            Some(Reply::Text(t)) => Ok(Some(t.to_string())),
            Some(Reply::Empty) => Ok(None),
            Some(Reply::Fail(message)) => Err(GeminiClientError::Upstream {
                status: StatusCode::UNAUTHORIZED,
                message: message.to_string(),
            }),
            None => panic!("unexpected model call: {prompt}"),
        }
    }
}

pub(crate) enum Recognition {
    Text(&'static str),
    ProviderError(&'static str),
}

pub(crate) struct FakeRecognizer {
    outcome: Recognition,
    calls: Mutex<usize>,
}

impl FakeRecognizer {
    pub(crate) fn new(outcome: Recognition) -> Self {
        Self {
            outcome,
            calls: Mutex::new(0),
        }
    }

    pub(crate) fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl TextRecognizer for FakeRecognizer {
    async fn recognize(&self, _image: &[u8], _engine: u8) -> Result<String, OcrError> {
        *self.calls.lock().unwrap() += 1;
        match &self.outcome {
            Recognition::Text(t) => Ok(t.to_string()),
            Recognition::ProviderError(m) => Err(OcrError::Provider(m.to_string())),
        }
    }
}

/// In-process stand-in for Redis.
#[derive(Default)]
pub(crate) struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    async fn set_with_ttl(&self, key: &str, value: &str, _ttl_secs: u64) -> bool {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        true
    }

    async fn is_available(&self) -> bool {
        true
    }
}
