//! The generation task and its configuration knobs.
//!
//! A [`Task`] is created once, by a handler, on request receipt and is
//! immutable afterwards. It is referenced by the broker (while queued) and
//! then by whichever worker dequeues it; it becomes eligible for collection
//! once the worker publishes the terminal sentinel and the handler has
//! unsubscribed.

use bytes::Bytes;
use uuid::Uuid;

/// The distinguished terminal marker published as the last message on every
/// task's subscription. Never an output fragment in its own right.
pub const SENTINEL: &str = "[DONE]";

/// Optional generation knobs. All fields are independently optional; a
/// provider that doesn't support a given knob is free to ignore it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<f32>,
    pub output_length: Option<i32>,
}

/// One generation request in flight, identified by `task_id`.
#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: Uuid,
    pub prompt: String,
    pub model_code: String,
    pub stream: bool,
    pub config: Option<GenerationConfig>,
    pub images: Option<Vec<Bytes>>,
}

impl Task {
    pub fn new(task_id: Uuid, prompt: impl Into<String>, model_code: impl Into<String>) -> Self {
        Self {
            task_id,
            prompt: prompt.into(),
            model_code: model_code.into(),
            stream: false,
            config: None,
            images: None,
        }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_config(mut self, config: Option<GenerationConfig>) -> Self {
        self.config = config;
        self
    }

    pub fn with_images(mut self, images: Option<Vec<Bytes>>) -> Self {
        self.images = images;
        self
    }
}
