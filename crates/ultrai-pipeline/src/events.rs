//! Pipeline progress events with monotonic sequencing
//!
//! Each pipeline run owns one `EventSender`; sequence numbers start at 1
//! and increase strictly. A closed receiver signals client disconnect, at
//! which point the run should stop producing.

use std::sync::atomic::{AtomicU64, Ordering};

use jiff::Timestamp;
use serde::Serialize;
use tokio::sync::mpsc;

/// Event types in the streaming schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Pipeline admitted and starting
    PipelineStart,
    /// A stage is starting
    StageStart,
    /// One model's call completed (either way)
    ModelResponse,
    /// A stage finished
    StageComplete,
    /// A piece of synthesis text
    SynthesisChunk,
    /// Pipeline finished successfully
    PipelineComplete,
    /// Pipeline failed with a structured error
    PipelineError,
}

impl EventType {
    /// Stable snake_case name, matching the serde representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PipelineStart => "pipeline_start",
            Self::StageStart => "stage_start",
            Self::ModelResponse => "model_response",
            Self::StageComplete => "stage_complete",
            Self::SynthesisChunk => "synthesis_chunk",
            Self::PipelineComplete => "pipeline_complete",
            Self::PipelineError => "pipeline_error",
        }
    }
}

/// One streamed event
#[derive(Debug, Clone, Serialize)]
pub struct PipelineEvent {
    /// Event type
    pub event: EventType,
    /// Strictly increasing per request, starting at 1
    pub sequence: u64,
    /// ISO-8601 emission time
    pub timestamp: Timestamp,
    /// Event-specific payload
    pub data: serde_json::Value,
}

/// Stamps and sends events for one pipeline run
pub struct EventSender {
    tx: mpsc::Sender<PipelineEvent>,
    next_sequence: AtomicU64,
}

impl EventSender {
    /// Create a sender/receiver pair with the given buffer
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            Self {
                tx,
                next_sequence: AtomicU64::new(1),
            },
            rx,
        )
    }

    /// Emit one event
    ///
    /// Returns `false` when the receiver is gone (client disconnected);
    /// the caller should stop the run.
    pub async fn emit(&self, event: EventType, data: serde_json::Value) -> bool {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send(PipelineEvent {
                event,
                sequence,
                timestamp: Timestamp::now(),
                data,
            })
            .await
            .is_ok()
    }
}
