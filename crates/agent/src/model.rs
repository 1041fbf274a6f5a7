//! The model side of the loop.
//!
//! Building requests and calling a model are outside patchwright. The loop
//! only sees turns: an HTTP status and an ordered stream of text fragments.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use patchwright_core::task::AgentTask;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One model response.
pub struct ModelTurn {
    pub status: u16,
    pub fragments: BoxStream<'static, String>,
}

impl ModelTurn {
    pub fn new(status: u16, fragments: BoxStream<'static, String>) -> Self {
        Self { status, fragments }
    }

    /// A successful response made of the given fragments.
    pub fn from_fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fragments: Vec<String> = fragments.into_iter().map(Into::into).collect();
        Self::new(200, stream::iter(fragments).boxed())
    }
}

impl std::fmt::Debug for ModelTurn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelTurn").field("status", &self.status).finish()
    }
}

/// Supplies the next model turn for a task.
#[async_trait]
pub trait ModelSource: Send {
    /// `None` when the model has nothing more to say.
    async fn next_turn(&mut self, task: &AgentTask) -> Option<ModelTurn>;
}

/// A recorded model turn, as stored in transcript files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedTurn {
    #[serde(default = "default_status")]
    pub status: u16,
    pub fragments: Vec<String>,
}

fn default_status() -> u16 {
    200
}

/// Replays recorded turns in order, ignoring the task state.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    turns: VecDeque<RecordedTurn>,
}

impl ScriptedModel {
    pub fn new(turns: impl IntoIterator<Item = RecordedTurn>) -> Self {
        Self {
            turns: turns.into_iter().collect(),
        }
    }

    /// A single successful turn.
    pub fn single<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new([RecordedTurn {
            status: 200,
            fragments: fragments.into_iter().map(Into::into).collect(),
        }])
    }

    /// Parse a JSON transcript: an array of `{ "status", "fragments" }`.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let turns: Vec<RecordedTurn> = serde_json::from_str(json)?;
        Ok(Self::new(turns))
    }

    pub fn remaining(&self) -> usize {
        self.turns.len()
    }
}

#[async_trait]
impl ModelSource for ScriptedModel {
    async fn next_turn(&mut self, _task: &AgentTask) -> Option<ModelTurn> {
        let turn = self.turns.pop_front()?;
        Some(ModelTurn::new(turn.status, stream::iter(turn.fragments).boxed()))
    }
}
