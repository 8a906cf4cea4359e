//! Sequential stage pipeline.
//!
//! An [`Agent`] runs its stages strictly in order. Each stage sees the whole
//! message log (the question first, then one message per finished stage) and
//! contributes exactly one message.
//!
//! A stage may answer with a [`TokenStream`]. Streams of intermediate stages
//! are drained by the agent before the next stage starts; a stream from the
//! last stage is handed to the caller undrained.

use crate::db::executor::CancellationToken;
use crate::error::{AppError, AppResult};
use crate::llm::{ChatMessage, ChatModel, TokenStream};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a stage produced.
#[derive(Debug)]
pub enum StageOutput {
    Text(String),
    Stream(TokenStream),
    /// A precondition failed; later stages are skipped.
    Halt(String),
}

/// What a stage can see while running.
pub struct StageContext<'a> {
    pub messages: &'a [ChatMessage],
    pub model: &'a dyn ChatModel,
    pub cancel: &'a CancellationToken,
}

impl StageContext<'_> {
    /// The original question.
    pub fn question(&self) -> &str {
        self.messages.first().map(|m| m.content.as_str()).unwrap_or_default()
    }

    /// Output of the previous stage, or the question for the first stage.
    pub fn last(&self) -> &str {
        self.messages.last().map(|m| m.content.as_str()).unwrap_or_default()
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: StageContext<'_>) -> AppResult<StageOutput>;
}

/// Progress hook. Must not panic.
pub type Hook = Box<dyn Fn() + Send + Sync>;

type FragmentHook = Box<dyn Fn(&str) + Send + Sync>;

struct Node {
    stage: Box<dyn Stage>,
    before: Option<Hook>,
    after: Option<Hook>,
}

/// How a run ended.
#[derive(Debug)]
pub enum AgentRun {
    Completed {
        messages: Vec<ChatMessage>,
    },
    /// The last stage answered with a stream that still has to be drained.
    Streaming {
        messages: Vec<ChatMessage>,
        stream: TokenStream,
    },
    Halted {
        stage: String,
        reason: String,
        messages: Vec<ChatMessage>,
    },
}

impl AgentRun {
    pub fn messages(&self) -> &[ChatMessage] {
        match self {
            Self::Completed { messages }
            | Self::Streaming { messages, .. }
            | Self::Halted { messages, .. } => messages,
        }
    }

    /// Final text: the last stage's message, or its drained stream.
    pub async fn into_text(self) -> AppResult<String> {
        match self {
            Self::Completed { messages } => Ok(messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default()),
            Self::Streaming { stream, .. } => stream.drain().await,
            Self::Halted { stage, reason, .. } => Err(AppError::pipeline(stage, reason)),
        }
    }
}

/// A stage pipeline bound to one model.
pub struct Agent {
    model: Arc<dyn ChatModel>,
    nodes: Vec<Node>,
    on_fragment: Option<FragmentHook>,
}

impl Agent {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            nodes: Vec::new(),
            on_fragment: None,
        }
    }

    pub fn next(self, stage: impl Stage + 'static) -> Self {
        self.next_with(stage, None, None)
    }

    /// Append a stage with progress hooks. `before` fires before every run
    /// of the stage; `after` only once it succeeded.
    pub fn next_with(
        mut self,
        stage: impl Stage + 'static,
        before: Option<Hook>,
        after: Option<Hook>,
    ) -> Self {
        self.nodes.push(Node {
            stage: Box::new(stage),
            before,
            after,
        });
        self
    }

    /// Observe fragments of intermediate streams while they are drained.
    pub fn on_fragment(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_fragment = Some(Box::new(hook));
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Run every stage on `input`. A stage error ends the run with that error.
    pub async fn execute(
        &self,
        input: Vec<ChatMessage>,
        cancel: &CancellationToken,
    ) -> AppResult<AgentRun> {
        let mut messages = input;
        let last_index = self.nodes.len().saturating_sub(1);

        for (index, node) in self.nodes.iter().enumerate() {
            let name = node.stage.name();
            if cancel.is_cancelled() {
                info!(stage = %name, "Pipeline cancelled");
                return Err(AppError::cancelled(name));
            }

            if let Some(before) = &node.before {
                before();
            }
            debug!(stage = %name, messages = messages.len(), "Running stage");

            let ctx = StageContext {
                messages: &messages,
                model: self.model.as_ref(),
                cancel,
            };
            let output = match node.stage.run(ctx).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(stage = %name, error = %e, "Stage failed");
                    return Err(e);
                }
            };

            let text = match output {
                StageOutput::Text(text) => text,
                StageOutput::Halt(reason) => {
                    info!(stage = %name, reason = %reason, "Pipeline halted");
                    return Ok(AgentRun::Halted {
                        stage: name.to_string(),
                        reason,
                        messages,
                    });
                }
                StageOutput::Stream(stream) if index == last_index => {
                    if let Some(after) = &node.after {
                        after();
                    }
                    return Ok(AgentRun::Streaming { messages, stream });
                }
                StageOutput::Stream(stream) => self.drain(stream).await?,
            };

            if let Some(after) = &node.after {
                after();
            }
            messages.push(ChatMessage::assistant(text));
        }

        Ok(AgentRun::Completed { messages })
    }

    async fn drain(&self, mut stream: TokenStream) -> AppResult<String> {
        let mut text = String::new();
        while let Some(fragment) = stream.next_fragment().await {
            let fragment = fragment?;
            if let Some(hook) = &self.on_fragment {
                hook(&fragment);
            }
            text.push_str(&fragment);
        }
        Ok(text)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("model", &self.model.model())
            .field(
                "stages",
                &self.nodes.iter().map(|n| n.stage.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
