//! Event correlation between the inbound message feed and outstanding
//! tasks.
//!
//! A single actor task owns the outstanding-task table and serves
//! registration/abort requests over a command channel, so no lock is
//! shared with the dispatcher. Each inbound [`ChannelMessage`] is
//! matched against the table by nonce, then by known message id or
//! reference, then by best-effort prompt text; unmatched or unparseable
//! messages are silently discarded.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use easel_core::task::Stage;
use serde::Serialize;

use crate::message::{ActionComponent, ChannelMessage, MessageKind};
use crate::parse::{normalize_prompt, StatusParser};
use crate::transport::BotError;

/// Capacity of the command channel between dispatchers and the actor.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the progress broadcast channel.
const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Opaque id for one outstanding task.
pub type TaskId = uuid::Uuid;

/// A task handed to the correlator for resolution.
#[derive(Debug)]
pub struct TaskRegistration {
    pub task_id: TaskId,
    pub prompt_index: usize,
    /// Decorated prompt text, used for best-effort matching before the
    /// bot's message id is known.
    pub prompt: String,
    pub stage: Stage,
    /// Correlation nonce attached to the originating command; the bot
    /// echoes it on its first acknowledgment. `None` for button
    /// follow-ups, which carry no nonce.
    pub nonce: Option<String>,
    /// Message id of the parent result for follow-up tasks.
    pub parent_message_id: Option<String>,
    /// Fired exactly once with the terminal result.
    pub resolve: oneshot::Sender<CompletedGeneration>,
}

/// The terminal result of a task: the finished message's identity, its
/// image URL, and the action buttons available for follow-up stages.
#[derive(Debug, Clone)]
pub struct CompletedGeneration {
    pub message_id: String,
    pub url: String,
    pub components: Vec<ActionComponent>,
}

/// A filtered progress notification; per task, strictly increasing.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub prompt_index: usize,
    pub stage: Stage,
    pub percent: u8,
}

enum Command {
    Register(TaskRegistration),
    Abort { task_id: TaskId },
}

/// Cloneable handle to the correlator actor.
#[derive(Clone)]
pub struct CorrelatorHandle {
    commands: mpsc::Sender<Command>,
    progress: broadcast::Sender<ProgressUpdate>,
}

impl CorrelatorHandle {
    /// Register an outstanding task. Fails only when the actor is gone.
    pub async fn register(&self, registration: TaskRegistration) -> Result<(), BotError> {
        self.commands
            .send(Command::Register(registration))
            .await
            .map_err(|_| BotError::Transport("correlator unavailable".to_string()))
    }

    /// Drop an outstanding task (timed out or abandoned). Idempotent.
    pub async fn abort(&self, task_id: TaskId) {
        let _ = self.commands.send(Command::Abort { task_id }).await;
    }

    /// Subscribe to filtered progress updates for all tasks.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.progress.subscribe()
    }
}

/// Spawns the correlation actor over an inbound message feed.
pub struct Correlator;

impl Correlator {
    /// Spawn the actor. It runs until both the inbound feed and every
    /// handle clone are dropped.
    pub fn spawn(
        inbound: mpsc::Receiver<ChannelMessage>,
        parser: Arc<dyn StatusParser>,
    ) -> CorrelatorHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);

        let actor = Actor {
            parser,
            tasks: Vec::new(),
            progress: progress_tx.clone(),
        };
        tokio::spawn(actor.run(inbound, command_rx));

        CorrelatorHandle {
            commands: command_tx,
            progress: progress_tx,
        }
    }
}

// ---------------------------------------------------------------------------
// Actor internals
// ---------------------------------------------------------------------------

struct Outstanding {
    task_id: TaskId,
    prompt_index: usize,
    prompt: String,
    stage: Stage,
    nonce: Option<String>,
    parent_message_id: Option<String>,
    /// Bot message id, learned from the first matched acknowledgment.
    message_id: Option<String>,
    last_percent: Option<u8>,
    resolve: oneshot::Sender<CompletedGeneration>,
}

struct Actor {
    parser: Arc<dyn StatusParser>,
    /// Insertion-ordered so best-effort text matches resolve the oldest
    /// candidate first.
    tasks: Vec<Outstanding>,
    progress: broadcast::Sender<ProgressUpdate>,
}

impl Actor {
    async fn run(
        mut self,
        mut inbound: mpsc::Receiver<ChannelMessage>,
        mut commands: mpsc::Receiver<Command>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                message = inbound.recv() => match message {
                    Some(message) => self.handle_message(message),
                    None => break,
                },
            }
        }
        tracing::debug!(outstanding = self.tasks.len(), "Correlator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Register(registration) => {
                tracing::debug!(
                    task_id = %registration.task_id,
                    prompt_index = registration.prompt_index,
                    stage = %registration.stage,
                    "Task registered",
                );
                self.tasks.push(Outstanding {
                    task_id: registration.task_id,
                    prompt_index: registration.prompt_index,
                    prompt: normalize_prompt(&registration.prompt),
                    stage: registration.stage,
                    nonce: registration.nonce,
                    parent_message_id: registration.parent_message_id,
                    message_id: None,
                    last_percent: None,
                    resolve: registration.resolve,
                });
            }
            Command::Abort { task_id } => {
                let before = self.tasks.len();
                self.tasks.retain(|t| t.task_id != task_id);
                if self.tasks.len() < before {
                    tracing::debug!(task_id = %task_id, "Task aborted");
                }
            }
        }
    }

    fn handle_message(&mut self, message: ChannelMessage) {
        let Some(parsed) = self.parser.parse(&message.content) else {
            tracing::trace!(message_id = %message.id, "Ignoring unparseable message");
            return;
        };

        let Some(index) = self.match_task(&message, &parsed) else {
            tracing::trace!(message_id = %message.id, "No outstanding task matches");
            return;
        };

        // Refine the correlation token with the bot-assigned id.
        if self.tasks[index].message_id.is_none() {
            self.tasks[index].message_id = Some(message.id.clone());
        }

        if parsed.terminal && message.attachment_url().is_some() {
            let task = self.tasks.remove(index);
            let completed = CompletedGeneration {
                message_id: message.id.clone(),
                url: message
                    .attachment_url()
                    .unwrap_or_default()
                    .to_string(),
                components: message.components.clone(),
            };
            tracing::debug!(
                task_id = %task.task_id,
                prompt_index = task.prompt_index,
                stage = %task.stage,
                "Task resolved",
            );
            // The dispatcher may already have timed the task out.
            let _ = task.resolve.send(completed);
            return;
        }

        if let Some(percent) = parsed.progress {
            let task = &mut self.tasks[index];
            // Forward only strictly increasing completion; drop
            // duplicates and out-of-order stragglers.
            if task.last_percent.map_or(true, |last| percent > last) {
                task.last_percent = Some(percent);
                let _ = self.progress.send(ProgressUpdate {
                    prompt_index: task.prompt_index,
                    stage: task.stage,
                    percent,
                });
            }
        }
    }

    /// Find the outstanding task this message belongs to.
    ///
    /// Priority: nonce echo, then known message id / parent reference,
    /// then best-effort prompt + stage-marker text match for tasks whose
    /// message id is not yet known.
    fn match_task(
        &self,
        message: &ChannelMessage,
        parsed: &crate::parse::ParsedStatus,
    ) -> Option<usize> {
        if message.kind == MessageKind::Created {
            if let Some(nonce) = &message.nonce {
                if let Some(i) = self
                    .tasks
                    .iter()
                    .position(|t| t.nonce.as_deref() == Some(nonce.as_str()))
                {
                    return Some(i);
                }
            }
        }

        if let Some(i) = self.tasks.iter().position(|t| {
            t.message_id.as_deref() == Some(message.id.as_str())
                || (t.parent_message_id.is_some()
                    && t.parent_message_id == message.referenced_message_id
                    && t.message_id.is_none()
                    && parsed.marker.compatible_with(t.stage))
        }) {
            return Some(i);
        }

        // The bot posts the finished result as a new message, so a
        // fresh terminal may belong to a task bound to an earlier
        // progress message; in-progress updates only ever match the
        // bound id above.
        let fresh_terminal = parsed.terminal && message.kind == MessageKind::Created;
        self.tasks.iter().position(|t| {
            (t.message_id.is_none() || fresh_terminal)
                && parsed.marker.compatible_with(t.stage)
                && t.prompt == parsed.prompt
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
