//! The task dispatch loop.
//!
//! One coordination loop admits tasks up to the concurrency limit,
//! paced by the minimum spacing interval. Each admitted task runs in
//! its own unit: send the command, then wait for the correlator's
//! resolution under a timeout. Resolutions fan back into the loop over
//! a channel; the loop schedules follow-ups and forwards one
//! [`GenerateEvent`] per resolution to the output stream, which closes
//! once everything admitted has resolved and nothing remains to
//! schedule.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use easel_bot::correlator::{CompletedGeneration, CorrelatorHandle, TaskId, TaskRegistration};
use easel_bot::message::find_action;
use easel_bot::transport::{BotCommand, BotTransport};
use easel_core::event::GenerateEvent;
use easel_core::task::{FollowUpPlan, PromptProgress, Stage};

/// Capacity of the outbound event stream.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How long in-flight tasks may keep resolving after cancellation
/// before they are dropped.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Default ceiling on unresolved tasks.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Default minimum delay between consecutive admissions.
pub const DEFAULT_MIN_SPACING: Duration = Duration::from_secs(5);

/// Default deadline for a task to produce a terminal bot event.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(15 * 60);

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-run dispatch options.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Schedule 4 variation tasks per successful draft.
    pub want_variations: bool,
    /// Schedule 4 upscale tasks per successful draft (and per successful
    /// variation when `want_variations` is also set).
    pub want_upscale: bool,
    /// Maximum unresolved tasks at any instant.
    pub concurrency: usize,
    /// Fixed inter-submission delay to respect upstream rate limits.
    pub min_spacing: Duration,
    /// A task with no terminal bot event within this deadline fails.
    pub task_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            want_variations: false,
            want_upscale: false,
            concurrency: DEFAULT_CONCURRENCY,
            min_spacing: DEFAULT_MIN_SPACING,
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }
}

impl RunOptions {
    fn plan(&self) -> FollowUpPlan {
        FollowUpPlan {
            variations: self.want_variations,
            upscale: self.want_upscale,
        }
    }
}

/// Ways a single task can fail. Reported on the task's event; never
/// fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The outbound command could not be sent.
    #[error("transport send failed: {0}")]
    Transport(String),

    /// The source message lacks the button for this follow-up stage.
    #[error("no action button for {stage} on the source message")]
    MissingAction { stage: Stage },

    /// No terminal bot event arrived within the deadline.
    #[error("no terminal bot event within {0:?}")]
    Timeout(Duration),
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Bounded-concurrency scheduler over one transport + correlator pair.
pub struct Dispatcher {
    transport: Arc<dyn BotTransport>,
    correlator: CorrelatorHandle,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn BotTransport>, correlator: CorrelatorHandle) -> Self {
        Self {
            transport,
            correlator,
        }
    }

    /// Start a run over `prompts`, skipping indices in
    /// `already_finished`. Returns the event stream; it closes when
    /// every admitted task (including follow-ups) has resolved, or
    /// after the cancellation grace period.
    pub fn run(
        &self,
        prompts: Vec<String>,
        already_finished: HashSet<usize>,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<GenerateEvent> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let run = RunLoop {
            transport: Arc::clone(&self.transport),
            correlator: self.correlator.clone(),
            prompts,
            options,
            cancel,
        };
        tokio::spawn(run.run(already_finished, event_tx));
        event_rx
    }
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

enum Work {
    Draft {
        prompt_index: usize,
    },
    FollowUp {
        prompt_index: usize,
        stage: Stage,
        parent: CompletedGeneration,
    },
}

struct TaskDone {
    prompt_index: usize,
    stage: Stage,
    outcome: Result<CompletedGeneration, TaskError>,
}

struct RunLoop {
    transport: Arc<dyn BotTransport>,
    correlator: CorrelatorHandle,
    prompts: Vec<String>,
    options: RunOptions,
    cancel: CancellationToken,
}

impl RunLoop {
    async fn run(self, already_finished: HashSet<usize>, event_tx: mpsc::Sender<GenerateEvent>) {
        let plan = self.options.plan();
        let concurrency = self.options.concurrency.max(1);
        let (done_tx, mut done_rx) = mpsc::channel::<TaskDone>(concurrency);

        let mut drafts: VecDeque<usize> = (0..self.prompts.len())
            .filter(|i| !already_finished.contains(i))
            .collect();
        let mut follow_ups: VecDeque<Work> = VecDeque::new();
        let mut progress: HashMap<usize, PromptProgress> = drafts
            .iter()
            .map(|&i| (i, PromptProgress::new(i, plan)))
            .collect();

        tracing::info!(
            prompts = self.prompts.len(),
            skipped = already_finished.len(),
            concurrency,
            "Dispatch started",
        );

        let mut in_flight = 0usize;
        let mut last_admit: Option<Instant> = None;

        loop {
            // Admission: fill free slots, oldest follow-ups first.
            while in_flight < concurrency
                && !self.cancel.is_cancelled()
                && !(follow_ups.is_empty() && drafts.is_empty())
            {
                if !self.pace(last_admit).await {
                    break;
                }
                let Some(work) = next_work(&mut follow_ups, &mut drafts) else {
                    break;
                };
                self.admit(work, &mut progress, &done_tx).await;
                in_flight += 1;
                last_admit = Some(Instant::now());
            }

            if in_flight == 0 {
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.drain(&mut done_rx, in_flight, &mut progress, &event_tx).await;
                    break;
                }
                done = done_rx.recv() => {
                    let Some(done) = done else { break };
                    in_flight -= 1;
                    let event = self.process(done, &mut progress, &mut follow_ups, false);
                    if event_tx.send(event).await.is_err() {
                        tracing::debug!("Event consumer dropped; stopping dispatch");
                        return;
                    }
                }
            }
        }

        tracing::info!("Dispatch finished");
    }

    /// Enforce the minimum spacing between admissions. Returns `false`
    /// when cancelled while waiting.
    async fn pace(&self, last_admit: Option<Instant>) -> bool {
        let Some(last) = last_admit else { return true };
        let wait = self.options.min_spacing.saturating_sub(last.elapsed());
        if wait.is_zero() {
            return true;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }

    async fn admit(
        &self,
        work: Work,
        progress: &mut HashMap<usize, PromptProgress>,
        done_tx: &mpsc::Sender<TaskDone>,
    ) {
        match work {
            Work::Draft { prompt_index } => {
                if let Some(entry) = progress.get_mut(&prompt_index) {
                    entry.begin_draft();
                }
                let prompt = self
                    .prompts
                    .get(prompt_index)
                    .cloned()
                    .unwrap_or_default();
                let nonce = uuid::Uuid::new_v4().to_string();
                let command = BotCommand::Imagine {
                    prompt: prompt.clone(),
                };
                self.launch(prompt_index, prompt, Stage::Draft, Some(nonce), None, command, done_tx)
                    .await;
            }
            Work::FollowUp {
                prompt_index,
                stage,
                parent,
            } => {
                let Some(action) = find_action(&parent.components, stage) else {
                    tracing::warn!(
                        prompt_index,
                        stage = %stage,
                        message_id = %parent.message_id,
                        "Source message has no button for this stage",
                    );
                    let done_tx = done_tx.clone();
                    tokio::spawn(async move {
                        let _ = done_tx
                            .send(TaskDone {
                                prompt_index,
                                stage,
                                outcome: Err(TaskError::MissingAction { stage }),
                            })
                            .await;
                    });
                    return;
                };
                let command = BotCommand::Interact {
                    message_id: parent.message_id.clone(),
                    custom_id: action.custom_id.clone(),
                };
                let prompt = self
                    .prompts
                    .get(prompt_index)
                    .cloned()
                    .unwrap_or_default();
                self.launch(
                    prompt_index,
                    prompt,
                    stage,
                    None,
                    Some(parent.message_id.clone()),
                    command,
                    done_tx,
                )
                .await;
            }
        }
    }

    /// Register the task with the correlator, send its command, and
    /// spawn the unit that waits for resolution under the timeout.
    #[allow(clippy::too_many_arguments)]
    async fn launch(
        &self,
        prompt_index: usize,
        prompt: String,
        stage: Stage,
        nonce: Option<String>,
        parent_message_id: Option<String>,
        command: BotCommand,
        done_tx: &mpsc::Sender<TaskDone>,
    ) {
        let task_id = TaskId::new_v4();
        let (resolve, resolution) = oneshot::channel();
        let registered = self
            .correlator
            .register(TaskRegistration {
                task_id,
                prompt_index,
                prompt,
                stage,
                nonce: nonce.clone(),
                parent_message_id,
                resolve,
            })
            .await;

        tracing::debug!(prompt_index, stage = %stage, task_id = %task_id, "Task admitted");

        let transport = Arc::clone(&self.transport);
        let correlator = self.correlator.clone();
        let timeout = self.options.task_timeout;
        let done_tx = done_tx.clone();
        let send_nonce = nonce.unwrap_or_else(|| task_id.to_string());

        tokio::spawn(async move {
            let outcome = match registered {
                Err(e) => Err(TaskError::Transport(e.to_string())),
                Ok(()) => match transport.send_command(command, &send_nonce).await {
                    Err(e) => {
                        correlator.abort(task_id).await;
                        Err(TaskError::Transport(e.to_string()))
                    }
                    Ok(()) => match tokio::time::timeout(timeout, resolution).await {
                        Ok(Ok(completed)) => Ok(completed),
                        Ok(Err(_)) => Err(TaskError::Timeout(timeout)),
                        Err(_) => {
                            correlator.abort(task_id).await;
                            Err(TaskError::Timeout(timeout))
                        }
                    },
                },
            };
            let _ = done_tx
                .send(TaskDone {
                    prompt_index,
                    stage,
                    outcome,
                })
                .await;
        });
    }

    /// Fold one resolution into the per-prompt state machine and build
    /// its event. Follow-ups are only scheduled while not cancelled;
    /// skipping them keeps the prompt incomplete so it is retried on the
    /// next run.
    fn process(
        &self,
        done: TaskDone,
        progress: &mut HashMap<usize, PromptProgress>,
        follow_ups: &mut VecDeque<Work>,
        cancelled: bool,
    ) -> GenerateEvent {
        let success = done.outcome.is_ok();
        let next = match progress.get_mut(&done.prompt_index) {
            Some(entry) => entry.on_resolved(done.stage, success),
            None => Vec::new(),
        };
        if !cancelled {
            if let Ok(parent) = &done.outcome {
                for stage in next {
                    follow_ups.push_back(Work::FollowUp {
                        prompt_index: done.prompt_index,
                        stage,
                        parent: parent.clone(),
                    });
                }
            }
        }
        let is_last = progress
            .get(&done.prompt_index)
            .map_or(false, PromptProgress::is_complete);

        let prompt = self
            .prompts
            .get(done.prompt_index)
            .cloned()
            .unwrap_or_default();

        match done.outcome {
            Ok(completed) => {
                tracing::info!(
                    prompt_index = done.prompt_index,
                    stage = %done.stage,
                    is_last,
                    "Task completed",
                );
                let url = self.artifact_url(done.stage, &completed);
                GenerateEvent::completed(done.prompt_index, prompt, done.stage, url, is_last)
            }
            Err(e) => {
                tracing::warn!(
                    prompt_index = done.prompt_index,
                    stage = %done.stage,
                    error = %e,
                    "Task failed",
                );
                GenerateEvent::failed(done.prompt_index, prompt, done.stage, e.to_string(), is_last)
            }
        }
    }

    /// URL for artifact-bearing completions. Upscales always carry
    /// their URL; composites only when no upscale pass supersedes their
    /// quadrants.
    fn artifact_url(&self, stage: Stage, completed: &CompletedGeneration) -> Option<String> {
        match stage {
            Stage::Upscale(_) => Some(completed.url.clone()),
            Stage::Draft | Stage::Variation(_) if !self.options.want_upscale => {
                Some(completed.url.clone())
            }
            _ => None,
        }
    }

    /// Post-cancellation drain: forward resolutions that land within the
    /// grace period, then drop the rest silently.
    async fn drain(
        &self,
        done_rx: &mut mpsc::Receiver<TaskDone>,
        mut in_flight: usize,
        progress: &mut HashMap<usize, PromptProgress>,
        event_tx: &mpsc::Sender<GenerateEvent>,
    ) {
        tracing::info!(in_flight, "Cancelled; draining in-flight tasks");
        let deadline = tokio::time::sleep(CANCEL_GRACE);
        tokio::pin!(deadline);
        let mut discarded = VecDeque::new();

        while in_flight > 0 {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::debug!(in_flight, "Grace period elapsed; dropping unresolved tasks");
                    break;
                }
                done = done_rx.recv() => {
                    let Some(done) = done else { break };
                    in_flight -= 1;
                    let event = self.process(done, progress, &mut discarded, true);
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

fn next_work(follow_ups: &mut VecDeque<Work>, drafts: &mut VecDeque<usize>) -> Option<Work> {
    follow_ups.pop_front().or_else(|| {
        drafts
            .pop_front()
            .map(|prompt_index| Work::Draft { prompt_index })
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
