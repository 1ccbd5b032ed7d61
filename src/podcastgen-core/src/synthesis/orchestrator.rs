//! Bounded-concurrency synthesis of a whole script.
//!
//! A fixed pool of workers pulls requests from a shared queue and reports
//! back over a channel. Completions arrive in any order; results are stored
//! by segment index so the assembler always sees script order.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{SpeechSynthesizer, SynthesisRequest, clean_text_for_speech};
use crate::audio::{AssemblyPiece, AudioClip};
use crate::error::{PodcastError, Result};
use crate::prosody::ProsodyTable;
use crate::script::Script;
use crate::voices::VoiceAssignment;

/// What to do when a segment still fails after its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Abort the whole generation on the first failed segment.
    #[default]
    Strict,
    /// Skip failed segments and report them as warnings.
    BestEffort,
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureMode::Strict => f.write_str("strict"),
            FailureMode::BestEffort => f.write_str("best_effort"),
        }
    }
}

impl FromStr for FailureMode {
    type Err = PodcastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "strict" => Ok(FailureMode::Strict),
            "best_effort" => Ok(FailureMode::BestEffort),
            other => Err(PodcastError::ConfigError(format!(
                "unknown failure mode '{other}', expected strict or best_effort"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthesisOptions {
    /// Maximum in-flight provider calls.
    pub concurrency: usize,
    /// Calls per segment before it counts as failed.
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled for each one after.
    pub retry_backoff: Duration,
    /// Upper bound on a single provider call.
    pub call_timeout: Duration,
    pub failure_mode: FailureMode,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            call_timeout: Duration::from_secs(30),
            failure_mode: FailureMode::Strict,
        }
    }
}

/// A segment that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentFailure {
    pub index: usize,
    pub message: String,
}

/// Progress of an individual segment, reported as results arrive.
#[derive(Debug, Clone)]
pub enum SegmentProgress {
    Completed { index: usize, duration_ms: u64 },
    Failed { index: usize, message: String },
}

pub type ProgressFn<'a> = dyn Fn(SegmentProgress) + Send + Sync + 'a;

/// Clips in script order plus anything skipped in best-effort mode.
#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    pub pieces: Vec<AssemblyPiece>,
    pub failures: Vec<SegmentFailure>,
}

impl SynthesisOutcome {
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.index).collect()
    }
}

struct SegmentResult {
    index: usize,
    result: std::result::Result<AudioClip, String>,
}

/// Dispatches one request per segment to a provider.
pub struct SynthesisOrchestrator {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    options: SynthesisOptions,
}

impl SynthesisOrchestrator {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, options: SynthesisOptions) -> Self {
        Self {
            synthesizer,
            options,
        }
    }

    pub fn options(&self) -> &SynthesisOptions {
        &self.options
    }

    /// Build the provider request for every segment.
    pub fn build_requests(
        script: &Script,
        voices: &VoiceAssignment,
        prosody: &ProsodyTable,
    ) -> Vec<SynthesisRequest> {
        script
            .segments()
            .iter()
            .map(|segment| SynthesisRequest {
                index: segment.index,
                text: clean_text_for_speech(&segment.text),
                voice_id: voices.voice_for(&segment.speaker).to_string(),
                prosody: prosody.resolve_for_text(&segment.emotion, &segment.text),
            })
            .collect()
    }

    /// Synthesize every segment of `script`.
    ///
    /// Cancelling `cancel` stops all workers and discards finished clips.
    pub async fn synthesize(
        &self,
        script: &Script,
        voices: &VoiceAssignment,
        prosody: &ProsodyTable,
        cancel: &CancellationToken,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<SynthesisOutcome> {
        let requests = Self::build_requests(script, voices, prosody);
        let total = requests.len();
        let workers = self.options.concurrency.clamp(1, total.max(1));

        tracing::info!(
            segments = total,
            workers,
            mode = %self.options.failure_mode,
            "starting synthesis"
        );

        let queue = Arc::new(Mutex::new(VecDeque::from(requests)));
        let abort = cancel.child_token();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pool = JoinSet::new();

        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let synthesizer = Arc::clone(&self.synthesizer);
            let options = self.options;
            let abort = abort.clone();
            let tx = tx.clone();
            pool.spawn(async move {
                while let Some(request) = next_request(&queue) {
                    if abort.is_cancelled() {
                        break;
                    }
                    tracing::debug!(worker, index = request.index, voice = %request.voice_id, "synthesizing segment");
                    let result =
                        synthesize_with_retry(synthesizer.as_ref(), &request, &options, &abort).await;
                    if tx
                        .send(SegmentResult {
                            index: request.index,
                            result,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut slots: Vec<Option<AudioClip>> = vec![None; total];
        let mut failures = Vec::new();

        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    abort.cancel();
                    pool.abort_all();
                    tracing::info!("synthesis cancelled");
                    return Err(PodcastError::Cancelled);
                }
                message = rx.recv() => message,
            };
            let Some(SegmentResult { index, result }) = message else {
                break;
            };

            match result {
                Ok(clip) => {
                    tracing::debug!(index, duration_ms = clip.duration_ms(), "segment synthesized");
                    if let Some(report) = progress {
                        report(SegmentProgress::Completed {
                            index,
                            duration_ms: clip.duration_ms(),
                        });
                    }
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(clip);
                    }
                }
                Err(message) => {
                    if let Some(report) = progress {
                        report(SegmentProgress::Failed {
                            index,
                            message: message.clone(),
                        });
                    }
                    match self.options.failure_mode {
                        FailureMode::Strict => {
                            abort.cancel();
                            pool.abort_all();
                            tracing::warn!(index, error = %message, "segment failed, aborting generation");
                            return Err(PodcastError::Synthesis {
                                failed: vec![index],
                                message,
                            });
                        }
                        FailureMode::BestEffort => {
                            tracing::warn!(index, error = %message, "segment failed, leaving a gap");
                            failures.push(SegmentFailure { index, message });
                        }
                    }
                }
            }
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined
                && e.is_panic()
            {
                return Err(PodcastError::TtsError(
                    "synthesis worker panicked".to_string(),
                ));
            }
        }

        if cancel.is_cancelled() {
            return Err(PodcastError::Cancelled);
        }

        failures.sort_by_key(|f| f.index);
        let pieces: Vec<AssemblyPiece> = script
            .segments()
            .iter()
            .zip(slots)
            .filter_map(|(segment, clip)| {
                clip.map(|clip| AssemblyPiece {
                    index: segment.index,
                    speaker: segment.speaker.clone(),
                    continuation: segment.continuation,
                    clip,
                })
            })
            .collect();

        if pieces.is_empty() {
            let failed: Vec<usize> = failures.iter().map(|f| f.index).collect();
            return Err(PodcastError::Synthesis {
                failed,
                message: "no segment could be synthesized".to_string(),
            });
        }

        tracing::info!(
            synthesized = pieces.len(),
            failed = failures.len(),
            "synthesis finished"
        );
        Ok(SynthesisOutcome { pieces, failures })
    }
}

fn next_request(queue: &Mutex<VecDeque<SynthesisRequest>>) -> Option<SynthesisRequest> {
    // a poisoned queue only means another worker panicked mid-pop
    let mut queue = match queue.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    queue.pop_front()
}

/// Call the provider until it yields a probe-able clip or attempts run out.
async fn synthesize_with_retry(
    synthesizer: &dyn SpeechSynthesizer,
    request: &SynthesisRequest,
    options: &SynthesisOptions,
    abort: &CancellationToken,
) -> std::result::Result<AudioClip, String> {
    let format = synthesizer.output_format();
    let attempts = options.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        if attempt > 1 {
            let delay = options
                .retry_backoff
                .saturating_mul(1 << (attempt - 2).min(16));
            tokio::select! {
                _ = abort.cancelled() => return Err("cancelled".to_string()),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let call = tokio::time::timeout(options.call_timeout, synthesizer.synthesize(request));
        let outcome = tokio::select! {
            _ = abort.cancelled() => return Err("cancelled".to_string()),
            outcome = call => outcome,
        };

        last_error = match outcome {
            Ok(Ok(bytes)) => match AudioClip::probe(bytes, format) {
                Ok(clip) => return Ok(clip),
                Err(e) => e.to_string(),
            },
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {} ms", options.call_timeout.as_millis()),
        };

        tracing::warn!(
            index = request.index,
            attempt,
            max_attempts = attempts,
            error = %last_error,
            "synthesis attempt failed"
        );
    }

    Err(format!("failed after {attempts} attempts: {last_error}"))
}
