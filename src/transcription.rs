//! Per-utterance transcript accumulation behind the wake phrase.
//!
//! The speech stream is noisy: text is cumulative within one utterance,
//! restarts across utterances, and finals may be re-delivered. The
//! accumulator arms on a wake-phrase match, folds confirmed utterances into
//! a growing transcript, keeps the newest interim text separately, and
//! emits the combined query once the stream has been silent for the
//! configured window.
//!
//! State machine: idle → (wake detected) → listening → (silence fires) →
//! idle, with the query handed to the owning user's worker. A fresh wake
//! match can re-arm while an earlier query is still being processed; the
//! queries queue and run in order.

use crate::hardware::TranscriptionEvent;
use crate::wake::WakeMatcher;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// A complete accumulated query, ready for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryReady {
    pub query: String,
    pub speaker_id: Option<String>,
}

struct AccumState {
    listening: bool,
    /// Text of utterances whose final event was seen, single-space joined.
    confirmed: String,
    /// Cumulative text of the in-flight utterance, overwritten per event.
    current: String,
    last_confirmed_utterance: Option<String>,
    /// Dedup for id-less finals: a second final with no interim in between
    /// is a re-delivery.
    saw_final_since_interim: bool,
    last_final_speaker: Option<String>,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every (re)arm and on teardown; a firing timer with a stale
    /// epoch is ignored.
    epoch: u64,
}

impl AccumState {
    fn reset_idle(&mut self) {
        self.listening = false;
        self.confirmed.clear();
        self.current.clear();
        self.last_confirmed_utterance = None;
        self.saw_final_since_interim = false;
        self.last_final_speaker = None;
    }
}

/// Wake-gated transcript accumulator for one user.
pub struct TranscriptAccumulator {
    user_id: String,
    matcher: Arc<WakeMatcher>,
    silence: Duration,
    query_tx: mpsc::UnboundedSender<QueryReady>,
    /// Set while no hardware session is attached; gates query emission.
    destroyed: AtomicBool,
    state: Mutex<AccumState>,
}

impl TranscriptAccumulator {
    #[must_use]
    pub fn new(
        user_id: &str,
        matcher: Arc<WakeMatcher>,
        silence_ms: u64,
        query_tx: mpsc::UnboundedSender<QueryReady>,
    ) -> Arc<Self> {
        Arc::new(Self {
            user_id: user_id.to_owned(),
            matcher,
            silence: Duration::from_millis(silence_ms),
            query_tx,
            destroyed: AtomicBool::new(false),
            state: Mutex::new(AccumState {
                listening: false,
                confirmed: String::new(),
                current: String::new(),
                last_confirmed_utterance: None,
                saw_final_since_interim: false,
                last_final_speaker: None,
                timer: None,
                epoch: 0,
            }),
        })
    }

    /// Feed one transcription event.
    pub fn handle_event(self: &Arc<Self>, event: &TranscriptionEvent) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if !state.listening {
            let Some(m) = self.matcher.detect(&event.text) else {
                return;
            };
            debug!(user_id = %self.user_id, "wake phrase detected");
            state.reset_idle();
            state.listening = true;
            state.last_final_speaker = event.speaker_id.clone();
            if event.is_final {
                // The wake utterance is already confirmed; its tail belongs
                // to the confirmed transcript, not the interim slot.
                state.confirmed = m.tail;
                state.last_confirmed_utterance = event.utterance_id.clone();
                state.saw_final_since_interim = true;
            } else {
                state.current = m.tail;
            }
            self.arm(&mut state);
            return;
        }

        let stripped = self.matcher.strip_residue(&event.text);
        let clean = self.matcher.remove_wake_word(&stripped);

        if event.is_final {
            let new_utterance = match (&event.utterance_id, &state.last_confirmed_utterance) {
                (Some(id), Some(last)) => id != last,
                (Some(_), None) => true,
                (None, _) => !state.saw_final_since_interim,
            };
            if !new_utterance {
                // SDK re-delivered a final; treat as a no-op.
                return;
            }
            if !clean.is_empty() {
                if !state.confirmed.is_empty() {
                    state.confirmed.push(' ');
                }
                state.confirmed.push_str(&clean);
            }
            state.current.clear();
            state.last_confirmed_utterance = event.utterance_id.clone();
            state.saw_final_since_interim = true;
            state.last_final_speaker = event.speaker_id.clone();
            self.arm(&mut state);
        } else {
            state.current = clean;
            state.saw_final_since_interim = false;
            self.arm(&mut state);
        }
    }

    /// (Re)arm the silence timer.
    fn arm(self: &Arc<Self>, state: &mut AccumState) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.epoch += 1;
        let epoch = state.epoch;
        let this = Arc::clone(self);
        let silence = self.silence;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(silence).await;
            this.fire(epoch);
        }));
    }

    /// Silence window elapsed: emit the accumulated query and go idle.
    fn fire(self: &Arc<Self>, epoch: u64) {
        let ready = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if epoch != state.epoch || !state.listening {
                return;
            }

            let mut full = state.confirmed.clone();
            if !state.current.is_empty() {
                if !full.is_empty() {
                    full.push(' ');
                }
                full.push_str(&state.current);
            }
            // Safety net: a residue or wake fragment can survive joining.
            let full = self.matcher.strip_residue(full.trim());
            let full = self.matcher.remove_wake_word(&full);

            let speaker_id = state.last_final_speaker.clone();
            state.reset_idle();
            state.timer = None;

            if full.is_empty() {
                None
            } else {
                Some(QueryReady {
                    query: full,
                    speaker_id,
                })
            }
        };

        if let Some(ready) = ready
            && !self.destroyed.load(Ordering::Acquire)
        {
            debug!(user_id = %self.user_id, query = %ready.query, "query ready");
            let _ = self.query_tx.send(ready);
        }
    }

    /// Cancel the silence timer and drop any partial accumulation.
    pub fn detach(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.epoch += 1;
        state.reset_idle();
    }

    /// Gate or re-enable query emission. Reset to `false` whenever the
    /// accumulator is re-attached to a hardware session.
    pub fn set_destroyed(&self, destroyed: bool) {
        self.destroyed.store(destroyed, Ordering::Release);
    }

    /// Whether a wake phrase has armed the accumulator.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .listening
    }
}
