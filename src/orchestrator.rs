//! Per-persona trigger pipeline
//!
//! A change notification is debounced, then a single attempt runs behind the
//! persona's gate: read and clear the input, extend the conversation, call the
//! provider without holding any lock, record the reply, write the output.
//! Provider failures become a persona-flavored fallback reply.

mod debounce;
mod gate;
mod sweeper;
#[cfg(test)]
pub mod testing;

pub use debounce::TriggerStamp;

use crate::channel::{ChannelError, PersonaChannels};
use crate::config::{FailurePolicy, Settings};
use crate::conversation::Conversation;
use crate::llm::{GenerationParams, LlmErrorKind, LlmRequest, LlmService, Turn};
use crate::persona::{fallback_message, PersonaId, PersonaProfile, ROSTER};
use crate::watcher::ChangeNotification;
use chrono::Local;
use debounce::Debouncer;
use futures::FutureExt;
use gate::Gate;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Everything the pipeline keeps for one persona
struct PersonaSlot {
    channels: PersonaChannels,
    profile: PersonaProfile,
    conversation: Mutex<Conversation>,
    gate: Gate,
    debouncer: Debouncer,
    /// Debounced triggers that survived to fire
    fired: AtomicU64,
}

impl PersonaSlot {
    fn new(channels: PersonaChannels, profile: PersonaProfile) -> Self {
        let conversation = Conversation::new(profile.system_prompt(Local::now()));
        Self {
            channels,
            profile,
            conversation: Mutex::new(conversation),
            gate: Gate::default(),
            debouncer: Debouncer::default(),
            fired: AtomicU64::new(0),
        }
    }

    /// Lock the conversation, recovering from poisoning left by a panicked attempt
    fn conversation(&self) -> MutexGuard<'_, Conversation> {
        self.conversation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// How a single attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Provider reply written to the output channel
    Replied,
    /// Provider failed; fallback written instead
    Fallback(LlmErrorKind),
    /// Another attempt for the persona was already running
    Busy,
    /// Input channel was empty or whitespace-only
    NoInput,
    /// Reading the input or writing the output failed
    ChannelFailed,
    /// Attempt panicked; fallback written instead
    Panicked,
    /// Persona is not part of this orchestrator
    Unknown,
}

pub struct Orchestrator {
    slots: HashMap<PersonaId, Arc<PersonaSlot>>,
    llm: Arc<dyn LlmService>,
    settings: Settings,
}

impl Orchestrator {
    pub fn new(
        personas: impl IntoIterator<Item = (PersonaChannels, PersonaProfile)>,
        llm: Arc<dyn LlmService>,
        settings: Settings,
    ) -> Self {
        let slots = personas
            .into_iter()
            .map(|(channels, profile)| {
                (channels.persona, Arc::new(PersonaSlot::new(channels, profile)))
            })
            .collect();
        Self {
            slots,
            llm,
            settings,
        }
    }

    /// Prepare channel files for the whole roster under `root` and load each
    /// persona's profile
    pub async fn from_root(
        root: &Path,
        llm: Arc<dyn LlmService>,
        settings: Settings,
    ) -> Result<Self, ChannelError> {
        let mut personas = Vec::with_capacity(ROSTER.len());
        for id in ROSTER {
            let channels = PersonaChannels::resolve(root, id).await?;
            channels.ensure().await?;
            let profile = channels.load_profile().await?;
            if profile.custom_prompt.is_some() {
                tracing::info!(persona = %id, "Using custom prompt");
            }
            personas.push((channels, profile));
        }
        Ok(Self::new(personas, llm, settings))
    }

    fn slot(&self, persona: PersonaId) -> Option<&Arc<PersonaSlot>> {
        self.slots.get(&persona)
    }

    /// Slots in roster order
    fn slots_in_order(&self) -> impl Iterator<Item = &Arc<PersonaSlot>> {
        ROSTER.iter().filter_map(|id| self.slots.get(id))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Channel locations, in roster order
    pub fn channels(&self) -> Vec<PersonaChannels> {
        self.slots_in_order().map(|s| s.channels.clone()).collect()
    }

    pub fn history(&self, persona: PersonaId) -> Vec<Turn> {
        self.slot(persona)
            .map(|s| s.conversation().turns().to_vec())
            .unwrap_or_default()
    }

    pub fn is_busy(&self, persona: PersonaId) -> bool {
        self.slot(persona).is_some_and(|s| s.gate.is_busy())
    }

    /// Number of debounced triggers that fired for `persona`
    pub fn attempts_fired(&self, persona: PersonaId) -> u64 {
        self.slot(persona)
            .map_or(0, |s| s.fired.load(Ordering::Relaxed))
    }

    /// Record a trigger for `persona` and schedule an attempt after the
    /// debounce window. Any attempt scheduled earlier and not yet fired is
    /// superseded.
    pub fn trigger(self: &Arc<Self>, persona: PersonaId) -> Option<TriggerStamp> {
        let Some(slot) = self.slot(persona) else {
            tracing::warn!(persona = %persona, "Trigger for unknown persona ignored");
            return None;
        };
        let stamp = slot.debouncer.stamp(Instant::now());
        tracing::trace!(persona = %persona, seq = stamp.seq, "Trigger stamped");

        let this = Arc::clone(self);
        let delay = self.settings.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.fire(persona, stamp).await;
        });
        Some(stamp)
    }

    /// Runs when a scheduled attempt's delay elapses
    async fn fire(&self, persona: PersonaId, stamp: TriggerStamp) {
        let Some(slot) = self.slot(persona) else {
            return;
        };
        if !slot.debouncer.claim(stamp) {
            tracing::trace!(persona = %persona, seq = stamp.seq, "Superseded trigger dropped");
            return;
        }
        let attempt = slot.fired.fetch_add(1, Ordering::Relaxed) + 1;

        let span = tracing::info_span!(
            "attempt",
            persona = %persona,
            attempt,
            id = %Uuid::new_v4(),
            waited_ms = %stamp.at.elapsed().as_millis()
        );
        self.run_attempt(persona).instrument(span).await;
    }

    /// Run one attempt for `persona` right now, bypassing the debounce.
    ///
    /// A panic inside the attempt is answered with the fallback reply before
    /// the gate reopens, so a later attempt's reply is never overwritten by it.
    pub async fn run_attempt(&self, persona: PersonaId) -> AttemptOutcome {
        let Some(slot) = self.slot(persona) else {
            tracing::warn!(persona = %persona, "Attempt for unknown persona");
            return AttemptOutcome::Unknown;
        };

        let Some(_guard) = slot.gate.try_acquire() else {
            tracing::debug!(persona = %persona, "Persona busy, attempt skipped");
            return AttemptOutcome::Busy;
        };

        let panic = match AssertUnwindSafe(self.process(slot, persona))
            .catch_unwind()
            .await
        {
            Ok(outcome) => return outcome,
            Err(panic) => panic,
        };

        let reason = panic_reason(panic.as_ref());
        tracing::error!(persona = %persona, panic = %reason, "Attempt panicked");
        let detail = self.settings.verbose_errors.then_some(reason.as_str());
        let message = fallback_message(persona, detail);
        if let Err(e) = slot.channels.write_output(&message).await {
            tracing::error!(persona = %persona, error = %e, "Failed to write fallback after panic");
        }
        AttemptOutcome::Panicked
    }

    /// Body of an attempt; the caller holds the gate
    async fn process(&self, slot: &PersonaSlot, persona: PersonaId) -> AttemptOutcome {
        let payload = match slot.channels.take_input().await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                tracing::debug!(persona = %persona, "Input empty, nothing to do");
                return AttemptOutcome::NoInput;
            }
            Err(e) => {
                tracing::warn!(persona = %persona, error = %e, "Failed to read input channel");
                return AttemptOutcome::ChannelFailed;
            }
        };

        let (request, appended) = {
            let mut conversation = slot.conversation();
            let appended = conversation.append_user(&payload, Instant::now());
            if !appended {
                tracing::debug!(persona = %persona, "Repeated input, history unchanged");
            }
            let dropped = conversation.trim(self.settings.max_context);
            if dropped > 0 {
                tracing::debug!(persona = %persona, dropped, "Trimmed history");
            }
            let request = LlmRequest {
                turns: conversation.turns().to_vec(),
                params: GenerationParams {
                    max_tokens: self.settings.max_tokens,
                },
            };
            (request, appended)
        };

        let (reply, outcome) = match self.llm.complete(&request).await {
            Ok(response) => {
                let mut conversation = slot.conversation();
                conversation.append_assistant(&response.text, Instant::now());
                conversation.trim(self.settings.max_context);
                (response.text, AttemptOutcome::Replied)
            }
            Err(e) => {
                tracing::warn!(
                    persona = %persona,
                    kind = e.kind.as_str(),
                    retryable = e.kind.is_retryable(),
                    error = %e.message,
                    "Provider call failed, sending fallback"
                );
                if self.settings.failure_policy == FailurePolicy::Discard && appended {
                    slot.conversation().retract_user(&payload);
                }
                let detail = self.settings.verbose_errors.then_some(e.message.as_str());
                (
                    fallback_message(persona, detail),
                    AttemptOutcome::Fallback(e.kind),
                )
            }
        };

        if let Err(e) = slot.channels.write_output(&reply).await {
            tracing::error!(persona = %persona, error = %e, "Failed to write output channel");
            return AttemptOutcome::ChannelFailed;
        }
        tracing::info!(persona = %persona, outcome = ?outcome, chars = reply.len(), "Reply written");
        outcome
    }

    /// Forward change notifications into the debouncer until cancelled or
    /// the detector goes away
    pub async fn run(
        self: Arc<Self>,
        mut notifications: mpsc::Receiver<ChangeNotification>,
        cancel: CancellationToken,
    ) {
        tracing::info!("Notification loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = notifications.recv() => match next {
                    Some(notification) => {
                        tracing::debug!(
                            persona = %notification.persona,
                            kind = ?notification.kind,
                            "Change notification"
                        );
                        self.trigger(notification.persona);
                    }
                    None => break,
                },
            }
        }
        tracing::info!("Notification loop stopped");
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
