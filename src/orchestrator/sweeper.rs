//! Periodic idle reset

use super::Orchestrator;
use crate::persona::PersonaId;
use chrono::Local;
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

impl Orchestrator {
    /// Reset every idle, non-busy persona. Returns the personas that were reset.
    ///
    /// The busy flag is read while holding the conversation lock, so an
    /// attempt that starts concurrently sees either the old history or the
    /// fresh one, never a half-reset state.
    pub fn sweep_once(&self, now: Instant) -> Vec<PersonaId> {
        let threshold = self.settings.reset_idle;
        let mut reset = Vec::new();

        for slot in self.slots_in_order() {
            let mut conversation = slot.conversation();
            if slot.gate.is_busy() || !conversation.is_idle(now, threshold) {
                continue;
            }
            let idle_secs = now
                .saturating_duration_since(conversation.last_active())
                .as_secs();
            let dropped = conversation.len() - 1;
            conversation.reset(slot.profile.system_prompt(Local::now()), now);

            let persona = slot.channels.persona;
            tracing::info!(persona = %persona, idle_secs, dropped, "Conversation reset after idle");
            reset.push(persona);
        }
        reset
    }

    /// Sweep on a fixed period until `cancel` fires
    pub async fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = self.settings.sweep_interval.as_secs(),
            reset_idle_secs = self.settings.reset_idle.as_secs(),
            "Idle sweeper started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep_once(Instant::now());
                }
            }
        }
        tracing::info!("Idle sweeper stopped");
    }
}
