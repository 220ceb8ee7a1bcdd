//! Caller-side debouncing of the typing flag

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::ledger::UnreadLedger;
use crate::ChatError;

#[derive(Default)]
struct TypingState {
    generation: u64,
    typing: bool,
    /// Pending clear-out; replaced (and aborted) by every keystroke
    timer: Option<JoinHandle<()>>,
}

impl TypingState {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Sets the typing flag on the first keystroke and clears it after a quiet
/// period without keystrokes
#[derive(Clone)]
pub struct TypingDebouncer {
    ledger: UnreadLedger,
    conversation_id: String,
    member_id: String,
    timeout: Duration,
    state: Arc<Mutex<TypingState>>,
}

impl TypingDebouncer {
    pub fn new(
        ledger: UnreadLedger,
        conversation_id: impl Into<String>,
        member_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            conversation_id: conversation_id.into(),
            member_id: member_id.into(),
            timeout,
            state: Arc::new(Mutex::new(TypingState::default())),
        }
    }

    pub fn is_typing(&self) -> bool {
        self.state.lock().typing
    }

    /// Register a keystroke. Only the first keystroke of a burst writes to
    /// the store; each one pushes the clear-out back by the full timeout.
    pub async fn keystroke(&self) -> Result<(), ChatError> {
        let (generation, was_typing) = {
            let mut state = self.state.lock();
            state.generation += 1;
            let was_typing = state.typing;
            state.typing = true;
            (state.generation, was_typing)
        };

        if !was_typing {
            if let Err(e) = self
                .ledger
                .set_typing(&self.conversation_id, &self.member_id, true)
                .await
            {
                self.state.lock().typing = false;
                return Err(e);
            }
        }

        let this = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(this.timeout).await;
            let expired = {
                let mut state = this.state.lock();
                let expired = state.generation == generation && state.typing;
                if expired {
                    state.typing = false;
                }
                expired
            };
            if expired {
                debug!("Typing timed out for {}", this.member_id);
                if let Err(e) = this
                    .ledger
                    .set_typing(&this.conversation_id, &this.member_id, false)
                    .await
                {
                    warn!("Failed to clear typing flag: {}", e);
                }
            }
        });

        {
            let mut state = self.state.lock();
            if state.generation == generation {
                state.cancel_timer();
                state.timer = Some(timer);
            } else {
                // A newer keystroke or stop() already took over
                timer.abort();
            }
        }
        Ok(())
    }

    /// Clear the flag now, e.g. when the message is sent
    pub async fn stop(&self) -> Result<(), ChatError> {
        let was_typing = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.cancel_timer();
            std::mem::take(&mut state.typing)
        };
        if was_typing {
            self.ledger
                .set_typing(&self.conversation_id, &self.member_id, false)
                .await?;
        }
        Ok(())
    }
}
