//! Terminal consent prompts.

use async_trait::async_trait;
use dialoguer::Confirm;
use pipeline::{ConsentPort, ConsentPrompt};
use tracing::{info, warn};

/// [`ConsentPort`] that asks on the terminal, or approves everything when
/// `--yes` was given.
#[derive(Debug, Clone, Copy)]
pub struct TerminalConsent {
    assume_yes: bool,
}

impl TerminalConsent {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

#[async_trait]
impl ConsentPort for TerminalConsent {
    async fn confirm(&self, prompt: &ConsentPrompt) -> bool {
        let message = prompt.message();
        if self.assume_yes {
            info!(%message, "auto-approved (--yes)");
            return true;
        }

        let answer = tokio::task::spawn_blocking(move || {
            Confirm::new()
                .with_prompt(message)
                .default(false)
                .interact()
        })
        .await;

        match answer {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                warn!(error = %e, "could not read confirmation; treating as declined");
                false
            }
            Err(e) => {
                warn!(error = %e, "confirmation prompt panicked; treating as declined");
                false
            }
        }
    }
}
