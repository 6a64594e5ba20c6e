//! Dispatch loop — single consumer of the fetch channel.
//!
//! Per message: extract content, substitute it into the prompt template,
//! summarize, deliver to every sink. Any per-message failure is logged
//! and the loop moves on; a bad message never halts mailbox monitoring.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::extract;
use crate::fetch::FetchedMail;
use crate::llm::Summarizer;
use crate::sinks::SummarySink;

/// Placeholder in the prompt template replaced by the chat content.
pub const CHAT_PLACEHOLDER: &str = "[CHAT-RECORD]";

pub struct Dispatcher {
    summarizer: Arc<dyn Summarizer>,
    sinks: Vec<Arc<dyn SummarySink>>,
    prompt_template: String,
}

impl Dispatcher {
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        sinks: Vec<Arc<dyn SummarySink>>,
        prompt_template: String,
    ) -> Self {
        Self {
            summarizer,
            sinks,
            prompt_template,
        }
    }

    pub fn build_prompt(&self, content: &str) -> String {
        self.prompt_template.replace(CHAT_PLACEHOLDER, content)
    }

    /// Consume messages in FIFO order until the channel is closed and
    /// drained.
    pub async fn run(self, mut rx: mpsc::Receiver<FetchedMail>) {
        info!("dispatcher started");
        while let Some(mail) = rx.recv().await {
            self.handle(&mail).await;
        }
        info!("dispatcher stopped");
    }

    /// Process one message end to end.
    pub async fn handle(&self, mail: &FetchedMail) {
        let Some(content) = extract::extract(&mail.sections) else {
            warn!(seq = mail.seq, "no readable body section, skipping message");
            return;
        };

        let prompt = self.build_prompt(&content);
        let summary = match self.summarizer.summarize(&prompt).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(seq = mail.seq, "summarization failed: {e}");
                return;
            }
        };

        for sink in &self.sinks {
            if let Err(e) = sink.deliver(&summary, mail).await {
                error!(sink = sink.name(), seq = mail.seq, "summary delivery failed: {e}");
            }
        }
    }
}
