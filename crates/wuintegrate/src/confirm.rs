use std::fmt::Write as _;
use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use log::warn;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use wuintegrate_model::{Confirmation, ResolutionSummary};

/// Shows the resolved updates on stdout and waits for a yes/no on stdin.
///
/// Cancelling the token declines at once, even while stdin is still blocked.
#[derive(Debug, Clone)]
pub struct ConsolePrompt {
    cancel: CancellationToken,
}

impl ConsolePrompt {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

#[async_trait]
impl Confirmation for ConsolePrompt {
    async fn confirm(&self, summary: &ResolutionSummary) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }

        let text = render_summary(summary);
        let (answer_tx, answer_rx) = oneshot::channel();
        // Detached, so a blocked stdin read cannot hold up runtime shutdown.
        let reader = std::thread::Builder::new()
            .name("confirm-prompt".to_string())
            .spawn(move || {
                let _ = answer_tx.send(prompt_for_answer(&text));
            });
        if let Err(err) = reader {
            warn!("Could not start the confirmation prompt: {err}");
            return false;
        }

        await_answer(answer_rx, &self.cancel).await
    }
}

fn prompt_for_answer(text: &str) -> io::Result<String> {
    // The stdout lock is released before blocking so log lines can still print.
    {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{text}Download these updates? [y/N] ")?;
        stdout.flush()?;
    }

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

async fn await_answer(
    answer: oneshot::Receiver<io::Result<String>>,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            warn!("Interrupted before the download was confirmed");
            false
        }
        answer = answer => match answer {
            Ok(Ok(line)) => is_yes(&line),
            Ok(Err(err)) => {
                warn!("Could not read the answer: {err}");
                false
            }
            Err(_) => {
                warn!("Confirmation prompt stopped without an answer");
                false
            }
        },
    }
}

fn render_summary(summary: &ResolutionSummary) -> String {
    let mut text = format!(
        "{} update(s) apply to {}:\n",
        summary.len(),
        summary.target
    );
    for update in &summary.updates {
        let _ = write!(text, "  {:<10} revision {}", update.kb_number, update.revision_id);
        if let Some(cabinet) = &update.cabinet {
            let _ = write!(text, " ({cabinet})");
        }
        if update.update_id.is_none() {
            text.push_str(" [no update id, cannot be downloaded]");
        }
        text.push('\n');
    }
    text
}

fn is_yes(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
