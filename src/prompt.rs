use std::io::{self, Write};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, question: &str) -> Result<bool>;
}

/// Asks on the terminal. Only `y`/`yes` count as agreement.
pub struct TerminalConfirm;

#[async_trait]
impl Confirm for TerminalConfirm {
    async fn confirm(&self, question: &str) -> Result<bool> {
        let question = question.to_string();
        tokio::task::spawn_blocking(move || {
            print!("{} [y/N] ", question);
            io::stdout().flush()?;
            let mut input = String::new();
            io::stdin().read_line(&mut input)?;
            Ok(is_yes(&input))
        })
        .await
        .map_err(|e| anyhow!("confirm task join error: {}", e))?
    }
}

/// `--yes`: every question is answered with yes.
pub struct AssumeYes;

#[async_trait]
impl Confirm for AssumeYes {
    async fn confirm(&self, question: &str) -> Result<bool> {
        tracing::info!("prompt: assuming yes for \"{}\"", question);
        Ok(true)
    }
}

fn is_yes(input: &str) -> bool {
    matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
