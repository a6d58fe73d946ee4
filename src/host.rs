//! What the core asks of the application embedding it: prompts, a log line
//! sink, and swapping the visible working context for calibration material.

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

/// Opaque reference to something the host is displaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub u64);

#[derive(Debug, Error)]
pub enum HostError {
    #[error("could not open calibration material: {0}")]
    OpenMaterial(String),
}

#[allow(async_fn_in_trait)]
pub trait Host {
    /// Show `message` with `choices`; `None` when dismissed.
    async fn notify(&self, message: &str, choices: &[&str]) -> Option<String>;

    fn log(&self, line: &str);

    /// The editable context currently in front of the user, if any.
    fn active_context(&self) -> Option<ContextHandle>;

    /// Display `content` in place of the current context.
    fn open_material(&self, content: &str) -> Result<ContextHandle, HostError>;

    fn restore_material(&self, prior: ContextHandle);

    /// Drop whatever was created to show the material.
    fn release_material(&self, material: ContextHandle);
}

/// A host on stdin/stdout: prompts list numbered choices and read the answer
/// from the next input line.
pub struct TerminalHost {
    input: Mutex<Lines<BufReader<Stdin>>>,
}

impl Default for TerminalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalHost {
    pub fn new() -> Self {
        Self {
            input: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

/// Resolve a typed answer against the offered choices, by number or by text.
pub fn pick_choice(answer: &str, choices: &[&str]) -> Option<String> {
    let answer = answer.trim();
    if answer.is_empty() {
        return None;
    }
    if let Ok(n) = answer.parse::<usize>()
        && (1..=choices.len()).contains(&n)
    {
        return Some(choices[n - 1].to_string());
    }
    choices
        .iter()
        .find(|c| c.eq_ignore_ascii_case(answer))
        .map(|c| c.to_string())
}

impl Host for TerminalHost {
    async fn notify(&self, message: &str, choices: &[&str]) -> Option<String> {
        println!("\n{}", message);
        if choices.is_empty() {
            return None;
        }
        for (i, c) in choices.iter().enumerate() {
            println!("  [{}] {}", i + 1, c);
        }
        println!("  (empty line to cancel)");
        let mut input = self.input.lock().await;
        match input.next_line().await {
            Ok(Some(line)) => pick_choice(&line, choices),
            Ok(None) | Err(_) => None,
        }
    }

    fn log(&self, line: &str) {
        println!("{}", line);
    }

    fn active_context(&self) -> Option<ContextHandle> {
        Some(ContextHandle(0))
    }

    fn open_material(&self, content: &str) -> Result<ContextHandle, HostError> {
        println!("{}", content);
        Ok(ContextHandle(1))
    }

    fn restore_material(&self, prior: ContextHandle) {
        tracing::debug!("[host] restored context {:?}", prior);
    }

    fn release_material(&self, material: ContextHandle) {
        tracing::debug!("[host] released material {:?}", material);
    }
}
