//! Interactive confirmation before code runs or risky packages install.

use std::io::{self, BufRead, IsTerminal, Write};

use tracing::warn;

/// What the user is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub prompt: String,
    /// Context shown above the prompt, one entry per line.
    pub details: Vec<String>,
}

pub trait Confirmer: Send + Sync {
    /// Returns true only on explicit approval.
    fn confirm(&self, request: &ConfirmationRequest) -> bool;
}

/// Asks on stderr and reads a `y`/`N` answer from stdin.
pub struct TerminalConfirmer;

impl Confirmer for TerminalConfirmer {
    fn confirm(&self, request: &ConfirmationRequest) -> bool {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            warn!("stdin is not a terminal; treating confirmation as declined (use --yes)");
            return false;
        }

        let mut stderr = io::stderr().lock();
        for line in &request.details {
            let _ = writeln!(stderr, "  {line}");
        }
        let _ = write!(stderr, "{} [y/N] ", request.prompt);
        let _ = stderr.flush();

        let mut answer = String::new();
        if stdin.lock().read_line(&mut answer).is_err() {
            return false;
        }
        is_affirmative(&answer)
    }
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_explicit_yes_is_affirmative() {
        for answer in ["y\n", "Y", " yes ", "YES\r\n"] {
            assert!(is_affirmative(answer), "{answer:?} should confirm");
        }
        for answer in ["", "\n", "n", "no", "yep", "sure"] {
            assert!(!is_affirmative(answer), "{answer:?} should decline");
        }
    }
}
