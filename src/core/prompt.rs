//! Interactive confirmation
//!
//! Install, uninstall and the script content check ask the user before
//! going ahead. The [`Prompter`] trait keeps that decision swappable.

use crate::error::{DispatchError, Result};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::IsTerminal;
use tracing::warn;

/// Asks yes/no questions
pub trait Prompter {
    /// Ask `prompt`; `default` is the answer on plain Enter
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool>;
}

/// Prompts on the terminal. Without a terminal on stdin every question
/// gets its default answer.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    pub fn new() -> Self {
        Self
    }
}

impl Prompter for TerminalPrompter {
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        if !std::io::stdin().is_terminal() {
            warn!(
                "{} (no terminal, answering {})",
                prompt,
                if default { "yes" } else { "no" }
            );
            return Ok(default);
        }

        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()
            .map_err(|e| match e {
                dialoguer::Error::IO(io) if io.kind() == std::io::ErrorKind::Interrupted => {
                    DispatchError::Interrupted
                }
                other => DispatchError::validation(format!("Prompt failed: {other}")),
            })
    }
}

/// Answers from a fixed script, then falls back to a default answer.
/// Records every question asked.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: RefCell<VecDeque<bool>>,
    fallback: bool,
    asked: RefCell<Vec<String>>,
}

impl ScriptedPrompter {
    /// Answer every question with `answer`
    pub fn always(answer: bool) -> Self {
        Self {
            fallback: answer,
            ..Self::default()
        }
    }

    /// Answer with `answers` in order, then `false`
    pub fn with_answers(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: RefCell::new(answers.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Questions asked so far
    pub fn asked(&self) -> Vec<String> {
        self.asked.borrow().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&self, prompt: &str, _default: bool) -> Result<bool> {
        self.asked.borrow_mut().push(prompt.to_string());
        Ok(self
            .answers
            .borrow_mut()
            .pop_front()
            .unwrap_or(self.fallback))
    }
}
