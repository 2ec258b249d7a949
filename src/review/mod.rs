//! Pending-edit review workflow.
//!
//! A batch of proposed edits is presented as a numbered set. The user opens
//! one at a time to inspect its diff, then applies it, skips it, or drops it
//! and returns to the list. Applying removes the entry, so no edit can be
//! applied twice.

mod summary;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

use crate::actions::{Action, CodeEdit, EditType};
use crate::executor::{BatchReport, ExecutionResult, Executor};

pub use summary::{format_summary, DiffView};

/// Where the review workflow currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewState {
    Idle,
    Presenting,
    Reviewing(usize),
}

impl fmt::Display for ReviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewState::Idle => f.write_str("idle"),
            ReviewState::Presenting => f.write_str("presenting edits"),
            ReviewState::Reviewing(index) => write!(f, "reviewing edit {}", index),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReviewError {
    #[error("no pending edit numbered {0}")]
    InvalidIndex(usize),
    #[error("cannot {operation} while {state}")]
    WrongState {
        operation: &'static str,
        state: ReviewState,
    },
}

/// A proposed edit awaiting review. This is also the wire shape of the
/// `edits` list in a chat result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEdit {
    pub file_path: String,
    /// Loaded lazily when the edit is first opened.
    #[serde(default)]
    pub original_content: Option<String>,
    #[serde(default)]
    pub new_content: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub edit_type: EditType,
}

impl PendingEdit {
    pub fn to_action(&self) -> Action {
        Action::CodeEdit(CodeEdit {
            file_path: self.file_path.clone(),
            content: self.new_content.clone(),
            edit_type: self.edit_type,
            description: self.description.clone(),
        })
    }
}

impl From<CodeEdit> for PendingEdit {
    fn from(edit: CodeEdit) -> Self {
        Self {
            file_path: edit.file_path,
            original_content: None,
            new_content: edit.content,
            description: edit.description,
            edit_type: edit.edit_type,
        }
    }
}

/// What a line of user input means in the current review state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Review(usize),
    /// A number that matches no pending edit.
    OutOfRange(String),
    ApplyAll,
    SkipAll,
    Chat(String),
}

/// Client-side review state over one batch of edits.
pub struct ReviewSession {
    executor: Executor,
    pending: BTreeMap<usize, PendingEdit>,
    state: ReviewState,
}

impl ReviewSession {
    pub fn new(executor: Executor) -> Self {
        Self {
            executor,
            pending: BTreeMap::new(),
            state: ReviewState::Idle,
        }
    }

    pub fn state(&self) -> ReviewState {
        self.state
    }

    pub fn pending(&self) -> &BTreeMap<usize, PendingEdit> {
        &self.pending
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Replace the pending set with a new batch, numbered from 1.
    pub fn present(&mut self, edits: Vec<PendingEdit>) -> ReviewState {
        self.pending = edits
            .into_iter()
            .enumerate()
            .map(|(i, edit)| (i + 1, edit))
            .collect();
        self.state = if self.pending.is_empty() {
            ReviewState::Idle
        } else {
            ReviewState::Presenting
        };
        debug!("Presenting {} pending edit(s)", self.pending.len());
        self.state
    }

    /// Numbered summary of what is still pending.
    pub fn summary(&self) -> String {
        format_summary(self.pending.iter().map(|(index, edit)| (*index, edit)))
    }

    /// Open edit `index` for review.
    pub async fn select(&mut self, index: usize) -> Result<DiffView, ReviewError> {
        if self.state == ReviewState::Idle {
            return Err(self.wrong_state("select an edit"));
        }
        let Some(edit) = self.pending.get_mut(&index) else {
            return Err(ReviewError::InvalidIndex(index));
        };

        if edit.original_content.is_none() {
            let original = match edit.edit_type {
                EditType::Create => String::new(),
                EditType::Modify | EditType::Delete => self
                    .executor
                    .read_original(&edit.file_path)
                    .await
                    .unwrap_or_default(),
            };
            edit.original_content = Some(original);
        }

        self.state = ReviewState::Reviewing(index);
        Ok(DiffView {
            index,
            file_path: edit.file_path.clone(),
            edit_type: edit.edit_type,
            description: edit.description.clone(),
            original: edit.original_content.clone().unwrap_or_default(),
            proposed: edit.new_content.clone(),
        })
    }

    /// Apply the edit under review. The entry is removed whether or not the
    /// write succeeds.
    pub async fn apply_current(&mut self) -> Result<ExecutionResult, ReviewError> {
        let index = self.current("apply the current edit")?;
        let edit = self
            .pending
            .remove(&index)
            .ok_or(ReviewError::InvalidIndex(index))?;
        let result = self.executor.execute(&edit.to_action()).await;
        info!("Applied edit {} ({}): success={}", index, edit.file_path, result.success);
        self.return_to_list();
        Ok(result)
    }

    /// Leave the edit under review pending and go back to the list.
    pub fn skip_current(&mut self) -> Result<(), ReviewError> {
        self.current("skip the current edit")?;
        self.state = ReviewState::Presenting;
        Ok(())
    }

    /// Drop the edit under review without applying it.
    pub fn view_others(&mut self) -> Result<(), ReviewError> {
        let index = self.current("dismiss the current edit")?;
        self.pending.remove(&index);
        self.return_to_list();
        Ok(())
    }

    /// Apply every pending edit in index order and clear the set.
    pub async fn apply_all(&mut self) -> Result<BatchReport, ReviewError> {
        if self.state == ReviewState::Idle {
            return Err(self.wrong_state("apply all edits"));
        }
        let actions: Vec<Action> = self.pending.values().map(PendingEdit::to_action).collect();
        self.pending.clear();
        self.state = ReviewState::Idle;
        Ok(self.executor.execute_batch(&actions).await)
    }

    /// Discard every pending edit. Returns how many were dropped.
    pub fn skip_all(&mut self) -> Result<usize, ReviewError> {
        if self.state == ReviewState::Idle {
            return Err(self.wrong_state("skip all edits"));
        }
        let dropped = self.pending.len();
        self.pending.clear();
        self.state = ReviewState::Idle;
        Ok(dropped)
    }

    /// Classify a line of user input.
    pub fn interpret_input(&self, text: &str) -> InputCommand {
        let trimmed = text.trim();
        let digits = trimmed
            .strip_prefix(|c: char| c == '+' || c == '-')
            .unwrap_or(trimmed);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            // Negative or too large for usize: never a pending index.
            let index = if trimmed.starts_with('-') {
                None
            } else {
                digits.parse::<usize>().ok()
            };
            if let Some(n) = index.filter(|n| self.pending.contains_key(n)) {
                return InputCommand::Review(n);
            }
            if !self.pending.is_empty() {
                return InputCommand::OutOfRange(trimmed.to_string());
            }
        }
        if self.state != ReviewState::Idle {
            match trimmed.to_ascii_lowercase().as_str() {
                "all" => return InputCommand::ApplyAll,
                "skip" | "none" => return InputCommand::SkipAll,
                _ => {}
            }
        }
        InputCommand::Chat(text.to_string())
    }

    fn current(&self, operation: &'static str) -> Result<usize, ReviewError> {
        match self.state {
            ReviewState::Reviewing(index) => Ok(index),
            _ => Err(self.wrong_state(operation)),
        }
    }

    fn wrong_state(&self, operation: &'static str) -> ReviewError {
        ReviewError::WrongState {
            operation,
            state: self.state,
        }
    }

    fn return_to_list(&mut self) {
        self.state = if self.pending.is_empty() {
            ReviewState::Idle
        } else {
            ReviewState::Presenting
        };
    }
}
