// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! User interaction.

use inquire::Confirm as ConfirmPrompt;
use tracing::warn;

/// Layer of indirection for asking the user before destructive actions.
pub trait Confirm {
    /// Ask user a yes or no question.
    fn confirm(&self, prompt: &str) -> bool;
}

/// Ask user interactively through the terminal.
///
/// Defaults to "no". If the prompt cannot be displayed, e.g., standard input
/// is not a terminal, the answer is "no" as well.
#[derive(Debug, Default, Clone, Copy)]
pub struct InquireConfirm;

impl Confirm for InquireConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        match ConfirmPrompt::new(prompt).with_default(false).prompt() {
            Ok(answer) => answer,
            Err(err) => {
                warn!("cannot ask for confirmation: {err}");
                false
            }
        }
    }
}

/// Answer every question with "yes".
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

impl<C: Confirm + ?Sized> Confirm for &C {
    fn confirm(&self, prompt: &str) -> bool {
        (**self).confirm(prompt)
    }
}
