//! Terminal prompts for the Dropbox wizard.

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Password};
use rtools_remote::WizardPrompt;
use rtools_shared::{Result, RtoolsError};

pub(crate) struct TerminalPrompt {
    theme: ColorfulTheme,
}

impl TerminalPrompt {
    pub(crate) fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

fn prompt_error(e: dialoguer::Error) -> RtoolsError {
    RtoolsError::Process(format!("prompt failed: {e}"))
}

impl WizardPrompt for TerminalPrompt {
    fn say(&mut self, text: &str) {
        eprintln!("{text}");
    }

    fn ask(&mut self, label: &str, default: Option<&str>, secret: bool) -> Result<String> {
        if secret {
            let prompt = match default {
                Some(_) => format!("{label} (enter keeps current)"),
                None => label.to_string(),
            };
            let value = Password::with_theme(&self.theme)
                .with_prompt(prompt)
                .allow_empty_password(true)
                .interact()
                .map_err(prompt_error)?;
            return Ok(match default {
                Some(current) if value.trim().is_empty() => current.to_string(),
                _ => value,
            });
        }

        let input = Input::<String>::with_theme(&self.theme)
            .with_prompt(label)
            .allow_empty(true);
        let input = match default {
            Some(current) => input.default(current.to_string()),
            None => input,
        };
        input.interact_text().map_err(prompt_error)
    }
}
