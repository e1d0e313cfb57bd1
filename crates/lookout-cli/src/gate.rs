//! Startup mode selection.

use clap::ValueEnum;
use rfd::{MessageButtons, MessageDialog, MessageDialogResult, MessageLevel};

/// What the session does once it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Capture a reference photo, then recognize faces and count people.
    Find,
    /// Count people only.
    Count,
    /// Recognize faces against the existing reference folder.
    Recognize,
}

impl Mode {
    /// Mode picked by the yes/no question "Do you want to find someone?".
    pub fn from_answer(find_someone: bool) -> Self {
        if find_someone {
            Mode::Find
        } else {
            Mode::Count
        }
    }
}

/// Ask the user with a blocking desktop dialog.
pub fn ask() -> Mode {
    let answer = MessageDialog::new()
        .set_level(MessageLevel::Info)
        .set_title("Find Someone")
        .set_description("Do you want to find someone?")
        .set_buttons(MessageButtons::YesNo)
        .show();
    let mode = Mode::from_answer(answer == MessageDialogResult::Yes);
    tracing::info!(?mode, "mode chosen");
    mode
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_maps_to_mode() {
        assert_eq!(Mode::from_answer(true), Mode::Find);
        assert_eq!(Mode::from_answer(false), Mode::Count);
    }

    #[test]
    fn test_mode_parses_from_cli() {
        assert_eq!(Mode::from_str("recognize", true).unwrap(), Mode::Recognize);
        assert!(Mode::from_str("track", true).is_err());
    }
}
