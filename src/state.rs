use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Encode,
    Decode,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Encode, Mode::Decode];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Encode => "encode",
            Mode::Decode => "decode",
        }
    }

    pub fn parse(s: &str) -> Option<Mode> {
        match s.trim().to_ascii_lowercase().as_str() {
            "encode" | "hide" => Some(Mode::Encode),
            "decode" | "extract" | "reveal" => Some(Mode::Decode),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    AwaitingInput,
    InFlight,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Encode succeeded and the returned image was written here.
    Saved(PathBuf),
    Revealed(String),
    /// Decode succeeded but the image carries no message.
    NothingHidden,
    Failed(String),
    /// Submit was ignored because the mode was not ready (or already busy).
    Rejected(OperationState),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Outcome::Saved(_) | Outcome::Revealed(_) | Outcome::NothingHidden
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse_accepts_aliases() {
        assert_eq!(Mode::parse("Encode"), Some(Mode::Encode));
        assert_eq!(Mode::parse(" hide "), Some(Mode::Encode));
        assert_eq!(Mode::parse("extract"), Some(Mode::Decode));
        assert_eq!(Mode::parse("both"), None);
    }

    #[test]
    fn test_empty_decode_counts_as_success() {
        assert!(Outcome::NothingHidden.is_success());
        assert!(!Outcome::Failed("x".into()).is_success());
        assert!(!Outcome::Rejected(OperationState::Idle).is_success());
    }
}
