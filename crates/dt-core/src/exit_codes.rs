//! Exit codes for the dt-core CLI.
//!
//! Exit code ranges:
//! - 0-1: Operational outcomes (the payload was produced)
//! - 10-19: User/input errors (fixable by changing arguments, config or data)
//! - 20-29: Internal, I/O and numerical failures

use dt_common::Error;

/// Exit codes for dt-core operations.
///
/// These codes are a stable contract for scripts driving the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Everything requested was produced.
    Clean = 0,

    /// A batch finished with some failed ranks/runs, or the stability verdict was negative.
    PartialResult = 1,

    /// Invalid command-line arguments.
    ArgsError = 10,

    /// Input validation failed (matrix shapes, rank bounds, missing artifacts).
    InputError = 11,

    /// Configuration could not be loaded or validated.
    ConfigError = 12,

    /// Internal error (bug - please report).
    InternalError = 20,

    /// Artifact or input I/O failure.
    IoError = 21,

    /// Decomposition failed numerically.
    NumericalError = 22,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// True for codes that carry a usable payload.
    pub fn is_operational(self) -> bool {
        (self as i32) < 10
    }

    /// True for errors the user can fix (codes 10-19).
    pub fn is_user_error(self) -> bool {
        (10..20).contains(&(self as i32))
    }

    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }

    /// Stable name for JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::PartialResult => "OK_PARTIAL",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::InputError => "ERR_INPUT",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
            ExitCode::NumericalError => "ERR_NUMERICAL",
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Config(_) | Error::InvalidConfig(_) | Error::UnknownPreset(_) => {
                ExitCode::ConfigError
            }
            Error::InputValidation(_)
            | Error::ShapeMismatch { .. }
            | Error::NoUsableInput(_)
            | Error::RankOutOfBounds { .. }
            | Error::ZeroTensor
            | Error::ArtifactNotFound { .. } => ExitCode::InputError,
            Error::Decomposition(_) | Error::Numerical(_) | Error::AllAttemptsFailed { .. } => {
                ExitCode::NumericalError
            }
            Error::ArtifactCorrupted(_)
            | Error::IncompatibleSchema { .. }
            | Error::Io(_)
            | Error::Json(_) => ExitCode::IoError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_values_are_stable() {
        assert_eq!(ExitCode::Clean.as_i32(), 0);
        assert_eq!(ExitCode::PartialResult.as_i32(), 1);
        assert_eq!(ExitCode::ArgsError.as_i32(), 10);
        assert_eq!(ExitCode::InputError.as_i32(), 11);
        assert_eq!(ExitCode::ConfigError.as_i32(), 12);
        assert_eq!(ExitCode::InternalError.as_i32(), 20);
        assert_eq!(ExitCode::IoError.as_i32(), 21);
        assert_eq!(ExitCode::NumericalError.as_i32(), 22);
    }

    #[test]
    fn test_ranges() {
        assert!(ExitCode::PartialResult.is_operational());
        assert!(!ExitCode::PartialResult.is_error());
        assert!(ExitCode::InputError.is_user_error());
        assert!(!ExitCode::IoError.is_user_error());
        assert!(ExitCode::NumericalError.is_error());
    }

    #[test]
    fn test_display() {
        assert_eq!(ExitCode::InputError.to_string(), "ERR_INPUT (11)");
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(ExitCode::from(&Error::ZeroTensor), ExitCode::InputError);
        assert_eq!(
            ExitCode::from(&Error::AllAttemptsFailed { attempted: 3 }),
            ExitCode::NumericalError
        );
        assert_eq!(
            ExitCode::from(&Error::InvalidConfig("x".into())),
            ExitCode::ConfigError
        );
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(ExitCode::from(&io), ExitCode::IoError);
    }
}
