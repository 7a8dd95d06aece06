use std::fmt;
use std::io;

pub(crate) type TmResult<T> = Result<T, Error>;

/// Errors that can occur when loading grammars or tokenizing with them
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred when reading a grammar file
    Io(io::Error),

    /// JSON parsing failed when loading a grammar.
    Json(serde_json::Error),

    /// A rule is malformed, eg a `begin` without an `end` or a `while`.
    #[allow(missing_docs)]
    Definition { location: String, message: String },

    /// A pattern failed to compile.
    /// Patterns with back-references are only compiled once they are resolved against a
    /// begin match so this can also come out of a tokenize call.
    #[allow(missing_docs)]
    RegexCompile {
        pattern: String,
        location: String,
        message: String,
    },

    /// A scope selector could not be parsed.
    #[allow(missing_docs)]
    ScopeSelectorSyntax {
        selector: String,
        position: usize,
        message: String,
    },

    /// A grammar was not found in the registry.
    GrammarNotFound(String),

    /// The registry can't hold any more grammars.
    RegistryFull,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "JSON parsing error: {}", err),
            Error::Definition { location, message } => {
                write!(f, "invalid rule at {}: {}", location, message)
            }
            Error::RegexCompile {
                pattern,
                location,
                message,
            } => write!(
                f,
                "regex compilation error at {} for /{}/: {}",
                location, pattern, message
            ),
            Error::ScopeSelectorSyntax {
                selector,
                position,
                message,
            } => write!(
                f,
                "invalid scope selector '{}' at offset {}: {}",
                selector, position, message
            ),
            Error::GrammarNotFound(name) => write!(f, "grammar '{}' not found", name),
            Error::RegistryFull => write!(f, "too many grammars in the registry"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Definition { .. }
            | Error::RegexCompile { .. }
            | Error::ScopeSelectorSyntax { .. }
            | Error::GrammarNotFound(_)
            | Error::RegistryFull => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}
