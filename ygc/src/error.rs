use crate::ast::Loc;

/// Phase and nature of a failure, mapped to a user-visible diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Source program could not be tokenized or parsed.
    Parse,
    /// The program is not well typed.
    Type,
    /// The program is well typed but violates a compilation rule
    /// (secret-dependent loop bound, unknown identifier, arity mismatch, ...).
    Semantic,
    /// A compiler invariant was violated; indicates a bug.
    Internal,
    /// File or JSON input/output failure.
    Io,
    /// Curve point or OT protocol failure.
    Crypto,
    /// Garbled evaluation failure (stream exhausted, table count mismatch).
    Eval,
}

impl ErrorKind {
    fn phase(self) -> &'static str {
        match self {
            ErrorKind::Parse => "parse error",
            ErrorKind::Type => "type error",
            ErrorKind::Semantic => "semantic error",
            ErrorKind::Internal => "internal error",
            ErrorKind::Io => "i/o error",
            ErrorKind::Crypto => "crypto error",
            ErrorKind::Eval => "evaluation error",
        }
    }
}

/// A one-line diagnostic: the phase, the offending source position when
/// available, and the nature of the fault. The first error of a compilation
/// is fatal; no partial output is written.
#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub loc: Option<Loc>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.loc {
            Some(loc) => write!(f, "{} at {}: {}", self.kind.phase(), loc, self.message),
            None => write!(f, "{}: {}", self.kind.phase(), self.message),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error { kind, message: message.into(), loc: None }
    }

    pub fn at(kind: ErrorKind, message: impl Into<String>, loc: Loc) -> Self {
        Error { kind, message: message.into(), loc: Some(loc) }
    }

    pub fn parse(message: impl Into<String>, loc: Loc) -> Self {
        Self::at(ErrorKind::Parse, message, loc)
    }

    pub fn type_error(message: impl Into<String>, loc: Loc) -> Self {
        Self::at(ErrorKind::Type, message, loc)
    }

    pub fn semantic(message: impl Into<String>, loc: Loc) -> Self {
        Self::at(ErrorKind::Semantic, message, loc)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn crypto(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Crypto, message)
    }

    pub fn eval(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Eval, message)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::io(format!("malformed JSON: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_phase_and_location() {
        let e = Error::type_error("int and bool are incompatible", Loc { line: 3, col: 7 });
        assert_eq!(e.to_string(), "type error at 3:7: int and bool are incompatible");

        let e = Error::io("no such file");
        assert_eq!(e.to_string(), "i/o error: no such file");
    }
}
