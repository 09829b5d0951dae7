use std::fmt;

#[derive(Debug)]
pub enum LogReadError {
    /// File could not be read.
    Io { file: String, source: std::io::Error },
    /// Fewer header lines than the fixed six.
    TruncatedHeader { file: String, lines: usize },
    /// A header row is missing a required element or holds a bad value.
    MalformedHeader { file: String, line: usize, reason: String },
    /// Bank side was neither given explicitly nor inferable from the filename.
    UnknownSide { file: String },
    /// A body cell is not numeric.
    BadNumber { file: String, line: usize, column: usize, value: String },
    /// A body row has the wrong column count for the declared leaf count.
    RaggedRow { file: String, line: usize, expected: usize, got: usize },
}

impl fmt::Display for LogReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { file, source } => write!(f, "{file}: {source}"),
            Self::TruncatedHeader { file, lines } => {
                write!(f, "{file}: expected 6 header lines, file has {lines} line(s)")
            }
            Self::MalformedHeader { file, line, reason } => {
                write!(f, "{file}: header line {line}: {reason}")
            }
            Self::UnknownSide { file } => {
                write!(f, "{file}: bank side not given and not inferable from filename")
            }
            Self::BadNumber { file, line, column, value } => {
                write!(f, "{file}: line {line}, column {column}: '{value}' is not a number")
            }
            Self::RaggedRow { file, line, expected, got } => {
                write!(f, "{file}: line {line}: expected {expected} columns, found {got}")
            }
        }
    }
}

impl std::error::Error for LogReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
