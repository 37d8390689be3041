use thiserror::Error;

/// Lexical failures. These never escape a parser: a row that triggers one
/// is dropped and the parser moves on to the next candidate line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("not a valid French amount: {0:?}")]
    InvalidAmount(String),
    #[error("not a valid French date: {0:?}")]
    InvalidDate(String),
}

/// Structural failures. Unlike [`LexError`], these are surfaced to the
/// caller of [`crate::parse`] / [`crate::detect`].
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("could not locate the transaction table for this bank's layout")]
    UnrecognizedFormat,

    #[error("this bank's parser requires positioned PDF input, not raw text")]
    UnsupportedInput,

    #[error("no parser registered for bank id {0:?}")]
    UnknownBank(String),

    #[error("failed to load PDF document: {0}")]
    PdfLoad(String),

    #[error("parse failed")]
    ParseFailed {
        #[source]
        source: Box<ParseError>,
        /// Extracted text attached for `PDF_TEXT_DEBUG=1` diagnostics, when
        /// the PDF path produced text before failing structurally.
        raw_text: Option<String>,
    },
}

impl ParseError {
    /// Wrap a structural error with the raw text extracted before it was
    /// raised, for the upstream `PDF_TEXT_DEBUG=1` diagnostic path.
    pub fn with_raw_text(self, raw_text: impl Into<String>) -> Self {
        match self {
            ParseError::ParseFailed { source, .. } => ParseError::ParseFailed {
                source,
                raw_text: Some(raw_text.into()),
            },
            other => ParseError::ParseFailed {
                source: Box::new(other),
                raw_text: Some(raw_text.into()),
            },
        }
    }
}
