//! Multi-bank French account statement PDF parsing engine.
//!
//! Two entry points: [`detect`] identifies which supported issuer a PDF
//! came from, and [`parse`] turns the PDF into a transaction list once
//! the bank id is known. Everything else in this crate exists to support
//! those two calls — lexical utilities, PDF text extraction, line
//! reconstruction, and one state machine per issuer.

pub mod bank;
pub mod banks;
pub mod error;
pub mod lex;
pub mod lines;
pub mod pdf_text;
pub mod transaction;

use tracing::{debug, info};

pub use bank::{BankId, BankParser, ParseInput};
pub use error::{LexError, ParseError};
pub use transaction::{credit_debit_totals_cents, Transaction};

/// Identify which supported bank produced this PDF, or `None` if no
/// registered parser's signature matches.
///
/// Detection runs against a flat text extraction, uppercase-folded so
/// that signature substrings are case-insensitive. Parsers are tried in
/// [`bank::registry`] order; the first positive match wins.
pub fn detect(bytes: &[u8]) -> Result<Option<BankId>, ParseError> {
    debug!(bytes = bytes.len(), "running bank detection");
    let text = bank::flat_text_from_bytes(bytes)?;
    let upper = text.to_uppercase();
    for parser in bank::registry() {
        if parser.detect(&upper) {
            info!(bank = %parser.bank_id(), "bank detected");
            return Ok(Some(parser.bank_id()));
        }
    }
    debug!("no registered bank signature matched");
    Ok(None)
}

/// Parse a PDF's transactions using the named bank's parser.
///
/// `bank_id` is the short string form from [`BankId::as_str`] (e.g.
/// `"bnp"`, `"societe-generale"`). Returns [`ParseError::UnknownBank`] if
/// no parser is registered under that id.
///
/// When the `PDF_TEXT_DEBUG` environment variable is set to `1`, any
/// structural parse failure has the PDF's flat text extraction attached
/// via [`ParseError::with_raw_text`], so the caller can inspect what the
/// parser actually saw.
pub fn parse(bytes: &[u8], bank_id: &str) -> Result<Vec<Transaction>, ParseError> {
    let id = BankId::from_str_id(bank_id).ok_or_else(|| ParseError::UnknownBank(bank_id.to_string()))?;
    let parser = bank::registry()
        .into_iter()
        .find(|p| p.bank_id() == id)
        .ok_or_else(|| ParseError::UnknownBank(bank_id.to_string()))?;

    debug!(bank = %id, bytes = bytes.len(), "parsing statement");
    match parser.parse(ParseInput::Bytes(bytes)) {
        Ok(txns) => Ok(txns),
        Err(err) => {
            if std::env::var("PDF_TEXT_DEBUG").ok().as_deref() == Some("1") {
                if let Ok(text) = bank::flat_text_from_bytes(bytes) {
                    return Err(err.with_raw_text(text));
                }
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_bank_id_is_rejected() {
        let err = parse(b"whatever", "revolut").unwrap_err();
        assert!(matches!(err, ParseError::UnknownBank(id) if id == "revolut"));
    }
}
