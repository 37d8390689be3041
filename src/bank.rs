//! The `BankParser` capability contract and the process-wide parser
//! registry.

use crate::error::ParseError;
use crate::lines::PdfLine;
use crate::transaction::Transaction;

/// Stable short identifier for a supported issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BankId {
    Bnp,
    Lcl,
    Cic,
    BanquePopulaire,
    Qonto,
    SocieteGenerale,
}

impl BankId {
    pub fn as_str(&self) -> &'static str {
        match self {
            BankId::Bnp => "bnp",
            BankId::Lcl => "lcl",
            BankId::Cic => "cic",
            BankId::BanquePopulaire => "banque-populaire",
            BankId::Qonto => "qonto",
            BankId::SocieteGenerale => "societe-generale",
        }
    }

    pub fn from_str_id(s: &str) -> Option<BankId> {
        match s {
            "bnp" => Some(BankId::Bnp),
            "lcl" => Some(BankId::Lcl),
            "cic" => Some(BankId::Cic),
            "banque-populaire" => Some(BankId::BanquePopulaire),
            "qonto" => Some(BankId::Qonto),
            "societe-generale" => Some(BankId::SocieteGenerale),
            _ => None,
        }
    }
}

impl std::fmt::Display for BankId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a [`BankParser`] was handed: either raw PDF bytes (the parser
/// extracts whatever it needs) or a pre-extracted flat text string (used
/// by text-based parsers and by callers replaying a debug dump).
pub enum ParseInput<'a> {
    Bytes(&'a [u8]),
    RawText(&'a str),
}

/// One issuer's state machine. `detect` is an optional capability used by
/// the bank detector; `parse` is the only required operation.
pub trait BankParser: Send + Sync {
    fn bank_id(&self) -> BankId;

    /// Substring check on uppercase-folded flat text. Returns `false` by
    /// default; parsers that participate in auto-detection override it.
    fn detect(&self, _flat_text_upper: &str) -> bool {
        false
    }

    fn parse(&self, input: ParseInput<'_>) -> Result<Vec<Transaction>, ParseError>;
}

/// Reconstruct positioned lines from PDF bytes for a geometry-based
/// parser, surfacing extraction failures as-is.
pub(crate) fn positioned_lines_from_bytes(bytes: &[u8]) -> Result<Vec<PdfLine>, ParseError> {
    crate::pdf_text::extract_positioned_lines(bytes)
}

pub(crate) fn flat_text_from_bytes(bytes: &[u8]) -> Result<String, ParseError> {
    crate::pdf_text::extract_flat_text(bytes)
}

/// The process-wide, insertion-ordered parser registry. Detection order
/// matters: CIC's signature is intentionally broad (a bare substring
/// match on "CIC"), so it is registered last — every more specific bank
/// gets a chance to match first.
pub fn registry() -> Vec<Box<dyn BankParser>> {
    vec![
        Box::new(crate::banks::bnp::BnpParser),
        Box::new(crate::banks::lcl::LclParser),
        Box::new(crate::banks::banque_populaire::BanquePopulaireParser),
        Box::new(crate::banks::qonto::QontoParser),
        Box::new(crate::banks::societe_generale::SocieteGeneraleParser),
        Box::new(crate::banks::cic::CicParser),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_id_round_trips_through_its_string_form() {
        for id in [
            BankId::Bnp,
            BankId::Lcl,
            BankId::Cic,
            BankId::BanquePopulaire,
            BankId::Qonto,
            BankId::SocieteGenerale,
        ] {
            assert_eq!(BankId::from_str_id(id.as_str()), Some(id));
        }
    }

    #[test]
    fn unknown_id_string_does_not_resolve() {
        assert_eq!(BankId::from_str_id("revolut"), None);
    }

    #[test]
    fn cic_is_registered_last() {
        let reg = registry();
        assert_eq!(reg.last().unwrap().bank_id(), BankId::Cic);
    }
}
