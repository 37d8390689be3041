//! Banque Populaire: text-based state machine over the flat PDF text
//! stream.
//!
//! See `spec.md` §4.5.4. Row boundaries are found by locating the last
//! short date in each run of consecutive `dd/mm` tokens (the one followed
//! by label text rather than another date), exactly as the source does.

use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use tracing::{debug, warn};

use crate::bank::{flat_text_from_bytes, BankId, BankParser, ParseInput};
use crate::error::ParseError;
use crate::lex;
use crate::transaction::Transaction;

pub struct BanquePopulaireParser;

impl BankParser for BanquePopulaireParser {
    fn bank_id(&self) -> BankId {
        BankId::BanquePopulaire
    }

    fn detect(&self, flat_text_upper: &str) -> bool {
        flat_text_upper.contains("BANQUE POPULAIRE")
    }

    fn parse(&self, input: ParseInput<'_>) -> Result<Vec<Transaction>, ParseError> {
        let text = match input {
            ParseInput::Bytes(bytes) => flat_text_from_bytes(bytes)?,
            ParseInput::RawText(s) => s.to_string(),
        };
        parse_text(&text)
    }
}

const START_MARKERS: [&str; 2] = ["DATECOMPTA", "DATECOMPTADATEOPERATION"];
const END_MARKERS: [&str; 3] = [
    "TOTAL DES MOUVEMENTS",
    "DETAIL DE VOS MOUVEMENTS",
    "DETAIL DES MOUVEMENTS",
];
const DROP_SUBSTRINGS: [&str; 3] = ["SOLDE CREDITEUR", "SOLDE DEBITEUR", "TOTAL DES MOUVEMENTS"];

fn period_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bau\s+(\d{2})/(\d{2})/(\d{4})\b").unwrap())
}

fn signed_amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(-|\u{2212})?\s*\d{1,3}(?:[ \u{00A0}.]\d{3})*,\d{2}").unwrap()
    })
}

fn infer_year(text: &str) -> i32 {
    period_year_re()
        .captures(text)
        .and_then(|caps| caps[3].parse::<i32>().ok())
        .unwrap_or_else(|| chrono::Utc::now().date_naive().year())
}

fn slice_table(text: &str) -> Result<String, ParseError> {
    let upper = text.to_uppercase();
    let start = START_MARKERS
        .iter()
        .filter_map(|m| upper.find(m).map(|i| i + m.len()))
        .min()
        .ok_or(ParseError::UnrecognizedFormat)?;

    let end = END_MARKERS
        .iter()
        .filter_map(|m| upper[start..].find(m).map(|i| start + i))
        .min()
        .unwrap_or(text.len());

    Ok(text[start..end].to_string())
}

/// A short date is a row anchor iff it is the first of a run of
/// consecutive `dd/mm` tokens — i.e. nothing but whitespace separates it
/// from the previous short date. Each run (`dateCompta dateOperation
/// dateValeur`) is followed by label text, never another bare date.
fn row_anchors(text: &str, dates: &[(usize, usize, u32, u32)]) -> Vec<usize> {
    let mut anchors = Vec::new();
    for (i, (start, _, _, _)) in dates.iter().enumerate() {
        let is_continuation = i > 0 && {
            let (_, prev_end, _, _) = dates[i - 1];
            text[prev_end..*start].chars().all(|c| c.is_whitespace())
        };
        if !is_continuation {
            anchors.push(*start);
        }
    }
    anchors
}

fn strip_currency_noise(s: &str) -> String {
    let cleaned = s.replace("EUR", " ").replace('€', " ");
    lex::normalize_spaces(&cleaned)
}

fn build_row(segment: &str, reference_year: i32, out: &mut Vec<Transaction>) {
    let upper = segment.to_uppercase();
    if DROP_SUBSTRINGS.iter().any(|d| upper.contains(d)) {
        return;
    }

    let dates = lex::find_short_dates(segment);
    if dates.len() < 2 {
        return;
    }

    let compta = dates[0];
    let operation = dates[1];
    let valeur = dates.get(2).copied().unwrap_or(operation);

    let Ok(date_compta) = lex::parse_short_date(&format!("{:02}/{:02}", compta.2, compta.3), reference_year)
    else {
        return;
    };
    let Ok(date_operation) =
        lex::parse_short_date(&format!("{:02}/{:02}", operation.2, operation.3), reference_year)
    else {
        return;
    };
    let date_valeur = lex::parse_short_date(&format!("{:02}/{:02}", valeur.2, valeur.3), reference_year).ok();

    let tail = &segment[valeur.1..];
    let Some(m) = signed_amount_re().find(tail) else {
        warn!(segment = %segment, "Banque Populaire row has no amount, dropping");
        return;
    };
    let captured_minus = m.as_str().starts_with('-') || m.as_str().starts_with('\u{2212}');
    let Ok(magnitude) = lex::parse_amount_fr(m.as_str().trim_start_matches(['-', '\u{2212}'])) else {
        return;
    };
    let amount_cents = if captured_minus { -magnitude.abs() } else { magnitude.abs() };

    let between = &segment[compta.1..operation.0];
    let after_amount = &tail[m.end()..];
    let mut label = strip_currency_noise(between);
    let after_norm = strip_currency_noise(after_amount);
    if !after_norm.is_empty() {
        if !label.is_empty() {
            label.push(' ');
        }
        label.push_str(&after_norm);
    }

    out.push(
        Transaction::new(date_operation, label, amount_cents)
            .with_date_valeur(date_valeur)
            .with_raw_line(segment.trim().to_string()),
    );
}

pub(crate) fn parse_text(text: &str) -> Result<Vec<Transaction>, ParseError> {
    let reference_year = infer_year(text);
    let table = slice_table(text)?;
    let normalized = lex::normalize_spaces(&table);

    let dates = lex::find_short_dates(&normalized);
    let anchors = row_anchors(&normalized, &dates);

    let mut out = Vec::new();
    for (i, &start) in anchors.iter().enumerate() {
        let end = anchors.get(i + 1).copied().unwrap_or(normalized.len());
        build_row(&normalized[start..end], reference_year, &mut out);
    }

    debug!(count = out.len(), "Banque Populaire parse produced rows");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_date_fixture_with_minus_is_negative() {
        let text = "DATECOMPTA DATEOPERATION DATEVALEUR LIBELLE MONTANT\n\
                     17/04 17/04 17/04 ACHAT X -12,34\n\
                     TOTAL DES MOUVEMENTS";
        let txns = parse_text(text).unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].amount_cents(), -1234);
    }

    #[test]
    fn three_date_fixture_without_minus_is_positive() {
        let text = "DATECOMPTA DATEOPERATION DATEVALEUR LIBELLE MONTANT\n\
                     17/04 17/04 17/04 ACHAT X 12,34\n\
                     TOTAL DES MOUVEMENTS";
        let txns = parse_text(text).unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].amount_cents(), 1234);
    }

    #[test]
    fn two_dates_falls_back_to_operation_as_valeur() {
        let text = "DATECOMPTA DATEOPERATION DATEVALEUR LIBELLE MONTANT\n\
                     17/04 18/04 ACHAT Y 5,00\n\
                     TOTAL DES MOUVEMENTS";
        let txns = parse_text(text).unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].date_valeur, Some(txns[0].date_operation));
    }

    #[test]
    fn missing_table_marker_is_unrecognized_format() {
        let err = parse_text("no table here").unwrap_err();
        assert!(matches!(err, ParseError::UnrecognizedFormat));
    }

    #[test]
    fn detects_on_brand_token() {
        assert!(BanquePopulaireParser.detect("... BANQUE POPULAIRE ..."));
    }
}
