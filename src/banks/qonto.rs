//! Qonto: text-based state machine over the flat PDF text stream.
//!
//! See `spec.md` §4.5.5. Qonto has no accounting value date distinct from
//! the operation date, so both fields on the resulting transaction carry
//! the same parsed `dd/mm` token.

use std::sync::OnceLock;

use chrono::Datelike;
use regex::Regex;
use tracing::{debug, warn};

use crate::bank::{flat_text_from_bytes, BankId, BankParser, ParseInput};
use crate::error::ParseError;
use crate::lex;
use crate::transaction::Transaction;

pub struct QontoParser;

impl BankParser for QontoParser {
    fn bank_id(&self) -> BankId {
        BankId::Qonto
    }

    fn detect(&self, flat_text_upper: &str) -> bool {
        flat_text_upper.contains("QONTO") || flat_text_upper.contains("QNTOFRP")
    }

    fn parse(&self, input: ParseInput<'_>) -> Result<Vec<Transaction>, ParseError> {
        let text = match input {
            ParseInput::Bytes(bytes) => flat_text_from_bytes(bytes)?,
            ParseInput::RawText(s) => s.to_string(),
        };
        parse_text(&text)
    }
}

fn period_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bdu\s+(\d{2})/(\d{2})/(\d{4})\b").unwrap())
}

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([+-])\s*(\d{1,3}(?:[ \u{00A0}.]\d{3})*,\d{2})\s*EUR").unwrap()
    })
}

fn infer_year(text: &str) -> i32 {
    period_year_re()
        .captures(text)
        .and_then(|caps| caps[3].parse::<i32>().ok())
        .unwrap_or_else(|| chrono::Utc::now().date_naive().year())
}

/// Insert a newline before every genuine `dd/mm` token (one that is not
/// the prefix of a `dd/mm/yyyy` long date), then split into normalized,
/// non-empty lines.
fn segment_rows(text: &str) -> Vec<String> {
    let anchors = lex::find_short_dates(text);
    let mut out = String::with_capacity(text.len() + anchors.len());
    let mut last = 0usize;
    for (start, _, _, _) in &anchors {
        if *start > last {
            out.push_str(&text[last..*start]);
        }
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        last = *start;
    }
    out.push_str(&text[last..]);

    out.lines()
        .map(lex::normalize_spaces)
        .filter(|l| !l.is_empty())
        .collect()
}

pub(crate) fn parse_text(text: &str) -> Result<Vec<Transaction>, ParseError> {
    let reference_year = infer_year(text);
    let lines = segment_rows(text);

    let mut out = Vec::new();
    for line in &lines {
        let starts_with_date = matches!(lex::find_short_dates(line).first(), Some((0, _, _, _)));
        if !starts_with_date {
            continue;
        }
        if line[5.min(line.len())..].trim_start().starts_with("ENVY DE LIVE") {
            continue;
        }
        if line.to_uppercase().contains("DATE DE VALEUR") {
            continue;
        }

        let Some(m) = amount_re().captures(line) else {
            warn!(line = %line, "Qonto row starts with a date but has no detectable amount, dropping");
            continue;
        };
        let full_match = m.get(0).unwrap();
        let sign = &m[1];
        let Ok(magnitude) = lex::parse_amount_fr(&m[2]) else {
            continue;
        };
        let amount_cents = if sign == "-" { -magnitude.abs() } else { magnitude.abs() };

        let date_token = &line[..5.min(line.len())];
        let Ok(date) = lex::parse_short_date(date_token, reference_year) else {
            continue;
        };

        let label_span = &line[5.min(line.len())..full_match.start()];
        let label = lex::normalize_spaces(label_span);

        out.push(
            Transaction::new(date, label, amount_cents)
                .with_date_valeur(Some(date))
                .with_raw_line(line.clone()),
        );
    }

    debug!(count = out.len(), "Qonto parse produced rows");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_amount_parses() {
        let txns = parse_text("Du 01/03/2025\n15/03 STRIPE PAYMENT +1 234,56 EUR").unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].amount_cents(), 123456);
        assert!(txns[0].label.contains("STRIPE PAYMENT"));
    }

    #[test]
    fn negative_amount_parses() {
        let txns = parse_text("Du 01/03/2025\n17/03 FEE -2,00 EUR").unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].amount_cents(), -200);
    }

    #[test]
    fn missing_amount_drops_row() {
        let txns = parse_text("Du 01/03/2025\n16/03 OVH +0,00 USD").unwrap();
        assert!(txns.is_empty());
    }

    #[test]
    fn envy_de_live_boilerplate_is_dropped() {
        let txns = parse_text("Du 01/03/2025\n15/03 ENVY DE LIVE +9,99 EUR").unwrap();
        assert!(txns.is_empty());
    }

    #[test]
    fn date_de_valeur_lines_are_dropped() {
        let txns = parse_text("Du 01/03/2025\n15/03 DATE DE VALEUR +1,00 EUR").unwrap();
        assert!(txns.is_empty());
    }

    #[test]
    fn detects_on_brand_token() {
        assert!(QontoParser.detect("... QONTO ..."));
    }
}
