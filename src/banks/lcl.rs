//! LCL (Credit Lyonnais): geometry-based parser driven by column x-offsets
//! reconstructed from glyph positions.
//!
//! See `spec.md` §4.5.2.

use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use tracing::{debug, warn};

use crate::bank::{positioned_lines_from_bytes, BankId, BankParser, ParseInput};
use crate::error::ParseError;
use crate::lex;
use crate::lines::{LineItem, PdfLine};
use crate::transaction::Transaction;

pub struct LclParser;

impl BankParser for LclParser {
    fn bank_id(&self) -> BankId {
        BankId::Lcl
    }

    fn detect(&self, flat_text_upper: &str) -> bool {
        flat_text_upper.contains("CREDIT LYONNAIS") || flat_text_upper.contains("LCL.FR")
    }

    fn parse(&self, input: ParseInput<'_>) -> Result<Vec<Transaction>, ParseError> {
        match input {
            ParseInput::Bytes(bytes) => parse_lines(&positioned_lines_from_bytes(bytes)?),
            ParseInput::RawText(_) => Err(ParseError::UnsupportedInput),
        }
    }
}

const IGNORE_SUBSTRINGS: [&str; 7] = [
    "SOLDE INTERMEDIAIRE",
    "SOLDE EN EUROS",
    "TOTAUX",
    "SOUS TOTAL",
    "RELEVE DE COMPTE",
    "MONTANT COMPTABILISE",
    "CREDIT LYONNAIS",
];

fn item_short_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{2})[./](\d{2})$").unwrap())
}

fn item_long_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{2})[./](\d{2})[./](\d{2}|\d{4})$").unwrap())
}

fn period_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bdu\s+(\d{2}/\d{2}/\d{4})\b").unwrap())
}

fn page_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bpage\s+\d+\b").unwrap())
}

fn relid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)RELEVE\s+D.?IDENTITE").unwrap())
}

fn le_short_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bLE\s+(\d{2})[./](\d{2})\b").unwrap())
}

fn is_ignored(text_upper: &str) -> bool {
    IGNORE_SUBSTRINGS.iter().any(|s| text_upper.contains(s))
        || page_re().is_match(text_upper)
        || relid_re().is_match(text_upper)
}

fn parse_long_item(text: &str) -> Option<NaiveDate> {
    let caps = item_long_re().captures(text.trim())?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let year_str = &caps[3];
    let year: i32 = year_str.parse().ok()?;
    let full_year = if year_str.len() == 2 { 2000 + year } else { year };
    NaiveDate::from_ymd_opt(full_year, month, day)
}

fn parse_short_item(text: &str) -> Option<(u32, u32)> {
    let caps = item_short_re().captures(text.trim())?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

fn find_amount_item(items: &[LineItem]) -> Option<(&LineItem, i64)> {
    items
        .iter()
        .filter_map(|item| {
            lex::parse_amount_fr(item.text.trim())
                .ok()
                .map(|cents| (item, cents))
        })
        .max_by(|a, b| a.0.x.partial_cmp(&b.0.x).unwrap_or(std::cmp::Ordering::Equal))
}

struct Columns {
    debit_x: Option<f64>,
    credit_x: Option<f64>,
}

fn discover_columns(lines: &[PdfLine]) -> (Option<usize>, Columns) {
    for (idx, line) in lines.iter().enumerate() {
        let upper = line.text.to_uppercase();
        if upper.contains("DATE") && upper.contains("LIBELLE") && upper.contains("VALEUR") {
            let debit_x = line
                .items
                .iter()
                .find(|i| i.text.to_uppercase().contains("DEBIT"))
                .map(|i| i.x);
            let credit_x = line
                .items
                .iter()
                .find(|i| i.text.to_uppercase().contains("CREDIT"))
                .map(|i| i.x);
            return (Some(idx), Columns { debit_x, credit_x });
        }
    }
    (None, Columns { debit_x: None, credit_x: None })
}

fn find_period_start(lines: &[PdfLine]) -> NaiveDate {
    for line in lines {
        if let Some(caps) = period_start_re().captures(&line.text) {
            if let Ok(date) = lex::parse_date_fr_long(&caps[1]) {
                return date;
            }
        }
    }
    chrono::Utc::now().date_naive()
}

fn section_for_line(upper: &str) -> Option<&'static str> {
    if upper.contains("PAIEMENTS PAR CARTE") {
        Some("PAIEMENTS PAR CARTE")
    } else if upper.contains("CHEQUES EMIS") {
        Some("CHEQUES EMIS")
    } else if upper.contains("CHEQUES") {
        Some("CHEQUES")
    } else {
        None
    }
}

fn amount_sign(item: &LineItem, columns: &Columns, section: Option<&str>) -> bool {
    amount_sign_with_default(item, columns, section, true)
}

fn amount_sign_with_default(
    item: &LineItem,
    columns: &Columns,
    section: Option<&str>,
    default_positive: bool,
) -> bool {
    if item.text.contains('-') {
        return false;
    }
    match (columns.debit_x, columns.credit_x) {
        (Some(debit_x), Some(credit_x)) => (item.x - credit_x).abs() < (item.x - debit_x).abs(),
        _ => match section {
            Some("PAIEMENTS PAR CARTE") | Some("CHEQUES EMIS") | Some("CHEQUES") => false,
            _ => default_positive,
        },
    }
}

pub(crate) fn parse_lines(lines: &[PdfLine]) -> Result<Vec<Transaction>, ParseError> {
    let (header_idx, columns) = discover_columns(lines);
    let period_start = find_period_start(lines);
    let reference_year = period_start.year();

    let mut out = Vec::new();
    let mut section: Option<&'static str> = None;

    for (idx, line) in lines.iter().enumerate() {
        if Some(idx) == header_idx {
            continue;
        }
        let upper = line.text.to_uppercase();
        if is_ignored(&upper) {
            continue;
        }
        if let Some(s) = section_for_line(&upper) {
            section = Some(s);
        }

        if upper.contains("ANCIEN SOLDE") {
            let amount_item = find_amount_item(&line.items);
            let (amount_cents, sign) = match amount_item {
                Some((item, cents)) => {
                    (cents, amount_sign_with_default(item, &columns, section, false))
                }
                None => (0, false),
            };
            let date = line
                .items
                .iter()
                .find_map(|i| parse_short_item(&i.text))
                .and_then(|(d, m)| NaiveDate::from_ymd_opt(reference_year, m, d))
                .unwrap_or(period_start);
            let magnitude = amount_cents.abs();
            out.push(
                Transaction::new(date, "ANCIEN SOLDE", if sign { magnitude } else { -magnitude })
                    .with_raw_line(line.text.clone())
                    .with_page(line.page),
            );
            continue;
        }

        let short_items: Vec<&LineItem> = line
            .items
            .iter()
            .filter(|i| parse_short_item(&i.text).is_some())
            .collect();
        let long_items: Vec<&LineItem> = line
            .items
            .iter()
            .filter(|i| parse_long_item(&i.text).is_some())
            .collect();

        let operation_item = short_items
            .iter()
            .min_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
            .copied()
            .or_else(|| {
                long_items
                    .iter()
                    .min_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
                    .copied()
            });
        let value_item = long_items
            .iter()
            .max_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
            .copied();

        let (Some(operation_item), Some(value_item)) = (operation_item, value_item) else {
            continue;
        };

        let Some((item, amount_cents)) = find_amount_item(&line.items) else {
            warn!(line = %line.text, "LCL row has date anchors but no detectable amount, dropping");
            continue;
        };
        let sign = amount_sign(item, &columns, section);
        let magnitude = amount_cents.abs();

        let date_operation = match parse_short_item(&operation_item.text) {
            Some((d, m)) => NaiveDate::from_ymd_opt(reference_year, m, d).unwrap_or(period_start),
            None => parse_long_item(&operation_item.text).unwrap_or(period_start),
        };
        let date_valeur = parse_long_item(&value_item.text);

        let label_lo = operation_item.x;
        let label_hi = value_item.x - 1.0;
        let label: String = line
            .items
            .iter()
            .filter(|i| i.x > label_lo && i.x < label_hi)
            .map(|i| i.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let label = lex::normalize_spaces(&label);
        let label = if label.is_empty() {
            lex::normalize_spaces(&line.text)
        } else {
            label
        };

        let mut txn = Transaction::new(
            date_operation,
            label,
            if sign { magnitude } else { -magnitude },
        )
        .with_date_valeur(date_valeur)
        .with_raw_line(line.text.clone())
        .with_page(line.page);
        if let Some(s) = section {
            txn = txn.with_section(s);
        }
        out.push(txn);
    }

    let (card_rows, card_details_found) = card_detail_pass(lines, reference_year, period_start);
    if card_details_found {
        out.retain(|t| !t.label.contains("RELEVE CB"));
    }
    out.extend(card_rows);

    debug!(count = out.len(), "LCL parse produced rows");
    Ok(out)
}

fn card_detail_pass(
    lines: &[PdfLine],
    reference_year: i32,
    period_start: NaiveDate,
) -> (Vec<Transaction>, bool) {
    let mut card_value_date: Option<NaiveDate> = None;
    let mut found = false;

    for line in lines {
        if line.text.to_uppercase().contains("MONTANT COMPTABILISE") {
            found = true;
            card_value_date = line
                .items
                .iter()
                .find_map(|i| parse_short_item(&i.text))
                .and_then(|(d, m)| NaiveDate::from_ymd_opt(reference_year, m, d))
                .or_else(|| line.items.iter().find_map(|i| parse_long_item(&i.text)));
            break;
        }
    }

    if !found {
        return (Vec::new(), false);
    }

    let mut rows = Vec::new();
    for line in lines {
        let upper = line.text.to_uppercase();
        if is_ignored(&upper) || upper.contains("DATE") && upper.contains("LIBELLE") {
            continue;
        }
        if !long_items_of(line).is_empty() {
            continue;
        }
        let Some(caps) = le_short_date_re().captures(&line.text) else {
            continue;
        };
        let day: u32 = caps[1].parse().unwrap_or(1);
        let month: u32 = caps[2].parse().unwrap_or(1);
        let Some((_, amount_cents)) = find_amount_item(&line.items) else {
            continue;
        };
        let date_operation =
            NaiveDate::from_ymd_opt(reference_year, month, day).unwrap_or(period_start);
        rows.push(
            Transaction::new(date_operation, lex::normalize_spaces(&line.text), -amount_cents.abs())
                .with_date_valeur(card_value_date)
                .with_raw_line(line.text.clone())
                .with_page(line.page)
                .with_section("PAIEMENTS PAR CARTE"),
        );
    }
    (rows, true)
}

fn long_items_of(line: &PdfLine) -> Vec<&LineItem> {
    line.items
        .iter()
        .filter(|i| parse_long_item(&i.text).is_some())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(page: u32, text: &str, items: Vec<(&str, f64)>) -> PdfLine {
        PdfLine {
            page,
            text: text.to_string(),
            items: items
                .into_iter()
                .map(|(t, x)| LineItem { text: t.to_string(), x })
                .collect(),
        }
    }

    #[test]
    fn card_section_rows_are_negative_and_relid_dropped() {
        let lines = vec![
            line(1, "RELEVE DE COMPTE du 01/06/2025", vec![]),
            line(
                1,
                "DATE LIBELLE VALEUR DEBIT CREDIT",
                vec![("DEBIT", 300.0), ("CREDIT", 400.0)],
            ),
            line(
                1,
                "PAIEMENTS PAR CARTE",
                vec![("PAIEMENTS", 10.0), ("PAR", 60.0), ("CARTE", 90.0)],
            ),
            line(
                1,
                "15/06 CARREFOUR 17/06/2025 45,90",
                vec![
                    ("15/06", 10.0),
                    ("CARREFOUR", 120.0),
                    ("17/06/2025", 250.0),
                    ("45,90", 310.0),
                ],
            ),
        ];
        let txns = parse_lines(&lines).unwrap();
        assert_eq!(txns.len(), 1);
        assert!(txns[0].amount_cents() < 0);
    }

    #[test]
    fn detects_on_brand_tokens() {
        assert!(LclParser.detect("CREDIT LYONNAIS"));
        assert!(LclParser.detect("WWW.LCL.FR"));
    }

    #[test]
    fn raw_text_is_unsupported() {
        let err = LclParser.parse(ParseInput::RawText("anything")).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedInput));
    }
}
