//! Société Générale: dual-path parser.
//!
//! See `spec.md` §4.5.6. Prefers the geometry path when positioned lines
//! are available (column-anchored sign assignment); falls back to a
//! text-only scan otherwise, and is the only bank parser that accepts
//! [`ParseInput::RawText`] directly rather than rejecting it.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use tracing::{debug, warn};

use crate::bank::{flat_text_from_bytes, positioned_lines_from_bytes, BankId, BankParser, ParseInput};
use crate::error::ParseError;
use crate::lex;
use crate::lines::{LineItem, PdfLine};
use crate::transaction::Transaction;

pub struct SocieteGeneraleParser;

impl BankParser for SocieteGeneraleParser {
    fn bank_id(&self) -> BankId {
        BankId::SocieteGenerale
    }

    fn detect(&self, flat_text_upper: &str) -> bool {
        flat_text_upper.contains("SOCIETE GENERALE") || flat_text_upper.contains("SOCIÉTÉ GÉNÉRALE")
    }

    fn parse(&self, input: ParseInput<'_>) -> Result<Vec<Transaction>, ParseError> {
        match input {
            ParseInput::Bytes(bytes) => {
                let lines = positioned_lines_from_bytes(bytes)?;
                match parse_geometry(&lines) {
                    Ok(txns) if !txns.is_empty() => Ok(txns),
                    _ => {
                        let text = flat_text_from_bytes(bytes)?;
                        parse_text(&text)
                    }
                }
            }
            ParseInput::RawText(s) => parse_text(s),
        }
    }
}

const CREDIT_HINTS: [&str; 3] = ["REMISE CB", "VIR RECU", "REMISE CHEQUE"];
const DEBIT_HINTS: [&str; 9] = [
    "PRELEVEMENT",
    "VRST GAB",
    "VIR EUROPEEN EMIS",
    "VIR INSTANTANE EMIS",
    "DEBIT",
    "COTIS",
    "FRAIS",
    "ECHEANCE",
    "CHEQUE ",
];

fn debit_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)D.?bit").unwrap())
}

fn credit_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)Cr.?dit").unwrap())
}

fn hint_sign(text_upper: &str) -> Option<bool> {
    let credit = CREDIT_HINTS.iter().any(|h| text_upper.contains(h));
    let debit = DEBIT_HINTS.iter().any(|h| text_upper.contains(h));
    match (credit, debit) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    }
}

fn fallback_sign(raw: &str) -> bool {
    if raw.contains('*') {
        return false;
    }
    hint_sign(&raw.to_uppercase()).unwrap_or(false)
}

// ---- geometry path ----

fn is_long_date_item(item: &LineItem) -> Option<NaiveDate> {
    lex::parse_date_fr_long(&item.text).ok()
}

struct Columns {
    debit_x: f64,
    credit_x: f64,
}

fn discover_columns(lines: &[PdfLine]) -> (Option<f64>, Option<f64>, Option<usize>, Option<usize>) {
    let header_idx = lines
        .iter()
        .position(|l| l.text.to_uppercase().contains("DATE VALEUR") && l.text.to_uppercase().contains("NATURE"));

    let Some(header_idx) = header_idx else {
        return (None, None, None, None);
    };

    let header = &lines[header_idx];
    let debit_x = header.items.iter().find(|i| debit_header_re().is_match(&i.text)).map(|i| i.x);
    let credit_x = header.items.iter().find(|i| credit_header_re().is_match(&i.text)).map(|i| i.x);

    let end_idx = lines[header_idx + 1..]
        .iter()
        .position(|l| {
            let u = l.text.to_uppercase();
            u.contains("TOTAUX DES MOUVEMENTS") || u.contains("NOUVEAU SOLDE")
        })
        .map(|i| header_idx + 1 + i)
        .unwrap_or(lines.len());

    (debit_x, credit_x, Some(header_idx), Some(end_idx))
}

fn cluster_columns(lines: &[PdfLine]) -> (Option<f64>, Option<f64>) {
    use std::collections::BTreeMap;

    let mut buckets: BTreeMap<i64, usize> = BTreeMap::new();
    for line in lines {
        for item in &line.items {
            if lex::parse_amount_fr(item.text.trim()).is_ok() {
                let key = ((item.x / 5.0).round() as i64) * 5;
                *buckets.entry(key).or_default() += 1;
            }
        }
    }

    let mut ranked: Vec<(i64, usize)> = buckets.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    if ranked.len() < 2 {
        return (None, None);
    }
    let mut top_two: Vec<i64> = ranked.into_iter().take(2).map(|(x, _)| x).collect();
    top_two.sort();
    (Some(top_two[0] as f64), Some(top_two[1] as f64))
}

struct OpenRow {
    date_valeur: NaiveDate,
    date_operation: NaiveDate,
    raw_line: String,
    page: u32,
    amounts: Vec<(f64, i64)>,
    label_parts: Vec<String>,
}

fn finish_row(row: OpenRow, columns: &Option<Columns>, out: &mut Vec<Transaction>) {
    let amount_cents = match columns {
        Some(cols) => {
            let midpoint = (cols.debit_x + cols.credit_x) / 2.0;
            let credit = row.amounts.iter().find(|(x, _)| *x > midpoint);
            let debit = row.amounts.iter().find(|(x, _)| *x <= midpoint);
            match (credit, debit) {
                (Some((_, c)), _) => Some(c.abs()),
                (None, Some((_, d))) => Some(-d.abs()),
                (None, None) => None,
            }
        }
        None => {
            if row.amounts.is_empty() {
                None
            } else {
                let magnitude = row.amounts[0].1.abs();
                let sign = fallback_sign(&row.raw_line);
                Some(if sign { magnitude } else { -magnitude })
            }
        }
    };
    let Some(amount_cents) = amount_cents else {
        warn!(line = %row.raw_line, "Societe Generale row has no detectable amount, dropping");
        return;
    };

    let label = lex::normalize_spaces(&row.label_parts.join(" "));
    out.push(
        Transaction::new(row.date_operation, label, amount_cents)
            .with_date_valeur(Some(row.date_valeur))
            .with_raw_line(row.raw_line)
            .with_page(row.page),
    );
}

pub(crate) fn parse_geometry(lines: &[PdfLine]) -> Result<Vec<Transaction>, ParseError> {
    let (debit_x, credit_x, header_idx, end_idx) = discover_columns(lines);
    let Some(header_idx) = header_idx else {
        return Err(ParseError::UnrecognizedFormat);
    };
    let end_idx = end_idx.unwrap_or(lines.len());
    let window = &lines[header_idx + 1..end_idx];

    let (debit_x, credit_x) = match (debit_x, credit_x) {
        (Some(d), Some(c)) => (Some(d), Some(c)),
        _ => cluster_columns(window),
    };
    let columns = match (debit_x, credit_x) {
        (Some(debit_x), Some(credit_x)) => Some(Columns { debit_x, credit_x }),
        _ => None,
    };

    let mut out = Vec::new();
    let mut open: Option<OpenRow> = None;

    for line in window {
        let is_row_start = line.items.len() >= 2
            && is_long_date_item(&line.items[0]).is_some()
            && is_long_date_item(&line.items[1]).is_some()
            && line.items[0].x < 70.0
            && line.items[1].x < 70.0;

        if is_row_start {
            if let Some(row) = open.take() {
                finish_row(row, &columns, &mut out);
            }
            let date_valeur = is_long_date_item(&line.items[0]).unwrap();
            let date_operation = is_long_date_item(&line.items[1]).unwrap();

            let mut amounts = Vec::new();
            let mut label_parts = Vec::new();
            for item in &line.items[2..] {
                if let Ok(cents) = lex::parse_amount_fr(item.text.trim()) {
                    amounts.push((item.x, cents));
                } else {
                    label_parts.push(item.text.clone());
                }
            }

            open = Some(OpenRow {
                date_valeur,
                date_operation,
                raw_line: line.text.clone(),
                page: line.page,
                amounts,
                label_parts,
            });
        } else if let Some(row) = open.as_mut() {
            for item in &line.items {
                if let Ok(cents) = lex::parse_amount_fr(item.text.trim()) {
                    row.amounts.push((item.x, cents));
                } else {
                    row.label_parts.push(item.text.clone());
                }
            }
        }
    }
    if let Some(row) = open.take() {
        finish_row(row, &columns, &mut out);
    }

    debug!(count = out.len(), "Societe Generale geometry parse produced rows");
    Ok(out)
}

// ---- text path ----

const TEXT_END_MARKERS: [&str; 5] = ["SUITE >>>", "N° ADEME", "RELEVE DE COMPTE", "SOCIETE GENERALE", "PAGE "];

fn rightmost_amount_not_preceded_by_digit(chunk: &str) -> Option<(usize, usize, i64)> {
    lex::find_amounts_in_line(chunk)
        .into_iter()
        .filter(|(start, _, _)| {
            *start == 0 || !chunk.as_bytes()[start - 1].is_ascii_digit()
        })
        .filter_map(|(s, e, text)| lex::parse_amount_fr(&text).ok().map(|c| (s, e, c)))
        .last()
}

pub(crate) fn parse_text(text: &str) -> Result<Vec<Transaction>, ParseError> {
    let dates = lex::find_long_dates(text);

    let mut anchors: Vec<(usize, NaiveDate, NaiveDate, usize)> = Vec::new();
    let mut i = 0;
    while i + 1 < dates.len() {
        let (s1, e1, d1) = dates[i];
        let (s2, e2, d2) = dates[i + 1];
        if text[e1..s2].chars().all(|c| c.is_whitespace()) {
            anchors.push((s1, d1, d2, e2));
            i += 2;
        } else {
            i += 1;
        }
    }

    let mut out = Vec::new();
    for (idx, &(start, date_valeur, date_operation, dates_end)) in anchors.iter().enumerate() {
        let marker_pos = TEXT_END_MARKERS
            .iter()
            .filter_map(|m| text[dates_end..].to_uppercase().find(m).map(|i| dates_end + i))
            .min();
        let next_anchor = anchors.get(idx + 1).map(|a| a.0);
        let chunk_end = [marker_pos, next_anchor]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(text.len());
        let chunk = &text[start..chunk_end];
        let local_dates_end = dates_end - start;

        let Some((a_start, _, cents)) = rightmost_amount_not_preceded_by_digit(&chunk[local_dates_end..])
        else {
            warn!(chunk = %chunk, "Societe Generale text row has no detectable amount, dropping");
            continue;
        };
        let label = lex::normalize_spaces(&chunk[local_dates_end..local_dates_end + a_start]);
        let sign = fallback_sign(chunk);
        let magnitude = cents.abs();
        let amount_cents = if sign { magnitude } else { -magnitude };

        out.push(
            Transaction::new(date_operation, label, amount_cents)
                .with_date_valeur(Some(date_valeur))
                .with_raw_line(lex::normalize_spaces(chunk)),
        );
    }

    debug!(count = out.len(), "Societe Generale text parse produced rows");
    Ok(out)
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
    fn geometry_credit_amount_wins_over_debit_in_same_row() {
        let lines = vec![
            line(
                1,
                "DATE VALEUR DATE OPERATION NATURE DEBIT CREDIT",
                vec![
                    ("DATE", 10.0),
                    ("VALEUR", 40.0),
                    ("NATURE", 100.0),
                    ("Debit", 300.0),
                    ("Credit", 400.0),
                ],
            ),
            line(
                1,
                "01/06/2025 02/06/2025 VIR RECU 10,00 120,00",
                vec![
                    ("01/06/2025", 10.0),
                    ("02/06/2025", 40.0),
                    ("VIR", 100.0),
                    ("RECU", 150.0),
                    ("10,00", 300.0),
                    ("120,00", 420.0),
                ],
            ),
            line(1, "NOUVEAU SOLDE", vec![("NOUVEAU", 10.0), ("SOLDE", 60.0)]),
        ];
        let txns = parse_geometry(&lines).unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].amount_cents(), 12000);
    }

    #[test]
    fn text_path_picks_rightmost_amount_and_asterisk_is_negative() {
        let text = "01/06/2025 02/06/2025 PRELEVEMENT EDF * 45,20 RELEVE DE COMPTE";
        let txns = parse_text(text).unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].amount_cents(), -4520);
    }

    #[test]
    fn raw_text_input_is_accepted_not_unsupported() {
        let txns = SocieteGeneraleParser
            .parse(ParseInput::RawText("01/06/2025 02/06/2025 VIR RECU 10,00"))
            .unwrap();
        assert_eq!(txns.len(), 1);
        assert!(txns[0].amount_cents() > 0);
    }

    #[test]
    fn detects_on_brand_token() {
        assert!(SocieteGeneraleParser.detect("... SOCIETE GENERALE ..."));
    }
}
