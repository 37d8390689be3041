//! French amount and date lexing shared by every per-bank parser.

use std::sync::OnceLock;

use chrono::NaiveDate;
use fancy_regex::Regex as FancyRegex;
use nom::{
    bytes::complete::tag,
    character::complete::{char, digit1},
    combinator::{map_res, opt},
    multi::many0,
    sequence::{preceded, separated_pair, tuple},
    IResult,
};
use regex::Regex;

use crate::error::LexError;

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[+-]?\d{1,3}(?:[ \u{00A0}.]\d{3})*,\d{2}").unwrap())
}

// Overlap-tolerant variant of the same pattern, used where a row packs two
// amounts back to back with no separating whitespace (Société Générale's
// text-path fallback). `regex` has no look-around, so this one spot reaches
// for `fancy-regex` instead.
fn amount_re_lookahead() -> &'static FancyRegex {
    static RE: OnceLock<FancyRegex> = OnceLock::new();
    RE.get_or_init(|| FancyRegex::new(r"[+-]?\d{1,3}(?:[ \u{00A0}.]\d{3})*,\d{2}(?=\D|$)").unwrap())
}

fn short_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{2})[./](\d{2})\b").unwrap())
}

// BNP's canonical `dd.mm.yy` form: a dotted date with a strictly two-digit
// year, distinct from the generic `dd/mm/yy(yy)` pattern below.
fn canonical_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{2})\.(\d{2})\.(\d{2})\b").unwrap())
}

fn long_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{2})[./](\d{2})[./](\d{2,4})\b").unwrap())
}

/// Replace non-breaking spaces with regular spaces, collapse whitespace
/// runs to a single space, and trim the ends.
pub fn normalize_spaces(s: &str) -> String {
    let replaced = s.replace('\u{00A0}', " ");
    let mut out = String::with_capacity(replaced.len());
    let mut last_was_space = false;
    for c in replaced.trim().chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

/// Parse a `dd.mm.yy` / `dd/mm/yy(yy)` French amount-statement date into a
/// UTC-midnight [`NaiveDate`]. Two-digit years map to `2000 + yy`.
pub fn parse_date_fr(s: &str) -> Result<NaiveDate, LexError> {
    fn parser(input: &str) -> IResult<&str, NaiveDate> {
        let (input, (day, _, month, _, year)) = tuple((
            map_res(digit1, |d: &str| d.parse::<u32>()),
            nom::branch::alt((char('.'), char('/'))),
            map_res(digit1, |d: &str| d.parse::<u32>()),
            nom::branch::alt((char('.'), char('/'))),
            map_res(digit1, |d: &str| d.parse::<i32>()),
        ))(input)?;
        let full_year = if year < 100 { 2000 + year } else { year };
        let date = NaiveDate::from_ymd_opt(full_year, month, day)
            .ok_or_else(|| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Verify)))?;
        Ok((input, date))
    }

    match parser(s.trim()) {
        Ok((_, date)) => Ok(date),
        Err(_) => Err(LexError::InvalidDate(s.to_string())),
    }
}

/// Parse a `dd/mm/yyyy` date.
pub fn parse_date_fr_long(s: &str) -> Result<NaiveDate, LexError> {
    let caps = long_date_re()
        .captures(s.trim())
        .map_err(|_| LexError::InvalidDate(s.to_string()))?
        .ok_or_else(|| LexError::InvalidDate(s.to_string()))?;
    let day: u32 = caps[1].parse().map_err(|_| LexError::InvalidDate(s.to_string()))?;
    let month: u32 = caps[2].parse().map_err(|_| LexError::InvalidDate(s.to_string()))?;
    let year_str = &caps[3];
    if year_str.len() != 4 {
        return Err(LexError::InvalidDate(s.to_string()));
    }
    let year: i32 = year_str.parse().map_err(|_| LexError::InvalidDate(s.to_string()))?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| LexError::InvalidDate(s.to_string()))
}

/// Parse a `dd/mm` or `dd.mm` token using an externally supplied reference
/// year (the statement's period header, or the current UTC year).
pub fn parse_short_date(token: &str, reference_year: i32) -> Result<NaiveDate, LexError> {
    fn parser(input: &str) -> IResult<&str, (u32, u32)> {
        separated_pair(
            map_res(digit1, |d: &str| d.parse::<u32>()),
            nom::branch::alt((char('.'), char('/'))),
            map_res(digit1, |d: &str| d.parse::<u32>()),
        )(input)
    }

    let (_, (day, month)) =
        parser(token.trim()).map_err(|_| LexError::InvalidDate(token.to_string()))?;
    NaiveDate::from_ymd_opt(reference_year, month, day)
        .ok_or_else(|| LexError::InvalidDate(token.to_string()))
}

/// Parse a French decimal amount into integer cents.
///
/// `1 400,00` / `1.400,00` / `1400,00` all round-trip to `140000` cents.
/// Strings without a comma are treated as plain decimals with `.` as the
/// fractional separator (rare, but seen in some text-path fallbacks).
pub fn parse_amount_fr(s: &str) -> Result<i64, LexError> {
    let cleaned = s.replace('\u{00A0}', " ").trim().to_string();
    if cleaned.is_empty() {
        return Err(LexError::InvalidAmount(s.to_string()));
    }

    let (sign, body) = match cleaned.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => match cleaned.strip_prefix('+') {
            Some(rest) => (1i64, rest),
            None => (1i64, cleaned.as_str()),
        },
    };

    let normalized = if body.contains(',') {
        body.chars()
            .filter(|c| !c.is_whitespace() && *c != '.')
            .collect::<String>()
            .replacen(',', ".", 1)
    } else {
        body.to_string()
    };

    let value: f64 = normalized
        .parse()
        .map_err(|_| LexError::InvalidAmount(s.to_string()))?;
    if !value.is_finite() {
        return Err(LexError::InvalidAmount(s.to_string()));
    }

    Ok(sign * (value * 100.0).round() as i64)
}

/// Find every non-overlapping French-amount match in a line, left to right.
pub fn find_amounts_in_line(s: &str) -> Vec<(usize, usize, String)> {
    amount_re()
        .find_iter(s)
        .map(|m| (m.start(), m.end(), m.as_str().to_string()))
        .collect()
}

/// Overlap-tolerant amount scan: matches may share a boundary character,
/// used for rows where two amounts are packed with no separating space.
pub fn find_amounts_overlap_tolerant(s: &str) -> Vec<(usize, usize, String)> {
    let re = amount_re_lookahead();
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos <= s.len() {
        let slice = &s[pos..];
        match re.find(slice) {
            Ok(Some(m)) => {
                let start = pos + m.start();
                let end = pos + m.end();
                out.push((start, end, m.as_str().to_string()));
                pos = start + 1;
            }
            _ => break,
        }
    }
    out
}

/// True iff `s` has length >= 3, contains no digits, and equals its own
/// uppercase form (a heuristic for section-heading lines).
pub fn is_uppercase_title(s: &str) -> bool {
    s.len() >= 3 && !s.chars().any(|c| c.is_ascii_digit()) && s == s.to_uppercase()
}

/// All `dd/mm` or `dd.mm` (not `dd/mm/yyyy`) tokens in a line, in order.
pub fn find_short_dates(s: &str) -> Vec<(usize, usize, u32, u32)> {
    short_date_re()
        .captures_iter(s)
        .filter_map(|caps| {
            let m = caps.get(0)?;
            // Reject hits that are actually the prefix of a long date.
            let tail = &s[m.end()..];
            if tail.starts_with('/') || tail.starts_with('.') {
                if tail.chars().skip(1).take(2).all(|c| c.is_ascii_digit()) {
                    return None;
                }
            }
            let day: u32 = caps[1].parse().ok()?;
            let month: u32 = caps[2].parse().ok()?;
            Some((m.start(), m.end(), day, month))
        })
        .collect()
}

/// All `dd.mm.yy` canonical-form tokens (BNP's row-start marker) in a
/// line, in order.
pub fn find_canonical_dates(s: &str) -> Vec<(usize, usize, NaiveDate)> {
    canonical_date_re()
        .captures_iter(s)
        .filter_map(|caps| {
            let m = caps.get(0)?;
            let day: u32 = caps[1].parse().ok()?;
            let month: u32 = caps[2].parse().ok()?;
            let year: i32 = caps[3].parse().ok()?;
            let date = NaiveDate::from_ymd_opt(2000 + year, month, day)?;
            Some((m.start(), m.end(), date))
        })
        .collect()
}

/// All `dd/mm/yyyy` (or `dd.mm.yy`) long-date tokens in a line, in order.
pub fn find_long_dates(s: &str) -> Vec<(usize, usize, NaiveDate)> {
    long_date_re()
        .captures_iter(s)
        .filter_map(|caps| {
            let m = caps.get(0)?;
            let day: u32 = caps[1].parse().ok()?;
            let month: u32 = caps[2].parse().ok()?;
            let year_str = &caps[3];
            let year: i32 = year_str.parse().ok()?;
            let full_year = if year_str.len() <= 2 { 2000 + year } else { year };
            let date = NaiveDate::from_ymd_opt(full_year, month, day)?;
            Some((m.start(), m.end(), date))
        })
        .collect()
}

/// Strip every amount and date token out of a line, leaving plain label
/// text; used as the label-extraction fallback when geometry isn't
/// available.
pub fn strip_tokens(s: &str, spans: &[(usize, usize)]) -> String {
    let mut sorted = spans.to_vec();
    sorted.sort_by_key(|(start, _)| *start);
    let mut out = String::with_capacity(s.len());
    let mut cursor = 0usize;
    for (start, end) in sorted {
        if start < cursor {
            continue;
        }
        out.push_str(&s[cursor..start]);
        cursor = end;
    }
    out.push_str(&s[cursor..]);
    normalize_spaces(&out)
}

pub fn render_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

#[allow(dead_code)]
fn _nom_helpers_used(input: &str) -> IResult<&str, Vec<&str>> {
    many0(preceded(opt(tag(" ")), digit1))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_amount_with_space_thousands() {
        assert_eq!(parse_amount_fr("1 400,00").unwrap(), 140000);
    }

    #[test]
    fn parses_amount_with_dot_thousands() {
        assert_eq!(parse_amount_fr("1.234,56").unwrap(), 123456);
    }

    #[test]
    fn parses_small_amount() {
        assert_eq!(parse_amount_fr("0,05").unwrap(), 5);
    }

    #[test]
    fn parses_negative_amount() {
        assert_eq!(parse_amount_fr("-7,00").unwrap(), -700);
    }

    #[test]
    fn rejects_garbage_amount() {
        assert!(parse_amount_fr("abc").is_err());
    }

    #[test]
    fn parses_short_year_date() {
        let d = parse_date_fr("05.06.25").unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2025, 6, 5).unwrap());
    }

    #[test]
    fn normalizes_slash_date_same_as_dot() {
        assert_eq!(parse_date_fr("05.06.25").unwrap(), parse_date_fr("05/06/25").unwrap());
    }

    #[test]
    fn parses_long_date() {
        let d = parse_date_fr_long("05/06/2025").unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2025, 6, 5).unwrap());
    }

    #[test]
    fn parses_short_date_with_reference_year() {
        let d = parse_short_date("17/04", 2025).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2025, 4, 17).unwrap());
    }

    #[test]
    fn normalize_spaces_is_idempotent() {
        let s = "  VIR   SEPA\u{00A0}  LOYER  ";
        let once = normalize_spaces(s);
        let twice = normalize_spaces(&once);
        assert_eq!(once, twice);
        assert_eq!(once, "VIR SEPA LOYER");
    }

    #[test]
    fn finds_multiple_amounts_in_line() {
        let found = find_amounts_in_line("120,50 4 200,00 fin");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].2, "120,50");
        assert_eq!(found[1].2, "4 200,00");
    }

    #[test]
    fn uppercase_title_detection() {
        assert!(is_uppercase_title("VIREMENTS EMIS"));
        assert!(!is_uppercase_title("Virements Emis"));
        assert!(!is_uppercase_title("AB12"));
        assert!(!is_uppercase_title("AB"));
    }

    #[test]
    fn finds_canonical_dates_in_order() {
        let found = find_canonical_dates("05.06.25 VIR SEPA 07.06.25");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].2, NaiveDate::from_ymd_opt(2025, 6, 5).unwrap());
        assert_eq!(found[1].2, NaiveDate::from_ymd_opt(2025, 6, 7).unwrap());
    }

    #[test]
    fn overlap_tolerant_scan_finds_adjacent_amounts() {
        let found = find_amounts_overlap_tolerant("12,34-56,78");
        assert!(found.iter().any(|(_, _, s)| s == "12,34"));
    }
}
