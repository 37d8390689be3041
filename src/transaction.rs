//! The canonical output record produced by every per-bank parser.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::lex::render_cents;

/// One accounting transaction, normalized to the shape the spreadsheet
/// builder consumes.
///
/// `amount` is positive for a credit (money entering the account) and
/// negative for a debit. Internally it is tracked in integer cents
/// (`amount_cents`) so row-level sums never accumulate floating-point
/// drift; `amount()` renders the two-decimal EUR value on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub date_operation: NaiveDate,
    pub date_valeur: Option<NaiveDate>,
    pub label: String,
    amount_cents: i64,
    pub raw_line: Option<String>,
    pub page: Option<u32>,
    pub section: Option<String>,
}

impl Transaction {
    pub fn new(date_operation: NaiveDate, label: impl Into<String>, amount_cents: i64) -> Self {
        Transaction {
            date_operation,
            date_valeur: None,
            label: label.into(),
            amount_cents,
            raw_line: None,
            page: None,
            section: None,
        }
    }

    pub fn with_date_valeur(mut self, date_valeur: Option<NaiveDate>) -> Self {
        self.date_valeur = date_valeur;
        self
    }

    pub fn with_raw_line(mut self, raw_line: impl Into<String>) -> Self {
        self.raw_line = Some(raw_line.into());
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn amount_cents(&self) -> i64 {
        self.amount_cents
    }

    /// Signed amount in EUR, two fractional digits of precision.
    pub fn amount(&self) -> f64 {
        render_cents(self.amount_cents)
    }
}

/// Sum of credits and sum of debits (both non-negative), accumulated in
/// integer cents — the same invariant the spreadsheet builder's totals
/// row relies on.
pub fn credit_debit_totals_cents(transactions: &[Transaction]) -> (i64, i64) {
    let mut credit = 0i64;
    let mut debit = 0i64;
    for t in transactions {
        if t.amount_cents > 0 {
            credit += t.amount_cents;
        } else {
            debit += -t.amount_cents;
        }
    }
    (credit, debit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn amount_renders_from_cents() {
        let t = Transaction::new(NaiveDate::from_ymd_opt(2025, 6, 5).unwrap(), "X", -120050);
        assert_eq!(t.amount(), -1200.50);
    }

    #[test]
    fn totals_are_accumulated_in_cents() {
        let d = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let txns = vec![
            Transaction::new(d, "credit", 420000),
            Transaction::new(d, "debit1", -120000),
            Transaction::new(d, "debit2", -12050),
        ];
        let (credit, debit) = credit_debit_totals_cents(&txns);
        assert_eq!(credit, 420000);
        assert_eq!(debit, 132050);
    }
}
