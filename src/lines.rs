//! Line reconstruction: turn a page's positioned glyph runs into visual
//! rows, sorted top-to-bottom then left-to-right.

/// One positioned text fragment within a reconstructed [`PdfLine`].
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub text: String,
    pub x: f64,
}

/// One visual row on one page: flat text plus the ordered fragments that
/// made it up, x-offsets preserved for column-geometry parsers.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfLine {
    pub page: u32,
    pub text: String,
    pub items: Vec<LineItem>,
}

/// A single positioned glyph run as handed up by the extraction adapter,
/// before row bucketing.
#[derive(Debug, Clone)]
pub struct RawGlyphItem {
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub text: String,
}

fn row_bucket(y: f64) -> i64 {
    ((y / 2.0).round() as i64) * 2
}

/// Group raw glyph items into [`PdfLine`]s: two y-coordinates are the same
/// row iff their `round(y/2)*2` bucket key matches. Buckets are ordered
/// top-to-bottom (descending y), items within a bucket left-to-right
/// (ascending x). Items whose trimmed text is empty are dropped.
pub fn reconstruct_lines(items: &[RawGlyphItem]) -> Vec<PdfLine> {
    use std::collections::BTreeMap;

    let mut pages: BTreeMap<u32, BTreeMap<i64, Vec<&RawGlyphItem>>> = BTreeMap::new();
    for item in items {
        if item.text.trim().is_empty() {
            continue;
        }
        pages
            .entry(item.page)
            .or_default()
            .entry(row_bucket(item.y))
            .or_default()
            .push(item);
    }

    let mut out = Vec::new();
    for (page, buckets) in pages {
        // Descending y: top of the page first. BTreeMap iterates keys
        // ascending, so reverse.
        let mut keys: Vec<i64> = buckets.keys().copied().collect();
        keys.sort_unstable_by(|a, b| b.cmp(a));

        for key in keys {
            let mut row = buckets[&key].clone();
            row.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal));

            let line_items: Vec<LineItem> = row
                .iter()
                .map(|item| LineItem {
                    text: item.text.clone(),
                    x: item.x,
                })
                .collect();

            let joined = line_items
                .iter()
                .map(|i| i.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let text = crate::lex::normalize_spaces(&joined);

            if text.is_empty() {
                continue;
            }

            out.push(PdfLine {
                page,
                text,
                items: line_items,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glyph(page: u32, x: f64, y: f64, text: &str) -> RawGlyphItem {
        RawGlyphItem {
            page,
            x,
            y,
            text: text.to_string(),
        }
    }

    #[test]
    fn groups_same_bucket_into_one_row() {
        let items = vec![
            glyph(1, 50.0, 100.0, "DATE"),
            glyph(1, 10.0, 100.5, "01.01.25"),
            glyph(1, 200.0, 101.0, "LIBELLE"),
        ];
        let lines = reconstruct_lines(&items);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].items.len(), 3);
        assert_eq!(lines[0].items[0].text, "01.01.25");
        assert_eq!(lines[0].text, "01.01.25 DATE LIBELLE");
    }

    #[test]
    fn separates_rows_more_than_bucket_apart() {
        let items = vec![glyph(1, 0.0, 100.0, "A"), glyph(1, 0.0, 90.0, "B")];
        let lines = reconstruct_lines(&items);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "A");
        assert_eq!(lines[1].text, "B");
    }

    #[test]
    fn pages_are_independent() {
        let items = vec![glyph(1, 0.0, 100.0, "A"), glyph(2, 0.0, 100.0, "B")];
        let lines = reconstruct_lines(&items);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].page, 1);
        assert_eq!(lines[1].page, 2);
    }

    #[test]
    fn blank_items_are_dropped() {
        let items = vec![glyph(1, 0.0, 100.0, "   ")];
        assert!(reconstruct_lines(&items).is_empty());
    }
}
