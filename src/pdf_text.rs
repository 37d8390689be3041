//! Drives `pdf-extract` to produce either a flat text stream or positioned
//! lines (text plus per-fragment x offsets) for the geometry-based parsers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Once;

use pdf_extract::{output_doc, MediaBox, OutputDev, OutputError, Transform};
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::lines::{reconstruct_lines, PdfLine, RawGlyphItem};

static PANIC_GUARD: Once = Once::new();

/// `pdf-extract`/`lopdf` occasionally panic on malformed embedded fonts
/// rather than returning an error. Install a quiet panic hook exactly
/// once so a panic during extraction surfaces as `ParseError::PdfLoad`
/// instead of printing a backtrace and aborting the caller's process.
fn install_panic_guard() {
    PANIC_GUARD.call_once(|| {
        let default_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if info.payload().downcast_ref::<&str>().is_some()
                || info.payload().downcast_ref::<String>().is_some()
            {
                // Swallow the common pdf-extract panic payloads silently;
                // anything else still gets the default report.
                return;
            }
            default_hook(info);
        }));
    });
}

fn run_guarded<T>(f: impl FnOnce() -> Result<T, OutputError> + std::panic::UnwindSafe) -> Result<T, ParseError> {
    install_panic_guard();
    match catch_unwind(f) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            warn!(error = %e, "PDF extraction returned an error");
            Err(ParseError::PdfLoad(e.to_string()))
        }
        Err(_) => {
            warn!("PDF library panicked while extracting text, containing as PdfLoad error");
            Err(ParseError::PdfLoad("PDF library panicked while extracting text".into()))
        }
    }
}

/// Concatenate all text fragments of every page into one string, with a
/// newline inserted between pages.
pub fn extract_flat_text(bytes: &[u8]) -> Result<String, ParseError> {
    debug!(bytes = bytes.len(), "extracting flat text from PDF");
    let input = bytes.to_vec();
    run_guarded(AssertUnwindSafe(move || pdf_extract::extract_text_from_mem(&input)))
}

/// For each page, bucket glyph runs into visual rows ordered top-to-bottom,
/// left-to-right, preserving per-fragment x offsets.
pub fn extract_positioned_lines(bytes: &[u8]) -> Result<Vec<PdfLine>, ParseError> {
    debug!(bytes = bytes.len(), "extracting positioned lines from PDF");
    let input = bytes.to_vec();
    let collector = run_guarded(AssertUnwindSafe(move || {
        let doc = lopdf::Document::load_mem(&input)
            .map_err(|e| OutputError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;
        let mut collector = PositionCollector::default();
        output_doc(&doc, &mut collector)?;
        collector.flush_word();
        Ok(collector)
    }))?;
    let lines = reconstruct_lines(&collector.items);
    debug!(lines = lines.len(), "reconstructed positioned lines");
    Ok(lines)
}

#[derive(Default)]
struct PositionCollector {
    current_page: u32,
    page_height: f64,
    pending_word: String,
    pending_x: Option<f64>,
    pending_y: Option<f64>,
    items: Vec<RawGlyphItem>,
}

impl PositionCollector {
    fn flush_word(&mut self) {
        if let (Some(x), Some(y)) = (self.pending_x.take(), self.pending_y.take()) {
            let word = std::mem::take(&mut self.pending_word);
            if !word.trim().is_empty() {
                self.items.push(RawGlyphItem {
                    page: self.current_page,
                    x,
                    y,
                    text: word,
                });
                return;
            }
        }
        self.pending_word.clear();
    }
}

impl OutputDev for PositionCollector {
    fn begin_page(
        &mut self,
        page_num: u32,
        media_box: &MediaBox,
        _art_box: Option<(f64, f64, f64, f64)>,
    ) -> Result<(), OutputError> {
        self.flush_word();
        self.current_page = page_num;
        self.page_height = media_box.ury - media_box.lly;
        Ok(())
    }

    fn end_page(&mut self) -> Result<(), OutputError> {
        self.flush_word();
        Ok(())
    }

    fn output_character(
        &mut self,
        trans: &Transform,
        _width: f64,
        _spacing: f64,
        _font_size: f64,
        text: &str,
    ) -> Result<(), OutputError> {
        if text.trim().is_empty() {
            self.flush_word();
            return Ok(());
        }
        let x = trans[4];
        let y = self.page_height - trans[5];
        if self.pending_x.is_none() {
            self.pending_x = Some(x);
            self.pending_y = Some(y);
        }
        self.pending_word.push_str(text);
        Ok(())
    }

    fn begin_word(&mut self) -> Result<(), OutputError> {
        self.flush_word();
        Ok(())
    }

    fn end_word(&mut self) -> Result<(), OutputError> {
        self.flush_word();
        Ok(())
    }

    fn end_line(&mut self) -> Result<(), OutputError> {
        self.flush_word();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_word_drops_blank_pending_text() {
        let mut collector = PositionCollector {
            pending_word: "   ".into(),
            pending_x: Some(1.0),
            pending_y: Some(2.0),
            ..Default::default()
        };
        collector.flush_word();
        assert!(collector.items.is_empty());
    }

    #[test]
    fn flush_word_keeps_real_text() {
        let mut collector = PositionCollector {
            pending_word: "VIR".into(),
            pending_x: Some(1.0),
            pending_y: Some(2.0),
            current_page: 3,
            ..Default::default()
        };
        collector.flush_word();
        assert_eq!(collector.items.len(), 1);
        assert_eq!(collector.items[0].text, "VIR");
        assert_eq!(collector.items[0].page, 3);
    }
}
