//! Fixed A4 page geometry and a small cursor-based page writer on top of lopdf.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

use crate::RenderError;

pub const PAGE_WIDTH: i64 = 595;
pub const PAGE_HEIGHT: i64 = 842;
pub const MARGIN: i64 = 40;

pub(crate) const CONTENT_LEFT: i64 = MARGIN;
pub(crate) const CONTENT_RIGHT: i64 = PAGE_WIDTH - MARGIN;
const CONTENT_TOP: i64 = PAGE_HEIGHT - MARGIN;
const FOOTER_HEIGHT: i64 = 20;
const CONTENT_BOTTOM: i64 = MARGIN + FOOTER_HEIGHT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(self) -> &'static str {
        match self {
            Self::Regular => "F1",
            Self::Bold => "F2",
        }
    }
}

/// Approximate Helvetica advance widths in 1/1000 em.
fn glyph_width(ch: char) -> i64 {
    match ch {
        ' ' | '.' | ',' | ':' | ';' | 'i' | 'j' | 'l' | '!' | '|' | '\'' => 278,
        'f' | 't' | 'I' | '/' | '(' | ')' | '[' | ']' | '-' => 333,
        'r' => 333,
        'm' | 'M' => 833,
        'w' | 'W' => 722,
        'A'..='Z' => 667,
        _ => 556,
    }
}

pub(crate) fn text_width(text: &str, size: i64) -> i64 {
    let units: i64 = text.chars().map(glyph_width).sum();
    (units * size + 999) / 1000
}

/// Cuts `text` so it fits in `max_width`, marking the cut with `...`.
pub(crate) fn fit_text(text: &str, size: i64, max_width: i64) -> String {
    if text_width(text, size) <= max_width {
        return text.to_string();
    }
    let ellipsis = text_width("...", size);
    let mut units = 0;
    let mut fitted = String::new();
    for ch in text.chars() {
        units += glyph_width(ch);
        if (units * size + 999) / 1000 + ellipsis > max_width {
            break;
        }
        fitted.push(ch);
    }
    fitted.push_str("...");
    fitted
}

/// WinAnsi-compatible bytes: Latin-1 passes through, everything else becomes `?`.
fn encode_text(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| u8::try_from(u32::from(ch)).unwrap_or(b'?'))
        .collect()
}

/// Writes pages top to bottom, opening a new page when the cursor runs out of room.
pub(crate) struct PageWriter {
    pages: Vec<Vec<Operation>>,
    current: Vec<Operation>,
    cursor: i64,
}

impl PageWriter {
    pub(crate) fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: Vec::new(),
            cursor: CONTENT_TOP,
        }
    }

    pub(crate) fn cursor(&self) -> i64 {
        self.cursor
    }

    /// Moves the cursor down by `height` points.
    pub(crate) fn advance(&mut self, height: i64) {
        self.cursor -= height;
    }

    /// Returns `true` when a page break was inserted to make room for `height` points.
    pub(crate) fn ensure_space(&mut self, height: i64) -> bool {
        if self.cursor - height >= CONTENT_BOTTOM {
            return false;
        }
        self.break_page();
        true
    }

    pub(crate) fn break_page(&mut self) {
        let finished = std::mem::take(&mut self.current);
        self.pages.push(finished);
        self.cursor = CONTENT_TOP;
    }

    pub(crate) fn text(&mut self, x: i64, y: i64, size: i64, font: Font, text: &str) {
        self.current.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![font.resource().into(), size.into()]),
            Operation::new("Td", vec![x.into(), y.into()]),
            Operation::new("Tj", vec![Object::string_literal(encode_text(text))]),
            Operation::new("ET", vec![]),
        ]);
    }

    pub(crate) fn text_right(&mut self, right: i64, y: i64, size: i64, font: Font, text: &str) {
        let x = right - text_width(text, size);
        self.text(x, y, size, font, text);
    }

    pub(crate) fn line(&mut self, x1: i64, y1: i64, x2: i64, y2: i64) {
        self.current.extend([
            Operation::new("w", vec![1.into()]),
            Operation::new("m", vec![x1.into(), y1.into()]),
            Operation::new("l", vec![x2.into(), y2.into()]),
            Operation::new("S", vec![]),
        ]);
    }

    /// Full-width horizontal rule at the cursor.
    pub(crate) fn rule(&mut self) {
        let y = self.cursor;
        self.line(CONTENT_LEFT, y, CONTENT_RIGHT, y);
    }

    /// Closes the last page, stamps `page i of n` footers and serializes the PDF.
    pub(crate) fn finish(mut self, footer_label: &str) -> Result<Vec<u8>, RenderError> {
        if !self.current.is_empty() || self.pages.is_empty() {
            self.break_page();
        }
        let total = self.pages.len();
        let pages: Vec<Vec<Operation>> = std::mem::take(&mut self.pages);

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let regular_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let bold_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => regular_id,
                "F2" => bold_id,
            },
        });

        let mut kids: Vec<Object> = Vec::with_capacity(total);
        for (index, mut operations) in pages.into_iter().enumerate() {
            let footer = format!("{footer_label} - page {} of {total}", index + 1);
            let mut footer_writer = PageWriter::new();
            footer_writer.text_right(CONTENT_RIGHT, MARGIN, 8, Font::Regular, &footer);
            operations.append(&mut footer_writer.current);

            let page_id = add_page(&mut doc, pages_id, operations)?;
            kids.push(page_id.into());
        }

        let page_count = i64::try_from(total).unwrap_or(i64::MAX);
        let pages_dict = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)
            .map_err(|err| RenderError::Pdf(err.to_string()))?;
        Ok(bytes)
    }
}

fn add_page(
    doc: &mut Document,
    pages_id: ObjectId,
    operations: Vec<Operation>,
) -> Result<ObjectId, RenderError> {
    let content = Content { operations };
    let encoded = content
        .encode()
        .map_err(|err| RenderError::Pdf(err.to_string()))?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_text_truncates_long_values() {
        let long = "A very long description that will never fit in a narrow column";
        let fitted = fit_text(long, 10, 100);
        assert!(fitted.ends_with("..."));
        assert!(text_width(&fitted, 10) <= 100);
        assert_eq!(fit_text("short", 10, 100), "short");
    }

    #[test]
    fn fit_text_handles_very_long_values() {
        let long = "Consulting hours ".repeat(5_000);
        let fitted = fit_text(&long, 10, 260);
        assert!(fitted.starts_with("Consulting hours"));
        assert!(fitted.ends_with("..."));
        assert!(text_width(&fitted, 10) <= 260);
        assert!(long.starts_with(fitted.trim_end_matches("...")));
    }

    #[test]
    fn non_latin_characters_are_replaced() {
        assert_eq!(encode_text("Zoë"), b"Zo\xeb".to_vec());
        assert_eq!(encode_text("日本"), b"??".to_vec());
    }

    #[test]
    fn page_breaks_when_space_runs_out() {
        let mut writer = PageWriter::new();
        let mut breaks = 0;
        for _ in 0..100 {
            if writer.ensure_space(18) {
                breaks += 1;
            }
            writer.advance(18);
        }
        assert!(breaks >= 2);
        let bytes = writer.finish("Test").expect("pdf");
        let doc = Document::load_mem(&bytes).expect("parse pdf");
        assert_eq!(doc.get_pages().len(), breaks + 1);
    }
}
