// Uniform content parsing: turn a book's raw content into `Page`s.
//
// Mirrors `original_source/lib/PageCache/src/ContentParser.h`'s virtual
// interface as a Rust trait. The original's tagged union of parser
// variants (selected via placement-new into one inline buffer) becomes
// a real sum type here, `ContentSource`, since Rust doesn't need the
// union trick to avoid a second allocation.

pub mod md;

extern crate alloc;

use alloc::vec::Vec;

use crate::error::Result;
use crate::fonts::FontSet;
use crate::fonts::Style;
use crate::page::{Alignment, Page};

pub const MAX_ANCHOR_LEN: usize = 32;

#[derive(Clone, Copy)]
pub struct AnchorId {
    pub bytes: [u8; MAX_ANCHOR_LEN],
    pub len: u8,
}

impl AnchorId {
    pub fn new(name: &[u8]) -> Self {
        let len = name.len().min(MAX_ANCHOR_LEN);
        let mut bytes = [0u8; MAX_ANCHOR_LEN];
        bytes[..len].copy_from_slice(&name[..len]);
        Self { bytes, len: len as u8 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ParseOutcome {
    /// All content consumed; no more pages will ever be produced.
    Done,
    /// `max_pages` was reached but more content remains.
    MorePending,
    /// `should_abort` returned true before completion.
    Aborted,
}

/// Layout parameters shared by every parser: viewport size, font set,
/// and the render knobs from `RenderConfig` (§6.7).
#[derive(Clone, Copy)]
pub struct LayoutConfig {
    pub viewport_w: u16,
    pub viewport_h: u16,
    pub font_size: u8, // 0=Small 1=Medium 2=Large, indexes FontSet::for_size
    pub line_compression: f32,
    pub indent_px: u16,
    pub paragraph_spacing_px: u16,
    pub alignment: Alignment,
}

impl LayoutConfig {
    pub fn fonts(&self) -> FontSet {
        FontSet::for_size(self.font_size)
    }

    pub fn line_height(&self, style: Style) -> u16 {
        (self.fonts().line_height(style) as f32 * self.line_compression).round() as u16
    }
}

pub trait ContentParser {
    /// Produce up to `max_pages` pages, calling `on_page` for each.
    /// Checked against `should_abort` between pages.
    fn parse_pages(
        &mut self,
        max_pages: usize,
        should_abort: &mut dyn FnMut() -> bool,
        on_page: &mut dyn FnMut(Page),
    ) -> Result<ParseOutcome>;

    fn has_more_content(&self) -> bool;

    /// True if this parser can continue from where it left off after
    /// being suspended (e.g. across an app restart). Default false.
    fn can_resume(&self) -> bool {
        false
    }

    fn reset(&mut self);

    /// Anchor name -> page index, meaningful only for EPUB chapters
    /// with internal links. Empty for parsers with no anchors.
    fn anchor_map(&self) -> &[(AnchorId, u16)] {
        &[]
    }
}

/// A real sum type standing in for the original's tagged union of
/// parser variants.
pub enum ContentSource {
    PlainText(PlainTextParser),
    Markdown(MarkdownParser),
    EpubChapter(EpubChapterParser),
}

impl ContentParser for ContentSource {
    fn parse_pages(
        &mut self,
        max_pages: usize,
        should_abort: &mut dyn FnMut() -> bool,
        on_page: &mut dyn FnMut(Page),
    ) -> Result<ParseOutcome> {
        match self {
            ContentSource::PlainText(p) => p.parse_pages(max_pages, should_abort, on_page),
            ContentSource::Markdown(p) => p.parse_pages(max_pages, should_abort, on_page),
            ContentSource::EpubChapter(p) => p.parse_pages(max_pages, should_abort, on_page),
        }
    }

    fn has_more_content(&self) -> bool {
        match self {
            ContentSource::PlainText(p) => p.has_more_content(),
            ContentSource::Markdown(p) => p.has_more_content(),
            ContentSource::EpubChapter(p) => p.has_more_content(),
        }
    }

    fn can_resume(&self) -> bool {
        match self {
            ContentSource::PlainText(p) => p.can_resume(),
            ContentSource::Markdown(p) => p.can_resume(),
            ContentSource::EpubChapter(p) => p.can_resume(),
        }
    }

    fn reset(&mut self) {
        match self {
            ContentSource::PlainText(p) => p.reset(),
            ContentSource::Markdown(p) => p.reset(),
            ContentSource::EpubChapter(p) => p.reset(),
        }
    }

    fn anchor_map(&self) -> &[(AnchorId, u16)] {
        match self {
            ContentSource::PlainText(p) => p.anchor_map(),
            ContentSource::Markdown(p) => p.anchor_map(),
            ContentSource::EpubChapter(p) => p.anchor_map(),
        }
    }
}

/// Shared word-wrap layout: walks `words` (already split on whitespace,
/// each carrying a style), lays them out left-to-right, and hands
/// completed pages to `on_page`. Returns the number of pages produced.
// `x == 0` means "cursor is at the start of a fresh line"; the extra
// vertical space that line should carry (ordinary line advance, or a
// paragraph break) is queued in `pending_advance_y` and applied exactly
// once, the next time a word starts a line.
struct LineLayout {
    cfg: LayoutConfig,
    x: i32,
    y: i32,
    pending_advance_y: i32,
    page: Page,
    pages_emitted: usize,
}

impl LineLayout {
    fn new(cfg: LayoutConfig) -> Self {
        Self {
            cfg,
            x: 0,
            y: 0,
            pending_advance_y: 0,
            page: Page::new(),
            pages_emitted: 0,
        }
    }

    fn margin_left(&self) -> i32 {
        8
    }

    fn content_width(&self) -> i32 {
        self.cfg.viewport_w as i32 - 2 * self.margin_left()
    }

    fn push_word(&mut self, word: &[u8], style: Style, on_page: &mut dyn FnMut(Page)) {
        let fonts = self.cfg.fonts();
        let line_h = self.cfg.line_height(style) as i32;
        let word_w: i32 = word.iter().map(|&b| fonts.advance_byte(b, style) as i32).sum();
        let space_w = fonts.advance_byte(b' ', style) as i32;

        if self.x > self.margin_left() && self.x + word_w > self.margin_left() + self.content_width() {
            self.start_new_line(line_h);
        }

        if self.x == 0 {
            self.start_new_line(line_h);
        }

        if self.y + line_h > self.cfg.viewport_h as i32 {
            self.flush_page(on_page);
            self.start_new_line(line_h);
        }

        self.page.push_text(word, style, self.cfg.alignment, self.x as i16, self.y as i16);
        self.x += word_w + space_w;
    }

    /// Advance `y` by whatever was queued (ordinary wrap or paragraph
    /// break) plus this line's own height, then reset `x` to the margin.
    fn start_new_line(&mut self, line_h: i32) {
        self.y += self.pending_advance_y.max(line_h);
        self.pending_advance_y = 0;
        self.x = self.margin_left();
    }

    fn paragraph_break(&mut self) {
        self.x = 0;
        self.pending_advance_y += self.cfg.paragraph_spacing_px as i32;
    }

    fn flush_page(&mut self, on_page: &mut dyn FnMut(Page)) {
        let mut done = Page::new();
        core::mem::swap(&mut done, &mut self.page);
        on_page(done);
        self.pages_emitted += 1;
        self.x = 0;
        self.y = 0;
        self.pending_advance_y = 0;
    }

    fn finish(mut self, on_page: &mut dyn FnMut(Page)) -> usize {
        if !self.page.is_empty() {
            self.flush_page(on_page);
        }
        self.pages_emitted
    }
}

/// Reads a plain text byte buffer 4 KiB at a time, splits at whitespace
/// into words and newlines into paragraphs, and lays out `Page`s.
/// Grounded on `original_source/lib/PageCache/src/PlainTextParser.h`
/// plus `fonts::bitmap`'s advance/line-height accessors (via `FontSet`).
pub struct PlainTextParser {
    data: Vec<u8>,
    pos: usize,
    cfg: LayoutConfig,
}

const READ_CHUNK: usize = 4096;

impl PlainTextParser {
    pub fn new(data: Vec<u8>, cfg: LayoutConfig) -> Self {
        Self { data, pos: 0, cfg }
    }
}

impl ContentParser for PlainTextParser {
    fn parse_pages(
        &mut self,
        max_pages: usize,
        should_abort: &mut dyn FnMut() -> bool,
        on_page: &mut dyn FnMut(Page),
    ) -> Result<ParseOutcome> {
        let mut layout = LineLayout::new(self.cfg);

        while self.pos < self.data.len() {
            if should_abort() {
                return Ok(ParseOutcome::Aborted);
            }
            let end = (self.pos + READ_CHUNK).min(self.data.len());
            let chunk = &self.data[self.pos..end];

            for line in chunk.split(|&b| b == b'\n') {
                if line.is_empty() {
                    layout.paragraph_break();
                    continue;
                }
                for word in line.split(|&b| b == b' ' || b == b'\t') {
                    if !word.is_empty() {
                        layout.push_word(word, Style::Regular, on_page);
                    }
                }
            }
            self.pos = end;

            if layout.pages_emitted >= max_pages && max_pages > 0 {
                return Ok(ParseOutcome::MorePending);
            }
        }

        layout.finish(on_page);
        Ok(ParseOutcome::Done)
    }

    fn has_more_content(&self) -> bool {
        self.pos < self.data.len()
    }

    fn can_resume(&self) -> bool {
        true
    }

    fn reset(&mut self) {
        self.pos = 0;
    }
}

/// Drives `content::md` tokens into laid-out pages. Inner state mirrors
/// the original's `{in_bold, in_italic, in_code_block, header_level,
/// ...}` fields, folded into the current `Style`.
pub struct MarkdownParser {
    data: Vec<u8>,
    consumed_tokens: usize,
    cfg: LayoutConfig,
    done: bool,
}

impl MarkdownParser {
    pub fn new(data: Vec<u8>, cfg: LayoutConfig) -> Self {
        Self {
            data,
            consumed_tokens: 0,
            cfg,
            done: false,
        }
    }
}

impl ContentParser for MarkdownParser {
    fn parse_pages(
        &mut self,
        max_pages: usize,
        should_abort: &mut dyn FnMut() -> bool,
        on_page: &mut dyn FnMut(Page),
    ) -> Result<ParseOutcome> {
        if self.done {
            return Ok(ParseOutcome::Done);
        }

        let mut layout = LineLayout::new(self.cfg);
        let mut style = Style::Regular;
        let mut aborted = false;
        let mut token_index = 0usize;

        md::parse(&self.data, md::FEAT_ALL, &mut |tok| {
            if should_abort() {
                aborted = true;
                return false;
            }
            if token_index < self.consumed_tokens {
                token_index += 1;
                return true;
            }
            match tok.kind {
                md::TokenType::HeaderStart => style = Style::Heading,
                md::TokenType::HeaderEnd => style = Style::Regular,
                md::TokenType::BoldStart => style = Style::Bold,
                md::TokenType::BoldEnd => style = Style::Regular,
                md::TokenType::ItalicStart => style = Style::Italic,
                md::TokenType::ItalicEnd => style = Style::Regular,
                md::TokenType::CodeInline | md::TokenType::CodeBlockStart => {
                    for word in tok.text.split(|&b| b == b' ') {
                        if !word.is_empty() {
                            layout.push_word(word, Style::Italic, on_page);
                        }
                    }
                }
                md::TokenType::Text => {
                    for word in tok.text.split(|&b| b == b' ') {
                        if !word.is_empty() {
                            layout.push_word(word, style, on_page);
                        }
                    }
                }
                md::TokenType::ParagraphEnd | md::TokenType::Newline => layout.paragraph_break(),
                md::TokenType::Hr => layout.paragraph_break(),
                _ => {}
            }
            token_index += 1;
            self.consumed_tokens = token_index;
            if max_pages > 0 && layout.pages_emitted >= max_pages {
                return false;
            }
            true
        });

        if aborted {
            return Ok(ParseOutcome::Aborted);
        }

        if max_pages > 0 && layout.pages_emitted >= max_pages {
            return Ok(ParseOutcome::MorePending);
        }

        layout.finish(on_page);
        self.done = true;
        Ok(ParseOutcome::Done)
    }

    fn has_more_content(&self) -> bool {
        !self.done
    }

    fn can_resume(&self) -> bool {
        true
    }

    fn reset(&mut self) {
        self.consumed_tokens = 0;
        self.done = false;
    }
}

/// Reads marker-annotated chapter text (the [MARKER, code] stream
/// `html_strip::HtmlStripStream` produces, already decompressed to the
/// EPUB chapter cache on SD) and lays it out like `PlainTextParser`,
/// toggling style on marker bytes instead of Markdown syntax.
pub struct EpubChapterParser {
    data: Vec<u8>,
    pos: usize,
    cfg: LayoutConfig,
    anchors: Vec<(AnchorId, u16)>,
}

impl EpubChapterParser {
    pub fn new(data: Vec<u8>, cfg: LayoutConfig) -> Self {
        Self {
            data,
            pos: 0,
            cfg,
            anchors: Vec::new(),
        }
    }
}

impl ContentParser for EpubChapterParser {
    fn parse_pages(
        &mut self,
        max_pages: usize,
        should_abort: &mut dyn FnMut() -> bool,
        on_page: &mut dyn FnMut(Page),
    ) -> Result<ParseOutcome> {
        use smol_epub::html_strip::{BOLD_OFF, BOLD_ON, HEADING_OFF, HEADING_ON, ITALIC_OFF, ITALIC_ON, MARKER};

        let mut layout = LineLayout::new(self.cfg);
        let mut bold = false;
        let mut italic = false;
        let mut heading = false;

        while self.pos < self.data.len() {
            if should_abort() {
                return Ok(ParseOutcome::Aborted);
            }

            let b = self.data[self.pos];
            if b == MARKER && self.pos + 1 < self.data.len() {
                let code = self.data[self.pos + 1];
                match code {
                    c if c == BOLD_ON => bold = true,
                    c if c == BOLD_OFF => bold = false,
                    c if c == ITALIC_ON => italic = true,
                    c if c == ITALIC_OFF => italic = false,
                    c if c == HEADING_ON => heading = true,
                    c if c == HEADING_OFF => heading = false,
                    _ => {}
                }
                self.pos += 2;
                continue;
            }

            let word_start = self.pos;
            while self.pos < self.data.len() && self.data[self.pos] != b' ' && self.data[self.pos] != b'\n' && self.data[self.pos] != MARKER {
                self.pos += 1;
            }
            if self.pos > word_start {
                let style = if heading {
                    Style::Heading
                } else if bold {
                    Style::Bold
                } else if italic {
                    Style::Italic
                } else {
                    Style::Regular
                };
                layout.push_word(&self.data[word_start..self.pos], style, on_page);
            }

            if self.pos < self.data.len() {
                match self.data[self.pos] {
                    b'\n' => layout.paragraph_break(),
                    _ => {}
                }
                if self.data[self.pos] != MARKER {
                    self.pos += 1;
                }
            }

            if max_pages > 0 && layout.pages_emitted >= max_pages {
                return Ok(ParseOutcome::MorePending);
            }
        }

        layout.finish(on_page);
        Ok(ParseOutcome::Done)
    }

    fn has_more_content(&self) -> bool {
        self.pos < self.data.len()
    }

    fn can_resume(&self) -> bool {
        true
    }

    fn reset(&mut self) {
        self.pos = 0;
    }

    fn anchor_map(&self) -> &[(AnchorId, u16)] {
        &self.anchors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg() -> LayoutConfig {
        LayoutConfig {
            viewport_w: 480,
            viewport_h: 800,
            font_size: 0,
            line_compression: 1.0,
            indent_px: 24,
            paragraph_spacing_px: 8,
            alignment: Alignment::Left,
        }
    }

    #[test]
    fn plain_text_parser_produces_at_least_one_page() {
        let text = alloc::vec::Vec::from(b"The quick brown fox jumps over the lazy dog.".as_slice());
        let mut parser = PlainTextParser::new(text, test_cfg());
        let mut pages = alloc::vec::Vec::new();
        let outcome = parser
            .parse_pages(0, &mut || false, &mut |p| pages.push(p))
            .unwrap();
        assert_eq!(outcome, ParseOutcome::Done);
        assert!(!pages.is_empty());
        assert!(!parser.has_more_content());
    }

    #[test]
    fn plain_text_parser_can_resume_after_reset() {
        let text = alloc::vec::Vec::from(b"hello world".as_slice());
        let mut parser = PlainTextParser::new(text, test_cfg());
        assert!(parser.can_resume());
        parser.reset();
        assert_eq!(parser.pos, 0);
    }

    #[test]
    fn markdown_parser_applies_bold_style_to_its_word() {
        let text = alloc::vec::Vec::from(b"plain **bold** plain".as_slice());
        let mut parser = MarkdownParser::new(text, test_cfg());
        let mut pages = alloc::vec::Vec::new();
        parser.parse_pages(0, &mut || false, &mut |p| pages.push(p)).unwrap();
        let found_bold = pages.iter().any(|p| {
            p.elements.iter().any(|e| matches!(e, crate::page::Element::Text { style, text, .. } if *style == Style::Bold && text == b"bold"))
        });
        assert!(found_bold);
    }

    #[test]
    fn epub_chapter_parser_honours_marker_style_toggles() {
        use smol_epub::html_strip::{BOLD_OFF, BOLD_ON, MARKER};
        let mut data = alloc::vec::Vec::new();
        data.extend_from_slice(b"plain ");
        data.push(MARKER);
        data.push(BOLD_ON);
        data.extend_from_slice(b"strong");
        data.push(MARKER);
        data.push(BOLD_OFF);
        let mut parser = EpubChapterParser::new(data, test_cfg());
        let mut pages = alloc::vec::Vec::new();
        parser.parse_pages(0, &mut || false, &mut |p| pages.push(p)).unwrap();
        let found_bold = pages.iter().any(|p| {
            p.elements.iter().any(|e| matches!(e, crate::page::Element::Text { style, text, .. } if *style == Style::Bold && text == b"strong"))
        });
        assert!(found_bold);
    }

    #[test]
    fn aborting_mid_parse_returns_aborted() {
        let text = alloc::vec::Vec::from(b"one two three four five six seven eight nine ten".as_slice());
        let mut parser = PlainTextParser::new(text, test_cfg());
        let mut calls = 0;
        let outcome = parser
            .parse_pages(0, &mut || {
                calls += 1;
                calls > 0
            }, &mut |_| {})
            .unwrap();
        assert_eq!(outcome, ParseOutcome::Aborted);
    }
}
