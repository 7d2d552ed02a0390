// A rendered page: a flat list of drawable elements in logical screen
// space. Produced incrementally by content parsers, consumed by the
// renderer, and persisted by PageCache.
//
// Serialisation is self-delimiting: each `Page::serialize` call writes
// its own byte length up front so a reader that only has a start offset
// (from the PageCache LUT) never needs the next entry to know where to
// stop.

extern crate alloc;

use alloc::vec::Vec;

use crate::error::{ErrorKind, PapyrixError, Result};
use crate::fonts::Style;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Center,
    Right,
    Justify,
}

impl Alignment {
    pub(crate) fn to_tag(self) -> u8 {
        match self {
            Alignment::Left => 0,
            Alignment::Center => 1,
            Alignment::Right => 2,
            Alignment::Justify => 3,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => Alignment::Left,
            1 => Alignment::Center,
            2 => Alignment::Right,
            3 => Alignment::Justify,
            _ => return Err(PapyrixError::new(ErrorKind::InvalidFormat, "bad alignment tag")),
        })
    }
}

fn style_to_tag(style: Style) -> u8 {
    match style {
        Style::Regular => 0,
        Style::Bold => 1,
        Style::Italic => 2,
        Style::Heading => 3,
    }
}

fn style_from_tag(tag: u8) -> Result<Style> {
    Ok(match tag {
        0 => Style::Regular,
        1 => Style::Bold,
        2 => Style::Italic,
        3 => Style::Heading,
        _ => return Err(PapyrixError::new(ErrorKind::InvalidFormat, "bad style tag")),
    })
}

#[derive(Debug, Clone)]
pub enum Element {
    Text {
        text: Vec<u8>,
        style: Style,
        align: Alignment,
        baseline_x: i16,
        baseline_y: i16,
    },
    Image {
        path: Vec<u8>,
        x: i16,
        y: i16,
        w: u16,
        h: u16,
    },
    Divider {
        y: i16,
    },
}

const TAG_TEXT: u8 = 0;
const TAG_IMAGE: u8 = 1;
const TAG_DIVIDER: u8 = 2;

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub elements: Vec<Element>,
}

impl Page {
    pub fn new() -> Self {
        Self { elements: Vec::new() }
    }

    pub fn push_text(
        &mut self,
        text: &[u8],
        style: Style,
        align: Alignment,
        baseline_x: i16,
        baseline_y: i16,
    ) {
        self.elements.push(Element::Text {
            text: text.to_vec(),
            style,
            align,
            baseline_x,
            baseline_y,
        });
    }

    pub fn push_image(&mut self, path: &[u8], x: i16, y: i16, w: u16, h: u16) {
        self.elements.push(Element::Image {
            path: path.to_vec(),
            x,
            y,
            w,
            h,
        });
    }

    pub fn push_divider(&mut self, y: i16) {
        self.elements.push(Element::Divider { y });
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Append this page's bytes to `out`, prefixed with its own total
    /// length so a reader starting at any offset can find the end
    /// without consulting the next LUT slot.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        let mut body = Vec::new();
        body.extend_from_slice(&(self.elements.len() as u32).to_le_bytes());
        for el in &self.elements {
            match el {
                Element::Text {
                    text,
                    style,
                    align,
                    baseline_x,
                    baseline_y,
                } => {
                    body.push(TAG_TEXT);
                    body.push(style_to_tag(*style));
                    body.push(align.to_tag());
                    body.extend_from_slice(&baseline_x.to_le_bytes());
                    body.extend_from_slice(&baseline_y.to_le_bytes());
                    body.extend_from_slice(&(text.len() as u32).to_le_bytes());
                    body.extend_from_slice(text);
                }
                Element::Image { path, x, y, w, h } => {
                    body.push(TAG_IMAGE);
                    body.extend_from_slice(&x.to_le_bytes());
                    body.extend_from_slice(&y.to_le_bytes());
                    body.extend_from_slice(&w.to_le_bytes());
                    body.extend_from_slice(&h.to_le_bytes());
                    body.extend_from_slice(&(path.len() as u32).to_le_bytes());
                    body.extend_from_slice(path);
                }
                Element::Divider { y } => {
                    body.push(TAG_DIVIDER);
                    body.extend_from_slice(&y.to_le_bytes());
                }
            }
        }
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
    }

    /// Parse a page starting at `data[0]`. Returns the page and the
    /// number of bytes consumed (the 4-byte length prefix plus body).
    pub fn deserialize(data: &[u8]) -> Result<(Page, usize)> {
        if data.len() < 4 {
            return Err(PapyrixError::new(ErrorKind::InvalidFormat, "page header truncated"));
        }
        let body_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let total = 4usize
            .checked_add(body_len)
            .ok_or(PapyrixError::new(ErrorKind::InvalidFormat, "page length overflow"))?;
        if data.len() < total {
            return Err(PapyrixError::new(ErrorKind::InvalidFormat, "page body truncated"));
        }
        let body = &data[4..total];
        if body.len() < 4 {
            return Err(PapyrixError::new(ErrorKind::InvalidFormat, "page element count truncated"));
        }
        let count = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
        let mut pos = 4;
        let mut page = Page::new();

        fn need(body: &[u8], pos: usize, n: usize) -> Result<()> {
            if pos + n > body.len() {
                Err(PapyrixError::new(ErrorKind::InvalidFormat, "element truncated"))
            } else {
                Ok(())
            }
        }

        for _ in 0..count {
            need(body, pos, 1)?;
            let tag = body[pos];
            pos += 1;
            match tag {
                TAG_TEXT => {
                    need(body, pos, 2 + 2 + 2)?;
                    let style = style_from_tag(body[pos])?;
                    let align = Alignment::from_tag(body[pos + 1])?;
                    let baseline_x = i16::from_le_bytes([body[pos + 2], body[pos + 3]]);
                    let baseline_y = i16::from_le_bytes([body[pos + 4], body[pos + 5]]);
                    pos += 6;
                    need(body, pos, 4)?;
                    let len = u32::from_le_bytes([body[pos], body[pos + 1], body[pos + 2], body[pos + 3]]) as usize;
                    pos += 4;
                    need(body, pos, len)?;
                    let text = body[pos..pos + len].to_vec();
                    pos += len;
                    page.elements.push(Element::Text {
                        text,
                        style,
                        align,
                        baseline_x,
                        baseline_y,
                    });
                }
                TAG_IMAGE => {
                    need(body, pos, 2 + 2 + 2 + 2)?;
                    let x = i16::from_le_bytes([body[pos], body[pos + 1]]);
                    let y = i16::from_le_bytes([body[pos + 2], body[pos + 3]]);
                    let w = u16::from_le_bytes([body[pos + 4], body[pos + 5]]);
                    let h = u16::from_le_bytes([body[pos + 6], body[pos + 7]]);
                    pos += 8;
                    need(body, pos, 4)?;
                    let len = u32::from_le_bytes([body[pos], body[pos + 1], body[pos + 2], body[pos + 3]]) as usize;
                    pos += 4;
                    need(body, pos, len)?;
                    let path = body[pos..pos + len].to_vec();
                    pos += len;
                    page.elements.push(Element::Image { path, x, y, w, h });
                }
                TAG_DIVIDER => {
                    need(body, pos, 2)?;
                    let y = i16::from_le_bytes([body[pos], body[pos + 1]]);
                    pos += 2;
                    page.elements.push(Element::Divider { y });
                }
                _ => return Err(PapyrixError::new(ErrorKind::InvalidFormat, "bad element tag")),
            }
        }
        Ok((page, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_empty_page() {
        let page = Page::new();
        let mut buf = Vec::new();
        page.serialize(&mut buf);
        let (parsed, consumed) = Page::deserialize(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert!(parsed.is_empty());
    }

    #[test]
    fn round_trips_mixed_elements() {
        let mut page = Page::new();
        page.push_text(b"hello world", Style::Bold, Alignment::Left, 8, 20);
        page.push_image(b"cover.bmp", 0, 40, 200, 300);
        page.push_divider(400);

        let mut buf = Vec::new();
        page.serialize(&mut buf);
        let (parsed, consumed) = Page::deserialize(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(parsed.elements.len(), 3);
        match &parsed.elements[0] {
            Element::Text { text, style, align, baseline_x, baseline_y } => {
                assert_eq!(text, b"hello world");
                assert_eq!(*style, Style::Bold);
                assert_eq!(*align, Alignment::Left);
                assert_eq!(*baseline_x, 8);
                assert_eq!(*baseline_y, 20);
            }
            _ => panic!("expected text element"),
        }
    }

    #[test]
    fn rejects_truncated_input() {
        let mut page = Page::new();
        page.push_text(b"abc", Style::Regular, Alignment::Left, 0, 0);
        let mut buf = Vec::new();
        page.serialize(&mut buf);
        buf.truncate(buf.len() - 1);
        assert!(Page::deserialize(&buf).is_err());
    }

    #[test]
    fn two_pages_back_to_back_are_independently_delimited() {
        let mut a = Page::new();
        a.push_text(b"first", Style::Regular, Alignment::Left, 0, 0);
        let mut b = Page::new();
        b.push_divider(10);

        let mut buf = Vec::new();
        a.serialize(&mut buf);
        let split = buf.len();
        b.serialize(&mut buf);

        let (pa, consumed_a) = Page::deserialize(&buf).unwrap();
        assert_eq!(consumed_a, split);
        let (pb, consumed_b) = Page::deserialize(&buf[split..]).unwrap();
        assert_eq!(split + consumed_b, buf.len());
        assert_eq!(pa.elements.len(), 1);
        assert_eq!(pb.elements.len(), 1);
    }
}
