// Single-pass Markdown tokenizer, callback-driven, no AST.
//
// Ports the original `md_parser`'s token set and feature bitmask onto a
// byte-slice source; markdown files are small enough to read whole, so
// there's no chunked-input state machine here — one call to `parse`
// walks the buffer once and invokes `on_token` per token.

extern crate alloc;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenType {
    Text,
    HeaderStart,
    HeaderEnd,
    BoldStart,
    BoldEnd,
    ItalicStart,
    ItalicEnd,
    StrikeStart,
    StrikeEnd,
    CodeInline,
    CodeBlockStart,
    CodeBlockEnd,
    LinkTextStart,
    LinkTextEnd,
    LinkUrl,
    ImageAltStart,
    ImageAltEnd,
    ImageUrl,
    ListItemStart,
    ListItemEnd,
    BlockquoteStart,
    BlockquoteEnd,
    Hr,
    Newline,
    ParagraphStart,
    ParagraphEnd,
}

#[derive(Clone, Copy)]
pub struct Token<'a> {
    pub kind: TokenType,
    pub text: &'a [u8],
    pub data: u8,
}

pub const FEAT_HEADERS: u16 = 1 << 0;
pub const FEAT_BOLD: u16 = 1 << 1;
pub const FEAT_ITALIC: u16 = 1 << 2;
pub const FEAT_STRIKE: u16 = 1 << 3;
pub const FEAT_CODE_INLINE: u16 = 1 << 4;
pub const FEAT_CODE_BLOCK: u16 = 1 << 5;
pub const FEAT_LINKS: u16 = 1 << 6;
pub const FEAT_IMAGES: u16 = 1 << 7;
pub const FEAT_LISTS: u16 = 1 << 8;
pub const FEAT_BLOCKQUOTE: u16 = 1 << 9;
pub const FEAT_HR: u16 = 1 << 10;
pub const FEAT_ALL: u16 = 0xFFFF;
pub const FEAT_BASIC: u16 = FEAT_HEADERS | FEAT_BOLD | FEAT_ITALIC | FEAT_CODE_INLINE;

pub fn token_name(kind: TokenType) -> &'static str {
    match kind {
        TokenType::Text => "TEXT",
        TokenType::HeaderStart => "HEADER_START",
        TokenType::HeaderEnd => "HEADER_END",
        TokenType::BoldStart => "BOLD_START",
        TokenType::BoldEnd => "BOLD_END",
        TokenType::ItalicStart => "ITALIC_START",
        TokenType::ItalicEnd => "ITALIC_END",
        TokenType::StrikeStart => "STRIKE_START",
        TokenType::StrikeEnd => "STRIKE_END",
        TokenType::CodeInline => "CODE_INLINE",
        TokenType::CodeBlockStart => "CODE_BLOCK_START",
        TokenType::CodeBlockEnd => "CODE_BLOCK_END",
        TokenType::LinkTextStart => "LINK_TEXT_START",
        TokenType::LinkTextEnd => "LINK_TEXT_END",
        TokenType::LinkUrl => "LINK_URL",
        TokenType::ImageAltStart => "IMAGE_ALT_START",
        TokenType::ImageAltEnd => "IMAGE_ALT_END",
        TokenType::ImageUrl => "IMAGE_URL",
        TokenType::ListItemStart => "LIST_ITEM_START",
        TokenType::ListItemEnd => "LIST_ITEM_END",
        TokenType::BlockquoteStart => "BLOCKQUOTE_START",
        TokenType::BlockquoteEnd => "BLOCKQUOTE_END",
        TokenType::Hr => "HR",
        TokenType::Newline => "NEWLINE",
        TokenType::ParagraphStart => "PARAGRAPH_START",
        TokenType::ParagraphEnd => "PARAGRAPH_END",
    }
}

struct State {
    in_bold: bool,
    in_italic: bool,
    in_strike: bool,
    in_code_block: bool,
    in_blockquote: bool,
    in_paragraph: bool,
    list_depth: u8,
}

impl State {
    fn new() -> Self {
        Self {
            in_bold: false,
            in_italic: false,
            in_strike: false,
            in_code_block: false,
            in_blockquote: false,
            in_paragraph: false,
            list_depth: 0,
        }
    }
}

fn is_hr_line(line: &[u8]) -> bool {
    let trimmed: alloc::vec::Vec<u8> = line.iter().copied().filter(|&b| b != b' ').collect();
    if trimmed.len() < 3 {
        return false;
    }
    let c = trimmed[0];
    (c == b'-' || c == b'*' || c == b'_') && trimmed.iter().all(|&b| b == c)
}

fn count_leading(line: &[u8], ch: u8) -> usize {
    line.iter().take_while(|&&b| b == ch).count()
}

fn ordered_list_number(line: &[u8]) -> Option<(u8, usize)> {
    let mut i = 0;
    while i < line.len() && line[i].is_ascii_digit() {
        i += 1;
    }
    if i == 0 || i >= line.len() || line[i] != b'.' {
        return None;
    }
    // matches the original's documented truncation quirk: parse as u32
    // then cast down to u8 without clamping
    let mut n: u32 = 0;
    for &b in &line[..i] {
        n = n.wrapping_mul(10).wrapping_add((b - b'0') as u32);
    }
    let rest = i + 1;
    if rest < line.len() && line[rest] == b' ' {
        Some((n as u8, rest + 1))
    } else {
        None
    }
}

/// Tokenize `text` in one pass, calling `on_token` for each token.
/// `on_token` returning `false` stops parsing early (mirrors the
/// original callback's "return false to stop" contract).
pub fn parse<'a>(text: &'a [u8], features: u16, on_token: &mut dyn FnMut(Token<'a>) -> bool) {
    let mut st = State::new();
    let mut lines = text.split(|&b| b == b'\n').peekable();

    macro_rules! emit {
        ($tok:expr) => {
            if !on_token($tok) {
                return;
            }
        };
    }

    while let Some(line) = lines.next() {
        if line.is_empty() {
            if st.in_paragraph {
                emit!(Token {
                    kind: TokenType::ParagraphEnd,
                    text: b"",
                    data: 0
                });
                st.in_paragraph = false;
            }
            emit!(Token {
                kind: TokenType::Newline,
                text: b"",
                data: 0
            });
            continue;
        }

        if st.in_code_block {
            if features & FEAT_CODE_BLOCK != 0 && line.trim_ascii().starts_with(b"```") {
                emit!(Token {
                    kind: TokenType::CodeBlockEnd,
                    text: b"",
                    data: 0
                });
                st.in_code_block = false;
            } else {
                emit!(Token {
                    kind: TokenType::Text,
                    text: line,
                    data: 0
                });
                emit!(Token {
                    kind: TokenType::Newline,
                    text: b"",
                    data: 0
                });
            }
            continue;
        }

        if features & FEAT_CODE_BLOCK != 0 && line.trim_ascii().starts_with(b"```") {
            let lang = &line.trim_ascii()[3..];
            emit!(Token {
                kind: TokenType::CodeBlockStart,
                text: lang,
                data: 0
            });
            st.in_code_block = true;
            continue;
        }

        if features & FEAT_HR != 0 && is_hr_line(line) {
            emit!(Token {
                kind: TokenType::Hr,
                text: b"",
                data: 0
            });
            continue;
        }

        let mut rest = line;

        if features & FEAT_HEADERS != 0 {
            let level = count_leading(rest, b'#').min(6);
            if level > 0 && rest.get(level) == Some(&b' ') {
                emit!(Token {
                    kind: TokenType::HeaderStart,
                    text: b"",
                    data: level as u8
                });
                emit_inline(&rest[level + 1..], features, &mut st, on_token);
                emit!(Token {
                    kind: TokenType::HeaderEnd,
                    text: b"",
                    data: 0
                });
                continue;
            }
        }

        if features & FEAT_BLOCKQUOTE != 0 && rest.first() == Some(&b'>') {
            if !st.in_blockquote {
                emit!(Token {
                    kind: TokenType::BlockquoteStart,
                    text: b"",
                    data: 0
                });
                st.in_blockquote = true;
            }
            rest = rest[1..].strip_prefix(b" ").unwrap_or(&rest[1..]);
            emit_inline(rest, features, &mut st, on_token);
            emit!(Token {
                kind: TokenType::Newline,
                text: b"",
                data: 0
            });
            continue;
        } else if st.in_blockquote {
            emit!(Token {
                kind: TokenType::BlockquoteEnd,
                text: b"",
                data: 0
            });
            st.in_blockquote = false;
        }

        if features & FEAT_LISTS != 0 {
            if let Some((n, skip)) = ordered_list_number(rest) {
                emit!(Token {
                    kind: TokenType::ListItemStart,
                    text: b"",
                    data: n
                });
                emit_inline(&rest[skip..], features, &mut st, on_token);
                emit!(Token {
                    kind: TokenType::ListItemEnd,
                    text: b"",
                    data: 0
                });
                continue;
            }
            if matches!(rest.first(), Some(b'-') | Some(b'*') | Some(b'+')) && rest.get(1) == Some(&b' ') {
                emit!(Token {
                    kind: TokenType::ListItemStart,
                    text: b"",
                    data: 0
                });
                emit_inline(&rest[2..], features, &mut st, on_token);
                emit!(Token {
                    kind: TokenType::ListItemEnd,
                    text: b"",
                    data: 0
                });
                continue;
            }
        }

        if !st.in_paragraph {
            emit!(Token {
                kind: TokenType::ParagraphStart,
                text: b"",
                data: 0
            });
            st.in_paragraph = true;
        }
        emit_inline(rest, features, &mut st, on_token);
        emit!(Token {
            kind: TokenType::Newline,
            text: b"",
            data: 0
        });
    }

    if st.in_blockquote {
        emit!(Token {
            kind: TokenType::BlockquoteEnd,
            text: b"",
            data: 0
        });
    }
    if st.in_paragraph {
        emit!(Token {
            kind: TokenType::ParagraphEnd,
            text: b"",
            data: 0
        });
    }
}

/// Scan inline spans within a single line: bold/italic/strike/code/links/images.
fn emit_inline<'a>(mut line: &'a [u8], features: u16, st: &mut State, on_token: &mut dyn FnMut(Token<'a>) -> bool) {
    let mut ok = true;
    let mut text_start = 0usize;
    let mut i = 0usize;

    macro_rules! flush_text {
        ($end:expr) => {
            if $end > text_start {
                ok = ok && on_token(Token {
                    kind: TokenType::Text,
                    text: &line[text_start..$end],
                    data: 0,
                });
            }
        };
    }

    while ok && i < line.len() {
        let b = line[i];

        if features & FEAT_CODE_INLINE != 0 && b == b'`' {
            if let Some(end) = find_byte(&line[i + 1..], b'`') {
                flush_text!(i);
                ok = ok
                    && on_token(Token {
                        kind: TokenType::CodeInline,
                        text: &line[i + 1..i + 1 + end],
                        data: 0,
                    });
                i = i + 1 + end + 1;
                text_start = i;
                continue;
            }
        }

        if features & FEAT_BOLD != 0 && (b == b'*' || b == b'_') && line.get(i + 1) == Some(&b) {
            if let Some(end) = find_pair(&line[i + 2..], b) {
                flush_text!(i);
                if st.in_bold {
                    ok = ok
                        && on_token(Token {
                            kind: TokenType::BoldEnd,
                            text: b"",
                            data: 0,
                        });
                    st.in_bold = false;
                } else {
                    ok = ok
                        && on_token(Token {
                            kind: TokenType::BoldStart,
                            text: b"",
                            data: 0,
                        });
                    st.in_bold = true;
                    ok = ok
                        && on_token(Token {
                            kind: TokenType::Text,
                            text: &line[i + 2..i + 2 + end],
                            data: 0,
                        });
                    ok = ok
                        && on_token(Token {
                            kind: TokenType::BoldEnd,
                            text: b"",
                            data: 0,
                        });
                    st.in_bold = false;
                }
                i = i + 2 + end + 2;
                text_start = i;
                continue;
            }
        }

        if features & FEAT_STRIKE != 0 && b == b'~' && line.get(i + 1) == Some(&b'~') {
            if let Some(end) = find_pair(&line[i + 2..], b'~') {
                flush_text!(i);
                ok = ok
                    && on_token(Token {
                        kind: TokenType::StrikeStart,
                        text: b"",
                        data: 0,
                    });
                ok = ok
                    && on_token(Token {
                        kind: TokenType::Text,
                        text: &line[i + 2..i + 2 + end],
                        data: 0,
                    });
                ok = ok
                    && on_token(Token {
                        kind: TokenType::StrikeEnd,
                        text: b"",
                        data: 0,
                    });
                i = i + 2 + end + 2;
                text_start = i;
                continue;
            }
        }

        if features & FEAT_ITALIC != 0 && (b == b'*' || b == b'_') {
            if let Some(end) = find_byte(&line[i + 1..], b) {
                flush_text!(i);
                ok = ok
                    && on_token(Token {
                        kind: TokenType::ItalicStart,
                        text: b"",
                        data: 0,
                    });
                ok = ok
                    && on_token(Token {
                        kind: TokenType::Text,
                        text: &line[i + 1..i + 1 + end],
                        data: 0,
                    });
                ok = ok
                    && on_token(Token {
                        kind: TokenType::ItalicEnd,
                        text: b"",
                        data: 0,
                    });
                i = i + 1 + end + 1;
                text_start = i;
                continue;
            }
        }

        if features & FEAT_IMAGES != 0 && b == b'!' && line.get(i + 1) == Some(&b'[') {
            if let Some((alt, url, consumed)) = parse_link_like(&line[i + 2..]) {
                flush_text!(i);
                ok = ok
                    && on_token(Token {
                        kind: TokenType::ImageAltStart,
                        text: b"",
                        data: 0,
                    });
                ok = ok
                    && on_token(Token {
                        kind: TokenType::Text,
                        text: alt,
                        data: 0,
                    });
                ok = ok
                    && on_token(Token {
                        kind: TokenType::ImageAltEnd,
                        text: b"",
                        data: 0,
                    });
                ok = ok
                    && on_token(Token {
                        kind: TokenType::ImageUrl,
                        text: url,
                        data: 0,
                    });
                i = i + 2 + consumed;
                text_start = i;
                continue;
            }
        }

        if features & FEAT_LINKS != 0 && b == b'[' {
            if let Some((txt, url, consumed)) = parse_link_like(&line[i..]) {
                flush_text!(i);
                ok = ok
                    && on_token(Token {
                        kind: TokenType::LinkTextStart,
                        text: b"",
                        data: 0,
                    });
                ok = ok
                    && on_token(Token {
                        kind: TokenType::Text,
                        text: txt,
                        data: 0,
                    });
                ok = ok
                    && on_token(Token {
                        kind: TokenType::LinkTextEnd,
                        text: b"",
                        data: 0,
                    });
                ok = ok
                    && on_token(Token {
                        kind: TokenType::LinkUrl,
                        text: url,
                        data: 0,
                    });
                i += consumed;
                text_start = i;
                continue;
            }
        }

        i += 1;
    }

    if ok {
        flush_text!(line.len());
    }
}

fn find_byte(s: &[u8], target: u8) -> Option<usize> {
    s.iter().position(|&b| b == target)
}

// find closing pair `chch` after an opening `chch`, returns span length before it
fn find_pair(s: &[u8], ch: u8) -> Option<usize> {
    let mut i = 0;
    while i + 1 < s.len() {
        if s[i] == ch && s[i + 1] == ch {
            return Some(i);
        }
        i += 1;
    }
    None
}

// parses `[text](url)` or `alt](url)` starting right after the opening
// `[`; returns (text, url, total bytes consumed from the start of `s`,
// i.e. including the leading `[`).
fn parse_link_like(s: &[u8]) -> Option<(&[u8], &[u8], usize)> {
    if s.first() != Some(&b'[') {
        return None;
    }
    let close_bracket = find_byte(&s[1..], b']')? + 1;
    if s.get(close_bracket + 1) != Some(&b'(') {
        return None;
    }
    let url_start = close_bracket + 2;
    let close_paren = find_byte(&s[url_start..], b')')? + url_start;
    Some((&s[1..close_bracket], &s[url_start..close_paren], close_paren + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn collect(text: &[u8], features: u16) -> Vec<(TokenType, alloc::vec::Vec<u8>, u8)> {
        let mut out = Vec::new();
        parse(text, features, &mut |tok| {
            out.push((tok.kind, tok.text.to_vec(), tok.data));
            true
        });
        out
    }

    #[test]
    fn plain_paragraph_emits_paragraph_and_text() {
        let toks = collect(b"hello world", FEAT_ALL);
        assert!(toks.iter().any(|(k, _, _)| *k == TokenType::ParagraphStart));
        assert!(toks.iter().any(|(k, t, _)| *k == TokenType::Text && t == b"hello world"));
    }

    #[test]
    fn header_level_is_capped_and_reported() {
        let toks = collect(b"### Title", FEAT_ALL);
        let (_, _, level) = toks
            .iter()
            .find(|(k, _, _)| *k == TokenType::HeaderStart)
            .unwrap();
        assert_eq!(*level, 3);
    }

    #[test]
    fn bold_and_italic_tokens_bracket_their_text() {
        let toks = collect(b"a **bold** b *it* c", FEAT_ALL);
        assert!(toks.iter().any(|(k, _, _)| *k == TokenType::BoldStart));
        assert!(toks.iter().any(|(k, t, _)| *k == TokenType::Text && t == b"bold"));
        assert!(toks.iter().any(|(k, _, _)| *k == TokenType::ItalicStart));
        assert!(toks.iter().any(|(k, t, _)| *k == TokenType::Text && t == b"it"));
    }

    #[test]
    fn inline_code_is_not_further_tokenized() {
        let toks = collect(b"use `*not bold*` here", FEAT_ALL);
        assert!(toks.iter().any(|(k, t, _)| *k == TokenType::CodeInline && t == b"*not bold*"));
    }

    #[test]
    fn horizontal_rule_is_detected() {
        let toks = collect(b"---", FEAT_ALL);
        assert!(toks.iter().any(|(k, _, _)| *k == TokenType::Hr));
    }

    #[test]
    fn feature_mask_disables_bold() {
        let toks = collect(b"**not bold**", FEAT_BASIC & !FEAT_BOLD);
        assert!(!toks.iter().any(|(k, _, _)| *k == TokenType::BoldStart));
    }

    #[test]
    fn link_extracts_text_and_url() {
        let toks = collect(b"see [here](http://x)", FEAT_ALL);
        assert!(toks.iter().any(|(k, t, _)| *k == TokenType::Text && t == b"here"));
        assert!(toks.iter().any(|(k, t, _)| *k == TokenType::LinkUrl && t == b"http://x"));
    }

    #[test]
    fn ordered_list_number_truncates_like_the_original() {
        // 300 doesn't fit in u8; the original casts down without clamping
        // rather than rejecting or saturating — preserved intentionally
        let (n, _) = ordered_list_number(b"300. item").unwrap();
        assert_eq!(n, 300u32 as u8);
    }

    #[test]
    fn token_name_is_nonempty_for_every_variant() {
        assert_eq!(token_name(TokenType::Hr), "HR");
        assert_eq!(token_name(TokenType::ParagraphStart), "PARAGRAPH_START");
    }
}
