// PageCache: the per-book paginated-render cache (§6.3 layout).
//
// Create/extend/load sequencing and the cold-extend no-progress safety
// rule are grounded in `original_source/lib/PageCache/src/PageCache.cpp`;
// the dirty-flag-gated flush idiom and manual LE encode/decode come from
// `apps::bookmarks::BookmarkCache`.

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;

use embedded_hal::spi::SpiDevice;

use crate::content::{ContentParser, ParseOutcome};
use crate::drivers::sdcard::SdStorage;
use crate::drivers::storage;
use crate::error::{ErrorKind, PapyrixError, Result};
use crate::page::{Alignment, Page};

pub const VERSION: u8 = 17;
const HEADER_LEN: usize = 1 + 4 + 4 + 1 + 1 + 1 + 1 + 1 + 2 + 2 + 2 + 1 + 4;
const LOAD_RETRIES: u8 = 3;

/// Render configuration compared field-by-field against the cached
/// header on load; any mismatch invalidates the cache (§6.7).
#[derive(Clone, Copy, PartialEq)]
pub struct RenderConfig {
    pub font_id: u32,
    pub line_compression: f32,
    pub indent_level: u8,
    pub spacing_level: u8,
    pub paragraph_alignment: Alignment,
    pub hyphenation: bool,
    pub show_images: bool,
    pub viewport_width: u16,
    pub viewport_height: u16,
}

struct Header {
    version: u8,
    font_id: u32,
    line_compression: f32,
    indent_level: u8,
    spacing_level: u8,
    paragraph_alignment: Alignment,
    hyphenation: bool,
    show_images: bool,
    viewport_width: u16,
    viewport_height: u16,
    page_count: u16,
    is_partial: bool,
    lut_offset: u32,
}

impl Header {
    fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        let mut i = 0;
        buf[i] = self.version;
        i += 1;
        buf[i..i + 4].copy_from_slice(&self.font_id.to_le_bytes());
        i += 4;
        buf[i..i + 4].copy_from_slice(&self.line_compression.to_le_bytes());
        i += 4;
        buf[i] = self.indent_level;
        i += 1;
        buf[i] = self.spacing_level;
        i += 1;
        buf[i] = self.paragraph_alignment.to_tag();
        i += 1;
        buf[i] = self.hyphenation as u8;
        i += 1;
        buf[i] = self.show_images as u8;
        i += 1;
        buf[i..i + 2].copy_from_slice(&self.viewport_width.to_le_bytes());
        i += 2;
        buf[i..i + 2].copy_from_slice(&self.viewport_height.to_le_bytes());
        i += 2;
        buf[i..i + 2].copy_from_slice(&self.page_count.to_le_bytes());
        i += 2;
        buf[i] = self.is_partial as u8;
        i += 1;
        buf[i..i + 4].copy_from_slice(&self.lut_offset.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(PapyrixError::new(ErrorKind::InvalidFormat, "pagecache header truncated"));
        }
        let mut i = 0;
        let version = buf[i];
        i += 1;
        let font_id = u32::from_le_bytes(buf[i..i + 4].try_into().unwrap());
        i += 4;
        let line_compression = f32::from_le_bytes(buf[i..i + 4].try_into().unwrap());
        i += 4;
        let indent_level = buf[i];
        i += 1;
        let spacing_level = buf[i];
        i += 1;
        let paragraph_alignment = Alignment::from_tag(buf[i])?;
        i += 1;
        let hyphenation = buf[i] != 0;
        i += 1;
        let show_images = buf[i] != 0;
        i += 1;
        let viewport_width = u16::from_le_bytes(buf[i..i + 2].try_into().unwrap());
        i += 2;
        let viewport_height = u16::from_le_bytes(buf[i..i + 2].try_into().unwrap());
        i += 2;
        let page_count = u16::from_le_bytes(buf[i..i + 2].try_into().unwrap());
        i += 2;
        let is_partial = buf[i] != 0;
        i += 1;
        let lut_offset = u32::from_le_bytes(buf[i..i + 4].try_into().unwrap());
        Ok(Self {
            version,
            font_id,
            line_compression,
            indent_level,
            spacing_level,
            paragraph_alignment,
            hyphenation,
            show_images,
            viewport_width,
            viewport_height,
            page_count,
            is_partial,
            lut_offset,
        })
    }

    fn matches_config(&self, cfg: &RenderConfig) -> bool {
        self.version == VERSION
            && self.font_id == cfg.font_id
            && self.line_compression == cfg.line_compression
            && self.indent_level == cfg.indent_level
            && self.spacing_level == cfg.spacing_level
            && self.paragraph_alignment == cfg.paragraph_alignment
            && self.hyphenation == cfg.hyphenation
            && self.show_images == cfg.show_images
            && self.viewport_width == cfg.viewport_width
            && self.viewport_height == cfg.viewport_height
    }
}

/// Handle over a cache file under `_PULP/<cache_dir>/<name>`.
pub struct PageCache<'a> {
    cache_dir: &'a str,
    name: &'a str,
    pub page_count: u16,
    pub is_partial: bool,
    lut_offset: u32,
}

fn first_chunk_size(page_count: u16) -> u16 {
    if page_count < 30 { 5 } else { 50 }
}

impl<'a> PageCache<'a> {
    /// Build a fresh cache from scratch, parsing up to `max_pages` pages.
    pub fn create<SPI>(
        sd: &SdStorage<SPI>,
        cache_dir: &'a str,
        name: &'a str,
        cfg: &RenderConfig,
        parser: &mut dyn ContentParser,
        max_pages: u16,
    ) -> Result<Self>
    where
        SPI: SpiDevice,
    {
        let mut body = Vec::new();
        let mut lut = Vec::new();
        let mut written = 0u16;

        let outcome = {
            let body = &mut body;
            let lut = &mut lut;
            let written = &mut written;
            parser.parse_pages(max_pages as usize, &mut || false, &mut |page| {
                if *written >= max_pages {
                    return;
                }
                lut.push(HEADER_LEN as u32 + body.len() as u32);
                page.serialize(body);
                *written += 1;
            })?
        };

        if written == 0 {
            return Err(PapyrixError::new(ErrorKind::InvalidState, "parser produced no pages"));
        }

        let is_partial = match outcome {
            ParseOutcome::Done => false,
            ParseOutcome::MorePending | ParseOutcome::Aborted => true,
        };
        let lut_offset = HEADER_LEN as u32 + body.len() as u32;

        let header = Header {
            version: VERSION,
            font_id: cfg.font_id,
            line_compression: cfg.line_compression,
            indent_level: cfg.indent_level,
            spacing_level: cfg.spacing_level,
            paragraph_alignment: cfg.paragraph_alignment,
            hyphenation: cfg.hyphenation,
            show_images: cfg.show_images,
            viewport_width: cfg.viewport_width,
            viewport_height: cfg.viewport_height,
            page_count: written,
            is_partial,
            lut_offset,
        };

        let mut out = Vec::with_capacity(lut_offset as usize + lut.len() * 4);
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&body);
        for off in &lut {
            out.extend_from_slice(&off.to_le_bytes());
        }

        storage::write_in_pulp_subdir(sd, cache_dir, name, &out).map_err(crate::error::from_storage_str)?;

        Ok(Self {
            cache_dir,
            name,
            page_count: written,
            is_partial,
            lut_offset,
        })
    }

    /// Open an existing cache for reading, validating its header against
    /// `cfg`. Returns `None` (not an error) on a config mismatch — the
    /// caller is expected to `create` a fresh one.
    pub fn open<SPI>(sd: &SdStorage<SPI>, cache_dir: &'a str, name: &'a str, cfg: &RenderConfig) -> Result<Option<Self>>
    where
        SPI: SpiDevice,
    {
        let file_len = match storage::file_size_in_pulp_subdir(sd, cache_dir, name) {
            Ok(len) => len,
            Err(_) => return Ok(None),
        };
        if (file_len as usize) < HEADER_LEN {
            let _ = storage::delete_in_pulp_subdir(sd, cache_dir, name);
            return Ok(None);
        }
        let mut hdr_buf = [0u8; HEADER_LEN];
        storage::read_chunk_in_pulp_subdir(sd, cache_dir, name, 0, &mut hdr_buf).map_err(crate::error::from_storage_str)?;
        let header = Header::decode(&hdr_buf)?;
        if !header.matches_config(cfg) {
            let _ = storage::delete_in_pulp_subdir(sd, cache_dir, name);
            return Ok(None);
        }
        Ok(Some(Self {
            cache_dir,
            name,
            page_count: header.page_count,
            is_partial: header.is_partial,
            lut_offset: header.lut_offset,
        }))
    }

    /// Extend the cache with more pages. Hot path (parser can resume
    /// from its own saved position): parse `chunk` more pages directly.
    /// Cold path (parser has no saved position, e.g. after a restart):
    /// reset and re-walk from the start, discarding everything before
    /// `page_count` and keeping only the newly reached pages — the
    /// no-progress safety rule is that re-walking never touches the
    /// pages already on disk, it only appends past them.
    pub fn extend<SPI>(&mut self, sd: &SdStorage<SPI>, parser: &mut dyn ContentParser) -> Result<()>
    where
        SPI: SpiDevice,
    {
        if !self.is_partial {
            return Ok(());
        }
        let chunk = first_chunk_size(self.page_count);
        let skip_pages = if parser.can_resume() {
            0
        } else {
            parser.reset();
            self.page_count
        };
        self.append_pages(sd, parser, skip_pages, chunk)
    }

    // Appends past the true end of file rather than rewriting anything
    // already on disk: new page bodies land after the old LUT (which
    // becomes a dead, unaddressed hole), the new combined LUT is
    // appended after that, and only then is the header rewritten in
    // place. The header's page_count/lut_offset is the commit point —
    // a crash at any point before the header write leaves the old
    // header, old LUT and old body exactly as valid as they were.
    fn append_pages<SPI>(
        &mut self,
        sd: &SdStorage<SPI>,
        parser: &mut dyn ContentParser,
        skip_pages: u16,
        chunk: u16,
    ) -> Result<()>
    where
        SPI: SpiDevice,
    {
        let file_len = storage::file_size_in_pulp_subdir(sd, self.cache_dir, self.name)
            .map_err(crate::error::from_storage_str)?;

        let mut hdr_buf = [0u8; HEADER_LEN];
        storage::read_chunk_in_pulp_subdir(sd, self.cache_dir, self.name, 0, &mut hdr_buf)
            .map_err(crate::error::from_storage_str)?;
        let old_header = Header::decode(&hdr_buf)?;

        let old_lut_len = file_len - self.lut_offset;
        let mut old_lut = vec![0u8; old_lut_len as usize];
        storage::read_chunk_in_pulp_subdir(sd, self.cache_dir, self.name, self.lut_offset, &mut old_lut)
            .map_err(crate::error::from_storage_str)?;

        let body_base = file_len;
        let mut new_body = Vec::new();
        let mut new_lut = Vec::new();
        let mut skipped = 0u16;
        let mut written = 0u16;

        let outcome = {
            let new_body = &mut new_body;
            let new_lut = &mut new_lut;
            let written = &mut written;
            parser.parse_pages(
                (skip_pages as usize).saturating_add(chunk as usize),
                &mut || false,
                &mut |page| {
                    if skipped < skip_pages {
                        skipped += 1;
                        return;
                    }
                    if *written >= chunk {
                        return;
                    }
                    new_lut.push(body_base + new_body.len() as u32);
                    page.serialize(new_body);
                    *written += 1;
                },
            )?
        };

        // cold rebuild that fails to reach even the already-cached point
        // must not silently shrink the cache or misreport progress
        if skip_pages > 0 && skipped < skip_pages {
            return Err(PapyrixError::new(
                ErrorKind::InvalidState,
                "cold extend could not re-reach the cached position",
            ));
        }

        if written == 0 {
            return Ok(());
        }

        let page_count = self.page_count + written;
        let is_partial = match outcome {
            ParseOutcome::Done => false,
            ParseOutcome::MorePending | ParseOutcome::Aborted => true,
        };
        let new_lut_offset = body_base + new_body.len() as u32;

        // 1. new page bodies, appended past the current end of file.
        storage::append_in_pulp_subdir(sd, self.cache_dir, self.name, &new_body)
            .map_err(crate::error::from_storage_str)?;

        // 2. the combined LUT (old entries unchanged, new ones after),
        // appended right after — this becomes the new trailing LUT.
        let mut lut_bytes = Vec::with_capacity(old_lut.len() + new_lut.len() * 4);
        lut_bytes.extend_from_slice(&old_lut);
        for off in &new_lut {
            lut_bytes.extend_from_slice(&off.to_le_bytes());
        }
        storage::append_in_pulp_subdir(sd, self.cache_dir, self.name, &lut_bytes)
            .map_err(crate::error::from_storage_str)?;

        // 3. commit: rewrite just the header bytes in place.
        let header = Header {
            version: VERSION,
            font_id: old_header.font_id,
            line_compression: old_header.line_compression,
            indent_level: old_header.indent_level,
            spacing_level: old_header.spacing_level,
            paragraph_alignment: old_header.paragraph_alignment,
            hyphenation: old_header.hyphenation,
            show_images: old_header.show_images,
            viewport_width: old_header.viewport_width,
            viewport_height: old_header.viewport_height,
            page_count,
            is_partial,
            lut_offset: new_lut_offset,
        };
        storage::overwrite_prefix_in_pulp_subdir(sd, self.cache_dir, self.name, &header.encode())
            .map_err(crate::error::from_storage_str)?;

        self.page_count = page_count;
        self.is_partial = is_partial;
        self.lut_offset = new_lut_offset;
        Ok(())
    }

    /// True once the caller is close enough to the cached edge that a
    /// background extend should be kicked off.
    pub fn needs_prefetch(&self, current_page: u16) -> bool {
        self.is_partial && current_page + 3 >= self.page_count
    }

    /// Load page `index`, retrying a handful of times on validation/I/O
    /// failure before giving up.
    pub fn load_page<SPI>(&self, sd: &SdStorage<SPI>, index: u16) -> Option<Page>
    where
        SPI: SpiDevice,
    {
        if index >= self.page_count {
            return None;
        }
        for _ in 0..LOAD_RETRIES {
            if let Some(page) = self.try_load_page(sd, index) {
                return Some(page);
            }
        }
        None
    }

    fn try_load_page<SPI>(&self, sd: &SdStorage<SPI>, index: u16) -> Option<Page>
    where
        SPI: SpiDevice,
    {
        let mut off_buf = [0u8; 4];
        storage::read_chunk_in_pulp_subdir(
            sd,
            self.cache_dir,
            self.name,
            self.lut_offset + (index as u32) * 4,
            &mut off_buf,
        )
        .ok()?;
        let offset = u32::from_le_bytes(off_buf);
        if offset < HEADER_LEN as u32 || offset >= self.lut_offset {
            return None;
        }

        let mut len_buf = [0u8; 4];
        storage::read_chunk_in_pulp_subdir(sd, self.cache_dir, self.name, offset, &mut len_buf).ok()?;
        let body_len = u32::from_le_bytes(len_buf) as usize;
        let total = 4 + body_len;
        let mut buf = vec![0u8; total];
        let n = storage::read_chunk_in_pulp_subdir(sd, self.cache_dir, self.name, offset, &mut buf).ok()?;
        if n != total {
            return None;
        }
        Page::deserialize(&buf).ok().map(|(page, _)| page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg() -> RenderConfig {
        RenderConfig {
            font_id: 1,
            line_compression: 1.0,
            indent_level: 0,
            spacing_level: 0,
            paragraph_alignment: Alignment::Left,
            hyphenation: false,
            show_images: true,
            viewport_width: 480,
            viewport_height: 800,
        }
    }

    #[test]
    fn header_round_trips_through_encode_decode() {
        let cfg = test_cfg();
        let header = Header {
            version: VERSION,
            font_id: cfg.font_id,
            line_compression: cfg.line_compression,
            indent_level: cfg.indent_level,
            spacing_level: cfg.spacing_level,
            paragraph_alignment: cfg.paragraph_alignment,
            hyphenation: cfg.hyphenation,
            show_images: cfg.show_images,
            viewport_width: cfg.viewport_width,
            viewport_height: cfg.viewport_height,
            page_count: 42,
            is_partial: true,
            lut_offset: 12345,
        };
        let encoded = header.encode();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(decoded.page_count, 42);
        assert!(decoded.is_partial);
        assert_eq!(decoded.lut_offset, 12345);
        assert!(decoded.matches_config(&cfg));
    }

    #[test]
    fn config_mismatch_is_detected() {
        let cfg = test_cfg();
        let header = Header {
            version: VERSION,
            font_id: 99,
            line_compression: cfg.line_compression,
            indent_level: cfg.indent_level,
            spacing_level: cfg.spacing_level,
            paragraph_alignment: cfg.paragraph_alignment,
            hyphenation: cfg.hyphenation,
            show_images: cfg.show_images,
            viewport_width: cfg.viewport_width,
            viewport_height: cfg.viewport_height,
            page_count: 0,
            is_partial: false,
            lut_offset: 0,
        };
        assert!(!header.matches_config(&cfg));
    }

    #[test]
    fn version_mismatch_is_detected() {
        let cfg = test_cfg();
        let mut header = Header {
            version: VERSION,
            font_id: cfg.font_id,
            line_compression: cfg.line_compression,
            indent_level: cfg.indent_level,
            spacing_level: cfg.spacing_level,
            paragraph_alignment: cfg.paragraph_alignment,
            hyphenation: cfg.hyphenation,
            show_images: cfg.show_images,
            viewport_width: cfg.viewport_width,
            viewport_height: cfg.viewport_height,
            page_count: 0,
            is_partial: false,
            lut_offset: 0,
        };
        header.version = VERSION - 1;
        assert!(!header.matches_config(&cfg));
    }

    #[test]
    fn chunk_size_rule_matches_spec() {
        assert_eq!(first_chunk_size(0), 5);
        assert_eq!(first_chunk_size(29), 5);
        assert_eq!(first_chunk_size(30), 50);
    }
}
