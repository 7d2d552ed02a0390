// book.bin: per-book metadata cache (title/author/language, spine, TOC).
//
// Two-phase lifecycle, same shape as the original BookMetadataCache:
// build phase streams spine/TOC entries to SD tempfiles as the content.opf
// and nav/ncx documents are parsed, then `bake` merges the tempfiles plus
// core metadata into a single book.bin with trailing offset tables for
// O(1) random access. Read phase opens book.bin and seeks via those LUTs.
//
// Layout (little-endian), matches the distilled wire contract exactly:
//   version:u8  lutOffset:u32  spineCount:u16  tocCount:u16
//   title:string author:string language:string coverHref:string textRefHref:string
//   [spine entries]* [toc entries]*
//   spineLUT: spineCount x u32   tocLUT: tocCount x u32
// `string` = u32 length prefix + raw UTF-8 bytes.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use embedded_hal::spi::SpiDevice;

use crate::drivers::sdcard::SdStorage;
use crate::drivers::storage;
use crate::error::{ErrorKind, PapyrixError, Result};

pub const BOOK_BIN_FILE: &str = "book.bin";
const SPINE_TMP: &str = "spine.tmp";
const TOC_TMP: &str = "toc.tmp";
const VERSION: u8 = 1;

#[derive(Default, Clone)]
pub struct BookMetadata {
    pub title: String,
    pub author: String,
    pub language: String,
    pub cover_href: String,
    pub text_ref_href: String,
}

#[derive(Clone)]
pub struct SpineEntry {
    pub href: String,
    pub toc_index: i16,
}

#[derive(Clone)]
pub struct TocEntry {
    pub title: String,
    pub href: String,
    pub anchor: String,
    pub level: u8,
    pub spine_index: i16,
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn read_string(data: &[u8], pos: &mut usize) -> Result<String> {
    if *pos + 4 > data.len() {
        return Err(PapyrixError::new(ErrorKind::InvalidFormat, "string length truncated"));
    }
    let len = u32::from_le_bytes([data[*pos], data[*pos + 1], data[*pos + 2], data[*pos + 3]]) as usize;
    *pos += 4;
    if *pos + len > data.len() {
        return Err(PapyrixError::new(ErrorKind::InvalidFormat, "string bytes truncated"));
    }
    let s = core::str::from_utf8(&data[*pos..*pos + len])
        .map_err(|_| PapyrixError::new(ErrorKind::InvalidFormat, "string not utf8"))?
        .into();
    *pos += len;
    Ok(s)
}

fn encode_spine_entry(e: &SpineEntry) -> Vec<u8> {
    let mut buf = Vec::new();
    write_string(&mut buf, &e.href);
    buf.extend_from_slice(&e.toc_index.to_le_bytes());
    buf
}

fn decode_spine_entry(data: &[u8], pos: &mut usize) -> Result<SpineEntry> {
    let href = read_string(data, pos)?;
    if *pos + 2 > data.len() {
        return Err(PapyrixError::new(ErrorKind::InvalidFormat, "spine entry truncated"));
    }
    let toc_index = i16::from_le_bytes([data[*pos], data[*pos + 1]]);
    *pos += 2;
    Ok(SpineEntry { href, toc_index })
}

fn encode_toc_entry(e: &TocEntry) -> Vec<u8> {
    let mut buf = Vec::new();
    write_string(&mut buf, &e.title);
    write_string(&mut buf, &e.href);
    write_string(&mut buf, &e.anchor);
    buf.push(e.level);
    buf.extend_from_slice(&e.spine_index.to_le_bytes());
    buf
}

fn decode_toc_entry(data: &[u8], pos: &mut usize) -> Result<TocEntry> {
    let title = read_string(data, pos)?;
    let href = read_string(data, pos)?;
    let anchor = read_string(data, pos)?;
    if *pos + 3 > data.len() {
        return Err(PapyrixError::new(ErrorKind::InvalidFormat, "toc entry truncated"));
    }
    let level = data[*pos];
    let spine_index = i16::from_le_bytes([data[*pos + 1], data[*pos + 2]]);
    *pos += 3;
    Ok(TocEntry {
        title,
        href,
        anchor,
        level,
        spine_index,
    })
}

/// Resolve every spine entry's `toc_index` in place: one pass over
/// `toc` builds a spine-index -> toc-position reverse map, then a
/// forward pass over `spine` has each entry inherit the last TOC
/// index reached so far, so an unlabelled spine item (e.g. "page 2 of
/// the chapter") still reports the chapter heading it falls under.
fn resolve_toc_indices(spine: &mut [SpineEntry], toc: &[TocEntry]) {
    let mut reverse = alloc::vec![-1i16; spine.len()];
    for (toc_idx, entry) in toc.iter().enumerate() {
        if entry.spine_index >= 0 && (entry.spine_index as usize) < reverse.len() {
            reverse[entry.spine_index as usize] = toc_idx as i16;
        }
    }

    let mut last_toc_index: i16 = -1;
    for (i, entry) in spine.iter_mut().enumerate() {
        if reverse[i] >= 0 {
            last_toc_index = reverse[i];
        }
        entry.toc_index = last_toc_index;
    }
}

/// Walk back from `max_len` to the start of the last complete UTF-8
/// sequence, so truncating a string never splits a multibyte codepoint.
pub fn find_utf8_boundary(s: &[u8], max_len: usize) -> usize {
    if s.len() <= max_len {
        return s.len();
    }
    let mut i = max_len;
    while i > 0 && (s[i] & 0xC0) == 0x80 {
        i -= 1;
    }
    i
}

/// Builder: streams spine/TOC entries to tempfiles under `cache_dir`
/// (an already-created subdirectory of `_PULP`), then bakes book.bin.
pub struct BookMetadataBuilder<'a> {
    cache_dir: &'a str,
    spine_count: u16,
    toc_count: u16,
}

impl<'a> BookMetadataBuilder<'a> {
    pub fn begin_write<SPI>(sd: &SdStorage<SPI>, cache_dir: &'a str) -> Result<Self>
    where
        SPI: SpiDevice,
    {
        storage::write_in_pulp_subdir(sd, cache_dir, SPINE_TMP, &[]).map_err(crate::error::from_storage_str)?;
        storage::write_in_pulp_subdir(sd, cache_dir, TOC_TMP, &[]).map_err(crate::error::from_storage_str)?;
        Ok(Self {
            cache_dir,
            spine_count: 0,
            toc_count: 0,
        })
    }

    pub fn create_spine_entry<SPI>(&mut self, sd: &SdStorage<SPI>, href: &str) -> Result<i16>
    where
        SPI: SpiDevice,
    {
        let index = self.spine_count as i16;
        // toc_index is a placeholder here -- bake() overwrites every
        // entry with the resolved reverse-mapped (or forward-propagated)
        // value before it ever reaches disk.
        let entry = SpineEntry {
            href: href.into(),
            toc_index: -1,
        };
        let buf = encode_spine_entry(&entry);
        storage::append_in_pulp_subdir(sd, self.cache_dir, SPINE_TMP, &buf).map_err(crate::error::from_storage_str)?;
        self.spine_count += 1;
        Ok(index)
    }

    pub fn create_toc_entry<SPI>(
        &mut self,
        sd: &SdStorage<SPI>,
        title: &str,
        href: &str,
        anchor: &str,
        level: u8,
        spine_index: i16,
    ) -> Result<()>
    where
        SPI: SpiDevice,
    {
        let entry = TocEntry {
            title: title.into(),
            href: href.into(),
            anchor: anchor.into(),
            level,
            spine_index,
        };
        let buf = encode_toc_entry(&entry);
        storage::append_in_pulp_subdir(sd, self.cache_dir, TOC_TMP, &buf).map_err(crate::error::from_storage_str)?;
        self.toc_count += 1;
        Ok(())
    }

    /// Merge the tempfiles and `metadata` into `book.bin`, then remove
    /// the tempfiles. `book.bin` is written atomically: it's built in
    /// full in memory (books have small spine/TOC tables) and written
    /// with a single create-or-truncate.
    pub fn bake<SPI>(self, sd: &SdStorage<SPI>, metadata: &BookMetadata) -> Result<()>
    where
        SPI: SpiDevice,
    {
        let spine_len = storage::file_size_in_pulp_subdir(sd, self.cache_dir, SPINE_TMP)
            .map_err(crate::error::from_storage_str)?;
        let mut spine_raw = alloc::vec![0u8; spine_len as usize];
        storage::read_chunk_in_pulp_subdir(sd, self.cache_dir, SPINE_TMP, 0, &mut spine_raw)
            .map_err(crate::error::from_storage_str)?;

        let toc_len =
            storage::file_size_in_pulp_subdir(sd, self.cache_dir, TOC_TMP).map_err(crate::error::from_storage_str)?;
        let mut toc_raw = alloc::vec![0u8; toc_len as usize];
        storage::read_chunk_in_pulp_subdir(sd, self.cache_dir, TOC_TMP, 0, &mut toc_raw)
            .map_err(crate::error::from_storage_str)?;

        let mut spine_entries = Vec::with_capacity(self.spine_count as usize);
        let mut pos = 0usize;
        for _ in 0..self.spine_count {
            spine_entries.push(decode_spine_entry(&spine_raw, &mut pos)?);
        }

        let mut toc_entries = Vec::with_capacity(self.toc_count as usize);
        pos = 0;
        for _ in 0..self.toc_count {
            toc_entries.push(decode_toc_entry(&toc_raw, &mut pos)?);
        }

        resolve_toc_indices(&mut spine_entries, &toc_entries);

        let mut body = Vec::new();
        write_string(&mut body, &metadata.title);
        write_string(&mut body, &metadata.author);
        write_string(&mut body, &metadata.language);
        write_string(&mut body, &metadata.cover_href);
        write_string(&mut body, &metadata.text_ref_href);

        let mut spine_offsets = Vec::with_capacity(self.spine_count as usize);
        for entry in &spine_entries {
            spine_offsets.push(body.len() as u32);
            body.extend_from_slice(&encode_spine_entry(entry));
        }

        let mut toc_offsets = Vec::with_capacity(self.toc_count as usize);
        for entry in &toc_entries {
            toc_offsets.push(body.len() as u32);
            body.extend_from_slice(&encode_toc_entry(entry));
        }

        let header_len = 1 + 4 + 2 + 2;
        let lut_offset = (header_len + body.len()) as u32;

        let mut out = Vec::with_capacity(lut_offset as usize + (spine_offsets.len() + toc_offsets.len()) * 4);
        out.push(VERSION);
        out.extend_from_slice(&lut_offset.to_le_bytes());
        out.extend_from_slice(&self.spine_count.to_le_bytes());
        out.extend_from_slice(&self.toc_count.to_le_bytes());
        out.extend_from_slice(&body);
        for off in &spine_offsets {
            out.extend_from_slice(&off.to_le_bytes());
        }
        for off in &toc_offsets {
            out.extend_from_slice(&off.to_le_bytes());
        }

        storage::write_in_pulp_subdir(sd, self.cache_dir, BOOK_BIN_FILE, &out).map_err(crate::error::from_storage_str)?;

        storage::delete_in_pulp_subdir(sd, self.cache_dir, SPINE_TMP).map_err(crate::error::from_storage_str)?;
        storage::delete_in_pulp_subdir(sd, self.cache_dir, TOC_TMP).map_err(crate::error::from_storage_str)?;

        log::info!(
            "book_index: baked book.bin ({} spine, {} toc entries)",
            self.spine_count,
            self.toc_count
        );
        Ok(())
    }
}

/// O(1) reader over an already-baked book.bin.
pub struct BookIndex<'a> {
    cache_dir: &'a str,
    version: u8,
    lut_offset: u32,
    spine_count: u16,
    toc_count: u16,
    pub metadata: BookMetadata,
}

impl<'a> BookIndex<'a> {
    pub fn load<SPI>(sd: &SdStorage<SPI>, cache_dir: &'a str) -> Result<Self>
    where
        SPI: SpiDevice,
    {
        let file_len = storage::file_size_in_pulp_subdir(sd, cache_dir, BOOK_BIN_FILE)
            .map_err(crate::error::from_storage_str)?;
        if file_len < 9 {
            return Err(PapyrixError::new(ErrorKind::InvalidFormat, "book.bin too small"));
        }

        let mut header = [0u8; 9];
        storage::read_chunk_in_pulp_subdir(sd, cache_dir, BOOK_BIN_FILE, 0, &mut header)
            .map_err(crate::error::from_storage_str)?;
        let version = header[0];
        if version != VERSION {
            return Err(PapyrixError::new(ErrorKind::InvalidFormat, "book.bin version mismatch"));
        }
        let lut_offset = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
        let spine_count = u16::from_le_bytes([header[5], header[6]]);
        let toc_count = u16::from_le_bytes([header[7], header[8]]);

        let lut_bytes = (spine_count as usize + toc_count as usize) * 4;
        if lut_offset as u64 + lut_bytes as u64 > file_len as u64 {
            return Err(PapyrixError::new(ErrorKind::InvalidFormat, "book.bin LUT exceeds file size"));
        }

        let metadata_region_len = file_len - 9;
        let mut rest = alloc::vec![0u8; metadata_region_len as usize];
        storage::read_chunk_in_pulp_subdir(sd, cache_dir, BOOK_BIN_FILE, 9, &mut rest)
            .map_err(crate::error::from_storage_str)?;

        let mut pos = 0usize;
        let title = read_string(&rest, &mut pos)?;
        let author = read_string(&rest, &mut pos)?;
        let language = read_string(&rest, &mut pos)?;
        let cover_href = read_string(&rest, &mut pos)?;
        let text_ref_href = read_string(&rest, &mut pos)?;

        Ok(Self {
            cache_dir,
            version,
            lut_offset,
            spine_count,
            toc_count,
            metadata: BookMetadata {
                title,
                author,
                language,
                cover_href,
                text_ref_href,
            },
        })
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn spine_count(&self) -> usize {
        self.spine_count as usize
    }

    pub fn toc_count(&self) -> usize {
        self.toc_count as usize
    }

    fn lut_entry<SPI>(&self, sd: &SdStorage<SPI>, slot: usize) -> Result<u32>
    where
        SPI: SpiDevice,
    {
        let mut buf = [0u8; 4];
        storage::read_chunk_in_pulp_subdir(
            sd,
            self.cache_dir,
            BOOK_BIN_FILE,
            self.lut_offset + (slot as u32) * 4,
            &mut buf,
        )
        .map_err(crate::error::from_storage_str)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn get_spine_entry<SPI>(&self, sd: &SdStorage<SPI>, index: usize) -> Result<SpineEntry>
    where
        SPI: SpiDevice,
    {
        if index >= self.spine_count as usize {
            return Err(PapyrixError::new(ErrorKind::InvalidArg, "spine index out of range"));
        }
        let offset = self.lut_entry(sd, index)?;
        // entries are small (href + i16); 512B covers any realistic href
        let mut buf = alloc::vec![0u8; 512];
        let n = storage::read_chunk_in_pulp_subdir(sd, self.cache_dir, BOOK_BIN_FILE, offset, &mut buf)
            .map_err(crate::error::from_storage_str)?;
        let mut pos = 0usize;
        decode_spine_entry(&buf[..n], &mut pos)
    }

    pub fn get_toc_entry<SPI>(&self, sd: &SdStorage<SPI>, index: usize) -> Result<TocEntry>
    where
        SPI: SpiDevice,
    {
        if index >= self.toc_count as usize {
            return Err(PapyrixError::new(ErrorKind::InvalidArg, "toc index out of range"));
        }
        let offset = self.lut_entry(sd, index)?;
        let mut buf = alloc::vec![0u8; 768];
        let n = storage::read_chunk_in_pulp_subdir(sd, self.cache_dir, BOOK_BIN_FILE, offset, &mut buf)
            .map_err(crate::error::from_storage_str)?;
        let mut pos = 0usize;
        decode_toc_entry(&buf[..n], &mut pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_boundary_never_splits_a_codepoint() {
        let s = "héllo".as_bytes(); // 'é' is 2 bytes, starts at index 1
        let boundary = find_utf8_boundary(s, 2);
        assert!(boundary <= 2);
        assert!(core::str::from_utf8(&s[..boundary]).is_ok());
    }

    #[test]
    fn utf8_boundary_is_noop_when_within_bounds() {
        let s = b"short";
        assert_eq!(find_utf8_boundary(s, 100), s.len());
    }

    #[test]
    fn spine_entry_round_trips() {
        let e = SpineEntry {
            href: "chapter1.xhtml".into(),
            toc_index: 3,
        };
        let buf = encode_spine_entry(&e);
        let mut pos = 0;
        let decoded = decode_spine_entry(&buf, &mut pos).unwrap();
        assert_eq!(decoded.href, e.href);
        assert_eq!(decoded.toc_index, e.toc_index);
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn toc_entry_round_trips() {
        let e = TocEntry {
            title: "Chapter One".into(),
            href: "ch1.xhtml".into(),
            anchor: "".into(),
            level: 1,
            spine_index: 0,
        };
        let buf = encode_toc_entry(&e);
        let mut pos = 0;
        let decoded = decode_toc_entry(&buf, &mut pos).unwrap();
        assert_eq!(decoded.title, e.title);
        assert_eq!(decoded.level, e.level);
        assert_eq!(decoded.spine_index, e.spine_index);
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn toc_indices_resolve_and_forward_propagate() {
        let mut spine = alloc::vec![
            SpineEntry { href: "cover.xhtml".into(), toc_index: -1 },
            SpineEntry { href: "ch1.xhtml".into(), toc_index: -1 },
            SpineEntry { href: "ch1-2.xhtml".into(), toc_index: -1 },
            SpineEntry { href: "ch2.xhtml".into(), toc_index: -1 },
        ];
        let toc = alloc::vec![
            TocEntry { title: "Chapter 1".into(), href: "ch1.xhtml".into(), anchor: "".into(), level: 1, spine_index: 1 },
            TocEntry { title: "Chapter 2".into(), href: "ch2.xhtml".into(), anchor: "".into(), level: 1, spine_index: 3 },
        ];

        resolve_toc_indices(&mut spine, &toc);

        assert_eq!(spine[0].toc_index, -1); // cover, before any TOC entry
        assert_eq!(spine[1].toc_index, 0); // ch1.xhtml itself
        assert_eq!(spine[2].toc_index, 0); // continuation page, inherits ch1
        assert_eq!(spine[3].toc_index, 1); // ch2.xhtml itself
    }

    #[test]
    fn rejects_truncated_string_length() {
        let buf = [0u8; 2];
        let mut pos = 0;
        assert!(read_string(&buf, &mut pos).is_err());
    }
}
