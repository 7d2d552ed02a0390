// Streaming `.epdfont` loader.
//
// Keeps the glyph-index table (intervals + glyph records) resident in
// RAM but pulls per-glyph bitmaps from SD on demand, through a two-level
// cache: a small direct-mapped (codepoint -> glyph index) cache, and an
// open-addressed hash table of decoded bitmaps with LRU eviction.
//
// Blit mechanics mirror `fonts::bitmap::blit_glyph`; the difference is
// that the bitmap bytes live behind a cache miss instead of in flash.
// Fonts live under `_PULP/fonts/<name>.epdfont`, read with the same
// `read_chunk_in_pulp_subdir` family the EPUB chapter cache uses.

extern crate alloc;

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use embedded_graphics_core::Pixel;
use embedded_graphics_core::pixelcolor::BinaryColor;
use embedded_graphics_core::prelude::*;
use embedded_hal::spi::SpiDevice;

use crate::drivers::sdcard::SdStorage;
use crate::drivers::storage;
use crate::drivers::strip::StripBuffer;
use crate::error::{ErrorKind, PapyrixError, Result};

pub const FONTS_DIR: &str = "fonts";

const MAGIC: u32 = 0x4644_5045; // "EPDF" read as little-endian u32
const VERSION: u16 = 1;

const MAX_INTERVAL_COUNT: u32 = 10_000;
const MAX_GLYPH_COUNT: u32 = 100_000;
const MAX_BITMAP_SIZE: u32 = 512 * 1024;
const MAX_GLYPH_BITMAP_SIZE: usize = 4096; // sanity cap per glyph, defends against corruption
const HEAP_SLACK_PCT: u32 = 20;

const DIRECT_CACHE_SIZE: usize = 32;
const BITMAP_CACHE_SIZE: usize = 64;
const REHASH_TOMBSTONE_PCT: usize = 25;
const READ_RETRIES: u8 = 3;

const HEADER_FIXED_LEN: usize = 34; // offset of the interval table

fn read_u32(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}
fn read_u16(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([b[off], b[off + 1]])
}
fn read_i16(b: &[u8], off: usize) -> i16 {
    i16::from_le_bytes([b[off], b[off + 1]])
}

/// Read `buf.len()` bytes from `dir/name` at `offset`, retrying a
/// handful of times on transient SD failure before giving up.
fn read_exact_retrying<SPI>(sd: &SdStorage<SPI>, dir: &str, name: &str, offset: u32, buf: &mut [u8]) -> Result<()>
where
    SPI: SpiDevice,
{
    let mut last_err: &'static str = "read failed";
    for attempt in 0..READ_RETRIES {
        match storage::read_chunk_in_pulp_subdir(sd, dir, name, offset, buf) {
            Ok(n) if n == buf.len() => return Ok(()),
            Ok(_) => last_err = "short read",
            Err(e) => last_err = e,
        }
        if attempt + 1 < READ_RETRIES {
            // caller runs in a blocking SD context; a short busy-loop
            // stands in for the ~50ms backoff between retries
            for _ in 0..50_000u32 {
                core::hint::spin_loop();
            }
        }
    }
    Err(PapyrixError::new(ErrorKind::IOError, last_err))
}

#[derive(Clone, Copy, Debug)]
pub struct Interval {
    pub first: u32,
    pub last: u32,
    pub offset: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct GlyphRecord {
    pub width: u8,
    pub height: u8,
    pub advance_x: u8,
    pub left: i16,
    pub top: i16,
    pub data_length: u16,
    pub data_offset: u32,
}

struct DirectEntry {
    codepoint: u32,
    glyph_index: u32,
    valid: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Empty,
    Occupied,
    Tombstone,
}

struct CachedBitmap {
    glyph_index: u32,
    bitmap: Vec<u8>,
    width: u8,
    height: u8,
    last_used: u32,
}

struct Slot {
    state: SlotState,
    glyph_index: u32,
    cache_idx: usize,
}

/// A streaming font: intervals + glyph table resident, bitmaps pulled
/// from SD through the two-level cache below. Backed by
/// `_PULP/fonts/<name>`.
pub struct StreamingFont {
    name: String,

    advance_y: u8,
    ascender: i16,
    descender: i16,

    intervals: Vec<Interval>,
    glyphs: Vec<GlyphRecord>,
    bitmap_file_offset: u32,

    direct_cache: [DirectEntry; DIRECT_CACHE_SIZE],

    bitmaps: Vec<Option<CachedBitmap>>,
    table: Vec<Slot>,
    tombstones: usize,
    clock: u32,
}

impl StreamingFont {
    /// Load the header, interval table, and glyph table for
    /// `_PULP/fonts/<name>`. The bitmap blob offset is recorded but the
    /// blob itself is never read in full. `free_heap_bytes` lets callers
    /// apply the mandated 20% headroom check before committing to a load.
    pub fn load<SPI>(sd: &SdStorage<SPI>, name: &str, free_heap_bytes: u32) -> Result<Self>
    where
        SPI: SpiDevice,
    {
        let file_size =
            storage::file_size_in_pulp_subdir(sd, FONTS_DIR, name).map_err(crate::error::from_storage_str)?;

        let mut header = [0u8; HEADER_FIXED_LEN];
        read_exact_retrying(sd, FONTS_DIR, name, 0, &mut header)?;

        if read_u32(&header, 0) != MAGIC {
            return Err(PapyrixError::new(ErrorKind::InvalidFormat, "epdfont bad magic"));
        }
        if read_u16(&header, 4) != VERSION {
            return Err(PapyrixError::new(ErrorKind::InvalidFormat, "epdfont bad version"));
        }
        let advance_y = header[16];
        let ascender = read_i16(&header, 18);
        let descender = read_i16(&header, 20);
        let interval_count = read_u32(&header, 22);
        let bitmap_size = read_u32(&header, 30);

        if interval_count > MAX_INTERVAL_COUNT {
            return Err(PapyrixError::new(ErrorKind::InvalidFormat, "too many intervals"));
        }
        if bitmap_size > MAX_BITMAP_SIZE {
            return Err(PapyrixError::new(ErrorKind::InvalidFormat, "bitmap blob too large"));
        }
        // rough working-set estimate: interval + glyph tables resident,
        // plus the fixed-size bitmap cache, must leave 20% heap slack
        let estimated_resident = interval_count * 12
            + (bitmap_size / 8).min(MAX_GLYPH_COUNT * 14)
            + (BITMAP_CACHE_SIZE * MAX_GLYPH_BITMAP_SIZE) as u32;
        if free_heap_bytes < estimated_resident + estimated_resident * HEAP_SLACK_PCT / 100 {
            return Err(PapyrixError::new(ErrorKind::NoMem, "insufficient heap headroom for font"));
        }

        let interval_bytes = interval_count as usize * 12;
        let mut interval_buf = vec![0u8; interval_bytes];
        read_exact_retrying(sd, FONTS_DIR, name, HEADER_FIXED_LEN as u32, &mut interval_buf)?;

        let mut intervals = Vec::with_capacity(interval_count as usize);
        let mut max_glyph_index: u32 = 0;
        let mut prev_last: Option<u32> = None;
        for i in 0..interval_count as usize {
            let base = i * 12;
            let first = read_u32(&interval_buf, base);
            let last = read_u32(&interval_buf, base + 4);
            let offset = read_u32(&interval_buf, base + 8);
            if let Some(p) = prev_last {
                if first <= p {
                    return Err(PapyrixError::new(ErrorKind::InvalidFormat, "intervals not sorted/overlapping"));
                }
            }
            prev_last = Some(last);
            let span = last.saturating_sub(first).saturating_add(1);
            max_glyph_index = max_glyph_index.max(offset.saturating_add(span));
            intervals.push(Interval { first, last, offset });
        }

        let glyph_count = max_glyph_index;
        if glyph_count > MAX_GLYPH_COUNT {
            return Err(PapyrixError::new(ErrorKind::InvalidFormat, "too many glyphs"));
        }

        let glyph_table_offset = HEADER_FIXED_LEN + interval_bytes;
        let glyph_bytes = glyph_count as usize * 14;
        if glyph_table_offset + glyph_bytes > file_size as usize {
            return Err(PapyrixError::new(ErrorKind::InvalidFormat, "glyph table exceeds file size"));
        }
        let mut glyph_buf = vec![0u8; glyph_bytes];
        read_exact_retrying(sd, FONTS_DIR, name, glyph_table_offset as u32, &mut glyph_buf)?;

        let mut glyphs = Vec::with_capacity(glyph_count as usize);
        for i in 0..glyph_count as usize {
            let base = i * 14;
            glyphs.push(GlyphRecord {
                width: glyph_buf[base],
                height: glyph_buf[base + 1],
                advance_x: glyph_buf[base + 2],
                left: read_i16(&glyph_buf, base + 4),
                top: read_i16(&glyph_buf, base + 6),
                data_length: read_u16(&glyph_buf, base + 8),
                data_offset: read_u32(&glyph_buf, base + 10),
            });
        }

        let bitmap_file_offset = (glyph_table_offset + glyph_bytes) as u32;

        let direct_cache = core::array::from_fn(|_| DirectEntry {
            codepoint: 0,
            glyph_index: 0,
            valid: false,
        });

        let table = (0..BITMAP_CACHE_SIZE)
            .map(|_| Slot {
                state: SlotState::Empty,
                glyph_index: 0,
                cache_idx: 0,
            })
            .collect();
        let bitmaps = (0..BITMAP_CACHE_SIZE).map(|_| None).collect();

        Ok(Self {
            name: name.into(),
            advance_y,
            ascender,
            descender,
            intervals,
            glyphs,
            bitmap_file_offset,
            direct_cache,
            bitmaps,
            table,
            tombstones: 0,
            clock: 0,
        })
    }

    pub fn line_height(&self) -> u16 {
        (self.ascender - self.descender).max(0) as u16
    }

    pub fn ascent(&self) -> u16 {
        self.ascender.max(0) as u16
    }

    pub fn advance_y(&self) -> u8 {
        self.advance_y
    }

    fn direct_slot(codepoint: u32) -> usize {
        (codepoint as usize) % DIRECT_CACHE_SIZE
    }

    /// O(1) via direct-mapped cache, else O(log n) interval search.
    pub fn get_glyph(&mut self, codepoint: u32) -> Option<u32> {
        let slot = Self::direct_slot(codepoint);
        if self.direct_cache[slot].valid && self.direct_cache[slot].codepoint == codepoint {
            let idx = self.direct_cache[slot].glyph_index;
            if (idx as usize) < self.glyphs.len() {
                return Some(idx);
            }
            return None;
        }

        let mut lo = 0usize;
        let mut hi = self.intervals.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let iv = &self.intervals[mid];
            if codepoint < iv.first {
                hi = mid;
            } else if codepoint > iv.last {
                lo = mid + 1;
            } else {
                let glyph_index = iv.offset + (codepoint - iv.first);
                if glyph_index as usize >= self.glyphs.len() {
                    return None; // corrupted derived index
                }
                self.direct_cache[slot] = DirectEntry {
                    codepoint,
                    glyph_index,
                    valid: true,
                };
                return Some(glyph_index);
            }
        }
        None
    }

    /// Resolve `?` as a fallback glyph when `codepoint` has no interval.
    pub fn get_glyph_or_fallback(&mut self, codepoint: u32) -> Option<u32> {
        self.get_glyph(codepoint).or_else(|| self.get_glyph('?' as u32))
    }

    fn hash_glyph_index(glyph_index: u32) -> usize {
        (glyph_index as usize).wrapping_mul(2654435761) % BITMAP_CACHE_SIZE
    }

    fn find_slot(&self, glyph_index: u32) -> Option<usize> {
        let start = Self::hash_glyph_index(glyph_index);
        for i in 0..BITMAP_CACHE_SIZE {
            let idx = (start + i) % BITMAP_CACHE_SIZE;
            match self.table[idx].state {
                SlotState::Empty => return None,
                SlotState::Tombstone => continue,
                SlotState::Occupied if self.table[idx].glyph_index == glyph_index => return Some(idx),
                SlotState::Occupied => continue,
            }
        }
        None
    }

    fn rehash(&mut self) {
        let mut old = Vec::with_capacity(BITMAP_CACHE_SIZE);
        core::mem::swap(&mut old, &mut self.table);
        self.table = (0..BITMAP_CACHE_SIZE)
            .map(|_| Slot {
                state: SlotState::Empty,
                glyph_index: 0,
                cache_idx: 0,
            })
            .collect();
        self.tombstones = 0;
        for slot in old.into_iter() {
            if slot.state == SlotState::Occupied {
                self.insert_slot(slot.glyph_index, slot.cache_idx);
            }
        }
    }

    fn insert_slot(&mut self, glyph_index: u32, cache_idx: usize) {
        let start = Self::hash_glyph_index(glyph_index);
        for i in 0..BITMAP_CACHE_SIZE {
            let idx = (start + i) % BITMAP_CACHE_SIZE;
            if self.table[idx].state != SlotState::Occupied {
                self.table[idx] = Slot {
                    state: SlotState::Occupied,
                    glyph_index,
                    cache_idx,
                };
                return;
            }
        }
        // Table full (shouldn't happen: capacity matches bitmap cache).
        self.rehash();
        self.insert_slot(glyph_index, cache_idx);
    }

    fn evict_lru_cache_slot(&mut self) -> usize {
        let mut best: Option<(usize, u32)> = None;
        for (i, entry) in self.bitmaps.iter().enumerate() {
            match entry {
                None => return i,
                Some(c) => {
                    if best.map(|(_, lu)| c.last_used < lu).unwrap_or(true) {
                        best = Some((i, c.last_used));
                    }
                }
            }
        }
        let victim = best.map(|(i, _)| i).unwrap_or(0);
        if let Some(old) = &self.bitmaps[victim] {
            let old_glyph = old.glyph_index;
            if let Some(slot_idx) = self.find_slot(old_glyph) {
                self.table[slot_idx].state = SlotState::Tombstone;
                self.tombstones += 1;
            }
        }
        victim
    }

    /// Fetch (loading from SD if necessary) the decoded bitmap for
    /// `glyph_index`. `glyph_index` is bounds-checked against the font's
    /// glyph table before any file access.
    pub fn get_glyph_bitmap<SPI>(&mut self, sd: &SdStorage<SPI>, glyph_index: u32) -> Result<(&[u8], u8, u8)>
    where
        SPI: SpiDevice,
    {
        if glyph_index as usize >= self.glyphs.len() {
            return Err(PapyrixError::new(ErrorKind::InvalidArg, "glyph index out of range"));
        }

        self.clock += 1;
        let clock = self.clock;

        if let Some(slot_idx) = self.find_slot(glyph_index) {
            let cache_idx = self.table[slot_idx].cache_idx;
            if let Some(entry) = &mut self.bitmaps[cache_idx] {
                entry.last_used = clock;
                return Ok((&entry.bitmap, entry.width, entry.height));
            }
        }

        let glyph = self.glyphs[glyph_index as usize];
        if glyph.data_length as usize > MAX_GLYPH_BITMAP_SIZE {
            return Err(PapyrixError::new(ErrorKind::InvalidFormat, "glyph bitmap exceeds sanity cap"));
        }

        let mut data = vec![0u8; glyph.data_length as usize];
        if !data.is_empty() {
            let abs_offset = self.bitmap_file_offset + glyph.data_offset;
            read_exact_retrying(sd, FONTS_DIR, &self.name, abs_offset, &mut data)?;
        }

        let cache_idx = self.evict_lru_cache_slot();
        self.bitmaps[cache_idx] = Some(CachedBitmap {
            glyph_index,
            bitmap: data,
            width: glyph.width,
            height: glyph.height,
            last_used: clock,
        });
        self.insert_slot(glyph_index, cache_idx);

        if self.tombstones * 100 >= REHASH_TOMBSTONE_PCT * BITMAP_CACHE_SIZE {
            self.rehash();
        }

        let entry = self.bitmaps[cache_idx].as_ref().unwrap();
        Ok((&entry.bitmap, entry.width, entry.height))
    }

    /// Draw a single codepoint's glyph, advancing past it. Returns the
    /// horizontal advance in pixels. Missing glyphs draw nothing.
    pub fn draw_codepoint<SPI>(
        &mut self,
        sd: &SdStorage<SPI>,
        strip: &mut StripBuffer,
        codepoint: u32,
        cx: i32,
        baseline: i32,
    ) -> u8
    where
        SPI: SpiDevice,
    {
        let Some(glyph_index) = self.get_glyph_or_fallback(codepoint) else {
            return 0;
        };
        let glyph = self.glyphs[glyph_index as usize];
        if glyph.width > 0 && glyph.height > 0 {
            if let Ok((bitmap, w, h)) = self.get_glyph_bitmap(sd, glyph_index) {
                blit_streamed(strip, bitmap, w, h, glyph.left, glyph.top, cx, baseline);
            }
        }
        glyph.advance_x
    }
}

fn blit_streamed(strip: &mut StripBuffer, bitmap: &[u8], w: u8, h: u8, left: i16, top: i16, cx: i32, baseline: i32) {
    let gx = cx + left as i32;
    let gy = baseline + top as i32;
    let w = w as usize;
    let h = h as usize;
    let stride = w.div_ceil(8);
    if stride * h > bitmap.len() {
        return;
    }
    let pixels = (0..h).flat_map(move |y| {
        let row = y * stride;
        (0..w).filter_map(move |x| {
            if bitmap[row + x / 8] & (1 << (7 - x % 8)) != 0 {
                Some(Pixel(Point::new(gx + x as i32, gy + y as i32), BinaryColor::On))
            } else {
                None
            }
        })
    });
    let _ = strip.draw_iter(pixels);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_binary_search_finds_midrange_glyph() {
        let intervals = alloc::vec![
            Interval { first: 0x20, last: 0x7E, offset: 0 },
            Interval { first: 0xA0, last: 0xFF, offset: 95 },
        ];
        let codepoint = 0xC0u32;
        let mut lo = 0usize;
        let mut hi = intervals.len();
        let mut found = None;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let iv = &intervals[mid];
            if codepoint < iv.first {
                hi = mid;
            } else if codepoint > iv.last {
                lo = mid + 1;
            } else {
                found = Some(iv.offset + (codepoint - iv.first));
                break;
            }
        }
        assert_eq!(found, Some(95 + (0xC0 - 0xA0)));
    }

    #[test]
    fn hash_glyph_index_is_stable_and_in_range() {
        for g in [0u32, 1, 63, 64, 1000, 99_999] {
            let h = StreamingFont::hash_glyph_index(g);
            assert!(h < BITMAP_CACHE_SIZE);
            assert_eq!(h, StreamingFont::hash_glyph_index(g));
        }
    }
}
