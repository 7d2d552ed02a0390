// System settings with persistent storage
//
// Settings fall into two groups:
//
//   - user-facing preferences: shown as rows in this screen, adjusted
//     with Left/Right and Confirm to toggle edit mode, like the
//     original six fields below.
//   - resume / app state: written by other apps as a side effect of
//     normal use (last book opened, last file-list directory, the
//     in-progress state-machine transition markers) and simply
//     round-tripped here. They have no row in this screen — there's
//     no free-text input on this device, and showing raw paths would
//     just be clutter — but they share the same `SystemSettings`
//     struct and `settings.bin` file so there's one load/save path.
//
// Wiring status of fields with no real hardware target yet:
//
//   sleep_timeout      — stored; kernel still uses a compile-time constant.
//                        Short path: read SystemSettings in the main loop
//                        and replace IDLE_THRESHOLD_POLLS with this value.
//
//   contrast           — SSD1677 VCOM register 0x2C.  Stored; not yet sent
//                        to the display driver.  Plumbing: add a
//                        `set_vcom(u8)` method to DisplayDriver and call it
//                        after loading settings.
//
//   ghost_clear_every  — directly replaces FULL_REFRESH_INTERVAL in
//                        main.rs once the main loop reads this value.
//
//   book_font_size_idx — reader body-font size selector (0=Small, 1=Medium,
//                        2=Large).  ReaderApp consults this on on_enter().
//
//   ui_font_size_idx   — shell / settings UI font size selector.
//                        Same index scale as book_font_size_idx.
//                        Fully wired: HomeApp / FilesApp / SettingsApp all
//                        store a body_font pointer updated via
//                        set_ui_font_size().  main.rs propagates the index
//                        to all three apps on every nav transition, before
//                        the lifecycle callback fires.
//
//   button_map         — side button layout. 0 = Default, 1 = Swapped (L/R).
//   front_button_map   — front button layout, same scale.
//
//   orientation        — hardwired to Deg270 in the display driver on this
//                        board. Stored for forward compatibility with a
//                        board revision that can rotate; no UI row.
//
//   contrast/orientation and the other "stored but not wired" fields are
//   intentionally excluded from the list above when they already have a
//   plumbing note — see each field's doc comment.
//
// Persistence: SystemSettings is a #[repr(C)] struct written as raw bytes
// to "settings.bin" in the SD card root. Never reorder or remove a field;
// append new ones at the end of the struct to keep old settings files
// loadable (old files just leave the new tail zeroed, which matches each
// new field's default of 0).

use core::fmt::Write as _;

use crate::apps::{App, AppContext, Services, Transition};
use crate::board::action::{Action, ActionEvent};
use crate::drivers::strip::StripBuffer;
use crate::fonts::bitmap::BitmapFont;
use crate::fonts::font_data;
use crate::ui::{Alignment, BitmapDynLabel, BitmapLabel, CONTENT_TOP, Region};

// ── Layout ────────────────────────────────────────────────────────────────────
//
// Logical screen: 480 wide × 800 tall (Deg270 rotation).
// Status bar occupies y 0..CONTENT_TOP (18 px). Only VISIBLE_ROWS rows are
// drawn at once; the list scrolls to keep the selection in view.

const TITLE_REGION: Region = Region::new(16, CONTENT_TOP + 4, 448, 28);

const ITEMS_TOP: u16 = CONTENT_TOP + 44;
const ROW_H: u16 = 40;
const ROW_GAP: u16 = 6;
const ROW_STRIDE: u16 = ROW_H + ROW_GAP;

// Left column: setting name.
const LABEL_X: u16 = 16;
const LABEL_W: u16 = 160;

// Right column: current value.
const COL_GAP: u16 = 8;
const VALUE_X: u16 = LABEL_X + LABEL_W + COL_GAP;
const VALUE_W: u16 = 296; // reaches to x = 480 − 8 = 472

const NUM_ITEMS: usize = 19;
const VISIBLE_ROWS: usize = 10;

// Help line sits below the last visible row.
const HELP_Y: u16 = ITEMS_TOP + VISIBLE_ROWS as u16 * ROW_STRIDE + 14;
const HELP_REGION: Region = Region::new(8, HELP_Y, 464, 18);

// ── Persistent settings ───────────────────────────────────────────────────────

const SETTINGS_FILE: &str = "settings.bin";
const LAST_BOOK_PATH_CAP: usize = 256;
const LAST_LIST_DIR_CAP: usize = 256;
const LAST_SELECTED_NAME_CAP: usize = 128;
const THEME_NAME_CAP: usize = 32;

// Hardware-mapped and resume-state settings persisted to the SD card as
// raw bytes. #[repr(C)] guarantees a stable on-disk layout for a single
// firmware build; there is no cross-version migration story since this
// is a single-device, single-binary product.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct SystemSettings {
    pub sleep_timeout: u16,     // minutes of inactivity before sleep; 0 = never
    pub contrast: u8,           // SSD1677 VCOM register 0x2C; higher = darker
    pub ghost_clear_every: u8,  // partial refreshes before a forced full refresh
    pub book_font_size_idx: u8, // 0 = Small, 1 = Medium, 2 = Large
    pub ui_font_size_idx: u8,   // 0 = Small, 1 = Medium, 2 = Large
    pub button_map: u8,         // side buttons: 0 = Default, 1 = Swapped (L/R)
    pub front_button_map: u8,   // front buttons: same scale as button_map

    pub sleep_screen_mode: u8,     // 0 = Blank, 1 = Last Page, 2 = Cover Art
    pub status_bar_mode: u8,       // 0 = Hidden, 1 = Minimal, 2 = Full
    pub text_layout_preset: u8,    // 0 = Compact, 1 = Comfortable, 2 = Spacious
    pub power_button_action: u8,   // 0 = Sleep, 1 = Power Off, 2 = None
    pub orientation: u8,           // hardwired to Deg270; stored, no UI row
    pub paragraph_alignment: u8,   // 0 = Left, 1 = Justify
    pub hyphenation: u8,           // 0 = Off, 1 = On
    pub anti_aliasing: u8,         // 0 = Off, 1 = On
    pub show_images: u8,           // 0 = Off, 1 = On
    pub startup_behaviour: u8,     // 0 = Last Book, 1 = Home, 2 = File List
    pub cover_dithering: u8,       // 0 = Off, 1 = Ordered, 2 = Floyd-Steinberg
    pub line_spacing_preset: u8,   // 0 = Tight, 1 = Normal, 2 = Loose
    pub sunlight_fading: u8,       // SSD1677 sunlight-fading workaround: 0/1
    pub pending_transition: u8,    // crash-safe resume: AppId to restore, 0xFF = none
    pub transition_return_to: u8,  // AppId to return to once pending_transition resolves

    pub selected_index: u16, // last selected row in FilesApp's list

    pub theme_name_len: u8,
    pub theme_name: [u8; THEME_NAME_CAP],

    pub last_book_path_len: u16,
    pub last_book_path: [u8; LAST_BOOK_PATH_CAP],

    pub last_list_dir_len: u16,
    pub last_list_dir: [u8; LAST_LIST_DIR_CAP],

    pub last_selected_filename_len: u8,
    pub last_selected_filename: [u8; LAST_SELECTED_NAME_CAP],
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self::defaults()
    }
}

impl SystemSettings {
    pub const fn defaults() -> Self {
        Self {
            sleep_timeout: 10,
            contrast: 150,
            ghost_clear_every: 10,
            book_font_size_idx: 0,
            ui_font_size_idx: 0,
            button_map: 0,
            front_button_map: 0,

            sleep_screen_mode: 0,
            status_bar_mode: 2,
            text_layout_preset: 1,
            power_button_action: 0,
            orientation: 0,
            paragraph_alignment: 0,
            hyphenation: 0,
            anti_aliasing: 1,
            show_images: 1,
            startup_behaviour: 0,
            cover_dithering: 1,
            line_spacing_preset: 1,
            sunlight_fading: 0,
            pending_transition: 0xFF,
            transition_return_to: 0xFF,

            selected_index: 0,

            theme_name_len: 0,
            theme_name: [0u8; THEME_NAME_CAP],

            last_book_path_len: 0,
            last_book_path: [0u8; LAST_BOOK_PATH_CAP],

            last_list_dir_len: 0,
            last_list_dir: [0u8; LAST_LIST_DIR_CAP],

            last_selected_filename_len: 0,
            last_selected_filename: [0u8; LAST_SELECTED_NAME_CAP],
        }
    }

    // reinterpret self as a byte slice for writing to SD
    pub fn to_bytes(&self) -> &[u8] {
        unsafe {
            core::slice::from_raw_parts(
                self as *const Self as *const u8,
                core::mem::size_of::<Self>(),
            )
        }
    }

    // deserialise from raw bytes; returns defaults on short input
    pub fn from_bytes(data: &[u8]) -> Self {
        let size = core::mem::size_of::<Self>();
        if data.len() >= size {
            let mut s = Self::defaults();
            unsafe {
                core::ptr::copy_nonoverlapping(data.as_ptr(), &mut s as *mut Self as *mut u8, size);
            }
            s
        } else {
            Self::defaults()
        }
    }

    // ── Resume-state accessors (written by Reader/Files/kernel, not this UI) ──

    pub fn last_book_path(&self) -> &str {
        str_field(&self.last_book_path, self.last_book_path_len as usize)
    }

    pub fn set_last_book_path(&mut self, path: &str) {
        set_str_field(&mut self.last_book_path, &mut self.last_book_path_len, path);
    }

    pub fn last_list_dir(&self) -> &str {
        str_field(&self.last_list_dir, self.last_list_dir_len as usize)
    }

    pub fn set_last_list_dir(&mut self, dir: &str) {
        set_str_field(&mut self.last_list_dir, &mut self.last_list_dir_len, dir);
    }

    pub fn last_selected_filename(&self) -> &str {
        str_field(&self.last_selected_filename, self.last_selected_filename_len as usize)
    }

    pub fn set_last_selected_filename(&mut self, name: &str) {
        let mut len16 = self.last_selected_filename_len as u16;
        set_str_field(&mut self.last_selected_filename, &mut len16, name);
        self.last_selected_filename_len = len16 as u8;
    }

    pub fn theme_name(&self) -> &str {
        str_field(&self.theme_name, self.theme_name_len as usize)
    }

    pub fn set_theme_name(&mut self, name: &str) {
        let mut len16 = self.theme_name_len as u16;
        set_str_field(&mut self.theme_name, &mut len16, name);
        self.theme_name_len = len16 as u8;
    }
}

fn str_field(buf: &[u8], len: usize) -> &str {
    core::str::from_utf8(&buf[..len.min(buf.len())]).unwrap_or("")
}

fn set_str_field(buf: &mut [u8], len: &mut u16, value: &str) {
    let n = value.len().min(buf.len());
    buf[..n].copy_from_slice(&value.as_bytes()[..n]);
    buf[n..].fill(0);
    *len = n as u16;
}

// ── App ───────────────────────────────────────────────────────────────────────

pub struct SettingsApp {
    settings: SystemSettings,
    selected: usize,
    scroll: usize,
    edit_mode: bool,
    loaded: bool,
    save_needed: bool,
    body_font: &'static BitmapFont,
    heading_font: &'static BitmapFont,
}

impl SettingsApp {
    pub fn new() -> Self {
        Self {
            settings: SystemSettings::defaults(),
            selected: 0,
            scroll: 0,
            edit_mode: false,
            loaded: false,
            save_needed: false,
            body_font: &font_data::REGULAR_BODY_SMALL,
            heading_font: &font_data::REGULAR_HEADING,
        }
    }

    /// Called by main.rs whenever ui_font_size_idx changes.
    /// The heading font is always the fixed 24 px cut; only body text scales.
    pub fn set_ui_font_size(&mut self, idx: u8) {
        self.body_font = match idx {
            1 => &font_data::REGULAR_BODY_MEDIUM,
            2 => &font_data::REGULAR_BODY_LARGE,
            _ => &font_data::REGULAR_BODY_SMALL,
        };
    }

    pub fn system_settings(&self) -> &SystemSettings {
        &self.settings
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    // ── Storage ───────────────────────────────────────────────────────────────

    fn load<SPI: embedded_hal::spi::SpiDevice>(&mut self, services: &mut Services<'_, SPI>) {
        let mut buf = [0u8; core::mem::size_of::<SystemSettings>()];
        match services.read_file_start(SETTINGS_FILE, &mut buf) {
            Ok((size, n)) if n > 0 => {
                self.settings = SystemSettings::from_bytes(&buf[..n.min(size as usize)]);
                log::info!("settings: loaded from {}", SETTINGS_FILE);
            }
            _ => {
                self.settings = SystemSettings::defaults();
                log::info!("settings: file absent or empty, using defaults");
            }
        }
        self.loaded = true;
    }

    fn save<SPI: embedded_hal::spi::SpiDevice>(&self, services: &Services<'_, SPI>) -> bool {
        match services.write_file(SETTINGS_FILE, self.settings.to_bytes()) {
            Ok(_) => {
                log::info!("settings: saved to {}", SETTINGS_FILE);
                true
            }
            Err(e) => {
                log::error!("settings: save failed: {}", e);
                false
            }
        }
    }

    // ── Item metadata ─────────────────────────────────────────────────────────

    fn item_label(i: usize) -> &'static str {
        match i {
            0 => "Sleep After",
            1 => "Contrast",
            2 => "Ghost Clear",
            3 => "Book Font",
            4 => "UI Font",
            5 => "Side Buttons",
            6 => "Front Buttons",
            7 => "Sleep Screen",
            8 => "Status Bar",
            9 => "Text Layout",
            10 => "Power Button",
            11 => "Paragraph",
            12 => "Hyphenation",
            13 => "Anti-aliasing",
            14 => "Show Images",
            15 => "Startup",
            16 => "Cover Dither",
            17 => "Line Spacing",
            18 => "Sunlight Fade",
            _ => "",
        }
    }

    fn format_value<const N: usize>(&self, i: usize, buf: &mut BitmapDynLabel<N>) {
        buf.clear_text();
        let three = |idx: u8, labels: [&str; 3]| labels[(idx as usize).min(2)];
        let onoff = |idx: u8| if idx != 0 { "On" } else { "Off" };
        match i {
            0 => {
                if self.settings.sleep_timeout == 0 {
                    let _ = write!(buf, "Never");
                } else {
                    let _ = write!(buf, "{} min", self.settings.sleep_timeout);
                }
            }
            1 => {
                let _ = write!(buf, "{}", self.settings.contrast);
            }
            2 => {
                let _ = write!(buf, "Every {}", self.settings.ghost_clear_every);
            }
            3 => {
                let _ = write!(buf, "{}", three(self.settings.book_font_size_idx, ["Small", "Medium", "Large"]));
            }
            4 => {
                let _ = write!(buf, "{}", three(self.settings.ui_font_size_idx, ["Small", "Medium", "Large"]));
            }
            5 => {
                let _ = write!(buf, "{}", if self.settings.button_map != 0 { "Swapped" } else { "Default" });
            }
            6 => {
                let _ = write!(buf, "{}", if self.settings.front_button_map != 0 { "Swapped" } else { "Default" });
            }
            7 => {
                let _ = write!(buf, "{}", three(self.settings.sleep_screen_mode, ["Blank", "Last Page", "Cover Art"]));
            }
            8 => {
                let _ = write!(buf, "{}", three(self.settings.status_bar_mode, ["Hidden", "Minimal", "Full"]));
            }
            9 => {
                let _ = write!(
                    buf,
                    "{}",
                    three(self.settings.text_layout_preset, ["Compact", "Comfortable", "Spacious"])
                );
            }
            10 => {
                let _ = write!(
                    buf,
                    "{}",
                    three(self.settings.power_button_action, ["Sleep", "Power Off", "None"])
                );
            }
            11 => {
                let _ = write!(buf, "{}", if self.settings.paragraph_alignment != 0 { "Justify" } else { "Left" });
            }
            12 => {
                let _ = write!(buf, "{}", onoff(self.settings.hyphenation));
            }
            13 => {
                let _ = write!(buf, "{}", onoff(self.settings.anti_aliasing));
            }
            14 => {
                let _ = write!(buf, "{}", onoff(self.settings.show_images));
            }
            15 => {
                let _ = write!(
                    buf,
                    "{}",
                    three(self.settings.startup_behaviour, ["Last Book", "Home", "File List"])
                );
            }
            16 => {
                let _ = write!(
                    buf,
                    "{}",
                    three(self.settings.cover_dithering, ["Off", "Ordered", "Floyd-Steinberg"])
                );
            }
            17 => {
                let _ = write!(
                    buf,
                    "{}",
                    three(self.settings.line_spacing_preset, ["Tight", "Normal", "Loose"])
                );
            }
            18 => {
                let _ = write!(buf, "{}", onoff(self.settings.sunlight_fading));
            }
            _ => {}
        }
    }

    // ── Value mutation ────────────────────────────────────────────────────────

    fn cycle_up(field: &mut u8, max: u8) {
        *field = if *field >= max { 0 } else { *field + 1 };
    }

    fn cycle_down(field: &mut u8, max: u8) {
        *field = if *field == 0 { max } else { *field - 1 };
    }

    fn toggle(field: &mut u8) {
        *field = if *field != 0 { 0 } else { 1 };
    }

    fn increment(&mut self) {
        let s = &mut self.settings;
        match self.selected {
            0 => {
                s.sleep_timeout = match s.sleep_timeout {
                    0 => 5,
                    t if t >= 120 => 120,
                    t => t + 5,
                };
            }
            1 => s.contrast = s.contrast.saturating_add(16),
            2 => s.ghost_clear_every = s.ghost_clear_every.saturating_add(5).min(50),
            3 => {
                if s.book_font_size_idx < 2 {
                    s.book_font_size_idx += 1;
                }
            }
            4 => {
                if s.ui_font_size_idx < 2 {
                    s.ui_font_size_idx += 1;
                }
            }
            5 => Self::toggle(&mut s.button_map),
            6 => Self::toggle(&mut s.front_button_map),
            7 => Self::cycle_up(&mut s.sleep_screen_mode, 2),
            8 => Self::cycle_up(&mut s.status_bar_mode, 2),
            9 => Self::cycle_up(&mut s.text_layout_preset, 2),
            10 => Self::cycle_up(&mut s.power_button_action, 2),
            11 => Self::toggle(&mut s.paragraph_alignment),
            12 => Self::toggle(&mut s.hyphenation),
            13 => Self::toggle(&mut s.anti_aliasing),
            14 => Self::toggle(&mut s.show_images),
            15 => Self::cycle_up(&mut s.startup_behaviour, 2),
            16 => Self::cycle_up(&mut s.cover_dithering, 2),
            17 => Self::cycle_up(&mut s.line_spacing_preset, 2),
            18 => Self::toggle(&mut s.sunlight_fading),
            _ => return,
        }
        self.save_needed = true;
    }

    fn decrement(&mut self) {
        let s = &mut self.settings;
        match self.selected {
            0 => {
                s.sleep_timeout = match s.sleep_timeout {
                    0..=5 => 0,
                    t => t - 5,
                };
            }
            1 => s.contrast = s.contrast.saturating_sub(16),
            2 => s.ghost_clear_every = s.ghost_clear_every.saturating_sub(5).max(5),
            3 => {
                if s.book_font_size_idx > 0 {
                    s.book_font_size_idx -= 1;
                }
            }
            4 => {
                if s.ui_font_size_idx > 0 {
                    s.ui_font_size_idx -= 1;
                }
            }
            5 => Self::toggle(&mut s.button_map),
            6 => Self::toggle(&mut s.front_button_map),
            7 => Self::cycle_down(&mut s.sleep_screen_mode, 2),
            8 => Self::cycle_down(&mut s.status_bar_mode, 2),
            9 => Self::cycle_down(&mut s.text_layout_preset, 2),
            10 => Self::cycle_down(&mut s.power_button_action, 2),
            11 => Self::toggle(&mut s.paragraph_alignment),
            12 => Self::toggle(&mut s.hyphenation),
            13 => Self::toggle(&mut s.anti_aliasing),
            14 => Self::toggle(&mut s.show_images),
            15 => Self::cycle_down(&mut s.startup_behaviour, 2),
            16 => Self::cycle_down(&mut s.cover_dithering, 2),
            17 => Self::cycle_down(&mut s.line_spacing_preset, 2),
            18 => Self::toggle(&mut s.sunlight_fading),
            _ => return,
        }
        self.save_needed = true;
    }

    // ── Scrolling ─────────────────────────────────────────────────────────────

    fn clamp_scroll(&mut self) {
        if self.selected < self.scroll {
            self.scroll = self.selected;
        } else if self.selected >= self.scroll + VISIBLE_ROWS {
            self.scroll = self.selected + 1 - VISIBLE_ROWS;
        }
    }

    // ── Region helpers (row index is relative to the visible window) ──────────

    #[inline]
    fn label_region(row: usize) -> Region {
        Region::new(LABEL_X, ITEMS_TOP + row as u16 * ROW_STRIDE, LABEL_W, ROW_H)
    }

    #[inline]
    fn value_region(row: usize) -> Region {
        Region::new(VALUE_X, ITEMS_TOP + row as u16 * ROW_STRIDE, VALUE_W, ROW_H)
    }

}

impl App for SettingsApp {
    fn on_enter(&mut self, ctx: &mut AppContext) {
        self.selected = 0;
        self.scroll = 0;
        self.edit_mode = false;
        self.save_needed = false;
        ctx.request_screen_redraw();
    }

    fn on_event(&mut self, event: ActionEvent, ctx: &mut AppContext) -> Transition {
        match event {
            ActionEvent::Press(Action::Back) => {
                if self.edit_mode {
                    self.edit_mode = false;
                    ctx.request_screen_redraw();
                    return Transition::None;
                }
                Transition::Pop
            }

            ActionEvent::Press(Action::Next) => {
                if self.edit_mode {
                    self.increment();
                } else {
                    self.selected = (self.selected + 1).min(NUM_ITEMS - 1);
                    self.clamp_scroll();
                }
                ctx.request_screen_redraw();
                Transition::None
            }

            ActionEvent::Press(Action::Prev) => {
                if self.edit_mode {
                    self.decrement();
                } else {
                    self.selected = self.selected.saturating_sub(1);
                    self.clamp_scroll();
                }
                ctx.request_screen_redraw();
                Transition::None
            }

            ActionEvent::Press(Action::Select) => {
                self.edit_mode = !self.edit_mode;
                ctx.request_screen_redraw();
                Transition::None
            }

            ActionEvent::Repeat(Action::Next) if self.edit_mode => {
                self.increment();
                ctx.request_screen_redraw();
                Transition::None
            }

            ActionEvent::Repeat(Action::Prev) if self.edit_mode => {
                self.decrement();
                ctx.request_screen_redraw();
                Transition::None
            }

            _ => Transition::None,
        }
    }

    fn needs_work(&self) -> bool {
        !self.loaded || self.save_needed
    }

    fn on_work<SPI: embedded_hal::spi::SpiDevice>(
        &mut self,
        services: &mut Services<'_, SPI>,
        ctx: &mut AppContext,
    ) {
        if !self.loaded {
            self.load(services);
            ctx.request_screen_redraw();
            return;
        }

        if self.save_needed && self.save(services) {
            self.save_needed = false;
        }
    }

    fn draw(&self, strip: &mut StripBuffer) {
        BitmapLabel::new(TITLE_REGION, "Settings", self.heading_font)
            .alignment(Alignment::CenterLeft)
            .draw(strip)
            .unwrap();

        if !self.loaded {
            let r = Region::new(LABEL_X, ITEMS_TOP, 200, ROW_H);
            BitmapLabel::new(r, "Loading...", self.body_font)
                .alignment(Alignment::CenterLeft)
                .draw(strip)
                .unwrap();
            return;
        }

        let mut val_buf = BitmapDynLabel::<20>::new(Region::new(0, 0, 1, 1), self.body_font);

        let visible_end = (self.scroll + VISIBLE_ROWS).min(NUM_ITEMS);
        for (row, i) in (self.scroll..visible_end).enumerate() {
            let selected = i == self.selected;
            let editing = selected && self.edit_mode;

            BitmapLabel::new(Self::label_region(row), Self::item_label(i), self.body_font)
                .alignment(Alignment::CenterLeft)
                .inverted(selected)
                .draw(strip)
                .unwrap();

            self.format_value(i, &mut val_buf);
            BitmapLabel::new(Self::value_region(row), val_buf.text(), self.body_font)
                .alignment(Alignment::Center)
                .inverted(editing)
                .draw(strip)
                .unwrap();
        }

        let help = if self.edit_mode {
            "L / R: adjust    Confirm / Back: done"
        } else {
            "L / R: select    Confirm: edit    Back: exit"
        };
        BitmapLabel::new(HELP_REGION, help, self.body_font)
            .alignment(Alignment::Center)
            .draw(strip)
            .unwrap();
    }
}
