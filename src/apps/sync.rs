// Network features menu: choose Calibre wireless sync or the plain
// WiFi upload server. Neither child screen is a normal `App` — both
// need raw hardware (the WIFI peripheral, `Epd`, a `Delay`) the `App`
// trait's `Services`/`StripBuffer` surface doesn't expose, so
// `bin/main.rs` special-cases entry into `AppId::Network` /
// `AppId::CalibreSync` the same way it special-cases `AppId::Sleep`.
// This menu only ever produces `Transition::Push` into those ids.

use crate::apps::{App, AppContext, AppId, Transition};
use crate::board::action::{Action, ActionEvent};
use crate::drivers::strip::StripBuffer;
use crate::fonts;
use crate::fonts::bitmap::BitmapFont;
use crate::ui::{Alignment, BitmapButton, BitmapButtonStyle, BitmapLabel, CONTENT_TOP, Region};

const ITEM_W: u16 = 280;
const ITEM_H: u16 = 52;
const ITEM_GAP: u16 = 14;
const ITEM_STRIDE: u16 = ITEM_H + ITEM_GAP;
const ITEM_X: u16 = (480 - ITEM_W) / 2;
const TITLE_ITEM_GAP: u16 = 24;

struct MenuItem {
    name: &'static str,
    app: AppId,
}

const ITEMS: &[MenuItem] = &[
    MenuItem {
        name: "Calibre Wireless",
        app: AppId::CalibreSync,
    },
    MenuItem {
        name: "Web Upload",
        app: AppId::Network,
    },
];

pub struct SyncApp {
    selected: usize,
    body_font: &'static BitmapFont,
    heading_font: &'static BitmapFont,
    item_regions: [Region; ITEMS.len()],
}

impl Default for SyncApp {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncApp {
    pub fn new() -> Self {
        let hf = fonts::heading_font(0);
        let item_y = CONTENT_TOP + 8 + hf.line_height + TITLE_ITEM_GAP;
        Self {
            selected: 0,
            body_font: fonts::body_font(0),
            heading_font: hf,
            item_regions: core::array::from_fn(|i| {
                Region::new(ITEM_X, item_y + i as u16 * ITEM_STRIDE, ITEM_W, ITEM_H)
            }),
        }
    }

    fn move_selection(&mut self, delta: isize, ctx: &mut AppContext) {
        let count = ITEMS.len();
        let new = (self.selected as isize + delta).rem_euclid(count as isize) as usize;
        if new != self.selected {
            ctx.mark_dirty(self.item_regions[self.selected]);
            self.selected = new;
            ctx.mark_dirty(self.item_regions[self.selected]);
        }
    }
}

impl App for SyncApp {
    fn on_enter(&mut self, ctx: &mut AppContext) {
        ctx.clear_message();
        ctx.request_screen_redraw();
    }

    fn on_event(&mut self, event: ActionEvent, ctx: &mut AppContext) -> Transition {
        match event {
            ActionEvent::Press(Action::Next) => {
                self.move_selection(1, ctx);
                Transition::None
            }
            ActionEvent::Press(Action::Prev) => {
                self.move_selection(-1, ctx);
                Transition::None
            }
            ActionEvent::Press(Action::Select) => Transition::Push(ITEMS[self.selected].app),
            ActionEvent::Press(Action::Back) => Transition::Pop,
            _ => Transition::None,
        }
    }

    fn help_text(&self) -> &'static str {
        "Prev/Next: select    Confirm: open    Back: return"
    }

    fn draw(&self, strip: &mut StripBuffer) {
        let title_region = Region::new(
            ITEM_X,
            CONTENT_TOP + 8,
            ITEM_W,
            self.heading_font.line_height,
        );
        BitmapLabel::new(title_region, "Network", self.heading_font)
            .alignment(Alignment::Center)
            .draw(strip)
            .unwrap();

        for (i, item) in ITEMS.iter().enumerate() {
            let mut btn = BitmapButton::new(self.item_regions[i], item.name, self.body_font)
                .style(BitmapButtonStyle::Rounded(10));
            if i == self.selected {
                btn.set_pressed(true);
            }
            btn.draw(strip).unwrap();
        }
    }
}
