// Boot splash. `bin/main.rs` draws this once on cold boot, holds the
// e-ink image on screen for a fixed delay, then replaces it with Home
// without ever calling `on_event` — there is no input worth waiting
// for here, and `App::on_work` has no way to return a `Transition` to
// drive the timed handoff itself.

use crate::apps::{App, AppContext, Transition};
use crate::board::action::ActionEvent;
use crate::drivers::strip::StripBuffer;
use crate::fonts;
use crate::fonts::bitmap::BitmapFont;
use crate::ui::{Alignment, BitmapLabel, CONTENT_TOP, Region};

const TITLE_REGION: Region = Region::new(100, 360, 280, 48);
const SUBTITLE_REGION: Region = Region::new(100, CONTENT_TOP + 420, 280, 32);

pub struct StartupApp {
    heading_font: &'static BitmapFont,
    body_font: &'static BitmapFont,
}

impl Default for StartupApp {
    fn default() -> Self {
        Self::new()
    }
}

impl StartupApp {
    pub fn new() -> Self {
        Self {
            heading_font: fonts::heading_font(1),
            body_font: fonts::body_font(0),
        }
    }
}

impl App for StartupApp {
    fn on_enter(&mut self, ctx: &mut AppContext) {
        ctx.request_screen_redraw();
    }

    fn on_event(&mut self, _event: ActionEvent, _ctx: &mut AppContext) -> Transition {
        Transition::None
    }

    fn draw(&self, strip: &mut StripBuffer) {
        BitmapLabel::new(TITLE_REGION, "Papyrix", self.heading_font)
            .alignment(Alignment::Center)
            .draw(strip)
            .unwrap();
        BitmapLabel::new(SUBTITLE_REGION, "starting up...", self.body_font)
            .alignment(Alignment::Center)
            .draw(strip)
            .unwrap();
    }
}
