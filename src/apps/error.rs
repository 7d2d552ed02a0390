// Fatal/recoverable error screen. Entered via `Transition::Replace(AppId::Error)`
// with the message already written to `AppContext` by the caller
// (`ctx.set_message(...)` before the transition). `on_enter` copies the
// message out of `ctx` into its own label buffer since `draw` has no
// `ctx` access, then the user backs out to Home.

use crate::apps::{App, AppContext, Transition};
use crate::board::action::{Action, ActionEvent};
use crate::drivers::strip::StripBuffer;
use crate::fonts;
use crate::fonts::bitmap::BitmapFont;
use crate::ui::{Alignment, BitmapDynLabel, BitmapLabel, CONTENT_TOP, Region};

const TITLE_REGION: Region = Region::new(16, CONTENT_TOP + 8, 448, 48);
const BODY_REGION: Region = Region::new(24, CONTENT_TOP + 80, 432, 200);

const MSG_LABEL_CAP: usize = 64;

pub struct ErrorApp {
    heading_font: &'static BitmapFont,
    message: BitmapDynLabel<MSG_LABEL_CAP>,
}

impl Default for ErrorApp {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorApp {
    pub fn new() -> Self {
        Self {
            heading_font: fonts::heading_font(0),
            message: BitmapDynLabel::new(BODY_REGION, fonts::body_font(0))
                .alignment(Alignment::CenterLeft),
        }
    }
}

impl App for ErrorApp {
    fn on_enter(&mut self, ctx: &mut AppContext) {
        self.message.set_text(ctx.message_str());
        ctx.request_screen_redraw();
    }

    fn on_event(&mut self, event: ActionEvent, _ctx: &mut AppContext) -> Transition {
        match event {
            ActionEvent::Press(Action::Back) | ActionEvent::Press(Action::Select) => {
                Transition::Home
            }
            _ => Transition::None,
        }
    }

    fn help_text(&self) -> &'static str {
        "Confirm/Back: return home"
    }

    fn draw(&self, strip: &mut StripBuffer) {
        BitmapLabel::new(TITLE_REGION, "Error", self.heading_font)
            .alignment(Alignment::Center)
            .draw(strip)
            .unwrap();
        self.message.draw(strip).unwrap();
    }
}
