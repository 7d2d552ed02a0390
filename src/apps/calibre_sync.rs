// Calibre wireless sync mode — connects to the hardcoded network (same
// credentials as `apps::upload`), discovers a running Calibre desktop
// "Smart Device App", and runs the wireless sync protocol until the
// user presses BACK or the desktop disconnects.
//
// Reached from `AppId::CalibreSync`, which `bin/main.rs` special-cases
// the same way it special-cases `AppId::Sleep` and `AppId::Network` —
// the WIFI peripheral, `Epd` and `Delay` aren't reachable through the
// `App` trait's `Services`/`StripBuffer` surface.

use alloc::string::String;
use core::fmt::Write as FmtWrite;

use embassy_futures::select::{Either, select};
use embassy_time::Duration;
use esp_hal::delay::Delay;
use esp_radio::wifi::{ClientConfig, Config, ModeConfig};
use log::info;

use crate::apps::upload::{SSID, drain_until_back};
use crate::board::Epd;
use crate::calibre::{self, DeviceConfig, Event};
use crate::drivers::sdcard::SdStorage;
use crate::drivers::strip::StripBuffer;
use crate::fonts;
use crate::fonts::bitmap::BitmapFont;
use crate::ui::{Alignment, BitmapLabel, CONTENT_TOP, Region};

const SCREEN_W: u16 = 480;
const SCREEN_H: u16 = 800;
const HEADING_X: u16 = 16;
const HEADING_W: u16 = SCREEN_W - HEADING_X * 2;
const BODY_X: u16 = 24;
const BODY_W: u16 = SCREEN_W - BODY_X * 2;
const BODY_LINE_GAP: u16 = 10;
const FOOTER_Y: u16 = SCREEN_H - 60;

// Stored device identity for the Calibre "Smart Device App" handshake.
// A real implementation would generate this once and persist it in
// settings; this crate hardcodes one since there's no UUID source yet.
const DEVICE_STORE_UUID: &str = "papyrix-0000-0000-0000-000000000001";

/// Run one Calibre wireless-sync session to completion. Returns the
/// events accumulated (books received/deleted, messages) so the
/// caller can invalidate its file list / book index cache.
pub async fn run_calibre_sync_mode<SPI>(
    wifi: esp_hal::peripherals::WIFI<'static>,
    sd: &SdStorage<SPI>,
    epd: &mut Epd,
    strip: &mut StripBuffer,
    delay: &mut Delay,
) -> alloc::vec::Vec<Event>
where
    SPI: embedded_hal::spi::SpiDevice,
{
    let heading = fonts::heading_font(0);
    let body = fonts::body_font(0);
    let mut events = alloc::vec::Vec::new();

    render_screen(epd, strip, delay, heading, body, &["Initialising radio..."], None);

    let radio = match esp_radio::init() {
        Ok(r) => r,
        Err(e) => {
            info!("calibre_sync: radio init failed: {:?}", e);
            render_screen(epd, strip, delay, heading, body, &["Radio init failed!"], Some("Press BACK to exit"));
            drain_until_back().await;
            return events;
        }
    };

    let (mut wifi_ctrl, interfaces) = match esp_radio::wifi::new(&radio, wifi, Config::default()) {
        Ok(pair) => pair,
        Err(e) => {
            info!("calibre_sync: wifi::new failed: {:?}", e);
            render_screen(epd, strip, delay, heading, body, &["WiFi init failed!"], Some("Press BACK to exit"));
            drain_until_back().await;
            return events;
        }
    };

    let client_cfg = ClientConfig::default()
        .with_ssid(String::from(SSID))
        .with_password(String::from(crate::apps::upload::PASSWORD));

    if wifi_ctrl.set_config(&ModeConfig::Client(client_cfg)).is_err()
        || wifi_ctrl.start_async().await.is_err()
        || wifi_ctrl.connect_async().await.is_err()
    {
        info!("calibre_sync: wifi bring-up failed");
        render_screen(epd, strip, delay, heading, body, &["WiFi connect failed!"], Some("Press BACK to exit"));
        drain_until_back().await;
        return events;
    }

    render_screen(epd, strip, delay, heading, body, &["Connected!", "Obtaining IP address..."], None);

    let net_config = embassy_net::Config::dhcpv4(Default::default());
    let seed = {
        let rng = esp_hal::rng::Rng::new();
        (rng.random() as u64) << 32 | rng.random() as u64
    };
    let mut resources = embassy_net::StackResources::<3>::new();
    let (stack, mut runner) = embassy_net::new(interfaces.sta, net_config, &mut resources, seed);

    let got_ip = loop {
        match select(runner.run(), select(stack.wait_config_up(), drain_until_back())).await {
            Either::Second(Either::First(_)) => break true,
            Either::Second(Either::Second(_)) => break false,
            _ => unreachable!(),
        }
    };

    if !got_ip {
        info!("calibre_sync: user exited during DHCP");
        return events;
    }

    render_screen(epd, strip, delay, heading, body, &["Waiting for Calibre..."], Some("Press BACK to cancel"));

    let config = DeviceConfig::defaults(String::from(DEVICE_STORE_UUID));

    match select(calibre::run_sync(stack, sd, &config), runner.run()).await {
        Either::First(received) => events = received,
        Either::Second(_) => unreachable!(), // runner.run() returns `!`
    }

    let mut msg_buf = [0u8; 64];
    let msg_len = stack_fmt(&mut msg_buf, |w| {
        let _ = write!(w, "Sync finished: {} event(s)", events.len());
    });
    let msg = core::str::from_utf8(&msg_buf[..msg_len]).unwrap_or("Sync finished");
    render_screen(epd, strip, delay, heading, body, &[msg], Some("Press BACK to exit"));
    drain_until_back().await;

    info!("calibre_sync: exiting, tearing down WiFi");
    events
}

fn render_screen(
    epd: &mut Epd,
    strip: &mut StripBuffer,
    delay: &mut Delay,
    heading: &'static BitmapFont,
    body: &'static BitmapFont,
    lines: &[&str],
    footer: Option<&str>,
) {
    let heading_h = heading.line_height;
    let body_h = body.line_height;
    let body_stride = body_h + BODY_LINE_GAP;

    let heading_region = Region::new(HEADING_X, CONTENT_TOP + 12, HEADING_W, heading_h);
    let body_area_top = CONTENT_TOP + 12 + heading_h + 40;
    let body_area_bottom = FOOTER_Y.saturating_sub(20);
    let body_area_h = body_area_bottom.saturating_sub(body_area_top);
    let total_body_h = if lines.is_empty() {
        0
    } else {
        (lines.len() as u16 - 1) * body_stride + body_h
    };
    let body_start_y = body_area_top + body_area_h.saturating_sub(total_body_h) / 2;
    let footer_region = Region::new(BODY_X, FOOTER_Y, BODY_W, body_h);

    epd.render_full(strip, delay, |s: &mut StripBuffer| {
        BitmapLabel::new(heading_region, "Calibre Sync", heading)
            .alignment(Alignment::Center)
            .draw(s)
            .unwrap();

        for (i, line) in lines.iter().enumerate() {
            if line.is_empty() {
                continue;
            }
            let y = body_start_y + (i as u16) * body_stride;
            let region = Region::new(BODY_X, y, BODY_W, body_h);
            BitmapLabel::new(region, line, body)
                .alignment(Alignment::Center)
                .draw(s)
                .unwrap();
        }

        if let Some(text) = footer {
            BitmapLabel::new(footer_region, text, body)
                .alignment(Alignment::Center)
                .draw(s)
                .unwrap();
        }
    });
}

fn stack_fmt(buf: &mut [u8], f: impl FnOnce(&mut StackWriter<'_>)) -> usize {
    let mut w = StackWriter { buf, pos: 0 };
    f(&mut w);
    w.pos
}

struct StackWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl core::fmt::Write for StackWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let room = self.buf.len() - self.pos;
        let n = bytes.len().min(room);
        self.buf[self.pos..self.pos + n].copy_from_slice(&bytes[..n]);
        self.pos += n;
        Ok(())
    }
}
