// Calibre "Smart Device App" wireless sync client.
//
// Three layers, one per file: `json` (byte-oriented field extraction),
// `wire` (length-prefixed `[opcode, payload]` TCP framing), `protocol`
// (opcode table + handlers) and `discovery` (UDP broadcast discovery).
// This module owns none of the WiFi bring-up — it's handed an already
// connected `embassy_net::Stack` by the caller, mirroring how
// `apps::upload` keeps radio lifecycle in the app layer rather than
// baked into the protocol code.

extern crate alloc;

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use embassy_futures::select::{Either, select};
use embassy_net::Stack;
use embassy_net::tcp::TcpSocket;
use embassy_time::Duration;
use log::{error, info, warn};

use crate::board::action::{Action, ActionEvent, ButtonMapper};
use crate::drivers::sdcard::SdStorage;
use crate::kernel::tasks;

pub mod discovery;
pub mod json;
pub mod protocol;
pub mod wire;

pub use protocol::{DeviceConfig, Event};

pub const BOOKS_DIR: &str = "CALIBRE";
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// Discover and talk to a running Calibre desktop client until the
/// user presses BACK or the connection drops. Returns the events
/// accumulated during the session (received books, deletions,
/// messages) so the caller can refresh its book index / file list.
pub async fn run_sync<SPI>(stack: Stack<'_>, sd: &SdStorage<SPI>, config: &DeviceConfig) -> Vec<Event>
where
    SPI: embedded_hal::spi::SpiDevice,
{
    let mut events = Vec::new();

    info!("calibre: starting discovery");
    let found = match select(discovery::discover(stack), drain_until_back()).await {
        Either::First(Ok(found)) => found,
        Either::First(Err(e)) => {
            warn!("calibre: discovery failed: {}", e);
            return events;
        }
        Either::Second(()) => {
            info!("calibre: cancelled during discovery");
            return events;
        }
    };

    info!("calibre: found host {}:{}", found.host, found.port);

    let mut rx_buf = [0u8; protocol::FILE_CHUNK_SIZE + 512];
    let mut tx_buf = [0u8; wire::JSON_BUF_SIZE + 64];
    let mut socket = TcpSocket::new(stack, &mut rx_buf, &mut tx_buf);
    socket.set_timeout(Some(RECV_TIMEOUT));

    let endpoint = (found.host, found.port);
    match select(socket.connect(endpoint), drain_until_back()).await {
        Either::First(Ok(())) => {}
        Either::First(Err(e)) => {
            warn!("calibre: connect failed: {:?}", e);
            return events;
        }
        Either::Second(()) => {
            info!("calibre: cancelled while connecting");
            return events;
        }
    }

    info!("calibre: connected, entering message loop");

    loop {
        match select(wire::recv_msg(&mut socket), drain_until_back()).await {
            Either::First(Ok(msg)) => {
                match protocol::dispatch(&mut socket, sd, BOOKS_DIR, config, msg, &mut events).await {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        error!("calibre: dispatch error: {}", e);
                        break;
                    }
                }
            }
            Either::First(Err(e)) => {
                info!("calibre: connection ended: {}", e);
                break;
            }
            Either::Second(()) => {
                info!("calibre: back pressed, disconnecting");
                break;
            }
        }
    }

    socket.close();
    events
}

async fn drain_until_back() {
    let mapper = ButtonMapper::new();
    loop {
        let hw = tasks::INPUT_EVENTS.receive().await;
        let ev = mapper.map_event(hw);
        if matches!(
            ev,
            ActionEvent::Press(Action::Back) | ActionEvent::LongPress(Action::Back)
        ) {
            return;
        }
    }
}

/// Derive a device UUID from the SD card's unique identifiers is not
/// available through `embedded_sdmmc`; fall back to a fixed, per-build
/// UUID string. Good enough to let Calibre distinguish this device
/// from others on repeated connections within one firmware build.
pub fn device_store_uuid() -> String {
    "papyrix-0000-0000-0000-000000000001".to_string()
}
