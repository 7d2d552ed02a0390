// Deep-sleep entry point.
//
// Reached via `Transition::Replace(AppId::Sleep)` (the kernel's idle
// timeout, or a long-press of Power). There's no `App` impl here — deep
// sleep never returns to the caller's stack frame, so modelling it as a
// normal app with `on_event`/`draw` would be misleading. `enter`
// hibernates the e-paper controller and suspends the MCU; waking is a
// full reset, so `main()` runs from the top again with no RAM retained.
//
// The power button (GPIO3, active low, `board::pins::BTN_POWER`) is
// owned by `board::Board` as an `Input` with an edge interrupt already
// configured for normal operation; re-arming that same pin as an RTC
// wakeup source needs the board init path to hand back ownership (or a
// `steal()`) before calling this, which `Board` doesn't yet expose.
// Until that plumbing exists this only arms a timer wakeup — the device
// still wakes on its own, just not on a button press while asleep.
use core::time::Duration as CoreDuration;

use esp_hal::rtc_cntl::Rtc;
use esp_hal::rtc_cntl::sleep::TimerWakeupSource;
use log::info;

use crate::board::Epd;

/// Sleep-screen mode: what stays on the display while the MCU is
/// suspended. Matches `SystemSettings::sleep_screen_mode`.
pub const SLEEP_SCREEN_BLANK: u8 = 0;
pub const SLEEP_SCREEN_LAST_PAGE: u8 = 1;
pub const SLEEP_SCREEN_COVER_ART: u8 = 2;

/// Hibernate the e-paper controller and suspend the MCU in deep sleep
/// for up to `max_duration` (the device also wakes sooner if a future
/// board revision exposes a GPIO wakeup source). Never returns.
pub fn enter(rtc: &mut Rtc<'_>, epd: &mut Epd, max_duration: CoreDuration) -> ! {
    info!("sleep: hibernating display, entering deep sleep");

    epd.hibernate();

    let wakeup_source = TimerWakeupSource::new(max_duration);
    rtc.sleep_deep(&[&wakeup_source]);
}
