// Wake-reason bookkeeping for the main loop's WFI idle.
//
// Three ISRs (timer0, GPIO power button, display BUSY) each run in
// critical-section context and can't touch the main loop's locals, so
// they flip a pending flag here instead. The main loop calls
// `try_wake()` once per iteration: `None` means nothing fired since
// the last check and it's safe to `wait_for_interrupt()`.

use core::cell::Cell;
use critical_section::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Timer,
    Button,
    Display,
    Multiple,
}

static TIMER_PENDING: Mutex<Cell<bool>> = Mutex::new(Cell::new(false));
static BUTTON_PENDING: Mutex<Cell<bool>> = Mutex::new(Cell::new(false));
static DISPLAY_PENDING: Mutex<Cell<bool>> = Mutex::new(Cell::new(false));

pub fn signal_timer() {
    critical_section::with(|cs| TIMER_PENDING.borrow(cs).set(true));
}

pub fn signal_button() {
    critical_section::with(|cs| BUTTON_PENDING.borrow(cs).set(true));
}

pub fn signal_display() {
    critical_section::with(|cs| DISPLAY_PENDING.borrow(cs).set(true));
}

/// Take and clear whichever wake flags are pending. Returns `None` if
/// nothing has fired since the last call.
pub fn try_wake() -> Option<WakeReason> {
    critical_section::with(|cs| {
        let timer = TIMER_PENDING.borrow(cs);
        let button = BUTTON_PENDING.borrow(cs);
        let display = DISPLAY_PENDING.borrow(cs);

        let t = timer.get();
        let b = button.get();
        let d = display.get();

        timer.set(false);
        button.set(false);
        display.set(false);

        match (t, b, d) {
            (false, false, false) => None,
            (true, false, false) => Some(WakeReason::Timer),
            (false, true, false) => Some(WakeReason::Button),
            (false, false, true) => Some(WakeReason::Display),
            _ => Some(WakeReason::Multiple),
        }
    })
}

/// Idle the CPU until the next interrupt (timer tick, button edge, or
/// display BUSY falling edge). The ISR sets its flag before returning,
/// so the next `try_wake()` sees it.
pub fn wait_for_interrupt() {
    unsafe { core::arch::asm!("wfi") };
}

// seconds since boot
pub fn uptime_secs() -> u32 {
    let ticks = embassy_time::Instant::now().as_ticks();
    // TICK_HZ = 1_000_000 on ESP32-C3; integer division is fine for seconds
    (ticks / embassy_time::TICK_HZ) as u32
}
