// Minimal single-future poll loop.
//
// `apps::upload`, `calibre::run_sync` and friends are async fns that
// multiplex WiFi, sockets and the back button with `select` internally,
// but nothing in this firmware ever spawns an `embassy_executor::Executor`
// or a task pool — there is exactly one CPU core and one thing running
// at a time, so a full executor would just be overhead. `block_on` polls
// a single future to completion with a waker that does nothing: polling
// only makes progress when something (a socket, a timer, an interrupt)
// has woken the waker, so this spins on `poll` between wakeups rather
// than actually sleeping the CPU. Fine for the bounded duration of a
// sync/upload session; not a general-purpose executor.

use core::future::Future;
use core::pin::pin;
use core::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

fn noop(_: *const ()) {}
fn clone(_: *const ()) -> RawWaker {
    raw_waker()
}

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);

fn raw_waker() -> RawWaker {
    RawWaker::new(core::ptr::null(), &VTABLE)
}

fn noop_waker() -> Waker {
    unsafe { Waker::from_raw(raw_waker()) }
}

/// Poll `future` to completion on the current stack, yielding to
/// nothing else. Embassy futures that wait on hardware (sockets,
/// timers) re-poll immediately since the waker is a no-op — they rely
/// on their own internal registration with the timer/net drivers to
/// eventually return `Ready`, not on this loop scheduling them.
pub fn block_on<F: Future>(future: F) -> F::Output {
    let mut future = pin!(future);
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    loop {
        if let Poll::Ready(out) = future.as_mut().poll(&mut cx) {
            return out;
        }
    }
}
