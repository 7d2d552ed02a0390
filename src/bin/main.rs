#![no_std]
#![no_main]

use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::interrupt::Priority;
use esp_hal::rtc_cntl::Rtc;
use esp_hal::rtc_cntl::sleep::TimerWakeupSource;
use esp_hal::time::Duration;
use esp_hal::timer::PeriodicTimer;
use esp_hal::timer::timg::TimerGroup;
use log::info;

use core::cell::RefCell;
use core::time::Duration as CoreDuration;
use critical_section::Mutex;

use embassy_futures::select::{Either, select};

use pulp_os::apps::bookmarks::BookmarkCache;
use pulp_os::apps::calibre_sync::run_calibre_sync_mode;
use pulp_os::apps::error::ErrorApp;
use pulp_os::apps::files::FilesApp;
use pulp_os::apps::home::HomeApp;
use pulp_os::apps::reader::ReaderApp;
use pulp_os::apps::settings::SettingsApp;
use pulp_os::apps::startup::StartupApp;
use pulp_os::apps::sync::SyncApp;
use pulp_os::apps::upload::run_upload_mode;
use pulp_os::apps::{self, App, AppContext, AppId, Launcher, Redraw, Services, Transition};
use pulp_os::board::Board;
use pulp_os::board::StripBuffer;
use pulp_os::board::action::{Action, ActionEvent, ButtonMapper};
use pulp_os::drivers::input::InputDriver;
use pulp_os::drivers::storage::DirCache;
use pulp_os::kernel::block_on;
use pulp_os::kernel::tasks::pump_input;
use pulp_os::kernel::wake::{WakeReason, try_wake};
use pulp_os::kernel::{AdaptivePoller, Job, Scheduler};

extern crate alloc;

esp_bootloader_esp_idf::esp_app_desc!();

// No GPIO wake source yet (see `apps::sleep`) — the device still wakes
// on its own after this long.
const SLEEP_MAX_DURATION: CoreDuration = CoreDuration::from_secs(3600);

// How long the boot splash stays up before handing off to Home.
const STARTUP_MILLIS: u32 = 800;

static TIMER0: Mutex<RefCell<Option<PeriodicTimer<'static, esp_hal::Blocking>>>> =
    Mutex::new(RefCell::new(None));

#[esp_hal::handler(priority = Priority::Priority1)]
fn timer0_handler() {
    critical_section::with(|cs| {
        if let Some(timer) = TIMER0.borrow_ref_mut(cs).as_mut() {
            timer.clear_interrupt();
        }
    });
    pulp_os::kernel::wake::signal_timer();
}

/// Concrete instances of every real `App` impl. `App` isn't
/// object-safe (`on_work` is generic over `SPI`), so the active
/// `AppId` is dispatched with a plain `match` over these fields rather
/// than a `dyn App` table. `AppId::Network`, `CalibreSync` and `Sleep`
/// have no entry — they need raw hardware (`WIFI`, `Epd`, `Rtc`) that
/// the `App` trait's `Services`/`StripBuffer` surface doesn't expose,
/// so `main()` special-cases entry into them before this dispatch is
/// ever consulted.
struct Apps {
    home: HomeApp,
    files: FilesApp,
    reader: ReaderApp,
    settings: SettingsApp,
    sync: SyncApp,
    startup: StartupApp,
    error: ErrorApp,
}

impl Apps {
    fn new() -> Self {
        Self {
            home: HomeApp::new(),
            files: FilesApp::new(),
            reader: ReaderApp::new(),
            settings: SettingsApp::new(),
            sync: SyncApp::new(),
            startup: StartupApp::new(),
            error: ErrorApp::new(),
        }
    }

    fn on_enter(&mut self, id: AppId, ctx: &mut AppContext) {
        match id {
            AppId::Home => self.home.on_enter(ctx),
            AppId::Files => self.files.on_enter(ctx),
            AppId::Reader => self.reader.on_enter(ctx),
            AppId::Settings => self.settings.on_enter(ctx),
            AppId::Sync => self.sync.on_enter(ctx),
            AppId::Startup => self.startup.on_enter(ctx),
            AppId::Error => self.error.on_enter(ctx),
            AppId::Network | AppId::CalibreSync | AppId::Sleep => {}
        }
    }

    fn on_resume_or_enter(&mut self, id: AppId, ctx: &mut AppContext) {
        match id {
            AppId::Home => self.home.on_resume(ctx),
            AppId::Files => self.files.on_resume(ctx),
            AppId::Reader => self.reader.on_resume(ctx),
            AppId::Settings => self.settings.on_resume(ctx),
            AppId::Sync => self.sync.on_resume(ctx),
            AppId::Startup => self.startup.on_resume(ctx),
            AppId::Error => self.error.on_resume(ctx),
            AppId::Network | AppId::CalibreSync | AppId::Sleep => {}
        }
    }

    fn on_suspend(&mut self, id: AppId) {
        match id {
            AppId::Home => self.home.on_suspend(),
            AppId::Files => self.files.on_suspend(),
            AppId::Reader => self.reader.on_suspend(),
            AppId::Settings => self.settings.on_suspend(),
            AppId::Sync => self.sync.on_suspend(),
            AppId::Startup => self.startup.on_suspend(),
            AppId::Error => self.error.on_suspend(),
            AppId::Network | AppId::CalibreSync | AppId::Sleep => {}
        }
    }

    fn on_exit(&mut self, id: AppId) {
        match id {
            AppId::Home => self.home.on_exit(),
            AppId::Files => self.files.on_exit(),
            AppId::Reader => self.reader.on_exit(),
            AppId::Settings => self.settings.on_exit(),
            AppId::Sync => self.sync.on_exit(),
            AppId::Startup => self.startup.on_exit(),
            AppId::Error => self.error.on_exit(),
            AppId::Network | AppId::CalibreSync | AppId::Sleep => {}
        }
    }

    fn on_event(&mut self, id: AppId, event: ActionEvent, ctx: &mut AppContext) -> Transition {
        match id {
            AppId::Home => self.home.on_event(event, ctx),
            AppId::Files => self.files.on_event(event, ctx),
            AppId::Reader => self.reader.on_event(event, ctx),
            AppId::Settings => self.settings.on_event(event, ctx),
            AppId::Sync => self.sync.on_event(event, ctx),
            AppId::Startup => self.startup.on_event(event, ctx),
            AppId::Error => self.error.on_event(event, ctx),
            AppId::Network | AppId::CalibreSync | AppId::Sleep => Transition::None,
        }
    }

    fn draw(&self, id: AppId, strip: &mut StripBuffer) {
        match id {
            AppId::Home => self.home.draw(strip),
            AppId::Files => self.files.draw(strip),
            AppId::Reader => self.reader.draw(strip),
            AppId::Settings => self.settings.draw(strip),
            AppId::Sync => self.sync.draw(strip),
            AppId::Startup => self.startup.draw(strip),
            AppId::Error => self.error.draw(strip),
            AppId::Network | AppId::CalibreSync | AppId::Sleep => {}
        }
    }

    fn needs_work(&self, id: AppId) -> bool {
        match id {
            AppId::Home => self.home.needs_work(),
            AppId::Files => self.files.needs_work(),
            AppId::Reader => self.reader.needs_work(),
            AppId::Settings => self.settings.needs_work(),
            _ => false,
        }
    }

    fn on_work<SPI: embedded_hal::spi::SpiDevice>(
        &mut self,
        id: AppId,
        services: &mut Services<'_, SPI>,
        ctx: &mut AppContext,
    ) {
        match id {
            AppId::Home => self.home.on_work(services, ctx),
            AppId::Files => self.files.on_work(services, ctx),
            AppId::Reader => self.reader.on_work(services, ctx),
            AppId::Settings => self.settings.on_work(services, ctx),
            _ => {}
        }
    }
}

fn apply_nav(apps: &mut Apps, nav: apps::NavEvent, ctx: &mut AppContext) {
    if nav.suspend {
        apps.on_suspend(nav.from);
    } else {
        apps.on_exit(nav.from);
    }

    if nav.resume {
        apps.on_resume_or_enter(nav.to, ctx);
    } else {
        apps.on_enter(nav.to, ctx);
    }
}

fn drain_scheduler(scheduler: &mut Scheduler) {
    while let Some(job) = scheduler.pop() {
        match job {
            Job::RenderPage => info!("Job: RenderPage"),
            Job::PrefetchNext => info!("Job: PrefetchNext"),
            Job::PrefetchPrev => info!("Job: PrefetchPrev"),
            Job::LayoutChapter { chapter } => info!("Job: LayoutChapter {}", chapter),
            Job::CacheChapter { chapter } => info!("Job: CacheChapter {}", chapter),
            Job::HandleInput => {}
        }
    }
}

fn render(
    board: &mut Board,
    strip: &mut StripBuffer,
    delay: &mut Delay,
    apps: &Apps,
    active: AppId,
    ctx: &mut AppContext,
) {
    match ctx.take_redraw() {
        Redraw::None => {}
        Redraw::Full => {
            board
                .display
                .epd
                .render_full(strip, delay, |s| apps.draw(active, s));
        }
        Redraw::Partial(region) => {
            board.display.epd.render_partial(
                strip,
                region.x,
                region.y,
                region.w,
                region.h,
                delay,
                |s| apps.draw(active, s),
            );
        }
    }
}

#[esp_hal::main]
fn main() -> ! {
    esp_println::logger::init_logger_from_env();
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);
    esp_alloc::heap_allocator!(size: 66320);

    info!("booting...");

    let timg0 = TimerGroup::new(unsafe { peripherals.TIMG0.clone_unchecked() });
    let mut timer0 = PeriodicTimer::new(timg0.timer0);

    critical_section::with(|cs| {
        timer0.set_interrupt_handler(timer0_handler);
        timer0.start(Duration::from_millis(10)).unwrap();
        timer0.listen();
        TIMER0.borrow_ref_mut(cs).replace(timer0);
    });

    info!("timer initialized.");

    // Peripherals `Board::init` doesn't own: the WiFi radio (Network /
    // CalibreSync sessions) and the RTC controller (deep sleep).
    // Cloned out before `Board::init` consumes the rest of
    // `peripherals`, same pattern as TIMG0 above.
    let wifi = unsafe { peripherals.WIFI.clone_unchecked() };
    let mut rtc = Rtc::new(unsafe { peripherals.LPWR.clone_unchecked() });

    let mut board = Board::init(peripherals);
    let mut delay = Delay::new();

    board.display.epd.init(&mut delay);
    info!("hardware initialized.");

    let mut strip = StripBuffer::new();
    let mut input = InputDriver::new(board.input);
    let mapper = ButtonMapper::new();

    let mut scheduler = Scheduler::new();
    let mut poller = AdaptivePoller::new();
    let mut dir_cache = DirCache::new();
    let mut bookmarks = BookmarkCache::new();

    let mut launcher = Launcher::new();
    let mut apps = Apps::new();

    apps.on_enter(AppId::Startup, &mut launcher.ctx);
    render(
        &mut board,
        &mut strip,
        &mut delay,
        &apps,
        AppId::Startup,
        &mut launcher.ctx,
    );
    delay.delay_millis(STARTUP_MILLIS);

    if let Some(nav) = launcher.apply(Transition::Replace(AppId::Home)) {
        apply_nav(&mut apps, nav, &mut launcher.ctx);
    }
    render(
        &mut board,
        &mut strip,
        &mut delay,
        &apps,
        launcher.active(),
        &mut launcher.ctx,
    );

    info!("kernel ready.");

    loop {
        drain_scheduler(&mut scheduler);

        let should_poll = match try_wake() {
            Some(WakeReason::Timer) | Some(WakeReason::Multiple) => poller.tick(),
            Some(WakeReason::Button) => {
                poller.on_activity();
                true
            }
            Some(WakeReason::Display) => false,
            None => {
                pulp_os::kernel::wake::wait_for_interrupt();
                continue;
            }
        };

        if !should_poll {
            continue;
        }

        let Some(hw_event) = input.poll() else {
            poller.on_idle();
            continue;
        };

        poller.on_activity();
        let event = mapper.map_event(hw_event);

        // Long-press Power always drops straight to deep sleep,
        // regardless of what's active — mirrors a hardware power switch.
        if matches!(event, ActionEvent::LongPress(Action::Menu)) {
            info!("power long-press: entering deep sleep");
            apps.on_exit(launcher.active());
            board.display.epd.hibernate();
            rtc.sleep_deep(&[&TimerWakeupSource::new(SLEEP_MAX_DURATION)]);
        }

        let active = launcher.active();
        let transition = match active {
            AppId::Network => {
                block_on(select(
                    run_upload_mode(
                        unsafe { wifi.clone_unchecked() },
                        &mut board.display.epd,
                        &mut strip,
                        &mut delay,
                    ),
                    pump_input(&mut input),
                ));
                Transition::Pop
            }
            AppId::CalibreSync => {
                match block_on(select(
                    run_calibre_sync_mode(
                        unsafe { wifi.clone_unchecked() },
                        &board.storage.sd,
                        &mut board.display.epd,
                        &mut strip,
                        &mut delay,
                    ),
                    pump_input(&mut input),
                )) {
                    Either::First(_events) => dir_cache.invalidate(),
                    Either::Second(_) => unreachable!(),
                }
                Transition::Pop
            }
            _ => apps.on_event(active, event, &mut launcher.ctx),
        };

        if let Some(nav) = launcher.apply(transition) {
            apply_nav(&mut apps, nav, &mut launcher.ctx);
        }

        let active = launcher.active();
        if apps.needs_work(active) {
            let mut services = Services::new(&mut dir_cache, &mut bookmarks, &board.storage.sd);
            apps.on_work(active, &mut services, &mut launcher.ctx);
        }

        if launcher.ctx.has_redraw() {
            render(
                &mut board,
                &mut strip,
                &mut delay,
                &apps,
                active,
                &mut launcher.ctx,
            );
        }
    }
}
