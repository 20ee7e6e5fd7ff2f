//! `emberd` – Ember kernel daemon
//!
//! Boots the kernel on a simulated board and drops into an interactive
//! console.  It:
//!
//! 1. Loads `~/.ember/config.toml` (or `--config <path>` / `EMBER_CONFIG`),
//!    falling back to defaults, then applies `EMBER_*` overrides.
//! 2. Registers the HAL init service, which installs the configured board
//!    profile, and runs the dependency-ordered boot pass.
//! 3. Starts the periodic health monitor, heartbeating into the task
//!    watchdog.
//! 4. Runs the console until `quit`, EOF, or Ctrl-C, then stops every
//!    service in reverse boot order.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

use ember_hal::{BusManager, DeviceRegistry, SimBoard};
use ember_kernel::{HalInitService, HealthMonitor, ServiceRegistry, Watchdog};
use ember_middleware::EventBus;

use config::{LogFormat, Source};

/// Shared handles the console operates on.
pub struct Kernel {
    pub devices: Arc<DeviceRegistry>,
    pub services: Arc<ServiceRegistry>,
    pub health: HealthMonitor,
    pub watchdog: Arc<Watchdog>,
    pub config: config::Config,
}

fn main() {
    let cli_config = parse_args();
    let path = config::config_path(cli_config.as_deref());
    let (cfg, source) = config::resolve(&path);

    init_tracing(cfg.log_format);
    print_banner();

    match &source {
        Source::File(p) => info!(path = %p.display(), "config loaded"),
        Source::Defaults(p) => info!(path = %p.display(), "no config file, using defaults"),
        Source::Invalid(p, reason) => {
            warn!(path = %p.display(), %reason, "config unusable, using defaults");
        }
    }

    let kernel = match boot(cfg) {
        Ok(kernel) => kernel,
        Err(e) => {
            error!(error = %e, "boot aborted");
            std::process::exit(1);
        }
    };

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    println!(
        "  Type {} for a list of commands.\n",
        "help".bold().cyan()
    );
    repl::run(&kernel, &shutdown);

    let Kernel {
        devices,
        services,
        mut health,
        ..
    } = kernel;
    health.stop();
    services.stop_all();
    for device in devices.all().into_iter().rev().filter(|d| d.is_healthy()) {
        if let Err(e) = device.stop() {
            warn!(name = device.name(), error = %e, "device stop failed");
        }
    }
    info!("ember stopped");
}

// ─────────────────────────────────────────────────────────────────────────────
// Boot
// ─────────────────────────────────────────────────────────────────────────────

fn boot(cfg: config::Config) -> Result<Kernel, ember_types::KernelError> {
    let buses = Arc::new(BusManager::new());
    let devices = Arc::new(DeviceRegistry::new());
    let events = EventBus::default();
    let services = Arc::new(ServiceRegistry::new(events.clone()));

    let board = SimBoard::profile(
        &cfg.board,
        buses,
        cfg.gpio_queue_capacity,
        cfg.bus_timeout_ms,
    )?;
    info!(profile = %cfg.board, gui_mode = cfg.gui_mode, "booting");

    let hal = HalInitService::new(Arc::clone(&devices), events)
        .with_initializer(move |registry| board.install(registry).map(|_| ()));
    services.add_service(Arc::new(hal))?;

    if !services.start_all(cfg.gui_mode) {
        warn!("a required service failed to start; running in safe mode");
    }
    if cfg.gui_mode {
        services.init_gui_services();
    }

    let watchdog = Arc::new(Watchdog::new());
    let health = HealthMonitor::spawn_watched(
        Arc::clone(&services),
        Duration::from_millis(cfg.health_interval_ms),
        Arc::clone(&watchdog),
    )?;

    Ok(Kernel {
        devices,
        services,
        health,
        watchdog,
        config: cfg,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the `--config <path>` value, if any.
fn parse_args() -> Option<String> {
    let mut args = std::env::args().skip(1);
    let mut config = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => config = args.next(),
            "--help" | "-h" => {
                println!("usage: emberd [--config <path>]");
                std::process::exit(0);
            }
            other => eprintln!("{}: ignoring argument '{other}'", "warning".yellow()),
        }
    }
    config
}

/// Initialise tracing-subscriber using RUST_LOG (defaults to "info").
fn init_tracing(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init(),
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"   ___         __         "#.bold().red());
    println!("{}", r#"  / __/_ _  __/ /  ___ ____"#.bold().red());
    println!("{}", r#" / _//  ' \/ _  / -_) __/"#.bold().red());
    println!("{}", r#"/___/_/_/_/\_,_/\__/_/   "#.bold().red());
    println!();
    println!(
        "  {} {}",
        "Ember".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Embedded board kernel");
    println!();
}
