//! Interactive console for a running kernel.
//!
//! Supported commands:
//!   help                 – show this list
//!   hal devices          – list registered devices
//!   hal health           – device health report
//!   hal i2c scan         – probe every I²C bus for responding addresses
//!   tasks                – watchdog heartbeat status
//!   services             – list services in boot order with their state
//!   start|stop|restart <id>
//!   quit | exit          – stop services and exit

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::sync::atomic::{AtomicBool, Ordering};

use ember_hal::i2c::I2cBus;
use ember_hal::{DeviceRegistry, HardwareCapabilities};
use ember_kernel::{ServiceRegistry, ServiceState, TaskHealth, Watchdog};
use ember_types::{DeviceCategory, DeviceState, KernelError};

use crate::Kernel;

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Devices,
    Health,
    I2cScan,
    Tasks,
    Services,
    Start(String),
    Stop(String),
    Restart(String),
    Quit,
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => Command::Empty,
            ["help"] | ["?"] => Command::Help,
            ["hal", "devices"] => Command::Devices,
            ["hal", "health"] => Command::Health,
            ["hal", "i2c", "scan"] => Command::I2cScan,
            ["tasks"] => Command::Tasks,
            ["services"] => Command::Services,
            ["start", id] => Command::Start((*id).to_string()),
            ["stop", id] => Command::Stop((*id).to_string()),
            ["restart", id] => Command::Restart((*id).to_string()),
            ["quit"] | ["exit"] => Command::Quit,
            _ => Command::Unknown(line.trim().to_string()),
        }
    }
}

/// Entry point for the console.
///
/// `shutdown` is polled each iteration; when set the console exits.
pub fn run(kernel: &Kernel, shutdown: &AtomicBool) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Console unavailable".red(), e);
            return;
        }
    };

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let line = match editor.readline(&format!("{} ", "ember>".bold().red())) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };
        if !line.trim().is_empty() {
            let _ = editor.add_history_entry(line.as_str());
        }

        match Command::parse(&line) {
            Command::Empty => {}
            Command::Help => cmd_help(),
            Command::Devices => cmd_devices(&kernel.devices),
            Command::Health => cmd_health(kernel),
            Command::I2cScan => cmd_i2c_scan(&kernel.devices, kernel.config.bus_timeout_ms),
            Command::Tasks => cmd_tasks(&kernel.watchdog),
            Command::Services => cmd_services(&kernel.services),
            Command::Start(id) => report(&id, "started", kernel.services.start_service(&id)),
            Command::Stop(id) => report(&id, "stopped", kernel.services.stop_service(&id)),
            Command::Restart(id) => report(&id, "restarted", kernel.services.restart_service(&id)),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                break;
            }
            Command::Unknown(other) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "help".bold()
                );
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Ember Commands".bold().underline());
    println!("  {}          – list registered devices", "hal devices".bold().cyan());
    println!("  {}           – device health report", "hal health".bold().cyan());
    println!("  {}         – probe I²C buses", "hal i2c scan".bold().cyan());
    println!("  {}                – watchdog heartbeat status", "tasks".bold().cyan());
    println!("  {}             – service states in boot order", "services".bold().cyan());
    println!("  {} – control one service", "start|stop|restart <id>".bold().cyan());
    println!("  {}          – exit", "quit  exit".bold().cyan());
    println!();
}

fn paint_device_state(state: DeviceState) -> colored::ColoredString {
    let label = state.to_string();
    match state {
        DeviceState::Ready => label.green(),
        DeviceState::Error => label.red(),
        _ => label.yellow(),
    }
}

fn cmd_devices(devices: &DeviceRegistry) {
    let all = devices.all();
    if all.is_empty() {
        println!("  {}", "No devices registered.".dimmed());
        return;
    }
    println!("{}", format!("{} device(s)", all.len()).bold());
    for d in all {
        println!(
            "  {:>3}  {:<8} {:<10} {:<20} {}",
            d.id(),
            d.category().to_string(),
            paint_device_state(d.state()),
            d.name().bold(),
            d.description().dimmed()
        );
    }
}

fn cmd_health(kernel: &Kernel) {
    let devices = kernel.devices.as_ref();
    let report = devices.health_report();
    let summary = format!(
        "{}/{} healthy, {} in error",
        report.healthy_devices, report.total_devices, report.error_devices
    );
    if report.all_healthy() {
        println!("  {}", summary.green());
    } else {
        println!("  {}", summary.yellow());
        for (id, state) in &report.unhealthy {
            let name = devices
                .find_by_id(*id)
                .map(|d| d.name().to_string())
                .unwrap_or_default();
            println!("    {:>3}  {:<20} {}", id, name, paint_device_state(*state));
        }
    }

    let caps = HardwareCapabilities::active(devices);
    let flag = |on: bool| if on { "yes".green() } else { "no".dimmed() };
    println!(
        "  display {} ({}x{})  touch {}  sd {}  battery {}  keyboard {}  gps {}  usb {}",
        flag(caps.has_display),
        caps.display_width,
        caps.display_height,
        flag(caps.has_touch),
        flag(caps.has_sd_card),
        flag(caps.has_battery),
        flag(caps.has_keyboard),
        flag(caps.has_gps),
        flag(caps.has_usb),
    );

    let sweep = kernel.health.last_report();
    if sweep.sweep > 0 {
        println!(
            "  last service sweep #{}: {} failing",
            sweep.sweep,
            sweep.failures.len()
        );
        for (id, err) in &sweep.failures {
            println!("    {} {}", id.yellow(), err);
        }
        if !sweep.stalled_tasks.is_empty() {
            println!("  stalled tasks: {}", sweep.stalled_tasks.join(", ").red());
        }
    }
}

fn cmd_tasks(watchdog: &Watchdog) {
    let tasks = watchdog.tasks();
    if tasks.is_empty() {
        println!("  {}", "No watched tasks.".dimmed());
        return;
    }
    for task in tasks {
        let health = match watchdog.health(&task) {
            TaskHealth::Alive => "alive".green(),
            TaskHealth::Stalled => "stalled".red(),
        };
        println!("  {:<20} {}", task.bold(), health);
    }
}

fn cmd_i2c_scan(devices: &DeviceRegistry, timeout_ms: u64) {
    let buses = devices.find_all::<dyn I2cBus>(DeviceCategory::I2c);
    if buses.is_empty() {
        println!("  {}", "No I²C bus registered.".dimmed());
        return;
    }
    for bus in buses {
        let found = bus.scan(timeout_ms);
        let list: Vec<String> = found.iter().map(|a| format!("0x{a:02X}")).collect();
        println!(
            "  port {}: {}",
            bus.port(),
            if list.is_empty() {
                "no devices".dimmed().to_string()
            } else {
                list.join(" ")
            }
        );
    }
}

fn cmd_services(services: &ServiceRegistry) {
    let statuses = services.statuses();
    if statuses.is_empty() {
        println!("  {}", "No services registered.".dimmed());
        return;
    }
    for s in statuses {
        let state = match s.state {
            ServiceState::Started => s.state.to_string().green(),
            ServiceState::Failed => s.state.to_string().red(),
            _ => s.state.to_string().yellow(),
        };
        println!(
            "  {:<28} {:<10} prio {:>3}{}  starts {} failures {}",
            s.id.bold(),
            state,
            s.priority,
            if s.required { " required" } else { "" },
            s.stats.start_count,
            s.stats.failure_count,
        );
    }
    let unresolved = services.unresolved();
    if !unresolved.is_empty() {
        println!("  {} {}", "dependency cycle:".red(), unresolved.join(", "));
    }
}

fn report(id: &str, verb: &str, result: Result<(), KernelError>) {
    match result {
        Ok(()) => println!("  {} {id} {verb}", "✓".green().bold()),
        Err(e) => println!("  {} {}", "✗".red().bold(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hal_commands() {
        assert_eq!(Command::parse("hal devices"), Command::Devices);
        assert_eq!(Command::parse("  hal   health "), Command::Health);
        assert_eq!(Command::parse("hal i2c scan"), Command::I2cScan);
    }

    #[test]
    fn parses_service_commands() {
        assert_eq!(Command::parse("services"), Command::Services);
        assert_eq!(Command::parse("tasks"), Command::Tasks);
        assert_eq!(
            Command::parse("restart com.ember.hal"),
            Command::Restart("com.ember.hal".into())
        );
        assert_eq!(Command::parse("stop x"), Command::Stop("x".into()));
        assert_eq!(Command::parse("start"), Command::Unknown("start".into()));
    }

    #[test]
    fn parses_misc() {
        assert_eq!(Command::parse(""), Command::Empty);
        assert_eq!(Command::parse("exit"), Command::Quit);
        assert_eq!(Command::parse("?"), Command::Help);
        assert_eq!(Command::parse("reboot now"), Command::Unknown("reboot now".into()));
    }
}
