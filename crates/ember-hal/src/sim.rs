//! Simulated leaf drivers and the [`SimBoard`] builder.
//!
//! Lets the whole kernel boot on a development host or in CI with no
//! physical hardware.  Every driver implements the same capability traits
//! as a real one and goes through the same [`BusManager`] locking.
//!
//! | Driver | Category | Behaviour |
//! |---|---|---|
//! | [`HeadlessDisplay`] | Display | Accepts frames over an optional SPI host, tracks backlight duty |
//! | [`SimTouch`] | Touch | Reports points set with [`SimTouch::press`] |
//! | [`SimSpiBus`] | SPI | Delegates locking to the [`BusManager`]; counts transactions and contentions |
//! | [`SimI2cBus`] | I2C | 256-byte register file per attached address; absent addresses NACK |
//! | [`SimGpioController`] | GPIO | Levels in memory; [`SimGpioController::trigger_edge_at`] stands in for the ISR |
//! | [`SimSdCard`] | SdCard | Fails to start when no card is inserted |
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ember_hal::bus_manager::BusManager;
//! use ember_hal::registry::DeviceRegistry;
//! use ember_hal::sim::SimBoard;
//!
//! let registry = DeviceRegistry::new();
//! let board = SimBoard::builder()
//!     .with_spi_bus(2)
//!     .with_display(320, 240)
//!     .with_touch()
//!     .with_i2c_bus(0, &[0x38])
//!     .with_gpio(40, 20)
//!     .build(Arc::new(BusManager::new()));
//!
//! let healthy = board.install(&registry).unwrap();
//! assert_eq!(healthy, registry.count());
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

use ember_types::{DeviceCategory, DeviceId, DeviceState, KernelError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bus_manager::{BusId, BusManager, DEFAULT_BUS_TIMEOUT_MS};
use crate::device::{Device, DeviceCore, DeviceRef};
use crate::display::{ColorFormat, DisplayDevice};
use crate::gpio::{GpioCallback, GpioController, GpioMode, InterruptEdge, Pin, PullMode};
use crate::i2c::{I2C_BUS_BASE, I2cAddress, I2cBus};
use crate::interrupt::{self, EdgeDispatcher};
use crate::registry::DeviceRegistry;
use crate::spi::{SpiBus, SpiGuard};
use crate::touch::{Calibration, TouchDevice, TouchPoint};

/// Board profile names accepted by [`SimBoard::profile`].
pub const PROFILES: &[&str] = &["simulator", "headless"];

// ─────────────────────────────────────────────────────────────────────────────
// SPI bus
// ─────────────────────────────────────────────────────────────────────────────

pub struct SimSpiBus {
    core: DeviceCore,
    host: BusId,
    shared: bool,
    buses: Arc<BusManager>,
    transactions: AtomicU32,
    contentions: AtomicU32,
    description: String,
}

impl SimSpiBus {
    pub fn new(host: BusId, shared: bool, buses: Arc<BusManager>) -> Arc<Self> {
        Arc::new(Self {
            core: DeviceCore::new(),
            host,
            shared,
            buses,
            transactions: AtomicU32::new(0),
            contentions: AtomicU32::new(0),
            description: format!("Simulated SPI host {host} (shared={shared})"),
        })
    }
}

impl Device for SimSpiBus {
    fn id(&self) -> DeviceId {
        self.core.id()
    }
    fn category(&self) -> DeviceCategory {
        DeviceCategory::Spi
    }
    fn name(&self) -> &str {
        "SPI Bus"
    }
    fn description(&self) -> &str {
        &self.description
    }
    fn start(&self) -> Result<(), KernelError> {
        self.core.run_start(self.name(), || Ok(()))
    }
    fn stop(&self) -> Result<(), KernelError> {
        self.core.run_stop(|| Ok(()))
    }
    fn state(&self) -> DeviceState {
        self.core.state()
    }
    fn as_spi_bus(self: Arc<Self>) -> Option<Arc<dyn SpiBus>> {
        Some(self)
    }
}

impl SpiBus for SimSpiBus {
    fn host_id(&self) -> BusId {
        self.host
    }
    fn is_shared(&self) -> bool {
        self.shared
    }
    fn acquire(&self, timeout_ms: u64) -> bool {
        if self.buses.acquire(self.host, timeout_ms) {
            self.transactions.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.contentions.fetch_add(1, Ordering::Relaxed);
            false
        }
    }
    fn release(&self) {
        self.buses.release(self.host);
    }
    fn transaction_count(&self) -> u32 {
        self.transactions.load(Ordering::Relaxed)
    }
    fn contention_count(&self) -> u32 {
        self.contentions.load(Ordering::Relaxed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Touch
// ─────────────────────────────────────────────────────────────────────────────

pub struct SimTouch {
    core: DeviceCore,
    points: Mutex<Vec<TouchPoint>>,
    calibration: Mutex<Calibration>,
}

impl SimTouch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            core: DeviceCore::new(),
            points: Mutex::new(Vec::new()),
            calibration: Mutex::new(Calibration::default()),
        })
    }

    pub fn press(&self, x: u16, y: u16) {
        self.points.lock().push(TouchPoint { x, y });
    }

    pub fn release(&self) {
        self.points.lock().clear();
    }
}

impl Device for SimTouch {
    fn id(&self) -> DeviceId {
        self.core.id()
    }
    fn category(&self) -> DeviceCategory {
        DeviceCategory::Touch
    }
    fn name(&self) -> &str {
        "Simulated Touch"
    }
    fn description(&self) -> &str {
        "Simulated single-point touch panel"
    }
    fn start(&self) -> Result<(), KernelError> {
        self.core.run_start(self.name(), || Ok(()))
    }
    fn stop(&self) -> Result<(), KernelError> {
        self.core.run_stop(|| {
            self.release();
            Ok(())
        })
    }
    fn state(&self) -> DeviceState {
        self.core.state()
    }
    fn as_touch(self: Arc<Self>) -> Option<Arc<dyn TouchDevice>> {
        Some(self)
    }
}

impl TouchDevice for SimTouch {
    fn touched_points(&self, max_points: usize) -> Vec<TouchPoint> {
        if self.state() != DeviceState::Ready {
            return Vec::new();
        }
        self.points.lock().iter().take(max_points).copied().collect()
    }
    fn calibration(&self) -> Calibration {
        *self.calibration.lock()
    }
    fn set_calibration(&self, calibration: Calibration) {
        *self.calibration.lock() = calibration;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Display
// ─────────────────────────────────────────────────────────────────────────────

/// Frame sink standing in for a panel.
pub struct HeadlessDisplay {
    core: DeviceCore,
    width: u16,
    height: u16,
    format: ColorFormat,
    backlight: AtomicU8,
    powered: AtomicBool,
    frames: AtomicU64,
    spi: Option<Arc<SimSpiBus>>,
    bus_timeout_ms: u64,
    touch: Option<Arc<SimTouch>>,
    description: String,
}

impl HeadlessDisplay {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            core: DeviceCore::new(),
            width,
            height,
            format: ColorFormat::Rgb565,
            backlight: AtomicU8::new(0),
            powered: AtomicBool::new(false),
            frames: AtomicU64::new(0),
            spi: None,
            bus_timeout_ms: DEFAULT_BUS_TIMEOUT_MS,
            touch: None,
            description: format!("Headless {width}x{height} RGB565 display"),
        }
    }

    /// Route frame transfers through `spi`.
    pub fn on_spi(mut self, spi: Arc<SimSpiBus>) -> Self {
        self.spi = Some(spi);
        self
    }

    /// How long a flush waits for the SPI host before giving up.
    pub fn with_bus_timeout(mut self, timeout_ms: u64) -> Self {
        self.bus_timeout_ms = timeout_ms;
        self
    }

    pub fn bus_timeout_ms(&self) -> u64 {
        self.bus_timeout_ms
    }

    /// Attach the touch panel laid over this display.
    pub fn with_touch(mut self, touch: Arc<SimTouch>) -> Self {
        self.touch = Some(touch);
        self
    }

    /// Push one frame to the panel.
    ///
    /// # Errors
    ///
    /// [`KernelError::NotReady`] before start, [`KernelError::Transport`] on
    /// a short frame, [`KernelError::BusTimeout`] if the SPI host is busy.
    pub fn flush(&self, pixels: &[u8]) -> Result<(), KernelError> {
        if self.state() != DeviceState::Ready {
            return Err(KernelError::NotReady(self.name().to_string()));
        }
        if pixels.len() < self.frame_size() {
            return Err(KernelError::Transport(format!(
                "short frame: {} of {} bytes",
                pixels.len(),
                self.frame_size()
            )));
        }
        let _transaction = match &self.spi {
            Some(spi) => {
                let guard = SpiGuard::new(spi.as_ref(), self.bus_timeout_ms);
                if !guard.is_acquired() {
                    return Err(KernelError::BusTimeout {
                        bus_id: spi.host_id(),
                        timeout_ms: self.bus_timeout_ms,
                    });
                }
                Some(guard)
            }
            None => None,
        };
        self.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn frames_flushed(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl Device for HeadlessDisplay {
    fn id(&self) -> DeviceId {
        self.core.id()
    }
    fn category(&self) -> DeviceCategory {
        DeviceCategory::Display
    }
    fn name(&self) -> &str {
        "Headless Display"
    }
    fn description(&self) -> &str {
        &self.description
    }
    fn start(&self) -> Result<(), KernelError> {
        self.core.run_start(self.name(), || {
            if self.width == 0 || self.height == 0 {
                return Err(KernelError::Transport("zero-sized panel".into()));
            }
            self.powered.store(true, Ordering::Relaxed);
            self.backlight.store(u8::MAX, Ordering::Relaxed);
            Ok(())
        })
    }
    fn stop(&self) -> Result<(), KernelError> {
        self.core.run_stop(|| {
            self.backlight.store(0, Ordering::Relaxed);
            self.powered.store(false, Ordering::Relaxed);
            Ok(())
        })
    }
    fn state(&self) -> DeviceState {
        self.core.state()
    }
    fn as_display(self: Arc<Self>) -> Option<Arc<dyn DisplayDevice>> {
        Some(self)
    }
}

impl DisplayDevice for HeadlessDisplay {
    fn width(&self) -> u16 {
        self.width
    }
    fn height(&self) -> u16 {
        self.height
    }
    fn color_format(&self) -> ColorFormat {
        self.format
    }
    fn supports_backlight(&self) -> bool {
        true
    }
    fn set_backlight_duty(&self, duty: u8) {
        self.backlight.store(duty, Ordering::Relaxed);
    }
    fn backlight_duty(&self) -> u8 {
        self.backlight.load(Ordering::Relaxed)
    }
    fn supports_power_control(&self) -> bool {
        true
    }
    fn set_power_on(&self, on: bool) {
        self.powered.store(on, Ordering::Relaxed);
    }
    fn is_powered_on(&self) -> bool {
        self.powered.load(Ordering::Relaxed)
    }
    fn attached_touch(&self) -> Option<Arc<dyn TouchDevice>> {
        self.touch
            .as_ref()
            .map(|t| Arc::clone(t) as Arc<dyn TouchDevice>)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// I2C bus
// ─────────────────────────────────────────────────────────────────────────────

struct SimPeripheral {
    registers: [u8; 256],
    pointer: u8,
}

pub struct SimI2cBus {
    core: DeviceCore,
    port: u8,
    buses: Arc<BusManager>,
    peripherals: Mutex<HashMap<I2cAddress, SimPeripheral>>,
    description: String,
}

impl SimI2cBus {
    pub fn new(port: u8, buses: Arc<BusManager>) -> Arc<Self> {
        Arc::new(Self {
            core: DeviceCore::new(),
            port,
            buses,
            peripherals: Mutex::new(HashMap::new()),
            description: format!("Simulated I2C{port}"),
        })
    }

    /// Make `addr` acknowledge, with every register zeroed.
    pub fn attach_peripheral(&self, addr: I2cAddress) {
        self.peripherals.lock().insert(
            addr,
            SimPeripheral {
                registers: [0; 256],
                pointer: 0,
            },
        );
    }

    pub fn detach_peripheral(&self, addr: I2cAddress) {
        self.peripherals.lock().remove(&addr);
    }

    fn transfer<R>(
        &self,
        addr: I2cAddress,
        timeout_ms: u64,
        op: impl FnOnce(&mut SimPeripheral) -> R,
    ) -> Result<R, KernelError> {
        if self.state() != DeviceState::Ready {
            return Err(KernelError::NotReady(self.description.clone()));
        }
        let _bus = self.buses.try_lock(self.bus_lock_id(), timeout_ms)?;
        let mut peripherals = self.peripherals.lock();
        let peripheral = peripherals
            .get_mut(&addr)
            .ok_or_else(|| KernelError::Transport(format!("no ack from 0x{addr:02x}")))?;
        Ok(op(peripheral))
    }
}

impl Device for SimI2cBus {
    fn id(&self) -> DeviceId {
        self.core.id()
    }
    fn category(&self) -> DeviceCategory {
        DeviceCategory::I2c
    }
    fn name(&self) -> &str {
        "I2C Bus"
    }
    fn description(&self) -> &str {
        &self.description
    }
    fn start(&self) -> Result<(), KernelError> {
        self.core.run_start(self.name(), || Ok(()))
    }
    fn stop(&self) -> Result<(), KernelError> {
        self.core.run_stop(|| Ok(()))
    }
    fn state(&self) -> DeviceState {
        self.core.state()
    }
    fn as_i2c_bus(self: Arc<Self>) -> Option<Arc<dyn I2cBus>> {
        Some(self)
    }
}

impl I2cBus for SimI2cBus {
    fn port(&self) -> u8 {
        self.port
    }

    fn bus_lock_id(&self) -> BusId {
        I2C_BUS_BASE + BusId::from(self.port)
    }

    fn read(&self, addr: I2cAddress, buf: &mut [u8], timeout_ms: u64) -> Result<(), KernelError> {
        self.transfer(addr, timeout_ms, |p| {
            for byte in buf.iter_mut() {
                *byte = p.registers[usize::from(p.pointer)];
                p.pointer = p.pointer.wrapping_add(1);
            }
        })
    }

    /// The first byte sets the register pointer; the rest are stored from
    /// there on.  An empty write is an address probe.
    fn write(&self, addr: I2cAddress, data: &[u8], timeout_ms: u64) -> Result<(), KernelError> {
        self.transfer(addr, timeout_ms, |p| {
            let Some((&reg, values)) = data.split_first() else {
                return;
            };
            p.pointer = reg;
            for &value in values {
                p.registers[usize::from(p.pointer)] = value;
                p.pointer = p.pointer.wrapping_add(1);
            }
        })
    }

    fn write_read(
        &self,
        addr: I2cAddress,
        write: &[u8],
        read: &mut [u8],
        timeout_ms: u64,
    ) -> Result<(), KernelError> {
        // Hold the bus across both phases (the lock is reentrant).
        let _bus = self.buses.try_lock(self.bus_lock_id(), timeout_ms)?;
        self.write(addr, write, timeout_ms)?;
        self.read(addr, read, timeout_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GPIO
// ─────────────────────────────────────────────────────────────────────────────

pub struct SimGpioController {
    core: DeviceCore,
    levels: Arc<[AtomicBool]>,
    modes: Mutex<HashMap<Pin, GpioMode>>,
    edges: Mutex<HashMap<Pin, InterruptEdge>>,
    queue_capacity: usize,
    dispatcher: Mutex<Option<Arc<EdgeDispatcher>>>,
    description: String,
}

impl SimGpioController {
    pub fn new(pin_count: usize, queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            core: DeviceCore::new(),
            levels: (0..pin_count).map(|_| AtomicBool::new(false)).collect(),
            modes: Mutex::new(HashMap::new()),
            edges: Mutex::new(HashMap::new()),
            queue_capacity,
            dispatcher: Mutex::new(None),
            description: format!("Simulated GPIO ({pin_count} pins, queue {queue_capacity})"),
        })
    }

    fn index(&self, pin: Pin) -> Result<usize, KernelError> {
        usize::try_from(pin)
            .ok()
            .filter(|&i| i < self.levels.len())
            .ok_or(KernelError::InvalidPin(pin))
    }

    fn dispatcher(&self) -> Result<Arc<EdgeDispatcher>, KernelError> {
        self.dispatcher
            .lock()
            .clone()
            .ok_or_else(|| KernelError::NotReady(self.description.clone()))
    }

    /// Inject a hardware edge at tick `now_ms`, exactly as the interrupt
    /// handler would.  Returns whether it was queued.
    pub fn trigger_edge_at(&self, pin: Pin, now_ms: u64) -> bool {
        let dispatcher = self.dispatcher.lock().clone();
        dispatcher.is_some_and(|d| d.raise(pin, now_ms))
    }

    pub fn trigger_edge(&self, pin: Pin) -> bool {
        self.trigger_edge_at(pin, interrupt::now_ms())
    }

    /// Simulate an external signal on `pin`: update the level and, if the
    /// configured edge matches the transition, raise an interrupt.
    pub fn drive_input_at(&self, pin: Pin, level: bool, now_ms: u64) -> Result<bool, KernelError> {
        let idx = self.index(pin)?;
        let previous = self.levels[idx].swap(level, Ordering::AcqRel);
        if previous == level {
            return Ok(false);
        }
        let edge = self
            .edges
            .lock()
            .get(&pin)
            .copied()
            .unwrap_or(InterruptEdge::None);
        Ok(edge.fires_on(level) && self.trigger_edge_at(pin, now_ms))
    }

    pub fn drive_input(&self, pin: Pin, level: bool) -> Result<bool, KernelError> {
        self.drive_input_at(pin, level, interrupt::now_ms())
    }

    /// Edges lost to a full interrupt queue.
    pub fn dropped_edges(&self) -> u64 {
        self.dispatcher.lock().as_ref().map_or(0, |d| d.dropped())
    }
}

impl Device for SimGpioController {
    fn id(&self) -> DeviceId {
        self.core.id()
    }
    fn category(&self) -> DeviceCategory {
        DeviceCategory::Gpio
    }
    fn name(&self) -> &str {
        "GPIO Controller"
    }
    fn description(&self) -> &str {
        &self.description
    }
    fn start(&self) -> Result<(), KernelError> {
        self.core.run_start(self.name(), || {
            let levels = Arc::clone(&self.levels);
            let dispatcher = EdgeDispatcher::start(self.levels.len(), self.queue_capacity, move |pin| {
                usize::try_from(pin)
                    .ok()
                    .and_then(|i| levels.get(i))
                    .is_some_and(|l| l.load(Ordering::Acquire))
            })?;
            *self.dispatcher.lock() = Some(Arc::new(dispatcher));
            Ok(())
        })
    }
    fn stop(&self) -> Result<(), KernelError> {
        self.core.run_stop(|| {
            // Taken out first: a callback running on the consumer may still
            // need the slot while shutdown waits for it.
            let dispatcher = self.dispatcher.lock().take();
            if let Some(dispatcher) = dispatcher {
                dispatcher.shutdown();
            }
            self.edges.lock().clear();
            Ok(())
        })
    }
    fn state(&self) -> DeviceState {
        self.core.state()
    }
    fn as_gpio(self: Arc<Self>) -> Option<Arc<dyn GpioController>> {
        Some(self)
    }
}

impl GpioController for SimGpioController {
    fn configure(&self, pin: Pin, mode: GpioMode, pull: PullMode) -> Result<(), KernelError> {
        let idx = self.index(pin)?;
        self.modes.lock().insert(pin, mode);
        match pull {
            PullMode::Up => self.levels[idx].store(true, Ordering::Release),
            PullMode::Down => self.levels[idx].store(false, Ordering::Release),
            PullMode::None | PullMode::Both => {}
        }
        debug!(pin, ?mode, ?pull, "gpio configured");
        Ok(())
    }

    fn set_level(&self, pin: Pin, level: bool) -> Result<(), KernelError> {
        let idx = self.index(pin)?;
        if self.modes.lock().get(&pin) == Some(&GpioMode::Input) {
            return Err(KernelError::Transport(format!("pin {pin} is an input")));
        }
        self.levels[idx].store(level, Ordering::Release);
        Ok(())
    }

    fn level(&self, pin: Pin) -> bool {
        self.index(pin)
            .map(|i| self.levels[i].load(Ordering::Acquire))
            .unwrap_or(false)
    }

    fn pin_count(&self) -> usize {
        self.levels.len()
    }

    fn attach_interrupt(
        &self,
        pin: Pin,
        edge: InterruptEdge,
        callback: GpioCallback,
    ) -> Result<(), KernelError> {
        self.dispatcher()?.attach(pin, callback)?;
        self.edges.lock().insert(pin, edge);
        Ok(())
    }

    fn detach_interrupt(&self, pin: Pin) -> Result<(), KernelError> {
        self.dispatcher()?.detach(pin)?;
        self.edges.lock().remove(&pin);
        Ok(())
    }

    fn configure_debounced(
        &self,
        pin: Pin,
        debounce_ms: u32,
        callback: GpioCallback,
    ) -> Result<(), KernelError> {
        self.dispatcher()?
            .attach_debounced(pin, debounce_ms, callback)?;
        self.edges.lock().insert(pin, InterruptEdge::Both);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SD card
// ─────────────────────────────────────────────────────────────────────────────

pub struct SimSdCard {
    core: DeviceCore,
    present: bool,
}

impl SimSdCard {
    pub fn new(present: bool) -> Arc<Self> {
        Arc::new(Self {
            core: DeviceCore::new(),
            present,
        })
    }
}

impl Device for SimSdCard {
    fn id(&self) -> DeviceId {
        self.core.id()
    }
    fn category(&self) -> DeviceCategory {
        DeviceCategory::SdCard
    }
    fn name(&self) -> &str {
        "SD Card"
    }
    fn description(&self) -> &str {
        if self.present {
            "Simulated SD card"
        } else {
            "Simulated SD slot (empty)"
        }
    }
    fn start(&self) -> Result<(), KernelError> {
        self.core.run_start(self.name(), || {
            if self.present {
                Ok(())
            } else {
                Err(KernelError::Transport("no card inserted".into()))
            }
        })
    }
    fn stop(&self) -> Result<(), KernelError> {
        self.core.run_stop(|| Ok(()))
    }
    fn state(&self) -> DeviceState {
        self.core.state()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Board builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for a [`SimBoard`].
#[derive(Debug, Default)]
pub struct SimBoardBuilder {
    spi_host: Option<BusId>,
    display: Option<(u16, u16)>,
    touch: bool,
    i2c: Vec<(u8, Vec<I2cAddress>)>,
    gpio: Option<(usize, usize)>,
    sd_card: Option<bool>,
    bus_timeout_ms: Option<u64>,
}

impl SimBoardBuilder {
    /// Add an SPI host; display and SD card are wired to it.
    pub fn with_spi_bus(mut self, host: BusId) -> Self {
        self.spi_host = Some(host);
        self
    }

    pub fn with_display(mut self, width: u16, height: u16) -> Self {
        self.display = Some((width, height));
        self
    }

    /// Add a touch panel; attached to the display when there is one.
    pub fn with_touch(mut self) -> Self {
        self.touch = true;
        self
    }

    /// Add I2C port `port` with peripherals acknowledging at `addrs`.
    pub fn with_i2c_bus(mut self, port: u8, addrs: &[I2cAddress]) -> Self {
        self.i2c.push((port, addrs.to_vec()));
        self
    }

    pub fn with_gpio(mut self, pin_count: usize, queue_capacity: usize) -> Self {
        self.gpio = Some((pin_count, queue_capacity));
        self
    }

    /// Add an SD slot, with or without a card in it.
    pub fn with_sd_card(mut self, present: bool) -> Self {
        self.sd_card = Some(present);
        self
    }

    /// Bus acquisition timeout for drivers that lock a host themselves.
    /// Defaults to [`DEFAULT_BUS_TIMEOUT_MS`].
    pub fn with_bus_timeout(mut self, timeout_ms: u64) -> Self {
        self.bus_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn build(self, buses: Arc<BusManager>) -> SimBoard {
        let bus_timeout_ms = self.bus_timeout_ms.unwrap_or(DEFAULT_BUS_TIMEOUT_MS);
        let spi_users = usize::from(self.display.is_some()) + usize::from(self.sd_card.is_some());
        let spi = self
            .spi_host
            .map(|host| SimSpiBus::new(host, spi_users > 1, Arc::clone(&buses)));

        let touch = self.touch.then(SimTouch::new);

        let display = self.display.map(|(w, h)| {
            let mut display = HeadlessDisplay::new(w, h).with_bus_timeout(bus_timeout_ms);
            if let Some(spi) = &spi {
                display = display.on_spi(Arc::clone(spi));
            }
            if let Some(touch) = &touch {
                display = display.with_touch(Arc::clone(touch));
            }
            Arc::new(display)
        });

        let i2c = self
            .i2c
            .into_iter()
            .map(|(port, addrs)| {
                let bus = SimI2cBus::new(port, Arc::clone(&buses));
                for addr in addrs {
                    bus.attach_peripheral(addr);
                }
                bus
            })
            .collect();

        SimBoard {
            spi,
            display,
            touch,
            i2c,
            gpio: self.gpio.map(|(pins, cap)| SimGpioController::new(pins, cap)),
            sd_card: self.sd_card.map(SimSdCard::new),
        }
    }
}

/// A simulated board: the set of drivers produced by a [`SimBoardBuilder`].
pub struct SimBoard {
    pub spi: Option<Arc<SimSpiBus>>,
    pub display: Option<Arc<HeadlessDisplay>>,
    pub touch: Option<Arc<SimTouch>>,
    pub i2c: Vec<Arc<SimI2cBus>>,
    pub gpio: Option<Arc<SimGpioController>>,
    pub sd_card: Option<Arc<SimSdCard>>,
}

impl SimBoard {
    pub fn builder() -> SimBoardBuilder {
        SimBoardBuilder::default()
    }

    /// Build one of the named [`PROFILES`].
    ///
    /// `bus_timeout_ms` bounds every bus acquisition made by the drivers.
    ///
    /// # Errors
    ///
    /// [`KernelError::Config`] for an unknown profile name.
    pub fn profile(
        name: &str,
        buses: Arc<BusManager>,
        gpio_queue_capacity: usize,
        bus_timeout_ms: u64,
    ) -> Result<Self, KernelError> {
        let builder = match name {
            "simulator" => Self::builder()
                .with_spi_bus(2)
                .with_display(320, 240)
                .with_touch()
                .with_sd_card(true)
                .with_i2c_bus(0, &[0x38, 0x51])
                .with_gpio(40, gpio_queue_capacity),
            "headless" => Self::builder()
                .with_display(320, 240)
                .with_gpio(40, gpio_queue_capacity),
            other => {
                return Err(KernelError::Config(format!(
                    "unknown board profile '{other}' (expected one of {PROFILES:?})"
                )));
            }
        };
        Ok(builder.with_bus_timeout(bus_timeout_ms).build(buses))
    }

    /// Every driver, buses first so dependents find them registered.
    pub fn devices(&self) -> Vec<DeviceRef> {
        let mut devices: Vec<DeviceRef> = Vec::new();
        if let Some(spi) = &self.spi {
            devices.push(spi.clone());
        }
        devices.extend(self.i2c.iter().map(|b| b.clone() as DeviceRef));
        if let Some(gpio) = &self.gpio {
            devices.push(gpio.clone());
        }
        if let Some(display) = &self.display {
            devices.push(display.clone());
        }
        if let Some(touch) = &self.touch {
            devices.push(touch.clone());
        }
        if let Some(sd) = &self.sd_card {
            devices.push(sd.clone());
        }
        devices
    }

    /// Start every driver and register it.  Drivers that fail to start are
    /// registered anyway (in [`DeviceState::Error`]) so they show up in the
    /// health report.
    ///
    /// Returns the number of drivers that started.
    pub fn install(&self, registry: &DeviceRegistry) -> Result<usize, KernelError> {
        let mut healthy = 0;
        for device in self.devices() {
            match device.start() {
                Ok(()) => healthy += 1,
                Err(e) => warn!(name = device.name(), error = %e, "simulated device failed to start"),
            }
            registry.register_device(device)?;
        }
        info!(healthy, total = registry.count(), "simulated board installed");
        Ok(healthy)
    }

    /// Stop every driver in reverse install order.
    pub fn shutdown(&self) {
        for device in self.devices().into_iter().rev() {
            if let Err(e) = device.stop() {
                warn!(name = device.name(), error = %e, "device stop failed");
            }
        }
    }
}
