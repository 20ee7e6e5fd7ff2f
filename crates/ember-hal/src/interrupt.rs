//! GPIO interrupt → task hand-off with optional per-pin debounce.
//!
//! # Pipeline
//!
//! ```text
//!  edge (interrupt context)          consumer thread "gpio-edge"
//!  ───────────────────────           ───────────────────────────
//!  on_edge(pin, now_ms)
//!    ├─ debounce check (atomics)
//!    ├─ EdgeQueue::push(pin)  ─────▶  EdgeQueue::pop()
//!    └─ unpark(consumer)               ├─ PIN_NC → exit
//!                                      ├─ level = read_level(pin)
//!                                      └─ callback(pin, level)
//! ```
//!
//! The producer side touches only atomics: it never allocates, logs, locks,
//! or blocks.  Callbacks run on the consumer thread and may do all of those.
//!
//! Shutdown pushes the [`PIN_NC`] sentinel through the queue so the
//! consumer wakes up and exits before the dispatcher releases its resources.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::Instant;

use ember_types::KernelError;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::gpio::{GpioCallback, PIN_NC, Pin};

/// Default edge queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 20;

const NO_TICK: u64 = u64::MAX;

/// Milliseconds since the first call in this process; the tick source for
/// debounce decisions.
pub fn now_ms() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

// ────────────────────────────────────────────────────────────────────────────
// EdgeQueue
// ────────────────────────────────────────────────────────────────────────────

/// Fixed-capacity lock-free single-producer/single-consumer ring of pin
/// numbers.
///
/// One slot is kept empty to tell "full" from "empty", so the backing array
/// holds `capacity + 1` entries.
pub struct EdgeQueue {
    slots: Box<[AtomicI32]>,
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl EdgeQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity.max(1) + 1)
            .map(|_| AtomicI32::new(PIN_NC))
            .collect();
        Self {
            slots,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Producer side.  Returns `false` when the ring is full.
    pub fn push(&self, pin: Pin) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let next = (tail + 1) % self.slots.len();
        if next == self.head.load(Ordering::Acquire) {
            return false;
        }
        self.slots[tail].store(pin, Ordering::Relaxed);
        self.tail.store(next, Ordering::Release);
        true
    }

    /// Consumer side.
    pub fn pop(&self) -> Option<Pin> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        let pin = self.slots[head].load(Ordering::Relaxed);
        self.head.store((head + 1) % self.slots.len(), Ordering::Release);
        Some(pin)
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// EdgeDispatcher
// ────────────────────────────────────────────────────────────────────────────

/// Per-pin interrupt state, readable from interrupt context.
struct PinSlot {
    armed: AtomicBool,
    debounce_ms: AtomicU32,
    last_tick: AtomicU64,
}

impl PinSlot {
    fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
            debounce_ms: AtomicU32::new(0),
            last_tick: AtomicU64::new(NO_TICK),
        }
    }
}

type LevelReader = Box<dyn Fn(Pin) -> bool + Send + Sync>;

struct Shared {
    queue: EdgeQueue,
    pins: Box<[PinSlot]>,
    callbacks: Mutex<HashMap<Pin, GpioCallback>>,
    read_level: LevelReader,
    running: AtomicBool,
    consumer: OnceLock<Thread>,
    dropped: AtomicU64,
    delivered: AtomicU64,
}

impl Shared {
    fn slot(&self, pin: Pin) -> Option<&PinSlot> {
        usize::try_from(pin).ok().and_then(|i| self.pins.get(i))
    }

    fn wake_consumer(&self) {
        if let Some(consumer) = self.consumer.get() {
            consumer.unpark();
        }
    }
}

/// Owns the edge queue, the per-pin debounce state, the callback table, and
/// the consumer thread of one GPIO controller.
pub struct EdgeDispatcher {
    shared: Arc<Shared>,
    /// Serialises producers that are not true interrupt handlers.
    gate: Mutex<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EdgeDispatcher {
    /// Spawn the consumer thread for a controller with `pin_count` pins.
    ///
    /// `read_level` is called from the consumer thread to sample the pin
    /// after each accepted edge.
    pub fn start<F>(pin_count: usize, capacity: usize, read_level: F) -> Result<Self, KernelError>
    where
        F: Fn(Pin) -> bool + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            queue: EdgeQueue::with_capacity(capacity),
            pins: (0..pin_count).map(|_| PinSlot::new()).collect(),
            callbacks: Mutex::new(HashMap::new()),
            read_level: Box::new(read_level),
            running: AtomicBool::new(true),
            consumer: OnceLock::new(),
            dropped: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        });

        let consumer_state = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("gpio-edge".into())
            .spawn(move || consume(&consumer_state))
            .map_err(|e| KernelError::DeviceStartFailed {
                name: "gpio-edge".into(),
                details: e.to_string(),
            })?;
        let _ = shared.consumer.set(worker.thread().clone());

        info!(pin_count, capacity, "gpio edge dispatcher started");
        Ok(Self {
            shared,
            gate: Mutex::new(()),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Arm `pin` without debounce.
    pub fn attach(&self, pin: Pin, callback: GpioCallback) -> Result<(), KernelError> {
        self.attach_debounced(pin, 0, callback)
    }

    /// Arm `pin`; edges closer than `debounce_ms` to the last accepted edge
    /// are discarded in interrupt context.  `0` disables the filter.
    pub fn attach_debounced(
        &self,
        pin: Pin,
        debounce_ms: u32,
        callback: GpioCallback,
    ) -> Result<(), KernelError> {
        let slot = self.shared.slot(pin).ok_or(KernelError::InvalidPin(pin))?;

        // Disarm while the slot is rewritten so a concurrent edge never sees
        // a half-updated debounce configuration.
        slot.armed.store(false, Ordering::Release);
        self.shared.callbacks.lock().insert(pin, callback);
        slot.debounce_ms.store(debounce_ms, Ordering::Relaxed);
        slot.last_tick.store(NO_TICK, Ordering::Relaxed);
        slot.armed.store(true, Ordering::Release);

        debug!(pin, debounce_ms, "gpio interrupt attached");
        Ok(())
    }

    pub fn detach(&self, pin: Pin) -> Result<(), KernelError> {
        let slot = self.shared.slot(pin).ok_or(KernelError::InvalidPin(pin))?;
        slot.armed.store(false, Ordering::Release);
        self.shared.callbacks.lock().remove(&pin);
        debug!(pin, "gpio interrupt detached");
        Ok(())
    }

    /// Interrupt-context entry point.
    ///
    /// Must only be called from a single producer context at a time (the
    /// controller's interrupt handler).  Returns whether the edge was
    /// queued.
    pub fn on_edge(&self, pin: Pin, now_ms: u64) -> bool {
        let shared = &*self.shared;
        if !shared.running.load(Ordering::Acquire) {
            return false;
        }
        let Some(slot) = shared.slot(pin) else {
            return false;
        };
        if !slot.armed.load(Ordering::Acquire) {
            return false;
        }

        let debounce = u64::from(slot.debounce_ms.load(Ordering::Relaxed));
        if debounce > 0 {
            let last = slot.last_tick.load(Ordering::Relaxed);
            if last != NO_TICK && now_ms.saturating_sub(last) < debounce {
                return false;
            }
            slot.last_tick.store(now_ms, Ordering::Relaxed);
        }

        if !shared.queue.push(pin) {
            shared.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        shared.wake_consumer();
        true
    }

    /// Thread-safe producer for callers that are not the interrupt handler
    /// (simulators, tests).
    pub fn raise(&self, pin: Pin, now_ms: u64) -> bool {
        let _producer = self.gate.lock();
        self.on_edge(pin, now_ms)
    }

    /// Edges lost because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Callbacks invoked so far.
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop the consumer thread and wait for it to exit.
    ///
    /// Safe to call more than once.  When called from a callback (i.e. on
    /// the consumer thread itself) the thread is signalled but not joined.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        {
            let _producer = self.gate.lock();
            if !self.shared.queue.push(PIN_NC) {
                // Full queue: the consumer drains it and then sees
                // `running == false`.
                debug!("gpio edge queue full at shutdown");
            }
        }
        self.shared.wake_consumer();

        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            warn!("gpio edge consumer panicked");
        }
        info!(
            delivered = self.delivered(),
            dropped = self.dropped(),
            "gpio edge dispatcher stopped"
        );
    }
}

impl Drop for EdgeDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn consume(shared: &Shared) {
    loop {
        match shared.queue.pop() {
            Some(PIN_NC) => break,
            Some(pin) => {
                let callback = shared.callbacks.lock().get(&pin).cloned();
                if let Some(callback) = callback {
                    let level = (shared.read_level)(pin);
                    callback(pin, level);
                    shared.delivered.fetch_add(1, Ordering::Relaxed);
                }
            }
            None => {
                if !shared.running.load(Ordering::Acquire) {
                    break;
                }
                thread::park();
            }
        }
    }
    debug!("gpio edge consumer exiting");
}
