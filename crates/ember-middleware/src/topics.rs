//! Topic names published by the kernel.
//!
//! | Topic | Payload |
//! |---|---|
//! | [`DEVICE_REGISTERED`] | `id: i32`, `type: string`, `name: string` |
//! | [`DEVICE_REMOVED`] | `id: i32`, `type: string`, `name: string` |
//! | [`HAL_INIT_BEGIN`] | empty |
//! | [`HAL_INIT_COMPLETE`] | `deviceCount: i32` |
//! | [`SERVICE_STARTED`] | `serviceId: string` |
//! | [`SERVICE_STOPPED`] | `serviceId: string` |
//! | [`SERVICE_FAILED`] | `serviceId: string` |
//! | [`SERVICE_CYCLE`] | `unresolved: string` (comma separated ids) |

pub const DEVICE_REGISTERED: &str = "hal.device.registered";
pub const DEVICE_REMOVED: &str = "hal.device.removed";
pub const HAL_INIT_BEGIN: &str = "hal.init.begin";
pub const HAL_INIT_COMPLETE: &str = "hal.init.complete";

pub const SERVICE_STARTED: &str = "service.started";
pub const SERVICE_STOPPED: &str = "service.stopped";
pub const SERVICE_FAILED: &str = "service.failed";
pub const SERVICE_CYCLE: &str = "service.cycle";
