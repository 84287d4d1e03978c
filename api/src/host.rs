//! The host side of a device: the object that owns it and decides how it
//! talks to the outside world.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// How a device is connected to its data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommType {
    None,
    Serial,
    #[default]
    Network,
    SharedMemory,
    Simulator,
}

/// Implemented by whatever owns a device.
///
/// Devices only ever hold a `Weak` reference to their host, so every method
/// takes `&self` and implementors use interior mutability.
pub trait DeviceHost: Send + Sync {
    fn comm_type(&self) -> CommType;
    fn set_comm_type(&self, comm_type: CommType);
}

/// Minimal host that just stores the communication type.
#[derive(Debug, Default)]
pub struct BasicHost {
    comm_type: Mutex<CommType>,
}

impl BasicHost {
    pub fn new(comm_type: CommType) -> Self {
        Self {
            comm_type: Mutex::new(comm_type),
        }
    }
}

impl DeviceHost for BasicHost {
    fn comm_type(&self) -> CommType {
        match self.comm_type.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_comm_type(&self, comm_type: CommType) {
        match self.comm_type.lock() {
            Ok(mut guard) => *guard = comm_type,
            Err(poisoned) => *poisoned.into_inner() = comm_type,
        }
    }
}
