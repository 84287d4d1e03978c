mod host;
pub use host::{BasicHost, CommType, DeviceHost};

use anyhow::Result;
use std::ffi::{c_char, CString};
use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

/// Everything a face device hands to its host on a successful update.
///
/// Rotations are passed through as sent by the capture client; the host is
/// responsible for interpreting axes and units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceSample {
    pub position: DVec3,
    pub rotation: DVec3,
    pub left_eye: DVec2,
    pub right_eye: DVec2,
    pub blendshapes: Vec<f64>,
}

/// log level for device logging
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

/// logger callback for devices
pub type LogCallback = extern "C" fn(level: LogLevel, target: *const c_char, message: *const c_char);

/// Logger handed to a device by its host.
///
/// Messages cross the callback as C strings, so interior NUL bytes are
/// stripped before forwarding.
pub struct DeviceLogger {
    callback: LogCallback,
    device_name: String,
}

impl DeviceLogger {
    pub fn new(callback: LogCallback, device_name: String) -> Self {
        Self {
            callback,
            device_name,
        }
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn log(&self, level: LogLevel, message: &str) {
        let target = to_c_string(&self.device_name);
        let msg = to_c_string(message);
        (self.callback)(level, target.as_ptr(), msg.as_ptr());
    }
}

fn to_c_string(s: &str) -> CString {
    let bytes: Vec<u8> = s.bytes().filter(|&b| b != 0).collect();
    // No NUL bytes remain, so construction cannot fail.
    CString::new(bytes).unwrap_or_default()
}

/// A face-capture device driven by a host's frame tick.
pub trait TrackingDevice {
    fn initialize(&mut self, logger: DeviceLogger) -> Result<()>;
    /// Returns `true` when `sample` was refreshed with new data this tick.
    fn update(&mut self, sample: &mut FaceSample) -> Result<bool>;
    fn unload(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static SEEN: Mutex<Vec<(LogLevel, String, String)>> = Mutex::new(Vec::new());

    extern "C" fn record(level: LogLevel, target: *const c_char, message: *const c_char) {
        let (target, message) = unsafe {
            (
                std::ffi::CStr::from_ptr(target).to_string_lossy().into_owned(),
                std::ffi::CStr::from_ptr(message).to_string_lossy().into_owned(),
            )
        };
        SEEN.lock().unwrap().push((level, target, message));
    }

    #[test]
    fn test_logger_forwards_level_and_target() {
        let logger = DeviceLogger::new(record, "facecap".to_string());
        logger.warn("bad\0packet");

        let seen = SEEN.lock().unwrap();
        let (level, target, message) = seen.last().unwrap();
        assert_eq!(*level, LogLevel::Warn);
        assert_eq!(target, "facecap");
        assert_eq!(message, "badpacket");
    }

    #[test]
    fn test_face_sample_default_is_zeroed() {
        let sample = FaceSample::default();
        assert_eq!(sample.position, DVec3::ZERO);
        assert_eq!(sample.left_eye, DVec2::ZERO);
        assert!(sample.blendshapes.is_empty());
    }
}
