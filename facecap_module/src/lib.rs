pub mod config;
pub mod device;
pub mod protocol;
pub mod receiver;

pub use config::DeviceConfig;
pub use device::{DeviceError, FaceCapDevice};
pub use protocol::{decode, Blendshape, DecodeError, DecodedFrame, BLENDSHAPE_COUNT};
pub use receiver::{NetworkError, Receiver};

use api::TrackingDevice;

#[no_mangle]
#[allow(improper_ctypes_definitions)]
pub extern "C" fn create_device() -> Box<dyn TrackingDevice> {
    Box::new(FaceCapDevice::new())
}
