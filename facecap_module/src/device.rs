use anyhow::{Context, Result};
use api::{CommType, DeviceHost, DeviceLogger, FaceSample, TrackingDevice};
use glam::{DVec2, DVec3};
use std::net::SocketAddr;
use std::sync::Weak;
use thiserror::Error;

use crate::config::DeviceConfig;
use crate::protocol::{Blendshape, DecodedFrame, BLENDSHAPE_COUNT};
use crate::receiver::{NetworkError, Receiver};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("blendshape index {index} out of range, device has {count}")]
    IndexOutOfRange { index: usize, count: usize },
    #[error("device is not streaming")]
    NotStreaming,
}

/// Face capture device fed by a LiveLink Face client over UDP.
///
/// The last good frame stays readable after the stream is stopped.
pub struct FaceCapDevice {
    config: DeviceConfig,
    receiver: Option<Receiver>,
    /// Copied from the receiver on each update so it survives `stop_stream`.
    frame: DecodedFrame,
    host: Option<Weak<dyn DeviceHost>>,
    logger: Option<DeviceLogger>,
}

impl Default for FaceCapDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceCapDevice {
    pub fn new() -> Self {
        Self::with_config(DeviceConfig::default())
    }

    pub fn with_config(config: DeviceConfig) -> Self {
        Self {
            config,
            receiver: None,
            frame: DecodedFrame::ZERO,
            host: None,
            logger: None,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Takes effect on the next [`FaceCapDevice::start_stream`].
    pub fn set_network_port(&mut self, port: u16) {
        self.config.port = port;
    }

    pub fn network_port(&self) -> u16 {
        self.config.port
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.config.verbose = verbose;
        if let Some(receiver) = &mut self.receiver {
            receiver.set_verbose(verbose);
        }
    }

    pub fn verbose(&self) -> bool {
        self.config.verbose
    }

    /// Attaches the owning host. Only a weak reference is kept.
    pub fn set_host(&mut self, host: Weak<dyn DeviceHost>) {
        self.host = Some(host);
    }

    /// `None` when no host is attached or it has been dropped.
    pub fn communication_type(&self) -> Option<CommType> {
        self.host
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|host| host.comm_type())
    }

    /// Returns `false` when there is no live host to update.
    pub fn set_communication_type(&self, comm_type: CommType) -> bool {
        match self.host.as_ref().and_then(Weak::upgrade) {
            Some(host) => {
                host.set_comm_type(comm_type);
                true
            }
            None => false,
        }
    }

    /// Opens the socket on the configured port, closing any previous one
    /// first.
    pub fn start_stream(&mut self) -> Result<(), DeviceError> {
        self.stop_stream();

        let port = self.config.port;
        let mut receiver = match Receiver::open(port) {
            Ok(receiver) => receiver,
            Err(e) => {
                if let Some(logger) = &self.logger {
                    logger.error(&format!("Failed to open UDP port {}: {}", port, e));
                }
                return Err(e.into());
            }
        };
        receiver.set_verbose(self.config.verbose);

        if let Some(logger) = &self.logger {
            logger.info(&format!("Listening on UDP port {}", port));
        }
        self.receiver = Some(receiver);
        Ok(())
    }

    pub fn stop_stream(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.close();
            if let Some(logger) = &self.logger {
                logger.info("Stream stopped");
            }
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.receiver.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.receiver.as_ref().and_then(Receiver::local_addr)
    }

    pub fn last_sender(&self) -> Option<SocketAddr> {
        self.receiver.as_ref().and_then(Receiver::last_sender)
    }

    /// One tick: waits up to the configured timeout and reports whether a
    /// new frame arrived.
    pub fn poll(&mut self) -> Result<bool, DeviceError> {
        let receiver = self.receiver.as_mut().ok_or(DeviceError::NotStreaming)?;
        if receiver.poll(self.config.poll_timeout()) == 0 {
            return Ok(false);
        }
        self.frame = *receiver.frame();
        Ok(true)
    }

    pub fn frame(&self) -> &DecodedFrame {
        &self.frame
    }

    /// Always zero, the stream carries no position.
    pub fn position(&self) -> [f64; 3] {
        [0.0; 3]
    }

    pub fn rotation(&self) -> [f64; 3] {
        self.frame.head_rotation
    }

    pub fn left_eye_rotation(&self) -> [f64; 2] {
        self.frame.left_eye_rotation
    }

    pub fn right_eye_rotation(&self) -> [f64; 2] {
        self.frame.right_eye_rotation
    }

    pub fn blendshape_count(&self) -> usize {
        BLENDSHAPE_COUNT
    }

    pub fn blendshape_value(&self, index: usize) -> Result<f64, DeviceError> {
        self.frame
            .blendshapes
            .get(index)
            .copied()
            .ok_or(DeviceError::IndexOutOfRange {
                index,
                count: BLENDSHAPE_COUNT,
            })
    }

    pub fn blendshape(&self, shape: Blendshape) -> f64 {
        self.frame.blendshape(shape)
    }

    fn fill_sample(&self, sample: &mut FaceSample) {
        sample.position = DVec3::from_array(self.position());
        sample.rotation = DVec3::from_array(self.rotation());
        sample.left_eye = DVec2::from_array(self.left_eye_rotation());
        sample.right_eye = DVec2::from_array(self.right_eye_rotation());
        sample.blendshapes.clear();
        sample.blendshapes.extend_from_slice(&self.frame.blendshapes);
    }
}

impl TrackingDevice for FaceCapDevice {
    fn initialize(&mut self, logger: DeviceLogger) -> Result<()> {
        logger.info("Initializing FaceCap device");
        self.logger = Some(logger);
        self.start_stream()
            .with_context(|| format!("starting stream on port {}", self.config.port))?;
        Ok(())
    }

    fn update(&mut self, sample: &mut FaceSample) -> Result<bool> {
        if !self.poll()? {
            return Ok(false);
        }
        self.fill_sample(sample);
        Ok(true)
    }

    fn unload(&mut self) {
        if let Some(logger) = &self.logger {
            logger.info("FaceCap device shutting down");
        }
        self.stop_stream();
    }
}
