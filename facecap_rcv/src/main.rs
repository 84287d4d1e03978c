use anyhow::{bail, Context, Result};
use api::{BasicHost, CommType, DeviceHost, DeviceLogger, FaceSample, LogLevel, TrackingDevice};
use facecap_module::{DeviceConfig, FaceCapDevice};
use log::{debug, error, info, trace, warn};
use std::ffi::c_char;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

extern "C" fn device_log_callback(level: LogLevel, target: *const c_char, message: *const c_char) {
    unsafe {
        let target_str = std::ffi::CStr::from_ptr(target)
            .to_str()
            .unwrap_or("unknown");
        let message_str = std::ffi::CStr::from_ptr(message).to_str().unwrap_or("");

        match level {
            LogLevel::Error => error!(target: target_str, "{}", message_str),
            LogLevel::Warn => warn!(target: target_str, "{}", message_str),
            LogLevel::Info => info!(target: target_str, "{}", message_str),
            LogLevel::Debug => debug!(target: target_str, "{}", message_str),
            LogLevel::Trace => trace!(target: target_str, "{}", message_str),
        }
    }
}

struct Args {
    config_path: PathBuf,
    port: Option<u16>,
    verbose: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config_path: PathBuf::from("facecap.json"),
        port: None,
        verbose: false,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--port" => {
                let value = iter.next().context("--port needs a value")?;
                args.port = Some(value.parse().with_context(|| format!("bad port {:?}", value))?);
            }
            "--verbose" => args.verbose = true,
            other if other.starts_with("--") => bail!("unknown option {}", other),
            path => args.config_path = PathBuf::from(path),
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args()?;
    let mut config = DeviceConfig::load(&args.config_path).unwrap_or_else(|e| {
        error!("Failed to load config: {:#}. Using defaults.", e);
        DeviceConfig::default()
    });
    if let Some(port) = args.port {
        config.port = port;
    }
    config.verbose |= args.verbose;
    info!("Loaded Config: {:?}", config);

    let host: Arc<dyn DeviceHost> = Arc::new(BasicHost::new(CommType::Network));
    let mut device = FaceCapDevice::with_config(config);
    device.set_host(Arc::downgrade(&host));
    device.initialize(DeviceLogger::new(device_log_callback, "facecap".to_string()))?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received Ctrl-C, shutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler")?;

    listen(&mut device, &running)
}

/// Polls until `running` is cleared or the device fails, printing every
/// changed sample. The device is always unloaded on the way out.
fn listen(device: &mut FaceCapDevice, running: &AtomicBool) -> Result<()> {
    let mut sample = FaceSample::default();
    let mut last_sample: Option<FaceSample> = None;
    let mut result = Ok(());

    while running.load(Ordering::SeqCst) {
        match device.update(&mut sample) {
            Ok(true) => {
                if last_sample.as_ref() != Some(&sample) {
                    match device.last_sender() {
                        Some(src) => println!("Received frame from {}:", src),
                        None => println!("Received frame:"),
                    }
                    match serde_json::to_string(&sample) {
                        Ok(json) => println!("{}", json),
                        Err(e) => warn!("Failed to serialize sample: {}", e),
                    }
                    last_sample = Some(sample.clone());
                }
            }
            Ok(false) => trace!("No data this tick"),
            Err(e) => {
                error!("Update failed: {:#}", e);
                result = Err(e);
                break;
            }
        }
    }

    device.unload();
    result
}
