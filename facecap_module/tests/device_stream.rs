use api::{DeviceLogger, FaceSample, LogLevel, TrackingDevice};
use facecap_module::protocol::{encode, encode_channels, DATA_LENGTH};
use facecap_module::{Blendshape, DecodedFrame, DeviceConfig, FaceCapDevice};
use std::ffi::c_char;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

extern "C" fn quiet(_level: LogLevel, _target: *const c_char, _message: *const c_char) {}

fn test_device() -> FaceCapDevice {
    FaceCapDevice::with_config(DeviceConfig {
        port: 0,
        verbose: true,
        poll_timeout_secs: 1,
    })
}

fn target(device: &FaceCapDevice) -> SocketAddr {
    let port = device.local_addr().unwrap().port();
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

#[test]
fn test_update_fills_sample_from_packet() {
    let mut device = test_device();
    device
        .initialize(DeviceLogger::new(quiet, "facecap".to_string()))
        .unwrap();
    assert!(device.is_streaming());

    let mut channels = [0.0f32; DATA_LENGTH];
    for (i, value) in channels.iter_mut().enumerate() {
        *value = i as f32;
    }
    let tx = UdpSocket::bind("127.0.0.1:0").unwrap();
    tx.send_to(&encode_channels("iPhone", &channels), target(&device))
        .unwrap();

    let mut sample = FaceSample::default();
    assert!(device.update(&mut sample).unwrap());

    assert_eq!(sample.rotation.to_array(), [52.0, 53.0, 54.0]);
    assert_eq!(sample.left_eye.to_array(), [55.0, 56.0]);
    assert_eq!(sample.right_eye.to_array(), [58.0, 59.0]);
    assert_eq!(sample.blendshapes[Blendshape::EyeBlinkLeft.index()], 0.0);
    assert_eq!(sample.blendshapes[Blendshape::JawOpen.index()], 17.0);
    assert_eq!(sample.blendshapes[Blendshape::TongueOut.index()], 51.0);
    assert_eq!(device.blendshape_value(Blendshape::JawOpen.index()).unwrap(), 17.0);
    assert_eq!(device.last_sender(), Some(tx.local_addr().unwrap()));

    device.unload();
    assert!(!device.is_streaming());
    // Frame outlives the stream.
    assert_eq!(device.rotation(), [52.0, 53.0, 54.0]);
}

#[test]
fn test_update_without_data_keeps_sample() {
    let mut device = FaceCapDevice::with_config(DeviceConfig {
        port: 0,
        verbose: false,
        poll_timeout_secs: 0,
    });
    device.start_stream().unwrap();

    let mut sample = FaceSample::default();
    sample.blendshapes = vec![0.25; 3];
    assert!(!device.update(&mut sample).unwrap());
    assert_eq!(sample.blendshapes, vec![0.25; 3]);
    assert_eq!(*device.frame(), DecodedFrame::ZERO);
}

#[test]
fn test_restart_replaces_socket() {
    let mut device = test_device();
    device.start_stream().unwrap();
    let first = device.local_addr().unwrap();

    device.start_stream().unwrap();
    assert!(device.is_streaming());

    // The first socket is gone, so its port can be bound again.
    let reused = UdpSocket::bind(first).unwrap();
    drop(reused);
    device.stop_stream();
    device.stop_stream();
    assert!(!device.is_streaming());
}

#[test]
fn test_start_on_busy_port_fails() {
    let holder = UdpSocket::bind("0.0.0.0:0").unwrap();
    let port = holder.local_addr().unwrap().port();

    let mut device = test_device();
    device.set_network_port(port);
    assert!(device.start_stream().is_err());
    assert!(!device.is_streaming());

    let mut hosted = test_device();
    hosted.set_network_port(port);
    let err = hosted
        .initialize(DeviceLogger::new(quiet, "facecap".to_string()))
        .unwrap_err();
    assert!(err.to_string().contains(&port.to_string()));
}

#[test]
fn test_last_good_packet_wins() {
    let mut device = test_device();
    device.start_stream().unwrap();
    let to = target(&device);
    let tx = UdpSocket::bind("127.0.0.1:0").unwrap();

    let mut frame = DecodedFrame::ZERO;
    for smile in [0.125, 0.25, 0.5] {
        frame.blendshapes[Blendshape::MouthSmileLeft.index()] = smile;
        tx.send_to(&encode("iPhone", &frame), to).unwrap();
    }
    tx.send_to(b"not a frame", to).unwrap();

    assert!(device.poll().unwrap());
    assert_eq!(device.blendshape(Blendshape::MouthSmileLeft), 0.5);
    assert_eq!(*device.frame(), frame);
}
