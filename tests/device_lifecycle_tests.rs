// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Integration tests for device lifecycle and registry behaviour
//!
//! These drive the public API end to end: open/close with the idle
//! media-change timer, revalidation, control requests, and concurrent I/O
//! across devices.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tesseract_ramdisk::{
    Completion, DeviceRegistry, Direction, HdGeometry, RamdiskConfig, RamdiskError, Request,
    RequestKind, RequestMode, HDIO_GETGEO,
};

fn config(delay_ms: u64) -> RamdiskConfig {
    RamdiskConfig::default()
        .with_device_count(4)
        .with_geometry(512, 8)
        .with_invalidate_delay(Duration::from_millis(delay_ms))
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn test_concrete_scenario_plain() {
    let registry = DeviceRegistry::new(config(30_000).with_encryption(false)).unwrap();
    let device = registry.device(0).unwrap();
    assert_eq!(device.capacity_bytes(), 4096);

    let mut pattern = vec![0xABu8; 512];
    registry
        .submit(0, [Request::write(1).with_segment(0, 1, &mut pattern)])
        .unwrap();

    let mut out = vec![0u8; 512];
    registry
        .submit(0, [Request::read(2).with_segment(0, 1, &mut out)])
        .unwrap();
    assert_eq!(out, vec![0xABu8; 512]);
    assert_eq!(&device.snapshot()[..512], &[0xABu8; 512][..]);
}

#[test]
fn test_concrete_scenario_encrypted() {
    let registry = DeviceRegistry::new(config(30_000)).unwrap();
    let device = registry.device(0).unwrap();

    let mut pattern = vec![0xABu8; 512];
    registry
        .submit(0, [Request::write(1).with_segment(0, 1, &mut pattern)])
        .unwrap();

    let mut out = vec![0u8; 512];
    registry
        .submit(0, [Request::read(2).with_segment(0, 1, &mut out)])
        .unwrap();
    assert_eq!(out, vec![0xABu8; 512]);

    let raw = device.snapshot();
    for stride in raw[..512].chunks_exact(16) {
        assert_ne!(stride, &[0xABu8; 16][..]);
    }
}

#[test]
fn test_media_change_after_idle() {
    let registry = DeviceRegistry::new(config(50)).unwrap();
    let device = registry.device(1).unwrap();

    device.open().unwrap();
    let mut data = vec![0x77u8; 512];
    device.transfer(3, 1, &mut data, Direction::Write).unwrap();
    device.release().unwrap();

    assert!(wait_for(|| device.media_changed()));
    // Data is still there until the next open revalidates
    assert!(device.snapshot().iter().any(|&b| b != 0));

    device.open().unwrap();
    assert!(!device.media_changed());
    assert!(device.snapshot().iter().all(|&b| b == 0));
    device.release().unwrap();
}

#[test]
fn test_reopen_before_delay_keeps_data() {
    let registry = DeviceRegistry::new(config(200)).unwrap();
    let device = registry.device(0).unwrap();

    device.open().unwrap();
    let mut data = vec![0x11u8; 512];
    device.transfer(0, 1, &mut data, Direction::Write).unwrap();
    device.release().unwrap();

    device.open().unwrap();
    thread::sleep(Duration::from_millis(400));
    assert!(!device.media_changed());

    let mut out = vec![0u8; 512];
    device.transfer(0, 1, &mut out, Direction::Read).unwrap();
    assert_eq!(out, data);
    device.release().unwrap();
}

#[test]
fn test_revalidate_is_idempotent() {
    let registry = DeviceRegistry::new(config(20)).unwrap();
    let device = registry.device(2).unwrap();

    device.open().unwrap();
    device.release().unwrap();
    assert!(wait_for(|| device.media_changed()));

    assert!(device.revalidate());
    assert!(!device.revalidate());
    assert!(!device.media_changed());
    assert!(device.snapshot().iter().all(|&b| b == 0));
}

#[test]
fn test_release_without_open() {
    let registry = DeviceRegistry::new(config(30_000)).unwrap();
    let result = registry.device(0).unwrap().release();
    assert!(matches!(result, Err(RamdiskError::LifecycleViolation(_))));
}

#[test]
fn test_geometry_ioctl() {
    let registry = DeviceRegistry::new(
        config(30_000).with_device_count(1).with_geometry(512, 8192),
    )
    .unwrap();
    let device = registry.device(0).unwrap();

    let mut geo = HdGeometry::default();
    device.ioctl(HDIO_GETGEO, Some(&mut geo)).unwrap();
    assert_eq!(geo.heads, 4);
    assert_eq!(geo.sectors, 16);
    assert_eq!(geo.start, 4);
    assert_eq!(geo.cylinders, 128);

    assert!(matches!(
        device.ioctl(0x1234, Some(&mut geo)),
        Err(RamdiskError::UnknownIoctl(0x1234))
    ));
    assert!(matches!(
        device.ioctl(HDIO_GETGEO, None),
        Err(RamdiskError::InvalidArgument(_))
    ));
}

#[test]
fn test_concurrent_io_across_devices() {
    for mode in [RequestMode::Simple, RequestMode::Full, RequestMode::NoQueue] {
        let registry = Arc::new(DeviceRegistry::new(config(30_000).with_request_mode(mode)).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|index| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let fill = 0x10 + index as u8;
                    for round in 0..50u64 {
                        let sector = round % 8;
                        let mut data = vec![fill; 512];
                        registry
                            .submit(index, [Request::write(round).with_segment(sector, 1, &mut data)])
                            .unwrap();
                        let mut out = vec![0u8; 512];
                        registry
                            .submit(index, [Request::read(round).with_segment(sector, 1, &mut out)])
                            .unwrap();
                        assert_eq!(out, data);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}

#[test]
fn test_concurrent_io_same_device() {
    let registry = Arc::new(DeviceRegistry::new(config(30_000)).unwrap());

    let handles: Vec<_> = (0..4u64)
        .map(|sector| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let fill = 0xA0 + sector as u8;
                for round in 0..50 {
                    let mut data = vec![fill; 512];
                    registry
                        .submit(0, [Request::write(round).with_segment(sector, 1, &mut data)])
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let device = registry.device(0).unwrap();
    for sector in 0..4u64 {
        let mut out = vec![0u8; 512];
        device.transfer(sector, 1, &mut out, Direction::Read).unwrap();
        assert_eq!(out, vec![0xA0 + sector as u8; 512]);
    }
}

#[test]
fn test_unsupported_requests_reported() {
    let registry = DeviceRegistry::new(config(30_000)).unwrap();
    let errors = Mutex::new(Vec::new());

    let mut buf = vec![0u8; 512];
    let request = Request::write(9)
        .with_kind(RequestKind::DriverPrivate)
        .with_segment(0, 1, &mut buf)
        .on_complete(|c: Completion| errors.lock().unwrap().push(c.result));
    let stats = registry.submit(0, [request]).unwrap();

    assert_eq!(stats.failed, 1);
    let errors = errors.into_inner().unwrap();
    assert!(matches!(
        errors.as_slice(),
        [Err(RamdiskError::UnsupportedRequestType(RequestKind::DriverPrivate))]
    ));
}

#[test]
fn test_config_file_drives_registry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ramdisk.toml");
    std::fs::write(
        &path,
        "device_count = 2\nsector_size = 1024\nsectors_per_device = 4\nrequest_mode = \"no-queue\"\nkey = \"0123456789abcdef\"\n",
    )
    .unwrap();

    let registry = DeviceRegistry::new(RamdiskConfig::load(&path).unwrap()).unwrap();
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.dispatcher().mode(), RequestMode::NoQueue);

    let info = registry.device_info();
    assert_eq!(info[1].name, "ramdiskb");
    assert_eq!(info[1].capacity_bytes, 4096);
    assert_eq!(info[1].sector_size, 1024);
}
