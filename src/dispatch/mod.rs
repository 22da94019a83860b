// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Request dispatching
//!
//! The host hands us queued requests (or, in direct mode, raw I/O units);
//! the dispatcher resolves them into per-segment calls on the device's
//! transfer engine and reports completions back.
//!
//! ## Disciplines
//!
//! | Discipline | Source of work | Completion granularity |
//! |------------|----------------|------------------------|
//! | Simple     | request queue  | per segment            |
//! | Full       | request queue  | per request            |
//! | Direct     | raw I/O units  | per unit               |
//!
//! The discipline is chosen once, when the registry is built, and is the
//! same for every device.

mod direct;
mod full;
pub mod queue;
pub mod request;
mod simple;

use std::collections::VecDeque;

use log::warn;

use crate::config::RequestMode;
use crate::device::{Device, Direction};
use crate::error::{RamdiskError, Result};
pub use queue::RequestQueue;
pub use request::{Completion, CompletionHandler, IoUnit, Request, RequestKind, Segment};

/// Counters for one dispatch call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Requests or units fully consumed.
    pub requests: usize,
    /// Completions reported.
    pub completions: usize,
    /// Completions reported as failed.
    pub failed: usize,
    /// Sectors transferred successfully.
    pub sectors: u64,
}

impl DispatchStats {
    fn record(&mut self, sectors: u64, ok: bool) {
        self.completions += 1;
        self.sectors += sectors;
        if !ok {
            self.failed += 1;
        }
    }

    /// Adds another call's counters to these.
    pub fn merge(&mut self, other: DispatchStats) {
        self.requests += other.requests;
        self.completions += other.completions;
        self.failed += other.failed;
        self.sectors += other.sectors;
    }
}

/// Request-servicing discipline shared by all devices of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatcher {
    /// One segment per iteration, completion per segment.
    Simple,
    /// All segments of a request, one completion per request.
    Full,
    /// Queue bypass; raw units split and completed immediately.
    Direct,
}

impl Dispatcher {
    pub fn for_mode(mode: RequestMode) -> Self {
        match mode {
            RequestMode::Simple => Self::Simple,
            RequestMode::Full => Self::Full,
            RequestMode::NoQueue => Self::Direct,
        }
    }

    pub fn mode(&self) -> RequestMode {
        match self {
            Self::Simple => RequestMode::Simple,
            Self::Full => RequestMode::Full,
            Self::Direct => RequestMode::NoQueue,
        }
    }

    /// Whether this discipline pulls work from a request queue.
    pub fn uses_queue(&self) -> bool {
        !matches!(self, Self::Direct)
    }

    /// Services a batch of requests against `device`.
    ///
    /// Queued disciplines enqueue the batch and drain it; the direct
    /// discipline treats each request as a raw I/O unit.
    pub fn submit<'a, I>(&self, device: &Device, requests: I) -> DispatchStats
    where
        I: IntoIterator<Item = Request<'a>>,
    {
        match self {
            Self::Simple | Self::Full => {
                let mut queue: RequestQueue<'a> = requests.into_iter().collect();
                self.service_queue(device, &mut queue)
            }
            Self::Direct => {
                let mut stats = DispatchStats::default();
                for request in requests {
                    stats.merge(direct::make_request(device, request.into()));
                }
                stats
            }
        }
    }

    /// Drains `queue` against `device`.
    ///
    /// Under the direct discipline the queue is simply emptied unit by unit.
    pub fn service_queue(&self, device: &Device, queue: &mut RequestQueue<'_>) -> DispatchStats {
        match self {
            Self::Simple => simple::service_queue(device, queue),
            Self::Full => full::service_queue(device, queue),
            Self::Direct => {
                let mut stats = DispatchStats::default();
                while let Some(request) = queue.fetch() {
                    stats.merge(direct::make_request(device, request.into()));
                }
                stats
            }
        }
    }

    /// Hands one raw I/O unit to `device`.
    ///
    /// Queued disciplines route the unit through a one-entry queue.
    pub fn make_request(&self, device: &Device, unit: IoUnit<'_>) -> DispatchStats {
        match self {
            Self::Direct => direct::make_request(device, unit),
            Self::Simple | Self::Full => {
                let mut queue = RequestQueue::new();
                queue.push(unit.into_request());
                self.service_queue(device, &mut queue)
            }
        }
    }
}

/// Transfers each segment independently.
///
/// Returns the sectors moved and the first error seen; later segments are
/// still attempted after a failure.
fn transfer_segments(
    device: &Device,
    direction: Direction,
    segments: VecDeque<Segment<'_>>,
) -> (u64, Result<()>) {
    let mut sectors = 0;
    let mut outcome = Ok(());

    for segment in segments {
        match device.transfer(
            segment.start_sector,
            segment.sector_count,
            segment.buffer,
            direction,
        ) {
            Ok(()) => sectors += segment.sector_count,
            Err(e) => {
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
    }

    (sectors, outcome)
}

/// Completes a non-filesystem request as failed.
fn fail_unsupported(device: &Device, request: Request<'_>, stats: &mut DispatchStats) {
    warn!(
        "{}: skip non-fs request {} ({:?})",
        device.name(),
        request.tag(),
        request.kind()
    );
    stats.requests += 1;
    stats.record(0, false);
    request.complete(
        0,
        Err(RamdiskError::UnsupportedRequestType(request.kind())),
        true,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CipherContext;
    use crate::device::TransferEngine;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const SECTOR: usize = 512;

    fn device(encrypt: bool) -> Device {
        let engine = if encrypt {
            let cipher = Arc::new(CipherContext::new(b"0123456789abcdef").unwrap());
            TransferEngine::encrypted(SECTOR, cipher)
        } else {
            TransferEngine::plain(SECTOR)
        };
        Device::new(0, 8 * SECTOR, engine, Duration::from_secs(30)).unwrap()
    }

    type Log = Arc<Mutex<Vec<(u64, u64, bool, bool)>>>;

    fn recorder(log: &Log) -> impl Fn(Completion) + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |c: Completion| {
            log.lock()
                .unwrap()
                .push((c.tag, c.sectors, c.result.is_ok(), c.done))
        }
    }

    #[test]
    fn test_mode_mapping() {
        for mode in [RequestMode::Simple, RequestMode::Full, RequestMode::NoQueue] {
            assert_eq!(Dispatcher::for_mode(mode).mode(), mode);
        }
        assert!(Dispatcher::Simple.uses_queue());
        assert!(Dispatcher::Full.uses_queue());
        assert!(!Dispatcher::Direct.uses_queue());
    }

    #[test]
    fn test_simple_completes_per_segment() {
        let dev = device(true);
        let log: Log = Arc::default();
        let mut a = vec![0x11u8; SECTOR];
        let mut b = vec![0x22u8; 2 * SECTOR];

        let request = Request::write(1)
            .with_segment(0, 1, &mut a)
            .with_segment(4, 2, &mut b)
            .on_complete(recorder(&log));
        let stats = Dispatcher::Simple.submit(&dev, [request]);

        assert_eq!(
            *log.lock().unwrap(),
            vec![(1, 1, true, false), (1, 2, true, true)]
        );
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.completions, 2);
        assert_eq!(stats.sectors, 3);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn test_simple_finishes_request_before_next() {
        let dev = device(false);
        let log: Log = Arc::default();
        let mut a = vec![1u8; SECTOR];
        let mut b = vec![2u8; SECTOR];
        let mut c = vec![3u8; SECTOR];

        let first = Request::write(1)
            .with_segment(0, 1, &mut a)
            .with_segment(1, 1, &mut b)
            .on_complete(recorder(&log));
        let second = Request::write(2)
            .with_segment(2, 1, &mut c)
            .on_complete(recorder(&log));
        Dispatcher::Simple.submit(&dev, [first, second]);

        let tags: Vec<u64> = log.lock().unwrap().iter().map(|e| e.0).collect();
        assert_eq!(tags, vec![1, 1, 2]);
    }

    #[test]
    fn test_full_completes_once() {
        let dev = device(true);
        let log: Log = Arc::default();
        let mut a = vec![0x11u8; SECTOR];
        let mut b = vec![0x22u8; 2 * SECTOR];

        let request = Request::write(9)
            .with_segment(0, 1, &mut a)
            .with_segment(4, 2, &mut b)
            .on_complete(recorder(&log));
        let stats = Dispatcher::Full.submit(&dev, [request]);

        assert_eq!(*log.lock().unwrap(), vec![(9, 3, true, true)]);
        assert_eq!(stats.completions, 1);
        assert_eq!(stats.sectors, 3);
    }

    #[test]
    fn test_direct_completes_per_unit() {
        let dev = device(true);
        let log: Log = Arc::default();
        let mut a = vec![0x33u8; SECTOR];
        let mut b = vec![0x44u8; SECTOR];

        let unit = IoUnit::contiguous(3, Direction::Write, 2, SECTOR, vec![&mut a[..], &mut b[..]])
            .unwrap()
            .on_complete(recorder(&log));
        let stats = Dispatcher::Direct.make_request(&dev, unit);

        assert_eq!(*log.lock().unwrap(), vec![(3, 2, true, true)]);
        assert_eq!(stats.requests, 1);

        let mut out = vec![0u8; 2 * SECTOR];
        dev.transfer(2, 2, &mut out, Direction::Read).unwrap();
        assert!(out[..SECTOR].iter().all(|&b| b == 0x33));
        assert!(out[SECTOR..].iter().all(|&b| b == 0x44));
    }

    #[test]
    fn test_unsupported_request_skipped() {
        for dispatcher in [Dispatcher::Simple, Dispatcher::Full, Dispatcher::Direct] {
            let dev = device(false);
            let log: Log = Arc::default();
            let mut junk = vec![0xEEu8; SECTOR];
            let mut good = vec![0x01u8; SECTOR];

            let packet = Request::write(1)
                .with_kind(RequestKind::Packet)
                .with_segment(0, 1, &mut junk)
                .on_complete(recorder(&log));
            let fs = Request::write(2)
                .with_segment(1, 1, &mut good)
                .on_complete(recorder(&log));
            let stats = dispatcher.submit(&dev, [packet, fs]);

            assert_eq!(
                *log.lock().unwrap(),
                vec![(1, 0, false, true), (2, 1, true, true)],
                "{:?}",
                dispatcher
            );
            assert_eq!(stats.failed, 1);
            assert_eq!(stats.requests, 2);

            // The packet request never touched the store
            let raw = dev.snapshot();
            assert!(raw[..SECTOR].iter().all(|&b| b == 0));
            assert!(raw[SECTOR..2 * SECTOR].iter().all(|&b| b == 0x01));
        }
    }

    #[test]
    fn test_out_of_range_fails_only_that_request() {
        for dispatcher in [Dispatcher::Simple, Dispatcher::Full, Dispatcher::Direct] {
            let dev = device(true);
            let log: Log = Arc::default();
            let mut far = vec![0xAAu8; 2 * SECTOR];
            let mut near = vec![0xBBu8; SECTOR];

            let bad = Request::write(1)
                .with_segment(7, 2, &mut far)
                .on_complete(recorder(&log));
            let good = Request::write(2)
                .with_segment(0, 1, &mut near)
                .on_complete(recorder(&log));
            dispatcher.submit(&dev, [bad, good]);

            let log = log.lock().unwrap();
            assert_eq!(log[0], (1, 0, false, true), "{:?}", dispatcher);
            assert_eq!(log[1], (2, 1, true, true), "{:?}", dispatcher);
        }
    }

    #[test]
    fn test_full_reports_first_error_but_transfers_rest() {
        let dev = device(false);
        let log: Log = Arc::default();
        let mut bad = vec![0xAAu8; SECTOR];
        let mut good = vec![0xBBu8; SECTOR];

        let request = Request::write(5)
            .with_segment(100, 1, &mut bad)
            .with_segment(3, 1, &mut good)
            .on_complete(recorder(&log));
        let stats = Dispatcher::Full.submit(&dev, [request]);

        assert_eq!(*log.lock().unwrap(), vec![(5, 1, false, true)]);
        assert_eq!(stats.failed, 1);
        assert!(dev.snapshot()[3 * SECTOR..4 * SECTOR].iter().all(|&b| b == 0xBB));
    }

    #[test]
    fn test_shared_handler_sees_every_request() {
        let dev = device(true);
        let log: Log = Arc::default();
        let handler: CompletionHandler<'_> = Arc::new(recorder(&log));
        let mut data = vec![0x5Au8; SECTOR];
        let mut out = vec![0u8; SECTOR];

        Dispatcher::Full.submit(
            &dev,
            [Request::write(1)
                .with_segment(0, 1, &mut data)
                .with_handler(Arc::clone(&handler))],
        );
        Dispatcher::Full.submit(
            &dev,
            [Request::read(2)
                .with_segment(0, 1, &mut out)
                .with_handler(handler)],
        );

        assert_eq!(
            *log.lock().unwrap(),
            vec![(1, 1, true, true), (2, 1, true, true)]
        );
        assert_eq!(out, data);
    }

    #[test]
    fn test_empty_request_completes() {
        for dispatcher in [Dispatcher::Simple, Dispatcher::Full, Dispatcher::Direct] {
            let dev = device(false);
            let log: Log = Arc::default();
            let request = Request::read(4).on_complete(recorder(&log));
            let stats = dispatcher.submit(&dev, [request]);
            assert_eq!(*log.lock().unwrap(), vec![(4, 0, true, true)]);
            assert_eq!(stats.requests, 1);
        }
    }

    #[test]
    fn test_read_back_through_dispatch() {
        for dispatcher in [Dispatcher::Simple, Dispatcher::Full, Dispatcher::Direct] {
            let dev = device(true);
            let mut data = vec![0xABu8; SECTOR];
            dispatcher.submit(&dev, [Request::write(1).with_segment(0, 1, &mut data)]);

            let mut out = vec![0u8; SECTOR];
            dispatcher.submit(&dev, [Request::read(2).with_segment(0, 1, &mut out)]);
            assert_eq!(out, vec![0xABu8; SECTOR]);
        }
    }

    #[test]
    fn test_stats_merge() {
        let mut a = DispatchStats {
            requests: 1,
            completions: 2,
            failed: 0,
            sectors: 3,
        };
        a.merge(DispatchStats {
            requests: 1,
            completions: 1,
            failed: 1,
            sectors: 0,
        });
        assert_eq!(
            a,
            DispatchStats {
                requests: 2,
                completions: 3,
                failed: 1,
                sectors: 3
            }
        );
    }
}
