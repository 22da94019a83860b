// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Simple discipline: one segment per iteration.
//!
//! Each pass takes the request at the head of the queue, transfers only its
//! current segment and completes that segment. A request with segments left
//! goes back to the head, so it is finished before the next one starts.

use super::queue::RequestQueue;
use super::{fail_unsupported, DispatchStats};
use crate::device::Device;

pub(super) fn service_queue(device: &Device, queue: &mut RequestQueue<'_>) -> DispatchStats {
    let mut stats = DispatchStats::default();

    while let Some(mut request) = queue.fetch() {
        if !request.kind().is_fs() {
            fail_unsupported(device, request, &mut stats);
            continue;
        }

        let Some(segment) = request.pop_segment() else {
            // Nothing (left) to transfer.
            stats.requests += 1;
            stats.record(0, true);
            request.complete(0, Ok(()), true);
            continue;
        };

        let result = device.transfer(
            segment.start_sector,
            segment.sector_count,
            segment.buffer,
            request.direction(),
        );
        let sectors = if result.is_ok() { segment.sector_count } else { 0 };
        let done = request.segment_count() == 0;

        stats.record(sectors, result.is_ok());
        request.complete(sectors, result, done);

        if done {
            stats.requests += 1;
        } else {
            queue.requeue(request);
        }
    }

    stats
}
