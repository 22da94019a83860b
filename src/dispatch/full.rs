// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Full discipline: whole requests in one pass.
//!
//! Every segment of a request is transferred before the request is completed
//! with a single call, so the host sees one completion per request however
//! many segments the block layer clustered into it.

use super::queue::RequestQueue;
use super::{fail_unsupported, transfer_segments, DispatchStats};
use crate::device::Device;

pub(super) fn service_queue(device: &Device, queue: &mut RequestQueue<'_>) -> DispatchStats {
    let mut stats = DispatchStats::default();

    while let Some(mut request) = queue.fetch() {
        if !request.kind().is_fs() {
            fail_unsupported(device, request, &mut stats);
            continue;
        }

        let direction = request.direction();
        let (sectors, result) = transfer_segments(device, direction, request.take_segments());

        stats.requests += 1;
        stats.record(sectors, result.is_ok());
        request.complete(sectors, result, true);
    }

    stats
}
