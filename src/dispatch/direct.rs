// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Direct-split discipline: no queue.
//!
//! Raw I/O units are handled as soon as they arrive. Each unit is split into
//! per-segment transfers on the spot and completed once.

use super::request::IoUnit;
use super::{fail_unsupported, transfer_segments, DispatchStats};
use crate::device::Device;

pub(super) fn make_request(device: &Device, unit: IoUnit<'_>) -> DispatchStats {
    let mut stats = DispatchStats::default();
    let mut request = unit.into_request();

    if !request.kind().is_fs() {
        fail_unsupported(device, request, &mut stats);
        return stats;
    }

    let direction = request.direction();
    let (sectors, result) = transfer_segments(device, direction, request.take_segments());

    stats.requests += 1;
    stats.record(sectors, result.is_ok());
    request.complete(sectors, result, true);
    stats
}
