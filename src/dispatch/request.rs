// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! I/O request data model
//!
//! A [`Request`] targets one device in one direction and carries an ordered
//! list of [`Segment`]s, each a run of sectors mapped onto a caller buffer.
//! Requests borrow their buffers, so they cannot outlive the call that
//! services them. An [`IoUnit`] is the same payload handed straight to the
//! direct-split discipline, bypassing any queue.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::device::Direction;
use crate::error::{RamdiskError, Result};

/// Request classification. Only filesystem I/O is serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Plain filesystem read/write.
    Fs,
    /// Packet command passthrough.
    Packet,
    /// Host-internal special request.
    Special,
    /// Driver-private command.
    DriverPrivate,
}

impl RequestKind {
    pub fn is_fs(&self) -> bool {
        matches!(self, Self::Fs)
    }
}

/// A contiguous run of sectors mapped to one buffer.
pub struct Segment<'a> {
    pub start_sector: u64,
    pub sector_count: u64,
    pub buffer: &'a mut [u8],
}

impl<'a> Segment<'a> {
    pub fn new(start_sector: u64, sector_count: u64, buffer: &'a mut [u8]) -> Self {
        Self {
            start_sector,
            sector_count,
            buffer,
        }
    }
}

impl fmt::Debug for Segment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("start_sector", &self.start_sector)
            .field("sector_count", &self.sector_count)
            .field("buffer_len", &self.buffer.len())
            .finish()
    }
}

/// Completion status reported back to the submitter.
#[derive(Debug)]
pub struct Completion {
    /// Caller-chosen request tag.
    pub tag: u64,
    /// Sectors successfully transferred by this completion.
    pub sectors: u64,
    /// Outcome of this completion.
    pub result: Result<()>,
    /// Whether the request has nothing left to complete.
    pub done: bool,
}

impl Completion {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Callback invoked for each completion of a request.
pub type CompletionHandler<'a> = Arc<dyn Fn(Completion) + Send + Sync + 'a>;

/// A queued I/O request.
pub struct Request<'a> {
    tag: u64,
    kind: RequestKind,
    direction: Direction,
    segments: VecDeque<Segment<'a>>,
    handler: Option<CompletionHandler<'a>>,
}

impl<'a> Request<'a> {
    /// Creates an empty filesystem request.
    pub fn new(tag: u64, direction: Direction) -> Self {
        Self {
            tag,
            kind: RequestKind::Fs,
            direction,
            segments: VecDeque::new(),
            handler: None,
        }
    }

    pub fn read(tag: u64) -> Self {
        Self::new(tag, Direction::Read)
    }

    pub fn write(tag: u64) -> Self {
        Self::new(tag, Direction::Write)
    }

    pub fn with_kind(mut self, kind: RequestKind) -> Self {
        self.kind = kind;
        self
    }

    /// Appends a segment.
    pub fn with_segment(mut self, start_sector: u64, sector_count: u64, buffer: &'a mut [u8]) -> Self {
        self.push_segment(Segment::new(start_sector, sector_count, buffer));
        self
    }

    pub fn push_segment(&mut self, segment: Segment<'a>) {
        self.segments.push_back(segment);
    }

    /// Installs a completion callback.
    pub fn on_complete<F>(mut self, handler: F) -> Self
    where
        F: Fn(Completion) + Send + Sync + 'a,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Installs a shared completion callback.
    pub fn with_handler(mut self, handler: CompletionHandler<'a>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Segments not yet serviced.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Sectors covered by the remaining segments.
    pub fn total_sectors(&self) -> u64 {
        self.segments.iter().map(|s| s.sector_count).sum()
    }

    /// Removes the current (first) segment.
    pub(crate) fn pop_segment(&mut self) -> Option<Segment<'a>> {
        self.segments.pop_front()
    }

    pub(crate) fn take_segments(&mut self) -> VecDeque<Segment<'a>> {
        std::mem::take(&mut self.segments)
    }

    /// Reports a completion to the submitter.
    pub(crate) fn complete(&self, sectors: u64, result: Result<()>, done: bool) {
        let completion = Completion {
            tag: self.tag,
            sectors,
            result,
            done,
        };
        match &self.handler {
            Some(handler) => handler(completion),
            None => debug!("request {} completed without a handler: {:?}", self.tag, completion),
        }
    }
}

impl fmt::Debug for Request<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("tag", &self.tag)
            .field("kind", &self.kind)
            .field("direction", &self.direction)
            .field("segments", &self.segments)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

/// A raw I/O unit for the direct-split discipline.
///
/// Unlike a queued request it is completed exactly once, after all of its
/// segments have been transferred.
#[derive(Debug)]
pub struct IoUnit<'a> {
    request: Request<'a>,
}

impl<'a> IoUnit<'a> {
    pub fn new(tag: u64, direction: Direction) -> Self {
        Self {
            request: Request::new(tag, direction),
        }
    }

    /// Builds a unit covering consecutive sectors from `start_sector`, one
    /// segment per buffer.
    ///
    /// # Errors
    ///
    /// Returns [`RamdiskError::InvalidArgument`] if a buffer is not a whole
    /// number of sectors.
    pub fn contiguous(
        tag: u64,
        direction: Direction,
        start_sector: u64,
        sector_size: usize,
        buffers: Vec<&'a mut [u8]>,
    ) -> Result<Self> {
        if sector_size == 0 {
            return Err(RamdiskError::InvalidArgument("sector size is zero".to_string()));
        }

        let mut unit = Self::new(tag, direction);
        let mut sector = start_sector;
        for buffer in buffers {
            if buffer.len() % sector_size != 0 {
                return Err(RamdiskError::InvalidArgument(format!(
                    "buffer of {} bytes is not a multiple of the {}-byte sector",
                    buffer.len(),
                    sector_size
                )));
            }
            let count = (buffer.len() / sector_size) as u64;
            unit.request.push_segment(Segment::new(sector, count, buffer));
            sector = sector.saturating_add(count);
        }
        Ok(unit)
    }

    pub fn with_kind(mut self, kind: RequestKind) -> Self {
        self.request = self.request.with_kind(kind);
        self
    }

    pub fn with_segment(mut self, start_sector: u64, sector_count: u64, buffer: &'a mut [u8]) -> Self {
        self.request = self.request.with_segment(start_sector, sector_count, buffer);
        self
    }

    pub fn on_complete<F>(mut self, handler: F) -> Self
    where
        F: Fn(Completion) + Send + Sync + 'a,
    {
        self.request = self.request.on_complete(handler);
        self
    }

    pub fn tag(&self) -> u64 {
        self.request.tag()
    }

    pub fn segment_count(&self) -> usize {
        self.request.segment_count()
    }

    pub fn total_sectors(&self) -> u64 {
        self.request.total_sectors()
    }

    pub(crate) fn into_request(self) -> Request<'a> {
        self.request
    }
}

impl<'a> From<Request<'a>> for IoUnit<'a> {
    fn from(request: Request<'a>) -> Self {
        Self { request }
    }
}
