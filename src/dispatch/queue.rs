// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Host-side request queue.
//!
//! Stands in for the host's block layer: requests are pushed at the back
//! and fetched from the front. A request that still has segments left after
//! a partial completion goes back to the front.

use std::collections::VecDeque;

use super::request::Request;

/// FIFO of pending requests for one device.
#[derive(Debug, Default)]
pub struct RequestQueue<'a> {
    pending: VecDeque<Request<'a>>,
}

impl<'a> RequestQueue<'a> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    pub fn push(&mut self, request: Request<'a>) {
        self.pending.push_back(request);
    }

    /// Takes the next request.
    pub fn fetch(&mut self) -> Option<Request<'a>> {
        self.pending.pop_front()
    }

    /// Puts a partially completed request back at the head.
    pub fn requeue(&mut self, request: Request<'a>) {
        self.pending.push_front(request);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<'a> FromIterator<Request<'a>> for RequestQueue<'a> {
    fn from_iter<I: IntoIterator<Item = Request<'a>>>(iter: I) -> Self {
        Self {
            pending: iter.into_iter().collect(),
        }
    }
}
