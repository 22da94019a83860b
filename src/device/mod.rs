// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Encrypted ramdisk device
//!
//! A [`Device`] owns a fixed-size backing store, a user count, a simulated
//! media-change flag and an idle timer. All mutable state sits behind one
//! per-device lock; transfers on the same device are serialized, transfers
//! on different devices run independently.
//!
//! ## Lifecycle
//!
//! ```text
//!            open                      open
//!  Closed(0) ----> Open(1) --- ... ---> Open(n)
//!     ^               |  close               |
//!     |  idle delay   v                      |
//!  MediaInvalidated <- Closed(0) <-----------+
//!     |
//!     +-- open: revalidate (zero the store), then Open(1)
//! ```
//!
//! The idle timer holds only a weak reference to the device state, and
//! dropping a device cancels the timer synchronously before the backing
//! store is released.

pub mod geometry;
pub mod timer;
pub mod transfer;


use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::DEVICE_NAME_PREFIX;
use crate::error::{RamdiskError, Result};
pub use geometry::{HdGeometry, IoctlCommand, HDIO_GETGEO};
use timer::IdleTimer;
pub use transfer::{Direction, TransferEngine, TransformMode};

/// Mutable device state, guarded by the device lock.
struct DeviceState {
    data: Vec<u8>,
    users: u32,
    media_changed: bool,
    /// Bumped on every timer arm; a firing whose generation is stale is ignored.
    timer_generation: u64,
}

/// State shared with the idle timer thread.
struct DeviceShared {
    name: String,
    capacity: usize,
    state: Mutex<DeviceState>,
}

impl DeviceShared {
    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Idle timer expiry: flag a media change if nobody has the device open.
    fn idle_timeout(shared: &Weak<DeviceShared>, generation: u64) {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let mut state = shared.lock();

        if state.timer_generation != generation {
            debug!("{}: ignoring superseded idle timer", shared.name);
            return;
        }
        if state.users > 0 {
            warn!(
                "{}: timer sanity check failed, fired with {} users",
                shared.name, state.users
            );
            return;
        }

        state.media_changed = true;
        info!("{}: idle timeout, simulating media change", shared.name);
    }
}

/// Point-in-time view of a device, for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub capacity_bytes: usize,
    pub sector_size: usize,
    pub users: u32,
    pub media_changed: bool,
    pub geometry: HdGeometry,
}

/// One memory-backed, transparently encrypted block device.
pub struct Device {
    index: usize,
    shared: Arc<DeviceShared>,
    engine: TransferEngine,
    timer: IdleTimer,
}

/// Name for the device at `index`: `ramdiska`, `ramdiskb`, ...
pub fn device_name(index: usize) -> String {
    match u8::try_from(index) {
        Ok(i) if i < 26 => format!("{}{}", DEVICE_NAME_PREFIX, (b'a' + i) as char),
        _ => format!("{}{}", DEVICE_NAME_PREFIX, index),
    }
}

impl Device {
    /// Allocates a zeroed backing store of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RamdiskError::AllocationFailure`] if the store cannot be
    /// allocated.
    pub fn new(
        index: usize,
        capacity: usize,
        engine: TransferEngine,
        invalidate_delay: Duration,
    ) -> Result<Self> {
        let name = device_name(index);

        let mut data = Vec::new();
        if data.try_reserve_exact(capacity).is_err() {
            error!("{}: allocation of {} bytes failed", name, capacity);
            return Err(RamdiskError::AllocationFailure {
                device: name,
                bytes: capacity,
            });
        }
        data.resize(capacity, 0);

        let shared = Arc::new(DeviceShared {
            name: name.clone(),
            capacity,
            state: Mutex::new(DeviceState {
                data,
                users: 0,
                media_changed: false,
                timer_generation: 0,
            }),
        });

        debug!("{}: {} bytes, {:?}", name, capacity, engine);

        Ok(Self {
            index,
            shared,
            engine,
            timer: IdleTimer::new(name, invalidate_delay),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn capacity_bytes(&self) -> usize {
        self.shared.capacity
    }

    pub fn sector_size(&self) -> usize {
        self.engine.sector_size()
    }

    /// Capacity in device sectors.
    pub fn capacity_sectors(&self) -> u64 {
        (self.shared.capacity / self.engine.sector_size()) as u64
    }

    pub fn is_encrypted(&self) -> bool {
        self.engine.is_encrypted()
    }

    /// Number of current users.
    pub fn users(&self) -> u32 {
        self.shared.lock().users
    }

    /// Whether a simulated media change is pending.
    pub fn media_changed(&self) -> bool {
        self.shared.lock().media_changed
    }

    /// Whether the idle timer is counting down.
    pub fn idle_timer_armed(&self) -> bool {
        self.timer.is_armed()
    }

    /// Opens the device for one more user.
    ///
    /// The first opener after a media change gets a freshly zeroed store.
    pub fn open(&self) -> Result<()> {
        // Outside the lock: the timer callback takes it.
        self.timer.cancel();

        let mut state = self.shared.lock();
        if state.users == 0 {
            revalidate_locked(&self.shared.name, &mut state);
        }
        state.users = state.users.checked_add(1).ok_or_else(|| {
            RamdiskError::LifecycleViolation(format!("{}: user count overflow", self.name()))
        })?;

        debug!("{}: opened, {} users", self.name(), state.users);
        Ok(())
    }

    /// Drops one user. The last one out arms the idle timer.
    ///
    /// # Errors
    ///
    /// - [`RamdiskError::LifecycleViolation`] if nobody has the device open
    /// - [`RamdiskError::Io`] if the idle timer thread cannot be spawned; the
    ///   user is still dropped but no media change will be simulated
    pub fn release(&self) -> Result<()> {
        let mut state = self.shared.lock();
        if state.users == 0 {
            warn!("{}: release without a matching open", self.name());
            return Err(RamdiskError::LifecycleViolation(format!(
                "{}: release with no users",
                self.name()
            )));
        }

        state.users -= 1;
        debug!("{}: released, {} users", self.name(), state.users);

        if state.users == 0 {
            state.timer_generation = state.timer_generation.wrapping_add(1);
            let generation = state.timer_generation;
            let weak = Arc::downgrade(&self.shared);
            self.timer
                .arm(move || DeviceShared::idle_timeout(&weak, generation))
                .map_err(|e| {
                    error!("{}: failed to arm idle timer: {}", self.name(), e);
                    e
                })?;
        }
        Ok(())
    }

    /// Clears a pending media change and zeroes the store.
    ///
    /// Returns whether anything was done; a second call is a no-op.
    pub fn revalidate(&self) -> bool {
        let mut state = self.shared.lock();
        revalidate_locked(&self.shared.name, &mut state)
    }

    /// Geometry for the `HDIO_GETGEO` query.
    pub fn geometry(&self) -> HdGeometry {
        HdGeometry::for_capacity(self.shared.capacity)
    }

    /// Handles a control request.
    ///
    /// # Errors
    ///
    /// - [`RamdiskError::UnknownIoctl`] for unrecognized commands
    /// - [`RamdiskError::InvalidArgument`] if `out` is missing
    pub fn ioctl(&self, cmd: u32, out: Option<&mut HdGeometry>) -> Result<()> {
        match IoctlCommand::from_raw(cmd)? {
            IoctlCommand::GetGeometry => {
                let out = out.ok_or_else(|| {
                    RamdiskError::InvalidArgument("no geometry buffer supplied".to_string())
                })?;
                *out = self.geometry();
                Ok(())
            }
        }
    }

    /// Transfers `sector_count` sectors starting at `start_sector`.
    ///
    /// Holds the device lock for the duration of the copy/cipher work.
    pub fn transfer(
        &self,
        start_sector: u64,
        sector_count: u64,
        buffer: &mut [u8],
        direction: Direction,
    ) -> Result<()> {
        let mut state = self.shared.lock();
        self.engine
            .transfer(&mut state.data, start_sector, sector_count, buffer, direction)
            .map_err(|e| {
                warn!("{}: {}", self.name(), e);
                e
            })
    }

    /// Copy of the raw (possibly encrypted) backing store.
    pub fn snapshot(&self) -> Vec<u8> {
        self.shared.lock().data.clone()
    }

    pub fn info(&self) -> DeviceInfo {
        let state = self.shared.lock();
        DeviceInfo {
            index: self.index,
            name: self.shared.name.clone(),
            capacity_bytes: self.shared.capacity,
            sector_size: self.engine.sector_size(),
            users: state.users,
            media_changed: state.media_changed,
            geometry: self.geometry(),
        }
    }
}

fn revalidate_locked(name: &str, state: &mut DeviceState) -> bool {
    if !state.media_changed {
        return false;
    }
    state.media_changed = false;
    state.data.fill(0);
    info!("{}: revalidated, store cleared", name);
    true
}

impl Drop for Device {
    fn drop(&mut self) {
        // The timer must be gone before the store is released.
        self.timer.cancel();
        debug!("{}: released backing store", self.name());
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("index", &self.index)
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.capacity)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
