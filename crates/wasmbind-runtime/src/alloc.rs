//! Ownership tracking for guest buffers created during a call.
//!
//! Every buffer the codec allocates for an argument, and every buffer the
//! guest hands back through a result descriptor, is registered here as an
//! [`Ownership::Owned`] handle and freed exactly once when the call ends,
//! whether it succeeded or not.
//!
//! Handles are stamped with the memory epoch of the instance at the time they
//! were created. Offsets into linear memory survive growth, but a handle held
//! across a growth event must be [`refresh`](AllocationManager::refresh)ed
//! before it is used again; releasing a stale copy is a
//! [`BindError::DanglingHandle`].

use std::collections::HashSet;

use crate::error::{BindError, BindResult};

/// Who frees a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Caller-managed; never released by the manager.
    Borrowed,
    /// Created for the current call; freed after decode.
    Owned,
}

/// A tracked region of guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationHandle {
    id: u64,
    ptr: u32,
    len: u32,
    ownership: Ownership,
    epoch: u64,
}

impl AllocationHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn ptr(&self) -> u32 {
        self.ptr
    }

    /// Length in bytes.
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Memory epoch the handle was last validated against.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// One past the last byte.
    pub fn end(&self) -> u64 {
        self.ptr as u64 + self.len as u64
    }
}

/// The guest side of allocation: builtin exports plus growth bookkeeping.
pub trait GuestAllocator {
    /// Allocate `len` bytes; 0 means the guest could not serve the request.
    fn guest_alloc(&mut self, len: u32) -> BindResult<u32>;
    fn guest_dealloc(&mut self, ptr: u32, len: u32) -> BindResult<()>;
    /// Current memory epoch. Advances whenever memory has grown.
    fn memory_epoch(&mut self) -> u64;
    /// Current memory length in bytes.
    fn memory_len(&self) -> usize;
}

/// Tracks owned guest buffers and frees them exactly once.
#[derive(Debug, Default)]
pub struct AllocationManager {
    next_id: u64,
    /// Outstanding owned handles, in creation order.
    outstanding: Vec<AllocationHandle>,
    /// Ids released since the watermark last moved.
    released: HashSet<u64>,
    /// Every id below this has been released or dropped.
    released_below: u64,
    allocations: u64,
    releases: u64,
}

impl AllocationManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_released(&self, id: u64) -> bool {
        id < self.released_below || self.released.contains(&id)
    }

    fn next_handle(&mut self, ptr: u32, len: u32, ownership: Ownership, epoch: u64) -> AllocationHandle {
        let id = self.next_id;
        self.next_id += 1;
        AllocationHandle {
            id,
            ptr,
            len,
            ownership,
            epoch,
        }
    }

    /// Allocate `len` bytes in the guest and take ownership of them.
    pub fn allocate(
        &mut self,
        guest: &mut dyn GuestAllocator,
        len: u32,
    ) -> BindResult<AllocationHandle> {
        let ptr = guest.guest_alloc(len)?;
        if ptr == 0 {
            return Err(BindError::Allocation {
                requested: len,
                reason: "guest allocator returned null".to_string(),
            });
        }
        // stamped after the call: allocating may itself grow memory
        let epoch = guest.memory_epoch();
        let handle = self.next_handle(ptr, len, Ownership::Owned, epoch);
        self.outstanding.push(handle);
        self.allocations += 1;
        tracing::trace!(id = handle.id, ptr = handle.ptr, len, "allocated guest buffer");
        Ok(handle)
    }

    /// Take ownership of a buffer the guest allocated, e.g. a returned vector.
    pub fn adopt(&mut self, guest: &mut dyn GuestAllocator, ptr: u32, len: u32) -> AllocationHandle {
        let epoch = guest.memory_epoch();
        let handle = self.next_handle(ptr, len, Ownership::Owned, epoch);
        self.outstanding.push(handle);
        self.allocations += 1;
        tracing::trace!(id = handle.id, ptr, len, "adopted guest buffer");
        handle
    }

    /// Describe a caller-managed region. Not tracked, never released.
    pub fn borrow(&mut self, guest: &mut dyn GuestAllocator, ptr: u32, len: u32) -> AllocationHandle {
        let epoch = guest.memory_epoch();
        self.next_handle(ptr, len, Ownership::Borrowed, epoch)
    }

    /// Re-validate a handle against the current memory and restamp its epoch.
    pub fn refresh(
        &mut self,
        guest: &mut dyn GuestAllocator,
        handle: AllocationHandle,
    ) -> BindResult<AllocationHandle> {
        if handle.ownership == Ownership::Owned && self.is_released(handle.id) {
            return Err(BindError::DoubleFree {
                id: handle.id,
                ptr: handle.ptr,
            });
        }
        let memory_len = guest.memory_len();
        if handle.end() > memory_len as u64 {
            return Err(BindError::OutOfBounds {
                offset: handle.ptr as u64,
                len: handle.len as u64,
                memory_len,
            });
        }
        let refreshed = AllocationHandle {
            epoch: guest.memory_epoch(),
            ..handle
        };
        if let Some(slot) = self.outstanding.iter_mut().find(|h| h.id == handle.id) {
            *slot = refreshed;
        }
        Ok(refreshed)
    }

    /// Free an owned handle. Borrowed handles are ignored.
    pub fn release(
        &mut self,
        guest: &mut dyn GuestAllocator,
        handle: AllocationHandle,
    ) -> BindResult<()> {
        if handle.ownership == Ownership::Borrowed {
            return Ok(());
        }
        if self.is_released(handle.id) {
            return Err(BindError::DoubleFree {
                id: handle.id,
                ptr: handle.ptr,
            });
        }
        let current_epoch = guest.memory_epoch();
        if handle.epoch != current_epoch {
            return Err(BindError::DanglingHandle {
                id: handle.id,
                ptr: handle.ptr,
                handle_epoch: handle.epoch,
                current_epoch,
            });
        }
        let index = self
            .outstanding
            .iter()
            .position(|h| h.id == handle.id)
            .ok_or(BindError::DoubleFree {
                id: handle.id,
                ptr: handle.ptr,
            })?;

        self.outstanding.remove(index);
        self.released.insert(handle.id);
        self.releases += 1;
        tracing::trace!(id = handle.id, ptr = handle.ptr, len = handle.len, "released guest buffer");
        guest.guest_dealloc(handle.ptr, handle.len)
    }

    /// Release every outstanding handle, newest first.
    ///
    /// Keeps going after a failure and reports the first one.
    pub fn release_all(&mut self, guest: &mut dyn GuestAllocator) -> BindResult<()> {
        let mut first_error = None;
        while let Some(handle) = self.outstanding.last().copied() {
            let result = self
                .refresh(guest, handle)
                .and_then(|h| self.release(guest, h));
            if let Err(e) = result {
                // drop the record so the loop always makes progress
                self.outstanding.retain(|h| h.id != handle.id);
                first_error.get_or_insert(e);
            }
        }
        // nothing older is outstanding, so the set collapses into the watermark
        self.released_below = self.next_id;
        self.released.clear();
        first_error.map_or(Ok(()), Err)
    }

    /// Handles created so far (allocated or adopted).
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    pub fn releases(&self) -> u64 {
        self.releases
    }

    /// Owned handles not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}
