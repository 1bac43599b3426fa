//! Views over linear memory.
//!
//! A [`MemoryRegion`] is the growable byte buffer itself; a [`MemoryView`]
//! reads and writes fixed-width scalars in it. Two views share one contract:
//!
//! - [`NativeView`] composes scalars with the host's native byte order.
//!   WebAssembly memory is little-endian, so this is only correct on
//!   little-endian hosts.
//! - [`LittleEndianView`] composes every scalar explicitly in little-endian
//!   order and is correct everywhere.
//!
//! A view over an instance's memory borrows the instance mutably, so no guest
//! call that could grow memory runs while the view is alive. Reacquire a view
//! after any operation that may allocate.

use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use wasmbind_types::abi::PAGE_SIZE;
use wasmbind_types::{Scalar, ScalarKind};
use wasmi::{Memory, Store};

use crate::config::AccessStyle;
use crate::error::{BindError, BindResult};

// ══════════════════════════════════════════════════════════════════════════════
// Regions
// ══════════════════════════════════════════════════════════════════════════════

/// A contiguous, growable byte buffer.
pub trait MemoryRegion {
    fn bytes(&self) -> &[u8];
    fn bytes_mut(&mut self) -> &mut [u8];
    /// Grow by whole pages; returns the previous size in pages.
    fn grow_pages(&mut self, pages: u32) -> Result<u32, String>;
}

/// A host-owned region, used where no instance is involved.
#[derive(Debug, Clone, Default)]
pub struct VecRegion {
    data: Vec<u8>,
}

impl VecRegion {
    /// A zeroed region of `pages` pages.
    pub fn with_pages(pages: u32) -> Self {
        Self {
            data: vec![0; pages as usize * PAGE_SIZE as usize],
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl MemoryRegion for VecRegion {
    fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn grow_pages(&mut self, pages: u32) -> Result<u32, String> {
        let previous = (self.data.len() / PAGE_SIZE as usize) as u32;
        let new_len = (previous as usize + pages as usize) * PAGE_SIZE as usize;
        self.data.resize(new_len, 0);
        Ok(previous)
    }
}

/// The exported memory of a live instance.
pub struct LinearRegion<'a> {
    memory: Memory,
    store: &'a mut Store<()>,
}

impl<'a> LinearRegion<'a> {
    pub fn new(memory: Memory, store: &'a mut Store<()>) -> Self {
        Self { memory, store }
    }
}

impl MemoryRegion for LinearRegion<'_> {
    fn bytes(&self) -> &[u8] {
        self.memory.data(&*self.store)
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut *self.store)
    }

    fn grow_pages(&mut self, pages: u32) -> Result<u32, String> {
        self.memory
            .grow(&mut *self.store, pages.into())
            .map(|previous| previous as u32)
            .map_err(|e| e.to_string())
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Views
// ══════════════════════════════════════════════════════════════════════════════

/// Scalar and byte access to a region. Out-of-range accesses fail with
/// [`BindError::OutOfBounds`].
pub trait MemoryView {
    /// Current region length in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_bytes(&self, offset: u32, len: u32) -> BindResult<Vec<u8>>;
    fn write_bytes(&mut self, offset: u32, bytes: &[u8]) -> BindResult<()>;
    fn read_scalar(&self, offset: u32, kind: ScalarKind) -> BindResult<Scalar>;
    fn write_scalar(&mut self, offset: u32, value: Scalar) -> BindResult<()>;

    /// Grow the region by whole pages until it holds at least `min_bytes`.
    ///
    /// Returns whether the region was reallocated.
    fn ensure_capacity(&mut self, min_bytes: u64) -> BindResult<bool>;
}

/// Build a boxed view of the configured style over `region`.
pub fn view_of<'a, R: MemoryRegion + 'a>(
    region: R,
    style: AccessStyle,
    max_pages: u32,
) -> Box<dyn MemoryView + 'a> {
    match style {
        AccessStyle::Native => Box::new(NativeView::new(region, max_pages)),
        AccessStyle::LittleEndian => Box::new(LittleEndianView::new(region, max_pages)),
    }
}

fn range(memory_len: usize, offset: u32, len: u64) -> BindResult<Range<usize>> {
    let start = offset as u64;
    let end = start + len;
    if end > memory_len as u64 {
        return Err(BindError::OutOfBounds {
            offset: start,
            len,
            memory_len,
        });
    }
    Ok(start as usize..end as usize)
}

fn grow_to<R: MemoryRegion>(region: &mut R, min_bytes: u64, max_pages: u32) -> BindResult<bool> {
    let current = region.bytes().len() as u64;
    if min_bytes <= current {
        return Ok(false);
    }
    let page = PAGE_SIZE as u64;
    let wanted_pages = min_bytes.div_ceil(page);
    if wanted_pages > max_pages as u64 {
        return Err(BindError::Allocation {
            requested: (min_bytes - current).min(u32::MAX as u64) as u32,
            reason: format!("{wanted_pages} pages exceeds the limit of {max_pages}"),
        });
    }
    let extra = (wanted_pages - current / page) as u32;
    region
        .grow_pages(extra)
        .map_err(|reason| BindError::Allocation {
            requested: (min_bytes - current) as u32,
            reason,
        })?;
    Ok(true)
}

fn copy_array<const N: usize>(src: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    buf.copy_from_slice(&src[..N]);
    buf
}

/// Native byte order access.
pub struct NativeView<R> {
    region: R,
    max_pages: u32,
}

impl<R: MemoryRegion> NativeView<R> {
    pub fn new(region: R, max_pages: u32) -> Self {
        Self { region, max_pages }
    }

    pub fn into_region(self) -> R {
        self.region
    }
}

impl<R: MemoryRegion> MemoryView for NativeView<R> {
    fn len(&self) -> usize {
        self.region.bytes().len()
    }

    fn read_bytes(&self, offset: u32, len: u32) -> BindResult<Vec<u8>> {
        let r = range(self.len(), offset, len as u64)?;
        Ok(self.region.bytes()[r].to_vec())
    }

    fn write_bytes(&mut self, offset: u32, bytes: &[u8]) -> BindResult<()> {
        let r = range(self.len(), offset, bytes.len() as u64)?;
        self.region.bytes_mut()[r].copy_from_slice(bytes);
        Ok(())
    }

    fn read_scalar(&self, offset: u32, kind: ScalarKind) -> BindResult<Scalar> {
        let r = range(self.len(), offset, kind.width() as u64)?;
        let src = &self.region.bytes()[r];
        Ok(match kind {
            ScalarKind::Bool => Scalar::Bool(src[0] != 0),
            ScalarKind::U8 => Scalar::U8(src[0]),
            ScalarKind::I8 => Scalar::I8(i8::from_ne_bytes(copy_array(src))),
            ScalarKind::U16 => Scalar::U16(u16::from_ne_bytes(copy_array(src))),
            ScalarKind::I16 => Scalar::I16(i16::from_ne_bytes(copy_array(src))),
            ScalarKind::U32 => Scalar::U32(u32::from_ne_bytes(copy_array(src))),
            ScalarKind::I32 => Scalar::I32(i32::from_ne_bytes(copy_array(src))),
            ScalarKind::I64 => Scalar::I64(i64::from_ne_bytes(copy_array(src))),
            ScalarKind::F32 => Scalar::F32(f32::from_ne_bytes(copy_array(src))),
            ScalarKind::F64 => Scalar::F64(f64::from_ne_bytes(copy_array(src))),
        })
    }

    fn write_scalar(&mut self, offset: u32, value: Scalar) -> BindResult<()> {
        match value {
            Scalar::Bool(v) => self.write_bytes(offset, &[u8::from(v)]),
            Scalar::U8(v) => self.write_bytes(offset, &[v]),
            Scalar::I8(v) => self.write_bytes(offset, &v.to_ne_bytes()),
            Scalar::U16(v) => self.write_bytes(offset, &v.to_ne_bytes()),
            Scalar::I16(v) => self.write_bytes(offset, &v.to_ne_bytes()),
            Scalar::U32(v) => self.write_bytes(offset, &v.to_ne_bytes()),
            Scalar::I32(v) => self.write_bytes(offset, &v.to_ne_bytes()),
            Scalar::I64(v) => self.write_bytes(offset, &v.to_ne_bytes()),
            Scalar::F32(v) => self.write_bytes(offset, &v.to_ne_bytes()),
            Scalar::F64(v) => self.write_bytes(offset, &v.to_ne_bytes()),
        }
    }

    fn ensure_capacity(&mut self, min_bytes: u64) -> BindResult<bool> {
        grow_to(&mut self.region, min_bytes, self.max_pages)
    }
}

/// Explicit little-endian access.
pub struct LittleEndianView<R> {
    region: R,
    max_pages: u32,
}

impl<R: MemoryRegion> LittleEndianView<R> {
    pub fn new(region: R, max_pages: u32) -> Self {
        Self { region, max_pages }
    }

    pub fn into_region(self) -> R {
        self.region
    }
}

impl<R: MemoryRegion> MemoryView for LittleEndianView<R> {
    fn len(&self) -> usize {
        self.region.bytes().len()
    }

    fn read_bytes(&self, offset: u32, len: u32) -> BindResult<Vec<u8>> {
        let r = range(self.len(), offset, len as u64)?;
        Ok(self.region.bytes()[r].to_vec())
    }

    fn write_bytes(&mut self, offset: u32, bytes: &[u8]) -> BindResult<()> {
        let r = range(self.len(), offset, bytes.len() as u64)?;
        self.region.bytes_mut()[r].copy_from_slice(bytes);
        Ok(())
    }

    fn read_scalar(&self, offset: u32, kind: ScalarKind) -> BindResult<Scalar> {
        let r = range(self.len(), offset, kind.width() as u64)?;
        let src = &self.region.bytes()[r];
        Ok(match kind {
            ScalarKind::Bool => Scalar::Bool(src[0] != 0),
            ScalarKind::U8 => Scalar::U8(src[0]),
            ScalarKind::I8 => Scalar::I8(src[0] as i8),
            ScalarKind::U16 => Scalar::U16(LittleEndian::read_u16(src)),
            ScalarKind::I16 => Scalar::I16(LittleEndian::read_i16(src)),
            ScalarKind::U32 => Scalar::U32(LittleEndian::read_u32(src)),
            ScalarKind::I32 => Scalar::I32(LittleEndian::read_i32(src)),
            ScalarKind::I64 => Scalar::I64(LittleEndian::read_i64(src)),
            ScalarKind::F32 => Scalar::F32(LittleEndian::read_f32(src)),
            ScalarKind::F64 => Scalar::F64(LittleEndian::read_f64(src)),
        })
    }

    fn write_scalar(&mut self, offset: u32, value: Scalar) -> BindResult<()> {
        let r = range(self.len(), offset, value.kind().width() as u64)?;
        let dst = &mut self.region.bytes_mut()[r];
        match value {
            Scalar::Bool(v) => dst[0] = u8::from(v),
            Scalar::U8(v) => dst[0] = v,
            Scalar::I8(v) => dst[0] = v as u8,
            Scalar::U16(v) => LittleEndian::write_u16(dst, v),
            Scalar::I16(v) => LittleEndian::write_i16(dst, v),
            Scalar::U32(v) => LittleEndian::write_u32(dst, v),
            Scalar::I32(v) => LittleEndian::write_i32(dst, v),
            Scalar::I64(v) => LittleEndian::write_i64(dst, v),
            Scalar::F32(v) => LittleEndian::write_f32(dst, v),
            Scalar::F64(v) => LittleEndian::write_f64(dst, v),
        }
        Ok(())
    }

    fn ensure_capacity(&mut self, min_bytes: u64) -> BindResult<bool> {
        grow_to(&mut self.region, min_bytes, self.max_pages)
    }
}
