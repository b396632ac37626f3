//! Scoped host views over staging regions.
//!
//! A view maps a staging region for its whole lifetime and unmaps it exactly
//! once, on [`close`](WriteView::close) or when dropped. Views borrow their
//! buffer mutably and the context immutably, so no command can be recorded
//! and no flush can happen while a view is open.
//!
//! Writes through a [`WriteView`] reach the device only after the buffer is
//! uploaded again.

use std::ops::{Deref, DerefMut};

use bytemuck::Pod;

use crate::backend::GpuBackend;
use crate::error::Result;

use super::ResourceHandle;

/// Open mapping of one staging resource.
struct Mapping<'a> {
    backend: &'a dyn GpuBackend,
    handle: &'a ResourceHandle,
}

impl Mapping<'_> {
    fn release(self) {
        log::trace!("unmapping resource {}", self.handle.id());
        self.backend.unmap(self.handle.gpu());
    }
}

/// Map `handle` and view it as a slice of `T`.
///
/// Returns `None` (with the resource unmapped again) if the mapped memory
/// cannot hold a `[T]`.
fn map_slice<'a, T: Pod>(
    backend: &'a dyn GpuBackend,
    handle: &'a ResourceHandle,
) -> Result<Option<(Mapping<'a>, &'a mut [T])>> {
    let region = backend.map(handle.gpu())?;
    let mapping = Mapping { backend, handle };

    // SAFETY: the region stays mapped until `mapping` is released, and the
    // exclusive borrow of the owning buffer prevents any other view of it.
    let bytes: &'a mut [u8] = unsafe { region.bytes_mut() };
    match bytemuck::try_cast_slice_mut::<u8, T>(bytes) {
        Ok(data) => Ok(Some((mapping, data))),
        Err(e) => {
            log::error!(
                "resource {} cannot be viewed as [{}]: {:?}",
                handle.id(),
                std::any::type_name::<T>(),
                e
            );
            mapping.release();
            Ok(None)
        }
    }
}

/// Read-write view over an upload staging region.
///
/// Dereferences to `[T]`, so indexing is bounds-checked like any slice.
/// A view over a buffer without an upload region is empty.
pub struct WriteView<'a, T: Pod> {
    data: &'a mut [T],
    mapping: Option<Mapping<'a>>,
}

impl<'a, T: Pod> WriteView<'a, T> {
    pub(crate) fn open(backend: &'a dyn GpuBackend, upload: Option<&'a ResourceHandle>) -> Result<Self> {
        let Some(handle) = upload else {
            return Ok(Self::empty());
        };
        Ok(match map_slice(backend, handle)? {
            Some((mapping, data)) => Self {
                data,
                mapping: Some(mapping),
            },
            None => Self::empty(),
        })
    }

    fn empty() -> Self {
        Self {
            data: &mut [],
            mapping: None,
        }
    }

    /// Whether the view maps memory. Empty views have length zero.
    pub fn is_valid(&self) -> bool {
        self.mapping.is_some()
    }

    pub fn as_slice(&self) -> &[T] {
        self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.data
    }

    /// Unmap the region. Calling it again does nothing.
    pub fn close(&mut self) {
        if let Some(mapping) = self.mapping.take() {
            self.data = &mut [];
            mapping.release();
        }
    }
}

impl<T: Pod> Deref for WriteView<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.data
    }
}

impl<T: Pod> DerefMut for WriteView<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.data
    }
}

impl<T: Pod> Drop for WriteView<'_, T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: Pod + std::fmt::Debug> std::fmt::Debug for WriteView<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteView")
            .field("valid", &self.is_valid())
            .field("len", &self.data.len())
            .finish()
    }
}

/// Read-only view over a readback staging region.
///
/// Dereferences to `[T]`. A view over a buffer without a readback region is
/// empty.
pub struct ReadView<'a, T: Pod> {
    data: &'a [T],
    mapping: Option<Mapping<'a>>,
}

impl<'a, T: Pod> ReadView<'a, T> {
    pub(crate) fn open(
        backend: &'a dyn GpuBackend,
        readback: Option<&'a ResourceHandle>,
    ) -> Result<Self> {
        let Some(handle) = readback else {
            return Ok(Self::empty());
        };
        Ok(match map_slice::<T>(backend, handle)? {
            Some((mapping, data)) => Self {
                data,
                mapping: Some(mapping),
            },
            None => Self::empty(),
        })
    }

    fn empty() -> Self {
        Self {
            data: &[],
            mapping: None,
        }
    }

    /// Whether the view maps memory. Empty views have length zero.
    pub fn is_valid(&self) -> bool {
        self.mapping.is_some()
    }

    pub fn as_slice(&self) -> &[T] {
        self.data
    }

    /// Unmap the region. Calling it again does nothing.
    pub fn close(&mut self) {
        if let Some(mapping) = self.mapping.take() {
            self.data = &[];
            mapping.release();
        }
    }
}

impl<T: Pod> Deref for ReadView<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.data
    }
}

impl<T: Pod> Drop for ReadView<'_, T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: Pod + std::fmt::Debug> std::fmt::Debug for ReadView<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadView")
            .field("valid", &self.is_valid())
            .field("len", &self.data.len())
            .finish()
    }
}
