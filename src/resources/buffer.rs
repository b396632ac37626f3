//! Typed compute buffers.

use std::marker::PhantomData;

use bytemuck::Pod;

use crate::backend::GpuBackend;
use crate::error::{ComputeError, Result};
use crate::types::{BufferFlags, ResourceDescriptor, ResourceKind};

use super::ResourceHandle;

/// A buffer of `len` elements of `T`, with optional staging regions.
///
/// The device region always exists. An upload region exists iff the buffer
/// was created with [`BufferFlags::HOST_WRITABLE`], a readback region iff it
/// was created with [`BufferFlags::HOST_READABLE`]. The shape never changes.
///
/// Buffers are created by [`ComputeContext::create_buffer`](crate::ComputeContext::create_buffer).
///
/// # Example
///
/// ```ignore
/// let mut data = ctx.create_buffer::<f32>(1024, BufferFlags::HOST_READ_WRITE)?;
/// assert_eq!(data.byte_size(), 4096);
/// ```
pub struct TypedBuffer<T: Pod> {
    len: usize,
    flags: BufferFlags,
    label: Option<String>,
    device: ResourceHandle,
    upload: Option<ResourceHandle>,
    readback: Option<ResourceHandle>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Pod> TypedBuffer<T> {
    /// Allocate every region the flags ask for.
    pub(crate) fn new(
        backend: &dyn GpuBackend,
        len: usize,
        flags: BufferFlags,
        label: Option<String>,
        max_buffer_size: u64,
    ) -> Result<Self> {
        let byte_size = Self::checked_byte_size(len, max_buffer_size)?;

        let allocate = |kind: ResourceKind| -> Result<ResourceHandle> {
            let mut descriptor = ResourceDescriptor::new(byte_size, kind);
            if let Some(label) = &label {
                descriptor = descriptor.with_label(format!("{label} ({})", kind.label()));
            }
            let gpu = backend.create_resource(&descriptor)?;
            Ok(ResourceHandle::new(gpu, kind, byte_size, descriptor.label))
        };

        let device = allocate(flags.device_kind())?;
        let upload = flags
            .contains(BufferFlags::HOST_WRITABLE)
            .then(|| allocate(ResourceKind::Upload))
            .transpose()?;
        let readback = flags
            .contains(BufferFlags::HOST_READABLE)
            .then(|| allocate(ResourceKind::Readback))
            .transpose()?;

        log::debug!(
            "created buffer {:?}: {} x {} bytes, flags {:?}",
            label,
            len,
            std::mem::size_of::<T>(),
            flags
        );

        Ok(Self {
            len,
            flags,
            label,
            device,
            upload,
            readback,
            _marker: PhantomData,
        })
    }

    fn checked_byte_size(len: usize, max_buffer_size: u64) -> Result<u64> {
        let element = std::mem::size_of::<T>();
        if element == 0 {
            return Err(ComputeError::InvalidBufferSize(
                "element type has zero size".into(),
            ));
        }
        if len == 0 {
            return Err(ComputeError::InvalidBufferSize(
                "buffer length must be at least 1".into(),
            ));
        }
        let bytes = len
            .checked_mul(element)
            .and_then(|b| u64::try_from(b).ok())
            .ok_or_else(|| {
                ComputeError::InvalidBufferSize(format!(
                    "{len} elements of {element} bytes overflow"
                ))
            })?;
        if bytes > max_buffer_size {
            return Err(ComputeError::InvalidBufferSize(format!(
                "{bytes} bytes exceeds the maximum buffer size of {max_buffer_size} bytes"
            )));
        }
        Ok(bytes)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always `false`; buffers hold at least one element.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of each region in bytes.
    pub fn byte_size(&self) -> u64 {
        self.device.size()
    }

    /// Role flags the buffer was created with.
    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    /// Debug label, if set.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Device region.
    pub fn device(&self) -> &ResourceHandle {
        &self.device
    }

    /// Upload staging region, if the buffer is host-writable.
    pub fn upload(&self) -> Option<&ResourceHandle> {
        self.upload.as_ref()
    }

    /// Readback staging region, if the buffer is host-readable.
    pub fn readback(&self) -> Option<&ResourceHandle> {
        self.readback.as_ref()
    }
}

impl<T: Pod> std::fmt::Debug for TypedBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedBuffer")
            .field("element", &std::any::type_name::<T>())
            .field("len", &self.len)
            .field("flags", &self.flags)
            .field("label", &self.label)
            .field("device", &self.device)
            .field("upload", &self.upload)
            .field("readback", &self.readback)
            .finish()
    }
}

static_assertions::assert_impl_all!(TypedBuffer<u32>: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::state::ResourceState;

    const MAX: u64 = 1 << 30;

    #[test]
    fn test_regions_follow_flags() {
        let backend = SoftwareBackend::new();

        let plain = TypedBuffer::<u32>::new(&backend, 16, BufferFlags::empty(), None, MAX).unwrap();
        assert!(plain.upload().is_none());
        assert!(plain.readback().is_none());
        assert_eq!(plain.device().kind(), ResourceKind::DeviceReadWrite);
        assert_eq!(plain.byte_size(), 64);

        let both =
            TypedBuffer::<u32>::new(&backend, 16, BufferFlags::HOST_READ_WRITE, None, MAX).unwrap();
        assert_eq!(both.upload().unwrap().kind(), ResourceKind::Upload);
        assert_eq!(both.readback().unwrap().kind(), ResourceKind::Readback);
        assert_eq!(both.upload().unwrap().size(), 64);
        assert_eq!(both.readback().unwrap().state(), ResourceState::CopyDestination);
    }

    #[test]
    fn test_constant_buffer() {
        let backend = SoftwareBackend::new();
        let buffer = TypedBuffer::<f32>::new(
            &backend,
            1,
            BufferFlags::DEVICE_CONSTANT | BufferFlags::HOST_WRITABLE,
            Some("params".into()),
            MAX,
        )
        .unwrap();
        assert_eq!(buffer.device().kind(), ResourceKind::DeviceConstant);
        assert_eq!(buffer.device().label(), Some("params (constant)"));
        assert_eq!(buffer.upload().unwrap().label(), Some("params (upload)"));
        assert!(buffer.readback().is_none());
    }

    #[test]
    fn test_invalid_sizes() {
        let backend = SoftwareBackend::new();
        assert!(matches!(
            TypedBuffer::<u32>::new(&backend, 0, BufferFlags::empty(), None, MAX),
            Err(ComputeError::InvalidBufferSize(_))
        ));
        assert!(matches!(
            TypedBuffer::<()>::new(&backend, 4, BufferFlags::empty(), None, MAX),
            Err(ComputeError::InvalidBufferSize(_))
        ));
        assert!(matches!(
            TypedBuffer::<u64>::new(&backend, usize::MAX, BufferFlags::empty(), None, MAX),
            Err(ComputeError::InvalidBufferSize(_))
        ));
        assert!(matches!(
            TypedBuffer::<u32>::new(&backend, 1024, BufferFlags::empty(), None, 1024),
            Err(ComputeError::InvalidBufferSize(_))
        ));
    }

    #[test]
    fn test_buffer_debug() {
        let backend = SoftwareBackend::new();
        let buffer =
            TypedBuffer::<u32>::new(&backend, 4, BufferFlags::HOST_WRITABLE, None, MAX).unwrap();
        let debug = format!("{:?}", buffer);
        assert!(debug.contains("TypedBuffer"));
        assert!(debug.contains("u32"));
    }
}
