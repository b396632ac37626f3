//! Buffer flags and memory classes.

use bitflags::bitflags;

bitflags! {
    /// Role flags chosen when a typed buffer is created.
    ///
    /// The device region always exists; the flags decide which staging
    /// regions are allocated next to it and what kind of device memory it uses.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferFlags: u32 {
        /// The host can read results through a readback staging region.
        const HOST_READABLE = 1 << 0;
        /// The host can fill the buffer through an upload staging region.
        const HOST_WRITABLE = 1 << 1;
        /// The device region holds small read-only constant data.
        const DEVICE_CONSTANT = 1 << 2;
    }
}

impl Default for BufferFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl BufferFlags {
    /// Both host staging directions.
    pub const HOST_READ_WRITE: Self = Self::HOST_READABLE.union(Self::HOST_WRITABLE);

    /// Memory class of the device region for these flags.
    pub fn device_kind(self) -> ResourceKind {
        if self.contains(Self::DEVICE_CONSTANT) {
            ResourceKind::DeviceConstant
        } else {
            ResourceKind::DeviceReadWrite
        }
    }
}

/// Memory class of a single device allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Device-local memory usable as a read-write shader binding.
    DeviceReadWrite,
    /// Device-local memory usable as a read-only constant binding.
    DeviceConstant,
    /// Host-visible memory the host writes and the device copies from.
    Upload,
    /// Host-visible memory the device copies into and the host reads.
    Readback,
}

impl ResourceKind {
    /// Whether the host can map this memory.
    pub fn is_host_visible(self) -> bool {
        matches!(self, Self::Upload | Self::Readback)
    }

    /// Short name used in logs and backend object labels.
    pub fn label(self) -> &'static str {
        match self {
            Self::DeviceReadWrite => "device",
            Self::DeviceConstant => "constant",
            Self::Upload => "upload",
            Self::Readback => "readback",
        }
    }
}

/// Descriptor for a single backend allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Memory class.
    pub kind: ResourceKind,
}

impl ResourceDescriptor {
    /// Create a new resource descriptor.
    pub fn new(size: u64, kind: ResourceKind) -> Self {
        Self {
            label: None,
            size,
            kind,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}
