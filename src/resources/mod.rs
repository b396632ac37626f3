//! GPU resources.
//!
//! - [`ResourceHandle`] - One device allocation and its recorded access state
//! - [`TypedBuffer`] - Device region plus optional staging regions
//! - [`WriteView`] / [`ReadView`] - Scoped host access to staging memory

mod buffer;
mod handle;
mod view;

pub use buffer::TypedBuffer;
pub use handle::{ResourceHandle, ResourceId};
pub use view::{ReadView, WriteView};
