//! Streams: ordering domains for queued device work
//!
//! Work enqueued on one stream runs in enqueue order; work on different
//! streams is unordered. A device always has exactly one current stream,
//! used by every launch and copy that does not name a stream explicitly.
//!
//! Lifecycle:
//!
//! ```text
//! create_stream() ──► live ──(last handle dropped)──► finished + destroyed
//! ```
//!
//! The device's initial stream lives as long as the device. Any other
//! stream is retired when its last [`Stream`] handle goes away, including
//! the device's own reference once `set_stream` selects another stream.

use crate::device::DeviceInner;
use hetero_backends::StreamHandle;
use std::fmt;
use std::sync::{Arc, Weak};

pub(crate) struct StreamInner {
    pub(crate) handle: StreamHandle,
    pub(crate) device_id: u64,
    pub(crate) device: Weak<DeviceInner>,
}

impl Drop for StreamInner {
    fn drop(&mut self) {
        // the device finishes every stream itself when it goes first
        if let Some(device) = self.device.upgrade() {
            device.retire_stream(self.handle);
        }
    }
}

/// Shared handle to a device stream
#[derive(Clone)]
pub struct Stream {
    pub(crate) inner: Arc<StreamInner>,
}

impl Stream {
    pub(crate) fn from_inner(inner: Arc<StreamInner>) -> Self {
        Self { inner }
    }

    /// Backend handle of this stream
    pub fn handle(&self) -> StreamHandle {
        self.inner.handle
    }

    /// Id of the device that created this stream
    pub fn device_id(&self) -> u64 {
        self.inner.device_id
    }
}

impl PartialEq for Stream {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Stream {}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("handle", &self.inner.handle)
            .field("device", &self.inner.device_id)
            .finish()
    }
}
