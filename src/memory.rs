//! Memory access capability used to reach the target through a debug probe.

/// Error produced by a [`MemoryAccess`] implementation.
///
/// Probe drivers convert their transport failures into this type. Failures surface
/// immediately; this crate never retries on its own, retry policy belongs to the caller.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The requested range is outside the memory the probe can reach.
    #[error("memory access of {len} bytes at {address:#010x} is outside the accessible range")]
    OutOfBounds {
        /// Start address of the failed access.
        address: u32,
        /// Length of the failed access in bytes.
        len: usize,
    },

    /// The probe did not answer within the transport's deadline.
    #[error("probe transport timed out")]
    Timeout,

    /// Driver specific failure.
    #[error("probe transport error: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// An interface to be implemented for transports that allow target memory access.
///
/// Calls are synchronous and non-transactional: two calls are not atomic with respect to
/// the firmware, which keeps running and mutating memory between them. The target is
/// assumed little-endian, matching the RTT wire layout; the word accessors default to byte
/// accesses plus the endian conversion and may be overridden when the probe has a native
/// word transfer.
pub trait MemoryAccess {
    /// Read a block of 8 bit words at `address`.
    fn read_8(&mut self, address: u32, data: &mut [u8]) -> Result<(), TransportError>;

    /// Write a block of 8 bit words at `address`.
    fn write_8(&mut self, address: u32, data: &[u8]) -> Result<(), TransportError>;

    /// Read a 32 bit word at `address`.
    fn read_word_32(&mut self, address: u32) -> Result<u32, TransportError> {
        let mut bytes = [0u8; 4];
        self.read_8(address, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Write a 32 bit word at `address`.
    fn write_word_32(&mut self, address: u32, word: u32) -> Result<(), TransportError> {
        self.write_8(address, &word.to_le_bytes())
    }
}
