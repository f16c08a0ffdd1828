//! Host side implementation of the RTT (Real-Time Transfer) I/O protocol over a debug
//! probe memory interface.
//!
//! RTT implements input and output to/from a microcontroller using in-memory ring buffers
//! and memory polling. This enables debug logging from the microcontroller with minimal
//! delays and no blocking, making it usable even in real-time applications where e.g.
//! semihosting delays cannot be tolerated.
//!
//! On top of plain text channels, this crate understands *scope channels*: up channels
//! whose name encodes a fixed-width binary packet layout (e.g. `"u4f"` for a `u32`
//! followed by an `f32`). Data read from such a channel can be decoded into typed packets
//! for plotting or logging. See the [`scope`] module for the grammar.
//!
//! The crate does not talk to any probe directly. Instead, every operation takes a
//! [`MemoryAccess`] implementation, so it works over any transport that can read and
//! write target memory while the firmware is running.
//!
//! ## Example
//!
//! ```no_run
//! use rtt_scope::{MemoryAccess, Rtt, ScanRegion, TransportError};
//!
//! struct Probe;
//!
//! impl MemoryAccess for Probe {
//!     fn read_8(&mut self, address: u32, data: &mut [u8]) -> Result<(), TransportError> {
//!         // drive the debug probe here
//!         # let _ = (address, data);
//!         Ok(())
//!     }
//!
//!     fn write_8(&mut self, address: u32, data: &[u8]) -> Result<(), TransportError> {
//!         # let _ = (address, data);
//!         Ok(())
//!     }
//! }
//!
//! let mut probe = Probe;
//!
//! // Detect the control block somewhere in the first 4 KiB of RAM
//! let mut rtt = Rtt::attach_region(&mut probe, &ScanRegion::Range(0x2000_0000..0x2000_1000))?;
//!
//! // Read from a channel
//! if let Some(input) = rtt.up_channel(0) {
//!     let data = input.read(&mut probe)?;
//!     println!("Read data: {data:?}");
//! }
//!
//! // Write to a channel
//! if let Some(output) = rtt.down_channel(0) {
//!     output.write(&mut probe, b"Hello, device!\n")?;
//! }
//! # Ok::<(), rtt_scope::Error>(())
//! ```

mod channel;
pub use channel::*;

mod memory;
pub use memory::{MemoryAccess, TransportError};

mod rtt;
pub use rtt::*;

pub mod scope;
pub use scope::{FieldType, FieldValue, Packet, ScopeFormat};

#[cfg(test)]
mod test;

/// Error type for RTT operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// RTT control block not found in target memory. Make sure RTT is initialized on the
    /// target before attaching, and that the scanned region actually contains it.
    #[error(
        "RTT control block not found in target memory.\n\
        - Make sure RTT is initialized on the target before attaching.\n\
        - Depending on the target, sleep modes can interfere with RTT."
    )]
    ControlBlockNotFound,

    /// The control block or a channel descriptor holds values that cannot be trusted. The
    /// data contains a detailed error.
    #[error("Control block corrupted: {0}")]
    ControlBlockCorrupted(String),

    /// Packet decoding was requested on a channel whose name does not match the scope
    /// format grammar.
    #[error("Channel {0:?} is not a scope channel")]
    NotAScopeChannel(String),

    /// Wraps errors propagated up from the probe transport.
    #[error("Error communicating with probe: {0}")]
    Probe(#[from] TransportError),

    /// Wraps errors propagated up from reading memory on the target.
    #[error("Unexpected error while reading {0} from target memory. Please report this as a bug.")]
    MemoryRead(String),
}
