//! Helpers for testing the crate

use crate::{MemoryAccess, TransportError};

/// Base address used for the control block fixtures.
pub(crate) const CB_BASE: u32 = 0x2000_0000;

/// In-memory stand-in for a debug probe: one contiguous region of target RAM. Accesses
/// outside the region fail the way a real transport would.
#[derive(Debug)]
pub(crate) struct MockMemory {
    base: u32,
    mem: Vec<u8>,
}

impl MockMemory {
    pub(crate) fn new(base: u32, size: usize) -> Self {
        MockMemory {
            base,
            mem: vec![0; size],
        }
    }

    /// Places `data` at `address`, panicking if it does not fit the region.
    pub(crate) fn load(&mut self, address: u32, data: &[u8]) {
        let offset = self.offset_of(address, data.len()).unwrap_or_else(|_| {
            panic!(
                "load of {} bytes at {address:#010x} outside the mock region",
                data.len()
            )
        });
        self.mem[offset..offset + data.len()].copy_from_slice(data);
    }

    pub(crate) fn load_word(&mut self, address: u32, word: u32) {
        self.load(address, &word.to_le_bytes());
    }

    /// Returns the bytes currently stored at `address`.
    pub(crate) fn bytes(&self, address: u32, len: usize) -> &[u8] {
        let offset = self.offset_of(address, len).unwrap();
        &self.mem[offset..offset + len]
    }

    /// Returns the little-endian word currently stored at `address`.
    pub(crate) fn word(&self, address: u32) -> u32 {
        u32::from_le_bytes(self.bytes(address, 4).try_into().unwrap())
    }

    fn offset_of(&self, address: u32, len: usize) -> Result<usize, TransportError> {
        let offset = address
            .checked_sub(self.base)
            .ok_or(TransportError::OutOfBounds { address, len })? as usize;

        if offset + len > self.mem.len() {
            return Err(TransportError::OutOfBounds { address, len });
        }

        Ok(offset)
    }
}

impl MemoryAccess for MockMemory {
    fn read_8(&mut self, address: u32, data: &mut [u8]) -> Result<(), TransportError> {
        let offset = self.offset_of(address, data.len())?;
        data.copy_from_slice(&self.mem[offset..offset + data.len()]);
        Ok(())
    }

    fn write_8(&mut self, address: u32, data: &[u8]) -> Result<(), TransportError> {
        let offset = self.offset_of(address, data.len())?;
        self.mem[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// Builds a 4 KiB target RAM image with a control block at [`CB_BASE`] announcing the
/// given channel counts. Descriptors, names and buffers are left for the test to place.
pub(crate) fn rtt_target(max_up: u32, max_down: u32) -> MockMemory {
    let mut mem = MockMemory::new(CB_BASE, 0x1000);

    mem.load(CB_BASE, b"SEGGER RTT\0\0\0\0\0\0");
    mem.load_word(CB_BASE + 16, max_up);
    mem.load_word(CB_BASE + 20, max_down);

    mem
}

/// Writes a 24 byte channel descriptor at `ptr`.
pub(crate) fn load_descriptor(
    mem: &mut MockMemory,
    ptr: u32,
    name_ptr: u32,
    buffer_ptr: u32,
    size: u32,
    write: u32,
    read: u32,
) {
    mem.load_word(ptr, name_ptr);
    mem.load_word(ptr + 4, buffer_ptr);
    mem.load_word(ptr + 8, size);
    mem.load_word(ptr + 12, write);
    mem.load_word(ptr + 16, read);
    mem.load_word(ptr + 20, 0);
}

#[test]
fn mock_memory_round_trip() {
    let mut mem = MockMemory::new(0x1000, 0x100);

    mem.load_word(0x1010, 0xcafe_f00d);
    assert_eq!(mem.word(0x1010), 0xcafe_f00d);

    mem.write_8(0x1020, b"abc").unwrap();
    let mut out = [0u8; 3];
    mem.read_8(0x1020, &mut out).unwrap();
    assert_eq!(&out, b"abc");
}

#[test]
fn mock_memory_rejects_out_of_range_access() {
    let mut mem = MockMemory::new(0x1000, 0x10);

    let mut buf = [0u8; 4];
    assert!(matches!(
        mem.read_8(0x0fff, &mut buf),
        Err(TransportError::OutOfBounds { .. })
    ));
    assert!(matches!(
        mem.read_8(0x100e, &mut buf),
        Err(TransportError::OutOfBounds { .. })
    ));
}
