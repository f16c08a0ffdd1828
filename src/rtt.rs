use crate::channel::*;
use crate::{Error, MemoryAccess};
use scroll::{LE, Pread};
use std::ops::Range;

/// The RTT interface.
///
/// Use [`Rtt::attach_at`] or [`Rtt::attach_region`] to detect the channels as they were
/// configured on the target. The timing matters: attaching before the target program has
/// initialized RTT either fails with [`Error::ControlBlockNotFound`], or picks up a stale
/// block left over from a previous run, with channel names and buffer sizes that cannot be
/// trusted. Attaching again is cheap and is the way to re-synchronize after the target
/// re-initializes.
#[derive(Debug)]
pub struct Rtt {
    ptr: u32,
    up_channels: Vec<UpChannel>,
    down_channels: Vec<DownChannel>,
}

// Rtt must follow this data layout when reading/writing memory in order to be compatible
// with the official RTT implementation.
//
// struct ControlBlock {
//     char id[16]; // Used to find/validate the control block.
//     // Maximum number of up (target to host) channels in following array
//     unsigned int max_up_channels;
//     // Maximum number of down (host to target) channels in following array.
//     unsigned int max_down_channels;
//     RttChannel up_channels[max_up_channels]; // Array of up (target to host) channels.
//     RttChannel down_channels[max_down_channels]; // array of down (host to target) channels.
// }

impl Rtt {
    /// The marker expected at the beginning of the control block id.
    pub const RTT_ID: [u8; 10] = *b"SEGGER RTT";

    /// Conservative sanity bound: firmware configures a handful of channels, so larger
    /// counts mean the block is stale or was never initialized.
    pub const MAX_CHANNELS: u32 = 16;

    // Minimum size of the ControlBlock struct in target memory in bytes with empty arrays
    const MIN_SIZE: usize = Self::O_CHANNEL_ARRAYS;

    // Offsets of fields in target memory in bytes
    const O_ID: usize = 0;
    const O_MAX_UP_CHANNELS: usize = 16;
    const O_MAX_DOWN_CHANNELS: usize = 20;
    const O_CHANNEL_ARRAYS: usize = 24;

    /// Tries to attach to an RTT control block at the specified memory address.
    pub fn attach_at(mem: &mut impl MemoryAccess, ptr: u32) -> Result<Rtt, Error> {
        let mut header = [0u8; Self::MIN_SIZE];
        mem.read_8(ptr, &mut header)?;

        // Validate that the id starts with the marker
        let rtt_id = &header[Self::O_ID..][..Self::RTT_ID.len()];
        if rtt_id != Self::RTT_ID {
            tracing::trace!(
                "Expected control block to start with RTT ID {:?}. Got instead: {:?}",
                String::from_utf8_lossy(&Self::RTT_ID),
                String::from_utf8_lossy(rtt_id)
            );
            return Err(Error::ControlBlockNotFound);
        }

        let max_up_channels: u32 = header.pread_with(Self::O_MAX_UP_CHANNELS, LE).unwrap();
        let max_down_channels: u32 = header.pread_with(Self::O_MAX_DOWN_CHANNELS, LE).unwrap();

        if max_up_channels > Self::MAX_CHANNELS || max_down_channels > Self::MAX_CHANNELS {
            return Err(Error::ControlBlockCorrupted(format!(
                "nonsensical array sizes at {ptr:#010x}: max_up_channels={max_up_channels} max_down_channels={max_down_channels}"
            )));
        }

        let max_up_channels = max_up_channels as usize;
        let max_down_channels = max_down_channels as usize;

        let mut descriptors = vec![0u8; (max_up_channels + max_down_channels) * Channel::SIZE];
        mem.read_8(ptr + Self::O_CHANNEL_ARRAYS as u32, &mut descriptors)?;

        let mut up_channels = Vec::new();
        let mut down_channels = Vec::new();

        for number in 0..max_up_channels {
            let offset = number * Channel::SIZE;
            let desc_ptr = ptr + (Self::O_CHANNEL_ARRAYS + offset) as u32;

            if let Some(chan) = Channel::from(mem, number, desc_ptr, &descriptors[offset..])? {
                up_channels.push(UpChannel(chan));
            } else {
                tracing::warn!("Buffer for up channel {number} not initialized");
            }
        }

        for number in 0..max_down_channels {
            let offset = (max_up_channels + number) * Channel::SIZE;
            let desc_ptr = ptr + (Self::O_CHANNEL_ARRAYS + offset) as u32;

            if let Some(chan) = Channel::from(mem, number, desc_ptr, &descriptors[offset..])? {
                down_channels.push(DownChannel(chan));
            } else {
                tracing::warn!("Buffer for down channel {number} not initialized");
            }
        }

        Ok(Rtt {
            ptr,
            up_channels,
            down_channels,
        })
    }

    /// Attempts to detect an RTT control block in the specified region and returns an
    /// instance if a valid control block was found.
    pub fn attach_region(mem: &mut impl MemoryAccess, region: &ScanRegion) -> Result<Rtt, Error> {
        let ptr = Self::find_control_block(mem, region)?;
        Self::attach_at(mem, ptr)
    }

    /// Scans the given region for the control block marker and returns the address of the
    /// first match.
    ///
    /// The scan is a byte-for-byte sliding window, so the marker may sit at any alignment
    /// and the window does not have to be a multiple of the marker length.
    pub fn find_control_block(
        mem: &mut impl MemoryAccess,
        region: &ScanRegion,
    ) -> Result<u32, Error> {
        let range = match region {
            ScanRegion::Exact(addr) => {
                tracing::debug!("Scanning at exact address: {addr:#010x}");

                return Ok(*addr);
            }
            ScanRegion::Range(range) => {
                tracing::debug!("Scanning region: {range:#010x?}");

                range.clone()
            }
        };

        let window_len = range.end.saturating_sub(range.start) as usize;
        let mut window = vec![0u8; window_len];
        mem.read_8(range.start, &mut window)?;

        window
            .windows(Self::RTT_ID.len())
            .position(|w| w == Self::RTT_ID)
            .map(|offset| range.start + offset as u32)
            .ok_or(Error::ControlBlockNotFound)
    }

    /// Returns the memory address of the control block in target memory.
    pub fn ptr(&self) -> u32 {
        self.ptr
    }

    /// Returns the detected up channels.
    pub fn up_channels(&mut self) -> &mut [UpChannel] {
        &mut self.up_channels
    }

    /// Returns the detected down channels.
    pub fn down_channels(&mut self) -> &mut [DownChannel] {
        &mut self.down_channels
    }

    /// Returns the up channel with the given number.
    pub fn up_channel(&mut self, number: usize) -> Option<&mut UpChannel> {
        self.up_channels.iter_mut().find(|c| c.number() == number)
    }

    /// Returns the down channel with the given number.
    pub fn down_channel(&mut self, number: usize) -> Option<&mut DownChannel> {
        self.down_channels.iter_mut().find(|c| c.number() == number)
    }
}

/// Used to specify which memory region to scan for the RTT control block.
#[derive(Clone, Debug)]
pub enum ScanRegion {
    /// Limit scanning to these memory addresses in target memory. It is up to the user to
    /// ensure that reading from this range will not read from undefined memory.
    Range(Range<u32>),

    /// Tries to find the control block starting at this exact address. It is up to the
    /// user to ensure that the necessary bytes after the pointer can be read.
    Exact(u32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{CB_BASE, MockMemory, load_descriptor, rtt_target};

    #[test]
    fn attach_detects_configured_channels() {
        let mut mem = rtt_target(2, 1);

        let name_up = CB_BASE + 0x800;
        let name_down = CB_BASE + 0x820;
        mem.load(name_up, b"u4b\0");
        mem.load(name_down, b"terminal\0");

        // Up channel 1 is left unconfigured (buffer pointer 0) and must be skipped.
        load_descriptor(&mut mem, CB_BASE + 24, name_up, CB_BASE + 0x900, 1024, 0, 0);
        load_descriptor(&mut mem, CB_BASE + 24 + 48, name_down, CB_BASE + 0xd00, 64, 0, 0);

        let mut rtt = Rtt::attach_at(&mut mem, CB_BASE).unwrap();

        assert_eq!(rtt.ptr(), CB_BASE);
        assert_eq!(rtt.up_channels().len(), 1);
        assert_eq!(rtt.down_channels().len(), 1);

        let up = rtt.up_channel(0).unwrap();
        assert_eq!(up.name(), Some("u4b"));
        assert_eq!(up.buffer_size(), 1024);
        assert_eq!(up.scope_format().unwrap().packet_size(), 5);

        let down = rtt.down_channel(0).unwrap();
        assert_eq!(down.name(), Some("terminal"));
        assert_eq!(down.buffer_size(), 64);
    }

    #[test]
    fn attach_rejects_missing_marker() {
        let mut mem = MockMemory::new(CB_BASE, 0x100);
        mem.load(CB_BASE, b"NOT AN RTT BLOCK");

        assert!(matches!(
            Rtt::attach_at(&mut mem, CB_BASE),
            Err(Error::ControlBlockNotFound)
        ));
    }

    #[test]
    fn attach_rejects_nonsensical_channel_counts() {
        // The marker is present but the counts are garbage; no descriptors may be built.
        let mut mem = rtt_target(255, 1);

        assert!(matches!(
            Rtt::attach_at(&mut mem, CB_BASE),
            Err(Error::ControlBlockCorrupted(_))
        ));
    }

    #[test]
    fn scan_finds_marker_at_unaligned_offset() {
        let mut mem = rtt_target(0, 0);
        let block = CB_BASE + 0x123;
        mem.load(block, b"SEGGER RTT\0\0\0\0\0\0");

        let found = Rtt::find_control_block(
            &mut mem,
            &ScanRegion::Range(CB_BASE + 0x100..CB_BASE + 0x400),
        )
        .unwrap();

        // The fixture also has a block at CB_BASE itself, outside the scanned window.
        assert_eq!(found, block);
    }

    #[test]
    fn scan_reports_not_found() {
        let mut mem = MockMemory::new(CB_BASE, 0x200);

        assert!(matches!(
            Rtt::find_control_block(&mut mem, &ScanRegion::Range(CB_BASE..CB_BASE + 0x200)),
            Err(Error::ControlBlockNotFound)
        ));
    }

    #[test]
    fn scan_propagates_transport_failure() {
        let mut mem = MockMemory::new(CB_BASE, 0x100);

        // Window extends past the readable region; the probe error must surface as a
        // result, not a panic.
        assert!(matches!(
            Rtt::find_control_block(&mut mem, &ScanRegion::Range(CB_BASE..CB_BASE + 0x1000)),
            Err(Error::Probe(_))
        ));
    }

    #[test]
    fn scan_window_shorter_than_marker() {
        let mut mem = MockMemory::new(CB_BASE, 0x100);
        mem.load(CB_BASE, b"SEG");

        assert!(matches!(
            Rtt::find_control_block(&mut mem, &ScanRegion::Range(CB_BASE..CB_BASE + 3)),
            Err(Error::ControlBlockNotFound)
        ));
    }
}
