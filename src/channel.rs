use crate::scope::{Packet, ScopeFormat};
use crate::{Error, MemoryAccess};
use scroll::{LE, Pread};
use std::fmt;

/// Trait for channel information shared between up and down channels.
pub trait RttChannel {
    /// Returns the number of the channel.
    fn number(&self) -> usize;

    /// Returns the name of the channel or `None` if there is none.
    fn name(&self) -> Option<&str>;

    /// Returns the buffer size in bytes. Note that the usable size is one byte less due to
    /// how the ring buffer is implemented.
    fn buffer_size(&self) -> usize;
}

#[derive(Debug)]
pub(crate) struct Channel {
    number: usize,
    ptr: u32,
    name: Option<String>,
    buffer_ptr: u32,
    size: u32,
    write: u32,
    read: u32,
    flags: u32,
    scope_format: Option<ScopeFormat>,
}

// Channels must follow this data layout when reading/writing memory in order to be
// compatible with the official RTT implementation.
//
// struct Channel {
//     const char *name; // Name of channel, pointer to null-terminated string. Optional.
//     char *buffer; // Pointer to buffer data
//     unsigned int size; // Size of data buffer. The actual capacity is one byte less.
//     unsigned int write; // Offset in data buffer of next byte to write.
//     unsigned int read; // Offset in data buffer of next byte to read.
//     // The low 2 bits of flags are used for blocking/non blocking modes, the rest are ignored.
//     unsigned int flags;
// }

impl Channel {
    // Size of the Channel struct in target memory in bytes
    pub(crate) const SIZE: usize = 24;

    // Offsets of fields in target memory in bytes
    const O_NAME: usize = 0;
    const O_BUFFER_PTR: usize = 4;
    const O_SIZE: usize = 8;
    const O_WRITE: usize = 12;
    const O_READ: usize = 16;
    const O_FLAGS: usize = 20;

    pub(crate) fn from(
        mem: &mut impl MemoryAccess,
        number: usize,
        ptr: u32,
        desc: &[u8],
    ) -> Result<Option<Channel>, Error> {
        let buffer_ptr: u32 = match desc.pread_with(Self::O_BUFFER_PTR, LE) {
            Ok(buffer_ptr) => buffer_ptr,
            Err(_error) => return Err(Error::MemoryRead("RTT channel address".to_string())),
        };

        if buffer_ptr == 0 {
            // This buffer isn't in use
            return Ok(None);
        }

        let name_ptr: u32 = match desc.pread_with(Self::O_NAME, LE) {
            Ok(name_ptr) => name_ptr,
            Err(_error) => return Err(Error::MemoryRead("RTT channel name".to_string())),
        };

        let name = if name_ptr == 0 {
            None
        } else {
            read_c_string(mem, name_ptr)?
        };

        let scope_format = name.as_deref().and_then(ScopeFormat::parse);

        Ok(Some(Channel {
            number,
            ptr,
            name,
            buffer_ptr,
            size: desc.pread_with(Self::O_SIZE, LE).unwrap(),
            write: desc.pread_with(Self::O_WRITE, LE).unwrap(),
            read: desc.pread_with(Self::O_READ, LE).unwrap(),
            flags: desc.pread_with(Self::O_FLAGS, LE).unwrap(),
            scope_format,
        }))
    }

    /// Re-reads the whole descriptor, including the name, from target memory.
    ///
    /// The firmware mutates the descriptor continuously and there is no lock between the
    /// two sides, so every operation starts from a fresh snapshot instead of trusting
    /// cached fields.
    fn refresh(&mut self, mem: &mut impl MemoryAccess) -> Result<(), Error> {
        let mut desc = [0u8; Self::SIZE];
        mem.read_8(self.ptr, &mut desc)?;

        let name_ptr: u32 = desc.pread_with(Self::O_NAME, LE).unwrap();
        let name = if name_ptr == 0 {
            None
        } else {
            read_c_string(mem, name_ptr)?
        };
        if name != self.name {
            self.scope_format = name.as_deref().and_then(ScopeFormat::parse);
            self.name = name;
        }

        self.buffer_ptr = desc.pread_with(Self::O_BUFFER_PTR, LE).unwrap();
        self.size = desc.pread_with(Self::O_SIZE, LE).unwrap();
        self.write = desc.pread_with(Self::O_WRITE, LE).unwrap();
        self.read = desc.pread_with(Self::O_READ, LE).unwrap();
        self.flags = desc.pread_with(Self::O_FLAGS, LE).unwrap();

        self.validate_offsets()
    }

    fn validate_offsets(&self) -> Result<(), Error> {
        let validate = |which, value| {
            if value >= self.size {
                Err(Error::ControlBlockCorrupted(format!(
                    "{} offset is {} while buffer size is {} for channel {} ({})",
                    which,
                    value,
                    self.size,
                    self.number,
                    self.name.as_deref().unwrap_or("no name"),
                )))
            } else {
                Ok(())
            }
        };

        validate("write", self.write)?;
        validate("read", self.read)?;

        Ok(())
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn buffer_size(&self) -> usize {
        self.size as usize
    }
}

/// RTT up (target to host) channel.
#[derive(Debug)]
pub struct UpChannel(pub(crate) Channel);

impl UpChannel {
    /// Returns the number of the channel.
    pub fn number(&self) -> usize {
        self.0.number
    }

    /// Returns the name of the channel or `None` if there is none.
    pub fn name(&self) -> Option<&str> {
        self.0.name()
    }

    /// Returns the buffer size in bytes. Note that the usable size is one byte less due to
    /// how the ring buffer is implemented.
    pub fn buffer_size(&self) -> usize {
        self.0.buffer_size()
    }

    /// Returns the raw device flags as of the last operation. They are reported for
    /// diagnostics and not interpreted by this crate.
    pub fn flags(&self) -> u32 {
        self.0.flags
    }

    /// Returns the packet layout encoded in the channel name, if the name matches the
    /// scope format grammar.
    pub fn scope_format(&self) -> Option<&ScopeFormat> {
        self.0.scope_format.as_ref()
    }

    /// Reads everything the target has published since the last read and advances the
    /// target's read offset past it.
    ///
    /// An empty result means the channel had no data; that is a normal outcome, not an
    /// error. This method will not block waiting for data.
    pub fn read(&mut self, mem: &mut impl MemoryAccess) -> Result<Vec<u8>, Error> {
        let data = self.read_inner(mem)?;

        if !data.is_empty() {
            // The read offset moves only after the data has been captured, so a transport
            // failure in between never discards unread bytes.
            mem.write_word_32(self.0.ptr + Channel::O_READ as u32, self.0.write)?;
            self.0.read = self.0.write;
        }

        Ok(data)
    }

    /// Peeks at the current data in the channel buffer and returns it without advancing
    /// the target's read offset.
    ///
    /// The difference from [`read`](UpChannel::read) is that this does not discard the
    /// data in the buffer.
    pub fn peek(&mut self, mem: &mut impl MemoryAccess) -> Result<Vec<u8>, Error> {
        self.read_inner(mem)
    }

    /// Reads all available data and decodes it into packets using the channel's scope
    /// format.
    ///
    /// Fails with [`Error::NotAScopeChannel`] if the channel name does not match the scope
    /// format grammar. A trailing partial packet is dropped with a warning.
    pub fn read_packets(&mut self, mem: &mut impl MemoryAccess) -> Result<Vec<Packet>, Error> {
        // Refresh before draining anything: if the name no longer parses, the data has to
        // stay in the buffer.
        self.0.refresh(mem)?;

        let Some(format) = self.0.scope_format.clone() else {
            return Err(Error::NotAScopeChannel(
                self.0.name.clone().unwrap_or_default(),
            ));
        };

        let data = self.read(mem)?;

        Ok(format.decode(&data).collect())
    }

    fn read_inner(&mut self, mem: &mut impl MemoryAccess) -> Result<Vec<u8>, Error> {
        self.0.refresh(mem)?;

        let (buffer_ptr, size) = (self.0.buffer_ptr, self.0.size);
        let (write, read) = (self.0.write, self.0.read);

        if write == read {
            return Ok(Vec::new());
        }

        let mut data;
        if write > read {
            // Contiguous run
            data = vec![0u8; (write - read) as usize];
            mem.read_8(buffer_ptr + read, &mut data)?;
        } else {
            // The run wraps at the physical end of the buffer: tail first, then the part
            // that continues at offset 0.
            data = vec![0u8; (size - read + write) as usize];
            let (tail, head) = data.split_at_mut((size - read) as usize);
            mem.read_8(buffer_ptr + read, tail)?;
            mem.read_8(buffer_ptr, head)?;
        }

        Ok(data)
    }
}

impl RttChannel for UpChannel {
    fn number(&self) -> usize {
        self.0.number
    }

    fn name(&self) -> Option<&str> {
        self.0.name()
    }

    fn buffer_size(&self) -> usize {
        self.0.buffer_size()
    }
}

impl fmt::Display for UpChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({} byte buffer)",
            self.number(),
            self.name().unwrap_or("(no name)"),
            self.buffer_size()
        )
    }
}

/// RTT down (host to target) channel.
#[derive(Debug)]
pub struct DownChannel(pub(crate) Channel);

impl DownChannel {
    /// Returns the number of the channel.
    pub fn number(&self) -> usize {
        self.0.number
    }

    /// Returns the name of the channel or `None` if there is none.
    pub fn name(&self) -> Option<&str> {
        self.0.name()
    }

    /// Returns the buffer size in bytes. Note that the usable size is one byte less due to
    /// how the ring buffer is implemented.
    pub fn buffer_size(&self) -> usize {
        self.0.buffer_size()
    }

    /// Returns the raw device flags as of the last operation. They are reported for
    /// diagnostics and not interpreted by this crate.
    pub fn flags(&self) -> u32 {
        self.0.flags
    }

    /// Writes as much of `buf` as fits into the channel buffer and returns the number of
    /// bytes written.
    ///
    /// Returns 0 when the buffer is full; that is a normal, retryable outcome, not an
    /// error. This method will not block waiting for space.
    pub fn write(&mut self, mem: &mut impl MemoryAccess, buf: &[u8]) -> Result<usize, Error> {
        self.0.refresh(mem)?;

        let (buffer_ptr, size) = (self.0.buffer_ptr, self.0.size);
        let (write, read) = (self.0.write, self.0.read);

        // One byte of capacity stays reserved so a full buffer can be told apart from an
        // empty one.
        let available = if write >= read {
            size - write + read - 1
        } else {
            read - write - 1
        } as usize;

        let count = buf.len().min(available);
        if count == 0 {
            return Ok(0);
        }

        let until_end = (size - write) as usize;
        if count <= until_end {
            mem.write_8(buffer_ptr + write, &buf[..count])?;
        } else {
            // Split the write at the physical end of the buffer
            mem.write_8(buffer_ptr + write, &buf[..until_end])?;
            mem.write_8(buffer_ptr, &buf[until_end..count])?;
        }

        // Publishing the write offset is the final step: the target may start consuming
        // the moment it changes, so the data has to be in place first.
        let new_write = (write + count as u32) % size;
        mem.write_word_32(self.0.ptr + Channel::O_WRITE as u32, new_write)?;
        self.0.write = new_write;

        Ok(count)
    }
}

impl RttChannel for DownChannel {
    fn number(&self) -> usize {
        self.0.number
    }

    fn name(&self) -> Option<&str> {
        self.0.name()
    }

    fn buffer_size(&self) -> usize {
        self.0.buffer_size()
    }
}

impl fmt::Display for DownChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({} byte buffer)",
            self.number(),
            self.name().unwrap_or("(no name)"),
            self.buffer_size()
        )
    }
}

/// Reads a null-terminated string from target memory. Lossy UTF-8 decoding is used.
fn read_c_string(mem: &mut impl MemoryAccess, ptr: u32) -> Result<Option<String>, Error> {
    // Channel names are short; 32 bytes covers everything firmware realistically writes.
    let mut bytes = [0u8; 32];
    mem.read_8(ptr, &mut bytes)?;

    let name = bytes
        .iter()
        .position(|&b| b == 0)
        .map(|p| String::from_utf8_lossy(&bytes[..p]).into_owned());
    tracing::debug!("read_c_string() result = {:?}", name);

    // If the bytes read contain a null, the preceding part is the name, otherwise None.
    Ok(name)
}
