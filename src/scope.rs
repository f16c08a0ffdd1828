//! Scope channel packet layouts.
//!
//! An up channel whose entire name matches the grammar `(b|f|u1|u2|u4|i1|i2|i4)+` carries
//! fixed-width binary packets instead of text: each token names one field, left to right,
//! and the digit is the field width in bytes. `"u4f"` for example describes packets of a
//! `u32` followed by an `f32`, 8 bytes per packet. All fields are encoded little-endian.
//!
//! Names that do not match the grammar as a whole (`"terminal"`, `"u4x"`, `"u3"`) are
//! ordinary text channels; there is no partial matching.

use scroll::{LE, Pread};
use serde::{Deserialize, Serialize};
use std::slice::ChunksExact;

/// Type of a single field inside a scope packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum FieldType {
    /// `b` — one byte, decoded from its low bit.
    Bool,
    /// `f` — IEEE 754 single precision float.
    Float32,
    /// `u1`
    Uint8,
    /// `u2`
    Uint16,
    /// `u4`
    Uint32,
    /// `i1`
    Int8,
    /// `i2`
    Int16,
    /// `i4`
    Int32,
}

impl FieldType {
    /// Width of the encoded field in bytes.
    pub fn size(self) -> usize {
        match self {
            FieldType::Bool | FieldType::Uint8 | FieldType::Int8 => 1,
            FieldType::Uint16 | FieldType::Int16 => 2,
            FieldType::Float32 | FieldType::Uint32 | FieldType::Int32 => 4,
        }
    }
}

/// A decoded field value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Decoded from a `b` field.
    Bool(bool),
    /// Decoded from an `f` field.
    Float32(f32),
    /// Decoded from a `u1` field.
    Uint8(u8),
    /// Decoded from a `u2` field.
    Uint16(u16),
    /// Decoded from a `u4` field.
    Uint32(u32),
    /// Decoded from an `i1` field.
    Int8(i8),
    /// Decoded from an `i2` field.
    Int16(i16),
    /// Decoded from an `i4` field.
    Int32(i32),
}

impl FieldValue {
    /// The field type this value was decoded as.
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Bool(_) => FieldType::Bool,
            FieldValue::Float32(_) => FieldType::Float32,
            FieldValue::Uint8(_) => FieldType::Uint8,
            FieldValue::Uint16(_) => FieldType::Uint16,
            FieldValue::Uint32(_) => FieldType::Uint32,
            FieldValue::Int8(_) => FieldType::Int8,
            FieldValue::Int16(_) => FieldType::Int16,
            FieldValue::Int32(_) => FieldType::Int32,
        }
    }
}

/// One decoded scope packet: the field values in channel name order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    fields: Vec<FieldValue>,
}

impl Packet {
    /// The decoded field values.
    pub fn fields(&self) -> &[FieldValue] {
        &self.fields
    }
}

/// Packet layout parsed from a channel name.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScopeFormat {
    fields: Vec<FieldType>,
    packet_size: usize,
}

impl ScopeFormat {
    /// Parses a channel name into a packet layout.
    ///
    /// The entire name must match `(b|f|u1|u2|u4|i1|i2|i4)+`, case-sensitive; anything
    /// else (including an empty name) means the channel is not a scope channel and `None`
    /// is returned.
    pub fn parse(name: &str) -> Option<ScopeFormat> {
        let mut fields = Vec::new();

        let mut rest = name.as_bytes();
        while let Some((&token, tail)) = rest.split_first() {
            let field = match token {
                b'b' => {
                    rest = tail;
                    FieldType::Bool
                }
                b'f' => {
                    rest = tail;
                    FieldType::Float32
                }
                b'u' | b'i' => {
                    let (&width, tail) = tail.split_first()?;
                    rest = tail;
                    match (token, width) {
                        (b'u', b'1') => FieldType::Uint8,
                        (b'u', b'2') => FieldType::Uint16,
                        (b'u', b'4') => FieldType::Uint32,
                        (b'i', b'1') => FieldType::Int8,
                        (b'i', b'2') => FieldType::Int16,
                        (b'i', b'4') => FieldType::Int32,
                        _ => return None,
                    }
                }
                _ => return None,
            };

            fields.push(field);
        }

        if fields.is_empty() {
            return None;
        }

        let packet_size = fields.iter().map(|f| f.size()).sum();
        Some(ScopeFormat {
            fields,
            packet_size,
        })
    }

    /// The field types in packet order.
    pub fn fields(&self) -> &[FieldType] {
        &self.fields
    }

    /// Encoded size of one packet in bytes.
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Decodes raw channel data into packets.
    ///
    /// The returned iterator is lazy and keeps no state beyond its position in `data`. A
    /// trailing partial packet is dropped with a warning; it is never an error, because
    /// the device may simply not have published the rest of the packet yet.
    pub fn decode<'a>(&'a self, data: &'a [u8]) -> Packets<'a> {
        let tail = data.len() % self.packet_size;
        if tail != 0 {
            tracing::warn!(
                "incomplete packet tail: got {} bytes, expected a multiple of {}; dropping {} bytes",
                data.len(),
                self.packet_size,
                tail
            );
        }

        Packets {
            format: self,
            chunks: data[..data.len() - tail].chunks_exact(self.packet_size),
        }
    }
}

/// Iterator over decoded scope packets.
///
/// This struct is created by [`ScopeFormat::decode`]. See its documentation for more.
#[derive(Clone, Debug)]
pub struct Packets<'a> {
    format: &'a ScopeFormat,
    chunks: ChunksExact<'a, u8>,
}

impl Iterator for Packets<'_> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        let chunk = self.chunks.next()?;

        let mut fields = Vec::with_capacity(self.format.fields.len());
        let mut offset = 0;

        for &ty in &self.format.fields {
            // The chunk is exactly packet_size bytes, so these reads cannot fail
            let value = match ty {
                FieldType::Bool => FieldValue::Bool(chunk[offset] & 1 != 0),
                FieldType::Float32 => FieldValue::Float32(chunk.pread_with(offset, LE).unwrap()),
                FieldType::Uint8 => FieldValue::Uint8(chunk[offset]),
                FieldType::Uint16 => FieldValue::Uint16(chunk.pread_with(offset, LE).unwrap()),
                FieldType::Uint32 => FieldValue::Uint32(chunk.pread_with(offset, LE).unwrap()),
                FieldType::Int8 => FieldValue::Int8(chunk[offset] as i8),
                FieldType::Int16 => FieldValue::Int16(chunk.pread_with(offset, LE).unwrap()),
                FieldType::Int32 => FieldValue::Int32(chunk.pread_with(offset, LE).unwrap()),
            };

            fields.push(value);
            offset += ty.size();
        }

        Some(Packet { fields })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for Packets<'_> {}
