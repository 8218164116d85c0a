//! PHDC class-specific descriptor decoding
//!
//! The extra bytes that follow a PHDC interface descriptor are a stream of
//! length-prefixed entries:
//!
//! ```text
//! [bLength: u8][bDescriptorType: u8][payload: bLength - 2 bytes] ...
//! ```
//!
//! `bLength` counts the two header bytes. The stream comes straight from the
//! device, so every read goes through [`DescriptorCursor`] / [`DescriptorEntry`]
//! accessors that fail the parse instead of reading past the end.
//!
//! # Example
//!
//! ```
//! use protocol::{parse_class_descriptors, Specialization};
//!
//! let extra = [
//!     0x05, 0x14, 0x00, 0x01, 0x00, // class function, 11073-20601
//!     0x08, 0x10, 0x00, 0x02, 0x04, 0x00, 0x05, 0x00, // two specializations
//! ];
//! let caps = parse_class_descriptors(&extra);
//! assert!(caps.compatible);
//! assert_eq!(caps.specializations, vec![Specialization(4), Specialization(5)]);
//! ```

use crate::error::{DescriptorError, Result};
use crate::types::{DataCode, PhdcCapabilities, Specialization};
use byteorder::{ByteOrder, LittleEndian};

/// USB interface class of personal healthcare devices
pub const PHDC_INTERFACE_CLASS: u8 = 0x0F;

/// Class-function descriptor tag (carries the data code)
pub const CLASS_FUNCTION_DESCRIPTOR: u8 = 0x14;

/// 11073-PHD function descriptor tag (carries the specialization list)
pub const PHD_FUNCTION_DESCRIPTOR: u8 = 0x10;

/// QoS descriptor tag, skipped by the parser
pub const QOS_DESCRIPTOR: u8 = 0x21;

/// Metadata descriptor tag, skipped by the parser
pub const METADATA_DESCRIPTOR: u8 = 0x22;

/// Offset of the data code inside a class-function entry
pub const DATA_CODE_OFFSET: usize = 3;

/// Data code announcing IEEE 11073-20601 APDUs
pub const DATA_CODE_11073_20601: u8 = 0x01;

/// Data code announcing vendor-specific payloads
pub const DATA_CODE_VENDOR: u8 = 0x00;

/// Offset of the specialization count inside a function entry
pub const SPECIALIZATION_COUNT_OFFSET: usize = 3;

/// Offset of the first specialization code inside a function entry
pub const SPECIALIZATIONS_OFFSET: usize = 4;

/// Length and type bytes
const ENTRY_HEADER_LEN: usize = 2;

/// One length-type-value entry, borrowed from the descriptor buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorEntry<'a> {
    offset: usize,
    bytes: &'a [u8],
}

impl<'a> DescriptorEntry<'a> {
    /// Offset of this entry within the whole stream
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Declared length, header included
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Entries always hold at least their header
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Descriptor type tag
    pub fn kind(&self) -> u8 {
        // Length >= ENTRY_HEADER_LEN is checked by the cursor.
        self.bytes[1]
    }

    /// Raw bytes of the entry, header included
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Read a byte at `index` within the entry
    pub fn byte(&self, index: usize) -> Result<u8> {
        self.bytes
            .get(index)
            .copied()
            .ok_or(DescriptorError::Truncated {
                offset: self.offset.saturating_add(index),
                needed: 1,
                available: self.bytes.len().saturating_sub(index),
            })
    }

    /// Read a little-endian u16 at `index` within the entry
    pub fn u16_le(&self, index: usize) -> Result<u16> {
        let end = index.checked_add(2).filter(|end| *end <= self.bytes.len());
        match end {
            Some(end) => Ok(LittleEndian::read_u16(&self.bytes[index..end])),
            None => Err(DescriptorError::Truncated {
                offset: self.offset.saturating_add(index),
                needed: 2,
                available: self.bytes.len().saturating_sub(index),
            }),
        }
    }
}

/// Bounds-checked walk over a descriptor stream
///
/// Yields one [`DescriptorEntry`] per TLV entry. The first malformed entry
/// yields an error and ends the iteration.
#[derive(Debug, Clone)]
pub struct DescriptorCursor<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> DescriptorCursor<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    /// Current position in the stream
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.offset)
    }

    /// Read the next entry, advancing past it
    pub fn next_entry(&mut self) -> Option<Result<DescriptorEntry<'a>>> {
        let length = *self.buffer.get(self.offset)?;
        let result = self.take_entry(length);
        if result.is_err() {
            // Fuse: nothing after a malformed entry can be trusted.
            self.offset = self.buffer.len();
        }
        Some(result)
    }

    fn take_entry(&mut self, length: u8) -> Result<DescriptorEntry<'a>> {
        let offset = self.offset;
        let length_usize = usize::from(length);

        if length_usize < ENTRY_HEADER_LEN {
            return Err(DescriptorError::InvalidLength { offset, length });
        }

        let available = self.remaining();
        if length_usize > available {
            return Err(DescriptorError::Truncated {
                offset,
                needed: length_usize,
                available,
            });
        }

        let bytes = &self.buffer[offset..offset + length_usize];
        self.offset += length_usize;
        Ok(DescriptorEntry { offset, bytes })
    }
}

impl<'a> Iterator for DescriptorCursor<'a> {
    type Item = Result<DescriptorEntry<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry()
    }
}

/// Decode a class-specific descriptor stream, reporting the first defect
///
/// The data-code verdict follows the last class-function entry carrying a
/// known data code. A later function descriptor replaces the specialization
/// list of an earlier one.
pub fn try_parse_class_descriptors(buffer: &[u8]) -> Result<PhdcCapabilities> {
    let mut data_code = None;
    let mut specializations = Vec::new();

    for entry in DescriptorCursor::new(buffer) {
        let entry = entry?;
        match entry.kind() {
            CLASS_FUNCTION_DESCRIPTOR => match entry.byte(DATA_CODE_OFFSET)? {
                DATA_CODE_11073_20601 => data_code = Some(DataCode::Ieee11073_20601),
                DATA_CODE_VENDOR => data_code = Some(DataCode::Vendor),
                _ => {}
            },
            PHD_FUNCTION_DESCRIPTOR => specializations = read_specializations(&entry)?,
            _ => {}
        }
    }

    let compatible = data_code == Some(DataCode::Ieee11073_20601) && !specializations.is_empty();

    Ok(PhdcCapabilities {
        compatible,
        data_code,
        specializations,
    })
}

/// Decode a class-specific descriptor stream
///
/// Malformed input degrades to an incompatible verdict with no
/// specializations.
pub fn parse_class_descriptors(buffer: &[u8]) -> PhdcCapabilities {
    try_parse_class_descriptors(buffer).unwrap_or_else(|_| PhdcCapabilities::incompatible())
}

fn read_specializations(entry: &DescriptorEntry<'_>) -> Result<Vec<Specialization>> {
    let declared = usize::from(entry.byte(SPECIALIZATION_COUNT_OFFSET)?);
    let available = entry.len().saturating_sub(SPECIALIZATIONS_OFFSET) / 2;
    if declared > available {
        return Err(DescriptorError::SpecializationOverrun {
            declared,
            available,
        });
    }

    (0..declared)
        .map(|i| {
            entry
                .u16_le(SPECIALIZATIONS_OFFSET + 2 * i)
                .map(Specialization)
        })
        .collect()
}
