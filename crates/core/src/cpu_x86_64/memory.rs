//! Sparse flat memory space
//!
//! Memory is a byte map plus a list of named segments. Bytes that were never
//! written read as zero, unless the space is strict, in which case reads
//! outside every segment and every written byte fault.

use super::{Fault, Width};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Load address of the `.main` segment
pub const MAIN_ORIGIN: u64 = 0x1000;
/// First byte of the `.heap` segment
pub const HEAP_START: u64 = 0x40_0001;
/// One past the last byte of the `.heap` segment
pub const HEAP_END: u64 = 0x60_0000;
/// First byte of the `.stack` segment
pub const STACK_START: u64 = 0x60_0000;
/// Initial RSP/RBP; one past the last byte of the `.stack` segment
pub const STACK_TOP: u64 = 0x80_0000;

/// A named address range `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    pub start: u64,
    pub end: u64,
}

impl Segment {
    pub fn new(name: &str, start: u64, end: u64) -> Self {
        Self {
            name: name.to_string(),
            start,
            end,
        }
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Byte-addressable guest memory
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemorySpace {
    cells: BTreeMap<u64, u8>,
    segments: Vec<Segment>,
    end: u64,
    strict: bool,
}

impl MemorySpace {
    /// Empty memory with no segments
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory seeded with `code` at [`MAIN_ORIGIN`] plus empty heap and stack
    pub fn from_code(code: &[u8]) -> Self {
        Self::with_origin(MAIN_ORIGIN, code)
    }

    /// Memory seeded with `code` at `origin` plus empty heap and stack
    pub fn with_origin(origin: u64, code: &[u8]) -> Self {
        let mut memory = Self {
            cells: BTreeMap::new(),
            segments: vec![
                Segment::new(".main", origin, origin + code.len() as u64),
                Segment::new(".heap", HEAP_START, HEAP_END),
                Segment::new(".stack", STACK_START, STACK_TOP),
            ],
            end: origin + code.len() as u64,
            strict: false,
        };
        memory.write(origin, code);
        memory
    }

    /// Address one past the last code byte; the fetch loop stops here
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Start of the `.main` segment (zero if there is none)
    pub fn entry_point(&self) -> u64 {
        self.segment(".main").map(|s| s.start).unwrap_or(0)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }

    /// Add a segment, replacing one with the same name
    pub fn add_segment(&mut self, segment: Segment) {
        self.segments.retain(|s| s.name != segment.name);
        self.segments.push(segment);
    }

    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// True if the byte was written or lies inside a segment
    pub fn is_mapped(&self, address: u64) -> bool {
        self.cells.contains_key(&address) || self.segments.iter().any(|s| s.contains(address))
    }

    /// Read one byte, returning zero for unmapped addresses
    #[inline]
    pub fn read_byte(&self, address: u64) -> u8 {
        self.cells.get(&address).copied().unwrap_or(0)
    }

    /// Read one byte, honouring strict mode
    #[inline]
    pub fn try_read_byte(&self, address: u64) -> Result<u8, Fault> {
        if self.strict && !self.is_mapped(address) {
            return Err(Fault::UnmappedMemory { address });
        }
        Ok(self.read_byte(address))
    }

    /// Read `len` consecutive bytes
    pub fn read(&self, address: u64, len: usize) -> Result<Vec<u8>, Fault> {
        (0..len as u64)
            .map(|i| self.try_read_byte(address.wrapping_add(i)))
            .collect()
    }

    /// Read a little-endian value of at most eight bytes
    pub fn read_value(&self, address: u64, width: Width) -> Result<u64, Fault> {
        let bytes = self.read(address, width.bytes().min(8))?;
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Write consecutive bytes
    pub fn write(&mut self, address: u64, bytes: &[u8]) {
        for (i, &byte) in bytes.iter().enumerate() {
            self.cells.insert(address.wrapping_add(i as u64), byte);
        }
    }

    /// Write the low `width` bytes of `value` little-endian
    pub fn write_value(&mut self, address: u64, width: Width, value: u64) {
        let n = width.bytes().min(8);
        self.write(address, &value.to_le_bytes()[..n]);
    }

    /// Replace the `.main` image with `code`, keeping every other byte
    pub fn flash(&mut self, code: &[u8]) {
        let origin = self.entry_point();
        if let Some(old) = self.segment(".main").cloned() {
            let stale: Vec<u64> = self.cells.range(old.start..old.end).map(|(a, _)| *a).collect();
            for address in stale {
                self.cells.remove(&address);
            }
        }
        let end = origin + code.len() as u64;
        self.add_segment(Segment::new(".main", origin, end));
        self.end = end;
        self.write(origin, code);
    }

    /// Copy of `len` bytes starting at `address`, unmapped bytes as zero
    pub fn dump(&self, address: u64, len: usize) -> Vec<u8> {
        (0..len as u64)
            .map(|i| self.read_byte(address.wrapping_add(i)))
            .collect()
    }

    /// Every written byte in address order
    pub fn cells(&self) -> impl Iterator<Item = (u64, u8)> + '_ {
        self.cells.iter().map(|(a, b)| (*a, *b))
    }
}
