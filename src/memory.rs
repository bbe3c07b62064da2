use std::collections::BTreeSet;

use tracing::debug;

use crate::error::Error;
use crate::header::Header;
use crate::value::{terminated, Value};

pub const MEM_SIZE: usize = 4096;
/// Lowest address of the stack region; everything below is heap.
pub const STACK_END: usize = MEM_SIZE - MEM_SIZE / 4;

/// Byte-addressable store shared by the heap and the stack.
///
/// Scalars are written as a [`Header`] followed by their little-endian
/// payload, strings as raw bytes plus a zero terminator. Addresses where a
/// string was written are remembered so that reads do not have to guess
/// from the first byte; the header heuristic is only the fallback for bytes
/// the memory did not write itself.
pub struct Memory {
    cells: Box<[u8]>,
    strings: BTreeSet<usize>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory {
            cells: vec![0; MEM_SIZE].into_boxed_slice(),
            strings: BTreeSet::new(),
        }
    }

    pub fn reset(&mut self) {
        self.cells.fill(0);
        self.strings.clear();
    }

    /// Writes `value` into the heap region starting at `address`.
    ///
    /// Nothing is written unless the whole encoding fits below
    /// [`STACK_END`].
    pub fn write(&mut self, address: i64, value: &Value) -> Result<(), Error> {
        match value {
            Value::Str(s) => {
                let bytes = terminated(s)?;
                let start = heap_range(address, bytes.len())?;
                self.store(start, &bytes);
                self.strings.insert(start);

                debug!(
                    "Successfully uploaded string ({}B) to address {start}",
                    bytes.len()
                );
            }
            Value::Bool(b) => self.write_scalar(address, Header::Boolean(*b), *b as i64)?,
            Value::Int(n) => self.write_scalar(address, Header::classify(*n), *n)?,
        }
        Ok(())
    }

    fn write_scalar(&mut self, address: i64, header: Header, value: i64) -> Result<(), Error> {
        let start = heap_range(address, header.encoded_len())?;
        let mut bytes = Vec::with_capacity(header.encoded_len());
        bytes.push(header.encode());
        bytes.extend(header.encode_payload(value));
        self.store(start, &bytes);

        debug!(
            "Successfully wrote {} value {value} to address {start}",
            header.width()
        );
        Ok(())
    }

    /// Reads the value starting at `address` in the heap region.
    pub fn read(&self, address: i64) -> Result<Value, Error> {
        let start = heap_range(address, 1)?;
        if self.strings.contains(&start) {
            return self.scan_string(start, STACK_END).map(|(s, _)| Value::Str(s));
        }

        match Header::decode(self.cells[start]) {
            Some(Header::Boolean(b)) => Ok(Value::Bool(b)),
            Some(header) => {
                heap_range(address, header.encoded_len())?;
                let payload = &self.cells[start + 1..start + header.encoded_len()];
                Ok(Value::Int(header.decode_payload(payload)))
            }
            None => self.scan_string(start, STACK_END).map(|(s, _)| Value::Str(s)),
        }
    }

    /// Scans a zero-terminated string starting at `start` without crossing
    /// `end`. Returns the string and the number of bytes it occupies,
    /// terminator included.
    pub(crate) fn scan_string(&self, start: usize, end: usize) -> Result<(String, usize), Error> {
        let region = self.cells.get(start..end).ok_or(Error::OutOfBounds {
            address: start as i64,
            len: 1,
        })?;
        let len = region
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::UnterminatedString(start))?;
        Ok((
            String::from_utf8_lossy(&region[..len]).into_owned(),
            len + 1,
        ))
    }

    pub(crate) fn byte(&self, address: usize) -> Result<u8, Error> {
        self.cells.get(address).copied().ok_or(Error::OutOfBounds {
            address: address as i64,
            len: 1,
        })
    }

    /// Raw bytes anywhere in memory, stack region included.
    pub fn bytes(&self, address: usize, len: usize) -> Result<&[u8], Error> {
        address
            .checked_add(len)
            .and_then(|end| self.cells.get(address..end))
            .ok_or(Error::OutOfBounds {
                address: address as i64,
                len,
            })
    }

    /// Copies `bytes` to `address`. The caller has bounds-checked the range.
    pub(crate) fn store(&mut self, address: usize, bytes: &[u8]) {
        self.cells[address..address + bytes.len()].copy_from_slice(bytes);
        let overwritten: Vec<usize> = self
            .strings
            .range(address..address + bytes.len())
            .copied()
            .collect();
        for start in overwritten {
            self.strings.remove(&start);
        }
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks that `len` bytes at `address` lie in the heap region.
fn heap_range(address: i64, len: usize) -> Result<usize, Error> {
    let out_of_bounds = Error::OutOfBounds { address, len };
    let start = usize::try_from(address).map_err(|_| out_of_bounds.clone())?;
    if start >= STACK_END || start + len > STACK_END {
        return Err(out_of_bounds);
    }
    Ok(start)
}
