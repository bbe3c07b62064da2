//! Downward-growing stack in the top quarter of memory.
//!
//! The stack pointer lives in the register file and always addresses the
//! first byte of the most recent entry. An empty stack has `SP == MEM_SIZE`.

use tracing::{debug, warn};

use crate::error::Error;
use crate::header::Header;
use crate::memory::{Memory, MEM_SIZE, STACK_END};
use crate::registers::Registers;
use crate::value::{terminated, Value};

/// What kind of entry starts at a given stack address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discriminator {
    Scalar,
    String,
}

#[derive(Clone, Copy, Debug)]
struct Frame {
    address: usize,
    kind: Discriminator,
}

/// Side table of the entries pushed so far, keyed by their start address.
///
/// Entries whose address is no longer at or above SP have been popped (or
/// abandoned by a direct SP write) and are dropped lazily.
#[derive(Default)]
pub struct Stack {
    frames: Vec<Frame>,
}

impl Stack {
    pub fn new() -> Stack {
        Stack { frames: Vec::new() }
    }

    pub fn reset(&mut self) {
        self.frames.clear();
    }

    /// Recorded kind of the entry at `sp`, if it was pushed through the stack.
    pub fn discriminator(&self, sp: i64) -> Option<Discriminator> {
        self.frames
            .iter()
            .rev()
            .find(|frame| frame.address as i64 == sp)
            .map(|frame| frame.kind)
    }

    pub fn push(
        &mut self,
        memory: &mut Memory,
        registers: &mut Registers,
        value: &Value,
    ) -> Result<(), Error> {
        let (bytes, kind) = match value {
            Value::Str(s) => (terminated(s)?, Discriminator::String),
            Value::Bool(b) => (scalar_bytes(Header::Boolean(*b), *b as i64), Discriminator::Scalar),
            Value::Int(n) => {
                let header = Header::classify(*n);
                debug!(
                    "{n} identified as type {} with size of {}B",
                    header.width(),
                    header.width().size()
                );
                (scalar_bytes(header, *n), Discriminator::Scalar)
            }
        };

        let sp = registers.sp();
        let available = usize::try_from(sp - STACK_END as i64).unwrap_or(0);
        if bytes.len() > available {
            return Err(Error::StackOverflow {
                needed: bytes.len(),
                available,
            });
        }
        if sp > MEM_SIZE as i64 {
            return Err(Error::OutOfBounds {
                address: sp - bytes.len() as i64,
                len: bytes.len(),
            });
        }

        let new_sp = sp as usize - bytes.len();
        memory.store(new_sp, &bytes);
        registers.set_sp(new_sp);
        self.frames.retain(|frame| frame.address as i64 >= sp);
        self.frames.push(Frame {
            address: new_sp,
            kind,
        });

        debug!("Pushed {} bytes to stack, SP = {new_sp}", bytes.len());
        Ok(())
    }

    /// Decodes the top entry without moving SP. Returns the value and the
    /// number of bytes it occupies, or `None` when the stack is empty.
    pub fn peek(
        &self,
        memory: &Memory,
        registers: &Registers,
    ) -> Result<Option<(Value, usize)>, Error> {
        let sp = registers.sp();
        if sp == MEM_SIZE as i64 {
            return Ok(None);
        }
        let top = usize::try_from(sp)
            .ok()
            .filter(|&top| top < MEM_SIZE)
            .ok_or(Error::OutOfBounds {
                address: sp,
                len: 1,
            })?;

        let header = match self.discriminator(sp) {
            Some(Discriminator::String) => None,
            Some(Discriminator::Scalar) | None => Header::decode(memory.byte(top)?),
        };
        let entry = match header {
            Some(Header::Boolean(b)) => (Value::Bool(b), 1),
            Some(header) => {
                let payload = memory.bytes(top + 1, header.width().size())?;
                (
                    Value::Int(header.decode_payload(payload)),
                    header.encoded_len(),
                )
            }
            None => {
                let (s, len) = memory.scan_string(top, MEM_SIZE)?;
                (Value::Str(s), len)
            }
        };
        Ok(Some(entry))
    }

    /// Releases `len` bytes from the top of the stack.
    pub(crate) fn release(&mut self, registers: &mut Registers, len: usize) {
        let new_sp = (registers.sp() as usize + len).min(MEM_SIZE);
        registers.set_sp(new_sp);
        self.frames.retain(|frame| frame.address >= new_sp);
    }

    /// Pops the top entry, restoring SP to its value before the matching
    /// push. Returns `None` without touching anything when the stack is
    /// empty.
    pub fn pop(
        &mut self,
        memory: &Memory,
        registers: &mut Registers,
    ) -> Result<Option<Value>, Error> {
        let Some((value, len)) = self.peek(memory, registers)? else {
            warn!("Nothing to pop, stack is empty");
            return Ok(None);
        };
        self.release(registers, len);
        debug!("Popped {value} ({len}B) from stack");
        Ok(Some(value))
    }

    /// Bytes left before the stack reaches the heap.
    pub fn depth(registers: &Registers) -> i64 {
        registers.sp() - STACK_END as i64
    }

    /// Bytes currently occupied by stack entries.
    pub fn used(registers: &Registers) -> i64 {
        MEM_SIZE as i64 - registers.sp()
    }
}

fn scalar_bytes(header: Header, value: i64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(header.encoded_len());
    bytes.push(header.encode());
    bytes.extend(header.encode_payload(value));
    bytes
}
