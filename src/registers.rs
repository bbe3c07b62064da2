use std::fmt;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::error::Error;
use crate::memory::MEM_SIZE;

pub const REG_COUNT: usize = 16;
const FLAGS: usize = REG_COUNT - 2;
const SP: usize = REG_COUNT - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Register {
    /// `R0`..`R13`. `R0` reads as zero and cannot be written.
    General(u8),
    Flags,
    Sp,
}

impl Register {
    /// General-purpose register by index, `1..=13`.
    pub fn general(index: usize) -> Result<Register, Error> {
        match index {
            0 => Err(Error::ReadOnlyRegister("R0".into())),
            n if n < FLAGS => Ok(Register::General(n as u8)),
            _ => Err(Error::InvalidRegister(format!("R{index}"))),
        }
    }

    /// Slot index in the register file. `General(n)` is only valid for
    /// `n < 14`; the upper slots are reachable by name only.
    fn slot(self) -> Result<usize, Error> {
        match self {
            Register::General(n) if (n as usize) < FLAGS => Ok(n as usize),
            Register::General(n) => Err(Error::InvalidRegister(format!("R{n}"))),
            Register::Flags => Ok(FLAGS),
            Register::Sp => Ok(SP),
        }
    }
}

impl FromStr for Register {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            "SP" | "RSP" => return Ok(Register::Sp),
            "FLAGS" | "RFLAGS" => return Ok(Register::Flags),
            _ => {}
        }

        let invalid = || Error::InvalidRegister(name.to_string());
        let digits = upper.strip_prefix('R').ok_or_else(invalid)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        match digits.parse::<usize>() {
            Ok(n) if n < FLAGS => Ok(Register::General(n as u8)),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::General(n) => write!(f, "R{n}"),
            Register::Flags => f.write_str("FLAGS"),
            Register::Sp => f.write_str("SP"),
        }
    }
}

/// Outcome of a successful register write.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterWrite {
    Committed,
    /// The stack pointer was replaced directly; stack invariants no longer
    /// hold unless the caller restores them.
    StackPointerOverridden,
}

pub struct Registers {
    slots: [i32; REG_COUNT],
}

impl Registers {
    pub fn new() -> Registers {
        let mut slots = [0; REG_COUNT];
        slots[SP] = MEM_SIZE as i32;
        Registers { slots }
    }

    pub fn fetch(&self, register: Register) -> Result<i32, Error> {
        Ok(self.slots[register.slot()?])
    }

    /// Checks that `value` may be written to `register` without writing it.
    pub fn check(register: Register, value: i64) -> Result<i32, Error> {
        register.slot()?;
        if register == Register::General(0) {
            return Err(Error::ReadOnlyRegister(register.to_string()));
        }
        i32::try_from(value).map_err(|_| Error::RegisterOverflow(value))
    }

    pub fn set(&mut self, register: Register, value: i64) -> Result<RegisterWrite, Error> {
        let value = Registers::check(register, value)?;
        self.slots[register.slot()?] = value;

        if register == Register::Sp {
            warn!("Changing the stack pointer is undefined behavior. Here be dragons!");
            return Ok(RegisterWrite::StackPointerOverridden);
        }
        debug!("Successfully changed register \"{register}\" to {value}");
        Ok(RegisterWrite::Committed)
    }

    pub(crate) fn sp(&self) -> i64 {
        self.slots[SP] as i64
    }

    /// Moves the stack pointer on behalf of the stack. `sp` never exceeds
    /// [`MEM_SIZE`], so it always fits.
    pub(crate) fn set_sp(&mut self, sp: usize) {
        self.slots[SP] = sp as i32;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Register, i32)> + '_ {
        self.slots.iter().enumerate().map(|(slot, &value)| {
            let register = match slot {
                FLAGS => Register::Flags,
                SP => Register::Sp,
                n => Register::General(n as u8),
            };
            (register, value)
        })
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}
