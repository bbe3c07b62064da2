//! Classification of single operand tokens.
//!
//! ```text
//! [R1]  [100]     memory, dereferenced when the instruction runs
//! R1  SP  FLAGS   register
//! "text" 'text'   string literal
//! 42  -7  0x2A    immediate
//! ```

use std::fmt;

use crate::error::Error;
use crate::registers::Register;

/// Where a memory operand points.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Address {
    Absolute(i64),
    /// Address held in a register.
    Indirect(Register),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Immediate(i64),
    Register(Register),
    Memory(Address),
    String(String),
}

impl Operand {
    pub fn parse(token: &str) -> Result<Operand, Error> {
        let token = token.trim();

        if let Some(inner) = token
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        {
            let inner = inner.trim();
            if looks_like_register(inner) {
                return Ok(Operand::Memory(Address::Indirect(inner.parse()?)));
            }
            return match parse_integer(inner) {
                Some(address) => Ok(Operand::Memory(Address::Absolute(address))),
                None => Err(Error::InvalidOperand(token.to_string())),
            };
        }

        if looks_like_register(token) {
            return Ok(Operand::Register(token.parse()?));
        }

        if let Some(text) = quoted(token) {
            return Ok(Operand::String(text.to_string()));
        }

        if let Some(value) = parse_integer(token) {
            return Ok(Operand::Immediate(value));
        }
        if let Some(value) = token.parse::<f64>().ok().filter(|v| v.is_finite()) {
            // Exponent forms such as `1e3` are fine as long as they name an
            // integer that f64 represents exactly.
            if value.fract() == 0.0 && value.abs() <= MAX_EXACT_FLOAT {
                return Ok(Operand::Immediate(value as i64));
            }
            return Err(Error::NotAnInteger(token.to_string()));
        }

        Err(Error::InvalidOperand(token.to_string()))
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Operand::Immediate(_) => "immediate",
            Operand::Register(_) => "register",
            Operand::Memory(_) => "memory",
            Operand::String(_) => "string",
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Absolute(address) => write!(f, "[{address}]"),
            Address::Indirect(register) => write!(f, "[{register}]"),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Immediate(value) => write!(f, "{value}"),
            Operand::Register(register) => write!(f, "{register}"),
            Operand::Memory(address) => write!(f, "{address}"),
            Operand::String(text) => write!(f, "{text:?}"),
        }
    }
}

/// 2^53, the largest magnitude below which every integer is an exact f64.
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

/// `R` followed by letters or digits, `SP` or `FLAGS`. Such tokens are
/// always treated as registers, so `RAX` is an invalid register rather
/// than an invalid operand.
fn looks_like_register(token: &str) -> bool {
    if token.eq_ignore_ascii_case("SP") || token.eq_ignore_ascii_case("FLAGS") {
        return true;
    }
    let mut chars = token.chars();
    matches!(chars.next(), Some('R' | 'r'))
        && token.len() > 1
        && chars.all(|c| c.is_ascii_alphanumeric())
}

fn quoted(token: &str) -> Option<&str> {
    ['"', '\''].into_iter().find_map(|quote| {
        token
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
    })
}

/// Decimal integer with optional sign, or `0x`/`0o`/`0b` prefixed.
fn parse_integer(token: &str) -> Option<i64> {
    let (negative, unsigned) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token.strip_prefix('+').unwrap_or(token)),
    };
    let (radix, digits) = match unsigned.get(..2) {
        Some("0x" | "0X") => (16, &unsigned[2..]),
        Some("0o" | "0O") => (8, &unsigned[2..]),
        Some("0b" | "0B") => (2, &unsigned[2..]),
        _ => (10, unsigned),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }

    let magnitude = i128::from_str_radix(digits, radix).ok()?;
    i64::try_from(if negative { -magnitude } else { magnitude }).ok()
}
