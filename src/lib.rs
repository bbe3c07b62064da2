//! A small interpreter for single-line, assembly-like instructions.
//!
//! The machine has 4096 bytes of memory, the top quarter of which holds a
//! downward-growing stack, and sixteen 32-bit registers (`R0`..`R13`,
//! `FLAGS`, `SP`). Lines are fed one at a time to [`Vm::execute`]:
//!
//! ```
//! let mut vm = asmb::Vm::new();
//! vm.execute("mov [100], 10").unwrap();
//! vm.execute("add [100], 5 ; now 15").unwrap();
//! assert_eq!(vm.read_memory(100), Ok(asmb::Value::Int(15)));
//! ```

pub mod error;
pub mod header;
pub mod memory;
pub mod operand;
pub mod registers;
pub mod stack;
pub mod value;
pub mod vm;

pub use error::Error;
pub use registers::{Register, RegisterWrite};
pub use value::Value;
pub use vm::{Status, Vm};
