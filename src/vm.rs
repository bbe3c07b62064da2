use tracing::{debug, warn};

use crate::error::Error;
use crate::memory::Memory;
use crate::operand::{Address, Operand};
use crate::registers::{Register, RegisterWrite, Registers};
use crate::stack::Stack;
use crate::value::Value;

/// Notable, non-fatal conditions raised by a successful instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Done,
    /// The stack pointer was written directly.
    StackPointerOverridden,
    /// `pop` found nothing and stored the zero sentinel instead.
    StackEmpty,
}

impl From<RegisterWrite> for Status {
    fn from(write: RegisterWrite) -> Self {
        match write {
            RegisterWrite::Committed => Status::Done,
            RegisterWrite::StackPointerOverridden => Status::StackPointerOverridden,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Instruction {
    Mov,
    Push,
    Pop,
    Add,
    Sub,
}

impl Instruction {
    fn from_name(name: &str) -> Option<Instruction> {
        match name {
            MOV => Some(Instruction::Mov),
            PUSH => Some(Instruction::Push),
            POP => Some(Instruction::Pop),
            ADD => Some(Instruction::Add),
            SUB => Some(Instruction::Sub),
            _ => None,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Instruction::Mov => MOV,
            Instruction::Push => PUSH,
            Instruction::Pop => POP,
            Instruction::Add => ADD,
            Instruction::Sub => SUB,
        }
    }

    const fn arity(self) -> usize {
        match self {
            Instruction::Push | Instruction::Pop => 1,
            Instruction::Mov | Instruction::Add | Instruction::Sub => 2,
        }
    }
}

/// Resolved destination of a write.
#[derive(Clone, Copy, Debug)]
enum Target {
    Memory(i64),
    Register(Register),
}

/// The whole machine: memory, registers and the stack bookkeeping. Every
/// instruction runs to completion against this state before the next one
/// starts, and a failing instruction leaves it untouched.
pub struct Vm {
    memory: Memory,
    registers: Registers,
    stack: Stack,
}

impl Vm {
    pub fn new() -> Vm {
        Vm {
            memory: Memory::new(),
            registers: Registers::new(),
            stack: Stack::new(),
        }
    }

    pub fn reset(&mut self) {
        self.memory.reset();
        self.registers = Registers::new();
        self.stack.reset();
    }

    /// Executes every line of `source`, stopping at the first failure.
    pub fn run(&mut self, source: &str) -> Result<(), Error> {
        for (index, line) in source.lines().enumerate() {
            self.execute(line).map_err(|source| Error::AtLine {
                line: index + 1,
                source: Box::new(source),
            })?;
        }
        Ok(())
    }

    /// Parses and executes a single line.
    pub fn execute(&mut self, line: &str) -> Result<Status, Error> {
        let tokens = tokenize(line)?;
        let Some((name, args)) = tokens.split_first() else {
            return Ok(Status::Done);
        };
        let instruction = Instruction::from_name(&name.to_ascii_lowercase())
            .ok_or_else(|| Error::UnknownInstruction(name.to_string()))?;
        if args.len() != instruction.arity() {
            return Err(Error::ArityMismatch {
                instruction: instruction.name(),
                expected: instruction.arity(),
                actual: args.len(),
            });
        }
        let operands = args
            .iter()
            .map(|arg| Operand::parse(arg))
            .collect::<Result<Vec<_>, _>>()?;

        match (instruction, operands.as_slice()) {
            (Instruction::Mov, [dst, src]) => {
                let target = self.target(instruction, dst)?;
                let value = self.source(src)?;
                debug!("mov {dst} <- {value}");
                self.store(instruction, target, value)
            }
            (Instruction::Push, [src]) => {
                let value = self.source(src)?;
                debug!("push {value}");
                self.stack
                    .push(&mut self.memory, &mut self.registers, &value)?;
                Ok(Status::Done)
            }
            (Instruction::Pop, [dst]) => {
                let target = self.target(instruction, dst)?;
                self.pop(target)
            }
            (Instruction::Add, [dst, src]) => {
                self.arithmetic(instruction, dst, src, i64::checked_add)
            }
            (Instruction::Sub, [dst, src]) => {
                self.arithmetic(instruction, dst, src, i64::checked_sub)
            }
            _ => Err(Error::ArityMismatch {
                instruction: instruction.name(),
                expected: instruction.arity(),
                actual: operands.len(),
            }),
        }
    }

    pub fn read_memory(&self, address: i64) -> Result<Value, Error> {
        self.memory.read(address)
    }

    pub fn write_memory(&mut self, address: i64, value: &Value) -> Result<(), Error> {
        self.memory.write(address, value)
    }

    /// Raw bytes at `address`, anywhere in memory. Unlike
    /// [`Vm::read_memory`] this reaches into the stack region and decodes
    /// nothing.
    pub fn inspect_memory(&self, address: usize, len: usize) -> Result<&[u8], Error> {
        self.memory.bytes(address, len)
    }

    /// Decodes the top stack entry without popping it.
    pub fn stack_top(&self) -> Result<Option<Value>, Error> {
        Ok(self
            .stack
            .peek(&self.memory, &self.registers)?
            .map(|(value, _)| value))
    }

    pub fn read_register(&self, name: &str) -> Result<i32, Error> {
        self.registers.fetch(name.parse()?)
    }

    /// Writing `SP` is allowed but bypasses every stack invariant; the
    /// returned [`RegisterWrite`] says so.
    pub fn write_register(&mut self, name: &str, value: i64) -> Result<RegisterWrite, Error> {
        self.registers.set(name.parse()?, value)
    }

    /// Writes general-purpose register `R<index>`, `1..=13`.
    pub fn write_register_index(
        &mut self,
        index: usize,
        value: i64,
    ) -> Result<RegisterWrite, Error> {
        self.registers.set(Register::general(index)?, value)
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    /// Bytes left before the stack runs into the heap.
    pub fn stack_depth(&self) -> i64 {
        Stack::depth(&self.registers)
    }

    pub fn stack_used(&self) -> i64 {
        Stack::used(&self.registers)
    }

    fn address(&self, address: &Address) -> Result<i64, Error> {
        match address {
            Address::Absolute(address) => Ok(*address),
            Address::Indirect(register) => Ok(self.registers.fetch(*register)? as i64),
        }
    }

    fn source(&self, operand: &Operand) -> Result<Value, Error> {
        match operand {
            Operand::Immediate(value) => Ok(Value::Int(*value)),
            Operand::String(text) => Ok(Value::Str(text.clone())),
            Operand::Memory(address) => self.memory.read(self.address(address)?),
            Operand::Register(register) => {
                Err(Error::CannotUseRegisterNameAsValue(register.to_string()))
            }
        }
    }

    fn target(&self, instruction: Instruction, operand: &Operand) -> Result<Target, Error> {
        match operand {
            Operand::Memory(address) => Ok(Target::Memory(self.address(address)?)),
            Operand::Register(register) => Ok(Target::Register(*register)),
            other => Err(Error::TypeMismatch {
                instruction: instruction.name(),
                expected: "register or memory destination",
                actual: other.kind(),
            }),
        }
    }

    fn store(
        &mut self,
        instruction: Instruction,
        target: Target,
        value: Value,
    ) -> Result<Status, Error> {
        match target {
            Target::Memory(address) => {
                self.memory.write(address, &value)?;
                Ok(Status::Done)
            }
            Target::Register(register) => {
                let value = integer(instruction, &value)?;
                Ok(self.registers.set(register, value)?.into())
            }
        }
    }

    fn pop(&mut self, target: Target) -> Result<Status, Error> {
        let Some((value, len)) = self.stack.peek(&self.memory, &self.registers)? else {
            warn!("Nothing to pop, returned 0");
            self.store(Instruction::Pop, target, Value::Int(0))?;
            return Ok(Status::StackEmpty);
        };
        debug!("pop {value} ({len}B)");

        // The entry is released only once the destination accepted it.
        match target {
            Target::Memory(address) => {
                self.memory.write(address, &value)?;
                self.stack.release(&mut self.registers, len);
                Ok(Status::Done)
            }
            Target::Register(register) => {
                let value = integer(Instruction::Pop, &value)?;
                Registers::check(register, value)?;
                self.stack.release(&mut self.registers, len);
                Ok(self.registers.set(register, value)?.into())
            }
        }
    }

    fn arithmetic(
        &mut self,
        instruction: Instruction,
        dst: &Operand,
        src: &Operand,
        op: fn(i64, i64) -> Option<i64>,
    ) -> Result<Status, Error> {
        let target = self.target(instruction, dst)?;
        let operand = match src {
            Operand::Register(register) => {
                return Err(Error::CannotUseRegisterNameAsValue(register.to_string()));
            }
            other => integer(instruction, &self.source(other)?)?,
        };

        let current = match target {
            Target::Memory(address) => integer(instruction, &self.memory.read(address)?)?,
            Target::Register(register) => self.registers.fetch(register)? as i64,
        };
        let result = op(current, operand).ok_or(Error::ArithmeticOverflow)?;
        debug!("{} {dst} = {current} -> {result}", instruction.name());

        self.store(instruction, target, Value::Int(result))
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn integer(instruction: Instruction, value: &Value) -> Result<i64, Error> {
    value.as_int().ok_or(Error::TypeMismatch {
        instruction: instruction.name(),
        expected: "integer",
        actual: value.type_name(),
    })
}

/// Splits a line into tokens.
///
/// - whitespace and commas separate tokens
/// - `'...'` and `"..."` are single tokens, quotes included
/// - `;` outside quotes starts a comment running to the end of the line
fn tokenize(line: &str) -> Result<Vec<&str>, Error> {
    let mut tokens = Vec::with_capacity(4);
    let mut start: Option<usize> = None;
    let mut quote: Option<char> = None;
    let mut end = line.len();

    for (i, c) in line.char_indices() {
        if let Some(open) = quote {
            if c == open {
                quote = None;
            }
            continue;
        }
        match c {
            COMMENT_CHAR => {
                end = i;
                break;
            }
            '"' | '\'' => {
                start.get_or_insert(i);
                quote = Some(c);
            }
            c if c == ',' || c.is_whitespace() => {
                if let Some(s) = start.take() {
                    tokens.push(&line[s..i]);
                }
            }
            _ => {
                start.get_or_insert(i);
            }
        }
    }

    if let Some(s) = start {
        if quote.is_some() {
            return Err(Error::InvalidOperand(line[s..].to_string()));
        }
        tokens.push(&line[s..end]);
    }
    Ok(tokens)
}

const COMMENT_CHAR: char = ';';

const MOV: &str = "mov";
const PUSH: &str = "push";
const POP: &str = "pop";
const ADD: &str = "add";
const SUB: &str = "sub";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MEM_SIZE, STACK_END};

    #[test]
    fn tokenize_basic() {
        assert_eq!(tokenize("mov R1, 42").unwrap(), vec!["mov", "R1", "42"]);
        assert_eq!(tokenize("  add   [100] ,5 ").unwrap(), vec!["add", "[100]", "5"]);
        assert!(tokenize("").unwrap().is_empty());
        assert!(tokenize("   ").unwrap().is_empty());
    }

    #[test]
    fn tokenize_quotes() {
        assert_eq!(
            tokenize("push \"hello, world; x\"").unwrap(),
            vec!["push", "\"hello, world; x\""]
        );
        assert_eq!(
            tokenize("mov [0], 'it\"s'").unwrap(),
            vec!["mov", "[0]", "'it\"s'"]
        );
        assert!(matches!(
            tokenize("push \"open"),
            Err(Error::InvalidOperand(_))
        ));
    }

    #[test]
    fn tokenize_comments() {
        assert!(tokenize("; this is a comment").unwrap().is_empty());
        assert!(tokenize(";").unwrap().is_empty());
        assert_eq!(tokenize("push 1 ; one").unwrap(), vec!["push", "1"]);
        assert_eq!(tokenize("push 1;one").unwrap(), vec!["push", "1"]);
        assert_eq!(tokenize("pop R2 ;a ;b c").unwrap(), vec!["pop", "R2"]);
    }

    #[test]
    fn mov_immediate_to_register() {
        let mut vm = Vm::new();
        assert_eq!(vm.execute("mov R1, 42"), Ok(Status::Done));
        assert_eq!(vm.read_register("R1"), Ok(42));
        assert_eq!(vm.execute("MOV r2 -5"), Ok(Status::Done));
        assert_eq!(vm.read_register("R2"), Ok(-5));
    }

    #[test]
    fn mov_string_to_register_is_a_type_error() {
        let mut vm = Vm::new();
        assert!(matches!(
            vm.execute("mov R1, \"x\""),
            Err(Error::TypeMismatch {
                instruction: "mov",
                actual: "string",
                ..
            })
        ));
        assert_eq!(vm.read_register("R1"), Ok(0));
    }

    #[test]
    fn mov_register_source_is_rejected() {
        let mut vm = Vm::new();
        assert_eq!(
            vm.execute("mov R1, R2"),
            Err(Error::CannotUseRegisterNameAsValue("R2".into()))
        );
    }

    #[test]
    fn mov_to_memory() {
        let mut vm = Vm::new();
        vm.execute("mov [10], 1000").unwrap();
        vm.execute("mov [20], \"hi there\"").unwrap();
        assert_eq!(vm.read_memory(10), Ok(Value::Int(1000)));
        assert_eq!(vm.read_memory(20), Ok(Value::from("hi there")));
    }

    #[test]
    fn mov_from_memory() {
        let mut vm = Vm::new();
        vm.write_memory(40, &Value::Int(-300)).unwrap();
        vm.execute("mov R4, [40]").unwrap();
        assert_eq!(vm.read_register("R4"), Ok(-300));
    }

    #[test]
    fn mov_to_immediate_is_rejected() {
        let mut vm = Vm::new();
        assert!(matches!(
            vm.execute("mov 5, 6"),
            Err(Error::TypeMismatch {
                actual: "immediate",
                ..
            })
        ));
    }

    #[test]
    fn indirect_memory() {
        let mut vm = Vm::new();
        vm.execute("mov R3, 200").unwrap();
        vm.execute("mov [R3], 77").unwrap();
        assert_eq!(vm.read_memory(200), Ok(Value::Int(77)));
        vm.execute("add [R3], 3").unwrap();
        assert_eq!(vm.read_memory(200), Ok(Value::Int(80)));
    }

    #[test]
    fn add_to_memory() {
        let mut vm = Vm::new();
        vm.write_memory(100, &Value::Int(10)).unwrap();
        vm.execute("add [100], 5").unwrap();
        assert_eq!(vm.read_memory(100), Ok(Value::Int(15)));
    }

    #[test]
    fn add_and_sub_registers() {
        let mut vm = Vm::new();
        vm.execute("mov R1, 10").unwrap();
        vm.execute("add R1, 32").unwrap();
        assert_eq!(vm.read_register("R1"), Ok(42));
        vm.execute("sub R1, 50").unwrap();
        assert_eq!(vm.read_register("R1"), Ok(-8));
    }

    #[test]
    fn add_rejects_strings_and_registers() {
        let mut vm = Vm::new();
        assert!(matches!(
            vm.execute("add R1, \"s\""),
            Err(Error::TypeMismatch { .. })
        ));
        assert_eq!(
            vm.execute("sub R1, R2"),
            Err(Error::CannotUseRegisterNameAsValue("R2".into()))
        );
        vm.write_memory(0, &Value::from("text")).unwrap();
        assert!(matches!(
            vm.execute("add [0], 1"),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn register_overflow_leaves_register_untouched() {
        let mut vm = Vm::new();
        vm.execute("mov R1, 2147483647").unwrap();
        assert_eq!(
            vm.execute("add R1, 1"),
            Err(Error::RegisterOverflow(2147483648))
        );
        assert_eq!(vm.read_register("R1"), Ok(i32::MAX));
    }

    #[test]
    fn push_and_pop() {
        let mut vm = Vm::new();
        vm.execute("push 1234").unwrap();
        vm.execute("push \"abc\"").unwrap();
        assert_eq!(vm.stack_used(), 3 + 4);
        vm.execute("pop [0]").unwrap();
        vm.execute("pop R5").unwrap();
        assert_eq!(vm.read_memory(0), Ok(Value::from("abc")));
        assert_eq!(vm.read_register("R5"), Ok(1234));
        assert_eq!(vm.read_register("SP"), Ok(MEM_SIZE as i32));
    }

    #[test]
    fn pop_empty_reports_sentinel() {
        let mut vm = Vm::new();
        vm.execute("mov R1, 9").unwrap();
        assert_eq!(vm.execute("pop R1"), Ok(Status::StackEmpty));
        assert_eq!(vm.read_register("R1"), Ok(0));
        assert_eq!(vm.read_register("SP"), Ok(MEM_SIZE as i32));
    }

    #[test]
    fn failed_pop_keeps_entry() {
        let mut vm = Vm::new();
        vm.execute("push \"s\"").unwrap();
        assert!(matches!(
            vm.execute("pop R1"),
            Err(Error::TypeMismatch { .. })
        ));
        assert_eq!(vm.stack_used(), 2);
        vm.execute("pop [5]").unwrap();
        assert_eq!(vm.read_memory(5), Ok(Value::from("s")));
        assert_eq!(vm.stack_used(), 0);
    }

    #[test]
    fn pop_out_of_register_range_keeps_entry() {
        let mut vm = Vm::new();
        vm.execute("push 4294967295").unwrap();
        let sp = vm.read_register("SP");
        assert_eq!(
            vm.execute("pop R1"),
            Err(Error::RegisterOverflow(4294967295))
        );
        assert_eq!(vm.read_register("SP"), sp);
        assert_eq!(vm.stack_used(), 5);
        assert_eq!(vm.read_register("R1"), Ok(0));
        vm.execute("pop [0]").unwrap();
        assert_eq!(vm.read_memory(0), Ok(Value::Int(4294967295)));
        assert_eq!(vm.stack_used(), 0);
    }

    #[test]
    fn stack_is_inspectable() {
        let mut vm = Vm::new();
        assert_eq!(vm.stack_top(), Ok(None));
        vm.execute("push 7").unwrap();
        assert_eq!(vm.inspect_memory(MEM_SIZE - 2, 2), Ok(&[0x01, 7][..]));
        assert_eq!(vm.stack_top(), Ok(Some(Value::Int(7))));
        assert_eq!(vm.stack_used(), 2);
        assert!(matches!(
            vm.read_memory(MEM_SIZE as i64 - 2),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(matches!(
            vm.inspect_memory(MEM_SIZE, 1),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn indirect_through_any_register_name() {
        let mut vm = Vm::new();
        vm.execute("mov R13, 64").unwrap();
        vm.execute("mov [R13], 5").unwrap();
        assert_eq!(vm.read_memory(64), Ok(Value::Int(5)));
        assert_eq!(
            vm.registers().fetch(Register::General(200)),
            Err(Error::InvalidRegister("R200".into()))
        );
    }

    #[test]
    fn comment_line_is_a_no_op() {
        let mut vm = Vm::new();
        assert_eq!(vm.execute("; this is a comment"), Ok(Status::Done));
        assert_eq!(vm.execute(""), Ok(Status::Done));
        assert_eq!(vm.read_register("SP"), Ok(MEM_SIZE as i32));
        assert_eq!(vm.stack_depth(), (MEM_SIZE - STACK_END) as i64);
    }

    #[test]
    fn unknown_instruction_and_arity() {
        let mut vm = Vm::new();
        assert_eq!(
            vm.execute("jmp 5"),
            Err(Error::UnknownInstruction("jmp".into()))
        );
        assert_eq!(
            vm.execute("mov R1"),
            Err(Error::ArityMismatch {
                instruction: "mov",
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            vm.execute("push 1, 2"),
            Err(Error::ArityMismatch {
                instruction: "push",
                expected: 1,
                actual: 2
            })
        );
    }

    #[test]
    fn stack_pointer_write_is_flagged() {
        let mut vm = Vm::new();
        assert_eq!(
            vm.execute("mov SP, 4000"),
            Ok(Status::StackPointerOverridden)
        );
        vm.execute("push 7").unwrap();
        assert_eq!(vm.read_register("SP"), Ok(3998));
        vm.execute("pop R1").unwrap();
        assert_eq!(vm.read_register("R1"), Ok(7));
        assert_eq!(vm.read_register("SP"), Ok(4000));
    }

    #[test]
    fn r0_reads_zero_and_rejects_writes() {
        let mut vm = Vm::new();
        assert_eq!(vm.read_register("R0"), Ok(0));
        assert_eq!(
            vm.execute("mov R0, 1"),
            Err(Error::ReadOnlyRegister("R0".into()))
        );
        assert_eq!(
            vm.write_register_index(0, 1),
            Err(Error::ReadOnlyRegister("R0".into()))
        );
        assert_eq!(vm.write_register_index(13, 1), Ok(RegisterWrite::Committed));
        assert_eq!(vm.read_register("R13"), Ok(1));
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut vm = Vm::new();
        vm.run("mov R1, 5\npush 300\nmov [0], 9").unwrap();
        vm.reset();
        assert_eq!(vm.read_register("R1"), Ok(0));
        assert_eq!(vm.stack_used(), 0);
        assert_eq!(vm.read_memory(0), Ok(Value::Bool(false)));
    }

    #[test]
    fn run_reports_line() {
        let mut vm = Vm::new();
        assert_eq!(
            vm.run("mov R1, 1\n; fine\nfoo R1"),
            Err(Error::AtLine {
                line: 3,
                source: Box::new(Error::UnknownInstruction("foo".into()))
            })
        );
        assert_eq!(vm.read_register("R1"), Ok(1));
    }
}
