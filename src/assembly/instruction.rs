//! Decoded instructions and their resolved operands.

use crate::{
    assembly::{opcode::CilCode, token::Token},
    Error, Result,
};

/// A resolved instruction operand.
///
/// Operands arrive pre-decoded: branch targets are byte offsets into the method
/// body, variable indices are plain numbers, and token operands reference
/// methods or types registered with the machine.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// The opcode takes no operand.
    None,
    /// A 32-bit integer constant.
    I32(i32),
    /// A 64-bit integer constant.
    I64(i64),
    /// A 32-bit float constant.
    F32(f32),
    /// A 64-bit float constant.
    F64(f64),
    /// A local variable or argument index.
    Index(u16),
    /// A branch target, as a byte offset into the method body.
    Target(u32),
    /// A metadata token reference.
    Token(Token),
    /// A `switch` jump table of branch targets.
    Switch(Vec<u32>),
}

/// A single decoded CIL instruction.
///
/// `offset` and `size` are byte positions within the owning method body; the
/// dispatcher advances fall-through control flow to `offset + size`.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    /// Byte offset of this instruction within its method body.
    pub offset: u32,
    /// Encoded size of this instruction in bytes.
    pub size: u32,
    /// The decoded opcode.
    pub code: CilCode,
    /// The resolved operand.
    pub operand: Operand,
}

impl Instruction {
    /// Creates an instruction at the given offset.
    #[must_use]
    pub fn new(offset: u32, size: u32, code: CilCode, operand: Operand) -> Self {
        Instruction {
            offset,
            size,
            code,
            operand,
        }
    }

    /// The canonical mnemonic of this instruction's opcode.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        self.code.mnemonic()
    }

    /// The byte offset of the next sequential instruction.
    #[must_use]
    pub fn next_offset(&self) -> u32 {
        self.offset + self.size
    }

    fn operand_error(&self, expected: &'static str) -> Error {
        Error::InvalidOperand {
            mnemonic: self.mnemonic(),
            expected,
        }
    }

    /// The 32-bit integer operand this opcode requires.
    pub fn expect_i32(&self) -> Result<i32> {
        match self.operand {
            Operand::I32(value) => Ok(value),
            _ => Err(self.operand_error("an i32 constant")),
        }
    }

    /// The 64-bit integer operand this opcode requires.
    pub fn expect_i64(&self) -> Result<i64> {
        match self.operand {
            Operand::I64(value) => Ok(value),
            _ => Err(self.operand_error("an i64 constant")),
        }
    }

    /// The 32-bit float operand this opcode requires.
    pub fn expect_f32(&self) -> Result<f32> {
        match self.operand {
            Operand::F32(value) => Ok(value),
            _ => Err(self.operand_error("an f32 constant")),
        }
    }

    /// The 64-bit float operand this opcode requires.
    pub fn expect_f64(&self) -> Result<f64> {
        match self.operand {
            Operand::F64(value) => Ok(value),
            _ => Err(self.operand_error("an f64 constant")),
        }
    }

    /// The variable index operand this opcode requires.
    pub fn expect_index(&self) -> Result<u16> {
        match self.operand {
            Operand::Index(value) => Ok(value),
            _ => Err(self.operand_error("a variable index")),
        }
    }

    /// The branch target operand this opcode requires.
    pub fn expect_target(&self) -> Result<u32> {
        match self.operand {
            Operand::Target(value) => Ok(value),
            _ => Err(self.operand_error("a branch target")),
        }
    }

    /// The token operand this opcode requires.
    pub fn expect_token(&self) -> Result<Token> {
        match self.operand {
            Operand::Token(value) => Ok(value),
            _ => Err(self.operand_error("a metadata token")),
        }
    }

    /// The switch jump table this opcode requires.
    pub fn expect_switch(&self) -> Result<&[u32]> {
        match &self.operand {
            Operand::Switch(targets) => Ok(targets),
            _ => Err(self.operand_error("a switch jump table")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_accessors() {
        let ins = Instruction::new(0, 5, CilCode::LdcI4, Operand::I32(42));
        assert_eq!(ins.expect_i32().unwrap(), 42);
        assert!(ins.expect_target().is_err());
        assert_eq!(ins.next_offset(), 5);
    }

    #[test]
    fn test_operand_error_carries_mnemonic() {
        let ins = Instruction::new(0, 5, CilCode::Br, Operand::None);
        match ins.expect_target() {
            Err(Error::InvalidOperand { mnemonic, .. }) => assert_eq!(mnemonic, "br"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
