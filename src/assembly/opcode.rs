//! The opcode set the engine executes.
//!
//! [`CilCode`] enumerates opcodes in *decoded* form: the short encodings an
//! assembler distinguishes (`ldc.i4.3`, `br.s`, `ldloc.0`, ...) are resolved by
//! the decoder into their canonical opcode plus an explicit operand, so one
//! variant covers each semantic operation. This mirrors how the dispatch layer
//! treats opcode families rather than byte encodings.

use strum::IntoStaticStr;

/// A decoded CIL opcode.
///
/// The `strum` derive carries the canonical mnemonic for diagnostics; use
/// [`CilCode::mnemonic`] to retrieve it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum CilCode {
    /// No operation.
    #[strum(serialize = "nop")]
    Nop,
    /// Duplicate the top stack slot.
    #[strum(serialize = "dup")]
    Dup,
    /// Discard the top stack slot.
    #[strum(serialize = "pop")]
    Pop,

    /// Push a 32-bit integer constant (covers `ldc.i4`, `.s` and shorthand forms).
    #[strum(serialize = "ldc.i4")]
    LdcI4,
    /// Push a 64-bit integer constant.
    #[strum(serialize = "ldc.i8")]
    LdcI8,
    /// Push a 32-bit float constant.
    #[strum(serialize = "ldc.r4")]
    LdcR4,
    /// Push a 64-bit float constant.
    #[strum(serialize = "ldc.r8")]
    LdcR8,
    /// Push a null reference.
    #[strum(serialize = "ldnull")]
    Ldnull,

    /// Load a local variable (covers `ldloc`, `.s` and shorthand forms).
    #[strum(serialize = "ldloc")]
    Ldloc,
    /// Store to a local variable.
    #[strum(serialize = "stloc")]
    Stloc,
    /// Load an argument.
    #[strum(serialize = "ldarg")]
    Ldarg,
    /// Store to an argument.
    #[strum(serialize = "starg")]
    Starg,

    /// Integer/float addition.
    #[strum(serialize = "add")]
    Add,
    /// Integer/float subtraction.
    #[strum(serialize = "sub")]
    Sub,
    /// Integer/float multiplication.
    #[strum(serialize = "mul")]
    Mul,
    /// Signed division.
    #[strum(serialize = "div")]
    Div,
    /// Unsigned division.
    #[strum(serialize = "div.un")]
    DivUn,
    /// Signed remainder.
    #[strum(serialize = "rem")]
    Rem,
    /// Unsigned remainder.
    #[strum(serialize = "rem.un")]
    RemUn,
    /// Bitwise AND.
    #[strum(serialize = "and")]
    And,
    /// Bitwise OR.
    #[strum(serialize = "or")]
    Or,
    /// Bitwise XOR.
    #[strum(serialize = "xor")]
    Xor,
    /// Shift left.
    #[strum(serialize = "shl")]
    Shl,
    /// Arithmetic shift right.
    #[strum(serialize = "shr")]
    Shr,
    /// Logical shift right.
    #[strum(serialize = "shr.un")]
    ShrUn,
    /// Arithmetic negation.
    #[strum(serialize = "neg")]
    Neg,
    /// Bitwise complement.
    #[strum(serialize = "not")]
    Not,

    /// Compare equal, push 1/0.
    #[strum(serialize = "ceq")]
    Ceq,
    /// Compare greater-than (signed).
    #[strum(serialize = "cgt")]
    Cgt,
    /// Compare greater-than (unsigned/unordered).
    #[strum(serialize = "cgt.un")]
    CgtUn,
    /// Compare less-than (signed).
    #[strum(serialize = "clt")]
    Clt,
    /// Compare less-than (unsigned/unordered).
    #[strum(serialize = "clt.un")]
    CltUn,

    /// Convert to signed 8-bit (widened back to 32 on the stack).
    #[strum(serialize = "conv.i1")]
    ConvI1,
    /// Convert to signed 16-bit.
    #[strum(serialize = "conv.i2")]
    ConvI2,
    /// Convert to signed 32-bit.
    #[strum(serialize = "conv.i4")]
    ConvI4,
    /// Convert to signed 64-bit.
    #[strum(serialize = "conv.i8")]
    ConvI8,
    /// Convert to unsigned 8-bit.
    #[strum(serialize = "conv.u1")]
    ConvU1,
    /// Convert to unsigned 16-bit.
    #[strum(serialize = "conv.u2")]
    ConvU2,
    /// Convert to unsigned 32-bit.
    #[strum(serialize = "conv.u4")]
    ConvU4,
    /// Convert to unsigned 64-bit.
    #[strum(serialize = "conv.u8")]
    ConvU8,
    /// Convert to 32-bit float.
    #[strum(serialize = "conv.r4")]
    ConvR4,
    /// Convert to 64-bit float.
    #[strum(serialize = "conv.r8")]
    ConvR8,

    /// Unconditional branch (covers `br` and `br.s`).
    #[strum(serialize = "br")]
    Br,
    /// Branch when the popped value is zero/null.
    #[strum(serialize = "brfalse")]
    Brfalse,
    /// Branch when the popped value is non-zero.
    #[strum(serialize = "brtrue")]
    Brtrue,
    /// Branch when equal.
    #[strum(serialize = "beq")]
    Beq,
    /// Branch when greater-or-equal (signed).
    #[strum(serialize = "bge")]
    Bge,
    /// Branch when greater-or-equal (unsigned/unordered).
    #[strum(serialize = "bge.un")]
    BgeUn,
    /// Branch when greater (signed).
    #[strum(serialize = "bgt")]
    Bgt,
    /// Branch when greater (unsigned/unordered).
    #[strum(serialize = "bgt.un")]
    BgtUn,
    /// Branch when less-or-equal (signed).
    #[strum(serialize = "ble")]
    Ble,
    /// Branch when less-or-equal (unsigned/unordered).
    #[strum(serialize = "ble.un")]
    BleUn,
    /// Branch when less (signed).
    #[strum(serialize = "blt")]
    Blt,
    /// Branch when less (unsigned/unordered).
    #[strum(serialize = "blt.un")]
    BltUn,
    /// Branch when not equal (unordered).
    #[strum(serialize = "bne.un")]
    BneUn,
    /// Jump-table branch.
    #[strum(serialize = "switch")]
    Switch,
    /// Return from the current method.
    #[strum(serialize = "ret")]
    Ret,

    /// Call the method named by the token operand.
    #[strum(serialize = "call")]
    Call,
    /// Call the method named by the token operand through its virtual slot.
    #[strum(serialize = "callvirt")]
    Callvirt,

    /// Load indirect signed 8-bit.
    #[strum(serialize = "ldind.i1")]
    LdindI1,
    /// Load indirect unsigned 8-bit.
    #[strum(serialize = "ldind.u1")]
    LdindU1,
    /// Load indirect signed 16-bit.
    #[strum(serialize = "ldind.i2")]
    LdindI2,
    /// Load indirect unsigned 16-bit.
    #[strum(serialize = "ldind.u2")]
    LdindU2,
    /// Load indirect signed 32-bit.
    #[strum(serialize = "ldind.i4")]
    LdindI4,
    /// Load indirect unsigned 32-bit.
    #[strum(serialize = "ldind.u4")]
    LdindU4,
    /// Load indirect 64-bit.
    #[strum(serialize = "ldind.i8")]
    LdindI8,
    /// Load indirect 32-bit float.
    #[strum(serialize = "ldind.r4")]
    LdindR4,
    /// Load indirect 64-bit float.
    #[strum(serialize = "ldind.r8")]
    LdindR8,
    /// Store indirect 8-bit.
    #[strum(serialize = "stind.i1")]
    StindI1,
    /// Store indirect 16-bit.
    #[strum(serialize = "stind.i2")]
    StindI2,
    /// Store indirect 32-bit.
    #[strum(serialize = "stind.i4")]
    StindI4,
    /// Store indirect 64-bit.
    #[strum(serialize = "stind.i8")]
    StindI8,
    /// Store indirect 32-bit float.
    #[strum(serialize = "stind.r4")]
    StindR4,
    /// Store indirect 64-bit float.
    #[strum(serialize = "stind.r8")]
    StindR8,
    /// Copy a block of memory.
    #[strum(serialize = "cpblk")]
    Cpblk,
    /// Initialise a block of memory.
    #[strum(serialize = "initblk")]
    Initblk,

    /// Allocate a one-dimensional array.
    #[strum(serialize = "newarr")]
    Newarr,
    /// Push the length of an array.
    #[strum(serialize = "ldlen")]
    Ldlen,
    /// Load array element, signed 8-bit.
    #[strum(serialize = "ldelem.i1")]
    LdelemI1,
    /// Load array element, unsigned 8-bit.
    #[strum(serialize = "ldelem.u1")]
    LdelemU1,
    /// Load array element, signed 16-bit.
    #[strum(serialize = "ldelem.i2")]
    LdelemI2,
    /// Load array element, unsigned 16-bit.
    #[strum(serialize = "ldelem.u2")]
    LdelemU2,
    /// Load array element, signed 32-bit.
    #[strum(serialize = "ldelem.i4")]
    LdelemI4,
    /// Load array element, unsigned 32-bit.
    #[strum(serialize = "ldelem.u4")]
    LdelemU4,
    /// Load array element, 64-bit.
    #[strum(serialize = "ldelem.i8")]
    LdelemI8,
    /// Load array element, 32-bit float.
    #[strum(serialize = "ldelem.r4")]
    LdelemR4,
    /// Load array element, 64-bit float.
    #[strum(serialize = "ldelem.r8")]
    LdelemR8,
    /// Store array element, 8-bit.
    #[strum(serialize = "stelem.i1")]
    StelemI1,
    /// Store array element, 16-bit.
    #[strum(serialize = "stelem.i2")]
    StelemI2,
    /// Store array element, 32-bit.
    #[strum(serialize = "stelem.i4")]
    StelemI4,
    /// Store array element, 64-bit.
    #[strum(serialize = "stelem.i8")]
    StelemI8,
    /// Store array element, 32-bit float.
    #[strum(serialize = "stelem.r4")]
    StelemR4,
    /// Store array element, 64-bit float.
    #[strum(serialize = "stelem.r8")]
    StelemR8,
}

impl CilCode {
    /// The canonical mnemonic of this opcode.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mnemonics() {
        assert_eq!(CilCode::Nop.mnemonic(), "nop");
        assert_eq!(CilCode::LdcI4.mnemonic(), "ldc.i4");
        assert_eq!(CilCode::BgeUn.mnemonic(), "bge.un");
        assert_eq!(CilCode::LdindU2.mnemonic(), "ldind.u2");
    }
}
