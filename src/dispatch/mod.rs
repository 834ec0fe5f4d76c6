//! Instruction dispatch: one handler family per opcode group.
//!
//! The dispatcher is a closed table from [`CilCode`] to [`HandlerKind`] - a
//! tagged variant naming the handler family and its per-opcode parameters
//! (signedness, access width, branch condition, ...). Families share their
//! logic through free functions in the [`handlers`] submodules:
//!
//! - *Fallthrough* handlers consume operands, push a result and advance the
//!   instruction pointer implicitly (constants, variables, conversions, memory
//!   and array access).
//! - *Binary-operator* handlers pop two operands, width-align them, apply the
//!   trilean-aware operation and push one result.
//! - *Binary-branch* handlers pop two operands, evaluate a trilean condition
//!   and redirect or fall through - an unknown condition is resolved to a
//!   single concrete outcome by the machine's
//!   [`UnknownResolver`](crate::policy::UnknownResolver); control flow never
//!   forks.
//!
//! Handlers apply all side effects (stack, memory, instruction pointer) before
//! returning their [`CilDispatchResult`]; the machine only routes `Return` and
//! surfaces faults.

pub(crate) mod handlers;

use std::{collections::HashMap, fmt, sync::Arc};

use thiserror::Error;

use crate::{
    assembly::{CilCode, Instruction, Method, Token},
    memory::{BitVectorPool, VirtualMemory},
    policy::{InvocationStrategy, Invoker, UnknownResolver},
    stack::{CallFrame, StackSlot},
    Result,
};

/// A fault of the *emulated* program, modeled as a distinguished outcome.
///
/// Faults abort the run in a controlled fashion; they are never host panics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DispatchFault {
    /// A known-null address was dereferenced.
    #[error("null reference")]
    NullReference,
    /// An integer division by a known-zero divisor.
    #[error("integer division by zero")]
    DivideByZero,
    /// An array access with a known index beyond the known length.
    #[error("array index out of range")]
    IndexOutOfRange,
}

/// The tagged outcome of dispatching one instruction.
///
/// Side effects are already applied when a result is returned; the variants
/// only tell the stepping loop how to proceed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CilDispatchResult {
    /// The instruction completed; continue with the current frame.
    Success,
    /// The current frame finished; pop it and route its return value.
    Return,
    /// The emulated program faulted.
    Exception(DispatchFault),
    /// The caller's token cancelled the run between dispatches.
    Cancelled,
}

/// A call recorded by a handler for the machine to apply after dispatch.
///
/// Handlers cannot push frames themselves - the current frame borrows the call
/// stack - so a step-into call parks the callee and its argument slots here.
pub(crate) struct PendingCall {
    /// The resolved callee.
    pub method: Arc<Method>,
    /// Argument slots in declaration order, ownership included.
    pub arguments: Vec<StackSlot>,
}

/// Everything a handler may touch while executing one instruction.
///
/// The context borrows disjoint parts of the machine for the duration of one
/// dispatch; policies are reached through trait references and the pool/memory
/// through mutable borrows.
pub struct ExecutionContext<'a> {
    pub(crate) frame: &'a mut CallFrame,
    pub(crate) memory: &'a mut VirtualMemory,
    pub(crate) pool: &'a mut BitVectorPool,
    pub(crate) methods: &'a HashMap<Token, Arc<Method>>,
    pub(crate) element_sizes: &'a HashMap<Token, u32>,
    pub(crate) resolver: &'a dyn UnknownResolver,
    pub(crate) strategy: &'a dyn InvocationStrategy,
    pub(crate) invoker: &'a dyn Invoker,
    pub(crate) heap_cursor: &'a mut u64,
    pub(crate) is_32_bit: bool,
    pub(crate) pending_call: Option<PendingCall>,
}

impl ExecutionContext<'_> {
    /// The machine's pointer width in bits.
    #[must_use]
    pub fn pointer_bits(&self) -> usize {
        if self.is_32_bit {
            32
        } else {
            64
        }
    }

    /// Bump-allocates `size` bytes of simulated heap, 16-byte aligned.
    pub(crate) fn allocate(&mut self, size: u64) -> u64 {
        let base = *self.heap_cursor;
        *self.heap_cursor = (base + size + 15) & !15;
        base
    }

    /// The registered element size for an array type token, in bytes.
    ///
    /// Unregistered tokens default to 4 (32-bit elements).
    pub(crate) fn element_size(&self, token: Token) -> u64 {
        u64::from(self.element_sizes.get(&token).copied().unwrap_or(4))
    }

    /// Advances the frame's instruction pointer past `instruction`.
    pub(crate) fn advance(&mut self, instruction: &Instruction) {
        self.frame.set_ip(instruction.next_offset());
    }
}

impl fmt::Debug for ExecutionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("method", &self.frame.method().token())
            .field("ip", &self.frame.ip())
            .field("is_32_bit", &self.is_32_bit)
            .finish_non_exhaustive()
    }
}

/// Width and interpretation of one indirect or element memory access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MemoryAccess {
    /// Accessed width in bits.
    pub bits: usize,
    /// Sign-extend loads narrower than their stack container.
    pub signed: bool,
    /// The loaded/stored value is an IEEE-754 float.
    pub float: bool,
}

impl MemoryAccess {
    const I1: MemoryAccess = MemoryAccess { bits: 8, signed: true, float: false };
    const U1: MemoryAccess = MemoryAccess { bits: 8, signed: false, float: false };
    const I2: MemoryAccess = MemoryAccess { bits: 16, signed: true, float: false };
    const U2: MemoryAccess = MemoryAccess { bits: 16, signed: false, float: false };
    const I4: MemoryAccess = MemoryAccess { bits: 32, signed: true, float: false };
    const U4: MemoryAccess = MemoryAccess { bits: 32, signed: false, float: false };
    const I8: MemoryAccess = MemoryAccess { bits: 64, signed: true, float: false };
    const R4: MemoryAccess = MemoryAccess { bits: 32, signed: false, float: true };
    const R8: MemoryAccess = MemoryAccess { bits: 64, signed: false, float: true };

    /// The stack container width for a loaded value of this access.
    pub fn container_bits(&self) -> usize {
        self.bits.max(32)
    }
}

/// The constant kind a `ldc`-family opcode pushes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ConstantKind {
    /// 32-bit integer.
    I4,
    /// 64-bit integer.
    I8,
    /// 32-bit float.
    R4,
    /// 64-bit float.
    R8,
    /// Null reference (pointer-width known zero).
    Null,
}

/// The binary arithmetic/bitwise operation family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BinaryOpKind {
    Add,
    Sub,
    Mul,
    Div { signed: bool },
    Rem { signed: bool },
    And,
    Or,
    Xor,
}

impl BinaryOpKind {
    /// Whether mixed-width operands extend with their sign.
    pub fn signed(&self) -> bool {
        matches!(
            self,
            BinaryOpKind::Add
                | BinaryOpKind::Sub
                | BinaryOpKind::Mul
                | BinaryOpKind::Div { signed: true }
                | BinaryOpKind::Rem { signed: true }
        )
    }
}

/// The shift operation family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ShiftKind {
    Left,
    Right,
    RightUnsigned,
}

/// The unary operation family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum UnaryOpKind {
    Neg,
    Not,
}

/// A comparison or branch condition, with signedness.
///
/// For float operands the `signed` flag doubles as the CIL *ordered/unordered*
/// distinction: the `.un` variants treat NaN comparisons as true.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ConditionKind {
    Equal,
    NotEqual,
    GreaterThan { signed: bool },
    GreaterThanOrEqual { signed: bool },
    LessThan { signed: bool },
    LessThanOrEqual { signed: bool },
}

/// The numeric target of a `conv.*` opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ConversionKind {
    I1,
    I2,
    I4,
    I8,
    U1,
    U2,
    U4,
    U8,
    R4,
    R8,
}

/// The closed set of handler families, one variant per opcode group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum HandlerKind {
    Nop,
    Dup,
    Pop,
    PushConstant(ConstantKind),
    LoadLocal,
    StoreLocal,
    LoadArgument,
    StoreArgument,
    Binary(BinaryOpKind),
    Shift(ShiftKind),
    Unary(UnaryOpKind),
    Compare(ConditionKind),
    Convert(ConversionKind),
    Branch,
    UnaryBranch { when_true: bool },
    BinaryBranch(ConditionKind),
    Switch,
    Return,
    Call { virtual_call: bool },
    LoadIndirect(MemoryAccess),
    StoreIndirect(MemoryAccess),
    CopyBlock,
    InitBlock,
    NewArray,
    LoadArrayLength,
    LoadElement(MemoryAccess),
    StoreElement(MemoryAccess),
}

/// The opcode-keyed dispatch table.
///
/// Stateless: the table is the [`Dispatcher::lookup`] mapping, and
/// [`Dispatcher::dispatch`] routes to the family functions under [`handlers`].
#[derive(Debug, Default)]
pub struct Dispatcher;

impl Dispatcher {
    /// Resolves the handler family for an opcode.
    pub(crate) fn lookup(code: CilCode) -> HandlerKind {
        use CilCode::*;
        match code {
            Nop => HandlerKind::Nop,
            Dup => HandlerKind::Dup,
            Pop => HandlerKind::Pop,

            LdcI4 => HandlerKind::PushConstant(ConstantKind::I4),
            LdcI8 => HandlerKind::PushConstant(ConstantKind::I8),
            LdcR4 => HandlerKind::PushConstant(ConstantKind::R4),
            LdcR8 => HandlerKind::PushConstant(ConstantKind::R8),
            Ldnull => HandlerKind::PushConstant(ConstantKind::Null),

            Ldloc => HandlerKind::LoadLocal,
            Stloc => HandlerKind::StoreLocal,
            Ldarg => HandlerKind::LoadArgument,
            Starg => HandlerKind::StoreArgument,

            Add => HandlerKind::Binary(BinaryOpKind::Add),
            Sub => HandlerKind::Binary(BinaryOpKind::Sub),
            Mul => HandlerKind::Binary(BinaryOpKind::Mul),
            Div => HandlerKind::Binary(BinaryOpKind::Div { signed: true }),
            DivUn => HandlerKind::Binary(BinaryOpKind::Div { signed: false }),
            Rem => HandlerKind::Binary(BinaryOpKind::Rem { signed: true }),
            RemUn => HandlerKind::Binary(BinaryOpKind::Rem { signed: false }),
            And => HandlerKind::Binary(BinaryOpKind::And),
            Or => HandlerKind::Binary(BinaryOpKind::Or),
            Xor => HandlerKind::Binary(BinaryOpKind::Xor),
            Shl => HandlerKind::Shift(ShiftKind::Left),
            Shr => HandlerKind::Shift(ShiftKind::Right),
            ShrUn => HandlerKind::Shift(ShiftKind::RightUnsigned),
            Neg => HandlerKind::Unary(UnaryOpKind::Neg),
            Not => HandlerKind::Unary(UnaryOpKind::Not),

            Ceq => HandlerKind::Compare(ConditionKind::Equal),
            Cgt => HandlerKind::Compare(ConditionKind::GreaterThan { signed: true }),
            CgtUn => HandlerKind::Compare(ConditionKind::GreaterThan { signed: false }),
            Clt => HandlerKind::Compare(ConditionKind::LessThan { signed: true }),
            CltUn => HandlerKind::Compare(ConditionKind::LessThan { signed: false }),

            ConvI1 => HandlerKind::Convert(ConversionKind::I1),
            ConvI2 => HandlerKind::Convert(ConversionKind::I2),
            ConvI4 => HandlerKind::Convert(ConversionKind::I4),
            ConvI8 => HandlerKind::Convert(ConversionKind::I8),
            ConvU1 => HandlerKind::Convert(ConversionKind::U1),
            ConvU2 => HandlerKind::Convert(ConversionKind::U2),
            ConvU4 => HandlerKind::Convert(ConversionKind::U4),
            ConvU8 => HandlerKind::Convert(ConversionKind::U8),
            ConvR4 => HandlerKind::Convert(ConversionKind::R4),
            ConvR8 => HandlerKind::Convert(ConversionKind::R8),

            Br => HandlerKind::Branch,
            Brfalse => HandlerKind::UnaryBranch { when_true: false },
            Brtrue => HandlerKind::UnaryBranch { when_true: true },
            Beq => HandlerKind::BinaryBranch(ConditionKind::Equal),
            Bge => HandlerKind::BinaryBranch(ConditionKind::GreaterThanOrEqual { signed: true }),
            BgeUn => HandlerKind::BinaryBranch(ConditionKind::GreaterThanOrEqual { signed: false }),
            Bgt => HandlerKind::BinaryBranch(ConditionKind::GreaterThan { signed: true }),
            BgtUn => HandlerKind::BinaryBranch(ConditionKind::GreaterThan { signed: false }),
            Ble => HandlerKind::BinaryBranch(ConditionKind::LessThanOrEqual { signed: true }),
            BleUn => HandlerKind::BinaryBranch(ConditionKind::LessThanOrEqual { signed: false }),
            Blt => HandlerKind::BinaryBranch(ConditionKind::LessThan { signed: true }),
            BltUn => HandlerKind::BinaryBranch(ConditionKind::LessThan { signed: false }),
            BneUn => HandlerKind::BinaryBranch(ConditionKind::NotEqual),
            Switch => HandlerKind::Switch,
            Ret => HandlerKind::Return,

            Call => HandlerKind::Call { virtual_call: false },
            Callvirt => HandlerKind::Call { virtual_call: true },

            LdindI1 => HandlerKind::LoadIndirect(MemoryAccess::I1),
            LdindU1 => HandlerKind::LoadIndirect(MemoryAccess::U1),
            LdindI2 => HandlerKind::LoadIndirect(MemoryAccess::I2),
            LdindU2 => HandlerKind::LoadIndirect(MemoryAccess::U2),
            LdindI4 => HandlerKind::LoadIndirect(MemoryAccess::I4),
            LdindU4 => HandlerKind::LoadIndirect(MemoryAccess::U4),
            LdindI8 => HandlerKind::LoadIndirect(MemoryAccess::I8),
            LdindR4 => HandlerKind::LoadIndirect(MemoryAccess::R4),
            LdindR8 => HandlerKind::LoadIndirect(MemoryAccess::R8),
            StindI1 => HandlerKind::StoreIndirect(MemoryAccess::I1),
            StindI2 => HandlerKind::StoreIndirect(MemoryAccess::I2),
            StindI4 => HandlerKind::StoreIndirect(MemoryAccess::I4),
            StindI8 => HandlerKind::StoreIndirect(MemoryAccess::I8),
            StindR4 => HandlerKind::StoreIndirect(MemoryAccess::R4),
            StindR8 => HandlerKind::StoreIndirect(MemoryAccess::R8),
            Cpblk => HandlerKind::CopyBlock,
            Initblk => HandlerKind::InitBlock,

            Newarr => HandlerKind::NewArray,
            Ldlen => HandlerKind::LoadArrayLength,
            LdelemI1 => HandlerKind::LoadElement(MemoryAccess::I1),
            LdelemU1 => HandlerKind::LoadElement(MemoryAccess::U1),
            LdelemI2 => HandlerKind::LoadElement(MemoryAccess::I2),
            LdelemU2 => HandlerKind::LoadElement(MemoryAccess::U2),
            LdelemI4 => HandlerKind::LoadElement(MemoryAccess::I4),
            LdelemU4 => HandlerKind::LoadElement(MemoryAccess::U4),
            LdelemI8 => HandlerKind::LoadElement(MemoryAccess::I8),
            LdelemR4 => HandlerKind::LoadElement(MemoryAccess::R4),
            LdelemR8 => HandlerKind::LoadElement(MemoryAccess::R8),
            StelemI1 => HandlerKind::StoreElement(MemoryAccess::I1),
            StelemI2 => HandlerKind::StoreElement(MemoryAccess::I2),
            StelemI4 => HandlerKind::StoreElement(MemoryAccess::I4),
            StelemI8 => HandlerKind::StoreElement(MemoryAccess::I8),
            StelemR4 => HandlerKind::StoreElement(MemoryAccess::R4),
            StelemR8 => HandlerKind::StoreElement(MemoryAccess::R8),
        }
    }

    /// Executes one instruction in the given context.
    pub(crate) fn dispatch(
        context: &mut ExecutionContext<'_>,
        instruction: &Instruction,
    ) -> Result<CilDispatchResult> {
        match Self::lookup(instruction.code) {
            HandlerKind::Nop => handlers::stack_ops::nop(context, instruction),
            HandlerKind::Dup => handlers::stack_ops::dup(context, instruction),
            HandlerKind::Pop => handlers::stack_ops::pop(context, instruction),
            HandlerKind::PushConstant(kind) => {
                handlers::constants::push_constant(context, instruction, kind)
            }
            HandlerKind::LoadLocal => handlers::variables::load_local(context, instruction),
            HandlerKind::StoreLocal => handlers::variables::store_local(context, instruction),
            HandlerKind::LoadArgument => handlers::variables::load_argument(context, instruction),
            HandlerKind::StoreArgument => handlers::variables::store_argument(context, instruction),
            HandlerKind::Binary(kind) => handlers::arithmetic::binary_op(context, instruction, kind),
            HandlerKind::Shift(kind) => handlers::arithmetic::shift_op(context, instruction, kind),
            HandlerKind::Unary(kind) => handlers::arithmetic::unary_op(context, instruction, kind),
            HandlerKind::Compare(condition) => {
                handlers::comparison::compare(context, instruction, condition)
            }
            HandlerKind::Convert(kind) => handlers::conversion::convert(context, instruction, kind),
            HandlerKind::Branch => handlers::branching::branch(context, instruction),
            HandlerKind::UnaryBranch { when_true } => {
                handlers::branching::unary_branch(context, instruction, when_true)
            }
            HandlerKind::BinaryBranch(condition) => {
                handlers::branching::binary_branch(context, instruction, condition)
            }
            HandlerKind::Switch => handlers::branching::switch(context, instruction),
            HandlerKind::Return => Ok(CilDispatchResult::Return),
            HandlerKind::Call { virtual_call } => {
                handlers::calls::call(context, instruction, virtual_call)
            }
            HandlerKind::LoadIndirect(access) => {
                handlers::memory_ops::load_indirect(context, instruction, access)
            }
            HandlerKind::StoreIndirect(access) => {
                handlers::memory_ops::store_indirect(context, instruction, access)
            }
            HandlerKind::CopyBlock => handlers::memory_ops::copy_block(context, instruction),
            HandlerKind::InitBlock => handlers::memory_ops::init_block(context, instruction),
            HandlerKind::NewArray => handlers::arrays::new_array(context, instruction),
            HandlerKind::LoadArrayLength => {
                handlers::arrays::load_array_length(context, instruction)
            }
            HandlerKind::LoadElement(access) => {
                handlers::arrays::load_element(context, instruction, access)
            }
            HandlerKind::StoreElement(access) => {
                handlers::arrays::store_element(context, instruction, access)
            }
        }
    }
}

#[cfg(test)]
mod tests;
