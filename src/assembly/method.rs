//! Registered methods and their decoded bodies.
//!
//! A [`Method`] is the unit the machine executes: a token identity, the layout
//! of its arguments and return value, and optionally a decoded body (locals
//! plus instruction list). Methods without a body are *external*: calls to them
//! are always treated opaquely and answered by the machine's
//! [`Invoker`](crate::policy::Invoker).
//!
//! [`MethodBuilder`] offers a fluent way to assemble bodies in tests and
//! harnesses, assigning instruction offsets the way a decoder would.

use std::sync::Arc;

use crate::{
    assembly::{
        instruction::{Instruction, Operand},
        opcode::CilCode,
        token::Token,
    },
    stack::StackSlotTypeHint,
};

/// The storage layout of one value slot: bit width plus type hint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotLayout {
    /// Width of the slot in bits.
    pub bits: usize,
    /// Whether handlers treat the slot as integer or float.
    pub hint: StackSlotTypeHint,
}

impl SlotLayout {
    /// A 32-bit integer slot.
    pub const INT32: SlotLayout = SlotLayout {
        bits: 32,
        hint: StackSlotTypeHint::Integer,
    };

    /// A 64-bit integer slot.
    pub const INT64: SlotLayout = SlotLayout {
        bits: 64,
        hint: StackSlotTypeHint::Integer,
    };

    /// A 32-bit float slot.
    pub const FLOAT32: SlotLayout = SlotLayout {
        bits: 32,
        hint: StackSlotTypeHint::Float,
    };

    /// A 64-bit float slot.
    pub const FLOAT64: SlotLayout = SlotLayout {
        bits: 64,
        hint: StackSlotTypeHint::Float,
    };

    /// A pointer-sized integer slot for the given bitness.
    #[must_use]
    pub fn native_int(is_32_bit: bool) -> SlotLayout {
        SlotLayout {
            bits: if is_32_bit { 32 } else { 64 },
            hint: StackSlotTypeHint::Integer,
        }
    }
}

/// A decoded method body: locals and the instruction list.
#[derive(Clone, Debug)]
pub struct MethodBody {
    /// Instructions ordered by offset.
    instructions: Vec<Instruction>,
    /// Layouts of the body's local variables.
    locals: Vec<SlotLayout>,
    /// Whether locals start as known zero (the `init locals` flag) or unknown.
    init_locals: bool,
}

impl MethodBody {
    /// The body's instructions, ordered by offset.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// The body's local variable layouts.
    #[must_use]
    pub fn locals(&self) -> &[SlotLayout] {
        &self.locals
    }

    /// Whether locals start known-zero rather than unknown.
    #[must_use]
    pub fn init_locals(&self) -> bool {
        self.init_locals
    }

    /// The instruction at the exact byte `offset`, if any.
    #[must_use]
    pub fn instruction_at(&self, offset: u32) -> Option<&Instruction> {
        self.instructions
            .binary_search_by_key(&offset, |ins| ins.offset)
            .ok()
            .map(|index| &self.instructions[index])
    }
}

/// A method registered with the machine.
#[derive(Clone, Debug)]
pub struct Method {
    token: Token,
    name: String,
    arguments: Vec<SlotLayout>,
    returns: Option<SlotLayout>,
    body: Option<MethodBody>,
}

impl Method {
    /// Creates an external method: signature only, no body.
    ///
    /// Calls to external methods always go through the machine's invoker.
    #[must_use]
    pub fn external(
        token: Token,
        name: impl Into<String>,
        arguments: Vec<SlotLayout>,
        returns: Option<SlotLayout>,
    ) -> Self {
        Method {
            token,
            name: name.into(),
            arguments,
            returns,
            body: None,
        }
    }

    /// The method's metadata token.
    #[must_use]
    pub fn token(&self) -> Token {
        self.token
    }

    /// The method's diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The argument slot layouts, in declaration order.
    #[must_use]
    pub fn arguments(&self) -> &[SlotLayout] {
        &self.arguments
    }

    /// The return slot layout, or `None` for void.
    #[must_use]
    pub fn returns(&self) -> Option<SlotLayout> {
        self.returns
    }

    /// The decoded body, or `None` for external methods.
    #[must_use]
    pub fn body(&self) -> Option<&MethodBody> {
        self.body.as_ref()
    }
}

/// Fluent builder assembling a [`Method`] with a decoded body.
///
/// Instruction offsets are assigned sequentially using the canonical long-form
/// encoding sizes, the way a decoder would report them. [`Self::next_offset`]
/// exposes the running offset so branch targets can be captured while building.
///
/// # Example
///
/// ```rust
/// use trivm::assembly::{CilCode, MethodBuilder, SlotLayout, Token};
///
/// let method = MethodBuilder::new(Token::new(0x0600_0001))
///     .name("add_constants")
///     .returns(SlotLayout::INT32)
///     .ldc_i4(3)
///     .ldc_i4(4)
///     .push(CilCode::Add)
///     .push(CilCode::Ret)
///     .build();
///
/// assert_eq!(method.body().unwrap().instructions().len(), 4);
/// ```
#[derive(Debug)]
pub struct MethodBuilder {
    token: Token,
    name: String,
    arguments: Vec<SlotLayout>,
    locals: Vec<SlotLayout>,
    returns: Option<SlotLayout>,
    init_locals: bool,
    instructions: Vec<Instruction>,
    next_offset: u32,
}

impl MethodBuilder {
    /// Starts a builder for the method identified by `token`.
    #[must_use]
    pub fn new(token: Token) -> Self {
        MethodBuilder {
            token,
            name: format!("method_{:08X}", token.value()),
            arguments: Vec::new(),
            locals: Vec::new(),
            returns: None,
            init_locals: true,
            instructions: Vec::new(),
            next_offset: 0,
        }
    }

    /// Sets the diagnostic name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Appends an argument slot.
    #[must_use]
    pub fn argument(mut self, layout: SlotLayout) -> Self {
        self.arguments.push(layout);
        self
    }

    /// Appends a local variable slot.
    #[must_use]
    pub fn local(mut self, layout: SlotLayout) -> Self {
        self.locals.push(layout);
        self
    }

    /// Declares the return slot layout.
    #[must_use]
    pub fn returns(mut self, layout: SlotLayout) -> Self {
        self.returns = Some(layout);
        self
    }

    /// Clears the `init locals` flag: locals start unknown instead of zeroed.
    #[must_use]
    pub fn no_init_locals(mut self) -> Self {
        self.init_locals = false;
        self
    }

    /// The byte offset the next pushed instruction will receive.
    #[must_use]
    pub fn next_offset(&self) -> u32 {
        self.next_offset
    }

    /// Appends an instruction without an operand.
    #[must_use]
    pub fn push(self, code: CilCode) -> Self {
        self.push_with(code, Operand::None)
    }

    /// Appends an instruction with the given operand.
    #[must_use]
    pub fn push_with(mut self, code: CilCode, operand: Operand) -> Self {
        let size = encoded_size(&operand);
        self.instructions
            .push(Instruction::new(self.next_offset, size, code, operand));
        self.next_offset += size;
        self
    }

    /// Appends an `ldc.i4` with the given constant.
    #[must_use]
    pub fn ldc_i4(self, value: i32) -> Self {
        self.push_with(CilCode::LdcI4, Operand::I32(value))
    }

    /// Appends an `ldc.i8` with the given constant.
    #[must_use]
    pub fn ldc_i8(self, value: i64) -> Self {
        self.push_with(CilCode::LdcI8, Operand::I64(value))
    }

    /// Appends an `ldc.r8` with the given constant.
    #[must_use]
    pub fn ldc_r8(self, value: f64) -> Self {
        self.push_with(CilCode::LdcR8, Operand::F64(value))
    }

    /// Appends a branch instruction targeting the given byte offset.
    #[must_use]
    pub fn branch(self, code: CilCode, target: u32) -> Self {
        self.push_with(code, Operand::Target(target))
    }

    /// Appends a local/argument access instruction.
    #[must_use]
    pub fn var(self, code: CilCode, index: u16) -> Self {
        self.push_with(code, Operand::Index(index))
    }

    /// Finishes the method.
    #[must_use]
    pub fn build(self) -> Method {
        Method {
            token: self.token,
            name: self.name,
            arguments: self.arguments,
            returns: self.returns,
            body: Some(MethodBody {
                instructions: self.instructions,
                locals: self.locals,
                init_locals: self.init_locals,
            }),
        }
    }

    /// Finishes the method wrapped in an [`Arc`], ready for registration.
    #[must_use]
    pub fn build_shared(self) -> Arc<Method> {
        Arc::new(self.build())
    }
}

/// Canonical long-form encoding size for an operand.
fn encoded_size(operand: &Operand) -> u32 {
    match operand {
        Operand::None => 1,
        Operand::I32(_) | Operand::F32(_) | Operand::Target(_) | Operand::Token(_) => 5,
        Operand::I64(_) | Operand::F64(_) => 9,
        Operand::Index(_) => 4,
        Operand::Switch(targets) => 5 + 4 * targets.len() as u32,
    }
}
