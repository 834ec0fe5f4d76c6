//! The decoded CIL instruction model consumed by the engine.
//!
//! The engine never touches raw bytecode. An external decoder (out of scope
//! here) resolves encodings into [`Instruction`] values - canonical opcode plus
//! resolved operand - and groups them into [`Method`] bodies that get
//! registered with the machine by [`Token`]. Short encodings (`ldc.i4.3`,
//! `br.s`, `ldloc.0`) are normalised to their canonical opcode with an explicit
//! operand before they reach this model.
//!
//! [`MethodBuilder`] assembles bodies programmatically, which is how tests and
//! analysis harnesses drive the machine.

pub(crate) mod instruction;
pub(crate) mod method;
pub(crate) mod opcode;
pub(crate) mod token;

pub use instruction::{Instruction, Operand};
pub use method::{Method, MethodBody, MethodBuilder, SlotLayout};
pub use opcode::CilCode;
pub use token::Token;
