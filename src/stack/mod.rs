//! Per-method execution state.
//!
//! One method activation is a [`CallFrame`]: an operand stack of typed
//! [`StackSlot`]s, local/argument stores, and an instruction pointer into the
//! method body. Frames link into a [`CallStack`] whose top frame executes;
//! an empty call stack is the machine's terminal state.
//!
//! Every slot's bit vector is rented from the machine's pool and flows back
//! into it when the slot is consumed or its frame is torn down.

mod callstack;
mod evaluation;
mod frame;
mod slot;

pub use callstack::CallStack;
pub use evaluation::EvaluationStack;
pub use frame::CallFrame;
pub use slot::{StackSlot, StackSlotTypeHint};
