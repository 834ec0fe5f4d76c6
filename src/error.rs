use thiserror::Error;

use crate::{assembly::token::Token, dispatch::DispatchFault};

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers all possible error conditions that can occur during bit-vector manipulation,
/// virtual memory access, image mapping, and instruction dispatch. Each variant provides specific
/// context about the failure mode to enable appropriate error handling.
///
/// # Error Categories
///
/// ## Contract Violations
/// - [`Error::SizeMismatch`] - Two bit vectors of different widths were combined
/// - [`Error::NotFullyKnown`] - A typed accessor was used on a partially unknown span
/// - [`Error::StackUnderflow`] - More operands were popped than the evaluation stack holds
/// - [`Error::VariableOutOfRange`] - A local or argument index exceeds the frame layout
/// - [`Error::InvalidOperand`] - An instruction carried the wrong operand kind
///
/// ## Execution Errors
/// - [`Error::NoActiveFrame`] - `step` was called on an idle machine
/// - [`Error::InvalidProgramCounter`] - The instruction pointer left the method body
/// - [`Error::MethodNotFound`] - A call referenced an unregistered method token
/// - [`Error::UnsupportedOpcode`] - No handler exists for the decoded opcode
/// - [`Error::Fault`] - The emulated program raised a modeled fault (e.g. null reference)
/// - [`Error::Cancelled`] - The caller's cancellation token stopped the run loop
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors while mapping an image file
/// - [`Error::GoblinErr`] - PE parsing errors from the goblin crate
#[derive(Error, Debug)]
pub enum Error {
    /// Two bit vectors of different bit widths were combined.
    ///
    /// Binary bit-vector operations (bitwise, arithmetic, comparisons) require both
    /// operands to have the same width. Encountering this error indicates a bug in
    /// the calling code, typically a missing width-alignment step.
    #[error("Bit vector size mismatch - expected {expected} bits, got {actual}")]
    SizeMismatch {
        /// Width of the left-hand operand in bits.
        expected: usize,
        /// Width of the right-hand operand in bits.
        actual: usize,
    },

    /// A typed accessor was used on a span that is not fully known.
    ///
    /// Reinterpreting a span as a native integer or float is only meaningful when
    /// every bit of the span is known. Callers must check `is_fully_known` first.
    #[error("Typed access on a span with unknown bits")]
    NotFullyKnown,

    /// More operands were popped than the evaluation stack holds.
    ///
    /// The decoded instruction stream is expected to be stack-balanced; underflow
    /// indicates a malformed method body or a handler popping too eagerly.
    #[error("Evaluation stack underflow")]
    StackUnderflow,

    /// A local variable or argument index exceeds the frame layout.
    #[error("{kind} index {index} out of range ({count} declared)")]
    VariableOutOfRange {
        /// Which store was indexed (`"local"` or `"argument"`).
        kind: &'static str,
        /// The requested index.
        index: usize,
        /// The number of slots the frame declares.
        count: usize,
    },

    /// An instruction carried an operand of the wrong kind.
    ///
    /// Handlers validate that the decoded operand matches what the opcode requires
    /// (e.g. a branch target for `br`, a 64-bit constant for `ldc.i8`).
    #[error("Invalid operand for {mnemonic}: expected {expected}")]
    InvalidOperand {
        /// Mnemonic of the offending instruction.
        mnemonic: &'static str,
        /// Description of the operand kind the handler expected.
        expected: &'static str,
    },

    /// `step` was called while the call stack is empty.
    #[error("No active frame - the machine is idle")]
    NoActiveFrame,

    /// The instruction pointer does not address an instruction of the current method.
    #[error("Invalid program counter {offset:#x} in method {method}")]
    InvalidProgramCounter {
        /// The byte offset the frame's instruction pointer held.
        offset: u32,
        /// Token of the method being executed.
        method: Token,
    },

    /// A call-type instruction referenced a method token that was never registered.
    #[error("Method not found - {0}")]
    MethodNotFound(Token),

    /// A frame was requested for an external method.
    ///
    /// External methods carry a signature but no decoded body; they can only be
    /// handled opaquely through the machine's invoker, never stepped into.
    #[error("Method has no body to execute - {0}")]
    NoMethodBody(Token),

    /// No handler exists for the decoded opcode.
    #[error("Unsupported opcode {mnemonic}")]
    UnsupportedOpcode {
        /// Mnemonic of the unhandled instruction.
        mnemonic: &'static str,
    },

    /// The emulated program raised a fault modeled by the dispatcher.
    ///
    /// Faults such as a null-reference dereference abort the run in a controlled
    /// fashion; they are conditions of the *emulated* program, not of the host.
    #[error("Emulated program fault: {0}")]
    Fault(DispatchFault),

    /// The caller's cancellation token stopped the run loop.
    ///
    /// Raised only between instruction dispatches; the pending instruction's side
    /// effects are never partially applied.
    #[error("Execution was cancelled")]
    Cancelled,

    /// The mapped image region could not be read back coherently.
    ///
    /// Raised when re-parsing a mapped image from virtual memory and the backing
    /// range contains unknown bytes where headers were expected.
    #[error("Mapped image at {base:#x} is not fully known over {size:#x} bytes")]
    ImageNotKnown {
        /// Base address of the mapping.
        base: u64,
        /// Size of the region that was read back.
        size: u64,
    },

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur while memory-mapping an image
    /// file from disk.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),
}
