// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # trivm
//!
//! A three-valued CIL emulation engine: execute .NET bytecode under **abstract
//! interpretation**, where every value is a fixed-width bit vector whose bits each
//! carry a known/unknown flag in addition to their 0/1 value (Kleene logic).
//!
//! This lets analysis tooling run real method bodies even when some inputs -
//! arguments, heap contents, results of external calls - are not concretely known.
//! Unknownness propagates through arithmetic, bitwise operations, comparisons and
//! memory accesses instead of aborting the run.
//!
//! ## Architecture
//!
//! The engine is layered bottom-up:
//!
//! - [`memory`] - the value and storage primitives: [`Trilean`], [`BitVector`] and
//!   its borrowed span views, the recycling [`BitVectorPool`], the paged
//!   [`VirtualMemory`] address space, and [`ObjectHandle`] for structured reads.
//! - [`loader`] - maps a PE image's sections into virtual memory at a base address
//!   and re-parses mapped regions for verification.
//! - [`assembly`] - the decoded instruction model the engine consumes: opcodes,
//!   operands, and registered method bodies.
//! - [`stack`] - per-method execution state: typed stack slots, the evaluation
//!   stack, call frames and the call stack.
//! - [`dispatch`] - the opcode-to-handler table and the handler families that
//!   implement per-instruction semantics.
//! - [`policy`] - pluggable strategies that turn unknown addresses, sizes and
//!   branch conditions into single concrete outcomes, and that decide whether
//!   calls are stepped into or treated opaquely.
//! - [`machine`] - the [`CilVirtualMachine`] stepping loop with cancellation and
//!   dispatch instrumentation.
//!
//! ## Quick Start
//!
//! ```rust
//! use trivm::prelude::*;
//!
//! // (3 + 4) * 5
//! let method = MethodBuilder::new(Token::new(0x0600_0001))
//!     .ldc_i4(3)
//!     .ldc_i4(4)
//!     .push(CilCode::Add)
//!     .ldc_i4(5)
//!     .push(CilCode::Mul)
//!     .push(CilCode::Ret)
//!     .build();
//!
//! let mut vm = CilVirtualMachine::new(false);
//! let token = vm.register_method(method);
//! vm.push_frame(token)?;
//! vm.run()?;
//!
//! let result = vm.take_return_value().expect("method returns a value");
//! assert_eq!(result.contents.as_span().i32()?, 35);
//! # Ok::<(), trivm::Error>(())
//! ```
//!
//! ## Partial Knowledge
//!
//! Values are [`BitVector`]s: two equal-length bit arrays, one holding the value
//! bits and one the known mask. A bit is *unknown* when its known-mask entry is
//! clear, in which case its value bit is meaningless (and stored as zero). All
//! operators follow Kleene three-valued semantics - for example, an `and` with a
//! known-zero operand is known-zero regardless of what the other operand is.
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, Error>`](Result). Conditions of the
//! *emulated* program (a null-reference dereference) surface as distinguished
//! dispatch outcomes rather than host errors; cancellation is its own outcome,
//! raised only from the caller's token.

pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Decoded CIL instruction model consumed by the engine.
///
/// The engine does not decode bytecode itself; callers hand it an already-decoded
/// stream of [`assembly::Instruction`] values with resolved operands, grouped into
/// [`assembly::Method`] bodies and registered with the machine by metadata token.
pub mod assembly;

/// Opcode dispatch table and the per-instruction handler families.
pub mod dispatch;

/// PE image mapping into the emulated address space.
pub mod loader;

/// The stepping virtual machine: `step`/`run`, cancellation, instrumentation.
pub mod machine;

/// Three-valued bit vectors, the buffer pool, virtual memory and object views.
pub mod memory;

/// Pluggable unknown-resolution and invocation policies.
pub mod policy;

/// Evaluation stack, call frames and the call stack.
pub mod stack;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use trivm::prelude::*;
///
/// let mut memory = VirtualMemory::new();
/// let mut buffer = BitVector::new(32, true);
/// memory.read(0x4000, &mut buffer.as_span_mut())?;
/// assert!(!buffer.is_fully_known());
/// # Ok::<(), trivm::Error>(())
/// ```
pub mod prelude;

/// `trivm` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is
/// always [`Error`]. Used consistently throughout the crate for all fallible
/// operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `trivm` Error type
///
/// The main error type for all operations in this crate. Provides detailed error
/// information for bit-vector contract violations, memory and image mapping
/// failures, and instruction dispatch.
pub use error::Error;

/// The stepping virtual machine orchestrating dispatch, policies and memory.
pub use machine::CilVirtualMachine;

/// Three-valued logic primitive following Kleene semantics.
pub use memory::Trilean;

/// Owned bit vector with per-bit known/unknown tracking.
pub use memory::BitVector;

/// Size-keyed recycling pool of [`BitVector`] buffers.
pub use memory::BitVectorPool;

/// Byte-addressable emulated address space.
pub use memory::VirtualMemory;

/// Structured-object view over an address in virtual memory.
pub use memory::ObjectHandle;
