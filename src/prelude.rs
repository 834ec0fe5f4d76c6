//! Convenient re-exports of the most commonly used types and traits.

pub use crate::{
    assembly::{CilCode, Instruction, Method, MethodBuilder, Operand, SlotLayout, Token},
    dispatch::{CilDispatchResult, DispatchFault},
    loader::{MappedImage, PeLoader, PeLoaderConfig},
    machine::{CancellationToken, DispatchObserver},
    memory::{BitVector, BitVectorPool, BitVectorSpan, BitVectorSpanMut, ObjectHandle, Trilean, VirtualMemory},
    policy::{
        AlwaysInvokeStrategy, DefaultUnknownResolver, InvocationDecision, InvocationStrategy,
        Invoker, InvokeExternalStrategy, ReturnUnknownInvoker, UnknownResolver,
    },
    stack::{CallFrame, CallStack, EvaluationStack, StackSlot, StackSlotTypeHint},
    CilVirtualMachine, Error, Result,
};
