//! Pluggable policies for unknown resolution and call handling.
//!
//! The engine is deterministic and single-path: whenever an instruction needs a
//! concrete value the abstract state cannot provide - a branch condition, a
//! memory address, a block size - a policy turns the unknown into exactly one
//! outcome. Likewise, call-type instructions consult a policy to decide whether
//! the callee is stepped into or treated as an opaque effect.
//!
//! Policies are capability traits held by the machine behind `Arc` references
//! and can be swapped between any two `step` calls. The defaults implement a
//! deliberately conservative under-approximation; see each type's docs.

use crate::{
    assembly::{Instruction, Method},
    memory::BitVectorPool,
    stack::StackSlot,
};

/// Supplies concrete fallback values when an operand needed for a memory effect
/// or control-flow decision is not fully known.
///
/// The instruction still completes deterministically using the resolved value;
/// any knowledge degradation (e.g. unknown bytes flowing into the destination
/// of a copy whose source is unresolved) is the dispatcher's concern, not the
/// resolver's.
pub trait UnknownResolver {
    /// Picks the concrete outcome of a branch whose condition is unknown.
    ///
    /// `true` takes the branch, `false` falls through. The default falls
    /// through, keeping execution on the textually next instruction.
    fn resolve_branch_condition(&self, _instruction: &Instruction) -> bool {
        false
    }

    /// Resolves the source address of a memory read whose pointer is unknown.
    ///
    /// `None` means "read from nowhere": the destination receives unknown bits.
    fn resolve_source_pointer(&self, _instruction: &Instruction) -> Option<u64> {
        None
    }

    /// Resolves the destination address of a memory write whose pointer is
    /// unknown.
    ///
    /// `None` means "write to somewhere unmodeled": the write is dropped and
    /// assumed to have succeeded.
    fn resolve_destination_pointer(&self, _instruction: &Instruction) -> Option<u64> {
        None
    }

    /// Resolves the byte count of a block operation whose size is unknown.
    ///
    /// The default of zero turns the block operation into a no-op.
    fn resolve_block_size(&self, _instruction: &Instruction) -> u32 {
        0
    }

    /// Resolves the element count of an array allocation whose length is
    /// unknown.
    fn resolve_array_length(&self, _instruction: &Instruction) -> u32 {
        0
    }

    /// Picks the jump-table index of a `switch` whose selector is unknown.
    ///
    /// `None` falls through past the switch, mirroring the default-branch
    /// behaviour of an out-of-range selector.
    fn resolve_switch_index(&self, _instruction: &Instruction) -> Option<u32> {
        None
    }
}

/// The default resolver: fall through on unknown branches, drop unresolvable
/// memory effects, zero-size unresolvable blocks.
///
/// This under-approximates reachable behaviour - execution stays on the paths
/// concrete knowledge supports - which is the conservative choice for a tool
/// extracting facts from traces. Swap in a custom resolver to explore the
/// taken-branch side instead.
#[derive(Debug, Default)]
pub struct DefaultUnknownResolver;

impl UnknownResolver for DefaultUnknownResolver {}

/// What to do with a call-type instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvocationDecision {
    /// Push a frame for the callee and execute its body instruction by
    /// instruction.
    StepInto,
    /// Treat the call as opaque: consume the arguments and let the machine's
    /// [`Invoker`] produce the result.
    Invoke,
}

/// Decides whether a called method is stepped into or treated opaquely.
pub trait InvocationStrategy {
    /// Makes the decision for one call site.
    fn decide(&self, method: &Method, instruction: &Instruction) -> InvocationDecision;
}

/// Steps into methods that have a decoded body, invokes the rest.
///
/// This is the machine's default: emulate everything the caller registered a
/// body for, treat the rest of the world as opaque.
#[derive(Debug, Default)]
pub struct InvokeExternalStrategy;

impl InvocationStrategy for InvokeExternalStrategy {
    fn decide(&self, method: &Method, _instruction: &Instruction) -> InvocationDecision {
        if method.body().is_some() {
            InvocationDecision::StepInto
        } else {
            InvocationDecision::Invoke
        }
    }
}

/// Treats every call as opaque, never pushing a frame.
#[derive(Debug, Default)]
pub struct AlwaysInvokeStrategy;

impl InvocationStrategy for AlwaysInvokeStrategy {
    fn decide(&self, _method: &Method, _instruction: &Instruction) -> InvocationDecision {
        InvocationDecision::Invoke
    }
}

/// Produces the result of a call that was not stepped into.
pub trait Invoker {
    /// Produces the return slot for an opaque call, or `None` for void.
    ///
    /// The popped argument slots are borrowed for inspection; their vectors
    /// remain owned (and released) by the dispatcher.
    fn invoke(
        &self,
        method: &Method,
        arguments: &[StackSlot],
        pool: &mut BitVectorPool,
    ) -> Option<StackSlot>;
}

/// Answers every opaque call with a fully unknown value of the declared return
/// width (or no value for void methods).
#[derive(Debug, Default)]
pub struct ReturnUnknownInvoker;

impl Invoker for ReturnUnknownInvoker {
    fn invoke(
        &self,
        method: &Method,
        _arguments: &[StackSlot],
        pool: &mut BitVectorPool,
    ) -> Option<StackSlot> {
        method
            .returns()
            .map(|layout| StackSlot::new(pool.rent(layout.bits, false), layout.hint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{CilCode, MethodBuilder, Operand, SlotLayout, Token},
        stack::StackSlotTypeHint,
    };

    fn call_instruction() -> Instruction {
        Instruction::new(0, 5, CilCode::Call, Operand::Token(Token::new(2)))
    }

    #[test]
    fn test_default_resolver_falls_through() {
        let resolver = DefaultUnknownResolver;
        let branch = Instruction::new(0, 5, CilCode::Brtrue, Operand::Target(0));
        assert!(!resolver.resolve_branch_condition(&branch));
        assert_eq!(resolver.resolve_block_size(&branch), 0);
        assert_eq!(resolver.resolve_source_pointer(&branch), None);
    }

    #[test]
    fn test_invoke_external_strategy() {
        let strategy = InvokeExternalStrategy;
        let compiled = MethodBuilder::new(Token::new(2)).push(CilCode::Ret).build();
        let external = Method::external(Token::new(3), "Extern", vec![], None);

        assert_eq!(
            strategy.decide(&compiled, &call_instruction()),
            InvocationDecision::StepInto
        );
        assert_eq!(
            strategy.decide(&external, &call_instruction()),
            InvocationDecision::Invoke
        );
    }

    #[test]
    fn test_return_unknown_invoker() {
        let invoker = ReturnUnknownInvoker;
        let mut pool = BitVectorPool::new();

        let void_method = Method::external(Token::new(3), "Log", vec![], None);
        assert!(invoker.invoke(&void_method, &[], &mut pool).is_none());

        let int_method =
            Method::external(Token::new(4), "GetTick", vec![], Some(SlotLayout::INT64));
        let result = invoker.invoke(&int_method, &[], &mut pool).unwrap();
        assert_eq!(result.bits(), 64);
        assert_eq!(result.type_hint, StackSlotTypeHint::Integer);
        assert!(!result.contents.is_fully_known());
    }
}
