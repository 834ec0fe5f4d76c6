//! Plain stack manipulation: `nop`, `dup`, `pop`.

use crate::{
    assembly::Instruction,
    dispatch::{CilDispatchResult, ExecutionContext},
    stack::StackSlot,
    Error, Result,
};

/// Does nothing but advance.
pub(crate) fn nop(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
) -> Result<CilDispatchResult> {
    context.advance(instruction);
    Ok(CilDispatchResult::Success)
}

/// Duplicates the top slot into a fresh pooled vector.
pub(crate) fn dup(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
) -> Result<CilDispatchResult> {
    let (bits, hint) = {
        let top = context
            .frame
            .evaluation_stack()
            .peek()
            .ok_or(Error::StackUnderflow)?;
        (top.bits(), top.type_hint)
    };

    let mut copy = context.pool.rent(bits, false);
    {
        let top = context
            .frame
            .evaluation_stack()
            .peek()
            .ok_or(Error::StackUnderflow)?;
        copy.as_span_mut().copy_from(&top.contents.as_span())?;
    }

    context
        .frame
        .evaluation_stack_mut()
        .push(StackSlot::new(copy, hint));
    context.advance(instruction);
    Ok(CilDispatchResult::Success)
}

/// Discards the top slot, returning its vector to the pool.
pub(crate) fn pop(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
) -> Result<CilDispatchResult> {
    let slot = context.frame.evaluation_stack_mut().pop()?;
    context.pool.release(slot.contents);
    context.advance(instruction);
    Ok(CilDispatchResult::Success)
}
