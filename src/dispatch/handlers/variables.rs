//! Local variable and argument access handlers.

use crate::{
    assembly::Instruction,
    dispatch::{handlers::adapt_value, CilDispatchResult, ExecutionContext},
    stack::{StackSlot, StackSlotTypeHint},
    Result,
};

/// Pushes a copy of the indexed local variable.
pub(crate) fn load_local(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
) -> Result<CilDispatchResult> {
    load_slot(context, instruction, false)
}

/// Pops into the indexed local variable.
pub(crate) fn store_local(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
) -> Result<CilDispatchResult> {
    store_slot(context, instruction, false)
}

/// Pushes a copy of the indexed argument.
pub(crate) fn load_argument(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
) -> Result<CilDispatchResult> {
    load_slot(context, instruction, true)
}

/// Pops into the indexed argument.
pub(crate) fn store_argument(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
) -> Result<CilDispatchResult> {
    store_slot(context, instruction, true)
}

fn load_slot(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
    argument: bool,
) -> Result<CilDispatchResult> {
    let index = usize::from(instruction.expect_index()?);
    let (bits, hint) = {
        let source = if argument {
            context.frame.argument(index)?
        } else {
            context.frame.local(index)?
        };
        (source.bits(), source.type_hint)
    };

    let mut copy = context.pool.rent(bits, false);
    {
        let source = if argument {
            context.frame.argument(index)?
        } else {
            context.frame.local(index)?
        };
        copy.as_span_mut().copy_from(&source.contents.as_span())?;
    }

    context
        .frame
        .evaluation_stack_mut()
        .push(StackSlot::new(copy, hint));
    context.advance(instruction);
    Ok(CilDispatchResult::Success)
}

fn store_slot(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
    argument: bool,
) -> Result<CilDispatchResult> {
    let index = usize::from(instruction.expect_index()?);
    let slot = context.frame.evaluation_stack_mut().pop()?;

    let (bits, hint) = {
        let target = if argument {
            context.frame.argument(index)?
        } else {
            context.frame.local(index)?
        };
        (target.bits(), target.type_hint)
    };

    let adapted = adapt_value(
        context.pool,
        slot.contents,
        bits,
        hint == StackSlotTypeHint::Float,
    );

    let previous = {
        let target = if argument {
            context.frame.argument_mut(index)?
        } else {
            context.frame.local_mut(index)?
        };
        std::mem::replace(&mut target.contents, adapted)
    };
    context.pool.release(previous);

    context.advance(instruction);
    Ok(CilDispatchResult::Success)
}
