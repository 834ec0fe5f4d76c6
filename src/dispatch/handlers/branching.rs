//! Control-flow handlers: unconditional, unary and binary branches, `switch`.
//!
//! A branch whose trilean condition comes out `Unknown` is never forked: the
//! machine's [`UnknownResolver`](crate::policy::UnknownResolver) converts it
//! into exactly one concrete outcome, keeping execution single-path.

use crate::{
    assembly::Instruction,
    dispatch::{
        handlers::{align_operands, evaluate_condition},
        CilDispatchResult, ConditionKind, ExecutionContext,
    },
    Result,
};

/// Unconditional branch: redirect the instruction pointer.
pub(crate) fn branch(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
) -> Result<CilDispatchResult> {
    let target = instruction.expect_target()?;
    context.frame.set_ip(target);
    Ok(CilDispatchResult::Success)
}

/// `brtrue`/`brfalse`: pop one value and branch on its zero-ness.
pub(crate) fn unary_branch(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
    when_true: bool,
) -> Result<CilDispatchResult> {
    let target = instruction.expect_target()?;
    let slot = context.frame.evaluation_stack_mut().pop()?;

    let is_zero = slot.contents.as_span().is_zero();
    context.pool.release(slot.contents);

    let condition = if when_true { !is_zero } else { is_zero };
    let taken = condition
        .to_bool()
        .unwrap_or_else(|| context.resolver.resolve_branch_condition(instruction));

    if taken {
        context.frame.set_ip(target);
    } else {
        context.advance(instruction);
    }
    Ok(CilDispatchResult::Success)
}

/// The `beq`/`bge`/`bgt`/`ble`/`blt`/`bne` family: pop two operands, evaluate
/// the trilean condition, branch or fall through.
pub(crate) fn binary_branch(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
    condition: ConditionKind,
) -> Result<CilDispatchResult> {
    let target = instruction.expect_target()?;
    let b = context.frame.evaluation_stack_mut().pop()?;
    let a = context.frame.evaluation_stack_mut().pop()?;

    let (a, b) = align_operands(context, a, b, condition);
    let outcome = evaluate_condition(&a, &b, condition)?;

    context.pool.release(a.contents);
    context.pool.release(b.contents);

    let taken = outcome
        .to_bool()
        .unwrap_or_else(|| context.resolver.resolve_branch_condition(instruction));

    if taken {
        context.frame.set_ip(target);
    } else {
        context.advance(instruction);
    }
    Ok(CilDispatchResult::Success)
}

/// Jump-table branch; an out-of-range or unresolved selector falls through.
pub(crate) fn switch(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
) -> Result<CilDispatchResult> {
    let selector = context.frame.evaluation_stack_mut().pop()?;

    let index = if selector.contents.is_fully_known() {
        Some(selector.contents.as_span().unsigned_value()?)
    } else {
        context
            .resolver
            .resolve_switch_index(instruction)
            .map(u64::from)
    };
    context.pool.release(selector.contents);

    let targets = instruction.expect_switch()?;
    match index {
        Some(index) if (index as usize) < targets.len() => {
            context.frame.set_ip(targets[index as usize]);
        }
        _ => context.advance(instruction),
    }
    Ok(CilDispatchResult::Success)
}
