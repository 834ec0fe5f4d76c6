//! Comparison handlers: `ceq`, `cgt(.un)`, `clt(.un)`.

use crate::{
    assembly::Instruction,
    dispatch::{
        handlers::{align_operands, evaluate_condition, push_trilean},
        CilDispatchResult, ConditionKind, ExecutionContext,
    },
    Result,
};

/// Pops two operands, evaluates the condition and pushes the trilean result as
/// a 32-bit integer.
pub(crate) fn compare(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
    condition: ConditionKind,
) -> Result<CilDispatchResult> {
    let b = context.frame.evaluation_stack_mut().pop()?;
    let a = context.frame.evaluation_stack_mut().pop()?;

    let (a, b) = align_operands(context, a, b, condition);
    let result = evaluate_condition(&a, &b, condition)?;

    context.pool.release(a.contents);
    context.pool.release(b.contents);

    push_trilean(context, result);
    context.advance(instruction);
    Ok(CilDispatchResult::Success)
}
