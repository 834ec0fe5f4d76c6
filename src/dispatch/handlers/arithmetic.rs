//! Binary/unary arithmetic, bitwise and shift handlers.

use crate::{
    assembly::Instruction,
    dispatch::{
        handlers::{promote_float, width_align_integers},
        BinaryOpKind, CilDispatchResult, DispatchFault, ExecutionContext, ShiftKind, UnaryOpKind,
    },
    memory::DivisionResult,
    stack::StackSlotTypeHint,
    Result,
};

/// Pops two operands, applies the trilean-aware binary operation and pushes
/// one result of the aligned width.
pub(crate) fn binary_op(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
    kind: BinaryOpKind,
) -> Result<CilDispatchResult> {
    let b = context.frame.evaluation_stack_mut().pop()?;
    let a = context.frame.evaluation_stack_mut().pop()?;

    let arithmetic = matches!(
        kind,
        BinaryOpKind::Add
            | BinaryOpKind::Sub
            | BinaryOpKind::Mul
            | BinaryOpKind::Div { .. }
            | BinaryOpKind::Rem { .. }
    );
    if arithmetic
        && (a.type_hint == StackSlotTypeHint::Float || b.type_hint == StackSlotTypeHint::Float)
    {
        return float_binary_op(context, instruction, kind, a, b);
    }

    let (mut a, b) = width_align_integers(context.pool, a, b, kind.signed());

    let fault = {
        let mut target = a.contents.as_span_mut();
        let operand = b.contents.as_span();
        match kind {
            BinaryOpKind::Add => {
                target.integer_add(&operand)?;
                None
            }
            BinaryOpKind::Sub => {
                target.integer_sub(&operand)?;
                None
            }
            BinaryOpKind::Mul => {
                target.integer_mul(&operand)?;
                None
            }
            BinaryOpKind::Div { signed } => match target.integer_div(&operand, signed)? {
                DivisionResult::Done => None,
                DivisionResult::DivideByZero => Some(DispatchFault::DivideByZero),
            },
            BinaryOpKind::Rem { signed } => match target.integer_rem(&operand, signed)? {
                DivisionResult::Done => None,
                DivisionResult::DivideByZero => Some(DispatchFault::DivideByZero),
            },
            BinaryOpKind::And => {
                target.and(&operand)?;
                None
            }
            BinaryOpKind::Or => {
                target.or(&operand)?;
                None
            }
            BinaryOpKind::Xor => {
                target.xor(&operand)?;
                None
            }
        }
    };

    context.pool.release(b.contents);
    if let Some(fault) = fault {
        context.pool.release(a.contents);
        return Ok(CilDispatchResult::Exception(fault));
    }

    context.frame.evaluation_stack_mut().push(a);
    context.advance(instruction);
    Ok(CilDispatchResult::Success)
}

/// IEEE-754 path for the arithmetic opcodes; division by zero yields an
/// infinity, never a fault.
fn float_binary_op(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
    kind: BinaryOpKind,
    a: crate::stack::StackSlot,
    b: crate::stack::StackSlot,
) -> Result<CilDispatchResult> {
    let target_bits = a.bits().max(b.bits());
    let mut a = promote_float(context.pool, a, target_bits);
    let b = promote_float(context.pool, b, target_bits);

    {
        let mut target = a.contents.as_span_mut();
        let operand = b.contents.as_span();
        match kind {
            BinaryOpKind::Add => target.float_binary(&operand, |x, y| x + y)?,
            BinaryOpKind::Sub => target.float_binary(&operand, |x, y| x - y)?,
            BinaryOpKind::Mul => target.float_binary(&operand, |x, y| x * y)?,
            BinaryOpKind::Div { .. } => target.float_binary(&operand, |x, y| x / y)?,
            BinaryOpKind::Rem { .. } => target.float_binary(&operand, |x, y| x % y)?,
            _ => unreachable!("bitwise opcodes never take the float path"),
        }
    }

    context.pool.release(b.contents);
    a.type_hint = StackSlotTypeHint::Float;
    context.frame.evaluation_stack_mut().push(a);
    context.advance(instruction);
    Ok(CilDispatchResult::Success)
}

/// Pops the shift amount then the value; an unknown amount degrades the whole
/// result to unknown.
pub(crate) fn shift_op(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
    kind: ShiftKind,
) -> Result<CilDispatchResult> {
    let amount_slot = context.frame.evaluation_stack_mut().pop()?;
    let mut value = context.frame.evaluation_stack_mut().pop()?;

    let amount = if amount_slot.contents.is_fully_known() {
        Some(amount_slot.contents.as_span().unsigned_value()? as usize)
    } else {
        None
    };
    context.pool.release(amount_slot.contents);

    match amount {
        Some(amount) => {
            let mut span = value.contents.as_span_mut();
            match kind {
                ShiftKind::Left => span.shift_left(amount),
                ShiftKind::Right => span.shift_right(amount, true),
                ShiftKind::RightUnsigned => span.shift_right(amount, false),
            }
        }
        // Any of the width's shifts could apply; no bit survives as known.
        None => value.contents.mark_fully_unknown(),
    }

    context.frame.evaluation_stack_mut().push(value);
    context.advance(instruction);
    Ok(CilDispatchResult::Success)
}

/// Negation and bitwise complement, in place on the popped slot.
pub(crate) fn unary_op(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
    kind: UnaryOpKind,
) -> Result<CilDispatchResult> {
    let mut value = context.frame.evaluation_stack_mut().pop()?;

    {
        let mut span = value.contents.as_span_mut();
        match kind {
            UnaryOpKind::Neg if value.type_hint == StackSlotTypeHint::Float => span.float_neg(),
            UnaryOpKind::Neg => span.integer_neg(),
            UnaryOpKind::Not => span.not(),
        }
    }

    context.frame.evaluation_stack_mut().push(value);
    context.advance(instruction);
    Ok(CilDispatchResult::Success)
}
