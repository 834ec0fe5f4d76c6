//! Constant-loading handlers: the `ldc` family and `ldnull`.

use crate::{
    assembly::Instruction,
    dispatch::{CilDispatchResult, ConstantKind, ExecutionContext},
    stack::StackSlot,
    Result,
};

/// Pushes the instruction's constant operand as a fresh pooled vector.
pub(crate) fn push_constant(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
    kind: ConstantKind,
) -> Result<CilDispatchResult> {
    let slot = match kind {
        ConstantKind::I4 => {
            let value = instruction.expect_i32()?;
            let mut contents = context.pool.rent(32, false);
            contents.as_span_mut().write_i32(value);
            StackSlot::integer(contents)
        }
        ConstantKind::I8 => {
            let value = instruction.expect_i64()?;
            let mut contents = context.pool.rent(64, false);
            contents.as_span_mut().write_i64(value);
            StackSlot::integer(contents)
        }
        ConstantKind::R4 => {
            let value = instruction.expect_f32()?;
            let mut contents = context.pool.rent(32, false);
            contents.as_span_mut().write_f32(value);
            StackSlot::float(contents)
        }
        ConstantKind::R8 => {
            let value = instruction.expect_f64()?;
            let mut contents = context.pool.rent(64, false);
            contents.as_span_mut().write_f64(value);
            StackSlot::float(contents)
        }
        // Null is a known-zero pointer-width reference.
        ConstantKind::Null => StackSlot::integer(context.pool.rent(context.pointer_bits(), true)),
    };

    context.frame.evaluation_stack_mut().push(slot);
    context.advance(instruction);
    Ok(CilDispatchResult::Success)
}
