//! Call handlers: `call` and `callvirt` through the machine's policies.
//!
//! The invocation strategy decides, per call site, whether the callee is
//! stepped into (a frame is pushed and its body executes instruction by
//! instruction) or treated opaquely (the invoker produces the result). The
//! caller's instruction pointer advances before either path, so a returning
//! callee resumes the caller at the instruction after the call.

use crate::{
    assembly::Instruction,
    dispatch::{
        handlers::adapt_value, CilDispatchResult, DispatchFault, ExecutionContext, PendingCall,
    },
    policy::InvocationDecision,
    stack::{StackSlot, StackSlotTypeHint},
    Error, Result,
};

/// Dispatches a call-type instruction.
pub(crate) fn call(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
    virtual_call: bool,
) -> Result<CilDispatchResult> {
    let token = instruction.expect_token()?;
    let method = context
        .methods
        .get(&token)
        .ok_or(Error::MethodNotFound(token))?
        .clone();

    // Arguments were pushed left to right; pop right to left.
    let count = method.arguments().len();
    let mut arguments = Vec::with_capacity(count);
    for _ in 0..count {
        arguments.push(context.frame.evaluation_stack_mut().pop()?);
    }
    arguments.reverse();

    // A virtual call through a known-null `this` faults before any decision.
    if virtual_call {
        if let Some(this) = arguments.first() {
            if this.contents.as_span().is_zero().is_true() {
                release_all(context, arguments);
                return Ok(CilDispatchResult::Exception(DispatchFault::NullReference));
            }
        }
    }

    // The caller resumes after the call once the callee returns.
    context.advance(instruction);

    let decision = context.strategy.decide(&method, instruction);
    if decision == InvocationDecision::StepInto && method.body().is_some() {
        // Adapt the popped slots to the callee's declared layouts.
        let arguments = arguments
            .into_iter()
            .zip(method.arguments())
            .map(|(slot, layout)| {
                let contents = adapt_value(
                    context.pool,
                    slot.contents,
                    layout.bits,
                    layout.hint == StackSlotTypeHint::Float,
                );
                StackSlot::new(contents, layout.hint)
            })
            .collect();
        context.pending_call = Some(PendingCall { method, arguments });
        return Ok(CilDispatchResult::Success);
    }

    let result = context.invoker.invoke(&method, &arguments, context.pool);
    release_all(context, arguments);
    if let Some(slot) = result {
        context.frame.evaluation_stack_mut().push(slot);
    }
    Ok(CilDispatchResult::Success)
}

fn release_all(context: &mut ExecutionContext<'_>, slots: Vec<StackSlot>) {
    for slot in slots {
        context.pool.release(slot.contents);
    }
}
