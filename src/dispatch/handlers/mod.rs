//! Handler family implementations and their shared plumbing.
//!
//! Every function here follows the same contract: consume operands from the
//! current frame's evaluation stack, apply the opcode's effect, release every
//! popped bit vector back to the pool exactly once (on *every* path, including
//! fault exits), and leave the instruction pointer pointing at the next
//! instruction to execute.

pub(crate) mod arithmetic;
pub(crate) mod arrays;
pub(crate) mod branching;
pub(crate) mod calls;
pub(crate) mod comparison;
pub(crate) mod constants;
pub(crate) mod conversion;
pub(crate) mod memory_ops;
pub(crate) mod stack_ops;
pub(crate) mod variables;

use crate::{
    assembly::Instruction,
    dispatch::{ConditionKind, ExecutionContext},
    memory::{BitVector, BitVectorPool, BitVectorSpan, Trilean},
    policy::UnknownResolver,
    stack::{StackSlot, StackSlotTypeHint},
    Result,
};

/// A pointer operand after unknown resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ResolvedAddress {
    /// A concrete, non-null address.
    Known(u64),
    /// A known-null address: the access faults.
    Null,
    /// The resolver declined to pick an address; the effect degrades.
    Unresolved,
}

/// Resolves a pointer span to a concrete address, consulting the resolver for
/// partially unknown pointers.
pub(crate) fn resolve_address(
    resolver: &dyn UnknownResolver,
    instruction: &Instruction,
    pointer: &BitVectorSpan<'_>,
    destination: bool,
) -> Result<ResolvedAddress> {
    if pointer.is_fully_known() {
        let address = pointer.unsigned_value()?;
        return Ok(if address == 0 {
            ResolvedAddress::Null
        } else {
            ResolvedAddress::Known(address)
        });
    }

    let resolved = if destination {
        resolver.resolve_destination_pointer(instruction)
    } else {
        resolver.resolve_source_pointer(instruction)
    };
    Ok(match resolved {
        Some(0) => ResolvedAddress::Null,
        Some(address) => ResolvedAddress::Known(address),
        None => ResolvedAddress::Unresolved,
    })
}

/// Pushes a trilean as a 32-bit comparison result.
///
/// `True`/`False` become known 1/0; `Unknown` leaves only bit 0 unknown - the
/// upper 31 bits of a comparison result are zero regardless.
pub(crate) fn push_trilean(context: &mut ExecutionContext<'_>, value: Trilean) {
    let mut contents = context.pool.rent(32, true);
    if value != Trilean::False {
        contents.set_bit(0, value);
    }
    context
        .frame
        .evaluation_stack_mut()
        .push(StackSlot::integer(contents));
}

/// Width-aligns two integer slots by extending the narrower one.
pub(crate) fn width_align_integers(
    pool: &mut BitVectorPool,
    mut a: StackSlot,
    mut b: StackSlot,
    sign_extend: bool,
) -> (StackSlot, StackSlot) {
    let target = a.bits().max(b.bits());
    for slot in [&mut a, &mut b] {
        if slot.bits() < target {
            let mut wider = pool.rent(target, false);
            wider
                .as_span_mut()
                .copy_extended_from(&slot.contents.as_span(), sign_extend);
            let narrow = std::mem::replace(&mut slot.contents, wider);
            pool.release(narrow);
        }
    }
    (a, b)
}

/// Converts a float slot to the given width, numerically when known.
pub(crate) fn promote_float(pool: &mut BitVectorPool, mut slot: StackSlot, target_bits: usize) -> StackSlot {
    if slot.bits() == target_bits {
        return slot;
    }
    let mut promoted = pool.rent(target_bits, false);
    if slot.contents.is_fully_known() {
        match (slot.bits(), target_bits) {
            (32, 64) => {
                let value = slot.contents.as_span().f32().expect("fully known span");
                promoted.as_span_mut().write_f64(f64::from(value));
            }
            (64, 32) => {
                let value = slot.contents.as_span().f64().expect("fully known span");
                promoted.as_span_mut().write_f32(value as f32);
            }
            _ => promoted.as_span_mut().mark_fully_unknown(),
        }
    }
    let narrow = std::mem::replace(&mut slot.contents, promoted);
    pool.release(narrow);
    slot
}

/// Adapts a popped value to a declared slot layout (local, argument or call
/// parameter), converting floats numerically and extending integers with their
/// sign.
pub(crate) fn adapt_value(
    pool: &mut BitVectorPool,
    value: BitVector,
    target_bits: usize,
    float: bool,
) -> BitVector {
    if value.count() == target_bits {
        return value;
    }
    if float {
        let slot = promote_float(pool, StackSlot::float(value), target_bits);
        return slot.contents;
    }
    let mut adapted = pool.rent(target_bits, false);
    adapted
        .as_span_mut()
        .copy_extended_from(&value.as_span(), true);
    pool.release(value);
    adapted
}

/// Width-aligns a condition's operands; float pairs promote numerically, and
/// integer pairs extend with the condition's signedness.
pub(crate) fn align_operands(
    context: &mut ExecutionContext<'_>,
    a: StackSlot,
    b: StackSlot,
    condition: ConditionKind,
) -> (StackSlot, StackSlot) {
    if a.bits() == b.bits() {
        return (a, b);
    }
    if a.type_hint == StackSlotTypeHint::Float && b.type_hint == StackSlotTypeHint::Float {
        let target = a.bits().max(b.bits());
        return (
            promote_float(context.pool, a, target),
            promote_float(context.pool, b, target),
        );
    }
    let signed = match condition {
        ConditionKind::Equal | ConditionKind::NotEqual => true,
        ConditionKind::GreaterThan { signed }
        | ConditionKind::GreaterThanOrEqual { signed }
        | ConditionKind::LessThan { signed }
        | ConditionKind::LessThanOrEqual { signed } => signed,
    };
    width_align_integers(context.pool, a, b, signed)
}

/// Evaluates a branch/comparison condition over two width-aligned operands.
///
/// Integer semantics apply unless the first (deeper) operand carries a float
/// hint, mirroring how the byte code distinguishes the polymorphic comparison
/// opcodes. For floats, the unsigned flag of the condition doubles as the
/// *unordered* flag: `.un` comparisons hold when either operand is NaN.
pub(crate) fn evaluate_condition(
    left: &StackSlot,
    right: &StackSlot,
    condition: ConditionKind,
) -> Result<Trilean> {
    let a = left.contents.as_span();
    let b = right.contents.as_span();

    if left.type_hint == StackSlotTypeHint::Float {
        return float_condition(&a, &b, condition);
    }

    Ok(match condition {
        ConditionKind::Equal => a.is_equal_to(&b)?,
        ConditionKind::NotEqual => !a.is_equal_to(&b)?,
        ConditionKind::GreaterThan { signed } => a.integer_is_greater_than(&b, signed)?,
        ConditionKind::GreaterThanOrEqual { signed } => {
            a.integer_is_greater_than_or_equal(&b, signed)?
        }
        ConditionKind::LessThan { signed } => a.integer_is_less_than(&b, signed)?,
        ConditionKind::LessThanOrEqual { signed } => a.integer_is_less_than_or_equal(&b, signed)?,
    })
}

fn float_condition(
    a: &BitVectorSpan<'_>,
    b: &BitVectorSpan<'_>,
    condition: ConditionKind,
) -> Result<Trilean> {
    if !a.is_fully_known() || !b.is_fully_known() {
        return Ok(Trilean::Unknown);
    }

    let ordering = if a.count() == 32 {
        a.f32()?.partial_cmp(&b.f32()?)
    } else {
        a.f64()?.partial_cmp(&b.f64()?)
    };

    let result = match ordering {
        // Unordered: equality is false, inequality true, and the `.un`
        // orderings (signed == false) hold by definition.
        None => match condition {
            ConditionKind::Equal => false,
            ConditionKind::NotEqual => true,
            ConditionKind::GreaterThan { signed }
            | ConditionKind::GreaterThanOrEqual { signed }
            | ConditionKind::LessThan { signed }
            | ConditionKind::LessThanOrEqual { signed } => !signed,
        },
        Some(ordering) => match condition {
            ConditionKind::Equal => ordering == std::cmp::Ordering::Equal,
            ConditionKind::NotEqual => ordering != std::cmp::Ordering::Equal,
            ConditionKind::GreaterThan { .. } => ordering == std::cmp::Ordering::Greater,
            ConditionKind::GreaterThanOrEqual { .. } => ordering != std::cmp::Ordering::Less,
            ConditionKind::LessThan { .. } => ordering == std::cmp::Ordering::Less,
            ConditionKind::LessThanOrEqual { .. } => ordering != std::cmp::Ordering::Greater,
        },
    };
    Ok(Trilean::from(result))
}
