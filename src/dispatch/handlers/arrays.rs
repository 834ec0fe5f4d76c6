//! Array handlers: `newarr`, `ldlen` and elementary element access.
//!
//! Arrays live in flat simulated heap memory with the header layout defined in
//! [`crate::memory::ObjectHandle`]: a pointer-sized type slot followed by a
//! 32-bit length, then the elements.

use crate::{
    assembly::Instruction,
    dispatch::{
        handlers::memory_ops::{push_unknown_value, read_widened},
        CilDispatchResult, DispatchFault, ExecutionContext, MemoryAccess,
    },
    memory::{array_header_size, array_length_offset, BitVector, ObjectHandle},
    stack::StackSlot,
    Result,
};

/// `newarr`: allocate a zero-initialised array and push its address.
pub(crate) fn new_array(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
) -> Result<CilDispatchResult> {
    let length_slot = context.frame.evaluation_stack_mut().pop()?;
    let length = if length_slot.contents.is_fully_known() {
        length_slot.contents.as_span().unsigned_value()? as u32
    } else {
        context.resolver.resolve_array_length(instruction)
    };
    context.pool.release(length_slot.contents);

    let element_type = instruction.expect_token()?;
    let element_size = context.element_size(element_type);
    let header = array_header_size(context.is_32_bit);
    let total = header + u64::from(length) * element_size;

    let base = context.allocate(total);
    context.memory.zero_fill(base, total as usize);
    context.memory.write_bytes(
        base + array_length_offset(context.is_32_bit),
        &length.to_le_bytes(),
    );

    let mut address = context.pool.rent(context.pointer_bits(), false);
    if context.is_32_bit {
        address.as_span_mut().write_u32(base as u32);
    } else {
        address.as_span_mut().write_u64(base);
    }
    context
        .frame
        .evaluation_stack_mut()
        .push(StackSlot::integer(address));
    context.advance(instruction);
    Ok(CilDispatchResult::Success)
}

/// `ldlen`: pop an array reference and push its length as a native integer.
pub(crate) fn load_array_length(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
) -> Result<CilDispatchResult> {
    let array = context.frame.evaluation_stack_mut().pop()?;
    let span = array.contents.as_span();

    if !span.is_fully_known() {
        context.pool.release(array.contents);
        let result = context.pool.rent(context.pointer_bits(), false);
        context
            .frame
            .evaluation_stack_mut()
            .push(StackSlot::integer(result));
        context.advance(instruction);
        return Ok(CilDispatchResult::Success);
    }

    if span.is_zero().is_true() {
        context.pool.release(array.contents);
        return Ok(CilDispatchResult::Exception(DispatchFault::NullReference));
    }

    let address = span.unsigned_value()?;
    context.pool.release(array.contents);

    // The upper half of the native integer stays known-zero; only the 32-bit
    // length field is read from the object header.
    let mut result = context.pool.rent(context.pointer_bits(), true);
    let handle = ObjectHandle::new(&*context.memory, address, context.is_32_bit);
    handle.read_array_length(&mut result.slice_mut(0, 32));

    context
        .frame
        .evaluation_stack_mut()
        .push(StackSlot::integer(result));
    context.advance(instruction);
    Ok(CilDispatchResult::Success)
}

/// `ldelem.*`: pop index and array, push the element widened to its container.
pub(crate) fn load_element(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
    access: MemoryAccess,
) -> Result<CilDispatchResult> {
    let index = context.frame.evaluation_stack_mut().pop()?;
    let array = context.frame.evaluation_stack_mut().pop()?;

    match locate_element(context, &array, &index, access)? {
        ElementLocation::Fault(fault) => {
            context.pool.release(index.contents);
            context.pool.release(array.contents);
            Ok(CilDispatchResult::Exception(fault))
        }
        ElementLocation::Unknown => {
            context.pool.release(index.contents);
            context.pool.release(array.contents);
            push_unknown_value(context, access);
            context.advance(instruction);
            Ok(CilDispatchResult::Success)
        }
        ElementLocation::At(address) => {
            context.pool.release(index.contents);
            context.pool.release(array.contents);
            let slot = read_widened(context, address, access);
            context.frame.evaluation_stack_mut().push(slot);
            context.advance(instruction);
            Ok(CilDispatchResult::Success)
        }
    }
}

/// `stelem.*`: pop value, index and array, store the element's width.
pub(crate) fn store_element(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
    access: MemoryAccess,
) -> Result<CilDispatchResult> {
    let value = context.frame.evaluation_stack_mut().pop()?;
    let index = context.frame.evaluation_stack_mut().pop()?;
    let array = context.frame.evaluation_stack_mut().pop()?;

    let location = locate_element(context, &array, &index, access)?;
    context.pool.release(index.contents);
    context.pool.release(array.contents);

    match location {
        ElementLocation::Fault(fault) => {
            context.pool.release(value.contents);
            Ok(CilDispatchResult::Exception(fault))
        }
        ElementLocation::Unknown => {
            // Element position unmodeled; drop the store.
            context.pool.release(value.contents);
            context.advance(instruction);
            Ok(CilDispatchResult::Success)
        }
        ElementLocation::At(address) => {
            let bits = access.bits.min(value.bits());
            context.memory.write(address, &value.contents.slice(0, bits));
            context.pool.release(value.contents);
            context.advance(instruction);
            Ok(CilDispatchResult::Success)
        }
    }
}

/// Where an element access lands after null/unknown/bounds checks.
enum ElementLocation {
    /// Concrete element address.
    At(u64),
    /// Array or index unknown; the access degrades.
    Unknown,
    /// Null array or known out-of-range index.
    Fault(DispatchFault),
}

fn locate_element(
    context: &ExecutionContext<'_>,
    array: &StackSlot,
    index: &StackSlot,
    access: MemoryAccess,
) -> Result<ElementLocation> {
    let array_span = array.contents.as_span();
    if array_span.is_zero().is_true() {
        return Ok(ElementLocation::Fault(DispatchFault::NullReference));
    }
    if !array_span.is_fully_known() || !index.contents.is_fully_known() {
        return Ok(ElementLocation::Unknown);
    }

    let address = array_span.unsigned_value()?;
    let element_index = index.contents.as_span().unsigned_value()?;

    // Bounds-check against the header length when it is known.
    let handle = ObjectHandle::new(&*context.memory, address, context.is_32_bit);
    let mut length = BitVector::new(32, false);
    handle.read_array_length(&mut length.as_span_mut());
    if length.is_fully_known() {
        let length = u64::from(length.as_span().u32()?);
        if element_index >= length {
            return Ok(ElementLocation::Fault(DispatchFault::IndexOutOfRange));
        }
    }

    Ok(ElementLocation::At(
        handle.element_address(element_index, access.bits as u64 / 8),
    ))
}
