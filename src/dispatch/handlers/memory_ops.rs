//! Indirect memory access and block operation handlers.

use crate::{
    assembly::Instruction,
    dispatch::{
        handlers::{resolve_address, ResolvedAddress},
        CilDispatchResult, DispatchFault, ExecutionContext, MemoryAccess,
    },
    memory::{BitVector, Trilean},
    stack::StackSlot,
    Result,
};

/// `ldind.*`: pop an address, read the accessed width, push the widened value.
pub(crate) fn load_indirect(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
    access: MemoryAccess,
) -> Result<CilDispatchResult> {
    let pointer = context.frame.evaluation_stack_mut().pop()?;
    let resolved = resolve_address(
        context.resolver,
        instruction,
        &pointer.contents.as_span(),
        false,
    )?;
    context.pool.release(pointer.contents);

    match resolved {
        ResolvedAddress::Null => Ok(CilDispatchResult::Exception(DispatchFault::NullReference)),
        ResolvedAddress::Unresolved => {
            push_unknown_value(context, access);
            context.advance(instruction);
            Ok(CilDispatchResult::Success)
        }
        ResolvedAddress::Known(address) => {
            let slot = read_widened(context, address, access);
            context.frame.evaluation_stack_mut().push(slot);
            context.advance(instruction);
            Ok(CilDispatchResult::Success)
        }
    }
}

/// `stind.*`: pop a value then an address, store the accessed width.
pub(crate) fn store_indirect(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
    access: MemoryAccess,
) -> Result<CilDispatchResult> {
    let value = context.frame.evaluation_stack_mut().pop()?;
    let pointer = context.frame.evaluation_stack_mut().pop()?;

    let resolved = resolve_address(
        context.resolver,
        instruction,
        &pointer.contents.as_span(),
        true,
    )?;
    context.pool.release(pointer.contents);

    match resolved {
        ResolvedAddress::Null => {
            context.pool.release(value.contents);
            Ok(CilDispatchResult::Exception(DispatchFault::NullReference))
        }
        ResolvedAddress::Unresolved => {
            // Writing "somewhere" unmodeled: assume it succeeded.
            context.pool.release(value.contents);
            context.advance(instruction);
            Ok(CilDispatchResult::Success)
        }
        ResolvedAddress::Known(address) => {
            let bits = access.bits.min(value.bits());
            context.memory.write(address, &value.contents.slice(0, bits));
            context.pool.release(value.contents);
            context.advance(instruction);
            Ok(CilDispatchResult::Success)
        }
    }
}

/// `cpblk`: pop size, source and destination; copy through a scratch vector so
/// unknown source bytes degrade the destination instead of faulting.
pub(crate) fn copy_block(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
) -> Result<CilDispatchResult> {
    let size_slot = context.frame.evaluation_stack_mut().pop()?;
    let source = context.frame.evaluation_stack_mut().pop()?;
    let destination = context.frame.evaluation_stack_mut().pop()?;

    let size = resolve_block_size(context, instruction, &size_slot)?;
    let source_address = resolve_address(
        context.resolver,
        instruction,
        &source.contents.as_span(),
        false,
    )?;
    let destination_address = resolve_address(
        context.resolver,
        instruction,
        &destination.contents.as_span(),
        true,
    )?;

    context.pool.release(size_slot.contents);
    context.pool.release(source.contents);
    context.pool.release(destination.contents);

    if source_address == ResolvedAddress::Null || destination_address == ResolvedAddress::Null {
        return Ok(CilDispatchResult::Exception(DispatchFault::NullReference));
    }

    // An unresolved source leaves the buffer fully unknown; an unresolved
    // destination drops the write.
    let mut buffer = BitVector::new(size as usize * 8, false);
    if let ResolvedAddress::Known(address) = source_address {
        context.memory.read(address, &mut buffer.as_span_mut());
    }
    if let ResolvedAddress::Known(address) = destination_address {
        context.memory.write(address, &buffer.as_span());
    }

    context.advance(instruction);
    Ok(CilDispatchResult::Success)
}

/// `initblk`: pop size, fill byte and destination; replicate the (possibly
/// unknown) byte across the block.
pub(crate) fn init_block(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
) -> Result<CilDispatchResult> {
    let size_slot = context.frame.evaluation_stack_mut().pop()?;
    let value = context.frame.evaluation_stack_mut().pop()?;
    let destination = context.frame.evaluation_stack_mut().pop()?;

    let size = resolve_block_size(context, instruction, &size_slot)?;
    let destination_address = resolve_address(
        context.resolver,
        instruction,
        &destination.contents.as_span(),
        true,
    )?;

    let mut pattern = BitVector::new(8, false);
    pattern
        .as_span_mut()
        .copy_from(&value.contents.slice(0, 8))?;

    context.pool.release(size_slot.contents);
    context.pool.release(value.contents);
    context.pool.release(destination.contents);

    match destination_address {
        ResolvedAddress::Null => Ok(CilDispatchResult::Exception(DispatchFault::NullReference)),
        ResolvedAddress::Unresolved => {
            context.advance(instruction);
            Ok(CilDispatchResult::Success)
        }
        ResolvedAddress::Known(address) => {
            let mut buffer = BitVector::new(size as usize * 8, false);
            for i in 0..size as usize {
                buffer.slice_mut(i * 8, 8).copy_from(&pattern.as_span())?;
            }
            context.memory.write(address, &buffer.as_span());
            context.advance(instruction);
            Ok(CilDispatchResult::Success)
        }
    }
}

/// The concrete byte count of a block operation.
fn resolve_block_size(
    context: &ExecutionContext<'_>,
    instruction: &Instruction,
    size: &StackSlot,
) -> Result<u32> {
    if size.contents.is_fully_known() {
        Ok(size.contents.as_span().unsigned_value()? as u32)
    } else {
        Ok(context.resolver.resolve_block_size(instruction))
    }
}

/// Pushes a fully unknown value of the access's container width.
pub(crate) fn push_unknown_value(context: &mut ExecutionContext<'_>, access: MemoryAccess) {
    let contents = context.pool.rent(access.container_bits(), false);
    let slot = if access.float {
        StackSlot::float(contents)
    } else {
        StackSlot::integer(contents)
    };
    context.frame.evaluation_stack_mut().push(slot);
}

/// Reads `access.bits` at `address` and widens to the stack container,
/// extending with the loaded (possibly unknown) sign bit when signed.
pub(crate) fn read_widened(
    context: &mut ExecutionContext<'_>,
    address: u64,
    access: MemoryAccess,
) -> StackSlot {
    let container = access.container_bits();
    let mut contents = context.pool.rent(container, false);
    context
        .memory
        .read(address, &mut contents.slice_mut(0, access.bits));

    if container > access.bits {
        let fill = if access.signed {
            contents.bit(access.bits - 1)
        } else {
            Trilean::False
        };
        let mut span = contents.as_span_mut();
        for i in access.bits..container {
            span.set_bit(i, fill);
        }
    }

    if access.float {
        StackSlot::float(contents)
    } else {
        StackSlot::integer(contents)
    }
}
