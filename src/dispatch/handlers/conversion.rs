//! Numeric conversion handlers: the `conv.*` family.
//!
//! Integer conversions work at the bit level and survive partial knowledge:
//! truncation keeps the low bits' knownness and extension replicates the
//! (possibly unknown) sign bit. Conversions through a float interpretation
//! need fully-known input and degrade to unknown otherwise.

use crate::{
    assembly::Instruction,
    dispatch::{CilDispatchResult, ConversionKind, ExecutionContext},
    stack::{StackSlot, StackSlotTypeHint},
    Result,
};

impl ConversionKind {
    /// Logical width of the conversion target in bits.
    fn logical_bits(self) -> usize {
        match self {
            ConversionKind::I1 | ConversionKind::U1 => 8,
            ConversionKind::I2 | ConversionKind::U2 => 16,
            ConversionKind::I4 | ConversionKind::U4 | ConversionKind::R4 => 32,
            ConversionKind::I8 | ConversionKind::U8 | ConversionKind::R8 => 64,
        }
    }

    /// Width of the stack slot the converted value occupies.
    fn container_bits(self) -> usize {
        self.logical_bits().max(32)
    }

    fn is_float(self) -> bool {
        matches!(self, ConversionKind::R4 | ConversionKind::R8)
    }

    fn is_signed(self) -> bool {
        matches!(
            self,
            ConversionKind::I1 | ConversionKind::I2 | ConversionKind::I4 | ConversionKind::I8
        )
    }
}

/// Pops one value and pushes it converted to the target numeric type.
pub(crate) fn convert(
    context: &mut ExecutionContext<'_>,
    instruction: &Instruction,
    kind: ConversionKind,
) -> Result<CilDispatchResult> {
    let source = context.frame.evaluation_stack_mut().pop()?;

    let result = if kind.is_float() {
        convert_to_float(context, &source, kind)?
    } else if source.type_hint == StackSlotTypeHint::Float {
        convert_float_to_integer(context, &source, kind)?
    } else {
        convert_integer(context, &source, kind)
    };

    context.pool.release(source.contents);
    context.frame.evaluation_stack_mut().push(result);
    context.advance(instruction);
    Ok(CilDispatchResult::Success)
}

/// Bit-level integer-to-integer conversion: truncate to the logical width,
/// then extend back to the container.
fn convert_integer(
    context: &mut ExecutionContext<'_>,
    source: &StackSlot,
    kind: ConversionKind,
) -> StackSlot {
    let logical = kind.logical_bits().min(source.bits());
    let mut contents = context.pool.rent(kind.container_bits(), false);
    contents
        .as_span_mut()
        .copy_extended_from(&source.contents.slice(0, logical), kind.is_signed());
    StackSlot::integer(contents)
}

/// Float source truncates toward zero, like the byte code's `conv` family.
fn convert_float_to_integer(
    context: &mut ExecutionContext<'_>,
    source: &StackSlot,
    kind: ConversionKind,
) -> Result<StackSlot> {
    let mut contents = context.pool.rent(kind.container_bits(), false);
    if source.contents.is_fully_known() {
        let value = if source.bits() == 32 {
            f64::from(source.contents.as_span().f32()?)
        } else {
            source.contents.as_span().f64()?
        };
        let truncated = value.trunc() as i64;
        {
            let mut span = contents.as_span_mut();
            if kind.container_bits() == 32 {
                span.write_i32(truncated as i32);
            } else {
                span.write_i64(truncated);
            }
        }
        // The narrow targets truncate to their logical width and extend back.
        if kind.logical_bits() < kind.container_bits() {
            let mut narrowed = context.pool.rent(kind.container_bits(), false);
            narrowed
                .as_span_mut()
                .copy_extended_from(&contents.slice(0, kind.logical_bits()), kind.is_signed());
            context.pool.release(contents);
            return Ok(StackSlot::integer(narrowed));
        }
    }
    Ok(StackSlot::integer(contents))
}

/// Integer or float source to an IEEE-754 target.
fn convert_to_float(
    context: &mut ExecutionContext<'_>,
    source: &StackSlot,
    kind: ConversionKind,
) -> Result<StackSlot> {
    let mut contents = context.pool.rent(kind.container_bits(), false);
    if source.contents.is_fully_known() {
        let value = if source.type_hint == StackSlotTypeHint::Float {
            if source.bits() == 32 {
                f64::from(source.contents.as_span().f32()?)
            } else {
                source.contents.as_span().f64()?
            }
        } else {
            // conv.r4/conv.r8 interpret integer sources as signed.
            source.contents.as_span().signed_value()? as f64
        };
        let mut span = contents.as_span_mut();
        if kind == ConversionKind::R4 {
            span.write_f32(value as f32);
        } else {
            span.write_f64(value);
        }
    }
    Ok(StackSlot::float(contents))
}
