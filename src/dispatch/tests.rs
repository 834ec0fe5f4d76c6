//! Unit tests for the dispatcher and handler families.
//!
//! These drive complete method bodies through the machine, verifying:
//! - handler lookup (opcode to family mapping)
//! - stack operations (dup, pop)
//! - shifts, unary ops, and bitwise dominance under unknowns
//! - comparisons and their trilean results
//! - conversions (truncation, extension, float round trips)
//! - indirect memory access and block initialisation
//! - switch dispatch and unknown-branch resolution

use std::sync::Arc;

use super::*;
use crate::{
    assembly::{MethodBuilder, Operand, SlotLayout},
    machine::CilVirtualMachine,
    memory::Trilean,
    policy::UnknownResolver,
    stack::{StackSlot, StackSlotTypeHint},
    Error,
};

const METHOD: Token = Token::new(0x0600_0001);

/// Runs a body that returns one value and hands back the resulting slot.
fn run_for_result(builder: MethodBuilder) -> StackSlot {
    let mut vm = CilVirtualMachine::new(false);
    let token = vm.register_method(builder.push(CilCode::Ret).build());
    vm.push_frame(token).unwrap();
    vm.run().unwrap();
    vm.take_return_value().expect("method should return a value")
}

fn result_builder() -> MethodBuilder {
    MethodBuilder::new(METHOD).returns(SlotLayout::INT32)
}

#[test]
fn test_lookup_families() {
    assert_eq!(Dispatcher::lookup(CilCode::Nop), HandlerKind::Nop);
    assert_eq!(
        Dispatcher::lookup(CilCode::Xor),
        HandlerKind::Binary(BinaryOpKind::Xor)
    );
    assert_eq!(
        Dispatcher::lookup(CilCode::BgeUn),
        HandlerKind::BinaryBranch(ConditionKind::GreaterThanOrEqual { signed: false })
    );
    assert_eq!(
        Dispatcher::lookup(CilCode::LdindU2),
        HandlerKind::LoadIndirect(MemoryAccess::U2)
    );
    assert_eq!(
        Dispatcher::lookup(CilCode::DivUn),
        HandlerKind::Binary(BinaryOpKind::Div { signed: false })
    );
}

#[test]
fn test_operand_extension_signedness() {
    assert!(BinaryOpKind::Add.signed());
    assert!(!BinaryOpKind::Div { signed: false }.signed());
    assert!(BinaryOpKind::Rem { signed: true }.signed());
    assert!(!BinaryOpKind::Xor.signed());
}

#[test]
fn test_dup_and_pop() {
    let result = run_for_result(
        result_builder()
            .ldc_i4(11)
            .push(CilCode::Dup)
            .push(CilCode::Add),
    );
    assert_eq!(result.contents.as_span().i32().unwrap(), 22);

    let result = run_for_result(result_builder().ldc_i4(5).ldc_i4(9).push(CilCode::Pop));
    assert_eq!(result.contents.as_span().i32().unwrap(), 5);
}

#[test]
fn test_shift_opcodes() {
    let result = run_for_result(result_builder().ldc_i4(3).ldc_i4(4).push(CilCode::Shl));
    assert_eq!(result.contents.as_span().i32().unwrap(), 48);

    let result = run_for_result(result_builder().ldc_i4(-64).ldc_i4(3).push(CilCode::Shr));
    assert_eq!(result.contents.as_span().i32().unwrap(), -8);

    let result = run_for_result(result_builder().ldc_i4(-64).ldc_i4(3).push(CilCode::ShrUn));
    assert_eq!(
        result.contents.as_span().u32().unwrap(),
        (-64i32 as u32) >> 3
    );
}

#[test]
fn test_shift_by_unknown_amount_degrades() {
    let result = run_for_result(
        MethodBuilder::new(METHOD)
            .argument(SlotLayout::INT32)
            .returns(SlotLayout::INT32)
            .ldc_i4(1)
            .var(CilCode::Ldarg, 0)
            .push(CilCode::Shl),
    );
    assert!(!result.contents.is_fully_known());
}

#[test]
fn test_unary_opcodes() {
    let result = run_for_result(result_builder().ldc_i4(42).push(CilCode::Neg));
    assert_eq!(result.contents.as_span().i32().unwrap(), -42);

    let result = run_for_result(result_builder().ldc_i4(0).push(CilCode::Not));
    assert_eq!(result.contents.as_span().i32().unwrap(), -1);
}

#[test]
fn test_bitwise_known_zero_dominates_unknown_operand() {
    // unknown & 0 is a known zero even though one operand is unknown.
    let result = run_for_result(
        MethodBuilder::new(METHOD)
            .argument(SlotLayout::INT32)
            .returns(SlotLayout::INT32)
            .var(CilCode::Ldarg, 0)
            .ldc_i4(0)
            .push(CilCode::And),
    );
    assert_eq!(result.contents.as_span().i32().unwrap(), 0);

    // unknown | -1 is a known -1.
    let result = run_for_result(
        MethodBuilder::new(METHOD)
            .argument(SlotLayout::INT32)
            .returns(SlotLayout::INT32)
            .var(CilCode::Ldarg, 0)
            .ldc_i4(-1)
            .push(CilCode::Or),
    );
    assert_eq!(result.contents.as_span().i32().unwrap(), -1);

    // unknown ^ 0 stays unknown.
    let result = run_for_result(
        MethodBuilder::new(METHOD)
            .argument(SlotLayout::INT32)
            .returns(SlotLayout::INT32)
            .var(CilCode::Ldarg, 0)
            .ldc_i4(0)
            .push(CilCode::Xor),
    );
    assert!(!result.contents.is_fully_known());
}

#[test]
fn test_comparison_opcodes() {
    let result = run_for_result(result_builder().ldc_i4(7).ldc_i4(7).push(CilCode::Ceq));
    assert_eq!(result.contents.as_span().i32().unwrap(), 1);

    let result = run_for_result(result_builder().ldc_i4(3).ldc_i4(7).push(CilCode::Cgt));
    assert_eq!(result.contents.as_span().i32().unwrap(), 0);

    // Unsigned: -1 is the largest 32-bit value.
    let result = run_for_result(result_builder().ldc_i4(-1).ldc_i4(7).push(CilCode::CgtUn));
    assert_eq!(result.contents.as_span().i32().unwrap(), 1);

    let result = run_for_result(result_builder().ldc_i4(-5).ldc_i4(3).push(CilCode::Clt));
    assert_eq!(result.contents.as_span().i32().unwrap(), 1);
}

#[test]
fn test_comparison_with_unknown_operand() {
    let result = run_for_result(
        MethodBuilder::new(METHOD)
            .argument(SlotLayout::INT32)
            .returns(SlotLayout::INT32)
            .var(CilCode::Ldarg, 0)
            .ldc_i4(7)
            .push(CilCode::Ceq),
    );
    // Bit 0 carries the trilean; the upper 31 bits are known zero.
    assert_eq!(result.contents.bit(0), Trilean::Unknown);
    for i in 1..32 {
        assert_eq!(result.contents.bit(i), Trilean::False);
    }
}

#[test]
fn test_conversion_opcodes() {
    // conv.i1 sign-extends the low byte back to 32 bits.
    let result = run_for_result(result_builder().ldc_i4(0x80).push(CilCode::ConvI1));
    assert_eq!(result.contents.as_span().i32().unwrap(), -128);

    // conv.u1 zero-extends the low byte.
    let result = run_for_result(result_builder().ldc_i4(0x1FF).push(CilCode::ConvU1));
    assert_eq!(result.contents.as_span().i32().unwrap(), 0xFF);

    // conv.i8 sign-extends a negative 32-bit value.
    let result = run_for_result(
        MethodBuilder::new(METHOD)
            .returns(SlotLayout::INT64)
            .ldc_i4(-2)
            .push(CilCode::ConvI8),
    );
    assert_eq!(result.contents.as_span().i64().unwrap(), -2);

    // conv.u8 zero-extends.
    let result = run_for_result(
        MethodBuilder::new(METHOD)
            .returns(SlotLayout::INT64)
            .ldc_i4(-2)
            .push(CilCode::ConvU8),
    );
    assert_eq!(
        result.contents.as_span().u64().unwrap(),
        u64::from(-2i32 as u32)
    );

    // conv.r8 from an integer, and conv.i4 truncating back toward zero.
    let result = run_for_result(
        MethodBuilder::new(METHOD)
            .returns(SlotLayout::FLOAT64)
            .ldc_i4(-3)
            .push(CilCode::ConvR8),
    );
    assert_eq!(result.contents.as_span().f64().unwrap(), -3.0);
    assert_eq!(result.type_hint, StackSlotTypeHint::Float);

    let result = run_for_result(result_builder().ldc_r8(3.7).push(CilCode::ConvI4));
    assert_eq!(result.contents.as_span().i32().unwrap(), 3);
}

#[test]
fn test_float_arithmetic() {
    let result = run_for_result(
        MethodBuilder::new(METHOD)
            .returns(SlotLayout::FLOAT64)
            .ldc_r8(1.5)
            .ldc_r8(2.25)
            .push(CilCode::Add),
    );
    assert_eq!(result.contents.as_span().f64().unwrap(), 3.75);

    // Float division by zero is an infinity, not a fault.
    let result = run_for_result(
        MethodBuilder::new(METHOD)
            .returns(SlotLayout::FLOAT64)
            .ldc_r8(1.0)
            .ldc_r8(0.0)
            .push(CilCode::Div),
    );
    assert_eq!(result.contents.as_span().f64().unwrap(), f64::INFINITY);
}

#[test]
fn test_indirect_store_and_load() {
    let result = run_for_result(
        result_builder()
            .ldc_i8(0x4000)
            .ldc_i4(-123)
            .push(CilCode::StindI4)
            .ldc_i8(0x4000)
            .push(CilCode::LdindI4),
    );
    assert_eq!(result.contents.as_span().i32().unwrap(), -123);
}

#[test]
fn test_indirect_load_sign_extends_from_memory() {
    let mut vm = CilVirtualMachine::new(false);
    vm.memory_mut().write_bytes(0x4000, &[0xFE]);

    let token = vm.register_method(
        result_builder()
            .ldc_i8(0x4000)
            .push(CilCode::LdindI1)
            .push(CilCode::Ret)
            .build(),
    );
    vm.push_frame(token).unwrap();
    vm.run().unwrap();

    let result = vm.take_return_value().unwrap();
    assert_eq!(result.contents.as_span().i32().unwrap(), -2);
}

#[test]
fn test_indirect_store_to_null_faults() {
    let mut vm = CilVirtualMachine::new(false);
    let token = vm.register_method(
        MethodBuilder::new(METHOD)
            .push(CilCode::Ldnull)
            .ldc_i4(1)
            .push(CilCode::StindI4)
            .push(CilCode::Ret)
            .build(),
    );
    vm.push_frame(token).unwrap();
    assert!(matches!(
        vm.run(),
        Err(Error::Fault(DispatchFault::NullReference))
    ));
}

#[test]
fn test_init_block() {
    let mut vm = CilVirtualMachine::new(false);
    let token = vm.register_method(
        MethodBuilder::new(METHOD)
            .ldc_i8(0x6000) // destination
            .ldc_i4(0xAB) // fill byte
            .ldc_i4(16) // size
            .push(CilCode::Initblk)
            .push(CilCode::Ret)
            .build(),
    );
    vm.push_frame(token).unwrap();
    vm.run().unwrap();

    assert_eq!(vm.memory().read_bytes(0x6000, 16), vec![0xAB; 16]);
    assert!(vm.memory().is_range_fully_known(0x6000, 16));
}

#[test]
fn test_switch_known_selector() {
    // switch(1) over three targets, each block returning its index.
    let mut vm = CilVirtualMachine::new(false);
    let builder = MethodBuilder::new(METHOD)
        .returns(SlotLayout::INT32)
        .ldc_i4(1);
    let switch_site = builder.next_offset();
    let switch_size = 5 + 4 * 3;
    let default_block = switch_site + switch_size;
    let case_0 = default_block + 6;
    let case_1 = case_0 + 6;
    let case_2 = case_1 + 6;

    let token = vm.register_method(
        builder
            .push_with(
                CilCode::Switch,
                Operand::Switch(vec![case_0, case_1, case_2]),
            )
            .ldc_i4(-1)
            .push(CilCode::Ret)
            .ldc_i4(0)
            .push(CilCode::Ret)
            .ldc_i4(1)
            .push(CilCode::Ret)
            .ldc_i4(2)
            .push(CilCode::Ret)
            .build(),
    );
    vm.push_frame(token).unwrap();
    vm.run().unwrap();
    let result = vm.take_return_value().unwrap();
    assert_eq!(result.contents.as_span().i32().unwrap(), 1);
}

#[test]
fn test_switch_out_of_range_falls_through() {
    let mut vm = CilVirtualMachine::new(false);
    let builder = MethodBuilder::new(METHOD)
        .returns(SlotLayout::INT32)
        .ldc_i4(7);
    let switch_site = builder.next_offset();
    let case_0 = switch_site + 5 + 4 + 6;

    let token = vm.register_method(
        builder
            .push_with(CilCode::Switch, Operand::Switch(vec![case_0]))
            .ldc_i4(-1)
            .push(CilCode::Ret)
            .ldc_i4(0)
            .push(CilCode::Ret)
            .build(),
    );
    vm.push_frame(token).unwrap();
    vm.run().unwrap();
    let result = vm.take_return_value().unwrap();
    assert_eq!(result.contents.as_span().i32().unwrap(), -1);
}

/// Resolver that always takes unknown branches.
struct TakeBranchResolver;

impl UnknownResolver for TakeBranchResolver {
    fn resolve_branch_condition(&self, _instruction: &Instruction) -> bool {
        true
    }
}

#[test]
fn test_unknown_branch_resolution() {
    let build = || {
        let builder = MethodBuilder::new(METHOD)
            .argument(SlotLayout::INT32)
            .returns(SlotLayout::INT32)
            .var(CilCode::Ldarg, 0);
        let branch_site = builder.next_offset();
        let taken = branch_site + 5 + 5 + 1;
        builder
            .branch(CilCode::Brtrue, taken)
            .ldc_i4(0)
            .push(CilCode::Ret)
            .ldc_i4(1)
            .push(CilCode::Ret)
            .build()
    };

    // Default policy: fall through.
    let mut vm = CilVirtualMachine::new(false);
    let token = vm.register_method(build());
    vm.push_frame(token).unwrap();
    vm.run().unwrap();
    let result = vm.take_return_value().unwrap();
    assert_eq!(result.contents.as_span().i32().unwrap(), 0);

    // Swapped policy: take the branch.
    let mut vm = CilVirtualMachine::new(false);
    vm.set_unknown_resolver(Arc::new(TakeBranchResolver));
    let token = vm.register_method(build());
    vm.push_frame(token).unwrap();
    vm.run().unwrap();
    let result = vm.take_return_value().unwrap();
    assert_eq!(result.contents.as_span().i32().unwrap(), 1);
}

#[test]
fn test_store_argument() {
    let result = run_for_result(
        MethodBuilder::new(METHOD)
            .argument(SlotLayout::INT32)
            .returns(SlotLayout::INT32)
            .ldc_i4(64)
            .var(CilCode::Starg, 0)
            .var(CilCode::Ldarg, 0),
    );
    assert_eq!(result.contents.as_span().i32().unwrap(), 64);
}

#[test]
fn test_mixed_width_operands_align() {
    // i32 + i64 extends the narrow operand; the result is 64-bit.
    let result = run_for_result(
        MethodBuilder::new(METHOD)
            .returns(SlotLayout::INT64)
            .ldc_i4(-1)
            .ldc_i8(10)
            .push(CilCode::Add),
    );
    assert_eq!(result.bits(), 64);
    assert_eq!(result.contents.as_span().i64().unwrap(), 9);
}
