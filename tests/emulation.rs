//! End-to-end emulation scenarios driving the public machine API.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use trivm::{
    assembly::{CilCode, MethodBuilder, Operand, SlotLayout, Token},
    dispatch::CilDispatchResult,
    machine::{CancellationToken, DispatchObserver},
    policy::{AlwaysInvokeStrategy, ReturnUnknownInvoker},
    CilVirtualMachine, Error,
};

const METHOD: Token = Token::new(0x0600_0001);

fn nops_then_ret() -> MethodBuilder {
    let mut builder = MethodBuilder::new(METHOD);
    for _ in 0..100 {
        builder = builder.push(CilCode::Nop);
    }
    builder.push(CilCode::Ret)
}

#[test]
fn single_step() {
    let mut vm = CilVirtualMachine::new(false);
    let token = vm.register_method(nops_then_ret().build());
    vm.push_frame(token).unwrap();

    // Execute all nops.
    for _ in 0..100 {
        vm.step().unwrap();
    }

    // Still inside the method.
    assert!(!vm.call_stack().is_empty());

    // Execute the return.
    vm.step().unwrap();
    assert!(vm.call_stack().is_empty());
}

#[test]
fn run_terminates() {
    let mut vm = CilVirtualMachine::new(false);
    let token = vm.register_method(nops_then_ret().build());
    vm.push_frame(token).unwrap();

    vm.run().unwrap();
    assert!(vm.call_stack().is_empty());
}

/// Counts dispatches and fires the token at a threshold.
struct CancelAfter {
    count: Arc<AtomicUsize>,
    threshold: usize,
    token: CancellationToken,
}

impl DispatchObserver for CancelAfter {
    fn before_dispatch(
        &mut self,
        _machine: &CilVirtualMachine,
        _instruction: &trivm::assembly::Instruction,
    ) {
        let seen = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if seen == self.threshold {
            self.token.cancel();
        }
    }
}

#[test]
fn cancellation_stops_an_infinite_loop() {
    let mut vm = CilVirtualMachine::new(false);

    // 100 nops followed by an unconditional branch back to the start.
    let mut builder = MethodBuilder::new(METHOD);
    for _ in 0..100 {
        builder = builder.push(CilCode::Nop);
    }
    let token = vm.register_method(builder.branch(CilCode::Br, 0).build());
    vm.push_frame(token).unwrap();

    let cancellation = CancellationToken::new();
    let count = Arc::new(AtomicUsize::new(0));
    vm.add_observer(Box::new(CancelAfter {
        count: Arc::clone(&count),
        threshold: 300,
        token: cancellation.clone(),
    }));

    let result = vm.run_with_cancellation(&cancellation);
    assert!(matches!(result, Err(Error::Cancelled)));

    // The loop stopped promptly: no dispatch beyond the trigger.
    assert_eq!(count.load(Ordering::Relaxed), 300);
}

#[test]
fn simple_expression() {
    let mut vm = CilVirtualMachine::new(false);
    let token = vm.register_method(
        MethodBuilder::new(METHOD)
            .ldc_i4(3)
            .ldc_i4(4)
            .push(CilCode::Add)
            .ldc_i4(5)
            .push(CilCode::Mul)
            .push(CilCode::Ret)
            .build(),
    );
    vm.push_frame(token).unwrap();

    for _ in 0..5 {
        vm.step().unwrap();
    }

    let frame = vm.call_stack().current().unwrap();
    let result = frame.evaluation_stack().peek().unwrap();
    assert_eq!(frame.evaluation_stack().len(), 1);
    assert_eq!(result.contents.as_span().i32().unwrap(), (3 + 4) * 5);
}

#[test]
fn unknown_arguments_propagate() {
    // arg0 + 1 with an unknown arg0 returns an unknown sum.
    let mut vm = CilVirtualMachine::new(false);
    let token = vm.register_method(
        MethodBuilder::new(METHOD)
            .argument(SlotLayout::INT32)
            .returns(SlotLayout::INT32)
            .var(CilCode::Ldarg, 0)
            .ldc_i4(1)
            .push(CilCode::Add)
            .push(CilCode::Ret)
            .build(),
    );

    vm.push_frame(token).unwrap();
    vm.run().unwrap();

    let result = vm.take_return_value().unwrap();
    assert!(!result.contents.is_fully_known());
}

#[test]
fn branches_follow_known_conditions() {
    // if (10 <= 3) return 111; else return 222;
    let mut vm = CilVirtualMachine::new(false);
    let builder = MethodBuilder::new(METHOD)
        .returns(SlotLayout::INT32)
        .ldc_i4(10)
        .ldc_i4(3);
    // The branch target is the "taken" block appended after the fall-through.
    let branch_site = builder.next_offset();
    let fall_through = branch_site + 5;
    let taken = fall_through + 5 + 1;
    let token = vm.register_method(
        builder
            .branch(CilCode::Ble, taken)
            .ldc_i4(222)
            .push(CilCode::Ret)
            .ldc_i4(111)
            .push(CilCode::Ret)
            .build(),
    );

    vm.push_frame(token).unwrap();
    vm.run().unwrap();

    let result = vm.take_return_value().unwrap();
    assert_eq!(result.contents.as_span().i32().unwrap(), 222);
}

#[test]
fn opaque_calls_return_unknown() {
    let callee = Token::new(0x0A00_0001);
    let mut vm = CilVirtualMachine::new(false);
    vm.register_method(trivm::assembly::Method::external(
        callee,
        "GetTick",
        vec![],
        Some(SlotLayout::INT32),
    ));
    let token = vm.register_method(
        MethodBuilder::new(METHOD)
            .returns(SlotLayout::INT32)
            .push_with(CilCode::Call, Operand::Token(callee))
            .push(CilCode::Ret)
            .build(),
    );

    vm.set_invocation_strategy(Arc::new(AlwaysInvokeStrategy));
    vm.set_invoker(Arc::new(ReturnUnknownInvoker));

    vm.push_frame(token).unwrap();
    vm.run().unwrap();

    let result = vm.take_return_value().unwrap();
    assert_eq!(result.bits(), 32);
    assert!(!result.contents.is_fully_known());
}

#[test]
fn stepping_into_calls_and_returning() {
    let callee_token = Token::new(0x0600_0002);
    let mut vm = CilVirtualMachine::new(false);
    vm.register_method(
        MethodBuilder::new(callee_token)
            .argument(SlotLayout::INT32)
            .argument(SlotLayout::INT32)
            .returns(SlotLayout::INT32)
            .var(CilCode::Ldarg, 0)
            .var(CilCode::Ldarg, 1)
            .push(CilCode::Mul)
            .push(CilCode::Ret)
            .build(),
    );
    let token = vm.register_method(
        MethodBuilder::new(METHOD)
            .returns(SlotLayout::INT32)
            .ldc_i4(6)
            .ldc_i4(7)
            .push_with(CilCode::Call, Operand::Token(callee_token))
            .push(CilCode::Ret)
            .build(),
    );

    vm.push_frame(token).unwrap();

    // Step until the callee frame appears, then observe the depth.
    vm.step().unwrap();
    vm.step().unwrap();
    vm.step().unwrap();
    assert_eq!(vm.call_stack().len(), 2);

    vm.run().unwrap();
    let result = vm.take_return_value().unwrap();
    assert_eq!(result.contents.as_span().i32().unwrap(), 42);
}

#[test]
fn null_dereference_faults_the_run() {
    let mut vm = CilVirtualMachine::new(false);
    let token = vm.register_method(
        MethodBuilder::new(METHOD)
            .push(CilCode::Ldnull)
            .push(CilCode::Ldlen)
            .push(CilCode::Ret)
            .build(),
    );

    vm.push_frame(token).unwrap();
    let result = vm.run();
    assert!(matches!(
        result,
        Err(Error::Fault(trivm::dispatch::DispatchFault::NullReference))
    ));
    assert!(vm.call_stack().is_empty());
}

#[test]
fn arrays_allocate_and_report_length() {
    let element_type = Token::new(0x0100_0001);
    let mut vm = CilVirtualMachine::new(false);
    vm.register_element_size(element_type, 4);
    let token = vm.register_method(
        MethodBuilder::new(METHOD)
            .local(SlotLayout::INT64)
            .returns(SlotLayout::INT64)
            .ldc_i4(16)
            .push_with(CilCode::Newarr, Operand::Token(element_type))
            .var(CilCode::Stloc, 0)
            // Store 77 into [3], read it back, then check ldlen via return.
            .var(CilCode::Ldloc, 0)
            .ldc_i4(3)
            .ldc_i4(77)
            .push(CilCode::StelemI4)
            .var(CilCode::Ldloc, 0)
            .ldc_i4(3)
            .push(CilCode::LdelemI4)
            .push(CilCode::Pop)
            .var(CilCode::Ldloc, 0)
            .push(CilCode::Ldlen)
            .push(CilCode::Ret)
            .build(),
    );

    vm.push_frame(token).unwrap();
    vm.run().unwrap();

    let length = vm.take_return_value().unwrap();
    assert_eq!(length.contents.as_span().u64().unwrap(), 16);
}

#[test]
fn block_copy_moves_known_and_unknown_bytes() {
    let mut vm = CilVirtualMachine::new(false);
    vm.memory_mut().write_bytes(0x4000, &[9, 8, 7, 6]);
    // Bytes 0x4004.. stay unmapped and therefore unknown.

    let token = vm.register_method(
        MethodBuilder::new(METHOD)
            .ldc_i8(0x5000) // destination
            .ldc_i8(0x4000) // source
            .ldc_i4(8) // size
            .push(CilCode::Cpblk)
            .push(CilCode::Ret)
            .build(),
    );

    vm.push_frame(token).unwrap();
    vm.run().unwrap();

    assert_eq!(vm.memory().read_bytes(0x5000, 4), vec![9, 8, 7, 6]);
    assert!(vm.memory().is_range_fully_known(0x5000, 4));
    // The unknown half of the source stays unknown at the destination.
    assert!(!vm.memory().is_range_fully_known(0x5004, 4));
}

#[test]
fn dispatch_results_are_observable() {
    struct RecordResults {
        returns: Arc<AtomicUsize>,
    }

    impl DispatchObserver for RecordResults {
        fn after_dispatch(
            &mut self,
            _machine: &CilVirtualMachine,
            _instruction: &trivm::assembly::Instruction,
            result: &CilDispatchResult,
        ) {
            if *result == CilDispatchResult::Return {
                self.returns.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    let mut vm = CilVirtualMachine::new(false);
    let token = vm.register_method(nops_then_ret().build());
    vm.push_frame(token).unwrap();

    let returns = Arc::new(AtomicUsize::new(0));
    vm.add_observer(Box::new(RecordResults {
        returns: Arc::clone(&returns),
    }));

    vm.run().unwrap();
    assert_eq!(returns.load(Ordering::Relaxed), 1);
}
