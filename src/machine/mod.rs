//! The stepping virtual machine.
//!
//! [`CilVirtualMachine`] owns the whole execution world: virtual memory, the
//! bit-vector pool, the call stack, the method registry and the pluggable
//! policies. It exposes a deterministic, single-threaded control loop:
//!
//! - [`CilVirtualMachine::step`] executes exactly one instruction of the top
//!   frame;
//! - [`CilVirtualMachine::run`] steps until the call stack drains, checking an
//!   optional [`CancellationToken`] at instruction granularity.
//!
//! The machine is *Idle* while the call stack is empty and *Running*
//! otherwise; pushing a frame moves it from one state to the other, and the
//! final `ret` moves it back.
//!
//! [`DispatchObserver`]s are notified synchronously before and after every
//! dispatch. They never alter control flow; cancellation triggers and step
//! counters hang off these events.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    assembly::{Instruction, Method, Token},
    dispatch::{CilDispatchResult, Dispatcher, ExecutionContext},
    loader::{MappedImage, PeLoader},
    memory::{BitVectorPool, VirtualMemory},
    policy::{
        DefaultUnknownResolver, InvocationStrategy, Invoker, InvokeExternalStrategy,
        ReturnUnknownInvoker, UnknownResolver,
    },
    stack::{CallFrame, CallStack, StackSlot},
    Error, Result,
};

/// Base of the simulated heap on 64-bit machines, far above mapped images.
const HEAP_BASE_64: u64 = 0x7FFF_0000_0000;
/// Base of the simulated heap on 32-bit machines.
const HEAP_BASE_32: u64 = 0x7000_0000;

/// A cooperative cancellation signal shared between the caller and `run`.
///
/// Cloning the token shares the underlying flag; any clone can cancel. The
/// run loop checks the token between instruction dispatches, so a pending
/// instruction's side effects are never applied partway.
///
/// # Example
///
/// ```rust
/// use trivm::machine::CancellationToken;
///
/// let token = CancellationToken::new();
/// let clone = token.clone();
/// clone.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        CancellationToken::default()
    }

    /// Signals cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Synchronous instrumentation around every instruction dispatch.
///
/// Observers see the machine immutably and must not assume they can affect
/// control flow; they exist for counting, tracing and cancellation triggers.
pub trait DispatchObserver {
    /// Called immediately before an instruction is dispatched.
    fn before_dispatch(&mut self, _machine: &CilVirtualMachine, _instruction: &Instruction) {}

    /// Called immediately after an instruction's result is applied.
    fn after_dispatch(
        &mut self,
        _machine: &CilVirtualMachine,
        _instruction: &Instruction,
        _result: &CilDispatchResult,
    ) {
    }
}

/// The three-valued CIL virtual machine.
///
/// # Example
///
/// ```rust
/// use trivm::assembly::{CilCode, MethodBuilder, Token};
/// use trivm::CilVirtualMachine;
///
/// let method = MethodBuilder::new(Token::new(0x0600_0001))
///     .ldc_i4(21)
///     .ldc_i4(2)
///     .push(CilCode::Mul)
///     .push(CilCode::Ret)
///     .build();
///
/// let mut vm = CilVirtualMachine::new(false);
/// let token = vm.register_method(method);
/// vm.push_frame(token)?;
/// vm.run()?;
/// assert!(vm.call_stack().is_empty());
/// # Ok::<(), trivm::Error>(())
/// ```
pub struct CilVirtualMachine {
    memory: VirtualMemory,
    pool: BitVectorPool,
    call_stack: CallStack,
    methods: HashMap<Token, Arc<Method>>,
    element_sizes: HashMap<Token, u32>,
    unknown_resolver: Arc<dyn UnknownResolver>,
    invocation_strategy: Arc<dyn InvocationStrategy>,
    invoker: Arc<dyn Invoker>,
    observers: Vec<Box<dyn DispatchObserver>>,
    heap_cursor: u64,
    is_32_bit: bool,
    last_return_value: Option<StackSlot>,
}

impl CilVirtualMachine {
    /// Creates an idle machine with the default policies.
    ///
    /// Defaults: [`DefaultUnknownResolver`], [`InvokeExternalStrategy`] and
    /// [`ReturnUnknownInvoker`].
    #[must_use]
    pub fn new(is_32_bit: bool) -> Self {
        CilVirtualMachine {
            memory: VirtualMemory::new(),
            pool: BitVectorPool::new(),
            call_stack: CallStack::new(),
            methods: HashMap::new(),
            element_sizes: HashMap::new(),
            unknown_resolver: Arc::new(DefaultUnknownResolver),
            invocation_strategy: Arc::new(InvokeExternalStrategy),
            invoker: Arc::new(ReturnUnknownInvoker),
            observers: Vec::new(),
            heap_cursor: if is_32_bit { HEAP_BASE_32 } else { HEAP_BASE_64 },
            is_32_bit,
            last_return_value: None,
        }
    }

    /// Whether the machine models 32-bit pointers.
    #[must_use]
    pub fn is_32_bit(&self) -> bool {
        self.is_32_bit
    }

    /// The machine's virtual memory.
    #[must_use]
    pub fn memory(&self) -> &VirtualMemory {
        &self.memory
    }

    /// The machine's virtual memory, mutably.
    #[must_use]
    pub fn memory_mut(&mut self) -> &mut VirtualMemory {
        &mut self.memory
    }

    /// The machine's bit-vector pool.
    #[must_use]
    pub fn pool(&self) -> &BitVectorPool {
        &self.pool
    }

    /// The machine's bit-vector pool, mutably.
    #[must_use]
    pub fn pool_mut(&mut self) -> &mut BitVectorPool {
        &mut self.pool
    }

    /// The call stack; empty means the machine is idle.
    #[must_use]
    pub fn call_stack(&self) -> &CallStack {
        &self.call_stack
    }

    /// Registers a method, returning its token.
    ///
    /// Re-registering a token replaces the previous method.
    pub fn register_method(&mut self, method: impl Into<Arc<Method>>) -> Token {
        let method = method.into();
        let token = method.token();
        self.methods.insert(token, method);
        token
    }

    /// The registered method for `token`, if any.
    #[must_use]
    pub fn method(&self, token: Token) -> Option<&Arc<Method>> {
        self.methods.get(&token)
    }

    /// Registers the element size (in bytes) for an array type token.
    ///
    /// `newarr`/`ldelem`/`stelem` use this for layout; unregistered tokens
    /// default to 4-byte elements.
    pub fn register_element_size(&mut self, token: Token, bytes: u32) {
        self.element_sizes.insert(token, bytes);
    }

    /// Swaps the unknown-resolution policy.
    pub fn set_unknown_resolver(&mut self, resolver: Arc<dyn UnknownResolver>) {
        self.unknown_resolver = resolver;
    }

    /// Swaps the invocation strategy.
    pub fn set_invocation_strategy(&mut self, strategy: Arc<dyn InvocationStrategy>) {
        self.invocation_strategy = strategy;
    }

    /// Swaps the opaque-call invoker.
    pub fn set_invoker(&mut self, invoker: Arc<dyn Invoker>) {
        self.invoker = invoker;
    }

    /// Adds a dispatch observer.
    pub fn add_observer(&mut self, observer: Box<dyn DispatchObserver>) {
        self.observers.push(observer);
    }

    /// Maps a PE image into the machine's memory at its preferred base.
    ///
    /// Returns the mapping description, including the chosen base address.
    pub fn map_pe(&mut self, pe_bytes: &[u8]) -> Result<MappedImage> {
        PeLoader::new().map(pe_bytes, &mut self.memory)
    }

    /// Pushes a frame for `token` with fully unknown arguments.
    pub fn push_frame(&mut self, token: Token) -> Result<()> {
        let method = self
            .methods
            .get(&token)
            .ok_or(Error::MethodNotFound(token))?
            .clone();
        let frame = CallFrame::new_with_unknown_arguments(method, &mut self.pool)?;
        self.call_stack.push(frame);
        Ok(())
    }

    /// Pushes a frame for `token` with the given argument slots.
    pub fn push_frame_with_arguments(
        &mut self,
        token: Token,
        arguments: Vec<StackSlot>,
    ) -> Result<()> {
        let method = self
            .methods
            .get(&token)
            .ok_or(Error::MethodNotFound(token))?
            .clone();
        let frame = CallFrame::new(method, arguments, &mut self.pool)?;
        self.call_stack.push(frame);
        Ok(())
    }

    /// The value returned by the last frame that emptied the call stack.
    ///
    /// Ownership of the slot (and its vector) transfers to the caller.
    #[must_use]
    pub fn take_return_value(&mut self) -> Option<StackSlot> {
        self.last_return_value.take()
    }

    /// Executes exactly one instruction of the top frame.
    ///
    /// Side effects (stack, memory, instruction pointer, frame push/pop) are
    /// fully applied when this returns. A `Return` outcome has already popped
    /// the frame and routed the return value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveFrame`] when idle, or the handler's error for
    /// malformed operands and contract violations.
    pub fn step(&mut self) -> Result<CilDispatchResult> {
        let instruction = {
            let frame = self.call_stack.current().ok_or(Error::NoActiveFrame)?;
            frame.current_instruction()?.clone()
        };

        self.notify_before(&instruction);
        let result = self.dispatch(&instruction)?;
        if result == CilDispatchResult::Return {
            self.apply_return()?;
        }
        self.notify_after(&instruction, &result);
        Ok(result)
    }

    /// Like [`step`](Self::step), but reports [`CilDispatchResult::Cancelled`]
    /// without executing anything when the token is triggered.
    pub fn step_with_cancellation(
        &mut self,
        token: &CancellationToken,
    ) -> Result<CilDispatchResult> {
        if token.is_cancelled() {
            return Ok(CilDispatchResult::Cancelled);
        }
        self.step()
    }

    /// Runs until the call stack drains.
    ///
    /// Equivalent to [`run_with_cancellation`](Self::run_with_cancellation)
    /// with a token that never fires: an emulated infinite loop runs forever.
    pub fn run(&mut self) -> Result<()> {
        self.run_with_cancellation(&CancellationToken::new())
    }

    /// Runs until the call stack drains, the token fires, or the emulated
    /// program faults.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] when the token fires; the pending instruction
    ///   has not been dispatched.
    /// - [`Error::Fault`] when dispatch reports a modeled fault; the call
    ///   stack is cleared (controlled abort).
    pub fn run_with_cancellation(&mut self, token: &CancellationToken) -> Result<()> {
        while !self.call_stack.is_empty() {
            match self.step_with_cancellation(token)? {
                CilDispatchResult::Cancelled => return Err(Error::Cancelled),
                CilDispatchResult::Exception(fault) => {
                    self.reset();
                    return Err(Error::Fault(fault));
                }
                CilDispatchResult::Success | CilDispatchResult::Return => {}
            }
        }
        Ok(())
    }

    /// Clears the call stack and pending return value, releasing every vector
    /// back to the pool. The machine returns to the idle state.
    pub fn reset(&mut self) {
        for frame in self.call_stack.drain() {
            for slot in frame.into_slots() {
                self.pool.release(slot.contents);
            }
        }
        if let Some(value) = self.last_return_value.take() {
            self.pool.release(value.contents);
        }
    }

    /// Dispatches one instruction in a scoped execution context.
    fn dispatch(&mut self, instruction: &Instruction) -> Result<CilDispatchResult> {
        let resolver = Arc::clone(&self.unknown_resolver);
        let strategy = Arc::clone(&self.invocation_strategy);
        let invoker = Arc::clone(&self.invoker);

        let frame = self.call_stack.current_mut().ok_or(Error::NoActiveFrame)?;
        let mut context = ExecutionContext {
            frame,
            memory: &mut self.memory,
            pool: &mut self.pool,
            methods: &self.methods,
            element_sizes: &self.element_sizes,
            resolver: &*resolver,
            strategy: &*strategy,
            invoker: &*invoker,
            heap_cursor: &mut self.heap_cursor,
            is_32_bit: self.is_32_bit,
            pending_call: None,
        };

        let result = Dispatcher::dispatch(&mut context, instruction)?;
        let pending = context.pending_call.take();

        if let Some(call) = pending {
            let callee = CallFrame::new(call.method, call.arguments, &mut self.pool)?;
            self.call_stack.push(callee);
        }
        Ok(result)
    }

    /// Pops the returning frame and routes its value to the caller (or stashes
    /// it when the call stack empties).
    fn apply_return(&mut self) -> Result<()> {
        let mut frame = self.call_stack.pop().ok_or(Error::NoActiveFrame)?;

        let return_value = if frame.method().returns().is_some() {
            frame.evaluation_stack_mut().pop().ok()
        } else {
            None
        };

        for slot in frame.into_slots() {
            self.pool.release(slot.contents);
        }

        if let Some(value) = return_value {
            if let Some(caller) = self.call_stack.current_mut() {
                caller.evaluation_stack_mut().push(value);
            } else {
                if let Some(previous) = self.last_return_value.take() {
                    self.pool.release(previous.contents);
                }
                self.last_return_value = Some(value);
            }
        }
        Ok(())
    }

    fn notify_before(&mut self, instruction: &Instruction) {
        if self.observers.is_empty() {
            return;
        }
        let mut observers = std::mem::take(&mut self.observers);
        for observer in &mut observers {
            observer.before_dispatch(self, instruction);
        }
        observers.append(&mut self.observers);
        self.observers = observers;
    }

    fn notify_after(&mut self, instruction: &Instruction, result: &CilDispatchResult) {
        if self.observers.is_empty() {
            return;
        }
        let mut observers = std::mem::take(&mut self.observers);
        for observer in &mut observers {
            observer.after_dispatch(self, instruction, result);
        }
        observers.append(&mut self.observers);
        self.observers = observers;
    }
}

impl fmt::Debug for CilVirtualMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CilVirtualMachine")
            .field("is_32_bit", &self.is_32_bit)
            .field("call_depth", &self.call_stack.len())
            .field("methods", &self.methods.len())
            .field("mapped_pages", &self.memory.page_count())
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}
