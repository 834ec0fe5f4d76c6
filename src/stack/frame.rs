//! Call frames: the execution state of one in-progress method call.

use std::sync::Arc;

use crate::{
    assembly::{Instruction, Method},
    memory::BitVectorPool,
    stack::{EvaluationStack, StackSlot},
    Error, Result,
};

/// The execution state of one method activation.
///
/// A frame owns its evaluation stack, local and argument slots, and the
/// instruction pointer (a byte offset into the method body). Frames are created
/// when a method is entered and torn down on return, at which point every bit
/// vector they own flows back into the machine's pool.
#[derive(Debug)]
pub struct CallFrame {
    method: Arc<Method>,
    ip: u32,
    evaluation_stack: EvaluationStack,
    locals: Vec<StackSlot>,
    arguments: Vec<StackSlot>,
}

impl CallFrame {
    /// Creates a frame for `method` with the given argument slots.
    ///
    /// Local variables are rented from the pool: known-zero when the body's
    /// `init locals` flag is set, fully unknown otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoMethodBody`] for external methods and
    /// [`Error::VariableOutOfRange`] when the argument count does not match the
    /// method signature.
    pub fn new(
        method: Arc<Method>,
        arguments: Vec<StackSlot>,
        pool: &mut BitVectorPool,
    ) -> Result<Self> {
        let body = method.body().ok_or(Error::NoMethodBody(method.token()))?;
        if arguments.len() != method.arguments().len() {
            return Err(Error::VariableOutOfRange {
                kind: "argument",
                index: arguments.len(),
                count: method.arguments().len(),
            });
        }

        let locals = body
            .locals()
            .iter()
            .map(|layout| {
                let contents = pool.rent(layout.bits, body.init_locals());
                StackSlot::new(contents, layout.hint)
            })
            .collect();

        Ok(CallFrame {
            method,
            ip: 0,
            evaluation_stack: EvaluationStack::new(),
            locals,
            arguments,
        })
    }

    /// Creates a frame whose arguments are all fully unknown.
    ///
    /// This is how analysis enters a method whose inputs it does not model.
    pub fn new_with_unknown_arguments(
        method: Arc<Method>,
        pool: &mut BitVectorPool,
    ) -> Result<Self> {
        let arguments = method
            .arguments()
            .iter()
            .map(|layout| StackSlot::new(pool.rent(layout.bits, false), layout.hint))
            .collect();
        CallFrame::new(method, arguments, pool)
    }

    /// The method this frame executes.
    #[must_use]
    pub fn method(&self) -> &Arc<Method> {
        &self.method
    }

    /// The instruction pointer: a byte offset into the method body.
    #[must_use]
    pub fn ip(&self) -> u32 {
        self.ip
    }

    /// Redirects the instruction pointer.
    pub fn set_ip(&mut self, offset: u32) {
        self.ip = offset;
    }

    /// The instruction the pointer currently addresses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProgramCounter`] when the pointer does not
    /// address an instruction of the body.
    pub fn current_instruction(&self) -> Result<&Instruction> {
        self.method
            .body()
            .and_then(|body| body.instruction_at(self.ip))
            .ok_or(Error::InvalidProgramCounter {
                offset: self.ip,
                method: self.method.token(),
            })
    }

    /// The frame's evaluation stack.
    #[must_use]
    pub fn evaluation_stack(&self) -> &EvaluationStack {
        &self.evaluation_stack
    }

    /// The frame's evaluation stack, mutably.
    #[must_use]
    pub fn evaluation_stack_mut(&mut self) -> &mut EvaluationStack {
        &mut self.evaluation_stack
    }

    /// The local variable slot at `index`.
    pub fn local(&self, index: usize) -> Result<&StackSlot> {
        self.locals.get(index).ok_or(Error::VariableOutOfRange {
            kind: "local",
            index,
            count: self.locals.len(),
        })
    }

    /// The local variable slot at `index`, mutably.
    pub fn local_mut(&mut self, index: usize) -> Result<&mut StackSlot> {
        let count = self.locals.len();
        self.locals.get_mut(index).ok_or(Error::VariableOutOfRange {
            kind: "local",
            index,
            count,
        })
    }

    /// The argument slot at `index`.
    pub fn argument(&self, index: usize) -> Result<&StackSlot> {
        self.arguments.get(index).ok_or(Error::VariableOutOfRange {
            kind: "argument",
            index,
            count: self.arguments.len(),
        })
    }

    /// The argument slot at `index`, mutably.
    pub fn argument_mut(&mut self, index: usize) -> Result<&mut StackSlot> {
        let count = self.arguments.len();
        self.arguments
            .get_mut(index)
            .ok_or(Error::VariableOutOfRange {
                kind: "argument",
                index,
                count,
            })
    }

    /// Tears the frame down, yielding every slot it owned.
    ///
    /// The machine feeds these to the pool; nothing of the frame survives.
    #[must_use]
    pub fn into_slots(mut self) -> Vec<StackSlot> {
        let mut slots: Vec<StackSlot> = self.evaluation_stack.drain().collect();
        slots.append(&mut self.locals);
        slots.append(&mut self.arguments);
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{CilCode, MethodBuilder, SlotLayout, Token};

    fn test_method() -> Arc<Method> {
        MethodBuilder::new(Token::new(1))
            .argument(SlotLayout::INT32)
            .local(SlotLayout::INT64)
            .local(SlotLayout::INT32)
            .push(CilCode::Nop)
            .push(CilCode::Ret)
            .build_shared()
    }

    #[test]
    fn test_frame_layout() {
        let mut pool = BitVectorPool::new();
        let frame = CallFrame::new_with_unknown_arguments(test_method(), &mut pool).unwrap();

        assert_eq!(frame.ip(), 0);
        // init locals: locals start known-zero.
        assert!(frame.local(0).unwrap().contents.is_fully_known());
        assert_eq!(frame.local(0).unwrap().bits(), 64);
        assert_eq!(frame.local(1).unwrap().bits(), 32);
        assert!(frame.local(2).is_err());
        // Unknown arguments are, well, unknown.
        assert!(!frame.argument(0).unwrap().contents.is_fully_known());
    }

    #[test]
    fn test_current_instruction_tracks_ip() {
        let mut pool = BitVectorPool::new();
        let mut frame = CallFrame::new_with_unknown_arguments(test_method(), &mut pool).unwrap();

        assert_eq!(frame.current_instruction().unwrap().code, CilCode::Nop);
        frame.set_ip(1);
        assert_eq!(frame.current_instruction().unwrap().code, CilCode::Ret);
        frame.set_ip(99);
        assert!(frame.current_instruction().is_err());
    }

    #[test]
    fn test_teardown_yields_all_slots() {
        let mut pool = BitVectorPool::new();
        let mut frame = CallFrame::new_with_unknown_arguments(test_method(), &mut pool).unwrap();
        frame
            .evaluation_stack_mut()
            .push(StackSlot::integer(pool.rent(32, true)));

        // 1 stack slot + 2 locals + 1 argument.
        assert_eq!(frame.into_slots().len(), 4);
    }
}
