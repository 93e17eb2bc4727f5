use crate::chunk::Chunk;
use crate::objects::object_closure::ObjectClosure;
use crate::objects::object_function::ObjectFunction;

// One active invocation. `slot_base` indexes the operand stack slot holding
// the callee, so locals live at slot_base + 1 .. slot_base + arity.
pub struct CallFrame {
    pub closure: *mut ObjectClosure,
    pub ip: usize,
    pub slot_base: usize,
}

impl CallFrame {
    pub fn new(closure: *mut ObjectClosure, slot_base: usize) -> CallFrame {
        CallFrame {
            closure,
            ip: 0,
            slot_base,
        }
    }

    /// Safety: the closure and its function must still be live.
    pub unsafe fn function(&self) -> &ObjectFunction {
        &*(*self.closure).function
    }

    /// Safety: see `function`.
    pub unsafe fn chunk(&self) -> &Chunk {
        &self.function().chunk
    }
}
