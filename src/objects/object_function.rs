use crate::chunk::Chunk;
use crate::objects::object::{Object, ObjectType};

// Compile-time artifact. The name is an owned copy of the declaration
// lexeme; the top-level script function has an empty name.
#[repr(C)]
pub struct ObjectFunction {
    pub object: Object,
    pub arity: usize,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    pub name: String,
}

impl ObjectFunction {
    pub fn new(name: String) -> ObjectFunction {
        ObjectFunction {
            object: Object::new(ObjectType::ObjFunction),
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name,
        }
    }
}
