use crate::objects::object::{Object, ObjectType};
use crate::value::{make_nil_value, Value};

// While open the upvalue addresses a live operand stack slot by index;
// closing copies that slot into `closed` and flips the discriminant, after
// which reads and writes go through `closed` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalueLocation {
    Open(usize),
    Closed,
}

#[repr(C)]
pub struct ObjectUpvalue {
    pub object: Object,
    pub location: UpvalueLocation,
    pub closed: Value,
    pub next: *mut ObjectUpvalue,
}

impl ObjectUpvalue {
    pub fn new(slot: usize) -> ObjectUpvalue {
        ObjectUpvalue {
            object: Object::new(ObjectType::ObjUpvalue),
            location: UpvalueLocation::Open(slot),
            closed: make_nil_value(),
            next: std::ptr::null_mut(),
        }
    }

    pub fn open_slot(&self) -> Option<usize> {
        match self.location {
            UpvalueLocation::Open(slot) => Some(slot),
            UpvalueLocation::Closed => None,
        }
    }
}
