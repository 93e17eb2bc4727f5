use crate::objects::object::{NativeObject, Object, ObjectType};

#[repr(C)]
pub struct ObjectNativeFunction {
    pub object: Object,
    pub name: String,
    pub function: Box<dyn NativeObject>,
}

impl ObjectNativeFunction {
    pub fn new(name: String, function: impl NativeObject + 'static) -> ObjectNativeFunction {
        ObjectNativeFunction {
            object: Object::new(ObjectType::ObjNativeFunction),
            name,
            function: Box::new(function),
        }
    }
}
