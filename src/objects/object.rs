use std::mem::size_of;

use crate::value::Value;

use super::{
    object_bound_method::ObjectBoundMethod,
    object_class::ObjectClass,
    object_closure::ObjectClosure,
    object_function::ObjectFunction,
    object_instance::ObjectInstance,
    object_native_function::ObjectNativeFunction,
    object_string::ObjectString,
    object_upvalue::ObjectUpvalue,
};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    ObjBoundMethod,
    ObjClass,
    ObjClosure,
    ObjFunction,
    ObjInstance,
    ObjNativeFunction,
    ObjString,
    ObjUpvalue,
}

// Common header embedded as the first field of every concrete object so a
// `*mut Object` can be re-cast once the kind has been inspected. `next`
// chains every live object into the sweep list; `marked` is the GC color
// bit (white when clear, gray or black while the worklist drains).
#[repr(C)]
pub struct Object {
    pub obj_type: ObjectType,
    pub marked: bool,
    pub next: *mut Object,
}

impl Object {
    pub fn new(obj_type: ObjectType) -> Object {
        Object {
            obj_type,
            marked: false,
            next: std::ptr::null_mut(),
        }
    }

    /// Compute the deep size of the concrete object that this header belongs to.
    /// Safety: caller guarantees `self` is embedded at the start of the concrete object.
    pub unsafe fn deep_size(&self) -> usize {
        match self.obj_type {
            ObjectType::ObjBoundMethod => self.as_bound_method().deep_size(),
            ObjectType::ObjClass => self.as_class().deep_size(),
            ObjectType::ObjClosure => self.as_closure().deep_size(),
            ObjectType::ObjFunction => self.as_function().deep_size(),
            ObjectType::ObjInstance => self.as_instance().deep_size(),
            ObjectType::ObjNativeFunction => self.as_native_function().deep_size(),
            ObjectType::ObjString => self.as_string().deep_size(),
            ObjectType::ObjUpvalue => self.as_upvalue().deep_size(),
        }
    }

    // Cast helpers with debug assertions to reduce accidental UB.
    #[inline]
    pub unsafe fn as_string(&self) -> &ObjectString {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjString));
        &*(self as *const _ as *const ObjectString)
    }

    #[inline]
    pub unsafe fn as_function(&self) -> &ObjectFunction {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjFunction));
        &*(self as *const _ as *const ObjectFunction)
    }

    #[inline]
    pub unsafe fn as_native_function(&self) -> &ObjectNativeFunction {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjNativeFunction));
        &*(self as *const _ as *const ObjectNativeFunction)
    }

    #[inline]
    pub unsafe fn as_closure(&self) -> &ObjectClosure {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjClosure));
        &*(self as *const _ as *const ObjectClosure)
    }

    #[inline]
    pub unsafe fn as_upvalue(&self) -> &ObjectUpvalue {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjUpvalue));
        &*(self as *const _ as *const ObjectUpvalue)
    }

    #[inline]
    pub unsafe fn as_class(&self) -> &ObjectClass {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjClass));
        &*(self as *const _ as *const ObjectClass)
    }

    #[inline]
    pub unsafe fn as_instance(&self) -> &ObjectInstance {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjInstance));
        &*(self as *const _ as *const ObjectInstance)
    }

    #[inline]
    pub unsafe fn as_bound_method(&self) -> &ObjectBoundMethod {
        debug_assert!(matches!(self.obj_type, ObjectType::ObjBoundMethod));
        &*(self as *const _ as *const ObjectBoundMethod)
    }
}

/// Implemented by host functions callable from scripts.
pub trait NativeObject {
    fn invoke(&self, args: &[Value]) -> Result<Value, String>;
}

/// Trait for computing heap usage of GC managed structures (owned data only).
pub trait GcSize {
    /// Bytes for the struct itself (inline fields, pointers, container meta).
    fn shallow_size(&self) -> usize;
    /// Bytes including owned heap allocations (not traversing to other GC objects).
    fn deep_size(&self) -> usize;
}

// Referenced GC objects (raw pointers) are non-owned; only the pointer
// itself counts, and that is already part of the shallow size.

impl GcSize for ObjectString {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectString>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size() + self.content.capacity()
    }
}

impl GcSize for ObjectFunction {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectFunction>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size() + self.name.capacity() + self.chunk.deep_size()
    }
}

impl GcSize for ObjectClosure {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectClosure>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size() + self.upvalues.capacity() * size_of::<*mut ObjectUpvalue>()
    }
}

impl GcSize for ObjectNativeFunction {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectNativeFunction>()
    }

    fn deep_size(&self) -> usize {
        // Dynamic native internals are opaque; count the name only.
        self.shallow_size() + self.name.capacity()
    }
}

impl GcSize for ObjectUpvalue {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectUpvalue>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size()
    }
}

impl GcSize for ObjectClass {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectClass>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size() + self.name.capacity() + self.methods.deep_size()
    }
}

impl GcSize for ObjectInstance {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectInstance>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size() + self.fields.deep_size()
    }
}

impl GcSize for ObjectBoundMethod {
    fn shallow_size(&self) -> usize {
        size_of::<ObjectBoundMethod>()
    }

    fn deep_size(&self) -> usize {
        self.shallow_size()
    }
}

fn format_function(function: &ObjectFunction) -> String {
    if function.name.is_empty() {
        "<script>".to_string()
    } else {
        format!("<fn {}>", function.name)
    }
}

/// Render an object the way the `print` statement shows it.
/// Safety: `object` must point at a live heap object.
pub unsafe fn format_object(object: *const Object) -> String {
    match (*object).obj_type {
        ObjectType::ObjString => (*object).as_string().content.clone(),
        ObjectType::ObjFunction => format_function((*object).as_function()),
        ObjectType::ObjNativeFunction => "<native fn>".to_string(),
        ObjectType::ObjClosure => format_function(&*(*object).as_closure().function),
        ObjectType::ObjUpvalue => "upvalue".to_string(),
        ObjectType::ObjClass => (*object).as_class().name.clone(),
        ObjectType::ObjInstance => {
            let instance = (*object).as_instance();
            format!("{} instance", (*instance.class).name)
        }
        ObjectType::ObjBoundMethod => {
            let bound = (*object).as_bound_method();
            format_function(&*(*bound.method).function)
        }
    }
}
