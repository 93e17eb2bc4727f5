use crate::objects::{
    object::{GcSize, NativeObject, Object, ObjectType},
    object_bound_method::ObjectBoundMethod,
    object_class::ObjectClass,
    object_closure::ObjectClosure,
    object_function::ObjectFunction,
    object_instance::ObjectInstance,
    object_native_function::ObjectNativeFunction,
    object_string::{hash_string, ObjectString},
    object_upvalue::ObjectUpvalue,
};
use crate::table::Table;
use crate::value::{make_nil_value, Value};

const GC_INITIAL_THRESHOLD: usize = 1024 * 1024;
pub const GC_HEAP_GROW_FACTOR: usize = 2;

// Owns every heap object through the intrusive `next` chain threaded from
// `objects`. Allocation records the object's deep size so the collector can
// trigger on byte growth; sweep unlinks and frees whatever stayed white.
pub struct ObjectManager {
    objects: *mut Object,
    object_count: usize,
    pub bytes_allocated: usize,
    pub next_gc: usize,
}

impl ObjectManager {
    pub fn new() -> ObjectManager {
        ObjectManager {
            objects: std::ptr::null_mut(),
            object_count: 0,
            bytes_allocated: 0,
            next_gc: GC_INITIAL_THRESHOLD,
        }
    }

    pub fn should_collect(&self) -> bool {
        self.bytes_allocated > self.next_gc
    }

    pub fn object_count(&self) -> usize {
        self.object_count
    }

    fn track(&mut self, object: *mut Object) {
        unsafe {
            (*object).next = self.objects;
            self.bytes_allocated += (*object).deep_size();
        }
        self.objects = object;
        self.object_count += 1;
    }

    pub fn alloc_string(&mut self, content: &str, hash: u32) -> *mut ObjectString {
        let ptr = Box::into_raw(Box::new(ObjectString::new(content, hash)));
        self.track(ptr as *mut Object);
        ptr
    }

    /// Return the canonical object for `content`, allocating and registering
    /// it in the intern table only when no equal string exists yet.
    pub fn intern_string(&mut self, strings: &mut Table, content: &str) -> *mut ObjectString {
        let hash = hash_string(content);
        if let Some(existing) = strings.find_string(content, hash) {
            return existing;
        }
        let ptr = self.alloc_string(content, hash);
        strings.set(ptr, make_nil_value());
        ptr
    }

    pub fn alloc_function(&mut self, name: String) -> *mut ObjectFunction {
        let ptr = Box::into_raw(Box::new(ObjectFunction::new(name)));
        self.track(ptr as *mut Object);
        ptr
    }

    pub fn alloc_closure(&mut self, function: *mut ObjectFunction) -> *mut ObjectClosure {
        let ptr = Box::into_raw(Box::new(ObjectClosure::new(function)));
        self.track(ptr as *mut Object);
        ptr
    }

    pub fn alloc_upvalue(&mut self, slot: usize) -> *mut ObjectUpvalue {
        let ptr = Box::into_raw(Box::new(ObjectUpvalue::new(slot)));
        self.track(ptr as *mut Object);
        ptr
    }

    pub fn alloc_class(&mut self, name: String) -> *mut ObjectClass {
        let ptr = Box::into_raw(Box::new(ObjectClass::new(name)));
        self.track(ptr as *mut Object);
        ptr
    }

    pub fn alloc_instance(&mut self, class: *mut ObjectClass) -> *mut ObjectInstance {
        let ptr = Box::into_raw(Box::new(ObjectInstance::new(class)));
        self.track(ptr as *mut Object);
        ptr
    }

    pub fn alloc_bound_method(
        &mut self,
        receiver: Value,
        method: *mut ObjectClosure,
    ) -> *mut ObjectBoundMethod {
        let ptr = Box::into_raw(Box::new(ObjectBoundMethod::new(receiver, method)));
        self.track(ptr as *mut Object);
        ptr
    }

    pub fn alloc_native_function(
        &mut self,
        name: String,
        function: impl NativeObject + 'static,
    ) -> *mut ObjectNativeFunction {
        let ptr = Box::into_raw(Box::new(ObjectNativeFunction::new(name, function)));
        self.track(ptr as *mut Object);
        ptr
    }

    /// Walk the object list: re-whiten marked objects for the next cycle,
    /// unlink and free the rest. Returns the freed byte count.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0usize;
        let mut previous: *mut Object = std::ptr::null_mut();
        let mut object = self.objects;
        unsafe {
            while !object.is_null() {
                if (*object).marked {
                    (*object).marked = false;
                    previous = object;
                    object = (*object).next;
                } else {
                    let unreached = object;
                    object = (*object).next;
                    if previous.is_null() {
                        self.objects = object;
                    } else {
                        (*previous).next = object;
                    }
                    freed += free_object(unreached);
                    self.object_count -= 1;
                }
            }
        }
        self.bytes_allocated = self.bytes_allocated.saturating_sub(freed);
        freed
    }

    fn free_all(&mut self) {
        let mut object = self.objects;
        unsafe {
            while !object.is_null() {
                let next = (*object).next;
                free_object(object);
                object = next;
            }
        }
        self.objects = std::ptr::null_mut();
        self.object_count = 0;
        self.bytes_allocated = 0;
    }
}

impl Drop for ObjectManager {
    fn drop(&mut self) {
        self.free_all();
    }
}

// Rebuild the concrete box so the payload (string bytes, chunk buffers,
// method and field tables) is released along with the object itself.
unsafe fn free_object(object: *mut Object) -> usize {
    match (*object).obj_type {
        ObjectType::ObjBoundMethod => {
            let boxed = Box::from_raw(object as *mut ObjectBoundMethod);
            boxed.deep_size()
        }
        ObjectType::ObjClass => {
            let boxed = Box::from_raw(object as *mut ObjectClass);
            boxed.deep_size()
        }
        ObjectType::ObjClosure => {
            let boxed = Box::from_raw(object as *mut ObjectClosure);
            boxed.deep_size()
        }
        ObjectType::ObjFunction => {
            let boxed = Box::from_raw(object as *mut ObjectFunction);
            boxed.deep_size()
        }
        ObjectType::ObjInstance => {
            let boxed = Box::from_raw(object as *mut ObjectInstance);
            boxed.deep_size()
        }
        ObjectType::ObjNativeFunction => {
            let boxed = Box::from_raw(object as *mut ObjectNativeFunction);
            boxed.deep_size()
        }
        ObjectType::ObjString => {
            let boxed = Box::from_raw(object as *mut ObjectString);
            boxed.deep_size()
        }
        ObjectType::ObjUpvalue => {
            let boxed = Box::from_raw(object as *mut ObjectUpvalue);
            boxed.deep_size()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_links_objects() {
        let mut manager = ObjectManager::new();
        manager.alloc_string("one", hash_string("one"));
        manager.alloc_string("two", hash_string("two"));
        assert_eq!(manager.object_count(), 2);
        assert!(manager.bytes_allocated > 0);
    }

    #[test]
    fn test_intern_string_returns_same_pointer() {
        let mut manager = ObjectManager::new();
        let mut strings = Table::new();
        let first = manager.intern_string(&mut strings, "shared");
        let second = manager.intern_string(&mut strings, "shared");
        assert_eq!(first, second);
        assert_eq!(manager.object_count(), 1);
    }

    #[test]
    fn test_sweep_frees_unmarked_objects() {
        let mut manager = ObjectManager::new();
        let keep = manager.alloc_string("keep", hash_string("keep"));
        manager.alloc_string("drop1", hash_string("drop1"));
        manager.alloc_string("drop2", hash_string("drop2"));

        unsafe {
            (*keep).object.marked = true;
        }
        let freed = manager.sweep();
        assert!(freed > 0);
        assert_eq!(manager.object_count(), 1);
        // Survivors are re-whitened for the next cycle.
        assert!(unsafe { !(*keep).object.marked });
    }

    #[test]
    fn test_sweep_reclaims_bytes() {
        let mut manager = ObjectManager::new();
        manager.alloc_string("garbage", hash_string("garbage"));
        let before = manager.bytes_allocated;
        manager.sweep();
        assert!(manager.bytes_allocated < before);
    }
}
