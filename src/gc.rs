use crate::objects::object::{Object, ObjectType};
use crate::table::Table;
use crate::value::{as_object, is_object, Value};

/// Aggregated GC statistics (does not include currently-live total bytes; the
/// object manager tracks that).
#[derive(Default, Debug, Clone)]
pub struct GCStats {
    pub cycles: u64,
    pub total_freed_bytes: usize,
    pub last_freed_bytes: usize,
    pub last_before_bytes: usize,
    pub last_after_bytes: usize,
    pub last_next_trigger_bytes: usize,
}

impl GCStats {
    fn record(&mut self, before: usize, freed: usize, after: usize, next_trigger: usize) {
        self.cycles += 1;
        self.total_freed_bytes += freed;
        self.last_freed_bytes = freed;
        self.last_before_bytes = before;
        self.last_after_bytes = after;
        self.last_next_trigger_bytes = next_trigger;
    }
}

// Lightweight tracing macro (only active with the gc_debug feature)
#[cfg(feature = "gc_debug")]
macro_rules! gc_trace { ($($arg:tt)*) => { eprintln!("[gc-trace] {}", format_args!($($arg)*)); } }
#[cfg(not(feature = "gc_debug"))]
macro_rules! gc_trace { ($($arg:tt)*) => {}; }
pub(crate) use gc_trace;

// Tri-color marking. White objects have a clear mark bit; marking an object
// sets the bit and enqueues it gray; draining the worklist blackens it by
// marking its children. The gray worklist is a plain Vec so growing it goes
// through the global allocator and can never re-enter a collection.
pub struct GarbageCollector {
    gray: Vec<*mut Object>,
    stats: GCStats,
}

impl GarbageCollector {
    pub fn new() -> GarbageCollector {
        GarbageCollector {
            gray: vec![],
            stats: GCStats::default(),
        }
    }

    pub fn mark_object(&mut self, object: *mut Object) {
        if object.is_null() {
            return;
        }
        unsafe {
            if (*object).marked {
                return;
            }
            (*object).marked = true;
        }
        gc_trace!("mark_object enqueue gray ptr={:p}", object);
        self.gray.push(object);
    }

    pub fn mark_value(&mut self, value: &Value) {
        if !is_object(value) {
            return;
        }
        self.mark_object(as_object(value));
    }

    pub fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_object(key as *mut Object);
            self.mark_value(&value);
        }
    }

    /// Drain the gray worklist until every reachable object is black.
    pub fn trace_references(&mut self) {
        while let Some(object) = self.gray.pop() {
            gc_trace!("trace gray -> black ptr={:p}", object);
            unsafe {
                self.blacken_object(object);
            }
        }
    }

    unsafe fn blacken_object(&mut self, object: *mut Object) {
        match (*object).obj_type {
            ObjectType::ObjBoundMethod => {
                let bound = (*object).as_bound_method();
                let receiver = bound.receiver;
                self.mark_value(&receiver);
                self.mark_object(bound.method as *mut Object);
            }
            ObjectType::ObjClass => {
                let class = (*object).as_class();
                self.mark_table(&class.methods);
            }
            ObjectType::ObjClosure => {
                let closure = (*object).as_closure();
                self.mark_object(closure.function as *mut Object);
                for upvalue in &closure.upvalues {
                    self.mark_object(*upvalue as *mut Object);
                }
            }
            ObjectType::ObjFunction => {
                let function = (*object).as_function();
                for constant in function.chunk.iter_constants() {
                    let constant = *constant;
                    self.mark_value(&constant);
                }
            }
            ObjectType::ObjInstance => {
                let instance = (*object).as_instance();
                self.mark_object(instance.class as *mut Object);
                self.mark_table(&instance.fields);
            }
            ObjectType::ObjUpvalue => {
                let closed = (*object).as_upvalue().closed;
                self.mark_value(&closed);
            }
            // Strings and natives have no outgoing references.
            ObjectType::ObjString | ObjectType::ObjNativeFunction => {}
        }
    }

    /// Record a completed cycle (invoked by the VM, which knows bytes
    /// before/after and the new trigger).
    pub fn record_cycle(&mut self, before: usize, freed: usize, after: usize, next_trigger: usize) {
        self.stats.record(before, freed, after, next_trigger);
        gc_trace!(
            "cycle summary cycles={} freed={} before={} after={} next_trigger={}",
            self.stats.cycles,
            freed,
            before,
            after,
            next_trigger
        );
    }

    pub fn stats(&self) -> &GCStats {
        &self.stats
    }
}
