use log::{debug, trace};

use crate::lang::value::Value;
use crate::runtime::object::{Handle, ObjFunction, Object};

/// First collection happens once this many bytes are live.
const GC_INITIAL_THRESHOLD: usize = 1024 * 1024;
/// The next threshold is the post-collection live size times this.
const GC_HEAP_GROW_FACTOR: usize = 2;

#[derive(Debug)]
struct Entry {
    marked: bool,
    object: Object,
}

/// Owner of every heap object, and the mark-and-sweep collector over
/// them.
///
/// Objects live in `entries`; a freed slot goes on the free list and is
/// reused by the next allocation, so a [`Handle`] is stable for as long
/// as its object is reachable. All allocation and deallocation flows
/// through here so the byte accounting driving collection is exact.
#[derive(Debug)]
pub struct Heap {
    entries: Vec<Option<Entry>>,
    free: Vec<usize>,
    gray: Vec<Handle>,
    bytes_allocated: usize,
    next_gc: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            entries: Vec::new(),
            free: Vec::new(),
            gray: Vec::new(),
            bytes_allocated: 0,
            next_gc: GC_INITIAL_THRESHOLD,
        }
    }

    /// Register a new object. If the allocation would cross the
    /// collection threshold, a full collection runs first; `roots` must
    /// therefore cover everything the caller still needs alive.
    pub fn alloc(&mut self, object: Object, roots: &[Value]) -> Handle {
        let size = object_size(&object);

        if self.bytes_allocated + size > self.next_gc {
            self.collect(roots);
        }

        self.bytes_allocated += size;
        let entry = Some(Entry {
            marked: false,
            object,
        });

        let index = match self.free.pop() {
            Some(index) => {
                self.entries[index] = entry;
                index
            }
            None => {
                self.entries.push(entry);
                self.entries.len() - 1
            }
        };

        let handle = Handle::new(index as u32);
        trace!("alloc {:?}, {} bytes", handle, size);
        handle
    }

    /// Run a full mark-and-sweep cycle over the given roots.
    pub fn collect(&mut self, roots: &[Value]) {
        let before = self.bytes_allocated;
        debug!("gc begin, {} bytes live", before);

        for value in roots {
            self.mark_value(*value);
        }
        self.trace_references();
        self.sweep();

        self.next_gc = self.bytes_allocated * GC_HEAP_GROW_FACTOR;
        debug!(
            "gc end, reclaimed {} bytes ({} live, next cycle at {})",
            before - self.bytes_allocated,
            self.bytes_allocated,
            self.next_gc
        );
    }

    fn mark_value(&mut self, value: Value) {
        if let Value::Obj(handle) = value {
            self.mark_object(handle);
        }
    }

    fn mark_object(&mut self, handle: Handle) {
        let entry = match &mut self.entries[handle.index()] {
            Some(entry) => entry,
            None => unreachable!("marked a freed slot"),
        };
        if entry.marked {
            return;
        }
        entry.marked = true;
        trace!("mark {:?} ({})", handle, entry.object.kind());
        self.gray.push(handle);
    }

    fn trace_references(&mut self) {
        while let Some(handle) = self.gray.pop() {
            // Collect the referents first; marking them needs &mut.
            let mut children: Vec<Handle> = Vec::new();
            match self.object(handle) {
                Object::String(_) => {}
                Object::Function(function) => {
                    if let Some(name) = function.name {
                        children.push(name);
                    }
                    for value in &function.chunk.constants {
                        if let Value::Obj(child) = value {
                            children.push(*child);
                        }
                    }
                }
            }
            for child in children {
                self.mark_object(child);
            }
        }
    }

    fn sweep(&mut self) {
        for index in 0..self.entries.len() {
            let Some(entry) = &mut self.entries[index] else {
                continue;
            };
            if entry.marked {
                entry.marked = false;
            } else {
                let size = object_size(&entry.object);
                trace!("free slot {}, {} bytes ({})", index, size, entry.object.kind());
                self.bytes_allocated -= size;
                self.entries[index] = None;
                self.free.push(index);
            }
        }
    }

    // ------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------

    pub fn object(&self, handle: Handle) -> &Object {
        match &self.entries[handle.index()] {
            Some(entry) => &entry.object,
            None => unreachable!("dereferenced a freed slot"),
        }
    }

    /// The character data behind a string handle. The type checker
    /// guarantees handles are used at their allocated kind.
    pub fn string(&self, handle: Handle) -> &str {
        match self.object(handle) {
            Object::String(s) => s,
            other => unreachable!("expected string, found {}", other.kind()),
        }
    }

    pub fn function(&self, handle: Handle) -> &ObjFunction {
        match self.object(handle) {
            Object::Function(f) => f,
            other => unreachable!("expected function, found {}", other.kind()),
        }
    }

    /// Kind of the object behind a handle, for error messages.
    pub fn kind(&self, handle: Handle) -> &'static str {
        self.object(handle).kind()
    }

    /// Equality across the full value domain: tags must match, ints and
    /// bools compare by payload, strings by content, functions by
    /// identity.
    pub fn values_equal(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Obj(ha), Value::Obj(hb)) => {
                if ha == hb {
                    return true;
                }
                match (self.object(ha), self.object(hb)) {
                    (Object::String(sa), Object::String(sb)) => sa == sb,
                    _ => false,
                }
            }
            _ => a == b,
        }
    }

    /// Printable form of a value, following handles into the registry.
    pub fn value_to_string(&self, value: Value) -> String {
        match value {
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Obj(handle) => match self.object(handle) {
                Object::String(s) => s.to_string(),
                Object::Function(f) => match f.name {
                    Some(name) => format!("<fn {}>", self.string(name)),
                    None => "<script>".to_string(),
                },
            },
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Number of live objects.
    pub fn object_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}

fn object_size(object: &Object) -> usize {
    let payload = match object {
        Object::String(s) => s.len(),
        Object::Function(f) => {
            f.chunk.code.len()
                + f.chunk.lines.len() * std::mem::size_of::<u32>()
                + f.chunk.constants.len() * std::mem::size_of::<Value>()
        }
    };
    std::mem::size_of::<Entry>() + payload
}
