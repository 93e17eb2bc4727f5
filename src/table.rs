use crate::memory::grow_capacity;
use crate::objects::object_string::ObjectString;
use crate::value::{is_nil, make_bool_value, make_nil_value, Value};

const TABLE_MAX_LOAD: f64 = 0.75;

// A slot with a null key is truly empty when its value is nil and a
// tombstone when its value is the boolean true. Probing may stop only at a
// truly empty slot; tombstones keep probe chains intact after deletion.
#[derive(Clone, Copy)]
struct Entry {
    key: *mut ObjectString,
    value: Value,
}

impl Entry {
    fn empty() -> Entry {
        Entry {
            key: std::ptr::null_mut(),
            value: make_nil_value(),
        }
    }
}

// Open-addressed, linear probe, capacity always a power of two. Keys are
// interned string pointers; equality is pointer identity, except for
// `find_string` which is the byte-comparing probe interning goes through.
pub struct Table {
    count: usize,
    entries: Vec<Entry>,
}

fn find_entry(entries: &[Entry], key: *mut ObjectString) -> usize {
    let mask = entries.len() - 1;
    let mut index = unsafe { (*key).hash } as usize & mask;
    let mut tombstone: Option<usize> = None;
    loop {
        let entry = &entries[index];
        if entry.key.is_null() {
            if is_nil(&entry.value) {
                return tombstone.unwrap_or(index);
            }
            if tombstone.is_none() {
                tombstone = Some(index);
            }
        } else if entry.key == key {
            return index;
        }
        index = (index + 1) & mask;
    }
}

impl Table {
    pub fn new() -> Table {
        Table {
            count: 0,
            entries: vec![],
        }
    }

    // Live entries plus tombstones; tombstones count against the load factor.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, key: *mut ObjectString) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let index = find_entry(&self.entries, key);
        let entry = &self.entries[index];
        if entry.key.is_null() {
            return None;
        }
        Some(entry.value)
    }

    /// Insert or overwrite. Returns true when the key was not present before.
    pub fn set(&mut self, key: *mut ObjectString, value: Value) -> bool {
        if (self.count + 1) as f64 > self.entries.len() as f64 * TABLE_MAX_LOAD {
            let capacity = grow_capacity!(self.entries.len());
            self.adjust_capacity(capacity);
        }

        let index = find_entry(&self.entries, key);
        let entry = &mut self.entries[index];
        let is_new_key = entry.key.is_null();
        // A reused tombstone is already counted.
        if is_new_key && is_nil(&entry.value) {
            self.count += 1;
        }
        entry.key = key;
        entry.value = value;
        is_new_key
    }

    pub fn delete(&mut self, key: *mut ObjectString) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = find_entry(&self.entries, key);
        let entry = &mut self.entries[index];
        if entry.key.is_null() {
            return false;
        }
        entry.key = std::ptr::null_mut();
        entry.value = make_bool_value(true);
        true
    }

    /// Copy every entry of `src` into self; later `set` calls overwrite.
    pub fn add_all(&mut self, src: &Table) {
        for entry in &src.entries {
            if !entry.key.is_null() {
                self.set(entry.key, entry.value);
            }
        }
    }

    /// Probe by raw bytes. The only lookup that compares contents instead of
    /// pointers, used to discover whether a string is already interned.
    pub fn find_string(&self, content: &str, hash: u32) -> Option<*mut ObjectString> {
        if self.count == 0 {
            return None;
        }
        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            let entry = &self.entries[index];
            if entry.key.is_null() {
                if is_nil(&entry.value) {
                    return None;
                }
            } else {
                let key = unsafe { &*entry.key };
                if key.hash == hash && key.content == content {
                    return Some(entry.key);
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// Drop entries whose key was not marked this collection cycle. Gives the
    /// intern table weak-key semantics so swept strings leave no dangling keys.
    pub fn remove_white(&mut self) {
        for index in 0..self.entries.len() {
            let key = self.entries[index].key;
            if !key.is_null() && !unsafe { (*key).object.marked } {
                self.delete(key);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (*mut ObjectString, Value)> + '_ {
        self.entries
            .iter()
            .filter(|entry| !entry.key.is_null())
            .map(|entry| (entry.key, entry.value))
    }

    pub fn deep_size(&self) -> usize {
        self.entries.capacity() * std::mem::size_of::<Entry>()
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let old_entries = std::mem::replace(&mut self.entries, vec![Entry::empty(); capacity]);
        // Tombstones are not carried over, so recount.
        self.count = 0;
        for entry in old_entries {
            if entry.key.is_null() {
                continue;
            }
            let index = find_entry(&self.entries, entry.key);
            self.entries[index] = entry;
            self.count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::object_manager::ObjectManager;
    use crate::objects::object_string::hash_string;
    use crate::value::{as_number, make_number_value};

    fn new_key(manager: &mut ObjectManager, content: &str) -> *mut ObjectString {
        manager.alloc_string(content, hash_string(content))
    }

    #[test]
    fn test_set_get_overwrite() {
        let mut manager = ObjectManager::new();
        let mut table = Table::new();
        let key = new_key(&mut manager, "answer");

        assert!(table.set(key, make_number_value(1.0)));
        assert!(!table.set(key, make_number_value(42.0)));
        assert_eq!(table.len(), 1);

        let value = table.get(key).expect("key should be present");
        assert_eq!(as_number(&value), 42.0);
    }

    #[test]
    fn test_get_missing_key() {
        let mut manager = ObjectManager::new();
        let mut table = Table::new();
        let present = new_key(&mut manager, "present");
        let absent = new_key(&mut manager, "absent");

        table.set(present, make_number_value(1.0));
        assert!(table.get(absent).is_none());
    }

    #[test]
    fn test_delete_leaves_probe_chain_intact() {
        let mut manager = ObjectManager::new();
        let mut table = Table::new();
        let keys: Vec<_> = (0..16)
            .map(|index| new_key(&mut manager, &format!("key{}", index)))
            .collect();
        for (index, key) in keys.iter().enumerate() {
            table.set(*key, make_number_value(index as f64));
        }

        assert!(table.delete(keys[3]));
        assert!(!table.delete(keys[3]));
        assert!(table.get(keys[3]).is_none());

        // Every other key must still be reachable through its probe chain.
        for (index, key) in keys.iter().enumerate() {
            if index == 3 {
                continue;
            }
            let value = table.get(*key).expect("survivor should be present");
            assert_eq!(as_number(&value), index as f64);
        }
    }

    #[test]
    fn test_tombstone_slot_is_reused() {
        let mut manager = ObjectManager::new();
        let mut table = Table::new();
        let first = new_key(&mut manager, "first");
        let second = new_key(&mut manager, "second");

        table.set(first, make_number_value(1.0));
        let count_before = table.len();
        table.delete(first);
        // Inserting over a tombstone must not grow the count a second time.
        table.set(second, make_number_value(2.0));
        assert!(table.len() <= count_before + 1);
        assert!(table.get(second).is_some());
    }

    #[test]
    fn test_growth_preserves_entries() {
        let mut manager = ObjectManager::new();
        let mut table = Table::new();
        let keys: Vec<_> = (0..64)
            .map(|index| new_key(&mut manager, &format!("entry{}", index)))
            .collect();
        for (index, key) in keys.iter().enumerate() {
            table.set(*key, make_number_value(index as f64));
        }
        for (index, key) in keys.iter().enumerate() {
            let value = table.get(*key).expect("entry lost during growth");
            assert_eq!(as_number(&value), index as f64);
        }
    }

    #[test]
    fn test_find_string_compares_bytes() {
        let mut manager = ObjectManager::new();
        let mut table = Table::new();
        let key = new_key(&mut manager, "interned");
        table.set(key, make_nil_value());

        let hash = hash_string("interned");
        assert_eq!(table.find_string("interned", hash), Some(key));
        assert_eq!(table.find_string("other", hash_string("other")), None);
    }

    #[test]
    fn test_add_all_copies_and_overwrites() {
        let mut manager = ObjectManager::new();
        let mut parent = Table::new();
        let mut child = Table::new();
        let inherited = new_key(&mut manager, "inherited");
        let overridden = new_key(&mut manager, "overridden");

        parent.set(inherited, make_number_value(1.0));
        parent.set(overridden, make_number_value(1.0));
        child.add_all(&parent);
        child.set(overridden, make_number_value(2.0));

        assert_eq!(as_number(&child.get(inherited).unwrap()), 1.0);
        assert_eq!(as_number(&child.get(overridden).unwrap()), 2.0);
    }
}
