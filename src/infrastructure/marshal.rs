//! Marshaling of attribute collections into the native `LDAPMod` layout
//!
//! The native add/modify calls take a null-terminated array of pointers to
//! `LDAPMod` records, each holding an operation tag, an attribute name and a
//! null-terminated array of C strings. Every block here is allocated from a
//! [`ForeignHeap`] and owned by the Rust value that allocated it, so dropping
//! a [`ModificationList`] frees the whole structure on success and error paths
//! alike, including a list that failed halfway through construction.

use crate::domain::{ModOp, Modification};
use crate::error::{LdapError, LdapResult};
use std::collections::HashMap;
use std::mem;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::sync::Arc;

/// Allocator backing marshaled arrays
pub trait ForeignHeap: Send + Sync {
    /// Allocate `size` bytes. Returns null when memory is exhausted.
    fn allocate(&self, size: usize) -> *mut c_void;

    /// Free a block returned by [`ForeignHeap::allocate`].
    ///
    /// # Safety
    ///
    /// `block` must come from `allocate` on this heap and must not have been
    /// released already.
    unsafe fn release(&self, block: *mut c_void);
}

/// The C runtime heap
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcHeap;

impl ForeignHeap for LibcHeap {
    fn allocate(&self, size: usize) -> *mut c_void {
        // SAFETY: calloc has no preconditions; a zero size is bumped so the
        // result is never a valid-but-unfreeable pointer
        unsafe { libc::calloc(1, size.max(1)) }
    }

    unsafe fn release(&self, block: *mut c_void) {
        libc::free(block)
    }
}

/// Native `LDAPMod` record (string-valued variant)
#[repr(C)]
#[derive(Debug)]
pub struct LdapMod {
    pub mod_op: c_int,
    pub mod_type: *mut c_char,
    pub mod_vals: *mut *mut c_char,
}

fn allocate_slots<T>(heap: &Arc<dyn ForeignHeap>, count: usize) -> LdapResult<*mut *mut T> {
    let size = count
        .checked_mul(mem::size_of::<*mut T>())
        .ok_or_else(|| LdapError::Marshal(format!("array of {} slots is too large", count)))?;
    let block = heap.allocate(size) as *mut *mut T;
    if block.is_null() {
        return Err(LdapError::Marshal(format!(
            "failed to allocate {} bytes of foreign memory",
            size
        )));
    }
    for i in 0..count {
        // SAFETY: block holds `count` pointer slots
        unsafe { block.add(i).write(ptr::null_mut()) };
    }
    Ok(block)
}

/// NUL-terminated copy of a string on the foreign heap
struct HeapString {
    heap: Arc<dyn ForeignHeap>,
    ptr: *mut c_char,
}

impl HeapString {
    fn new(heap: &Arc<dyn ForeignHeap>, value: &str) -> LdapResult<Self> {
        let bytes = value.as_bytes();
        if bytes.contains(&0) {
            return Err(LdapError::Marshal(format!(
                "value {:?} contains an interior NUL byte",
                value
            )));
        }
        let ptr = heap.allocate(bytes.len() + 1) as *mut c_char;
        if ptr.is_null() {
            return Err(LdapError::Marshal(format!(
                "failed to allocate {} bytes of foreign memory",
                bytes.len() + 1
            )));
        }
        // SAFETY: ptr holds len + 1 bytes and does not overlap `bytes`
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
            ptr.add(bytes.len()).write(0);
        }
        Ok(Self {
            heap: Arc::clone(heap),
            ptr,
        })
    }
}

impl Drop for HeapString {
    fn drop(&mut self) {
        // SAFETY: allocated by this heap in `new` and released only here
        unsafe { self.heap.release(self.ptr as *mut c_void) };
    }
}

/// Null-terminated array of C strings (`char **`)
pub struct StringArray {
    heap: Arc<dyn ForeignHeap>,
    array: *mut *mut c_char,
    strings: Vec<HeapString>,
}

impl StringArray {
    pub fn new<S: AsRef<str>>(heap: &Arc<dyn ForeignHeap>, values: &[S]) -> LdapResult<Self> {
        let strings = values
            .iter()
            .map(|v| HeapString::new(heap, v.as_ref()))
            .collect::<LdapResult<Vec<_>>>()?;
        let array = allocate_slots::<c_char>(heap, strings.len() + 1)?;
        for (i, s) in strings.iter().enumerate() {
            // SAFETY: array holds strings.len() + 1 slots; the last stays null
            unsafe { array.add(i).write(s.ptr) };
        }
        Ok(Self {
            heap: Arc::clone(heap),
            array,
            strings,
        })
    }

    /// Pointer to the first slot, valid while `self` is alive
    pub fn as_ptr(&self) -> *mut *mut c_char {
        self.array
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl Drop for StringArray {
    fn drop(&mut self) {
        // SAFETY: allocated in `new`; the strings are freed by their own Drop
        unsafe { self.heap.release(self.array as *mut c_void) };
    }
}

/// Null-terminated `LDAPMod **` array ready for the native add/modify calls
pub struct ModificationList {
    heap: Arc<dyn ForeignHeap>,
    records: *mut *mut LdapMod,
    len: usize,
    names: Vec<HeapString>,
    values: Vec<StringArray>,
}

impl ModificationList {
    /// Marshal an ordered modification list. Order is preserved.
    pub fn from_modifications(
        modifications: &[Modification],
        heap: Arc<dyn ForeignHeap>,
    ) -> LdapResult<Self> {
        Self::build(
            heap,
            modifications.len(),
            modifications
                .iter()
                .map(|m| (m.op.to_native(), m.attribute.as_str(), m.values.as_slice())),
        )
    }

    /// Marshal an attribute map as `LDAP_MOD_ADD` records, in map order.
    pub fn from_attributes(
        attributes: &HashMap<String, Vec<String>>,
        heap: Arc<dyn ForeignHeap>,
    ) -> LdapResult<Self> {
        let op = ModOp::Add.to_native();
        Self::build(
            heap,
            attributes.len(),
            attributes
                .iter()
                .map(|(name, values)| (op, name.as_str(), values.as_slice())),
        )
    }

    fn build<'a, I>(heap: Arc<dyn ForeignHeap>, len: usize, items: I) -> LdapResult<Self>
    where
        I: Iterator<Item = (c_int, &'a str, &'a [String])>,
    {
        let records = allocate_slots::<LdapMod>(&heap, len + 1)?;
        // From here on a failed `?` drops `list`, which frees what exists so far
        let mut list = ModificationList {
            heap,
            records,
            len,
            names: Vec::with_capacity(len),
            values: Vec::with_capacity(len),
        };

        for (i, (op, name, values)) in items.enumerate().take(len) {
            let name = HeapString::new(&list.heap, name)?;
            let vals = StringArray::new(&list.heap, values)?;
            let record = list.heap.allocate(mem::size_of::<LdapMod>()) as *mut LdapMod;
            if record.is_null() {
                return Err(LdapError::Marshal(
                    "failed to allocate modification record".to_string(),
                ));
            }
            // SAFETY: record is a fresh block sized for LdapMod; slot i < len
            unsafe {
                record.write(LdapMod {
                    mod_op: op,
                    mod_type: name.ptr,
                    mod_vals: vals.as_ptr(),
                });
                list.records.add(i).write(record);
            }
            list.names.push(name);
            list.values.push(vals);
        }

        tracing::trace!(records = list.len, "Marshaled modification list");
        Ok(list)
    }

    /// Pointer to the record array, valid while `self` is alive
    pub fn as_ptr(&self) -> *mut *mut LdapMod {
        self.records
    }

    /// Number of records, not counting the null terminator
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for ModificationList {
    fn drop(&mut self) {
        for i in 0..self.len {
            // SAFETY: records holds len + 1 slots, each null or a record
            // allocated in `build`
            unsafe {
                let record = *self.records.add(i);
                if !record.is_null() {
                    self.heap.release(record as *mut c_void);
                }
            }
        }
        // SAFETY: allocated in `build`, released only here
        unsafe { self.heap.release(self.records as *mut c_void) };
    }
}
