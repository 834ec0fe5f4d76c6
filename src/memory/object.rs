//! Structured-object views over virtual memory.
//!
//! An [`ObjectHandle`] interprets a concrete, non-null address as a runtime
//! object. The engine models objects as flat storage with a small header; the
//! only structure the core needs is the array layout used by `newarr`, `ldlen`
//! and element access:
//!
//! ```text
//! +--------------------+----------------+----------------------
//! | type slot (ptr)    | length (u32)   | elements ...
//! +--------------------+----------------+----------------------
//! ```
//!
//! Callers are responsible for rejecting null or unknown addresses *before*
//! constructing a handle; the dispatch layer turns those into null-reference
//! outcomes or unknown results.

use crate::memory::{span::BitVectorSpanMut, VirtualMemory};

/// Byte offset of an array's length field: one pointer-sized type slot.
pub(crate) fn array_length_offset(is_32_bit: bool) -> u64 {
    if is_32_bit {
        4
    } else {
        8
    }
}

/// Total array header size: type slot plus 32-bit length field.
pub(crate) fn array_header_size(is_32_bit: bool) -> u64 {
    array_length_offset(is_32_bit) + 4
}

/// A view interpreting memory at a concrete address as a structured object.
///
/// # Example
///
/// ```rust
/// use trivm::{BitVector, ObjectHandle, VirtualMemory};
///
/// let mut memory = VirtualMemory::new();
/// // An array object at 0x9000 on a 64-bit layout: length field at +8.
/// memory.write_bytes(0x9008, &16u32.to_le_bytes());
///
/// let handle = ObjectHandle::new(&memory, 0x9000, false);
/// let mut length = BitVector::new(32, false);
/// handle.read_array_length(&mut length.as_span_mut());
/// assert_eq!(length.as_span().u32().unwrap(), 16);
/// ```
pub struct ObjectHandle<'a> {
    memory: &'a VirtualMemory,
    address: u64,
    is_32_bit: bool,
}

impl<'a> ObjectHandle<'a> {
    /// Creates a handle over the object at `address`.
    ///
    /// The address must be concrete and non-null; passing a null address is a
    /// caller bug, not a modeled fault.
    #[must_use]
    pub fn new(memory: &'a VirtualMemory, address: u64, is_32_bit: bool) -> Self {
        debug_assert!(address != 0, "object handles require a non-null address");
        ObjectHandle {
            memory,
            address,
            is_32_bit,
        }
    }

    /// The object's base address.
    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Reads the array length field into `destination` (a 32-bit span).
    ///
    /// The length of an array object that was never fully written comes back
    /// with unknown bits, like any other memory read.
    pub fn read_array_length(&self, destination: &mut BitVectorSpanMut<'_>) {
        debug_assert_eq!(destination.count(), 32, "array lengths are 32 bits");
        self.memory
            .read(self.address + array_length_offset(self.is_32_bit), destination);
    }

    /// The address of element `index`, given the element size in bytes.
    #[must_use]
    pub fn element_address(&self, index: u64, element_size: u64) -> u64 {
        self.address + array_header_size(self.is_32_bit) + index * element_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::BitVector;

    #[test]
    fn test_read_array_length() {
        let mut memory = VirtualMemory::new();
        memory.write_bytes(0x5000 + 4, &1234u32.to_le_bytes());

        let handle = ObjectHandle::new(&memory, 0x5000, true);
        let mut length = BitVector::new(32, false);
        handle.read_array_length(&mut length.as_span_mut());
        assert_eq!(length.as_span().u32().unwrap(), 1234);
    }

    #[test]
    fn test_unwritten_length_is_unknown() {
        let memory = VirtualMemory::new();
        let handle = ObjectHandle::new(&memory, 0x5000, false);
        let mut length = BitVector::new(32, true);
        handle.read_array_length(&mut length.as_span_mut());
        assert!(!length.is_fully_known());
    }

    #[test]
    fn test_element_address() {
        let memory = VirtualMemory::new();
        let handle = ObjectHandle::new(&memory, 0x1000, false);
        // 64-bit header is 12 bytes; element 3 of a 4-byte element type.
        assert_eq!(handle.element_address(3, 4), 0x1000 + 12 + 12);
    }
}
