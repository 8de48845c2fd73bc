//! System Call Input Validation
//!
//! Buffers handed to the kernel by a process are checked before the kernel
//! writes to them.
//!
//! # Security Principles
//! - Validate ALL inputs before use
//! - Fail-secure: deny by default
//! - Prevent common vulnerabilities:
//!   - Buffer overflows (length checked against the record size)
//!   - Address wrap-around (checked arithmetic)
//!   - Heap metadata corruption (buffer must lie inside one live block)
//!   - Null pointer dereference (explicit checks)

use core::fmt;

use crate::arch::Word;
use crate::mm::Heap;

/// Why a user buffer was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// Address zero.
    Null,
    /// Address plus length wraps.
    Overflow,
    /// Shorter than the record the kernel must write.
    TooSmall,
    /// Not inside a live heap allocation.
    OutOfRange,
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null buffer"),
            Self::Overflow => write!(f, "buffer wraps the address space"),
            Self::TooSmall => write!(f, "buffer too small"),
            Self::OutOfRange => write!(f, "buffer outside process memory"),
        }
    }
}

/// A validated, writable user buffer.
///
/// Only constructed by [`validate_user_write`], so the bytes are known to be
/// inside one live heap block.
#[derive(Debug)]
pub struct UserBufferMut<'a> {
    bytes: &'a mut [u8],
}

impl UserBufferMut<'_> {
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut *self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Validate a user-space write buffer.
///
/// # Arguments
/// * `heap` - The heap process memory is allocated from
/// * `ptr` - Buffer address
/// * `len` - Buffer length in bytes
/// * `required` - Bytes the kernel will write
///
/// # Security Checks
/// 1. Pointer is not null
/// 2. Length covers the record
/// 3. Pointer + length doesn't overflow
/// 4. The whole range lies inside one live allocation
pub fn validate_user_write<const N: usize>(
    heap: &mut Heap<N>,
    ptr: Word,
    len: usize,
    required: usize,
) -> Result<UserBufferMut<'_>, BufferError> {
    if ptr == 0 {
        return Err(BufferError::Null);
    }
    if len < required {
        return Err(BufferError::TooSmall);
    }
    ptr.checked_add(len).ok_or(BufferError::Overflow)?;
    let bytes = heap
        .live_bytes_mut(ptr, len)
        .ok_or(BufferError::OutOfRange)?;
    Ok(UserBufferMut { bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::AllocFlags;

    fn heap() -> Heap<1024> {
        let mut heap = Heap::new();
        heap.init(1024).unwrap();
        heap
    }

    #[test]
    fn test_null_pointer() {
        let mut heap = heap();
        assert_eq!(
            validate_user_write(&mut heap, 0, 64, 16).unwrap_err(),
            BufferError::Null
        );
    }

    #[test]
    fn test_too_small() {
        let mut heap = heap();
        let p = heap.alloc(64, AllocFlags::empty()).unwrap();
        let addr = heap.address_of(p);
        assert_eq!(
            validate_user_write(&mut heap, addr, 8, 16).unwrap_err(),
            BufferError::TooSmall
        );
    }

    #[test]
    fn test_overflow() {
        let mut heap = heap();
        assert_eq!(
            validate_user_write(&mut heap, usize::MAX - 10, 100, 16).unwrap_err(),
            BufferError::Overflow
        );
    }

    #[test]
    fn test_outside_heap() {
        let mut heap = heap();
        assert_eq!(
            validate_user_write(&mut heap, 0x1000, 64, 16).unwrap_err(),
            BufferError::OutOfRange
        );
    }

    #[test]
    fn test_valid_buffer() {
        let mut heap = heap();
        let p = heap.alloc(64, AllocFlags::empty()).unwrap();
        let addr = heap.address_of(p);
        let mut buf = validate_user_write(&mut heap, addr, 64, 16).unwrap();
        assert_eq!(buf.len(), 64);
        buf.as_bytes_mut()[0] = 7;
        assert_eq!(heap.payload(p).unwrap()[0], 7);
    }
}
