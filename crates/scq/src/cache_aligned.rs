use std::ops::{Deref, DerefMut};

/// Pads `T` out to a 128-byte alignment so that adjacent control words
/// (`head`, `tail`, `threshold`) never share a cache line. 128 bytes rather
/// than 64 to account for adjacent-line prefetchers on modern x86.
#[repr(align(128))]
#[derive(Debug, Default)]
pub struct CacheAligned<T>(pub T);

impl<T> Deref for CacheAligned<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for CacheAligned<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T> From<T> for CacheAligned<T> {
    #[inline]
    fn from(value: T) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};

    #[test]
    fn alignment_is_128() {
        assert_eq!(align_of::<CacheAligned<u64>>(), 128);
        assert!(size_of::<CacheAligned<u64>>() >= 128);
    }
}
