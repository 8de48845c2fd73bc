//! Fixed-capacity names for processes and interrupt vectors.

use core::fmt;

/// A UTF-8 name stored inline, truncated to `N` bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Name<const N: usize> {
    bytes: [u8; N],
    len: usize,
}

impl<const N: usize> Name<N> {
    pub const EMPTY: Self = Self {
        bytes: [0; N],
        len: 0,
    };

    /// Copy `s`, cutting it at the last character boundary that fits.
    pub fn new(s: &str) -> Self {
        let mut len = s.len().min(N);
        while !s.is_char_boundary(len) {
            len -= 1;
        }
        let mut bytes = [0; N];
        bytes[..len].copy_from_slice(&s.as_bytes()[..len]);
        Self { bytes, len }
    }

    /// Build a name from format arguments, truncating like [`Name::new`].
    pub fn from_fmt(args: fmt::Arguments<'_>) -> Self {
        let mut name = Self::EMPTY;
        // Writes past capacity are dropped rather than reported.
        let _ = fmt::write(&mut name, args);
        name
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len]).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> fmt::Write for Name<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            let mut buf = [0; 4];
            let encoded = c.encode_utf8(&mut buf).as_bytes();
            if self.len + encoded.len() > N {
                return Err(fmt::Error);
            }
            self.bytes[self.len..self.len + encoded.len()].copy_from_slice(encoded);
            self.len += encoded.len();
        }
        Ok(())
    }
}

impl<const N: usize> fmt::Debug for Name<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl<const N: usize> fmt::Display for Name<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncates() {
        let name = Name::<4>::new("sensor");
        assert_eq!(name.as_str(), "sens");
    }

    #[test]
    fn test_truncates_on_char_boundary() {
        // 'é' is two bytes; only one would fit.
        let name = Name::<4>::new("abcé");
        assert_eq!(name.as_str(), "abc");
    }

    #[test]
    fn test_from_fmt() {
        let name = Name::<16>::from_fmt(format_args!("IRQ_{}", 42));
        assert_eq!(name.as_str(), "IRQ_42");
        assert!(Name::<16>::EMPTY.is_empty());
    }
}
