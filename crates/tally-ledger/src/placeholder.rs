use tally_types::Address;

/// Prefix of synthetic addresses.
pub const DEFAULT_PREFIX: &str = "devnull_";

/// Digits in the zero-padded counter.
pub const DEFAULT_WIDTH: usize = 10;

/// Allocates synthetic addresses for outputs that carry value but resolve to
/// no address.
///
/// Each call to [`next`](Self::next) yields `prefix` followed by the counter
/// zero-padded to `width` digits, then advances the counter. The sequence
/// never repeats within one allocator. Nothing is persisted: a new allocator
/// starts again at zero.
#[derive(Clone, Debug)]
pub struct PlaceholderAllocator {
    prefix: String,
    width: usize,
    counter: u64,
}

impl PlaceholderAllocator {
    pub fn new(prefix: impl Into<String>, width: usize) -> Self {
        Self {
            prefix: prefix.into(),
            width,
            counter: 0,
        }
    }

    /// Allocate the next address.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Address {
        let address = self.format(self.counter);
        self.counter += 1;
        address
    }

    /// The address the next call to `next()` will return.
    pub fn peek(&self) -> Address {
        self.format(self.counter)
    }

    /// Number of addresses allocated so far.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    fn format(&self, n: u64) -> Address {
        format!("{}{:0width$}", self.prefix, n, width = self.width)
    }
}

impl Default for PlaceholderAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX, DEFAULT_WIDTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn default_format() {
        let mut alloc = PlaceholderAllocator::default();
        assert_eq!(alloc.next(), "devnull_0000000000");
        assert_eq!(alloc.next(), "devnull_0000000001");
        assert_eq!(alloc.counter(), 2);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut alloc = PlaceholderAllocator::default();
        let peeked = alloc.peek();
        assert_eq!(alloc.counter(), 0);
        assert_eq!(alloc.next(), peeked);
    }

    #[test]
    fn never_repeats() {
        let mut alloc = PlaceholderAllocator::new("x", 2);
        let seen: HashSet<String> = (0..500).map(|_| alloc.next()).collect();
        assert_eq!(seen.len(), 500);
    }

    #[test]
    fn counter_wider_than_width_is_not_truncated() {
        let mut alloc = PlaceholderAllocator::new("p", 1);
        for _ in 0..10 {
            alloc.next();
        }
        assert_eq!(alloc.next(), "p10");
    }

    #[test]
    fn fresh_allocator_restarts() {
        let mut first = PlaceholderAllocator::default();
        first.next();
        let mut second = PlaceholderAllocator::default();
        assert_eq!(second.next(), "devnull_0000000000");
    }
}
