//! Triangular probe sequences.
//!
//! Both probe variants are infinite iterators over a power-of-two-sized
//! index space; callers bound them with `.take(length)` which is guaranteed
//! to visit every distinct index exactly once before the sequence would
//! repeat, because triangular numbers modulo a power of two form a complete
//! residue system.

/// Unit-step triangular probe used by CMap: jump `k` grows by one slot each
/// time.
pub(crate) struct UnitProbe {
    idx: usize,
    step: usize,
    mask: usize,
}

impl UnitProbe {
    pub(crate) fn new(home: usize, mask: usize) -> Self {
        UnitProbe { idx: home, step: 0, mask }
    }
}

impl Iterator for UnitProbe {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        let cur = self.idx;
        self.step += 1;
        self.idx = (self.idx.wrapping_add(self.step)) & self.mask;
        Some(cur)
    }
}

/// Group-step triangular probe used by DenseMap: jump `k` grows by one
/// 16-slot group each time, so every yielded index stays 16-aligned.
pub(crate) struct GroupProbe {
    idx: usize,
    step: usize,
    mask: usize,
}

impl GroupProbe {
    pub(crate) fn new(home_group: usize, mask: usize) -> Self {
        debug_assert_eq!(home_group % 16, 0);
        GroupProbe { idx: home_group, step: 0, mask }
    }
}

impl Iterator for GroupProbe {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        let cur = self.idx;
        self.step += 1;
        self.idx = (self.idx.wrapping_add(self.step * 16)) & self.mask;
        Some(cur)
    }
}
