use std::ops::Range;

/// A cell of a [`CompactHeightfield`](crate::CompactHeightfield), referencing
/// the contiguous run of compact spans in its column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactCell {
    index: u32,
    count: u8,
}

impl CompactCell {
    /// Index of the first span of this cell in the span array.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub(crate) fn set_index(&mut self, index: u32) {
        self.index = index;
    }

    /// Number of spans in this cell.
    #[inline]
    pub fn count(&self) -> u8 {
        self.count
    }

    #[inline]
    pub(crate) fn set_count(&mut self, count: u8) {
        self.count = count;
    }

    #[inline]
    pub(crate) fn inc_count(&mut self) {
        self.count += 1;
    }

    /// The range of span indices belonging to this cell.
    #[inline]
    pub fn index_range(&self) -> Range<usize> {
        let start = self.index as usize;
        start..start + self.count as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_range_covers_all_spans() {
        let mut cell = CompactCell::default();
        cell.set_index(10);
        cell.set_count(3);
        assert_eq!(cell.index_range(), 10..13);
        cell.inc_count();
        assert_eq!(cell.index_range(), 10..14);
    }
}
