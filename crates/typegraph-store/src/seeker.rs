//! Seeker: ordered, seekable, recyclable iteration.
//!
//! A seeker produces values in strictly ascending order under a byte
//! encoding supplied by the caller (the *converter*). Because every index in
//! the store is ordered by its encoded key, several seekers over the same
//! variable can be joined by repeatedly seeking the lagging cursor to the
//! position of the leading one (leapfrog / merge-join), skipping whole runs
//! of non-matching keys instead of scanning them.
//!
//! Invariants:
//! - values come out in ascending converter order;
//! - `try_seek` never rewinds: a target at or behind the current position
//!   is a no-op;
//! - a seeker is single-owner and sequential; it is not `Sync`;
//! - `recycle` consumes the seeker, releasing any pooled storage cursor;
//! - a read failure is never mistaken for exhaustion: `has_next` stays true
//!   and `peek`/`next` return the error.

use crate::error::StoreError;

/// Byte encoding used to order and seek a seeker's values.
pub type Converter<'a, T> = &'a dyn Fn(&T) -> Vec<u8>;

pub trait Seeker {
    type Item;

    /// Whether another value can be produced.
    fn has_next(&mut self) -> bool;

    /// The next value, without advancing. Idempotent.
    fn peek(&mut self) -> Result<&Self::Item, StoreError>;

    /// Return the next value and advance past it.
    #[allow(clippy::should_implement_trait)]
    fn next(&mut self) -> Result<Self::Item, StoreError>;

    /// Advance past every value ordered strictly before `target`.
    ///
    /// Returns `true` iff the seeker now points at a value `>= target`.
    fn try_seek(&mut self, target: &Self::Item, converter: Converter<'_, Self::Item>) -> bool;

    /// Release pooled resources. The seeker cannot be used afterwards.
    fn recycle(self: Box<Self>);
}

/// Drain a seeker into a vector, recycling it afterwards.
pub fn collect<'a, T>(mut seeker: Box<dyn Seeker<Item = T> + 'a>) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    while seeker.has_next() {
        out.push(seeker.next()?);
    }
    seeker.recycle();
    Ok(out)
}

// ============================================================================
// VecSeeker
// ============================================================================

/// A seeker over an already-sorted vector.
#[derive(Debug, Clone)]
pub struct VecSeeker<T> {
    items: Vec<T>,
    position: usize,
}

impl<T> VecSeeker<T> {
    /// `items` must be ascending under the converter later passed to
    /// `try_seek`.
    pub fn new(items: Vec<T>) -> Self {
        Self { items, position: 0 }
    }

    /// Sort `items` by `converter` and drop duplicates.
    pub fn sorted(mut items: Vec<T>, converter: Converter<'_, T>) -> Self {
        items.sort_by_cached_key(|item| converter(item));
        items.dedup_by(|a, b| converter(a) == converter(b));
        Self::new(items)
    }
}

impl<T: Clone> Seeker for VecSeeker<T> {
    type Item = T;

    fn has_next(&mut self) -> bool {
        self.position < self.items.len()
    }

    fn peek(&mut self) -> Result<&T, StoreError> {
        self.items
            .get(self.position)
            .ok_or(StoreError::ExhaustedIterator)
    }

    fn next(&mut self) -> Result<T, StoreError> {
        let item = self
            .items
            .get(self.position)
            .cloned()
            .ok_or(StoreError::ExhaustedIterator)?;
        self.position += 1;
        Ok(item)
    }

    fn try_seek(&mut self, target: &T, converter: Converter<'_, T>) -> bool {
        let target_key = converter(target);
        let remaining = &self.items[self.position..];
        let skip = remaining.partition_point(|item| converter(item) < target_key);
        self.position += skip;
        self.has_next()
    }

    fn recycle(self: Box<Self>) {}
}

// ============================================================================
// UnionSeeker
// ============================================================================

/// Ascending k-way merge of several seekers, emitting each distinct value
/// once.
pub struct UnionSeeker<'c, T> {
    children: Vec<Box<dyn Seeker<Item = T> + 'c>>,
    converter: Box<dyn Fn(&T) -> Vec<u8> + 'c>,
    current: Option<usize>,
    failed: Option<StoreError>,
}

impl<'c, T> UnionSeeker<'c, T> {
    pub fn new(
        children: Vec<Box<dyn Seeker<Item = T> + 'c>>,
        converter: impl Fn(&T) -> Vec<u8> + 'c,
    ) -> Self {
        Self {
            children,
            converter: Box::new(converter),
            current: None,
            failed: None,
        }
    }

    /// Index of the child holding the smallest next value. A child that
    /// fails to read is selected so its error surfaces.
    fn select(&mut self) -> Option<usize> {
        if let Some(i) = self.current {
            return Some(i);
        }
        let mut best: Option<(usize, Vec<u8>)> = None;
        for (i, child) in self.children.iter_mut().enumerate() {
            if !child.has_next() {
                continue;
            }
            let value = match child.peek() {
                Ok(value) => value,
                Err(e) => {
                    self.failed = Some(e);
                    self.current = Some(i);
                    return self.current;
                }
            };
            let key = (self.converter)(value);
            let better = match &best {
                None => true,
                Some((_, best_key)) => key < *best_key,
            };
            if better {
                best = Some((i, key));
            }
        }
        self.current = best.map(|(i, _)| i);
        self.current
    }
}

impl<'c, T> Seeker for UnionSeeker<'c, T> {
    type Item = T;

    fn has_next(&mut self) -> bool {
        self.failed.is_some() || self.select().is_some()
    }

    fn peek(&mut self) -> Result<&T, StoreError> {
        let i = self.select().ok_or(StoreError::ExhaustedIterator)?;
        if let Some(e) = &self.failed {
            return Err(e.clone());
        }
        self.children[i].peek()
    }

    fn next(&mut self) -> Result<T, StoreError> {
        let i = self.select().ok_or(StoreError::ExhaustedIterator)?;
        if let Some(e) = &self.failed {
            return Err(e.clone());
        }
        let value = self.children[i].next()?;
        let key = (self.converter)(&value);
        // Skip the same value in the other children.
        for child in self.children.iter_mut() {
            while child.has_next() {
                let same = match child.peek() {
                    Ok(other) => (self.converter)(other) == key,
                    Err(e) => {
                        // `value` is still good; the failure surfaces next read.
                        self.failed = Some(e);
                        break;
                    }
                };
                if !same {
                    break;
                }
                child.next()?;
            }
        }
        self.current = None;
        Ok(value)
    }

    fn try_seek(&mut self, target: &T, converter: Converter<'_, T>) -> bool {
        if self.failed.is_some() {
            return true;
        }
        for child in self.children.iter_mut() {
            child.try_seek(target, converter);
        }
        self.current = None;
        self.has_next()
    }

    fn recycle(self: Box<Self>) {
        for child in self.children {
            child.recycle();
        }
    }
}

// ============================================================================
// IntersectSeeker
// ============================================================================

/// Leapfrog intersection: emits the values present in every child.
pub struct IntersectSeeker<'c, T> {
    children: Vec<Box<dyn Seeker<Item = T> + 'c>>,
    converter: Box<dyn Fn(&T) -> Vec<u8> + 'c>,
    aligned: Option<bool>,
    failed: Option<StoreError>,
}

impl<'c, T: Clone> IntersectSeeker<'c, T> {
    pub fn new(
        children: Vec<Box<dyn Seeker<Item = T> + 'c>>,
        converter: impl Fn(&T) -> Vec<u8> + 'c,
    ) -> Self {
        Self {
            children,
            converter: Box::new(converter),
            aligned: None,
            failed: None,
        }
    }

    /// Seek every child to the largest current value until all children
    /// agree, or one runs out. A failed read also stops the search and
    /// counts as aligned so the error reaches the caller.
    fn align(&mut self) -> bool {
        if self.failed.is_some() {
            return true;
        }
        if let Some(aligned) = self.aligned {
            return aligned;
        }
        let aligned = 'search: loop {
            if self.children.is_empty() {
                break false;
            }
            let mut max: Option<(T, Vec<u8>)> = None;
            for child in self.children.iter_mut() {
                if !child.has_next() {
                    break 'search false;
                }
                let value = match child.peek() {
                    Ok(value) => value,
                    Err(e) => {
                        self.failed = Some(e);
                        break 'search true;
                    }
                };
                let key = (self.converter)(value);
                if max.as_ref().map_or(true, |(_, max_key)| key > *max_key) {
                    max = Some((value.clone(), key));
                }
            }
            let Some((target, target_key)) = max else {
                break false;
            };
            let mut all_at_target = true;
            for child in self.children.iter_mut() {
                if !child.try_seek(&target, &*self.converter) {
                    break 'search false;
                }
                let at_target = match child.peek() {
                    Ok(value) => (self.converter)(value) == target_key,
                    Err(e) => {
                        self.failed = Some(e);
                        break 'search true;
                    }
                };
                all_at_target &= at_target;
            }
            if all_at_target {
                break true;
            }
        };
        self.aligned = Some(aligned);
        aligned
    }
}

impl<'c, T: Clone> Seeker for IntersectSeeker<'c, T> {
    type Item = T;

    fn has_next(&mut self) -> bool {
        self.align()
    }

    fn peek(&mut self) -> Result<&T, StoreError> {
        if !self.align() {
            return Err(StoreError::ExhaustedIterator);
        }
        if let Some(e) = &self.failed {
            return Err(e.clone());
        }
        self.children[0].peek()
    }

    fn next(&mut self) -> Result<T, StoreError> {
        if !self.align() {
            return Err(StoreError::ExhaustedIterator);
        }
        if let Some(e) = &self.failed {
            return Err(e.clone());
        }
        let mut value = None;
        for child in self.children.iter_mut() {
            value = Some(child.next()?);
        }
        self.aligned = None;
        value.ok_or(StoreError::ExhaustedIterator)
    }

    fn try_seek(&mut self, target: &T, converter: Converter<'_, T>) -> bool {
        if self.failed.is_some() {
            return true;
        }
        for child in self.children.iter_mut() {
            child.try_seek(target, converter);
        }
        self.aligned = None;
        self.align()
    }

    fn recycle(self: Box<Self>) {
        for child in self.children {
            child.recycle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn be(v: &u32) -> Vec<u8> {
        v.to_be_bytes().to_vec()
    }

    fn boxed(items: Vec<u32>) -> Box<dyn Seeker<Item = u32>> {
        Box::new(VecSeeker::new(items))
    }

    #[test]
    fn peek_is_idempotent_and_exhaustion_is_reported() {
        let mut s = VecSeeker::new(vec![1u32, 2]);
        assert_eq!(*s.peek().unwrap(), 1);
        assert_eq!(*s.peek().unwrap(), 1);
        assert_eq!(s.next().unwrap(), 1);
        assert_eq!(s.next().unwrap(), 2);
        assert!(!s.has_next());
        assert_eq!(s.peek().unwrap_err(), StoreError::ExhaustedIterator);
        assert_eq!(s.next().unwrap_err(), StoreError::ExhaustedIterator);
    }

    #[test]
    fn seek_never_rewinds() {
        let mut s = VecSeeker::new(vec![1u32, 4, 9, 12]);
        assert!(s.try_seek(&5, &be));
        assert_eq!(*s.peek().unwrap(), 9);
        assert!(s.try_seek(&2, &be));
        assert_eq!(*s.peek().unwrap(), 9);
        assert!(!s.try_seek(&13, &be));
    }

    /// Yields `items`, then fails every read.
    struct Failing {
        items: VecSeeker<u32>,
    }

    impl Seeker for Failing {
        type Item = u32;

        fn has_next(&mut self) -> bool {
            true
        }

        fn peek(&mut self) -> Result<&u32, StoreError> {
            if !self.items.has_next() {
                return Err(StoreError::Unavailable("disk gone".into()));
            }
            self.items.peek()
        }

        fn next(&mut self) -> Result<u32, StoreError> {
            if !self.items.has_next() {
                return Err(StoreError::Unavailable("disk gone".into()));
            }
            self.items.next()
        }

        fn try_seek(&mut self, target: &u32, converter: Converter<'_, u32>) -> bool {
            self.items.try_seek(target, converter);
            true
        }

        fn recycle(self: Box<Self>) {}
    }

    fn failing(items: Vec<u32>) -> Box<dyn Seeker<Item = u32>> {
        Box::new(Failing {
            items: VecSeeker::new(items),
        })
    }

    fn drain(seeker: &mut dyn Seeker<Item = u32>) -> (Vec<u32>, Option<StoreError>) {
        let mut out = Vec::new();
        while seeker.has_next() {
            match seeker.next() {
                Ok(v) => out.push(v),
                Err(e) => return (out, Some(e)),
            }
        }
        (out, None)
    }

    #[test]
    fn union_reports_a_failing_child_instead_of_ending() {
        let mut u = UnionSeeker::new(vec![boxed(vec![1, 5, 9]), failing(vec![2])], be);
        let (out, err) = drain(&mut u);
        assert_eq!(out, vec![1, 2]);
        assert!(matches!(err, Some(StoreError::Unavailable(_))));
        assert!(u.has_next());
        assert!(matches!(u.peek(), Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn intersect_reports_a_failing_child_instead_of_ending() {
        let mut i = IntersectSeeker::new(vec![boxed(vec![3, 7, 11]), failing(vec![3])], be);
        let (out, err) = drain(&mut i);
        assert_eq!(out, vec![3]);
        assert!(matches!(err, Some(StoreError::Unavailable(_))));

        let mut i = IntersectSeeker::new(vec![boxed(vec![3, 7]), failing(vec![])], be);
        assert!(i.try_seek(&7, &be));
        assert!(matches!(i.next(), Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn union_merges_and_deduplicates() {
        let mut u = UnionSeeker::new(vec![boxed(vec![1, 5, 9]), boxed(vec![2, 5, 10])], be);
        let mut out = Vec::new();
        while u.has_next() {
            out.push(u.next().unwrap());
        }
        assert_eq!(out, vec![1, 2, 5, 9, 10]);
    }

    #[test]
    fn intersect_leapfrogs_to_common_values() {
        let mut i = IntersectSeeker::new(
            vec![
                boxed(vec![1, 3, 4, 7, 8, 11]),
                boxed(vec![3, 7, 11, 15]),
                boxed(vec![2, 3, 5, 7, 11]),
            ],
            be,
        );
        let mut out = Vec::new();
        while i.has_next() {
            out.push(i.next().unwrap());
        }
        assert_eq!(out, vec![3, 7, 11]);
    }

    #[test]
    fn intersect_seek_skips_ahead() {
        let mut i = IntersectSeeker::new(vec![boxed(vec![1, 3, 7, 11]), boxed(vec![3, 7, 11])], be);
        assert!(i.try_seek(&4, &be));
        assert_eq!(*i.peek().unwrap(), 7);
        Box::new(i).recycle();
    }
}
