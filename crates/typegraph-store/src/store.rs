//! Fact storage over a single sorted key space.
//!
//! [`FactStore`] is the read surface the reasoner sees: typed, ordered
//! seekers over the indices laid out in [`crate::encoding`]. [`MemoryStore`]
//! keeps every key in one `BTreeSet` behind a lock; its cursors re-enter the
//! set on each step, so they never pin the lock between calls and writes
//! made by others become visible to cursors that have not yet passed them.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use typegraph_pattern::{Concept, ConceptId, Label, Value};

use crate::encoding::{self, read_concept, read_label};
use crate::error::StoreError;
use crate::seeker::{Converter, Seeker};

pub type BoxSeeker<T> = Box<dyn Seeker<Item = T>>;

pub trait FactStore: Send + Sync {
    /// Things whose type is exactly `label`, ascending by id.
    fn things(&self, label: &Label) -> BoxSeeker<Concept>;

    fn type_of(&self, thing: ConceptId) -> Result<Option<Label>, StoreError>;

    /// Player tuples of relations of exactly `label`, ordered by the player
    /// at `position`. With `player`, only tuples where that position holds it.
    fn relations(
        &self,
        label: &Label,
        position: usize,
        player: Option<&Concept>,
    ) -> Result<BoxSeeker<Vec<Concept>>, StoreError>;

    /// Values of `attribute` owned by `owner`, ascending.
    fn attributes(&self, owner: ConceptId, attribute: &Label) -> BoxSeeker<Concept>;

    /// Distinct values of `attribute` owned by anything, ascending.
    fn attribute_values(&self, attribute: &Label) -> BoxSeeker<Concept>;

    /// Owners of `attribute` with exactly `value`, ascending.
    fn owners(&self, attribute: &Label, value: &Value) -> BoxSeeker<Concept>;

    /// Whether any fact is stored under exactly `label`.
    fn has_instances(&self, label: &Label) -> Result<bool, StoreError>;

    /// Incremented by every write.
    fn generation(&self) -> u64;
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Default)]
struct Inner {
    keys: RwLock<BTreeSet<Vec<u8>>>,
    next_id: AtomicU64,
    generation: AtomicU64,
    open_cursors: AtomicUsize,
    fail_reads: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_thing(&self, label: &Label) -> ConceptId {
        let id = ConceptId::new(self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.write([
            encoding::type_index_key(label, id),
            encoding::thing_type_key(id, label),
        ]);
        tracing::debug!(thing = %id, label = %label, "inserted thing");
        id
    }

    /// Store one relation tuple, indexed once per player position.
    pub fn insert_relation(&self, label: &Label, players: &[Concept]) -> Result<(), StoreError> {
        if players.is_empty() || players.len() > usize::from(u8::MAX) + 1 {
            return Err(StoreError::NoSuchPosition {
                relation: label.clone(),
                position: players.len(),
            });
        }
        let keys: Vec<Vec<u8>> = (0..players.len())
            .map(|pos| encoding::relation_key(label, pos as u8, players))
            .collect();
        self.write(keys);
        tracing::debug!(label = %label, arity = players.len(), "inserted relation");
        Ok(())
    }

    pub fn insert_has(&self, owner: ConceptId, attribute: &Label, value: Value) {
        self.write([
            encoding::has_owner_key(owner, attribute, &value),
            encoding::has_value_key(attribute, &value, owner),
        ]);
        tracing::debug!(owner = %owner, attribute = %attribute, value = %value, "inserted ownership");
    }

    /// Cursors created and not yet recycled or dropped.
    pub fn open_cursors(&self) -> usize {
        self.inner.open_cursors.load(Ordering::SeqCst)
    }

    /// Make every subsequent cursor step fail as if storage were unreachable.
    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn key_count(&self) -> usize {
        self.inner.keys.read().len()
    }

    /// Raw ordered keys under `prefix`.
    pub fn scan(&self, prefix: Vec<u8>) -> KeySeeker {
        KeySeeker::new(self.inner.clone(), prefix)
    }

    fn write(&self, keys: impl IntoIterator<Item = Vec<u8>>) {
        let mut set = self.inner.keys.write();
        let mut changed = false;
        for key in keys {
            changed |= set.insert(key);
        }
        if changed {
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn any(&self, prefix: Vec<u8>) -> Result<bool, StoreError> {
        let mut cursor = self.scan(prefix);
        if !cursor.has_next() {
            return Ok(false);
        }
        cursor.peek().map(|_| true)
    }

    fn decoded<T: 'static>(
        &self,
        prefix: Vec<u8>,
        decode: impl Fn(&[u8]) -> Result<T, StoreError> + 'static,
        encode: impl Fn(&T) -> Vec<u8> + 'static,
    ) -> DecodeSeeker<T> {
        DecodeSeeker {
            keys: self.scan(prefix),
            decode: Box::new(decode),
            encode: Box::new(encode),
            after: None,
            peeked: None,
        }
    }
}

impl FactStore for MemoryStore {
    fn things(&self, label: &Label) -> BoxSeeker<Concept> {
        let prefix = encoding::type_index_prefix(label);
        let offset = prefix.len();
        let owned = label.clone();
        Box::new(self.decoded(
            prefix,
            move |key| read_concept(key, offset).map(|(c, _)| c),
            move |concept| {
                let mut key = encoding::type_index_prefix(&owned);
                encoding::write_concept(&mut key, concept);
                key
            },
        ))
    }

    fn type_of(&self, thing: ConceptId) -> Result<Option<Label>, StoreError> {
        let prefix = encoding::thing_type_prefix(thing);
        let offset = prefix.len();
        let mut cursor = self.scan(prefix);
        if !cursor.has_next() {
            return Ok(None);
        }
        let key = cursor.next()?;
        read_label(&key, offset).map(|(label, _)| Some(label))
    }

    fn relations(
        &self,
        label: &Label,
        position: usize,
        player: Option<&Concept>,
    ) -> Result<BoxSeeker<Vec<Concept>>, StoreError> {
        let pos = u8::try_from(position).map_err(|_| StoreError::NoSuchPosition {
            relation: label.clone(),
            position,
        })?;
        let prefix = match player {
            Some(p) => encoding::relation_player_prefix(label, pos, p),
            None => encoding::relation_prefix(label, pos),
        };
        let (decode_label, encode_label) = (label.clone(), label.clone());
        Ok(Box::new(self.decoded(
            prefix,
            move |key| encoding::decode_relation_players(key, &decode_label),
            move |players| encoding::relation_key(&encode_label, pos, players),
        )))
    }

    fn attributes(&self, owner: ConceptId, attribute: &Label) -> BoxSeeker<Concept> {
        let prefix = encoding::has_owner_prefix(owner, attribute);
        let offset = prefix.len();
        let seek_prefix = prefix.clone();
        Box::new(self.decoded(
            prefix,
            move |key| read_concept(key, offset).map(|(c, _)| c),
            move |value| {
                let mut key = seek_prefix.clone();
                encoding::write_concept(&mut key, value);
                key
            },
        ))
    }

    fn attribute_values(&self, attribute: &Label) -> BoxSeeker<Concept> {
        let prefix = encoding::has_value_prefix(attribute);
        let (decode_label, encode_label) = (attribute.clone(), attribute.clone());
        let mut seeker = self.decoded(
            prefix.clone(),
            move |key| encoding::decode_has_value(key, &decode_label).map(|(value, _)| value),
            move |value| {
                let mut key = encoding::has_value_prefix(&encode_label);
                encoding::write_concept(&mut key, value);
                key
            },
        );
        // Owner encodings start with the thing tag; anything above it is past
        // every owner of the value just emitted.
        seeker.after = Some(Box::new(move |value| {
            let mut key = prefix.clone();
            encoding::write_concept(&mut key, value);
            key.push(u8::MAX);
            key
        }));
        Box::new(seeker)
    }

    fn owners(&self, attribute: &Label, value: &Value) -> BoxSeeker<Concept> {
        let prefix = encoding::has_value_owner_prefix(attribute, value);
        let offset = prefix.len();
        let seek_prefix = prefix.clone();
        Box::new(self.decoded(
            prefix,
            move |key| read_concept(key, offset).map(|(c, _)| c),
            move |owner| {
                let mut key = seek_prefix.clone();
                encoding::write_concept(&mut key, owner);
                key
            },
        ))
    }

    fn has_instances(&self, label: &Label) -> Result<bool, StoreError> {
        Ok(self.any(encoding::type_index_prefix(label))?
            || self.any(encoding::relation_prefix(label, 0))?
            || self.any(encoding::has_value_prefix(label))?)
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Cursors
// ============================================================================

/// Ordered cursor over the raw keys under a prefix.
pub struct KeySeeker {
    inner: Arc<Inner>,
    prefix: Vec<u8>,
    from: Bound<Vec<u8>>,
    /// `None` until the next key has been looked up.
    current: Option<Result<Option<Vec<u8>>, StoreError>>,
}

impl KeySeeker {
    fn new(inner: Arc<Inner>, prefix: Vec<u8>) -> Self {
        inner.open_cursors.fetch_add(1, Ordering::SeqCst);
        Self {
            inner,
            from: Bound::Included(prefix.clone()),
            prefix,
            current: None,
        }
    }

    fn fetch(&mut self) -> &Result<Option<Vec<u8>>, StoreError> {
        if self.current.is_none() {
            let found = if self.inner.fail_reads.load(Ordering::SeqCst) {
                Err(StoreError::Unavailable("reads are disabled".to_string()))
            } else {
                let keys = self.inner.keys.read();
                Ok(keys
                    .range((self.from.clone(), Bound::Unbounded))
                    .next()
                    .filter(|k| k.starts_with(&self.prefix))
                    .cloned())
            };
            self.current = Some(found);
        }
        self.current.get_or_insert(Ok(None))
    }

    /// Move to the first key `>= key`. Never moves backwards.
    pub fn seek_key(&mut self, key: &[u8]) -> bool {
        let behind = match self.fetch() {
            Ok(Some(current)) => current.as_slice() < key,
            Ok(None) => return false,
            Err(_) => return true,
        };
        if behind {
            self.from = Bound::Included(key.to_vec());
            self.current = None;
        }
        self.has_next()
    }
}

impl Seeker for KeySeeker {
    type Item = Vec<u8>;

    fn has_next(&mut self) -> bool {
        !matches!(self.fetch(), Ok(None))
    }

    fn peek(&mut self) -> Result<&Vec<u8>, StoreError> {
        match self.fetch() {
            Ok(Some(key)) => Ok(key),
            Ok(None) => Err(StoreError::ExhaustedIterator),
            Err(e) => Err(e.clone()),
        }
    }

    fn next(&mut self) -> Result<Vec<u8>, StoreError> {
        let key = match self.fetch() {
            Ok(Some(key)) => key.clone(),
            Ok(None) => return Err(StoreError::ExhaustedIterator),
            Err(e) => return Err(e.clone()),
        };
        self.from = Bound::Excluded(key.clone());
        self.current = None;
        Ok(key)
    }

    fn try_seek(&mut self, target: &Vec<u8>, converter: Converter<'_, Vec<u8>>) -> bool {
        let key = converter(target);
        self.seek_key(&key)
    }

    fn recycle(self: Box<Self>) {}
}

impl Drop for KeySeeker {
    fn drop(&mut self) {
        self.inner.open_cursors.fetch_sub(1, Ordering::SeqCst);
    }
}

type Decode<T> = Box<dyn Fn(&[u8]) -> Result<T, StoreError>>;
type Encode<T> = Box<dyn Fn(&T) -> Vec<u8>>;

/// Decodes the keys of a [`KeySeeker`] into typed items.
///
/// Seeking ignores the caller's converter and positions the underlying
/// cursor at the key the target would be stored under; index layouts are
/// chosen so that this agrees with the concept encoding order.
pub struct DecodeSeeker<T> {
    keys: KeySeeker,
    decode: Decode<T>,
    encode: Encode<T>,
    /// Key to skip to after emitting an item, for distinct projections.
    after: Option<Encode<T>>,
    peeked: Option<T>,
}

impl<T> Seeker for DecodeSeeker<T> {
    type Item = T;

    fn has_next(&mut self) -> bool {
        self.peeked.is_some() || self.keys.has_next()
    }

    fn peek(&mut self) -> Result<&T, StoreError> {
        if self.peeked.is_none() {
            let key = self.keys.peek()?;
            let item = (self.decode)(key)?;
            self.peeked = Some(item);
        }
        self.peeked.as_ref().ok_or(StoreError::ExhaustedIterator)
    }

    fn next(&mut self) -> Result<T, StoreError> {
        self.peek()?;
        let item = self.peeked.take().ok_or(StoreError::ExhaustedIterator)?;
        self.keys.next()?;
        if let Some(after) = &self.after {
            self.keys.seek_key(&after(&item));
        }
        Ok(item)
    }

    fn try_seek(&mut self, target: &T, _converter: Converter<'_, T>) -> bool {
        let target_key = (self.encode)(target);
        if let Some(peeked) = &self.peeked {
            if (self.encode)(peeked) >= target_key {
                return true;
            }
            self.peeked = None;
        }
        self.keys.seek_key(&target_key)
    }

    fn recycle(self: Box<Self>) {}
}
