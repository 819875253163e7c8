//! Order-preserving key encoding.
//!
//! Every fact is stored as one or more keys in a single sorted key space.
//! Comparing two encoded keys bytewise gives the same order as comparing the
//! decoded values, so ordered cursors can be merge-joined and seeked directly
//! on bytes.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! 0x01 label 0x00 concept                      type index: things of a type
//! 0x02 id label 0x00                           thing -> its type
//! 0x10 label 0x00 pos concept(players[pos]) concept(players[0..])
//!                                              relation, indexed by one position
//! 0x20 id label 0x00 concept(value)            ownership, by owner
//! 0x21 label 0x00 concept(value) concept(id)   ownership, by attribute value
//! ```
//!
//! Concepts are tagged (`0x01` thing, `0x02` value) so things sort before
//! values, matching `Concept`'s derived order. Longs flip the sign bit;
//! strings escape `0x00` as `0x00 0xFF` and end with `0x00 0x01`.

use byteorder::{BigEndian, ByteOrder};
use typegraph_pattern::{Concept, ConceptId, Label, Value};

use crate::error::StoreError;

pub const TYPE_INDEX: u8 = 0x01;
pub const THING_TYPE: u8 = 0x02;
pub const RELATION_BY_POSITION: u8 = 0x10;
pub const HAS_BY_OWNER: u8 = 0x20;
pub const HAS_BY_VALUE: u8 = 0x21;

const SEPARATOR: u8 = 0x00;
const STRING_ESCAPE: u8 = 0xFF;
const STRING_END: u8 = 0x01;

const CONCEPT_THING: u8 = 0x01;
const CONCEPT_VALUE: u8 = 0x02;

const VALUE_LONG: u8 = 0x01;
const VALUE_STRING: u8 = 0x02;
const VALUE_BOOLEAN: u8 = 0x03;

const SIGN_BIT: u64 = 1 << 63;

// ============================================================================
// Primitives
// ============================================================================

fn write_u64(out: &mut Vec<u8>, v: u64) {
    let mut buf = [0u8; 8];
    BigEndian::write_u64(&mut buf, v);
    out.extend_from_slice(&buf);
}

fn read_u64(bytes: &[u8], offset: usize) -> Result<(u64, usize), StoreError> {
    let end = offset + 8;
    let slice = bytes.get(offset..end).ok_or_else(|| StoreError::CorruptKey {
        offset,
        message: "truncated integer".to_string(),
    })?;
    Ok((BigEndian::read_u64(slice), end))
}

fn read_byte(bytes: &[u8], offset: usize) -> Result<u8, StoreError> {
    bytes.get(offset).copied().ok_or_else(|| StoreError::CorruptKey {
        offset,
        message: "unexpected end of key".to_string(),
    })
}

pub fn write_label(out: &mut Vec<u8>, label: &Label) {
    out.extend_from_slice(label.as_str().as_bytes());
    out.push(SEPARATOR);
}

pub fn read_label(bytes: &[u8], offset: usize) -> Result<(Label, usize), StoreError> {
    let rest = bytes.get(offset..).unwrap_or_default();
    let len = rest
        .iter()
        .position(|b| *b == SEPARATOR)
        .ok_or_else(|| StoreError::CorruptKey {
            offset,
            message: "unterminated label".to_string(),
        })?;
    let name = std::str::from_utf8(&rest[..len]).map_err(|e| StoreError::CorruptKey {
        offset,
        message: e.to_string(),
    })?;
    Ok((Label::new(name), offset + len + 1))
}

pub fn write_concept(out: &mut Vec<u8>, concept: &Concept) {
    match concept {
        Concept::Thing(id) => {
            out.push(CONCEPT_THING);
            write_u64(out, id.raw());
        }
        Concept::Value(value) => {
            out.push(CONCEPT_VALUE);
            write_value(out, value);
        }
    }
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Long(v) => {
            out.push(VALUE_LONG);
            write_u64(out, (*v as u64) ^ SIGN_BIT);
        }
        Value::String(s) => {
            out.push(VALUE_STRING);
            for b in s.as_bytes() {
                out.push(*b);
                if *b == SEPARATOR {
                    out.push(STRING_ESCAPE);
                }
            }
            out.push(SEPARATOR);
            out.push(STRING_END);
        }
        Value::Boolean(v) => {
            out.push(VALUE_BOOLEAN);
            out.push(u8::from(*v));
        }
    }
}

pub fn read_concept(bytes: &[u8], offset: usize) -> Result<(Concept, usize), StoreError> {
    match read_byte(bytes, offset)? {
        CONCEPT_THING => {
            let (raw, next) = read_u64(bytes, offset + 1)?;
            Ok((Concept::Thing(ConceptId::new(raw)), next))
        }
        CONCEPT_VALUE => {
            let (value, next) = read_value(bytes, offset + 1)?;
            Ok((Concept::Value(value), next))
        }
        tag => Err(StoreError::CorruptKey {
            offset,
            message: format!("unknown concept tag {tag:#04x}"),
        }),
    }
}

fn read_value(bytes: &[u8], offset: usize) -> Result<(Value, usize), StoreError> {
    match read_byte(bytes, offset)? {
        VALUE_LONG => {
            let (raw, next) = read_u64(bytes, offset + 1)?;
            Ok((Value::Long((raw ^ SIGN_BIT) as i64), next))
        }
        VALUE_STRING => {
            let mut buf = Vec::new();
            let mut i = offset + 1;
            loop {
                let b = read_byte(bytes, i)?;
                if b != SEPARATOR {
                    buf.push(b);
                    i += 1;
                    continue;
                }
                match read_byte(bytes, i + 1)? {
                    STRING_ESCAPE => {
                        buf.push(SEPARATOR);
                        i += 2;
                    }
                    STRING_END => {
                        i += 2;
                        break;
                    }
                    other => {
                        return Err(StoreError::CorruptKey {
                            offset: i + 1,
                            message: format!("bad string escape {other:#04x}"),
                        })
                    }
                }
            }
            let s = String::from_utf8(buf).map_err(|e| StoreError::CorruptKey {
                offset,
                message: e.to_string(),
            })?;
            Ok((Value::String(s), i))
        }
        VALUE_BOOLEAN => Ok((Value::Boolean(read_byte(bytes, offset + 1)? != 0), offset + 2)),
        tag => Err(StoreError::CorruptKey {
            offset,
            message: format!("unknown value tag {tag:#04x}"),
        }),
    }
}

/// Standalone encoding of a concept; the converter used when seeking cursors
/// whose items are concepts.
pub fn encode_concept(concept: &Concept) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    write_concept(&mut out, concept);
    out
}

// ============================================================================
// Keys
// ============================================================================

pub fn type_index_prefix(label: &Label) -> Vec<u8> {
    let mut out = vec![TYPE_INDEX];
    write_label(&mut out, label);
    out
}

pub fn type_index_key(label: &Label, id: ConceptId) -> Vec<u8> {
    let mut out = type_index_prefix(label);
    write_concept(&mut out, &Concept::Thing(id));
    out
}

pub fn thing_type_prefix(id: ConceptId) -> Vec<u8> {
    let mut out = vec![THING_TYPE];
    write_u64(&mut out, id.raw());
    out
}

pub fn thing_type_key(id: ConceptId, label: &Label) -> Vec<u8> {
    let mut out = thing_type_prefix(id);
    write_label(&mut out, label);
    out
}

/// Prefix of every relation of `label` indexed by player `position`.
pub fn relation_prefix(label: &Label, position: u8) -> Vec<u8> {
    let mut out = vec![RELATION_BY_POSITION];
    write_label(&mut out, label);
    out.push(position);
    out
}

/// Prefix of the relations of `label` whose player at `position` is `player`.
pub fn relation_player_prefix(label: &Label, position: u8, player: &Concept) -> Vec<u8> {
    let mut out = relation_prefix(label, position);
    write_concept(&mut out, player);
    out
}

pub fn relation_key(label: &Label, position: u8, players: &[Concept]) -> Vec<u8> {
    let mut out = relation_prefix(label, position);
    if let Some(indexed) = players.get(position as usize) {
        write_concept(&mut out, indexed);
    }
    for player in players {
        write_concept(&mut out, player);
    }
    out
}

/// Decode the players of a relation key produced by [`relation_key`].
pub fn decode_relation_players(key: &[u8], label: &Label) -> Result<Vec<Concept>, StoreError> {
    let header = 1 + label.as_str().len() + 1 + 1;
    let (_, mut offset) = read_concept(key, header)?;
    let mut players = Vec::new();
    while offset < key.len() {
        let (player, next) = read_concept(key, offset)?;
        players.push(player);
        offset = next;
    }
    Ok(players)
}

pub fn has_owner_prefix(owner: ConceptId, attribute: &Label) -> Vec<u8> {
    let mut out = vec![HAS_BY_OWNER];
    write_u64(&mut out, owner.raw());
    write_label(&mut out, attribute);
    out
}

pub fn has_owner_key(owner: ConceptId, attribute: &Label, value: &Value) -> Vec<u8> {
    let mut out = has_owner_prefix(owner, attribute);
    write_concept(&mut out, &Concept::Value(value.clone()));
    out
}

pub fn has_value_prefix(attribute: &Label) -> Vec<u8> {
    let mut out = vec![HAS_BY_VALUE];
    write_label(&mut out, attribute);
    out
}

pub fn has_value_owner_prefix(attribute: &Label, value: &Value) -> Vec<u8> {
    let mut out = has_value_prefix(attribute);
    write_concept(&mut out, &Concept::Value(value.clone()));
    out
}

pub fn has_value_key(attribute: &Label, value: &Value, owner: ConceptId) -> Vec<u8> {
    let mut out = has_value_owner_prefix(attribute, value);
    write_concept(&mut out, &Concept::Thing(owner));
    out
}

/// Decode `(value, owner)` from a key produced by [`has_value_key`].
pub fn decode_has_value(key: &[u8], attribute: &Label) -> Result<(Concept, Concept), StoreError> {
    let header = 1 + attribute.as_str().len() + 1;
    let (value, next) = read_concept(key, header)?;
    let (owner, _) = read_concept(key, next)?;
    Ok((value, owner))
}
