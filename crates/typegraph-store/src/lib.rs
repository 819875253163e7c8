//! Typegraph storage capabilities consumed by the reasoner.
//!
//! - `seeker`: ordered, seekable, recyclable iteration and the union /
//!   intersection combinators built on it
//! - `encoding`: order-preserving key layout for every index
//! - `schema`: the type hierarchy, its builder and version stamps
//! - `store`: the `FactStore` read surface and the in-memory `MemoryStore`

pub mod encoding;
pub mod error;
pub mod schema;
pub mod seeker;
pub mod store;

pub use error::StoreError;
pub use schema::{Schema, SchemaBuilder, TypeHierarchy, TypeKind};
pub use seeker::{collect, Converter, IntersectSeeker, Seeker, UnionSeeker, VecSeeker};
pub use store::{BoxSeeker, DecodeSeeker, FactStore, KeySeeker, MemoryStore};
