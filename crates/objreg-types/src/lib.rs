//! Foundation types for the objreg object store.
//!
//! Everything the store persists is an [`Object`]: a structured value with an
//! identity made of namespace, kind and name. This crate defines that
//! identity, the [`ResourceVersion`] stamped onto stored objects, the
//! [`StorageKey`] an identity maps to, and the [`codec`] that turns objects
//! into payload bytes and back.
//!
//! # Key layout
//!
//! ```text
//! /registrys/{namespace}/{kind-lowercased}/{name}
//! ```
//!
//! Segments are percent-escaped so that `/`, `+` and `%` inside a component
//! can never be mistaken for a separator.

pub mod codec;
pub mod error;
pub mod identity;
pub mod key;
pub mod object;
pub mod version;

pub use codec::{decode, encode};
pub use error::{TypeError, TypeResult};
pub use identity::{Identity, ObjectMeta};
pub use key::{KeyPrefix, StorageKey, KEY_ROOT, VERSION_SEPARATOR};
pub use object::{Object, ObjectList, Unstructured};
pub use version::{ResourceVersion, Sequence};
