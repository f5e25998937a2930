//! # jotdb ODM
//!
//! Typed object-document mapping over the jotdb core engine.
//!
//! This crate provides:
//! - The [`Model`] trait: typed documents mapped 1:1 to collections
//! - Collection-name derivation (snake_case + pluralisation)
//! - Django-style lookup operators through [`Filter`]
//! - Lazily-loaded, cache-backed relationships: [`ForeignKey`],
//!   [`RelatedSet`], [`ManyToMany`]
//! - Transaction proxies onto the bound database
//!
//! Models share one process-wide database binding, set with
//! [`bind_database`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod lookup;
mod model;
mod naming;
mod relations;

pub use error::{OdmError, OdmResult};
pub use lookup::Filter;
pub use model::{
    begin, bind_database, bound_database, commit, from_document, rollback, to_document,
    transaction, unbind_database, Model, Paginated,
};
pub use relations::{FkCache, ForeignKey, ManyToMany, RelatedSet};

// Re-exported so model declarations need only this crate.
pub use jotdb_core::{Database, DocId, Document};
