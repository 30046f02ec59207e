// src/model/mod.rs

//! Pipeline data model.
//!
//! - [`version`]: semantic versions and the staleness rule.
//! - [`names`]: dot-joined persisted-data addresses.
//! - [`component`]: algorithms, analyzers, regressions and their outputs.
//! - [`reference`]: dependency pointers and widening.
//! - [`factory`]: named groups of components.

pub mod component;
pub mod factory;
pub mod names;
pub mod reference;
pub mod version;

pub use component::{Component, ComponentSpec, Outputs, StateVector};
pub use factory::{Bundle, DeclaredComponent, DeclaredFactory, Factory, FactoryKind};
pub use names::NamePath;
pub use reference::{Catalog, Reference, ValueRef};
pub use version::{Version, is_stale};
