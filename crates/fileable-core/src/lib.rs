//! # fileable-core
//!
//! Core types, traits, and configuration for fileable.
//!
//! This crate provides the building blocks shared by the other crates:
//! - Identifier types
//! - Owner capability (`FileOwner`) and the stored owner reference (`OwnerRef`)
//! - Entity trait (Identifiable)
//! - File and disk configuration

pub mod config;
pub mod traits;

pub use config::*;
pub use traits::*;
