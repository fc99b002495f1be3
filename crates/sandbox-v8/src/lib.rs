//! V8-isolate backend for the [`sandbox`] engine.
//!
//! Each [`sandbox::Sandbox`] handed out by [`V8Factory`] is a brand-new
//! `deno_core` runtime with its own isolate, heap ceiling, and global scope.
//! Values cross the boundary only as JSON text, so nothing on either side
//! can hold a reference into the other.

mod factory;
mod harness;
mod limits;
mod ops;
mod sandbox;

pub use factory::V8Factory;
pub use sandbox::V8Sandbox;
