//! Provider/role/model configuration and resolution for the LLM router.
//!
//! This crate holds the config-layer types only — [`Provider`], [`Role`],
//! [`ModelSpec`], and [`ModelRegistry`]'s resolution precedence chain. Actual
//! HTTP calls, SSE parsing, and streaming live in `weave-llm`, which takes a
//! `ResolvedModel` from this crate and does the wire work.

mod error;
mod provider;
mod registry;
mod role;
mod spec;

pub use error::RegistryError;
pub use provider::{AuthStyle, Provider, WireFormat};
pub use registry::{ModelRegistry, ResolvedModel};
pub use role::{well_known, Role};
pub use spec::ModelSpec;
