//! Purpose: Define the stable public Rust API boundary for data blocks and plugins.
//! Exports: `DataBlock`, typed accessors, the plugin contract, and core value types.
//! Role: Public, additive-only surface used by the CLI, the C ABI, and Rust plugins.
//! Invariants: Callers reach storage primitives through this module, not `core` paths.

mod block;
mod plugin;
mod typed;

pub use crate::core::alias::AliasTable;
pub use crate::core::buffer::{ArrayData, Buffer, DType, Element};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::key::Key;
pub use crate::core::reclaim;
pub use crate::core::section::Section;
pub use crate::core::store::SectionedStore;
pub use crate::core::value::{OpaqueHandle, Value};
pub use block::{DataBlock, SectionView};
pub use plugin::{EntryPoint, ForeignPlugin, INIT_SYMBOL, Phase, Plugin, PluginInit, PluginInstance};
pub use typed::{ArrayRef, BlockAccessExt, Scalar};
