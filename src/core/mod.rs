// Core modules implementing values, sections, stores, aliases, and error modeling.
pub mod alias;
pub mod buffer;
pub mod error;
pub mod key;
pub mod reclaim;
pub mod section;
pub mod store;
pub mod value;
