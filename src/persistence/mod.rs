//! Persistence module
//!
//! Patch save/load functionality using serde and JSON.

pub mod patch;

pub use patch::{
    load_from_file, save_to_file, ConnectionData, NodeData, Patch, PatchError, PortAddress,
    PortName, PortValue, TableData, PATCH_VERSION,
};
