//! Patch serialization for save/load functionality.
//!
//! A patch records what the control plane did to build a graph: the
//! instances with their config words, the input constants that differ from
//! the defaults, table writes, the links and the root. Ports are stored by
//! name so a patch survives port renumbering within a module kind.

use std::collections::HashMap;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dsp::{InputPort, OutputPort, PortDefinition, PortDirection, SignalHint};
use crate::engine::{ControlError, InstanceHandle, PatchController, PortRef};

/// Current patch format version.
/// Increment this when making breaking changes to the format.
pub const PATCH_VERSION: u32 = 1;

/// A complete patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub name: String,
    pub version: u32,
    pub nodes: Vec<NodeData>,
    pub connections: Vec<ConnectionData>,
    /// Output the host plays.
    #[serde(default)]
    pub root: Option<PortAddress>,
}

impl Patch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: PATCH_VERSION,
            nodes: Vec::new(),
            connections: Vec::new(),
            root: None,
        }
    }

    /// Check if this patch version is compatible with the current format.
    pub fn is_compatible(&self) -> bool {
        self.version <= PATCH_VERSION
    }
}

impl Default for Patch {
    fn default() -> Self {
        Self::new("Untitled")
    }
}

/// Port of a module kind, by name.
///
/// Ports in a repeated group share a name and are told apart by `group`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortName {
    pub port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<u16>,
}

impl PortName {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            group: None,
        }
    }

    pub fn grouped(port: impl Into<String>, group: u16) -> Self {
        Self {
            port: port.into(),
            group: Some(group),
        }
    }

    fn of(definition: &PortDefinition) -> Self {
        Self {
            port: definition.id.to_string(),
            group: definition.group_index,
        }
    }

    fn resolve(
        &self,
        ports: &[PortDefinition],
        direction: PortDirection,
        module_id: u32,
    ) -> Result<usize, PatchError> {
        ports
            .iter()
            .position(|p| {
                p.direction == direction && p.id == self.port && p.group_index == self.group
            })
            .ok_or_else(|| PatchError::UnknownPort {
                module_id,
                port: self.clone(),
            })
    }
}

impl std::fmt::Display for PortName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.group {
            Some(group) => write!(f, "{}[{}]", self.port, group),
            None => f.write_str(&self.port),
        }
    }
}

/// A port on one node of the patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortAddress {
    pub node: u64,
    #[serde(flatten)]
    pub port: PortName,
}

/// Serialized data for a single node in the patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    /// Identifier within the patch, used by connections.
    pub id: u64,
    /// Registered module kind id.
    pub module_id: u32,
    /// Kind name, informational only.
    #[serde(default)]
    pub module_name: String,
    #[serde(default)]
    pub config: u32,
    /// Input constants that differ from the port defaults.
    #[serde(default)]
    pub values: Vec<PortValue>,
    /// Table writes in the order they were made.
    #[serde(default)]
    pub tables: Vec<TableData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortValue {
    #[serde(flatten)]
    pub port: PortName,
    pub value: i16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableData {
    pub offset: usize,
    pub data: Vec<i16>,
}

/// Serialized data for a connection between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionData {
    pub from: PortAddress,
    pub to: PortAddress,
}

/// Error type for patch operations.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Incompatible patch version: found {found}, expected <= {expected}")]
    IncompatibleVersion { found: u32, expected: u32 },
    #[error("Unknown module type: {0}")]
    UnknownModule(u32),
    #[error("Module {module_id} has no port {port}")]
    UnknownPort { module_id: u32, port: PortName },
    #[error("Node {0} is not in the patch")]
    UnknownNode(u64),
    #[error(transparent)]
    Control(#[from] ControlError),
}

/// Save a patch to a JSON file.
pub fn save_to_file(patch: &Patch, path: &Path) -> Result<(), PatchError> {
    let json = serde_json::to_string_pretty(patch)?;
    std::fs::write(path, json)?;
    info!("saved patch '{}' to {}", patch.name, path.display());
    Ok(())
}

/// Load a patch from a JSON file.
pub fn load_from_file(path: &Path) -> Result<Patch, PatchError> {
    let json = std::fs::read_to_string(path)?;
    let patch: Patch = serde_json::from_str(&json)?;

    if !patch.is_compatible() {
        return Err(PatchError::IncompatibleVersion {
            found: patch.version,
            expected: PATCH_VERSION,
        });
    }

    info!("loaded patch '{}' from {}", patch.name, path.display());
    Ok(patch)
}

impl PatchController<'_> {
    /// Captures the current patch.
    ///
    /// Trigger inputs are left out: a restored trigger constant would read
    /// as a fresh start.
    pub fn to_patch(&self, name: impl Into<String>) -> Patch {
        let mut patch = Patch::new(name);

        for handle in self.handles() {
            let Some(record) = self.node(handle) else {
                continue;
            };
            let id = handle.to_bits();
            let module_name = self
                .registry()
                .get(record.module_id())
                .map(|d| d.info.name.to_string())
                .unwrap_or_default();

            let mut values = Vec::new();
            for (index, definition) in record.ports().iter().enumerate() {
                if definition.direction != PortDirection::Input {
                    continue;
                }
                if let Some(source) = self.source(PortRef::new(handle, index)) {
                    if let Some(from) = self.address(source) {
                        patch.connections.push(ConnectionData {
                            from,
                            to: PortAddress {
                                node: id,
                                port: PortName::of(definition),
                            },
                        });
                    }
                }
                let value = record.value(index).unwrap_or(definition.default_value);
                if definition.hint != SignalHint::Trigger && value != definition.default_value {
                    values.push(PortValue {
                        port: PortName::of(definition),
                        value,
                    });
                }
            }

            patch.nodes.push(NodeData {
                id,
                module_id: record.module_id(),
                module_name,
                config: record.config(),
                values,
                tables: record
                    .tables()
                    .iter()
                    .map(|write| TableData {
                        offset: write.offset,
                        data: write.data.clone(),
                    })
                    .collect(),
            });
        }

        patch.root = self.root().and_then(|root| self.address(root));
        patch
    }

    /// Replaces the current patch with `patch`.
    ///
    /// Returns the handle each node id was given. The whole replacement runs
    /// as one transaction: if anything in the patch fails to resolve, the
    /// running patch is left exactly as it was and keeps playing.
    pub fn load_patch(&mut self, patch: &Patch) -> Result<HashMap<u64, InstanceHandle>, PatchError> {
        if !patch.is_compatible() {
            return Err(PatchError::IncompatibleVersion {
                found: patch.version,
                expected: PATCH_VERSION,
            });
        }
        if let Some(node) = patch
            .nodes
            .iter()
            .find(|node| !self.registry().contains(node.module_id))
        {
            return Err(PatchError::UnknownModule(node.module_id));
        }

        self.transaction(|controller| {
            controller.clear()?;
            controller.build(patch)
        })
    }

    fn build(&mut self, patch: &Patch) -> Result<HashMap<u64, InstanceHandle>, PatchError> {
        let mut handles = HashMap::with_capacity(patch.nodes.len());

        for node in &patch.nodes {
            let handle = self.create(node.module_id, node.config)?;
            handles.insert(node.id, handle);

            let ports = self.ports_of(handle);
            for value in &node.values {
                let index = value.port.resolve(&ports, PortDirection::Input, node.module_id)?;
                self.set_value(handle, InputPort(index), value.value)?;
            }
            for table in &node.tables {
                self.write_table(handle, table.offset, &table.data)?;
            }
        }

        for connection in &patch.connections {
            let source = self.locate(&handles, &connection.from, PortDirection::Output)?;
            let sink = self.locate(&handles, &connection.to, PortDirection::Input)?;
            self.connect(
                source.handle,
                OutputPort(source.port),
                sink.handle,
                InputPort(sink.port),
            )?;
        }

        if let Some(root) = &patch.root {
            let root = self.locate(&handles, root, PortDirection::Output)?;
            self.set_root(Some(root))?;
        }

        debug!(
            "built patch '{}': {} nodes, {} links",
            patch.name,
            patch.nodes.len(),
            patch.connections.len()
        );
        Ok(handles)
    }

    fn address(&self, port: PortRef) -> Option<PortAddress> {
        let definition = self.node(port.handle)?.ports().get(port.port)?;
        Some(PortAddress {
            node: port.handle.to_bits(),
            port: PortName::of(definition),
        })
    }

    fn ports_of(&self, handle: InstanceHandle) -> Vec<PortDefinition> {
        self.node(handle)
            .map(|record| record.ports().to_vec())
            .unwrap_or_default()
    }

    fn locate(
        &self,
        handles: &HashMap<u64, InstanceHandle>,
        address: &PortAddress,
        direction: PortDirection,
    ) -> Result<PortRef, PatchError> {
        let handle = *handles
            .get(&address.node)
            .ok_or(PatchError::UnknownNode(address.node))?;
        let module_id = self
            .node(handle)
            .map(|record| record.module_id())
            .ok_or(PatchError::UnknownNode(address.node))?;
        let index = address
            .port
            .resolve(&self.ports_of(handle), direction, module_id)?;
        Ok(PortRef::new(handle, index))
    }
}
