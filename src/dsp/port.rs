//! Port definitions for DSP modules.
//!
//! Ports are the connection points on modules where signals flow in and out.
//! A module's port list is fixed when the instance is created; a module kind
//! may size it from its configuration word (a mixer with eight inputs).

use super::signal::SignalHint;

/// Direction of a port on a module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PortDirection {
    /// An input port that receives signals.
    Input,
    /// An output port that sends signals.
    Output,
}

impl PortDirection {
    /// Returns a human-readable name for the port direction.
    pub fn name(&self) -> &'static str {
        match self {
            PortDirection::Input => "Input",
            PortDirection::Output => "Output",
        }
    }
}

/// Definition of a port on a DSP module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortDefinition {
    /// Identifier of this port within the module.
    pub id: &'static str,
    /// Human-readable name.
    pub name: &'static str,
    /// Whether this is an input or output port.
    pub direction: PortDirection,
    /// How the 16-bit value should be interpreted.
    pub hint: SignalHint,
    /// Constant value of an input with no source. Ignored for outputs.
    pub default_value: i16,
    /// Position within a repeated group of ports sharing one id.
    pub group_index: Option<u16>,
}

impl PortDefinition {
    /// Creates an input port definition.
    pub const fn input(
        id: &'static str,
        name: &'static str,
        hint: SignalHint,
        default_value: i16,
    ) -> Self {
        Self {
            id,
            name,
            direction: PortDirection::Input,
            hint,
            default_value,
            group_index: None,
        }
    }

    /// Creates an output port definition.
    pub const fn output(id: &'static str, name: &'static str, hint: SignalHint) -> Self {
        Self {
            id,
            name,
            direction: PortDirection::Output,
            hint,
            default_value: 0,
            group_index: None,
        }
    }

    /// Marks this port as member `index` of a repeated group.
    pub const fn in_group(mut self, index: u16) -> Self {
        self.group_index = Some(index);
        self
    }

    /// Returns true if this is an input port.
    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    /// Returns true if this is an output port.
    pub fn is_output(&self) -> bool {
        self.direction == PortDirection::Output
    }

    /// Unique textual label, e.g. `"pitch"` or `"input_3"`.
    pub fn label(&self) -> String {
        match self.group_index {
            Some(index) => format!("{}_{}", self.id, index),
            None => self.id.to_string(),
        }
    }
}

/// Index of an input port, as declared by a module's port list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InputPort(pub usize);

/// Index of an output port, as declared by a module's port list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutputPort(pub usize);

impl InputPort {
    pub const fn index(self) -> usize {
        self.0
    }
}

impl OutputPort {
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Finds a port by its label.
pub fn find_port(ports: &[PortDefinition], label: &str) -> Option<usize> {
    ports.iter().position(|port| port.label() == label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_direction_names() {
        assert_eq!(PortDirection::Input.name(), "Input");
        assert_eq!(PortDirection::Output.name(), "Output");
    }

    #[test]
    fn test_input_port_creation() {
        let port = PortDefinition::input("pitch", "Pitch", SignalHint::Pitch, 18367);
        assert_eq!(port.id, "pitch");
        assert!(port.is_input());
        assert!(!port.is_output());
        assert_eq!(port.default_value, 18367);
        assert_eq!(port.label(), "pitch");
    }

    #[test]
    fn test_grouped_labels() {
        let ports = [
            PortDefinition::output("output", "Output", SignalHint::Linear),
            PortDefinition::input("input", "Input", SignalHint::Linear, 0).in_group(0),
            PortDefinition::input("input", "Input", SignalHint::Linear, 0).in_group(1),
        ];
        assert_eq!(ports[2].label(), "input_1");
        assert_eq!(find_port(&ports, "input_1"), Some(2));
        assert_eq!(find_port(&ports, "input"), None);
        assert_eq!(find_port(&ports, "output"), Some(0));
    }
}
