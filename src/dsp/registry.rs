//! Module registry for managing module kinds.
//!
//! The registry is the catalog of kinds available to the control plane. It
//! has a fixed capacity, is filled once at startup and is only ever appended
//! to, so descriptors can be looked up by id or by their position.

use log::debug;
use thiserror::Error;

use super::module_trait::{DspModule, ModuleInfo, ModuleKind};

/// Maximum number of module kinds a registry can hold.
pub const REGISTRY_CAPACITY: usize = 64;

/// Factory function type for creating module instances from a config word.
pub type ModuleFactory = fn(u32) -> Option<Box<dyn DspModule>>;

/// Errors returned when registering a module kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("module registry is full ({capacity} kinds)")]
    Full { capacity: usize },
    #[error("module id {0} is already registered")]
    DuplicateId(u32),
}

/// Immutable description of a module kind.
#[derive(Clone, Copy, Debug)]
pub struct ModuleDescriptor {
    pub info: &'static ModuleInfo,
    create: ModuleFactory,
}

impl ModuleDescriptor {
    /// Creates an instance, or `None` if its memory cannot be allocated.
    pub fn create(&self, config: u32) -> Option<Box<dyn DspModule>> {
        (self.create)(config)
    }
}

/// Central registry of available module kinds.
///
/// # Example
///
/// ```ignore
/// let mut registry = ModuleRegistry::new();
/// registry.register::<Oscillator>()?;
///
/// if let Some(osc) = registry.create(Oscillator::INFO.id, 0) {
///     // Hand it to the patch graph...
/// }
/// ```
pub struct ModuleRegistry {
    descriptors: Vec<ModuleDescriptor>,
    capacity: usize,
}

impl ModuleRegistry {
    /// Creates a new empty registry with [`REGISTRY_CAPACITY`] slots.
    pub fn new() -> Self {
        Self::with_capacity(REGISTRY_CAPACITY)
    }

    /// Creates a new empty registry holding at most `capacity` kinds.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            descriptors: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Registers a module kind.
    ///
    /// Fails when the registry is full or the kind's id is taken.
    pub fn register<M: ModuleKind>(&mut self) -> Result<(), RegistryError> {
        let info: &'static ModuleInfo = &M::INFO;

        if self.descriptors.len() >= self.capacity {
            return Err(RegistryError::Full {
                capacity: self.capacity,
            });
        }
        if self.contains(info.id) {
            return Err(RegistryError::DuplicateId(info.id));
        }

        debug!("registered module kind {} ({})", info.name, info.id);
        self.descriptors.push(ModuleDescriptor {
            info,
            create: create_module::<M>,
        });
        Ok(())
    }

    /// Looks up a descriptor by module id.
    pub fn get(&self, id: u32) -> Option<&ModuleDescriptor> {
        self.descriptors.iter().find(|d| d.info.id == id)
    }

    /// Looks up a descriptor by registration position.
    pub fn get_index(&self, index: usize) -> Option<&ModuleDescriptor> {
        self.descriptors.get(index)
    }

    /// Creates a new instance of a module kind by its id.
    ///
    /// Returns `None` if the id is unknown or the instance could not be
    /// allocated.
    pub fn create(&self, id: u32, config: u32) -> Option<Box<dyn DspModule>> {
        self.get(id)?.create(config)
    }

    /// Creates a new instance of a module kind by its registration position.
    pub fn create_index(&self, index: usize, config: u32) -> Option<Box<dyn DspModule>> {
        self.get_index(index)?.create(config)
    }

    /// Iterates over the registered kinds in registration order.
    pub fn list_modules(&self) -> impl Iterator<Item = &'static ModuleInfo> + '_ {
        self.descriptors.iter().map(|d| d.info)
    }

    /// Returns the number of registered kinds.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns true if no kinds are registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Checks if a kind with the given id is registered.
    pub fn contains(&self, id: u32) -> bool {
        self.get(id).is_some()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Generic factory stored as a function pointer in each descriptor.
fn create_module<M: ModuleKind>(config: u32) -> Option<Box<dyn DspModule>> {
    M::create(config).map(|module| Box::new(module) as Box<dyn DspModule>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::context::RenderContext;
    use crate::dsp::module_trait::ModuleCategory;
    use crate::dsp::port::PortDefinition;

    /// Test kind whose id is chosen by a const parameter.
    struct TestKind<const ID: u32>;

    impl<const ID: u32> DspModule for TestKind<ID> {
        fn info(&self) -> &ModuleInfo {
            &Self::INFO
        }

        fn ports(&self) -> &[PortDefinition] {
            &[]
        }

        fn render(&mut self, _ctx: &mut RenderContext<'_>) {}
    }

    impl<const ID: u32> ModuleKind for TestKind<ID> {
        const INFO: ModuleInfo = ModuleInfo {
            id: ID,
            name: "test",
            category: ModuleCategory::Utility,
            description: "Registry test kind",
        };

        fn create(config: u32) -> Option<Self> {
            (config != u32::MAX).then_some(Self)
        }
    }

    #[test]
    fn test_registry_creation() {
        let registry = ModuleRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ModuleRegistry::new();
        registry.register::<TestKind<7>>().unwrap();
        registry.register::<TestKind<42>>().unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(42));
        assert!(!registry.contains(8));
        assert_eq!(registry.get(42).unwrap().info.id, 42);
        assert_eq!(registry.get_index(0).unwrap().info.id, 7);
        assert!(registry.get_index(2).is_none());

        let ids: Vec<u32> = registry.list_modules().map(|info| info.id).collect();
        assert_eq!(ids, vec![7, 42]);
    }

    #[test]
    fn test_create_by_id_and_index() {
        let mut registry = ModuleRegistry::new();
        registry.register::<TestKind<3>>().unwrap();

        assert!(registry.create(3, 0).is_some());
        assert!(registry.create_index(0, 0).is_some());
        assert!(registry.create(4, 0).is_none());
        // Allocation failure surfaces as no instance.
        assert!(registry.create(3, u32::MAX).is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = ModuleRegistry::new();
        registry.register::<TestKind<1>>().unwrap();
        assert_eq!(
            registry.register::<TestKind<1>>(),
            Err(RegistryError::DuplicateId(1))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_full() {
        let mut registry = ModuleRegistry::with_capacity(2);
        registry.register::<TestKind<1>>().unwrap();
        registry.register::<TestKind<2>>().unwrap();
        assert_eq!(
            registry.register::<TestKind<3>>(),
            Err(RegistryError::Full { capacity: 2 })
        );
        assert!(!registry.contains(3));
    }

    #[test]
    fn test_default_capacity() {
        let mut registry = ModuleRegistry::default();
        macro_rules! fill {
            ($($id:literal)*) => { $( registry.register::<TestKind<$id>>().unwrap(); )* };
        }
        fill!(0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16 17 18 19 20 21 22 23 24 25 26 27 28 29 30 31
              32 33 34 35 36 37 38 39 40 41 42 43 44 45 46 47 48 49 50 51 52 53 54 55 56 57 58 59 60 61 62 63);
        assert_eq!(registry.len(), REGISTRY_CAPACITY);
        assert!(matches!(
            registry.register::<TestKind<64>>(),
            Err(RegistryError::Full { .. })
        ));
    }
}
