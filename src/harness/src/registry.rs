//! Engines are registered by name and instantiated per job.
use std::fmt;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lazy_static::lazy_static;

use crate::engine::{EngineFlags, EngineOption, IoEngine};
use crate::Error;

#[derive(Clone)]
pub struct EngineDescriptor {
    pub name: &'static str,
    pub version: u32,
    pub flags: EngineFlags,
    pub options: &'static [EngineOption],
    pub create: fn() -> Box<dyn IoEngine>,
}

impl fmt::Debug for EngineDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("flags", &self.flags)
            .field("options", &self.options.len())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct EngineRegistry {
    engines: DashMap<&'static str, EngineDescriptor>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, desc: EngineDescriptor) -> Result<(), Error> {
        match self.engines.entry(desc.name) {
            Entry::Occupied(_) => Err(Error::AlreadyRegistered(desc.name.to_owned())),
            Entry::Vacant(e) => {
                tracing::debug!(engine = desc.name, "registered io engine");
                e.insert(desc);
                Ok(())
            }
        }
    }

    /// Remove an engine. Returns whether it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.engines.remove(name).is_some();
        if removed {
            tracing::debug!(engine = name, "unregistered io engine");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<EngineDescriptor> {
        self.engines.get(name).map(|d| d.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.engines.contains_key(name)
    }

    /// Instantiate a fresh engine. Each call yields an independent instance.
    pub fn create(&self, name: &str) -> Result<Box<dyn IoEngine>, Error> {
        let create = self
            .engines
            .get(name)
            .map(|d| d.create)
            .ok_or_else(|| Error::NotFound(name.to_owned()))?;
        Ok(create())
    }
}

lazy_static! {
    static ref GLOBAL: EngineRegistry = EngineRegistry::new();
}

/// The process-wide registry.
pub fn global() -> &'static EngineRegistry {
    &GLOBAL
}
