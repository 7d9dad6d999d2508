//! Registry of versioned construct descriptors.
//!
//! Built once at startup from the manifest, then read-only: after the
//! `OnceLock` publishes the global instance, lookups are plain shared reads
//! and safe from any number of compilation threads without locking.

use std::collections::HashMap;
use std::sync::OnceLock;

use tessera_core::{ConstructKind, Error, Result};

use crate::descriptor::ConstructDescriptor;
use crate::versioned;

/// Catalog of every versioned construct, keyed by (kind, name).
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<ConstructDescriptor>,
    index: HashMap<(ConstructKind, String), usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor.
    ///
    /// Re-registering an identical shape is a no-op (overlapping ranges
    /// included); a conflicting shape under the same (kind, name) fails
    /// with `DuplicateConstruct`. An inverted version range is rejected
    /// outright.
    pub fn register(&mut self, descriptor: ConstructDescriptor) -> Result<()> {
        if !descriptor.range.is_well_formed() {
            return Err(Error::MalformedVersion {
                text: descriptor.range.to_string(),
                reason: format!("range of {} `{}` has min > max", descriptor.kind, descriptor.name),
            });
        }

        let key = (descriptor.kind, descriptor.name.to_string());
        if let Some(&existing) = self.index.get(&key) {
            if self.entries[existing].same_shape(&descriptor) {
                return Ok(());
            }
            return Err(Error::DuplicateConstruct {
                kind: descriptor.kind,
                name: descriptor.name.to_string(),
            });
        }

        self.index.insert(key, self.entries.len());
        self.entries.push(descriptor);
        Ok(())
    }

    /// Look up a construct by kind and name.
    pub fn lookup(&self, kind: ConstructKind, name: &str) -> Result<&ConstructDescriptor> {
        self.get(kind, name).ok_or_else(|| Error::UnknownConstruct {
            kind,
            name: name.to_string(),
        })
    }

    pub fn get(&self, kind: ConstructKind, name: &str) -> Option<&ConstructDescriptor> {
        self.index
            .get(&(kind, name.to_string()))
            .map(|&i| &self.entries[i])
    }

    /// All constructs of one kind, in registration order.
    pub fn all(&self, kind: ConstructKind) -> impl Iterator<Item = &ConstructDescriptor> {
        self.entries.iter().filter(move |d| d.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The process-global registry, built from the manifest on first use.
///
/// `OnceLock` gives the one-time release publication; every later access is
/// an acquire load of immutable data.
pub fn global() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = Registry::new();
        for descriptor in versioned::manifest() {
            registry
                .register(descriptor)
                .expect("built-in construct manifest must be self-consistent");
        }
        tracing::debug!("registered {} versioned constructs", registry.len());
        registry
    })
}
