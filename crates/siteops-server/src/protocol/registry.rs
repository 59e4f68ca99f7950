//! Method name → handler map.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::handler::Handler;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("A different handler is already registered for method: {0}")]
    Duplicate(String),

    #[error("Method name must not be empty")]
    EmptyName,
}

/// Populated before the server starts; frozen into an `Arc` at build time.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a registry with the built-in methods, whose names are distinct
    /// constants.
    pub(crate) fn with_builtins(builtins: Vec<(&'static str, Arc<dyn Handler>)>) -> Self {
        Self {
            handlers: builtins
                .into_iter()
                .map(|(method, handler)| (method.to_string(), handler))
                .collect(),
        }
    }

    pub fn register<H: Handler>(
        &mut self,
        method: impl Into<String>,
        handler: H,
    ) -> Result<(), RegistryError> {
        self.register_shared(method, Arc::new(handler))
    }

    /// Register a shared handler. Registering the same instance again under
    /// the same name is a no-op.
    pub fn register_shared(
        &mut self,
        method: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RegistryError> {
        let method = method.into();
        if method.is_empty() {
            return Err(RegistryError::EmptyName);
        }

        match self.handlers.entry(method) {
            Entry::Occupied(existing) if Arc::ptr_eq(existing.get(), &handler) => Ok(()),
            Entry::Occupied(existing) => Err(RegistryError::Duplicate(existing.key().clone())),
            Entry::Vacant(slot) => {
                tracing::debug!(method = %slot.key(), "Registered handler");
                slot.insert(handler);
                Ok(())
            }
        }
    }

    pub fn unregister(&mut self, method: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.remove(method)
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(method).cloned()
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.keys().cloned().collect();
        methods.sort();
        methods
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}
