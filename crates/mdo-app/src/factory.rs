//! Registry of externally implemented components, keyed by type name.

use std::collections::BTreeMap;
use std::fmt;

use mdo_components::{Component, ComponentError, ComponentResult};
use serde::de::DeserializeOwned;

/// Parameters of an `External` component as written in the project file.
#[derive(Clone, Copy, Debug)]
pub struct ComponentParams<'a> {
    component: &'a str,
    values: &'a BTreeMap<String, serde_json::Value>,
}

impl<'a> ComponentParams<'a> {
    pub fn new(component: &'a str, values: &'a BTreeMap<String, serde_json::Value>) -> Self {
        Self { component, values }
    }

    /// Name of the component being built.
    pub fn component(&self) -> &str {
        self.component
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Deserialize parameter `key` into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> ComponentResult<T> {
        let value = self.values.get(key).ok_or_else(|| {
            ComponentError::InvalidArg {
                what: format!("component '{}' is missing parameter '{key}'", self.component),
            }
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            ComponentError::InvalidArg {
                what: format!("component '{}' parameter '{key}': {e}", self.component),
            }
        })
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> ComponentResult<T> {
        if self.contains(key) {
            self.get(key)
        } else {
            Ok(default)
        }
    }

    pub fn f64(&self, key: &str) -> ComponentResult<f64> {
        self.get(key)
    }
}

type Builder = Box<dyn Fn(&ComponentParams<'_>) -> ComponentResult<Box<dyn Component>> + Send + Sync>;

/// Constructors for component types that live outside this workspace.
///
/// A project refers to them with `type: External` and a `type_name`; names
/// are resolved when the project is compiled, before anything runs.
#[derive(Default)]
pub struct ComponentFactory {
    builders: BTreeMap<String, Builder>,
}

impl fmt::Debug for ComponentFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentFactory")
            .field("types", &self.type_names().collect::<Vec<_>>())
            .finish()
    }
}

impl ComponentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `build` under `type_name`, replacing any previous entry.
    pub fn register<F, C>(&mut self, type_name: impl Into<String>, build: F) -> &mut Self
    where
        F: Fn(&ComponentParams<'_>) -> ComponentResult<C> + Send + Sync + 'static,
        C: Component + 'static,
    {
        self.builders.insert(
            type_name.into(),
            Box::new(move |params: &ComponentParams<'_>| {
                Ok(Box::new(build(params)?) as Box<dyn Component>)
            }),
        );
        self
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.builders.contains_key(type_name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }

    /// `None` when no builder is registered under `type_name`.
    pub fn build(
        &self,
        type_name: &str,
        params: &ComponentParams<'_>,
    ) -> Option<ComponentResult<Box<dyn Component>>> {
        self.builders.get(type_name).map(|build| build(params))
    }
}
