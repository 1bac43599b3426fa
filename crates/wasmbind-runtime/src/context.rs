//! Engine, configuration and compiled-module cache.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use wasmi::Engine;

use crate::config::BindingConfig;
use crate::dispatcher::Dispatcher;
use crate::error::BindResult;
use crate::instance::{content_digest, Instance, LoadedModule};

/// Owns the execution engine and caches compiled modules by the SHA-256 of
/// their bytes.
#[derive(Debug)]
pub struct BindingContext {
    engine: Engine,
    config: BindingConfig,
    cache: HashMap<String, Arc<LoadedModule>>,
}

impl BindingContext {
    pub fn new(config: BindingConfig) -> BindResult<Self> {
        config.validate()?;
        Ok(Self {
            engine: Engine::default(),
            config,
            cache: HashMap::new(),
        })
    }

    /// Compile `bytes`, or return the cached module for identical bytes.
    pub fn load(&mut self, bytes: &[u8]) -> BindResult<Arc<LoadedModule>> {
        if !self.config.cache_modules {
            return self.compile(bytes).map(Arc::new);
        }
        let digest = content_digest(bytes);
        if let Some(module) = self.cache.get(&digest) {
            debug!(digest = %digest, "module cache hit");
            return Ok(Arc::clone(module));
        }
        let module = Arc::new(self.compile(bytes)?);
        self.cache.insert(digest, Arc::clone(&module));
        Ok(module)
    }

    fn compile(&self, bytes: &[u8]) -> BindResult<LoadedModule> {
        LoadedModule::load(&self.engine, bytes, &self.config.metadata_section)
    }

    /// Load and instantiate `bytes`.
    pub fn instantiate(&mut self, bytes: &[u8]) -> BindResult<Instance> {
        let module = self.load(bytes)?;
        let instance = Instance::instantiate(&self.engine, module, &self.config)?;
        debug!(
            digest = %instance.module().digest(),
            memory = instance.memory_len(),
            "instantiated guest module"
        );
        Ok(instance)
    }

    /// Load, instantiate and plan every wrapped export of `bytes`.
    pub fn bind(&mut self, bytes: &[u8]) -> BindResult<Dispatcher> {
        let instance = self.instantiate(bytes)?;
        Dispatcher::new(instance, &self.config)
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn config(&self) -> &BindingConfig {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}
