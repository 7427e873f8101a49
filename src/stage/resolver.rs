//! Plugin lookup and invocation.
//!
//! Plugins are registered at startup in a [`PluginRegistry`] under a code
//! location (`harvesters`, `processors`) and a name. Each invocation resolves
//! the plugin through an explicit [`ResolutionContext`]: the stage's code
//! location is pushed onto the context's search path by a [`SearchPathGuard`]
//! and popped again when the guard drops, on every exit path.

use std::collections::HashMap;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::model::StageInvocation;
use crate::stage::config::StageConfig;
use crate::traits::{StageError, StageLog, StagePlugin};

/// Builds a fresh plugin instance.
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn StagePlugin> + Send + Sync>;

/// Statically known plugins, keyed by `(code location, name)`.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: HashMap<(String, String), PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `location`/`name`, replacing any previous one.
    pub fn register<F, P>(&mut self, location: &str, name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: StagePlugin + 'static,
    {
        let factory: PluginFactory = Arc::new(move || Box::new(factory()) as Box<dyn StagePlugin>);
        self.factories
            .insert((location.to_string(), name.to_string()), factory);
        self
    }

    pub fn contains(&self, location: &str, name: &str) -> bool {
        self.factories
            .contains_key(&(location.to_string(), name.to_string()))
    }

    /// Builds a new instance of the plugin registered at `location`/`name`.
    pub fn instantiate(&self, location: &str, name: &str) -> Option<Box<dyn StagePlugin>> {
        self.factories
            .get(&(location.to_string(), name.to_string()))
            .map(|factory| factory())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.factories.keys().collect();
        keys.sort();
        f.debug_struct("PluginRegistry").field("plugins", &keys).finish()
    }
}

/// Ordered code locations searched when resolving a plugin name.
///
/// Later entries take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionContext {
    search_path: Vec<String>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context with locations that are always searched.
    pub fn with_base<I, S>(locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            search_path: locations.into_iter().map(Into::into).collect(),
        }
    }

    pub fn search_path(&self) -> &[String] {
        &self.search_path
    }

    /// Adds `location` for as long as the returned guard lives.
    pub fn push(&mut self, location: &str) -> SearchPathGuard<'_> {
        let depth = self.search_path.len();
        self.search_path.push(location.to_string());
        SearchPathGuard { ctx: self, depth }
    }
}

/// Restores the search path to its previous depth on drop.
#[derive(Debug)]
pub struct SearchPathGuard<'a> {
    ctx: &'a mut ResolutionContext,
    depth: usize,
}

impl Deref for SearchPathGuard<'_> {
    type Target = ResolutionContext;

    fn deref(&self) -> &ResolutionContext {
        self.ctx
    }
}

impl Drop for SearchPathGuard<'_> {
    fn drop(&mut self) {
        self.ctx.search_path.truncate(self.depth);
    }
}

/// Resolves and runs stage plugins for datasets under `datasets_dir`.
#[derive(Debug, Clone)]
pub struct PluginResolver {
    registry: Arc<PluginRegistry>,
    datasets_dir: PathBuf,
}

impl PluginResolver {
    pub fn new(registry: Arc<PluginRegistry>, datasets_dir: impl AsRef<Path>) -> Self {
        Self {
            registry,
            datasets_dir: datasets_dir.as_ref().to_path_buf(),
        }
    }

    pub fn datasets_dir(&self) -> &Path {
        &self.datasets_dir
    }

    /// Loads the stage configuration, resolves its plugin and runs it.
    ///
    /// The configuration's stage-type tag is validated before the search path
    /// is touched, so an unsupported tag never reaches resolution. The plugin
    /// is instantiated fresh on every call.
    ///
    /// # Errors
    ///
    /// - [`StageError::Configuration`] for a missing or malformed configuration
    /// - [`StageError::UnsupportedStageType`] for a tag outside the allow-list
    /// - [`StageError::PluginNotFound`] if nothing is registered for the name
    /// - [`StageError::Execution`] if the plugin returns an error or panics
    pub fn resolve_and_invoke(
        &self,
        invocation: &StageInvocation,
        ctx: &mut ResolutionContext,
        log: &StageLog,
    ) -> Result<(), StageError> {
        let stage = invocation.stage;
        let config_path = StageConfig::path_for(&self.datasets_dir, &invocation.dataset, stage);
        let config = StageConfig::load(&config_path)?;
        let name = config
            .validated_type(stage)?
            .unwrap_or_else(|| stage.default_entry())
            .to_string();

        let guard = ctx.push(stage.code_location());
        let plugin = self.lookup(&guard, &name).ok_or_else(|| StageError::PluginNotFound {
            stage,
            name: name.clone(),
            searched: guard.search_path().to_vec(),
        })?;

        debug!(
            dataset = %invocation.dataset,
            %stage,
            plugin = plugin.name(),
            config = %config_path.display(),
            "Invoking plugin"
        );

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            plugin.execute(&config_path, &invocation.output_path, log)
        }));
        drop(guard);

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(StageError::Execution(e.to_string())),
            Err(payload) => Err(StageError::Execution(format!(
                "plugin panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    fn lookup(&self, ctx: &ResolutionContext, name: &str) -> Option<Box<dyn StagePlugin>> {
        ctx.search_path()
            .iter()
            .rev()
            .find_map(|location| self.registry.instantiate(location, name))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
