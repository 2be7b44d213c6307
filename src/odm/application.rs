//! Groups of models registered together.
//!
//! An application is a named set of models. Applications are made known to
//! an [`ApplicationRegistry`] under a dotted path and referred to by that
//! path, or handed over directly as a [`ModelProvider`].

use super::model::Model;
use super::router::models_from_model;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// A source of models.
pub trait ModelProvider: Send + Sync {
    /// Application label.
    fn label(&self) -> &str;

    /// The models the application declares, in order.
    fn models(&self) -> Vec<Model>;
}

/// A provider over a static model list.
///
/// # Example
///
/// ```
/// use kvodm::odm::{ModelProvider, Model, ModelMeta, StaticApplication};
///
/// static POST: ModelMeta = ModelMeta::new("blog", "post");
/// static BLOG_MODELS: [Model; 1] = [Model::of(&POST)];
/// static BLOG: StaticApplication = StaticApplication::new("blog", &BLOG_MODELS);
///
/// assert_eq!(BLOG.models(), vec![Model::of(&POST)]);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct StaticApplication {
    label: &'static str,
    models: &'static [Model],
}

impl StaticApplication {
    /// Creates a provider for `models`.
    pub const fn new(label: &'static str, models: &'static [Model]) -> Self {
        Self { label, models }
    }
}

impl ModelProvider for StaticApplication {
    fn label(&self) -> &str {
        self.label
    }

    fn models(&self) -> Vec<Model> {
        self.models.to_vec()
    }
}

/// One application, or several.
#[derive(Clone)]
pub enum Application {
    /// Dotted path resolved through an [`ApplicationRegistry`].
    Path(String),
    /// A provider given directly.
    Provider(Arc<dyn ModelProvider>),
    /// Several applications, visited in order.
    Many(Vec<Application>),
}

impl From<&str> for Application {
    fn from(path: &str) -> Self {
        Application::Path(path.to_string())
    }
}

impl From<Vec<Application>> for Application {
    fn from(applications: Vec<Application>) -> Self {
        Application::Many(applications)
    }
}

impl<P: ModelProvider + 'static> From<Arc<P>> for Application {
    fn from(provider: Arc<P>) -> Self {
        Application::Provider(provider)
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Application::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Application::Provider(provider) => {
                f.debug_tuple("Provider").field(&provider.label()).finish()
            }
            Application::Many(applications) => f.debug_tuple("Many").field(applications).finish(),
        }
    }
}

/// Dotted path to provider lookup.
#[derive(Default, Clone)]
pub struct ApplicationRegistry {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
}

impl ApplicationRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `provider` reachable under `path`. A later registration of the
    /// same path replaces the earlier one.
    pub fn register(
        &mut self,
        path: impl Into<String>,
        provider: Arc<dyn ModelProvider>,
    ) -> &mut Self {
        self.providers.insert(path.into(), provider);
        self
    }

    /// Resolves `path`, also trying `{path}.models`.
    pub fn resolve(&self, path: &str) -> Option<Arc<dyn ModelProvider>> {
        self.providers
            .get(path)
            .or_else(|| self.providers.get(&format!("{}.models", path)))
            .cloned()
    }

    /// Registered paths, sorted.
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Number of registered paths.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ApplicationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationRegistry").field("paths", &self.paths()).finish()
    }
}

/// Every concrete model reachable from `application`, each once, in
/// discovery order. Paths the registry cannot resolve contribute nothing.
pub fn model_iterator(
    application: &Application,
    registry: &ApplicationRegistry,
    include_related: bool,
) -> Vec<Model> {
    let mut seen = HashSet::new();
    let mut models = Vec::new();
    let mut pending = vec![application];

    while let Some(application) = pending.pop() {
        let provider = match application {
            Application::Many(applications) => {
                pending.extend(applications.iter().rev());
                continue;
            }
            Application::Provider(provider) => Arc::clone(provider),
            Application::Path(path) => match registry.resolve(path) {
                Some(provider) => provider,
                None => {
                    log::debug!("application '{}' not found, skipping", path);
                    continue;
                }
            },
        };
        for model in provider.models() {
            for model in models_from_model(model, include_related, &[]) {
                if seen.insert(model) {
                    models.push(model);
                }
            }
        }
    }
    models
}
