//! The model registry.
//!
//! A [`Router`] maps registered models to their [`Manager`], resolves which
//! backend a model lives on, and hands out sessions spanning several models
//! as long as they share a backend.

use super::application::{model_iterator, Application, ApplicationRegistry};
use super::manager::Manager;
use super::model::{Instance, Model};
use super::query::Query;
use super::session::Session;
use crate::client::Client;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Construction-time router configuration.
#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    /// Backend used by registrations that do not name one.
    pub default_backend: Option<Client>,
}

impl RouterOptions {
    /// Options with no default backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default backend.
    pub fn default_backend(mut self, backend: Client) -> Self {
        self.default_backend = Some(backend);
        self
    }
}

/// Registry of models and their managers.
///
/// # Example
///
/// ```
/// use kvodm::odm::{FieldMeta, Instance, Model, ModelMeta, Router, RouterOptions};
/// use kvodm::Client;
///
/// static CITY_FIELDS: [FieldMeta; 1] = [FieldMeta::new("name")];
/// static CITY: ModelMeta = ModelMeta::new("geo", "city").fields(&CITY_FIELDS);
///
/// # fn main() -> Result<(), kvodm::Error> {
/// let client = Client::open("memory://router-docs")?;
/// let mut router = Router::new(RouterOptions::new().default_backend(client.clone()));
///
/// let city = Model::of(&CITY);
/// assert_eq!(router.register(city, None, false)?, Some(client));
/// assert_eq!(router.register(city, None, false)?, None);
///
/// router.add(Instance::new(city).set("name", "Rome"))?;
/// assert_eq!(router.manager_for("city").unwrap().query().count()?, 1);
/// assert_eq!(router.flush(&[])?, 3);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct Router {
    options: RouterOptions,
    registered: HashMap<Model, Manager>,
    by_name: HashMap<String, Manager>,
}

impl Router {
    /// An empty router.
    pub fn new(options: RouterOptions) -> Self {
        Self { options, registered: HashMap::new(), by_name: HashMap::new() }
    }

    /// The backend used when a registration names none.
    pub fn default_backend(&self) -> Option<&Client> {
        self.options.default_backend.as_ref()
    }

    /// Registers `model` on `backend`, or on the default backend.
    ///
    /// With `include_related`, every model reachable through related fields
    /// and many-to-many relations is registered on the same backend.
    /// Models already registered keep their manager. Returns the backend if
    /// at least one model was newly registered, `None` otherwise.
    pub fn register(
        &mut self,
        model: Model,
        backend: Option<Client>,
        include_related: bool,
    ) -> Result<Option<Client>> {
        let backend = backend
            .or_else(|| self.options.default_backend.clone())
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "no backend given for {} and no default backend configured",
                    model
                ))
            })?;

        let mut registered_any = false;
        for model in models_from_model(model, include_related, &[]) {
            if self.registered.contains_key(&model) {
                continue;
            }
            let manager = Manager::new(model, backend.clone());
            self.by_name.entry(model.name().to_string()).or_insert_with(|| manager.clone());
            self.registered.insert(model, manager);
            log::debug!("registered {} on {}", model, backend);
            registered_any = true;
        }
        Ok(registered_any.then_some(backend))
    }

    /// Registers every model of `applications`.
    ///
    /// `models` restricts registration to the listed `"{app_label}.{name}"`
    /// keys. Models reached through relations are included. Each model's
    /// backend is looked up in `backends`, first by model key then by app
    /// label, falling back to the default backend, and each is registered
    /// on its own. Returns the newly registered models.
    pub fn register_applications(
        &mut self,
        applications: &Application,
        registry: &ApplicationRegistry,
        models: Option<&[&str]>,
        backends: &HashMap<String, Client>,
    ) -> Result<Vec<Model>> {
        let mut registered = Vec::new();
        for model in model_iterator(applications, registry, true) {
            let key = model.key();
            if models.is_some_and(|wanted| !wanted.contains(&key.as_str())) {
                continue;
            }
            let backend = backends.get(&key).or_else(|| backends.get(model.app_label())).cloned();
            if self.register(model, backend, false)?.is_some() {
                registered.push(model);
            }
        }
        Ok(registered)
    }

    /// Removes `model`, or every model when `None`, and returns the removed
    /// managers.
    pub fn unregister(&mut self, model: Option<Model>) -> Vec<Manager> {
        match model {
            Some(model) => {
                let Some(manager) = self.registered.remove(&model) else {
                    return Vec::new();
                };
                if self.by_name.get(model.name()).is_some_and(|owner| owner.model() == model) {
                    self.by_name.remove(model.name());
                }
                log::debug!("unregistered {}", model);
                vec![manager]
            }
            None => {
                self.by_name.clear();
                let managers: Vec<Manager> =
                    self.registered.drain().map(|(_, manager)| manager).collect();
                log::debug!("unregistered {} model(s)", managers.len());
                managers
            }
        }
    }

    /// The manager of `model`.
    pub fn get(&self, model: Model) -> Option<&Manager> {
        self.registered.get(&model)
    }

    /// Returns true if `model` is registered.
    pub fn contains(&self, model: Model) -> bool {
        self.registered.contains_key(&model)
    }

    /// The manager registered under the model name `name`. When two models
    /// share a name, the first registered one owns it.
    pub fn manager_for(&self, name: &str) -> Option<&Manager> {
        self.by_name.get(name)
    }

    /// Registered models, ordered by key.
    pub fn registered_models(&self) -> Vec<Model> {
        let mut models: Vec<Model> = self.registered.keys().copied().collect();
        models.sort_by_key(Model::key);
        models
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.registered.len()
    }

    /// Returns true if no model is registered.
    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    /// A query on a registered model.
    pub fn query(&self, model: Model) -> Result<Query> {
        self.get(model)
            .map(Manager::query)
            .ok_or_else(|| Error::not_found(format!("{} is not registered", model)))
    }

    /// A session over `models`, or over every registered model when
    /// `models` is empty.
    ///
    /// Unregistered models are ignored; `None` is returned when none is
    /// registered. Models on different backends cannot share a session, and
    /// the session refuses instances of models registered on another
    /// backend.
    pub fn session(&self, models: &[Model]) -> Result<Option<Session>> {
        let models = if models.is_empty() { self.registered_models() } else { models.to_vec() };

        let mut backend: Option<(&Client, Model)> = None;
        for model in models {
            let Some(manager) = self.registered.get(&model) else {
                continue;
            };
            match backend {
                None => backend = Some((manager.backend(), model)),
                Some((first, first_model)) if first != manager.backend() => {
                    return Err(Error::invalid_transaction(format!(
                        "{} lives on {} but {} lives on {}",
                        first_model,
                        first,
                        model,
                        manager.backend()
                    )));
                }
                Some(_) => {}
            }
        }
        let routes: HashMap<Model, Client> = self
            .registered
            .iter()
            .map(|(model, manager)| (*model, manager.backend().clone()))
            .collect();
        Ok(backend.map(|(client, _)| Session::routed(client.clone(), routes)))
    }

    /// Saves `instance` in its own session and returns it with its id.
    pub fn add(&self, instance: Instance) -> Result<Instance> {
        let manager = self
            .get(instance.model())
            .ok_or_else(|| Error::not_found(format!("{} is not registered", instance.model())))?;
        let mut session = manager.session();
        session.add(instance)?;
        session
            .commit()?
            .pop()
            .ok_or_else(|| Error::internal("commit returned no instance"))
    }

    /// Deletes every key of every registered model whose name is not in
    /// `exclude` and returns the number of keys removed.
    ///
    /// Managers are flushed concurrently. All of them run to completion; the
    /// first error, in model key order, is returned.
    pub fn flush(&self, exclude: &[&str]) -> Result<usize> {
        let mut managers: Vec<&Manager> = self
            .registered
            .values()
            .filter(|manager| !exclude.contains(&manager.model().name()))
            .collect();
        managers.sort_by_key(|manager| manager.model().key());

        let results: Vec<Result<usize>> = crossbeam::scope(|scope| {
            let handles: Vec<_> = managers
                .iter()
                .map(|manager| scope.spawn(move |_| manager.flush()))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(Error::internal("flush worker panicked")))
                })
                .collect::<Vec<Result<usize>>>()
        })
        .map_err(|_| Error::internal("flush worker panicked"))?;

        let mut total = 0;
        for removed in results {
            total += removed?;
        }
        log::info!("flushed {} keys across {} model(s)", total, managers.len());
        Ok(total)
    }
}

/// `model` followed, with `include_related`, by every model reachable from
/// it through related fields, junction models and many-to-many relations,
/// in depth-first preorder.
///
/// Every model is yielded once, cycles included. Abstract models are
/// neither yielded nor followed. Models in `exclude` are treated as already
/// visited.
pub fn models_from_model(model: Model, include_related: bool, exclude: &[Model]) -> Vec<Model> {
    let mut visited: HashSet<Model> = exclude.iter().copied().collect();
    let mut models = Vec::new();
    let mut stack = vec![model];

    while let Some(model) = stack.pop() {
        if model.is_abstract() || !visited.insert(model) {
            continue;
        }
        models.push(model);
        if include_related {
            stack.extend(model.related_models().into_iter().rev());
        }
    }
    models
}
