//! Units of work.
//!
//! A [`Session`] collects saves and deletes and writes them in one atomic
//! batch on [`Session::commit`]. Every model touched by a session must live
//! on the session's backend. Sessions handed out by
//! [`Router::session`](super::Router::session) know where each registered
//! model lives and refuse instances routed elsewhere.

use super::manager::Keys;
use super::model::{Instance, Model};
use super::query::Query;
use crate::client::Client;
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;

enum Pending {
    Save(Instance),
    Delete(Instance),
}

/// A unit of work bound to one backend.
///
/// # Example
///
/// ```
/// use kvodm::odm::{FieldMeta, Instance, Manager, Model, ModelMeta};
/// use kvodm::Client;
///
/// static NOTE_FIELDS: [FieldMeta; 1] = [FieldMeta::new("text")];
/// static NOTE: ModelMeta = ModelMeta::new("docs", "note").fields(&NOTE_FIELDS);
///
/// # fn main() -> Result<(), kvodm::Error> {
/// let manager = Manager::new(Model::of(&NOTE), Client::open("memory://session-docs")?);
/// let mut session = manager.session();
/// session.add(Instance::new(manager.model()).set("text", "hello"))?;
/// let saved = session.commit()?;
/// assert_eq!(saved[0].id(), Some("1"));
/// assert_eq!(manager.query().count()?, 1);
/// # Ok(())
/// # }
/// ```
pub struct Session {
    backend: Client,
    routes: Option<HashMap<Model, Client>>,
    pending: Vec<Pending>,
}

impl Session {
    /// An empty session on `backend` accepting instances of any model.
    pub fn new(backend: Client) -> Self {
        Self { backend, routes: None, pending: Vec::new() }
    }

    /// An empty session on `backend` that only accepts models whose entry in
    /// `routes` is that same backend.
    pub(crate) fn routed(backend: Client, routes: HashMap<Model, Client>) -> Self {
        Self { backend, routes: Some(routes), pending: Vec::new() }
    }

    /// The session backend.
    pub fn backend(&self) -> &Client {
        &self.backend
    }

    /// Queues `instance` for saving. A saved instance replaces the stored
    /// one entirely.
    ///
    /// Fails with [`Error::InvalidTransaction`] if the instance's model is
    /// routed to another backend.
    pub fn add(&mut self, instance: Instance) -> Result<()> {
        self.check_route(instance.model())?;
        instance.validate()?;
        self.pending.push(Pending::Save(instance));
        Ok(())
    }

    /// Queues `instance` for deletion.
    pub fn delete(&mut self, instance: Instance) -> Result<()> {
        self.check_route(instance.model())?;
        if instance.is_new() {
            return Err(Error::invalid_argument(format!(
                "cannot delete an unsaved {}",
                instance.model()
            )));
        }
        self.pending.push(Pending::Delete(instance));
        Ok(())
    }

    fn check_route(&self, model: Model) -> Result<()> {
        let Some(routes) = &self.routes else {
            return Ok(());
        };
        match routes.get(&model) {
            Some(backend) if backend == &self.backend => Ok(()),
            Some(backend) => Err(Error::invalid_transaction(format!(
                "{} lives on {}, not on the session backend {}",
                model, backend, self.backend
            ))),
            None => Err(Error::not_found(format!("{} is not registered", model))),
        }
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Discards every queued operation.
    pub fn rollback(&mut self) {
        if !self.pending.is_empty() {
            log::debug!(
                "session on {} rolled back {} operation(s)",
                self.backend,
                self.pending.len()
            );
        }
        self.pending.clear();
    }

    /// A query on `model` over the session backend.
    pub fn query(&self, model: Model) -> Query {
        Query::new(model, self.backend.clone())
    }

    /// Writes every queued operation and returns the saved instances, with
    /// ids assigned.
    ///
    /// New instances draw their ids from the model counters in one round
    /// trip; the writes then go out as one transaction. Like MULTI/EXEC on
    /// the remote store, a failing write does not undo the writes before it.
    /// On error the queue is kept with the drawn ids already assigned, so
    /// committing again rewrites the same objects instead of duplicating
    /// them.
    pub fn commit(&mut self) -> Result<Vec<Instance>> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids = self.allocate_ids()?.into_iter();
        for op in &mut self.pending {
            if let Pending::Save(instance) = op {
                if instance.is_new() {
                    let id = ids
                        .next()
                        .ok_or_else(|| Error::internal("id allocation came up short"))?;
                    instance.assign_id(id);
                }
            }
        }

        let mut saved = Vec::new();
        let mut deleted = 0usize;
        let mut tx = self.backend.transaction();
        for op in &self.pending {
            match op {
                Pending::Save(instance) => {
                    let keys = Keys::new(&self.backend, instance.model());
                    let id = instance.id().unwrap_or_default();
                    let object = keys.object(id);
                    tx.del(&object);
                    if !instance.fields().is_empty() {
                        let pairs: Vec<(&String, &String)> = instance.fields().iter().collect();
                        tx.hset(&object, &pairs);
                    }
                    tx.sadd(keys.ids(), &[id]);
                    saved.push(instance.clone());
                }
                Pending::Delete(instance) => {
                    let keys = Keys::new(&self.backend, instance.model());
                    let id = instance.id().unwrap_or_default();
                    tx.del(keys.object(id));
                    tx.srem(keys.ids(), &[id]);
                    deleted += 1;
                }
            }
        }

        for result in tx.execute(false)? {
            result?;
        }
        self.pending.clear();
        log::debug!(
            "session on {} committed {} save(s), {} delete(s)",
            self.backend,
            saved.len(),
            deleted
        );
        Ok(saved)
    }

    fn allocate_ids(&self) -> Result<Vec<String>> {
        let mut pipe = self.backend.pipeline();
        for op in &self.pending {
            if let Pending::Save(instance) = op {
                if instance.is_new() {
                    pipe.incr(Keys::new(&self.backend, instance.model()).counter());
                }
            }
        }
        pipe.execute(false)?
            .into_iter()
            .map(|result| {
                let reply = result?;
                reply
                    .as_int()
                    .map(|n| n.to_string())
                    .ok_or_else(|| {
                        Error::internal(format!("unexpected id counter reply {:?}", reply))
                    })
            })
            .collect()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.backend)
            .field("pending", &self.pending.len())
            .finish()
    }
}
