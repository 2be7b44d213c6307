//! The binding of one model to one backend.

use super::model::Model;
use super::query::Query;
use super::session::Session;
use crate::client::Client;
use crate::script::builtin::DELPATTERN;
use crate::Result;
use std::fmt;
use std::sync::Arc;

/// Key layout of a model under a client's namespace.
///
/// - `{basekey}:id` set of instance ids
/// - `{basekey}:obj:{id}` hash of instance fields
/// - `{basekey}:ids` id counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Keys {
    basekey: String,
}

impl Keys {
    pub(crate) fn new(client: &Client, model: Model) -> Self {
        Self { basekey: format!("{}{}", client.namespace(), model.key()) }
    }

    pub(crate) fn basekey(&self) -> &str {
        &self.basekey
    }

    pub(crate) fn ids(&self) -> String {
        format!("{}:id", self.basekey)
    }

    pub(crate) fn object(&self, id: &str) -> String {
        format!("{}:obj:{}", self.basekey, id)
    }

    pub(crate) fn counter(&self) -> String {
        format!("{}:ids", self.basekey)
    }

    /// Glob matching every key of the model.
    pub(crate) fn pattern(&self) -> String {
        let mut pattern = String::with_capacity(self.basekey.len() + 2);
        for c in self.basekey.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push_str(":*");
        pattern
    }
}

struct ManagerInner {
    model: Model,
    backend: Client,
    keys: Keys,
}

/// Per-model access point created by the router on registration.
///
/// The backend is fixed at construction; a manager is cheap to clone and
/// every clone shares the same binding.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

impl Manager {
    /// Binds `model` to `backend`.
    pub fn new(model: Model, backend: Client) -> Self {
        let keys = Keys::new(&backend, model);
        Self { inner: Arc::new(ManagerInner { model, backend, keys }) }
    }

    /// The managed model.
    pub fn model(&self) -> Model {
        self.inner.model
    }

    /// The backend the model lives on.
    pub fn backend(&self) -> &Client {
        &self.inner.backend
    }

    /// Prefix of every key the model owns.
    pub fn basekey(&self) -> &str {
        self.inner.keys.basekey()
    }

    /// A new session on the model's backend.
    pub fn session(&self) -> Session {
        Session::new(self.inner.backend.clone())
    }

    /// A query over every instance of the model.
    pub fn query(&self) -> Query {
        Query::new(self.inner.model, self.inner.backend.clone())
    }

    /// Deletes every key of the model and returns how many were removed.
    pub fn flush(&self) -> Result<usize> {
        let pattern = self.inner.keys.pattern();
        let reply =
            self.inner.backend.script_call(DELPATTERN, &[] as &[&str], &[pattern.as_str()])?;
        let removed = reply.as_int().unwrap_or(0).max(0) as usize;
        log::debug!("flushed {} keys of {}", removed, self.inner.model);
        Ok(removed)
    }
}

impl PartialEq for Manager {
    fn eq(&self, other: &Self) -> bool {
        self.inner.model == other.inner.model && self.inner.backend == other.inner.backend
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("model", &self.inner.model)
            .field("backend", &self.inner.backend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Command, MemoryBackend};
    use crate::config::Options;
    use crate::odm::model::{FieldMeta, Instance, ModelMeta};

    static ITEM_FIELDS: [FieldMeta; 1] = [FieldMeta::new("name")];
    static ITEM: ModelMeta = ModelMeta::new("shop", "item").fields(&ITEM_FIELDS);
    static ITEMX: ModelMeta = ModelMeta::new("shop", "itemx");

    fn client(namespace: &str) -> Client {
        Client::new(Arc::new(MemoryBackend::new()), Options::new().namespace(namespace)).unwrap()
    }

    #[test]
    fn test_key_layout() {
        let keys = Keys::new(&client("ns:"), Model::of(&ITEM));
        assert_eq!(keys.basekey(), "ns:shop.item");
        assert_eq!(keys.ids(), "ns:shop.item:id");
        assert_eq!(keys.object("3"), "ns:shop.item:obj:3");
        assert_eq!(keys.counter(), "ns:shop.item:ids");
        assert_eq!(keys.pattern(), "ns:shop.item:*");

        let keys = Keys::new(&client("a[1]*"), Model::of(&ITEM));
        assert_eq!(keys.pattern(), "a\\[1\\]\\*shop.item:*");
    }

    #[test]
    fn test_flush_only_touches_own_keys() {
        let client = client("");
        let item = Manager::new(Model::of(&ITEM), client.clone());
        let itemx = Manager::new(Model::of(&ITEMX), client.clone());

        let mut session = item.session();
        session.add(Instance::new(item.model()).set("name", "a")).unwrap();
        session.add(Instance::new(item.model()).set("name", "b")).unwrap();
        session.commit().unwrap();
        client.execute(&Command::new("SADD").arg("shop.itemx:id").arg("1")).unwrap();

        // two hashes, the id set and the counter
        assert_eq!(item.flush().unwrap(), 4);
        assert_eq!(item.query().count().unwrap(), 0);
        assert_eq!(itemx.flush().unwrap(), 1);
    }
}
