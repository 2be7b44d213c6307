//! Read access to stored instances.

use super::manager::Keys;
use super::model::{Instance, Model, ID_FIELD};
use crate::backend::{Command, Reply};
use crate::client::Client;
use crate::{Error, Result};
use std::collections::BTreeSet;

/// A lazily evaluated selection of instances of one model.
///
/// Nothing is read until one of `all`, `get`, `count`, `ids` or `values`
/// is called. Each of them costs at most two round trips: one for the id
/// set, one for the instance hashes.
#[derive(Debug, Clone)]
pub struct Query {
    model: Model,
    backend: Client,
    ids: Option<BTreeSet<String>>,
    projection: Option<&'static str>,
}

impl Query {
    /// A query over every instance of `model` stored on `backend`.
    pub fn new(model: Model, backend: Client) -> Self {
        Self { model, backend, ids: None, projection: None }
    }

    /// The queried model.
    pub fn model(&self) -> Model {
        self.model
    }

    /// The backend read from.
    pub fn backend(&self) -> &Client {
        &self.backend
    }

    /// Restricts the query to `ids`. Restrictions accumulate.
    pub fn filter_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: BTreeSet<String> = ids.into_iter().map(Into::into).collect();
        self.ids = Some(match self.ids.take() {
            Some(current) => current.intersection(&ids).cloned().collect(),
            None => ids,
        });
        self
    }

    /// Projects the query onto one field: `id` or a declared field.
    pub fn get_field(mut self, name: &str) -> Result<Self> {
        let field = if name == ID_FIELD {
            ID_FIELD
        } else {
            self.model
                .field(name)
                .map(|f| f.name)
                .ok_or_else(|| {
                    Error::invalid_argument(format!("{} has no field '{}'", self.model, name))
                })?
        };
        self.projection = Some(field);
        Ok(self)
    }

    /// The projected field, if any.
    pub fn projection(&self) -> Option<&str> {
        self.projection
    }

    /// Ids of the selected instances, in id order.
    pub fn ids(&self) -> Result<Vec<String>> {
        let key = Keys::new(&self.backend, self.model).ids();
        let reply = self.backend.execute(&Command::new("SMEMBERS").arg(key))?;
        let mut ids: Vec<String> = reply
            .into_strings()
            .into_iter()
            .filter(|id| self.ids.as_ref().map_or(true, |allowed| allowed.contains(id)))
            .collect();
        ids.sort_by(|a, b| id_order(a, b));
        Ok(ids)
    }

    /// Number of selected instances.
    pub fn count(&self) -> Result<usize> {
        if self.ids.is_some() {
            return Ok(self.ids()?.len());
        }
        let key = Keys::new(&self.backend, self.model).ids();
        let reply = self.backend.execute(&Command::new("SCARD").arg(key))?;
        Ok(reply.as_int().unwrap_or(0).max(0) as usize)
    }

    /// Every selected instance, in id order.
    pub fn all(&self) -> Result<Vec<Instance>> {
        let ids = self.ids()?;
        self.load(ids)
    }

    /// The instance with `id`.
    pub fn get(&self, id: &str) -> Result<Instance> {
        if self.ids.as_ref().is_some_and(|allowed| !allowed.contains(id)) {
            return Err(self.missing(id));
        }
        let keys = Keys::new(&self.backend, self.model);
        let mut pipe = self.backend.pipeline();
        pipe.command(Command::new("SISMEMBER").arg(keys.ids()).arg(id));
        pipe.hgetall(keys.object(id));
        let mut results = pipe.execute(false)?.into_iter();

        let member = results.next().ok_or_else(|| Error::internal("missing SISMEMBER reply"))??;
        if !member.as_bool() {
            return Err(self.missing(id));
        }
        let hash = results.next().ok_or_else(|| Error::internal("missing HGETALL reply"))??;
        Ok(self.build(id.to_string(), hash))
    }

    /// Values of the projected field for every selected instance, in id
    /// order. Instances without a value for the field are skipped.
    pub fn values(&self) -> Result<Vec<String>> {
        let field = self
            .projection
            .ok_or_else(|| {
                Error::invalid_argument("values() requires a field projection, see get_field()")
            })?;
        if field == ID_FIELD {
            return self.ids();
        }
        let keys = Keys::new(&self.backend, self.model);
        let ids = self.ids()?;
        let mut pipe = self.backend.pipeline();
        for id in &ids {
            pipe.command(Command::new("HGET").arg(keys.object(id)).arg(field));
        }
        let mut values = Vec::with_capacity(ids.len());
        for result in pipe.execute(false)? {
            if let Some(value) = result?.as_str() {
                values.push(value.to_string());
            }
        }
        Ok(values)
    }

    /// Follows the related field `field` to a query on its model,
    /// restricted to the referenced instances. The related model is read
    /// from the same backend.
    pub fn related(&self, field: &str) -> Result<Query> {
        let relmodel = self
            .model
            .field(field)
            .and_then(|f| f.relmodel)
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "{}.{} is not a related field",
                    self.model, field
                ))
            })?;
        let referenced = self.clone().get_field(field)?.values()?;
        Ok(Query::new(relmodel, self.backend.clone()).filter_ids(referenced))
    }

    fn load(&self, ids: Vec<String>) -> Result<Vec<Instance>> {
        let keys = Keys::new(&self.backend, self.model);
        let mut pipe = self.backend.pipeline();
        for id in &ids {
            pipe.hgetall(keys.object(id));
        }
        let hashes = pipe.execute(false)?;
        ids.into_iter().zip(hashes).map(|(id, hash)| Ok(self.build(id, hash?))).collect()
    }

    fn build(&self, id: String, hash: Reply) -> Instance {
        let mut instance = Instance::with_id(self.model, id);
        let mut flat = hash.into_strings().into_iter();
        while let (Some(field), Some(value)) = (flat.next(), flat.next()) {
            instance.insert(field, value);
        }
        instance
    }

    fn missing(&self, id: &str) -> Error {
        Error::not_found(format!("{} with id {}", self.model, id))
    }
}

/// Numeric ids sort numerically and before any other id.
fn id_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::Options;
    use crate::odm::model::{FieldMeta, ModelMeta};
    use crate::odm::session::Session;
    use std::sync::Arc;

    static AUTHOR_FIELDS: [FieldMeta; 1] = [FieldMeta::new("name")];
    static AUTHOR: ModelMeta = ModelMeta::new("lib", "author").fields(&AUTHOR_FIELDS);
    static BOOK_FIELDS: [FieldMeta; 2] =
        [FieldMeta::new("title"), FieldMeta::related("author", Model::of(&AUTHOR))];
    static BOOK: ModelMeta = ModelMeta::new("lib", "book").fields(&BOOK_FIELDS);

    fn populated() -> Client {
        let client = Client::new(Arc::new(MemoryBackend::new()), Options::default()).unwrap();
        let mut session = Session::new(client.clone());
        for name in ["tolkien", "le guin", "pratchett"] {
            session.add(Instance::new(Model::of(&AUTHOR)).set("name", name)).unwrap();
        }
        for (title, author) in [("hobbit", "1"), ("earthsea", "2"), ("silmarillion", "1")] {
            session
                .add(Instance::new(Model::of(&BOOK)).set("title", title).set("author", author))
                .unwrap();
        }
        session.commit().unwrap();
        client
    }

    #[test]
    fn test_all_and_get() {
        let client = populated();
        let books = Query::new(Model::of(&BOOK), client.clone());
        let all = books.all().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].get("title"), Some("silmarillion"));

        let hobbit = books.get("1").unwrap();
        assert_eq!(hobbit.get("author"), Some("1"));
        assert!(matches!(books.get("99"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_projection() {
        let client = populated();
        let authors = Query::new(Model::of(&AUTHOR), client);
        assert_eq!(
            authors.clone().get_field("name").unwrap().values().unwrap(),
            vec!["tolkien", "le guin", "pratchett"]
        );
        assert_eq!(authors.clone().get_field("id").unwrap().values().unwrap(), vec!["1", "2", "3"]);
        assert_eq!(authors.clone().get_field("id").unwrap().projection(), Some("id"));
        assert!(authors.clone().get_field("age").is_err());
        assert!(authors.values().is_err());
    }

    #[test]
    fn test_related() {
        let client = populated();
        let books = Query::new(Model::of(&BOOK), client).filter_ids(["1", "3"]);
        let authors = books.related("author").unwrap();
        assert_eq!(authors.model(), Model::of(&AUTHOR));
        let names = authors.get_field("name").unwrap().values().unwrap();
        assert_eq!(names, vec!["tolkien"]);
        assert!(books.related("title").is_err());
    }

    #[test]
    fn test_filter_ids_accumulate() {
        let client = populated();
        let authors = Query::new(Model::of(&AUTHOR), client).filter_ids(["1", "2", "7"]);
        assert_eq!(authors.count().unwrap(), 2);
        let authors = authors.filter_ids(["2", "3"]);
        assert_eq!(authors.ids().unwrap(), vec!["2"]);
        assert!(authors.get("1").is_err());
    }

    #[test]
    fn test_id_order() {
        let mut ids = vec!["10", "b", "2", "a", "1"];
        ids.sort_by(|a, b| id_order(a, b));
        assert_eq!(ids, vec!["1", "2", "10", "a", "b"]);
    }
}
