//! Static model descriptors and model instances.
//!
//! Models are described by `static` [`ModelMeta`] values and referred to
//! through the [`Model`] handle, whose identity is the address of its
//! descriptor. Descriptors may reference each other, and themselves, through
//! related fields. Field lists live in their own statics.
//!
//! # Example
//!
//! ```
//! use kvodm::odm::{FieldMeta, Model, ModelMeta};
//!
//! static NODE_FIELDS: [FieldMeta; 2] =
//!     [FieldMeta::new("label"), FieldMeta::related("parent", Model::of(&NODE))];
//! static NODE: ModelMeta = ModelMeta::new("tree", "node").fields(&NODE_FIELDS);
//!
//! let node = Model::of(&NODE);
//! assert_eq!(node.key(), "tree.node");
//! assert_eq!(node.related_models(), vec![node]);
//! ```

use crate::{Error, Result};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Name of the implicit primary key.
pub const ID_FIELD: &str = "id";

/// A declared field.
#[derive(Debug)]
pub struct FieldMeta {
    /// Field name.
    pub name: &'static str,
    /// Model this field references, for foreign-key-like fields.
    pub relmodel: Option<Model>,
    /// Junction model carrying the relation, if any.
    pub through: Option<Model>,
}

impl FieldMeta {
    /// A plain value field.
    pub const fn new(name: &'static str) -> Self {
        Self { name, relmodel: None, through: None }
    }

    /// A field holding the id of an instance of `model`.
    pub const fn related(name: &'static str, model: Model) -> Self {
        Self { name, relmodel: Some(model), through: None }
    }

    /// Sets the junction model.
    pub const fn through(mut self, model: Model) -> Self {
        self.through = Some(model);
        self
    }
}

/// A many-to-many relation.
#[derive(Debug)]
pub struct ManyToManyMeta {
    /// Relation name.
    pub name: &'static str,
    /// The related model.
    pub model: Model,
    /// Junction model, if any.
    pub through: Option<Model>,
}

impl ManyToManyMeta {
    /// Creates a relation to `model`.
    pub const fn new(name: &'static str, model: Model) -> Self {
        Self { name, model, through: None }
    }

    /// Sets the junction model.
    pub const fn through(mut self, model: Model) -> Self {
        self.through = Some(model);
        self
    }
}

/// Static description of a model.
#[derive(Debug)]
pub struct ModelMeta {
    /// Application the model belongs to.
    pub app_label: &'static str,
    /// Model name, unique within its application.
    pub name: &'static str,
    /// Abstract models are never registered.
    pub abstract_model: bool,
    /// Declared fields, in order. The primary key is implicit.
    pub fields: &'static [FieldMeta],
    /// Many-to-many relations.
    pub manytomany: &'static [ManyToManyMeta],
}

impl ModelMeta {
    /// A concrete model with no fields.
    pub const fn new(app_label: &'static str, name: &'static str) -> Self {
        Self { app_label, name, abstract_model: false, fields: &[], manytomany: &[] }
    }

    /// Sets the declared fields.
    pub const fn fields(mut self, fields: &'static [FieldMeta]) -> Self {
        self.fields = fields;
        self
    }

    /// Sets the many-to-many relations.
    pub const fn manytomany(mut self, relations: &'static [ManyToManyMeta]) -> Self {
        self.manytomany = relations;
        self
    }

    /// Marks the model abstract.
    pub const fn abstract_model(mut self) -> Self {
        self.abstract_model = true;
        self
    }
}

/// Handle on a static model descriptor. Two handles are equal iff they
/// point at the same descriptor.
#[derive(Clone, Copy)]
pub struct Model(&'static ModelMeta);

impl Model {
    /// Wraps a descriptor.
    pub const fn of(meta: &'static ModelMeta) -> Self {
        Model(meta)
    }

    /// The descriptor.
    pub fn meta(&self) -> &'static ModelMeta {
        self.0
    }

    /// Model name.
    pub fn name(&self) -> &'static str {
        self.0.name
    }

    /// Application label.
    pub fn app_label(&self) -> &'static str {
        self.0.app_label
    }

    /// `"{app_label}.{name}"`.
    pub fn key(&self) -> String {
        format!("{}.{}", self.0.app_label, self.0.name)
    }

    /// Returns true for abstract models.
    pub fn is_abstract(&self) -> bool {
        self.0.abstract_model
    }

    /// Declared fields.
    pub fn fields(&self) -> &'static [FieldMeta] {
        self.0.fields
    }

    /// Looks up a declared field.
    pub fn field(&self, name: &str) -> Option<&'static FieldMeta> {
        self.0.fields.iter().find(|f| f.name == name)
    }

    /// Many-to-many relations.
    pub fn manytomany(&self) -> &'static [ManyToManyMeta] {
        self.0.manytomany
    }

    /// Directly related models, in declaration order: each field's
    /// `relmodel` and `through`, then each many-to-many `model` and
    /// `through`. Duplicates are kept.
    pub fn related_models(&self) -> Vec<Model> {
        let from_fields = self
            .0
            .fields
            .iter()
            .flat_map(|f| f.relmodel.into_iter().chain(f.through));
        let from_m2m = self
            .0
            .manytomany
            .iter()
            .flat_map(|m| std::iter::once(m.model).chain(m.through));
        from_fields.chain(from_m2m).collect()
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for Model {}

impl Hash for Model {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(self.0, state)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Model({})", self.key())
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0.app_label, self.0.name)
    }
}

impl Serialize for Model {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A record of a model.
///
/// Related fields hold the id of the related instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instance {
    model: Model,
    id: Option<String>,
    fields: BTreeMap<String, String>,
}

impl Instance {
    /// A new, unsaved instance.
    pub fn new(model: Model) -> Self {
        Self { model, id: None, fields: BTreeMap::new() }
    }

    /// An instance with a known id.
    pub fn with_id(model: Model, id: impl Into<String>) -> Self {
        Self { model, id: Some(id.into()), fields: BTreeMap::new() }
    }

    /// Sets a field, builder style.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(field, value);
        self
    }

    /// Sets a field.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    /// The model.
    pub fn model(&self) -> Model {
        self.model
    }

    /// The id, once saved.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub(crate) fn assign_id(&mut self, id: String) {
        self.id = Some(id);
    }

    /// Returns true if the instance has never been saved.
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// Value of `field`; `id` returns the primary key.
    pub fn get(&self, field: &str) -> Option<&str> {
        if field == ID_FIELD {
            return self.id();
        }
        self.fields.get(field).map(String::as_str)
    }

    /// Field values, ordered by name.
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Checks every field against the model declaration.
    pub fn validate(&self) -> Result<()> {
        if self.model.is_abstract() {
            return Err(Error::invalid_argument(format!("model {} is abstract", self.model)));
        }
        match self.fields.keys().find(|name| self.model.field(name).is_none()) {
            Some(name) => Err(Error::invalid_argument(format!(
                "{} has no field '{}'",
                self.model, name
            ))),
            None => Ok(()),
        }
    }

    /// JSON rendering `{"model": ..., "id": ..., "fields": {...}}`.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    static BASE: ModelMeta = ModelMeta::new("test", "base").abstract_model();
    static USER_FIELDS: [FieldMeta; 1] = [FieldMeta::new("name")];
    static USER: ModelMeta = ModelMeta::new("test", "user").fields(&USER_FIELDS);
    static GROUP_FIELDS: [FieldMeta; 1] = [FieldMeta::related("owner", Model::of(&USER))];
    static GROUP_M2M: [ManyToManyMeta; 1] =
        [ManyToManyMeta::new("members", Model::of(&USER)).through(Model::of(&MEMBERSHIP))];
    static GROUP: ModelMeta = ModelMeta::new("test", "group")
        .fields(&GROUP_FIELDS)
        .manytomany(&GROUP_M2M);
    static MEMBERSHIP: ModelMeta = ModelMeta::new("test", "membership");
    static USER_TWIN: ModelMeta = ModelMeta::new("test", "user");

    #[test]
    fn test_identity_is_by_descriptor() {
        let user = Model::of(&USER);
        assert_eq!(user, Model::of(&USER));
        assert_ne!(user, Model::of(&USER_TWIN));
        assert_eq!(user.key(), Model::of(&USER_TWIN).key());

        let set: HashSet<Model> =
            [user, Model::of(&USER), Model::of(&USER_TWIN)].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_related_models_order() {
        let group = Model::of(&GROUP);
        assert_eq!(
            group.related_models(),
            vec![Model::of(&USER), Model::of(&USER), Model::of(&MEMBERSHIP)]
        );
    }

    #[test]
    fn test_instance_validation() {
        let user = Model::of(&USER);
        assert!(Instance::new(user).set("name", "luca").validate().is_ok());
        let err = Instance::new(user).set("age", "3").validate().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(Instance::new(Model::of(&BASE)).validate().is_err());
    }

    #[test]
    fn test_instance_json() {
        let json = Instance::with_id(Model::of(&USER), "7").set("name", "ada").to_json().unwrap();
        assert_eq!(json, r#"{"model":"test.user","id":"7","fields":{"name":"ada"}}"#);
        assert_eq!(Instance::with_id(Model::of(&USER), "7").get("id"), Some("7"));
    }
}
