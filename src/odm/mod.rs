//! Object data mapping over the key-value store.
//!
//! - [`Model`] / [`ModelMeta`]: static model descriptions
//! - [`Router`]: the registry mapping models to their [`Manager`]
//! - [`Manager`]: one model bound to one backend
//! - [`Session`]: unit of work, committed atomically
//! - [`Query`]: reads, projections and related-model traversal
//! - [`Application`] / [`model_iterator`]: registering models by group

pub mod application;
pub mod manager;
pub mod model;
pub mod query;
pub mod router;
pub mod session;

pub use application::{
    model_iterator, Application, ApplicationRegistry, ModelProvider, StaticApplication,
};
pub use manager::Manager;
pub use model::{FieldMeta, Instance, ManyToManyMeta, Model, ModelMeta, ID_FIELD};
pub use query::Query;
pub use router::{models_from_model, Router, RouterOptions};
pub use session::Session;
