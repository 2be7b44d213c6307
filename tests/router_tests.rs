// Model registry tests
// These tests verify registration, related-model expansion, backend routing,
// cross-model sessions, unregistration and flushing through the Router

use kvodm::odm::{
    model_iterator, Application, ApplicationRegistry, FieldMeta, Instance, ManyToManyMeta, Model,
    ModelMeta, Router, RouterOptions, StaticApplication,
};
use kvodm::{Client, Error, MemoryBackend, Options};
use std::collections::HashMap;
use std::sync::Arc;

// finance application
static INSTRUMENT_FIELDS: [FieldMeta; 2] = [FieldMeta::new("name"), FieldMeta::new("ccy")];
static INSTRUMENT: ModelMeta = ModelMeta::new("finance", "instrument").fields(&INSTRUMENT_FIELDS);
static FUND_FIELDS: [FieldMeta; 1] = [FieldMeta::new("name")];
static FUND: ModelMeta = ModelMeta::new("finance", "fund").fields(&FUND_FIELDS);
static POSITION_FIELDS: [FieldMeta; 3] = [
    FieldMeta::related("instrument", Model::of(&INSTRUMENT)),
    FieldMeta::related("fund", Model::of(&FUND)),
    FieldMeta::new("size"),
];
static POSITION: ModelMeta = ModelMeta::new("finance", "position").fields(&POSITION_FIELDS);
static FINANCE_MODELS: [Model; 3] =
    [Model::of(&INSTRUMENT), Model::of(&FUND), Model::of(&POSITION)];

// social application
static PERSON_FIELDS: [FieldMeta; 2] =
    [FieldMeta::new("name"), FieldMeta::related("mentor", Model::of(&PERSON))];
static PERSON_M2M: [ManyToManyMeta; 1] =
    [ManyToManyMeta::new("friends", Model::of(&PERSON)).through(Model::of(&FRIENDSHIP))];
static PERSON: ModelMeta = ModelMeta::new("social", "person")
    .fields(&PERSON_FIELDS)
    .manytomany(&PERSON_M2M);
static FRIENDSHIP: ModelMeta = ModelMeta::new("social", "friendship");
static ANIMAL: ModelMeta = ModelMeta::new("social", "animal").abstract_model();
static SOCIAL_MODELS: [Model; 2] = [Model::of(&ANIMAL), Model::of(&PERSON)];

// another application reusing a model name
static OTHER_FUND: ModelMeta = ModelMeta::new("other", "fund");

// blog application declaring only posts; tags are reached through the relation
static TAG_FIELDS: [FieldMeta; 1] = [FieldMeta::new("label")];
static TAG: ModelMeta = ModelMeta::new("taxonomy", "tag").fields(&TAG_FIELDS);
static POST_FIELDS: [FieldMeta; 2] =
    [FieldMeta::new("title"), FieldMeta::related("tag", Model::of(&TAG))];
static POST: ModelMeta = ModelMeta::new("blog", "post").fields(&POST_FIELDS);
static BLOG_MODELS: [Model; 1] = [Model::of(&POST)];

fn client() -> Client {
    env_logger::try_init().ok();
    Client::new(Arc::new(MemoryBackend::new()), Options::default()).unwrap()
}

fn registry() -> ApplicationRegistry {
    let mut registry = ApplicationRegistry::new();
    registry
        .register("finance.models", Arc::new(StaticApplication::new("finance", &FINANCE_MODELS)))
        .register("social.models", Arc::new(StaticApplication::new("social", &SOCIAL_MODELS)))
        .register("blog.models", Arc::new(StaticApplication::new("blog", &BLOG_MODELS)));
    registry
}

/// Registering the same model twice returns None the second time
#[test]
fn test_register_twice() {
    let backend = client();
    let mut router = Router::new(RouterOptions::new().default_backend(backend.clone()));
    assert_eq!(router.register(Model::of(&INSTRUMENT), None, false).unwrap(), Some(backend));
    assert_eq!(router.register(Model::of(&INSTRUMENT), None, false).unwrap(), None);
    assert_eq!(router.len(), 1);
}

/// Related models follow their owner onto the same backend
#[test]
fn test_register_related() {
    let backend = client();
    let mut router = Router::default();
    router.register(Model::of(&POSITION), Some(backend.clone()), true).unwrap();
    assert_eq!(
        router.registered_models(),
        vec![Model::of(&FUND), Model::of(&INSTRUMENT), Model::of(&POSITION)]
    );
    assert_eq!(router.get(Model::of(&FUND)).unwrap().backend(), &backend);
    assert!(router.contains(Model::of(&INSTRUMENT)));
}

/// A model already registered keeps its original backend
#[test]
fn test_existing_registration_wins() {
    let first = client();
    let second = client();
    let mut router = Router::default();
    router.register(Model::of(&FUND), Some(first.clone()), false).unwrap();
    assert_eq!(
        router.register(Model::of(&POSITION), Some(second.clone()), true).unwrap(),
        Some(second.clone())
    );
    assert_eq!(router.get(Model::of(&FUND)).unwrap().backend(), &first);
    assert_eq!(router.get(Model::of(&INSTRUMENT)).unwrap().backend(), &second);
}

/// Self references and cycles through junction models terminate
#[test]
fn test_self_reference() {
    let mut router = Router::new(RouterOptions::new().default_backend(client()));
    assert!(router.register(Model::of(&PERSON), None, true).unwrap().is_some());
    assert_eq!(router.registered_models(), vec![Model::of(&FRIENDSHIP), Model::of(&PERSON)]);
}

/// Abstract models are never registered
#[test]
fn test_abstract_model() {
    let mut router = Router::new(RouterOptions::new().default_backend(client()));
    assert_eq!(router.register(Model::of(&ANIMAL), None, true).unwrap(), None);
    assert!(router.is_empty());
}

#[test]
fn test_sessions_across_backends() {
    let mut router = Router::default();
    router.register(Model::of(&INSTRUMENT), Some(client()), false).unwrap();
    router.register(Model::of(&FUND), Some(client()), false).unwrap();

    let err = router.session(&[Model::of(&INSTRUMENT), Model::of(&FUND)]).unwrap_err();
    assert!(matches!(err, Error::InvalidTransaction(_)));
    assert!(matches!(router.session(&[]), Err(Error::InvalidTransaction(_))));
    assert!(router.session(&[Model::of(&FUND)]).unwrap().is_some());
    assert!(router.session(&[Model::of(&POSITION)]).unwrap().is_none());
}

/// A session refuses instances of models registered on another backend
#[test]
fn test_session_refuses_foreign_instance() {
    let home = client();
    let away = client();
    let mut router = Router::default();
    router.register(Model::of(&INSTRUMENT), Some(home.clone()), false).unwrap();
    router.register(Model::of(&FUND), Some(away.clone()), false).unwrap();
    router.register(Model::of(&PERSON), Some(home), false).unwrap();

    let mut session = router.session(&[Model::of(&INSTRUMENT)]).unwrap().unwrap();
    let err = session.add(Instance::new(Model::of(&FUND)).set("name", "alpha")).unwrap_err();
    assert!(matches!(err, Error::InvalidTransaction(_)));
    // models registered on the session backend are fine
    session.add(Instance::new(Model::of(&PERSON)).set("name", "ada")).unwrap();
    session.commit().unwrap();

    assert_eq!(router.query(Model::of(&FUND)).unwrap().count().unwrap(), 0);
    assert_eq!(router.query(Model::of(&PERSON)).unwrap().count().unwrap(), 1);
}

#[test]
fn test_session_on_shared_backend() {
    let backend = client();
    let mut router = Router::default();
    router.register(Model::of(&INSTRUMENT), Some(backend.clone()), false).unwrap();
    router.register(Model::of(&FUND), Some(backend.clone()), false).unwrap();
    let session = router.session(&[Model::of(&INSTRUMENT), Model::of(&FUND)]).unwrap().unwrap();
    assert_eq!(session.backend(), &backend);
}

/// The first model registered under a name owns it
#[test]
fn test_manager_for() {
    let mut router = Router::new(RouterOptions::new().default_backend(client()));
    router.register(Model::of(&FUND), None, false).unwrap();
    router.register(Model::of(&OTHER_FUND), None, false).unwrap();
    assert_eq!(router.manager_for("fund").unwrap().model(), Model::of(&FUND));

    router.unregister(Some(Model::of(&OTHER_FUND)));
    assert_eq!(router.manager_for("fund").unwrap().model(), Model::of(&FUND));
    router.unregister(Some(Model::of(&FUND)));
    assert!(router.manager_for("fund").is_none());
}

#[test]
fn test_unregister_all() {
    let mut router = Router::new(RouterOptions::new().default_backend(client()));
    router.register(Model::of(&POSITION), None, true).unwrap();
    let removed = router.unregister(None);
    assert_eq!(removed.len(), 3);
    assert!(router.is_empty());
    assert!(router.register(Model::of(&FUND), None, false).unwrap().is_some());
}

#[test]
fn test_add_and_flush() {
    let backend = client();
    let mut router = Router::new(RouterOptions::new().default_backend(backend.clone()));
    router.register(Model::of(&POSITION), None, true).unwrap();

    let instrument =
        router.add(Instance::new(Model::of(&INSTRUMENT)).set("name", "eurusd")).unwrap();
    let fund = router.add(Instance::new(Model::of(&FUND)).set("name", "alpha")).unwrap();
    router
        .add(
            Instance::new(Model::of(&POSITION))
                .set("instrument", instrument.id().unwrap())
                .set("fund", fund.id().unwrap())
                .set("size", "100"),
        )
        .unwrap();

    // each model holds an object hash, its id set and its counter
    assert_eq!(router.flush(&["fund"]).unwrap(), 6);
    assert_eq!(router.query(Model::of(&FUND)).unwrap().count().unwrap(), 1);
    assert_eq!(router.query(Model::of(&POSITION)).unwrap().count().unwrap(), 0);
    assert_eq!(router.flush(&[]).unwrap(), 3);
}

/// Exclusion goes by model name, across applications
#[test]
fn test_flush_excludes_by_name() {
    let mut router = Router::new(RouterOptions::new().default_backend(client()));
    router.register(Model::of(&FUND), None, false).unwrap();
    router.register(Model::of(&OTHER_FUND), None, false).unwrap();
    router.register(Model::of(&INSTRUMENT), None, false).unwrap();
    router.add(Instance::new(Model::of(&FUND)).set("name", "alpha")).unwrap();
    router.add(Instance::new(Model::of(&OTHER_FUND))).unwrap();
    router.add(Instance::new(Model::of(&INSTRUMENT)).set("name", "eurusd")).unwrap();

    // the instrument hash, id set and counter
    assert_eq!(router.flush(&["fund"]).unwrap(), 3);
    assert_eq!(router.query(Model::of(&FUND)).unwrap().count().unwrap(), 1);
    assert_eq!(router.query(Model::of(&OTHER_FUND)).unwrap().count().unwrap(), 1);
    assert_eq!(router.query(Model::of(&INSTRUMENT)).unwrap().count().unwrap(), 0);
}

/// Flushing managers spread over several backends
#[test]
fn test_flush_many_backends() {
    let mut router = Router::default();
    for model in [&INSTRUMENT, &FUND, &PERSON] {
        router.register(Model::of(model), Some(client()), false).unwrap();
    }
    for model in router.registered_models() {
        let mut session = router.session(&[model]).unwrap().unwrap();
        for _ in 0..5 {
            session.add(Instance::new(model)).unwrap();
        }
        session.commit().unwrap();
    }
    // per model: 5 ids in one set plus the counter; fields are empty so no hashes
    assert_eq!(router.flush(&[]).unwrap(), 6);
}

#[test]
fn test_register_applications() {
    let finance_backend = client();
    let default = client();
    let mut backends = HashMap::new();
    backends.insert("finance".to_string(), finance_backend.clone());

    let mut router = Router::new(RouterOptions::new().default_backend(default.clone()));
    let apps = Application::Many(vec!["finance".into(), "social".into(), "unknown".into()]);
    let registered = router.register_applications(&apps, &registry(), None, &backends).unwrap();
    assert_eq!(
        registered,
        vec![
            Model::of(&INSTRUMENT),
            Model::of(&FUND),
            Model::of(&POSITION),
            Model::of(&PERSON),
            Model::of(&FRIENDSHIP),
        ]
    );
    assert_eq!(router.get(Model::of(&FUND)).unwrap().backend(), &finance_backend);
    assert_eq!(router.get(Model::of(&PERSON)).unwrap().backend(), &default);
    // the junction model is reached through the relation and routed by its label
    assert_eq!(router.get(Model::of(&FRIENDSHIP)).unwrap().backend(), &default);

    let again = router.register_applications(&apps, &registry(), None, &backends).unwrap();
    assert!(again.is_empty());
}

/// Models reached only through relations are registered too
#[test]
fn test_register_applications_related() {
    let blog_backend = client();
    let mut backends = HashMap::new();
    backends.insert("blog".to_string(), blog_backend.clone());

    let mut router = Router::new(RouterOptions::new().default_backend(client()));
    let registered =
        router.register_applications(&"blog".into(), &registry(), None, &backends).unwrap();
    assert_eq!(registered, vec![Model::of(&POST), Model::of(&TAG)]);
    assert!(router.contains(Model::of(&TAG)));
    assert_eq!(router.get(Model::of(&POST)).unwrap().backend(), &blog_backend);
    // the tag belongs to another label and falls back to the default backend
    assert_ne!(router.get(Model::of(&TAG)).unwrap().backend(), &blog_backend);
}

#[test]
fn test_register_applications_filtered() {
    let special = client();
    let mut backends = HashMap::new();
    backends.insert("finance.fund".to_string(), special.clone());
    backends.insert("finance".to_string(), client());

    let mut router = Router::new(RouterOptions::new().default_backend(client()));
    let registered = router
        .register_applications(
            &"finance".into(),
            &registry(),
            Some(&["finance.fund", "finance.position"]),
            &backends,
        )
        .unwrap();
    assert_eq!(registered, vec![Model::of(&FUND), Model::of(&POSITION)]);
    assert_eq!(router.get(Model::of(&FUND)).unwrap().backend(), &special);
}

#[test]
fn test_model_iterator() {
    let registry = registry();
    assert!(model_iterator(&"nothing.here".into(), &registry, true).is_empty());
    let models = model_iterator(&"social".into(), &registry, true);
    assert_eq!(models, vec![Model::of(&PERSON), Model::of(&FRIENDSHIP)]);
}
