// Concurrency tests
// These tests share clients between threads and check that scripts, pipelines
// and sessions stay consistent under contention

use kvodm::odm::{FieldMeta, Instance, Manager, Model, ModelMeta};
use kvodm::{Client, Command, MemoryBackend, Options, Reply, ScriptDefinition};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

static EVENT_FIELDS: [FieldMeta; 1] = [FieldMeta::new("thread")];
static EVENT: ModelMeta = ModelMeta::new("log", "event").fields(&EVENT_FIELDS);

fn client() -> Client {
    env_logger::try_init().ok();
    Client::new(Arc::new(MemoryBackend::new()), Options::default()).unwrap()
}

/// Concurrent commits never hand out the same id twice
#[test]
fn test_concurrent_commits() {
    let manager = Manager::new(Model::of(&EVENT), client());
    let num_threads = 8;
    let per_thread = 25;

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let manager = manager.clone();
            thread::spawn(move || {
                let mut ids = Vec::new();
                for _ in 0..per_thread {
                    let mut session = manager.session();
                    let event = Instance::new(manager.model()).set("thread", t.to_string());
                    session.add(event).unwrap();
                    let saved = session.commit().unwrap();
                    ids.extend(saved.iter().map(|i| i.id().unwrap().to_string()));
                }
                ids
            })
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(all.insert(id), "duplicate id");
        }
    }
    assert_eq!(all.len(), num_threads * per_thread);
    assert_eq!(manager.query().count().unwrap(), num_threads * per_thread);
}

/// Scripts run atomically with respect to each other
#[test]
fn test_concurrent_scripts() {
    let client = client();
    client.scripts().register(ScriptDefinition::new(
        "bump",
        [
            "local v = tonumber(redis.call('get', KEYS[1]) or '0')\n",
            "redis.call('set', KEYS[1], v + 1)\n",
            "return v + 1",
        ],
    ));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let client = client.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    client.script_call("bump", &["counter"], &[] as &[&str]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let value = client.execute(&Command::new("GET").arg("counter")).unwrap();
    assert_eq!(value, Reply::bulk("200"));
}

/// Transactions are not interleaved with other writers
#[test]
fn test_concurrent_transactions() {
    let client = client();
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let client = client.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    let member = format!("{}-{}", t, i);
                    let mut tx = client.transaction();
                    tx.sadd("a", &[&member]).sadd("b", &[&member]);
                    for result in tx.execute(false).unwrap() {
                        assert_eq!(result.unwrap(), Reply::Integer(1));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let a = client.execute(&Command::new("SCARD").arg("a")).unwrap();
    let b = client.execute(&Command::new("SCARD").arg("b")).unwrap();
    assert_eq!(a, Reply::Integer(200));
    assert_eq!(a, b);
}
