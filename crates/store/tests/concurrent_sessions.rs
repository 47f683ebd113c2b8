//! Per-thread sessions committing into one shared repository.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use quarry_core::share;
use quarry_core::testing::Tag;
use quarry_store::{MemoryRepository, Repository, RepositoryConfig, SessionFactory};

const THREADS: usize = 8;
const PER_THREAD: usize = 25;

#[test]
fn threads_commit_disjoint_ids() {
    let factory = Arc::new(SessionFactory::new(Arc::new(MemoryRepository::new(RepositoryConfig::named(
        "tags",
    )))));

    let workers: Vec<_> = (0..THREADS)
        .map(|worker| {
            let factory = Arc::clone(&factory);
            thread::spawn(move || {
                let session = factory.session().unwrap();
                let mut session = session.lock().unwrap();
                for n in 0..PER_THREAD {
                    session.add(share(Tag::new(format!("t{worker}-{n}"), n as f64))).unwrap();
                }
                session.commit().unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(factory.active().unwrap(), THREADS);
    let tags = factory.repository().load::<Tag>().unwrap();
    assert_eq!(tags.len(), THREADS * PER_THREAD);
    let ids: HashSet<_> = tags.iter().map(|t| t.read().unwrap().id.unwrap()).collect();
    assert_eq!(ids.len(), THREADS * PER_THREAD);
}

#[test]
fn each_thread_sees_its_own_session() {
    let factory = Arc::new(SessionFactory::new(Arc::new(MemoryRepository::default())));
    let here = factory.session().unwrap();
    assert!(Arc::ptr_eq(&here, &factory.session().unwrap()));

    let other = {
        let factory = Arc::clone(&factory);
        thread::spawn(move || factory.session().unwrap()).join().unwrap()
    };
    assert!(!Arc::ptr_eq(&here, &other));
    assert_eq!(factory.active().unwrap(), 2);

    assert!(factory.release().unwrap());
    assert!(!factory.release().unwrap());
    assert_eq!(factory.active().unwrap(), 1);
}
