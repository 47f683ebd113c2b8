//! Identity invariants of the entity cache under arbitrary edits.

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use quarry_core::testing::Tag;
use quarry_core::{EntityId, Shared, share};
use quarry_store::EntityCache;

#[derive(Debug, Clone)]
enum Op {
    Add { id: Option<i64>, name: &'static str },
    Remove { index: usize },
    Replace { index: usize, name: &'static str },
    Rename { index: usize, name: &'static str },
    Rebuild,
}

fn name() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["red", "green", "blue", "cyan", "plum"])
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (prop::option::of(1i64..6), name()).prop_map(|(id, name)| Op::Add { id, name }),
        2 => any::<usize>().prop_map(|index| Op::Remove { index }),
        2 => (any::<usize>(), name()).prop_map(|(index, name)| Op::Replace { index, name }),
        1 => (any::<usize>(), name()).prop_map(|(index, name)| Op::Rename { index, name }),
        1 => Just(Op::Rebuild),
    ]
}

fn tag(id: Option<i64>, name: &str) -> Shared<Tag> {
    share(Tag {
        id: id.map(EntityId::new),
        ..Tag::new(name, 1.0)
    })
}

fn pick(cache: &EntityCache<Tag>, index: usize) -> Option<Shared<Tag>> {
    if cache.is_empty() {
        return None;
    }
    Some(cache.entities()[index % cache.len()].clone())
}

fn assert_unique(cache: &EntityCache<Tag>) {
    let mut ids = HashSet::new();
    let mut slugs = HashSet::new();
    for entity in cache.iter() {
        let entity = entity.read().unwrap();
        if let Some(id) = entity.id {
            assert!(ids.insert(id), "id {id} held twice");
        }
        assert!(slugs.insert(entity.name.clone()), "slug {} held twice", entity.name);
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

    #[test]
    fn identities_stay_unique_and_removed_entities_stay_gone(ops in prop::collection::vec(op(), 1..40)) {
        let mut cache = EntityCache::new();
        let mut removed: Vec<Shared<Tag>> = Vec::new();

        for op in ops {
            match op {
                Op::Add { id, name } => {
                    let _ = cache.add(tag(id, name));
                }
                Op::Remove { index } => {
                    if let Some(entity) = pick(&cache, index) {
                        removed.push(cache.remove(&entity).unwrap());
                    }
                }
                Op::Replace { index, name } => {
                    if let Some(current) = pick(&cache, index) {
                        let id = current.read().unwrap().id;
                        if let Ok(old) = cache.replace(tag(id.map(EntityId::get), name)) {
                            removed.push(old);
                        }
                    }
                }
                Op::Rename { index, name } => {
                    // Only renames that keep slugs unique; the cache cannot see in-place edits.
                    let taken = cache.iter().any(|e| e.read().unwrap().name == name);
                    if let (false, Some(entity)) = (taken, pick(&cache, index)) {
                        entity.write().unwrap().name = name.to_string();
                        cache.invalidate();
                    }
                }
                Op::Rebuild => cache.rebuild(),
            }

            assert_unique(&cache);
            for gone in &removed {
                let (id, slug) = {
                    let gone = gone.read().unwrap();
                    (gone.id, gone.name.clone())
                };
                if let Some(id) = id {
                    prop_assert!(cache.get_by_id(id).is_none_or(|e| !Arc::ptr_eq(&e, gone)));
                }
                prop_assert!(cache.get_by_slug(&slug).is_none_or(|e| !Arc::ptr_eq(&e, gone)));
            }
        }
    }

    #[test]
    fn rebuild_is_idempotent(ops in prop::collection::vec(op(), 0..30)) {
        let mut cache = EntityCache::new();
        for op in ops {
            if let Op::Add { id, name } = op {
                let _ = cache.add(tag(id, name));
            }
        }

        cache.rebuild();
        let first = (cache.indexed_ids(), cache.indexed_slugs());
        cache.rebuild();
        prop_assert_eq!(first, (cache.indexed_ids(), cache.indexed_slugs()));
        prop_assert!(!cache.is_stale());
    }
}
