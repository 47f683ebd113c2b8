use std::sync::{Arc, Mutex, MutexGuard};
use std::vec;

use quarry_core::{Entity, EntityId, Schema, Shared};
use quarry_query::{Comparator, Predicate, compile_filter, compile_order};

use crate::error::{StoreError, StoreResult};
use crate::handle::{keys, read, write};
use crate::repository::Repository;
use crate::session::Session;

use super::{Aggregate, View};

/// Children of one parent, as seen by a relationship-scoped aggregate.
pub trait ChildSource<E>: Send + Sync {
    fn children(&self) -> Vec<Shared<E>>;

    /// Append `child` and point its back reference at the parent.
    fn attach(&self, child: &Shared<E>);

    /// Drop `child` (matched by identity, else by id) and clear its back
    /// reference. Returns whether it was a child.
    fn detach(&self, child: &Shared<E>) -> bool;

    /// Swap in `child` for the child with the same id.
    fn replace(&self, child: &Shared<E>) -> bool;
}

/// A parent's to-many collection plus the inverse to-one on the child.
pub struct Relationship<P, E> {
    parent: Shared<P>,
    children: fn(&P) -> &Vec<Shared<E>>,
    children_mut: fn(&mut P) -> &mut Vec<Shared<E>>,
    back_reference: Option<fn(&mut E, Option<Shared<P>>)>,
}

impl<P: Entity, E: Entity> Relationship<P, E> {
    pub fn new(
        parent: Shared<P>,
        children: fn(&P) -> &Vec<Shared<E>>,
        children_mut: fn(&mut P) -> &mut Vec<Shared<E>>,
    ) -> Self {
        Self {
            parent,
            children,
            children_mut,
            back_reference: None,
        }
    }

    pub fn with_back_reference(mut self, set: fn(&mut E, Option<Shared<P>>)) -> Self {
        self.back_reference = Some(set);
        self
    }

    pub fn parent(&self) -> &Shared<P> {
        &self.parent
    }

    fn position(&self, child: &Shared<E>) -> Option<usize> {
        let parent = read(&self.parent);
        let children = (self.children)(&parent);
        children.iter().position(|c| Arc::ptr_eq(c, child)).or_else(|| {
            let id = read(child).id()?;
            children.iter().position(|c| read(c).id() == Some(id))
        })
    }
}

impl<P: Entity, E: Entity> ChildSource<E> for Relationship<P, E> {
    fn children(&self) -> Vec<Shared<E>> {
        (self.children)(&read(&self.parent)).clone()
    }

    fn attach(&self, child: &Shared<E>) {
        (self.children_mut)(&mut write(&self.parent)).push(child.clone());
        if let Some(set) = self.back_reference {
            set(&mut write(child), Some(self.parent.clone()));
        }
    }

    fn detach(&self, child: &Shared<E>) -> bool {
        let Some(position) = self.position(child) else {
            return false;
        };
        let removed = (self.children_mut)(&mut write(&self.parent)).remove(position);
        if let Some(set) = self.back_reference {
            set(&mut write(&removed), None);
            if !Arc::ptr_eq(&removed, child) {
                set(&mut write(child), None);
            }
        }
        true
    }

    fn replace(&self, child: &Shared<E>) -> bool {
        let Some(position) = self.position(child) else {
            return false;
        };
        (self.children_mut)(&mut write(&self.parent))[position] = child.clone();
        if let Some(set) = self.back_reference {
            set(&mut write(child), Some(self.parent.clone()));
        }
        true
    }
}

/// Aggregate over a session, optionally scoped to one parent's children.
pub struct MemoryAggregate<E, R: Repository> {
    session: Arc<Mutex<Session<R>>>,
    schema: Arc<Schema>,
    relationship: Option<Box<dyn ChildSource<E>>>,
    view: View,
}

impl<E: Entity, R: Repository> MemoryAggregate<E, R> {
    pub fn new(session: Arc<Mutex<Session<R>>>, schema: Arc<Schema>) -> Self {
        Self {
            session,
            schema,
            relationship: None,
            view: View::default(),
        }
    }

    /// Aggregate over the children in `relationship`.
    pub fn for_relationship(
        session: Arc<Mutex<Session<R>>>,
        schema: Arc<Schema>,
        relationship: impl ChildSource<E> + 'static,
    ) -> Self {
        Self {
            relationship: Some(Box::new(relationship)),
            ..Self::new(session, schema)
        }
    }

    fn session(&self) -> StoreResult<MutexGuard<'_, Session<R>>> {
        self.session.lock().map_err(|_| StoreError::LockPoisoned("session"))
    }

    fn predicate(&self) -> StoreResult<Option<Predicate>> {
        let Some(filter) = &self.view.filter else {
            return Ok(None);
        };
        Ok(Some(compile_filter::<E>(&self.schema, filter)?))
    }

    fn comparator(&self) -> StoreResult<Option<Comparator>> {
        let Some(order) = &self.view.order else {
            return Ok(None);
        };
        Ok(Some(compile_order::<E>(&self.schema, order)?))
    }

    fn base(&self) -> StoreResult<Vec<Shared<E>>> {
        match &self.relationship {
            Some(relationship) => Ok(relationship.children()),
            None => self.session()?.all::<E>(),
        }
    }

    fn matching(&self, predicate: Option<&Predicate>) -> StoreResult<Vec<Shared<E>>> {
        let mut entities = self.base()?;
        if let Some(predicate) = predicate {
            entities.retain(|e| predicate(&**e));
        }
        Ok(entities)
    }

    /// The single entity in the view matching `key`.
    fn find(
        &self,
        predicate: Option<&Predicate>,
        key: &str,
        matches: impl Fn(&E) -> bool,
    ) -> StoreResult<Option<Shared<E>>> {
        let mut found = self.matching(predicate)?.into_iter().filter(|e| matches(&read(e)));
        let first = found.next();
        if found.next().is_some() {
            return Err(StoreError::duplicate_result(E::TYPE_NAME, key));
        }
        Ok(first)
    }

    fn passes(predicate: Option<&Predicate>, entity: Option<Shared<E>>) -> Option<Shared<E>> {
        entity.filter(|e| predicate.is_none_or(|p| p(&**e)))
    }
}

impl<E: Entity, R: Repository> Aggregate<E> for MemoryAggregate<E, R> {
    fn view(&self) -> &View {
        &self.view
    }

    fn view_mut(&mut self) -> &mut View {
        &mut self.view
    }

    fn count(&self) -> StoreResult<usize> {
        let predicate = self.predicate()?;
        if self.view.is_suppressed() {
            return Ok(0);
        }
        Ok(self.matching(predicate.as_ref())?.len())
    }

    fn iterator(&self) -> StoreResult<vec::IntoIter<Shared<E>>> {
        let predicate = self.predicate()?;
        let comparator = self.comparator()?;
        if self.view.is_suppressed() {
            return Ok(Vec::new().into_iter());
        }

        let mut entities = self.matching(predicate.as_ref())?;
        if let Some(comparator) = comparator {
            entities.sort_by(|a, b| comparator(&**a, &**b));
        }
        if let Some((offset, limit)) = self.view.slice {
            entities = entities.into_iter().skip(offset).take(limit).collect();
        }
        Ok(entities.into_iter())
    }

    fn get_by_id(&self, id: EntityId) -> StoreResult<Option<Shared<E>>> {
        let predicate = self.predicate()?;
        if self.relationship.is_some() {
            return self.find(predicate.as_ref(), &id.to_string(), |e| e.id() == Some(id));
        }
        let found = self.session()?.get_by_id::<E>(id)?;
        Ok(Self::passes(predicate.as_ref(), found))
    }

    fn get_by_slug(&self, slug: &str) -> StoreResult<Option<Shared<E>>> {
        let predicate = self.predicate()?;
        if self.relationship.is_some() {
            return self.find(predicate.as_ref(), slug, |e| e.slug().as_deref() == Some(slug));
        }
        let found = self.session()?.get_by_slug::<E>(slug)?;
        Ok(Self::passes(predicate.as_ref(), found))
    }

    fn add(&mut self, entity: Shared<E>) -> StoreResult<()> {
        let Some(relationship) = &self.relationship else {
            return self.session()?.add(entity);
        };

        let (id, slug) = keys(&entity);
        for child in relationship.children() {
            if Arc::ptr_eq(&child, &entity) {
                return Ok(());
            }
            let (child_id, child_slug) = keys(&child);
            if let Some(id) = id.filter(|id| child_id == Some(*id)) {
                return Err(StoreError::duplicate_id(E::TYPE_NAME, id));
            }
            if let Some(slug) = slug.as_ref().filter(|slug| child_slug.as_ref() == Some(*slug)) {
                return Err(StoreError::duplicate_slug(E::TYPE_NAME, slug.clone()));
            }
        }

        {
            let mut session = self.session()?;
            if session.state(&entity).is_none() {
                session.add(entity.clone())?;
            }
        }
        relationship.attach(&entity);
        tracing::debug!(entity = E::TYPE_NAME, "child attached");
        Ok(())
    }

    fn remove(&mut self, entity: &Shared<E>) -> StoreResult<()> {
        let Some(relationship) = &self.relationship else {
            return self.session()?.remove(entity);
        };

        if !relationship.detach(entity) {
            let key = read(entity).id().map_or_else(|| "entity without id".to_string(), |id| id.to_string());
            return Err(StoreError::not_found(E::TYPE_NAME, key));
        }
        match self.session()?.remove(entity) {
            Ok(()) | Err(StoreError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn update(&mut self, entity: Shared<E>) -> StoreResult<()> {
        if let Some(relationship) = &self.relationship {
            if !relationship.replace(&entity) {
                let key = read(&entity).id().map_or_else(|| "entity without id".to_string(), |id| id.to_string());
                return Err(StoreError::not_found(E::TYPE_NAME, key));
            }
        }
        self.session()?.replace(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::share;
    use quarry_core::testing::{Note, Person, test_schema};
    use quarry_query::{asc, contains, desc, eq, gt};

    use crate::repository::MemoryRepository;

    type Repo = Arc<MemoryRepository>;

    fn people() -> Vec<Person> {
        vec![
            Person::new("Cid", 20).with_id(3).with_nickname("cid"),
            Person::new("Ann", 61).with_id(1).with_nickname("annie"),
            Person::new("Bob", 30).with_id(2),
        ]
    }

    fn session(people: Vec<Person>) -> Arc<Mutex<Session<Repo>>> {
        let repo = Arc::new(MemoryRepository::default().with_entities(people));
        Arc::new(Mutex::new(Session::new(repo)))
    }

    fn names(aggregate: &impl Aggregate<Person>) -> Vec<String> {
        aggregate.iterator().unwrap().map(|p| read(&p).name.clone()).collect()
    }

    #[test]
    fn filter_then_order_then_slice() {
        let mut people = MemoryAggregate::<Person, _>::new(session(self::people()), Arc::new(test_schema()));
        people.set_filter(Some(gt("age", 25)));
        people.set_order(Some(desc("age")));
        assert_eq!(names(&people), vec!["Ann", "Bob"]);
        assert_eq!(people.count().unwrap(), 2);

        people.set_slice(Some((1, 5)));
        assert_eq!(names(&people), vec!["Bob"]);
        assert_eq!(people.count().unwrap(), 2);
    }

    #[test]
    fn lookups_respect_the_filter() {
        let mut people = MemoryAggregate::<Person, _>::new(session(self::people()), Arc::new(test_schema()));
        people.set_filter(Some(gt("age", 25)));
        assert!(people.get_by_id(EntityId::new(3)).unwrap().is_none());
        assert!(people.get_by_slug("cid").unwrap().is_none());
        assert!(people.get_by_slug("annie").unwrap().is_some());
    }

    #[test]
    fn invalid_specifications_fail_before_reading() {
        let mut people = MemoryAggregate::<Person, _>::new(session(vec![]), Arc::new(test_schema()));
        people.set_filter(Some(contains("age", "1")));
        assert!(matches!(people.count(), Err(StoreError::Query(_))));
        people.set_filter(None);
        people.set_order(Some(asc("name.first")));
        assert!(matches!(people.iterator(), Err(StoreError::Query(_))));
    }

    #[test]
    fn search_mode_is_empty_until_filtered() {
        let mut people = MemoryAggregate::<Person, _>::new(session(self::people()), Arc::new(test_schema()));
        people.set_search_mode(true);
        assert_eq!(people.count().unwrap(), 0);
        assert_eq!(people.iterator().unwrap().len(), 0);

        people.set_filter(Some(eq("name", "Bob")));
        assert_eq!(names(&people), vec!["Bob"]);
    }

    #[test]
    fn add_and_remove_go_through_the_session() {
        let shared = session(self::people());
        let mut people = MemoryAggregate::<Person, _>::new(shared.clone(), Arc::new(test_schema()));
        people.add(share(Person::new("Dee", 44))).unwrap();
        assert_eq!(people.count().unwrap(), 4);

        let bob = people.get_by_id(EntityId::new(2)).unwrap().unwrap();
        people.remove(&bob).unwrap();
        assert_eq!(people.count().unwrap(), 3);
        assert_eq!(shared.lock().unwrap().unit_of_work().changeset().len(), 2);
    }

    fn with_notes() -> (Arc<Mutex<Session<Repo>>>, Shared<Person>) {
        let shared = session(vec![Person::new("Ann", 61).with_id(1)]);
        let ann = shared.lock().unwrap().get_by_id::<Person>(EntityId::new(1)).unwrap().unwrap();
        (shared, ann)
    }

    fn notes_of(shared: &Arc<Mutex<Session<Repo>>>, parent: &Shared<Person>) -> MemoryAggregate<Note, Repo> {
        let relationship = Relationship::new(parent.clone(), |p: &Person| &p.notes, |p: &mut Person| &mut p.notes)
            .with_back_reference(|n: &mut Note, p| n.author = p);
        MemoryAggregate::for_relationship(shared.clone(), Arc::new(test_schema()), relationship)
    }

    #[test]
    fn relationship_add_updates_both_sides_and_registers_the_child() {
        let (shared, ann) = with_notes();
        let mut notes = notes_of(&shared, &ann);
        let note = share(Note::new("hello"));
        notes.add(note.clone()).unwrap();

        assert_eq!(read(&ann).notes.len(), 1);
        assert!(Arc::ptr_eq(read(&note).author.as_ref().unwrap(), &ann));
        assert!(shared.lock().unwrap().state(&note).is_some());
        assert_eq!(notes.count().unwrap(), 1);
    }

    #[test]
    fn relationship_rejects_duplicate_children() {
        let (shared, ann) = with_notes();
        let mut notes = notes_of(&shared, &ann);
        notes.add(share(Note::new("a").with_id(10))).unwrap();
        let err = notes.add(share(Note::new("b").with_id(10))).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId { .. }));
        assert_eq!(read(&ann).notes.len(), 1);
    }

    #[test]
    fn relationship_lookups_only_see_children() {
        let (shared, ann) = with_notes();
        shared.lock().unwrap().add(share(Note::new("orphan").with_id(20))).unwrap();
        let mut notes = notes_of(&shared, &ann);
        notes.add(share(Note::new("mine").with_id(21))).unwrap();

        assert!(notes.get_by_id(EntityId::new(20)).unwrap().is_none());
        assert!(notes.get_by_id(EntityId::new(21)).unwrap().is_some());
    }

    #[test]
    fn relationship_remove_detaches_and_deletes() {
        let (shared, ann) = with_notes();
        let mut notes = notes_of(&shared, &ann);
        let note = share(Note::new("hello"));
        notes.add(note.clone()).unwrap();
        notes.remove(&note).unwrap();

        assert!(read(&ann).notes.is_empty());
        assert!(read(&note).author.is_none());
        assert!(matches!(notes.remove(&note), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn duplicate_children_by_id_are_a_distinct_error() {
        let (shared, ann) = with_notes();
        write(&ann).notes = vec![share(Note::new("a").with_id(5)), share(Note::new("b").with_id(5))];
        let notes = notes_of(&shared, &ann);
        assert!(matches!(
            notes.get_by_id(EntityId::new(5)),
            Err(StoreError::DuplicateResult { .. })
        ));
    }
}
