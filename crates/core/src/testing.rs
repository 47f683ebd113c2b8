//! Entity fixtures shared by the workspace's tests and benchmarks.
//!
//! `Person` and `Note` are linked both ways (`Person::notes`,
//! `Note::author`) and `Person` refers to itself through `parent`, which is
//! enough to exercise every attribute kind. `Tag` is a flat, serde-friendly
//! type for the file-backed repository.

use std::any::TypeId;

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, Field, Record, Shared};
use crate::id::EntityId;
use crate::meta::{Attribute, Schema};
use crate::value::{Value, ValueKind};

#[derive(Debug, Clone, Default)]
pub struct Person {
    pub id: Option<EntityId>,
    pub name: String,
    pub age: i64,
    /// Doubles as the slug; usually set after construction.
    pub nickname: Option<String>,
    pub parent: Option<Shared<Person>>,
    pub notes: Vec<Shared<Note>>,
}

impl Person {
    pub fn new(name: impl Into<String>, age: i64) -> Self {
        Self {
            name: name.into(),
            age,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(EntityId::new(id));
        self
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    pub fn with_parent(mut self, parent: &Shared<Person>) -> Self {
        self.parent = Some(parent.clone());
        self
    }
}

impl Record for Person {
    fn field(&self, name: &str) -> Option<Field> {
        let field = match name {
            "id" => Field::Value(self.id.into()),
            "name" => Field::Value(self.name.as_str().into()),
            "age" => Field::Value(self.age.into()),
            "nickname" => Field::Value(self.nickname.clone().into()),
            "parent" => Field::to_one(&self.parent),
            "notes" => Field::to_many(&self.notes),
            _ => return None,
        };
        Some(field)
    }
}

impl Entity for Person {
    const TYPE_NAME: &'static str = "person";
    const TABLE: &'static str = "people";
    const ATTRIBUTES: &'static [Attribute] = &[
        Attribute::terminal("id", ValueKind::Int),
        Attribute::terminal("name", ValueKind::String),
        Attribute::terminal("age", ValueKind::Int),
        Attribute::terminal("nickname", ValueKind::String),
        Attribute::to_one("parent", "parent_id", TypeId::of::<Person>),
        Attribute::to_many("notes", "author_id", TypeId::of::<Note>),
    ];
    const SLUG_ATTRIBUTE: Option<&'static str> = Some("nickname");

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn slug(&self) -> Option<String> {
        self.nickname.clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Note {
    pub id: Option<EntityId>,
    pub text: String,
    pub author: Option<Shared<Person>>,
}

impl Note {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(EntityId::new(id));
        self
    }
}

impl Record for Note {
    fn field(&self, name: &str) -> Option<Field> {
        let field = match name {
            "id" => Field::Value(self.id.into()),
            "text" => Field::Value(self.text.as_str().into()),
            "author" => Field::to_one(&self.author),
            _ => return None,
        };
        Some(field)
    }
}

impl Entity for Note {
    const TYPE_NAME: &'static str = "note";
    const TABLE: &'static str = "notes";
    const ATTRIBUTES: &'static [Attribute] = &[
        Attribute::terminal("id", ValueKind::Int),
        Attribute::terminal("text", ValueKind::String),
        Attribute::to_one("author", "author_id", TypeId::of::<Person>),
    ];

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Option<EntityId>,
    pub name: String,
    pub weight: f64,
}

impl Tag {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            id: None,
            name: name.into(),
            weight,
        }
    }
}

impl Record for Tag {
    fn field(&self, name: &str) -> Option<Field> {
        let value: Value = match name {
            "id" => self.id.into(),
            "name" => self.name.as_str().into(),
            "weight" => self.weight.into(),
            _ => return None,
        };
        Some(Field::Value(value))
    }
}

impl Entity for Tag {
    const TYPE_NAME: &'static str = "tag";
    const TABLE: &'static str = "tags";
    const ATTRIBUTES: &'static [Attribute] = &[
        Attribute::terminal("id", ValueKind::Int),
        Attribute::terminal("name", ValueKind::String),
        Attribute::terminal("weight", ValueKind::Float),
    ];
    const SLUG_ATTRIBUTE: Option<&'static str> = Some("name");

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn slug(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

/// Schema with every fixture type registered.
pub fn test_schema() -> Schema {
    Schema::new().with::<Person>().with::<Note>().with::<Tag>()
}
