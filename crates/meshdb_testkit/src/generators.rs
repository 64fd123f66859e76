//! Property-based test generators using proptest.
//!
//! Provides strategies for generating names, IDs, models and operation
//! sequences, plus an in-memory reference model to check a collection
//! against.

use crate::fixtures::Person;
use meshdb_core::{Collection, CoreResult};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for collection names, separator and escape bytes included.
pub fn collection_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex(r"[a-z][a-z0-9_:\\]{0,15}").expect("Invalid regex")
}

/// Strategy for model IDs that exercise key escaping.
pub fn model_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex(r"[a-z:\\]{1,12}").expect("Invalid regex")
}

/// Strategy for people with arbitrary names and small ages.
pub fn person_strategy() -> impl Strategy<Value = Person> {
    (model_id_strategy(), 0u32..100).prop_map(|(name, age)| Person { name, age })
}

/// A single mutation against a people collection.
#[derive(Debug, Clone)]
pub enum PersonOperation {
    /// Insert a person.
    Insert(Person),
    /// Replace a stored person.
    Update(Person),
    /// Delete by name.
    Delete(String),
}

/// Strategy for operations over `pool` distinct names.
///
/// A small pool makes conflicting operations, and so failures, common.
pub fn person_operation_strategy(pool: u8) -> impl Strategy<Value = PersonOperation> {
    let name = (0..pool.max(1)).prop_map(|n| format!("p{n}"));
    prop_oneof![
        3 => (name.clone(), 0u32..5)
            .prop_map(|(name, age)| PersonOperation::Insert(Person { name, age })),
        2 => (name.clone(), 0u32..5)
            .prop_map(|(name, age)| PersonOperation::Update(Person { name, age })),
        2 => name.prop_map(PersonOperation::Delete),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<PersonOperation>> {
    prop::collection::vec(person_operation_strategy(8), min_ops..max_ops)
}

impl PersonOperation {
    /// Applies the operation to `people`.
    ///
    /// # Errors
    ///
    /// Returns whatever the collection returns.
    pub fn apply(&self, people: &Collection<Person>) -> CoreResult<()> {
        match self {
            Self::Insert(person) => people.insert(person).map(drop),
            Self::Update(person) => people.update(person).map(drop),
            Self::Delete(name) => people.delete(name.as_bytes()).map(drop),
        }
    }
}

/// The expected contents of a people collection.
#[derive(Debug, Default, Clone)]
pub struct ReferenceModel {
    people: BTreeMap<String, u32>,
}

impl ReferenceModel {
    /// Creates an empty reference.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `op`, returning whether a real collection should accept it.
    pub fn apply(&mut self, op: &PersonOperation) -> bool {
        match op {
            PersonOperation::Insert(p) => {
                if self.people.contains_key(&p.name) {
                    return false;
                }
                self.people.insert(p.name.clone(), p.age);
                true
            }
            PersonOperation::Update(p) => match self.people.get_mut(&p.name) {
                Some(age) => {
                    *age = p.age;
                    true
                }
                None => false,
            },
            PersonOperation::Delete(name) => self.people.remove(name).is_some(),
        }
    }

    /// Number of stored people.
    pub fn len(&self) -> usize {
        self.people.len()
    }

    /// Returns true if nobody is stored.
    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    /// Stored people in ID order.
    pub fn people(&self) -> Vec<Person> {
        self.people
            .iter()
            .map(|(name, &age)| Person::new(name, age))
            .collect()
    }

    /// Number of people of the given age.
    pub fn with_age(&self, age: u32) -> usize {
        self.people.values().filter(|&&a| a == age).count()
    }
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{people_collection, TestDatabase};
    use meshdb_core::keys::{self, ParsedKey};

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn collection_name_starts_with_a_letter(name in collection_name_strategy()) {
            let first = name.chars().next();
            prop_assert!(first.is_some_and(|c| c.is_ascii_lowercase()));
        }

        #[test]
        fn escaped_ids_parse_back(person in person_strategy()) {
            let key = keys::index_key("people", "age", person.age.to_string().as_bytes(), person.name.as_bytes());
            let parsed = keys::parse_key(&key).unwrap();
            let ParsedKey::Index { id, .. } = parsed else {
                panic!("expected an index key");
            };
            prop_assert_eq!(id, person.name.into_bytes());
        }

        #[test]
        fn collection_matches_reference(ops in operation_sequence_strategy(0, 40)) {
            let db = TestDatabase::memory();
            let (people, age) = people_collection(&db);
            let mut reference = ReferenceModel::new();

            for op in &ops {
                let expected = reference.apply(op);
                prop_assert_eq!(op.apply(&people).is_ok(), expected);
            }

            prop_assert_eq!(people.count().unwrap() as usize, reference.len());
            prop_assert_eq!(people.find_all().unwrap(), reference.people());
            for years in 0u32..5 {
                let found = people
                    .new_query(age.value_filter(years.to_string().as_bytes()))
                    .count()
                    .unwrap();
                prop_assert_eq!(found, reference.with_age(years));
            }
            prop_assert!(db.check_integrity().is_ok());
        }
    }
}
