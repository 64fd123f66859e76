//! Benchmark utilities.

use meshdb_core::{Collection, Database, Index};
use meshdb_testkit::{people_collection, Person};
use rand::Rng;
use std::sync::Arc;

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate `count` people with distinct names and random ages below 100.
pub fn generate_people(count: usize) -> Vec<Person> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| Person::new(&format!("person-{i:08}"), rng.gen_range(0..100)))
        .collect()
}

/// Opens an in-memory database holding `count` indexed people.
pub fn populated(count: usize) -> (Database, Collection<Person>, Arc<Index<Person>>) {
    let db = Database::open_in_memory().expect("Failed to open database");
    let (people, age) = people_collection(&db);
    let mut txn = people
        .open_transaction()
        .expect("Failed to open transaction");
    for person in generate_people(count) {
        txn.insert(&person).expect("Failed to insert person");
    }
    txn.commit().expect("Failed to commit");
    (db, people, age)
}
