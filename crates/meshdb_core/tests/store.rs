//! Mutation pipeline, key layout and query behaviour.

mod common;

use common::{articles, names, people, Article, Person};
use meshdb_core::{CoreError, Database};
use meshdb_storage::KvRead as _;

#[test]
fn people_scenario_exact_keys() {
    let db = Database::open_in_memory().unwrap();
    let (people, _age) = people(&db);
    let engine = db.engine();

    people.insert(&Person::new("foo", 42)).unwrap();
    assert!(engine.contains(b"model:people:foo").unwrap());
    assert!(engine.contains(b"index:people:age:42:foo").unwrap());
    assert_eq!(engine.get(b"count:people").unwrap(), Some(b"1".to_vec()));

    people.update(&Person::new("foo", 43)).unwrap();
    assert!(!engine.contains(b"index:people:age:42:foo").unwrap());
    assert!(engine.contains(b"index:people:age:43:foo").unwrap());
    assert_eq!(people.count().unwrap(), 1);

    people.delete(b"foo").unwrap();
    assert!(!engine.contains(b"model:people:foo").unwrap());
    assert!(!engine.contains(b"index:people:age:43:foo").unwrap());
    assert!(!engine.contains(b"count:people").unwrap());
    assert_eq!(people.count().unwrap(), 0);
}

#[test]
fn insert_then_find_roundtrip() {
    let db = Database::open_in_memory().unwrap();
    let (people, _) = people(&db);
    let foo = Person::new("foo", 42);

    people.insert(&foo).unwrap();
    assert_eq!(people.find_by_id(b"foo").unwrap(), foo);
    assert!(people.contains(b"foo").unwrap());
}

#[test]
fn insert_is_at_most_once() {
    let db = Database::open_in_memory().unwrap();
    let (people, _) = people(&db);

    people.insert(&Person::new("foo", 42)).unwrap();
    let err = people.insert(&Person::new("foo", 99)).unwrap_err();
    assert!(matches!(err, CoreError::AlreadyExists { ref collection, ref id }
        if collection == "people" && id == b"foo"));
    assert_eq!(people.find_by_id(b"foo").unwrap().age, 42);
    assert_eq!(people.count().unwrap(), 1);
}

#[test]
fn update_and_delete_require_existence() {
    let db = Database::open_in_memory().unwrap();
    let (people, _) = people(&db);

    assert!(people.update(&Person::new("ghost", 1)).unwrap_err().is_not_found());
    assert!(people.delete(b"ghost").unwrap_err().is_not_found());
    assert!(people.find_by_id(b"ghost").unwrap_err().is_not_found());
    assert_eq!(people.count().unwrap(), 0);
}

#[test]
fn ids_with_separators_roundtrip() {
    let db = Database::open_in_memory().unwrap();
    let (people, age) = people(&db);
    let odd = Person::new("a:b\\c", 7);

    people.insert(&odd).unwrap();
    assert!(db.engine().contains(b"model:people:a\\cb\\\\c").unwrap());
    assert_eq!(people.find_by_id(b"a:b\\c").unwrap(), odd);
    assert_eq!(people.new_query(age.value_filter(b"7")).run().unwrap(), vec![odd]);
}

#[test]
fn value_range_and_prefix_filters() {
    let db = Database::open_in_memory().unwrap();
    let (people, age) = people(&db);
    for (name, years) in [("ann", 31), ("bob", 42), ("cat", 35), ("dan", 42), ("eve", 50)] {
        people.insert(&Person::new(name, years)).unwrap();
    }

    let exact = people.new_query(age.value_filter(b"42")).run().unwrap();
    assert_eq!(names(&exact), vec!["bob", "dan"]);

    let range = people.new_query(age.range_filter(b"35", b"50")).run().unwrap();
    assert_eq!(names(&range), vec!["cat", "bob", "dan"]);

    let prefix = people.new_query(age.prefix_filter(b"3")).run().unwrap();
    assert_eq!(names(&prefix), vec!["ann", "cat"]);

    assert_eq!(people.new_query(age.value_filter(b"99")).count().unwrap(), 0);
}

#[test]
fn max_offset_and_reverse() {
    let db = Database::open_in_memory().unwrap();
    let (people, _) = people(&db);
    for name in ["a", "b", "c", "d", "e"] {
        people.insert(&Person::new(name, 1)).unwrap();
    }

    let all = people.all_filter();
    assert_eq!(names(&people.find_all().unwrap()), vec!["a", "b", "c", "d", "e"]);
    assert_eq!(names(&people.new_query(all.clone()).max(2).run().unwrap()), vec!["a", "b"]);
    assert_eq!(
        names(&people.new_query(all.clone()).reverse().max(2).run().unwrap()),
        vec!["e", "d"]
    );
    assert_eq!(
        names(&people.new_query(all.clone()).offset(1).max(2).run().unwrap()),
        vec!["b", "c"]
    );
    assert_eq!(people.new_query(all.clone()).offset(4).count().unwrap(), 1);
    assert_eq!(people.new_query(all).max(0).count().unwrap(), 5);
}

#[test]
fn multi_index_results_are_deduplicated() {
    let db = Database::open_in_memory().unwrap();
    let (articles, tags) = articles(&db);
    articles
        .insert(&Article::new("rust-intro", &["rust", "rustacean", "intro"]))
        .unwrap();
    articles.insert(&Article::new("go-intro", &["go", "intro"])).unwrap();

    let rusty = articles.new_query(tags.prefix_filter(b"rust")).run().unwrap();
    assert_eq!(rusty.len(), 1);
    assert_eq!(rusty[0].slug, "rust-intro");

    let wide = articles.new_query(tags.range_filter(b"a", b"z"));
    assert_eq!(wide.count().unwrap(), 2);
    assert_eq!(wide.ids().unwrap(), vec![b"go-intro".to_vec(), b"rust-intro".to_vec()]);
    assert_eq!(articles.new_query(tags.range_filter(b"a", b"z")).max(1).count().unwrap(), 1);
}

#[test]
fn multi_index_update_keeps_shared_values() {
    let db = Database::open_in_memory().unwrap();
    let (articles, tags) = articles(&db);
    articles.insert(&Article::new("post", &["a", "b"])).unwrap();
    articles.update(&Article::new("post", &["b", "c"])).unwrap();

    let engine = db.engine();
    assert!(!engine.contains(b"index:articles:tags:a:post").unwrap());
    assert!(engine.contains(b"index:articles:tags:b:post").unwrap());
    assert!(engine.contains(b"index:articles:tags:c:post").unwrap());
    assert_eq!(articles.new_query(tags.value_filter(b"a")).count().unwrap(), 0);
    db.check_integrity().unwrap();
}

#[test]
fn indexes_are_not_retroactive() {
    let db = Database::open_in_memory().unwrap();
    let people = db.register_collection::<Person>("people").unwrap();
    people.insert(&Person::new("early", 20)).unwrap();

    let age = people
        .add_index("age", |p: &Person| p.age.to_string().into_bytes())
        .unwrap();
    people.insert(&Person::new("late", 20)).unwrap();

    let found = people.new_query(age.value_filter(b"20")).run().unwrap();
    assert_eq!(names(&found), vec!["late"]);

    // rewriting a model brings it under the index
    people.update(&Person::new("early", 20)).unwrap();
    assert_eq!(people.new_query(age.value_filter(b"20")).count().unwrap(), 2);
}

#[test]
fn registry_rules() {
    let db = Database::open_in_memory().unwrap();
    let (people, _) = people(&db);

    let err = db.register_collection::<Person>("people").unwrap_err();
    assert!(matches!(err, CoreError::CollectionExists { ref name } if name == "people"));

    let err = people.add_index("age", |p: &Person| p.name.as_bytes().to_vec()).unwrap_err();
    assert!(matches!(err, CoreError::IndexExists { .. }));

    let again = db.collection::<Person>("people").unwrap();
    again.insert(&Person::new("foo", 1)).unwrap();
    assert_eq!(people.count().unwrap(), 1);
    assert_eq!(again.indexes().len(), 1);
    assert!(again.index("age").is_some());

    assert!(matches!(
        db.collection::<Article>("people").unwrap_err(),
        CoreError::TypeMismatch { .. }
    ));
    assert!(matches!(
        db.collection::<Person>("nobody").unwrap_err(),
        CoreError::CollectionNotFound { .. }
    ));
    assert_eq!(db.collection_names(), vec!["people".to_string()]);
}

#[test]
fn filters_are_bound_to_their_collection() {
    let db = Database::open_in_memory().unwrap();
    let (people, _) = people(&db);
    let (articles, _) = articles(&db);

    let err = people.new_query(articles.all_filter()).run().unwrap_err();
    assert!(matches!(err, CoreError::InvalidKey { .. }));
}

#[test]
fn undecodable_payload_fails_the_query() {
    let db = Database::open_in_memory().unwrap();
    let (people, _) = people(&db);
    people.insert(&Person::new("good", 1)).unwrap();

    let mut batch = meshdb_storage::WriteBatch::new();
    batch.put(b"model:people:bad".to_vec(), vec![0xff, 0xff]);
    db.engine().write(batch).unwrap();

    let err = people.find_all().unwrap_err();
    assert!(matches!(err, CoreError::Decode { ref key, .. } if key == b"model:people:bad"));
    assert!(matches!(people.find_by_id(b"bad").unwrap_err(), CoreError::Decode { .. }));
}

#[test]
fn closed_database_rejects_operations() {
    let db = Database::open_in_memory().unwrap();
    let (people, _) = people(&db);
    people.insert(&Person::new("foo", 1)).unwrap();
    db.close().unwrap();

    assert!(!db.is_open());
    assert!(matches!(people.insert(&Person::new("bar", 1)), Err(CoreError::DatabaseClosed)));
    assert!(matches!(people.find_all(), Err(CoreError::DatabaseClosed)));
    assert!(matches!(db.snapshot(), Err(CoreError::DatabaseClosed)));
    db.close().unwrap();
}
