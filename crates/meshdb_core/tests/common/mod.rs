#![allow(dead_code)]

pub use meshdb_testkit::{
    articles_collection as articles, people_collection as people, Article, Person,
};

pub fn names(people: &[Person]) -> Vec<&str> {
    people.iter().map(|p| p.name.as_str()).collect()
}
