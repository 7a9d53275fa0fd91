//! Demonstration collection sharing one database across test classes
//!
//! `Test1` and `Test2` each append their own name and read the buffer back.
//! Execution order is not fixed, so whichever runs second sees either
//! `Test1Test2` or `Test2Test1`. `ObserverTest` lives in a second class and
//! only reads.

use anyhow::ensure;

use crate::database::DatabaseResource;
use crate::harness::{TestClass, TestCollection, TestContext};

pub const COLLECTION_NAME: &str = "TestCollection";

const TOKENS: [&str; 2] = ["Test1", "Test2"];

/// The demo collection: classes `Test` and `ObserverTest`
pub fn collection() -> TestCollection {
    TestCollection::new(COLLECTION_NAME)
        .class(
            TestClass::new("Test")
                .case("Test1", insert_test1)
                .case("Test2", insert_test2),
        )
        .class(TestClass::new("ObserverTest").case("ReadsSharedState", reads_shared_state))
}

/// Whether a buffer read right after inserting `token` is consistent with
/// the two inserting tests sharing one database
pub fn is_valid_outcome(buffer: &str, token: &str) -> bool {
    match buffer {
        "Test1Test2" | "Test2Test1" => true,
        single => single == token,
    }
}

/// Whether `buffer` is made of the demo tokens, each appearing at most once
pub fn is_interleaving(buffer: &str) -> bool {
    let mut rest = buffer;
    let mut seen = [false; TOKENS.len()];
    while !rest.is_empty() {
        let Some(index) = TOKENS.iter().position(|token| rest.starts_with(token)) else {
            return false;
        };
        if seen[index] {
            return false;
        }
        seen[index] = true;
        rest = &rest[TOKENS[index].len()..];
    }
    true
}

fn insert_and_check(ctx: &TestContext<'_>, token: &str) -> anyhow::Result<()> {
    let db = ctx.db();
    db.insert(token);
    let buffer = db.get();
    ctx.output().write_line(buffer.as_str());

    ensure!(
        is_valid_outcome(&buffer, token),
        "unexpected buffer after inserting {}: {:?}",
        token,
        buffer
    );
    Ok(())
}

fn insert_test1(ctx: &TestContext<'_>) -> anyhow::Result<()> {
    insert_and_check(ctx, "Test1")
}

fn insert_test2(ctx: &TestContext<'_>) -> anyhow::Result<()> {
    insert_and_check(ctx, "Test2")
}

fn reads_shared_state(ctx: &TestContext<'_>) -> anyhow::Result<()> {
    let buffer = ctx.db().get();
    ctx.output().write_line(buffer.as_str());

    ensure!(
        is_interleaving(&buffer),
        "shared buffer holds foreign data: {:?}",
        buffer
    );
    Ok(())
}
