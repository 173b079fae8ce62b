use localq::Command;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCommand {
    pub name: String,
    pub seq: u32,
}

impl TestCommand {
    pub fn new(name: impl Into<String>, seq: u32) -> Self {
        Self {
            name: name.into(),
            seq,
        }
    }

    /// `count` commands sharing one name, numbered from zero.
    pub fn batch(name: &str, count: u32) -> Vec<Self> {
        (0..count).map(|seq| Self::new(name, seq)).collect()
    }
}

impl Command for TestCommand {
    fn command_type() -> &'static str {
        "testkit.TestCommand"
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherCommand {
    pub value: i64,
}

impl Command for OtherCommand {
    fn command_type() -> &'static str {
        "testkit.OtherCommand"
    }
}

/// Has no handler in any test runtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanCommand {
    pub note: String,
}

impl Command for OrphanCommand {
    fn command_type() -> &'static str {
        "testkit.OrphanCommand"
    }
}
