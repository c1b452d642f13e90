use crate::object::{Dict, ObjectId, ObjectKind, SceneObject};
use log::warn;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MissingKind {
    Type,
    Asset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingReport {
    pub kind: MissingKind,
    /// Class of the object holding the reference, if any.
    pub owner: Option<String>,
    pub key: Option<String>,
    /// Class name or asset id that could not be resolved.
    pub attempted: String,
}

/// Collects unresolved types and assets without interrupting a pass.
#[derive(Debug, Default)]
pub struct MissingTypeReporter {
    reports: Vec<MissingReport>,
    seen: HashSet<ObjectId>,
}

impl MissingTypeReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one entry. An object passed as `identity` is reported at most
    /// once per pass no matter how often it is reached.
    pub fn report(
        &mut self,
        identity: Option<ObjectId>,
        kind: MissingKind,
        owner: Option<&str>,
        key: Option<String>,
        attempted: &str,
    ) {
        if let Some(id) = identity {
            if !self.seen.insert(id) {
                return;
            }
        }
        warn!(
            "missing {:?} `{}` at {}.{}",
            kind,
            attempted,
            owner.unwrap_or("<root>"),
            key.as_deref().unwrap_or("-")
        );
        self.reports.push(MissingReport {
            kind,
            owner: owner.map(str::to_string),
            key,
            attempted: attempted.to_string(),
        });
    }

    pub fn reports(&self) -> &[MissingReport] {
        &self.reports
    }

    pub fn into_reports(self) -> Vec<MissingReport> {
        self.reports
    }

    /// Stand-in for an instance of an unknown class. It keeps the raw
    /// properties so that saving it again reproduces them.
    pub fn placeholder(class_name: &str, raw: Dict) -> SceneObject {
        SceneObject {
            fields: raw,
            ..SceneObject::new(class_name, ObjectKind::Missing)
        }
    }
}
