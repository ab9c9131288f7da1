use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cpu::LatticeCase;

/// A labeled batch of lattice cases, the unit of import/export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSet {
    pub label: String,
    pub cases: Vec<LatticeCase>,
}

impl CaseSet {
    pub fn new(label: impl Into<String>, cases: Vec<LatticeCase>) -> Self {
        Self {
            label: label.into(),
            cases,
        }
    }
}

/// On-disk layouts accepted by the importer.
#[derive(Deserialize)]
#[serde(untagged)]
enum CaseFile {
    Sets(Vec<CaseSet>),
    Bare(Vec<LatticeCase>),
}

/// Writes labeled case sets to JSON so other runners can consume them.
pub fn export_case_sets_to_json<P: AsRef<Path>>(sets: &[CaseSet], path: P) -> Result<()> {
    let json = serde_json::to_string_pretty(sets).context("failed to serialize case sets")?;
    fs::write(&path, json)
        .with_context(|| format!("failed to write cases JSON to {}", path.as_ref().display()))?;
    Ok(())
}

/// Reads case sets back. A bare array of cases is accepted as a single
/// set labeled `imported`.
pub fn import_case_sets_from_json<P: AsRef<Path>>(path: P) -> Result<Vec<CaseSet>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read cases JSON from {}", path.display()))?;
    let file: CaseFile = serde_json::from_str(&text)
        .with_context(|| format!("invalid cases JSON in {}", path.display()))?;
    Ok(match file {
        CaseFile::Sets(sets) => sets,
        CaseFile::Bare(cases) => vec![CaseSet::new("imported", cases)],
    })
}
