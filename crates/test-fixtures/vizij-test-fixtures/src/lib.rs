use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Deserialize;

static MANIFEST: Lazy<Manifest> = Lazy::new(|| {
    let raw = include_str!("../../../../fixtures/manifest.json");
    serde_json::from_str(raw).expect("fixtures manifest should parse")
});

#[derive(Debug, Deserialize)]
struct Manifest {
    skeletons: HashMap<String, String>,
    clips: HashMap<String, String>,
    schemas: HashMap<String, SchemaEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SchemaEntry {
    Path(String),
    Detailed {
        path: String,
        #[serde(default)]
        skeleton: Option<String>,
    },
}

impl SchemaEntry {
    fn as_path(&self) -> &str {
        match self {
            SchemaEntry::Path(path) => path,
            SchemaEntry::Detailed { path, .. } => path,
        }
    }

    fn skeleton(&self) -> Option<&str> {
        match self {
            SchemaEntry::Path(_) => None,
            SchemaEntry::Detailed { skeleton, .. } => skeleton.as_deref(),
        }
    }
}

fn fixtures_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../../fixtures")
}

fn resolve_path(rel: &str) -> PathBuf {
    fixtures_root().join(rel)
}

fn read_to_string(rel: &str) -> Result<String> {
    let path = resolve_path(rel);
    fs::read_to_string(&path)
        .with_context(|| format!("failed to read fixture at {}", path.display()))
}

fn load_json<T: DeserializeOwned>(rel: &str) -> Result<T> {
    let text = read_to_string(rel)?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse JSON fixture {rel}"))
}

fn lookup<'a, T>(map: &'a HashMap<String, T>, kind: &str, name: &str) -> Result<&'a T> {
    map.get(name)
        .ok_or_else(|| anyhow!("unknown {kind} fixture '{name}'"))
}

pub mod skeletons {
    use super::*;

    pub fn load<T: DeserializeOwned>(name: &str) -> Result<T> {
        let rel = lookup(&MANIFEST.skeletons, "skeleton", name)?;
        super::load_json(rel)
    }
}

pub mod clips {
    use super::*;

    pub fn keys() -> Vec<String> {
        MANIFEST.clips.keys().cloned().collect()
    }

    pub fn json(name: &str) -> Result<String> {
        let rel = lookup(&MANIFEST.clips, "clip", name)?;
        read_to_string(rel)
    }

    pub fn load<T: DeserializeOwned>(name: &str) -> Result<T> {
        let rel = lookup(&MANIFEST.clips, "clip", name)?;
        super::load_json(rel)
    }
}

pub mod schemas {
    use super::*;

    pub fn keys() -> Vec<String> {
        MANIFEST.schemas.keys().cloned().collect()
    }

    pub fn json(name: &str) -> Result<String> {
        let entry = lookup(&MANIFEST.schemas, "schema", name)?;
        read_to_string(entry.as_path())
    }

    pub fn load<T: DeserializeOwned>(name: &str) -> Result<T> {
        let entry = lookup(&MANIFEST.schemas, "schema", name)?;
        super::load_json(entry.as_path())
    }

    /// Name of the skeleton fixture the schema's bones resolve against.
    pub fn skeleton_name(name: &str) -> Result<Option<String>> {
        let entry = lookup(&MANIFEST.schemas, "schema", name)?;
        Ok(entry.skeleton().map(str::to_owned))
    }

    /// The schema together with its skeleton, if the manifest names one.
    pub fn load_with_skeleton<S, K>(name: &str) -> Result<(S, Option<K>)>
    where
        S: DeserializeOwned,
        K: DeserializeOwned,
    {
        let schema = load(name)?;
        let skeleton = match skeleton_name(name)? {
            Some(skeleton) => Some(super::skeletons::load(&skeleton)?),
            None => None,
        };
        Ok((schema, skeleton))
    }
}
