//! Read-only exercise packs and editable spec documents.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::model::Code;

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("'{0}' not found")]
    NotFound(String),

    #[error("path '{0}' is not inside the content root")]
    InvalidPath(String),

    #[error("content I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("content could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Exercise {
    /// `pack/slug`
    pub id: String,
    pub pack: String,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    pub starter: Code,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct ExercisePack {
    pub id: String,
    pub exercises: Vec<Exercise>,
}

/// Split an exercise id into pack and slug at the first `/`.
pub fn split_exercise_id(id: &str) -> Option<(&str, &str)> {
    let (pack, slug) = id.trim().split_once('/')?;
    (!pack.is_empty() && !slug.is_empty()).then_some((pack, slug))
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct AcceptanceCriterion {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub satisfied: bool,
}

/// A product spec document that guidance and authoring sessions work against.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Spec {
    /// Path relative to the spec root; filled in on load
    #[serde(default)]
    pub path: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct SpecProgress {
    pub satisfied: usize,
    pub total: usize,
}

impl SpecProgress {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.satisfied == self.total
    }
}

impl Spec {
    pub fn progress(&self) -> SpecProgress {
        SpecProgress {
            satisfied: self
                .acceptance_criteria
                .iter()
                .filter(|c| c.satisfied)
                .count(),
            total: self.acceptance_criteria.len(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.progress().is_complete()
    }

    pub fn criterion(&self, id: &str) -> Option<&AcceptanceCriterion> {
        self.acceptance_criteria.iter().find(|c| c.id == id)
    }

    /// Mark a criterion satisfied. Returns `Some(true)` when it changed,
    /// `Some(false)` when it already was, `None` for an unknown id.
    pub fn satisfy(&mut self, id: &str) -> Option<bool> {
        let criterion = self.acceptance_criteria.iter_mut().find(|c| c.id == id)?;
        let changed = !criterion.satisfied;
        criterion.satisfied = true;
        Some(changed)
    }
}

#[async_trait]
pub trait ExerciseLoader: Send + Sync {
    async fn load_exercise(&self, pack: &str, slug: &str) -> Result<Exercise, ContentError>;
    async fn load_pack(&self, pack: &str) -> Result<ExercisePack, ContentError>;
}

#[async_trait]
pub trait SpecStore: Send + Sync {
    async fn load_spec(&self, path: &str) -> Result<Spec, ContentError>;
    async fn save_spec(&self, spec: &Spec) -> Result<(), ContentError>;
}

/// Join a caller-supplied relative path onto `root`, refusing anything that
/// could climb out of it.
fn contained(root: &Path, relative: &str) -> Result<PathBuf, ContentError> {
    let rel = Path::new(relative.trim());
    let escapes = relative.trim().is_empty()
        || rel.is_absolute()
        || rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(ContentError::InvalidPath(relative.to_string()));
    }
    Ok(root.join(rel))
}

#[derive(Deserialize)]
struct ExerciseManifest {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    difficulty: Option<String>,
}

/// Exercise packs laid out as `<root>/<pack>/<slug>/exercise.json` with the
/// starter files under `<root>/<pack>/<slug>/starter/`.
pub struct FsExerciseLoader {
    root: PathBuf,
}

impl FsExerciseLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

async fn read_starter(dir: &Path) -> Result<Code, ContentError> {
    let mut code = Code::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
                continue;
            }
            let Ok(relative) = path.strip_prefix(dir) else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            code.insert(name, tokio::fs::read_to_string(&path).await?);
        }
    }
    Ok(code)
}

#[async_trait]
impl ExerciseLoader for FsExerciseLoader {
    async fn load_exercise(&self, pack: &str, slug: &str) -> Result<Exercise, ContentError> {
        let id = format!("{pack}/{slug}");
        let dir = contained(&self.root, &id)?;
        let manifest = match tokio::fs::read(dir.join("exercise.json")).await {
            Ok(bytes) => serde_json::from_slice::<ExerciseManifest>(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(ContentError::NotFound(id)),
            Err(e) => return Err(e.into()),
        };
        let starter = read_starter(&dir.join("starter")).await?;
        Ok(Exercise {
            id,
            pack: pack.to_string(),
            slug: slug.to_string(),
            title: manifest.title,
            description: manifest.description,
            topic: manifest.topic,
            difficulty: manifest.difficulty,
            starter,
        })
    }

    async fn load_pack(&self, pack: &str) -> Result<ExercisePack, ContentError> {
        let dir = contained(&self.root, pack)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ContentError::NotFound(pack.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut exercises = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let slug = entry.file_name().to_string_lossy().into_owned();
            match self.load_exercise(pack, &slug).await {
                Ok(exercise) => exercises.push(exercise),
                Err(ContentError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        exercises.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(ExercisePack {
            id: pack.to_string(),
            exercises,
        })
    }
}

/// Spec documents stored as JSON files below a root directory.
pub struct FsSpecStore {
    root: PathBuf,
}

impl FsSpecStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SpecStore for FsSpecStore {
    async fn load_spec(&self, path: &str) -> Result<Spec, ContentError> {
        let file = contained(&self.root, path)?;
        let bytes = match tokio::fs::read(&file).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ContentError::NotFound(path.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let mut spec: Spec = serde_json::from_slice(&bytes)?;
        spec.path = path.trim().to_string();
        Ok(spec)
    }

    async fn save_spec(&self, spec: &Spec) -> Result<(), ContentError> {
        let file = contained(&self.root, &spec.path)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = file.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(spec)?).await?;
        tokio::fs::rename(&tmp, &file).await?;
        Ok(())
    }
}

/// Exercises held in memory, for embedding and tests.
#[derive(Default)]
pub struct StaticExercises {
    exercises: BTreeMap<String, Exercise>,
}

impl StaticExercises {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, exercise: Exercise) -> Self {
        self.exercises.insert(exercise.id.clone(), exercise);
        self
    }
}

#[async_trait]
impl ExerciseLoader for StaticExercises {
    async fn load_exercise(&self, pack: &str, slug: &str) -> Result<Exercise, ContentError> {
        let id = format!("{pack}/{slug}");
        self.exercises
            .get(&id)
            .cloned()
            .ok_or(ContentError::NotFound(id))
    }

    async fn load_pack(&self, pack: &str) -> Result<ExercisePack, ContentError> {
        let exercises: Vec<Exercise> = self
            .exercises
            .values()
            .filter(|e| e.pack == pack)
            .cloned()
            .collect();
        if exercises.is_empty() {
            return Err(ContentError::NotFound(pack.to_string()));
        }
        Ok(ExercisePack {
            id: pack.to_string(),
            exercises,
        })
    }
}

/// Specs held in memory, keyed by path.
#[derive(Default)]
pub struct MemorySpecStore {
    specs: RwLock<BTreeMap<String, Spec>>,
}

impl MemorySpecStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, spec: Spec) {
        self.specs.write().await.insert(spec.path.clone(), spec);
    }
}

#[async_trait]
impl SpecStore for MemorySpecStore {
    async fn load_spec(&self, path: &str) -> Result<Spec, ContentError> {
        self.specs
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| ContentError::NotFound(path.to_string()))
    }

    async fn save_spec(&self, spec: &Spec) -> Result<(), ContentError> {
        self.insert(spec.clone()).await;
        Ok(())
    }
}
