//! The model tree: a four-level catalog of repos, branches, tags, and
//! artifacts, guarded by a single mutex.
//!
//! Every node keeps a cached canonical JSON rendering, a CRC32 digest of
//! it (the node's HTTP validator), and a gzip-compressed copy. Mutations
//! recompute those caches child-first along the ancestor chain, emit one
//! update event per level, bump the model revision, and signal the
//! persistence worker. Caches are `Bytes`, so read handlers clone a
//! handle under the lock and write the response after releasing it.

use std::collections::BTreeMap;
use std::io::{self, Write as _};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use crossbeam_channel::Sender;
use flate2::write::GzEncoder;
use flate2::{Compression, Crc};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::Config;
use crate::events::{EventSender, ObjectUpdate};

/// Field-level validation failure. Raised before any tree edit, so a
/// rejected PUT leaves the model untouched.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    #[error("Extra field '{0}'")]
    ExtraField(String),

    #[error("Artifact data has no type field")]
    NoArtifactType,

    #[error("Unknown artifact type '{0}'")]
    UnknownArtifactType(String),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no such {kind} '{id}'")]
    NotFound { kind: &'static str, id: String },

    #[error(transparent)]
    BadData(#[from] DataError),
}

/// Errors reading the persisted snapshot at startup. A missing file is
/// not an error; anything else is fatal.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("Failure decoding JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("No {0} field in data")]
    MissingField(&'static str),
}

fn not_found(kind: &'static str, id: &str) -> ModelError {
    ModelError::NotFound {
        kind,
        id: id.to_owned(),
    }
}

/// An immutable snapshot of one node's cached representations, taken
/// under the model lock and safe to serve after it is released.
#[derive(Debug, Clone)]
pub struct NodeView {
    pub digest: u32,
    pub json: Bytes,
    pub compressed: Bytes,
}

/// Like [`NodeView`] for the whole-model document, whose validator is
/// the revision counter rather than a digest.
#[derive(Debug, Clone)]
pub struct RootView {
    pub revision: u64,
    pub json: Bytes,
    pub compressed: Bytes,
}

pub struct Model {
    state: Mutex<ModelState>,
    data_file: PathBuf,

    /// The advertised-URL block embedded in the whole-model document.
    config_data: Value,

    events: EventSender,
    save_signal: Sender<()>,
}

struct ModelState {
    revision: u64,
    repos: BTreeMap<String, Repo>,

    /// Caches for the whole-model document `{config, repos, revision}`.
    cache: NodeCache,
}

impl Model {
    pub fn new(
        data_file: PathBuf,
        config: &Config,
        events: EventSender,
        save_signal: Sender<()>,
    ) -> Self {
        let config_data = json!({
            "http_url": &config.http_url,
            "amqp_url": &config.amqp_url,
        });

        let model = Model {
            state: Mutex::new(ModelState {
                revision: 0,
                repos: BTreeMap::new(),
                cache: NodeCache::default(),
            }),
            data_file,
            config_data,
            events,
            save_signal,
        };

        {
            let mut state = model.lock();
            let document = model.document(&state);
            state.cache.refresh(&document);
        }

        model
    }

    fn lock(&self) -> MutexGuard<'_, ModelState> {
        self.state.lock().unwrap()
    }

    /// Reads the persisted snapshot if one exists and reconstructs the
    /// tree bottom-up, restoring the revision counter. Digests come out
    /// identical to the ones the previous process computed because the
    /// canonical JSON (including each node's `update_time`) is identical.
    pub fn load(&self) -> Result<(), LoadError> {
        if !self.data_file.exists() {
            return Ok(());
        }

        let bytes = fs_err::read(&self.data_file)?;
        let document: Value = serde_json::from_slice(&bytes)?;

        let repo_values = document
            .get("repos")
            .ok_or(LoadError::MissingField("repos"))?
            .as_object()
            .ok_or(LoadError::MissingField("repos"))?;
        let revision = document
            .get("revision")
            .and_then(Value::as_u64)
            .ok_or(LoadError::MissingField("revision"))?;

        let now = now_millis();
        let mut repos = BTreeMap::new();

        for (repo_id, repo_value) in repo_values {
            let data: RepoData = decode(repo_value.clone())?;
            repos.insert(repo_id.clone(), Repo::from_data(data, now)?);
        }

        let mut state = self.lock();
        state.repos = repos;
        state.revision = revision;
        let document = self.document(&state);
        state.cache.refresh(&document);

        log::info!(
            "Loaded {} repos at revision {} from {}",
            state.repos.len(),
            state.revision,
            self.data_file.display()
        );

        Ok(())
    }

    /// Serializes the current tree and atomically replaces the data
    /// file. Called from the persistence worker, never from request
    /// paths; only the serialization itself holds the model lock.
    pub fn save(&self) -> io::Result<()> {
        let payload = {
            let state = self.lock();
            let document = json!({
                "repos": repos_data(&state.repos),
                "revision": state.revision,
            });
            serde_json::to_vec(&document).expect("model data is always serializable")
        };

        let temp = self.data_file.with_extension("json.temp");

        if let Err(err) = fs_err::write(&temp, &payload) {
            let _ = fs_err::remove_file(&temp);
            return Err(err);
        }

        fs_err::rename(&temp, &self.data_file)?;

        log::debug!("Saved {} bytes to {}", payload.len(), self.data_file.display());

        Ok(())
    }

    pub fn root(&self) -> RootView {
        let state = self.lock();
        RootView {
            revision: state.revision,
            json: state.cache.json.clone(),
            compressed: state.cache.compressed.clone(),
        }
    }

    pub fn repo(&self, repo_id: &str) -> Result<NodeView, ModelError> {
        let state = self.lock();
        Ok(find_repo(&state, repo_id)?.cache.view())
    }

    pub fn branch(&self, repo_id: &str, branch_id: &str) -> Result<NodeView, ModelError> {
        let state = self.lock();
        Ok(find_branch(&state, repo_id, branch_id)?.cache.view())
    }

    pub fn tag(
        &self,
        repo_id: &str,
        branch_id: &str,
        tag_id: &str,
    ) -> Result<NodeView, ModelError> {
        let state = self.lock();
        Ok(find_tag(&state, repo_id, branch_id, tag_id)?.cache.view())
    }

    pub fn artifact(
        &self,
        repo_id: &str,
        branch_id: &str,
        tag_id: &str,
        artifact_id: &str,
    ) -> Result<NodeView, ModelError> {
        let state = self.lock();
        let tag = find_tag(&state, repo_id, branch_id, tag_id)?;
        let artifact = tag
            .artifacts
            .get(artifact_id)
            .ok_or_else(|| not_found("artifact", artifact_id))?;
        Ok(artifact.cache.view())
    }

    pub fn put_repo(&self, repo_id: &str, data: Value) -> Result<(), ModelError> {
        let mut state = self.lock();

        let now = now_millis();
        let repo = Repo::from_data(decode(data)?, now)?;

        state.repos.insert(repo_id.to_owned(), repo);

        let repo = &state.repos[repo_id];
        self.events
            .emit(update("repo", repo_path(repo_id), &repo.cache));

        self.finish_mutation(&mut state);
        Ok(())
    }

    pub fn delete_repo(&self, repo_id: &str) -> Result<(), ModelError> {
        let mut state = self.lock();

        if state.repos.remove(repo_id).is_none() {
            return Err(not_found("repo", repo_id));
        }

        self.finish_mutation(&mut state);
        Ok(())
    }

    pub fn put_branch(
        &self,
        repo_id: &str,
        branch_id: &str,
        data: Value,
    ) -> Result<(), ModelError> {
        let mut state = self.lock();

        let now = now_millis();
        let branch = Branch::from_data(decode(data)?, now)?;

        let repo = state
            .repos
            .entry(repo_id.to_owned())
            .or_insert_with(|| Repo::empty(now));
        repo.branches.insert(branch_id.to_owned(), branch);

        let branch = &repo.branches[branch_id];
        self.events
            .emit(update("branch", branch_path(repo_id, branch_id), &branch.cache));

        repo.refresh();
        self.events
            .emit(update("repo", repo_path(repo_id), &repo.cache));

        self.finish_mutation(&mut state);
        Ok(())
    }

    pub fn delete_branch(&self, repo_id: &str, branch_id: &str) -> Result<(), ModelError> {
        let mut state = self.lock();

        let repo = state
            .repos
            .get_mut(repo_id)
            .ok_or_else(|| not_found("repo", repo_id))?;

        if repo.branches.remove(branch_id).is_none() {
            return Err(not_found("branch", branch_id));
        }

        repo.refresh();
        self.events
            .emit(update("repo", repo_path(repo_id), &repo.cache));

        self.finish_mutation(&mut state);
        Ok(())
    }

    pub fn put_tag(
        &self,
        repo_id: &str,
        branch_id: &str,
        tag_id: &str,
        data: Value,
    ) -> Result<(), ModelError> {
        let mut state = self.lock();

        let now = now_millis();
        let tag = Tag::from_data(decode(data)?, now)?;

        let repo = state
            .repos
            .entry(repo_id.to_owned())
            .or_insert_with(|| Repo::empty(now));
        let branch = repo
            .branches
            .entry(branch_id.to_owned())
            .or_insert_with(|| Branch::empty(now));
        branch.tags.insert(tag_id.to_owned(), tag);

        let tag = &branch.tags[tag_id];
        self.events
            .emit(update("tag", tag_path(repo_id, branch_id, tag_id), &tag.cache));

        branch.refresh();
        self.events
            .emit(update("branch", branch_path(repo_id, branch_id), &branch.cache));

        repo.refresh();
        self.events
            .emit(update("repo", repo_path(repo_id), &repo.cache));

        self.finish_mutation(&mut state);
        Ok(())
    }

    pub fn delete_tag(
        &self,
        repo_id: &str,
        branch_id: &str,
        tag_id: &str,
    ) -> Result<(), ModelError> {
        let mut state = self.lock();

        let repo = state
            .repos
            .get_mut(repo_id)
            .ok_or_else(|| not_found("repo", repo_id))?;
        let branch = repo
            .branches
            .get_mut(branch_id)
            .ok_or_else(|| not_found("branch", branch_id))?;

        if branch.tags.remove(tag_id).is_none() {
            return Err(not_found("tag", tag_id));
        }

        branch.refresh();
        self.events
            .emit(update("branch", branch_path(repo_id, branch_id), &branch.cache));

        repo.refresh();
        self.events
            .emit(update("repo", repo_path(repo_id), &repo.cache));

        self.finish_mutation(&mut state);
        Ok(())
    }

    pub fn put_artifact(
        &self,
        repo_id: &str,
        branch_id: &str,
        tag_id: &str,
        artifact_id: &str,
        data: Value,
    ) -> Result<(), ModelError> {
        let mut state = self.lock();

        let now = now_millis();
        let artifact = Artifact::from_value(&data, now)?;

        let repo = state
            .repos
            .entry(repo_id.to_owned())
            .or_insert_with(|| Repo::empty(now));
        let branch = repo
            .branches
            .entry(branch_id.to_owned())
            .or_insert_with(|| Branch::empty(now));
        let tag = branch
            .tags
            .entry(tag_id.to_owned())
            .or_insert_with(|| Tag::empty(now));
        tag.artifacts.insert(artifact_id.to_owned(), artifact);

        let artifact = &tag.artifacts[artifact_id];
        self.events.emit(update(
            "artifact",
            artifact_path(repo_id, branch_id, tag_id, artifact_id),
            &artifact.cache,
        ));

        tag.refresh();
        self.events
            .emit(update("tag", tag_path(repo_id, branch_id, tag_id), &tag.cache));

        branch.refresh();
        self.events
            .emit(update("branch", branch_path(repo_id, branch_id), &branch.cache));

        repo.refresh();
        self.events
            .emit(update("repo", repo_path(repo_id), &repo.cache));

        self.finish_mutation(&mut state);
        Ok(())
    }

    pub fn delete_artifact(
        &self,
        repo_id: &str,
        branch_id: &str,
        tag_id: &str,
        artifact_id: &str,
    ) -> Result<(), ModelError> {
        let mut state = self.lock();

        let repo = state
            .repos
            .get_mut(repo_id)
            .ok_or_else(|| not_found("repo", repo_id))?;
        let branch = repo
            .branches
            .get_mut(branch_id)
            .ok_or_else(|| not_found("branch", branch_id))?;
        let tag = branch
            .tags
            .get_mut(tag_id)
            .ok_or_else(|| not_found("tag", tag_id))?;

        if tag.artifacts.remove(artifact_id).is_none() {
            return Err(not_found("artifact", artifact_id));
        }

        tag.refresh();
        self.events
            .emit(update("tag", tag_path(repo_id, branch_id, tag_id), &tag.cache));

        branch.refresh();
        self.events
            .emit(update("branch", branch_path(repo_id, branch_id), &branch.cache));

        repo.refresh();
        self.events
            .emit(update("repo", repo_path(repo_id), &repo.cache));

        self.finish_mutation(&mut state);
        Ok(())
    }

    /// The tail of every successful mutation: bump the revision, rebuild
    /// the whole-model caches, and wake the persistence worker. A signal
    /// already pending covers this change too.
    fn finish_mutation(&self, state: &mut ModelState) {
        state.revision += 1;

        let document = self.document(state);
        state.cache.refresh(&document);

        let _ = self.save_signal.try_send(());
    }

    fn document(&self, state: &ModelState) -> Value {
        json!({
            "config": &self.config_data,
            "repos": repos_data(&state.repos),
            "revision": state.revision,
        })
    }
}

fn find_repo<'a>(state: &'a ModelState, repo_id: &str) -> Result<&'a Repo, ModelError> {
    state
        .repos
        .get(repo_id)
        .ok_or_else(|| not_found("repo", repo_id))
}

fn find_branch<'a>(
    state: &'a ModelState,
    repo_id: &str,
    branch_id: &str,
) -> Result<&'a Branch, ModelError> {
    find_repo(state, repo_id)?
        .branches
        .get(branch_id)
        .ok_or_else(|| not_found("branch", branch_id))
}

fn find_tag<'a>(
    state: &'a ModelState,
    repo_id: &str,
    branch_id: &str,
    tag_id: &str,
) -> Result<&'a Tag, ModelError> {
    find_branch(state, repo_id, branch_id)?
        .tags
        .get(tag_id)
        .ok_or_else(|| not_found("tag", tag_id))
}

fn repos_data(repos: &BTreeMap<String, Repo>) -> Value {
    Value::Object(
        repos
            .iter()
            .map(|(id, repo)| (id.clone(), repo.data()))
            .collect(),
    )
}

fn repo_path(repo_id: &str) -> String {
    format!("events/repos/{}", repo_id)
}

fn branch_path(repo_id: &str, branch_id: &str) -> String {
    format!("events/repos/{}/branches/{}", repo_id, branch_id)
}

fn tag_path(repo_id: &str, branch_id: &str, tag_id: &str) -> String {
    format!(
        "events/repos/{}/branches/{}/tags/{}",
        repo_id, branch_id, tag_id
    )
}

fn artifact_path(repo_id: &str, branch_id: &str, tag_id: &str, artifact_id: &str) -> String {
    format!(
        "events/repos/{}/branches/{}/tags/{}/artifacts/{}",
        repo_id, branch_id, tag_id, artifact_id
    )
}

fn update(type_name: &'static str, path: String, cache: &NodeCache) -> ObjectUpdate {
    ObjectUpdate {
        path,
        type_name,
        digest: cache.digest,
        json: cache.json.clone(),
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, DataError> {
    serde_json::from_value(value).map_err(|err| DataError::Invalid(err.to_string()))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Cached representations of one node, rebuilt whenever the node or any
/// descendant changes. Once assigned, the `Bytes` payloads never mutate.
#[derive(Debug, Default)]
struct NodeCache {
    digest: u32,
    json: Bytes,
    compressed: Bytes,
}

impl NodeCache {
    fn refresh(&mut self, data: &Value) {
        let canonical = serde_json::to_vec(data).expect("model data is always serializable");

        let mut crc = Crc::new();
        crc.update(&canonical);
        self.digest = crc.sum();

        self.compressed = gzip(&canonical);
        self.json = Bytes::from(canonical);
    }

    fn view(&self) -> NodeView {
        NodeView {
            digest: self.digest,
            json: self.json.clone(),
            compressed: self.compressed.clone(),
        }
    }
}

fn gzip(bytes: &[u8]) -> Bytes {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .expect("writing to an in-memory encoder cannot fail");
    Bytes::from(
        encoder
            .finish()
            .expect("finishing an in-memory encoder cannot fail"),
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RepoData {
    source_url: Option<String>,
    job_url: Option<String>,
    update_time: Option<u64>,
    #[serde(default)]
    branches: BTreeMap<String, BranchData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BranchData {
    update_time: Option<u64>,
    #[serde(default)]
    tags: BTreeMap<String, TagData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TagData {
    build_id: Option<String>,
    build_url: Option<String>,
    commit_id: Option<String>,
    commit_url: Option<String>,
    update_time: Option<u64>,
    #[serde(default)]
    artifacts: BTreeMap<String, Value>,
}

#[derive(Debug)]
struct Repo {
    source_url: Option<String>,
    job_url: Option<String>,
    update_time: u64,
    branches: BTreeMap<String, Branch>,
    cache: NodeCache,
}

impl Repo {
    fn empty(now: u64) -> Repo {
        let mut repo = Repo {
            source_url: None,
            job_url: None,
            update_time: now,
            branches: BTreeMap::new(),
            cache: NodeCache::default(),
        };
        repo.refresh();
        repo
    }

    fn from_data(data: RepoData, now: u64) -> Result<Repo, DataError> {
        let mut branches = BTreeMap::new();
        for (branch_id, branch_data) in data.branches {
            branches.insert(branch_id, Branch::from_data(branch_data, now)?);
        }

        let mut repo = Repo {
            source_url: data.source_url,
            job_url: data.job_url,
            update_time: data.update_time.unwrap_or(now),
            branches,
            cache: NodeCache::default(),
        };
        repo.refresh();
        Ok(repo)
    }

    fn data(&self) -> Value {
        json!({
            "source_url": &self.source_url,
            "job_url": &self.job_url,
            "update_time": self.update_time,
            "branches": Value::Object(
                self.branches
                    .iter()
                    .map(|(id, branch)| (id.clone(), branch.data()))
                    .collect(),
            ),
        })
    }

    fn refresh(&mut self) {
        let data = self.data();
        self.cache.refresh(&data);
    }
}

#[derive(Debug)]
struct Branch {
    update_time: u64,
    tags: BTreeMap<String, Tag>,
    cache: NodeCache,
}

impl Branch {
    fn empty(now: u64) -> Branch {
        let mut branch = Branch {
            update_time: now,
            tags: BTreeMap::new(),
            cache: NodeCache::default(),
        };
        branch.refresh();
        branch
    }

    fn from_data(data: BranchData, now: u64) -> Result<Branch, DataError> {
        let mut tags = BTreeMap::new();
        for (tag_id, tag_data) in data.tags {
            tags.insert(tag_id, Tag::from_data(tag_data, now)?);
        }

        let mut branch = Branch {
            update_time: data.update_time.unwrap_or(now),
            tags,
            cache: NodeCache::default(),
        };
        branch.refresh();
        Ok(branch)
    }

    fn data(&self) -> Value {
        json!({
            "update_time": self.update_time,
            "tags": Value::Object(
                self.tags
                    .iter()
                    .map(|(id, tag)| (id.clone(), tag.data()))
                    .collect(),
            ),
        })
    }

    fn refresh(&mut self) {
        let data = self.data();
        self.cache.refresh(&data);
    }
}

#[derive(Debug)]
struct Tag {
    build_id: Option<String>,
    build_url: Option<String>,
    commit_id: Option<String>,
    commit_url: Option<String>,
    update_time: u64,
    artifacts: BTreeMap<String, Artifact>,
    cache: NodeCache,
}

impl Tag {
    fn empty(now: u64) -> Tag {
        let mut tag = Tag {
            build_id: None,
            build_url: None,
            commit_id: None,
            commit_url: None,
            update_time: now,
            artifacts: BTreeMap::new(),
            cache: NodeCache::default(),
        };
        tag.refresh();
        tag
    }

    fn from_data(data: TagData, now: u64) -> Result<Tag, DataError> {
        let mut artifacts = BTreeMap::new();
        for (artifact_id, artifact_data) in data.artifacts {
            artifacts.insert(artifact_id, Artifact::from_value(&artifact_data, now)?);
        }

        let mut tag = Tag {
            build_id: data.build_id,
            build_url: data.build_url,
            commit_id: data.commit_id,
            commit_url: data.commit_url,
            update_time: data.update_time.unwrap_or(now),
            artifacts,
            cache: NodeCache::default(),
        };
        tag.refresh();
        Ok(tag)
    }

    fn data(&self) -> Value {
        json!({
            "build_id": &self.build_id,
            "build_url": &self.build_url,
            "commit_id": &self.commit_id,
            "commit_url": &self.commit_url,
            "update_time": self.update_time,
            "artifacts": Value::Object(
                self.artifacts
                    .iter()
                    .map(|(id, artifact)| (id.clone(), artifact.data()))
                    .collect(),
            ),
        })
    }

    fn refresh(&mut self) {
        let data = self.data();
        self.cache.refresh(&data);
    }
}

#[derive(Debug)]
enum ArtifactKind {
    Container {
        registry_url: String,
        repository: String,
        image_id: String,
    },
    Maven {
        repository_url: String,
        group_id: String,
        artifact_id: String,
        version: String,
    },
    File {
        url: String,
    },
    Rpm {
        repository_url: String,
        name: String,
        version: String,
        release: String,
    },
}

impl ArtifactKind {
    fn type_name(&self) -> &'static str {
        match self {
            ArtifactKind::Container { .. } => "container",
            ArtifactKind::Maven { .. } => "maven",
            ArtifactKind::File { .. } => "file",
            ArtifactKind::Rpm { .. } => "rpm",
        }
    }
}

#[derive(Debug)]
struct Artifact {
    kind: ArtifactKind,
    update_time: u64,
    cache: NodeCache,
}

impl Artifact {
    fn from_value(value: &Value, now: u64) -> Result<Artifact, DataError> {
        let fields = value
            .as_object()
            .ok_or_else(|| DataError::Invalid("artifact data must be an object".to_owned()))?;

        let type_name = match fields.get("type") {
            Some(Value::String(type_name)) => type_name.as_str(),
            Some(_) => {
                return Err(DataError::Invalid(
                    "artifact type must be a string".to_owned(),
                ))
            }
            None => return Err(DataError::NoArtifactType),
        };

        let required: &[&str] = match type_name {
            "container" => &["registry_url", "repository", "image_id"],
            "maven" => &["repository_url", "group_id", "artifact_id", "version"],
            "file" => &["url"],
            "rpm" => &["repository_url", "name", "version", "release"],
            _ => return Err(DataError::UnknownArtifactType(type_name.to_owned())),
        };

        for name in fields.keys() {
            if name != "type" && name != "update_time" && !required.contains(&name.as_str()) {
                return Err(DataError::ExtraField(name.clone()));
            }
        }

        let take = |name: &'static str| -> Result<String, DataError> {
            match fields.get(name) {
                Some(Value::String(value)) if !value.is_empty() => Ok(value.clone()),
                _ => Err(DataError::MissingField(name)),
            }
        };

        let kind = match type_name {
            "container" => ArtifactKind::Container {
                registry_url: take("registry_url")?,
                repository: take("repository")?,
                image_id: take("image_id")?,
            },
            "maven" => ArtifactKind::Maven {
                repository_url: take("repository_url")?,
                group_id: take("group_id")?,
                artifact_id: take("artifact_id")?,
                version: take("version")?,
            },
            "file" => ArtifactKind::File { url: take("url")? },
            "rpm" => ArtifactKind::Rpm {
                repository_url: take("repository_url")?,
                name: take("name")?,
                version: take("version")?,
                release: take("release")?,
            },
            _ => return Err(DataError::UnknownArtifactType(type_name.to_owned())),
        };

        let update_time = fields
            .get("update_time")
            .and_then(Value::as_u64)
            .unwrap_or(now);

        let mut artifact = Artifact {
            kind,
            update_time,
            cache: NodeCache::default(),
        };
        artifact.refresh();
        Ok(artifact)
    }

    fn data(&self) -> Value {
        let mut data = json!({
            "type": self.kind.type_name(),
            "update_time": self.update_time,
        });

        let fields = data.as_object_mut().expect("artifact data is an object");

        match &self.kind {
            ArtifactKind::Container {
                registry_url,
                repository,
                image_id,
            } => {
                fields.insert("registry_url".to_owned(), registry_url.as_str().into());
                fields.insert("repository".to_owned(), repository.as_str().into());
                fields.insert("image_id".to_owned(), image_id.as_str().into());
            }
            ArtifactKind::Maven {
                repository_url,
                group_id,
                artifact_id,
                version,
            } => {
                fields.insert("repository_url".to_owned(), repository_url.as_str().into());
                fields.insert("group_id".to_owned(), group_id.as_str().into());
                fields.insert("artifact_id".to_owned(), artifact_id.as_str().into());
                fields.insert("version".to_owned(), version.as_str().into());
            }
            ArtifactKind::File { url } => {
                fields.insert("url".to_owned(), url.as_str().into());
            }
            ArtifactKind::Rpm {
                repository_url,
                name,
                version,
                release,
            } => {
                fields.insert("repository_url".to_owned(), repository_url.as_str().into());
                fields.insert("name".to_owned(), name.as_str().into());
                fields.insert("version".to_owned(), version.as_str().into());
                fields.insert("release".to_owned(), release.as_str().into());
            }
        }

        data
    }

    fn refresh(&mut self) {
        let data = self.data();
        self.cache.refresh(&data);
    }
}
