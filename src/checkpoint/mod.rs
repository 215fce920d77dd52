//! Checkpoint Store
//!
//! Persists, per polling instance and credential, the timestamp through
//! which data has been fetched. Each checkpoint is one small file under the
//! host-provided checkpoint directory.
//!
//! ## File names
//!
//! - instance-wide: `<dir>/<instance>`
//! - per credential: `<dir>/<instance>@<credential>`
//!
//! `<instance>` is the stanza name after `://`. Both parts are
//! percent-encoded so every key maps to exactly one file in `dir`.

mod format;

use chrono::{DateTime, Duration, Utc};
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Identifies one checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointKey {
    instance: String,
    credential: Option<String>,
}

impl CheckpointKey {
    /// Instance-wide key for a stanza name such as `fitness://daily`
    pub fn instance(stanza_name: &str) -> Self {
        Self {
            instance: instance_part(stanza_name).to_string(),
            credential: None,
        }
    }

    /// Key scoped to one stored credential of an instance
    pub fn for_credential(stanza_name: &str, credential: &str) -> Self {
        Self {
            instance: instance_part(stanza_name).to_string(),
            credential: Some(credential.to_string()),
        }
    }

    /// The instance-wide key this key belongs to
    pub fn instance_only(&self) -> Self {
        Self {
            instance: self.instance.clone(),
            credential: None,
        }
    }

    fn file_name(&self) -> String {
        let instance = encode_component(&self.instance);
        match &self.credential {
            Some(credential) => format!("{}@{}", instance, encode_component(credential)),
            None => instance,
        }
    }
}

fn encode_component(raw: &str) -> String {
    match raw {
        "" => "_".to_string(),
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => urlencoding::encode(raw).into_owned(),
    }
}

/// Part of a stanza name after the scheme separator
pub fn instance_part(stanza_name: &str) -> &str {
    stanza_name
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(stanza_name)
}

/// Where a fetch window starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePoint {
    /// A checkpoint was read
    Stored(DateTime<Utc>),
    /// No checkpoint exists yet
    FirstRun(DateTime<Utc>),
    /// The checkpoint could not be read; widened backward by the fallback margin
    Recovered(DateTime<Utc>),
}

impl ResumePoint {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ResumePoint::Stored(t) | ResumePoint::FirstRun(t) | ResumePoint::Recovered(t) => *t,
        }
    }
}

/// Errors that can occur reading or writing checkpoints
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("No checkpoint at {0:?}")]
    Missing(PathBuf),

    #[error("Unable to decode checkpoint file {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Unable to read checkpoint file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Error writing checkpoint file {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// File-backed checkpoint store rooted at one directory
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    corrupt_fallback: Duration,
}

impl CheckpointStore {
    pub fn new(dir: impl AsRef<Path>, corrupt_fallback: Duration) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            corrupt_fallback,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the checkpoint file for `key`
    pub fn path_for(&self, key: &CheckpointKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Read the stored checkpoint for `key`
    pub fn read(&self, key: &CheckpointKey) -> Result<DateTime<Utc>, CheckpointError> {
        self.read_with(key, format::decode)
    }

    /// Read an instance-wide checkpoint, which may still be in the previous
    /// connector's Go encoding
    fn read_legacy(&self, key: &CheckpointKey) -> Result<DateTime<Utc>, CheckpointError> {
        self.read_with(key, |bytes| {
            format::decode(bytes).or_else(|_| format::decode_go_binary(bytes))
        })
    }

    fn read_with(
        &self,
        key: &CheckpointKey,
        decode: impl Fn(&[u8]) -> Result<DateTime<Utc>, String>,
    ) -> Result<DateTime<Utc>, CheckpointError> {
        let path = self.path_for(key);

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CheckpointError::Missing(path));
            }
            Err(source) => return Err(CheckpointError::Read { path, source }),
        };

        decode(&bytes).map_err(|reason| CheckpointError::Corrupt { path, reason })
    }

    /// Decide where the next window for `key` starts
    ///
    /// Never fails: a missing checkpoint resumes at `now`, an unreadable one
    /// at `now` minus the fallback margin. A credential without its own
    /// checkpoint is seeded from the instance-wide file when one exists.
    pub fn resume_point(&self, key: &CheckpointKey, now: DateTime<Utc>) -> ResumePoint {
        match self.read(key) {
            Ok(t) => ResumePoint::Stored(t),
            Err(CheckpointError::Missing(path)) if key.credential.is_some() => {
                match self.read_legacy(&key.instance_only()) {
                    Ok(t) => {
                        tracing::info!(
                            path = ?path,
                            checkpoint = %t,
                            "Seeding credential checkpoint from instance-wide checkpoint"
                        );
                        ResumePoint::Stored(t)
                    }
                    Err(CheckpointError::Missing(_)) => self.fallback(CheckpointError::Missing(path), now),
                    Err(e) => self.fallback(e, now),
                }
            }
            Err(e) => self.fallback(e, now),
        }
    }

    fn fallback(&self, err: CheckpointError, now: DateTime<Utc>) -> ResumePoint {
        match err {
            CheckpointError::Missing(path) => {
                tracing::warn!(path = ?path, "No checkpoint found, starting from now");
                ResumePoint::FirstRun(now)
            }
            other => {
                let start = now - self.corrupt_fallback;
                tracing::warn!(
                    error = %other,
                    fallback_minutes = self.corrupt_fallback.num_minutes(),
                    "Unreadable checkpoint, widening window backward"
                );
                ResumePoint::Recovered(start)
            }
        }
    }

    /// Durably record `at` as the checkpoint for `key`
    ///
    /// The file is written beside its final name, synced, then renamed over
    /// the previous checkpoint.
    pub fn write(&self, key: &CheckpointKey, at: DateTime<Utc>) -> Result<(), CheckpointError> {
        let path = self.path_for(key);
        let write_error = |source: std::io::Error| CheckpointError::Write {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(write_error)?;

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        {
            let mut file = File::create(&tmp).map_err(write_error)?;
            file.write_all(&format::encode(&at)).map_err(write_error)?;
            file.sync_all().map_err(write_error)?;
        }

        std::fs::rename(&tmp, &path).map_err(write_error)?;

        tracing::debug!(path = ?path, checkpoint = %at, "Checkpoint written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn store(dir: &Path) -> CheckpointStore {
        CheckpointStore::new(dir, Duration::hours(2))
    }

    #[test]
    fn test_path_derivation() {
        let store = store(Path::new("/var/lib/checkpoints"));

        assert_eq!(
            store.path_for(&CheckpointKey::instance("fitness://daily")),
            PathBuf::from("/var/lib/checkpoints/daily")
        );
        assert_eq!(
            store.path_for(&CheckpointKey::for_credential("fitness://daily", "FitBit:alice:")),
            PathBuf::from("/var/lib/checkpoints/daily@FitBit%3Aalice%3A")
        );
        // No scheme: the whole name is used; separators never escape the directory.
        assert_eq!(
            store.path_for(&CheckpointKey::instance("../etc/passwd")),
            PathBuf::from("/var/lib/checkpoints/..%2Fetc%2Fpasswd")
        );
        assert_eq!(
            store.path_for(&CheckpointKey::instance("fitness://..")),
            PathBuf::from("/var/lib/checkpoints/%2E%2E")
        );
    }

    #[test]
    fn test_distinct_credentials_distinct_files() {
        let store = store(Path::new("/tmp"));
        let a = store.path_for(&CheckpointKey::for_credential("fitness://x", "a@b"));
        let b = store.path_for(&CheckpointKey::for_credential("fitness://x@a", "b"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let store = store(&dir.path().join("nested"));
        let key = CheckpointKey::for_credential("fitness://daily", "FitBit:alice:");
        let t = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap() + Duration::nanoseconds(17);

        store.write(&key, t).unwrap();
        assert_eq!(store.read(&key).unwrap(), t);
        assert_eq!(store.resume_point(&key, Utc::now()), ResumePoint::Stored(t));

        let later = t + Duration::hours(1);
        store.write(&key, later).unwrap();
        assert_eq!(store.read(&key).unwrap(), later);
        assert!(!PathBuf::from(format!("{}.tmp", store.path_for(&key).display())).exists());
    }

    #[test]
    fn test_missing_resumes_now() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let key = CheckpointKey::for_credential("fitness://daily", "FitBit:alice:");
        let now = Utc::now();

        assert!(matches!(store.read(&key), Err(CheckpointError::Missing(_))));
        assert_eq!(store.resume_point(&key, now), ResumePoint::FirstRun(now));
    }

    #[test]
    fn test_corrupt_resumes_before_now() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let key = CheckpointKey::instance("fitness://daily");
        std::fs::write(store.path_for(&key), b"\x0d\xff\x81\x05").unwrap();
        let now = Utc::now();

        assert!(matches!(store.read(&key), Err(CheckpointError::Corrupt { .. })));
        assert_eq!(
            store.resume_point(&key, now),
            ResumePoint::Recovered(now - Duration::hours(2))
        );
    }

    #[test]
    fn test_credential_seeded_from_instance_checkpoint() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let legacy = CheckpointKey::instance("fitness://daily");
        let t = Utc.with_ymd_and_hms(2023, 11, 2, 0, 0, 0).unwrap();
        store.write(&legacy, t).unwrap();

        let key = CheckpointKey::for_credential("fitness://daily", "GoogleFitness:bob:");
        assert_eq!(store.resume_point(&key, Utc::now()), ResumePoint::Stored(t));

        // Seeding reads only; the credential gets its own file on the next write.
        assert!(!store.path_for(&key).exists());
    }

    #[test]
    fn test_credential_seeded_from_go_encoded_checkpoint() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let t = Utc.with_ymd_and_hms(2016, 6, 21, 14, 0, 0).unwrap();
        std::fs::write(dir.path().join("daily"), format::tests::go_binary(t, -420)).unwrap();

        let key = CheckpointKey::for_credential("fitness://daily", "GoogleFitness:bob:");
        assert_eq!(store.resume_point(&key, Utc::now()), ResumePoint::Stored(t));

        // Only the seed path understands the old encoding.
        std::fs::write(store.path_for(&key), format::tests::go_binary(t, -1)).unwrap();
        assert!(matches!(store.read(&key), Err(CheckpointError::Corrupt { .. })));
    }

    #[test]
    fn test_write_failure_is_reported() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let store = store(&blocker);

        let err = store
            .write(&CheckpointKey::instance("fitness://daily"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Write { .. }));
    }
}
