//! Additive-replace writes.
//!
//! All artifacts are staged next to their targets first and only renamed
//! into place once every one of them is staged. Files whose content is
//! already current are left untouched. Nothing outside the artifact set and
//! the caller's stale list is ever removed.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{SchemaGenError, SchemaGenResult};
use crate::generate::GeneratedArtifact;

const STAGING_SUFFIX: &str = ".schemagen.tmp";

/// What a write changed, as paths under the package directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub written: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

/// Write `artifacts` into `dir`, then remove the `stale` file names (left
/// over from a previous run) that this run did not produce.
pub fn write_artifacts(
    dir: &Path,
    artifacts: &[GeneratedArtifact],
    stale: &[String],
) -> SchemaGenResult<WriteReport> {
    fs::create_dir_all(dir)
        .map_err(|e| SchemaGenError::generation(dir.display().to_string(), e))?;

    let mut report = WriteReport::default();
    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::new();

    for artifact in artifacts {
        let target = dir.join(&artifact.name);
        if fs::read(&target).is_ok_and(|current| current == artifact.contents.as_bytes()) {
            debug!(artifact = %artifact.name, "unchanged");
            report.unchanged.push(target);
            continue;
        }

        let staging = dir.join(format!("{}{}", artifact.name, STAGING_SUFFIX));
        if let Err(e) = fs::write(&staging, &artifact.contents) {
            discard(&staged);
            let _ = fs::remove_file(&staging);
            return Err(SchemaGenError::generation(&artifact.name, e));
        }
        staged.push((staging, target));
    }

    for (i, (staging, target)) in staged.iter().enumerate() {
        if let Err(e) = fs::rename(staging, target) {
            discard(&staged[i..]);
            return Err(SchemaGenError::generation(target.display().to_string(), e));
        }
        info!(path = %target.display(), "wrote artifact");
        report.written.push(target.clone());
    }

    for name in stale {
        if artifacts.iter().any(|a| &a.name == name) || !is_plain_file_name(name) {
            continue;
        }
        let path = dir.join(name);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "removed stale artifact");
                report.removed.push(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(SchemaGenError::generation(name, e)),
        }
    }

    Ok(report)
}

/// Remove the named files from `dir`, skipping ones that are already gone.
pub fn remove_artifacts(dir: &Path, names: &[String]) -> SchemaGenResult<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for name in names {
        if !is_plain_file_name(name) {
            continue;
        }
        let path = dir.join(name);
        match fs::remove_file(&path) {
            Ok(()) => removed.push(path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "already gone");
            }
            Err(e) => return Err(SchemaGenError::generation(name, e)),
        }
    }
    Ok(removed)
}

fn discard(staged: &[(PathBuf, PathBuf)]) {
    for (staging, _) in staged {
        if let Err(e) = fs::remove_file(staging) {
            warn!(path = %staging.display(), error = %e, "failed to remove staging file");
        }
    }
}

/// A single file name with no directory part. Names read back from a ledger
/// must pass this before anything is removed.
fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    let plain = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(part)), None) if part == name
    );
    if !plain {
        warn!(name = %name, "skipping recorded artifact that is not a plain file name");
    }
    plain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::{ArtifactRole, PackagePath};
    use pretty_assertions::assert_eq;

    fn artifact(name: &str, contents: &str) -> GeneratedArtifact {
        GeneratedArtifact {
            name: name.to_string(),
            role: ArtifactRole::Record,
            package: PackagePath::parse("datamodel").unwrap(),
            contents: contents.to_string(),
        }
    }

    #[test]
    fn test_replaces_artifacts_and_keeps_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("users_record.rs"), "old").unwrap();
        fs::write(dir.path().join("hand_written.rs"), "mine").unwrap();

        let report = write_artifacts(dir.path(), &[artifact("users_record.rs", "new")], &[]).unwrap();

        assert_eq!(report.written, vec![dir.path().join("users_record.rs")]);
        assert_eq!(fs::read_to_string(dir.path().join("users_record.rs")).unwrap(), "new");
        assert_eq!(fs::read_to_string(dir.path().join("hand_written.rs")).unwrap(), "mine");
        assert!(!dir.path().join("users_record.rs.schemagen.tmp").exists());
    }

    #[test]
    fn test_unchanged_files_are_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = [artifact("a.rs", "same")];

        write_artifacts(dir.path(), &artifacts, &[]).unwrap();
        let second = write_artifacts(dir.path(), &artifacts, &[]).unwrap();

        assert!(second.written.is_empty());
        assert_eq!(second.unchanged, vec![dir.path().join("a.rs")]);
    }

    #[test]
    fn test_stale_artifacts_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dropped_record.rs"), "old").unwrap();
        fs::write(dir.path().join("notes.rs"), "mine").unwrap();

        let stale = vec!["dropped_record.rs".to_string(), "a.rs".to_string()];
        let report = write_artifacts(dir.path(), &[artifact("a.rs", "x")], &stale).unwrap();

        assert_eq!(report.removed, vec![dir.path().join("dropped_record.rs")]);
        assert!(dir.path().join("a.rs").exists());
        assert!(dir.path().join("notes.rs").exists());
    }

    #[test]
    fn test_remove_artifacts_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "x").unwrap();

        let removed =
            remove_artifacts(dir.path(), &["a.rs".to_string(), "b.rs".to_string()]).unwrap();
        assert_eq!(removed, vec![dir.path().join("a.rs")]);
    }

    #[test]
    fn test_recorded_names_never_leave_the_package() {
        let root = tempfile::tempdir().unwrap();
        let package = root.path().join("datamodel");
        fs::create_dir_all(&package).unwrap();
        let outside = root.path().join("victim.rs");
        fs::write(&outside, "keep").unwrap();

        let names = vec![
            "../victim.rs".to_string(),
            outside.display().to_string(),
            "sub/victim.rs".to_string(),
        ];
        assert!(remove_artifacts(&package, &names).unwrap().is_empty());
        let report = write_artifacts(&package, &[artifact("a.rs", "x")], &names).unwrap();

        assert!(report.removed.is_empty());
        assert_eq!(fs::read_to_string(&outside).unwrap(), "keep");
    }
}
