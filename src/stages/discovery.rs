//! Locating a tool's output after it exits 0.
//!
//! A path reported through a stdout marker is preferred. It is trusted only
//! if it names a readable regular file; otherwise the stage's conventional
//! location is tried. If neither exists the stage fails with
//! [`FailureKind::OutputNotFound`] naming every candidate.

use std::path::{Path, PathBuf};

use super::{FailureKind, StageError, StageId};
use crate::audio::{AudioBlob, AudioRole};

async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Resolve a marker path against the tool's working directory.
fn resolve(marker: &Path, base_dir: Option<&Path>) -> PathBuf {
    match base_dir {
        Some(base) if marker.is_relative() => base.join(marker),
        _ => marker.to_path_buf(),
    }
}

/// First existing candidate: the marker path, then the convention.
pub(crate) async fn locate(
    marker: Option<&Path>,
    base_dir: Option<&Path>,
    convention: &Path,
) -> Option<PathBuf> {
    if let Some(marker) = marker {
        let path = resolve(marker, base_dir);
        if is_regular_file(&path).await {
            return Some(path);
        }
        log::warn!(
            "reported output {} is not a readable file; trying {}",
            path.display(),
            convention.display()
        );
    }
    if is_regular_file(convention).await {
        return Some(convention.to_path_buf());
    }
    None
}

/// Locate and read the artifact for `role`.
pub(crate) async fn read_output(
    stage: StageId,
    role: AudioRole,
    marker: Option<&Path>,
    base_dir: Option<&Path>,
    convention: &Path,
) -> Result<AudioBlob, StageError> {
    let not_found = |reason: String| StageError::new(stage, FailureKind::OutputNotFound, reason);

    let Some(path) = locate(marker, base_dir, convention).await else {
        let tried = match marker {
            Some(m) => format!(
                "{} (reported) or {}",
                resolve(m, base_dir).display(),
                convention.display()
            ),
            None => convention.display().to_string(),
        };
        return Err(not_found(format!("no {role} output at {tried}")));
    };

    let blob = AudioBlob::read_from(role, &path)
        .await
        .map_err(|e| not_found(format!("{role} output {} unreadable: {e}", path.display())))?;
    log::debug!("{stage}: {role} read from {} ({} bytes)", path.display(), blob.len());
    Ok(blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn marker_path_wins_over_convention() {
        let dir = tempdir().unwrap();
        let reported = dir.path().join("reported.wav");
        let convention = dir.path().join("convention.wav");
        std::fs::write(&reported, b"R").unwrap();
        std::fs::write(&convention, b"C").unwrap();

        let found = locate(Some(&reported), None, &convention).await;
        assert_eq!(found, Some(reported));
    }

    #[tokio::test]
    async fn missing_marker_target_falls_back_to_convention() {
        let dir = tempdir().unwrap();
        let convention = dir.path().join("convention.wav");
        std::fs::write(&convention, b"C").unwrap();

        let found = locate(Some(&dir.path().join("gone.wav")), None, &convention).await;
        assert_eq!(found, Some(convention));
    }

    #[tokio::test]
    async fn marker_naming_a_directory_is_not_trusted() {
        let dir = tempdir().unwrap();
        let convention = dir.path().join("convention.wav");
        assert_eq!(locate(Some(dir.path()), None, &convention).await, None);
    }

    #[tokio::test]
    async fn relative_marker_resolves_against_working_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("out.wav"), b"R").unwrap();

        let found = locate(
            Some(Path::new("out.wav")),
            Some(dir.path()),
            &dir.path().join("nope.wav"),
        )
        .await;
        assert_eq!(found, Some(dir.path().join("out.wav")));
    }

    #[tokio::test]
    async fn nothing_found_names_both_candidates() {
        let dir = tempdir().unwrap();
        let err = read_output(
            StageId::Converter,
            AudioRole::ConvertedVocal,
            Some(Path::new("/definitely/not/here.wav")),
            None,
            &dir.path().join("expected.wav"),
        )
        .await
        .unwrap_err();

        assert_eq!(err.stage, StageId::Converter);
        assert_eq!(err.kind, FailureKind::OutputNotFound);
        assert!(err.detail.contains("/definitely/not/here.wav"));
        assert!(err.detail.contains("expected.wav"));
    }

    #[tokio::test]
    async fn found_output_is_read_with_role_and_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mix.flac");
        std::fs::write(&path, b"FLAC").unwrap();

        let blob = read_output(StageId::Mixer, AudioRole::FinalMix, None, None, &path)
            .await
            .unwrap();
        assert_eq!(blob.role(), AudioRole::FinalMix);
        assert_eq!(blob.extension(), "flac");
        assert_eq!(blob.bytes(), b"FLAC");
    }
}
