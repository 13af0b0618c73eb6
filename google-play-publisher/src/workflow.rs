// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Shipping a bundle to a track inside a single edit.
//!
//! The edit is committed only if every step succeeds. Once an edit exists, any
//! failure deletes it so no half-applied changes linger on the account.

use {
    crate::{
        edits_api::{Bundle, EditsApi, LocalizedText, ReleaseTrack, Track},
        Result,
    },
    sha2::{Digest, Sha256},
    std::{
        io::Write,
        path::{Path, PathBuf},
    },
    thiserror::Error,
};

/// Everything needed to publish one bundle.
#[derive(Clone, Debug)]
pub struct PublishRequest {
    pub package_name: String,
    pub bundle_path: PathBuf,
    pub track: ReleaseTrack,
    /// Forwarded to the track release as given.
    pub release_notes: Vec<LocalizedText>,
}

/// Outcome of a committed edit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PublishReceipt {
    /// Identifier reported by the commit.
    pub edit_id: String,
    pub version_code: i64,
    pub track: ReleaseTrack,
}

/// Steps that run inside an open edit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PublishStage {
    Upload,
    UpdateTrack,
    Commit,
}

impl std::fmt::Display for PublishStage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            Self::Upload => "bundle upload",
            Self::UpdateTrack => "track update",
            Self::Commit => "commit",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    /// No edit was created, so there is nothing to roll back.
    #[error("failed to open edit for {package_name}: {error:#}")]
    OpenEdit {
        package_name: String,
        error: anyhow::Error,
    },

    #[error("{stage} failed; edit {edit_id} was deleted: {error:#}")]
    Aborted {
        edit_id: String,
        stage: PublishStage,
        error: anyhow::Error,
    },

    #[error("{stage} failed: {error:#}; deleting edit {edit_id} also failed: {rollback:#}")]
    RollbackFailed {
        edit_id: String,
        stage: PublishStage,
        error: anyhow::Error,
        rollback: anyhow::Error,
    },
}

impl PublishError {
    /// The edit that was opened before the failure, if any.
    pub fn edit_id(&self) -> Option<&str> {
        match self {
            Self::OpenEdit { .. } => None,
            Self::Aborted { edit_id, .. } | Self::RollbackFailed { edit_id, .. } => Some(edit_id),
        }
    }

    pub fn stage(&self) -> Option<PublishStage> {
        match self {
            Self::OpenEdit { .. } => None,
            Self::Aborted { stage, .. } | Self::RollbackFailed { stage, .. } => Some(*stage),
        }
    }
}

/// The uploaded file did not arrive intact.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("uploaded bundle digest mismatch: local sha256 {local}, server sha256 {remote}")]
pub struct DigestMismatch {
    pub local: String,
    pub remote: String,
}

/// Compute the hex SHA-256 of a file.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut fh = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut fh, &mut hasher)?;

    Ok(hex::encode(hasher.finalize()))
}

/// An open edit that has not been committed or deleted yet.
struct EditSession<'a, A: EditsApi> {
    api: &'a A,
    package_name: &'a str,
    edit_id: String,
}

impl<'a, A: EditsApi> EditSession<'a, A> {
    fn open(api: &'a A, package_name: &'a str) -> std::result::Result<Self, PublishError> {
        log::info!("opening edit for {package_name}");

        let edit = api
            .insert_edit(package_name)
            .map_err(|error| PublishError::OpenEdit {
                package_name: package_name.to_string(),
                error,
            })?;

        log::info!("opened edit {}", edit.id);

        Ok(Self {
            api,
            package_name,
            edit_id: edit.id,
        })
    }

    /// Run a step, deleting the edit if it fails.
    fn step<T>(
        &self,
        stage: PublishStage,
        f: impl FnOnce() -> Result<T>,
    ) -> std::result::Result<T, PublishError> {
        f().map_err(|error| self.abort(stage, error))
    }

    fn abort(&self, stage: PublishStage, error: anyhow::Error) -> PublishError {
        log::warn!("{stage} failed; deleting edit {}", self.edit_id);

        match self.api.delete_edit(self.package_name, &self.edit_id) {
            Ok(()) => PublishError::Aborted {
                edit_id: self.edit_id.clone(),
                stage,
                error,
            },
            Err(rollback) => PublishError::RollbackFailed {
                edit_id: self.edit_id.clone(),
                stage,
                error,
                rollback,
            },
        }
    }

    fn upload(&self, path: &Path) -> Result<Bundle> {
        log::info!("uploading {}", path.display());

        let bundle = self
            .api
            .upload_bundle(self.package_name, &self.edit_id, path)?;

        if let Some(remote) = &bundle.sha256 {
            let local = file_sha256(path)?;

            if !local.eq_ignore_ascii_case(remote) {
                return Err(DigestMismatch {
                    local,
                    remote: remote.clone(),
                }
                .into());
            }

            log::debug!("server sha256 matches {local}");
        }

        Ok(bundle)
    }
}

/// Upload a bundle, assign it to a track, and commit, all in one edit.
///
/// Status lines are written to `out` as each step completes. If anything
/// fails after the edit was opened and before it was committed, the edit is
/// deleted exactly once and commit is never attempted.
pub fn publish_bundle(
    api: &impl EditsApi,
    request: &PublishRequest,
    out: &mut impl Write,
) -> std::result::Result<PublishReceipt, PublishError> {
    let session = EditSession::open(api, &request.package_name)?;

    let bundle = session.step(PublishStage::Upload, || {
        let bundle = session.upload(&request.bundle_path)?;
        writeln!(
            out,
            "Android App Bundle with {} version code has been uploaded",
            bundle.version_code
        )?;
        Ok(bundle)
    })?;

    session.step(PublishStage::UpdateTrack, || {
        log::info!(
            "assigning version code {} to {}",
            bundle.version_code,
            request.track
        );

        let body = Track::completed_release(
            request.track,
            bundle.version_code,
            request.release_notes.clone(),
        );
        let track = api.update_track(&request.package_name, &session.edit_id, &body)?;

        writeln!(
            out,
            "Track {} is set for version code(s) {}",
            request.track,
            track.version_codes().join(", ")
        )?;
        Ok(())
    })?;

    let committed = session.step(PublishStage::Commit, || {
        log::info!("committing edit {}", session.edit_id);

        api.commit_edit(&request.package_name, &session.edit_id)
    })?;

    // The edit is final now; a failing writer must not trigger a rollback.
    if let Err(err) = writeln!(out, "Edit #{} has been committed", committed.id) {
        log::warn!("edit {} committed but status could not be written: {err}", committed.id);
    }

    Ok(PublishReceipt {
        edit_id: committed.id,
        version_code: bundle.version_code,
        track: request.track,
    })
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::edits_api::{AppEdit, ReleaseStatus},
        anyhow::anyhow,
        std::cell::RefCell,
    };

    const EDIT_ID: &str = "06418283419851221512";

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    enum Fail {
        Insert,
        Upload,
        UpdateTrack,
        Commit,
    }

    /// Records every call and fails where told to.
    #[derive(Default)]
    struct RecordingEdits {
        fail: Option<Fail>,
        fail_delete: bool,
        sha256: Option<String>,
        calls: RefCell<Vec<String>>,
        tracks: RefCell<Vec<Track>>,
    }

    impl RecordingEdits {
        fn failing(fail: Fail) -> Self {
            Self {
                fail: Some(fail),
                ..Default::default()
            }
        }

        fn record(&self, call: String, step: Fail) -> Result<()> {
            self.calls.borrow_mut().push(call);

            if self.fail == Some(step) {
                Err(anyhow!("simulated {step:?} error"))
            } else {
                Ok(())
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl EditsApi for RecordingEdits {
        fn insert_edit(&self, package_name: &str) -> Result<AppEdit> {
            self.record(format!("insert {package_name}"), Fail::Insert)?;
            Ok(AppEdit {
                id: EDIT_ID.into(),
                expiry_time_seconds: None,
            })
        }

        fn upload_bundle(&self, package_name: &str, edit_id: &str, _: &Path) -> Result<Bundle> {
            self.record(format!("upload {package_name} {edit_id}"), Fail::Upload)?;
            Ok(Bundle {
                version_code: 1042,
                sha1: None,
                sha256: self.sha256.clone(),
            })
        }

        fn update_track(&self, package_name: &str, edit_id: &str, track: &Track) -> Result<Track> {
            self.record(
                format!("update {package_name} {edit_id} {}", track.track),
                Fail::UpdateTrack,
            )?;
            self.tracks.borrow_mut().push(track.clone());
            Ok(track.clone())
        }

        fn commit_edit(&self, package_name: &str, edit_id: &str) -> Result<AppEdit> {
            self.record(format!("commit {package_name} {edit_id}"), Fail::Commit)?;
            Ok(AppEdit {
                id: edit_id.into(),
                expiry_time_seconds: None,
            })
        }

        fn delete_edit(&self, package_name: &str, edit_id: &str) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(format!("delete {package_name} {edit_id}"));

            if self.fail_delete {
                Err(anyhow!("simulated delete error"))
            } else {
                Ok(())
            }
        }
    }

    fn request(notes: &[(&str, &str)]) -> PublishRequest {
        PublishRequest {
            package_name: "com.example.app".into(),
            bundle_path: PathBuf::from("app-release.aab"),
            track: ReleaseTrack::Internal,
            release_notes: notes
                .iter()
                .map(|(language, text)| LocalizedText {
                    language: language.to_string(),
                    text: text.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn successful_publish() {
        let api = RecordingEdits::default();
        let mut out = Vec::new();

        let receipt = publish_bundle(&api, &request(&[("en-US", "Bug fixes.")]), &mut out).unwrap();

        assert_eq!(
            receipt,
            PublishReceipt {
                edit_id: EDIT_ID.into(),
                version_code: 1042,
                track: ReleaseTrack::Internal,
            }
        );
        assert_eq!(
            api.calls(),
            vec![
                "insert com.example.app".to_string(),
                format!("upload com.example.app {EDIT_ID}"),
                format!("update com.example.app {EDIT_ID} internal"),
                format!("commit com.example.app {EDIT_ID}"),
            ]
        );
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!(
                "Android App Bundle with 1042 version code has been uploaded\n\
                 Track internal is set for version code(s) 1042\n\
                 Edit #{EDIT_ID} has been committed\n"
            )
        );

        let tracks = api.tracks.borrow();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].releases.len(), 1);
        assert_eq!(tracks[0].releases[0].status, ReleaseStatus::Completed);
        assert_eq!(tracks[0].releases[0].version_codes, vec!["1042".to_string()]);
    }

    #[test]
    fn release_notes_are_forwarded_in_order() {
        let api = RecordingEdits::default();
        let notes = [
            ("en-US", "Bug fixes."),
            ("de-DE", "Fehlerbehebungen."),
            ("en-US", "Duplicate languages are passed through."),
            ("fr-FR", ""),
        ];
        let req = request(&notes);

        publish_bundle(&api, &req, &mut Vec::new()).unwrap();

        assert_eq!(api.tracks.borrow()[0].releases[0].release_notes, req.release_notes);
    }

    #[test]
    fn open_failure_does_not_delete() {
        let api = RecordingEdits::failing(Fail::Insert);

        let err = publish_bundle(&api, &request(&[]), &mut Vec::new()).unwrap_err();

        assert!(matches!(err, PublishError::OpenEdit { .. }));
        assert_eq!(err.edit_id(), None);
        assert_eq!(api.calls(), vec!["insert com.example.app".to_string()]);
    }

    #[test]
    fn upload_failure_deletes_edit() {
        let api = RecordingEdits::failing(Fail::Upload);
        let mut out = Vec::new();

        let err = publish_bundle(&api, &request(&[]), &mut out).unwrap_err();

        assert!(matches!(err, PublishError::Aborted { .. }));
        assert_eq!(err.edit_id(), Some(EDIT_ID));
        assert_eq!(err.stage(), Some(PublishStage::Upload));
        assert_eq!(
            api.calls(),
            vec![
                "insert com.example.app".to_string(),
                format!("upload com.example.app {EDIT_ID}"),
                format!("delete com.example.app {EDIT_ID}"),
            ]
        );
        assert!(out.is_empty());
        assert!(err.to_string().contains("simulated Upload error"));
    }

    #[test]
    fn track_failure_deletes_edit() {
        let api = RecordingEdits::failing(Fail::UpdateTrack);

        let err = publish_bundle(&api, &request(&[]), &mut Vec::new()).unwrap_err();

        assert_eq!(err.stage(), Some(PublishStage::UpdateTrack));
        let calls = api.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[3], format!("delete com.example.app {EDIT_ID}"));
        assert!(!calls.iter().any(|c| c.starts_with("commit")));
    }

    #[test]
    fn commit_failure_deletes_edit() {
        let api = RecordingEdits::failing(Fail::Commit);

        let err = publish_bundle(&api, &request(&[]), &mut Vec::new()).unwrap_err();

        assert_eq!(err.stage(), Some(PublishStage::Commit));
        let calls = api.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(
            calls.iter().filter(|c| c.starts_with("delete")).count(),
            1
        );
    }

    #[test]
    fn failed_rollback_reports_both_errors() {
        let api = RecordingEdits {
            fail: Some(Fail::Upload),
            fail_delete: true,
            ..Default::default()
        };

        let err = publish_bundle(&api, &request(&[]), &mut Vec::new()).unwrap_err();

        assert!(matches!(err, PublishError::RollbackFailed { .. }));
        let message = err.to_string();
        assert!(message.contains("simulated Upload error"));
        assert!(message.contains("simulated delete error"));
    }

    #[test]
    fn digest_mismatch_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app-release.aab");
        std::fs::write(&path, b"PK\x03\x04bundle").unwrap();

        let api = RecordingEdits {
            sha256: Some("00".repeat(32)),
            ..Default::default()
        };
        let mut req = request(&[]);
        req.bundle_path = path;

        let err = publish_bundle(&api, &req, &mut Vec::new()).unwrap_err();

        assert_eq!(err.stage(), Some(PublishStage::Upload));
        assert!(err.to_string().contains("digest mismatch"));
        assert_eq!(
            api.calls().last().unwrap(),
            &format!("delete com.example.app {EDIT_ID}")
        );
    }

    #[test]
    fn matching_digest_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app-release.aab");
        std::fs::write(&path, b"PK\x03\x04bundle").unwrap();

        let api = RecordingEdits {
            sha256: Some(file_sha256(&path).unwrap().to_uppercase()),
            ..Default::default()
        };
        let mut req = request(&[]);
        req.bundle_path = path;

        publish_bundle(&api, &req, &mut Vec::new()).unwrap();
        assert_eq!(api.calls().len(), 4);
    }

    /// Accepts a fixed number of lines, then fails like a closed pipe.
    struct ClosingWriter {
        lines_left: usize,
        written: Vec<u8>,
    }

    impl Write for ClosingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.lines_left == 0 {
                return Err(std::io::ErrorKind::BrokenPipe.into());
            }
            if buf.contains(&b'\n') {
                self.lines_left -= 1;
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn committed_edit_survives_output_failure() {
        let api = RecordingEdits::default();
        let mut out = ClosingWriter {
            lines_left: 2,
            written: Vec::new(),
        };

        let receipt = publish_bundle(&api, &request(&[]), &mut out).unwrap();

        assert_eq!(receipt.edit_id, EDIT_ID);
        assert!(!api.calls().iter().any(|c| c.starts_with("delete")));
        assert_eq!(
            api.calls().last().unwrap(),
            &format!("commit com.example.app {EDIT_ID}")
        );
        assert!(String::from_utf8(out.written)
            .unwrap()
            .starts_with("Android App Bundle with 1042"));
    }

    #[test]
    fn output_failure_before_commit_rolls_back() {
        let api = RecordingEdits::default();
        let mut out = ClosingWriter {
            lines_left: 1,
            written: Vec::new(),
        };

        let err = publish_bundle(&api, &request(&[]), &mut out).unwrap_err();

        assert_eq!(err.stage(), Some(PublishStage::UpdateTrack));
        assert!(!api.calls().iter().any(|c| c.starts_with("commit")));
        assert_eq!(
            api.calls().last().unwrap(),
            &format!("delete com.example.app {EDIT_ID}")
        );
    }

    #[test]
    fn sha256_of_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        assert_eq!(
            file_sha256(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
