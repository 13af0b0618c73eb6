// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Android Publisher edits API.
//!
//! See also <https://developers.google.com/android-publisher/api-ref/rest/v3/edits>.

use {
    crate::{PlayPublisherClient, Result},
    reqwest::blocking::Body,
    serde::{Deserialize, Serialize},
    std::path::Path,
};

/// Operations on a package's edits.
///
/// An edit collects changes to a package's store presence. Nothing is visible
/// to users until the edit is committed; a deleted edit discards its changes.
pub trait EditsApi {
    /// Create a new edit.
    fn insert_edit(&self, package_name: &str) -> Result<AppEdit>;

    /// Upload an Android App Bundle into an edit.
    fn upload_bundle(&self, package_name: &str, edit_id: &str, path: &Path) -> Result<Bundle>;

    /// Replace the releases of the track named by `track.track`.
    fn update_track(&self, package_name: &str, edit_id: &str, track: &Track) -> Result<Track>;

    /// Commit all changes in an edit.
    fn commit_edit(&self, package_name: &str, edit_id: &str) -> Result<AppEdit>;

    /// Discard an edit and everything in it.
    fn delete_edit(&self, package_name: &str, edit_id: &str) -> Result<()>;
}

fn edits_url(endpoint: &str, package_name: &str) -> String {
    format!("{endpoint}/androidpublisher/v3/applications/{package_name}/edits")
}

fn edit_url(endpoint: &str, package_name: &str, edit_id: &str) -> String {
    format!("{}/{edit_id}", edits_url(endpoint, package_name))
}

fn bundle_upload_url(endpoint: &str, package_name: &str, edit_id: &str) -> String {
    format!("{endpoint}/upload/androidpublisher/v3/applications/{package_name}/edits/{edit_id}/bundles")
}

impl EditsApi for PlayPublisherClient {
    fn insert_edit(&self, package_name: &str) -> Result<AppEdit> {
        let token = self.get_token()?;
        let req = self
            .client
            .post(edits_url(&self.endpoint, package_name))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .json(&serde_json::json!({}));
        Ok(self.send_request(req)?.json()?)
    }

    fn upload_bundle(&self, package_name: &str, edit_id: &str, path: &Path) -> Result<Bundle> {
        let token = self.get_token()?;
        let fh = std::fs::File::open(path)?;
        let size = fh.metadata()?.len();

        log::debug!("streaming {} ({size} bytes)", path.display());

        let req = self
            .client
            .post(bundle_upload_url(&self.endpoint, package_name, edit_id))
            .query(&[("uploadType", "media")])
            .bearer_auth(token)
            .header("Accept", "application/json")
            .header("Content-Type", "application/octet-stream")
            .body(Body::sized(fh, size));
        Ok(self.send_request(req)?.json()?)
    }

    fn update_track(&self, package_name: &str, edit_id: &str, track: &Track) -> Result<Track> {
        let token = self.get_token()?;
        let req = self
            .client
            .put(format!(
                "{}/tracks/{}",
                edit_url(&self.endpoint, package_name, edit_id),
                track.track
            ))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .json(track);
        Ok(self.send_request(req)?.json()?)
    }

    fn commit_edit(&self, package_name: &str, edit_id: &str) -> Result<AppEdit> {
        let token = self.get_token()?;
        let req = self
            .client
            .post(format!(
                "{}:commit",
                edit_url(&self.endpoint, package_name, edit_id)
            ))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .body(Vec::new());
        Ok(self.send_request(req)?.json()?)
    }

    fn delete_edit(&self, package_name: &str, edit_id: &str) -> Result<()> {
        let token = self.get_token()?;
        let req = self
            .client
            .delete(edit_url(&self.endpoint, package_name, edit_id))
            .bearer_auth(token);
        self.send_request(req)?;
        Ok(())
    }
}

/// Release tracks a bundle can be assigned to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ReleaseTrack {
    Production,
    Alpha,
    Beta,
    Internal,
}

impl ReleaseTrack {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Alpha => "alpha",
            Self::Beta => "beta",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ReleaseTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppEdit {
    pub id: String,
    /// Seconds since the epoch, encoded as a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time_seconds: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub version_code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ReleaseStatus {
    Draft,
    InProgress,
    Halted,
    Completed,
    /// `statusUnspecified` and anything newer than this client.
    #[serde(other)]
    StatusUnspecified,
}

/// Release notes in one language.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct LocalizedText {
    /// BCP-47 tag such as `en-US`.
    pub language: String,
    pub text: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackRelease {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// int64 values travel as decimal strings.
    #[serde(default)]
    pub version_codes: Vec<String>,
    pub status: ReleaseStatus,
    #[serde(default)]
    pub release_notes: Vec<LocalizedText>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub track: String,
    #[serde(default)]
    pub releases: Vec<TrackRelease>,
}

impl Track {
    /// A track holding one completed release of a single version code.
    pub fn completed_release(
        track: ReleaseTrack,
        version_code: i64,
        release_notes: Vec<LocalizedText>,
    ) -> Self {
        Self {
            track: track.to_string(),
            releases: vec![TrackRelease {
                name: None,
                version_codes: vec![version_code.to_string()],
                status: ReleaseStatus::Completed,
                release_notes,
            }],
        }
    }

    /// Every version code across all releases, in order.
    pub fn version_codes(&self) -> Vec<&str> {
        self.releases
            .iter()
            .flat_map(|release| release.version_codes.iter().map(String::as_str))
            .collect()
    }
}
