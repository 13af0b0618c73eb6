// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::config::ConfigBuilder;
use crate::edits_api::{LocalizedText, ReleaseTrack};
use crate::workflow::{publish_bundle, PublishRequest};
use crate::{PlayPublisherClient, Result};
use clap::{ArgAction, Parser};
use log::LevelFilter;
use std::path::PathBuf;

/// Upload an Android App Bundle to Google Play and release it on a track.
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Service account key file in JSON format.
    pub service_account_file: PathBuf,

    /// Package name of the app bundle, e.g. com.example.app.
    pub package_name: String,

    /// Path of the Android App Bundle file.
    pub aab_file: PathBuf,

    /// Track to release the bundle on.
    #[clap(value_enum)]
    pub track: ReleaseTrack,

    /// User-facing release notes in the given language.
    ///
    /// e.g. `--release-notes en-US 'Bug fixes and performance improvements.'`.
    /// Can be specified multiple times for multiple languages.
    #[clap(
        long,
        short = 'n',
        num_args = 2,
        value_names = ["LANGUAGE", "TEXT"],
        action = ArgAction::Append,
        allow_hyphen_values = true
    )]
    pub release_notes: Vec<String>,

    /// Path to a TOML config file.
    ///
    /// Can be specified multiple times. Files are loaded/merged in the order
    /// given. `/dev/null` disables loading of default config files.
    #[clap(short = 'C', long = "config-file")]
    pub config_path: Vec<PathBuf>,

    /// Configuration profile to load.
    #[clap(short = 'P', long)]
    pub profile: Option<String>,

    /// Increase logging verbosity. Can be specified multiple times.
    #[clap(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Release notes as (language, text) pairs in the order given.
    pub fn release_notes(&self) -> Vec<LocalizedText> {
        self.release_notes
            .chunks_exact(2)
            .map(|pair| LocalizedText {
                language: pair[0].clone(),
                text: pair[1].clone(),
            })
            .collect()
    }

    pub fn config_builder(&self) -> ConfigBuilder {
        let mut config = ConfigBuilder::default();

        config = if self.config_path.is_empty() {
            config.with_user_config_file().with_cwd_config_file()
        } else {
            for path in &self.config_path {
                if path.display().to_string() == "/dev/null" {
                    break;
                }

                config = config.toml_file(path);
            }

            config
        };

        if let Some(profile) = &self.profile {
            config = config.profile(profile.to_string());
        }

        // Environment variables override everything.
        config.with_env_prefix()
    }

    pub fn init_logging(&self) {
        let log_level = match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        let mut builder = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(log_level.as_str()),
        );

        // Disable log context except at higher log levels.
        if log_level <= LevelFilter::Info {
            builder
                .format_timestamp(None)
                .format_level(false)
                .format_target(false);
        }

        // This spews unwanted output at default level. Nerf it by default.
        if log_level == LevelFilter::Info {
            builder.filter_module("rustls", LevelFilter::Error);
        }

        builder.init();
    }

    pub fn publish_request(&self) -> PublishRequest {
        PublishRequest {
            package_name: self.package_name.clone(),
            bundle_path: self.aab_file.clone(),
            track: self.track,
            release_notes: self.release_notes(),
        }
    }

    pub fn run(self) -> Result<()> {
        let config = self.config_builder().config()?;

        let client =
            PlayPublisherClient::from_service_account_path(&self.service_account_file, &config)?;

        let stdout = std::io::stdout();
        publish_bundle(&client, &self.publish_request(), &mut stdout.lock())?;

        Ok(())
    }
}

pub fn main_impl() -> Result<()> {
    let args = Args::parse();
    args.init_logging();
    args.run()
}
