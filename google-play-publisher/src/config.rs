// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Layered configuration.

use {
    crate::{Result, DEFAULT_USER_AGENT, GOOGLE_PLAY_API_ENDPOINT},
    figment::{
        providers::{Env, Format, Toml},
        Figment,
    },
    log::debug,
    serde::{Deserialize, Serialize},
    std::path::Path,
};

const CONFIG_FILE_NAME: &str = "play-publisher.toml";

fn default_endpoint() -> String {
    GOOGLE_PLAY_API_ENDPOINT.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

/// Configuration file profile definition.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Root URL of the Android Publisher API.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// `User-Agent` sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            user_agent: default_user_agent(),
        }
    }
}

/// Used to instantiate [Config] instances.
#[derive(Clone)]
pub struct ConfigBuilder {
    loader: Figment,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            loader: Figment::new(),
        }
    }
}

impl ConfigBuilder {
    /// Add the $XDG_CONFIG/play-publisher/play-publisher.toml user config file if it exists.
    pub fn with_user_config_file(mut self) -> Self {
        if let Some(base) = dirs::config_dir() {
            let p = base.join("play-publisher").join(CONFIG_FILE_NAME);
            debug!("registering user config file: {}", p.display());

            self.loader = self.loader.merge(Toml::file(p).nested());
        }

        self
    }

    /// Merge a config file from `pwd`/play-publisher.toml.
    pub fn with_cwd_config_file(mut self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            let p = cwd.join(CONFIG_FILE_NAME);
            debug!("registering cwd config file: {}", p.display());

            self.loader = self.loader.merge(Toml::file(p).nested());
        }

        self
    }

    /// Merge with `PLAY_PUBLISHER_` environment variables.
    ///
    /// Must be called after [Self::profile()] so variables land in the selected profile.
    pub fn with_env_prefix(mut self) -> Self {
        debug!("registering PLAY_PUBLISHER_ environment variable config source");
        let env = Env::prefixed("PLAY_PUBLISHER_").profile(self.loader.profile().to_string());

        self.loader = self.loader.merge(env);
        self
    }

    /// Add a TOML config file to this instance.
    pub fn toml_file(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        debug!("registering custom config file: {}", path.display());
        self.loader = self.loader.merge(Toml::file(path).nested());
        self
    }

    /// Add a TOML string config to this instance.
    pub fn toml_string(mut self, data: &str) -> Self {
        debug!("registering TOML string config data");
        self.loader = self.loader.merge(Toml::string(data).nested());
        self
    }

    /// Load the named profile instead of the `[default]` profile.
    pub fn profile(mut self, profile: String) -> Self {
        self.loader = self.loader.select(profile);
        self
    }

    /// Obtain a config profile.
    pub fn config(self) -> Result<Config> {
        Ok(self.loader.extract()?)
    }
}
