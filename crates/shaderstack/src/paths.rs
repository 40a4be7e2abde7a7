use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use directories_next::ProjectDirs;

pub const ENV_CONFIG_DIR: &str = "SHADERSTACK_CONFIG_DIR";
pub const ENV_CACHE_DIR: &str = "SHADERSTACK_CACHE_DIR";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "shaderstack";
const APPLICATION: &str = "shaderstack";

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
    cache_dir: PathBuf,
}

impl AppPaths {
    /// Platform directories, overridden per directory by environment
    /// variables.
    pub fn discover() -> Result<Self> {
        let config_override = env_override(ENV_CONFIG_DIR);
        let cache_override = env_override(ENV_CACHE_DIR);
        if let (Some(config_dir), Some(cache_dir)) = (config_override.clone(), cache_override.clone()) {
            return Ok(Self {
                config_dir,
                cache_dir,
            });
        }

        let project_dirs = ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
            .ok_or_else(|| anyhow!("failed to determine user directories"))?;
        Ok(Self {
            config_dir: config_override.unwrap_or_else(|| project_dirs.config_dir().to_path_buf()),
            cache_dir: cache_override.unwrap_or_else(|| project_dirs.cache_dir().to_path_buf()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Durable store of fetched gradient curves.
    pub fn curve_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("curves")
    }
}

#[cfg(test)]
impl AppPaths {
    pub fn from_raw(config_dir: PathBuf, cache_dir: PathBuf) -> Self {
        Self {
            config_dir,
            cache_dir,
        }
    }
}

fn env_override(var: &str) -> Option<PathBuf> {
    env::var_os(var)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_paths_hang_off_the_roots() {
        let paths = AppPaths::from_raw(PathBuf::from("/cfg"), PathBuf::from("/cache"));
        assert_eq!(paths.config_file(), PathBuf::from("/cfg/config.toml"));
        assert_eq!(paths.curve_cache_dir(), PathBuf::from("/cache/curves"));
    }

    #[test]
    fn empty_override_is_ignored() {
        env::set_var("SHADERSTACK_TEST_EMPTY_DIR", "");
        assert_eq!(env_override("SHADERSTACK_TEST_EMPTY_DIR"), None);
        env::set_var("SHADERSTACK_TEST_SET_DIR", "/tmp/stack");
        assert_eq!(
            env_override("SHADERSTACK_TEST_SET_DIR"),
            Some(PathBuf::from("/tmp/stack"))
        );
    }
}
