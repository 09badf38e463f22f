use std::{env, path::PathBuf};

use directories::ProjectDirs;

const PROJECT_ROOT: &str = env!("CARGO_MANIFEST_DIR");
const ASSET_DIR_ENV: &str = "WAFER_ASSET_DIR";

/// Directory holding the SQLite database and `config.json`.
///
/// `WAFER_ASSET_DIR` wins when set; debug builds fall back to `dev_assets/`
/// at the workspace root, release builds to the platform data directory.
pub fn asset_dir() -> PathBuf {
    let path = if let Ok(custom_dir) = env::var(ASSET_DIR_ENV) {
        PathBuf::from(custom_dir)
    } else if cfg!(debug_assertions) {
        PathBuf::from(PROJECT_ROOT).join("../../dev_assets")
    } else {
        match ProjectDirs::from("org", "wafer", "wafer") {
            Some(dirs) => dirs.data_dir().to_path_buf(),
            None => {
                tracing::warn!("No home directory available, using ./wafer_data");
                PathBuf::from("wafer_data")
            }
        }
    };

    if !path.exists()
        && let Err(e) = std::fs::create_dir_all(&path)
    {
        tracing::error!("Failed to create asset directory {}: {}", path.display(), e);
    }

    path
}

pub fn config_path() -> PathBuf {
    asset_dir().join("config.json")
}

pub fn database_path() -> PathBuf {
    asset_dir().join("db.sqlite")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_and_database_live_in_asset_dir() {
        let dir = asset_dir();
        assert_eq!(config_path(), dir.join("config.json"));
        assert_eq!(database_path(), dir.join("db.sqlite"));
    }
}
