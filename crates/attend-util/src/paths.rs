//! Default filesystem locations for attendd
//!
//! Everything is user-writable; no root is required.
//!
//! | what     | override           | XDG base            | fallback                     |
//! |----------|--------------------|---------------------|------------------------------|
//! | socket   | `$ATTEND_SOCKET`   | `$XDG_RUNTIME_DIR`  | `/tmp/attendd-$USER`         |
//! | data     | `$ATTEND_DATA_DIR` | `$XDG_DATA_HOME`    | `~/.local/share`             |
//! | config   | `$ATTEND_CONFIG`   | `$XDG_CONFIG_HOME`  | `~/.config`                  |

use std::path::PathBuf;

pub const ATTEND_SOCKET_ENV: &str = "ATTEND_SOCKET";
pub const ATTEND_DATA_DIR_ENV: &str = "ATTEND_DATA_DIR";
pub const ATTEND_CONFIG_ENV: &str = "ATTEND_CONFIG";

const APP_DIR: &str = "attendd";
const SOCKET_FILENAME: &str = "attendd.sock";
const DATABASE_FILENAME: &str = "attend.db";
const CONFIG_FILENAME: &str = "config.toml";

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// `$XDG_x/attendd`, else `~/<home_rel>/attendd`, else `/tmp/attendd/<last_resort>`
fn xdg_app_dir(xdg_var: &str, home_rel: &[&str], last_resort: &str) -> PathBuf {
    if let Some(base) = env_path(xdg_var) {
        return base.join(APP_DIR);
    }
    if let Some(home) = env_path("HOME") {
        return home_rel
            .iter()
            .fold(home, |acc, seg| acc.join(seg))
            .join(APP_DIR);
    }
    PathBuf::from("/tmp").join(APP_DIR).join(last_resort)
}

/// Socket path, honouring `$ATTEND_SOCKET`
pub fn default_socket_path() -> PathBuf {
    env_path(ATTEND_SOCKET_ENV).unwrap_or_else(socket_path_without_env)
}

/// Socket path ignoring `$ATTEND_SOCKET`
pub fn socket_path_without_env() -> PathBuf {
    if let Some(runtime_dir) = env_path("XDG_RUNTIME_DIR") {
        return runtime_dir.join(APP_DIR).join(SOCKET_FILENAME);
    }
    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Data directory, honouring `$ATTEND_DATA_DIR`
pub fn default_data_dir() -> PathBuf {
    env_path(ATTEND_DATA_DIR_ENV)
        .unwrap_or_else(|| xdg_app_dir("XDG_DATA_HOME", &[".local", "share"], "data"))
}

/// SQLite database inside the data directory
pub fn default_database_path() -> PathBuf {
    default_data_dir().join(DATABASE_FILENAME)
}

/// Policy file, honouring `$ATTEND_CONFIG`
pub fn default_config_path() -> PathBuf {
    env_path(ATTEND_CONFIG_ENV).unwrap_or_else(|| {
        xdg_app_dir("XDG_CONFIG_HOME", &[".config"], "config").join(CONFIG_FILENAME)
    })
}
