use std::path::PathBuf;

use crate::server_utils::non_blank;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_STORE_DIR: &str = ".data";
pub const DEFAULT_LOCAL_DIR: &str = ".data/local";
pub const DEFAULT_LOCAL_CLEAR_SECRET: &str = "local-dev-clear";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub store_dir: PathBuf,
    /// `None` leaves `/rank/clear` answering "not configured".
    pub clear_secret: Option<String>,
    pub static_dir: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let port = lookup("PORT")
            .and_then(|value| value.trim().parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);
        let store_dir = non_blank(lookup("RANK_STORE_DIR"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR));
        Self {
            port,
            store_dir,
            clear_secret: non_blank(lookup("CLEAR_RANK_SECRET")),
            static_dir: non_blank(lookup("STATIC_DIR")).map(PathBuf::from),
        }
    }

    /// An explicit `STATIC_DIR` wins; otherwise the usual build output folders are probed.
    pub fn resolve_static_dir(&self) -> Option<PathBuf> {
        if let Some(path) = &self.static_dir {
            if path.join("index.html").is_file() {
                return Some(path.clone());
            }
        }
        [PathBuf::from("dist/client"), PathBuf::from("public")]
            .into_iter()
            .find(|path| path.join("index.html").is_file())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub rank_api_url: Option<String>,
    pub local_dir: PathBuf,
    pub local_clear_secret: String,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            rank_api_url: non_blank(lookup("RANK_API_URL")).map(|url| url.trim().to_string()),
            local_dir: non_blank(lookup("LOCAL_RANK_DIR"))
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_DIR)),
            local_clear_secret: non_blank(lookup("LOCAL_CLEAR_SECRET"))
                .unwrap_or_else(|| DEFAULT_LOCAL_CLEAR_SECRET.to_string()),
        }
    }
}
