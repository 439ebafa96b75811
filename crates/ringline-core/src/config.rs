use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CallConfig {
    #[serde(default = "default_signaling_url")]
    pub signaling_url: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// How long an unanswered call rings before timing out.
    #[serde(default = "default_ring_timeout_ms")]
    pub ring_timeout_ms: u64,
    /// Bound on waiting for local media + peer link after an accept.
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,
}

fn default_signaling_url() -> String {
    "ws://127.0.0.1:3000/call-ws".to_string()
}

fn default_api_base() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_ring_timeout_ms() -> u64 {
    40_000
}

fn default_ready_timeout_ms() -> u64 {
    5_000
}

fn default_stun_servers() -> Vec<String> {
    vec![
        "stun:stun.l.google.com:19302".to_string(),
        "stun:stun1.l.google.com:19302".to_string(),
    ]
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling_url: default_signaling_url(),
            api_base: default_api_base(),
            auth_token: None,
            ring_timeout_ms: default_ring_timeout_ms(),
            ready_timeout_ms: default_ready_timeout_ms(),
            stun_servers: default_stun_servers(),
        }
    }
}

impl CallConfig {
    pub fn ring_timeout(&self) -> Duration {
        Duration::from_millis(self.ring_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

/// File-backed configuration. A missing, corrupt, or partial file falls
/// back to defaults.
pub struct ConfigStore {
    config: Mutex<CallConfig>,
    file_path: PathBuf,
}

impl ConfigStore {
    pub fn new(data_dir: &str) -> Self {
        let file_path = PathBuf::from(data_dir).join("call-config.json");
        let config = Self::load(&file_path);
        Self {
            config: Mutex::new(config),
            file_path,
        }
    }

    pub fn get(&self) -> CallConfig {
        self.config.lock().unwrap().clone()
    }

    pub fn set_signaling_url(&self, url: String) {
        self.config.lock().unwrap().signaling_url = url;
        self.save();
    }

    pub fn set_api_base(&self, base: String) {
        self.config.lock().unwrap().api_base = base;
        self.save();
    }

    pub fn set_auth_token(&self, token: Option<String>) {
        self.config.lock().unwrap().auth_token = token;
        self.save();
    }

    fn save(&self) {
        let config = self.config.lock().unwrap().clone();
        if let Some(parent) = self.file_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(json) = serde_json::to_string_pretty(&config) {
            let _ = std::fs::write(&self.file_path, json);
        }
    }

    fn load(path: &PathBuf) -> CallConfig {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(_) => CallConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn defaults() {
        let c = CallConfig::default();
        assert_eq!(c.ring_timeout(), Duration::from_secs(40));
        assert_eq!(c.ready_timeout(), Duration::from_secs(5));
        assert_eq!(c.stun_servers.len(), 2);
        assert!(c.auth_token.is_none());
    }

    #[test]
    fn new_creates_defaults_when_no_file() {
        let dir = temp_dir();
        let store = ConfigStore::new(dir.path().to_str().unwrap());
        assert_eq!(store.get(), CallConfig::default());
    }

    #[test]
    fn set_auth_token_persists() {
        let dir = temp_dir();
        let path = dir.path().to_str().unwrap();
        {
            let store = ConfigStore::new(path);
            store.set_auth_token(Some("secret".to_string()));
        }
        let store = ConfigStore::new(path);
        assert_eq!(store.get().auth_token, Some("secret".to_string()));
    }

    #[test]
    fn set_urls_persist() {
        let dir = temp_dir();
        let path = dir.path().to_str().unwrap();
        {
            let store = ConfigStore::new(path);
            store.set_signaling_url("wss://calls.example.com/ws".to_string());
            store.set_api_base("https://calls.example.com".to_string());
        }
        let store = ConfigStore::new(path);
        let c = store.get();
        assert_eq!(c.signaling_url, "wss://calls.example.com/ws");
        assert_eq!(c.api_base, "https://calls.example.com");
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = temp_dir();
        fs::write(dir.path().join("call-config.json"), "not json!!!").unwrap();
        let store = ConfigStore::new(dir.path().to_str().unwrap());
        assert_eq!(store.get(), CallConfig::default());
    }

    #[test]
    fn partial_json_uses_serde_defaults() {
        let dir = temp_dir();
        fs::write(
            dir.path().join("call-config.json"),
            r#"{"ring_timeout_ms": 15000}"#,
        )
        .unwrap();
        let store = ConfigStore::new(dir.path().to_str().unwrap());
        let c = store.get();
        assert_eq!(c.ring_timeout_ms, 15_000);
        assert_eq!(c.ready_timeout_ms, 5_000);
        assert_eq!(c.signaling_url, default_signaling_url());
    }
}
