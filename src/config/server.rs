use std::net::SocketAddr;
use std::path::PathBuf;

/// Listener settings taken from `tfhost serve` flags.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Public base URL for external access (e.g., "https://registry.example.com").
    /// Prefixed to signed download URLs; relative URLs are emitted when unset.
    pub public_base_url: Option<String>,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        db_path(&self.data_dir)
    }
}

/// Location of the SQLite database inside a data directory.
#[must_use]
pub fn db_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("tfhost.db")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            data_dir: PathBuf::from("./data"),
            public_base_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_addr_and_db_path() {
        let config = ServerConfig {
            port: 8443,
            data_dir: PathBuf::from("/srv/tfhost"),
            ..Default::default()
        };
        assert_eq!(config.socket_addr().unwrap().port(), 8443);
        assert_eq!(config.db_path(), PathBuf::from("/srv/tfhost/tfhost.db"));
    }
}
