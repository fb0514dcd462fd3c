pub mod error;
pub mod models;

pub use error::ConfigError;
pub use models::fleet::{FleetConfig, RconSettings};
pub use models::server::{Difficulty, Edition, GameMode, LaunchSpec, ServerConfig};

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use crate::FleetConfig;

    #[test]
    fn load_fleet_config_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yml");

        fs::write(
            &config_path,
            "bind: '0.0.0.0:8080'\nconsole_capacity: 250\nstartup_timeout: 30s\n",
        )
        .unwrap();

        let config = FleetConfig::from_file(config_path.to_str().unwrap()).unwrap();
        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.console_capacity, 250);
        assert_eq!(config.startup_timeout.as_secs(), 30);
        // Unset fields fall back to defaults.
        assert_eq!(config.base_port, 25565);
    }

    #[test]
    fn load_rejects_bad_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yml");

        fs::write(&config_path, "bind: [unclosed").unwrap();
        assert!(FleetConfig::from_file(config_path.to_str().unwrap()).is_err());
    }
}
