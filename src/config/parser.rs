use super::AppConfig;
use crate::core::NewTask;
use crate::errors::Error;
use std::fs;
use tracing::{debug, info};

/// Loads the application configuration
///
/// # Arguments
///
/// * `file_path` - Optional path to a YAML file; defaults apply when absent
///
/// # Errors
///
/// Returns an error if:
/// * The file cannot be read
/// * The YAML content cannot be parsed into an AppConfig
/// * An environment override holds an invalid value
pub fn load_app_config(file_path: Option<&str>) -> Result<AppConfig, Error> {
    let mut config = match file_path {
        Some(path) => {
            let yaml_str = fs::read_to_string(path)?;
            let config: AppConfig = serde_yaml::from_str(&yaml_str)?;
            info!("Loaded configuration from {}", path);
            config
        }
        None => AppConfig::default(),
    };
    config.apply_overrides(|key| std::env::var(key).ok())?;
    debug!("Effective configuration: {:?}", config);
    Ok(config)
}

/// Loads a task definition from a YAML file, as used by `create --file`
pub fn load_new_task(file_path: &str) -> Result<NewTask, Error> {
    let yaml_str = fs::read_to_string(file_path)?;
    let new_task: NewTask = serde_yaml::from_str(&yaml_str)?;
    new_task.validate()?;
    Ok(new_task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "api_port: 4100\ngrace_period: 2s").unwrap();
        let config: AppConfig =
            serde_yaml::from_str(&fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(config.api_port, 4100);
        assert_eq!(config.stderr_tail_lines, 50);
        assert!(serde_yaml::from_str::<AppConfig>("unknown_key: 1").is_err());
    }

    #[test]
    fn task_file_is_decoded_and_validated() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "name: Berlin data jobs\nplatform: dry-run\nkeywords: [data engineer]\nlocation: Berlin\nmax_pages: 3"
        )
        .unwrap();
        let task = load_new_task(file.path().to_str().unwrap()).unwrap();
        assert_eq!(task.max_pages, Some(3));

        let mut invalid = NamedTempFile::new().unwrap();
        writeln!(invalid, "name: no platform\nkeywords: [x]\nlocation: Paris").unwrap();
        assert!(matches!(
            load_new_task(invalid.path().to_str().unwrap()),
            Err(Error::Validation(message)) if message.contains("platform")
        ));
    }
}
