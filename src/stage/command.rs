//! Plugins backed by external executables.
//!
//! The binary registers one [`CommandPlugin`] per allow-listed stage type.
//! Each runs `<code dir>/<name>` with `--config_path` and `--output_path`.

use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

use crate::model::StageKind;
use crate::stage::resolver::PluginRegistry;
use crate::traits::{PluginError, StageLog, StagePlugin};

/// Runs an executable and reports a non-zero exit as a failure.
#[derive(Debug, Clone)]
pub struct CommandPlugin {
    name: String,
    program: PathBuf,
}

impl CommandPlugin {
    pub fn new(name: impl Into<String>, program: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            program: program.as_ref().to_path_buf(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl StagePlugin for CommandPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        config_path: &Path,
        output_path: &Path,
        log: &StageLog,
    ) -> Result<(), PluginError> {
        debug!(program = %self.program.display(), "Spawning stage command");
        let output = Command::new(&self.program)
            .arg("--config_path")
            .arg(config_path)
            .arg("--output_path")
            .arg(output_path)
            .output()
            .map_err(|e| format!("failed to start '{}': {}", self.program.display(), e))?;

        // stderr lines become ERROR records for the dataset
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines().map(str::trim).filter(|l| !l.is_empty()) {
            log.error(line);
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(format!("'{}' exited with {}", self.name, output.status).into())
        }
    }
}

/// Registers a [`CommandPlugin`] for every allowed stage type and for each
/// stage's default entry, resolving programs under `code_root/<location>/`.
pub fn register_commands(registry: &mut PluginRegistry, code_root: &Path) {
    for stage in [StageKind::Harvest, StageKind::Process] {
        let location = stage.code_location();
        let names = stage
            .allowed_types()
            .iter()
            .copied()
            .chain(std::iter::once(stage.default_entry()));
        for name in names {
            let program = code_root.join(location).join(name);
            registry.register(location, name, move || CommandPlugin::new(name, &program));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_commands_covers_allow_list() {
        let mut registry = PluginRegistry::new();
        register_commands(&mut registry, Path::new("/opt/sli/src"));

        assert!(registry.contains("harvesters", "podaac"));
        assert!(registry.contains("harvesters", "local"));
        assert!(registry.contains("harvesters", "harvester"));
        assert!(registry.contains("processors", "default"));
        assert!(registry.contains("processors", "processing"));
        assert!(!registry.contains("harvesters", "ftp"));

        let plugin = registry.instantiate("processors", "default").unwrap();
        assert_eq!(plugin.name(), "default");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_failure_carries_stderr() {
        use crate::log_store::{Level, LogStore, MemoryStore};
        use crate::model::DatasetId;
        use std::os::unix::fs::PermissionsExt;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("harvester");
        std::fs::write(&script, "#!/bin/sh\necho \"no granules for $2\" >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let store = Arc::new(MemoryStore::new());
        let log = StageLog::new(store.clone(), DatasetId::from("alpha"), StageKind::Harvest);
        let plugin = CommandPlugin::new("harvester", &script);

        let err = plugin
            .execute(Path::new("cfg.yaml"), dir.path(), &log)
            .unwrap_err();
        assert!(err.to_string().contains("exited with"));

        let records = store.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, Level::Error);
        assert_eq!(records[0].message, "no granules for cfg.yaml");
    }

    #[test]
    fn test_missing_program_is_an_error() {
        use crate::log_store::MemoryStore;
        use crate::model::DatasetId;
        use std::sync::Arc;

        let log = StageLog::new(
            Arc::new(MemoryStore::new()),
            DatasetId::from("alpha"),
            StageKind::Process,
        );
        let plugin = CommandPlugin::new("default", "/nonexistent/processors/default");
        let err = plugin
            .execute(Path::new("cfg.yaml"), Path::new("/tmp"), &log)
            .unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }
}
