use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::log_store::{Level, LogRecord, LogStore};
use crate::model::StageInvocation;
use crate::stage::resolver::{PluginResolver, ResolutionContext};
use crate::traits::{StageError, StageLog};

/// Message marker the status reporter keys success on.
pub const SUCCESS_MARKER: &str = "successful";

/// What happened to one stage run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded,
    Failed(String),
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Succeeded)
    }
}

/// Runs single stages and turns their outcome into log records.
///
/// A stage run never fails from the caller's point of view: every error is
/// converted into a record in the [`LogStore`]. Failures are recorded at
/// `INFO` with a failure message; the status reporter tells them apart from
/// successes by the [`SUCCESS_MARKER`] in the message.
///
/// `run_stage` returns only once the plugin call has finished, so at most one
/// plugin runs at a time. A hung plugin blocks the run.
pub struct StageRunner {
    resolver: Arc<PluginResolver>,
    store: Arc<dyn LogStore>,
    context: ResolutionContext,
}

impl StageRunner {
    pub fn new(resolver: Arc<PluginResolver>, store: Arc<dyn LogStore>) -> Self {
        Self {
            resolver,
            store,
            context: ResolutionContext::new(),
        }
    }

    /// Replaces the base resolution context used for every invocation.
    pub fn with_context(mut self, context: ResolutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn context(&self) -> &ResolutionContext {
        &self.context
    }

    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    /// Runs one stage for one dataset and records the outcome.
    #[instrument(skip(self, invocation), fields(dataset = %invocation.dataset, stage = %invocation.stage))]
    pub async fn run_stage(&mut self, invocation: StageInvocation) -> StageOutcome {
        let stage = invocation.stage;
        let dataset = invocation.dataset.clone();
        info!("Running {} for {}", stage, dataset);

        let (outcome, message) = match self.invoke(invocation).await {
            Ok(()) => {
                info!("{} successful", stage.verb());
                (
                    StageOutcome::Succeeded,
                    format!("{} {}", stage.verb(), SUCCESS_MARKER),
                )
            }
            Err(e) => {
                warn!(error = %e, "{} failed", stage.verb());
                (
                    StageOutcome::Failed(e.to_string()),
                    format!("{} failed: {}", stage.verb(), e),
                )
            }
        };

        let record = LogRecord::for_stage(&dataset, stage, Level::Info, message);
        if let Err(e) = self.store.append(record) {
            warn!(error = %e, "Failed to record stage outcome");
        }

        outcome
    }

    /// Runs the resolver on a blocking thread and waits for it to finish.
    async fn invoke(&self, invocation: StageInvocation) -> Result<(), StageError> {
        let resolver = Arc::clone(&self.resolver);
        let log = StageLog::new(
            Arc::clone(&self.store),
            invocation.dataset.clone(),
            invocation.stage,
        );
        let mut ctx = self.context.clone();

        let (ctx, result) = tokio::task::spawn_blocking(move || {
            let result = resolver.resolve_and_invoke(&invocation, &mut ctx, &log);
            (ctx, result)
        })
        .await
        .map_err(|e| StageError::Execution(format!("Task join error: {}", e)))?;

        // The search path guard pops everything it pushed.
        debug_assert_eq!(ctx, self.context);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_store::MemoryStore;
    use crate::model::{DatasetId, StageKind};
    use crate::stage::resolver::PluginRegistry;
    use crate::traits::{PluginError, StagePlugin};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FlakyPlugin {
        fail: bool,
    }

    impl StagePlugin for FlakyPlugin {
        fn name(&self) -> &str {
            "flaky"
        }

        fn execute(&self, _: &Path, _: &Path, log: &StageLog) -> Result<(), PluginError> {
            if self.fail {
                log.error("granule checksum mismatch");
                return Err("2 granules failed".into());
            }
            Ok(())
        }
    }

    /// Sleeps while tracking how many plugin calls overlap.
    struct CountingPlugin {
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    impl StagePlugin for CountingPlugin {
        fn name(&self) -> &str {
            "counting"
        }

        fn execute(&self, _: &Path, _: &Path, log: &StageLog) -> Result<(), PluginError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            log.error(format!("slow granule for {}", log.dataset()));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Err("upstream too slow".into())
        }
    }

    fn setup(configs: &[(&str, &str)]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let datasets = dir.path().join("datasets");
        for (dataset, tag) in configs {
            let ds_dir = datasets.join(dataset);
            std::fs::create_dir_all(&ds_dir).unwrap();
            std::fs::write(
                ds_dir.join("harvester_config.yaml"),
                format!("harvester_type: {tag}\n"),
            )
            .unwrap();
        }
        (dir, datasets)
    }

    fn runner(datasets: &Path, store: Arc<MemoryStore>) -> StageRunner {
        let mut registry = PluginRegistry::new();
        registry
            .register("harvesters", "podaac", || FlakyPlugin { fail: false })
            .register("harvesters", "local", || FlakyPlugin { fail: true });
        let resolver = Arc::new(PluginResolver::new(Arc::new(registry), datasets));
        StageRunner::new(resolver, store)
    }

    fn harvest(dataset: &str) -> StageInvocation {
        StageInvocation::new(DatasetId::from(dataset), StageKind::Harvest, "/tmp/out")
    }

    #[tokio::test]
    async fn test_success_records_info() {
        let (_dir, datasets) = setup(&[("alpha", "podaac")]);
        let store = Arc::new(MemoryStore::new());
        let mut runner = runner(&datasets, store.clone());

        let outcome = runner.run_stage(harvest("alpha")).await;

        assert!(outcome.is_success());
        let records = store.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "pipeline.alpha.harvester");
        assert_eq!(records[0].level, Level::Info);
        assert_eq!(records[0].message, "Harvesting successful");
    }

    #[tokio::test]
    async fn test_failure_records_info_with_failure_message() {
        let (_dir, datasets) = setup(&[("beta", "local")]);
        let store = Arc::new(MemoryStore::new());
        let mut runner = runner(&datasets, store.clone())
            .with_context(ResolutionContext::with_base(["shared"]));
        let before = runner.context().clone();

        let outcome = runner.run_stage(harvest("beta")).await;

        assert_eq!(outcome, StageOutcome::Failed("2 granules failed".to_string()));
        assert_eq!(runner.context(), &before);

        let records = store.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, Level::Error);
        assert_eq!(records[1].level, Level::Info);
        assert_eq!(records[1].message, "Harvesting failed: 2 granules failed");
        assert!(!records[1].message.contains(SUCCESS_MARKER));
    }

    #[tokio::test]
    async fn test_unsupported_type_is_recorded_not_raised() {
        let (_dir, datasets) = setup(&[("gamma", "ftp")]);
        let store = Arc::new(MemoryStore::new());
        let mut runner = runner(&datasets, store.clone());

        let outcome = runner.run_stage(harvest("gamma")).await;

        assert!(!outcome.is_success());
        let records = store.read_all().unwrap();
        assert_eq!(
            records[0].message,
            "Harvesting failed: ftp is not a supported harvester type"
        );
        assert!(runner.context().search_path().is_empty());
    }

    #[tokio::test]
    async fn test_stages_never_overlap() {
        let (_dir, datasets) = setup(&[("alpha", "podaac"), ("beta", "podaac")]);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        {
            let in_flight = Arc::clone(&in_flight);
            let max_in_flight = Arc::clone(&max_in_flight);
            registry.register("harvesters", "podaac", move || CountingPlugin {
                in_flight: Arc::clone(&in_flight),
                max_in_flight: Arc::clone(&max_in_flight),
            });
        }
        let resolver = Arc::new(PluginResolver::new(Arc::new(registry), &datasets));
        let store = Arc::new(MemoryStore::new());
        let mut runner = StageRunner::new(resolver, store.clone());

        for dataset in ["alpha", "beta"] {
            let outcome = runner.run_stage(harvest(dataset)).await;
            assert!(!outcome.is_success());
            // The plugin has returned before run_stage does.
            assert_eq!(in_flight.load(Ordering::SeqCst), 0);
        }

        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        let messages: Vec<String> = store
            .read_all()
            .unwrap()
            .into_iter()
            .map(|r| r.message)
            .collect();
        assert_eq!(
            messages,
            vec![
                "slow granule for alpha",
                "Harvesting failed: upstream too slow",
                "slow granule for beta",
                "Harvesting failed: upstream too slow",
            ]
        );
    }
}
