use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::capture::pipeline::CapturePipeline;
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::inference::client::HttpInferenceClient;
use crate::inference::InferenceClient;
use crate::ledger::rollover::spawn_rollover;
use crate::ledger::store::LedgerStore;
use crate::ledger::{Ledger, LedgerOptions, SharedLedger};
use crate::stats::narrative::NarrativeService;
use crate::storage::{LocalStorage, Storage, StorageClient};
use crate::widget::publisher::WidgetPublisher;
use crate::widget::store::FileSnapshotStore;

/// Long-running tasks started by [`AppState::init`].
pub struct BackgroundTasks {
    pub widget: JoinHandle<()>,
    pub rollover: JoinHandle<()>,
}

impl BackgroundTasks {
    /// Stops the rollover poll, then lets the widget writer flush its last
    /// snapshot. The writer exits once every `AppState` clone is gone.
    pub async fn shutdown(self) {
        self.rollover.abort();
        let _ = self.rollover.await;
        if let Err(e) = self.widget.await {
            tracing::warn!(error = %e, "widget writer ended abnormally");
        }
    }
}

/// Explicitly constructed components shared by the handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub clock: Arc<dyn Clock>,
    pub ledger: SharedLedger,
    pub pipeline: CapturePipeline,
    pub storage: Arc<dyn StorageClient>,
    pub narrative: Arc<dyn NarrativeService>,
}

impl AppState {
    /// Builds every component and starts the background tasks (widget
    /// writer, day-rollover poll).
    pub async fn init(config: AppConfig, clock: Arc<dyn Clock>) -> anyhow::Result<(Self, BackgroundTasks)> {
        let config = Arc::new(config);

        let storage: Arc<dyn StorageClient> = match &config.s3 {
            Some(s3) => Arc::new(
                Storage::new(
                    &s3.endpoint,
                    &s3.bucket,
                    &s3.access_key,
                    &s3.secret_key,
                    &s3.region,
                )
                .await?,
            ),
            None => Arc::new(LocalStorage::new(&config.image_dir).await?),
        };

        let http = Arc::new(HttpInferenceClient::new(&config.inference_endpoint)?);
        let inference: Arc<dyn InferenceClient> = http.clone();
        let narrative: Arc<dyn NarrativeService> = http;

        let widget_store = Arc::new(FileSnapshotStore::new(&config.widget_snapshot_path));
        let (widget, widget_task) = WidgetPublisher::spawn(widget_store, config.widget_debounce);

        let ledger = Ledger::open(
            LedgerStore::File(config.ledger_path.clone()),
            clock.clone(),
            storage.clone(),
            LedgerOptions {
                retention_days: config.retention_days,
                goals: config.goals,
            },
        )
        .await?
        .with_widget(widget)
        .into_shared();

        let rollover_task = spawn_rollover(ledger.clone(), config.rollover_check);

        let pipeline = CapturePipeline::new(
            ledger.clone(),
            inference,
            storage.clone(),
            clock.clone(),
            config.inference_timeout,
        );

        Ok((
            Self {
                config,
                clock,
                ledger,
                pipeline,
                storage,
                narrative,
            },
            BackgroundTasks {
                widget: widget_task,
                rollover: rollover_task,
            },
        ))
    }

    /// Clock from config: explicit offset, else the host's.
    pub fn clock_for(config: &AppConfig) -> Arc<dyn Clock> {
        match config.local_offset {
            Some(offset) => Arc::new(SystemClock::new(offset)),
            None => Arc::new(SystemClock::detect()),
        }
    }

    #[cfg(test)]
    pub async fn fake(inference: crate::inference::fake::FakeInference) -> (Self, crate::clock::FixedClock) {
        use crate::clock::FixedClock;
        use crate::ledger::testing::NOW;
        use crate::storage::memory::MemoryStorage;

        let clock = FixedClock::new(NOW);
        let storage: Arc<dyn StorageClient> = Arc::new(MemoryStorage::default());
        let ledger = Ledger::open(
            LedgerStore::Memory,
            Arc::new(clock.clone()),
            storage.clone(),
            LedgerOptions::default(),
        )
        .await
        .expect("memory ledger opens")
        .into_shared();
        let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());
        let pipeline = CapturePipeline::new(
            ledger.clone(),
            Arc::new(inference),
            storage.clone(),
            clock_dyn.clone(),
            crate::capture::pipeline::DEFAULT_INFERENCE_TIMEOUT,
        );
        (
            Self {
                config: Arc::new(AppConfig::default()),
                clock: clock_dyn,
                ledger,
                pipeline,
                storage,
                narrative: Arc::new(crate::stats::narrative::fake::FakeNarrative::default()),
            },
            clock,
        )
    }
}
