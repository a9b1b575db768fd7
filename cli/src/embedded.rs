// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Embedded pipeline
//!
//! Builds the pipeline stack in-process from a loaded manifest:
//! store -> primitive store -> strategy -> orchestrator.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

use gatecast_core::{
    application::{
        recorder::RunContextRecorder, strategy_from_config, OrchestratorSettings, PipelineOrchestrator,
    },
    domain::{pipeline_config::PipelineConfigManifest, primitives::PrimitiveStore, repository::KeyValueStore},
    infrastructure::{event_bus::EventBus, kv::open_store, repositories::KvPrimitiveStore},
};

pub struct EmbeddedPipeline {
    manifest: PipelineConfigManifest,
    store: Arc<dyn KeyValueStore>,
    primitives: Arc<dyn PrimitiveStore>,
}

impl EmbeddedPipeline {
    /// Validate the manifest and open its store.
    pub fn open(manifest: PipelineConfigManifest) -> Result<Self> {
        manifest
            .validate()
            .context("Configuration validation failed")?;

        let store = open_store(&manifest.spec.persistence).with_context(|| {
            format!(
                "Failed to open {:?} store at {}",
                manifest.spec.persistence.backend,
                manifest.spec.persistence.path.display()
            )
        })?;
        let primitives: Arc<dyn PrimitiveStore> = Arc::new(KvPrimitiveStore::new(store.clone()));

        debug!(backend = ?manifest.spec.persistence.backend, "Embedded pipeline store opened");
        Ok(Self {
            manifest,
            store,
            primitives,
        })
    }

    pub fn manifest(&self) -> &PipelineConfigManifest {
        &self.manifest
    }

    pub fn primitives(&self) -> Arc<dyn PrimitiveStore> {
        self.primitives.clone()
    }

    pub fn recorder(&self) -> RunContextRecorder {
        RunContextRecorder::new(self.store.clone())
    }

    /// Wire the configured strategy into an orchestrator.
    pub fn orchestrator(&self) -> Result<PipelineOrchestrator> {
        let strategy = strategy_from_config(&self.manifest).context("Failed to initialize pipeline strategy")?;
        let stages = strategy
            .stages()
            .with_context(|| format!("Failed to build {} pipeline stages", strategy.name()))?;

        Ok(PipelineOrchestrator::new(
            stages,
            self.primitives.clone(),
            self.store.clone(),
            EventBus::with_default_capacity(),
            OrchestratorSettings::from(&self.manifest.spec),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatecast_core::domain::pipeline_config::{PersistenceBackend, StrategyKind};
    use gatecast_core::domain::run_context::FinalStatus;

    fn mock_manifest() -> PipelineConfigManifest {
        let mut manifest = PipelineConfigManifest::default();
        manifest.spec.strategy = StrategyKind::Mock;
        manifest.spec.persistence.backend = PersistenceBackend::Memory;
        manifest
    }

    #[tokio::test]
    async fn test_mock_run_is_recorded() {
        let pipeline = EmbeddedPipeline::open(mock_manifest()).unwrap();
        let orchestrator = pipeline.orchestrator().unwrap();

        let context = orchestrator
            .run_unified_pipeline("Central bank holds interest rates steady")
            .await
            .unwrap();
        assert_eq!(context.final_status, FinalStatus::Passed);

        let runs = pipeline.recorder().recent_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, context.run_id);
    }

    #[tokio::test]
    async fn test_sled_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = mock_manifest();
        manifest.spec.persistence.backend = PersistenceBackend::Sled;
        manifest.spec.persistence.path = dir.path().join("store");

        {
            let pipeline = EmbeddedPipeline::open(manifest.clone()).unwrap();
            assert!(pipeline.primitives().set("brevity", 0.9).await.unwrap());
        }

        let pipeline = EmbeddedPipeline::open(manifest).unwrap();
        let weights = pipeline.primitives().get().await.unwrap();
        assert_eq!(weights.get("brevity"), Some(0.9));
    }

    #[test]
    fn test_invalid_manifest_is_rejected() {
        let mut manifest = mock_manifest();
        manifest.kind = "AgentConfig".to_string();
        assert!(EmbeddedPipeline::open(manifest).is_err());
    }
}
