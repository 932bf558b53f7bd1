//! Per-instance control surface.
//!
//! Four verbs, each keyed by instance id: `start` spawns a pipeline and
//! fails on a duplicate id; `stop`, `update`, and `status` fail on an
//! unknown one. `update` deep-merges the delta over the live config
//! document (single-source-single-target only), revalidates it, and sets
//! the `config_updated` flag the pipeline reads at its safe points.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use ferroredo_error::{FerroError, Result};
use ferroredo_source::FileBlockSource;
use ferroredo_types::Shutdown;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{error, info};

use crate::config::{merge_config, Config};
use crate::replicator::Replicator;

/// Status payload for one instance.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InstanceStatus {
    pub running: bool,
    pub config: Value,
    pub hard_shutdown: bool,
    pub soft_shutdown: bool,
    pub config_updated: bool,
}

struct Instance {
    shutdown: Arc<Shutdown>,
    config: Value,
    config_updated: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

/// Registry of running pipeline instances.
#[derive(Default)]
pub struct InstanceManager {
    instances: Mutex<HashMap<String, Instance>>,
}

impl InstanceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an instance. Fails when the id already exists or the config
    /// does not validate.
    pub fn start(&self, id: &str, config_json: &str) -> Result<()> {
        let mut instances = self.instances.lock();
        if instances.contains_key(id) {
            return Err(FerroError::instance(id, "already exists"));
        }
        let config = Config::parse(config_json)?;
        let config_value: Value =
            serde_json::from_str(config_json).map_err(|e| FerroError::ConfigParse {
                detail: e.to_string(),
            })?;

        let shutdown = Shutdown::new();
        let running = Arc::new(AtomicBool::new(true));
        let thread_shutdown = Arc::clone(&shutdown);
        let thread_running = Arc::clone(&running);
        let thread_id = id.to_string();
        let join = std::thread::Builder::new()
            .name(format!("replicator-{id}"))
            .spawn(move || {
                let replicator =
                    Replicator::new(config, FileBlockSource::new(), Arc::clone(&thread_shutdown));
                if let Err(err) = replicator.run() {
                    error!(code = err.code(), instance = %thread_id, "{err}");
                    thread_shutdown.stop_hard();
                }
                thread_running.store(false, Ordering::Release);
            })
            .map_err(|e| FerroError::internal(e.to_string()))?;

        info!(instance = id, "instance started");
        instances.insert(
            id.to_string(),
            Instance {
                shutdown,
                config: config_value,
                config_updated: Arc::new(AtomicBool::new(false)),
                running,
                join: Some(join),
            },
        );
        Ok(())
    }

    /// Stop and remove an instance, joining its thread.
    pub fn stop(&self, id: &str) -> Result<()> {
        let mut instance = {
            let mut instances = self.instances.lock();
            instances
                .remove(id)
                .ok_or_else(|| FerroError::instance(id, "not found"))?
        };
        instance.shutdown.stop_hard();
        if let Some(join) = instance.join.take() {
            let _ = join.join();
        }
        info!(instance = id, "instance stopped");
        Ok(())
    }

    /// Deep-merge a config delta over the live document. The merged
    /// document must revalidate; the pipeline observes the update flag at
    /// its safe points.
    pub fn update(&self, id: &str, delta: &Value) -> Result<Value> {
        let mut instances = self.instances.lock();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| FerroError::instance(id, "not found"))?;
        let mut merged = instance.config.clone();
        merge_config(&mut merged, delta)?;
        Config::parse(&merged.to_string())?;
        instance.config = merged.clone();
        instance.config_updated.store(true, Ordering::Release);
        info!(instance = id, "config updated");
        Ok(merged)
    }

    /// Report one instance's state.
    pub fn status(&self, id: &str) -> Result<InstanceStatus> {
        let instances = self.instances.lock();
        let instance = instances
            .get(id)
            .ok_or_else(|| FerroError::instance(id, "not found"))?;
        Ok(InstanceStatus {
            running: instance.running.load(Ordering::Acquire),
            config: instance.config.clone(),
            hard_shutdown: instance.shutdown.hard_requested(),
            soft_shutdown: instance.shutdown.soft_requested(),
            config_updated: instance.config_updated.load(Ordering::Acquire),
        })
    }

    /// Ids of all registered instances.
    pub fn ids(&self) -> Vec<String> {
        self.instances.lock().keys().cloned().collect()
    }

    /// Soft-stop every instance (SIGINT path) without removing them.
    pub fn stop_all_soft(&self) {
        for instance in self.instances.lock().values() {
            instance.shutdown.stop_soft();
        }
    }

    /// Stop everything and join (process exit).
    pub fn shutdown_all(&self) {
        let ids = self.ids();
        for id in ids {
            let _ = self.stop(&id);
        }
    }
}
