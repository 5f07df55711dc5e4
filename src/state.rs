use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::{
    config::AppConfig,
    db::create_pool,
    error::{AppError, AppResult},
    repository::{pg_store::PgKpiStore, KpiStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub store: Option<Arc<dyn KpiStore>>,
    /// Held for the duration of a pipeline run.
    pub pipeline_lock: Arc<Mutex<()>>,
    pub pipeline_runs: RunTracker,
    pub kpi_summary_cache: Cache<String, Value>,
}

/// Counts pipeline runs so summary reads never cache a half-persisted KPI set.
#[derive(Debug, Clone, Default)]
pub struct RunTracker {
    in_flight: Arc<AtomicUsize>,
    finished: Arc<AtomicU64>,
}

impl RunTracker {
    pub fn begin(&self) -> RunTicket {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        RunTicket {
            tracker: self.clone(),
        }
    }

    /// Finished-run count, or `None` while a run is in progress.
    pub fn snapshot(&self) -> Option<u64> {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            return None;
        }
        Some(self.finished.load(Ordering::SeqCst))
    }

    /// True when no run started or finished since `snapshot` was taken.
    pub fn settled_since(&self, snapshot: Option<u64>) -> bool {
        snapshot.is_some() && self.snapshot() == snapshot
    }
}

/// Marks a run as in progress until dropped.
pub struct RunTicket {
    tracker: RunTracker,
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        self.tracker.finished.fetch_add(1, Ordering::SeqCst);
        self.tracker.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, sqlx::Error> {
        let db_pool = create_pool(&config)?;
        let store = db_pool
            .clone()
            .map(|pool| Arc::new(PgKpiStore::new(pool)) as Arc<dyn KpiStore>);
        let kpi_summary_cache = Cache::builder()
            .max_capacity(config.kpi_summary_cache_max_entries)
            .time_to_live(Duration::from_secs(config.kpi_summary_cache_ttl_seconds))
            .build();

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            store,
            pipeline_lock: Arc::new(Mutex::new(())),
            pipeline_runs: RunTracker::default(),
            kpi_summary_cache,
        })
    }

    #[cfg(test)]
    pub fn with_store(config: AppConfig, store: Arc<dyn KpiStore>) -> Self {
        Self {
            kpi_summary_cache: Cache::builder()
                .max_capacity(config.kpi_summary_cache_max_entries)
                .build(),
            config: Arc::new(config),
            db_pool: None,
            store: Some(store),
            pipeline_lock: Arc::new(Mutex::new(())),
            pipeline_runs: RunTracker::default(),
        }
    }

    pub fn store(&self) -> AppResult<&dyn KpiStore> {
        self.store.as_deref().ok_or_else(|| {
            AppError::Dependency(
                "KPI store is not configured. Set DATABASE_URL or SUPABASE_DB_URL.".to_string(),
            )
        })
    }
}
