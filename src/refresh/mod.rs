//! Cached batch refresh.
//!
//! One refresh loads the snapshot, evaluates every entity and composes the
//! output. Results are cached per [`RefreshKey`]; a fresh entry is served
//! as is. When the snapshot source cannot be read, the last good output for
//! the same source and segment is served flagged stale, even if the
//! reference date has moved on since. Only that latest output is kept per
//! source and segment.

pub mod pass;

use crate::analysis::{evaluate_entity, AggregationOrchestrator, PassSettings};
use crate::cache::{Clock, RefreshCache};
use crate::config::Config;
use crate::error::EngineError;
use crate::models::{RefreshMetadata, RefreshOutput};
use crate::series::YearMonth;
use crate::snapshot::{Segment, SnapshotLoader, SnapshotSource};
use chrono::NaiveDate;
use pass::{progress_bar, run_pass};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Identity of one refresh result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefreshKey {
    pub source: String,
    pub reference_date: NaiveDate,
    pub month: YearMonth,
    pub segment: String,
}

impl RefreshKey {
    /// Same source and segment, whatever the date and month.
    fn same_lineage(&self, other: &RefreshKey) -> bool {
        self.source == other.source && self.segment == other.segment
    }
}

/// What to refresh.
#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub source: SnapshotSource,
    pub as_of: NaiveDate,
    pub month: Option<YearMonth>,
    pub segment: Segment,
    /// Bypass a fresh cache entry.
    pub force: bool,
}

/// Runs refresh passes and caches their output.
#[derive(Debug)]
pub struct RefreshService {
    config: Config,
    loader: SnapshotLoader,
    cache: RefreshCache<RefreshKey, Arc<RefreshOutput>>,
    clock: Arc<dyn Clock>,
    show_progress: bool,
}

impl RefreshService {
    pub fn new(config: Config, loader: SnapshotLoader, clock: Arc<dyn Clock>) -> Self {
        let ttl = chrono::Duration::seconds(config.cache.ttl_seconds as i64);
        Self {
            cache: RefreshCache::new(ttl, Arc::clone(&clock)),
            config,
            loader,
            clock,
            show_progress: false,
        }
    }

    /// Show a progress bar during the per-entity pass.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn ttl(&self) -> std::time::Duration {
        self.cache.ttl().to_std().unwrap_or_default()
    }

    /// Produce the output for `request`, from cache when possible.
    pub async fn refresh(&mut self, request: &RefreshRequest) -> Result<Arc<RefreshOutput>, EngineError> {
        let settings = PassSettings::from_config(&self.config, request.as_of, request.month);
        let key = RefreshKey {
            source: request.source.to_string(),
            reference_date: settings.reference_date,
            month: settings.month,
            segment: request.segment.to_string(),
        };

        if !request.force {
            if let Some(cached) = self.cache.get_fresh(&key) {
                info!("Serving cached refresh for {} ({})", key.source, key.reference_date);
                return Ok(Arc::clone(cached));
            }
        }

        let snapshot = match self.loader.load(&request.source).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let previous = self
                    .cache
                    .get_any(&key)
                    .or_else(|| self.cache.find_any(|cached| cached.same_lineage(&key)));
                return match previous {
                    Some(previous) => {
                        warn!(
                            "Snapshot source failed ({}); serving stale result from {}",
                            e, previous.metadata.reference_date
                        );
                        let mut stale = RefreshOutput::clone(previous);
                        stale.metadata.stale = true;
                        Ok(Arc::new(stale))
                    }
                    None => Err(EngineError::SourceUnavailable(e)),
                };
            }
        };

        let start = Instant::now();
        let generated_at = snapshot.generated_at;
        let snapshot = snapshot.filter_segment(&request.segment);
        info!(
            "Refreshing {} entities (segment {}) as of {}",
            snapshot.entities.len(),
            request.segment,
            settings.reference_date
        );

        let progress = self
            .show_progress
            .then(|| progress_bar(snapshot.entities.len() as u64));
        let pass_settings = settings.clone();
        let pass = run_pass(
            snapshot.entities,
            self.config.general.concurrency,
            progress,
            move |loaded| evaluate_entity(loaded, &pass_settings),
        )
        .await;

        let mut data_quality = snapshot.data_quality;
        data_quality.extend(pass.data_quality);
        for event in &data_quality {
            warn!("Data quality: {}: {}", event.entity_id, event.reason);
        }

        let metadata = RefreshMetadata {
            source: key.source.clone(),
            computed_at: self.clock.now(),
            snapshot_generated_at: generated_at,
            as_of: settings.as_of,
            reference_date: settings.reference_date,
            month: settings.month,
            segment: (!request.segment.is_all()).then(|| request.segment.to_string()),
            stale: false,
            duration_seconds: 0.0,
        };

        let mut output = AggregationOrchestrator::new(settings).compose(pass.results, data_quality, metadata);
        output.metadata.duration_seconds = start.elapsed().as_secs_f64();

        let output = Arc::new(output);
        self.cache
            .retain(|cached| !cached.same_lineage(&key) || *cached == key);
        self.cache.insert(key, Arc::clone(&output));
        debug!("Cache holds {} refresh results", self.cache.len());
        Ok(output)
    }
}
