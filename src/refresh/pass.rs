//! Parallel per-entity batch pass.
//!
//! Entities are split into chunks that run on the blocking pool and are
//! joined together. An entity whose evaluation panics becomes a data-quality
//! event; the rest of its chunk and the other chunks still count.

use crate::analysis::EntityResult;
use crate::models::DataQualityEvent;
use crate::snapshot::LoadedEntity;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Results of the per-entity pass.
#[derive(Debug, Default)]
pub struct PassResults {
    pub results: Vec<EntityResult>,
    pub data_quality: Vec<DataQualityEvent>,
}

/// Progress bar for `len` entities.
pub fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} entities ({eta})")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

/// Split `items` into at most `parts` chunks of near-equal size, preserving order.
fn split_chunks<T>(items: Vec<T>, parts: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    let chunk_size = items.len().div_ceil(parts.max(1));

    let mut chunks = Vec::new();
    let mut current = Vec::with_capacity(chunk_size);
    for item in items {
        current.push(item);
        if current.len() == chunk_size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(chunk_size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Text of a panic payload, when it carries one.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

/// Evaluate every entity with `evaluate`, `concurrency` chunks at a time.
pub async fn run_pass<F>(
    entities: Vec<LoadedEntity>,
    concurrency: usize,
    progress: Option<ProgressBar>,
    evaluate: F,
) -> PassResults
where
    F: Fn(&LoadedEntity) -> EntityResult + Send + Sync + 'static,
{
    let evaluate = Arc::new(evaluate);
    let chunks = split_chunks(entities, concurrency);
    debug!("Running per-entity pass in {} chunks", chunks.len());

    let mut chunk_ids: Vec<Vec<String>> = Vec::with_capacity(chunks.len());
    let mut handles = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        chunk_ids.push(chunk.iter().map(|l| l.entity.id.clone()).collect());

        let evaluate = Arc::clone(&evaluate);
        let progress = progress.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            chunk
                .iter()
                .map(|loaded| {
                    let outcome = catch_unwind(AssertUnwindSafe(|| evaluate(loaded)))
                        .map_err(|payload| {
                            DataQualityEvent::new(
                                loaded.entity.id.clone(),
                                format!("computation failed: {}", panic_message(payload.as_ref())),
                            )
                        });
                    if let Some(ref pb) = progress {
                        pb.inc(1);
                    }
                    outcome
                })
                .collect::<Vec<_>>()
        }));
    }

    let mut pass = PassResults::default();
    for (outcome, ids) in join_all(handles).await.into_iter().zip(chunk_ids) {
        match outcome {
            Ok(outcomes) => {
                for outcome in outcomes {
                    match outcome {
                        Ok(result) => pass.results.push(result),
                        Err(event) => {
                            warn!("Evaluation failed for {}: {}", event.entity_id, event.reason);
                            pass.data_quality.push(event);
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Worker failed for {} entities: {}", ids.len(), e);
                pass.data_quality.extend(
                    ids.into_iter()
                        .map(|id| DataQualityEvent::new(id, format!("computation failed: {}", e))),
                );
            }
        }
    }

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    pass
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{evaluate_entity, PassSettings};
    use crate::config::Config;
    use crate::models::{Entity, SizeTier};
    use crate::series::{DailySeries, MonthlyTotals};
    use chrono::NaiveDate;

    fn lab(id: &str) -> LoadedEntity {
        let day = NaiveDate::from_ymd_opt(2025, 9, 19).unwrap();
        LoadedEntity {
            entity: Entity {
                id: id.to_string(),
                name: String::new(),
                tier: SizeTier::Small,
                city: String::new(),
                state: String::new(),
                country: "BR".to_string(),
            },
            series: DailySeries::from_counts(vec![(day, 5)]),
            totals: MonthlyTotals::default(),
            previous_week_volume: None,
        }
    }

    fn settings() -> PassSettings {
        PassSettings::from_config(
            &Config::default(),
            NaiveDate::from_ymd_opt(2025, 9, 20).unwrap(),
            None,
        )
    }

    #[test]
    fn test_split_chunks() {
        let chunks = split_chunks((0..10).collect(), 4);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
        assert_eq!(chunks.concat(), (0..10).collect::<Vec<_>>());

        assert_eq!(split_chunks((0..2).collect(), 8).len(), 2);
        assert_eq!(split_chunks::<u8>(Vec::new(), 3).len(), 0);
        assert_eq!(split_chunks((0..3).collect(), 0).len(), 1);
    }

    #[tokio::test]
    async fn test_run_pass_evaluates_everything() {
        let labs: Vec<LoadedEntity> = (0..7).map(|i| lab(&format!("lab-{}", i))).collect();
        let settings = settings();

        let pass = run_pass(labs, 3, None, move |l| evaluate_entity(l, &settings)).await;

        assert_eq!(pass.results.len(), 7);
        assert!(pass.data_quality.is_empty());
        assert_eq!(pass.results[0].entity.id, "lab-0");
    }

    #[tokio::test]
    async fn test_failed_entity_becomes_data_quality() {
        let labs: Vec<LoadedEntity> = (0..3).map(|i| lab(&format!("lab-{}", i))).collect();
        let settings = settings();

        // One chunk holds every lab; only the failing one is lost
        let pass = run_pass(labs, 1, None, move |l| {
            if l.entity.id == "lab-2" {
                panic!("boom");
            }
            evaluate_entity(l, &settings)
        })
        .await;

        let ok: Vec<&str> = pass.results.iter().map(|r| r.entity.id.as_str()).collect();
        assert_eq!(ok, vec!["lab-0", "lab-1"]);
        assert_eq!(pass.data_quality.len(), 1);
        assert_eq!(pass.data_quality[0].entity_id, "lab-2");
        assert!(pass.data_quality[0].reason.contains("boom"));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bad series"));
        assert_eq!(panic_message(payload.as_ref()), "bad series");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "panic");
    }
}
