//! Batch orchestration around an external classifier
//!
//! Resolves a batch against the cache, sends only uncached items to the
//! classifier, writes results back, and sweeps expired entries. The returned
//! outcomes always line up one-to-one with the submitted items.

use crate::cache::ContentCache;
use crate::types::BlobInput;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::path::PathBuf;
use tracing::{debug, warn};

/// The expensive classification step
pub trait Classifier {
    /// Classify the blobs at `paths`.
    ///
    /// Must return one entry per path, in the same order. `None` marks an
    /// input that could not be decoded or processed.
    fn classify(&self, paths: &[PathBuf]) -> impl Future<Output = Vec<Option<Value>>> + Send;
}

/// Where an item's result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Cache,
    Computed,
    /// The classifier could not process the content; an empty result was stored
    Undecodable,
    /// The item could not be staged in the cache; nothing was stored
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub name: String,
    pub hash: Option<String>,
    pub result: Value,
    pub source: ResultSource,
}

impl ItemOutcome {
    /// `{ name: result }`, the per-item shape returned to clients
    pub fn into_named(self) -> Value {
        let mut entry = Map::new();
        entry.insert(self.name, self.result);
        Value::Object(entry)
    }
}

fn empty_result() -> Value {
    json!({})
}

/// Resolve, classify what is missing, persist, and sweep
pub async fn classify_batch<C: Classifier>(
    cache: &ContentCache,
    classifier: &C,
    items: Vec<BlobInput>,
) -> Vec<ItemOutcome> {
    let names: Vec<String> = items.iter().map(|i| i.name.clone()).collect();
    let resolved = cache.resolve_batch(items).await;

    let mut outcomes = Vec::with_capacity(resolved.len());
    // (position in batch, hash, blob path)
    let mut pending: Vec<(usize, String, PathBuf)> = Vec::new();

    for (index, (name, item)) in names.into_iter().zip(resolved).enumerate() {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                warn!(name = %name, error = %e, "Item could not be cached, returning empty result");
                outcomes.push(ItemOutcome {
                    name,
                    hash: None,
                    result: empty_result(),
                    source: ResultSource::Failed,
                });
                continue;
            }
        };

        let cached = match item.existing_result.as_deref() {
            Some(stored) => match serde_json::from_str::<Value>(stored) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(
                        hash = %item.hash,
                        error = %e,
                        "Stored result is not valid JSON, recomputing"
                    );
                    None
                }
            },
            None => None,
        };

        match cached {
            Some(value) => outcomes.push(ItemOutcome {
                name,
                hash: Some(item.hash),
                result: value,
                source: ResultSource::Cache,
            }),
            None => {
                pending.push((index, item.hash.clone(), item.path));
                outcomes.push(ItemOutcome {
                    name,
                    hash: Some(item.hash),
                    result: empty_result(),
                    source: ResultSource::Computed,
                });
            }
        }
    }

    if !pending.is_empty() {
        let paths: Vec<PathBuf> = pending.iter().map(|(_, _, path)| path.clone()).collect();
        debug!(count = paths.len(), "Classifying uncached items");
        let computed = classifier.classify(&paths).await;
        if computed.len() != paths.len() {
            warn!(
                expected = paths.len(),
                got = computed.len(),
                "Classifier output length mismatch"
            );
        }

        let mut computed = computed.into_iter();
        for (index, hash, path) in pending {
            let outcome = &mut outcomes[index];
            match computed.next().flatten() {
                Some(value) => outcome.result = value,
                None => {
                    debug!(path = ?path, "Classifier could not process item");
                    outcome.result = empty_result();
                    outcome.source = ResultSource::Undecodable;
                }
            }

            if let Err(e) = cache.attach_result(&hash, outcome.result.to_string()).await {
                warn!(hash = %hash, error = %e, "Failed to store classification result");
            }
        }
    }

    if let Err(e) = cache.sweep_expired().await {
        warn!(error = %e, "Expiry sweep failed");
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use classify_cache_db::MetadataStore;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    /// Scores each blob by its length; blobs starting with `bad` are undecodable
    #[derive(Default)]
    struct FakeClassifier {
        calls: Mutex<Vec<Vec<PathBuf>>>,
    }

    impl FakeClassifier {
        fn calls(&self) -> Vec<Vec<PathBuf>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Classifier for FakeClassifier {
        async fn classify(&self, paths: &[PathBuf]) -> Vec<Option<Value>> {
            self.calls.lock().unwrap().push(paths.to_vec());
            paths
                .iter()
                .map(|path| {
                    let bytes = std::fs::read(path).ok()?;
                    if bytes.starts_with(b"bad") {
                        None
                    } else {
                        Some(json!({ "classA": bytes.len() }))
                    }
                })
                .collect()
        }
    }

    async fn test_cache() -> (TempDir, ContentCache) {
        let dir = tempdir().unwrap();
        let store = MetadataStore::open(dir.path().join("cache.db"))
            .await
            .unwrap();
        let cache = ContentCache::new(store, dir.path().join("blobs"), 604_800);
        cache.init().await.unwrap();
        (dir, cache)
    }

    #[tokio::test]
    async fn test_only_uncached_items_are_classified() {
        let (_dir, cache) = test_cache().await;
        let classifier = FakeClassifier::default();

        classify_batch(&cache, &classifier, vec![BlobInput::new("two.jpg", b"22".to_vec())])
            .await;

        let outcomes = classify_batch(
            &cache,
            &classifier,
            vec![
                BlobInput::new("one.jpg", b"1".to_vec()),
                BlobInput::new("two.jpg", b"22".to_vec()),
                BlobInput::new("three.jpg", b"333".to_vec()),
            ],
        )
        .await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].result, json!({ "classA": 1 }));
        assert_eq!(outcomes[0].source, ResultSource::Computed);
        assert_eq!(outcomes[1].result, json!({ "classA": 2 }));
        assert_eq!(outcomes[1].source, ResultSource::Cache);
        assert_eq!(outcomes[2].result, json!({ "classA": 3 }));
        assert_eq!(outcomes[2].source, ResultSource::Computed);

        let calls = classifier.calls();
        assert_eq!(calls.len(), 2);
        let hash_one = ContentCache::content_hash(b"1");
        let hash_three = ContentCache::content_hash(b"333");
        assert_eq!(
            calls[1],
            vec![
                cache.blob_path(&hash_one, "one.jpg"),
                cache.blob_path(&hash_three, "three.jpg"),
            ]
        );
    }

    #[tokio::test]
    async fn test_fully_cached_batch_skips_classifier() {
        let (_dir, cache) = test_cache().await;
        let classifier = FakeClassifier::default();
        let batch = || {
            vec![
                BlobInput::new("a.jpg", b"aaaa".to_vec()),
                BlobInput::new("b.jpg", b"bb".to_vec()),
            ]
        };

        let first = classify_batch(&cache, &classifier, batch()).await;
        let second = classify_batch(&cache, &classifier, batch()).await;

        assert_eq!(classifier.calls().len(), 1);
        assert!(second.iter().all(|o| o.source == ResultSource::Cache));
        assert_eq!(
            first.iter().map(|o| &o.result).collect::<Vec<_>>(),
            second.iter().map(|o| &o.result).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_undecodable_item_is_stored_as_empty() {
        let (_dir, cache) = test_cache().await;
        let classifier = FakeClassifier::default();

        let outcomes = classify_batch(
            &cache,
            &classifier,
            vec![
                BlobInput::new("broken.jpg", b"bad data".to_vec()),
                BlobInput::new("ok.jpg", b"fine".to_vec()),
            ],
        )
        .await;

        assert_eq!(outcomes[0].result, json!({}));
        assert_eq!(outcomes[0].source, ResultSource::Undecodable);
        assert_eq!(outcomes[1].result, json!({ "classA": 4 }));

        let hash = outcomes[0].hash.clone().unwrap();
        let record = cache.store().select(&hash).await.unwrap().unwrap();
        assert_eq!(record.result.as_deref(), Some("{}"));

        // Not retried on resubmission
        let again = classify_batch(
            &cache,
            &classifier,
            vec![BlobInput::new("broken.jpg", b"bad data".to_vec())],
        )
        .await;
        assert_eq!(again[0].source, ResultSource::Cache);
        assert_eq!(classifier.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_staging_failure_keeps_batch_aligned() {
        let (_dir, cache) = test_cache().await;
        let classifier = FakeClassifier::default();
        let hash = ContentCache::content_hash(b"blocked");
        tokio::fs::create_dir_all(cache.blob_path(&hash, "blocked.jpg"))
            .await
            .unwrap();

        let outcomes = classify_batch(
            &cache,
            &classifier,
            vec![
                BlobInput::new("blocked.jpg", b"blocked".to_vec()),
                BlobInput::new("ok.jpg", b"fine".to_vec()),
            ],
        )
        .await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].source, ResultSource::Failed);
        assert_eq!(outcomes[0].hash, None);
        assert_eq!(outcomes[0].result, json!({}));
        assert_eq!(outcomes[1].source, ResultSource::Computed);
        assert_eq!(classifier.calls()[0].len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_stored_result_is_recomputed() {
        let (_dir, cache) = test_cache().await;
        let classifier = FakeClassifier::default();
        let item = cache
            .resolve(BlobInput::new("a.jpg", b"abc".to_vec()))
            .await
            .unwrap();
        cache.attach_result(&item.hash, "{classA: 0.9}").await.unwrap();

        let outcomes = classify_batch(
            &cache,
            &classifier,
            vec![BlobInput::new("a.jpg", b"abc".to_vec())],
        )
        .await;

        assert_eq!(outcomes[0].source, ResultSource::Computed);
        assert_eq!(outcomes[0].result, json!({ "classA": 3 }));
        let record = cache.store().select(&item.hash).await.unwrap().unwrap();
        assert_eq!(record.result.as_deref(), Some(r#"{"classA":3}"#));
    }

    #[tokio::test]
    async fn test_short_classifier_output_marks_rest_undecodable() {
        struct Truncating;
        impl Classifier for Truncating {
            async fn classify(&self, _paths: &[PathBuf]) -> Vec<Option<Value>> {
                vec![Some(json!({ "classA": 0.5 }))]
            }
        }

        let (_dir, cache) = test_cache().await;
        let outcomes = classify_batch(
            &cache,
            &Truncating,
            vec![
                BlobInput::new("a.jpg", b"a".to_vec()),
                BlobInput::new("b.jpg", b"b".to_vec()),
            ],
        )
        .await;

        assert_eq!(outcomes[0].source, ResultSource::Computed);
        assert_eq!(outcomes[1].source, ResultSource::Undecodable);
        assert_eq!(outcomes[1].result, json!({}));
    }

    #[tokio::test]
    async fn test_sweep_runs_after_batch() {
        let (_dir, cache) = test_cache().await;
        let classifier = FakeClassifier::default();
        let stale = cache
            .resolve(BlobInput::new("old.jpg", b"old".to_vec()))
            .await
            .unwrap();
        let record = cache.store().select(&stale.hash).await.unwrap().unwrap();
        cache
            .store()
            .update(&classify_cache_db::CacheRecord {
                expiry_time: chrono::Utc::now() - chrono::Duration::hours(1),
                ..record
            })
            .await
            .unwrap();

        classify_batch(&cache, &classifier, vec![BlobInput::new("new.jpg", b"new".to_vec())])
            .await;

        assert!(tokio::fs::metadata(&stale.path).await.is_err());
        let record = cache.store().select(&stale.hash).await.unwrap().unwrap();
        assert!(record.deleted_at.is_some());
    }

    #[test]
    fn test_into_named() {
        let outcome = ItemOutcome {
            name: "cat.jpg".to_string(),
            hash: Some("abc123".to_string()),
            result: json!({ "classA": 0.9 }),
            source: ResultSource::Cache,
        };
        assert_eq!(outcome.into_named(), json!({ "cat.jpg": { "classA": 0.9 } }));
    }
}
