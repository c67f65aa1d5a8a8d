//! Artifact processing pipeline.
//!
//! Downloads source images referenced by synced payloads, derives the five
//! size classes, uploads them to object storage, and publishes the variant
//! set atomically. A failure anywhere before the final commit publishes
//! nothing.

use crate::error::{SyncError, SyncResult};
use bytes::Bytes;
use image::imageops::FilterType;
use marquee_core::artifact::{AssetKind, ImageFormat, SizeClass, variant_storage_key};
use marquee_core::config::ArtifactConfig;
use marquee_core::{EntityKind, entity_storage_prefix};
use marquee_metadata::MetadataStore;
use marquee_metadata::models::{ArtifactJobRow, ArtifactVariantRow};
use marquee_metadata::repos::ArtifactJobState;
use marquee_storage::ObjectStore;
use marquee_upstream::UpstreamClient;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// One encoded size class, ready for upload.
struct EncodedVariant {
    size_class: SizeClass,
    bytes: Bytes,
    width: u32,
    height: u32,
}

pub struct ArtifactPipeline {
    store: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    upstream: Arc<dyn UpstreamClient>,
    config: ArtifactConfig,
}

impl ArtifactPipeline {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        upstream: Arc<dyn UpstreamClient>,
        config: ArtifactConfig,
    ) -> Self {
        Self {
            store,
            objects,
            upstream,
            config,
        }
    }

    /// Image URLs referenced by an upstream payload, with the asset kind
    /// each one maps to.
    pub fn extract_asset_urls(kind: EntityKind, payload: &Value) -> Vec<(AssetKind, String)> {
        let mut assets = Vec::new();
        let primary = if kind == EntityKind::Person {
            AssetKind::Headshot
        } else {
            AssetKind::Poster
        };

        for (field, asset) in [
            ("image", primary),
            ("banner", AssetKind::Banner),
            ("fanart", AssetKind::Backdrop),
        ] {
            if let Some(url) = payload.get(field).and_then(Value::as_str)
                && (url.starts_with("http://") || url.starts_with("https://"))
            {
                assets.push((asset, url.to_string()));
            }
        }
        assets
    }

    /// Enqueue one artifact job per asset URL found in the payload.
    ///
    /// Jobs are keyed by (entity, asset); a changed source URL resets the
    /// existing job rather than stacking a second one.
    pub async fn enqueue_for_entity(
        &self,
        kind: EntityKind,
        id: i64,
        payload: &Value,
    ) -> SyncResult<u32> {
        let now = OffsetDateTime::now_utc();
        let mut enqueued = 0;
        for (asset, url) in Self::extract_asset_urls(kind, payload) {
            let job = ArtifactJobRow {
                job_id: Uuid::new_v4(),
                entity_kind: kind.as_str().to_string(),
                entity_id: id,
                asset_kind: asset.as_str().to_string(),
                source_url: url,
                state: ArtifactJobState::Pending.as_str().to_string(),
                attempts: 0,
                last_error: None,
                created_at: now,
                updated_at: now,
            };
            self.store.upsert_artifact_job(&job).await?;
            enqueued += 1;
        }
        Ok(enqueued)
    }

    /// Walk the durable tier and enqueue jobs for every asset URL that has
    /// no published variants yet. Backs the admin backfill trigger.
    pub async fn backfill_missing(&self) -> SyncResult<u32> {
        let mut enqueued = 0;
        for kind in EntityKind::SYNCABLE {
            for id in self.store.list_entry_ids(kind.as_str()).await? {
                let Some(row) = self.store.get_entry(kind.as_str(), id).await? else {
                    continue;
                };
                let payload: Value = match serde_json::from_str(&row.payload) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(kind = kind.as_str(), id, error = %err, "unreadable payload, skipping backfill");
                        continue;
                    }
                };
                let urls = Self::extract_asset_urls(kind, &payload);
                if urls.is_empty() {
                    continue;
                }
                let variants = self.store.get_variants(kind.as_str(), id).await?;
                let covered: HashSet<&str> =
                    variants.iter().map(|v| v.asset_kind.as_str()).collect();
                let now = OffsetDateTime::now_utc();
                for (asset, url) in urls {
                    if covered.contains(asset.as_str()) {
                        continue;
                    }
                    let job = ArtifactJobRow {
                        job_id: Uuid::new_v4(),
                        entity_kind: kind.as_str().to_string(),
                        entity_id: id,
                        asset_kind: asset.as_str().to_string(),
                        source_url: url,
                        state: ArtifactJobState::Pending.as_str().to_string(),
                        attempts: 0,
                        last_error: None,
                        created_at: now,
                        updated_at: now,
                    };
                    self.store.upsert_artifact_job(&job).await?;
                    enqueued += 1;
                }
            }
        }
        Ok(enqueued)
    }

    /// Run one processing attempt and record its outcome on the job row.
    #[instrument(skip(self, job), fields(job_id = %job.job_id, entity = %format!("{}/{}", job.entity_kind, job.entity_id)))]
    pub async fn run_attempt(&self, job: &ArtifactJobRow) -> SyncResult<()> {
        let attempts = job.attempts + 1;
        let now = OffsetDateTime::now_utc();

        match self.process(job).await {
            Ok(count) => {
                info!(variants = count, "artifact variants published");
                self.store
                    .update_artifact_job(
                        job.job_id,
                        ArtifactJobState::Succeeded.as_str(),
                        attempts,
                        None,
                        now,
                    )
                    .await?;
                Ok(())
            }
            Err(err) => {
                let state = if attempts >= i64::from(self.config.max_attempts) {
                    warn!(attempts, error = %err, "artifact job permanently failed");
                    ArtifactJobState::FailedPermanent
                } else {
                    debug!(attempts, error = %err, "artifact attempt failed, will retry");
                    ArtifactJobState::Pending
                };
                self.store
                    .update_artifact_job(
                        job.job_id,
                        state.as_str(),
                        attempts,
                        Some(&err.to_string()),
                        now,
                    )
                    .await?;
                Err(err)
            }
        }
    }

    /// Download, derive, upload, and publish the variant set for one job.
    ///
    /// Returns the number of variants published. Nothing becomes visible
    /// unless every stage succeeds; partially uploaded objects are deleted
    /// best-effort on failure.
    async fn process(&self, job: &ArtifactJobRow) -> SyncResult<usize> {
        let kind = EntityKind::parse(&job.entity_kind)
            .map_err(|e| SyncError::Processing(e.to_string()))?;
        let asset = AssetKind::parse(&job.asset_kind)
            .map_err(|e| SyncError::Processing(e.to_string()))?;

        let (bytes, content_type) = self.upstream.download(&job.source_url).await?;

        if let Some(ct) = &content_type
            && !ct.starts_with("image/")
        {
            return Err(SyncError::Processing(format!(
                "unexpected content type {ct}"
            )));
        }
        if bytes.len() as u64 > self.config.max_source_bytes {
            return Err(SyncError::Processing(format!(
                "source is {} bytes, limit is {}",
                bytes.len(),
                self.config.max_source_bytes
            )));
        }

        // Decode and re-encode off the async runtime.
        let format = self.config.format;
        let quality = self.config.jpeg_quality;
        let variants = tokio::task::spawn_blocking(move || {
            build_variants(&bytes, format, quality)
        })
        .await
        .map_err(|e| SyncError::Processing(format!("encode task failed: {e}")))?
        .map_err(SyncError::Processing)?;

        let mut uploaded: Vec<String> = Vec::with_capacity(variants.len());
        let mut rows = Vec::with_capacity(variants.len());
        let now = OffsetDateTime::now_utc();

        for variant in &variants {
            let key = variant_storage_key(kind, job.entity_id, asset, variant.size_class, format);
            if let Err(err) = self
                .objects
                .put(&key, variant.bytes.clone(), format.content_type())
                .await
            {
                self.rollback_uploads(&uploaded).await;
                return Err(err.into());
            }
            uploaded.push(key.clone());
            rows.push(ArtifactVariantRow {
                entity_kind: job.entity_kind.clone(),
                entity_id: job.entity_id,
                asset_kind: job.asset_kind.clone(),
                size_class: variant.size_class.as_str().to_string(),
                storage_key: key,
                byte_size: variant.bytes.len() as i64,
                format: format.as_str().to_string(),
                width: i64::from(variant.width),
                height: i64::from(variant.height),
                processed_at: now,
            });
        }

        if let Err(err) = self
            .store
            .replace_variants(&job.entity_kind, job.entity_id, &job.asset_kind, &rows)
            .await
        {
            self.rollback_uploads(&uploaded).await;
            return Err(err.into());
        }

        Ok(rows.len())
    }

    async fn rollback_uploads(&self, keys: &[String]) {
        for key in keys {
            if let Err(err) = self.objects.delete(key).await {
                warn!(key, error = %err, "failed to roll back uploaded variant");
            }
        }
    }

    /// Whether a pending job is due for its next attempt.
    pub fn is_due(&self, job: &ArtifactJobRow, now: OffsetDateTime) -> bool {
        job.attempts == 0
            || now - job.updated_at
                >= time::Duration::seconds(self.config.retry_delay_secs.min(i64::MAX as u64) as i64)
    }

    /// Delete stored objects no variant row references.
    ///
    /// Walks the storage tree grouped by entity prefix so each entity's
    /// variant keys are fetched once.
    #[instrument(skip(self))]
    pub async fn clean_orphans(&self) -> SyncResult<u64> {
        let keys = self.objects.list("").await?;
        let mut referenced: HashMap<(String, i64), HashSet<String>> = HashMap::new();
        let mut removed = 0;

        for key in keys {
            let Some((kind, id)) = parse_entity_from_key(&key) else {
                debug!(key, "skipping object outside the variant layout");
                continue;
            };
            let entry = match referenced.entry((kind.clone(), id)) {
                std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::hash_map::Entry::Vacant(v) => {
                    let keys = self.store.get_variant_keys(&kind, id).await?;
                    v.insert(keys.into_iter().collect())
                }
            };
            if !entry.contains(&key) {
                debug!(key, "removing orphaned artifact object");
                match self.objects.delete(&key).await {
                    Ok(()) => removed += 1,
                    Err(err) => warn!(key, error = %err, "failed to delete orphaned object"),
                }
            }
        }

        Ok(removed)
    }

    /// Delete the stored objects and variant rows of a purged entity.
    pub async fn delete_entity_artifacts(&self, kind: &str, id: i64) -> SyncResult<u64> {
        let keys = self.store.delete_variants_for_entity(kind, id).await?;
        let mut removed = 0;
        for key in keys {
            match self.objects.delete(&key).await {
                Ok(()) => removed += 1,
                Err(marquee_storage::StorageError::NotFound(_)) => {}
                Err(err) => warn!(key, error = %err, "failed to delete artifact object"),
            }
        }
        Ok(removed)
    }

    /// Spawn the polling worker pool.
    ///
    /// A dispatcher pulls due pending jobs and fans them out to at most
    /// `worker_count` concurrent attempts.
    pub fn start_workers(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let concurrency = self.config.worker_count.max(1) as usize;
        tokio::spawn(async move {
            let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency));
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let pending = match self.store.get_pending_artifact_jobs(64).await {
                    Ok(jobs) => jobs,
                    Err(err) => {
                        warn!(error = %err, "failed to poll artifact jobs");
                        continue;
                    }
                };

                let now = OffsetDateTime::now_utc();
                for job in pending {
                    if !self.is_due(&job, now) {
                        continue;
                    }
                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                        return;
                    };
                    let pipeline = self.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        // Outcome is recorded on the job row either way.
                        let _ = pipeline.run_attempt(&job).await;
                    });
                }
            }
        })
    }
}

/// Recover `(kind, id)` from a storage key shaped
/// `{kind}/{aa}/{bb}/{id}/{asset}/{size}.{ext}`.
fn parse_entity_from_key(key: &str) -> Option<(String, i64)> {
    let mut parts = key.split('/');
    let kind = parts.next()?;
    EntityKind::parse(kind).ok()?;
    let _fan_out = (parts.next()?, parts.next()?);
    let id: i64 = parts.next()?.parse().ok()?;
    Some((kind.to_string(), id))
}

/// Decode the source and produce every size class.
///
/// Classes larger than the source keep the source resolution; nothing is
/// ever upscaled. All five classes are re-encoded to the target format so a
/// published set is uniform.
fn build_variants(
    source: &[u8],
    format: ImageFormat,
    jpeg_quality: u8,
) -> Result<Vec<EncodedVariant>, String> {
    let decoded =
        image::load_from_memory(source).map_err(|e| format!("failed to decode source: {e}"))?;
    let (source_w, source_h) = (decoded.width(), decoded.height());

    let mut variants = Vec::with_capacity(SizeClass::ALL.len());
    for size_class in SizeClass::ALL {
        let scaled = match size_class.max_edge() {
            Some(edge) if source_w > edge || source_h > edge => {
                decoded.resize(edge, edge, FilterType::Lanczos3)
            }
            _ => decoded.clone(),
        };

        let mut out = Vec::new();
        match format {
            ImageFormat::Jpeg => {
                let encoder =
                    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, jpeg_quality);
                // JPEG has no alpha channel.
                scaled
                    .to_rgb8()
                    .write_with_encoder(encoder)
                    .map_err(|e| format!("jpeg encode failed: {e}"))?;
            }
            ImageFormat::Png => {
                scaled
                    .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
                    .map_err(|e| format!("png encode failed: {e}"))?;
            }
            ImageFormat::Webp => {
                scaled
                    .write_to(&mut Cursor::new(&mut out), image::ImageFormat::WebP)
                    .map_err(|e| format!("webp encode failed: {e}"))?;
            }
        }

        variants.push(EncodedVariant {
            size_class,
            width: scaled.width(),
            height: scaled.height(),
            bytes: Bytes::from(out),
        });
    }

    Ok(variants)
}
