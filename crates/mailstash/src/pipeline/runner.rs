//! Task runner: drives fetch → classify → plan → write → index per
//! task and records one run-history row per task.
//!
//! Tasks run strictly sequentially; capacity planning and the
//! per-volume index writers assume single-writer access. Within one
//! task the three migration phases always execute in raw → attachment
//! → cloud order, and the staging area is reclaimed only after
//! indexing has finished.

use std::path::Path;

use log::{info, warn};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::classify::{classify, ClassifiedBatches};
use super::error::PipelineError;
use super::fetch::MessageSource;
use super::progress::{ProgressEvent, ProgressReporter};
use crate::cloud::{download_large_file, CloudResolver, ProviderRegistry};
use crate::db::history_repo::{self, RunResult};
use crate::db::records::{AttachmentKind, NewAttachment};
use crate::db::{attachment_repo, email_repo, Database};
use crate::email::parser::sanitize_filename;
use crate::fulltext::{extracted_content, FullTextEntry, FullTextIndex};
use crate::storage::paths::{
    ensure_store_layout, StoreLayout, ATTACHMENTS_DIR, CLOUD_ATTACH_DIR, RFC2822_DIR,
};
use crate::storage::{ContentWriter, RawMessageStore, Volume, VolumeProvider};
use crate::task::BackupTask;

pub struct Pipeline<'a> {
    staging: RawMessageStore,
    volumes: &'a dyn VolumeProvider,
    registry: ProviderRegistry,
    resolver: CloudResolver,
    source: Option<Box<dyn MessageSource>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        staging_root: impl AsRef<Path>,
        volumes: &'a dyn VolumeProvider,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            staging: RawMessageStore::new(staging_root),
            volumes,
            registry: ProviderRegistry::new(),
            resolver: CloudResolver::new()?,
            source: None,
        })
    }

    /// Attaches a mail source. Each task then fetches its messages into
    /// staging before classification; without a source, runs work from
    /// whatever is already staged.
    pub fn with_source(mut self, source: Box<dyn MessageSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn staging(&self) -> &RawMessageStore {
        &self.staging
    }

    /// Runs a batch of tasks sequentially, one result per task in input
    /// order. Each task completes (success or failure) before the next
    /// starts; a failed task never aborts the batch.
    pub async fn run_batch(
        &self,
        tasks: &[BackupTask],
        preferred_volume: &str,
        allow_failover: bool,
        progress: &dyn ProgressReporter,
    ) -> Vec<RunResult> {
        let mut results = Vec::with_capacity(tasks.len());

        for task in tasks {
            let run_id = Uuid::new_v4().to_string();
            let (result, target) = self
                .run_task(task, preferred_volume, allow_failover, progress)
                .instrument(info_span!("task_run", task = %task.name, run_id = %run_id))
                .await;

            let target_letter = target.as_ref().map(|(_, letter)| letter.clone());
            self.record_history(&run_id, task, &result, target, preferred_volume);

            match &result {
                RunResult::Success => progress.report(ProgressEvent::Completed {
                    task_name: task.name.clone(),
                    volume: target_letter.unwrap_or_else(|| preferred_volume.to_string()),
                }),
                RunResult::Failed(reason) => progress.report(ProgressEvent::Failed {
                    task_name: task.name.clone(),
                    error: reason.clone(),
                }),
            }
            results.push(result);
        }

        results
    }

    /// Runs one task end to end. Returns the outcome plus the target
    /// database when one was opened (for history recording).
    async fn run_task(
        &self,
        task: &BackupTask,
        preferred_volume: &str,
        allow_failover: bool,
        progress: &dyn ProgressReporter,
    ) -> (RunResult, Option<(Database, String)>) {
        if let Some(source) = &self.source {
            progress.report(ProgressEvent::Phase("Fetching messages".to_string()));
            let fetched = source
                .fetch_into(task, &self.staging)
                .instrument(info_span!("fetch_phase"))
                .await;
            match fetched {
                Ok(count) => info!("Task '{}': {} messages fetched", task.name, count),
                Err(e) => {
                    let e = PipelineError::from(e);
                    warn!("Task '{}' fetch failed: {}", task.name, e);
                    return (RunResult::Failed(e.to_string()), None);
                }
            }
        }

        progress.report(ProgressEvent::Phase("Classifying staged messages".to_string()));
        let batches = {
            let _span = info_span!("classify").entered();
            match classify(&self.staging, task, &self.registry) {
                Ok(batches) => batches,
                Err(e) => return (RunResult::Failed(e.to_string()), None),
            }
        };

        let required = crate::storage::capacity::estimate_required_bytes(
            batches.payload_bytes(),
            batches.attachment_count(),
        );
        let planner = crate::storage::CapacityPlanner::new(self.volumes);
        let Some(volume) = planner.plan(preferred_volume, required, allow_failover) else {
            let e = PipelineError::NoVolume {
                required_bytes: required,
            };
            warn!("Task '{}': {}", task.name, e);
            return (RunResult::Failed(e.to_string()), None);
        };
        info!(
            "Task '{}' targets volume '{}' ({} bytes required)",
            task.name, volume.letter, required
        );

        let opened = ensure_store_layout(&volume.root)
            .map_err(PipelineError::from)
            .and_then(|layout| {
                let db = Database::open_in_index_dir(&layout.index_dir)?;
                let index = FullTextIndex::open_in_index_dir(&layout.index_dir)?;
                Ok((db, index))
            });
        let (db, index) = match opened {
            Ok(opened) => opened,
            Err(e) => return (RunResult::Failed(e.to_string()), None),
        };

        let outcome = self
            .migrate(task, &batches, &volume, &db, &index, allow_failover, progress)
            .await;
        let target = Some((db, volume.letter.clone()));
        match outcome {
            Ok(()) => (RunResult::Success, target),
            Err(e) => (RunResult::Failed(e.to_string()), target),
        }
    }

    /// The three migration phases, then staging reclamation.
    #[allow(clippy::too_many_arguments)]
    async fn migrate(
        &self,
        task: &BackupTask,
        batches: &ClassifiedBatches,
        volume: &Volume,
        db: &Database,
        index: &FullTextIndex,
        allow_failover: bool,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let writer = ContentWriter::new(self.volumes);

        {
            let _span = info_span!("raw_phase").entered();
            self.migrate_raw(task, batches, volume, db, index, &writer, allow_failover, progress)?;
        }
        {
            let _span = info_span!("attachment_phase").entered();
            self.migrate_attachments(
                task,
                batches,
                volume,
                db,
                index,
                &writer,
                allow_failover,
                progress,
            )?;
        }
        self.migrate_cloud(task, batches, volume, db, index, progress)
            .instrument(info_span!("cloud_phase"))
            .await?;

        // Reclaim staging only now: indexing is complete, the staged
        // blobs are no longer the sole copy.
        self.staging.remove_account(&task.account)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn migrate_raw(
        &self,
        task: &BackupTask,
        batches: &ClassifiedBatches,
        volume: &Volume,
        db: &Database,
        index: &FullTextIndex,
        writer: &ContentWriter<'_>,
        allow_failover: bool,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        progress.report(ProgressEvent::Phase("Migrating raw messages".to_string()));
        let total = batches.raw.len();

        for (done, item) in batches.raw.iter().enumerate() {
            let folder = category_folder(task, RFC2822_DIR, &item.meta.mailbox);
            let stored = writer
                .copy(&item.source, &item.eml_filename, volume, &folder, allow_failover)?
                .ok_or_else(|| PipelineError::OutOfSpace {
                    volume: volume.letter.clone(),
                    filename: item.eml_filename.clone(),
                })?;
            let relative = store_relative(volume, &stored);

            let email = email_repo::upsert(db, &item.meta.to_new_email(task, Some(relative)))?;

            // Inline attachments get metadata rows and content terms now;
            // their bytes live inside the stored .eml, so the row keeps
            // the unset path until the attachment phase materializes one.
            for attachment in &item.inline {
                let record = attachment_repo::upsert(
                    db,
                    &NewAttachment {
                        email_id: email.id,
                        filename: attachment.filename.clone(),
                        kind: AttachmentKind::Attach,
                        storage_path: None,
                    },
                )?;
                index_transient(index, record.id, email.id, &attachment.filename, &attachment.data);
            }

            progress.report(ProgressEvent::Info(item.eml_filename.clone()));
            progress.report(ProgressEvent::Percent(percent(done + 1, total)));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn migrate_attachments(
        &self,
        task: &BackupTask,
        batches: &ClassifiedBatches,
        volume: &Volume,
        db: &Database,
        index: &FullTextIndex,
        writer: &ContentWriter<'_>,
        allow_failover: bool,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        progress.report(ProgressEvent::Phase("Migrating attachments".to_string()));
        let total = batches.attachments.len();

        for (done, item) in batches.attachments.iter().enumerate() {
            let folder = category_folder(task, ATTACHMENTS_DIR, "");
            let stored = writer
                .write(&item.data, &item.filename, volume, &folder, allow_failover)?
                .ok_or_else(|| PipelineError::OutOfSpace {
                    volume: volume.letter.clone(),
                    filename: item.filename.clone(),
                })?;
            let relative = store_relative(volume, &stored);

            let email = email_repo::upsert(db, &item.meta.to_new_email(task, None))?;
            let record = attachment_repo::upsert(
                db,
                &NewAttachment {
                    email_id: email.id,
                    filename: item.filename.clone(),
                    kind: AttachmentKind::Attach,
                    storage_path: Some(relative.clone()),
                },
            )?;

            let content = extracted_content(&stored);
            upsert_entry(index, record.id, email.id, &item.filename, "Attach", &relative, &content);

            progress.report(ProgressEvent::Info(item.filename.clone()));
            progress.report(ProgressEvent::Percent(percent(done + 1, total)));
        }
        Ok(())
    }

    async fn migrate_cloud(
        &self,
        task: &BackupTask,
        batches: &ClassifiedBatches,
        volume: &Volume,
        db: &Database,
        index: &FullTextIndex,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        progress.report(ProgressEvent::Phase("Resolving cloud attachments".to_string()));
        let total = batches.cloud.len();

        for (done, item) in batches.cloud.iter().enumerate() {
            let email = email_repo::upsert(db, &item.meta.to_new_email(task, None))?;

            // Inverted by convention: expired == true means fetchable.
            let stored = if item.file.expired {
                match self.fetch_cloud_file(task, item, volume).await {
                    Ok(path) => Some(path),
                    Err(e) => {
                        warn!(
                            "Cloud attachment '{}' left unmaterialized: {}",
                            item.file.filename, e
                        );
                        None
                    }
                }
            } else {
                info!(
                    "Cloud attachment '{}' expired ({}); skipping download",
                    item.file.filename, item.file.expire_time
                );
                None
            };

            let relative = stored.as_deref().map(|p| store_relative(volume, p));
            let record = attachment_repo::upsert(
                db,
                &NewAttachment {
                    email_id: email.id,
                    filename: item.file.filename.clone(),
                    kind: AttachmentKind::CloudAttach,
                    storage_path: relative.clone(),
                },
            )?;

            if let (Some(path), Some(relative)) = (&stored, &relative) {
                let content = extracted_content(path);
                upsert_entry(
                    index,
                    record.id,
                    email.id,
                    &item.file.filename,
                    "CloudAttach",
                    relative,
                    &content,
                );
            }

            progress.report(ProgressEvent::Info(item.file.filename.clone()));
            progress.report(ProgressEvent::Percent(percent(done + 1, total)));
        }
        Ok(())
    }

    async fn fetch_cloud_file(
        &self,
        task: &BackupTask,
        item: &super::classify::CloudItem,
        volume: &Volume,
    ) -> Result<std::path::PathBuf, PipelineError> {
        let resolved = self
            .resolver
            .resolve(item.file.provider, &item.file.outside_link)
            .await?;

        let folder = category_folder(task, CLOUD_ATTACH_DIR, "");
        let dir = volume.root.join(&folder);
        std::fs::create_dir_all(&dir).map_err(|e| {
            PipelineError::Storage(crate::error::StorageError::CreateDirectory {
                path: dir.clone(),
                source: e,
            })
        })?;

        let target = dir.join(sanitize_filename(&item.file.filename));
        Ok(download_large_file(self.resolver.http(), &resolved, &target).await?)
    }

    /// History lands on the target volume's database. A run that never
    /// reached a volume (capacity failure) is still recorded, on the
    /// preferred volume where mounted, else the first mounted one, so
    /// audit views see the failure.
    fn record_history(
        &self,
        run_id: &str,
        task: &BackupTask,
        result: &RunResult,
        target: Option<(Database, String)>,
        preferred_volume: &str,
    ) {
        let (db, letter) = match target {
            Some(target) => target,
            None => match self.fallback_history_db(preferred_volume) {
                Some(fallback) => fallback,
                None => {
                    warn!("No volume available to record run history for '{}'", task.name);
                    return;
                }
            },
        };
        if let Err(e) = history_repo::append(&db, run_id, task, result, &letter) {
            warn!("Failed to record run history for '{}': {}", task.name, e);
        }
    }

    fn fallback_history_db(&self, preferred_volume: &str) -> Option<(Database, String)> {
        let volumes = self.volumes.volumes();
        let volume = volumes
            .iter()
            .find(|v| v.letter.starts_with(preferred_volume))
            .or_else(|| volumes.first())?;
        let layout = ensure_store_layout(&volume.root).ok()?;
        let db = Database::open_in_index_dir(&layout.index_dir).ok()?;
        Some((db, volume.letter.clone()))
    }
}

/// Store-relative folder for one category, with the mailbox nesting
/// appended for the raw category.
fn category_folder(task: &BackupTask, category: &str, mailbox: &str) -> String {
    let base = StoreLayout::category_relative(&task.name, &task.account, category);
    if mailbox.is_empty() {
        base
    } else {
        format!("{base}/{mailbox}")
    }
}

fn store_relative(volume: &Volume, absolute: &Path) -> String {
    absolute
        .strip_prefix(&volume.root)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|_| absolute.to_string_lossy().replace('\\', "/"))
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        100
    } else {
        (done * 100 / total) as u8
    }
}

/// Indexes content that has no stored file of its own (inline
/// attachments of a raw-migrated message): the bytes visit a temp file
/// just long enough for extraction, and the document keeps the unset
/// path sentinel.
fn index_transient(index: &FullTextIndex, attachment_id: i64, email_id: i64, filename: &str, data: &[u8]) {
    let tmp = std::env::temp_dir().join(format!("{}-{}", Uuid::new_v4(), sanitize_filename(filename)));
    if let Err(e) = std::fs::write(&tmp, data) {
        warn!("Skipping content indexing of '{}': {}", filename, e);
        return;
    }
    let content = extracted_content(&tmp);
    upsert_entry(
        index,
        attachment_id,
        email_id,
        filename,
        "Attach",
        crate::db::records::PATH_UNSET,
        &content,
    );
    let _ = std::fs::remove_file(&tmp);
}

fn upsert_entry(
    index: &FullTextIndex,
    attachment_id: i64,
    email_id: i64,
    filename: &str,
    kind: &str,
    storage_path: &str,
    content: &str,
) {
    let entry = FullTextEntry {
        attachment_id: attachment_id.to_string(),
        email_id: email_id.to_string(),
        filename,
        kind,
        storage_path,
        content,
    };
    // Extraction and indexing failures are per-file; metadata rows stay.
    if let Err(e) = index.upsert(&entry) {
        warn!("Failed to index attachment {}: {}", attachment_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::EmailError;
    use crate::pipeline::progress::{CollectingProgress, NoopProgress};
    use crate::storage::volumes::FixedVolumes;
    use crate::task::ContentKind;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    /// Source that stages one fixed message per fetch.
    struct CannedSource(Vec<u8>);

    #[async_trait]
    impl MessageSource for CannedSource {
        async fn fetch_into(
            &self,
            task: &BackupTask,
            staging: &RawMessageStore,
        ) -> Result<u32, EmailError> {
            staging.store_raw(&task.account, "INBOX", "42.eml", &self.0)?;
            Ok(1)
        }
    }

    struct UnreachableServer;

    #[async_trait]
    impl MessageSource for UnreachableServer {
        async fn fetch_into(
            &self,
            _task: &BackupTask,
            _staging: &RawMessageStore,
        ) -> Result<u32, EmailError> {
            Err(EmailError::ConnectionFailed("server unreachable".to_string()))
        }
    }

    fn task(kinds: Vec<ContentKind>) -> BackupTask {
        BackupTask {
            id: 1,
            name: "T1".to_string(),
            account: "u@example.com".to_string(),
            folders: vec!["INBOX".to_string()],
            date_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            date_end: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            content_kinds: kinds,
            sender_filter: None,
            subject_filter: None,
            filename_filter: None,
        }
    }

    fn volume_on(tmp: &TempDir, letter: &str, free: u64) -> Volume {
        Volume {
            letter: letter.to_string(),
            root: tmp.path().to_path_buf(),
            free_bytes: free,
        }
    }

    fn multipart_with_attachment() -> Vec<u8> {
        b"From: alice@example.com\r\n\
To: u@example.com\r\n\
Subject: docs\r\n\
Date: Wed, 10 Jan 2024 08:30:00 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XX\"\r\n\
\r\n\
--XX\r\n\
Content-Type: text/plain\r\n\
\r\n\
see attachment\r\n\
--XX\r\n\
Content-Type: text/plain; name=\"notes.txt\"\r\n\
Content-Disposition: attachment; filename=\"notes.txt\"\r\n\
\r\n\
quarterly sales figures\r\n\
--XX--\r\n"
            .to_vec()
    }

    #[tokio::test]
    async fn test_end_to_end_raw_and_attachment() {
        let staging_tmp = TempDir::new().unwrap();
        let volume_tmp = TempDir::new().unwrap();
        let provider = FixedVolumes::new(vec![volume_on(&volume_tmp, "E", u64::MAX)]);

        let pipeline = Pipeline::new(staging_tmp.path(), &provider).unwrap();
        pipeline
            .staging()
            .store_raw("u@example.com", "INBOX", "42.eml", &multipart_with_attachment())
            .unwrap();

        let progress = CollectingProgress::new();
        let results = pipeline
            .run_batch(
                &[task(vec![ContentKind::RawMessage, ContentKind::Attachment])],
                "E",
                false,
                &progress,
            )
            .await;
        assert_eq!(results, vec![RunResult::Success]);

        let index_dir = volume_tmp.path().join("MailStash/index");
        let db = Database::open_in_index_dir(&index_dir).unwrap();

        let emails = email_repo::search(&db, &email_repo::SearchCriteria::default()).unwrap();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].task_name, "T1");
        assert_eq!(emails[0].mailbox, "INBOX");
        assert_eq!(emails[0].uid, "42");
        let raw_rel = emails[0].raw_path.as_deref().unwrap();
        assert!(raw_rel.starts_with("MailStash/T1/u@example.com/RFC2822/INBOX/"));
        assert!(volume_tmp.path().join(raw_rel).exists());

        let attachments = attachment_repo::for_email(&db, emails[0].id).unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename, "notes.txt");
        assert_eq!(attachments[0].kind, AttachmentKind::Attach);
        let attach_rel = attachments[0].storage_path.as_deref().unwrap();
        assert!(attach_rel.starts_with("MailStash/T1/u@example.com/Attachments/"));
        assert!(volume_tmp.path().join(attach_rel).exists());

        let fulltext = FullTextIndex::open_in_index_dir(&index_dir).unwrap();
        let hits = fulltext.search("quarterly", None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filename, "notes.txt");
        assert_eq!(hits[0].storage_path, attach_rel);

        let history = history_repo::list(&db).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].result, "Success");
        assert_eq!(history[0].volume, "E");

        // Staging reclaimed only after everything above existed.
        assert!(!pipeline.staging().account_dir("u@example.com").exists());

        let events = progress.events();
        assert!(events.contains(&ProgressEvent::Phase("Migrating raw messages".to_string())));
        assert!(matches!(events.last(), Some(ProgressEvent::Completed { .. })));
    }

    #[tokio::test]
    async fn test_source_is_fetched_before_classification() {
        let staging_tmp = TempDir::new().unwrap();
        let volume_tmp = TempDir::new().unwrap();
        let provider = FixedVolumes::new(vec![volume_on(&volume_tmp, "E", u64::MAX)]);

        // Staging starts empty; everything must come through the source.
        let pipeline = Pipeline::new(staging_tmp.path(), &provider)
            .unwrap()
            .with_source(Box::new(CannedSource(multipart_with_attachment())));

        let progress = CollectingProgress::new();
        let results = pipeline
            .run_batch(&[task(vec![ContentKind::RawMessage])], "E", false, &progress)
            .await;
        assert_eq!(results, vec![RunResult::Success]);

        let db = Database::open_in_index_dir(&volume_tmp.path().join("MailStash/index")).unwrap();
        let emails = email_repo::search(&db, &email_repo::SearchCriteria::default()).unwrap();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].uid, "42");

        let events = progress.events();
        let fetch_at = events
            .iter()
            .position(|e| *e == ProgressEvent::Phase("Fetching messages".to_string()))
            .unwrap();
        let classify_at = events
            .iter()
            .position(|e| *e == ProgressEvent::Phase("Classifying staged messages".to_string()))
            .unwrap();
        assert!(fetch_at < classify_at);
    }

    #[tokio::test]
    async fn test_fetch_failure_fails_task_and_lands_in_history() {
        let staging_tmp = TempDir::new().unwrap();
        let volume_tmp = TempDir::new().unwrap();
        let provider = FixedVolumes::new(vec![volume_on(&volume_tmp, "E", u64::MAX)]);

        let pipeline = Pipeline::new(staging_tmp.path(), &provider)
            .unwrap()
            .with_source(Box::new(UnreachableServer));

        let results = pipeline
            .run_batch(&[task(vec![ContentKind::RawMessage])], "E", false, &NoopProgress)
            .await;
        let RunResult::Failed(reason) = &results[0] else {
            panic!("expected transport failure");
        };
        assert!(reason.contains("server unreachable"));

        // Nothing migrated, but the failed run is still auditable.
        assert!(!volume_tmp.path().join("MailStash/T1").exists());
        let db = Database::open_in_index_dir(&volume_tmp.path().join("MailStash/index")).unwrap();
        let history = history_repo::list(&db).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].result.contains("server unreachable"));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let staging_tmp = TempDir::new().unwrap();
        let volume_tmp = TempDir::new().unwrap();
        let provider = FixedVolumes::new(vec![volume_on(&volume_tmp, "E", u64::MAX)]);

        let pipeline = Pipeline::new(staging_tmp.path(), &provider).unwrap();
        pipeline
            .staging()
            .store_raw("u@example.com", "INBOX", "42.eml", &multipart_with_attachment())
            .unwrap();

        let tasks = [task(vec![ContentKind::RawMessage, ContentKind::Attachment])];
        pipeline.run_batch(&tasks, "E", false, &NoopProgress).await;

        // Re-stage the identical message: the second run must dedup
        // through the whole write/upsert path, not just skip an empty
        // staging area.
        pipeline
            .staging()
            .store_raw("u@example.com", "INBOX", "42.eml", &multipart_with_attachment())
            .unwrap();
        let results = pipeline.run_batch(&tasks, "E", false, &NoopProgress).await;
        assert_eq!(results, vec![RunResult::Success]);

        let db = Database::open_in_index_dir(&volume_tmp.path().join("MailStash/index")).unwrap();
        let emails = email_repo::search(&db, &email_repo::SearchCriteria::default()).unwrap();
        assert_eq!(emails.len(), 1);
        assert_eq!(attachment_repo::for_email(&db, emails[0].id).unwrap().len(), 1);
        assert_eq!(history_repo::list(&db).unwrap().len(), 2);

        // Identical content landed on the same stored file, no `_N` twin.
        let raw_rel = emails[0].raw_path.as_deref().unwrap();
        let raw_dir = volume_tmp.path().join(raw_rel).parent().unwrap().to_path_buf();
        assert_eq!(std::fs::read_dir(&raw_dir).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_capacity_failure_is_hard_stop() {
        let staging_tmp = TempDir::new().unwrap();
        let volume_tmp = TempDir::new().unwrap();
        let provider = FixedVolumes::new(vec![volume_on(&volume_tmp, "E", 8)]);

        let pipeline = Pipeline::new(staging_tmp.path(), &provider).unwrap();
        pipeline
            .staging()
            .store_raw("u@example.com", "INBOX", "42.eml", &multipart_with_attachment())
            .unwrap();

        let results = pipeline
            .run_batch(&[task(vec![ContentKind::RawMessage])], "E", true, &NoopProgress)
            .await;
        let RunResult::Failed(reason) = &results[0] else {
            panic!("expected capacity failure");
        };
        assert!(reason.contains("bytes free"));

        // No content written, staging untouched.
        assert!(!volume_tmp.path().join("MailStash/T1").exists());
        assert!(pipeline.staging().account_dir("u@example.com").exists());

        // The failure is still auditable.
        let db = Database::open_in_index_dir(&volume_tmp.path().join("MailStash/index")).unwrap();
        let history = history_repo::list(&db).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].result.starts_with("Failed: "));
    }

    #[tokio::test]
    async fn test_expired_cloud_link_is_not_downloaded() {
        let staging_tmp = TempDir::new().unwrap();
        let volume_tmp = TempDir::new().unwrap();
        let provider = FixedVolumes::new(vec![volume_on(&volume_tmp, "E", u64::MAX)]);

        let body = concat!(
            r#"<div class="bigatt_bt" title="big.zip"#,
            "\n",
            r#"文件大小：10.0K"#,
            "\n",
            r#"到期时间：2024年01月10日 23:59"><a href="https://mail.qq.com/cgi-bin/ftnExs_download?k=abc&amp;t=1">big.zip</a></div>"#
        );
        let raw = format!(
            "From: alice@example.com\r\n\
             To: u@example.com\r\n\
             Subject: shared file\r\n\
             Date: Wed, 10 Jan 2024 08:30:00 +0000\r\n\
             Content-Type: text/html\r\n\
             \r\n\
             {body}\r\n"
        );

        let pipeline = Pipeline::new(staging_tmp.path(), &provider).unwrap();
        pipeline
            .staging()
            .store_raw("u@example.com", "INBOX", "7.eml", raw.as_bytes())
            .unwrap();

        let results = pipeline
            .run_batch(
                &[task(vec![ContentKind::CloudAttachment])],
                "E",
                false,
                &NoopProgress,
            )
            .await;
        assert_eq!(results, vec![RunResult::Success]);

        let db = Database::open_in_index_dir(&volume_tmp.path().join("MailStash/index")).unwrap();
        let emails = email_repo::search(&db, &email_repo::SearchCriteria::default()).unwrap();
        assert_eq!(emails.len(), 1);

        let attachments = attachment_repo::for_email(&db, emails[0].id).unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename, "big.zip");
        assert_eq!(attachments[0].kind, AttachmentKind::CloudAttach);
        assert!(attachments[0].storage_path.is_none());

        // No download attempted: the cloud category dir was never created.
        assert!(!volume_tmp
            .path()
            .join("MailStash/T1/u@example.com/CloudAttach")
            .exists());
    }

    #[test]
    fn test_percent_is_total_safe() {
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(3, 3), 100);
    }

    #[test]
    fn test_category_folder_appends_mailbox() {
        let t = task(vec![ContentKind::RawMessage]);
        assert_eq!(
            category_folder(&t, RFC2822_DIR, "INBOX/sub"),
            "MailStash/T1/u@example.com/RFC2822/INBOX/sub"
        );
        assert_eq!(
            category_folder(&t, ATTACHMENTS_DIR, ""),
            "MailStash/T1/u@example.com/Attachments"
        );
    }

    #[test]
    fn test_store_relative_strips_volume_root() {
        let tmp = TempDir::new().unwrap();
        let volume = volume_on(&tmp, "E", 0);
        let absolute = tmp.path().join("MailStash/T1/a.eml");
        assert_eq!(store_relative(&volume, &absolute), "MailStash/T1/a.eml");
    }
}
