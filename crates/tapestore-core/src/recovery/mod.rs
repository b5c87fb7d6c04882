//! Bootstrap recovery of the input tar storage folder.
//!
//! Runs once at process start, before any write is accepted. For every file
//! bucket whose directory exists, the on-disk tars are reconciled with the
//! tar referential and every tar that has not reached tape yet is handed to
//! the write order queue again:
//!
//! | on disk            | referential        | action                              |
//! |--------------------|--------------------|-------------------------------------|
//! | `X.tar`            | `OnTape`           | delete `X.tar`                      |
//! | `X.tar`            | `ReadyOnDisk`      | resubmit with recorded size/digest  |
//! | `X.tar`            | `BuildingOnDisk`   | verify, submit computed size/digest |
//! | `X.tar.tmp`        | (not consulted)    | repair into `X.tar`, submit         |
//! | `X.tar.tmp`+`X.tar`| (not consulted)    | delete `X.tar`, then as above       |
//!
//! Every consistency check of a bucket (unexpected files, missing or invalid
//! referential entries) runs before the first file of that bucket is touched.

mod plan;
mod report;

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tapestore_error::{Result, TapeError};
use tapestore_queue::WriteOrderQueue;
use tapestore_referential::TarReferential;
use tapestore_tar::{RepairOutcome, TarRepairer};
use tapestore_types::{DigestWithSize, TarFileKind, TarId, WriteOrder};
use tracing::{debug, error, info, warn};

pub use plan::{
    PlannedTarFile, Resolution, TarFileGroup, compare_by_creation_date, group_tar_files,
    reconcile_groups, resolve_finished,
};
pub use report::{BucketRecoveryReport, RecoveryReport};

use crate::telemetry::{
    NoOpRecoveryObserver, RecoveryCounters, RecoveryEvent, RecoveryObserver, WriteOrderSource,
    monotonic_ns,
};
use crate::topology::BucketTopology;

/// How file buckets are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMode {
    /// One bucket after the other; the first failure stops the pass.
    #[default]
    Sequential,
    /// One scoped thread per bucket; all failures are reported together. A
    /// failure that aborts the process stops the other buckets before they
    /// modify anything.
    Parallel,
}

/// One step of a bucket plan, in execution order.
#[derive(Debug)]
enum Step {
    Finished {
        tar_id: TarId,
        resolution: Resolution,
    },
    Repair {
        tar_id: TarId,
    },
}

/// Everything decided about a bucket before anything is modified.
#[derive(Debug)]
struct BucketPlan {
    bucket: String,
    stale_finished: Vec<TarId>,
    steps: Vec<Step>,
}

/// Shared by the bucket threads of a parallel pass. Every bucket finishes
/// planning before any bucket modifies a file, so a consistency failure in
/// one bucket stops all of them while the disk is still untouched.
struct PassGate {
    aborted: AtomicBool,
    planned: Barrier,
}

impl PassGate {
    fn new(file_buckets: usize) -> Self {
        Self {
            aborted: AtomicBool::new(false),
            planned: Barrier::new(file_buckets),
        }
    }

    /// Run `plan`, then wait until every bucket of the pass has planned.
    fn plan<T>(&self, plan: impl FnOnce() -> Result<T>) -> Result<T> {
        // Arrives on drop, also while unwinding.
        let _arrival = PlanArrival(self);
        let planned = plan();
        if planned.as_ref().is_err_and(TapeError::aborts_process) {
            self.abort();
        }
        planned
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn check(&self, file_bucket: &str) -> Result<()> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(TapeError::RecoveryAborted {
                file_bucket: file_bucket.to_owned(),
            });
        }
        Ok(())
    }
}

struct PlanArrival<'a>(&'a PassGate);

impl Drop for PlanArrival<'_> {
    fn drop(&mut self) {
        self.0.planned.wait();
    }
}

pub struct BootstrapRecovery {
    input_tar_storage_folder: PathBuf,
    referential: Arc<dyn TarReferential>,
    topology: BucketTopology,
    queue: Arc<dyn WriteOrderQueue>,
    repairer: TarRepairer,
    observer: Arc<dyn RecoveryObserver>,
    counters: RecoveryCounters,
    mode: RecoveryMode,
}

impl BootstrapRecovery {
    pub fn new(
        input_tar_storage_folder: impl Into<PathBuf>,
        referential: Arc<dyn TarReferential>,
        topology: BucketTopology,
        queue: Arc<dyn WriteOrderQueue>,
        repairer: TarRepairer,
    ) -> Self {
        Self {
            input_tar_storage_folder: input_tar_storage_folder.into(),
            referential,
            topology,
            queue,
            repairer,
            observer: Arc::new(NoOpRecoveryObserver),
            counters: RecoveryCounters::default(),
            mode: RecoveryMode::default(),
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RecoveryObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: RecoveryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn counters(&self) -> &RecoveryCounters {
        &self.counters
    }

    /// Reconcile every file bucket with the referential and reschedule the
    /// tars that still have to reach tape.
    pub fn initialize_on_bootstrap(&self) -> Result<RecoveryReport> {
        let started = Instant::now();
        let mut targets = Vec::new();
        let mut skipped = Vec::new();
        for file_bucket in self.topology.list_file_buckets() {
            let dir = self.input_tar_storage_folder.join(&file_bucket);
            match fs::metadata(&dir) {
                Ok(_) => targets.push((file_bucket, dir)),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    debug!(file_bucket = %file_bucket, "no tar storage directory, skipping");
                    skipped.push(file_bucket);
                }
                Err(err) => return Err(TapeError::file_io("stat", dir, err).in_bucket(file_bucket)),
            }
        }

        for bucket in self.topology.list_buckets() {
            debug!(bucket, file_buckets = ?self.topology.file_buckets_of(bucket), "tape bucket");
        }
        info!(
            folder = %self.input_tar_storage_folder.display(),
            file_buckets = targets.len(),
            mode = ?self.mode,
            "starting bootstrap recovery"
        );

        let buckets = match self.mode {
            RecoveryMode::Sequential => self.recover_sequentially(&targets)?,
            RecoveryMode::Parallel => self.recover_in_parallel(&targets)?,
        };

        let report = RecoveryReport {
            buckets,
            skipped_file_buckets: skipped,
            counters: self.counters.snapshot(),
        };
        info!(
            file_buckets = report.buckets.len(),
            write_orders = report.write_orders().count(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "bootstrap recovery completed"
        );
        Ok(report)
    }

    fn recover_sequentially(
        &self,
        targets: &[(String, PathBuf)],
    ) -> Result<Vec<BucketRecoveryReport>> {
        targets
            .iter()
            .map(|(file_bucket, dir)| self.recover_bucket_reporting(file_bucket, dir, None))
            .collect()
    }

    fn recover_in_parallel(
        &self,
        targets: &[(String, PathBuf)],
    ) -> Result<Vec<BucketRecoveryReport>> {
        let gate = PassGate::new(targets.len());
        let gate = &gate;
        let outcomes: Vec<(String, Result<BucketRecoveryReport>)> = thread::scope(|scope| {
            let handles: Vec<_> = targets
                .iter()
                .map(|(file_bucket, dir)| {
                    let handle = scope
                        .spawn(move || self.recover_bucket_reporting(file_bucket, dir, Some(gate)));
                    (file_bucket.clone(), handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(file_bucket, handle)| {
                    let outcome = handle.join().unwrap_or_else(|_| {
                        Err(TapeError::internal("bucket recovery thread panicked")
                            .in_bucket(file_bucket.clone()))
                    });
                    (file_bucket, outcome)
                })
                .collect()
        });

        let mut reports = Vec::with_capacity(outcomes.len());
        let mut failed_buckets = Vec::new();
        let mut aborted_buckets = Vec::new();
        let mut first = None;
        for (file_bucket, outcome) in outcomes {
            match outcome {
                Ok(report) => reports.push(report),
                Err(TapeError::RecoveryAborted { .. }) => aborted_buckets.push(file_bucket),
                Err(err) => {
                    failed_buckets.push(file_bucket);
                    first.get_or_insert(err);
                }
            }
        }
        match first {
            None if aborted_buckets.is_empty() => Ok(reports),
            None => Err(TapeError::internal(format!(
                "file buckets {} aborted without a failing bucket",
                aborted_buckets.join(", ")
            ))),
            Some(first) => Err(TapeError::RecoveryFailed {
                failed_buckets,
                aborted_buckets,
                first: Box::new(first),
            }),
        }
    }

    /// Recover one bucket, turning a failure into telemetry and a
    /// bucket-scoped error.
    fn recover_bucket_reporting(
        &self,
        file_bucket: &str,
        dir: &Path,
        gate: Option<&PassGate>,
    ) -> Result<BucketRecoveryReport> {
        self.recover_file_bucket(file_bucket, dir, gate).map_err(|err| {
            if matches!(err, TapeError::RecoveryAborted { .. }) {
                warn!(file_bucket = %file_bucket, "file bucket recovery aborted, nothing modified");
                return err;
            }
            if let Some(gate) = gate.filter(|_| err.aborts_process()) {
                gate.abort();
            }
            error!(
                file_bucket = %file_bucket,
                error = %err,
                kind = ?err.kind(),
                "file bucket recovery failed"
            );
            self.emit(RecoveryEvent::BucketFailed {
                file_bucket: file_bucket.to_owned(),
                error: err.to_string(),
                timestamp_ns: monotonic_ns(),
            });
            err.in_bucket(file_bucket)
        })
    }

    fn recover_file_bucket(
        &self,
        file_bucket: &str,
        dir: &Path,
        gate: Option<&PassGate>,
    ) -> Result<BucketRecoveryReport> {
        let started = Instant::now();
        let plan = match gate {
            Some(gate) => gate.plan(|| self.plan_file_bucket(file_bucket, dir))?,
            None => self.plan_file_bucket(file_bucket, dir)?,
        };
        let check = || gate.map_or(Ok(()), |gate| gate.check(file_bucket));
        check()?;

        let mut report = BucketRecoveryReport::new(file_bucket, &plan.bucket);
        for tar_id in &plan.stale_finished {
            let path = dir.join(tar_id.file_name());
            warn!(file_bucket = %file_bucket, path = %path.display(), "deleting incomplete file");
            remove_file(&path)?;
            report.stale_files_deleted.push(tar_id.to_string());
            self.emit(RecoveryEvent::StaleFileDeleted {
                file_bucket: file_bucket.to_owned(),
                tar_id: tar_id.to_string(),
                timestamp_ns: monotonic_ns(),
            });
        }

        for step in plan.steps {
            check()?;
            match step {
                Step::Finished { tar_id, resolution } => {
                    self.process_finished(file_bucket, dir, &tar_id, resolution, &mut report)?;
                }
                Step::Repair { tar_id } => {
                    self.repair_tar(file_bucket, dir, &tar_id, &mut report)?;
                }
            }
        }

        report.duration_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        info!(
            file_bucket = %file_bucket,
            write_orders = report.write_orders.len(),
            files_deleted = report.files_deleted(),
            repaired = report.repaired.len(),
            "file bucket recovered"
        );
        self.emit(RecoveryEvent::BucketCompleted {
            file_bucket: file_bucket.to_owned(),
            write_orders: report.write_orders.len(),
            files_deleted: report.files_deleted(),
            duration_us: report.duration_us,
            timestamp_ns: monotonic_ns(),
        });
        Ok(report)
    }

    /// Scan a bucket directory and decide what to do with every file in it.
    /// Nothing is modified.
    fn plan_file_bucket(&self, file_bucket: &str, dir: &Path) -> Result<BucketPlan> {
        let bucket = self.topology.bucket_for_file_bucket(file_bucket)?;

        let names = list_tar_storage_dir(dir)?;
        info!(file_bucket = %file_bucket, files = names.len(), "scanning tar storage directory");
        self.emit(RecoveryEvent::BucketScanStarted {
            file_bucket: file_bucket.to_owned(),
            files: names.len(),
            timestamp_ns: monotonic_ns(),
        });

        let groups = group_tar_files(dir, names.iter().map(String::as_str))?;
        let planned = reconcile_groups(groups);
        self.plan_bucket(bucket, dir, planned)
    }

    /// Look up every finished tar in the referential. Fails before any file
    /// is modified.
    fn plan_bucket(
        &self,
        bucket: &str,
        dir: &Path,
        planned: Vec<PlannedTarFile>,
    ) -> Result<BucketPlan> {
        let finished: Vec<TarId> = planned
            .iter()
            .filter(|file| file.kind == TarFileKind::Finished)
            .map(|file| file.tar_id.clone())
            .collect();
        let mut entries = self.referential.bulk_find(&finished)?;

        let mut plan = BucketPlan {
            bucket: bucket.to_owned(),
            stale_finished: Vec::new(),
            steps: Vec::with_capacity(planned.len()),
        };
        for file in planned {
            match file.kind {
                TarFileKind::Temporary => {
                    if file.stale_finished {
                        plan.stale_finished.push(file.tar_id.clone());
                    }
                    plan.steps.push(Step::Repair {
                        tar_id: file.tar_id,
                    });
                }
                TarFileKind::Finished => {
                    let entry = entries.remove(&file.tar_id).ok_or_else(|| {
                        TapeError::MissingReferentialEntry {
                            tar_id: file.tar_id.to_string(),
                            path: dir.join(file.tar_id.file_name()),
                        }
                    })?;
                    let resolution = resolve_finished(&entry)?;
                    debug!(tar_id = %file.tar_id, location = %entry.location, "planned finished tar");
                    plan.steps.push(Step::Finished {
                        tar_id: file.tar_id,
                        resolution,
                    });
                }
            }
        }
        Ok(plan)
    }

    fn process_finished(
        &self,
        file_bucket: &str,
        dir: &Path,
        tar_id: &TarId,
        resolution: Resolution,
        report: &mut BucketRecoveryReport,
    ) -> Result<()> {
        let path = dir.join(tar_id.file_name());
        match resolution {
            Resolution::DeleteOnTape { tape_code } => {
                warn!(path = %path.display(), tape_code = %tape_code, "tar file already written on tape, deleting it");
                remove_file(&path)?;
                report.on_tape_files_deleted.push(tar_id.to_string());
                self.emit(RecoveryEvent::OnTapeFileDeleted {
                    file_bucket: file_bucket.to_owned(),
                    tar_id: tar_id.to_string(),
                    tape_code,
                    timestamp_ns: monotonic_ns(),
                });
            }
            Resolution::Resubmit(digest) => {
                warn!(path = %path.display(), "rescheduling tar file for copy on tape");
                self.submit(file_bucket, tar_id, &digest, WriteOrderSource::ReadyOnDisk, report)?;
            }
            Resolution::Reverify(recorded) => {
                warn!(path = %path.display(), "verifying tar file and computing size and digest");
                let reader = BufReader::new(open_file(&path)?);
                let digest = match recorded {
                    Some(expected) => self.repairer.verify_against(reader, &expected, tar_id)?,
                    None => self.repairer.verify(reader)?,
                };
                report.reverified.push(tar_id.to_string());
                self.submit(file_bucket, tar_id, &digest, WriteOrderSource::BuildingOnDisk, report)?;
            }
        }
        Ok(())
    }

    fn repair_tar(
        &self,
        file_bucket: &str,
        dir: &Path,
        tar_id: &TarId,
        report: &mut BucketRecoveryReport,
    ) -> Result<()> {
        let tmp_path = dir.join(tar_id.tmp_file_name());
        info!(path = %tmp_path.display(), "repairing and verifying tar file");
        let reader = BufReader::new(open_file(&tmp_path)?);
        self.repair_from(reader, file_bucket, dir, tar_id, report)
    }

    /// Repair `reader`, the content of the temporary file of `tar_id`, into
    /// its finished file. The temporary file is removed only once the
    /// finished file is durable.
    fn repair_from<R: Read>(
        &self,
        reader: R,
        file_bucket: &str,
        dir: &Path,
        tar_id: &TarId,
        report: &mut BucketRecoveryReport,
    ) -> Result<()> {
        let tmp_path = dir.join(tar_id.tmp_file_name());
        let final_path = dir.join(tar_id.file_name());
        let outcome = match self.repair_into(reader, &final_path, dir, tar_id) {
            Ok(outcome) => outcome,
            Err(err) => {
                discard_partial_output(&final_path);
                return Err(err);
            }
        };

        remove_file(&tmp_path)?;
        sync_dir(dir)?;
        info!(
            from = %tmp_path.display(),
            to = %final_path.display(),
            size = outcome.digest.size,
            "repaired and verified tar file"
        );
        report.repaired.push(tar_id.to_string());
        self.emit(RecoveryEvent::TarRepaired {
            file_bucket: file_bucket.to_owned(),
            tar_id: tar_id.to_string(),
            entries_kept: outcome.entries_kept,
            entries_discarded: outcome.entries_discarded,
            size: outcome.digest.size,
            timestamp_ns: monotonic_ns(),
        });
        self.submit(file_bucket, tar_id, &outcome.digest, WriteOrderSource::Repaired, report)
    }

    /// Write the repaired archive and make it durable. Leaves partial output
    /// behind on error; the caller removes it.
    fn repair_into<R: Read>(
        &self,
        reader: R,
        final_path: &Path,
        dir: &Path,
        tar_id: &TarId,
    ) -> Result<RepairOutcome> {
        let output = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(final_path)
            .map_err(|err| TapeError::file_io("create", final_path, err))?;
        let mut writer = BufWriter::new(output);
        let outcome = self
            .repairer
            .repair_and_verify_detailed(reader, &mut writer, tar_id)?;
        let output = writer
            .into_inner()
            .map_err(|err| TapeError::file_io("flush", final_path, err.into_error()))?;
        output
            .sync_all()
            .map_err(|err| TapeError::file_io("fsync", final_path, err))?;
        sync_dir(dir)?;
        Ok(outcome)
    }

    fn submit(
        &self,
        file_bucket: &str,
        tar_id: &TarId,
        digest: &DigestWithSize,
        source: WriteOrderSource,
        report: &mut BucketRecoveryReport,
    ) -> Result<()> {
        let order = WriteOrder::for_tar(report.bucket.clone(), file_bucket, tar_id, digest);
        self.queue.submit(&order)?;
        debug!(
            tar_id = %tar_id,
            bucket = %order.bucket,
            size = order.size,
            source = source.as_str(),
            "write order submitted"
        );
        self.emit(RecoveryEvent::WriteOrderSubmitted {
            file_bucket: file_bucket.to_owned(),
            tar_id: tar_id.to_string(),
            source,
            size: order.size,
            timestamp_ns: monotonic_ns(),
        });
        report.write_orders.push(order);
        Ok(())
    }

    fn emit(&self, event: RecoveryEvent) {
        self.counters.record(&event);
        self.observer.on_event(&event);
    }
}

/// Names of the entries of a tar storage directory. Anything but a regular
/// file with a UTF-8 name is unexpected.
fn list_tar_storage_dir(dir: &Path) -> Result<Vec<String>> {
    let read_dir = fs::read_dir(dir).map_err(|err| TapeError::file_io("read_dir", dir, err))?;
    let mut names = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|err| TapeError::file_io("read_dir", dir, err))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|err| TapeError::file_io("stat", &path, err))?;
        if !file_type.is_file() {
            return Err(TapeError::UnexpectedTarFile { path });
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(_) => return Err(TapeError::UnexpectedTarFile { path }),
        }
    }
    Ok(names)
}

fn open_file(path: &Path) -> Result<File> {
    File::open(path).map_err(|err| TapeError::file_io("open", path, err))
}

fn remove_file(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|err| TapeError::file_io("remove", path, err))
}

fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|handle| handle.sync_all())
        .map_err(|err| TapeError::file_io("fsync", dir, err))
}

fn discard_partial_output(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => warn!(path = %path.display(), "removed partial repair output"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => error!(path = %path.display(), error = %err, "could not remove partial repair output"),
    }
}
