//! Durable queue stored as one JSON message per file.
//!
//! Messages are named `<seq:012>-<tar_id>.json` so a directory listing sorted
//! by name is the submission order. The next sequence number is resumed from
//! the highest one present when the queue is opened.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tapestore_error::{Result, TapeError};
use tapestore_types::WriteOrder;
use tracing::{debug, info, warn};

use crate::WriteOrderQueue;

const MESSAGE_EXTENSION: &str = ".json";
const SEQ_DIGITS: usize = 12;

/// A message waiting in a [`DirectoryWriteOrderQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedWriteOrder {
    pub seq: u64,
    pub order: WriteOrder,
}

#[derive(Debug)]
pub struct DirectoryWriteOrderQueue {
    dir: PathBuf,
    next_seq: Mutex<u64>,
}

impl DirectoryWriteOrderQueue {
    /// Open (and create if needed) a queue directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| TapeError::file_io("create_dir", &dir, err))?;
        let next_seq = message_files(&dir)?
            .last()
            .map_or(0, |(seq, _)| seq + 1);
        info!(dir = %dir.display(), next_seq, "write order queue opened");
        Ok(Self {
            dir,
            next_seq: Mutex::new(next_seq),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Messages not yet acknowledged, oldest first.
    pub fn pending(&self) -> Result<Vec<QueuedWriteOrder>> {
        message_files(&self.dir)?
            .into_iter()
            .map(|(seq, path)| -> Result<QueuedWriteOrder> {
                let bytes = fs::read(&path).map_err(|err| TapeError::file_io("read", &path, err))?;
                let order = serde_json::from_slice(&bytes).map_err(|err| {
                    TapeError::internal(format!(
                        "undecodable write order '{}': {err}",
                        path.display()
                    ))
                })?;
                Ok(QueuedWriteOrder { seq, order })
            })
            .collect()
    }

    /// Remove a consumed message. Returns whether it was present.
    pub fn acknowledge(&self, seq: u64) -> Result<bool> {
        let Some((_, path)) = message_files(&self.dir)?
            .into_iter()
            .find(|(candidate, _)| *candidate == seq)
        else {
            return Ok(false);
        };
        fs::remove_file(&path).map_err(|err| TapeError::file_io("remove", &path, err))?;
        debug!(seq, "write order acknowledged");
        Ok(true)
    }

    fn write_message(&self, seq: u64, order: &WriteOrder) -> io::Result<PathBuf> {
        let name = format!(
            "{seq:0width$}-{}{MESSAGE_EXTENSION}",
            order.tar_id.as_str(),
            width = SEQ_DIGITS
        );
        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!(".{name}.tmp"));
        let bytes = serde_json::to_vec_pretty(order).map_err(io::Error::other)?;

        if let Err(err) = publish(&self.dir, &tmp, &path, &bytes) {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!(path = %tmp.display(), error = %cleanup, "could not remove temp message");
                }
            }
            return Err(err);
        }
        Ok(path)
    }
}

fn publish(dir: &Path, tmp: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(tmp, path)?;
    File::open(dir)?.sync_all()
}

impl WriteOrderQueue for DirectoryWriteOrderQueue {
    fn submit(&self, order: &WriteOrder) -> Result<()> {
        let mut next_seq = self.next_seq.lock();
        let seq = *next_seq;
        let path = self
            .write_message(seq, order)
            .map_err(|err| TapeError::QueueSubmit {
                tar_id: order.tar_id.to_string(),
                detail: err.to_string(),
            })?;
        *next_seq = seq + 1;
        debug!(seq, tar_id = %order.tar_id, path = %path.display(), "write order persisted");
        Ok(())
    }
}

/// `(seq, path)` of every message file, sorted by sequence number.
fn message_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let read_dir = fs::read_dir(dir).map_err(|err| TapeError::file_io("read_dir", dir, err))?;
    let mut files = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|err| TapeError::file_io("read_dir", dir, err))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(seq) = parse_seq(name) {
            files.push((seq, entry.path()));
        }
    }
    files.sort_unstable_by_key(|(seq, _)| *seq);
    Ok(files)
}

fn parse_seq(name: &str) -> Option<u64> {
    if !name.ends_with(MESSAGE_EXTENSION) {
        return None;
    }
    let (seq, _) = name.split_once('-')?;
    if seq.len() != SEQ_DIGITS {
        return None;
    }
    seq.parse().ok()
}
