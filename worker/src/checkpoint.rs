//! Durable, resumable adapter snapshots.
//!
//! Each checkpoint is a file named by its epoch holding a single JSON metadata line
//! followed by the raw little-endian `f32` payload, matrix A then matrix B. Files are
//! written under a hidden temporary name and renamed into place, so a reader never
//! observes a partially written checkpoint.

use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use comms::frame;
use log::{debug, info, warn};
use machine_learning::{Adapter, AdapterDims};
use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt};

use crate::{Result, WorkerErr};

const EPOCH_PREFIX: &str = "epoch-";
const EXTENSION: &str = ".ckpt";
const INITIAL_FILE: &str = "initial.ckpt";
const F32_SIZE: usize = size_of::<f32>();

/// The metadata line of a checkpoint file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// The last completed epoch, `None` for the initial snapshot.
    pub epoch: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub model_id: String,
    /// Length of the payload following the metadata line.
    pub byte_length: usize,
    pub a_length: usize,
    pub b_length: usize,
}

/// A checkpoint read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub meta: CheckpointMeta,
    pub a: Vec<f32>,
    pub b: Vec<f32>,
}

impl Checkpoint {
    pub fn epoch(&self) -> Option<usize> {
        self.meta.epoch
    }

    /// Converts the payload into an adapter of shape `dims`.
    pub fn into_adapter(self, dims: AdapterDims) -> Result<Adapter> {
        Ok(Adapter::new(dims, self.a, self.b)?)
    }
}

/// The checkpoints of one training session.
///
/// Assumes it is the single writer of its directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    model_id: String,
    keep: Option<NonZeroUsize>,
}

impl CheckpointStore {
    /// Opens the store at `dir`, creating the directory if needed.
    ///
    /// # Arguments
    /// * `dir` - The session's checkpoint directory.
    /// * `model_id` - The model every checkpoint must belong to.
    /// * `keep` - Keep at most this many epoch checkpoints, all of them when `None`.
    pub async fn open(
        dir: impl Into<PathBuf>,
        model_id: impl Into<String>,
        keep: Option<NonZeroUsize>,
    ) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        Ok(Self {
            dir,
            model_id: model_id.into(),
            keep,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The deterministic file name of an epoch's checkpoint.
    pub fn file_name(epoch: usize) -> String {
        format!("{EPOCH_PREFIX}{epoch:06}{EXTENSION}")
    }

    /// Persists `adapter` as the checkpoint of `epoch`.
    ///
    /// # Returns
    /// The path of the new checkpoint file.
    pub async fn save(&self, epoch: usize, adapter: &Adapter) -> Result<PathBuf> {
        let bytes = self.encode(Some(epoch), adapter)?;
        let path = self.write_atomic(&Self::file_name(epoch), &bytes).await?;
        info!(epoch = epoch, bytes = bytes.len(); "checkpoint saved");

        if let Err(e) = self.prune().await {
            warn!("failed to prune old checkpoints: {e}");
        }

        Ok(path)
    }

    /// Persists the adapter a session started from.
    pub async fn save_initial(&self, adapter: &Adapter) -> Result<()> {
        let bytes = self.encode(None, adapter)?;
        self.write_atomic(INITIAL_FILE, &bytes).await?;
        debug!(bytes = bytes.len(); "initial adapter saved");
        Ok(())
    }

    /// Loads the checkpoint with the highest epoch.
    ///
    /// # Returns
    /// `None` on a first run, or if the latest checkpoint is unreadable.
    pub async fn load_latest(&self) -> Option<Checkpoint> {
        let epochs = match self.epochs().await {
            Ok(epochs) => epochs,
            Err(e) => {
                warn!("failed to list checkpoints: {e}");
                return None;
            }
        };

        let epoch = *epochs.last()?;
        let path = self.dir.join(Self::file_name(epoch));

        match self.read(&path, Some(epoch)).await {
            Ok(checkpoint) => {
                info!(epoch = epoch; "found checkpoint to resume from");
                Some(checkpoint)
            }
            Err(e) => {
                warn!("ignoring unreadable checkpoint: {e}");
                None
            }
        }
    }

    /// Loads the adapter the checkpointed session started from.
    pub async fn load_initial(&self) -> Option<Checkpoint> {
        let path = self.dir.join(INITIAL_FILE);

        match self.read(&path, None).await {
            Ok(checkpoint) => Some(checkpoint),
            Err(WorkerErr::Storage(e)) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("ignoring unreadable initial adapter: {e}");
                None
            }
        }
    }

    /// The highest checkpointed epoch, judged by file names alone.
    pub async fn latest_epoch(&self) -> Option<usize> {
        self.epochs().await.ok()?.last().copied()
    }

    /// Every checkpointed epoch in ascending order.
    pub async fn epochs(&self) -> Result<Vec<usize>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut epochs = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(epoch) = name.to_str().and_then(parse_epoch) {
                epochs.push(epoch);
            }
        }

        epochs.sort_unstable();
        Ok(epochs)
    }

    /// Removes every epoch checkpoint and the initial snapshot.
    ///
    /// Called once a round's delta is out, so the next round starts fresh.
    pub async fn clear(&self) -> Result<()> {
        for epoch in self.epochs().await? {
            fs::remove_file(self.dir.join(Self::file_name(epoch))).await?;
        }

        match fs::remove_file(self.dir.join(INITIAL_FILE)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        info!("cleared checkpoints of the finished round");
        Ok(())
    }

    async fn prune(&self) -> Result<()> {
        let Some(keep) = self.keep else {
            return Ok(());
        };

        let epochs = self.epochs().await?;
        let excess = epochs.len().saturating_sub(keep.get());

        for epoch in &epochs[..excess] {
            fs::remove_file(self.dir.join(Self::file_name(*epoch))).await?;
            debug!(epoch = *epoch; "pruned checkpoint");
        }

        Ok(())
    }

    fn encode(&self, epoch: Option<usize>, adapter: &Adapter) -> Result<Vec<u8>> {
        let (a, b) = (adapter.a(), adapter.b());

        let meta = CheckpointMeta {
            epoch,
            created_at: Utc::now(),
            model_id: self.model_id.clone(),
            byte_length: (a.len() + b.len()) * F32_SIZE,
            a_length: a.len(),
            b_length: b.len(),
        };

        let mut bytes = serde_json::to_vec(&meta)
            .map_err(|e| WorkerErr::Internal(format!("checkpoint metadata: {e}")))?;
        bytes.reserve_exact(1 + meta.byte_length);
        bytes.push(b'\n');
        frame::extend_f32_le(&mut bytes, a);
        frame::extend_f32_le(&mut bytes, b);

        Ok(bytes)
    }

    async fn read(&self, path: &Path, epoch: Option<usize>) -> Result<Checkpoint> {
        let bytes = fs::read(path).await?;
        let corrupt = |reason: String| WorkerErr::CheckpointCorrupt {
            path: path.to_path_buf(),
            reason,
        };

        let Some(newline) = bytes.iter().position(|b| *b == b'\n') else {
            return Err(corrupt("missing metadata line".into()));
        };

        let (header, payload) = (&bytes[..newline], &bytes[newline + 1..]);
        let meta: CheckpointMeta =
            serde_json::from_slice(header).map_err(|e| corrupt(format!("bad metadata: {e}")))?;

        if meta.epoch != epoch {
            return Err(corrupt(format!(
                "declares epoch {:?}, expected {epoch:?}",
                meta.epoch
            )));
        }

        if meta.model_id != self.model_id {
            return Err(corrupt(format!("belongs to model '{}'", meta.model_id)));
        }

        let declared = meta
            .a_length
            .checked_add(meta.b_length)
            .and_then(|n| n.checked_mul(F32_SIZE));

        if declared != Some(meta.byte_length) || payload.len() != meta.byte_length {
            return Err(corrupt(format!(
                "declares {} payload bytes, found {}",
                meta.byte_length,
                payload.len()
            )));
        }

        let (a_bytes, b_bytes) = payload.split_at(meta.a_length * F32_SIZE);
        let a = frame::read_f32_le(a_bytes);
        let b = frame::read_f32_le(b_bytes);

        Ok(Checkpoint { meta, a, b })
    }

    async fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let tmp = self.dir.join(format!(".{name}.tmp"));
        let path = self.dir.join(name);

        let written = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        Ok(path)
    }
}

fn parse_epoch(name: &str) -> Option<usize> {
    name.strip_prefix(EPOCH_PREFIX)?
        .strip_suffix(EXTENSION)?
        .parse()
        .ok()
}
