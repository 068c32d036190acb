//! Checkpoint files and symlink bookkeeping
//!
//! Every save event writes one JSON file per model under
//! `<save_dir>/<model_name>/checkpoint_epoch_<N>.json`, then swaps the
//! `latest`/`best` symlinks. Both the file write and the symlink swap go
//! through a temporary name plus rename so a crash never leaves a partial
//! checkpoint behind.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::StateDict;
use crate::{Error, Result};

/// Everything needed to resume or deploy a model from disk
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Epoch after which the snapshot was taken
    pub epoch: usize,
    /// Model parameters
    pub state_dict: StateDict,
    /// Opaque optimizer state
    pub optimizer: serde_json::Value,
    /// Opaque scheduler state
    pub scheduler: serde_json::Value,
    /// Class count of the train set the model was fitted on
    pub num_classes: usize,
    /// Class names in index order
    pub classes_map: Vec<String>,
    /// Learning rate the run was configured with
    pub initial_lr: f64,
    /// Compression controller state, when a controller is attached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_state: Option<serde_json::Value>,
}

/// File name for a given epoch's snapshot
pub fn checkpoint_file_name(epoch: usize) -> String {
    format!("checkpoint_epoch_{epoch}.json")
}

/// Write `ckpt` under `dir`, creating the directory as needed.
///
/// Returns the final path of the written file.
pub fn save_checkpoint(ckpt: &Checkpoint, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let final_path = dir.join(checkpoint_file_name(ckpt.epoch));
    let tmp_path = dir.join(format!(".{}.tmp", checkpoint_file_name(ckpt.epoch)));

    let payload = serde_json::to_vec(ckpt).map_err(|e| Error::Serialization(e.to_string()))?;
    fs::write(&tmp_path, payload)?;
    fs::rename(&tmp_path, &final_path)?;
    Ok(final_path)
}

/// Read a checkpoint back from disk
pub fn load_checkpoint(path: &Path) -> Result<Checkpoint> {
    let payload = fs::read(path)?;
    serde_json::from_slice(&payload).map_err(|e| Error::Serialization(e.to_string()))
}

/// Point `link` at `target`, replacing any previous link atomically.
///
/// The link is relative when both live in the same directory, so a moved
/// save directory stays internally consistent.
pub fn replace_symlink(target: &Path, link: &Path) -> Result<()> {
    let target_ref: PathBuf = match (target.parent(), link.parent()) {
        (Some(td), Some(ld)) if td == ld => match target.file_name() {
            Some(name) => PathBuf::from(name),
            None => target.to_path_buf(),
        },
        _ => target.to_path_buf(),
    };

    let tmp_link = link.with_extension("tmp-link");
    let _ = fs::remove_file(&tmp_link);

    #[cfg(unix)]
    std::os::unix::fs::symlink(&target_ref, &tmp_link)?;
    #[cfg(not(unix))]
    fs::copy(target, &tmp_link)?;

    fs::rename(&tmp_link, link)?;
    Ok(())
}
