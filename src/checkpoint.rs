use burn::{
    module::Module,
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
};
use std::path::{Path, PathBuf};

use crate::error::{ProGanError, Result};

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// Records `module` at `path`; the recorder appends the `.mpk` extension.
pub fn save_checkpoint<B: Backend, M: Module<B>, P: AsRef<Path>>(module: M, path: P) -> Result<()> {
    let path = path.as_ref().to_path_buf();

    recorder()
        .record(module.into_record(), path.clone())
        .map_err(|err| ProGanError::Checkpoint {
            path,
            message: err.to_string(),
        })
}

/// Loads the record saved at `path` into `module`, which must have the same
/// architecture as the one that was saved.
pub fn load_checkpoint<B: Backend, M: Module<B>, P: AsRef<Path>>(
    module: M,
    path: P,
    device: &B::Device,
) -> Result<M> {
    let path = path.as_ref().to_path_buf();

    let record = recorder()
        .load::<M::Record>(path.clone(), device)
        .map_err(|err| ProGanError::Checkpoint {
            path,
            message: err.to_string(),
        })?;

    Ok(module.load_record(record))
}

/// Paths of the generator and discriminator checkpoints of one run.
pub fn checkpoint_paths<P: AsRef<Path>>(artifact_dir: P, tag: &str) -> (PathBuf, PathBuf) {
    let dir = artifact_dir.as_ref().join("checkpoints");

    (dir.join(format!("gen-{tag}")), dir.join(format!("disc-{tag}")))
}
