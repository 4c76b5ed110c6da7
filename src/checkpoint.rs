//! Checkpoint Persistence
//!
//! Binary snapshot of everything a run needs to resume: configuration,
//! vocabulary, generator and discriminator parameters, both optimizer
//! states, the rollout snapshot, the epoch counter, and the seed for the
//! resumed RNG stream.
//!
//! ## File layout
//!
//! ```text
//! "PUCK_CKPT"                 9-byte magic
//! version                     1 byte
//! config JSON                 u32 length + bytes
//! vocabulary JSON             u32 length + bytes
//! metadata JSON               u32 length + bytes (epoch, next_seed)
//! generator params            tensor section
//! generator optimizer         u64 step + tensor section
//! discriminator params        tensor section
//! discriminator optimizer     u64 step + tensor section
//! rollout snapshot            tensor section
//! ```
//!
//! A tensor section is a u32 count followed by tensors; each tensor is its
//! shape (u32 rank, u32 dims) and little-endian f32 data.
//!
//! ## Atomicity
//!
//! Saves write to `<path>.tmp` and rename over the target, so a failed
//! save leaves the previous checkpoint intact — all-or-nothing. Load
//! failures are fatal; save failures are retryable.

use crate::config::TrainConfig;
use crate::error::{PuckError, Result};
use crate::tensor::Tensor;
use crate::vocab::Vocabulary;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 9] = b"PUCK_CKPT";
const VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct Metadata {
    epoch: usize,
    next_seed: u64,
    baseline_ema: Option<f32>,
}

/// Borrowed view of everything to persist.
pub struct CheckpointView<'a> {
    pub config: &'a TrainConfig,
    pub vocab: &'a Vocabulary,
    pub epoch: usize,
    pub next_seed: u64,
    pub baseline_ema: Option<f32>,
    pub generator_params: Vec<&'a Tensor>,
    pub generator_opt_step: usize,
    pub generator_opt_state: Vec<&'a Tensor>,
    pub discriminator_params: Vec<&'a Tensor>,
    pub discriminator_opt_step: usize,
    pub discriminator_opt_state: Vec<&'a Tensor>,
    pub rollout_params: Vec<&'a Tensor>,
}

/// Owned checkpoint contents after a load.
#[derive(Debug)]
pub struct CheckpointData {
    pub config: TrainConfig,
    pub vocab: Vocabulary,
    pub epoch: usize,
    pub next_seed: u64,
    pub baseline_ema: Option<f32>,
    pub generator_params: Vec<Tensor>,
    pub generator_opt_step: usize,
    pub generator_opt_state: Vec<Tensor>,
    pub discriminator_params: Vec<Tensor>,
    pub discriminator_opt_step: usize,
    pub discriminator_opt_state: Vec<Tensor>,
    pub rollout_params: Vec<Tensor>,
}

/// Save a checkpoint atomically.
pub fn save(view: &CheckpointView, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let tmp = path.with_extension("tmp");
    save_inner(view, &tmp)
        .and_then(|_| fs::rename(&tmp, path))
        .map_err(|source| {
            // Best effort cleanup of the partial temp file.
            let _ = fs::remove_file(&tmp);
            PuckError::Checkpoint {
                op: "save",
                path: path.to_path_buf(),
                source,
            }
        })
}

fn save_inner(view: &CheckpointView, tmp: &Path) -> std::io::Result<()> {
    let file = File::create(tmp)?;
    let mut w = BufWriter::new(file);

    w.write_all(MAGIC)?;
    w.write_all(&[VERSION])?;

    write_json(&mut w, view.config)?;
    write_json(&mut w, view.vocab)?;
    write_json(
        &mut w,
        &Metadata {
            epoch: view.epoch,
            next_seed: view.next_seed,
            baseline_ema: view.baseline_ema,
        },
    )?;

    write_tensors(&mut w, &view.generator_params)?;
    w.write_all(&(view.generator_opt_step as u64).to_le_bytes())?;
    write_tensors(&mut w, &view.generator_opt_state)?;

    write_tensors(&mut w, &view.discriminator_params)?;
    w.write_all(&(view.discriminator_opt_step as u64).to_le_bytes())?;
    write_tensors(&mut w, &view.discriminator_opt_state)?;

    write_tensors(&mut w, &view.rollout_params)?;

    w.flush()
}

/// Load a checkpoint. Any structural problem is fatal.
pub fn load(path: impl AsRef<Path>) -> Result<CheckpointData> {
    let path = path.as_ref();
    load_inner(path).map_err(|source| PuckError::Checkpoint {
        op: "load",
        path: path.to_path_buf(),
        source,
    })
}

fn load_inner(path: &Path) -> std::io::Result<CheckpointData> {
    let file = File::open(path)?;
    let mut r = BufReader::new(file);

    let mut magic = [0u8; 9];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(invalid("bad checkpoint magic"));
    }
    let mut version = [0u8; 1];
    r.read_exact(&mut version)?;
    if version[0] != VERSION {
        return Err(invalid(format!(
            "unsupported checkpoint version {}",
            version[0]
        )));
    }

    let config: TrainConfig = read_json(&mut r)?;
    let mut vocab: Vocabulary = read_json(&mut r)?;
    vocab.rebuild_index();
    let metadata: Metadata = read_json(&mut r)?;

    let generator_params = read_tensors(&mut r)?;
    let generator_opt_step = read_u64(&mut r)? as usize;
    let generator_opt_state = read_tensors(&mut r)?;

    let discriminator_params = read_tensors(&mut r)?;
    let discriminator_opt_step = read_u64(&mut r)? as usize;
    let discriminator_opt_state = read_tensors(&mut r)?;

    let rollout_params = read_tensors(&mut r)?;

    Ok(CheckpointData {
        config,
        vocab,
        epoch: metadata.epoch,
        next_seed: metadata.next_seed,
        baseline_ema: metadata.baseline_ema,
        generator_params,
        generator_opt_step,
        generator_opt_state,
        discriminator_params,
        discriminator_opt_step,
        discriminator_opt_state,
        rollout_params,
    })
}

fn invalid(msg: impl ToString) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

fn write_json<W: Write, T: Serialize>(w: &mut W, value: &T) -> std::io::Result<()> {
    let json = serde_json::to_string(value).map_err(invalid)?;
    let bytes = json.as_bytes();
    w.write_all(&(bytes.len() as u32).to_le_bytes())?;
    w.write_all(bytes)
}

fn read_json<R: Read, T: for<'de> Deserialize<'de>>(r: &mut R) -> std::io::Result<T> {
    let len = read_u32(r)? as usize;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    serde_json::from_slice(&bytes).map_err(invalid)
}

fn write_tensors<W: Write>(w: &mut W, tensors: &[&Tensor]) -> std::io::Result<()> {
    w.write_all(&(tensors.len() as u32).to_le_bytes())?;
    for tensor in tensors {
        w.write_all(&(tensor.shape.len() as u32).to_le_bytes())?;
        for &dim in &tensor.shape {
            w.write_all(&(dim as u32).to_le_bytes())?;
        }
        for &val in &tensor.data {
            w.write_all(&val.to_le_bytes())?;
        }
    }
    Ok(())
}

fn read_tensors<R: Read>(r: &mut R) -> std::io::Result<Vec<Tensor>> {
    let count = read_u32(r)? as usize;
    let mut tensors = Vec::with_capacity(count);
    for _ in 0..count {
        let rank = read_u32(r)? as usize;
        let mut shape = Vec::with_capacity(rank);
        for _ in 0..rank {
            shape.push(read_u32(r)? as usize);
        }
        let len: usize = shape.iter().product();
        let mut data = Vec::with_capacity(len);
        let mut buf = [0u8; 4];
        for _ in 0..len {
            r.read_exact(&mut buf)?;
            data.push(f32::from_le_bytes(buf));
        }
        tensors.push(Tensor::new(data, shape));
    }
    Ok(tensors)
}

fn read_u32<R: Read>(r: &mut R) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
