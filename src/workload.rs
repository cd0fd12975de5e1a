// src/workload.rs
//! Randomized read/write/append/seek run against one file, checked
//! step by step against a local copy of what the file should hold.

use crate::error::HddError;
use crate::hdd_fs::HddFs;
use crate::transport::Connector;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Largest single write issued by the workload.
pub const MAX_WRITE_SIZE: usize = 1024;

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error(transparent)]
    Fs(#[from] HddError),
    #[error("Iteration {iteration}: read returned {got} bytes, expected {expected}")]
    ShortRead { iteration: usize, expected: usize, got: usize },
    #[error("Iteration {iteration}: wrote {got} of {expected} bytes")]
    ShortWrite { iteration: usize, expected: usize, got: usize },
    #[error("Iteration {iteration}: data mismatch in {len} bytes at offset {offset}")]
    Mismatch { iteration: usize, offset: usize, len: usize },
}

#[derive(Debug, Clone)]
pub struct Workload {
    pub iterations: usize,
    pub seed: u64,
    pub file_name: String,
    /// Upper bound on the file length.
    pub max_length: usize,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            iterations: 10240,
            seed: 0,
            file_name: "temp_file.txt".to_string(),
            max_length: 64 * 1024,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkloadReport {
    pub reads: usize,
    pub writes: usize,
    pub appends: usize,
    pub seeks: usize,
    pub bytes_read: usize,
    pub bytes_written: usize,
    pub final_length: usize,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Read,
    Write,
    Append,
    Seek,
}

/// Formats the device, runs the workload on a single file, then closes it
/// and unmounts.
pub fn run<C: Connector>(fs: &mut HddFs<C>, workload: &Workload) -> Result<WorkloadReport, WorkloadError> {
    assert!(
        workload.max_length >= MAX_WRITE_SIZE,
        "max_length must hold at least one full write"
    );

    let mut rng = StdRng::seed_from_u64(workload.seed);
    let mut report = WorkloadReport::default();
    let mut mirror: Vec<u8> = Vec::new();
    let mut position = 0usize;

    fs.format()?;
    fs.mount()?;
    let fh = fs.open(&workload.file_name)?;
    info!("Workload: {} iterations, seed {}", workload.iterations, workload.seed);

    for iteration in 0..workload.iterations {
        let step = if mirror.is_empty() {
            Step::Write
        } else {
            match rng.gen_range(0..4) {
                0 => Step::Read,
                1 => Step::Write,
                2 => Step::Append,
                _ => Step::Seek,
            }
        };

        match step {
            Step::Read => {
                let count = rng.gen_range(0..=mirror.len());
                debug!("Workload: read {} at {}", count, position);
                let got = fs.read(fh, count)?;

                let expected = count.min(mirror.len() - position);
                if got.len() != expected {
                    return Err(WorkloadError::ShortRead { iteration, expected, got: got.len() });
                }
                if got[..] != mirror[position..position + expected] {
                    return Err(WorkloadError::Mismatch { iteration, offset: position, len: expected });
                }
                position += expected;
                report.reads += 1;
                report.bytes_read += expected;
            }
            Step::Write | Step::Append => {
                let fill: u8 = rng.gen();
                let count = rng.gen_range(1..=MAX_WRITE_SIZE);
                let append = matches!(step, Step::Append);
                let start = if append { mirror.len() } else { position };
                if start + count > workload.max_length {
                    continue;
                }

                if append {
                    fs.seek(fh, start)?;
                }
                debug!("Workload: {} {} bytes [{:02x}] at {}", if append { "append" } else { "write" }, count, fill, start);

                let data = vec![fill; count];
                let written = fs.write(fh, &data)?;
                if written != count {
                    return Err(WorkloadError::ShortWrite { iteration, expected: count, got: written });
                }

                let end = start + count;
                if end > mirror.len() {
                    mirror.resize(end, 0);
                }
                mirror[start..end].copy_from_slice(&data);
                position = end;

                if append {
                    report.appends += 1;
                } else {
                    report.writes += 1;
                }
                report.bytes_written += count;
            }
            Step::Seek => {
                let offset = rng.gen_range(0..=mirror.len());
                debug!("Workload: seek to {}", offset);
                fs.seek(fh, offset)?;
                position = offset;
                report.seeks += 1;
            }
        }
    }

    fs.close(fh)?;
    fs.unmount()?;

    report.final_length = mirror.len();
    info!("Workload finished: {:?}", report);
    Ok(report)
}
