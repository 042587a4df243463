//! Batch conversion pipeline: validate, then per file persist → decode →
//! serialize → archive → cleanup, producing one archive per batch.

use std::fs::{self, File};
use std::io;

use serde::Serialize;
use tracing::{info, instrument, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::csv;
use crate::error::{ConvertError, Result};
use crate::storage::{JobDir, JobStore};
use crate::tdms;

pub const SOURCE_EXTENSION: &str = ".tdms";
pub const CSV_EXTENSION: &str = ".csv";
pub const ARCHIVE_NAME: &str = "converted_files.zip";

/// One uploaded file of a batch, as received from the client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub content: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content,
        }
    }
}

/// Success descriptor of one batch conversion.
#[derive(Debug, Serialize)]
pub struct ConvertedArchive {
    pub job_id: String,
    pub archive_name: String,
    pub entries: usize,
}

impl ConvertedArchive {
    pub fn download_url(&self) -> String {
        format!("/download/{}/{}", self.job_id, self.archive_name)
    }
}

/// Converts a whole batch, all-or-nothing. On success the archive lives
/// under a fresh job directory; on any failure the job directory is rolled
/// back and exactly one error describes the batch.
#[instrument(skip(store, batch), fields(files = batch.len()))]
pub fn convert_batch(store: &JobStore, batch: &[UploadedFile]) -> Result<ConvertedArchive> {
    let names = validate_batch(batch)?;
    let job = store.create_job()?;
    info!(job_id = %job.id, files = batch.len(), "starting batch conversion");

    match run_batch(&job, batch, &names) {
        Ok(()) => {
            info!(job_id = %job.id, files = batch.len(), "batch conversion finished");
            Ok(ConvertedArchive {
                job_id: job.id,
                archive_name: ARCHIVE_NAME.to_string(),
                entries: batch.len(),
            })
        }
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "batch conversion failed, rolling back job");
            store.remove_job(&job.id);
            Err(e)
        }
    }
}

/// Extension check runs before anything touches the disk: a single bad
/// filename rejects the whole batch with no scratch files written.
fn validate_batch(batch: &[UploadedFile]) -> Result<Vec<String>> {
    if batch.is_empty() {
        return Err(ConvertError::InvalidInput("no files submitted".to_string()));
    }
    let mut names = Vec::with_capacity(batch.len());
    for file in batch {
        let name = sanitized_name(&file.name)?;
        if !name.ends_with(SOURCE_EXTENSION) {
            return Err(ConvertError::InvalidInput(format!(
                "all files must be in .tdms format, got '{name}'"
            )));
        }
        names.push(name);
    }
    Ok(names)
}

/// Reduces a client-supplied filename to its final path component.
fn sanitized_name(raw: &str) -> Result<String> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(ConvertError::InvalidInput(format!(
            "invalid filename: '{raw}'"
        )));
    }
    Ok(name.to_string())
}

fn run_batch(job: &JobDir, batch: &[UploadedFile], names: &[String]) -> Result<()> {
    let archive_file = File::create(job.file_path(ARCHIVE_NAME))?;
    let mut archive = ZipWriter::new(archive_file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (file, name) in batch.iter().zip(names) {
        convert_one(job, file, name, &mut archive, options)?;
    }
    archive.finish()?;
    Ok(())
}

/// Runs steps 1-4 for one file; both scratch artifacts are deleted no
/// matter how the steps ended so repeated batches cannot grow the scratch
/// space.
fn convert_one(
    job: &JobDir,
    file: &UploadedFile,
    name: &str,
    archive: &mut ZipWriter<File>,
    options: SimpleFileOptions,
) -> Result<()> {
    let csv_name = csv_entry_name(name);
    let raw_path = job.scratch_path().join(name);
    let csv_path = job.scratch_path().join(&csv_name);

    let result = (|| -> Result<()> {
        fs::write(&raw_path, &file.content)?;
        let table = tdms::read_file(&raw_path)?;
        csv::write_csv(&table, &csv_path)?;
        archive.start_file(csv_name.as_str(), options)?;
        let mut reader = File::open(&csv_path)?;
        io::copy(&mut reader, archive)?;
        Ok(())
    })();

    let _ = fs::remove_file(&raw_path);
    let _ = fs::remove_file(&csv_path);
    result
}

/// `run1.tdms` → `run1.csv`; archive entries are flat.
fn csv_entry_name(name: &str) -> String {
    let base = name
        .strip_suffix(SOURCE_EXTENSION)
        .unwrap_or(name);
    format!("{base}{CSV_EXTENSION}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_name_replaces_the_extension() {
        assert_eq!(csv_entry_name("run1.tdms"), "run1.csv");
        assert_eq!(csv_entry_name("a.b.tdms"), "a.b.csv");
    }

    #[test]
    fn sanitize_strips_path_components() {
        assert_eq!(sanitized_name("run1.tdms").unwrap(), "run1.tdms");
        assert_eq!(sanitized_name("../../etc/run1.tdms").unwrap(), "run1.tdms");
        assert_eq!(sanitized_name("C:\\data\\run1.tdms").unwrap(), "run1.tdms");
        assert!(sanitized_name("").is_err());
        assert!(sanitized_name("uploads/").is_err());
        assert!(sanitized_name("..").is_err());
    }

    #[test]
    fn empty_batch_is_invalid() {
        let err = validate_batch(&[]).unwrap_err();
        assert!(matches!(err, ConvertError::InvalidInput(_)));
    }

    #[test]
    fn wrong_extension_names_the_constraint() {
        let batch = vec![UploadedFile::new("notes.txt", b"hello".to_vec())];
        let err = validate_batch(&batch).unwrap_err();
        assert!(err.to_string().contains(".tdms"));
    }
}
