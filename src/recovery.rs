//! End-to-end recovery of one file type from one source into a directory.

use crate::carver::{CancelFlag, CarveReport, Carver};
use crate::config::{ResolvedScan, ScanConfig};
use crate::error::Result;
use crate::observer::ScanObserver;
use crate::signatures::SignatureDirectory;
use crate::sink::DirectorySink;
use crate::source::ByteSource;
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Resolves the configuration, carves the source into `config.output_dir`
/// and writes a `manifest.json` summarizing the session.
///
/// An unsupported extension fails before the source is opened.
pub fn recover(
    config: &ScanConfig,
    directory: &SignatureDirectory,
    observer: impl ScanObserver + 'static,
    cancel: &CancelFlag,
) -> Result<CarveReport> {
    let resolved = config.resolve(directory)?;
    let mut source = config.open_source()?;
    recover_from(config, resolved, &mut source, observer, cancel)
}

/// Same as [`recover`] for callers that already resolved the configuration
/// and opened the source.
pub fn recover_from<S: ByteSource>(
    config: &ScanConfig,
    resolved: ResolvedScan,
    source: &mut S,
    observer: impl ScanObserver + 'static,
    cancel: &CancelFlag,
) -> Result<CarveReport> {
    let sink = DirectorySink::new(&config.output_dir)?
        .with_custody(config.custody)
        .with_overwrite(config.overwrite);

    let mut carver = Carver::new(resolved.signature, resolved.capacity, sink)
        .with_observer(observer)
        .with_failure_policy(config.failure_policy);

    let report = match carver.run(source, cancel) {
        Ok(report) => report,
        Err(e) => {
            // Keep a manifest of what was recovered before the failure.
            if let Err(manifest_err) = write_manifest(&config.output_dir, &carver.report()) {
                tracing::warn!("Failed to write manifest: {}", manifest_err);
            }
            return Err(e);
        }
    };

    write_manifest(&config.output_dir, &report)?;
    Ok(report)
}

pub fn write_manifest(output_dir: &Path, report: &CarveReport) -> Result<PathBuf> {
    let path = output_dir.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(report)?;
    fs::write(&path, json)?;
    Ok(path)
}
