//! Subcommand implementations: `inject`, `list`, `extract`, `verify`.

use std::path::{Path, PathBuf};

use seastitch::container::{self, Container};
use seastitch::format::PayloadName;
use seastitch::{sea_config, stub, Error};

use crate::exit_codes::{self, ExitCode};
use crate::output::{HumanFormatter, JsonFormatter, OutputFormatter, SlotInfo};
use crate::OutputFormat;

fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Human => Box::new(HumanFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

fn report_error(err: &Error) -> ExitCode {
    eprintln!("error: {err}");
    exit_codes::error_to_exit_code(err)
}

/// Configuration for `inject`, collecting every flag the subcommand
/// accepts.
pub struct InjectConfig<'a> {
    pub executable: &'a Path,
    pub output: &'a Path,
    pub sea: Option<&'a Path>,
    pub vfs: Option<&'a Path>,
    pub vfs_on_disk: Option<&'a Path>,
    pub vfs_in_memory: Option<&'a Path>,
    pub vfs_compat: bool,
    pub skip_repack: bool,
    pub format: OutputFormat,
    pub quiet: bool,
}

pub fn inject(cfg: &InjectConfig) -> ExitCode {
    let vfs_requested = cfg.vfs.is_some()
        || cfg.vfs_on_disk.is_some()
        || cfg.vfs_in_memory.is_some()
        || cfg.vfs_compat;
    if vfs_requested && cfg.sea.is_none() {
        return report_error(&Error::InvalidArgs(
            "--vfs (and its variants) requires --sea in the same invocation".into(),
        ));
    }

    match inject_inner(cfg) {
        Ok(slots) => {
            if !cfg.quiet {
                println!(
                    "{}",
                    formatter(cfg.format).format_inject(&cfg.output.display().to_string(), &slots)
                );
            }
            ExitCode::Success
        }
        Err(e) => report_error(&e),
    }
}

fn inject_inner(cfg: &InjectConfig) -> seastitch::Result<Vec<SlotInfo>> {
    let is_stub = stub::is_stub(cfg.executable)?;
    let (work_target, inner_extracted): (PathBuf, Option<PathBuf>) = if is_stub {
        let inner = stub::extract(cfg.executable)?;
        (inner.clone(), Some(inner))
    } else {
        (cfg.executable.to_path_buf(), None)
    };

    let mut c = container::open(&work_target)?;

    if let Some(sea_path) = cfg.sea {
        let blob_path = resolve_sea_blob_path(sea_path, &work_target)?;
        let bytes = std::fs::read(&blob_path)
            .map_err(|_| Error::FileNotFound(blob_path.clone()))?;
        c.put(PayloadName::Sea, bytes)?;
        c.flip_fuse()?;
    }

    if cfg.vfs_compat {
        c.put(PayloadName::Vfs, Vec::new())?;
    } else if let Some(vfs_path) = cfg.vfs.or(cfg.vfs_on_disk).or(cfg.vfs_in_memory) {
        let bytes = std::fs::read(vfs_path).map_err(|_| Error::FileNotFound(vfs_path.to_path_buf()))?;
        c.put(PayloadName::Vfs, bytes)?;
    }

    let slots = c
        .list()
        .into_iter()
        .map(|(name, size)| SlotInfo { name, size })
        .collect();

    if is_stub && !cfg.skip_repack {
        let tmp_inner = work_target.clone();
        c.write(&tmp_inner)?;
        stub::repack(cfg.executable, &tmp_inner, cfg.output)?;
    } else {
        c.write(cfg.output)?;
    }

    let _ = inner_extracted;
    Ok(slots)
}

/// Resolves the actual SEA blob path: if `sea_path` is a `.json` SEA
/// config, spawns the target interpreter to generate the blob and reads
/// its path out of the config's `"output"` field.
fn resolve_sea_blob_path(sea_path: &Path, target: &Path) -> seastitch::Result<PathBuf> {
    if sea_path.extension().and_then(|e| e.to_str()) == Some("json") {
        sea_config::generate_blob(target, sea_path)
    } else {
        Ok(sea_path.to_path_buf())
    }
}

pub fn list(executable: &Path, format: OutputFormat) -> ExitCode {
    match list_inner(executable) {
        Ok((format_name, slots)) => {
            println!("{}", formatter(format).format_list(&format_name, &slots));
            ExitCode::Success
        }
        Err(e) => report_error(&e),
    }
}

fn list_inner(executable: &Path) -> seastitch::Result<(String, Vec<SlotInfo>)> {
    let c = container::open(executable)?;
    let format_name = c.format().name().to_string();
    let slots = c
        .list()
        .into_iter()
        .map(|(name, size)| SlotInfo { name, size })
        .collect();
    Ok((format_name, slots))
}

pub fn extract(executable: &Path, slot: PayloadName, out_path: &Path, format: OutputFormat) -> ExitCode {
    match extract_inner(executable, slot, out_path) {
        Ok(size) => {
            println!(
                "{}",
                formatter(format).format_extract(slot, &out_path.display().to_string(), size)
            );
            ExitCode::Success
        }
        Err(e) => report_error(&e),
    }
}

fn extract_inner(executable: &Path, slot: PayloadName, out_path: &Path) -> seastitch::Result<usize> {
    let c = container::open(executable)?;
    let bytes = c.get(slot)?;
    std::fs::write(out_path, &bytes)?;
    Ok(bytes.len())
}

pub fn verify(executable: &Path, slot: PayloadName, format: OutputFormat) -> ExitCode {
    match verify_inner(executable, slot) {
        Ok((present, size)) => {
            println!("{}", formatter(format).format_verify(slot, present, size));
            if present {
                ExitCode::Success
            } else {
                ExitCode::SectionNotFound
            }
        }
        Err(e) => report_error(&e),
    }
}

fn verify_inner(executable: &Path, slot: PayloadName) -> seastitch::Result<(bool, usize)> {
    let c = container::open(executable)?;
    match c.get(slot) {
        Ok(bytes) => Ok((!bytes.is_empty() || c.has(slot), bytes.len())),
        Err(Error::SectionNotFound(_)) => Ok((false, 0)),
        Err(e) => Err(e),
    }
}
