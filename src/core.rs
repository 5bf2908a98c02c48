use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::File;
use std::io::Write;
use std::io::{BufReader, BufWriter};
use std::path::Path;

const FLE_PTH_CFG: &str = "fqc_cfg.json";

lazy_static! {
    /// The runtime configuration.
    ///
    /// Read once from disk. Missing file or fields fall back to defaults.
    pub static ref CFG: Cfg = read_from_file(FLE_PTH_CFG).unwrap_or_default();

    /// A regex matching a 6-digit postal pincode such as `110001`.
    pub static ref RE_PINCODE: Regex = Regex::new(r"^[1-9][0-9]{5}$").unwrap();

    /// A regex matching a zone short code such as `N1`, `S2`, `W3`.
    pub static ref RE_ZONE: Regex = Regex::new(r"^[A-Z]{1,3}[0-9]{0,2}$").unwrap();
}

/// Runtime configuration for the quoting core.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct Cfg {
    pub mpc_path: String,
    pub utsf_dir: String,
    pub vendors_path: String,
    /// Worker thread count. Zero selects the available parallelism.
    pub worker_count: usize,
    /// Minimum vendors per batch when partitioning a request.
    pub batch_min: usize,
    /// Per-request deadline in milliseconds.
    pub deadline_ms: u64,
}

impl Default for Cfg {
    fn default() -> Self {
        Self {
            mpc_path: "data/pincodes.csv".into(),
            utsf_dir: "data/utsf".into(),
            vendors_path: "data/vendors.json".into(),
            worker_count: 0,
            batch_min: 25,
            deadline_ms: 10_000,
        }
    }
}

/// Serializes a JSON struct to a file.
pub fn write_to_file<T: Serialize, P: AsRef<Path>>(data: &T, file_path: P) -> Result<()> {
    eprintln!("Writing file: {}", file_path.as_ref().display());
    let file = File::create(file_path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &data)?;
    Ok(())
}

/// Serializes a JSON struct to a file atomically.
///
/// Writes to a sibling temp file, fsyncs, then renames over the target.
/// Readers observe either the old document or the new one, never a torn write.
pub fn write_to_file_atomic<T: Serialize, P: AsRef<Path>>(data: &T, file_path: P) -> Result<()> {
    let file_path = file_path.as_ref();
    let tmp_path = file_path.with_extension("tmp");
    eprintln!("Writing file: {}", file_path.display());

    let file = File::create(&tmp_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &data)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    fs::rename(&tmp_path, file_path)?;
    Ok(())
}

/// Deserializes a JSON struct from a file.
pub fn read_from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(file_path: P) -> Result<T> {
    let file = File::open(file_path)?;
    let reader = BufReader::new(file);
    let data = serde_json::from_reader(reader)?;
    Ok(data)
}

/// Parses and validates a 6-digit pincode string.
pub fn parse_pincode(s: &str) -> Option<u32> {
    let s = s.trim();
    if RE_PINCODE.is_match(s) {
        s.parse().ok()
    } else {
        None
    }
}

/// Normalizes a zone label for lookups and storage.
pub fn norm_zone(zone: &str) -> String {
    zone.trim().to_uppercase()
}

/// Rounds to two decimal places.
///
/// Used for weight and percentage fields on wire records.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Format an integer with commas.
pub fn numfmt(num: usize) -> String {
    let mut ret = String::new();
    for (i, c) in num.to_string().chars().rev().enumerate() {
        if i != 0 && i % 3 == 0 {
            ret.push(',');
        }
        ret.push(c);
    }
    ret.chars().rev().collect()
}
