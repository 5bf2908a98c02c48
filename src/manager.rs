use crate::codec::*;
use crate::core::*;
use crate::mpc::*;
use crate::service::utsf_paths;
use crate::utsf::*;
use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const AUDIT_CSV: &str = "audit_report.csv";

/// Administrative control plane over a directory of UTSF files.
///
/// Reads and writes files directly; readers pick up changes on the next
/// service reload. Writes are atomic at the file level.
pub struct Manager {
    utsf_dir: PathBuf,
    mpc: Arc<Mpc>,
}

/// One audit line per vendor file.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuditRow {
    pub vendor_id: String,
    pub company_name: String,
    pub version: String,
    pub integrity_mode: String,
    pub has_governance: bool,
    pub stored_compliance: f64,
    pub computed_compliance: f64,
    pub override_count: usize,
    pub needs_repair: bool,
}

/// Per-zone diagnostic counts for one vendor.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ZoneCompare {
    pub zone: String,
    pub master_count: usize,
    pub served_count: usize,
    pub missing_count: usize,
    pub missing: Vec<u32>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CompareReport {
    pub vendor_id: String,
    pub company_name: String,
    pub zones: Vec<ZoneCompare>,
}

/// What one repair run changed.
#[derive(Debug, Default, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RepairOutcome {
    pub vendor_id: String,
    pub governance_backfilled: bool,
    pub promoted_zones: Vec<String>,
    pub exceptions_added: usize,
    pub soft_unblocked: usize,
    pub compliance: f64,
    pub changed: bool,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RollbackStatus {
    Applied,
    /// The referenced update carries no usable snapshot; only recorded.
    NoSnapshot,
    IndexOutOfBounds,
}

/// The restorable portion of a UTSF file, embedded in audit entries.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
struct RestorableState {
    meta: UtsfMeta,
    serviceability: BTreeMap<String, ZoneCoverage>,
    zone_overrides: BTreeMap<String, Vec<ZoneOverride>>,
    stats: UtsfStats,
}

fn restorable_state(file: &UtsfFile) -> Value {
    serde_json::to_value(RestorableState {
        meta: file.meta.clone(),
        serviceability: file.serviceability.clone(),
        zone_overrides: file.zone_overrides.clone(),
        stats: file.stats,
    })
    .unwrap_or(Value::Null)
}

impl Manager {
    pub fn new<P: Into<PathBuf>>(utsf_dir: P, mpc: Arc<Mpc>) -> Self {
        Self {
            utsf_dir: utsf_dir.into(),
            mpc,
        }
    }

    pub fn utsf_path(&self, vendor_id: &str) -> PathBuf {
        self.utsf_dir.join(format!("{vendor_id}.json"))
    }

    pub fn exists(&self, vendor_id: &str) -> bool {
        self.utsf_path(vendor_id).exists()
    }

    /// Scans every file, prints a report, and exports it as CSV.
    ///
    /// Unparseable files are logged and skipped; they never abort the scan.
    pub fn audit(&self) -> Result<Vec<AuditRow>> {
        let mut rows = Vec::new();
        for pth in utsf_paths(&self.utsf_dir)? {
            let file = match UtsfFile::load(&pth) {
                Ok(file) => file,
                Err(err) => {
                    eprintln!("audit: skipping {}: {err:#}", pth.display());
                    continue;
                }
            };
            rows.push(self.audit_row(&file));
        }

        self.print_audit(&rows);
        self.export_audit_csv(&rows)?;
        Ok(rows)
    }

    fn audit_row(&self, file: &UtsfFile) -> AuditRow {
        let computed = self.computed_compliance(file);
        let has_governance = file.has_governance();
        AuditRow {
            vendor_id: file.meta.id.clone(),
            company_name: file.meta.company_name.clone(),
            version: file.meta.version.clone(),
            integrity_mode: match file.meta.integrity_mode {
                IntegrityMode::Strict => "STRICT".into(),
                IntegrityMode::Permissive => "PERMISSIVE".into(),
            },
            has_governance,
            stored_compliance: file.stats.compliance_score,
            computed_compliance: computed,
            override_count: file.override_count(),
            needs_repair: !has_governance || computed < 1.0,
        }
    }

    fn print_audit(&self, rows: &[AuditRow]) {
        println!("vendor,company,version,mode,governance,stored,computed,overrides,needsRepair");
        for r in rows {
            println!(
                "{},{},{},{},{},{:.4},{:.4},{},{}",
                r.vendor_id,
                r.company_name,
                r.version,
                r.integrity_mode,
                r.has_governance,
                r.stored_compliance,
                r.computed_compliance,
                r.override_count,
                r.needs_repair
            );
        }
        let flagged = rows.iter().filter(|r| r.needs_repair).count();
        println!(
            "{} files audited, {} flagged for repair",
            numfmt(rows.len()),
            numfmt(flagged)
        );
    }

    fn export_audit_csv(&self, rows: &[AuditRow]) -> Result<()> {
        let pth = self.utsf_dir.join(AUDIT_CSV);
        let mut wtr = csv::Writer::from_path(&pth)?;
        for row in rows {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        eprintln!("audit csv written to {}", pth.display());
        Ok(())
    }

    /// Per-zone master, served, and missing counts plus the missing list.
    pub fn compare(&self, vendor_id: &str) -> Result<CompareReport> {
        let file = UtsfFile::load(self.utsf_path(vendor_id))?;
        let empty = BTreeSet::new();

        let mut zones = Vec::new();
        for (zone, cov) in &file.serviceability {
            let master = self.mpc.pincodes_of_zone(zone).unwrap_or(&empty);
            let missing = cov.missing_from(master);
            zones.push(ZoneCompare {
                zone: zone.clone(),
                master_count: master.len(),
                served_count: master.len() - missing.len(),
                missing_count: missing.len(),
                missing: missing.into_iter().collect(),
            });
        }

        Ok(CompareReport {
            vendor_id: file.meta.id.clone(),
            company_name: file.meta.company_name.clone(),
            zones,
        })
    }

    /// Compliance against the master catalog over every declared zone.
    fn computed_compliance(&self, file: &UtsfFile) -> f64 {
        let empty = BTreeSet::new();
        let mut total_master = 0usize;
        let mut total_missing = 0usize;
        for (zone, cov) in &file.serviceability {
            let master = self.mpc.pincodes_of_zone(zone).unwrap_or(&empty);
            if master.is_empty() {
                continue;
            }
            total_master += master.len();
            total_missing += cov.missing_from(master).len();
        }
        if total_master == 0 {
            return 1.0;
        }
        1.0 - total_missing as f64 / total_master as f64
    }

    /// Repairs one file. Idempotent: a second run appends only a no-change
    /// audit entry.
    pub fn repair(&self, vendor_id: &str, editor_id: &str) -> Result<RepairOutcome> {
        let pth = self.utsf_path(vendor_id);
        let mut file = UtsfFile::load(&pth)?;
        let before = restorable_state(&file);

        // 1. Back-fill governance headers and force strict mode.
        let mut governance_backfilled = false;
        if file.meta.created.is_none() {
            file.meta.created = Some(Created {
                by: editor_id.to_string(),
                at: Utc::now(),
                source: "repair".into(),
            });
            governance_backfilled = true;
        }
        if file.meta.version != UTSF_VERSION {
            file.meta.version = UTSF_VERSION.into();
            governance_backfilled = true;
        }
        let mode_forced = file.meta.integrity_mode != IntegrityMode::Strict;
        file.meta.integrity_mode = IntegrityMode::Strict;

        // 2. Promote stale FULL_ZONE claims to FULL_MINUS_EXCEPT.
        let mut promoted_zones = Vec::new();
        let mut exceptions_added = 0usize;
        let zones: Vec<String> = file.serviceability.keys().cloned().collect();
        for zone in &zones {
            let Some(master) = self.mpc.pincodes_of_zone(zone) else {
                continue;
            };
            let cov = &file.serviceability[zone];
            let ZoneCoverage::FullZone(fz) = cov else {
                continue;
            };
            let missing = cov.missing_from(master);
            if missing.is_empty() {
                continue;
            }

            let missing_list: Vec<u32> = missing.iter().copied().collect();
            let (except_ranges, except_singles) = compress(&missing_list, RUN_THRESHOLD);
            let served_count = master.len() - missing.len();
            let new_cov = ZoneCoverage::FullMinusExcept(FullMinusExceptCov {
                except_ranges,
                except_singles,
                soft_exclusions: fz.soft_exclusions.clone(),
                served_count: Some(served_count as u64),
                coverage_percent: Some(round2(served_count as f64 * 100.0 / master.len() as f64)),
            });
            file.serviceability.insert(zone.clone(), new_cov);
            promoted_zones.push(zone.clone());
            exceptions_added += missing.len();
        }
        file.normalize();

        // 3. Recompute and store the compliance score.
        let compliance = self.computed_compliance(&file);
        file.stats.compliance_score = compliance;

        // 4. Lift soft exclusions the permanent rules now serve.
        let mut soft_unblocked = 0usize;
        let empty = BTreeSet::new();
        for zone in &zones {
            let master = self.mpc.pincodes_of_zone(zone).unwrap_or(&empty).clone();
            let Some(cov) = file.serviceability.get_mut(zone) else {
                continue;
            };
            if cov.soft_exclusions().is_empty() {
                continue;
            }
            let rebuilt = cov.membership_set(&master);
            let soft = cov.soft_exclusions_mut();
            let before_len = soft.len();
            soft.retain(|p| !(master.contains(p) && rebuilt.contains(p)));
            soft_unblocked += before_len - soft.len();
        }

        let changed = restorable_state(&file) != before;

        // 5. One audit entry summarizing the run.
        let mut parts = Vec::new();
        if governance_backfilled {
            parts.push(format!("backfilled governance, version {}", UTSF_VERSION));
        }
        if mode_forced {
            parts.push("integrityMode forced to STRICT".to_string());
        }
        if !promoted_zones.is_empty() {
            parts.push(format!(
                "promoted {} to FULL_MINUS_EXCEPT with {} exceptions",
                promoted_zones.join(","),
                exceptions_added
            ));
        }
        if soft_unblocked > 0 {
            parts.push(format!("auto-unblocked {} soft exclusions", soft_unblocked));
        }
        if parts.is_empty() && changed {
            parts.push(format!("complianceScore recomputed to {compliance:.4}"));
        }
        let change_summary = if changed {
            parts.join("; ")
        } else {
            "no changes".to_string()
        };
        file.push_update(UpdateEntry {
            timestamp: Utc::now(),
            editor_id: editor_id.to_string(),
            reason: "repair".into(),
            change_summary,
            snapshot: changed.then(|| before),
        });

        // 6. Persist atomically.
        file.save(&pth)?;

        Ok(RepairOutcome {
            vendor_id: vendor_id.to_string(),
            governance_backfilled,
            promoted_zones,
            exceptions_added,
            soft_unblocked,
            compliance,
            changed,
        })
    }

    /// Repairs every file in the directory. A failing file is logged and
    /// skipped; the batch continues.
    pub fn repair_all(&self, editor_id: &str) -> Result<(usize, usize)> {
        let mut repaired = 0usize;
        let mut failed = 0usize;
        for pth in utsf_paths(&self.utsf_dir)? {
            let Some(vendor_id) = pth.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.repair(vendor_id, editor_id) {
                Ok(outcome) => {
                    repaired += 1;
                    eprintln!(
                        "repaired {}: {} zones promoted, {} unblocked, compliance {:.4}",
                        vendor_id,
                        outcome.promoted_zones.len(),
                        outcome.soft_unblocked,
                        outcome.compliance
                    );
                }
                Err(err) => {
                    failed += 1;
                    eprintln!("repair {} failed: {err:#}", vendor_id);
                }
            }
        }
        println!("{} repaired, {} failed", repaired, failed);
        Ok((repaired, failed))
    }

    /// Restores a file from the snapshot of one of its updates.
    ///
    /// An update without a usable snapshot is a no-op beyond the appended
    /// audit entry.
    pub fn rollback(&self, vendor_id: &str, version_index: usize) -> Result<RollbackStatus> {
        let pth = self.utsf_path(vendor_id);
        let mut file = UtsfFile::load(&pth)?;

        let Some(entry) = file.updates.get(version_index) else {
            return Ok(RollbackStatus::IndexOutOfBounds);
        };
        let target_stamp = entry.timestamp;

        let restored = entry
            .snapshot
            .clone()
            .and_then(|snap| serde_json::from_value::<RestorableState>(snap).ok());
        let status = match restored {
            Some(state) => {
                let current = restorable_state(&file);
                file.meta = state.meta;
                file.serviceability = state.serviceability;
                file.zone_overrides = state.zone_overrides;
                file.stats = state.stats;
                file.normalize();
                file.push_update(UpdateEntry {
                    timestamp: Utc::now(),
                    editor_id: "rollback".into(),
                    reason: "rollback".into(),
                    change_summary: format!(
                        "restored state from update {} ({})",
                        version_index, target_stamp
                    ),
                    snapshot: Some(current),
                });
                RollbackStatus::Applied
            }
            None => {
                file.push_update(UpdateEntry {
                    timestamp: Utc::now(),
                    editor_id: "rollback".into(),
                    reason: "rollback".into(),
                    change_summary: format!(
                        "rollback to update {} requested; no snapshot available",
                        version_index
                    ),
                    snapshot: None,
                });
                RollbackStatus::NoSnapshot
            }
        };

        file.save(&pth)?;
        Ok(status)
    }
}
