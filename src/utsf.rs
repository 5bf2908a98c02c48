use crate::codec::*;
use crate::core::*;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Current UTSF document version written by the control plane.
pub const UTSF_VERSION: &str = "3.0.0";

/// Integrity regime for one vendor file.
///
/// Strict mode forbids serving any pincode absent from the master catalog.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityMode {
    #[serde(rename = "STRICT")]
    Strict,
    #[default]
    #[serde(rename = "PERMISSIVE")]
    Permissive,
}

/// Provenance of a UTSF file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Created {
    pub by: String,
    pub at: DateTime<Utc>,
    pub source: String,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct UtsfMeta {
    pub id: String,
    pub company_name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<Created>,
    pub update_count: u64,
    pub integrity_mode: IntegrityMode,
}

/// Coverage for a zone where every master pincode is served.
///
/// May carry the compressed enumeration captured at ingest; the audit and
/// repair paths reconcile that evidence against the drifting master list.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct FullZoneCov {
    #[serde(
        deserialize_with = "de_ranges",
        alias = "served_ranges",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub served_ranges: Vec<PinRange>,
    #[serde(
        deserialize_with = "de_singles",
        alias = "served_singles",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub served_singles: Vec<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub soft_exclusions: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub served_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_percent: Option<f64>,
}

/// Coverage for a zone served except for an enumerated exception set.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct FullMinusExceptCov {
    #[serde(
        deserialize_with = "de_ranges",
        alias = "except_ranges",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub except_ranges: Vec<PinRange>,
    #[serde(
        deserialize_with = "de_singles",
        alias = "except_singles",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub except_singles: Vec<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub soft_exclusions: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub served_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_percent: Option<f64>,
}

/// Coverage for a zone where only the enumerated pincodes are served.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct OnlyServedCov {
    #[serde(
        deserialize_with = "de_ranges",
        alias = "served_ranges",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub served_ranges: Vec<PinRange>,
    #[serde(
        deserialize_with = "de_singles",
        alias = "served_singles",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub served_singles: Vec<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub soft_exclusions: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub served_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_percent: Option<f64>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct NotServedCov {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub soft_exclusions: Vec<u32>,
}

/// Per-zone coverage. The variant drives set-membership semantics.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "variant")]
pub enum ZoneCoverage {
    #[serde(rename = "FULL_ZONE")]
    FullZone(FullZoneCov),
    #[serde(rename = "FULL_MINUS_EXCEPT", alias = "FULL_MINUS_EXCEPTIONS")]
    FullMinusExcept(FullMinusExceptCov),
    #[serde(rename = "ONLY_SERVED")]
    OnlyServed(OnlyServedCov),
    #[serde(rename = "NOT_SERVED")]
    NotServed(NotServedCov),
}

impl ZoneCoverage {
    pub fn variant_name(&self) -> &'static str {
        match self {
            ZoneCoverage::FullZone(_) => "FULL_ZONE",
            ZoneCoverage::FullMinusExcept(_) => "FULL_MINUS_EXCEPT",
            ZoneCoverage::OnlyServed(_) => "ONLY_SERVED",
            ZoneCoverage::NotServed(_) => "NOT_SERVED",
        }
    }

    pub fn soft_exclusions(&self) -> &[u32] {
        match self {
            ZoneCoverage::FullZone(c) => &c.soft_exclusions,
            ZoneCoverage::FullMinusExcept(c) => &c.soft_exclusions,
            ZoneCoverage::OnlyServed(c) => &c.soft_exclusions,
            ZoneCoverage::NotServed(c) => &c.soft_exclusions,
        }
    }

    pub fn soft_exclusions_mut(&mut self) -> &mut Vec<u32> {
        match self {
            ZoneCoverage::FullZone(c) => &mut c.soft_exclusions,
            ZoneCoverage::FullMinusExcept(c) => &mut c.soft_exclusions,
            ZoneCoverage::OnlyServed(c) => &mut c.soft_exclusions,
            ZoneCoverage::NotServed(c) => &mut c.soft_exclusions,
        }
    }

    /// The served set under this coverage, relative to the zone's master set.
    ///
    /// Soft exclusions are not applied here; callers layer them on top.
    pub fn membership_set(&self, master: &BTreeSet<u32>) -> BTreeSet<u32> {
        match self {
            ZoneCoverage::FullZone(_) => master.clone(),
            ZoneCoverage::FullMinusExcept(c) => {
                let except = expand(&c.except_ranges, &c.except_singles);
                master.difference(&except).copied().collect()
            }
            ZoneCoverage::OnlyServed(c) => expand(&c.served_ranges, &c.served_singles),
            ZoneCoverage::NotServed(_) => BTreeSet::new(),
        }
    }

    /// Master pincodes this coverage fails to serve.
    ///
    /// For `FULL_ZONE` the gap is judged against the ingest enumeration when
    /// one is present; a bare claim has no computable gap.
    pub fn missing_from(&self, master: &BTreeSet<u32>) -> BTreeSet<u32> {
        match self {
            ZoneCoverage::FullZone(c) => {
                if c.served_ranges.is_empty() && c.served_singles.is_empty() {
                    BTreeSet::new()
                } else {
                    let served = expand(&c.served_ranges, &c.served_singles);
                    master.difference(&served).copied().collect()
                }
            }
            ZoneCoverage::FullMinusExcept(c) => {
                let except = expand(&c.except_ranges, &c.except_singles);
                master.intersection(&except).copied().collect()
            }
            ZoneCoverage::OnlyServed(c) => {
                let served = expand(&c.served_ranges, &c.served_singles);
                master.difference(&served).copied().collect()
            }
            ZoneCoverage::NotServed(_) => master.clone(),
        }
    }

    /// Whether the variant admits a pincode planted into the zone by an
    /// override, master set aside.
    ///
    /// An override makes the pincode a member of the zone, so the full and
    /// minus-exceptions variants admit it directly.
    pub fn admits(&self, pincode: u32) -> bool {
        match self {
            ZoneCoverage::FullZone(_) => true,
            ZoneCoverage::FullMinusExcept(c) => {
                !expand(&c.except_ranges, &c.except_singles).contains(&pincode)
            }
            ZoneCoverage::OnlyServed(c) => {
                expand(&c.served_ranges, &c.served_singles).contains(&pincode)
            }
            ZoneCoverage::NotServed(_) => false,
        }
    }

    /// Whether the raw enumeration lists the pincode, master aside.
    ///
    /// This is the only way a pincode outside the master catalog can be
    /// served, and only under permissive mode.
    pub fn lists_explicitly(&self, pincode: u32) -> bool {
        match self {
            ZoneCoverage::FullZone(c) => {
                expand(&c.served_ranges, &c.served_singles).contains(&pincode)
            }
            ZoneCoverage::OnlyServed(c) => {
                expand(&c.served_ranges, &c.served_singles).contains(&pincode)
            }
            ZoneCoverage::FullMinusExcept(_) | ZoneCoverage::NotServed(_) => false,
        }
    }

    /// Sorts ranges by start and sorts and dedups singles.
    fn canonicalize(&mut self) {
        fn canon(ranges: &mut Vec<PinRange>, singles: &mut Vec<u32>) {
            ranges.sort_unstable();
            singles.sort_unstable();
            singles.dedup();
        }
        match self {
            ZoneCoverage::FullZone(c) => {
                canon(&mut c.served_ranges, &mut c.served_singles);
                c.soft_exclusions.sort_unstable();
                c.soft_exclusions.dedup();
            }
            ZoneCoverage::FullMinusExcept(c) => {
                canon(&mut c.except_ranges, &mut c.except_singles);
                c.soft_exclusions.sort_unstable();
                c.soft_exclusions.dedup();
                // Soft exclusions and permanent exceptions are distinct sets;
                // a pincode in both stays permanently excepted.
                let except: BTreeSet<u32> = c.except_singles.iter().copied().collect();
                c.soft_exclusions.retain(|p| !except.contains(p));
            }
            ZoneCoverage::OnlyServed(c) => {
                canon(&mut c.served_ranges, &mut c.served_singles);
                c.soft_exclusions.sort_unstable();
                c.soft_exclusions.dedup();
            }
            ZoneCoverage::NotServed(c) => {
                c.soft_exclusions.sort_unstable();
                c.soft_exclusions.dedup();
            }
        }
    }
}

/// A pincode reassigned to a different zone label for one vendor.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ZoneOverride {
    pub pincode: u32,
    pub to_zone: String,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy)]
#[serde(rename_all = "camelCase", default)]
pub struct UtsfStats {
    pub compliance_score: f64,
}

/// One append-only audit entry.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEntry {
    pub timestamp: DateTime<Utc>,
    pub editor_id: String,
    pub reason: String,
    pub change_summary: String,
    /// Opaque serialized prior state, when the mutation recorded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Value>,
}

/// One vendor's serviceability file.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct UtsfFile {
    pub meta: UtsfMeta,
    pub serviceability: BTreeMap<String, ZoneCoverage>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub zone_overrides: BTreeMap<String, Vec<ZoneOverride>>,
    pub stats: UtsfStats,
    pub updates: Vec<UpdateEntry>,
}

impl UtsfFile {
    /// Reads one file and normalizes it to canonical shape.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<UtsfFile> {
        let path = path.as_ref();
        let mut file: UtsfFile = read_from_file(path)
            .with_context(|| format!("parse utsf file {}", path.display()))?;
        file.normalize();
        if file.meta.id.is_empty() {
            return Err(anyhow!("utsf file {} has no vendor id", path.display()));
        }
        Ok(file)
    }

    /// Writes the file atomically: temp sibling, fsync, rename.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_to_file_atomic(self, path)
    }

    /// Uppercases zone labels and canonicalizes all coverage sets.
    pub fn normalize(&mut self) {
        let serviceability = std::mem::take(&mut self.serviceability);
        for (zone, mut cov) in serviceability {
            cov.canonicalize();
            self.serviceability.insert(norm_zone(&zone), cov);
        }

        let overrides = std::mem::take(&mut self.zone_overrides);
        for (zone, mut ovs) in overrides {
            for ov in ovs.iter_mut() {
                ov.to_zone = norm_zone(&ov.to_zone);
            }
            ovs.sort_unstable_by_key(|o| o.pincode);
            self.zone_overrides.insert(norm_zone(&zone), ovs);
        }
    }

    /// Appends an audit entry and keeps the update counter in sync.
    pub fn push_update(&mut self, entry: UpdateEntry) {
        self.updates.push(entry);
        self.meta.update_count = self.updates.len() as u64;
    }

    /// Whether the governance headers are complete.
    pub fn has_governance(&self) -> bool {
        self.meta.created.is_some() && !self.meta.version.is_empty()
    }

    /// The override target zone for a pincode, if any.
    pub fn override_for(&self, pincode: u32) -> Option<&str> {
        for ovs in self.zone_overrides.values() {
            if let Some(ov) = ovs.iter().find(|o| o.pincode == pincode) {
                return Some(&ov.to_zone);
            }
        }
        None
    }

    pub fn override_count(&self) -> usize {
        self.zone_overrides.values().map(|v| v.len()).sum()
    }
}
