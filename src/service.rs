use crate::mpc::*;
use crate::utsf::*;
use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

/// One vendor's coverage plus its lazily built per-zone served sets.
pub struct VendorCoverage {
    pub file: UtsfFile,
    served: Mutex<HashMap<String, Arc<BTreeSet<u32>>>>,
}

impl VendorCoverage {
    fn new(file: UtsfFile) -> Self {
        Self {
            file,
            served: Mutex::new(HashMap::new()),
        }
    }
}

/// An immutable view of every UTSF file plus the master catalog.
///
/// Readers hold the snapshot for the life of a request; a reload never
/// mutates one in place.
pub struct Snapshot {
    pub mpc: Arc<Mpc>,
    vendors: HashMap<String, VendorCoverage>,
}

impl Snapshot {
    pub fn vendor(&self, vendor_id: &str) -> Option<&VendorCoverage> {
        self.vendors.get(vendor_id)
    }

    pub fn vendor_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.vendors.keys().map(|k| k.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.vendors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vendors.is_empty()
    }

    /// The zone a pincode falls in for one vendor, overrides applied.
    pub fn effective_zone(&self, vendor_id: &str, pincode: u32) -> Option<String> {
        let v = self.vendors.get(vendor_id)?;
        if let Some(zone) = v.file.override_for(pincode) {
            return Some(zone.to_string());
        }
        self.mpc.zone_of(pincode).map(|z| z.to_string())
    }

    /// Whether a vendor serves a pincode.
    pub fn is_serviceable(&self, vendor_id: &str, pincode: u32) -> bool {
        let Some(v) = self.vendors.get(vendor_id) else {
            return false;
        };
        let strict = v.file.meta.integrity_mode == IntegrityMode::Strict;
        let in_master = self.mpc.contains(pincode);

        // Phantoms are never served under strict mode.
        if strict && !in_master {
            eprintln!(
                "integrity: pincode {} is outside the master catalog; blocked for vendor {}",
                pincode, vendor_id
            );
            return false;
        }

        let Some(zone) = self.effective_zone(vendor_id, pincode) else {
            // No master zone and no override. Permissive mode still honors
            // an explicit enumeration.
            return !strict
                && v.file.serviceability.values().any(|cov| {
                    cov.lists_explicitly(pincode) && !cov.soft_exclusions().contains(&pincode)
                });
        };

        let Some(cov) = v.file.serviceability.get(&zone) else {
            if v.file.override_for(pincode).is_some() {
                eprintln!(
                    "vendor {}: override maps {} into zone {} with no coverage; not served",
                    vendor_id, pincode, zone
                );
            }
            return false;
        };

        // A soft block wins over being nominally served.
        if cov.soft_exclusions().contains(&pincode) {
            return false;
        }

        // An overridden pincode is a member of the target zone by fiat;
        // membership follows the variant, not the zone's master set.
        if v.file.override_for(pincode).is_some() {
            return cov.admits(pincode);
        }

        self.served_set(v, &zone, cov).contains(&pincode)
    }

    /// The served set for one vendor zone, built on first query and cached.
    pub fn served_pincodes(&self, vendor_id: &str, zone: &str) -> Option<Arc<BTreeSet<u32>>> {
        let v = self.vendors.get(vendor_id)?;
        let cov = v.file.serviceability.get(zone)?;
        Some(self.served_set(v, zone, cov))
    }

    /// Count of master pincodes a vendor serves across all its zones.
    pub fn serviceable_count(&self, vendor_id: &str) -> u64 {
        let Some(v) = self.vendors.get(vendor_id) else {
            return 0;
        };
        let zones: Vec<String> = v.file.serviceability.keys().cloned().collect();
        let mut count = 0u64;
        for zone in zones {
            let cov = &v.file.serviceability[&zone];
            let soft: BTreeSet<u32> = cov.soft_exclusions().iter().copied().collect();
            let served = self.served_set(v, &zone, cov);
            count += served
                .iter()
                .filter(|p| self.mpc.contains(**p) && !soft.contains(p))
                .count() as u64;
        }
        count
    }

    fn served_set(&self, v: &VendorCoverage, zone: &str, cov: &ZoneCoverage) -> Arc<BTreeSet<u32>> {
        let mut cache = v.served.lock().unwrap();
        if let Some(set) = cache.get(zone) {
            return set.clone();
        }
        let empty = BTreeSet::new();
        let master = self.mpc.pincodes_of_zone(zone).unwrap_or(&empty);
        let set = Arc::new(cov.membership_set(master));
        cache.insert(zone.to_string(), set.clone());
        set
    }
}

/// In-memory index over all UTSF files, behind a swappable snapshot.
pub struct UtsfService {
    snap: RwLock<Arc<Snapshot>>,
}

impl UtsfService {
    /// Loads all UTSF files and the master catalog. Fails fast on a bad file.
    pub async fn load<P: AsRef<Path>, Q: AsRef<Path>>(
        utsf_dir: P,
        mpc_path: Q,
    ) -> Result<UtsfService> {
        let snap = load_snapshot(utsf_dir.as_ref(), mpc_path.as_ref())?;
        Ok(UtsfService {
            snap: RwLock::new(Arc::new(snap)),
        })
    }

    /// The current snapshot. Callers keep it for the whole request.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snap.read().unwrap().clone()
    }

    /// Swaps in a freshly loaded snapshot.
    ///
    /// On failure the last good snapshot stays in place and the error is
    /// returned. In-flight readers finish on whichever snapshot they hold.
    pub async fn reload<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        utsf_dir: P,
        mpc_path: Q,
    ) -> Result<()> {
        match load_snapshot(utsf_dir.as_ref(), mpc_path.as_ref()) {
            Ok(snap) => {
                *self.snap.write().unwrap() = Arc::new(snap);
                Ok(())
            }
            Err(err) => {
                eprintln!("reload failed, keeping last good snapshot: {err:#}");
                Err(err)
            }
        }
    }
}

/// Lists the UTSF files of a directory, ordered by file name.
pub fn utsf_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("read utsf directory {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|x| x == "json").unwrap_or(false))
        .collect();
    paths.sort_unstable();
    Ok(paths)
}

fn load_snapshot(dir: &Path, mpc_path: &Path) -> Result<Snapshot> {
    let mpc = Arc::new(Mpc::load(mpc_path)?);

    let mut vendors = HashMap::new();
    for pth in utsf_paths(dir)? {
        let file = UtsfFile::load(&pth)?;
        vendors.insert(file.meta.id.clone(), VendorCoverage::new(file));
    }
    eprintln!("{} utsf files indexed from {}", vendors.len(), dir.display());

    Ok(Snapshot { mpc, vendors })
}
