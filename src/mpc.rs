use crate::core::*;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// One master catalog entry.
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PinRecord {
    pub pincode: String,
    pub zone: String,
    pub city: String,
    pub state: String,
}

/// Master Pincode Catalog: the canonical pincode to zone mapping.
///
/// Immutable for the life of a process. A reload builds a new instance.
#[derive(Debug, Default)]
pub struct Mpc {
    recs: HashMap<u32, PinRecord>,
    zones: BTreeMap<String, BTreeSet<u32>>,
}

impl Mpc {
    /// Loads the catalog from a headered CSV file: `pincode,zone,city,state`.
    ///
    /// Zones are uppercased on load. Rows with an invalid pincode are skipped
    /// with a warning. Duplicate pincodes keep the last row.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Mpc> {
        let path = path.as_ref();
        let mut rdr = csv::Reader::from_path(path)
            .map_err(|e| anyhow!("open master pincode catalog {}: {}", path.display(), e))?;

        let mut mpc = Mpc::default();
        for rec in rdr.deserialize() {
            let mut rec: PinRecord = rec?;
            let Some(pin) = parse_pincode(&rec.pincode) else {
                eprintln!("skipping invalid pincode row: {:?}", rec.pincode);
                continue;
            };
            rec.zone = norm_zone(&rec.zone);
            if rec.zone.is_empty() {
                eprintln!("skipping pincode {} with empty zone", pin);
                continue;
            }

            if let Some(prev) = mpc.recs.insert(pin, rec.clone()) {
                eprintln!("duplicate pincode {}: replacing zone {}", pin, prev.zone);
                if let Some(set) = mpc.zones.get_mut(&prev.zone) {
                    set.remove(&pin);
                }
            }
            mpc.zones.entry(rec.zone).or_default().insert(pin);
        }
        mpc.zones.retain(|_, set| !set.is_empty());

        eprintln!(
            "{} pincodes across {} zones from {}",
            numfmt(mpc.recs.len()),
            mpc.zones.len(),
            path.display()
        );
        Ok(mpc)
    }

    pub fn contains(&self, pincode: u32) -> bool {
        self.recs.contains_key(&pincode)
    }

    pub fn zone_of(&self, pincode: u32) -> Option<&str> {
        self.recs.get(&pincode).map(|r| r.zone.as_str())
    }

    pub fn record(&self, pincode: u32) -> Option<&PinRecord> {
        self.recs.get(&pincode)
    }

    /// Ordered set of master pincodes for a zone.
    pub fn pincodes_of_zone(&self, zone: &str) -> Option<&BTreeSet<u32>> {
        self.zones.get(&norm_zone(zone))
    }

    pub fn size(&self) -> usize {
        self.recs.len()
    }

    /// The set of distinct zones, ordered.
    pub fn zones(&self) -> impl Iterator<Item = &str> {
        self.zones.keys().map(|z| z.as_str())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use std::path::PathBuf;

    /// Writes a small master catalog CSV and loads it.
    pub fn fixture_mpc(name: &str, rows: &[(&str, &str)]) -> (Mpc, PathBuf) {
        let pth = env::temp_dir().join(format!("fqc_mpc_{}.csv", name));
        let mut body = String::from("pincode,zone,city,state\n");
        for (pin, zone) in rows {
            body.push_str(&format!("{},{},City,State\n", pin, zone));
        }
        fs::write(&pth, body).unwrap();
        (Mpc::load(&pth).unwrap(), pth)
    }

    #[test]
    fn test_load_and_lookup() {
        let (mpc, pth) = fixture_mpc(
            "load",
            &[
                ("110001", "n1"),
                ("110002", "N1"),
                ("560001", "s2"),
            ],
        );
        assert_eq!(mpc.size(), 3);
        assert_eq!(mpc.zone_of(110001), Some("N1"));
        assert_eq!(mpc.zone_of(560001), Some("S2"));
        assert_eq!(mpc.zone_of(999999), None);
        assert!(mpc.contains(110002));

        let n1 = mpc.pincodes_of_zone("n1").unwrap();
        assert_eq!(n1.iter().copied().collect::<Vec<_>>(), vec![110001, 110002]);

        let zones: Vec<&str> = mpc.zones().collect();
        assert_eq!(zones, vec!["N1", "S2"]);

        fs::remove_file(pth).unwrap();
    }

    #[test]
    fn test_invalid_rows_skipped() {
        let (mpc, pth) = fixture_mpc(
            "invalid",
            &[("110001", "N1"), ("abc123", "N1"), ("05000", "N1")],
        );
        assert_eq!(mpc.size(), 1);
        fs::remove_file(pth).unwrap();
    }

    #[test]
    fn test_duplicate_last_wins() {
        let (mpc, pth) = fixture_mpc("dup", &[("110001", "N1"), ("110001", "W3")]);
        assert_eq!(mpc.size(), 1);
        assert_eq!(mpc.zone_of(110001), Some("W3"));
        // The stale zone set must not linger.
        assert!(mpc.pincodes_of_zone("N1").is_none());
        fs::remove_file(pth).unwrap();
    }
}
