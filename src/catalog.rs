use crate::core::*;
use crate::models::*;
use crate::service::Snapshot;
use anyhow::{Context, Result};
use std::path::Path;

/// The vendor roster with pricing tables, fetched per request.
#[derive(Debug, Default, Clone)]
pub struct VendorCatalog {
    pub vendors: Vec<Vendor>,
}

impl VendorCatalog {
    /// Reads the roster from a JSON array on disk.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<VendorCatalog> {
        let path = path.as_ref();
        let vendors: Vec<Vendor> = read_from_file(path)
            .with_context(|| format!("load vendor catalog {}", path.display()))?;
        eprintln!("{} vendors loaded from {}", vendors.len(), path.display());
        Ok(VendorCatalog { vendors })
    }

    /// Vendors able to serve a route, enriched with their effective zones.
    ///
    /// Keeps only vendors for whom both ends are serviceable and both zones
    /// resolve. Hidden vendors stay in; the dispatcher suppresses them from
    /// the ranked list.
    pub fn candidates_for_route(&self, snap: &Snapshot, from: u32, to: u32) -> Vec<Vendor> {
        let mut candidates = Vec::new();
        for vendor in &self.vendors {
            if !snap.is_serviceable(&vendor.id, from) || !snap.is_serviceable(&vendor.id, to) {
                continue;
            }

            let origin_zone = vendor
                .effective_origin_zone
                .clone()
                .filter(|z| !z.trim().is_empty())
                .or_else(|| snap.effective_zone(&vendor.id, from));
            let dest_zone = vendor
                .effective_dest_zone
                .clone()
                .filter(|z| !z.trim().is_empty())
                .or_else(|| snap.effective_zone(&vendor.id, to));
            let (Some(origin_zone), Some(dest_zone)) = (origin_zone, dest_zone) else {
                eprintln!(
                    "vendor {} serves the route but has no resolvable zones; dropped",
                    vendor.company_name
                );
                continue;
            };

            let mut vendor = vendor.clone();
            vendor.effective_origin_zone = Some(norm_zone(&origin_zone));
            vendor.effective_dest_zone = Some(norm_zone(&dest_zone));
            vendor.service_pincode_count = Some(snap.serviceable_count(&vendor.id));
            candidates.push(vendor);
        }
        eprintln!(
            "{} of {} vendors serve {} -> {}",
            candidates.len(),
            self.vendors.len(),
            from,
            to
        );
        candidates
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::service::tests::fixture_service;
    use crate::utsf::tests::fixture_file;
    use crate::utsf::{FullZoneCov, ZoneCoverage};
    use std::fs;

    fn utsf_full(id: &str, zones: &[&str]) -> crate::utsf::UtsfFile {
        let mut file = fixture_file(id, id);
        for zone in zones {
            file.serviceability.insert(
                zone.to_string(),
                ZoneCoverage::FullZone(FullZoneCov::default()),
            );
        }
        file
    }

    #[tokio::test]
    async fn test_candidates_filtered_and_enriched() {
        // v1 covers both ends, v2 only the origin zone.
        let (svc, dir, mpc_pth) = fixture_service(
            "catalog",
            &[("110001", "N1"), ("560001", "S2")],
            vec![utsf_full("v1", &["N1", "S2"]), utsf_full("v2", &["N1"])],
        )
        .await;
        let snap = svc.snapshot();

        let catalog = VendorCatalog {
            vendors: vec![
                Vendor {
                    id: "v1".into(),
                    company_name: "Acme Logistics".into(),
                    ..Default::default()
                },
                Vendor {
                    id: "v2".into(),
                    company_name: "Beta Freight".into(),
                    ..Default::default()
                },
                Vendor {
                    id: "ghost".into(),
                    company_name: "No Coverage".into(),
                    ..Default::default()
                },
            ],
        };

        let candidates = catalog.candidates_for_route(&snap, 110001, 560001);
        assert_eq!(candidates.len(), 1);
        let v1 = &candidates[0];
        assert_eq!(v1.id, "v1");
        assert_eq!(v1.effective_origin_zone.as_deref(), Some("N1"));
        assert_eq!(v1.effective_dest_zone.as_deref(), Some("S2"));
        assert_eq!(v1.service_pincode_count, Some(2));

        fs::remove_dir_all(dir).unwrap();
        fs::remove_file(mpc_pth).unwrap();
    }

    #[tokio::test]
    async fn test_preset_zones_kept() {
        let (svc, dir, mpc_pth) = fixture_service(
            "preset",
            &[("110001", "N1"), ("560001", "S2")],
            vec![utsf_full("v1", &["N1", "S2"])],
        )
        .await;
        let snap = svc.snapshot();

        let catalog = VendorCatalog {
            vendors: vec![Vendor {
                id: "v1".into(),
                company_name: "Acme Logistics".into(),
                effective_origin_zone: Some("x9".into()),
                ..Default::default()
            }],
        };

        // A zone pinned on the vendor record wins over the master zone.
        let candidates = catalog.candidates_for_route(&snap, 110001, 560001);
        assert_eq!(candidates[0].effective_origin_zone.as_deref(), Some("X9"));
        assert_eq!(candidates[0].effective_dest_zone.as_deref(), Some("S2"));

        fs::remove_dir_all(dir).unwrap();
        fs::remove_file(mpc_pth).unwrap();
    }
}
