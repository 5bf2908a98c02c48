use crate::catalog::*;
use crate::core::*;
use crate::models::*;
use crate::service::Snapshot;
use crate::worker::*;
use anyhow::{anyhow, Result};
use itertools::Itertools;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStatus {
    #[serde(rename = "OK")]
    Ok,
    /// The deadline expired; the quote list holds whatever completed.
    #[serde(rename = "TIMEOUT")]
    Timeout,
}

#[derive(Debug, Default, Serialize, Clone, Copy)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
    pub candidates: usize,
    pub batches: usize,
    pub vendors_processed: usize,
    pub valid_results: usize,
    pub errors: usize,
    pub timed_out_batches: usize,
    pub duration_ms: u64,
}

/// The assembled answer to one quote request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub status: QuoteStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Ranked quotes, hidden vendors suppressed.
    pub quotes: Vec<Quote>,
    /// Quotes for hidden vendors, available on request.
    pub hidden: Vec<Quote>,
    pub errors: Vec<VendorError>,
    pub stats: DispatchStats,
}

/// Fans a request out over the worker pool and assembles the ranked answer.
pub struct Dispatcher {
    pool: WorkerPool,
    batch_min: usize,
    deadline: Duration,
}

impl Dispatcher {
    pub fn new(pool: WorkerPool, batch_min: usize, deadline: Duration) -> Dispatcher {
        Dispatcher {
            pool,
            batch_min: batch_min.max(1),
            deadline,
        }
    }

    pub fn from_cfg(cfg: &Cfg) -> Dispatcher {
        Dispatcher::new(
            WorkerPool::new(cfg.worker_count),
            cfg.batch_min,
            Duration::from_millis(cfg.deadline_ms),
        )
    }

    /// Runs one request: candidates, fan out, fan in, filter, rank, tier.
    pub fn dispatch(
        &self,
        catalog: &VendorCatalog,
        snap: &Snapshot,
        req: &QuoteRequest,
    ) -> Result<QuoteResponse> {
        let started = Instant::now();

        let from = parse_pincode(&req.from_pincode)
            .ok_or_else(|| anyhow!("invalid fromPincode: {:?}", req.from_pincode))?;
        let to = parse_pincode(&req.to_pincode)
            .ok_or_else(|| anyhow!("invalid toPincode: {:?}", req.to_pincode))?;

        let ctx = RouteContext {
            from_pincode: from,
            to_pincode: to,
            from_zone: snap.mpc.zone_of(from).unwrap_or_default().to_string(),
            to_zone: snap.mpc.zone_of(to).unwrap_or_default().to_string(),
            distance_km: req.distance_km,
            est_time: req.est_time.clone(),
            actual_weight: req.actual_weight,
            shipment_details: req.shipment_details.clone(),
            length: req.length,
            width: req.width,
            height: req.height,
            noofboxes: req.noofboxes,
            invoice_value: req.invoice_value,
            customer_id: req.customer_id.clone(),
        };

        let candidates = catalog.candidates_for_route(snap, from, to);
        if candidates.is_empty() {
            return Ok(QuoteResponse {
                status: QuoteStatus::Ok,
                note: Some(format!("no vendor serves {} -> {}", from, to)),
                quotes: Vec::new(),
                hidden: Vec::new(),
                errors: Vec::new(),
                stats: DispatchStats {
                    duration_ms: started.elapsed().as_millis() as u64,
                    ..Default::default()
                },
            });
        }

        let candidate_count = candidates.len();
        let batches = partition(candidates, self.pool.size(), self.batch_min);
        let batch_count = batches.len();

        let (reply, responses) = channel();
        for (batch_id, vendors) in batches.into_iter().enumerate() {
            self.pool.submit(WorkerRequest {
                batch_id,
                vendors,
                context: ctx.clone(),
                reply: reply.clone(),
            })?;
        }
        drop(reply);

        let (collected, timed_out) = fan_in(responses, batch_count, started + self.deadline);
        let received = collected.len();

        let mut quotes = Vec::new();
        let mut hidden = Vec::new();
        let mut errors = Vec::new();
        let mut stats = DispatchStats {
            candidates: candidate_count,
            batches: batch_count,
            timed_out_batches: batch_count - received,
            ..Default::default()
        };
        for response in collected {
            stats.vendors_processed += response.stats.vendors_processed;
            stats.valid_results += response.stats.valid_results;
            stats.errors += response.stats.errors;
            for outcome in response.results {
                match outcome {
                    VendorOutcome::Quote(q) if q.is_hidden => hidden.push(q),
                    VendorOutcome::Quote(q) => quotes.push(q),
                    VendorOutcome::Error(e) => errors.push(e),
                }
            }
        }

        if timed_out && quotes.is_empty() && hidden.is_empty() {
            return Err(anyhow!(
                "TIMEOUT: no batch completed within {:?}",
                self.deadline
            ));
        }

        rank(&mut quotes);
        rank(&mut hidden);
        annotate_tiers(&mut quotes);
        stats.duration_ms = started.elapsed().as_millis() as u64;

        Ok(QuoteResponse {
            status: if timed_out {
                QuoteStatus::Timeout
            } else {
                QuoteStatus::Ok
            },
            note: None,
            quotes,
            hidden,
            errors,
            stats,
        })
    }
}

/// Splits candidates into near-equal batches.
///
/// Uses min(workers, ceil(n / batch_min)) batches so small requests do not
/// shard into trivial slices.
pub fn partition(vendors: Vec<Vendor>, workers: usize, batch_min: usize) -> Vec<Vec<Vendor>> {
    let n = vendors.len();
    if n == 0 {
        return Vec::new();
    }
    let batch_min = batch_min.max(1);
    let batches = workers.clamp(1, n.div_ceil(batch_min));
    let chunk = n.div_ceil(batches);

    let chunks = vendors.into_iter().chunks(chunk);
    chunks.into_iter().map(|c| c.collect()).collect()
}

/// Collects batch responses until all arrive or the deadline passes.
///
/// Late responses are discarded when the receiver drops.
pub fn fan_in(
    rx: Receiver<WorkerResponse>,
    expected: usize,
    deadline_at: Instant,
) -> (Vec<WorkerResponse>, bool) {
    let mut responses = Vec::with_capacity(expected);
    while responses.len() < expected {
        let now = Instant::now();
        if now >= deadline_at {
            return (responses, true);
        }
        match rx.recv_timeout(deadline_at - now) {
            Ok(r) => responses.push(r),
            Err(RecvTimeoutError::Timeout) => return (responses, true),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    (responses, false)
}

/// Ranks quotes: total ascending, then rating descending, then name.
pub fn rank(quotes: &mut [Quote]) {
    quotes.sort_by(|a, b| {
        a.total
            .cmp(&b.total)
            .then_with(|| b.rating.partial_cmp(&a.rating).unwrap_or(Ordering::Equal))
            .then_with(|| a.company_name.cmp(&b.company_name))
    });
}

/// Annotates a ranked list: first is CHEAPEST, the best-rated is TOP_RATED,
/// the rest STANDARD. The cheapest keeps its tier on overlap.
pub fn annotate_tiers(quotes: &mut [Quote]) {
    if quotes.is_empty() {
        return;
    }
    for q in quotes.iter_mut() {
        q.tier = Some(QuoteTier::Standard);
    }

    let mut top_idx = 0;
    for (idx, q) in quotes.iter().enumerate() {
        if q.rating > quotes[top_idx].rating {
            top_idx = idx;
        }
    }
    quotes[top_idx].tier = Some(QuoteTier::TopRated);
    quotes[0].tier = Some(QuoteTier::Cheapest);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::tests::vendor;
    use crate::service::tests::fixture_service;
    use crate::utsf::tests::fixture_file;
    use crate::utsf::{FullZoneCov, ZoneCoverage};
    use serde_json::json;
    use std::fs;

    fn named(n: usize) -> Vendor {
        Vendor {
            id: format!("v{n}"),
            company_name: format!("Vendor {n}"),
            ..Default::default()
        }
    }

    fn quote(name: &str, total: i64, rating: f64) -> Quote {
        Quote {
            company_name: name.into(),
            total,
            rating,
            ..Default::default()
        }
    }

    #[test]
    fn test_partition_near_equal() {
        let sizes: Vec<usize> = partition((0..10).map(named).collect(), 4, 3)
            .iter()
            .map(|b| b.len())
            .collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);

        // Small requests stay in one batch.
        let sizes: Vec<usize> = partition((0..2).map(named).collect(), 8, 25)
            .iter()
            .map(|b| b.len())
            .collect();
        assert_eq!(sizes, vec![2]);

        assert!(partition(Vec::new(), 4, 25).is_empty());
    }

    #[test]
    fn test_partition_preserves_vendors() {
        let batches = partition((0..23).map(named).collect(), 4, 3);
        let total: usize = batches.iter().map(|b| b.len()).sum();
        assert_eq!(total, 23);
        assert!(batches.len() <= 4);
    }

    #[test]
    fn test_fan_in_deadline() {
        // Nothing ever arrives; the deadline turns into a timeout.
        let (_tx, rx) = channel::<WorkerResponse>();
        let (responses, timed_out) = fan_in(rx, 2, Instant::now() + Duration::from_millis(20));
        assert!(timed_out);
        assert!(responses.is_empty());
    }

    #[test]
    fn test_rank_tie_breaks() {
        let mut quotes = vec![
            quote("Beta Freight", 500, 3.0),
            quote("Acme Logistics", 480, 2.0),
            quote("Delta Cargo", 500, 4.5),
            quote("Ceres Lines", 500, 3.0),
        ];
        rank(&mut quotes);
        let names: Vec<&str> = quotes.iter().map(|q| q.company_name.as_str()).collect();
        // Total ascending, rating descending, then name for stability.
        assert_eq!(
            names,
            vec!["Acme Logistics", "Delta Cargo", "Beta Freight", "Ceres Lines"]
        );

        // Determinism: ranking again changes nothing.
        let before = names.join(",");
        rank(&mut quotes);
        let after: Vec<&str> = quotes.iter().map(|q| q.company_name.as_str()).collect();
        assert_eq!(before, after.join(","));
        assert!(quotes.windows(2).all(|w| w[0].total <= w[1].total));
    }

    #[test]
    fn test_tier_annotation() {
        let mut quotes = vec![
            quote("Acme Logistics", 480, 2.0),
            quote("Beta Freight", 500, 4.5),
            quote("Ceres Lines", 520, 3.0),
        ];
        annotate_tiers(&mut quotes);
        assert_eq!(quotes[0].tier, Some(QuoteTier::Cheapest));
        assert_eq!(quotes[1].tier, Some(QuoteTier::TopRated));
        assert_eq!(quotes[2].tier, Some(QuoteTier::Standard));

        // When the cheapest is also the best rated, cheapest wins.
        let mut quotes = vec![quote("Acme Logistics", 480, 5.0), quote("Beta", 500, 1.0)];
        annotate_tiers(&mut quotes);
        assert_eq!(quotes[0].tier, Some(QuoteTier::Cheapest));
        assert_eq!(quotes[1].tier, Some(QuoteTier::Standard));
    }

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

    fn priced(id: &str, name: &str, rate_per_kg: f64) -> Vendor {
        let mut chart = PriceChart::new();
        chart
            .entry("N1".to_string())
            .or_default()
            .insert("S2".to_string(), json!(rate_per_kg));
        let mut v = vendor(name, chart, PriceRate::default());
        v.id = id.into();
        v
    }

    #[tokio::test]
    async fn test_dispatch_end_to_end() {
        let (svc, dir, mpc_pth) = fixture_service(
            "dispatch",
            &[("110001", "N1"), ("560001", "S2")],
            vec![
                utsf_full("v1", &["N1", "S2"]),
                utsf_full("v2", &["N1", "S2"]),
                utsf_full("v3", &["N1", "S2"]),
            ],
        )
        .await;
        let snap = svc.snapshot();

        let mut hidden_vendor = priced("v3", "Shadow Cargo", 5.0);
        hidden_vendor.is_hidden = true;
        let catalog = VendorCatalog {
            vendors: vec![
                priced("v1", "Acme Logistics", 12.0),
                priced("v2", "Beta Freight", 9.0),
                hidden_vendor,
            ],
        };

        let dispatcher = Dispatcher::new(WorkerPool::new(2), 1, Duration::from_secs(5));
        let req = QuoteRequest {
            from_pincode: "110001".into(),
            to_pincode: "560001".into(),
            actual_weight: 10.0,
            ..Default::default()
        };
        let res = dispatcher.dispatch(&catalog, &snap, &req).unwrap();

        assert_eq!(res.status, QuoteStatus::Ok);
        assert_eq!(res.stats.candidates, 3);
        assert_eq!(res.quotes.len(), 2);
        // Cheapest first: 9/kg beats 12/kg.
        assert_eq!(res.quotes[0].company_name, "Beta Freight");
        assert_eq!(res.quotes[0].total, 90);
        assert_eq!(res.quotes[0].tier, Some(QuoteTier::Cheapest));
        // Hidden vendors are computed but suppressed from the ranked list.
        assert_eq!(res.hidden.len(), 1);
        assert_eq!(res.hidden[0].company_name, "Shadow Cargo");
        assert!(res.errors.is_empty());

        fs::remove_dir_all(dir).unwrap();
        fs::remove_file(mpc_pth).unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_no_candidates_note() {
        let (svc, dir, mpc_pth) = fixture_service(
            "dispatch_empty",
            &[("110001", "N1"), ("560001", "S2")],
            vec![utsf_full("v1", &["N1"])],
        )
        .await;
        let snap = svc.snapshot();
        let catalog = VendorCatalog {
            vendors: vec![priced("v1", "Acme Logistics", 12.0)],
        };

        let dispatcher = Dispatcher::new(WorkerPool::new(1), 25, Duration::from_secs(5));
        let req = QuoteRequest {
            from_pincode: "110001".into(),
            to_pincode: "560001".into(),
            actual_weight: 10.0,
            ..Default::default()
        };
        let res = dispatcher.dispatch(&catalog, &snap, &req).unwrap();
        assert_eq!(res.status, QuoteStatus::Ok);
        assert!(res.quotes.is_empty());
        assert!(res.note.is_some());

        // Malformed input is an error, not an empty list.
        let bad = QuoteRequest {
            from_pincode: "11".into(),
            to_pincode: "560001".into(),
            ..Default::default()
        };
        assert!(dispatcher.dispatch(&catalog, &snap, &bad).is_err());

        fs::remove_dir_all(dir).unwrap();
        fs::remove_file(mpc_pth).unwrap();
    }
}
