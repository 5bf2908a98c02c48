use crate::calc;
use crate::models::*;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// A per-vendor failure carried across the worker boundary.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VendorError {
    pub error: bool,
    pub vendor_name: String,
    pub error_message: String,
}

/// One per-vendor outcome: a quote or a captured failure.
#[derive(Debug, Serialize, Clone)]
#[serde(untagged)]
pub enum VendorOutcome {
    Quote(Quote),
    Error(VendorError),
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub vendors_processed: usize,
    pub valid_results: usize,
    pub errors: usize,
    /// Batch wall time in milliseconds.
    pub duration: u64,
}

/// An immutable batch handed to one worker.
pub struct WorkerRequest {
    pub batch_id: usize,
    pub vendors: Vec<Vendor>,
    pub context: RouteContext,
    pub reply: Sender<WorkerResponse>,
}

pub struct WorkerResponse {
    pub batch_id: usize,
    pub results: Vec<VendorOutcome>,
    pub stats: WorkerStats,
}

/// Computes one batch. Failures never cross the boundary as panics:
/// each becomes an error record counted into the stats.
pub fn run_batch(vendors: &[Vendor], ctx: &RouteContext) -> (Vec<VendorOutcome>, WorkerStats) {
    let started = Instant::now();
    let mut results = Vec::with_capacity(vendors.len());
    let mut valid = 0usize;
    let mut errors = 0usize;

    for vendor in vendors {
        match catch_unwind(AssertUnwindSafe(|| calc::calculate(vendor, ctx))) {
            Ok(Ok(Some(quote))) => {
                valid += 1;
                results.push(VendorOutcome::Quote(quote));
            }
            // Unpriceable for this route: dropped, never reported as zero.
            Ok(Ok(None)) => {}
            Ok(Err(err)) => {
                errors += 1;
                results.push(VendorOutcome::Error(VendorError {
                    error: true,
                    vendor_name: vendor.company_name.clone(),
                    error_message: err.to_string(),
                }));
            }
            Err(_) => {
                errors += 1;
                results.push(VendorOutcome::Error(VendorError {
                    error: true,
                    vendor_name: vendor.company_name.clone(),
                    error_message: "calculator panicked".into(),
                }));
            }
        }
    }

    let stats = WorkerStats {
        vendors_processed: vendors.len(),
        valid_results: valid,
        errors,
        duration: started.elapsed().as_millis() as u64,
    };
    (results, stats)
}

/// Fixed pool of calculator threads fed over a shared channel.
///
/// Workers share no state with the dispatcher; batches travel in and
/// results travel back as messages.
pub struct WorkerPool {
    tx: Option<Sender<WorkerRequest>>,
    handles: Vec<JoinHandle<()>>,
    size: usize,
}

impl WorkerPool {
    /// Spawns the pool. A size of zero selects the available parallelism.
    pub fn new(size: usize) -> WorkerPool {
        let size = if size == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
        } else {
            size
        };

        let (tx, rx) = channel::<WorkerRequest>();
        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::with_capacity(size);
        for idx in 0..size {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("calc-{idx}"))
                .spawn(move || worker_loop(rx))
                .expect("spawn calculator worker");
            handles.push(handle);
        }

        WorkerPool {
            tx: Some(tx),
            handles,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn submit(&self, req: WorkerRequest) -> Result<()> {
        self.tx
            .as_ref()
            .ok_or_else(|| anyhow!("worker pool is shut down"))?
            .send(req)
            .map_err(|_| anyhow!("worker pool is shut down"))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel ends every worker loop.
        self.tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(rx: Arc<Mutex<Receiver<WorkerRequest>>>) {
    loop {
        let req = match rx.lock().unwrap().recv() {
            Ok(req) => req,
            Err(_) => break,
        };
        let (results, stats) = run_batch(&req.vendors, &req.context);
        // A dropped reply channel means the request moved on; discard.
        let _ = req.reply.send(WorkerResponse {
            batch_id: req.batch_id,
            results,
            stats,
        });
    }
}
