#![allow(unused)]

#[macro_use]
extern crate lazy_static;

use anyhow::{anyhow, Result};
mod calc;
mod catalog;
mod codec;
mod core;
mod dispatch;
mod manager;
mod models;
mod mpc;
mod service;
mod utsf;
mod worker;
use crate::catalog::*;
use crate::core::*;
use crate::dispatch::*;
use crate::manager::*;
use crate::models::*;
use crate::mpc::Mpc;
use crate::service::*;
use std::process::exit;
use std::sync::Arc;

#[tokio::main]
pub async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let code = run(&args).await?;
    exit(code);
}

async fn run(args: &[String]) -> Result<i32> {
    match args.first().map(String::as_str) {
        Some("audit") if args.len() == 1 => {
            let mgr = manager()?;
            mgr.audit()?;
            Ok(0)
        }
        Some("repair") if args.len() == 2 => {
            let mgr = manager()?;
            let vendor_id = &args[1];
            if !mgr.exists(vendor_id) {
                eprintln!("vendor {} not found in {}", vendor_id, CFG.utsf_dir);
                return Ok(2);
            }
            let outcome = mgr.repair(vendor_id, "cli")?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(0)
        }
        Some("repair-all") if args.len() == 1 => {
            let mgr = manager()?;
            mgr.repair_all("cli")?;
            Ok(0)
        }
        Some("compare") if args.len() == 2 => {
            let mgr = manager()?;
            let vendor_id = &args[1];
            if !mgr.exists(vendor_id) {
                eprintln!("vendor {} not found in {}", vendor_id, CFG.utsf_dir);
                return Ok(2);
            }
            let report = mgr.compare(vendor_id)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(0)
        }
        Some("rollback") if args.len() == 3 => {
            let mgr = manager()?;
            let vendor_id = &args[1];
            if !mgr.exists(vendor_id) {
                eprintln!("vendor {} not found in {}", vendor_id, CFG.utsf_dir);
                return Ok(2);
            }
            let Ok(index) = args[2].parse::<usize>() else {
                usage();
                return Ok(1);
            };
            match mgr.rollback(vendor_id, index)? {
                RollbackStatus::Applied => {
                    println!("restored {} from update {}", vendor_id, index);
                    Ok(0)
                }
                RollbackStatus::NoSnapshot => {
                    println!(
                        "update {} of {} has no snapshot; rollback recorded only",
                        index, vendor_id
                    );
                    Ok(0)
                }
                RollbackStatus::IndexOutOfBounds => {
                    eprintln!("update index {} out of bounds for {}", index, vendor_id);
                    Ok(3)
                }
            }
        }
        Some("quote") if args.len() == 2 => {
            let req: QuoteRequest = read_from_file(&args[1])?;

            let svc = UtsfService::load(&CFG.utsf_dir, &CFG.mpc_path).await?;
            let snap = svc.snapshot();
            let catalog = VendorCatalog::load(&CFG.vendors_path).await?;

            let dispatcher = Dispatcher::from_cfg(&CFG);
            let res = dispatcher.dispatch(&catalog, &snap, &req)?;
            println!("{}", serde_json::to_string_pretty(&res)?);
            Ok(0)
        }
        _ => {
            usage();
            Ok(1)
        }
    }
}

fn manager() -> Result<Manager> {
    let mpc = Arc::new(Mpc::load(&CFG.mpc_path)?);
    Ok(Manager::new(&CFG.utsf_dir, mpc))
}

fn usage() {
    eprintln!("usage: fqc <command>");
    eprintln!("  audit                         scan all vendor files and report");
    eprintln!("  repair <vendorId>             repair one vendor file");
    eprintln!("  repair-all                    repair every vendor file");
    eprintln!("  compare <vendorId>            per-zone master/served/missing diagnostic");
    eprintln!("  rollback <vendorId> <index>   restore a file from an update snapshot");
    eprintln!("  quote <request.json>          price one route across all vendors");
}
