use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use colored::*;
use serde_json::json;
use tracing::Instrument;

use crate::mprint;
use crate::terminal::format::{self, Detail};
use crate::terminal::progress::SweepBar;
use crate::terminal::{colors, print};
use vortex_common::config::{Config, SweepOptions};
use vortex_common::network::address_space::AddressSpace;
use vortex_common::network::host::HostResult;
use vortex_common::network::sweep::SweepResult;
use vortex_common::{error, success, warn};
use vortex_core::{CancelToken, DiscoveryCoordinator};
use vortex_plugins::{AnalyzerRegistry, Finding};

pub async fn discover(target: &str, options: SweepOptions, cfg: &Config) -> anyhow::Result<()> {
    let space = AddressSpace::from_cidr(target)?;
    let registry = if cfg.no_findings {
        AnalyzerRegistry::new()
    } else {
        AnalyzerRegistry::with_defaults()
    };
    print_plan(&space, &options, &registry, cfg);

    let coordinator = DiscoveryCoordinator::with_system_defaults();
    let bar = Arc::new(SweepBar::new(space.len()));
    let cancel = CancelToken::new();

    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, waiting for running probes");
                cancel.cancel();
            }
        })
    };

    let progress = Arc::clone(&bar);
    let outcome = coordinator
        .sweep(&space, &options)
        .cancel_token(cancel)
        .on_result(move |host, done| progress.advance(host, done))
        .run()
        .instrument(bar.span())
        .await;
    interrupt.abort();
    drop(bar);

    let sweep = match outcome {
        Ok(sweep) => sweep,
        Err(e) => {
            let reason = e.to_string();
            match e.into_partial_result() {
                Ok(partial) => {
                    error!("{reason}, showing what finished");
                    partial
                }
                Err(e) => return Err(e).context("sweep failed"),
            }
        }
    };

    let findings: Vec<Finding> = if registry.is_empty() {
        Vec::new()
    } else {
        registry.analyze_sweep(&sweep)
    };

    if cfg.json {
        let document = json!({ "sweep": sweep, "findings": findings });
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    discovery_ends(&sweep, &findings, cfg);
    Ok(())
}

fn print_plan(space: &AddressSpace, options: &SweepOptions, registry: &AnalyzerRegistry, cfg: &Config) {
    if cfg.quiet > 0 || cfg.json {
        return;
    }
    let ports: String = options
        .ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let analyzers = if registry.is_empty() {
        "none".to_string()
    } else {
        registry.names().join(", ")
    };
    print::aligned_lines(vec![
        ("Target", space.to_string()),
        ("Addresses", space.len().to_string()),
        ("Ports", ports),
        ("Hosts at once", options.pool_concurrency.to_string()),
        ("Port timeout", humantime::format_duration(options.port_timeout).to_string()),
        ("Host budget", humantime::format_duration(options.host_timeout).to_string()),
        ("Analyzers", analyzers),
    ]);
}

fn discovery_ends(sweep: &SweepResult, findings: &[Finding], cfg: &Config) {
    let alive: Vec<&HostResult> = sweep
        .sorted_by_address()
        .into_iter()
        .filter(|host| host.alive)
        .collect();

    if alive.is_empty() {
        print::header("zero hosts detected", cfg.quiet);
        print::no_results();
        print_summary(sweep, cfg);
        return;
    }

    if cfg.quiet > 0 {
        mprint!();
    }

    print::header("network discovery", cfg.quiet);
    if cfg.quiet < 2 {
        for (idx, host) in alive.iter().enumerate() {
            print_host_tree(host, idx, findings);
            if idx + 1 != alive.len() {
                mprint!();
            }
        }
    }
    print_summary(sweep, cfg);
}

fn print_summary(sweep: &SweepResult, cfg: &Config) {
    let summary = &sweep.summary;
    let active_hosts: ColoredString = format!("{} active hosts", summary.alive).bold().green();
    let total_time: ColoredString = format!("{:.2}s", sweep.duration().as_secs_f64()).bold().yellow();
    let output: String = format!(
        "{}",
        format!("Discovery Complete: {active_hosts} identified in {total_time}")
            .color(colors::TEXT_DEFAULT)
    );

    match cfg.quiet {
        0 => {
            print::fat_separator();
            print::centerln(&output);
        }
        _ => {
            mprint!();
            success!("{}", output);
        }
    }

    if summary.timed_out > 0 {
        warn!("{} of {} addresses were not probed before the sweep ended", summary.timed_out, summary.total);
    }
}

fn print_host_tree(host: &HostResult, idx: usize, findings: &[Finding]) {
    print::tree_head(idx, &host.display_name());

    let mut details: Vec<Detail> = vec![format::ip_to_detail(&host.address)];
    details.extend(format::ports_to_detail(&host.open_ports));
    details.extend(format::filtered_to_detail(&host.filtered_ports));
    details.extend(format::banners_to_details(&host.banners));
    details.extend(
        findings
            .iter()
            .filter(|finding| finding.address == host.address)
            .map(format::finding_to_detail),
    );
    if let Some(error) = &host.error {
        details.push(format::error_to_detail(error));
    }
    if host.probe_duration > Duration::ZERO {
        details.push(format::duration_to_detail(host.probe_duration));
    }

    print::as_tree_one_level(details);
}
