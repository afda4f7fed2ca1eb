use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colored::*;

use crate::terminal::{colors, print};
use vortex_common::config::{Config, ScheduleFile};
use vortex_common::{error, info, success, warn};
use vortex_core::{Cadence, DiscoveryCoordinator, JobReport, JobUpdate, ScanScheduler};

pub async fn schedule(path: &Path, cfg: &Config) -> anyhow::Result<()> {
    let file = ScheduleFile::load(path)?;
    let defaults = file
        .sweep_options()
        .with_context(|| format!("in {}", path.display()))?;

    let coordinator = Arc::new(DiscoveryCoordinator::with_system_defaults());
    let scheduler = ScanScheduler::new(coordinator, defaults);

    for job in &file.jobs {
        let cadence: Cadence = job
            .cadence
            .parse()
            .with_context(|| format!("job '{}'", job.id))?;
        scheduler
            .add_job(job.id.as_str(), cadence, &job.target)
            .with_context(|| format!("job '{}'", job.id))?;
        if !job.enabled {
            scheduler.update_job(
                &job.id,
                JobUpdate {
                    enabled: Some(false),
                    ..JobUpdate::default()
                },
            )?;
        }
    }

    if scheduler.list_jobs().is_empty() {
        anyhow::bail!("{} declares no jobs", path.display());
    }
    print_jobs(&scheduler, cfg);

    let mut reports = scheduler.subscribe();
    scheduler.start();
    info!("waiting for jobs, press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            report = reports.recv() => match report {
                Some(report) => print_report(&report, cfg)?,
                None => break,
            },
        }
    }

    scheduler.stop().await;
    if scheduler.active_runs() > 0 {
        info!(
            "letting {} running sweep(s) finish, press Ctrl-C again to abandon them",
            scheduler.active_runs()
        );
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    warn!("abandoning running jobs");
                    break;
                }
                _ = scheduler.wait_idle() => break,
                Some(report) = reports.recv() => print_report(&report, cfg)?,
            }
        }
    }
    while let Ok(report) = reports.try_recv() {
        print_report(&report, cfg)?;
    }
    Ok(())
}

fn print_jobs(scheduler: &ScanScheduler, cfg: &Config) {
    if cfg.quiet > 0 || cfg.json {
        return;
    }
    print::header("scheduled jobs", cfg.quiet);
    for (idx, job) in scheduler.list_jobs().iter().enumerate() {
        print::tree_head(idx, &job.id);
        let next: String = job
            .next_run
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        let state: ColoredString = if job.enabled {
            "enabled".green()
        } else {
            "disabled".yellow()
        };
        print::as_tree_one_level(vec![
            ("Target".to_string(), job.target.color(colors::IPV4_ADDR)),
            ("Cadence".to_string(), job.cadence.to_string().color(colors::ACCENT)),
            ("Next".to_string(), next.normal()),
            ("State".to_string(), state),
        ]);
    }
}

fn print_report(report: &JobReport, cfg: &Config) -> anyhow::Result<()> {
    match &report.outcome {
        Ok(sweep) if cfg.json => {
            let line = serde_json::json!({ "job": report.job_id, "sweep": sweep });
            println!("{}", serde_json::to_string(&line)?);
        }
        Ok(sweep) => success!(
            "job {} swept {}: {} alive of {}, {} open ports in {:.2}s",
            report.job_id.color(colors::PRIMARY),
            sweep.address_space,
            sweep.summary.alive,
            sweep.summary.total,
            sweep.summary.open_ports,
            sweep.duration().as_secs_f64()
        ),
        Err(message) => error!("job {} failed: {message}", report.job_id),
    }
    Ok(())
}
