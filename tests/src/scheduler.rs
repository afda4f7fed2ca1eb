use std::sync::Arc;
use std::time::Duration;

use vortex_core::{Cadence, JobOutcome, ScanScheduler, SchedulerError};

use crate::util::{BannerService, fixture_options, loopback_coordinator};

#[tokio::test]
async fn duplicate_daily_job_is_rejected() {
    let scheduler = ScanScheduler::new(Arc::new(loopback_coordinator()), Default::default());
    let cadence: Cadence = "daily@02:00".parse().unwrap();

    scheduler.add_job("daily_scan", cadence, "10.0.0.0/24").unwrap();
    let second = scheduler.add_job("daily_scan", cadence, "10.0.0.0/24");

    assert!(matches!(second, Err(SchedulerError::DuplicateJobId(_))));
}

#[tokio::test]
async fn interval_job_sweeps_the_fixture() {
    let service = BannerService::start().await.unwrap();
    let options = fixture_options(&[service.port()], service.port());
    let scheduler = ScanScheduler::new(Arc::new(loopback_coordinator()), options);
    let mut reports = scheduler.subscribe();

    scheduler
        .add_job("loopback", Cadence::Interval(Duration::from_secs(1)), "127.0.0.1")
        .unwrap();
    scheduler.start();

    let report = tokio::time::timeout(Duration::from_secs(10), reports.recv())
        .await
        .expect("a report within ten seconds")
        .expect("report channel open");
    scheduler.stop().await;

    assert_eq!(report.job_id, "loopback");
    let sweep = report.outcome.unwrap();
    let host = sweep.get(&service.ip()).unwrap();
    assert!(host.open_ports.contains(&service.port()));

    let job = &scheduler.list_jobs()[0];
    assert!(job.runs >= 1);
    assert!(matches!(job.last_result_summary, Some(JobOutcome::Completed(_))));
}
