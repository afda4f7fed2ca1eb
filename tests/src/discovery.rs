use std::collections::BTreeSet;

use vortex_common::network::address_space::AddressSpace;
use vortex_plugins::AnalyzerRegistry;

use crate::util::{BannerService, FIXTURE_BANNER, closed_port, fixture_options, loopback_coordinator};

#[tokio::test]
async fn loopback_block_finds_the_fixture() {
    let service = BannerService::start().await.unwrap();
    let closed = closed_port().await.unwrap();
    let space = AddressSpace::from_cidr("127.0.0.0/30").unwrap();
    let options = fixture_options(&[service.port(), closed], service.port());

    let sweep = loopback_coordinator().run_sweep(&space, &options).await.unwrap();

    assert_eq!(sweep.host_results.len(), space.len());
    let host = sweep.get(&service.ip()).expect("fixture host in results");
    assert!(host.alive);
    assert_eq!(host.open_ports, BTreeSet::from([service.port()]));
    assert!(!host.open_ports.contains(&closed));
    assert_eq!(host.banner(service.port()), Some(FIXTURE_BANNER));
    assert!(host.error.is_none());
}

#[tokio::test]
async fn repeated_sweeps_agree_on_open_ports() {
    let service = BannerService::start().await.unwrap();
    let space = AddressSpace::from_cidr("127.0.0.0/30").unwrap();
    let mut options = fixture_options(&[service.port()], service.port());
    options.grab_banners = false;
    let coordinator = loopback_coordinator();

    let first = coordinator.run_sweep(&space, &options).await.unwrap();
    let second = coordinator.run_sweep(&space, &options).await.unwrap();

    let open = |sweep: &vortex_common::network::sweep::SweepResult| {
        sweep
            .sorted_by_address()
            .into_iter()
            .map(|host| (host.address, host.open_ports.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(open(&first), open(&second));
}

#[tokio::test]
async fn fixture_banner_is_flagged_by_analyzers() {
    let service = BannerService::start().await.unwrap();
    let space = AddressSpace::from_cidr(&service.ip().to_string()).unwrap();
    let options = fixture_options(&[service.port()], service.port());

    let sweep = loopback_coordinator().run_sweep(&space, &options).await.unwrap();
    let findings = AnalyzerRegistry::with_defaults().analyze_sweep(&sweep);

    assert!(
        findings
            .iter()
            .any(|finding| finding.source == "version-disclosure" && finding.port == Some(service.port()))
    );
}
