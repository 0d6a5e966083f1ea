#![forbid(unsafe_code)]

use std::time::Duration;

use clap::Parser;
use scorecard_probe_contracts::Validate;
use scorecard_probe_engines::RaceConfig;
use scorecard_probe_tools::cli::{AsyncOrderArgs, VerifySyncArgs};

#[test]
fn at_cli_01_async_order_defaults_match_staging_fixture() {
    let args = AsyncOrderArgs::try_parse_from(["test_async_order"]).unwrap();
    let config = args.race_config();
    assert_eq!(config, RaceConfig::staging_defaults());
    assert!(config.validate().is_ok());
    assert_eq!(args.columnar_database(), "cox_sales");
}

#[test]
fn at_cli_02_async_order_knobs_and_fixture_overrides() {
    let args = AsyncOrderArgs::try_parse_from([
        "test_async_order",
        "--iterations",
        "1",
        "--wait",
        "5",
        "--api-delay",
        "0",
        "--customer",
        "acme-corp",
        "--profile",
        "us-east",
        "--criterion-1",
        "a",
        "--criterion-2",
        "b",
    ])
    .unwrap();
    let config = args.race_config();
    assert_eq!(config.iterations, 1);
    assert_eq!(config.wait, Duration::from_secs(5));
    assert_eq!(config.api_delay, Duration::ZERO);
    assert_eq!(config.fixture.parent(), "customers/acme-corp/profiles/us-east");
    assert_eq!(config.fixture.criterion_2, "b");
    assert_eq!(args.columnar_database(), "acme_corp_us_east");
}

#[test]
fn at_cli_03_zero_iterations_is_rejected() {
    assert!(AsyncOrderArgs::try_parse_from(["test_async_order", "--iterations", "0"]).is_err());
    assert!(AsyncOrderArgs::try_parse_from(["test_async_order", "--wait", "soon"]).is_err());
}

#[test]
fn at_cli_04_verify_sync_requires_name() {
    assert!(VerifySyncArgs::try_parse_from(["verify_sync"]).is_err());

    let args = VerifySyncArgs::try_parse_from([
        "verify_sync",
        "--name",
        "customers/cox/profiles/sales/scorecards/019bd22d",
        "--ch",
        "ignored",
    ])
    .unwrap();
    assert_eq!(args.name, "customers/cox/profiles/sales/scorecards/019bd22d");
    assert_eq!(args.call_timeout(), Duration::from_secs(30));
}

#[test]
fn at_cli_05_blank_pg_falls_back_to_credential_command() {
    let blank = VerifySyncArgs::try_parse_from(["verify_sync", "--name", "x", "--pg", "  "]).unwrap();
    assert_eq!(blank.explicit_pg(), None);

    let given = VerifySyncArgs::try_parse_from([
        "verify_sync",
        "--name",
        "x",
        "--pg",
        "host=db user=ro password=secret",
    ])
    .unwrap();
    assert_eq!(given.explicit_pg(), Some("host=db user=ro password=secret"));
}
