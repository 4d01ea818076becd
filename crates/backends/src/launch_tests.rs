use dispatch::{Owner, RegistrationScope};

use super::*;
use crate::testing::request;

#[test]
fn registration_urls_follow_the_scope() {
    let owner = Owner::new("acme").unwrap();
    let org = RegistrationScope::Organization { owner };
    assert_eq!(
        registration_url("https://ghe.example.com/", &org),
        "https://ghe.example.com/acme"
    );
    assert_eq!(
        registration_url(DEFAULT_SERVER_URL, &request().scope),
        "https://github.com/acme/svc"
    );
}

#[test]
fn launch_request_carries_registration_details() {
    let launch = LaunchRequest::new(&request(), DEFAULT_SERVER_URL);
    assert_eq!(launch.runner_name, "acme-svc-42");
    assert_eq!(launch.runner_token, "reg-token");
    assert_eq!(launch.repository, "acme/svc");
    assert_eq!(launch.job_id, 42);

    let env = launch.env();
    let get = |key: &str| env.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str());
    assert_eq!(get("RUNNER_LABELS"), Some("linux,ephemera:started:1700000000"));
    assert_eq!(get("RUNNER_URL"), Some("https://github.com/acme/svc"));
    assert_eq!(get("RUNNER_JOB_ID"), Some("42"));
}

#[test]
fn launch_request_serializes_in_camel_case() {
    let value = serde_json::to_value(LaunchRequest::new(&request(), DEFAULT_SERVER_URL)).unwrap();
    assert_eq!(value["runnerName"], "acme-svc-42");
    assert_eq!(value["registrationUrl"], "https://github.com/acme/svc");
    assert_eq!(value["runnerLabels"][0], "linux");
}
