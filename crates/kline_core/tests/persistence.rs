use kline_core::{Interval, Job, JobSettings, SeriesStatus};
use pretty_assertions::assert_eq;

#[test]
fn snapshot_survives_json_round_trip() {
    let mut job = Job::new("job-7", "ETHUSDT", JobSettings::default(), 10);
    job.begin_attempt(Interval::M5, 11);
    job.schedule_retry(Interval::M5, 5_011, "http status 429", 11);
    job.push_log(11, "5m: retrying in 5.0s");

    let json = serde_json::to_string(&job).unwrap();
    assert!(json.contains("\"retryAtMs\":5011"));
    assert!(json.contains("\"5m\""));

    let restored: Job = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, job);
}

#[test]
fn older_snapshot_missing_optional_fields_is_filled_in() {
    // Written by a version that only knew three intervals and had no settings.
    let json = r#"{
        "id": "job-old",
        "symbol": "BTCUSDT",
        "tasks": {
            "1m": { "status": "done", "attempts": 1, "count": 1000 },
            "5m": { "status": "retrying", "attempts": 2, "retryAtMs": 99 },
            "15m": { "status": "pending", "retryAtMs": 12 }
        }
    }"#;

    let mut job: Job = serde_json::from_str(json).unwrap();
    job.normalize();

    assert!(job.settings.auto_resume);
    assert_eq!(job.settings.proxy_base_url, "");
    assert_eq!(job.tasks().count(), Interval::ALL.len());
    assert_eq!(job.task(Interval::M1).unwrap().status(), SeriesStatus::Done);
    assert_eq!(job.task(Interval::M5).unwrap().retry_at_ms(), Some(99));
    assert_eq!(job.task(Interval::M15).unwrap().retry_at_ms(), None);
    assert_eq!(job.task(Interval::D1).unwrap().status(), SeriesStatus::Pending);
    assert_eq!(job.log_len(), 0);
    assert_eq!(job.next_unfinished(), Some(Interval::M5));
}
