use kline_core::{Interval, Job, JobSettings, Kline, SeriesStatus, SettingsPatch};

fn init_logging() {
    kline_logging::initialize_for_tests();
}

fn batch(len: usize) -> Vec<Kline> {
    (0..len as i64)
        .map(|i| Kline {
            open_time: i * 60_000,
            open: "1.0".into(),
            high: "2.0".into(),
            low: "0.5".into(),
            close: "1.5".into(),
            volume: "10".into(),
            close_time: i * 60_000 + 59_999,
            quote_volume: None,
            trades: Some(3),
            taker_buy_base_volume: None,
            taker_buy_quote_volume: None,
        })
        .collect()
}

fn new_job() -> Job {
    Job::new("job-1", "BTCUSDT", JobSettings::default(), 1_000)
}

#[test]
fn new_job_has_every_interval_pending() {
    init_logging();
    let job = new_job();

    let intervals: Vec<_> = job.tasks().map(|(interval, _)| interval).collect();
    assert_eq!(intervals, Interval::ALL.to_vec());
    assert!(job
        .tasks()
        .all(|(_, task)| task.status() == SeriesStatus::Pending && task.attempts() == 0));
    assert_eq!(job.next_unfinished(), Some(Interval::M1));
    assert!(!job.is_fully_complete());
    assert!(!job.is_partially_usable());
}

#[test]
fn full_batch_completes_without_messages() {
    let mut job = new_job();
    job.begin_attempt(Interval::M1, 2_000);
    job.complete(Interval::M1, batch(1000), 1000, 3_000);

    let task = job.task(Interval::M1).unwrap();
    assert_eq!(task.status(), SeriesStatus::Done);
    assert_eq!(task.count(), Some(1000));
    assert_eq!(task.error(), None);
    assert_eq!(task.note(), None);
    assert_eq!(job.data(Interval::M1).map(<[Kline]>::len), Some(1000));
    assert_eq!(job.updated_at_ms, 3_000);
    assert!(job.is_partially_usable());
    assert_eq!(job.next_unfinished(), Some(Interval::M5));
}

#[test]
fn short_batch_is_done_with_advisory_note() {
    let mut job = new_job();
    job.begin_attempt(Interval::M1, 2_000);
    job.complete(Interval::M1, batch(500), 1000, 3_000);

    let task = job.task(Interval::M1).unwrap();
    assert_eq!(task.status(), SeriesStatus::Done);
    assert_eq!(task.count(), Some(500));
    assert_eq!(task.error(), None);
    assert_eq!(task.note(), Some("received 500 of 1000 requested records"));
    assert_eq!(task.attempts(), 0);
}

#[test]
fn fully_complete_iff_every_series_terminal() {
    let mut job = new_job();
    for (i, interval) in Interval::ALL.into_iter().enumerate() {
        assert!(!job.is_fully_complete());
        job.begin_attempt(interval, 0);
        if i % 2 == 0 {
            job.complete(interval, batch(1), 1, 0);
        } else {
            job.fail(interval, "http status 403", false, 0);
        }
    }
    assert!(job.is_fully_complete());
    assert_eq!(job.next_unfinished(), None);

    let progress = job.progress();
    assert_eq!(progress.total, Interval::ALL.len());
    assert_eq!(progress.done, 5);
    assert_eq!(progress.failed, 4);
    assert_eq!(progress.remaining(), 0);
}

#[test]
fn retrying_series_stays_unfinished_and_counts_attempts() {
    let mut job = new_job();
    job.begin_attempt(Interval::M1, 0);
    job.schedule_retry(Interval::M1, 5_000, "http status 429", 0);
    job.begin_attempt(Interval::M1, 5_000);
    job.schedule_retry(Interval::M1, 9_000, "timeout", 5_000);

    let task = job.task(Interval::M1).unwrap();
    assert_eq!(task.status(), SeriesStatus::Retrying);
    assert_eq!(task.attempts(), 2);
    assert_eq!(task.retry_at_ms(), Some(9_000));
    assert_eq!(task.error(), Some("timeout"));
    assert_eq!(job.next_unfinished(), Some(Interval::M1));
}

#[test]
fn log_is_bounded_and_chronological() {
    let mut job = new_job();
    job.set_log_capacity(5);
    for i in 0..12 {
        job.push_log(i, format!("line {i}"));
    }
    assert_eq!(job.log_len(), 5);
    let at: Vec<_> = job.log().map(|entry| entry.at_ms).collect();
    assert_eq!(at, vec![7, 8, 9, 10, 11]);
    assert_eq!(job.log().last().unwrap().message, "line 11");
}

#[test]
fn settings_patch_leaves_progress_untouched() {
    let mut job = new_job();
    job.begin_attempt(Interval::M1, 0);
    job.complete(Interval::M1, batch(3), 1000, 0);
    let before: Vec<_> = job.tasks().map(|(_, task)| task.clone()).collect();

    job.apply_settings(
        SettingsPatch {
            proxy_base_url: Some(" https://proxy.example.com/ ".into()),
            auto_resume: None,
        },
        42,
    );

    assert_eq!(job.settings.proxy_base_url, "https://proxy.example.com/");
    assert!(job.settings.auto_resume);
    assert_eq!(job.updated_at_ms, 42);
    let after: Vec<_> = job.tasks().map(|(_, task)| task.clone()).collect();
    assert_eq!(before, after);
}

#[test]
fn generated_ids_are_distinct() {
    let a = Job::generate_id(1);
    let b = Job::generate_id(1);
    assert!(a.starts_with("job-1-"));
    assert_ne!(a, b);
}
