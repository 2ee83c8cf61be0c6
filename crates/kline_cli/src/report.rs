use chrono::{DateTime, Utc};
use kline_core::{Job, SeriesStatus, SeriesTask};

fn status_label(status: SeriesStatus) -> &'static str {
    match status {
        SeriesStatus::Pending => "pending",
        SeriesStatus::Running => "running",
        SeriesStatus::Retrying => "retrying",
        SeriesStatus::Done => "done",
        SeriesStatus::Error => "error",
    }
}

fn format_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// One line per observed snapshot.
pub fn summary_line(job: &Job) -> String {
    let progress = job.progress();
    let series = job
        .tasks()
        .map(|(interval, task)| format!("{interval}:{}", status_label(task.status())))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "{} {}/{} done, {} failed | {}",
        job.symbol, progress.done, progress.total, progress.failed, series
    )
}

fn task_detail(task: &SeriesTask) -> String {
    let mut detail = status_label(task.status()).to_string();
    if let Some(count) = task.count() {
        detail.push_str(&format!(", {count} records"));
    }
    if task.attempts() > 0 {
        detail.push_str(&format!(", {} failed attempts", task.attempts()));
    }
    if let Some(at) = task.retry_at_ms() {
        detail.push_str(&format!(", retry at {}", format_ms(at)));
    }
    if let Some(note) = task.note() {
        detail.push_str(&format!(" ({note})"));
    }
    if let Some(error) = task.error() {
        detail.push_str(&format!(": {error}"));
    }
    detail
}

/// Multi-line report for the `status` command.
pub fn status_report(job: &Job) -> Vec<String> {
    let mut lines = vec![
        format!("job {} for {}", job.id, job.symbol),
        format!(
            "created {}, updated {}",
            format_ms(job.created_at_ms),
            format_ms(job.updated_at_ms)
        ),
        format!(
            "proxy: {}, auto-resume: {}",
            if job.settings.proxy_base_url.is_empty() {
                "(default)"
            } else {
                job.settings.proxy_base_url.as_str()
            },
            job.settings.auto_resume
        ),
    ];
    lines.extend(
        job.tasks()
            .map(|(interval, task)| format!("  {interval:>4}  {}", task_detail(task))),
    );
    if let Some(last) = job.log().last() {
        lines.push(format!("last: {}", last.message));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use kline_core::{Interval, JobSettings};
    use pretty_assertions::assert_eq;

    #[test]
    fn summary_lists_every_series() {
        let mut job = Job::new("job-1", "BTCUSDT", JobSettings::default(), 0);
        job.complete(Interval::M1, Vec::new(), 1000, 10);
        job.fail(Interval::M5, "http status 403", false, 20);

        assert_eq!(
            summary_line(&job),
            "BTCUSDT 1/9 done, 1 failed | 1m:done 5m:error 15m:pending 30m:pending \
             1h:pending 4h:pending 1d:pending 1w:pending 1M:pending"
        );
    }

    #[test]
    fn status_report_shows_task_details() {
        let mut job = Job::new("job-1", "BTCUSDT", JobSettings::default(), 0);
        job.complete(Interval::M1, Vec::new(), 1000, 10);
        job.push_log(10, "1m: 0 records (received 0 of 1000 requested records)");

        let report = status_report(&job);
        assert_eq!(report[0], "job job-1 for BTCUSDT");
        assert_eq!(report[2], "proxy: (default), auto-resume: true");
        assert_eq!(
            report[3],
            "    1m  done, 0 records (received 0 of 1000 requested records)"
        );
        assert_eq!(
            report.last().unwrap(),
            "last: 1m: 0 records (received 0 of 1000 requested records)"
        );
    }
}
