use chrono::Utc;

/// Returns a string representing the elapsed time since `start_time`, like
/// "1m15s" or "1.50s".
pub fn format_elapsed(start_time: chrono::DateTime<Utc>) -> String {
    let elapsed = Utc::now().signed_duration_since(start_time);
    format_time_delta(elapsed)
}

pub fn format_duration(duration: std::time::Duration) -> String {
    format_elapsed_millis(duration.as_millis() as i64)
}

fn format_time_delta(elapsed: chrono::TimeDelta) -> String {
    format_elapsed_millis(elapsed.num_milliseconds())
}

fn format_elapsed_millis(millis: i64) -> String {
    if millis < 1000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.2}s", millis as f64 / 1000.0)
    } else {
        let minutes = millis / 60_000;
        let seconds = (millis % 60_000) / 1000;
        format!("{minutes}m{seconds:02}s")
    }
}
