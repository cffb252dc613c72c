use crate::error::CronError;
use crate::types::Schedule;
use chrono::{DateTime, TimeZone, Utc};
use std::str::FromStr;

/// Pure next-fire calculator (spec §4.B). `last_run_at_ms` is `None` if the
/// job has never run. Returns `None` when the schedule has no further fire
/// (an expired `at`, or a disabled job upstream of this call).
pub fn next_run_at_ms(
    schedule: &Schedule,
    last_run_at_ms: Option<i64>,
    now_ms: i64,
) -> Result<Option<i64>, CronError> {
    match schedule {
        Schedule::At { at_ms } => {
            if last_run_at_ms.is_none() && *at_ms > now_ms {
                Ok(Some(*at_ms))
            } else {
                Ok(None)
            }
        }
        Schedule::Every { every_ms } => {
            if *every_ms <= 0 {
                return Err(CronError::InvalidSchedule(
                    "everyMs must be positive".to_string(),
                ));
            }
            let Some(last) = last_run_at_ms else {
                return Ok(Some(now_ms + every_ms));
            };
            let naive_next = last + every_ms;
            if naive_next > now_ms {
                Ok(Some(naive_next))
            } else {
                // Forward progress without a catch-up burst: skip to the next
                // boundary strictly after `now`, aligned to the original phase.
                let elapsed = now_ms - last;
                let remainder = elapsed % every_ms;
                Ok(Some(now_ms + (every_ms - remainder)))
            }
        }
        Schedule::Cron { expr, tz } => {
            let after_ms = last_run_at_ms.map_or(now_ms, |last| last.max(now_ms));
            let next = compute_next_cron_run(expr, tz.as_deref(), after_ms)?;
            Ok(Some(next))
        }
    }
}

fn compute_next_cron_run(
    expr: &str,
    tz: Option<&str>,
    after_ms: i64,
) -> Result<i64, CronError> {
    let cron = croner::Cron::from_str(expr)
        .map_err(|e| CronError::InvalidSchedule(format!("invalid cron expression '{expr}': {e}")))?;

    let after = millis_to_utc(after_ms);

    let next_utc = match tz {
        Some(tz_str) => {
            let tz: chrono_tz::Tz = tz_str
                .parse()
                .map_err(|_| CronError::InvalidSchedule(format!("invalid timezone '{tz_str}'")))?;
            let local_after = after.with_timezone(&tz);
            let next_local = cron
                .find_next_occurrence(&local_after, false)
                .map_err(|e| CronError::InvalidSchedule(format!("cron evaluation error: {e}")))?;
            next_local.with_timezone(&Utc)
        }
        None => cron
            .find_next_occurrence(&after, false)
            .map_err(|e| CronError::InvalidSchedule(format!("cron evaluation error: {e}")))?,
    };

    Ok(next_utc.timestamp_millis())
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_never_run_in_future_fires_once() {
        let s = Schedule::At { at_ms: 2_000 };
        assert_eq!(next_run_at_ms(&s, None, 1_000).unwrap(), Some(2_000));
    }

    #[test]
    fn at_in_the_past_is_dropped() {
        let s = Schedule::At { at_ms: 500 };
        assert_eq!(next_run_at_ms(&s, None, 1_000).unwrap(), None);
    }

    #[test]
    fn at_already_run_never_fires_again() {
        let s = Schedule::At { at_ms: 2_000 };
        assert_eq!(next_run_at_ms(&s, Some(2_000), 2_500).unwrap(), None);
    }

    #[test]
    fn every_first_fire_is_now_plus_interval() {
        let s = Schedule::Every { every_ms: 60_000 };
        assert_eq!(next_run_at_ms(&s, None, 1_000_000).unwrap(), Some(1_060_000));
    }

    #[test]
    fn every_subsequent_fire_is_last_plus_interval() {
        let s = Schedule::Every { every_ms: 60_000 };
        assert_eq!(
            next_run_at_ms(&s, Some(1_060_000), 1_060_000).unwrap(),
            Some(1_120_000)
        );
    }

    #[test]
    fn every_no_catch_up_burst_after_long_pause() {
        // Paused for 3x the interval: one fire, aligned forward from `now`.
        let s = Schedule::Every { every_ms: 60_000 };
        let last_run = 1_000_000;
        let now = last_run + 3 * 60_000 + 10_000; // 190_000ms past last run
        let next = next_run_at_ms(&s, Some(last_run), now).unwrap().unwrap();
        assert!(next > now);
        assert!(next <= now + 60_000);
    }

    #[test]
    fn every_zero_interval_is_invalid() {
        let s = Schedule::Every { every_ms: 0 };
        assert!(next_run_at_ms(&s, None, 0).is_err());
    }

    #[test]
    fn cron_next_occurrence_every_five_minutes() {
        let s = Schedule::Cron {
            expr: "*/5 * * * *".to_string(),
            tz: None,
        };
        let after = Utc.with_ymd_and_hms(2025, 6, 15, 10, 3, 0).unwrap().timestamp_millis();
        let expected = Utc.with_ymd_and_hms(2025, 6, 15, 10, 5, 0).unwrap().timestamp_millis();
        assert_eq!(next_run_at_ms(&s, None, after).unwrap(), Some(expected));
    }

    #[test]
    fn cron_with_timezone_matches_spec_scenario_s2() {
        let s = Schedule::Cron {
            expr: "0 9 * * *".to_string(),
            tz: Some("Asia/Shanghai".to_string()),
        };
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap().timestamp_millis();
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap().timestamp_millis();
        assert_eq!(next_run_at_ms(&s, None, after).unwrap(), Some(expected));
    }

    #[test]
    fn cron_invalid_expression_fails() {
        let s = Schedule::Cron {
            expr: "not a cron".to_string(),
            tz: None,
        };
        assert!(next_run_at_ms(&s, None, 0).is_err());
    }

    #[test]
    fn cron_invalid_timezone_fails() {
        let s = Schedule::Cron {
            expr: "*/5 * * * *".to_string(),
            tz: Some("Not/Valid".to_string()),
        };
        assert!(next_run_at_ms(&s, None, 0).is_err());
    }
}
