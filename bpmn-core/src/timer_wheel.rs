//! Timer wheel collaborator: ISO-8601 duration/date/cycle parsing, due-time
//! computation, and cycle rescheduling gated on parent-scope activeness
//! (spec §4.6). Scheduling/firing/cancellation themselves are simple store
//! operations; this module owns only the ISO-8601 arithmetic the engine
//! needs to turn a `TimerSpec` into a concrete `due_at` millisecond.

use crate::instance::{now_ms, Timestamp};
use crate::timer::{Timer, TimerSpec, TimerState, TimerType};
use anyhow::{anyhow, Result};
use chrono::DateTime;

/// A parsed ISO-8601 repeating interval: `R<count>/PT...` or `R/PT...` for
/// an unbounded cycle (no repetitions limit given).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSpec {
    pub interval_ms: i64,
    pub max_repeats: Option<u32>,
}

/// Parse a simple ISO-8601 duration (`PnDTnHnMnS`) to milliseconds. Mirrors
/// the subset of the grammar BPMN timer definitions actually use: days,
/// hours, minutes, seconds.
pub fn parse_duration_ms(s: &str) -> Result<i64> {
    let s = s.trim();
    let rest = s
        .strip_prefix('P')
        .ok_or_else(|| anyhow!("duration must start with 'P': {s}"))?;

    let (date_part, time_part) = match rest.find('T') {
        Some(pos) => (&rest[..pos], &rest[pos + 1..]),
        None => (rest, ""),
    };

    let mut total_ms: i64 = 0;

    let mut num_buf = String::new();
    for ch in date_part.chars() {
        if ch.is_ascii_digit() {
            num_buf.push(ch);
        } else if ch == 'D' {
            total_ms += parse_buf(&mut num_buf, s)? * 86_400_000;
        } else if ch == 'W' {
            total_ms += parse_buf(&mut num_buf, s)? * 7 * 86_400_000;
        } else if ch == 'Y' || ch == 'M' {
            // Calendar year/month durations are not supported: BPMN timer
            // durations in practice are bounded day/time offsets.
            return Err(anyhow!("calendar year/month durations unsupported: {s}"));
        } else {
            return Err(anyhow!("unknown duration unit '{ch}' in: {s}"));
        }
    }

    for ch in time_part.chars() {
        if ch.is_ascii_digit() {
            num_buf.push(ch);
        } else {
            let n = parse_buf(&mut num_buf, s)?;
            match ch {
                'H' => total_ms += n * 3_600_000,
                'M' => total_ms += n * 60_000,
                'S' => total_ms += n * 1_000,
                _ => return Err(anyhow!("unknown duration unit '{ch}' in: {s}")),
            }
        }
    }

    Ok(total_ms)
}

fn parse_buf(buf: &mut String, original: &str) -> Result<i64> {
    let n = buf
        .parse::<i64>()
        .map_err(|_| anyhow!("bad numeric component in duration: {original}"))?;
    buf.clear();
    Ok(n)
}

/// Parse an ISO-8601 date-time (RFC 3339) to epoch milliseconds.
pub fn parse_date_ms(s: &str) -> Result<i64> {
    let dt = DateTime::parse_from_rfc3339(s.trim())
        .map_err(|e| anyhow!("cannot parse timer date '{s}': {e}"))?;
    Ok(dt.timestamp_millis())
}

/// Parse `R<n>/<duration>` (repetition count may be omitted: `R/<duration>`
/// means unbounded).
pub fn parse_cycle(s: &str) -> Result<CycleSpec> {
    let s = s.trim();
    let rest = s
        .strip_prefix('R')
        .ok_or_else(|| anyhow!("cycle must start with 'R': {s}"))?;
    let slash = rest
        .find('/')
        .ok_or_else(|| anyhow!("cycle missing '/' separator: {s}"))?;
    let count_str = &rest[..slash];
    let duration_str = &rest[slash + 1..];

    let max_repeats = if count_str.is_empty() {
        None
    } else {
        let n: u32 = count_str
            .parse()
            .map_err(|_| anyhow!("bad cycle repeat count '{count_str}' in: {s}"))?;
        Some(n)
    };

    let interval_ms = parse_duration_ms(duration_str)?;
    Ok(CycleSpec {
        interval_ms,
        max_repeats,
    })
}

/// Compute the due time for a freshly-scheduled timer's spec, relative to
/// `anchor_ms` (normally "now").
pub fn due_at_for_spec(spec: &TimerSpec, anchor_ms: Timestamp) -> Result<Timestamp> {
    match spec {
        TimerSpec::Duration(d) => Ok(anchor_ms + parse_duration_ms(d)?),
        TimerSpec::Date(d) => parse_date_ms(d),
        TimerSpec::Cycle(c) => {
            let cycle = parse_cycle(c)?;
            Ok(anchor_ms + cycle.interval_ms)
        }
    }
}

/// Build the next iteration's sibling timer after a cycle timer fires, if
/// the repeat budget allows another iteration. `iteration` is 1-based: the
/// iteration that just fired.
pub fn next_cycle_timer(fired: &Timer, iteration: u32) -> Result<Option<Timer>> {
    let TimerSpec::Cycle(c) = &fired.spec else {
        return Ok(None);
    };
    let cycle = parse_cycle(c)?;
    if let Some(max) = cycle.max_repeats {
        if iteration >= max {
            return Ok(None);
        }
    }

    let mut next = fired.clone();
    next.id = uuid::Uuid::now_v7();
    next.state = TimerState::Scheduled;
    next.due_at = now_ms() + cycle.interval_ms;
    next.variables.insert(
        crate::timer::VAR_CURRENT_ITERATION.to_string(),
        crate::value::Value::Number((iteration + 1) as f64),
    );
    Ok(Some(next))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_duration() {
        assert_eq!(parse_duration_ms("PT1S").unwrap(), 1_000);
        assert_eq!(parse_duration_ms("PT1H30M").unwrap(), 5_400_000);
        assert_eq!(parse_duration_ms("P1D").unwrap(), 86_400_000);
        assert_eq!(parse_duration_ms("P1DT2H").unwrap(), 86_400_000 + 7_200_000);
    }

    #[test]
    fn parses_bounded_cycle() {
        let c = parse_cycle("R3/PT1S").unwrap();
        assert_eq!(c.interval_ms, 1_000);
        assert_eq!(c.max_repeats, Some(3));
    }

    #[test]
    fn parses_unbounded_cycle() {
        let c = parse_cycle("R/PT1M").unwrap();
        assert_eq!(c.interval_ms, 60_000);
        assert_eq!(c.max_repeats, None);
    }

    #[test]
    fn rejects_calendar_units() {
        assert!(parse_duration_ms("P1Y").is_err());
    }

    #[test]
    fn cycle_exhaustion_stops_rescheduling() {
        use crate::timer::TimerProcessContext;
        let ctx = TimerProcessContext {
            process_id: "p".into(),
            version: 1,
            component_source: "test".into(),
        };
        let timer = Timer::new(
            "boundary1",
            None,
            None,
            TimerType::Boundary,
            now_ms(),
            TimerSpec::Cycle("R2/PT1S".into()),
            ctx,
        );
        assert!(next_cycle_timer(&timer, 1).unwrap().is_some());
        assert!(next_cycle_timer(&timer, 2).unwrap().is_none());
    }
}
