//! Parses the small subset of Git's time-expression grammar that
//! `gc.prunePackExpire` actually uses: `now`, or `<N>.<unit>.ago` with
//! `unit` one of `second(s)`, `minute(s)`, `hour(s)`, `day(s)`, `week(s)`.
//! Anything else falls back to the default with a warning, mirroring
//! `MaintenanceError::ConfigParse`'s downgrade-to-warning treatment.

use log::warn;
use proxmox_time::epoch_i64;

const DEFAULT_EXPRESSION: &str = "3600.seconds.ago";

/// Resolve a `gc.prunePackExpire`-style expression to a Unix timestamp
/// cutoff. `raw` is `None` when the config key is absent; either case
/// falls back to [`DEFAULT_EXPRESSION`] on failure to parse.
pub fn resolve_cutoff(raw: Option<&str>) -> i64 {
    match raw {
        Some(expr) => parse(expr).unwrap_or_else(|| {
            warn!("gc.prunePackExpire value {:?} is not parseable, falling back to {}", expr, DEFAULT_EXPRESSION);
            parse(DEFAULT_EXPRESSION).expect("default expression always parses")
        }),
        None => parse(DEFAULT_EXPRESSION).expect("default expression always parses"),
    }
}

fn parse(expr: &str) -> Option<i64> {
    let expr = expr.trim();
    if expr.eq_ignore_ascii_case("now") {
        return Some(epoch_i64());
    }

    let mut parts = expr.splitn(3, '.');
    let count: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    let ago = parts.next()?;
    if !ago.eq_ignore_ascii_case("ago") {
        return None;
    }

    let seconds_per_unit = match unit.trim_end_matches('s') {
        "second" => 1,
        "minute" => 60,
        "hour" => 3600,
        "day" => 86400,
        "week" => 86400 * 7,
        _ => return None,
    };

    Some(epoch_i64() - count * seconds_per_unit)
}
