use ulid::Ulid;

use crate::model::*;

// ── Interval algebra over unavailability periods ─────────────────
//
// Pure functions: inputs are never mutated, results are fresh vectors.

/// Coalesce overlapping or touching periods.
///
/// Stable-sorts by start, then sweeps with an accumulator. A period joins the
/// run when `period.start <= acc.end`; the run keeps the id and reason of its
/// first period.
pub fn merge(periods: &[UnavailabilityPeriod]) -> Vec<UnavailabilityPeriod> {
    if periods.len() <= 1 {
        return periods.to_vec();
    }
    let mut sorted = periods.to_vec();
    sorted.sort_by_key(|p| p.span.start);

    let mut merged: Vec<UnavailabilityPeriod> = Vec::with_capacity(sorted.len());
    for period in sorted {
        if let Some(acc) = merged.last_mut()
            && period.span.start <= acc.span.end
        {
            acc.span.end = acc.span.end.max(period.span.end);
            continue;
        }
        merged.push(period);
    }
    merged
}

/// Add `new` and coalesce it with periods of the same reason.
///
/// Periods of the other reason pass through untouched. Result is sorted by start.
pub fn insert(new: UnavailabilityPeriod, periods: &[UnavailabilityPeriod]) -> Vec<UnavailabilityPeriod> {
    let reason = new.reason;
    let (mut same, other): (Vec<_>, Vec<_>) = periods.iter().cloned().partition(|p| p.reason == reason);
    same.push(new);

    let mut result = merge(&same);
    result.extend(other);
    result.sort_by_key(|p| p.span.start);
    result
}

/// Cut `to_remove` out of every period.
pub fn subtract(to_remove: &Span, periods: &[UnavailabilityPeriod]) -> Vec<UnavailabilityPeriod> {
    subtract_where(to_remove, periods, |_| true)
}

/// Cut `to_remove` out of the periods matching `cut`; the rest pass through.
///
/// A split period keeps its id on the first surviving fragment; the second gets
/// a fresh id. Zero-length fragments are dropped.
pub fn subtract_where<F>(to_remove: &Span, periods: &[UnavailabilityPeriod], cut: F) -> Vec<UnavailabilityPeriod>
where
    F: Fn(&UnavailabilityPeriod) -> bool,
{
    let mut result = Vec::with_capacity(periods.len() + 1);
    for p in periods {
        if !cut(p) || to_remove.start > p.span.end || to_remove.end < p.span.start {
            result.push(p.clone());
            continue;
        }

        let mut id = Some(p.id);
        let mut emit = |start: Ms, end: Ms, out: &mut Vec<UnavailabilityPeriod>| {
            if end > start {
                out.push(UnavailabilityPeriod {
                    id: id.take().unwrap_or_else(Ulid::new),
                    span: Span::new(start, end),
                    reason: p.reason,
                });
            }
        };

        if to_remove.start > p.span.start {
            emit(p.span.start, p.span.end.min(to_remove.start), &mut result);
        }
        if to_remove.end < p.span.end {
            emit(p.span.start.max(to_remove.end), p.span.end, &mut result);
        }
    }
    result
}

/// First Reserved period strictly overlapping `span`.
pub fn reserved_overlap<'a>(periods: &'a [UnavailabilityPeriod], span: &Span) -> Option<&'a UnavailabilityPeriod> {
    periods.iter().find(|p| p.is_reserved() && p.span.overlaps(span))
}

/// True if no period strictly overlaps `span`. Touching boundaries stay available.
pub fn is_free(periods: &[UnavailabilityPeriod], span: &Span) -> bool {
    !periods.iter().any(|p| p.span.overlaps(span))
}
