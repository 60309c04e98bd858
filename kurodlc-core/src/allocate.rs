use std::collections::BTreeSet;

use crate::{ResolverError, Result};

/// Maximal run of unused integers, inclusive on both ends.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct FreeRun {
    start: u32,
    end: u32,
}

impl FreeRun {
    fn len(&self) -> u64 {
        u64::from(self.end) - u64::from(self.start) + 1
    }
}

fn free_runs(used: &BTreeSet<u32>, lo: u32, hi: u32) -> Vec<FreeRun> {
    let mut runs = Vec::new();
    let mut next = u64::from(lo);
    for &id in used.range(lo..=hi) {
        let id = u64::from(id);
        if id > next {
            runs.push(FreeRun {
                start: next as u32,
                end: (id - 1) as u32,
            });
        }
        next = id + 1;
    }
    if next <= u64::from(hi) {
        runs.push(FreeRun {
            start: next as u32,
            end: hi,
        });
    }
    runs
}

fn block(start: u32, count: usize) -> Vec<u32> {
    (0..count as u32).map(|offset| start + offset).collect()
}

/// Picks `count` unused IDs from `[lo, hi]`.
///
/// Search order, starting from `mid = lo + (hi - lo) / 2`:
///
/// 1. a contiguous block starting at the first free position at or after `mid`;
/// 2. a contiguous block starting below `mid`, the nearest such block first;
/// 3. single free IDs visited as `mid, mid+1, mid-1, mid+2, mid-2, ...`.
///
/// The result is sorted ascending and depends only on the arguments.
pub fn allocate(count: usize, used: &BTreeSet<u32>, lo: u32, hi: u32) -> Result<Vec<u32>> {
    if lo > hi {
        return Err(ResolverError::Config(format!(
            "ID range minimum {lo} is greater than maximum {hi}"
        )));
    }

    let span = u64::from(hi) - u64::from(lo) + 1;
    let used_in_range = used.range(lo..=hi).count();
    let available = span - used_in_range as u64;
    if count as u64 > available {
        return Err(ResolverError::InsufficientRange {
            requested: count,
            available: available as usize,
            used_in_range,
            lo,
            hi,
        });
    }
    if count == 0 {
        return Ok(Vec::new());
    }

    let mid = lo + (hi - lo) / 2;
    let wanted = count as u64;
    let runs = free_runs(used, lo, hi);

    for run in runs.iter().filter(|r| r.end >= mid) {
        let start = run.start.max(mid);
        let room = FreeRun { start, end: run.end };
        if room.len() >= wanted {
            log::debug!(
                "allocated block {start}..={} at or after {mid}",
                start as u64 + wanted - 1
            );
            return Ok(block(start, count));
        }
    }

    for run in runs.iter().rev().filter(|r| r.start < mid) {
        if run.len() >= wanted {
            let last_fit = (u64::from(run.end) + 1 - wanted) as u32;
            let start = last_fit.min(mid - 1);
            log::debug!("allocated block {start}..={} below {mid}", start as u64 + wanted - 1);
            return Ok(block(start, count));
        }
    }

    let mut picked = Vec::with_capacity(count);
    let reach = u64::from(hi - mid).max(u64::from(mid - lo));
    for distance in 0..=reach {
        let up = u64::from(mid) + distance;
        if up <= u64::from(hi) && !used.contains(&(up as u32)) {
            picked.push(up as u32);
        }
        if picked.len() == count {
            break;
        }
        if distance > 0 && distance <= u64::from(mid - lo) {
            let down = mid - distance as u32;
            if !used.contains(&down) {
                picked.push(down);
            }
        }
        if picked.len() == count {
            break;
        }
    }
    picked.sort_unstable();
    log::debug!("no contiguous block of {count} free IDs, allocated scattered IDs {picked:?}");
    Ok(picked)
}
