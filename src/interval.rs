//! Time intervals and the coalescing "keep these ranges" collection used for
//! cut segments. The collection keeps its members sorted and pairwise
//! non-intersecting; the segment editor mutates it, the engine only reads it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::units::secs;

/// A closed interval `[start, end]` on a media timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeInterval {
    #[serde(with = "secs")]
    start: Duration,
    #[serde(with = "secs")]
    end: Duration,
}

impl TimeInterval {
    /// Fails when `start > end`. `start == end` is accepted.
    pub fn new(start: Duration, end: Duration) -> Result<Self, AppError> {
        if start > end {
            return Err(AppError::invalid_request(format!(
                "interval start {:?} is after end {:?}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// A single-point interval.
    pub fn at(point: Duration) -> Self {
        Self {
            start: point,
            end: point,
        }
    }

    pub fn start(self) -> Duration {
        self.start
    }

    pub fn end(self) -> Duration {
        self.end
    }

    pub fn duration(self) -> Duration {
        self.end - self.start
    }

    pub fn contains(self, point: Duration) -> bool {
        self.start <= point && point <= self.end
    }

    pub fn contains_interval(self, other: TimeInterval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn intersects(self, other: TimeInterval) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Merge with an intersecting interval. None when the two are disjoint.
    pub fn union(self, other: TimeInterval) -> Option<TimeInterval> {
        if !self.intersects(other) {
            return None;
        }
        Some(TimeInterval {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        })
    }

    /// Remove the overlap with `other` from one side of this interval.
    ///
    /// None when the operation is not defined on a single interval: the two
    /// are equal, `other` covers this interval entirely, `other` lies
    /// strictly inside it (that case needs a split), or they do not
    /// intersect at all.
    pub fn subtract(self, other: TimeInterval) -> Option<TimeInterval> {
        if self == other || !self.intersects(other) || other.contains_interval(self) {
            return None;
        }
        if other.start > self.start && other.end < self.end {
            return None;
        }
        if other.start <= self.start {
            TimeInterval::new(other.end, self.end).ok()
        } else {
            TimeInterval::new(self.start, other.start).ok()
        }
    }
}

/// An ordered, non-overlapping, gap-permitting set of intervals bounded by
/// the parent timeline's `[start, end]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeIntervalCollection {
    #[serde(with = "secs")]
    start: Duration,
    #[serde(with = "secs")]
    end: Duration,
    intervals: Vec<TimeInterval>,
}

impl TimeIntervalCollection {
    pub fn new(start: Duration, end: Duration) -> Result<Self, AppError> {
        if start > end {
            return Err(AppError::invalid_request(format!(
                "collection start {:?} is after end {:?}",
                start, end
            )));
        }
        Ok(Self {
            start,
            end,
            intervals: Vec::new(),
        })
    }

    /// Bounds covering a whole media timeline.
    pub fn for_media(duration: Duration) -> Self {
        Self {
            start: Duration::ZERO,
            end: duration,
            intervals: Vec::new(),
        }
    }

    pub fn start(&self) -> Duration {
        self.start
    }

    pub fn end(&self) -> Duration {
        self.end
    }

    pub fn intervals(&self) -> &[TimeInterval] {
        &self.intervals
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// First member start, or the collection bound when empty.
    pub fn actual_start(&self) -> Duration {
        self.intervals.first().map_or(self.start, |i| i.start)
    }

    /// Last member end, or the collection bound when empty.
    pub fn actual_end(&self) -> Duration {
        self.intervals.last().map_or(self.end, |i| i.end)
    }

    /// Sum of member durations; the full actual span when empty.
    pub fn total_duration(&self) -> Duration {
        if self.intervals.is_empty() {
            return self.actual_end() - self.actual_start();
        }
        self.intervals.iter().map(|i| i.duration()).sum()
    }

    /// Insert an interval, clipping it to the collection bounds and merging
    /// every member it intersects. Intervals entirely outside the bounds are
    /// ignored.
    pub fn add(&mut self, interval: TimeInterval) {
        if interval.end < self.start || interval.start > self.end {
            return;
        }
        let mut merged = TimeInterval {
            start: interval.start.max(self.start),
            end: interval.end.min(self.end),
        };
        self.intervals.retain(|member| {
            if member.intersects(merged) {
                merged = TimeInterval {
                    start: merged.start.min(member.start),
                    end: merged.end.max(member.end),
                };
                false
            } else {
                true
            }
        });
        let position = self
            .intervals
            .iter()
            .position(|member| member.start > merged.start)
            .unwrap_or(self.intervals.len());
        self.intervals.insert(position, merged);
    }

    /// Carve a range out of the collection. A member that strictly contains
    /// the range is split in two; partially overlapped members are trimmed;
    /// fully covered members are dropped.
    pub fn remove(&mut self, removed: TimeInterval) {
        let mut result = Vec::with_capacity(self.intervals.len() + 1);
        for member in &self.intervals {
            if !member.intersects(removed) {
                result.push(*member);
                continue;
            }
            if removed.contains_interval(*member) {
                continue;
            }
            if removed.start > member.start && removed.end < member.end {
                result.push(TimeInterval {
                    start: member.start,
                    end: removed.start,
                });
                result.push(TimeInterval {
                    start: removed.end,
                    end: member.end,
                });
                continue;
            }
            if let Some(rest) = member.subtract(removed) {
                result.push(rest);
            }
        }
        self.intervals = result;
    }

    /// The complementary gap set over the same bounds.
    pub fn reverse(&self) -> TimeIntervalCollection {
        let mut out = TimeIntervalCollection {
            start: self.start,
            end: self.end,
            intervals: Vec::new(),
        };
        let mut cursor = self.start;
        for member in &self.intervals {
            if member.start > cursor {
                out.intervals.push(TimeInterval {
                    start: cursor,
                    end: member.start,
                });
            }
            cursor = cursor.max(member.end);
        }
        if cursor < self.end {
            out.intervals.push(TimeInterval {
                start: cursor,
                end: self.end,
            });
        }
        out
    }

    /// True when the point falls inside some member (inclusive bounds).
    pub fn contains(&self, point: Duration) -> bool {
        self.intervals.iter().any(|i| i.contains(point))
    }

    /// The point itself when contained; otherwise the nearest member
    /// boundary at or before it; the collection start when no member lies
    /// on that side.
    pub fn closest_before(&self, point: Duration) -> Duration {
        if self.contains(point) {
            return point;
        }
        self.intervals
            .iter()
            .rev()
            .find(|i| i.end <= point)
            .map_or(self.start, |i| i.end)
    }

    /// Mirror of [`closest_before`](Self::closest_before) for the other side.
    pub fn closest_after(&self, point: Duration) -> Duration {
        if self.contains(point) {
            return point;
        }
        self.intervals
            .iter()
            .find(|i| i.start >= point)
            .map_or(self.end, |i| i.start)
    }
}
