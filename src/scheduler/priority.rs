//! Priority tiers and starvation timeouts.
//!
//! Lower numeric level = more urgent:
//!
//! ```text
//! Immediate(1) < UserBlocking(2) < Normal(3) < Low(4) < Idle(5)
//! ```
//!
//! Every tier maps to a timeout. A queued task whose timeout has elapsed is
//! expired and outranks every unexpired task, whatever its tier.

use std::fmt;
use std::time::Duration;

/// Immediate work is never queued, so it expires on creation.
pub const IMMEDIATE_TIMEOUT: Duration = Duration::ZERO;
pub const USER_BLOCKING_TIMEOUT: Duration = Duration::from_millis(250);
pub const NORMAL_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const LOW_TIMEOUT: Duration = Duration::from_millis(10_000);
/// Max signed 31-bit int in milliseconds (about 12.4 days): never in practice.
pub const IDLE_TIMEOUT: Duration = Duration::from_millis(1_073_741_823);

/// Urgency class of an update or task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    /// Synchronous and uninterruptible.
    Immediate = 1,
    /// Direct user interaction (clicks, typing).
    UserBlocking = 2,
    /// Default tier.
    #[default]
    Normal = 3,
    /// Transitions, prefetching.
    Low = 4,
    /// Only when nothing else is pending.
    Idle = 5,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Immediate,
        Priority::UserBlocking,
        Priority::Normal,
        Priority::Low,
        Priority::Idle,
    ];

    /// Numeric level (1 = most urgent).
    #[inline]
    pub const fn level(self) -> u8 {
        self as u8
    }

    pub const fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Priority::Immediate),
            2 => Some(Priority::UserBlocking),
            3 => Some(Priority::Normal),
            4 => Some(Priority::Low),
            5 => Some(Priority::Idle),
            _ => None,
        }
    }

    /// Maximum time a task of this tier may wait before it expires.
    pub const fn timeout(self) -> Duration {
        match self {
            Priority::Immediate => IMMEDIATE_TIMEOUT,
            Priority::UserBlocking => USER_BLOCKING_TIMEOUT,
            Priority::Normal => NORMAL_TIMEOUT,
            Priority::Low => LOW_TIMEOUT,
            Priority::Idle => IDLE_TIMEOUT,
        }
    }

    /// Check if `self` is strictly more urgent than `other`.
    #[inline]
    pub const fn is_higher_than(self, other: Priority) -> bool {
        (self as u8) < (other as u8)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Priority::Immediate => "immediate",
            Priority::UserBlocking => "userBlocking",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Idle => "idle",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `a` outranks `b`.
#[inline]
pub fn is_higher_priority(a: Priority, b: Priority) -> bool {
    a.is_higher_than(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(is_higher_priority(Priority::Immediate, Priority::UserBlocking));
        assert!(is_higher_priority(Priority::Normal, Priority::Low));
        assert!(!is_higher_priority(Priority::Normal, Priority::Normal));
        assert!(!is_higher_priority(Priority::Idle, Priority::Low));
        assert!(Priority::Immediate < Priority::Idle);
    }

    #[test]
    fn test_timeouts() {
        assert_eq!(Priority::Immediate.timeout(), Duration::ZERO);
        assert_eq!(Priority::UserBlocking.timeout(), Duration::from_millis(250));
        assert_eq!(Priority::Normal.timeout(), Duration::from_secs(5));
        assert_eq!(Priority::Low.timeout(), Duration::from_secs(10));
        assert!(Priority::Idle.timeout() > Duration::from_secs(60 * 60 * 24));
    }

    #[test]
    fn test_levels_round_trip() {
        for priority in Priority::ALL {
            assert_eq!(Priority::from_level(priority.level()), Some(priority));
        }
        assert_eq!(Priority::from_level(0), None);
        assert_eq!(Priority::default(), Priority::Normal);
        assert_eq!(Priority::UserBlocking.to_string(), "userBlocking");
    }
}
