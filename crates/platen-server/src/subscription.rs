// SPDX-License-Identifier: Apache-2.0
//
// Event subscriptions: registered interest in printer or job events, with
// a bounded ring of delivered notifications and a lease expiry.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use platen_core::{JobState, PrinterReasons, PrinterState};

/// Retained notifications per subscription.
const EVENT_RING_CAPACITY: usize = 100;

/// Default lease for printer subscriptions, in seconds.
pub const DEFAULT_LEASE_SECONDS: i64 = 86400;

/// Bitmask of `notify-events` keywords.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventMask(pub u32);

impl EventMask {
    pub const JOB_CREATED: u32 = 1 << 0;
    pub const JOB_COMPLETED: u32 = 1 << 1;
    pub const JOB_STATE_CHANGED: u32 = 1 << 2;
    pub const JOB_PROGRESS: u32 = 1 << 3;
    pub const JOB_CONFIG_CHANGED: u32 = 1 << 4;
    pub const PRINTER_STATE_CHANGED: u32 = 1 << 5;
    pub const PRINTER_CONFIG_CHANGED: u32 = 1 << 6;
    pub const PRINTER_STOPPED: u32 = 1 << 7;

    pub const ALL: EventMask = EventMask(0xFF);

    /// Keyword strings, one per bit, lowest bit first.
    pub const KEYWORDS: [&'static str; 8] = [
        "job-created",
        "job-completed",
        "job-state-changed",
        "job-progress",
        "job-config-changed",
        "printer-state-changed",
        "printer-config-changed",
        "printer-stopped",
    ];

    /// Parse a `notify-events` keyword list; `all` selects every event.
    pub fn parse<'a>(keywords: impl IntoIterator<Item = &'a str>) -> EventMask {
        let mut mask = 0u32;
        for keyword in keywords {
            if keyword == "all" {
                return Self::ALL;
            }
            if let Some(index) = Self::KEYWORDS.iter().position(|k| *k == keyword) {
                mask |= 1 << index;
            }
        }
        EventMask(mask)
    }

    pub fn contains(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    /// Keyword for a single event bit.
    pub fn keyword_for(bit: u32) -> &'static str {
        Self::KEYWORDS
            .get(bit.trailing_zeros() as usize)
            .copied()
            .unwrap_or("none")
    }

    pub fn keywords(self) -> Vec<&'static str> {
        Self::KEYWORDS
            .iter()
            .enumerate()
            .filter(|(i, _)| self.0 & (1 << i) != 0)
            .map(|(_, k)| *k)
            .collect()
    }
}

/// One delivered notification.
#[derive(Debug, Clone)]
pub struct Event {
    pub sequence: i32,
    /// Event bit from [`EventMask`].
    pub bit: u32,
    pub text: String,
    pub time: DateTime<Utc>,
    pub job_id: Option<i32>,
    pub job_state: Option<JobState>,
    pub printer_state: PrinterState,
    pub printer_reasons: PrinterReasons,
}

/// A registered interest in a set of events.
///
/// Stored inside the printer and mutated only under the printer write
/// lock.
#[derive(Debug)]
pub struct Subscription {
    pub id: i32,
    /// Set for per-job subscriptions; the subscription dies with the job.
    pub job_id: Option<i32>,
    pub username: String,
    pub events: EventMask,
    pub lease_seconds: i64,
    /// Lease expiry; `None` for job subscriptions.
    pub expires: Option<DateTime<Utc>>,
    pub next_sequence: i32,
    pub ring: VecDeque<Event>,
}

impl Subscription {
    pub fn new(
        id: i32,
        job_id: Option<i32>,
        username: String,
        events: EventMask,
        lease_seconds: i64,
    ) -> Self {
        let expires = if job_id.is_none() {
            Some(Utc::now() + Duration::seconds(lease_seconds.max(1)))
        } else {
            None
        };
        Self {
            id,
            job_id,
            username,
            events,
            lease_seconds,
            expires,
            next_sequence: 1,
            ring: VecDeque::new(),
        }
    }

    /// Extend the lease from now.
    pub fn renew(&mut self, lease_seconds: i64) {
        self.lease_seconds = lease_seconds;
        if self.job_id.is_none() {
            self.expires = Some(Utc::now() + Duration::seconds(lease_seconds.max(1)));
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires, Some(expiry) if expiry <= now)
    }

    /// Deliver one event into the ring, dropping the oldest past capacity.
    pub fn deliver(&mut self, mut event: Event) {
        event.sequence = self.next_sequence;
        self.next_sequence += 1;
        if self.ring.len() == EVENT_RING_CAPACITY {
            self.ring.pop_front();
        }
        self.ring.push_back(event);
    }

    /// Events at or after the given sequence number.
    pub fn events_since(&self, sequence: i32) -> impl Iterator<Item = &Event> {
        self.ring.iter().filter(move |e| e.sequence >= sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(bit: u32) -> Event {
        Event {
            sequence: 0,
            bit,
            text: "test".into(),
            time: Utc::now(),
            job_id: None,
            job_state: None,
            printer_state: PrinterState::Idle,
            printer_reasons: PrinterReasons::NONE,
        }
    }

    #[test]
    fn parse_event_keywords() {
        let mask = EventMask::parse(["job-created", "job-completed"]);
        assert!(mask.contains(EventMask::JOB_CREATED));
        assert!(mask.contains(EventMask::JOB_COMPLETED));
        assert!(!mask.contains(EventMask::PRINTER_STATE_CHANGED));
        assert_eq!(mask.keywords(), vec!["job-created", "job-completed"]);
    }

    #[test]
    fn all_selects_everything() {
        let mask = EventMask::parse(["all"]);
        for (i, _) in EventMask::KEYWORDS.iter().enumerate() {
            assert!(mask.contains(1 << i));
        }
    }

    #[test]
    fn sequence_numbers_are_monotonic() {
        let mut sub = Subscription::new(1, None, "alice".into(), EventMask::ALL, 3600);
        sub.deliver(event(EventMask::JOB_CREATED));
        sub.deliver(event(EventMask::JOB_COMPLETED));

        let sequences: Vec<i32> = sub.ring.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
        assert_eq!(sub.events_since(2).count(), 1);
    }

    #[test]
    fn ring_is_bounded() {
        let mut sub = Subscription::new(1, None, "alice".into(), EventMask::ALL, 3600);
        for _ in 0..(EVENT_RING_CAPACITY + 10) {
            sub.deliver(event(EventMask::JOB_PROGRESS));
        }
        assert_eq!(sub.ring.len(), EVENT_RING_CAPACITY);
        // Oldest entries were dropped.
        assert_eq!(sub.ring.front().expect("front").sequence, 11);
    }

    #[test]
    fn job_subscription_has_no_lease_expiry() {
        let sub = Subscription::new(2, Some(7), "bob".into(), EventMask::ALL, 0);
        assert!(sub.expires.is_none());
        assert!(!sub.is_expired(Utc::now()));
    }

    #[test]
    fn renewal_extends_expiry() {
        let mut sub = Subscription::new(1, None, "alice".into(), EventMask::ALL, 1);
        let before = sub.expires.expect("expiry");
        sub.renew(3600);
        assert!(sub.expires.expect("expiry") > before);
    }
}
