//! Per-session sync state.
//!
//! One `SessionContext` lives for one application session. It is owned by
//! the `SyncCoordinator` and reached by the `Scheduler` through it, so no
//! sync state lives in statics.

use crate::origin::{OriginTag, OriginTagSource};
use std::collections::VecDeque;

/// Own writes whose echo has not been seen yet, oldest first. Bounded so a
/// store that never echoes cannot grow it without limit.
const MAX_UNACKNOWLEDGED: usize = 32;

#[derive(Debug)]
pub struct SessionContext {
    user: String,
    has_synced: bool,
    last_write_tag: Option<OriginTag>,
    expansion_ran_this_session: bool,
    tags: OriginTagSource,
    unacknowledged: VecDeque<OriginTag>,
}

impl SessionContext {
    /// Start a session acting as `user` (recorded as `createdBy`).
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            has_synced: false,
            last_write_tag: None,
            expansion_ran_this_session: false,
            tags: OriginTagSource::new(),
            unacknowledged: VecDeque::new(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Whether the first snapshot has been received.
    pub fn has_synced(&self) -> bool {
        self.has_synced
    }

    pub(crate) fn mark_synced(&mut self) {
        self.has_synced = true;
    }

    /// Tag of the most recent write issued by this session.
    pub fn last_write_tag(&self) -> Option<OriginTag> {
        self.last_write_tag
    }

    pub fn expansion_ran(&self) -> bool {
        self.expansion_ran_this_session
    }

    pub(crate) fn mark_expansion_ran(&mut self) {
        self.expansion_ran_this_session = true;
    }

    /// Issue a fresh tag for a write attempt and make it the pending one.
    pub(crate) fn issue_tag(&mut self) -> OriginTag {
        let tag = self.tags.next_tag();
        self.last_write_tag = Some(tag);
        self.unacknowledged.push_back(tag);
        if self.unacknowledged.len() > MAX_UNACKNOWLEDGED {
            self.unacknowledged.pop_front();
        }
        tag
    }

    /// Drop a tag whose write never reached the store.
    pub(crate) fn forget(&mut self, tag: OriginTag) {
        self.unacknowledged.retain(|t| *t != tag);
    }

    /// Check whether a delivered snapshot's origin is one of our own writes.
    ///
    /// The last pending tag always matches (deliveries are at-least-once).
    /// Earlier tags match until their echo has been seen once; they cover a
    /// burst of local writes whose echoes arrive after the next write was
    /// already issued.
    pub(crate) fn acknowledge(&mut self, origin: Option<OriginTag>) -> bool {
        let Some(origin) = origin else {
            return false;
        };
        let pending = self.unacknowledged.iter().position(|t| *t == origin);
        if let Some(index) = pending {
            self.unacknowledged.remove(index);
        }
        pending.is_some() || self.last_write_tag == Some(origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_clean() {
        let session = SessionContext::new("owner@example.com");
        assert_eq!(session.user(), "owner@example.com");
        assert!(!session.has_synced());
        assert!(!session.expansion_ran());
        assert_eq!(session.last_write_tag(), None);
    }

    #[test]
    fn test_last_tag_is_always_an_echo() {
        let mut session = SessionContext::new("u");
        let tag = session.issue_tag();
        assert!(session.acknowledge(Some(tag)));
        assert!(session.acknowledge(Some(tag)));
    }

    #[test]
    fn test_older_tag_is_an_echo_once() {
        let mut session = SessionContext::new("u");
        let first = session.issue_tag();
        let second = session.issue_tag();

        assert!(session.acknowledge(Some(first)));
        assert!(!session.acknowledge(Some(first)));
        assert!(session.acknowledge(Some(second)));
    }

    #[test]
    fn test_foreign_and_missing_tags_are_not_echoes() {
        let mut session = SessionContext::new("u");
        session.issue_tag();
        let foreign = OriginTagSource::new().next_tag();
        assert!(!session.acknowledge(Some(foreign)));
        assert!(!session.acknowledge(None));
    }

    #[test]
    fn test_forgotten_tag_is_not_an_echo() {
        let mut session = SessionContext::new("u");
        let failed = session.issue_tag();
        session.forget(failed);
        let next = session.issue_tag();
        assert!(!session.acknowledge(Some(failed)));
        assert!(session.acknowledge(Some(next)));
    }

    #[test]
    fn test_unacknowledged_is_bounded() {
        let mut session = SessionContext::new("u");
        let first = session.issue_tag();
        for _ in 0..MAX_UNACKNOWLEDGED {
            session.issue_tag();
        }
        assert!(!session.acknowledge(Some(first)));
    }
}
