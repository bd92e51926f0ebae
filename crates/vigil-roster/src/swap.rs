//! On-call swap protocol — in-memory only.
//!
//! `/swap Name` creates a request keyed by fresh hex; the target confirms
//! with `/confirmswap`, which consumes the *oldest* pending request
//! targeting them and hands them the current week. Requests expire after
//! 24 hours and are swept lazily on every access.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;

use vigil_core::config::SWAP_TTL_HOURS;
use vigil_core::VenueId;

use crate::error::{Result, RosterError};
use crate::store::RosterStore;
use crate::types::OnCallEntry;

/// One side of a swap.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapParty {
    pub chat_id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct SwapRequest {
    pub key: String,
    pub venue_id: VenueId,
    pub week_key: String,
    pub requester: SwapParty,
    pub target: SwapParty,
    pub expires_at: DateTime<Utc>,
}

/// Pending swap requests. Lives beside the roster store in the relay; dies
/// with the process by design.
#[derive(Default)]
pub struct SwapBook {
    pending: DashMap<String, SwapRequest>,
}

impl SwapBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a swap request from `requester` to the roster member fuzzy-
    /// matching `target_name`. Rejects targets with no chat to prompt.
    pub fn request(
        &self,
        roster: &RosterStore,
        venue_id: &VenueId,
        requester: SwapParty,
        target_name: &str,
    ) -> Result<SwapRequest> {
        self.sweep();
        let member = roster
            .find_member(venue_id, target_name)?
            .ok_or_else(|| RosterError::NoSuchMember {
                name: target_name.to_string(),
            })?;
        let target_chat = member
            .telegram_chat_id
            .ok_or_else(|| RosterError::MemberUnreachable {
                name: member.name.clone(),
            })?;

        let request = SwapRequest {
            key: fresh_key(),
            venue_id: venue_id.clone(),
            week_key: vigil_core::types::iso_week_key(Utc::now()),
            requester,
            target: SwapParty {
                chat_id: target_chat,
                name: member.name,
            },
            expires_at: Utc::now() + Duration::hours(SWAP_TTL_HOURS),
        };
        self.pending.insert(request.key.clone(), request.clone());
        Ok(request)
    }

    /// Confirm the oldest pending swap targeting `chat_id`. Consumes the
    /// request, assigns the current week, and returns the request plus the
    /// updated rotation entry so both parties can be notified.
    pub fn confirm(
        &self,
        roster: &RosterStore,
        chat_id: i64,
    ) -> Result<Option<(SwapRequest, OnCallEntry)>> {
        self.sweep();
        let oldest = self
            .pending
            .iter()
            .filter(|e| e.target.chat_id == chat_id)
            .min_by_key(|e| e.expires_at)
            .map(|e| e.key.clone());

        let Some(key) = oldest else {
            return Ok(None);
        };
        let Some((_, request)) = self.pending.remove(&key) else {
            return Ok(None);
        };

        let member = roster
            .find_member(&request.venue_id, &request.target.name)?
            .ok_or_else(|| RosterError::NoSuchMember {
                name: request.target.name.clone(),
            })?;
        let entry = roster.assign_week(&request.venue_id, &member.telegram_user_id)?;
        Ok(Some((request, entry)))
    }

    /// Drop expired requests. Called from every access and from the daily
    /// sweep task.
    pub fn sweep(&self) {
        let now = Utc::now();
        self.pending.retain(|_, r| r.expires_at > now);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

fn fresh_key() -> String {
    let mut rng = rand::rng();
    let raw: [u8; 8] = rng.random();
    hex::encode(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (RosterStore, SwapBook, VenueId) {
        let roster = RosterStore::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap();
        let venue = VenueId::from("v-1");
        roster
            .register_member(&venue, "u-1", "Ash Porter", Some(10), None)
            .unwrap();
        roster
            .register_member(&venue, "u-2", "Blake Reed", Some(20), None)
            .unwrap();
        (roster, SwapBook::new(), venue)
    }

    fn ash() -> SwapParty {
        SwapParty { chat_id: 10, name: "Ash Porter".into() }
    }

    #[test]
    fn request_then_confirm_assigns_week_to_target() {
        let (roster, book, venue) = setup();
        let request = book.request(&roster, &venue, ash(), "blake").unwrap();
        assert_eq!(request.target.chat_id, 20);
        assert_eq!(request.key.len(), 16);

        let (consumed, entry) = book.confirm(&roster, 20).unwrap().unwrap();
        assert_eq!(consumed.key, request.key);
        assert_eq!(entry.telegram_user_id, "u-2");
        assert_eq!(book.pending_count(), 0);

        let on_call = roster.current_on_call(&venue).unwrap().unwrap();
        assert_eq!(on_call.telegram_user_id, "u-2");
    }

    #[test]
    fn confirm_without_pending_is_none() {
        let (roster, book, _venue) = setup();
        assert!(book.confirm(&roster, 20).unwrap().is_none());
    }

    #[test]
    fn confirm_takes_oldest_request_for_target() {
        let (roster, book, venue) = setup();
        let first = book.request(&roster, &venue, ash(), "blake").unwrap();
        // Age the first request so ordering is deterministic.
        book.pending.alter(&first.key, |_, mut r| {
            r.expires_at = r.expires_at - Duration::hours(1);
            r
        });
        let _second = book.request(&roster, &venue, ash(), "blake").unwrap();

        let (consumed, _) = book.confirm(&roster, 20).unwrap().unwrap();
        assert_eq!(consumed.key, first.key);
        assert_eq!(book.pending_count(), 1);
    }

    #[test]
    fn target_without_chat_is_rejected() {
        let (roster, book, venue) = setup();
        roster
            .register_member(&venue, "u-3", "No Chat", None, None)
            .unwrap();
        assert!(matches!(
            book.request(&roster, &venue, ash(), "no chat"),
            Err(RosterError::MemberUnreachable { .. })
        ));
    }

    #[test]
    fn expired_requests_are_swept() {
        let (roster, book, venue) = setup();
        let request = book.request(&roster, &venue, ash(), "blake").unwrap();
        book.pending.alter(&request.key, |_, mut r| {
            r.expires_at = Utc::now() - Duration::minutes(1);
            r
        });
        assert!(book.confirm(&roster, 20).unwrap().is_none());
        assert_eq!(book.pending_count(), 0);
    }
}
