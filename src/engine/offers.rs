use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use uuid::Uuid;

use crate::entities::AllocationOffer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcceptCheck {
    Open,
    Missing,
    NotCandidate,
    Expired,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decline {
    Missing,
    NotCandidate,
    Expired,
    Remaining(usize),
    /// The last candidate declined; the offer has been removed.
    Exhausted(AllocationOffer),
}

/// Outstanding broadcast offers keyed by ride. Each operation runs under the
/// entry's shard lock, so concurrent responses for one ride see a consistent
/// candidate list.
#[derive(Debug, Default)]
pub struct OfferBook {
    offers: DashMap<Uuid, AllocationOffer>,
}

impl OfferBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `offer`, returning whatever it replaced.
    pub fn open(&self, offer: AllocationOffer) -> Option<AllocationOffer> {
        self.offers.insert(offer.ride_id, offer)
    }

    pub fn get(&self, ride_id: Uuid) -> Option<AllocationOffer> {
        self.offers.get(&ride_id).map(|offer| offer.clone())
    }

    pub fn check_accept(&self, ride_id: Uuid, driver_id: Uuid, now: DateTime<Utc>) -> AcceptCheck {
        match self.offers.get(&ride_id) {
            None => AcceptCheck::Missing,
            Some(offer) if offer.consumed => AcceptCheck::Missing,
            Some(offer) if offer.is_expired(now) => AcceptCheck::Expired,
            Some(offer) if !offer.contains(driver_id) => AcceptCheck::NotCandidate,
            Some(_) => AcceptCheck::Open,
        }
    }

    pub fn decline(&self, ride_id: Uuid, driver_id: Uuid, now: DateTime<Utc>) -> Decline {
        match self.offers.entry(ride_id) {
            Entry::Vacant(_) => Decline::Missing,
            Entry::Occupied(mut entry) => {
                let offer = entry.get_mut();

                if offer.consumed {
                    return Decline::Missing;
                }

                if offer.is_expired(now) {
                    return Decline::Expired;
                }

                if !offer.remove_candidate(driver_id) {
                    return Decline::NotCandidate;
                }

                if offer.candidates.is_empty() {
                    return Decline::Exhausted(entry.remove());
                }

                Decline::Remaining(offer.candidates.len())
            }
        }
    }

    /// Removes the ride's offer only if its TTL has elapsed at `now`. A newer
    /// offer for the same ride is left alone.
    pub fn take_expired(&self, ride_id: Uuid, now: DateTime<Utc>) -> Option<AllocationOffer> {
        self.offers
            .remove_if(&ride_id, |_, offer| !offer.consumed && offer.is_expired(now))
            .map(|(_, offer)| offer)
    }

    /// Marks the winning accept; returns false if the offer was already gone.
    pub fn consume(&self, ride_id: Uuid) -> bool {
        self.offers
            .remove(&ride_id)
            .map(|(_, mut offer)| offer.consume())
            .unwrap_or(false)
    }

    pub fn withdraw(&self, ride_id: Uuid) -> Option<AllocationOffer> {
        self.offers.remove(&ride_id).map(|(_, offer)| offer)
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn book_with(candidates: Vec<Uuid>, now: DateTime<Utc>) -> (OfferBook, Uuid) {
        let book = OfferBook::new();
        let ride_id = Uuid::new_v4();
        book.open(AllocationOffer::new(ride_id, candidates, now, Duration::minutes(10)));
        (book, ride_id)
    }

    #[test]
    fn declines_until_exhausted() {
        let now = Utc::now();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (book, ride_id) = book_with(vec![a, b], now);

        assert_eq!(book.decline(ride_id, a, now), Decline::Remaining(1));
        assert_eq!(book.decline(ride_id, a, now), Decline::NotCandidate);

        match book.decline(ride_id, b, now) {
            Decline::Exhausted(offer) => assert_eq!(offer.declined, vec![a, b]),
            other => panic!("unexpected {:?}", other),
        }

        assert!(book.is_empty());
        assert_eq!(book.decline(ride_id, b, now), Decline::Missing);
    }

    #[test]
    fn accept_check_respects_ttl_and_membership() {
        let now = Utc::now();
        let a = Uuid::new_v4();
        let (book, ride_id) = book_with(vec![a], now);

        assert_eq!(book.check_accept(ride_id, a, now), AcceptCheck::Open);
        assert_eq!(
            book.check_accept(ride_id, Uuid::new_v4(), now),
            AcceptCheck::NotCandidate
        );
        assert_eq!(
            book.check_accept(ride_id, a, now + Duration::minutes(10)),
            AcceptCheck::Expired
        );
        assert_eq!(
            book.check_accept(Uuid::new_v4(), a, now),
            AcceptCheck::Missing
        );
    }

    #[test]
    fn take_expired_leaves_live_offers() {
        let now = Utc::now();
        let (book, ride_id) = book_with(vec![Uuid::new_v4()], now);

        assert!(book.take_expired(ride_id, now + Duration::minutes(5)).is_none());
        assert_eq!(book.len(), 1);
        assert!(book.take_expired(ride_id, now + Duration::minutes(10)).is_some());
        assert!(book.is_empty());
    }

    #[test]
    fn consume_succeeds_once() {
        let now = Utc::now();
        let (book, ride_id) = book_with(vec![Uuid::new_v4()], now);

        assert!(book.consume(ride_id));
        assert!(!book.consume(ride_id));
    }
}
