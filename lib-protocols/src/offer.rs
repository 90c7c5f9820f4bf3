//! Offer stream (spec §4.H): the renter-side queue a publisher drains as
//! farmers respond to a published shard descriptor.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use lib_contract::Contract;
use lib_dht::Contact;
use tokio::sync::Notify;

const DEFAULT_QUEUE_CAPACITY: usize = 64;

struct Inner {
    queue: VecDeque<(Contact, Contract)>,
    seen_farmers: HashSet<String>,
    delivered: usize,
    destroyed: bool,
}

/// A readable stream of `(contact, contract)` offers. `max_offers` bounds
/// how many distinct farmer offers the stream will ever deliver; once that
/// many have been popped (or the queue is empty and the stream destroyed),
/// the stream is finished.
pub struct OfferStream {
    state: Mutex<Inner>,
    notify: Notify,
    max_offers: usize,
    capacity: usize,
}

impl OfferStream {
    pub fn new(max_offers: usize) -> Self {
        Self {
            state: Mutex::new(Inner {
                queue: VecDeque::new(),
                seen_farmers: HashSet::new(),
                delivered: 0,
                destroyed: false,
            }),
            notify: Notify::new(),
            max_offers,
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Enqueue an offer from `contact`. Rejects duplicate farmers (by node
    /// id), incomplete contracts, a full queue, or a destroyed stream.
    pub fn add_offer_to_queue(&self, contact: Contact, contract: Contract) -> bool {
        if !contract.is_complete() {
            return false;
        }
        let mut state = self.state.lock().unwrap();
        if state.destroyed {
            return false;
        }
        if state.queue.len() >= self.capacity {
            return false;
        }
        if !state.seen_farmers.insert(contact.node_id.clone()) {
            return false;
        }
        state.queue.push_back((contact, contract));
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Pop the next offer, awaiting arrival if the queue is momentarily
    /// empty. Returns `None` once the stream is finished (spec's `end`
    /// event): either `max_offers` have been delivered, or the queue is
    /// empty and the stream has been destroyed.
    pub async fn next(&self) -> Option<(Contact, Contract)> {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if state.delivered >= self.max_offers {
                    return None;
                }
                if let Some(entry) = state.queue.pop_front() {
                    state.delivered += 1;
                    return Some(entry);
                }
                if state.destroyed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Drain the queue, mark destroyed, and wake any waiting consumer so it
    /// observes `end` rather than hanging forever.
    pub fn destroy(&self) {
        let mut state = self.state.lock().unwrap();
        state.queue.clear();
        state.destroyed = true;
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().unwrap().destroyed
    }

    pub fn delivered(&self) -> usize {
        self.state.lock().unwrap().delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_contract::{Contract, Role};
    use rand::rngs::OsRng;
    use secp256k1::{PublicKey, Secp256k1, SecretKey};

    fn keypair() -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let sk = SecretKey::new(&mut OsRng);
        let pk = PublicKey::from_secret_key(&secp, &sk);
        (sk, pk)
    }

    fn complete_contract() -> Contract {
        let (renter_sk, renter_pk) = keypair();
        let (farmer_sk, farmer_pk) = keypair();
        let renter_id = hex::encode(lib_crypto::node_id_from_pubkey(&renter_pk));
        let farmer_id = hex::encode(lib_crypto::node_id_from_pubkey(&farmer_pk));
        let fields = serde_json::json!({
            "renter_id": renter_id,
            "farmer_id": farmer_id,
            "payment_source": "addr-r",
            "payment_destination": "addr-f",
            "payment_download_price": 1,
            "payment_storage_price": 1,
            "payment_amount": 1,
            "data_hash": "a".repeat(40),
            "data_size": 1024,
            "store_begin": 0,
            "store_end": 1000,
            "audit_count": 0,
        })
        .as_object()
        .unwrap()
        .clone();
        let mut c = Contract::create(fields).unwrap();
        c.sign(Role::Renter, &renter_sk).unwrap();
        c.sign(Role::Farmer, &farmer_sk).unwrap();
        c
    }

    #[test]
    fn duplicate_farmer_is_rejected() {
        let stream = OfferStream::new(3);
        let contract = complete_contract();
        let contact = Contact::new("farmer-1", "127.0.0.1", 1000);
        assert!(stream.add_offer_to_queue(contact.clone(), contract.clone()));
        assert!(!stream.add_offer_to_queue(contact, contract));
    }

    #[tokio::test]
    async fn next_returns_none_after_destroy_on_empty_queue() {
        let stream = OfferStream::new(3);
        stream.destroy();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn next_stops_after_max_offers_delivered() {
        let stream = OfferStream::new(1);
        let contract = complete_contract();
        stream.add_offer_to_queue(Contact::new("farmer-1", "127.0.0.1", 1), contract.clone());
        stream.add_offer_to_queue(Contact::new("farmer-2", "127.0.0.1", 2), contract);
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
    }
}
