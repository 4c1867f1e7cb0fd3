//! Striped locks serializing recomputes of the same entity

use crate::types::EntityId;
use parking_lot::{Mutex, MutexGuard};
use siphasher::sip::SipHasher13;
use std::hash::{Hash, Hasher};

/// Stripe index for an entity: SipHash of the entity id modulo stripe count
pub fn stripe_for(entity: &EntityId, num_stripes: usize) -> usize {
    let mut hasher = SipHasher13::new_with_keys(0xDEADBEEF, 0xCAFEBABE);
    entity.hash(&mut hasher);
    (hasher.finish() % num_stripes as u64) as usize
}

/// Fixed set of mutexes. Two entities on the same stripe serialize; the
/// same entity always does.
#[derive(Debug)]
pub struct StripedLocks {
    stripes: Vec<Mutex<()>>,
}

impl StripedLocks {
    pub fn new(num_stripes: usize) -> Self {
        let num_stripes = num_stripes.max(1);
        Self { stripes: (0..num_stripes).map(|_| Mutex::new(())).collect() }
    }

    pub fn lock(&self, entity: &EntityId) -> MutexGuard<'_, ()> {
        self.stripes[stripe_for(entity, self.stripes.len())].lock()
    }

    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_stripes() {
        let entity = EntityId::position("P1");
        assert_eq!(stripe_for(&entity, 64), stripe_for(&entity, 64));
        assert!(stripe_for(&entity, 64) < 64);
        assert_eq!(stripe_for(&entity, 1), 0);
    }

    #[test]
    fn test_position_and_portfolio_hash_apart() {
        // Same id in different namespaces is a different key
        let hits = (0..32)
            .filter(|i| {
                let id = format!("X{i}");
                stripe_for(&EntityId::position(id.clone()), 1024)
                    == stripe_for(&EntityId::portfolio(id), 1024)
            })
            .count();
        assert!(hits < 32);
    }

    #[test]
    fn test_zero_stripes_clamped() {
        let locks = StripedLocks::new(0);
        assert_eq!(locks.len(), 1);
        let _guard = locks.lock(&EntityId::portfolio("PF1"));
    }
}
