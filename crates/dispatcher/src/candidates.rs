//! Candidate list construction
//!
//! Order: the explicit credential alone when the caller supplied one;
//! otherwise the personal credential first, then the shared pool in a
//! uniformly random order. Only the shared subset is permuted. No value
//! appears twice.

use std::collections::HashSet;

use credentials::{Credential, CredentialStore};
use rand::seq::SliceRandom;
use tracing::{debug, warn};

/// Build the ordered candidates for one dispatch call.
///
/// An empty shared cache triggers one refill from the store. Refill failures
/// are logged and leave the list with whatever is left (possibly nothing).
pub async fn build_candidates(
    store: &dyn CredentialStore,
    explicit: Option<Credential>,
) -> Vec<Credential> {
    if let Some(credential) = explicit {
        debug!(credential = %credential.preview(), "using explicit credential");
        return vec![credential];
    }

    let personal = store.current_personal().await;
    let mut shared = store.current_shared().await;

    if shared.is_empty() {
        match store.refill_shared().await {
            Ok(pool) => {
                debug!(credentials = pool.len(), "shared pool refilled on demand");
                shared = pool;
            }
            Err(e) => {
                warn!(error = %e, "shared pool refill failed, continuing without it");
            }
        }
    }

    shuffled(personal, shared)
}

fn shuffled(personal: Option<Credential>, shared: Vec<Credential>) -> Vec<Credential> {
    order_candidates(personal, shared, &mut rand::rng())
}

/// Personal first, then `shared` permuted with `rng`, skipping repeated values.
pub fn order_candidates<R>(
    personal: Option<Credential>,
    mut shared: Vec<Credential>,
    rng: &mut R,
) -> Vec<Credential>
where
    R: rand::Rng + ?Sized,
{
    shared.shuffle(rng);

    let mut seen = HashSet::new();
    personal
        .into_iter()
        .chain(shared)
        .filter(|c| seen.insert(c.value().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubStore;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn values(list: &[Credential]) -> Vec<&str> {
        list.iter().map(|c| c.value()).collect()
    }

    fn sorted(mut v: Vec<&str>) -> Vec<&str> {
        v.sort_unstable();
        v
    }

    #[test]
    fn personal_always_first() {
        let shared: Vec<Credential> = (0..8).map(|i| Credential::shared(format!("s{i}"))).collect();
        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            let list = order_candidates(Some(Credential::personal("mine")), shared.clone(), &mut rng);
            assert_eq!(list[0].value(), "mine");
            assert!(list[0].is_personal());
            assert_eq!(list.len(), 9);
        }
    }

    #[test]
    fn shared_order_is_a_permutation() {
        let shared: Vec<Credential> = ["a", "b", "c", "d"].into_iter().map(Credential::shared).collect();
        let mut rng = StdRng::seed_from_u64(42);
        let list = order_candidates(None, shared, &mut rng);
        assert_eq!(sorted(values(&list)), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn shuffle_produces_varied_orders() {
        let shared: Vec<Credential> = ["a", "b", "c", "d", "e"].into_iter().map(Credential::shared).collect();
        let mut orders = std::collections::HashSet::new();
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let list = order_candidates(None, shared.clone(), &mut rng);
            orders.insert(values(&list).join(","));
        }
        assert!(orders.len() > 1, "shuffle never changed the order");
    }

    #[test]
    fn duplicate_values_removed() {
        let shared = vec![
            Credential::shared("dup"),
            Credential::shared("mine"),
            Credential::shared("dup"),
        ];
        let mut rng = StdRng::seed_from_u64(1);
        let list = order_candidates(Some(Credential::personal("mine")), shared, &mut rng);
        assert_eq!(values(&list), vec!["mine", "dup"]);
        assert!(list[0].is_personal(), "personal copy must win over the shared duplicate");
    }

    #[tokio::test]
    async fn explicit_credential_is_the_only_candidate() {
        let store = StubStore::new(Some("mine"), vec!["s1", "s2"], None);
        let list = build_candidates(&store, Some(Credential::shared("explicit"))).await;
        assert_eq!(values(&list), vec!["explicit"]);
        assert_eq!(store.refills(), 0);
    }

    #[tokio::test]
    async fn empty_pool_refills_once() {
        let store = StubStore::new(None, vec![], Some(vec!["r1", "r2"]));
        let list = build_candidates(&store, None).await;
        assert_eq!(sorted(values(&list)), vec!["r1", "r2"]);
        assert_eq!(store.refills(), 1);
    }

    #[tokio::test]
    async fn non_empty_pool_skips_refill() {
        let store = StubStore::new(Some("mine"), vec!["s1"], Some(vec!["r1"]));
        let list = build_candidates(&store, None).await;
        assert_eq!(values(&list), vec!["mine", "s1"]);
        assert_eq!(store.refills(), 0);
    }

    #[tokio::test]
    async fn failed_refill_leaves_personal_only() {
        let store = StubStore::new(Some("mine"), vec![], None);
        let list = build_candidates(&store, None).await;
        assert_eq!(values(&list), vec!["mine"]);
        assert_eq!(store.refills(), 1);
    }

    #[tokio::test]
    async fn nothing_configured_yields_empty_list() {
        let store = StubStore::new(None, vec![], None);
        assert!(build_candidates(&store, None).await.is_empty());
    }
}
