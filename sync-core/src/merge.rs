//! Merge policy: the application's `(state, event) -> state` function.
//!
//! The policy must be deterministic. Replay after reconciliation folds the
//! same events again and relies on getting the same result.

use optisync_types::Event;

/// Combines a state and an event into a new state.
///
/// Any `Fn(&S, &Event<P>) -> S + Send + Sync` closure is a policy.
pub trait MergePolicy<S, P>: Send + Sync {
    /// Produce the state that results from applying `event` to `state`.
    fn merge(&self, state: &S, event: &Event<P>) -> S;
}

impl<S, P, F> MergePolicy<S, P> for F
where
    F: Fn(&S, &Event<P>) -> S + Send + Sync,
{
    fn merge(&self, state: &S, event: &Event<P>) -> S {
        self(state, event)
    }
}

/// Fold `events` in order onto `base`.
pub fn fold<'a, S, P, M>(policy: &M, base: S, events: impl IntoIterator<Item = &'a Event<P>>) -> S
where
    P: 'a,
    M: MergePolicy<S, P> + ?Sized,
{
    events
        .into_iter()
        .fold(base, |state, event| policy.merge(&state, event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use optisync_types::ClientId;

    fn add(state: &i64, event: &Event<i64>) -> i64 {
        state + event.payload
    }

    fn event(value: i64) -> Event<i64> {
        Event::new(value, ClientId::new("client_t").unwrap(), 0)
    }

    #[test]
    fn closures_are_policies() {
        let policy = |s: &i64, e: &Event<i64>| s * e.payload;
        assert_eq!(policy.merge(&3, &event(4)), 12);
    }

    #[test]
    fn fold_applies_in_order() {
        let events = [event(1), event(2), event(3)];
        assert_eq!(fold(&add, 10, events.iter()), 16);
    }

    #[test]
    fn fold_of_nothing_is_base() {
        let events: Vec<Event<i64>> = Vec::new();
        assert_eq!(fold(&add, 7, events.iter()), 7);
    }

    #[test]
    fn fold_through_trait_object() {
        let policy: Box<dyn MergePolicy<i64, i64>> = Box::new(add);
        let events = [event(5)];
        assert_eq!(fold(policy.as_ref(), 0, events.iter()), 5);
    }
}
