use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard, PoisonError,
        mpsc::{self, Receiver, SyncSender},
    },
};

use crate::{directory::Name, error::Error};

use super::command::Reply;

pub type Outcome = Result<Reply, Error>;

/// A request awaiting its response.
struct Pending {
    sender: SyncSender<Outcome>,
    name: Option<Name>,
}

struct State {
    next: i32,
    pending: HashMap<i32, Pending>,
}

/// Correlation ids of the requests in flight on one channel.
///
/// Ids are handed out from 1 upwards, skipping ids still pending, and wrap
/// back to 1 on overflow. Id 0 is never allocated: a frame carrying it does
/// not expect a response.
pub struct CorrelationTable {
    state: Mutex<State>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    fn starting_at(next: i32) -> Self {
        Self {
            state: Mutex::new(State {
                next,
                pending: HashMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new pending request. `name` is kept for rebuilding
    /// context results on the client side.
    pub fn reserve(&self, name: Option<Name>) -> Reservation<'_> {
        let (sender, receiver) = mpsc::sync_channel(1);
        let mut state = self.state();
        let id = loop {
            let mut id = state.next;
            state.next = state.next.wrapping_add(1);
            if id < 1 {
                id = 1;
                state.next = 2;
            }
            if !state.pending.contains_key(&id) {
                break id;
            }
        };
        state.pending.insert(id, Pending { sender, name });
        Reservation {
            table: self,
            id,
            receiver,
        }
    }

    /// Resolves the request registered under `id`, returning `false` if none is.
    pub fn complete(&self, id: i32, outcome: impl FnOnce(Option<&Name>) -> Outcome) -> bool {
        let (sender, name) = {
            let state = self.state();
            match state.pending.get(&id) {
                Some(pending) => (pending.sender.clone(), pending.name.clone()),
                None => return false,
            }
        };
        // a full slot means the request was already resolved
        sender.try_send(outcome(name.as_ref())).is_ok()
    }

    /// Fails every pending request.
    pub fn fail_all(&self, error: impl Fn() -> Error) {
        let state = self.state();
        for pending in state.pending.values() {
            let _ = pending.sender.try_send(Err(error()));
        }
    }

    pub fn release(&self, id: i32) {
        self.state().pending.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A reserved correlation id, released when dropped.
pub struct Reservation<'a> {
    table: &'a CorrelationTable,
    id: i32,
    receiver: Receiver<Outcome>,
}

impl Reservation<'_> {
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn receiver(&self) -> &Receiver<Outcome> {
        &self.receiver
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.table.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc, thread};

    use super::*;

    #[test]
    fn ids_start_at_one_and_recycle() {
        let table = CorrelationTable::new();
        let first = table.reserve(None);
        let second = table.reserve(None);
        assert_eq!((first.id(), second.id()), (1, 2));
        assert_eq!(table.len(), 2);

        drop(first);
        drop(second);
        assert!(table.is_empty());
    }

    #[test]
    fn overflow_wraps_to_one_never_zero() {
        let table = CorrelationTable::starting_at(i32::MAX);
        let last = table.reserve(None);
        assert_eq!(last.id(), i32::MAX);

        let wrapped = table.reserve(None);
        assert_eq!(wrapped.id(), 1);
        let next = table.reserve(None);
        assert_eq!(next.id(), 2);
    }

    #[test]
    fn pending_ids_are_skipped() {
        let table = CorrelationTable::new();
        let one = table.reserve(None);
        let two = table.reserve(None);
        table.state().next = 2;
        assert_eq!(table.reserve(None).id(), 3);

        // wrapping past the end skips the still-pending 1 and 2
        table.state().next = i32::MAX;
        let max = table.reserve(None);
        assert_eq!(max.id(), i32::MAX);
        assert_eq!(table.reserve(None).id(), 3);
        drop((one, two));
    }

    #[test]
    fn complete_delivers_once() {
        let table = CorrelationTable::new();
        let reservation = table.reserve(Some(Name::from("ctx")));

        assert!(table.complete(reservation.id(), |name| {
            assert_eq!(name, Some(&Name::from("ctx")));
            Ok(Reply::Void)
        }));
        assert!(!table.complete(reservation.id(), |_| Ok(Reply::Void)));
        assert!(matches!(reservation.receiver().recv(), Ok(Ok(Reply::Void))));

        let id = reservation.id();
        drop(reservation);
        assert!(!table.complete(id, |_| Ok(Reply::Void)));
    }

    #[test]
    fn fail_all_wakes_waiters() {
        let table = CorrelationTable::new();
        let a = table.reserve(None);
        let b = table.reserve(None);
        table.fail_all(|| Error::Closed);
        assert!(matches!(a.receiver().recv(), Ok(Err(Error::Closed))));
        assert!(matches!(b.receiver().recv(), Ok(Err(Error::Closed))));
    }

    #[test]
    fn concurrent_reservations_are_unique() {
        let table = Arc::new(CorrelationTable::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    for _ in 0..500 {
                        let held: Vec<_> = (0..4).map(|_| table.reserve(None)).collect();
                        seen.extend(held.iter().map(Reservation::id));
                        let unique: HashSet<_> = held.iter().map(Reservation::id).collect();
                        assert_eq!(unique.len(), held.len());
                    }
                    seen
                })
            })
            .collect();

        for handle in handles {
            let ids = handle.join().unwrap();
            assert!(ids.iter().all(|id| *id > 0));
        }
        assert!(table.is_empty());
    }

    #[test]
    fn held_ids_are_never_shared() {
        let table = Arc::new(CorrelationTable::new());
        let held = Arc::new(Mutex::new(HashSet::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                let held = Arc::clone(&held);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let reservation = table.reserve(None);
                        assert!(held.lock().unwrap().insert(reservation.id()));
                        held.lock().unwrap().remove(&reservation.id());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
