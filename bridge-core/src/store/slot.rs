use bridge::Response;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Default)]
struct SlotState {
    response: Option<Response>,
    /// Bumped on every `put`, so waiters can tell a fresh reply from a stale one.
    generation: u64,
}

/// Holder of the single most recent server reply.
///
/// There is no queue: a reply that arrives before the previous one was read
/// replaces it.
#[derive(Default)]
pub struct ResponseSlot {
    state: Mutex<SlotState>,
    arrived: Condvar,
}

impl ResponseSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `response`, returning the reply it displaced.
    pub fn put(&self, response: Response) -> Option<Response> {
        let mut state = self.lock();
        let displaced = state.response.replace(response);
        state.generation = state.generation.wrapping_add(1);
        self.arrived.notify_all();
        displaced
    }

    /// A copy of the current reply, leaving it in place.
    pub fn get(&self) -> Option<Response> {
        self.lock().response.clone()
    }

    /// Removes and returns the current reply.
    pub fn take(&self) -> Option<Response> {
        self.lock().response.take()
    }

    pub fn clear(&self) {
        self.lock().response = None;
    }

    pub fn is_empty(&self) -> bool {
        self.lock().response.is_none()
    }

    /// Number of replies stored since creation.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Waits until the slot holds a reply or `timeout` elapses.
    ///
    /// Returns a copy of the reply, or `None` if the slot stayed empty.
    pub fn wait_for(&self, timeout: Duration) -> Option<Response> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(response) = &state.response {
                return Some(response.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .arrived
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};
    use std::sync::Arc;
    use std::thread;

    fn reply(action: &str) -> Response {
        let mut fields = Map::new();
        fields.insert("_action".into(), Value::String(action.into()));
        Response::Unknown(fields)
    }

    #[test]
    fn test_last_write_wins() {
        let slot = ResponseSlot::new();
        assert!(slot.is_empty());
        assert_eq!(slot.put(reply("FIRST")), None);
        assert_eq!(slot.put(reply("SECOND")), Some(reply("FIRST")));
        assert_eq!(slot.get(), Some(reply("SECOND")));
        assert_eq!(slot.generation(), 2);
    }

    #[test]
    fn test_take_and_clear() {
        let slot = ResponseSlot::new();
        slot.put(reply("A"));
        assert_eq!(slot.take(), Some(reply("A")));
        assert!(slot.is_empty());

        slot.put(reply("B"));
        slot.clear();
        assert_eq!(slot.get(), None);
    }

    #[test]
    fn test_wait_times_out_on_empty_slot() {
        let slot = ResponseSlot::new();
        let started = Instant::now();
        assert_eq!(slot.wait_for(Duration::from_millis(50)), None);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_wait_wakes_on_put() {
        let slot = Arc::new(ResponseSlot::new());
        let writer = slot.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.put(Response::Unknown(
                json!({"_action": "EXECUTION"}).as_object().unwrap().clone(),
            ));
        });

        let started = Instant::now();
        let response = slot.wait_for(Duration::from_secs(5));
        handle.join().unwrap();

        assert_eq!(response.unwrap().action(), Some("EXECUTION"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
