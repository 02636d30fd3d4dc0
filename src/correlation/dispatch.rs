// Kernel dispatch correlation (launch on a host lane → execution on a device)
//
// Launches either take the next value of a per-run counter or carry an
// explicit id. Executions pop by exact id. At most `capacity` dispatches are
// in flight; beyond that the oldest launch is evicted.

use super::Half;
use crate::context::ExecutionContext;
use fnv::FnvHashMap;
use std::collections::BTreeMap;

/// Launch that was pushed out of the in-flight buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictedDispatch {
    pub dispatch_id: u64,
    pub launch: Half,
}

/// Result of recording a launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// Launch is in flight under this id
    Accepted {
        dispatch_id: u64,
        evicted: Option<EvictedDispatch>,
    },
    /// The id is already in flight; the new launch was dropped
    Duplicate { dispatch_id: u64 },
}

/// In-flight dispatch buffer
#[derive(Debug, Clone)]
pub struct DispatchMatcher {
    next_id: u64,
    next_seq: u64,
    in_flight: FnvHashMap<u64, (u64, Half)>,
    /// launch order: seq → dispatch id
    order: BTreeMap<u64, u64>,
    capacity: usize,
}

impl DispatchMatcher {
    pub fn new(capacity: usize) -> Self {
        Self {
            next_id: 0,
            next_seq: 0,
            in_flight: FnvHashMap::default(),
            order: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record a launch under the next counter value
    pub fn launch(&mut self, context: ExecutionContext, timestamp: u64) -> LaunchOutcome {
        let dispatch_id = self.next_id;
        self.next_id += 1;
        self.launch_with_id(dispatch_id, context, timestamp)
    }

    /// Record a launch under an explicit id
    pub fn launch_with_id(&mut self, dispatch_id: u64, context: ExecutionContext, timestamp: u64) -> LaunchOutcome {
        if self.in_flight.contains_key(&dispatch_id) {
            return LaunchOutcome::Duplicate { dispatch_id };
        }
        // Keep the counter ahead of explicit ids so the two never collide
        self.next_id = self.next_id.max(dispatch_id.saturating_add(1));

        let evicted = if self.in_flight.len() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        self.in_flight.insert(dispatch_id, (seq, Half { context, timestamp }));
        self.order.insert(seq, dispatch_id);
        LaunchOutcome::Accepted { dispatch_id, evicted }
    }

    /// Consume the launch with this id
    pub fn execute(&mut self, dispatch_id: u64) -> Option<Half> {
        let (seq, launch) = self.in_flight.remove(&dispatch_id)?;
        self.order.remove(&seq);
        Some(launch)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Remove every unexecuted launch, oldest first
    pub fn drain(&mut self) -> Vec<EvictedDispatch> {
        let order = std::mem::take(&mut self.order);
        let mut in_flight = std::mem::take(&mut self.in_flight);
        order
            .into_values()
            .filter_map(|dispatch_id| {
                in_flight
                    .remove(&dispatch_id)
                    .map(|(_, launch)| EvictedDispatch { dispatch_id, launch })
            })
            .collect()
    }

    fn evict_oldest(&mut self) -> Option<EvictedDispatch> {
        let (_, dispatch_id) = self.order.pop_first()?;
        let (_, launch) = self.in_flight.remove(&dispatch_id)?;
        Some(EvictedDispatch { dispatch_id, launch })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: ExecutionContext = ExecutionContext(1);

    #[test]
    fn test_counter_assigns_increasing_ids() {
        let mut matcher = DispatchMatcher::new(8);
        assert!(matches!(matcher.launch(HOST, 0), LaunchOutcome::Accepted { dispatch_id: 0, .. }));
        assert!(matches!(matcher.launch(HOST, 1), LaunchOutcome::Accepted { dispatch_id: 1, .. }));
        assert_eq!(matcher.in_flight(), 2);
    }

    #[test]
    fn test_execute_pops_exact_id_out_of_order() {
        let mut matcher = DispatchMatcher::new(8);
        matcher.launch(HOST, 10);
        matcher.launch(HOST, 20);

        assert_eq!(matcher.execute(1), Some(Half { context: HOST, timestamp: 20 }));
        assert_eq!(matcher.execute(1), None);
        assert_eq!(matcher.execute(0), Some(Half { context: HOST, timestamp: 10 }));
    }

    #[test]
    fn test_duplicate_explicit_id() {
        let mut matcher = DispatchMatcher::new(8);
        matcher.launch_with_id(42, HOST, 0);
        assert_eq!(matcher.launch_with_id(42, HOST, 1), LaunchOutcome::Duplicate { dispatch_id: 42 });
        // The first launch is kept
        assert_eq!(matcher.execute(42).map(|h| h.timestamp), Some(0));
        // Counter continues past explicit ids
        assert!(matches!(matcher.launch(HOST, 2), LaunchOutcome::Accepted { dispatch_id: 43, .. }));
    }

    #[test]
    fn test_oldest_evicted_when_full() {
        let mut matcher = DispatchMatcher::new(2);
        matcher.launch(HOST, 0);
        matcher.launch(HOST, 1);
        match matcher.launch(HOST, 2) {
            LaunchOutcome::Accepted { dispatch_id, evicted } => {
                assert_eq!(dispatch_id, 2);
                assert_eq!(evicted.map(|e| e.dispatch_id), Some(0));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(matcher.in_flight(), 2);
        assert_eq!(matcher.execute(0), None);
    }

    #[test]
    fn test_drain_in_launch_order() {
        let mut matcher = DispatchMatcher::new(8);
        matcher.launch_with_id(9, HOST, 0);
        matcher.launch_with_id(3, HOST, 1);
        let drained: Vec<u64> = matcher.drain().into_iter().map(|e| e.dispatch_id).collect();
        assert_eq!(drained, vec![9, 3]);
        assert_eq!(matcher.in_flight(), 0);
    }
}
