//! Order-acknowledgment generator.
//!
//! Acks follow a small order lifecycle: OPEN, then either a partial fill or a
//! cancel, then either a complete fill or a cancel of the partial. Generation
//! and state tracking are inseparable: every emitted ack updates the tracked
//! order synchronously before it is returned, so the stream is always
//! consistent with the tracker.

use std::collections::{HashMap, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use marketpipe_types::{AckRecord, OrderSide, OrderStatus, OrderType, RecordType, TimeInForce};

use super::{now_epoch, GeneratedRecord, RecordGenerator};

const DEFAULT_TRACKED_ORDERS: usize = 1024;

/// Tracked state for one open order.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedOrder {
    pub status: OrderStatus,
    pub amount: f64,
    pub filled: f64,
    pub direction: OrderSide,
    pub client_order_id: Option<i64>,
}

/// Bounded, insertion-ordered order map. When the bound is exceeded the
/// oldest tracked order is evicted, terminal or not.
pub struct OrderTracker {
    orders: HashMap<String, TrackedOrder>,
    insertion: VecDeque<String>,
    capacity: usize,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TRACKED_ORDERS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            orders: HashMap::new(),
            insertion: VecDeque::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn get(&self, order_id: &str) -> Option<&TrackedOrder> {
        self.orders.get(order_id)
    }

    pub fn insert(&mut self, order_id: String, order: TrackedOrder) {
        if self.orders.insert(order_id.clone(), order).is_none() {
            self.insertion.push_back(order_id);
        }
        while self.orders.len() > self.capacity {
            // Entries in the queue may already be gone from the map; skip
            // them until a live one is found.
            match self.insertion.pop_front() {
                Some(oldest) => {
                    if self.orders.remove(&oldest).is_some() {
                        tracing::debug!(order_id = %oldest, "Evicted oldest tracked order");
                    }
                }
                None => break,
            }
        }
    }

    fn update<F: FnOnce(&mut TrackedOrder)>(&mut self, order_id: &str, f: F) {
        if let Some(order) = self.orders.get_mut(order_id) {
            f(order);
        }
    }

    /// Pick a uniformly random non-terminal order, if any.
    fn pick_active(&self, rng: &mut StdRng) -> Option<(String, TrackedOrder)> {
        let active: Vec<&String> = self
            .insertion
            .iter()
            .filter(|id| {
                self.orders
                    .get(id.as_str())
                    .is_some_and(|o| !o.status.is_terminal())
            })
            .collect();
        if active.is_empty() {
            return None;
        }
        let id = active[rng.gen_range(0..active.len())].clone();
        let order = self.orders.get(&id).cloned()?;
        Some((id, order))
    }
}

impl Default for OrderTracker {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AckGenerator {
    rng: StdRng,
    tracker: OrderTracker,
}

impl AckGenerator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            tracker: OrderTracker::new(),
        }
    }

    pub fn with_tracker(rng: StdRng, tracker: OrderTracker) -> Self {
        Self { rng, tracker }
    }

    pub fn tracker(&self) -> &OrderTracker {
        &self.tracker
    }

    fn new_order(&mut self) -> AckRecord {
        let rng = &mut self.rng;
        let order_id = Uuid::new_v4().to_string();
        let direction = if rng.gen_bool(0.5) {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };
        let amount = rng.gen_range(0.1..1.0);
        let client_order_id = Some(rng.gen_range(100..=999));

        let ack = AckRecord {
            order_id: order_id.clone(),
            client_order_id,
            instrument_name: "BTC-PERPETUAL".to_string(),
            direction,
            price: Some(rng.gen_range(95_000.0..97_000.0)),
            amount,
            filled_amount: 0.0,
            remaining_amount: amount,
            status: OrderStatus::Open,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::GoodTillCancelled,
            change_reason: "insert".to_string(),
            delete_reason: None,
            insert_reason: Some("client_request".to_string()),
            create_time: now_epoch(),
            persistent: false,
        };

        self.tracker.insert(
            order_id,
            TrackedOrder {
                status: OrderStatus::Open,
                amount,
                filled: 0.0,
                direction,
                client_order_id,
            },
        );
        tracing::debug!(order_id = %ack.order_id, "Generated new order ack");
        ack
    }

    /// Returns `None` when the order is already terminal; the caller falls
    /// back to creating a new order.
    fn update_order(&mut self, order_id: String, current: TrackedOrder) -> Option<AckRecord> {
        let rng = &mut self.rng;
        let (status, filled, remaining, change, delete) = match current.status {
            OrderStatus::Open => {
                if rng.gen_bool(0.3) {
                    (OrderStatus::Cancelled, 0.0, 0.0, "cancel", Some("client_cancel"))
                } else {
                    let filled = current.amount * rng.gen_range(0.1..0.9);
                    (
                        OrderStatus::PartiallyFilled,
                        filled,
                        current.amount - filled,
                        "fill",
                        None,
                    )
                }
            }
            OrderStatus::PartiallyFilled => {
                if rng.gen_bool(0.3) {
                    (
                        OrderStatus::CancelledPartiallyFilled,
                        current.filled,
                        0.0,
                        "cancel",
                        Some("client_cancel"),
                    )
                } else {
                    (OrderStatus::Filled, current.amount, 0.0, "fill", None)
                }
            }
            _ => return None,
        };

        let ack = AckRecord {
            order_id: order_id.clone(),
            client_order_id: current.client_order_id,
            instrument_name: "BTC-PERPETUAL".to_string(),
            direction: current.direction,
            price: Some(rng.gen_range(95_000.0..97_000.0)),
            amount: current.amount,
            filled_amount: filled,
            remaining_amount: remaining,
            status,
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::GoodTillCancelled,
            change_reason: change.to_string(),
            delete_reason: delete.map(str::to_string),
            insert_reason: None,
            create_time: now_epoch(),
            persistent: false,
        };

        self.tracker.update(&order_id, |order| {
            order.status = status;
            order.filled = filled;
        });
        tracing::debug!(order_id = %ack.order_id, status = %ack.status, "Generated order update ack");
        Some(ack)
    }
}

impl Default for AckGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordGenerator for AckGenerator {
    fn record_type(&self) -> RecordType {
        RecordType::Ack
    }

    fn generate(&mut self) -> GeneratedRecord {
        // New order with probability 0.7, always when nothing is tracked yet.
        if self.tracker.is_empty() || self.rng.gen_bool(0.7) {
            return GeneratedRecord::Ack(self.new_order());
        }
        // Update path: a terminal-only tracker means there is nothing to
        // transition, so fall back to a new order.
        let update = self
            .tracker
            .pick_active(&mut self.rng)
            .and_then(|(order_id, current)| self.update_order(order_id, current));
        match update {
            Some(ack) => GeneratedRecord::Ack(ack),
            None => GeneratedRecord::Ack(self.new_order()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    fn ack_from(gen: &mut AckGenerator) -> AckRecord {
        match gen.generate() {
            GeneratedRecord::Ack(a) => a,
            other => panic!("expected ack, got {:?}", other),
        }
    }

    #[test]
    fn first_ack_is_always_a_new_open_order() {
        for seed in 0..20 {
            let mut gen = AckGenerator::with_rng(seeded(seed));
            let ack = ack_from(&mut gen);
            assert_eq!(ack.status, OrderStatus::Open);
            assert_eq!(ack.filled_amount, 0.0);
            assert_eq!(ack.remaining_amount, ack.amount);
            assert_eq!(ack.change_reason, "insert");
            assert_eq!(ack.insert_reason.as_deref(), Some("client_request"));
            assert_eq!(ack.delete_reason, None);
        }
    }

    #[test]
    fn amounts_respect_status_arithmetic() {
        let mut gen = AckGenerator::with_rng(seeded(42));
        for _ in 0..2000 {
            let ack = ack_from(&mut gen);
            assert!(
                ack.filled_amount + ack.remaining_amount <= ack.amount + 1e-9,
                "filled {} + remaining {} > amount {}",
                ack.filled_amount,
                ack.remaining_amount,
                ack.amount
            );
            match ack.status {
                OrderStatus::Open => {
                    assert_eq!(ack.filled_amount, 0.0);
                    assert_eq!(ack.remaining_amount, ack.amount);
                }
                OrderStatus::PartiallyFilled => {
                    assert!(ack.filled_amount > 0.0 && ack.filled_amount < ack.amount);
                    assert!(
                        (ack.remaining_amount - (ack.amount - ack.filled_amount)).abs() < 1e-9
                    );
                }
                OrderStatus::Filled => {
                    assert_eq!(ack.filled_amount, ack.amount);
                    assert_eq!(ack.remaining_amount, 0.0);
                }
                OrderStatus::Cancelled => {
                    assert_eq!(ack.filled_amount, 0.0);
                    assert_eq!(ack.remaining_amount, 0.0);
                }
                OrderStatus::CancelledPartiallyFilled => {
                    assert!(ack.filled_amount > 0.0);
                    assert_eq!(ack.remaining_amount, 0.0);
                }
            }
        }
    }

    #[test]
    fn reason_fields_match_status() {
        let mut gen = AckGenerator::with_rng(seeded(9));
        for _ in 0..2000 {
            let ack = ack_from(&mut gen);
            match ack.status {
                OrderStatus::Open => {
                    assert_eq!(ack.change_reason, "insert");
                    assert!(ack.insert_reason.is_some());
                    assert!(ack.delete_reason.is_none());
                }
                OrderStatus::PartiallyFilled | OrderStatus::Filled => {
                    assert_eq!(ack.change_reason, "fill");
                    assert!(ack.insert_reason.is_none());
                    assert!(ack.delete_reason.is_none());
                }
                OrderStatus::Cancelled | OrderStatus::CancelledPartiallyFilled => {
                    assert_eq!(ack.change_reason, "cancel");
                    assert!(ack.insert_reason.is_none());
                    assert_eq!(ack.delete_reason.as_deref(), Some("client_cancel"));
                }
            }
        }
    }

    #[test]
    fn updates_never_touch_terminal_orders() {
        let mut gen = AckGenerator::with_rng(seeded(17));
        let mut terminal_seen: std::collections::HashSet<String> = Default::default();
        for _ in 0..2000 {
            let ack = ack_from(&mut gen);
            assert!(
                !terminal_seen.contains(&ack.order_id),
                "order {} transitioned after reaching a terminal state",
                ack.order_id
            );
            if ack.status.is_terminal() {
                terminal_seen.insert(ack.order_id);
            }
        }
    }

    #[test]
    fn tracker_reflects_every_emitted_ack() {
        let mut gen = AckGenerator::with_rng(seeded(5));
        for _ in 0..500 {
            let ack = ack_from(&mut gen);
            let tracked = gen.tracker().get(&ack.order_id).expect("order is tracked");
            assert_eq!(tracked.status, ack.status);
            assert_eq!(tracked.amount, ack.amount);
            assert_eq!(tracked.filled, ack.filled_amount);
            assert_eq!(tracked.client_order_id, ack.client_order_id);
        }
    }

    #[test]
    fn tracker_evicts_oldest_beyond_capacity() {
        let mut tracker = OrderTracker::with_capacity(3);
        for i in 0..5 {
            tracker.insert(
                format!("order-{i}"),
                TrackedOrder {
                    status: OrderStatus::Open,
                    amount: 1.0,
                    filled: 0.0,
                    direction: OrderSide::Buy,
                    client_order_id: None,
                },
            );
        }
        assert_eq!(tracker.len(), 3);
        assert!(tracker.get("order-0").is_none());
        assert!(tracker.get("order-1").is_none());
        assert!(tracker.get("order-2").is_some());
        assert!(tracker.get("order-4").is_some());
    }

    #[test]
    fn generator_stays_within_tracking_bound() {
        let mut gen = AckGenerator::with_tracker(seeded(23), OrderTracker::with_capacity(16));
        for _ in 0..1000 {
            let _ = gen.generate();
            assert!(gen.tracker().len() <= 16);
        }
    }
}
