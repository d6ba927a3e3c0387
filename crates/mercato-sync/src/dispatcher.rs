//! # Webhook Dispatcher
//!
//! Drains the durable event queue in priority order, one event at a time.
//!
//! ## Run Phases
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Dispatcher Run                                     │
//! │                                                                         │
//! │  1. RECLAIM   claims older than stuck_after → processing = 0           │
//! │                                                                         │
//! │  2. MAIN      fresh (within lookback) + due retries                    │
//! │               ORDER BY priority, received_at  LIMIT batch_size         │
//! │                                                                         │
//! │  3. RETRY     due retries only, ORDER BY received_at                   │
//! │               LIMIT batch_size / 2                                     │
//! │                                                                         │
//! │  4. CLEANUP   purge processed > 30d, abandoned > 7d                    │
//! │               recompute today's WebhookDailyStats                      │
//! │                                                                         │
//! │  Budget checked before every event; exhaustion ends the pass.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Per-Event Flow
//! ```text
//!   claim ──lost──► skip
//!     │
//!     ▼
//!   handle ──ok──► processed = 1, processed_at = now
//!     │
//!     └──err──► retry_count + 1, next_retry_at = now + 2^min(5, n+1) min
//!               (abandoned once retry_count reaches max_retries)
//! ```
//!
//! Timestamps written during a run use the run's `now`.

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

use mercato_core::retry::next_retry_at;
use mercato_core::{WebhookEvent, ABANDONED_RETENTION_DAYS, PROCESSED_RETENTION_DAYS};
use mercato_db::Database;

use crate::config::{DispatcherSettings, SyncConfig};
use crate::error::SyncResult;
use crate::handlers::EventHandlers;
use crate::rate_limit::ExecutionBudget;
use crate::stats::RunStats;

/// Processes queued webhook events.
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    db: Database,
    handlers: EventHandlers,
    settings: DispatcherSettings,
}

impl WebhookDispatcher {
    pub fn new(db: Database, config: &SyncConfig) -> Self {
        WebhookDispatcher {
            handlers: EventHandlers::new(db.clone(), &config.features),
            db,
            settings: config.dispatcher.clone(),
        }
    }

    /// Runs all phases once.
    pub async fn run(&self, now: DateTime<Utc>, stats: &mut RunStats) -> SyncResult<()> {
        let budget = ExecutionBudget::start(
            Duration::from_secs(self.settings.max_execution_secs),
            Duration::from_secs(self.settings.safety_margin_secs),
        );

        self.reclaim_stuck(now).await?;

        let lookback_since = now - ChronoDuration::hours(self.settings.lookback_hours);
        let due = self
            .db
            .webhook_events()
            .select_due(
                i64::from(self.settings.batch_size),
                self.settings.max_retries,
                lookback_since,
                now,
            )
            .await?;
        info!(count = due.len(), "Dispatching webhook events");
        self.dispatch_all(&due, now, &budget, stats, false).await;
        stats.phase_done("main");

        if budget.is_exhausted() {
            info!("Execution budget exhausted, skipping retry pass");
        } else {
            let retry_limit = i64::from((self.settings.batch_size / 2).max(1));
            let retries = self
                .db
                .webhook_events()
                .select_retry_due(retry_limit, self.settings.max_retries, now)
                .await?;
            if !retries.is_empty() {
                info!(count = retries.len(), "Retrying failed webhook events");
            }
            self.dispatch_all(&retries, now, &budget, stats, true).await;
            stats.phase_done("retry");
        }

        self.cleanup(now).await?;
        Ok(())
    }

    /// Releases claims a crashed run never resolved. Retry count is not charged.
    pub async fn reclaim_stuck(&self, now: DateTime<Utc>) -> SyncResult<u64> {
        let claimed_before = now - ChronoDuration::minutes(self.settings.stuck_after_minutes);
        let released = self.db.webhook_events().release_stuck(claimed_before).await?;
        if released > 0 {
            warn!(released, "Released stuck webhook events");
        }
        Ok(released)
    }

    /// Purges old events and refreshes today's queue statistics.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> SyncResult<()> {
        let events = self.db.webhook_events();

        let purged = events
            .purge(
                now - ChronoDuration::days(PROCESSED_RETENTION_DAYS),
                now - ChronoDuration::days(ABANDONED_RETENTION_DAYS),
                self.settings.max_retries,
            )
            .await?;
        if purged.processed + purged.abandoned > 0 {
            info!(
                processed = purged.processed,
                abandoned = purged.abandoned,
                "Purged old webhook events"
            );
        }

        let day_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        let day = now.format("%Y-%m-%d").to_string();
        let daily = events
            .daily_counts(&day, day_start, day_start + ChronoDuration::days(1), self.settings.max_retries)
            .await?;
        self.db.stats().upsert_webhook_day(&daily, now).await?;

        debug!(
            day = %daily.day,
            received = daily.total_received,
            processed = daily.total_processed,
            failed = daily.total_failed,
            "Webhook daily stats updated"
        );
        Ok(())
    }

    async fn dispatch_all(
        &self,
        events: &[WebhookEvent],
        now: DateTime<Utc>,
        budget: &ExecutionBudget,
        stats: &mut RunStats,
        retry_pass: bool,
    ) {
        for event in events {
            if budget.is_exhausted() {
                info!(elapsed_ms = budget.elapsed().as_millis() as u64, "Execution budget exhausted");
                break;
            }
            if self.dispatch(event, now, stats).await && retry_pass {
                stats.counters_mut().retried += 1;
            }
        }
    }

    /// Claims and handles one event. Returns `false` if the claim was lost.
    async fn dispatch(&self, event: &WebhookEvent, now: DateTime<Utc>, stats: &mut RunStats) -> bool {
        let events = self.db.webhook_events();

        match events.claim(&event.id, now).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(id = %event.id, "Event claimed elsewhere, skipping");
                return false;
            }
            Err(e) => {
                warn!(id = %event.id, error = %e, "Failed to claim event");
                return false;
            }
        }

        stats.counters_mut().processed += 1;

        match self.handlers.handle(event, now).await {
            Ok(()) => {
                if let Err(e) = events.mark_processed(&event.id, now).await {
                    warn!(id = %event.id, error = %e, "Failed to mark event processed");
                }
                stats.counters_mut().succeeded += 1;
            }
            Err(err) => {
                stats.counters_mut().failed += 1;
                let retry_at = next_retry_at(now, event.retry_count);
                let attempts = event.retry_count + 1;

                if attempts >= self.settings.max_retries {
                    warn!(
                        id = %event.id,
                        event_type = %event.event_type,
                        attempts,
                        error = %err,
                        "Webhook event abandoned"
                    );
                } else {
                    warn!(
                        id = %event.id,
                        event_type = %event.event_type,
                        attempts,
                        next_retry_at = %retry_at,
                        error = %err,
                        "Webhook event failed"
                    );
                }

                if let Err(e) = events.record_failure(&event.id, &err.to_string(), retry_at).await {
                    warn!(id = %event.id, error = %e, "Failed to record event failure");
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mercato_core::{JobKind, Money};
    use mercato_db::{DbConfig, NewProduct};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    async fn setup(settings: DispatcherSettings) -> (Database, WebhookDispatcher) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let config = SyncConfig {
            dispatcher: settings,
            ..SyncConfig::default()
        };
        let dispatcher = WebhookDispatcher::new(db.clone(), &config);
        (db, dispatcher)
    }

    async fn run(dispatcher: &WebhookDispatcher, now: DateTime<Utc>) -> RunStats {
        let mut stats = RunStats::start(JobKind::WebhookDispatcher, now);
        dispatcher.run(now, &mut stats).await.unwrap();
        stats
    }

    #[tokio::test]
    async fn test_higher_priority_first() {
        let (db, dispatcher) = setup(DispatcherSettings {
            batch_size: 2,
            ..Default::default()
        })
        .await;
        let events = db.webhook_events();

        // Inventory events arrive first but carry priority 3
        let stock_a = events
            .enqueue("INVENTORY_UPDATED", r#"{"barcode":"X1","quantity":1}"#, t0())
            .await
            .unwrap();
        let stock_b = events
            .enqueue("INVENTORY_UPDATED", r#"{"barcode":"X2","quantity":1}"#, t0())
            .await
            .unwrap();
        let order_a = events
            .enqueue("ORDER_CREATED", r#"{"orderNumber":"A"}"#, t0() + ChronoDuration::seconds(1))
            .await
            .unwrap();
        let order_b = events
            .enqueue("ORDER_CREATED", r#"{"orderNumber":"B"}"#, t0() + ChronoDuration::seconds(2))
            .await
            .unwrap();

        let stats = run(&dispatcher, t0() + ChronoDuration::minutes(1)).await;
        assert_eq!(stats.counters().processed, 2);

        for id in [&order_a.id, &order_b.id] {
            assert!(events.get(id).await.unwrap().unwrap().processed);
        }
        for id in [&stock_a.id, &stock_b.id] {
            assert!(!events.get(id).await.unwrap().unwrap().processed);
        }
    }

    #[tokio::test]
    async fn test_retry_pass_takes_remainder_in_arrival_order() {
        let (db, dispatcher) = setup(DispatcherSettings {
            batch_size: 2,
            ..Default::default()
        })
        .await;
        let events = db.webhook_events();

        // Three failed stock events, all due again by the time the run starts
        let mut retries = Vec::new();
        for (i, barcode) in ["R1", "R2", "R3"].iter().enumerate() {
            let payload = format!(r#"{{"barcode":"{}","quantity":1}}"#, barcode);
            let event = events
                .enqueue("INVENTORY_UPDATED", &payload, t0() + ChronoDuration::seconds(i as i64))
                .await
                .unwrap();
            events
                .record_failure(&event.id, "temporarily unavailable", t0() + ChronoDuration::minutes(1))
                .await
                .unwrap();
            retries.push(event);
        }

        // Fresh order events fill the main pass
        let mut orders = Vec::new();
        for (i, number) in ["O1", "O2"].iter().enumerate() {
            let payload = format!(r#"{{"orderNumber":"{}"}}"#, number);
            orders.push(
                events
                    .enqueue("ORDER_CREATED", &payload, t0() + ChronoDuration::seconds(10 + i as i64))
                    .await
                    .unwrap(),
            );
        }

        let stats = run(&dispatcher, t0() + ChronoDuration::minutes(5)).await;
        assert_eq!(stats.counters().processed, 3);
        assert_eq!(stats.counters().succeeded, 3);
        assert_eq!(stats.counters().retried, 1);

        for order in &orders {
            assert!(events.get(&order.id).await.unwrap().unwrap().processed);
        }
        assert!(events.get(&retries[0].id).await.unwrap().unwrap().processed);
        for later in &retries[1..] {
            let stored = events.get(&later.id).await.unwrap().unwrap();
            assert!(!stored.processed);
            assert_eq!(stored.retry_count, 1);
        }
    }

    #[tokio::test]
    async fn test_backoff_growth_until_abandoned() {
        let (db, dispatcher) = setup(DispatcherSettings {
            max_retries: 5,
            ..Default::default()
        })
        .await;
        let events = db.webhook_events();
        let event = events.enqueue("ORDER_TELEPORTED", "{}", t0()).await.unwrap();

        let mut now = t0();
        let mut gaps = Vec::new();
        for attempt in 1..=5 {
            run(&dispatcher, now).await;
            let stored = events.get(&event.id).await.unwrap().unwrap();
            assert_eq!(stored.retry_count, attempt);
            assert_eq!(
                stored.error_message.as_deref(),
                Some("Unsupported event type: ORDER_TELEPORTED")
            );

            let next = stored.next_retry_at.unwrap();
            gaps.push((next - now).num_minutes());
            now = next;
        }
        assert_eq!(gaps, vec![2, 4, 8, 16, 32]);

        // Retries exhausted: never selected again
        let stats = run(&dispatcher, now + ChronoDuration::hours(1)).await;
        assert_eq!(stats.counters().processed, 0);
        let stored = events.get(&event.id).await.unwrap().unwrap();
        assert!(stored.is_abandoned(5));
    }

    #[tokio::test]
    async fn test_default_retries_abandon_after_three() {
        let (db, dispatcher) = setup(DispatcherSettings::default()).await;
        let events = db.webhook_events();
        let event = events
            .enqueue("ORDER_STATUS_CHANGED", r#"{"orderNumber":"N/A","status":"Picking"}"#, t0())
            .await
            .unwrap();

        let mut now = t0();
        for _ in 0..3 {
            run(&dispatcher, now).await;
            now = events.get(&event.id).await.unwrap().unwrap().next_retry_at.unwrap();
        }

        assert_eq!(run(&dispatcher, now).await.counters().processed, 0);
        assert_eq!(events.count_pending(3).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_events_outside_lookback() {
        let (db, dispatcher) = setup(DispatcherSettings::default()).await;
        let events = db.webhook_events();
        let old = events
            .enqueue("ORDER_CREATED", r#"{"orderNumber":"OLD"}"#, t0() - ChronoDuration::hours(25))
            .await
            .unwrap();

        run(&dispatcher, t0()).await;
        assert!(!events.get(&old.id).await.unwrap().unwrap().processed);
    }

    #[tokio::test]
    async fn test_stuck_claims_are_reclaimed() {
        let (db, dispatcher) = setup(DispatcherSettings::default()).await;
        let events = db.webhook_events();
        let event = events
            .enqueue("ORDER_CREATED", r#"{"orderNumber":"S-1"}"#, t0())
            .await
            .unwrap();

        // A crashed run claimed it 45 minutes ago
        assert!(events.claim(&event.id, t0()).await.unwrap());

        let now = t0() + ChronoDuration::minutes(45);
        let stats = run(&dispatcher, now).await;
        assert_eq!(stats.counters().succeeded, 1);

        let stored = events.get(&event.id).await.unwrap().unwrap();
        assert!(stored.processed);
        assert_eq!(stored.retry_count, 0);
    }

    #[tokio::test]
    async fn test_fresh_claims_are_left_alone() {
        let (db, dispatcher) = setup(DispatcherSettings::default()).await;
        let events = db.webhook_events();
        let event = events
            .enqueue("ORDER_CREATED", r#"{"orderNumber":"S-2"}"#, t0())
            .await
            .unwrap();
        assert!(events.claim(&event.id, t0()).await.unwrap());

        let stats = run(&dispatcher, t0() + ChronoDuration::minutes(5)).await;
        assert_eq!(stats.counters().processed, 0);
        assert!(events.get(&event.id).await.unwrap().unwrap().processing);
    }

    #[tokio::test]
    async fn test_retention_only_purges_old_resolved_events() {
        let (db, dispatcher) = setup(DispatcherSettings::default()).await;
        let events = db.webhook_events();
        let now = t0();

        let processed_old = events.enqueue("ORDER_CREATED", "{}", now - ChronoDuration::days(40)).await.unwrap();
        events.mark_processed(&processed_old.id, now - ChronoDuration::days(31)).await.unwrap();

        let processed_recent = events.enqueue("ORDER_CREATED", "{}", now - ChronoDuration::days(40)).await.unwrap();
        events.mark_processed(&processed_recent.id, now - ChronoDuration::days(29)).await.unwrap();

        let abandoned_old = events.enqueue("BAD", "{}", now - ChronoDuration::days(8)).await.unwrap();
        let abandoned_young = events.enqueue("BAD", "{}", now - ChronoDuration::days(6)).await.unwrap();
        let failing_old = events.enqueue("BAD", "{}", now - ChronoDuration::days(8)).await.unwrap();

        for id in [&abandoned_old.id, &abandoned_young.id] {
            for _ in 0..3 {
                events.record_failure(id, "boom", now + ChronoDuration::days(1)).await.unwrap();
            }
        }
        events
            .record_failure(&failing_old.id, "boom", now + ChronoDuration::days(1))
            .await
            .unwrap();

        dispatcher.cleanup(now).await.unwrap();

        assert!(events.get(&processed_old.id).await.unwrap().is_none());
        assert!(events.get(&abandoned_old.id).await.unwrap().is_none());
        assert!(events.get(&processed_recent.id).await.unwrap().is_some());
        assert!(events.get(&abandoned_young.id).await.unwrap().is_some());
        assert!(events.get(&failing_old.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_daily_stats_recorded() {
        let (db, dispatcher) = setup(DispatcherSettings::default()).await;
        let events = db.webhook_events();
        events.enqueue("ORDER_CREATED", r#"{"orderNumber":"D-1"}"#, t0()).await.unwrap();
        events.enqueue("ORDER_TELEPORTED", "{}", t0()).await.unwrap();

        run(&dispatcher, t0() + ChronoDuration::minutes(1)).await;

        let daily = db.stats().webhook_day("2025-06-01").await.unwrap().unwrap();
        assert_eq!(daily.total_received, 2);
        assert_eq!(daily.total_processed, 1);
        assert_eq!(daily.total_failed, 0);
    }

    #[tokio::test]
    async fn test_inventory_update_scenario() {
        let (db, dispatcher) = setup(DispatcherSettings::default()).await;
        let events = db.webhook_events();

        let product_id = db
            .catalog()
            .insert_product(&NewProduct::new("SKU-42", "Tea Glass", Money::from_cents(4500), 3), t0())
            .await
            .unwrap();
        db.mappings().record_upload(product_id, Some("R-42"), "B1", t0()).await.unwrap();
        db.mappings().approve_by_barcode("B1", t0()).await.unwrap();

        let payload = r#"{"barcode":"B1","quantity":7}"#;
        let first = t0() + ChronoDuration::minutes(1);
        events.enqueue("INVENTORY_UPDATED", payload, first).await.unwrap();
        run(&dispatcher, first).await;

        let product = db.catalog().get_product(product_id).await.unwrap().unwrap();
        assert_eq!(product.quantity, 7);
        let mapping = db.mappings().get(product_id).await.unwrap().unwrap();
        assert_eq!(mapping.last_stock_sync_at, Some(first));

        // Resubmission: same end state, stamp advances
        let second = t0() + ChronoDuration::minutes(2);
        events.enqueue("INVENTORY_UPDATED", payload, second).await.unwrap();
        let stats = run(&dispatcher, second).await;
        assert_eq!(stats.counters().succeeded, 1);

        let product = db.catalog().get_product(product_id).await.unwrap().unwrap();
        assert_eq!(product.quantity, 7);
        let mapping = db.mappings().get(product_id).await.unwrap().unwrap();
        assert_eq!(mapping.last_stock_sync_at, Some(second));
    }

    #[tokio::test]
    async fn test_duplicate_order_created_yields_one_order() {
        let (db, dispatcher) = setup(DispatcherSettings::default()).await;
        let events = db.webhook_events();
        let payload = r#"{"orderNumber":"TY-7","grossAmount":10}"#;
        events.enqueue("ORDER_CREATED", payload, t0()).await.unwrap();
        events.enqueue("order-created", payload, t0()).await.unwrap();

        let stats = run(&dispatcher, t0() + ChronoDuration::minutes(1)).await;
        assert_eq!(stats.counters().succeeded, 2);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM remote_orders")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
