//! The engine's public face: every operation the front ends call.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::availability::AvailabilityResolver;
use crate::blackout::BlackoutRegistry;
use crate::calendar::{parse_time_label, Clock, DateLabel};
use crate::cancellation::{self, CancellationOutcome, Canceller};
use crate::config::EngineConfig;
use crate::contacts::ContactBook;
use crate::error::{EngineError, Result};
use crate::events::EventSink;
use crate::ledger::AppointmentLedger;
use crate::lifecycle::Lifecycle;
use crate::models::{Appointment, BlackoutSlot, BookingDraft, BotUser, ChatMessage};
use crate::reservation::ReservationCoordinator;
use crate::sweeper::ExpirySweeper;

#[derive(Clone)]
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    ledger: AppointmentLedger,
    blackouts: BlackoutRegistry,
    availability: AvailabilityResolver,
    reservations: ReservationCoordinator,
    lifecycle: Lifecycle,
    contacts: ContactBook,
}

impl Scheduler {
    /// Wires the components over a migrated pool.
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, config: EngineConfig, events: EventSink) -> Self {
        let ledger = AppointmentLedger::new(pool.clone());
        let contacts = ContactBook::new(pool.clone());
        let blackouts = BlackoutRegistry::new(pool);
        let availability = AvailabilityResolver::new(ledger.clone(), blackouts.clone(), config.roster.clone());
        let reservations = ReservationCoordinator::new(availability.clone(), ledger.clone(), events.clone());
        let lifecycle = Lifecycle::new(ledger.clone(), blackouts.clone(), events);

        Self {
            clock,
            config,
            ledger,
            blackouts,
            availability,
            reservations,
            lifecycle,
            contacts,
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A sweeper bound to this scheduler's storage and payment window.
    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(self.ledger.clone(), self.lifecycle.clone(), self.config.payment_window)
    }

    // ── Booking ──

    pub async fn resolve_availability(&self, date_label: &str) -> Result<Vec<String>> {
        let date = DateLabel::parse(date_label)?;
        self.availability.slots(&date, self.now()).await
    }

    /// Date picker contents for the configured horizon.
    pub async fn bookable_dates(&self) -> Result<Vec<DateLabel>> {
        self.availability
            .bookable_dates(self.clock.today(), self.config.booking_horizon_days)
            .await
    }

    pub async fn reserve(&self, draft: &BookingDraft) -> Result<i64> {
        self.reservations.reserve(draft, self.now()).await
    }

    pub async fn confirm_payment(&self, id: i64) -> Result<Appointment> {
        self.lifecycle.confirm_payment(id, self.now()).await
    }

    // ── Cancellation ──

    /// What would happen if the client cancelled `id` at `now`. Nothing is written.
    pub async fn request_cancellation(&self, id: i64, now: NaiveDateTime) -> Result<CancellationOutcome> {
        let appointment = self.ledger.fetch(id).await?;
        self.outcome_for(&appointment, now)
    }

    /// Cancels `id` if the policy lets `by` do so at `now`.
    ///
    /// For a client this call is the acceptance of the outcome returned by
    /// [`request_cancellation`](Self::request_cancellation).
    pub async fn apply_cancellation(&self, id: i64, by: Canceller, now: NaiveDateTime) -> Result<Appointment> {
        let appointment = self.ledger.fetch(id).await?;
        let outcome = self.outcome_for(&appointment, now)?;
        if !by.may_cancel(outcome) {
            return Err(EngineError::CancellationDenied(outcome));
        }
        self.lifecycle.cancel(&appointment, by, now).await
    }

    /// Parses a label handed in by a front end; its weekday must match the date.
    fn entry_label(&self, raw: &str) -> Result<DateLabel> {
        let date = DateLabel::parse(raw)?;
        date.resolve_strict(self.clock.today())?;
        Ok(date)
    }

    fn outcome_for(&self, appointment: &Appointment, now: NaiveDateTime) -> Result<CancellationOutcome> {
        if appointment.status.is_terminal() {
            return Ok(CancellationOutcome::Refuse);
        }
        let starts_at = slot_start(appointment, now.date())?;
        Ok(cancellation::decide(
            appointment.status,
            appointment.payment_status,
            starts_at - now,
        ))
    }

    // ── Expiry ──

    pub async fn sweep_expired(&self, now: NaiveDateTime) -> Result<Vec<Appointment>> {
        self.sweeper().sweep(now).await
    }

    // ── Blackouts ──

    pub async fn block_slot(
        &self,
        date_label: &str,
        time_label: Option<&str>,
        reason: &str,
    ) -> Result<BlackoutSlot> {
        let date = self.entry_label(date_label)?;
        if let Some(time) = time_label {
            parse_time_label(time)?;
        }
        self.blackouts.block(&date, time_label, reason.trim(), self.now()).await
    }

    pub async fn unblock_slot(&self, slot_id: i64) -> Result<()> {
        self.blackouts.unblock(slot_id).await
    }

    pub async fn list_blocked_slots(&self, date_label: Option<&str>) -> Result<Vec<BlackoutSlot>> {
        let date = date_label.map(|label| self.entry_label(label)).transpose()?;
        self.blackouts.list(date.as_ref()).await
    }

    // ── Queries ──

    pub async fn appointment(&self, id: i64) -> Result<Appointment> {
        self.ledger.fetch(id).await
    }

    /// Active appointments of one client, soonest first.
    pub async fn client_appointments(&self, client_ref: i64) -> Result<Vec<Appointment>> {
        let mut appointments = self.ledger.active_for_client(client_ref).await?;
        sort_by_start(&mut appointments, self.clock.today());
        Ok(appointments)
    }

    pub async fn appointments_on(&self, date_label: &str) -> Result<Vec<Appointment>> {
        let date = self.entry_label(date_label)?;
        self.ledger.active_on(&date).await
    }

    pub async fn active_appointments(&self) -> Result<Vec<Appointment>> {
        let mut appointments = self.ledger.active().await?;
        sort_by_start(&mut appointments, self.clock.today());
        Ok(appointments)
    }

    pub async fn search_by_phone(&self, fragment: &str) -> Result<Vec<Appointment>> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return Err(EngineError::InvalidRequest("phone fragment is empty".into()));
        }
        let mut appointments = self.ledger.search_by_phone(fragment).await?;
        sort_by_start(&mut appointments, self.clock.today());
        Ok(appointments)
    }

    // ── Reminders ──

    /// Confirmed appointments for tomorrow that have not been reminded yet.
    pub async fn due_reminders(&self, now: NaiveDateTime) -> Result<Vec<Appointment>> {
        let tomorrow = DateLabel::for_date(now.date() + Duration::days(1));
        self.ledger.unreminded_confirmed_on(&tomorrow).await
    }

    pub async fn mark_reminded(&self, id: i64) -> Result<bool> {
        self.ledger.mark_reminded(id).await
    }

    // ── Contacts ──

    pub async fn register_user(&self, chat_id: i64, username: Option<&str>, first_name: Option<&str>) -> Result<()> {
        self.contacts.register(chat_id, username, first_name, self.now()).await
    }

    pub async fn bot_users(&self) -> Result<Vec<BotUser>> {
        self.contacts.users().await
    }

    /// Name the provider sees for a client: the bot profile, else the latest booking.
    pub async fn client_name(&self, chat_id: i64) -> Result<String> {
        if let Some(user) = self.contacts.user(chat_id).await? {
            return Ok(user.display_name().to_string());
        }
        let appointments = self.ledger.active_for_client(chat_id).await?;
        Ok(appointments
            .last()
            .map(|a| a.client_name.clone())
            .unwrap_or_else(|| "Клиент".to_string()))
    }

    /// Logs a relayed message; `from_client = false` for the provider's replies.
    pub async fn record_message(&self, client_chat_id: i64, body: &str, from_client: bool) -> Result<ChatMessage> {
        let name = self.client_name(client_chat_id).await?;
        self.contacts
            .record(client_chat_id, &name, body, from_client, self.now())
            .await
    }

    pub async fn client_messages(&self, limit: u32) -> Result<Vec<ChatMessage>> {
        self.contacts.inbox(limit).await
    }

    pub async fn conversation(&self, client_chat_id: i64, limit: u32) -> Result<Vec<ChatMessage>> {
        self.contacts.conversation(client_chat_id, limit).await
    }
}

/// Absolute start of an appointment's slot, resolved against `today`.
pub fn slot_start(appointment: &Appointment, today: NaiveDate) -> Result<NaiveDateTime> {
    let date = DateLabel::parse(&appointment.date_label)?;
    let time = parse_time_label(&appointment.time_label)?;
    date.resolve_at(time, today)
}

/// Orders by slot start; records whose labels do not resolve go last.
fn sort_by_start(appointments: &mut [Appointment], today: NaiveDate) {
    appointments.sort_by_cached_key(|a| {
        let start = slot_start(a, today).ok();
        (start.is_none(), start, a.id)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{parse_timestamp, ManualClock};
    use crate::db::test_pool;
    use crate::events::EngineEvent;
    use crate::lifecycle::{PaymentStatus, Status};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        scheduler: Scheduler,
        clock: Arc<ManualClock>,
        events: UnboundedReceiver<EngineEvent>,
    }

    async fn harness(now: &str) -> Harness {
        let clock = Arc::new(ManualClock::at(now));
        let (sink, events) = EventSink::channel();
        let scheduler = Scheduler::new(test_pool().await, clock.clone(), EngineConfig::default(), sink);
        Harness {
            scheduler,
            clock,
            events,
        }
    }

    fn draft(date: &str, time: &str, client_ref: i64) -> BookingDraft {
        BookingDraft::new(client_ref)
            .with_date(date)
            .with_time(time)
            .with_name("Анна")
            .with_phone("+79001234567")
    }

    fn ts(raw: &str) -> NaiveDateTime {
        parse_timestamp(raw).unwrap()
    }

    fn drain(rx: &mut UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    // ── reservation ──

    #[tokio::test]
    async fn test_reserve_creates_pending_hold_and_event() {
        let mut h = harness("2026-03-01 12:00:00").await;
        let id = h.scheduler.reserve(&draft("Пн 02.03", "10:00", 7)).await.unwrap();

        let stored = h.scheduler.appointment(id).await.unwrap();
        assert_eq!(stored.status, Status::Pending);
        assert_eq!(stored.payment_status, PaymentStatus::NotPaid);
        assert_eq!(stored.client_ref, 7);

        let events = drain(&mut h.events);
        assert!(matches!(events.as_slice(), [EngineEvent::NewBooking(a)] if a.id == id));

        let free = h.scheduler.resolve_availability("Пн 02.03").await.unwrap();
        assert!(!free.contains(&"10:00".to_string()));
    }

    #[tokio::test]
    async fn test_reserve_taken_slot_fails_without_write() {
        let h = harness("2026-03-01 12:00:00").await;
        h.scheduler.reserve(&draft("Пн 02.03", "10:00", 1)).await.unwrap();

        let err = h.scheduler.reserve(&draft("Пн 02.03", "10:00", 2)).await.unwrap_err();
        assert!(matches!(err, EngineError::SlotNoLongerAvailable { .. }));
        assert!(h.scheduler.client_appointments(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reserve_rejects_past_and_off_roster_slots() {
        let h = harness("2026-03-02 12:00:00").await;
        for time in ["11:00", "12:00", "10:30"] {
            let err = h.scheduler.reserve(&draft("Пн 02.03", time, 1)).await.unwrap_err();
            assert!(matches!(err, EngineError::SlotNoLongerAvailable { .. }), "{}", time);
        }
        assert!(h.scheduler.reserve(&draft("Пн 02.03", "13:00", 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_reserve_rejects_blacked_out_slot() {
        let h = harness("2026-03-01 12:00:00").await;
        h.scheduler.block_slot("Пн 02.03", None, "Выходной").await.unwrap();

        let err = h.scheduler.reserve(&draft("Пн 02.03", "15:00", 1)).await.unwrap_err();
        assert!(matches!(err, EngineError::SlotNoLongerAvailable { .. }));
    }

    #[tokio::test]
    async fn test_reserve_validates_draft() {
        let h = harness("2026-03-01 12:00:00").await;
        let blank = draft("Пн 02.03", "10:00", 1).with_name(" ");
        assert!(matches!(
            h.scheduler.reserve(&blank).await,
            Err(EngineError::InvalidRequest(_))
        ));
        assert!(matches!(
            h.scheduler.reserve(&draft("02.03", "10:00", 1)).await,
            Err(EngineError::InvalidDateFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_reservations_one_wins() {
        let h = harness("2026-03-01 12:00:00").await;
        let first = draft("Пн 02.03", "10:00", 1);
        let second = draft("Пн 02.03", "10:00", 2);

        let (a, b) = tokio::join!(h.scheduler.reserve(&first), h.scheduler.reserve(&second));
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(EngineError::SlotNoLongerAvailable { .. }))));
        assert_eq!(h.scheduler.appointments_on("Пн 02.03").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_availability_never_offers_past_slots() {
        let h = harness("2026-03-01 15:30:00").await;
        let now = h.scheduler.now();
        for label in ["Вс 01.03", "Пн 02.03"] {
            let date = DateLabel::parse(label).unwrap();
            for time in h.scheduler.resolve_availability(label).await.unwrap() {
                let at = date.resolve_at(parse_time_label(&time).unwrap(), now.date()).unwrap();
                assert!(at > now, "{} {}", label, time);
            }
        }
    }

    #[tokio::test]
    async fn test_mismatched_weekday_is_rejected() {
        let h = harness("2026-03-01 12:00:00").await;
        h.scheduler.reserve(&draft("Пн 02.03", "10:00", 1)).await.unwrap();

        assert!(matches!(
            h.scheduler.reserve(&draft("Вт 02.03", "10:00", 2)).await,
            Err(EngineError::InvalidDateFormat(_))
        ));
        assert!(matches!(
            h.scheduler.block_slot("Ср 02.03", None, "").await,
            Err(EngineError::InvalidDateFormat(_))
        ));
        assert!(matches!(
            h.scheduler.resolve_availability("Чт 02.03").await,
            Err(EngineError::InvalidDateFormat(_))
        ));
        assert!(matches!(
            h.scheduler.appointments_on("Вт 02.03").await,
            Err(EngineError::InvalidDateFormat(_))
        ));
        assert!(matches!(
            h.scheduler.list_blocked_slots(Some("Вт 02.03")).await,
            Err(EngineError::InvalidDateFormat(_))
        ));

        // The canonical spelling still sees the one booking.
        assert_eq!(h.scheduler.appointments_on("Пн 02.03").await.unwrap().len(), 1);
        assert!(h.scheduler.client_appointments(2).await.unwrap().is_empty());
    }

    // ── expiry ──

    #[tokio::test]
    async fn test_unpaid_hold_expires_after_window() {
        let h = harness("2023-12-20 12:00:00").await;
        let id = h.scheduler.reserve(&draft("Пн 01.01", "10:00", 1)).await.unwrap();

        h.clock.advance(Duration::minutes(11));
        let expired = h.scheduler.sweep_expired(h.scheduler.now()).await.unwrap();
        assert_eq!(expired.iter().filter(|a| a.id == id).count(), 1);
        assert_eq!(h.scheduler.appointment(id).await.unwrap().status, Status::Expired);

        // A second sweep finds nothing more.
        assert!(h.scheduler.sweep_expired(h.scheduler.now()).await.unwrap().is_empty());
        // The slot is free again.
        assert!(h.scheduler.reserve(&draft("Пн 01.01", "10:00", 2)).await.is_ok());
    }

    #[tokio::test]
    async fn test_confirmed_wins_over_late_sweep() {
        let h = harness("2026-03-01 12:00:00").await;
        let id = h.scheduler.reserve(&draft("Пн 02.03", "10:00", 1)).await.unwrap();
        h.scheduler.confirm_payment(id).await.unwrap();

        h.clock.advance(Duration::days(1));
        assert!(h.scheduler.sweep_expired(h.scheduler.now()).await.unwrap().is_empty());
        assert_eq!(h.scheduler.appointment(id).await.unwrap().status, Status::Confirmed);
    }

    // ── confirmation ──

    #[tokio::test]
    async fn test_double_confirmation_blocks_once() {
        let mut h = harness("2026-03-01 12:00:00").await;
        let id = h.scheduler.reserve(&draft("Пн 02.03", "10:00", 1)).await.unwrap();

        let first = h.scheduler.confirm_payment(id).await.unwrap();
        let second = h.scheduler.confirm_payment(id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.status, Status::Confirmed);
        assert_eq!(first.payment_status, PaymentStatus::Paid);
        assert!(first.confirmed_at.is_some());

        let blocked = h.scheduler.list_blocked_slots(Some("Пн 02.03")).await.unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].appointment_id, Some(id));

        let confirmations = drain(&mut h.events)
            .into_iter()
            .filter(|e| matches!(e, EngineEvent::Confirmed(_)))
            .count();
        assert_eq!(confirmations, 1);
    }

    #[tokio::test]
    async fn test_confirm_terminal_is_invalid_transition() {
        let h = harness("2026-03-01 12:00:00").await;
        let id = h.scheduler.reserve(&draft("Пн 02.03", "10:00", 1)).await.unwrap();
        h.clock.advance(Duration::minutes(30));
        h.scheduler.sweep_expired(h.scheduler.now()).await.unwrap();

        assert!(matches!(
            h.scheduler.confirm_payment(id).await,
            Err(EngineError::InvalidTransition {
                from: Status::Expired,
                ..
            })
        ));
        assert!(matches!(
            h.scheduler.confirm_payment(404).await,
            Err(EngineError::NotFound(404))
        ));
    }

    // ── cancellation ──

    async fn confirmed_at_ten(h: &Harness) -> i64 {
        let id = h.scheduler.reserve(&draft("Вт 03.03", "10:00", 1)).await.unwrap();
        h.scheduler.confirm_payment(id).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_cancellation_outcome_around_24_hours() {
        let h = harness("2026-03-01 12:00:00").await;
        let id = confirmed_at_ten(&h).await;

        let late = h.scheduler.request_cancellation(id, ts("2026-03-02 10:01:00")).await.unwrap();
        assert_eq!(late, CancellationOutcome::RequireDoubleConfirm);

        let early = h.scheduler.request_cancellation(id, ts("2026-03-02 09:59:00")).await.unwrap();
        assert_eq!(early, CancellationOutcome::RequireProviderContact);
    }

    #[tokio::test]
    async fn test_client_cancel_far_ahead_paid_is_denied() {
        let h = harness("2026-03-01 12:00:00").await;
        let id = confirmed_at_ten(&h).await;

        let err = h
            .scheduler
            .apply_cancellation(id, Canceller::Client, ts("2026-03-01 12:00:00"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::CancellationDenied(CancellationOutcome::RequireProviderContact)
        ));
        assert_eq!(h.scheduler.appointment(id).await.unwrap().status, Status::Confirmed);
    }

    #[tokio::test]
    async fn test_client_late_cancel_frees_slot() {
        let mut h = harness("2026-03-01 12:00:00").await;
        let id = confirmed_at_ten(&h).await;
        drain(&mut h.events);

        let cancelled = h
            .scheduler
            .apply_cancellation(id, Canceller::Client, ts("2026-03-02 20:00:00"))
            .await
            .unwrap();
        assert_eq!(cancelled.status, Status::Cancelled);
        assert!(cancelled.cancelled_at.is_some());

        // The confirmation blackout is withdrawn with the booking.
        assert!(h.scheduler.list_blocked_slots(Some("Вт 03.03")).await.unwrap().is_empty());
        assert!(h
            .scheduler
            .resolve_availability("Вт 03.03")
            .await
            .unwrap()
            .contains(&"10:00".to_string()));

        let events = drain(&mut h.events);
        assert!(matches!(
            events.as_slice(),
            [EngineEvent::Cancelled { by: Canceller::Client, .. }]
        ));
    }

    #[tokio::test]
    async fn test_admin_may_cancel_paid_booking() {
        let h = harness("2026-03-01 12:00:00").await;
        let id = confirmed_at_ten(&h).await;

        let cancelled = h
            .scheduler
            .apply_cancellation(id, Canceller::Admin, h.scheduler.now())
            .await
            .unwrap();
        assert_eq!(cancelled.status, Status::Cancelled);
    }

    #[tokio::test]
    async fn test_unpaid_hold_cancels_immediately_and_terminal_refuses() {
        let h = harness("2026-03-01 12:00:00").await;
        let id = h.scheduler.reserve(&draft("Пн 02.03", "10:00", 1)).await.unwrap();
        let now = h.scheduler.now();

        assert_eq!(
            h.scheduler.request_cancellation(id, now).await.unwrap(),
            CancellationOutcome::CancelImmediately
        );
        h.scheduler.apply_cancellation(id, Canceller::Client, now).await.unwrap();

        assert_eq!(
            h.scheduler.request_cancellation(id, now).await.unwrap(),
            CancellationOutcome::Refuse
        );
        assert!(matches!(
            h.scheduler.apply_cancellation(id, Canceller::Admin, now).await,
            Err(EngineError::CancellationDenied(CancellationOutcome::Refuse))
        ));
    }

    // ── blackouts ──

    #[tokio::test]
    async fn test_blackout_management() {
        let h = harness("2026-03-01 12:00:00").await;
        let slot = h.scheduler.block_slot("Пн 02.03", Some("10:00"), " Обед ").await.unwrap();
        assert_eq!(slot.reason, "Обед");
        h.scheduler.block_slot("Ср 04.03", None, "").await.unwrap();

        assert!(matches!(
            h.scheduler.block_slot("Пн 02.03", Some("10"), "").await,
            Err(EngineError::InvalidTimeFormat(_))
        ));
        assert!(matches!(
            h.scheduler.block_slot("tomorrow", None, "").await,
            Err(EngineError::InvalidDateFormat(_))
        ));

        assert_eq!(h.scheduler.list_blocked_slots(None).await.unwrap().len(), 2);
        let dates: Vec<String> = h
            .scheduler
            .bookable_dates()
            .await
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(dates.len(), 29);
        assert!(!dates.contains(&"Ср 04.03".to_string()));

        h.scheduler.unblock_slot(slot.id).await.unwrap();
        assert!(h.scheduler.list_blocked_slots(Some("Пн 02.03")).await.unwrap().is_empty());
    }

    // ── queries and reminders ──

    #[tokio::test]
    async fn test_client_appointments_are_chronological() {
        let h = harness("2026-12-20 12:00:00").await;
        let january = h.scheduler.reserve(&draft("Пт 01.01", "09:00", 1)).await.unwrap();
        let december = h.scheduler.reserve(&draft("Пн 28.12", "18:00", 1)).await.unwrap();

        let ids: Vec<i64> = h
            .scheduler
            .client_appointments(1)
            .await
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![december, january]);
        assert_eq!(h.scheduler.search_by_phone("1234567").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_due_reminders_once() {
        let h = harness("2026-03-01 12:00:00").await;
        let id = h.scheduler.reserve(&draft("Пн 02.03", "10:00", 1)).await.unwrap();
        let unpaid = h.scheduler.reserve(&draft("Пн 02.03", "11:00", 2)).await.unwrap();
        h.scheduler.confirm_payment(id).await.unwrap();

        let due = h.scheduler.due_reminders(h.scheduler.now()).await.unwrap();
        assert_eq!(due.iter().map(|a| a.id).collect::<Vec<_>>(), vec![id]);
        assert!(due.iter().all(|a| a.id != unpaid));

        assert!(h.scheduler.mark_reminded(id).await.unwrap());
        assert!(h.scheduler.due_reminders(h.scheduler.now()).await.unwrap().is_empty());
    }

    // ── contacts ──

    #[tokio::test]
    async fn test_relay_thread_uses_known_name() {
        let h = harness("2026-03-01 12:00:00").await;
        h.scheduler.reserve(&draft("Пн 02.03", "10:00", 42)).await.unwrap();

        // No profile yet: the booking name is used.
        let first = h.scheduler.record_message(42, "Можно позже?", true).await.unwrap();
        assert_eq!(first.client_name, "Анна");

        h.scheduler.register_user(42, Some("anya"), Some("Аня")).await.unwrap();
        let reply = h.scheduler.record_message(42, "Да", false).await.unwrap();
        assert_eq!(reply.client_name, "Аня");
        assert_eq!(h.scheduler.client_name(7).await.unwrap(), "Клиент");

        assert_eq!(h.scheduler.conversation(42, 20).await.unwrap().len(), 2);
        assert_eq!(h.scheduler.client_messages(20).await.unwrap(), vec![first]);
        assert_eq!(h.scheduler.bot_users().await.unwrap().len(), 1);
    }
}
