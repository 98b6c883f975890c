//! Repository seam for catalog, session and booking state.
//!
//! Entities reference each other by id only; callers resolve relations
//! through the store instead of walking embedded object graphs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use crate::error::BookingError;
use crate::models::{
    BookingId, ClassBooking, ClassSchedule, ClassSession, GymClass, GymClassId, MemberId,
    ScheduleId, SessionId, TenantId,
};

/// Session counters and bookings written as one atomic unit.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    pub sessions: Vec<ClassSession>,
    pub bookings: Vec<ClassBooking>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(mut self, session: ClassSession) -> Self {
        self.sessions.push(session);
        self
    }

    pub fn booking(mut self, booking: ClassBooking) -> Self {
        self.bookings.push(booking);
        self
    }

    pub fn bookings(mut self, bookings: impl IntoIterator<Item = ClassBooking>) -> Self {
        self.bookings.extend(bookings);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.bookings.is_empty()
    }
}

#[async_trait]
pub trait SchedulingStore: Send + Sync {
    async fn save_gym_class(&self, gym_class: GymClass) -> Result<GymClass, BookingError>;
    async fn gym_class(&self, id: GymClassId) -> Result<Option<GymClass>, BookingError>;
    async fn gym_classes(&self, tenant_id: TenantId) -> Result<Vec<GymClass>, BookingError>;

    async fn save_schedule(&self, schedule: ClassSchedule) -> Result<ClassSchedule, BookingError>;
    async fn schedule(&self, id: ScheduleId) -> Result<Option<ClassSchedule>, BookingError>;
    async fn active_schedules_on(
        &self,
        tenant_id: TenantId,
        date: NaiveDate,
    ) -> Result<Vec<ClassSchedule>, BookingError>;

    async fn save_session(&self, session: ClassSession) -> Result<ClassSession, BookingError>;
    async fn session(&self, id: SessionId) -> Result<Option<ClassSession>, BookingError>;
    async fn sessions_on(
        &self,
        tenant_id: TenantId,
        date: NaiveDate,
    ) -> Result<Vec<ClassSession>, BookingError>;
    async fn session_exists_for_schedule(
        &self,
        schedule_id: ScheduleId,
        date: NaiveDate,
    ) -> Result<bool, BookingError>;

    async fn booking(&self, id: BookingId) -> Result<Option<ClassBooking>, BookingError>;
    /// Bookings of a session in creation order.
    async fn bookings_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<ClassBooking>, BookingError>;
    async fn bookings_for_member(
        &self,
        member_id: MemberId,
    ) -> Result<Vec<ClassBooking>, BookingError>;
    async fn delete_booking(&self, id: BookingId) -> Result<(), BookingError>;

    async fn commit(&self, unit: UnitOfWork) -> Result<(), BookingError>;
}

#[derive(Debug, Default)]
struct Tables {
    gym_classes: HashMap<GymClassId, GymClass>,
    schedules: HashMap<ScheduleId, ClassSchedule>,
    sessions: HashMap<SessionId, ClassSession>,
    bookings: HashMap<BookingId, ClassBooking>,
    sessions_by_day: HashMap<(TenantId, NaiveDate), Vec<SessionId>>,
    bookings_by_session: HashMap<SessionId, Vec<BookingId>>,
    bookings_by_member: HashMap<MemberId, Vec<BookingId>>,
}

impl Tables {
    fn put_session(&mut self, session: ClassSession) {
        if let Some(previous) = self.sessions.get(&session.id) {
            let old_key = (previous.tenant_id, previous.session_date);
            if old_key != (session.tenant_id, session.session_date)
                && let Some(ids) = self.sessions_by_day.get_mut(&old_key)
            {
                ids.retain(|id| *id != session.id);
            }
        }
        let day = self
            .sessions_by_day
            .entry((session.tenant_id, session.session_date))
            .or_default();
        if !day.contains(&session.id) {
            day.push(session.id);
        }
        self.sessions.insert(session.id, session);
    }

    fn put_booking(&mut self, booking: ClassBooking) {
        if !self.bookings.contains_key(&booking.id) {
            self.bookings_by_session
                .entry(booking.session_id)
                .or_default()
                .push(booking.id);
            self.bookings_by_member
                .entry(booking.member_id)
                .or_default()
                .push(booking.id);
        }
        self.bookings.insert(booking.id, booking);
    }

    fn collect_bookings(&self, ids: Option<&Vec<BookingId>>) -> Vec<ClassBooking> {
        let mut bookings: Vec<ClassBooking> = ids
            .into_iter()
            .flatten()
            .filter_map(|id| self.bookings.get(id).cloned())
            .collect();
        bookings.sort_by_key(|booking| booking.created_at);
        bookings
    }
}

/// Arena-plus-index store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SchedulingStore for MemoryStore {
    async fn save_gym_class(&self, gym_class: GymClass) -> Result<GymClass, BookingError> {
        let mut tables = self.tables.write().await;
        tables.gym_classes.insert(gym_class.id, gym_class.clone());
        Ok(gym_class)
    }

    async fn gym_class(&self, id: GymClassId) -> Result<Option<GymClass>, BookingError> {
        Ok(self.tables.read().await.gym_classes.get(&id).cloned())
    }

    async fn gym_classes(&self, tenant_id: TenantId) -> Result<Vec<GymClass>, BookingError> {
        let tables = self.tables.read().await;
        let mut classes: Vec<GymClass> = tables
            .gym_classes
            .values()
            .filter(|class| class.tenant_id == tenant_id)
            .cloned()
            .collect();
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(classes)
    }

    async fn save_schedule(&self, schedule: ClassSchedule) -> Result<ClassSchedule, BookingError> {
        let mut tables = self.tables.write().await;
        tables.schedules.insert(schedule.id, schedule.clone());
        Ok(schedule)
    }

    async fn schedule(&self, id: ScheduleId) -> Result<Option<ClassSchedule>, BookingError> {
        Ok(self.tables.read().await.schedules.get(&id).cloned())
    }

    async fn active_schedules_on(
        &self,
        tenant_id: TenantId,
        date: NaiveDate,
    ) -> Result<Vec<ClassSchedule>, BookingError> {
        let tables = self.tables.read().await;
        let mut schedules: Vec<ClassSchedule> = tables
            .schedules
            .values()
            .filter(|schedule| schedule.tenant_id == tenant_id && schedule.is_active_on(date))
            .cloned()
            .collect();
        schedules.sort_by_key(|schedule| schedule.start_time);
        Ok(schedules)
    }

    async fn save_session(&self, session: ClassSession) -> Result<ClassSession, BookingError> {
        let mut tables = self.tables.write().await;
        tables.put_session(session.clone());
        Ok(session)
    }

    async fn session(&self, id: SessionId) -> Result<Option<ClassSession>, BookingError> {
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn sessions_on(
        &self,
        tenant_id: TenantId,
        date: NaiveDate,
    ) -> Result<Vec<ClassSession>, BookingError> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<ClassSession> = tables
            .sessions_by_day
            .get(&(tenant_id, date))
            .into_iter()
            .flatten()
            .filter_map(|id| tables.sessions.get(id).cloned())
            .collect();
        sessions.sort_by_key(|session| session.start_time);
        Ok(sessions)
    }

    async fn session_exists_for_schedule(
        &self,
        schedule_id: ScheduleId,
        date: NaiveDate,
    ) -> Result<bool, BookingError> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .values()
            .any(|session| session.schedule_id == Some(schedule_id) && session.session_date == date))
    }

    async fn booking(&self, id: BookingId) -> Result<Option<ClassBooking>, BookingError> {
        Ok(self.tables.read().await.bookings.get(&id).cloned())
    }

    async fn bookings_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<ClassBooking>, BookingError> {
        let tables = self.tables.read().await;
        Ok(tables.collect_bookings(tables.bookings_by_session.get(&session_id)))
    }

    async fn bookings_for_member(
        &self,
        member_id: MemberId,
    ) -> Result<Vec<ClassBooking>, BookingError> {
        let tables = self.tables.read().await;
        Ok(tables.collect_bookings(tables.bookings_by_member.get(&member_id)))
    }

    async fn delete_booking(&self, id: BookingId) -> Result<(), BookingError> {
        let mut tables = self.tables.write().await;
        let Some(booking) = tables.bookings.remove(&id) else {
            return Err(BookingError::not_found("booking", id));
        };
        if let Some(ids) = tables.bookings_by_session.get_mut(&booking.session_id) {
            ids.retain(|other| *other != id);
        }
        if let Some(ids) = tables.bookings_by_member.get_mut(&booking.member_id) {
            ids.retain(|other| *other != id);
        }
        Ok(())
    }

    async fn commit(&self, unit: UnitOfWork) -> Result<(), BookingError> {
        if unit.is_empty() {
            return Ok(());
        }
        let mut tables = self.tables.write().await;
        for session in unit.sessions {
            tables.put_session(session);
        }
        for booking in unit.bookings {
            tables.put_booking(booking);
        }
        Ok(())
    }
}
