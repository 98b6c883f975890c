//! Expansion of weekly [`ClassSchedule`] rows into dated sessions.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::conflict::{SessionConflictValidator, Slot};
use crate::error::BookingError;
use crate::locks::LockRegistry;
use crate::models::{ClassSession, GymClass, GymClassId, TenantContext, TimeRange};
use crate::store::SchedulingStore;
use crate::validation::validate_generation_range;

pub struct ScheduleGenerator {
    store: Arc<dyn SchedulingStore>,
    validator: SessionConflictValidator,
    locks: Arc<LockRegistry>,
    max_days: u32,
}

impl ScheduleGenerator {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        validator: SessionConflictValidator,
        locks: Arc<LockRegistry>,
        max_days: u32,
    ) -> Self {
        Self {
            store,
            validator,
            locks,
            max_days,
        }
    }

    /// Creates the sessions of every active schedule between `from` and `to`
    /// inclusive. Dates that already have a session for a schedule are left
    /// alone, so regenerating a range is idempotent. Instantiations that clash
    /// with an existing session are skipped and logged.
    pub async fn generate_sessions(
        &self,
        ctx: &TenantContext,
        from: NaiveDate,
        to: NaiveDate,
        gym_class_id: Option<GymClassId>,
    ) -> Result<Vec<ClassSession>, BookingError> {
        validate_generation_range(from, to, self.max_days)?;
        let _schedule_guard = self.locks.schedules.lock(&ctx.tenant_id).await;

        let mut classes: HashMap<GymClassId, Option<GymClass>> = HashMap::new();
        let mut created = Vec::new();
        let mut skipped = 0usize;

        for date in from.iter_days().take_while(|day| *day <= to) {
            let schedules = self.store.active_schedules_on(ctx.tenant_id, date).await?;
            for schedule in schedules {
                if gym_class_id.is_some_and(|id| id != schedule.gym_class_id) {
                    continue;
                }
                if self.store.session_exists_for_schedule(schedule.id, date).await? {
                    continue;
                }

                let gym_class = match classes.get(&schedule.gym_class_id) {
                    Some(cached) => cached.clone(),
                    None => {
                        let loaded = self
                            .store
                            .gym_class(schedule.gym_class_id)
                            .await?
                            .filter(|class| ctx.owns(class.tenant_id));
                        classes.insert(schedule.gym_class_id, loaded.clone());
                        loaded
                    }
                };
                let Some(gym_class) = gym_class.filter(GymClass::is_active) else {
                    debug!(schedule_id = %schedule.id, "Skipping schedule of inactive class");
                    continue;
                };

                let range = TimeRange::new(schedule.start_time, schedule.end_time);
                let location_id = schedule.location_id.unwrap_or(gym_class.location_id);
                let trainer_id = schedule.trainer_id.or(gym_class.default_trainer_id);
                let slot = Slot {
                    trainer_id,
                    location_id,
                    date,
                    range,
                    exclude: None,
                };

                match self.validator.validate_no_conflicts(ctx, &slot).await {
                    Ok(()) => {}
                    Err(err @ BookingError::Conflict { .. }) => {
                        warn!(schedule_id = %schedule.id, %date, "Skipping session: {err}");
                        skipped += 1;
                        continue;
                    }
                    Err(err) => return Err(err),
                }
                if gym_class.is_personal_training()
                    && let Some(trainer) = trainer_id
                {
                    match self.validator.validate_trainer_available(trainer, date, range).await {
                        Ok(()) => {}
                        Err(err @ BookingError::TrainerUnavailable { .. }) => {
                            warn!(schedule_id = %schedule.id, %date, "Skipping session: {err}");
                            skipped += 1;
                            continue;
                        }
                        Err(err) => return Err(err),
                    }
                }

                let mut session = ClassSession::scheduled(
                    &gym_class,
                    date,
                    range,
                    location_id,
                    trainer_id,
                    schedule.override_capacity,
                );
                session.schedule_id = Some(schedule.id);
                created.push(self.store.save_session(session).await?);
            }
        }

        info!(
            tenant_id = %ctx.tenant_id,
            %from,
            %to,
            created = created.len(),
            skipped,
            "Sessions generated"
        );
        Ok(created)
    }
}
