use chrono::{NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::BookingError;
use crate::models::{ClassPricingModel, ClassType, GymClass, Money, PtSessionType, TimeRange};

static COLOR_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("colour code regex compiles"));

/// Tax rates are basis points; 100% is the ceiling.
pub const MAX_TAX_RATE_BPS: u32 = 10_000;
/// Drop-in prices above this many minor units are rejected.
pub const MAX_DROP_IN_PRICE_MINOR: i64 = 100_000_000;
pub const MAX_ADVANCE_BOOKING_DAYS: u32 = 365;
pub const MAX_CANCELLATION_DEADLINE_HOURS: u32 = MAX_ADVANCE_BOOKING_DAYS * 24;

fn invalid(message: impl Into<String>) -> BookingError {
    BookingError::Validation(message.into())
}

pub fn validate_time_range(start: NaiveTime, end: NaiveTime) -> Result<TimeRange, BookingError> {
    if start < end {
        Ok(TimeRange::new(start, end))
    } else {
        Err(invalid("start time must be before end time"))
    }
}

/// Inclusive `[from, to]` window no longer than `max_days`.
pub fn validate_generation_range(
    from: NaiveDate,
    to: NaiveDate,
    max_days: u32,
) -> Result<(), BookingError> {
    if to < from {
        return Err(invalid("generation range ends before it starts"));
    }
    let days = (to - from).num_days() + 1;
    if days > i64::from(max_days) {
        return Err(invalid(format!(
            "cannot generate more than {max_days} days of sessions at once"
        )));
    }
    Ok(())
}

pub fn validate_capacity(
    class_type: ClassType,
    pt_session_type: Option<PtSessionType>,
    capacity: u32,
) -> Result<u32, BookingError> {
    if capacity == 0 {
        return Err(invalid("capacity must be positive"));
    }
    if class_type != ClassType::PersonalTraining {
        return Ok(capacity);
    }
    match pt_session_type {
        Some(PtSessionType::OneOnOne) if capacity != 1 => {
            Err(invalid("one-on-one personal training takes exactly 1 member"))
        }
        Some(PtSessionType::SemiPrivate) if !(2..=4).contains(&capacity) => Err(invalid(
            "semi-private personal training takes between 2 and 4 members",
        )),
        None => Err(invalid("personal training classes need a session type")),
        _ => Ok(capacity),
    }
}

pub fn validate_pricing(
    pricing_model: ClassPricingModel,
    drop_in_price: Option<&Money>,
) -> Result<(), BookingError> {
    if let Some(price) = drop_in_price {
        if price.amount_minor <= 0 {
            return Err(invalid("drop-in price must be positive"));
        }
        if price.amount_minor > MAX_DROP_IN_PRICE_MINOR {
            return Err(invalid(format!(
                "drop-in price may not exceed {MAX_DROP_IN_PRICE_MINOR} minor units"
            )));
        }
    }
    let needs_price = matches!(
        pricing_model,
        ClassPricingModel::PayPerEntry | ClassPricingModel::Hybrid
    );
    if needs_price && drop_in_price.is_none() {
        return Err(invalid("pay-per-entry pricing requires a drop-in price"));
    }
    Ok(())
}

pub fn validate_color_code(color_code: Option<&str>) -> Result<(), BookingError> {
    match color_code {
        Some(code) if !COLOR_CODE.is_match(code) => Err(invalid(format!(
            "colour code {code:?} must look like #RRGGBB"
        ))),
        _ => Ok(()),
    }
}

pub fn validate_gym_class(gym_class: &GymClass) -> Result<(), BookingError> {
    if gym_class.name.trim().is_empty() {
        return Err(invalid("class name must not be empty"));
    }
    if gym_class.duration_minutes == 0 {
        return Err(invalid("class duration must be positive"));
    }
    validate_capacity(
        gym_class.class_type,
        gym_class.pt_session_type,
        gym_class.max_capacity,
    )?;
    validate_pricing(gym_class.pricing_model, gym_class.drop_in_price.as_ref())?;
    validate_booking_policy(gym_class)?;
    validate_color_code(gym_class.color_code.as_deref())
}

pub fn validate_booking_policy(gym_class: &GymClass) -> Result<(), BookingError> {
    if gym_class.tax_rate_bps > MAX_TAX_RATE_BPS {
        return Err(invalid(format!(
            "tax rate may not exceed {MAX_TAX_RATE_BPS} basis points"
        )));
    }
    if gym_class.advance_booking_days > MAX_ADVANCE_BOOKING_DAYS {
        return Err(invalid(format!(
            "bookings may open at most {MAX_ADVANCE_BOOKING_DAYS} days ahead"
        )));
    }
    if gym_class.cancellation_deadline_hours > MAX_CANCELLATION_DEADLINE_HOURS {
        return Err(invalid(format!(
            "cancellation deadline may not exceed {MAX_CANCELLATION_DEADLINE_HOURS} hours"
        )));
    }
    Ok(())
}
