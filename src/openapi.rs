use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::booking::{BookingOptions, NewBooking};
use crate::catalog::{GymClassPatch, NewClassPack, NewGymClass, NewSchedule};
use crate::handlers::{Cancellation, GenerateSessions, PackGrant, PackPurchase, TrainerAssignment};
use crate::ledger::{BalanceStatus, ClassPack, ClassPackStatus, MemberClassPackBalance};
use crate::models::{
    ClassBooking, ClassPricingModel, ClassSchedule, ClassSession, ClassType, Funding, GymClass,
    GymClassStatus, MembershipDebit, Money, PaymentSource, PtSessionType,
};
use crate::payment::{ClassPackOption, MembershipOption, PayPerEntryOption, PaymentChoice};
use crate::sessions::{NewSession, SessionPatch};
use crate::status::{BookingStatus, SessionStatus};

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
        components.add_security_scheme(
            "query_token",
            SecurityScheme::ApiKey(ApiKey::Query(ApiKeyValue::new("token"))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz_live,
        crate::handlers::healthz_ready,
        crate::handlers::create_gym_class,
        crate::handlers::list_gym_classes,
        crate::handlers::get_gym_class,
        crate::handlers::update_gym_class,
        crate::handlers::activate_gym_class,
        crate::handlers::deactivate_gym_class,
        crate::handlers::archive_gym_class,
        crate::handlers::create_schedule,
        crate::handlers::deactivate_schedule,
        crate::handlers::create_class_pack,
        crate::handlers::get_class_pack,
        crate::handlers::grant_class_pack,
        crate::handlers::purchase_class_pack,
        crate::handlers::get_balance,
        crate::handlers::cancel_balance,
        crate::handlers::create_session,
        crate::handlers::list_sessions,
        crate::handlers::generate_sessions,
        crate::handlers::get_session,
        crate::handlers::update_session,
        crate::handlers::assign_trainer,
        crate::handlers::start_session,
        crate::handlers::complete_session,
        crate::handlers::cancel_session,
        crate::handlers::session_bookings,
        crate::handlers::get_booking_options,
        crate::handlers::session_waitlist,
        crate::handlers::book_session,
        crate::handlers::get_booking,
        crate::handlers::delete_booking,
        crate::handlers::cancel_booking,
        crate::handlers::check_in,
        crate::handlers::mark_no_show,
        crate::handlers::member_bookings,
        crate::handlers::member_calendar
    ),
    components(schemas(
        GymClass, NewGymClass, GymClassPatch, GymClassStatus, ClassType, PtSessionType,
        ClassPricingModel, MembershipDebit, Money, ClassSchedule, NewSchedule,
        ClassPack, NewClassPack, ClassPackStatus, MemberClassPackBalance, BalanceStatus,
        ClassSession, NewSession, SessionPatch, SessionStatus, GenerateSessions,
        TrainerAssignment, Cancellation, PackGrant, PackPurchase,
        ClassBooking, NewBooking, BookingStatus, Funding, PaymentSource, PaymentChoice,
        BookingOptions, MembershipOption, ClassPackOption, PayPerEntryOption
    )),
    tags(
        (name = "health", description = "Service liveness"),
        (name = "catalog", description = "Class templates, weekly schedules and class packs"),
        (name = "sessions", description = "Dated class sessions"),
        (name = "bookings", description = "Admission, waitlists and attendance")
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;
