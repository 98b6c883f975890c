use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::{Json, http::StatusCode, response::IntoResponse};
use chrono::NaiveDate;
use futures::future::try_join_all;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::{
    AppState,
    auth::Tenant,
    booking::{BookingOptions, NewBooking},
    catalog::{GymClassPatch, NewClassPack, NewGymClass, NewSchedule},
    error::ApiError,
    ical::CalendarEntry,
    ledger::{ClassPack, MemberClassPackBalance},
    models::{
        BalanceId, BookingId, ClassBooking, ClassPackId, ClassSchedule, ClassSession, GymClass,
        GymClassId, MemberId, OrderId, ScheduleId, SessionId, TrainerId,
    },
    sessions::{NewSession, SessionPatch},
    status::BookingStatus,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct GenerateSessions {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub gym_class_id: Option<GymClassId>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TrainerAssignment {
    pub trainer_id: TrainerId,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct Cancellation {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PackGrant {
    pub member_id: MemberId,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PackPurchase {
    pub member_id: MemberId,
    pub order_id: OrderId,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SessionsQuery {
    /// Club-local date
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OptionsQuery {
    pub member_id: MemberId,
}

#[utoipa::path(get, path = "/", tag = "health")]
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Class Booking API",
        "endpoints": {
            "/classes": "Class templates",
            "/sessions": "Scheduled class sessions",
            "/bookings": "Member bookings and waitlists",
            "/docs": "Swagger UI"
        }
    }))
}

#[utoipa::path(get, path = "/healthz/live", tag = "health")]
pub async fn healthz_live() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[utoipa::path(get, path = "/healthz/ready", tag = "health")]
pub async fn healthz_ready() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[utoipa::path(
    post,
    path = "/classes",
    request_body = NewGymClass,
    responses(
        (status = 201, description = "Class created", body = GymClass),
        (status = 400, description = "Invalid class definition"),
        (status = 401, description = "Invalid authentication token")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn create_gym_class(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(request): Json<NewGymClass>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.catalog.create_gym_class(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    get,
    path = "/classes",
    responses((status = 200, description = "Classes of the tenant", body = [GymClass])),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn list_gym_classes(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
) -> Result<Json<Vec<GymClass>>, ApiError> {
    Ok(Json(state.catalog.list_gym_classes(&ctx).await?))
}

#[utoipa::path(
    get,
    path = "/classes/{id}",
    params(("id" = GymClassId, Path, description = "Class id")),
    responses(
        (status = 200, description = "Class", body = GymClass),
        (status = 404, description = "Unknown class")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn get_gym_class(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<GymClassId>,
) -> Result<Json<GymClass>, ApiError> {
    Ok(Json(state.catalog.get_gym_class(&ctx, id).await?))
}

#[utoipa::path(
    patch,
    path = "/classes/{id}",
    params(("id" = GymClassId, Path, description = "Class id")),
    request_body = GymClassPatch,
    responses(
        (status = 200, description = "Updated class", body = GymClass),
        (status = 422, description = "Class is archived")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn update_gym_class(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<GymClassId>,
    Json(patch): Json<GymClassPatch>,
) -> Result<Json<GymClass>, ApiError> {
    Ok(Json(state.catalog.update_gym_class(&ctx, id, patch).await?))
}

#[utoipa::path(
    post,
    path = "/classes/{id}/activate",
    params(("id" = GymClassId, Path, description = "Class id")),
    responses((status = 200, description = "Activated class", body = GymClass)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn activate_gym_class(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<GymClassId>,
) -> Result<Json<GymClass>, ApiError> {
    Ok(Json(state.catalog.activate(&ctx, id).await?))
}

#[utoipa::path(
    post,
    path = "/classes/{id}/deactivate",
    params(("id" = GymClassId, Path, description = "Class id")),
    responses((status = 200, description = "Deactivated class", body = GymClass)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn deactivate_gym_class(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<GymClassId>,
) -> Result<Json<GymClass>, ApiError> {
    Ok(Json(state.catalog.deactivate(&ctx, id).await?))
}

#[utoipa::path(
    post,
    path = "/classes/{id}/archive",
    params(("id" = GymClassId, Path, description = "Class id")),
    responses((status = 200, description = "Archived class", body = GymClass)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn archive_gym_class(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<GymClassId>,
) -> Result<Json<GymClass>, ApiError> {
    Ok(Json(state.catalog.archive(&ctx, id).await?))
}

#[utoipa::path(
    post,
    path = "/schedules",
    request_body = NewSchedule,
    responses(
        (status = 201, description = "Weekly schedule created", body = ClassSchedule),
        (status = 400, description = "Invalid schedule")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn create_schedule(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(request): Json<NewSchedule>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.catalog.create_schedule(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    post,
    path = "/schedules/{id}/deactivate",
    params(("id" = ScheduleId, Path, description = "Schedule id")),
    responses((status = 200, description = "Deactivated schedule", body = ClassSchedule)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn deactivate_schedule(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<ScheduleId>,
) -> Result<Json<ClassSchedule>, ApiError> {
    Ok(Json(state.catalog.deactivate_schedule(&ctx, id).await?))
}

#[utoipa::path(
    post,
    path = "/class-packs",
    request_body = NewClassPack,
    responses((status = 201, description = "Class pack created", body = ClassPack)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn create_class_pack(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(request): Json<NewClassPack>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.catalog.create_class_pack(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    get,
    path = "/class-packs/{id}",
    params(("id" = ClassPackId, Path, description = "Class pack id")),
    responses((status = 200, description = "Class pack", body = ClassPack)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn get_class_pack(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<ClassPackId>,
) -> Result<Json<ClassPack>, ApiError> {
    Ok(Json(state.catalog.get_class_pack(&ctx, id).await?))
}

#[utoipa::path(
    post,
    path = "/class-packs/{id}/grant",
    params(("id" = ClassPackId, Path, description = "Class pack id")),
    request_body = PackGrant,
    responses((status = 201, description = "Complimentary balance", body = MemberClassPackBalance)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn grant_class_pack(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<ClassPackId>,
    Json(request): Json<PackGrant>,
) -> Result<impl IntoResponse, ApiError> {
    let balance = state.catalog.grant_pack(&ctx, id, request.member_id).await?;
    Ok((StatusCode::CREATED, Json(balance)))
}

#[utoipa::path(
    post,
    path = "/class-packs/{id}/purchase",
    params(("id" = ClassPackId, Path, description = "Class pack id")),
    request_body = PackPurchase,
    responses((status = 201, description = "Purchased balance", body = MemberClassPackBalance)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn purchase_class_pack(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<ClassPackId>,
    Json(request): Json<PackPurchase>,
) -> Result<impl IntoResponse, ApiError> {
    let balance = state
        .catalog
        .purchase_pack(&ctx, id, request.member_id, request.order_id)
        .await?;
    Ok((StatusCode::CREATED, Json(balance)))
}

#[utoipa::path(
    get,
    path = "/balances/{id}",
    params(("id" = BalanceId, Path, description = "Balance id")),
    responses((status = 200, description = "Member class-pack balance", body = MemberClassPackBalance)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn get_balance(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<BalanceId>,
) -> Result<Json<MemberClassPackBalance>, ApiError> {
    Ok(Json(state.catalog.get_balance(&ctx, id).await?))
}

#[utoipa::path(
    post,
    path = "/balances/{id}/cancel",
    params(("id" = BalanceId, Path, description = "Balance id")),
    responses((status = 200, description = "Cancelled balance", body = MemberClassPackBalance)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "catalog"
)]
pub async fn cancel_balance(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<BalanceId>,
) -> Result<Json<MemberClassPackBalance>, ApiError> {
    Ok(Json(state.catalog.cancel_balance(&ctx, id).await?))
}

#[utoipa::path(
    post,
    path = "/sessions",
    request_body = NewSession,
    responses(
        (status = 201, description = "Session created", body = ClassSession),
        (status = 409, description = "Trainer or location already taken")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn create_session(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(request): Json<NewSession>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.sessions.create_session(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    get,
    path = "/sessions",
    params(SessionsQuery),
    responses((status = 200, description = "Sessions on the date", body = [ClassSession])),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<SessionsQuery>,
) -> Result<Json<Vec<ClassSession>>, ApiError> {
    Ok(Json(state.sessions.sessions_on(&ctx, query.date).await?))
}

#[utoipa::path(
    post,
    path = "/sessions/generate",
    request_body = GenerateSessions,
    responses(
        (status = 201, description = "Sessions created from weekly schedules", body = [ClassSession]),
        (status = 400, description = "Invalid or too long date range")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn generate_sessions(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(request): Json<GenerateSessions>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state
        .generator
        .generate_sessions(&ctx, request.from, request.to, request.gym_class_id)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}",
    params(("id" = SessionId, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session", body = ClassSession),
        (status = 404, description = "Unknown session")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn get_session(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<SessionId>,
) -> Result<Json<ClassSession>, ApiError> {
    Ok(Json(state.sessions.get_session(&ctx, id).await?))
}

#[utoipa::path(
    patch,
    path = "/sessions/{id}",
    params(("id" = SessionId, Path, description = "Session id")),
    request_body = SessionPatch,
    responses(
        (status = 200, description = "Updated session", body = ClassSession),
        (status = 409, description = "Trainer or location already taken")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn update_session(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<SessionId>,
    Json(patch): Json<SessionPatch>,
) -> Result<Json<ClassSession>, ApiError> {
    Ok(Json(state.sessions.update_session(&ctx, id, patch).await?))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/trainer",
    params(("id" = SessionId, Path, description = "Session id")),
    request_body = TrainerAssignment,
    responses(
        (status = 200, description = "Session with new trainer", body = ClassSession),
        (status = 409, description = "Trainer already teaching")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn assign_trainer(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<SessionId>,
    Json(request): Json<TrainerAssignment>,
) -> Result<Json<ClassSession>, ApiError> {
    Ok(Json(
        state
            .sessions
            .assign_trainer(&ctx, id, request.trainer_id)
            .await?,
    ))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/start",
    params(("id" = SessionId, Path, description = "Session id")),
    responses((status = 200, description = "Session in progress", body = ClassSession)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn start_session(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<SessionId>,
) -> Result<Json<ClassSession>, ApiError> {
    Ok(Json(state.sessions.start_session(&ctx, id).await?))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/complete",
    params(("id" = SessionId, Path, description = "Session id")),
    responses((status = 200, description = "Completed session", body = ClassSession)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn complete_session(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<SessionId>,
) -> Result<Json<ClassSession>, ApiError> {
    Ok(Json(state.sessions.complete_session(&ctx, id).await?))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/cancel",
    params(("id" = SessionId, Path, description = "Session id")),
    request_body = Cancellation,
    responses(
        (status = 200, description = "Cancelled session", body = ClassSession),
        (status = 422, description = "Session is no longer scheduled")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "sessions"
)]
pub async fn cancel_session(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<SessionId>,
    Json(request): Json<Cancellation>,
) -> Result<Json<ClassSession>, ApiError> {
    Ok(Json(
        state.sessions.cancel_session(&ctx, id, request.reason).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/bookings",
    params(("id" = SessionId, Path, description = "Session id")),
    responses((status = 200, description = "Bookings in creation order", body = [ClassBooking])),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "bookings"
)]
pub async fn session_bookings(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<SessionId>,
) -> Result<Json<Vec<ClassBooking>>, ApiError> {
    Ok(Json(state.bookings.session_bookings(&ctx, id).await?))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/booking-options",
    params(("id" = SessionId, Path, description = "Session id"), OptionsQuery),
    responses((status = 200, description = "Eligibility and payment options", body = BookingOptions)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "bookings"
)]
pub async fn get_booking_options(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<SessionId>,
    Query(query): Query<OptionsQuery>,
) -> Result<Json<BookingOptions>, ApiError> {
    Ok(Json(
        state
            .bookings
            .get_booking_options(&ctx, id, query.member_id)
            .await?,
    ))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/waitlist",
    params(("id" = SessionId, Path, description = "Session id")),
    responses((status = 200, description = "Waitlist, head first", body = [ClassBooking])),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "bookings"
)]
pub async fn session_waitlist(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<SessionId>,
) -> Result<Json<Vec<ClassBooking>>, ApiError> {
    Ok(Json(state.bookings.waitlist(&ctx, id).await?))
}

#[utoipa::path(
    post,
    path = "/bookings",
    request_body = NewBooking,
    responses(
        (status = 201, description = "Confirmed or waitlisted booking", body = ClassBooking),
        (status = 400, description = "Booking rejected"),
        (status = 422, description = "Session is not open for booking")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "bookings"
)]
pub async fn book_session(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(request): Json<NewBooking>,
) -> Result<impl IntoResponse, ApiError> {
    let booking = state.bookings.create_booking(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

#[utoipa::path(
    get,
    path = "/bookings/{id}",
    params(("id" = BookingId, Path, description = "Booking id")),
    responses(
        (status = 200, description = "Booking", body = ClassBooking),
        (status = 404, description = "Unknown booking")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "bookings"
)]
pub async fn get_booking(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<BookingId>,
) -> Result<Json<ClassBooking>, ApiError> {
    Ok(Json(state.bookings.get_booking(&ctx, id).await?))
}

#[utoipa::path(
    delete,
    path = "/bookings/{id}",
    params(("id" = BookingId, Path, description = "Booking id")),
    responses(
        (status = 204, description = "Booking removed"),
        (status = 422, description = "Booking is still active")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "bookings"
)]
pub async fn delete_booking(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<BookingId>,
) -> Result<StatusCode, ApiError> {
    state.bookings.delete_booking(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/bookings/{id}/cancel",
    params(("id" = BookingId, Path, description = "Booking id")),
    request_body = Cancellation,
    responses(
        (status = 200, description = "Cancelled booking", body = ClassBooking),
        (status = 422, description = "Booking cannot be cancelled")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "bookings"
)]
pub async fn cancel_booking(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<BookingId>,
    Json(request): Json<Cancellation>,
) -> Result<Json<ClassBooking>, ApiError> {
    Ok(Json(
        state.bookings.cancel_booking(&ctx, id, request.reason).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/bookings/{id}/check-in",
    params(("id" = BookingId, Path, description = "Booking id")),
    responses((status = 200, description = "Checked-in booking", body = ClassBooking)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "bookings"
)]
pub async fn check_in(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<BookingId>,
) -> Result<Json<ClassBooking>, ApiError> {
    Ok(Json(state.bookings.check_in(&ctx, id).await?))
}

#[utoipa::path(
    post,
    path = "/bookings/{id}/no-show",
    params(("id" = BookingId, Path, description = "Booking id")),
    responses((status = 200, description = "Booking marked as no-show", body = ClassBooking)),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "bookings"
)]
pub async fn mark_no_show(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<BookingId>,
) -> Result<Json<ClassBooking>, ApiError> {
    Ok(Json(state.bookings.mark_no_show(&ctx, id).await?))
}

#[utoipa::path(
    get,
    path = "/members/{id}/bookings",
    params(("id" = MemberId, Path, description = "Member id")),
    responses((status = 200, description = "Bookings of the member", body = [ClassBooking])),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "bookings"
)]
pub async fn member_bookings(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<MemberId>,
) -> Result<Json<Vec<ClassBooking>>, ApiError> {
    Ok(Json(state.bookings.member_bookings(&ctx, id).await?))
}

#[utoipa::path(
    get,
    path = "/members/{id}/calendar.ics",
    params(("id" = MemberId, Path, description = "Member id")),
    responses(
        (status = 200, description = "iCal file", content_type = "text/calendar"),
        (status = 401, description = "Invalid authentication token")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "bookings"
)]
pub async fn member_calendar(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<MemberId>,
) -> Result<impl IntoResponse, ApiError> {
    let bookings: Vec<ClassBooking> = state
        .bookings
        .member_bookings(&ctx, id)
        .await?
        .into_iter()
        .filter(|b| matches!(b.status, BookingStatus::Confirmed | BookingStatus::Waitlisted))
        .collect();

    let sessions: Vec<ClassSession> = try_join_all(
        bookings
            .iter()
            .map(|booking| state.sessions.get_session(&ctx, booking.session_id)),
    )
    .await?;

    let mut class_ids: Vec<GymClassId> = sessions.iter().map(|s| s.gym_class_id).collect();
    class_ids.sort();
    class_ids.dedup();
    let classes: HashMap<GymClassId, GymClass> = try_join_all(
        class_ids
            .into_iter()
            .map(|class_id| state.catalog.get_gym_class(&ctx, class_id)),
    )
    .await?
    .into_iter()
    .map(|class| (class.id, class))
    .collect();

    let entries: Vec<CalendarEntry<'_>> = bookings
        .iter()
        .zip(&sessions)
        .filter_map(|(booking, session)| {
            classes.get(&session.gym_class_id).map(|gym_class| CalendarEntry {
                booking,
                session,
                gym_class,
            })
        })
        .collect();

    let body = state.exporter.generate(&entries);
    Ok((
        StatusCode::OK,
        [
            ("content-type", "text/calendar"),
            (
                "content-disposition",
                "attachment; filename=class_bookings.ics",
            ),
        ],
        body,
    ))
}
