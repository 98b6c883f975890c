pub mod auth;
pub mod booking;
pub mod catalog;
pub mod clock;
pub mod conflict;
pub mod error;
pub mod handlers;
pub mod ical;
pub mod ledger;
pub mod locks;
pub mod models;
pub mod notify;
pub mod openapi;
pub mod payment;
pub mod schedule;
pub mod sessions;
pub mod settings;
pub mod status;
pub mod store;
pub mod sweep;
pub mod validation;
pub mod waitlist;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use handlers::{
    activate_gym_class, archive_gym_class, assign_trainer, book_session, cancel_balance,
    cancel_booking, cancel_session, check_in, complete_session, create_class_pack,
    create_gym_class, create_schedule, create_session, deactivate_gym_class, deactivate_schedule,
    delete_booking, generate_sessions, get_balance, get_booking, get_booking_options,
    get_class_pack, get_gym_class, get_session, grant_class_pack, healthz_live, healthz_ready,
    list_gym_classes, list_sessions, mark_no_show, member_bookings, member_calendar,
    purchase_class_pack, root, session_bookings, session_waitlist, start_session,
    update_gym_class, update_session,
};
use tokio::sync::watch;
use tower_http::LatencyUnit;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::booking::BookingEngine;
use crate::catalog::ClassCatalog;
use crate::clock::{Clock, ClubTime, SystemClock};
use crate::conflict::{AlwaysAvailable, SessionConflictValidator};
use crate::ical::ICalExporter;
use crate::ledger::{
    ClassPackLedger, MemoryClassPackLedger, MemorySubscriptionLedger, SubscriptionLedger,
};
use crate::locks::LockRegistry;
use crate::notify::{Dispatcher, HttpWebhookPublisher, LogNotificationGateway};
use crate::openapi::ApiDoc;
use crate::payment::PaymentSourceResolver;
use crate::schedule::ScheduleGenerator;
use crate::sessions::SessionManager;
use crate::settings::Settings;
use crate::store::{MemoryStore, SchedulingStore};
use crate::sweep::{ExpireClassPackBalances, spawn_periodic};

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub time: ClubTime,
    pub catalog: Arc<ClassCatalog>,
    pub sessions: Arc<SessionManager>,
    pub generator: Arc<ScheduleGenerator>,
    pub bookings: Arc<BookingEngine>,
    pub exporter: Arc<ICalExporter>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        time: ClubTime,
        store: Arc<dyn SchedulingStore>,
        subscriptions: Arc<dyn SubscriptionLedger>,
        packs: Arc<dyn ClassPackLedger>,
        dispatcher: Dispatcher,
    ) -> Self {
        let locks = Arc::new(LockRegistry::new());
        let validator = SessionConflictValidator::new(store.clone(), Arc::new(AlwaysAvailable));
        let payments = PaymentSourceResolver::new(subscriptions, packs.clone(), time.clone());

        let catalog = ClassCatalog::new(store.clone(), packs, time.clone());
        let generator = ScheduleGenerator::new(
            store.clone(),
            validator.clone(),
            locks.clone(),
            settings.max_generation_days,
        );
        let sessions = SessionManager::new(
            store.clone(),
            validator,
            payments.clone(),
            locks.clone(),
            dispatcher.clone(),
            time.clone(),
        );
        let bookings = BookingEngine::new(store, payments, locks, dispatcher, time.clone());

        Self {
            exporter: Arc::new(ICalExporter::new(time.timezone())),
            settings,
            time,
            catalog: Arc::new(catalog),
            sessions: Arc::new(sessions),
            generator: Arc::new(generator),
            bookings: Arc::new(bookings),
        }
    }

    /// Fully in-memory wiring with logging side channels.
    pub fn in_memory(settings: Settings, clock: Arc<dyn Clock>) -> Self {
        let time = ClubTime::new(clock, settings.timezone);
        Self::new(
            settings,
            time,
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySubscriptionLedger::new()),
            Arc::new(MemoryClassPackLedger::new()),
            Dispatcher::logging(),
        )
    }
}

fn dispatcher(settings: &Settings) -> Result<Dispatcher, Box<dyn std::error::Error>> {
    Ok(match &settings.webhook_url {
        Some(url) => {
            let publisher = HttpWebhookPublisher::new(url.clone(), settings.webhook_timeout())?;
            info!(%url, "Publishing booking webhooks");
            Dispatcher::new(Arc::new(LogNotificationGateway), Arc::new(publisher))
        }
        None => Dispatcher::logging(),
    })
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;

    let env_filter = if settings.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .without_time()
        .init();

    let time = ClubTime::new(Arc::new(SystemClock), settings.timezone);
    let packs: Arc<dyn ClassPackLedger> = Arc::new(MemoryClassPackLedger::new());
    let state = AppState::new(
        settings.clone(),
        time.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(MemorySubscriptionLedger::new()),
        packs.clone(),
        dispatcher(&settings)?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep = spawn_periodic(
        Arc::new(ExpireClassPackBalances::new(
            packs,
            time,
            settings.sweep_interval(),
        )),
        shutdown_rx,
    );

    let app = build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.port));
    info!(timezone = %settings.timezone, "Starting class booking API on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app).await;

    let _ = shutdown_tx.send(true);
    sweep.await?;
    served?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    let mut router = Router::new()
        .route("/", get(root))
        .route("/healthz/live", get(healthz_live))
        .route("/healthz/ready", get(healthz_ready))
        .route("/classes", get(list_gym_classes).post(create_gym_class))
        .route("/classes/{id}", get(get_gym_class).patch(update_gym_class))
        .route("/classes/{id}/activate", post(activate_gym_class))
        .route("/classes/{id}/deactivate", post(deactivate_gym_class))
        .route("/classes/{id}/archive", post(archive_gym_class))
        .route("/schedules", post(create_schedule))
        .route("/schedules/{id}/deactivate", post(deactivate_schedule))
        .route("/class-packs", post(create_class_pack))
        .route("/class-packs/{id}", get(get_class_pack))
        .route("/class-packs/{id}/grant", post(grant_class_pack))
        .route("/class-packs/{id}/purchase", post(purchase_class_pack))
        .route("/balances/{id}", get(get_balance))
        .route("/balances/{id}/cancel", post(cancel_balance))
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/generate", post(generate_sessions))
        .route("/sessions/{id}", get(get_session).patch(update_session))
        .route("/sessions/{id}/trainer", post(assign_trainer))
        .route("/sessions/{id}/start", post(start_session))
        .route("/sessions/{id}/complete", post(complete_session))
        .route("/sessions/{id}/cancel", post(cancel_session))
        .route("/sessions/{id}/bookings", get(session_bookings))
        .route("/sessions/{id}/booking-options", get(get_booking_options))
        .route("/sessions/{id}/waitlist", get(session_waitlist))
        .route("/bookings", post(book_session))
        .route("/bookings/{id}", get(get_booking).delete(delete_booking))
        .route("/bookings/{id}/cancel", post(cancel_booking))
        .route("/bookings/{id}/check-in", post(check_in))
        .route("/bookings/{id}/no-show", post(mark_no_show))
        .route("/members/{id}/bookings", get(member_bookings))
        .route("/members/{id}/calendar.ics", get(member_calendar))
        .with_state(state.clone());

    if state.settings.enable_swagger {
        let openapi = ApiDoc::openapi();
        let swagger = SwaggerUi::new("/docs").url("/openapi.json", openapi);
        router = router.merge(swagger);
    }

    router.layer(trace_layer)
}
