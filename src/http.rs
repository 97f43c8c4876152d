//! HTTP API for the progress engine
//!
//! ## Routes
//! - `GET /health` - liveness plus ledger row counts
//! - `GET /progress/summary` - XP, level, streak, daily goal, hearts
//! - `POST /lessons/{id}/start` - mark a lesson in progress (always 202, failures are logged)
//! - `POST /lessons/{id}/complete` - record a completion, returns the reward summary
//! - `GET /lessons/{id}/status` - single lesson status
//! - `GET /chapters/{id}/lessons` - every lesson of a chapter with its status
//! - `GET /worlds/{id}/chapters` - per-chapter unlocked/completed flags
//! - `GET /cards` - card collection with unlock times
//! - `POST /hearts/lose`, `POST /hearts/refill` - heart ledger
//! - `PUT /daily-goal` - set the daily XP target
//! - `POST /admin/users/{id}/reset` - administrative gamification reset (admin callers only)
//!
//! The gateway in front of this daemon authenticates the user and forwards
//! the ID as `X-User-Id`. `X-Utc-Offset-Minutes` optionally updates the
//! user's timezone; `Idempotency-Key` (or `idempotencyKey` in the body)
//! makes a completion safe to retry.
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST -H "X-User-Id: u1" -H "Idempotency-Key: 7f1c" \
//!      -d '{"score": 100, "correctCount": 5, "totalQuestions": 5}' \
//!      http://localhost:8095/lessons/l1/complete
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::db::UserContext;
use crate::engine::{AttemptMode, LessonResult};
use crate::error::ProgressError;
use crate::services::response::{
    accepted, bad_request, error_response, forbidden, from_result, method_not_allowed, not_found,
    ok, unauthorized,
};
use crate::services::{CompletionRequest, Services, StartOutcome};
use crate::views::{
    CardView, ChapterLessonsView, CompleteLessonInputView, HealthView, LessonStatusView,
    ProgressSummaryView, SetDailyGoalInputView, StartLessonView, WorldOverviewView,
};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const UTC_OFFSET_HEADER: &str = "x-utc-offset-minutes";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const REPLAYED_HEADER: &str = "idempotent-replayed";

type HttpResponse = Response<Full<Bytes>>;

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    bind_addr: SocketAddr,
}

/// Run blocking ledger work off the async runtime
async fn blocking<T, F>(f: F) -> Result<T, ProgressError>
where
    F: FnOnce() -> Result<T, ProgressError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ProgressError::Internal(format!("blocking task failed: {}", e)))?
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProgressError> {
    if body.is_empty() {
        return Err(ProgressError::InvalidInput("request body is required".into()));
    }
    Ok(serde_json::from_slice(body)?)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Authenticated user plus optional timezone from request headers
///
/// `Ok(None)` means the gateway sent no user.
fn user_context(headers: &HeaderMap) -> Result<Option<UserContext>, ProgressError> {
    let Some(user_id) = header_str(headers, USER_ID_HEADER) else {
        return Ok(None);
    };
    let mut ctx = UserContext::new(user_id)?;
    if let Some(offset) = header_str(headers, UTC_OFFSET_HEADER) {
        let minutes = offset.parse::<i32>().map_err(|_| {
            ProgressError::InvalidInput(format!("{} must be an integer", UTC_OFFSET_HEADER))
        })?;
        ctx = ctx.with_utc_offset(minutes)?;
    }
    Ok(Some(ctx))
}

/// `/prefix/{id}/suffix` -> `id`
fn path_param<'a>(path: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let id = path.strip_prefix(prefix)?.strip_suffix(suffix)?;
    if id.is_empty() || id.contains('/') {
        None
    } else {
        Some(id)
    }
}

impl HttpServer {
    pub fn new(services: Arc<Services>, bind_addr: SocketAddr) -> Self {
        Self {
            services,
            bind_addr,
        }
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), ProgressError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    async fn handle_request(&self, req: Request<Incoming>) -> Result<HttpResponse, hyper::Error> {
        let (parts, body) = req.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok(self
            .route(&parts.method, parts.uri.path(), &parts.headers, body)
            .await)
    }

    /// Dispatch one request; transport-independent so tests can drive it
    pub async fn route(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> HttpResponse {
        debug!(method = %method, path = %path, "Incoming request");

        if path == "/health" {
            return match *method {
                Method::GET => self.handle_health().await,
                _ => method_not_allowed(),
            };
        }

        let ctx = match user_context(headers) {
            Ok(Some(ctx)) => ctx,
            Ok(None) => return unauthorized("X-User-Id header is required"),
            Err(e) => return error_response(e),
        };

        match (method.clone(), path) {
            (Method::GET, "/progress/summary") => self.handle_summary(ctx).await,
            (Method::GET, "/cards") => self.handle_cards(ctx).await,
            (Method::POST, "/hearts/lose") => self.handle_lose_heart(ctx).await,
            (Method::POST, "/hearts/refill") => self.handle_refill_hearts(ctx).await,
            (Method::PUT, "/daily-goal") => self.handle_set_daily_goal(ctx, &body).await,

            (Method::POST, p) if p.starts_with("/lessons/") && p.ends_with("/start") => {
                match path_param(p, "/lessons/", "/start") {
                    Some(id) => self.handle_start(ctx, id.to_string()).await,
                    None => not_found("Lesson id missing"),
                }
            }
            (Method::POST, p) if p.starts_with("/lessons/") && p.ends_with("/complete") => {
                match path_param(p, "/lessons/", "/complete") {
                    Some(id) => self.handle_complete(ctx, id.to_string(), headers, &body).await,
                    None => not_found("Lesson id missing"),
                }
            }
            (Method::GET, p) if p.starts_with("/lessons/") && p.ends_with("/status") => {
                match path_param(p, "/lessons/", "/status") {
                    Some(id) => self.handle_lesson_status(ctx, id.to_string()).await,
                    None => not_found("Lesson id missing"),
                }
            }
            (Method::GET, p) if p.starts_with("/chapters/") && p.ends_with("/lessons") => {
                match path_param(p, "/chapters/", "/lessons") {
                    Some(id) => self.handle_chapter_lessons(ctx, id.to_string()).await,
                    None => not_found("Chapter id missing"),
                }
            }
            (Method::GET, p) if p.starts_with("/worlds/") && p.ends_with("/chapters") => {
                match path_param(p, "/worlds/", "/chapters") {
                    Some(id) => self.handle_world_overview(ctx, id.to_string()).await,
                    None => not_found("World id missing"),
                }
            }
            (Method::POST, p) if p.starts_with("/admin/users/") && p.ends_with("/reset") => {
                match path_param(p, "/admin/users/", "/reset") {
                    Some(id) => self.handle_reset(ctx, id.to_string()).await,
                    None => not_found("User id missing"),
                }
            }

            _ => not_found("Route not found"),
        }
    }

    /// GET /health
    async fn handle_health(&self) -> HttpResponse {
        let services = self.services.clone();
        let cached_chapters = services.content.cached_chapter_count();
        from_result(
            blocking(move || services.db().stats())
                .await
                .map(|stats| HealthView {
                    status: "ok",
                    version: env!("CARGO_PKG_VERSION"),
                    stats,
                    cached_chapters,
                }),
        )
    }

    async fn summary_view(&self, ctx: UserContext) -> Result<ProgressSummaryView, ProgressError> {
        let progress = self.services.progress.clone();
        blocking(move || progress.summary(&ctx)).await.map(Into::into)
    }

    /// GET /progress/summary
    async fn handle_summary(&self, ctx: UserContext) -> HttpResponse {
        from_result(self.summary_view(ctx).await)
    }

    /// POST /lessons/{id}/start
    async fn handle_start(&self, ctx: UserContext, lesson_id: String) -> HttpResponse {
        let completion = self.services.completion.clone();
        let id = lesson_id.clone();
        let user_id = ctx.user_id().to_string();
        let outcome = match blocking(move || completion.start_lesson(&ctx, &id)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Starting is advisory; the client never waits on it
                warn!(
                    user_id = %user_id,
                    lesson_id = %lesson_id,
                    error = %e,
                    "Lesson start not recorded"
                );
                StartOutcome::Ignored
            }
        };
        accepted(&StartLessonView { lesson_id, outcome })
    }

    /// POST /lessons/{id}/complete
    async fn handle_complete(
        &self,
        ctx: UserContext,
        lesson_id: String,
        headers: &HeaderMap,
        body: &[u8],
    ) -> HttpResponse {
        let input: CompleteLessonInputView = match parse_json(body) {
            Ok(input) => input,
            Err(e) => return error_response(e),
        };
        if let Some(body_id) = input.lesson_id.as_deref() {
            if body_id != lesson_id {
                return bad_request("lessonId in body does not match the path");
            }
        }

        let header_key = header_str(headers, IDEMPOTENCY_KEY_HEADER).map(str::to_string);
        let idempotency_key = match (header_key, input.idempotency_key) {
            (Some(h), Some(b)) if h != b => {
                return bad_request("Idempotency-Key header and idempotencyKey differ");
            }
            (Some(h), _) => Some(h),
            (None, b) => b,
        };

        let mode = match AttemptMode::from_flags(input.review, input.legendary) {
            Ok(mode) => mode,
            Err(e) => return error_response(e),
        };
        let request = CompletionRequest {
            lesson_id,
            result: LessonResult {
                score: input.score,
                correct_count: input.correct_count,
                total_questions: input.total_questions,
                mode,
            },
            idempotency_key,
        };

        let completion = self.services.completion.clone();
        match blocking(move || completion.complete_lesson(&ctx, request)).await {
            Ok(outcome) => {
                let mut response = ok(&outcome.summary);
                if outcome.replayed {
                    response.headers_mut().insert(
                        HeaderName::from_static(REPLAYED_HEADER),
                        HeaderValue::from_static("true"),
                    );
                }
                response
            }
            Err(e) => error_response(e),
        }
    }

    /// GET /lessons/{id}/status
    async fn handle_lesson_status(&self, ctx: UserContext, lesson_id: String) -> HttpResponse {
        let progress = self.services.progress.clone();
        from_result(
            blocking(move || progress.lesson_status(&ctx, &lesson_id))
                .await
                .map(LessonStatusView::from),
        )
    }

    /// GET /chapters/{id}/lessons
    async fn handle_chapter_lessons(&self, ctx: UserContext, chapter_id: String) -> HttpResponse {
        let progress = self.services.progress.clone();
        from_result(
            blocking(move || progress.chapter_statuses(&ctx, &chapter_id))
                .await
                .map(ChapterLessonsView::from),
        )
    }

    /// GET /worlds/{id}/chapters
    async fn handle_world_overview(&self, ctx: UserContext, world_id: String) -> HttpResponse {
        let progress = self.services.progress.clone();
        from_result(
            blocking(move || progress.world_overview(&ctx, &world_id))
                .await
                .map(WorldOverviewView::from),
        )
    }

    /// GET /cards
    async fn handle_cards(&self, ctx: UserContext) -> HttpResponse {
        let progress = self.services.progress.clone();
        from_result(
            blocking(move || progress.card_collection(&ctx))
                .await
                .map(|cards| cards.into_iter().map(CardView::from).collect::<Vec<_>>()),
        )
    }

    /// POST /hearts/lose
    async fn handle_lose_heart(&self, ctx: UserContext) -> HttpResponse {
        let completion = self.services.completion.clone();
        let user = ctx.clone();
        if let Err(e) = blocking(move || completion.lose_heart(&user)).await {
            return error_response(e);
        }
        from_result(self.summary_view(ctx).await)
    }

    /// POST /hearts/refill
    async fn handle_refill_hearts(&self, ctx: UserContext) -> HttpResponse {
        let completion = self.services.completion.clone();
        let user = ctx.clone();
        if let Err(e) = blocking(move || completion.refill_hearts(&user)).await {
            return error_response(e);
        }
        from_result(self.summary_view(ctx).await)
    }

    /// PUT /daily-goal
    async fn handle_set_daily_goal(&self, ctx: UserContext, body: &[u8]) -> HttpResponse {
        let input: SetDailyGoalInputView = match parse_json(body) {
            Ok(input) => input,
            Err(e) => return error_response(e),
        };
        let completion = self.services.completion.clone();
        let user = ctx.clone();
        if let Err(e) = blocking(move || completion.set_daily_goal(&user, input.target_xp)).await {
            return error_response(e);
        }
        from_result(self.summary_view(ctx).await)
    }

    /// POST /admin/users/{id}/reset
    async fn handle_reset(&self, caller: UserContext, user_id: String) -> HttpResponse {
        if !self.services.is_admin(caller.user_id()) {
            warn!(caller = %caller.user_id(), user_id = %user_id, "Admin reset denied");
            return forbidden("Administrative reset requires an admin user");
        }
        let target = match UserContext::new(user_id) {
            Ok(target) => target,
            Err(e) => return error_response(e),
        };
        tracing::info!(caller = %caller.user_id(), user_id = %target.user_id(), "Admin reset requested");
        let completion = self.services.completion.clone();
        let id = target.user_id().to_string();
        if let Err(e) = blocking(move || completion.reset_gamification(&id)).await {
            return error_response(e);
        }
        from_result(self.summary_view(target).await)
    }
}
