use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use axum::{
    extract::{FromRequestParts, Query, State},
    http::{request::Parts, StatusCode},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    audit::record_audit_event,
    mail::{password_reset_email, verification_email},
    models::FieldErrors,
    services::tokens::{delete_token, find_valid_token, issue_token, TokenError, TokenPurpose},
    state::AppState,
};

const MIN_NAME_LEN: usize = 2;
const MIN_PASSWORD_LEN: usize = 8;
const SESSION_DAYS: i64 = 7;

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(alias = "confirmPassword")]
    pub confirm_password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub password: String,
    #[serde(alias = "confirmPassword")]
    pub confirm_password: String,
}

#[derive(Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user_id: Uuid,
}

#[derive(Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub email_verified_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub user: UserProfile,
    pub message: &'static str,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// Body of every failure from the token flows.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

pub type JsonError = (StatusCode, Json<ErrorResponse>);

#[derive(Clone)]
pub struct AuthenticatedUser {
    pub id: Uuid,
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = (StatusCode, String);

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let jwt_secret = state.jwt_secret.clone();
        async move {
            let auth_header = parts
                .headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .ok_or((StatusCode::UNAUTHORIZED, "Missing auth header".into()))?;

            let token = auth_header
                .strip_prefix("Bearer ")
                .ok_or((StatusCode::UNAUTHORIZED, "Invalid auth header".into()))?;

            let id = decode_user_id(&jwt_secret, token)
                .ok_or((StatusCode::UNAUTHORIZED, "Invalid token".into()))?;
            Ok(Self { id })
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, (StatusCode, String)> {
    validate_registration(&payload).map_err(|errors| (StatusCode::BAD_REQUEST, errors.to_string()))?;

    let email = normalize_email(&payload.email);
    let name = payload.name.trim().to_string();

    let existing = sqlx::query(
        r#"
        SELECT id, email_verified_at
        FROM users
        WHERE email = $1
        "#,
    )
    .bind(&email)
    .fetch_optional(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut tx = state.pool.begin().await.map_err(internal_error)?;
    if let Some(existing) = existing {
        let verified_at: Option<DateTime<Utc>> =
            existing.try_get("email_verified_at").map_err(internal_error)?;
        if verified_at.is_some() {
            warn!(%email, "registration for existing account");
            return Err((StatusCode::CONFLICT, "User already exists".into()));
        }

        let stale_id: Uuid = existing.try_get("id").map_err(internal_error)?;
        sqlx::query(
            r#"
            DELETE FROM users
            WHERE id = $1
            "#,
        )
        .bind(stale_id)
        .execute(&mut *tx)
        .await
        .map_err(internal_error)?;
        info!(%email, "replaced unverified account");
    }

    let password_hash = hash_password(&payload.password)?;
    let user_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO users (id, name, email, password_hash)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(user_id)
    .bind(&name)
    .bind(&email)
    .bind(password_hash)
    .execute(&mut *tx)
    .await
    .map_err(internal_error)?;
    tx.commit().await.map_err(internal_error)?;

    record_audit_event(
        &state.pool,
        Some(user_id),
        "user.register",
        serde_json::json!({ "email": email }),
    )
    .await;

    let token = issue_token(&state.pool, &email, TokenPurpose::VerifyEmail)
        .await
        .map_err(internal_error)?;
    let delivered = verification_email(&state.config.app_base_url, &email, &token)
        .and_then(|message| state.mailer.send(&message));
    if let Err(err) = delivered {
        error!(%email, error = %err, "failed to send verification email");
        return Err((
            StatusCode::BAD_GATEWAY,
            "User registered, but failed to send verification email. Please contact support."
                .into(),
        ));
    }

    Ok(Json(RegisterResponse {
        user: UserProfile {
            id: user_id,
            name,
            email,
            email_verified_at: None,
        },
        message: "Email verification sent, proceed to your inbox",
    }))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, String)> {
    let email = normalize_email(&payload.email);
    let record = sqlx::query(
        r#"
        SELECT id, password_hash, email_verified_at
        FROM users
        WHERE email = $1
        "#,
    )
    .bind(&email)
    .fetch_optional(&state.pool)
    .await
    .map_err(internal_error)?
    .ok_or((StatusCode::UNAUTHORIZED, "Invalid credentials".into()))?;

    let password_hash: String = record
        .try_get("password_hash")
        .map_err(internal_error)?;
    let user_id: Uuid = record.try_get("id").map_err(internal_error)?;
    let verified_at: Option<DateTime<Utc>> =
        record.try_get("email_verified_at").map_err(internal_error)?;

    verify_password(&payload.password, &password_hash)?;
    if verified_at.is_none() {
        return Err((StatusCode::FORBIDDEN, "Email not verified".into()));
    }

    record_audit_event(
        &state.pool,
        Some(user_id),
        "user.login",
        serde_json::json!({ "email": email }),
    )
    .await;

    let token = issue_jwt(&state.jwt_secret, user_id)?;
    Ok(Json(AuthResponse {
        token,
        user_id,
    }))
}

pub async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<MessageResponse>, JsonError> {
    let token = require_token(query.token)?;
    let email = find_valid_token(&state.pool, &token, TokenPurpose::VerifyEmail)
        .await
        .map_err(token_rejection)?;

    let updated = sqlx::query(
        r#"
        UPDATE users
        SET email_verified_at = NOW()
        WHERE email = $1
        RETURNING id
        "#,
    )
    .bind(&email)
    .fetch_optional(&state.pool)
    .await
    .map_err(json_internal_error)?;
    let Some(updated) = updated else {
        return Err(user_not_found());
    };
    let user_id: Uuid = updated.try_get("id").map_err(json_internal_error)?;

    delete_token(&state.pool, &token)
        .await
        .map_err(json_internal_error)?;
    record_audit_event(
        &state.pool,
        Some(user_id),
        "user.email_verified",
        serde_json::json!({ "email": email }),
    )
    .await;

    Ok(Json(MessageResponse {
        message: "Email verified",
    }))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, (StatusCode, String)> {
    let email = normalize_email(&payload.email);
    if !looks_like_email(&email) {
        return Err((StatusCode::BAD_REQUEST, "email: Please enter a valid email".into()));
    }

    let verified_at: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(
        r#"
        SELECT email_verified_at
        FROM users
        WHERE email = $1
        "#,
    )
    .bind(&email)
    .fetch_optional(&state.pool)
    .await
    .map_err(internal_error)?;

    match verified_at {
        None => return Err((StatusCode::NOT_FOUND, "User does not exist".into())),
        Some(None) => return Err((StatusCode::CONFLICT, "Register again".into())),
        Some(Some(_)) => {}
    }

    let token = issue_token(&state.pool, &email, TokenPurpose::ResetPassword)
        .await
        .map_err(internal_error)?;
    let delivered = password_reset_email(&state.config.app_base_url, &email, &token)
        .and_then(|message| state.mailer.send(&message));
    if let Err(err) = delivered {
        error!(%email, error = %err, "failed to send password reset email");
        return Err((
            StatusCode::BAD_GATEWAY,
            "Failed to send reset password email. Please contact support.".into(),
        ));
    }

    Ok(Json(MessageResponse {
        message: "Reset password email sent",
    }))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, JsonError> {
    let mut errors = FieldErrors::default();
    check_password_pair(&mut errors, &payload.password, &payload.confirm_password);
    if !errors.is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "ValidationFailed", errors.to_string()));
    }

    let token = require_token(query.token)?;
    let email = find_valid_token(&state.pool, &token, TokenPurpose::ResetPassword)
        .await
        .map_err(token_rejection)?;

    let password_hash = hash_password(&payload.password).map_err(|(status, message)| {
        json_error(status, "PasswordResetFailed", message)
    })?;
    let updated = sqlx::query(
        r#"
        UPDATE users
        SET password_hash = $1
        WHERE email = $2
        RETURNING id
        "#,
    )
    .bind(password_hash)
    .bind(&email)
    .fetch_optional(&state.pool)
    .await
    .map_err(json_internal_error)?;
    let Some(updated) = updated else {
        return Err(user_not_found());
    };
    let user_id: Uuid = updated.try_get("id").map_err(json_internal_error)?;

    delete_token(&state.pool, &token)
        .await
        .map_err(json_internal_error)?;
    record_audit_event(
        &state.pool,
        Some(user_id),
        "user.password_reset",
        serde_json::json!({ "email": email }),
    )
    .await;

    Ok(Json(MessageResponse {
        message: "Password updated",
    }))
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<UserProfile>, (StatusCode, String)> {
    let record = sqlx::query(
        r#"
        SELECT id, name, email, email_verified_at
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(user.id)
    .fetch_optional(&state.pool)
    .await
    .map_err(internal_error)?
    .ok_or((StatusCode::NOT_FOUND, "User not found".into()))?;

    Ok(Json(UserProfile {
        id: record.try_get("id").map_err(internal_error)?,
        name: record.try_get("name").map_err(internal_error)?,
        email: record.try_get("email").map_err(internal_error)?,
        email_verified_at: record.try_get("email_verified_at").map_err(internal_error)?,
    }))
}

pub fn validate_registration(payload: &RegisterRequest) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::default();
    if !looks_like_email(&normalize_email(&payload.email)) {
        errors.push("email", "Please enter a valid email");
    }
    if payload.name.trim().chars().count() < MIN_NAME_LEN {
        errors.push("name", "Name must be at least 2 characters");
    }
    check_password_pair(&mut errors, &payload.password, &payload.confirm_password);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_password_pair(errors: &mut FieldErrors, password: &str, confirm_password: &str) {
    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.push("password", "Password must be at least 8 characters");
    }
    if password != confirm_password {
        errors.push("confirmPassword", "Passwords do not match");
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// One `@` with a non-empty local part and a dotted domain, no whitespace.
pub fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

fn require_token(token: Option<String>) -> Result<String, JsonError> {
    token
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| json_error(StatusCode::BAD_REQUEST, "MissingToken", "Token is missing"))
}

fn token_rejection(err: TokenError) -> JsonError {
    match err {
        TokenError::NotFound => json_error(StatusCode::BAD_REQUEST, "InvalidToken", "Token not found"),
        TokenError::Expired => json_error(StatusCode::GONE, "TokenExpired", "Token has expired"),
        TokenError::Database(err) => json_internal_error(err),
    }
}

fn user_not_found() -> JsonError {
    json_error(StatusCode::NOT_FOUND, "UserNotFound", "User not found")
}

fn json_error(status: StatusCode, error: &'static str, message: impl Into<String>) -> JsonError {
    (
        status,
        Json(ErrorResponse {
            error,
            message: message.into(),
        }),
    )
}

fn json_internal_error<E: std::fmt::Display>(err: E) -> JsonError {
    error!(error = %err, "token flow failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "VerificationFailed", err.to_string())
}

fn issue_jwt(secret: &str, user_id: Uuid) -> Result<String, (StatusCode, String)> {
    let exp = (Utc::now() + Duration::days(SESSION_DAYS)).timestamp() as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(internal_error)
}

fn decode_user_id(secret: &str, token: &str) -> Option<Uuid> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;
    Uuid::parse_str(&claims.claims.sub).ok()
}

fn hash_password(password: &str) -> Result<String, (StatusCode, String)> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(internal_error)?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash: &str) -> Result<(), (StatusCode, String)> {
    let parsed = PasswordHash::new(hash).map_err(internal_error)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid credentials".into()))
}

pub fn internal_error<E: std::fmt::Display>(error: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

pub async fn ensure_database(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
}
