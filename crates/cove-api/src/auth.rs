use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use cove_core::{CoreError, users};
use cove_gateway::admission;
use cove_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::AppState;
use crate::error::ApiError;

const PASSWORD_MIN: usize = 8;
const TOKEN_LIFETIME_DAYS: i64 = 30;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.password.len() < PASSWORD_MIN {
        return Err(CoreError::validation(format!(
            "password must be at least {PASSWORD_MIN} characters"
        ))
        .into());
    }

    // Hash with Argon2id before anything touches the store
    let salt = SaltString::generate(&mut OsRng);
    let credential_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(ApiError::internal)?
        .to_string();

    let user = users::create_user(&state.store, &req.username, &credential_hash, req.public_key)?;

    let token = create_token(&state.jwt_secret, user.id, &user.username)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: user.id,
            token,
        }),
    ))
}

/// The authenticate capability: credentials in, identity plus token out.
/// Credential failures are deliberately indistinguishable from unknown
/// usernames.
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let invalid = || CoreError::Authentication("invalid credentials".into());

    let user = users::find_by_username(&state.store, &req.username)?.ok_or_else(invalid)?;

    let parsed_hash = PasswordHash::new(&user.credential_hash).map_err(ApiError::internal)?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| invalid())?;

    // Regional admission gate, best-effort unless strict mode is on
    let country = admission::country_from_headers(&headers);
    if !admission::admit(&user, country.as_deref(), state.geo_strict) {
        return Err(CoreError::authorization("login not permitted from this region").into());
    }

    let token = create_token(&state.jwt_secret, user.id, &user.username)?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        username: user.username,
        token,
    }))
}

fn create_token(secret: &str, user_id: Uuid, username: &str) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_LIFETIME_DAYS)).timestamp()
            as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(ApiError::internal)
}
