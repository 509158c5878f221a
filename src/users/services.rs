use lazy_static::lazy_static;
use regex::Regex;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::{
    dto::{RegisterRequest, UpdateUserRequest, UserResponse},
    repo::User,
};
use crate::{
    auth::{
        extractors::Caller,
        password::{hash_password, MIN_PASSWORD_LEN},
    },
    error::{db_error_code, AppError, UNIQUE_VIOLATION},
};

const MAX_USERNAME_LEN: usize = 150;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Normalised registration input.
#[derive(Debug, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
}

fn validate_username(raw: &str) -> Result<String, AppError> {
    let username = raw.trim();
    if username.is_empty() {
        return Err(AppError::validation("username", "This field may not be blank."));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(AppError::validation(
            "username",
            format!("Ensure this field has no more than {MAX_USERNAME_LEN} characters."),
        ));
    }
    Ok(username.to_string())
}

fn validate_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim().to_lowercase();
    if !email.is_empty() && !is_valid_email(&email) {
        return Err(AppError::validation("email", "Enter a valid email address."));
    }
    Ok(email)
}

pub fn validate_registration(req: &RegisterRequest) -> Result<NewUser, AppError> {
    let username = validate_username(&req.username)?;
    let email = validate_email(req.email.as_deref().unwrap_or_default())?;
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(
            "password",
            format!("Ensure this field has at least {MIN_PASSWORD_LEN} characters."),
        ));
    }
    Ok(NewUser { username, email })
}

fn map_unique(e: sqlx::Error) -> AppError {
    if db_error_code(&e).as_deref() == Some(UNIQUE_VIOLATION) {
        AppError::Conflict("A user with that username already exists.".into())
    } else {
        e.into()
    }
}

pub async fn register(db: &PgPool, req: RegisterRequest) -> Result<UserResponse, AppError> {
    let new_user = validate_registration(&req)?;

    if User::find_by_username(db, &new_user.username).await?.is_some() {
        return Err(AppError::Conflict(
            "A user with that username already exists.".into(),
        ));
    }

    let hash = hash_password(&req.password)?;
    let user = User::create(db, &new_user.username, &new_user.email, &hash)
        .await
        .map_err(map_unique)?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(UserResponse::new(user, Vec::new()))
}

/// Result of an admin-elevation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elevation {
    AlreadyStaff,
    Promoted,
}

impl Elevation {
    pub fn message(self) -> &'static str {
        match self {
            Self::AlreadyStaff => "user is already staff",
            Self::Promoted => "user is now staff",
        }
    }
}

pub fn plan_elevation(target: &User) -> Elevation {
    if target.is_staff {
        Elevation::AlreadyStaff
    } else {
        Elevation::Promoted
    }
}

pub async fn make_admin(
    db: &PgPool,
    caller: &Caller,
    target_id: Uuid,
) -> Result<Elevation, AppError> {
    caller.require_admin()?;
    let target = User::find_by_id(db, target_id)
        .await?
        .ok_or(AppError::NotFound("user"))?;

    let outcome = plan_elevation(&target);
    if outcome == Elevation::Promoted {
        User::set_staff(db, target.id).await?;
        info!(user_id = %target.id, by = %caller.id, "user elevated to staff");
    }
    Ok(outcome)
}

pub async fn load_public(db: &PgPool, id: Uuid) -> Result<UserResponse, AppError> {
    let user = User::find_by_id(db, id)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    let orders = User::order_ids(db, user.id).await?;
    Ok(UserResponse::new(user, orders))
}

pub async fn list_users(db: &PgPool, caller: &Caller) -> Result<Vec<UserResponse>, AppError> {
    caller.require_admin()?;
    let users = User::list(db).await?;
    let mut out = Vec::with_capacity(users.len());
    for user in users {
        let orders = User::order_ids(db, user.id).await?;
        out.push(UserResponse::new(user, orders));
    }
    Ok(out)
}

pub async fn update_user(
    db: &PgPool,
    caller: &Caller,
    id: Uuid,
    req: UpdateUserRequest,
) -> Result<UserResponse, AppError> {
    caller.require_admin()?;
    let username = req.username.as_deref().map(validate_username).transpose()?;
    let email = req.email.as_deref().map(validate_email).transpose()?;

    let user = User::update_profile(db, id, username.as_deref(), email.as_deref())
        .await
        .map_err(map_unique)?
        .ok_or(AppError::NotFound("user"))?;
    let orders = User::order_ids(db, user.id).await?;
    Ok(UserResponse::new(user, orders))
}

pub async fn delete_user(db: &PgPool, caller: &Caller, id: Uuid) -> Result<(), AppError> {
    caller.require_admin()?;
    if !User::delete(db, id).await? {
        return Err(AppError::NotFound("user"));
    }
    info!(user_id = %id, by = %caller.id, "user deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn request(password: &str) -> RegisterRequest {
        RegisterRequest {
            username: "  alice ".into(),
            email: Some("Alice@Example.com".into()),
            password: password.into(),
        }
    }

    fn user(is_staff: bool) -> User {
        User {
            id: Uuid::new_v4(),
            username: "bob".into(),
            email: String::new(),
            password_hash: "x".into(),
            is_staff,
            is_superuser: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn password_of_five_chars_is_rejected() {
        let err = validate_registration(&request("12345")).unwrap_err();
        assert!(matches!(err, AppError::Validation { field: "password", .. }));
    }

    #[test]
    fn password_of_six_chars_is_accepted_and_input_normalised() {
        let new_user = validate_registration(&request("123456")).unwrap();
        assert_eq!(
            new_user,
            NewUser {
                username: "alice".into(),
                email: "alice@example.com".into(),
            }
        );
    }

    #[test]
    fn blank_username_and_bad_email_are_rejected() {
        let mut req = request("secret1");
        req.username = "   ".into();
        assert!(matches!(
            validate_registration(&req),
            Err(AppError::Validation { field: "username", .. })
        ));

        let mut req = request("secret1");
        req.email = Some("not-an-email".into());
        assert!(matches!(
            validate_registration(&req),
            Err(AppError::Validation { field: "email", .. })
        ));
    }

    #[test]
    fn email_is_optional() {
        let mut req = request("secret1");
        req.email = None;
        assert_eq!(validate_registration(&req).unwrap().email, "");
    }

    #[test]
    fn elevation_is_a_noop_for_staff() {
        assert_eq!(plan_elevation(&user(true)), Elevation::AlreadyStaff);
        assert_eq!(plan_elevation(&user(false)), Elevation::Promoted);
        assert_eq!(Elevation::Promoted.message(), "user is now staff");
    }

    #[test]
    fn serialized_user_never_contains_the_hash() {
        let u = user(false);
        let json = serde_json::to_string(&u).unwrap();
        assert!(!json.contains("password"));
        let public = serde_json::to_string(&UserResponse::new(u, vec![])).unwrap();
        assert!(!public.contains("password"));
    }
}
