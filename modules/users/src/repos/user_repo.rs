use chrono::Utc;
use event_bus::EventError;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::{KycStatus, NewUser, User, UserStatus, UserUpdate};

#[derive(Debug, Error)]
pub enum UserError {
    #[error("user {0} not found")]
    NotFound(i64),

    #[error("email {0} is already registered")]
    DuplicateEmail(String),

    #[error("invalid user: {0}")]
    Invalid(String),

    #[error(transparent)]
    Event(#[from] EventError),
}

impl From<UserError> for EventError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::Event(inner) => inner,
            other => EventError::domain(other),
        }
    }
}

#[derive(Default)]
struct Directory {
    users: HashMap<i64, User>,
    last_id: i64,
}

#[derive(Default)]
pub struct UserRepo {
    directory: Mutex<Directory>,
}

impl UserRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, new_user: NewUser) -> Result<User, UserError> {
        let email = normalize_email(&new_user.email)?;
        if new_user.username.trim().is_empty() {
            return Err(UserError::Invalid("username is empty".to_string()));
        }

        let mut directory = self.directory.lock().await;
        if directory.users.values().any(|u| u.email == email) {
            return Err(UserError::DuplicateEmail(email));
        }

        directory.last_id += 1;
        let now = Utc::now();
        let user = User {
            user_id: directory.last_id,
            email,
            username: new_user.username,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            status: UserStatus::Active,
            kyc_status: KycStatus::NotSubmitted,
            created_at: now,
            updated_at: now,
        };
        directory.users.insert(user.user_id, user.clone());
        Ok(user)
    }

    pub async fn get(&self, user_id: i64) -> Option<User> {
        self.directory.lock().await.users.get(&user_id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.directory.lock().await.users.len()
    }

    pub async fn update(&self, user_id: i64, update: UserUpdate) -> Result<User, UserError> {
        let email = update.email.as_deref().map(normalize_email).transpose()?;

        let mut directory = self.directory.lock().await;
        if let Some(email) = &email {
            if directory
                .users
                .values()
                .any(|u| u.user_id != user_id && &u.email == email)
            {
                return Err(UserError::DuplicateEmail(email.clone()));
            }
        }

        let user = directory
            .users
            .get_mut(&user_id)
            .ok_or(UserError::NotFound(user_id))?;
        if let Some(email) = email {
            user.email = email;
        }
        if let Some(first_name) = update.first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = update.last_name {
            user.last_name = last_name;
        }
        if let Some(status) = update.status {
            user.status = status;
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    /// Set the KYC status, returning the previous one with the updated user
    pub async fn set_kyc_status(
        &self,
        user_id: i64,
        status: KycStatus,
    ) -> Result<(KycStatus, User), UserError> {
        let mut directory = self.directory.lock().await;
        let user = directory
            .users
            .get_mut(&user_id)
            .ok_or(UserError::NotFound(user_id))?;
        let previous = std::mem::replace(&mut user.kyc_status, status);
        user.updated_at = Utc::now();
        Ok((previous, user.clone()))
    }

    pub async fn remove(&self, user_id: i64) -> Result<User, UserError> {
        self.directory
            .lock()
            .await
            .users
            .remove(&user_id)
            .ok_or(UserError::NotFound(user_id))
    }
}

fn normalize_email(raw: &str) -> Result<String, UserError> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(UserError::Invalid(format!("{raw} is not an email address"))),
    }
}
