use event_bus::events::{KycUpdated, UserCreated, UserDeleted, UserUpdated};
use event_bus::{EventProducer, PublishMode};
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::{KycStatus, NewUser, User, UserUpdate};
use crate::repos::{UserError, UserRepo};

/// User directory; every lifecycle change is announced on `user-events`
/// keyed by user id
pub struct UserDirectory {
    repo: Arc<UserRepo>,
    producer: EventProducer,
}

impl UserDirectory {
    pub fn new(repo: Arc<UserRepo>, producer: EventProducer) -> Self {
        Self { repo, producer }
    }

    pub fn repo(&self) -> &Arc<UserRepo> {
        &self.repo
    }

    /// Register a user and publish `UserCreated`
    ///
    /// The user is removed again if the event cannot be confirmed, so no
    /// user exists that downstream services never heard of.
    pub async fn register(&self, new_user: NewUser) -> Result<User, UserError> {
        let user = self.repo.insert(new_user).await?;

        let event = UserCreated {
            user_id: user.user_id,
            email: user.email.clone(),
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            status: user.status.as_str().to_string(),
        };
        if let Err(e) = self.producer.emit(&event, PublishMode::Confirmed).await {
            warn!(user_id = user.user_id, error = %e, "UserCreated not confirmed, rolling back");
            self.repo.remove(user.user_id).await?;
            return Err(e.into());
        }

        info!(user_id = user.user_id, username = %user.username, "User registered");
        Ok(user)
    }

    pub async fn update(&self, user_id: i64, update: UserUpdate) -> Result<User, UserError> {
        if update.is_empty() {
            return self.repo.get(user_id).await.ok_or(UserError::NotFound(user_id));
        }
        let user = self.repo.update(user_id, update).await?;

        self.producer
            .emit(
                &UserUpdated {
                    user_id: user.user_id,
                    email: user.email.clone(),
                    first_name: user.first_name.clone(),
                    last_name: user.last_name.clone(),
                    status: user.status.as_str().to_string(),
                },
                PublishMode::Confirmed,
            )
            .await?;

        info!(user_id, "User updated");
        Ok(user)
    }

    /// Record a KYC review outcome and publish `KycUpdated` when it changed
    pub async fn update_kyc(&self, user_id: i64, status: KycStatus) -> Result<User, UserError> {
        let (previous, user) = self.repo.set_kyc_status(user_id, status).await?;
        if previous == status {
            return Ok(user);
        }

        self.producer
            .emit(
                &KycUpdated {
                    user_id,
                    previous_kyc_status: previous.as_str().to_string(),
                    new_kyc_status: status.as_str().to_string(),
                },
                PublishMode::Confirmed,
            )
            .await?;

        info!(user_id, kyc_status = status.as_str(), "KYC status updated");
        Ok(user)
    }

    pub async fn delete(&self, user_id: i64, reason: Option<String>) -> Result<(), UserError> {
        self.repo.remove(user_id).await?;
        self.producer
            .emit(&UserDeleted { user_id, reason }, PublishMode::Confirmed)
            .await?;

        info!(user_id, "User deleted");
        Ok(())
    }
}
