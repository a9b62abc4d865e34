use std::{future::Future, sync::Arc};

use gateway::UserGateway;
use shared::{
    domain::{BloodGroup, Millis, User, UserId, UserPatch},
    error::GatewayError,
};

use crate::{Observable, Operation, OperationScope};

#[derive(Default)]
struct UserState {
    user: Observable<Option<User>>,
    donors: Observable<Vec<User>>,
    reset_email_sent: Observable<bool>,
}

/// Profile, donor search and account operations for one screen.
pub struct UserController {
    gateway: Arc<dyn UserGateway>,
    state: Arc<UserState>,
    scope: OperationScope,
}

impl UserController {
    pub fn new(gateway: Arc<dyn UserGateway>) -> Self {
        Self {
            gateway,
            state: Arc::new(UserState::default()),
            scope: OperationScope::new(),
        }
    }

    pub fn loading(&self) -> &Observable<bool> {
        self.scope.loading()
    }

    pub fn error(&self) -> &Observable<Option<String>> {
        self.scope.error()
    }

    pub fn user(&self) -> &Observable<Option<User>> {
        &self.state.user
    }

    pub fn donors(&self) -> &Observable<Vec<User>> {
        &self.state.donors
    }

    pub fn reset_email_sent(&self) -> &Observable<bool> {
        &self.state.reset_email_sent
    }

    fn run<T, F, Fut>(
        &self,
        name: &'static str,
        call: F,
        apply: impl FnOnce(&UserState, T) + Send + 'static,
    ) -> Operation
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn UserGateway>) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        self.scope.launch(name, call(Arc::clone(&self.gateway)), move |value| {
            apply(&state, value)
        })
    }

    pub fn create_user(&self, user: User) -> Operation {
        self.run(
            "create_user",
            |gateway| async move {
                gateway.create(&user).await?;
                Ok::<_, GatewayError>(user)
            },
            |state, user| state.user.set(Some(user)),
        )
    }

    /// Loads one user. An absent record clears `user` without raising an error.
    pub fn get_user_by_id(&self, id: UserId) -> Operation {
        self.run(
            "get_user_by_id",
            |gateway| async move { gateway.get_by_id(&id).await },
            |state, user| state.user.set(user),
        )
    }

    pub fn update_user(&self, user: User) -> Operation {
        self.run(
            "update_user",
            |gateway| async move { gateway.update(&user).await },
            |state, user| state.user.set(Some(user)),
        )
    }

    pub fn update_profile(&self, id: UserId, patch: UserPatch) -> Operation {
        self.run(
            "update_profile",
            |gateway| async move { gateway.update_fields(&id, &patch).await },
            |state, user| state.user.set(Some(user)),
        )
    }

    /// Bumps the donation counter and stamps the last donation date.
    pub fn record_donation(&self, id: UserId, date: Millis) -> Operation {
        self.run(
            "record_donation",
            |gateway| async move {
                let current = gateway
                    .get_by_id(&id)
                    .await?
                    .ok_or_else(|| GatewayError::NotFound(format!("users/{id}")))?;
                let patch = UserPatch {
                    total_donations: Some(current.total_donations.saturating_add(1)),
                    last_donation_date: Some(date),
                    ..UserPatch::default()
                };
                gateway.update_fields(&id, &patch).await
            },
            |state, user| state.user.set(Some(user)),
        )
    }

    pub fn delete_user(&self, id: UserId) -> Operation {
        self.run(
            "delete_user",
            |gateway| async move { gateway.delete(&id).await },
            |state, ()| state.user.set(None),
        )
    }

    pub fn load_all_donors(&self) -> Operation {
        self.run(
            "load_all_donors",
            |gateway| async move { gateway.list_donors().await },
            |state, donors| state.donors.set(donors),
        )
    }

    pub fn load_donors_by_blood_group(&self, group: BloodGroup) -> Operation {
        self.run(
            "load_donors_by_blood_group",
            |gateway| async move { gateway.list_donors_by_blood_group(group).await },
            |state, donors| state.donors.set(donors),
        )
    }

    pub fn reset_password(&self, email: impl Into<String>) -> Operation {
        let email = email.into();
        self.run(
            "reset_password",
            |gateway| async move { gateway.send_password_reset(&email).await },
            |state, ()| state.reset_email_sent.set(true),
        )
    }

    pub fn reset_password_sent_state(&self) {
        self.scope.publish(|| self.state.reset_email_sent.set(false));
    }

    pub fn clear_error(&self) {
        self.scope.clear_error();
    }

    pub fn shutdown(&self) {
        self.scope.shutdown();
    }
}

#[cfg(test)]
#[path = "tests/user_controller_tests.rs"]
mod tests;
