use std::{future::Future, sync::Arc};

use gateway::DonationGateway;
use shared::{
    domain::{Donation, DonationId, UserId},
    error::GatewayError,
};

use crate::{Observable, Operation, OperationScope};

#[derive(Default)]
struct DonationState {
    donations: Observable<Vec<Donation>>,
    donation_added: Observable<bool>,
}

/// Donation history operations for one user-facing screen. Mutations that
/// touch the held list re-read it for the owning user.
pub struct DonationController {
    gateway: Arc<dyn DonationGateway>,
    state: Arc<DonationState>,
    scope: OperationScope,
}

impl DonationController {
    pub fn new(gateway: Arc<dyn DonationGateway>) -> Self {
        Self {
            gateway,
            state: Arc::new(DonationState::default()),
            scope: OperationScope::new(),
        }
    }

    pub fn loading(&self) -> &Observable<bool> {
        self.scope.loading()
    }

    pub fn error(&self) -> &Observable<Option<String>> {
        self.scope.error()
    }

    pub fn donations(&self) -> &Observable<Vec<Donation>> {
        &self.state.donations
    }

    pub fn donation_added(&self) -> &Observable<bool> {
        &self.state.donation_added
    }

    fn run<T, F, Fut>(
        &self,
        name: &'static str,
        call: F,
        apply: impl FnOnce(&DonationState, T) + Send + 'static,
    ) -> Operation
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn DonationGateway>) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        self.scope.launch(name, call(Arc::clone(&self.gateway)), move |value| {
            apply(&state, value)
        })
    }

    pub fn add_donation(&self, donation: Donation) -> Operation {
        self.run(
            "add_donation",
            |gateway| async move { gateway.create(&donation).await },
            |state, ()| state.donation_added.set(true),
        )
    }

    pub fn reset_donation_added_state(&self) {
        self.scope.publish(|| self.state.donation_added.set(false));
    }

    pub fn get_donations_by_user_id(&self, user_id: UserId) -> Operation {
        self.run(
            "get_donations_by_user_id",
            |gateway| async move { gateway.list_by_user_id(&user_id).await },
            |state, donations| state.donations.set(donations),
        )
    }

    /// Deletes a donation held by `owner`. A record owned by someone else is
    /// left alone and reported as [`GatewayError::NotOwner`].
    pub fn delete_donation(&self, id: DonationId, owner: UserId) -> Operation {
        self.run(
            "delete_donation",
            |gateway| async move {
                ensure_owned(gateway.as_ref(), &id, &owner).await?;
                gateway.delete(&id).await?;
                gateway.list_by_user_id(&owner).await
            },
            |state, donations| state.donations.set(donations),
        )
    }

    pub fn update_donation(&self, donation: Donation, owner: UserId) -> Operation {
        self.run(
            "update_donation",
            |gateway| async move {
                if donation.user_id != owner {
                    return Err(not_owner(&donation.id, &owner));
                }
                ensure_owned(gateway.as_ref(), &donation.id, &owner).await?;
                gateway.update(&donation).await?;
                gateway.list_by_user_id(&owner).await
            },
            |state, donations| state.donations.set(donations),
        )
    }

    pub fn clear_error(&self) {
        self.scope.clear_error();
    }

    pub fn shutdown(&self) {
        self.scope.shutdown();
    }
}

fn not_owner(id: &DonationId, owner: &UserId) -> GatewayError {
    GatewayError::NotOwner {
        path: format!("donations/{id}"),
        owner: owner.clone(),
    }
}

/// Passes when the stored donation is absent or belongs to `owner`.
async fn ensure_owned(
    gateway: &dyn DonationGateway,
    id: &DonationId,
    owner: &UserId,
) -> Result<(), GatewayError> {
    match gateway.get_by_id(id).await? {
        Some(stored) if &stored.user_id != owner => Err(not_owner(id, owner)),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[path = "tests/donation_controller_tests.rs"]
mod tests;
