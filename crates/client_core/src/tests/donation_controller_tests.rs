use async_trait::async_trait;
use gateway::StoreDonationGateway;
use serde_json::json;
use shared::domain::BloodGroup;
use storage::{MemoryStore, RecordPath, RemoteStore, USERS};
use tokio::sync::Semaphore;

use super::*;
use crate::OperationOutcome;

fn donation(id: &str, owner: &str, location: &str) -> Donation {
    Donation {
        id: DonationId::from(id),
        user_id: UserId::from(owner),
        date: 1_700_000_000_000,
        location: location.into(),
        blood_group: BloodGroup::OPositive,
    }
}

/// Store with user records `u1` and `u2`.
async fn owners() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for uid in ["u1", "u2"] {
        store
            .write(&RecordPath::new(USERS, uid), json!({"uid": uid}))
            .await
            .expect("seed owner");
    }
    store
}

async fn controller() -> (Arc<MemoryStore>, DonationController) {
    let store = owners().await;
    let gateway = Arc::new(StoreDonationGateway::new(store.clone()));
    (store, DonationController::new(gateway))
}

/// Delegates to a store-backed gateway once a permit is released.
struct GatedDonations {
    inner: StoreDonationGateway,
    gate: Semaphore,
}

impl GatedDonations {
    async fn pass(&self) {
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
    }
}

#[async_trait]
impl DonationGateway for GatedDonations {
    async fn create(&self, donation: &Donation) -> Result<(), GatewayError> {
        self.pass().await;
        self.inner.create(donation).await
    }

    async fn get_by_id(&self, id: &DonationId) -> Result<Option<Donation>, GatewayError> {
        self.pass().await;
        self.inner.get_by_id(id).await
    }

    async fn update(&self, donation: &Donation) -> Result<(), GatewayError> {
        self.pass().await;
        self.inner.update(donation).await
    }

    async fn delete(&self, id: &DonationId) -> Result<(), GatewayError> {
        self.pass().await;
        self.inner.delete(id).await
    }

    async fn list_by_user_id(&self, user_id: &UserId) -> Result<Vec<Donation>, GatewayError> {
        self.pass().await;
        self.inner.list_by_user_id(user_id).await
    }
}

#[tokio::test]
async fn add_donation_sets_transient_flag() {
    let (_, controller) = controller().await;
    controller
        .add_donation(donation("d1", "u1", "Clinic A"))
        .wait()
        .await;
    assert!(controller.donation_added().get());
    assert!(controller.donations().get().is_empty());

    controller.reset_donation_added_state();
    assert!(!controller.donation_added().get());
}

#[tokio::test]
async fn add_donation_for_unknown_user_reports_not_found() {
    let (_, controller) = controller().await;
    controller
        .add_donation(donation("d9", "no-such-user", "Clinic A"))
        .wait()
        .await;
    assert!(!controller.donation_added().get());
    assert_eq!(
        controller.error().get().as_deref(),
        Some("no record at users/no-such-user")
    );

    controller.clear_error();
    controller
        .get_donations_by_user_id(UserId::from("no-such-user"))
        .wait()
        .await;
    assert!(controller.donations().get().is_empty());
}

#[tokio::test]
async fn donations_of_another_user_cannot_be_changed() {
    let (store, controller) = controller().await;
    controller
        .add_donation(donation("d1", "u1", "Clinic A"))
        .wait()
        .await;

    controller
        .delete_donation(DonationId::from("d1"), UserId::from("u2"))
        .wait()
        .await;
    assert_eq!(
        controller.error().get().as_deref(),
        Some("donations/d1 does not belong to u2")
    );
    assert!(store
        .read(&RecordPath::new("donations", "d1"))
        .await
        .expect("read")
        .is_some());

    controller.clear_error();
    controller
        .update_donation(donation("d1", "u2", "Elsewhere"), UserId::from("u2"))
        .wait()
        .await;
    assert!(controller.error().get().is_some());

    controller.clear_error();
    controller
        .update_donation(donation("d1", "u1", "Elsewhere"), UserId::from("u2"))
        .wait()
        .await;
    assert!(controller.error().get().is_some());
    assert!(controller.donations().get().is_empty());

    controller
        .get_donations_by_user_id(UserId::from("u1"))
        .wait()
        .await;
    assert_eq!(controller.donations().get()[0].location, "Clinic A");
}

#[tokio::test]
async fn delete_and_update_re_read_owner_list() {
    let (_, controller) = controller().await;
    for record in [
        donation("d1", "u1", "Clinic A"),
        donation("d2", "u1", "Clinic B"),
        donation("d3", "u2", "Clinic C"),
    ] {
        controller.add_donation(record).wait().await;
    }

    controller
        .get_donations_by_user_id(UserId::from("u1"))
        .wait()
        .await;
    assert_eq!(controller.donations().get().len(), 2);

    controller
        .update_donation(donation("d2", "u1", "Red Cross Camp"), UserId::from("u1"))
        .wait()
        .await;
    let locations: Vec<String> = controller
        .donations()
        .get()
        .into_iter()
        .map(|d| d.location)
        .collect();
    assert_eq!(locations, vec!["Clinic A", "Red Cross Camp"]);

    controller
        .delete_donation(DonationId::from("d1"), UserId::from("u1"))
        .wait()
        .await;
    let remaining = controller.donations().get();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id.as_str(), "d2");
    assert_eq!(controller.error().get(), None);
}

#[tokio::test]
async fn failed_delete_keeps_list_and_reports_error() {
    let (store, controller) = controller().await;
    controller
        .add_donation(donation("d1", "u1", "Clinic A"))
        .wait()
        .await;
    controller
        .get_donations_by_user_id(UserId::from("u1"))
        .wait()
        .await;
    let before = controller.donations().get();

    store.set_fail_writes(true);
    controller
        .delete_donation(DonationId::from("d1"), UserId::from("u1"))
        .wait()
        .await;

    assert_eq!(controller.donations().get(), before);
    let message = controller.error().get().expect("error recorded");
    assert!(message.starts_with("remote write failed"), "{message}");
    assert!(!controller.loading().get());
}

#[tokio::test]
async fn loading_is_true_only_while_the_call_is_pending() {
    let store = owners().await;
    let gated = Arc::new(GatedDonations {
        inner: StoreDonationGateway::new(store),
        gate: Semaphore::new(0),
    });
    let controller = DonationController::new(gated.clone());
    let mut loading = controller.loading().subscribe();
    assert!(!*loading.borrow_and_update());

    let op = controller.get_donations_by_user_id(UserId::from("u1"));
    assert!(controller.loading().get());
    assert!(!op.is_finished());

    gated.gate.add_permits(1);
    assert_eq!(op.wait().await, OperationOutcome::Completed);
    assert!(!controller.loading().get());
    assert!(loading.has_changed().expect("sender alive"));
}

#[tokio::test]
async fn shutdown_drops_pending_results() {
    let store = owners().await;
    let gated = Arc::new(GatedDonations {
        inner: StoreDonationGateway::new(store),
        gate: Semaphore::new(0),
    });
    let controller = DonationController::new(gated.clone());

    let op = controller.add_donation(donation("d1", "u1", "Clinic A"));
    controller.shutdown();
    gated.gate.add_permits(1);

    assert_eq!(op.wait().await, OperationOutcome::Cancelled);
    assert!(!controller.donation_added().get());
}
