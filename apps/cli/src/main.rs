use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use auth::{AuthProvider, IdentityToolkitAuth, LocalAuthProvider};
use clap::{Args, Parser, Subcommand};
use client_core::{
    DonationController, Observable, Operation, OperationOutcome, Registration, SessionController,
    UserController,
};
use gateway::{StoreDonationGateway, StoreUserGateway};
use serde::Serialize;
use shared::domain::{now_millis, BloodGroup, Donation, DonationId, Millis, UserId, UserPatch};
use storage::{RemoteStore, RtdbStore, SqliteStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, BackendKind, Settings};

#[derive(Parser, Debug)]
#[command(name = "bloodbank", about = "Blood donation records from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Credentials {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account and its donor profile.
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        blood_group: BloodGroup,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        password: String,
        #[arg(long)]
        confirm_password: String,
    },
    Profile {
        #[command(flatten)]
        credentials: Credentials,
    },
    /// Change selected profile fields; omitted flags keep their values.
    EditProfile {
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        date_of_birth: Option<String>,
        #[arg(long)]
        age: Option<u32>,
        #[arg(long)]
        donor: Option<bool>,
        #[arg(long)]
        profile_image_url: Option<String>,
    },
    /// List donors, optionally limited to one blood group.
    Donors {
        #[arg(long)]
        blood_group: Option<BloodGroup>,
    },
    /// Record a donation for the signed-in donor.
    Donate {
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        location: String,
        /// Milliseconds since the epoch; defaults to now.
        #[arg(long)]
        date: Option<Millis>,
    },
    Donations {
        #[command(flatten)]
        credentials: Credentials,
    },
    DeleteDonation {
        #[command(flatten)]
        credentials: Credentials,
        #[arg(long)]
        id: String,
    },
    DeleteAccount {
        #[command(flatten)]
        credentials: Credentials,
    },
    ResetPassword {
        #[arg(long)]
        email: String,
    },
}

struct Backend {
    store: Arc<dyn RemoteStore>,
    auth: Arc<dyn AuthProvider>,
    settings: Settings,
}

impl Backend {
    async fn connect(settings: Settings) -> Result<Self> {
        let (store, auth): (Arc<dyn RemoteStore>, Arc<dyn AuthProvider>) = match settings.backend
        {
            BackendKind::Local => {
                let store = SqliteStore::connect(&settings.database_url)
                    .await
                    .with_context(|| {
                        format!("failed to open database '{}'", settings.database_url)
                    })?;
                let auth = LocalAuthProvider::new(store.pool().clone())
                    .await
                    .context("failed to prepare local accounts")?;
                (Arc::new(store), Arc::new(auth))
            }
            BackendKind::Firebase => {
                let (rtdb_url, api_key) = settings.firebase_endpoints()?;
                let mut store = RtdbStore::new(rtdb_url)?;
                if let Some(token) = &settings.rtdb_auth {
                    store = store.with_auth_token(token.clone());
                }
                let auth = match &settings.identity_url {
                    Some(base) => IdentityToolkitAuth::with_base_url(base, api_key)?,
                    None => IdentityToolkitAuth::new(api_key)?,
                };
                (Arc::new(store), Arc::new(auth))
            }
        };
        info!(backend = %settings.backend, strategy = %settings.query_strategy, "backend ready");
        Ok(Self {
            store,
            auth,
            settings,
        })
    }

    fn user_gateway(&self) -> Arc<StoreUserGateway> {
        Arc::new(StoreUserGateway::with_strategy(
            self.store.clone(),
            self.auth.clone(),
            self.settings.query_strategy,
        ))
    }

    fn users(&self) -> UserController {
        UserController::new(self.user_gateway())
    }

    fn donations(&self) -> DonationController {
        DonationController::new(Arc::new(StoreDonationGateway::with_strategy(
            self.store.clone(),
            self.settings.query_strategy,
        )))
    }

    fn session(&self) -> SessionController {
        SessionController::new(self.auth.clone(), self.user_gateway())
    }

    async fn sign_in(&self, credentials: Credentials) -> Result<UserId> {
        let session = self.session();
        settle(
            session.sign_in(credentials.email, credentials.password),
            session.error(),
        )
        .await?;
        session
            .principal()
            .get()
            .ok_or_else(|| anyhow!("sign-in did not produce a user"))
    }
}

/// Waits for an operation and turns a recorded failure back into an error.
async fn settle(operation: Operation, error: &Observable<Option<String>>) -> Result<()> {
    let name = operation.name();
    if operation.wait().await == OperationOutcome::Cancelled {
        bail!("{name} was cancelled");
    }
    match error.get() {
        Some(message) => Err(anyhow!(message)),
        None => Ok(()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let backend = Backend::connect(load_settings()?).await?;
    run(&backend, cli.command).await
}

async fn run(backend: &Backend, command: Command) -> Result<()> {
    match command {
        Command::Register {
            name,
            email,
            phone,
            blood_group,
            location,
            password,
            confirm_password,
        } => {
            let session = backend.session();
            let registration = Registration {
                full_name: name,
                email,
                phone,
                blood_group,
                location,
                password,
                confirm_password,
            };
            settle(session.register(registration), session.error()).await?;
            let users = backend.users();
            if let Some(uid) = session.principal().get() {
                settle(users.get_user_by_id(uid), users.error()).await?;
            }
            print_json(&users.user().get())
        }
        Command::Profile { credentials } => {
            let uid = backend.sign_in(credentials).await?;
            let users = backend.users();
            settle(users.get_user_by_id(uid), users.error()).await?;
            print_json(&users.user().get())
        }
        Command::EditProfile {
            credentials,
            full_name,
            phone,
            location,
            date_of_birth,
            age,
            donor,
            profile_image_url,
        } => {
            let patch = UserPatch {
                full_name,
                phone,
                location,
                date_of_birth,
                age,
                is_donor: donor,
                profile_image_url,
                ..UserPatch::default()
            };
            if patch.is_empty() {
                bail!("nothing to change; pass at least one profile flag");
            }
            let uid = backend.sign_in(credentials).await?;
            let users = backend.users();
            settle(users.update_profile(uid, patch), users.error()).await?;
            print_json(&users.user().get())
        }
        Command::Donors { blood_group } => {
            let users = backend.users();
            let operation = match blood_group {
                Some(group) => users.load_donors_by_blood_group(group),
                None => users.load_all_donors(),
            };
            settle(operation, users.error()).await?;
            print_json(&users.donors().get())
        }
        Command::Donate {
            credentials,
            location,
            date,
        } => {
            let uid = backend.sign_in(credentials).await?;
            let users = backend.users();
            settle(users.get_user_by_id(uid.clone()), users.error()).await?;
            let donor = users
                .user()
                .get()
                .ok_or_else(|| anyhow!("no profile for {uid}"))?;

            let date = date.unwrap_or_else(now_millis);
            let donation = Donation::for_user(&donor, location, date);
            let donations = backend.donations();
            settle(donations.add_donation(donation.clone()), donations.error()).await?;
            settle(users.record_donation(uid, date), users.error()).await?;
            print_json(&serde_json::json!({
                "donation": donation,
                "user": users.user().get(),
            }))
        }
        Command::Donations { credentials } => {
            let uid = backend.sign_in(credentials).await?;
            let donations = backend.donations();
            settle(donations.get_donations_by_user_id(uid), donations.error()).await?;
            print_json(&donations.donations().get())
        }
        Command::DeleteDonation { credentials, id } => {
            let uid = backend.sign_in(credentials).await?;
            let donations = backend.donations();
            settle(
                donations.delete_donation(DonationId::from(id), uid),
                donations.error(),
            )
            .await?;
            print_json(&donations.donations().get())
        }
        Command::DeleteAccount { credentials } => {
            let uid = backend.sign_in(credentials).await?;
            let users = backend.users();
            settle(users.delete_user(uid.clone()), users.error()).await?;
            print_json(&serde_json::json!({ "deleted": uid }))
        }
        Command::ResetPassword { email } => {
            let users = backend.users();
            settle(users.reset_password(email), users.error()).await?;
            print_json(&serde_json::json!({ "resetEmailSent": users.reset_email_sent().get() }))
        }
    }
}
