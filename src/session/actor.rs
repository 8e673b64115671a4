//! Single-writer session actor and its handle.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::db::UserProfile;
use crate::session::SessionError;
use crate::session::backend::BackendApi;
use crate::session::privileged::PrivilegedAccount;
use crate::session::provider::{IdentityProvider, ProviderUser};
use crate::session::state::Session;
use crate::types::Role;

const COMMAND_BUFFER: usize = 32;

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum Command {
    Login {
        email: String,
        password: String,
        reply: Reply<ProviderUser>,
    },
    Register {
        email: String,
        password: String,
        display_name: Option<String>,
        reply: Reply<ProviderUser>,
    },
    LoginWithExternalProvider {
        reply: Reply<ProviderUser>,
    },
    Logout {
        reply: Reply<()>,
    },
    ForgotPassword {
        email: String,
        reply: Reply<bool>,
    },
    Sync {
        privileged: bool,
        reply: oneshot::Sender<Option<UserProfile>>,
    },
    /// Answers once every queued notification and command has been applied.
    Settled {
        reply: oneshot::Sender<Session>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running session.
///
/// The actor stops on [`shutdown`](SessionHandle::shutdown) or when every
/// handle is dropped; its provider subscription goes with it.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<Session>,
}

impl SessionHandle {
    /// Subscribe to the provider and start the actor.
    pub fn spawn(
        provider: Arc<dyn IdentityProvider>,
        backend: Arc<dyn BackendApi>,
        privileged: PrivilegedAccount,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state) = watch::channel(Session::default());
        let auth_rx = provider.subscribe();

        let actor = SessionActor {
            provider,
            backend,
            privileged,
            session: Session::default(),
            state_tx,
        };
        tokio::spawn(actor.run(command_rx, auth_rx));

        Self { commands, state }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Sign in with email and password, then sync with the backend.
    pub async fn login(&self, email: &str, password: &str) -> Result<ProviderUser, SessionError> {
        self.request(|reply| Command::Login {
            email: email.to_string(),
            password: password.to_string(),
            reply,
        })
        .await?
    }

    /// Create a provider account, then sync with the backend.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<ProviderUser, SessionError> {
        self.request(|reply| Command::Register {
            email: email.to_string(),
            password: password.to_string(),
            display_name: display_name.map(str::to_string),
            reply,
        })
        .await?
    }

    pub async fn login_with_external_provider(&self) -> Result<ProviderUser, SessionError> {
        self.request(|reply| Command::LoginWithExternalProvider { reply })
            .await?
    }

    pub async fn logout(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Logout { reply }).await?
    }

    pub async fn forgot_password(&self, email: &str) -> Result<bool, SessionError> {
        self.request(|reply| Command::ForgotPassword {
            email: email.to_string(),
            reply,
        })
        .await?
    }

    /// Register with the backend and refresh the mirrored record.
    ///
    /// Never fails: any problem is logged and yields `None`.
    pub async fn sync(&self, privileged: bool) -> Option<UserProfile> {
        self.request(|reply| Command::Sync { privileged, reply })
            .await
            .ok()
            .flatten()
    }

    /// Latest published snapshot.
    pub fn session(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.clone()
    }

    /// Resolve once the first provider notification has been handled.
    pub async fn wait_until_ready(&self) -> Result<Session, SessionError> {
        let mut rx = self.state.clone();
        let session = rx
            .wait_for(|session| !session.loading)
            .await
            .map_err(|_| SessionError::Closed)?;
        Ok(session.clone())
    }

    /// Snapshot taken after all pending work has been applied.
    pub async fn settled(&self) -> Result<Session, SessionError> {
        self.request(|reply| Command::Settled { reply }).await
    }

    /// Stop the actor and drop its provider subscription.
    pub async fn shutdown(&self) {
        if self
            .request(|reply| Command::Shutdown { reply })
            .await
            .is_err()
        {
            debug!("Session already stopped");
        }
    }
}

struct SessionActor {
    provider: Arc<dyn IdentityProvider>,
    backend: Arc<dyn BackendApi>,
    privileged: PrivilegedAccount,
    session: Session,
    state_tx: watch::Sender<Session>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut auth_rx: watch::Receiver<Option<ProviderUser>>,
    ) {
        // The receiver starts at the provider's current identity; that value is
        // the first notification.
        let initial = auth_rx.borrow_and_update().clone();
        self.on_auth_state(initial).await;

        let mut auth_open = true;
        let mut shutdown_reply = None;

        loop {
            tokio::select! {
                biased;

                changed = auth_rx.changed(), if auth_open => match changed {
                    Ok(()) => {
                        let user = auth_rx.borrow_and_update().clone();
                        self.on_auth_state(user).await;
                    }
                    Err(_) => {
                        warn!("Identity provider stopped publishing auth state");
                        auth_open = false;
                    }
                },

                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }

        drop(auth_rx);
        drop(commands);
        debug!("Session actor stopped");
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Login {
                email,
                password,
                reply,
            } => {
                self.begin();
                let result = self.login(&email, &password).await;
                let _ = reply.send(self.record(result));
            }
            Command::Register {
                email,
                password,
                display_name,
                reply,
            } => {
                self.begin();
                let result = self
                    .register(&email, &password, display_name.as_deref())
                    .await;
                let _ = reply.send(self.record(result));
            }
            Command::LoginWithExternalProvider { reply } => {
                self.begin();
                let result = self.login_with_external_provider().await;
                let _ = reply.send(self.record(result));
            }
            Command::Logout { reply } => {
                self.begin();
                let result = self.logout().await;
                let _ = reply.send(self.record(result));
            }
            Command::ForgotPassword { email, reply } => {
                self.begin();
                let result = self
                    .provider
                    .send_password_reset(&email)
                    .await
                    .map(|()| true)
                    .map_err(SessionError::from);
                let _ = reply.send(self.record(result));
            }
            Command::Sync { privileged, reply } => {
                let _ = reply.send(self.sync(privileged).await);
            }
            Command::Settled { reply } => {
                let _ = reply.send(self.session.clone());
            }
            Command::Shutdown { .. } => {}
        }
    }

    async fn login(&mut self, email: &str, password: &str) -> Result<ProviderUser, SessionError> {
        if let Some((admin_email, admin_password)) = self.privileged.classify(email, password)? {
            let user = self.provider.sign_in(admin_email, admin_password).await?;
            self.accept(user.clone());
            self.sync(true).await;
            info!("Logged in as admin: {}", user.uid);
            return Ok(user);
        }

        let user = self.provider.sign_in(email, password).await?;
        self.accept(user.clone());
        self.sync(false).await;
        Ok(user)
    }

    async fn register(
        &mut self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<ProviderUser, SessionError> {
        let user = self.provider.sign_up(email, password, display_name).await?;
        self.accept(user.clone());
        self.sync(false).await;
        Ok(user)
    }

    async fn login_with_external_provider(&mut self) -> Result<ProviderUser, SessionError> {
        let user = self.provider.sign_in_with_social().await?;
        self.accept(user.clone());
        self.sync(false).await;
        Ok(user)
    }

    /// The mirror is only cleared once sign-out succeeded; a failed sign-out
    /// leaves both identities in place.
    async fn logout(&mut self) -> Result<(), SessionError> {
        self.provider.sign_out().await?;
        self.session.provider_user = None;
        self.session.mirrored = None;
        self.publish();
        Ok(())
    }

    async fn sync(&mut self, privileged: bool) -> Option<UserProfile> {
        let hint = privileged.then_some(Role::Admin);

        let result = match self.backend.register(hint).await {
            Ok(()) => self.backend.verify().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(profile) => {
                debug!("Mirrored backend record {} ({})", profile.id, profile.role);
                self.session.mirrored = Some(profile.clone());
                self.publish();
                Some(profile)
            }
            Err(e) => {
                error!("Error syncing with backend: {}", e);
                None
            }
        }
    }

    async fn on_auth_state(&mut self, user: Option<ProviderUser>) {
        match user {
            Some(user) => {
                let known = self
                    .session
                    .provider_user
                    .as_ref()
                    .is_some_and(|current| current.uid == user.uid);
                self.accept(user);
                // An operation that just signed this identity in already synced.
                if !known {
                    self.sync(false).await;
                }
            }
            None => {
                self.session.provider_user = None;
                self.session.mirrored = None;
            }
        }

        self.session.loading = false;
        self.publish();
    }

    /// Adopt a provider identity, dropping a mirror that belongs to someone else.
    fn accept(&mut self, user: ProviderUser) {
        if !self
            .session
            .mirrored
            .as_ref()
            .is_some_and(|profile| profile.external_id == user.uid)
        {
            self.session.mirrored = None;
        }
        self.session.provider_user = Some(user);
        self.publish();
    }

    fn begin(&mut self) {
        self.session.error = None;
        self.publish();
    }

    fn record<T>(&mut self, result: Result<T, SessionError>) -> Result<T, SessionError> {
        if let Err(e) = &result {
            warn!("Session operation failed: {}", e);
            self.session.error = Some(e.to_string());
            self.publish();
        }
        result
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.session.clone());
    }
}
