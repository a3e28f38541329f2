use std::sync::Arc;
use std::time::Duration;

use context_engine::{ChallengeSolver, ContextEngine, ContextHandle, EngineError};
use formpilot_core_types::SessionError;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::portal::PortalConfig;

const MARKER_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Runs one full portal login round trip on an existing context: navigate to
/// the login form, solve the interactive challenge, submit credentials and
/// verify the authenticated marker appears.
pub struct PortalAuthenticator {
    engine: Arc<dyn ContextEngine>,
    solver: Arc<dyn ChallengeSolver>,
    portal: PortalConfig,
    nav_timeout: Duration,
    login_timeout: Duration,
}

impl PortalAuthenticator {
    pub fn new(
        engine: Arc<dyn ContextEngine>,
        solver: Arc<dyn ChallengeSolver>,
        portal: PortalConfig,
        nav_timeout: Duration,
        login_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            solver,
            portal,
            nav_timeout,
            login_timeout,
        }
    }

    /// Authenticate the context in place. Transport failures surface as
    /// `ProbeUnreachable` so the caller can replace the context instead of
    /// retrying a login against a dead one.
    pub async fn login(&self, ctx: &ContextHandle) -> Result<(), SessionError> {
        match timeout(self.login_timeout, self.login_inner(ctx)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::AuthenticationFailed {
                reason: format!("login timed out after {:?}", self.login_timeout),
            }),
        }
    }

    async fn login_inner(&self, ctx: &ContextHandle) -> Result<(), SessionError> {
        self.engine
            .navigate(ctx, &self.portal.login_url, self.nav_timeout)
            .await
            .map_err(map_engine_error)?;

        let image = self
            .engine
            .capture_image(ctx, &self.portal.challenge_image)
            .await
            .map_err(map_engine_error)?;
        let solution = self
            .solver
            .solve(&image)
            .await
            .map_err(|err| SessionError::AuthenticationFailed {
                reason: format!("challenge solving failed: {err}"),
            })?;
        debug!(target: "auth", id = %ctx.id, "challenge solved, submitting credentials");

        let creds = &self.portal.credentials;
        self.engine
            .fill_field(ctx, &self.portal.username_field, &creds.username)
            .await
            .map_err(map_engine_error)?;
        self.engine
            .fill_field(ctx, &self.portal.password_field, &creds.password)
            .await
            .map_err(map_engine_error)?;
        self.engine
            .fill_field(ctx, &self.portal.challenge_field, &solution)
            .await
            .map_err(map_engine_error)?;
        self.engine
            .click(ctx, &self.portal.submit_button)
            .await
            .map_err(map_engine_error)?;

        self.await_authenticated(ctx).await
    }

    /// The submit triggers a navigation we cannot await directly; poll for
    /// the authenticated marker until the login budget runs out.
    async fn await_authenticated(&self, ctx: &ContextHandle) -> Result<(), SessionError> {
        let deadline = Instant::now() + self.nav_timeout;
        loop {
            match self
                .engine
                .has_marker(ctx, &self.portal.authenticated_marker, self.nav_timeout)
                .await
            {
                Ok(true) => {
                    info!(target: "auth", id = %ctx.id, "portal login verified");
                    return Ok(());
                }
                Ok(false) => {}
                Err(err) => return Err(map_engine_error(err)),
            }
            if Instant::now() >= deadline {
                warn!(target: "auth", id = %ctx.id, "authenticated marker never appeared");
                return Err(SessionError::AuthenticationFailed {
                    reason: "portal rejected credentials or challenge".into(),
                });
            }
            sleep(MARKER_POLL_INTERVAL).await;
        }
    }
}

fn map_engine_error(err: EngineError) -> SessionError {
    if err.is_transport() {
        SessionError::ProbeUnreachable {
            reason: err.to_string(),
        }
    } else {
        SessionError::AuthenticationFailed {
            reason: err.to_string(),
        }
    }
}
