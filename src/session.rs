//! Session store fed by the auth service

use crate::backend::{AuthEvent, AuthService, AuthSubscription, Session};
use crate::error::{LinkSwipeError, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Session plus the initial loading flag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub session: Option<Session>,
    pub is_loading: bool,
}

/// Current session shared with the rest of the app
///
/// Auth state changes are applied as they arrive. Dropping the store
/// unsubscribes from the auth service.
pub struct SessionStore {
    state: Arc<watch::Sender<SessionState>>,
    _subscription: AuthSubscription,
}

impl SessionStore {
    /// Subscribe to `auth` and load the initial session
    ///
    /// The listener is registered before the initial lookup so no change is
    /// missed; an event that arrives first wins over the lookup result.
    pub async fn connect(auth: Arc<dyn AuthService>) -> Result<Self> {
        let (tx, _) = watch::channel(SessionState {
            session: None,
            is_loading: true,
        });
        let state = Arc::new(tx);

        let listener = state.clone();
        let subscription = auth.on_auth_state_change(Box::new(move |event, session| {
            debug!("Auth state change: {:?}", event);
            let session = match event {
                AuthEvent::SignedOut => None,
                _ => session,
            };
            listener.send_replace(SessionState {
                session,
                is_loading: false,
            });
        }));

        let initial = match auth.get_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!("Failed to load initial session: {}", e);
                state.send_modify(|s| s.is_loading = false);
                return Err(e);
            }
        };

        state.send_if_modified(|current| {
            if !current.is_loading {
                return false;
            }
            current.session = initial;
            current.is_loading = false;
            true
        });

        if let Some(user_id) = state.borrow().session.as_ref().map(|s| s.user_id.clone()) {
            info!("Session loaded for {}", user_id);
        }

        Ok(Self {
            state,
            _subscription: subscription,
        })
    }

    pub fn current(&self) -> Option<Session> {
        self.state.borrow().session.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn user_id(&self) -> Option<String> {
        self.state.borrow().session.as_ref().map(|s| s.user_id.clone())
    }

    /// User id of the signed-in user, `NoSession` otherwise
    pub fn require_user(&self) -> Result<String> {
        self.user_id().ok_or(LinkSwipeError::NoSession)
    }

    /// Receiver notified on every session change
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Wait until the initial session has been resolved
    pub async fn wait_until_loaded(&self) -> SessionState {
        let mut rx = self.watch();
        let state = match rx.wait_for(|s| !s.is_loading).await {
            Ok(state) => state.clone(),
            Err(_) => self.state.borrow().clone(),
        };
        state
    }
}
