//! Identity observer.
//!
//! The authentication component publishes the current [`Identity`] on a
//! `watch` channel. The observer turns each change into an explicit
//! transition and reconciles the cart store:
//!
//! - Sign-in or account switch: enter the switching state, fetch the server
//!   cart, leave the switching state. A failed fetch keeps the local cart.
//! - Sign-out: forget the customer but keep the cart. A guest may continue
//!   shopping with the same items; clearing is the caller's decision.

use secrecy::SecretString;
use stride_core::{Email, UserId};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::cart::{CartError, CartStore};
use crate::error::add_breadcrumb;

/// A signed-in customer.
///
/// Implements `Debug` manually to redact the access token.
#[derive(Clone)]
pub struct Customer {
    pub user_id: UserId,
    pub email: Email,
    /// Token for customer-scoped API calls.
    pub access_token: SecretString,
}

impl std::fmt::Debug for Customer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Customer")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Who is using the storefront.
#[derive(Debug, Clone, Default)]
pub enum Identity {
    #[default]
    Guest,
    Authenticated(Customer),
}

impl Identity {
    /// The signed-in customer, if any.
    #[must_use]
    pub const fn customer(&self) -> Option<&Customer> {
        match self {
            Self::Guest => None,
            Self::Authenticated(customer) => Some(customer),
        }
    }

    /// Whether a customer is signed in.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

/// A change between two identities.
#[derive(Debug, Clone)]
pub enum IdentityTransition {
    /// Guest became a customer.
    SignedIn(Customer),
    /// One customer replaced another.
    Switched { from: UserId, to: Customer },
    /// Same customer, new credentials.
    Refreshed(Customer),
    /// Customer became a guest.
    SignedOut,
    /// Still a guest.
    Unchanged,
}

impl IdentityTransition {
    /// Classify the move from `previous` to `next`.
    #[must_use]
    pub fn between(previous: &Identity, next: &Identity) -> Self {
        match (previous, next) {
            (Identity::Guest, Identity::Guest) => Self::Unchanged,
            (Identity::Guest, Identity::Authenticated(c)) => Self::SignedIn(c.clone()),
            (Identity::Authenticated(_), Identity::Guest) => Self::SignedOut,
            (Identity::Authenticated(old), Identity::Authenticated(new)) => {
                if old.user_id == new.user_id {
                    Self::Refreshed(new.clone())
                } else {
                    Self::Switched {
                        from: old.user_id,
                        to: new.clone(),
                    }
                }
            }
        }
    }

    /// Whether this transition requires reconciling with the server cart.
    #[must_use]
    pub const fn needs_reconcile(&self) -> bool {
        matches!(self, Self::SignedIn(_) | Self::Switched { .. })
    }
}

/// Reconciles the cart store with identity changes.
#[derive(Clone)]
pub struct IdentityObserver {
    cart: CartStore,
    shutdown_tx: broadcast::Sender<()>,
}

impl IdentityObserver {
    /// Create an observer for the given cart store.
    #[must_use]
    pub fn new(cart: CartStore) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { cart, shutdown_tx }
    }

    /// Apply one identity transition to the cart store.
    ///
    /// # Errors
    ///
    /// Returns the fetch error after a failed reconciliation. The switching
    /// state is cleared and the local cart is kept either way.
    #[instrument(skip(self, transition))]
    pub async fn apply(&self, transition: IdentityTransition) -> Result<(), CartError> {
        match transition {
            IdentityTransition::SignedIn(customer) | IdentityTransition::Switched { to: customer, .. } => {
                info!(user_id = %customer.user_id, "Customer signed in, reconciling cart");
                add_breadcrumb("identity", "Reconciling cart after sign-in", None);

                self.cart.set_customer(Some(customer));
                self.cart.set_switching(true);
                let result = self.cart.fetch_cart().await;
                self.cart.set_switching(false);

                if let Err(e) = &result {
                    warn!(error = %e, "Cart reconciliation failed, local cart kept");
                }
                result
            }
            IdentityTransition::Refreshed(customer) => {
                debug!(user_id = %customer.user_id, "Customer credentials refreshed");
                self.cart.set_customer(Some(customer));
                Ok(())
            }
            IdentityTransition::SignedOut => {
                info!("Customer signed out, keeping local cart");
                add_breadcrumb("identity", "Signed out", None);
                self.cart.set_customer(None);
                Ok(())
            }
            IdentityTransition::Unchanged => Ok(()),
        }
    }

    /// Start observing identity changes.
    ///
    /// The current value is treated as a transition from guest, so a session
    /// restored as signed-in reconciles on startup.
    pub fn start(&self, mut identity: watch::Receiver<Identity>) -> JoinHandle<()> {
        let observer = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut previous = Identity::Guest;
            let mut current = identity.borrow_and_update().clone();

            loop {
                let transition = IdentityTransition::between(&previous, &current);
                // Failures are already surfaced on the cart state
                let _ = observer.apply(transition).await;
                previous = current;

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Identity observer shutting down");
                        break;
                    }
                    changed = identity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        current = identity.borrow_and_update().clone();
                    }
                }
            }
        })
    }

    /// Stop the observer task.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
