//! Checkout email capture
//!
//! Email syntax is never checked here; whatever the backend refuses is
//! reported as [`CheckoutError::ValidationFailed`].

use crate::backend::{BackendError, CartId, CatalogBackend, UserId};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Email rejected by backend: {0}")]
    ValidationFailed(BackendError),
    #[error(transparent)]
    Backend(BackendError),
    #[error("No cart for user {0}")]
    NoCart(UserId),
    #[error("No account linked to cart {0}")]
    NoAccount(CartId),
}

impl CheckoutError {
    pub fn is_validation_failure(&self) -> bool {
        matches!(self, Self::ValidationFailed(_))
    }
}

pub struct EmailCapture<B> {
    backend: Arc<B>,
}

impl<B: CatalogBackend> EmailCapture<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Store the email on the account linked to `cart`
    pub async fn submit_email(&self, cart: CartId, email: &str) -> Result<(), CheckoutError> {
        let account = self
            .backend
            .find_account_by_cart(cart)
            .await
            .map_err(CheckoutError::Backend)?
            .ok_or(CheckoutError::NoAccount(cart))?;

        match self.backend.update_account_email(account.id, email).await {
            Ok(()) => {
                tracing::info!(cart = %cart, account = %account.id, "Checkout email stored");
                Ok(())
            }
            Err(e) if e.is_rejection() => Err(CheckoutError::ValidationFailed(e)),
            Err(e) => Err(CheckoutError::Backend(e)),
        }
    }

    /// Resolve the owner's cart, then submit
    pub async fn submit_email_for(&self, owner: &UserId, email: &str) -> Result<(), CheckoutError> {
        let cart = self
            .backend
            .find_cart(owner)
            .await
            .map_err(CheckoutError::Backend)?
            .ok_or_else(|| CheckoutError::NoCart(owner.clone()))?;
        self.submit_email(cart.id, email).await
    }
}
