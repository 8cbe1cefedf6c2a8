//! Catalog/order backend abstraction
//!
//! The bot never talks HTTP to the catalog directly; everything goes through
//! [`CatalogBackend`], which the Strapi client implements.

mod error;
mod strapi;
mod types;

pub use error::{BackendError, BackendErrorKind};
pub use strapi::{StrapiClient, StrapiConfig};
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Typed interface to the catalog/cart/user resource store
#[async_trait]
pub trait CatalogBackend: Send + Sync {
    /// All products, in backend order
    async fn list_products(&self) -> Result<Vec<Product>, BackendError>;

    /// One product including its picture reference
    async fn get_product(&self, id: ProductId) -> Result<Product, BackendError>;

    /// Download picture bytes
    async fn fetch_picture(&self, picture: &PictureRef) -> Result<Vec<u8>, BackendError>;

    /// The owner's cart with its line items, if one exists
    async fn find_cart(&self, owner: &UserId) -> Result<Option<Cart>, BackendError>;

    /// Create an empty cart. The response is not a full cart; read it back.
    async fn create_cart(&self, owner: &UserId) -> Result<(), BackendError>;

    async fn add_line_item(
        &self,
        cart: CartId,
        product: ProductId,
        amount: u32,
    ) -> Result<(), BackendError>;

    /// Line items of `cart` for `product`, in backend order
    async fn find_line_items(
        &self,
        cart: CartId,
        product: ProductId,
    ) -> Result<Vec<LineItem>, BackendError>;

    async fn delete_line_item(&self, id: LineItemId) -> Result<(), BackendError>;

    /// Backend user linked to the cart
    async fn find_account_by_cart(&self, cart: CartId) -> Result<Option<Account>, BackendError>;

    /// Store a checkout email. Validation is entirely the backend's call.
    async fn update_account_email(&self, account: AccountId, email: &str)
        -> Result<(), BackendError>;
}

// ============================================================================
// Arc implementation for shared backends
// ============================================================================

#[async_trait]
impl<T: CatalogBackend + ?Sized> CatalogBackend for Arc<T> {
    async fn list_products(&self) -> Result<Vec<Product>, BackendError> {
        (**self).list_products().await
    }

    async fn get_product(&self, id: ProductId) -> Result<Product, BackendError> {
        (**self).get_product(id).await
    }

    async fn fetch_picture(&self, picture: &PictureRef) -> Result<Vec<u8>, BackendError> {
        (**self).fetch_picture(picture).await
    }

    async fn find_cart(&self, owner: &UserId) -> Result<Option<Cart>, BackendError> {
        (**self).find_cart(owner).await
    }

    async fn create_cart(&self, owner: &UserId) -> Result<(), BackendError> {
        (**self).create_cart(owner).await
    }

    async fn add_line_item(
        &self,
        cart: CartId,
        product: ProductId,
        amount: u32,
    ) -> Result<(), BackendError> {
        (**self).add_line_item(cart, product, amount).await
    }

    async fn find_line_items(
        &self,
        cart: CartId,
        product: ProductId,
    ) -> Result<Vec<LineItem>, BackendError> {
        (**self).find_line_items(cart, product).await
    }

    async fn delete_line_item(&self, id: LineItemId) -> Result<(), BackendError> {
        (**self).delete_line_item(id).await
    }

    async fn find_account_by_cart(&self, cart: CartId) -> Result<Option<Account>, BackendError> {
        (**self).find_account_by_cart(cart).await
    }

    async fn update_account_email(
        &self,
        account: AccountId,
        email: &str,
    ) -> Result<(), BackendError> {
        (**self).update_account_email(account, email).await
    }
}

// ============================================================================
// Logging wrapper
// ============================================================================

/// Logging wrapper for backends
pub struct LoggingBackend<B> {
    inner: B,
}

impl<B: CatalogBackend> LoggingBackend<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    fn record<T>(call: &'static str, start: Instant, result: &Result<T, BackendError>) {
        let duration = start.elapsed();
        match result {
            Ok(_) => {
                tracing::debug!(
                    call,
                    duration_ms = %duration.as_millis(),
                    "Backend call completed"
                );
            }
            Err(e) => {
                tracing::warn!(
                    call,
                    duration_ms = %duration.as_millis(),
                    kind = ?e.kind,
                    status = ?e.status,
                    error = %e.message,
                    "Backend call failed"
                );
            }
        }
    }
}

#[async_trait]
impl<B: CatalogBackend> CatalogBackend for LoggingBackend<B> {
    async fn list_products(&self) -> Result<Vec<Product>, BackendError> {
        let start = Instant::now();
        let result = self.inner.list_products().await;
        Self::record("list_products", start, &result);
        result
    }

    async fn get_product(&self, id: ProductId) -> Result<Product, BackendError> {
        let start = Instant::now();
        let result = self.inner.get_product(id).await;
        Self::record("get_product", start, &result);
        result
    }

    async fn fetch_picture(&self, picture: &PictureRef) -> Result<Vec<u8>, BackendError> {
        let start = Instant::now();
        let result = self.inner.fetch_picture(picture).await;
        Self::record("fetch_picture", start, &result);
        result
    }

    async fn find_cart(&self, owner: &UserId) -> Result<Option<Cart>, BackendError> {
        let start = Instant::now();
        let result = self.inner.find_cart(owner).await;
        Self::record("find_cart", start, &result);
        result
    }

    async fn create_cart(&self, owner: &UserId) -> Result<(), BackendError> {
        let start = Instant::now();
        let result = self.inner.create_cart(owner).await;
        Self::record("create_cart", start, &result);
        result
    }

    async fn add_line_item(
        &self,
        cart: CartId,
        product: ProductId,
        amount: u32,
    ) -> Result<(), BackendError> {
        let start = Instant::now();
        let result = self.inner.add_line_item(cart, product, amount).await;
        Self::record("add_line_item", start, &result);
        result
    }

    async fn find_line_items(
        &self,
        cart: CartId,
        product: ProductId,
    ) -> Result<Vec<LineItem>, BackendError> {
        let start = Instant::now();
        let result = self.inner.find_line_items(cart, product).await;
        Self::record("find_line_items", start, &result);
        result
    }

    async fn delete_line_item(&self, id: LineItemId) -> Result<(), BackendError> {
        let start = Instant::now();
        let result = self.inner.delete_line_item(id).await;
        Self::record("delete_line_item", start, &result);
        result
    }

    async fn find_account_by_cart(&self, cart: CartId) -> Result<Option<Account>, BackendError> {
        let start = Instant::now();
        let result = self.inner.find_account_by_cart(cart).await;
        Self::record("find_account_by_cart", start, &result);
        result
    }

    async fn update_account_email(
        &self,
        account: AccountId,
        email: &str,
    ) -> Result<(), BackendError> {
        let start = Instant::now();
        let result = self.inner.update_account_email(account, email).await;
        Self::record("update_account_email", start, &result);
        result
    }
}
