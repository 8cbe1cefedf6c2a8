//! Cart aggregation
//!
//! Owns the one-cart-per-owner invariant. The backend has no uniqueness
//! constraint on carts, so get-or-create runs under a per-owner lock.

use crate::backend::{BackendError, Cart, CartId, CatalogBackend, Money, ProductId, UserId};
use crate::locks::KeyedLocks;
use std::sync::Arc;
use thiserror::Error;

/// Quantities a user may pick for a line item, in display order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedQuantities(Vec<u32>);

impl AllowedQuantities {
    /// Returns `None` if the set is empty or contains zero
    pub fn new(quantities: Vec<u32>) -> Option<Self> {
        if quantities.is_empty() || quantities.contains(&0) {
            return None;
        }
        Some(Self(quantities))
    }

    pub fn contains(&self, amount: u32) -> bool {
        self.0.contains(&amount)
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }
}

impl Default for AllowedQuantities {
    /// Weight units offered on the product card
    fn default() -> Self {
        Self(vec![5, 10, 15])
    }
}

#[derive(Debug, Error)]
pub enum CartError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Quantity {0} is not one of the allowed quantities")]
    QuantityNotAllowed(u32),
    #[error("Cart for {0} still missing after creation")]
    CreatedCartMissing(UserId),
}

/// One rendered cart line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryLine {
    pub product_id: ProductId,
    pub title: String,
    pub description: String,
    pub unit_price: Money,
    pub amount: u32,
    pub line_total: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CartSummary {
    pub lines: Vec<SummaryLine>,
    pub total: Money,
}

/// Render a cart from the product data it was fetched with. Pure.
pub fn render_summary(cart: &Cart) -> CartSummary {
    let lines: Vec<SummaryLine> = cart
        .line_items
        .iter()
        .map(|line| SummaryLine {
            product_id: line.product.id,
            title: line.product.title.clone(),
            description: line.product.description.clone(),
            unit_price: line.product.price,
            amount: line.amount,
            line_total: line.product.price.times(line.amount),
        })
        .collect();
    let total = lines.iter().map(|l| l.line_total).sum();
    CartSummary { lines, total }
}

pub struct CartAggregator<B> {
    backend: Arc<B>,
    quantities: AllowedQuantities,
    owner_locks: KeyedLocks<UserId>,
}

impl<B: CatalogBackend> CartAggregator<B> {
    pub fn new(backend: Arc<B>, quantities: AllowedQuantities) -> Self {
        Self {
            backend,
            quantities,
            owner_locks: KeyedLocks::new(),
        }
    }

    pub fn quantities(&self) -> &AllowedQuantities {
        &self.quantities
    }

    /// Fetch the owner's cart, creating it on first use
    pub async fn get_or_create_cart(&self, owner: &UserId) -> Result<Cart, CartError> {
        let _guard = self.owner_locks.lock(owner).await;
        self.get_or_create_locked(owner).await
    }

    async fn get_or_create_locked(&self, owner: &UserId) -> Result<Cart, CartError> {
        if let Some(cart) = self.backend.find_cart(owner).await? {
            return Ok(cart);
        }
        tracing::info!(owner = %owner, "Creating cart");
        self.backend.create_cart(owner).await?;
        // Creation does not echo the cart back
        self.backend
            .find_cart(owner)
            .await?
            .ok_or_else(|| CartError::CreatedCartMissing(owner.clone()))
    }

    pub async fn add_line_item(
        &self,
        cart: CartId,
        product: ProductId,
        amount: u32,
    ) -> Result<(), CartError> {
        if !self.quantities.contains(amount) {
            return Err(CartError::QuantityNotAllowed(amount));
        }
        self.backend.add_line_item(cart, product, amount).await?;
        Ok(())
    }

    /// Get-or-create plus add, as one critical section per owner
    pub async fn add_to_cart(
        &self,
        owner: &UserId,
        product: ProductId,
        amount: u32,
    ) -> Result<CartId, CartError> {
        if !self.quantities.contains(amount) {
            return Err(CartError::QuantityNotAllowed(amount));
        }
        let _guard = self.owner_locks.lock(owner).await;
        let cart = self.get_or_create_locked(owner).await?;
        self.add_line_item(cart.id, product, amount).await?;
        tracing::info!(owner = %owner, cart = %cart.id, product = %product, amount, "Added line item");
        Ok(cart.id)
    }

    /// Remove the first line item for `product`. Returns whether one existed.
    ///
    /// Duplicate lines for the same product are left in place.
    pub async fn remove_line_item(
        &self,
        cart: CartId,
        product: ProductId,
    ) -> Result<bool, CartError> {
        let items = self.backend.find_line_items(cart, product).await?;
        let Some(first) = items.first() else {
            tracing::info!(cart = %cart, product = %product, "No line item to remove");
            return Ok(false);
        };
        self.backend.delete_line_item(first.id).await?;
        Ok(true)
    }

    /// Remove from the owner's cart; an owner without a cart has nothing to remove
    pub async fn remove_from_cart(
        &self,
        owner: &UserId,
        product: ProductId,
    ) -> Result<bool, CartError> {
        let _guard = self.owner_locks.lock(owner).await;
        match self.backend.find_cart(owner).await? {
            Some(cart) => self.remove_line_item(cart.id, product).await,
            None => Ok(false),
        }
    }

    /// The owner's cart, if any, without creating one
    #[allow(dead_code)] // Used in tests
    pub async fn find_cart(&self, owner: &UserId) -> Result<Option<Cart>, CartError> {
        Ok(self.backend.find_cart(owner).await?)
    }

    /// Summary of the owner's cart; empty when no cart exists yet
    pub async fn summary_for(&self, owner: &UserId) -> Result<CartSummary, CartError> {
        Ok(self
            .backend
            .find_cart(owner)
            .await?
            .map(|cart| render_summary(&cart))
            .unwrap_or_default())
    }
}
