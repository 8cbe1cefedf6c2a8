//! Effects produced by state transitions

use super::event::MessageRef;
use crate::backend::ProductId;

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a plain text message
    SendText { text: String },

    /// Render the catalog keyboard
    ShowCatalog,

    /// Render a product card with the quantity keyboard
    ShowProduct { product_id: ProductId },

    /// Render the cart summary with remove buttons
    ShowCart,

    /// Get-or-create the user's cart and add a line item
    AddToCart { product_id: ProductId, amount: u32 },

    /// Remove the first line item for the product from the user's cart
    RemoveFromCart { product_id: ProductId },

    /// Ask for the checkout email
    PromptEmail,

    /// Hand the email to the backend; yields `EmailAccepted` or `EmailRejected`
    SubmitEmail { email: String },

    /// Delete a message the user has moved past
    DeleteMessage { message: MessageRef },
}

impl Effect {
    pub fn send_text(text: impl Into<String>) -> Self {
        Effect::SendText { text: text.into() }
    }

    /// Delete the message a button belonged to, if the transport told us
    pub fn delete(message: Option<MessageRef>) -> Option<Self> {
        message.map(|message| Effect::DeleteMessage { message })
    }

    /// True for effects that change backend cart data
    pub fn mutates_cart(&self) -> bool {
        matches!(self, Effect::AddToCart { .. } | Effect::RemoveFromCart { .. })
    }
}
