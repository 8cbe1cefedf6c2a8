//! Message texts and keyboards
//!
//! Everything the user sees is built here; the transport only delivers it.

use crate::backend::{Product, ProductId};
use crate::cart::{AllowedQuantities, CartSummary};
use crate::state_machine::event::ControlToken;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Write;

pub mod texts {
    pub const GREETING: &str = "Hello!";
    pub const MENU_PROMPT: &str = "Please choose:";
    pub const EMAIL_PROMPT: &str = "Please enter your email";
    pub const EMAIL_INVALID: &str = "Please enter a valid email";
    pub const EMAIL_SAVED: &str = "Thank you! We will contact you by email.";
    pub const CART_EMPTY: &str = "Your cart is empty";
    pub const MY_CART: &str = "My cart";
    pub const BACK: &str = "Back";
    pub const PAY: &str = "Pay";
    pub const TO_MENU: &str = "To menu";
}

/// Unit the quantity buttons count in
const UNIT: &str = "kg";
const CURRENCY: &str = "rub";

/// A tappable option: label shown, token delivered back on tap
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub label: String,
    pub token: String,
}

impl Button {
    pub fn new(label: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            token: token.into(),
        }
    }

    fn control(label: &str, token: ControlToken) -> Self {
        Self::new(label, token.as_str())
    }
}

/// Rows of buttons, top to bottom
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Keyboard(pub Vec<Vec<Button>>);

impl Keyboard {
    pub fn rows(&self) -> &[Vec<Button>] {
        &self.0
    }

    /// Every token, row-major
    #[allow(dead_code)] // Used in tests
    pub fn tokens(&self) -> Vec<&str> {
        self.0
            .iter()
            .flatten()
            .map(|b| b.token.as_str())
            .collect()
    }
}

/// One product per row, in catalog order, then the cart shortcut
pub fn catalog_keyboard(products: &[Product]) -> Keyboard {
    let mut rows: Vec<Vec<Button>> = products
        .iter()
        .map(|p| vec![Button::new(&p.title, p.id.to_string())])
        .collect();
    rows.push(vec![Button::control(texts::MY_CART, ControlToken::ShowCart)]);
    Keyboard(rows)
}

pub fn product_caption(product: &Product) -> String {
    format!(
        "{}\n\n{} {CURRENCY} per {UNIT}\n\n{}",
        product.title, product.price, product.description
    )
}

/// Quantity row, then cart and back
pub fn product_keyboard(quantities: &AllowedQuantities) -> Keyboard {
    let amounts = quantities
        .as_slice()
        .iter()
        .map(|q| Button::new(format!("{q} {UNIT}"), q.to_string()))
        .collect();
    Keyboard(vec![
        amounts,
        vec![Button::control(texts::MY_CART, ControlToken::ShowCart)],
        vec![Button::control(texts::BACK, ControlToken::BackToMenu)],
    ])
}

pub fn cart_text(summary: &CartSummary) -> String {
    if summary.lines.is_empty() {
        return texts::CART_EMPTY.to_string();
    }
    let mut text = String::new();
    for line in &summary.lines {
        let _ = write!(
            text,
            "{}\n{}\n{} {CURRENCY} per {UNIT}\n{} {UNIT} in cart for {} {CURRENCY}\n\n",
            line.title, line.description, line.unit_price, line.amount, line.line_total
        );
    }
    let _ = write!(text, "Total: {} {CURRENCY}", summary.total);
    text
}

/// Pay and menu, then one remove button per product in the cart
pub fn cart_keyboard(summary: &CartSummary) -> Keyboard {
    let mut rows = vec![
        vec![Button::control(texts::PAY, ControlToken::Pay)],
        vec![Button::control(texts::TO_MENU, ControlToken::BackToMenu)],
    ];
    let mut seen: HashSet<ProductId> = HashSet::new();
    for line in &summary.lines {
        if seen.insert(line.product_id) {
            rows.push(vec![Button::new(
                format!("Remove {}", line.title),
                line.product_id.to_string(),
            )]);
        }
    }
    Keyboard(rows)
}
