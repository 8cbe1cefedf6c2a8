//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use super::{ConversationRuntime, TurnError};
use crate::backend::{
    Account, AccountId, BackendError, BackendErrorKind, Cart, CartId, CartLine, CatalogBackend,
    LineItem, LineItemId, Money, PictureRef, Product, ProductId, UserId,
};
use crate::cart::AllowedQuantities;
use crate::render::Keyboard;
use crate::state_machine::{ConvState, InboundEvent, InboundKind, MessageRef};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Mock Backend
// ============================================================================

#[derive(Default)]
struct BackendData {
    products: Vec<Product>,
    pictures: HashMap<String, Vec<u8>>,
    carts: Vec<Cart>,
    /// Account linked to each cart, with its stored email
    accounts: HashMap<CartId, Account>,
    next_id: u64,
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, BackendErrorKind>,
    rejected_emails: Vec<String>,
    drop_created_carts: bool,
}

impl BackendData {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory catalog/cart store with call counting and failure injection
#[allow(dead_code)]
pub struct MockBackend {
    data: Mutex<BackendData>,
    yielding: AtomicBool,
}

#[allow(dead_code)]
impl MockBackend {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(BackendData::default()),
            yielding: AtomicBool::new(false),
        }
    }

    /// Catalog product without a picture
    pub fn product(id: u64, title: &str, price: f64) -> Product {
        Product {
            id: ProductId(id),
            title: title.to_string(),
            description: format!("Fresh {}", title.to_lowercase()),
            price: Money::from_decimal(price).unwrap(),
            picture: None,
        }
    }

    pub fn with_products(self, products: Vec<Product>) -> Self {
        self.data.lock().unwrap().products = products;
        self
    }

    /// Attach picture bytes to an already registered product
    pub fn with_picture(self, id: u64, bytes: &[u8]) -> Self {
        {
            let mut data = self.data.lock().unwrap();
            let path = format!("/uploads/product_{id}.jpg");
            if let Some(product) = data.products.iter_mut().find(|p| p.id == ProductId(id)) {
                product.picture = Some(PictureRef(path.clone()));
            }
            data.pictures.insert(path, bytes.to_vec());
        }
        self
    }

    /// Drop a product from the catalog; carts keep their lines for it
    pub fn unlist_product(&self, id: ProductId) {
        self.data.lock().unwrap().products.retain(|p| p.id != id);
    }

    /// Yield to the scheduler on every call so concurrent callers interleave
    pub fn with_yielding(self) -> Self {
        self.yielding.store(true, Ordering::SeqCst);
        self
    }

    /// Make every subsequent `call` fail with `kind`
    pub fn fail_on(&self, call: &'static str, kind: BackendErrorKind) {
        self.data.lock().unwrap().failures.insert(call, kind);
    }

    pub fn clear_failures(&self) {
        self.data.lock().unwrap().failures.clear();
    }

    /// Emails containing `needle` are refused the way the backend refuses invalid input
    pub fn reject_emails_containing(&self, needle: &str) {
        self.data
            .lock()
            .unwrap()
            .rejected_emails
            .push(needle.to_string());
    }

    /// Accept `create_cart` but never make the cart visible
    pub fn drop_created_carts(&self) {
        self.data.lock().unwrap().drop_created_carts = true;
    }

    pub fn calls(&self, call: &str) -> usize {
        self.data
            .lock()
            .unwrap()
            .calls
            .get(call)
            .copied()
            .unwrap_or(0)
    }

    pub fn cart_count(&self) -> usize {
        self.data.lock().unwrap().carts.len()
    }

    pub fn line_item_count(&self) -> usize {
        self.data
            .lock()
            .unwrap()
            .carts
            .iter()
            .map(|c| c.line_items.len())
            .sum()
    }

    pub fn email_for_cart(&self, cart: CartId) -> Option<String> {
        self.data
            .lock()
            .unwrap()
            .accounts
            .get(&cart)
            .and_then(|a| a.email.clone())
    }

    async fn enter(&self, call: &'static str) -> Result<(), BackendError> {
        if self.yielding.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        let mut data = self.data.lock().unwrap();
        *data.calls.entry(call).or_default() += 1;
        match data.failures.get(call) {
            Some(kind) => Err(BackendError::new(*kind, format!("injected {call} failure"))),
            None => Ok(()),
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogBackend for MockBackend {
    async fn list_products(&self) -> Result<Vec<Product>, BackendError> {
        self.enter("list_products").await?;
        let data = self.data.lock().unwrap();
        Ok(data
            .products
            .iter()
            .map(|p| Product {
                picture: None,
                ..p.clone()
            })
            .collect())
    }

    async fn get_product(&self, id: ProductId) -> Result<Product, BackendError> {
        self.enter("get_product").await?;
        let data = self.data.lock().unwrap();
        data.products
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| BackendError::not_found(format!("product {id}")).with_status(404))
    }

    async fn fetch_picture(&self, picture: &PictureRef) -> Result<Vec<u8>, BackendError> {
        self.enter("fetch_picture").await?;
        let data = self.data.lock().unwrap();
        data.pictures
            .get(&picture.0)
            .cloned()
            .ok_or_else(|| BackendError::not_found(picture.0.clone()).with_status(404))
    }

    async fn find_cart(&self, owner: &UserId) -> Result<Option<Cart>, BackendError> {
        self.enter("find_cart").await?;
        let data = self.data.lock().unwrap();
        Ok(data.carts.iter().find(|c| &c.owner == owner).cloned())
    }

    async fn create_cart(&self, owner: &UserId) -> Result<(), BackendError> {
        self.enter("create_cart").await?;
        let mut data = self.data.lock().unwrap();
        if data.drop_created_carts {
            return Ok(());
        }
        let cart = CartId(data.next_id());
        let account = AccountId(data.next_id());
        data.carts.push(Cart {
            id: cart,
            owner: owner.clone(),
            line_items: Vec::new(),
        });
        data.accounts.insert(
            cart,
            Account {
                id: account,
                email: None,
            },
        );
        Ok(())
    }

    async fn add_line_item(
        &self,
        cart: CartId,
        product: ProductId,
        amount: u32,
    ) -> Result<(), BackendError> {
        self.enter("add_line_item").await?;
        let mut data = self.data.lock().unwrap();
        let id = LineItemId(data.next_id());
        // Carts populate products without their pictures
        let product = data
            .products
            .iter()
            .find(|p| p.id == product)
            .map(|p| Product {
                picture: None,
                ..p.clone()
            })
            .ok_or_else(|| BackendError::rejected(format!("no product {product}")).with_status(400))?;
        let target = data
            .carts
            .iter_mut()
            .find(|c| c.id == cart)
            .ok_or_else(|| BackendError::rejected(format!("no cart {cart}")).with_status(400))?;
        target.line_items.push(CartLine { id, product, amount });
        Ok(())
    }

    async fn find_line_items(
        &self,
        cart: CartId,
        product: ProductId,
    ) -> Result<Vec<LineItem>, BackendError> {
        self.enter("find_line_items").await?;
        let data = self.data.lock().unwrap();
        Ok(data
            .carts
            .iter()
            .filter(|c| c.id == cart)
            .flat_map(|c| c.line_items.iter())
            .filter(|line| line.product.id == product)
            .map(|line| LineItem {
                id: line.id,
                cart_id: cart,
                product_id: product,
                amount: line.amount,
            })
            .collect())
    }

    async fn delete_line_item(&self, id: LineItemId) -> Result<(), BackendError> {
        self.enter("delete_line_item").await?;
        let mut data = self.data.lock().unwrap();
        for cart in &mut data.carts {
            if let Some(pos) = cart.line_items.iter().position(|i| i.id == id) {
                cart.line_items.remove(pos);
                return Ok(());
            }
        }
        Err(BackendError::not_found(format!("line item {id}")).with_status(404))
    }

    async fn find_account_by_cart(&self, cart: CartId) -> Result<Option<Account>, BackendError> {
        self.enter("find_account_by_cart").await?;
        Ok(self.data.lock().unwrap().accounts.get(&cart).cloned())
    }

    async fn update_account_email(
        &self,
        account: AccountId,
        email: &str,
    ) -> Result<(), BackendError> {
        self.enter("update_account_email").await?;
        let mut data = self.data.lock().unwrap();
        if data.rejected_emails.iter().any(|n| email.contains(n.as_str())) {
            return Err(BackendError::from_status(400, "email must be a valid email"));
        }
        let record = data
            .accounts
            .values_mut()
            .find(|a| a.id == account)
            .ok_or_else(|| BackendError::not_found(format!("account {account}")).with_status(404))?;
        record.email = Some(email.to_string());
        Ok(())
    }
}

// ============================================================================
// Recording Transport
// ============================================================================

/// Something the bot put on (or took off) the user's screen
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text {
        user: UserId,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Photo {
        user: UserId,
        photo: Vec<u8>,
        caption: String,
        keyboard: Option<Keyboard>,
    },
    Deleted(MessageRef),
}

impl Sent {
    pub fn keyboard(&self) -> Option<&Keyboard> {
        match self {
            Sent::Text { keyboard, .. } | Sent::Photo { keyboard, .. } => keyboard.as_ref(),
            Sent::Deleted(_) => None,
        }
    }
}

#[allow(dead_code)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    next_message_id: AtomicI64,
    fail_deletes: AtomicBool,
    fail_sends: AtomicBool,
}

#[allow(dead_code)]
impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            next_message_id: AtomicI64::new(1),
            fail_deletes: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        }
    }

    pub fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }

    /// Make text sends fail, or succeed again
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// Texts and captions in send order
    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text),
                Sent::Photo { caption, .. } => Some(caption),
                Sent::Deleted(_) => None,
            })
            .collect()
    }

    pub fn last_keyboard(&self) -> Option<Keyboard> {
        self.sent().iter().rev().find_map(Sent::keyboard).cloned()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Deleted(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    fn record(&self, user: &UserId, sent: Sent) -> MessageRef {
        self.sent.lock().unwrap().push(sent);
        MessageRef {
            chat_id: user.as_str().to_string(),
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
        }
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(
        &self,
        user: &UserId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Request("connection reset".to_string()));
        }
        Ok(self.record(
            user,
            Sent::Text {
                user: user.clone(),
                text: text.to_string(),
                keyboard: keyboard.cloned(),
            },
        ))
    }

    async fn send_photo(
        &self,
        user: &UserId,
        photo: Vec<u8>,
        caption: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, TransportError> {
        Ok(self.record(
            user,
            Sent::Photo {
                user: user.clone(),
                photo,
                caption: caption.to_string(),
                keyboard: keyboard.cloned(),
            },
        ))
    }

    async fn delete_message(&self, message: &MessageRef) -> Result<(), TransportError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(TransportError::Refused(
                "Bad Request: message to delete not found".to_string(),
            ));
        }
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Deleted(message.clone()));
        Ok(())
    }
}

// ============================================================================
// In-Memory Session Store
// ============================================================================

/// In-memory session store for testing
#[allow(dead_code)]
pub struct InMemorySessionStore {
    states: Mutex<HashMap<String, String>>,
}

#[allow(dead_code)]
impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Store a raw value, bypassing serialization
    pub fn set_raw(&self, session_id: &str, raw: &str) {
        self.states
            .lock()
            .unwrap()
            .insert(session_id.to_string(), raw.to_string());
    }

    pub fn raw(&self, session_id: &str) -> Option<String> {
        self.states.lock().unwrap().get(session_id).cloned()
    }

    pub fn state(&self, session_id: &str) -> Option<ConvState> {
        self.raw(session_id)
            .map(|raw| ConvState::from_stored(&raw).unwrap())
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load_state(&self, session_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.raw(session_id))
    }

    async fn save_state(&self, session_id: &str, state: &ConvState) -> Result<(), StoreError> {
        let raw = state.to_stored().map_err(|e| StoreError(e.to_string()))?;
        self.set_raw(session_id, &raw);
        Ok(())
    }
}

// ============================================================================
// Test Runtime
// ============================================================================

/// Runtime over in-memory mocks with one default session
pub struct TestRuntime {
    pub runtime: Arc<
        ConversationRuntime<Arc<InMemorySessionStore>, MockBackend, Arc<RecordingTransport>>,
    >,
    pub store: Arc<InMemorySessionStore>,
    pub backend: Arc<MockBackend>,
    pub transport: Arc<RecordingTransport>,
    pub session_id: String,
    pub user: UserId,
}

#[allow(dead_code)]
impl TestRuntime {
    pub fn new(backend: MockBackend) -> Self {
        let store = Arc::new(InMemorySessionStore::new());
        let backend = Arc::new(backend);
        let transport = Arc::new(RecordingTransport::new());
        let runtime = ConversationRuntime::new(
            Arc::clone(&store),
            Arc::clone(&backend),
            Arc::clone(&transport),
            AllowedQuantities::default(),
        );
        Self {
            runtime: Arc::new(runtime),
            store,
            backend,
            transport,
            session_id: "chat-100".to_string(),
            user: UserId::new("100"),
        }
    }

    pub fn inbound(&self, kind: InboundKind, payload: &str) -> InboundEvent {
        InboundEvent {
            session_id: self.session_id.clone(),
            user_id: self.user.clone(),
            kind,
            payload: payload.to_string(),
            message: None,
        }
    }

    pub async fn start(&self) -> Result<ConvState, TurnError> {
        self.runtime
            .advance(self.inbound(InboundKind::Command, "/start"))
            .await
    }

    pub async fn press(&self, token: &str) -> Result<ConvState, TurnError> {
        self.runtime
            .advance(self.inbound(InboundKind::Button, token))
            .await
    }

    /// Press a button on a specific message
    pub async fn press_on(&self, token: &str, message: MessageRef) -> Result<ConvState, TurnError> {
        let mut inbound = self.inbound(InboundKind::Button, token);
        inbound.message = Some(message);
        self.runtime.advance(inbound).await
    }

    pub async fn say(&self, text: &str) -> Result<ConvState, TurnError> {
        self.runtime
            .advance(self.inbound(InboundKind::Text, text))
            .await
    }

    pub fn stored(&self) -> Option<ConvState> {
        self.store.state(&self.session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::texts;

    fn catalog() -> MockBackend {
        MockBackend::new()
            .with_products(vec![
                MockBackend::product(42, "Plums", 2.5),
                MockBackend::product(7, "Apples", 1.2),
            ])
            .with_picture(42, b"plum-jpeg")
    }

    /// Session sitting on the product card for Plums
    async fn on_plums(rt: &TestRuntime) {
        rt.start().await.unwrap();
        rt.press("42").await.unwrap();
    }

    #[tokio::test]
    async fn test_start_shows_catalog_in_backend_order() {
        let rt = TestRuntime::new(catalog());

        let state = rt.start().await.unwrap();

        assert_eq!(state, ConvState::HandleMenu);
        assert_eq!(rt.stored(), Some(ConvState::HandleMenu));
        let shown = rt.transport.texts();
        assert_eq!(shown[0], texts::GREETING);
        assert_eq!(shown[1], texts::MENU_PROMPT);
        let keyboard = rt.transport.last_keyboard().unwrap();
        assert_eq!(keyboard.tokens(), vec!["42", "7", "show_cart"]);
    }

    #[tokio::test]
    async fn test_first_contact_without_start_command() {
        let rt = TestRuntime::new(catalog());

        let state = rt.say("hello").await.unwrap();

        assert_eq!(state, ConvState::HandleMenu);
        assert_eq!(rt.transport.texts()[0], texts::GREETING);
    }

    #[tokio::test]
    async fn test_product_button_shows_card_with_quantities() {
        let rt = TestRuntime::new(catalog());
        rt.start().await.unwrap();
        rt.transport.clear();

        let state = rt.press_on("42", message_ref("100", 1)).await.unwrap();

        assert_eq!(state, ConvState::HandleDescription { product_id: ProductId(42) });
        let sent = rt.transport.sent();
        assert_eq!(sent[1], Sent::Deleted(message_ref("100", 1)));
        match &sent[0] {
            Sent::Photo { photo, caption, keyboard, .. } => {
                assert_eq!(photo, b"plum-jpeg");
                assert!(caption.starts_with("Plums"));
                let keyboard = keyboard.as_ref().unwrap();
                assert_eq!(keyboard.rows()[0].len(), 3);
                assert_eq!(&keyboard.tokens()[..3], &["5", "10", "15"]);
            }
            other => panic!("Expected photo, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_product_without_picture_is_sent_as_text() {
        let rt = TestRuntime::new(catalog());
        rt.start().await.unwrap();
        rt.transport.clear();

        rt.press("7").await.unwrap();

        assert!(matches!(&rt.transport.sent()[0], Sent::Text { text, .. } if text.starts_with("Apples")));
        assert_eq!(rt.backend.calls("fetch_picture"), 0);
    }

    #[tokio::test]
    async fn test_quantity_adds_line_item_and_returns_to_menu() {
        let rt = TestRuntime::new(catalog());
        on_plums(&rt).await;

        let state = rt.press("10").await.unwrap();

        assert_eq!(state, ConvState::HandleMenu);
        assert_eq!(rt.backend.cart_count(), 1);
        assert_eq!(rt.backend.line_item_count(), 1);
        let summary = rt.runtime.carts().summary_for(&rt.user).await.unwrap();
        assert_eq!(summary.total, Money::from_hundredths(2500));
        assert_eq!(
            rt.transport.last_keyboard().unwrap().tokens(),
            vec!["42", "7", "show_cart"]
        );
    }

    #[tokio::test]
    async fn test_unlisted_quantity_aborts_turn() {
        let rt = TestRuntime::new(catalog());
        on_plums(&rt).await;

        let err = rt.press("7").await.unwrap_err();

        assert!(matches!(err, TurnError::Transition(_)));
        assert_eq!(
            rt.stored(),
            Some(ConvState::HandleDescription { product_id: ProductId(42) })
        );
        assert_eq!(rt.backend.line_item_count(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_during_add_keeps_state() {
        let rt = TestRuntime::new(catalog());
        on_plums(&rt).await;
        rt.backend.fail_on("add_line_item", BackendErrorKind::ServerError);

        let err = rt.press("10").await.unwrap_err();

        assert!(matches!(err, TurnError::Backend(_)));
        assert!(!err.needs_operator());
        assert_eq!(
            rt.stored(),
            Some(ConvState::HandleDescription { product_id: ProductId(42) })
        );
        assert_eq!(rt.backend.line_item_count(), 0);

        // Retrying the same button once the backend recovers works
        rt.backend.clear_failures();
        assert_eq!(rt.press("10").await.unwrap(), ConvState::HandleMenu);
        assert_eq!(rt.backend.line_item_count(), 1);
    }

    #[tokio::test]
    async fn test_cart_shows_summary_and_removes_lines() {
        let rt = TestRuntime::new(catalog());
        on_plums(&rt).await;
        rt.press("10").await.unwrap();

        let state = rt.press("show_cart").await.unwrap();
        assert_eq!(state, ConvState::HandleCart);
        let shown = rt.transport.texts();
        assert!(shown.last().unwrap().ends_with("Total: 25.00 rub"));
        assert_eq!(
            rt.transport.last_keyboard().unwrap().tokens(),
            vec!["pay", "back_to_menu", "42"]
        );

        let state = rt.press_on("42", message_ref("100", 9)).await.unwrap();
        assert_eq!(state, ConvState::HandleCart);
        assert_eq!(rt.backend.line_item_count(), 0);
        assert_eq!(rt.transport.deleted(), vec![message_ref("100", 9)]);
        assert_eq!(rt.transport.texts().last().unwrap(), texts::CART_EMPTY);
    }

    #[tokio::test]
    async fn test_show_cart_without_cart_does_not_create_one() {
        let rt = TestRuntime::new(catalog());
        rt.start().await.unwrap();

        rt.press("show_cart").await.unwrap();

        assert_eq!(rt.backend.cart_count(), 0);
        assert_eq!(rt.transport.texts().last().unwrap(), texts::CART_EMPTY);
    }

    #[tokio::test]
    async fn test_failed_delete_does_not_abort_turn() {
        let rt = TestRuntime::new(catalog());
        rt.start().await.unwrap();
        rt.transport.fail_deletes();

        let state = rt.press_on("42", message_ref("100", 1)).await.unwrap();

        assert_eq!(state, ConvState::HandleDescription { product_id: ProductId(42) });
    }

    #[tokio::test]
    async fn test_failed_product_fetch_keeps_catalog_on_screen() {
        let rt = TestRuntime::new(catalog());
        rt.start().await.unwrap();
        rt.transport.clear();
        rt.backend.fail_on("get_product", BackendErrorKind::ServerError);

        let err = rt.press_on("42", message_ref("100", 5)).await.unwrap_err();

        assert!(matches!(err, TurnError::Backend(_)));
        assert_eq!(rt.stored(), Some(ConvState::HandleMenu));
        assert!(rt.transport.deleted().is_empty());

        // The same catalog button still works once the backend recovers
        rt.backend.clear_failures();
        let state = rt.press_on("42", message_ref("100", 5)).await.unwrap();
        assert_eq!(state, ConvState::HandleDescription { product_id: ProductId(42) });
        assert_eq!(rt.transport.deleted(), vec![message_ref("100", 5)]);
    }

    #[tokio::test]
    async fn test_failed_picture_fetch_keeps_catalog_on_screen() {
        let rt = TestRuntime::new(catalog());
        rt.start().await.unwrap();
        rt.backend.fail_on("fetch_picture", BackendErrorKind::Network);

        assert!(rt.press_on("42", message_ref("100", 5)).await.is_err());

        assert_eq!(rt.stored(), Some(ConvState::HandleMenu));
        assert!(rt.transport.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_render_failure_after_add_still_completes_turn() {
        let rt = TestRuntime::new(catalog());
        on_plums(&rt).await;
        rt.backend.fail_on("list_products", BackendErrorKind::ServerError);

        let state = rt.press("10").await.unwrap();

        assert_eq!(state, ConvState::HandleMenu);
        assert_eq!(rt.stored(), Some(ConvState::HandleMenu));
        assert_eq!(rt.backend.line_item_count(), 1);

        // A repeated press is no longer read as a quantity
        assert!(rt.press("10").await.is_err());
        assert_eq!(rt.backend.line_item_count(), 1);
    }

    #[tokio::test]
    async fn test_render_failure_after_remove_still_completes_turn() {
        let rt = TestRuntime::new(catalog());
        on_plums(&rt).await;
        rt.press("10").await.unwrap();
        on_plums(&rt).await;
        rt.press("5").await.unwrap();
        rt.press("show_cart").await.unwrap();
        rt.transport.fail_sends(true);

        let state = rt.press_on("42", message_ref("100", 9)).await.unwrap();

        assert_eq!(state, ConvState::HandleCart);
        assert_eq!(rt.stored(), Some(ConvState::HandleCart));
        assert_eq!(rt.backend.line_item_count(), 1);
        // The old cart message stays since nothing replaced it
        assert!(rt.transport.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_failed_remove_aborts_before_render() {
        let rt = TestRuntime::new(catalog());
        on_plums(&rt).await;
        rt.press("10").await.unwrap();
        rt.press("show_cart").await.unwrap();
        rt.transport.clear();
        rt.backend.fail_on("delete_line_item", BackendErrorKind::ServerError);

        assert!(rt.press_on("42", message_ref("100", 9)).await.is_err());

        assert_eq!(rt.backend.line_item_count(), 1);
        assert!(rt.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_cart_renders_line_whose_product_left_the_catalog() {
        let rt = TestRuntime::new(catalog());
        on_plums(&rt).await;
        rt.press("10").await.unwrap();
        rt.backend.unlist_product(ProductId(42));

        let state = rt.press("show_cart").await.unwrap();

        assert_eq!(state, ConvState::HandleCart);
        let shown = rt.transport.texts();
        assert!(shown.last().unwrap().contains("Plums"));
        assert!(shown.last().unwrap().ends_with("Total: 25.00 rub"));
        assert_eq!(rt.backend.calls("list_products"), 2);

        // And it can still be removed
        assert_eq!(rt.press("42").await.unwrap(), ConvState::HandleCart);
        assert_eq!(rt.backend.line_item_count(), 0);
    }

    #[tokio::test]
    async fn test_email_rejected_then_accepted() {
        let rt = TestRuntime::new(catalog());
        rt.backend.reject_emails_containing("not-an-email");
        on_plums(&rt).await;
        rt.press("10").await.unwrap();
        rt.press("show_cart").await.unwrap();

        assert_eq!(rt.press("pay").await.unwrap(), ConvState::WaitingEmail);
        assert_eq!(rt.transport.texts().last().unwrap(), texts::EMAIL_PROMPT);

        let state = rt.say("not-an-email").await.unwrap();
        assert_eq!(state, ConvState::WaitingEmail);
        assert_eq!(rt.transport.texts().last().unwrap(), texts::EMAIL_INVALID);

        let state = rt.say("  buyer@example.com ").await.unwrap();
        assert_eq!(state, ConvState::Start);
        assert_eq!(rt.stored(), Some(ConvState::Start));
        assert_eq!(rt.transport.texts().last().unwrap(), texts::EMAIL_SAVED);
        let cart = rt.runtime.carts().find_cart(&rt.user).await.unwrap().unwrap();
        assert_eq!(
            rt.backend.email_for_cart(cart.id),
            Some("buyer@example.com".to_string())
        );
    }

    #[tokio::test]
    async fn test_email_server_error_aborts_turn() {
        let rt = TestRuntime::new(catalog());
        on_plums(&rt).await;
        rt.press("10").await.unwrap();
        rt.press("pay").await.unwrap();
        rt.backend.fail_on("update_account_email", BackendErrorKind::ServerError);

        let err = rt.say("buyer@example.com").await.unwrap_err();

        assert!(matches!(err, TurnError::Backend(_)));
        assert_eq!(rt.stored(), Some(ConvState::WaitingEmail));
    }

    #[tokio::test]
    async fn test_pay_without_cart_aborts_email_turn() {
        let rt = TestRuntime::new(catalog());
        rt.start().await.unwrap();
        rt.press("pay").await.unwrap();

        let err = rt.say("buyer@example.com").await.unwrap_err();

        assert!(matches!(err, TurnError::Checkout(_)));
        assert_eq!(rt.stored(), Some(ConvState::WaitingEmail));
    }

    #[tokio::test]
    async fn test_restart_during_checkout() {
        let rt = TestRuntime::new(catalog());
        rt.start().await.unwrap();
        rt.press("pay").await.unwrap();

        let state = rt.start().await.unwrap();

        assert_eq!(state, ConvState::HandleMenu);
        assert_eq!(rt.backend.calls("update_account_email"), 0);
    }

    #[tokio::test]
    async fn test_restart_addressed_to_bot_as_text() {
        let rt = TestRuntime::new(catalog());
        rt.start().await.unwrap();
        rt.press("pay").await.unwrap();

        let state = rt.say("/start@grocery_bot").await.unwrap();

        assert_eq!(state, ConvState::HandleMenu);
    }

    #[tokio::test]
    async fn test_corrupt_state_is_configuration_error() {
        let rt = TestRuntime::new(catalog());
        rt.store.set_raw(&rt.session_id, "GARBAGE");

        let err = rt.press("42").await.unwrap_err();

        assert!(matches!(err, TurnError::Configuration(_)));
        assert!(err.needs_operator());
        assert_eq!(rt.store.raw(&rt.session_id), Some("GARBAGE".to_string()));
    }

    #[tokio::test]
    async fn test_restart_recovers_corrupt_state() {
        let rt = TestRuntime::new(catalog());
        rt.store.set_raw(&rt.session_id, "GARBAGE");

        assert_eq!(rt.start().await.unwrap(), ConvState::HandleMenu);
    }

    #[tokio::test]
    async fn test_unknown_token_aborts_turn() {
        let rt = TestRuntime::new(catalog());
        rt.start().await.unwrap();

        let err = rt.press("bogus").await.unwrap_err();

        assert!(matches!(err, TurnError::Transition(_)));
        assert_eq!(rt.stored(), Some(ConvState::HandleMenu));
    }

    #[tokio::test]
    async fn test_text_in_menu_is_ignored() {
        let rt = TestRuntime::new(catalog());
        rt.start().await.unwrap();
        rt.transport.clear();

        let state = rt.say("what do you have?").await.unwrap();

        assert_eq!(state, ConvState::HandleMenu);
        assert!(rt.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_sessions_of_one_owner_share_a_cart() {
        let rt = TestRuntime::new(catalog().with_yielding());
        let plums = ConvState::HandleDescription { product_id: ProductId(42) }.to_stored().unwrap();
        rt.store.set_raw("chat-a", &plums);
        rt.store.set_raw("chat-b", &plums);

        let mut handles = Vec::new();
        for session in ["chat-a", "chat-b"] {
            let runtime = Arc::clone(&rt.runtime);
            let mut inbound = rt.inbound(InboundKind::Button, "5");
            inbound.session_id = session.to_string();
            handles.push(tokio::spawn(async move { runtime.advance(inbound).await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), ConvState::HandleMenu);
        }

        assert_eq!(rt.backend.cart_count(), 1);
        assert_eq!(rt.backend.line_item_count(), 2);
        assert_eq!(rt.backend.calls("create_cart"), 1);
    }

    #[tokio::test]
    async fn test_turns_of_one_session_are_serialized() {
        let rt = TestRuntime::new(catalog().with_yielding());
        rt.start().await.unwrap();
        rt.press("42").await.unwrap();

        let first = {
            let runtime = Arc::clone(&rt.runtime);
            let inbound = rt.inbound(InboundKind::Button, "5");
            tokio::spawn(async move { runtime.advance(inbound).await })
        };
        let second = {
            let runtime = Arc::clone(&rt.runtime);
            let inbound = rt.inbound(InboundKind::Button, "10");
            tokio::spawn(async move { runtime.advance(inbound).await })
        };
        let results = [first.await.unwrap(), second.await.unwrap()];

        // Whichever runs second sees HANDLE_MENU, where a quantity is read as
        // a product id the catalog does not have
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(TurnError::Backend(e)) if e.kind == BackendErrorKind::NotFound)));
        assert_eq!(rt.backend.line_item_count(), 1);
        assert_eq!(rt.stored(), Some(ConvState::HandleMenu));
    }

    fn message_ref(chat_id: &str, message_id: i64) -> MessageRef {
        MessageRef {
            chat_id: chat_id.to_string(),
            message_id,
        }
    }
}
