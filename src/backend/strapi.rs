//! Strapi v4 REST implementation of the catalog backend

use super::{
    Account, AccountId, BackendError, Cart, CartId, CartLine, CatalogBackend, LineItem, LineItemId,
    Money, PictureRef, Product, ProductId, UserId,
};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Connection settings for the Strapi API
#[derive(Debug, Clone)]
pub struct StrapiConfig {
    /// Base API URL, e.g. `http://localhost:1337/api`
    pub api_url: String,
    /// Root that picture URLs are relative to
    pub media_url: String,
    /// Bearer token, if the API requires one
    pub token: Option<String>,
    pub timeout: Duration,
}

impl StrapiConfig {
    /// Media root derived from an API URL by dropping its `/api` suffix
    pub fn media_root(api_url: &str) -> String {
        let trimmed = api_url.trim_end_matches('/');
        trimmed.strip_suffix("/api").unwrap_or(trimmed).to_string()
    }
}

pub struct StrapiClient {
    client: Client,
    config: StrapiConfig,
}

impl StrapiClient {
    pub fn new(config: StrapiConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.config.api_url.trim_end_matches('/'), path);
        let builder = self.client.request(method, url);
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, BackendError> {
        let response = check_status(builder.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn send(builder: RequestBuilder) -> Result<(), BackendError> {
        check_status(builder.send().await?).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::from_status(status.as_u16(), &body))
}

#[async_trait]
impl CatalogBackend for StrapiClient {
    async fn list_products(&self) -> Result<Vec<Product>, BackendError> {
        let body: Collection<ProductAttributes> =
            Self::send_json(self.request(Method::GET, "products")).await?;
        body.data.into_iter().map(Entry::into_product).collect()
    }

    async fn get_product(&self, id: ProductId) -> Result<Product, BackendError> {
        let body: Single<ProductAttributes> = Self::send_json(
            self.request(Method::GET, &format!("products/{id}"))
                .query(&[("populate", "picture")]),
        )
        .await?;
        body.data.into_product()
    }

    async fn fetch_picture(&self, picture: &PictureRef) -> Result<Vec<u8>, BackendError> {
        let url = format!(
            "{}/{}",
            self.config.media_url.trim_end_matches('/'),
            picture.0.trim_start_matches('/')
        );
        let response = check_status(self.client.get(url).send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn find_cart(&self, owner: &UserId) -> Result<Option<Cart>, BackendError> {
        let body: Collection<CartAttributes> = Self::send_json(
            self.request(Method::GET, "carts").query(&[
                ("filters[tg_id][$eq]", owner.as_str()),
                ("populate[cartproducts][populate]", "product"),
            ]),
        )
        .await?;
        Ok(body
            .data
            .into_iter()
            .next()
            .map(|entry| entry.into_cart(owner)))
    }

    async fn create_cart(&self, owner: &UserId) -> Result<(), BackendError> {
        Self::send(
            self.request(Method::POST, "carts")
                .json(&json!({ "data": { "tg_id": owner.as_str() } })),
        )
        .await
    }

    async fn add_line_item(
        &self,
        cart: CartId,
        product: ProductId,
        amount: u32,
    ) -> Result<(), BackendError> {
        Self::send(self.request(Method::POST, "product-in-carts").json(&json!({
            "data": {
                "cart": cart,
                "product": product,
                "amount": amount,
            }
        })))
        .await
    }

    async fn find_line_items(
        &self,
        cart: CartId,
        product: ProductId,
    ) -> Result<Vec<LineItem>, BackendError> {
        let cart_filter = cart.to_string();
        let product_filter = product.to_string();
        let body: Collection<CartProductAttributes> = Self::send_json(
            self.request(Method::GET, "product-in-carts").query(&[
                ("filters[cart][$eq]", cart_filter.as_str()),
                ("filters[product][$eq]", product_filter.as_str()),
            ]),
        )
        .await?;
        Ok(body
            .data
            .into_iter()
            .map(|entry| LineItem {
                id: LineItemId(entry.id),
                cart_id: cart,
                product_id: product,
                amount: entry.attributes.amount,
            })
            .collect())
    }

    async fn delete_line_item(&self, id: LineItemId) -> Result<(), BackendError> {
        Self::send(self.request(Method::DELETE, &format!("product-in-carts/{id}"))).await
    }

    async fn find_account_by_cart(&self, cart: CartId) -> Result<Option<Account>, BackendError> {
        let cart_filter = cart.to_string();
        // The users-permissions plugin answers with a bare array
        let users: Vec<UserRecord> = Self::send_json(
            self.request(Method::GET, "users")
                .query(&[("filters[cart][$eq]", cart_filter.as_str())]),
        )
        .await?;
        Ok(users.into_iter().next().map(|u| Account {
            id: AccountId(u.id),
            email: u.email,
        }))
    }

    async fn update_account_email(
        &self,
        account: AccountId,
        email: &str,
    ) -> Result<(), BackendError> {
        Self::send(
            self.request(Method::PUT, &format!("users/{account}"))
                .json(&json!({ "email": email })),
        )
        .await
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct Collection<T> {
    data: Vec<Entry<T>>,
}

#[derive(Debug, Deserialize)]
struct Single<T> {
    data: Entry<T>,
}

#[derive(Debug, Deserialize)]
struct Entry<T> {
    id: u64,
    attributes: T,
}

#[derive(Debug, Deserialize)]
struct Relation<T> {
    data: Option<Entry<T>>,
}

#[derive(Debug, Deserialize)]
struct ProductAttributes {
    title: String,
    #[serde(default)]
    description: Option<String>,
    price: f64,
    #[serde(default)]
    picture: Option<Relation<MediaAttributes>>,
}

#[derive(Debug, Deserialize)]
struct MediaAttributes {
    url: String,
}

#[derive(Debug, Deserialize)]
struct CartAttributes {
    #[serde(default)]
    cartproducts: Option<Collection<CartProductAttributes>>,
}

#[derive(Debug, Deserialize)]
struct CartProductAttributes {
    amount: u32,
    #[serde(default)]
    product: Option<Relation<ProductAttributes>>,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    id: u64,
    #[serde(default)]
    email: Option<String>,
}

impl Entry<ProductAttributes> {
    fn into_product(self) -> Result<Product, BackendError> {
        let price = Money::from_decimal(self.attributes.price).ok_or_else(|| {
            BackendError::decode(format!(
                "product {} has invalid price {}",
                self.id, self.attributes.price
            ))
        })?;
        Ok(Product {
            id: ProductId(self.id),
            title: self.attributes.title,
            description: self.attributes.description.unwrap_or_default(),
            price,
            picture: self
                .attributes
                .picture
                .and_then(|p| p.data)
                .map(|media| PictureRef(media.attributes.url)),
        })
    }
}

impl Entry<CartAttributes> {
    fn into_cart(self, owner: &UserId) -> Cart {
        let cart_id = CartId(self.id);
        let line_items = self
            .attributes
            .cartproducts
            .map(|c| c.data)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|entry| {
                let Some(product) = entry.attributes.product.and_then(|p| p.data) else {
                    tracing::warn!(line_item = entry.id, cart = %cart_id, "Line item without product, skipping");
                    return None;
                };
                match product.into_product() {
                    Ok(product) => Some(CartLine {
                        id: LineItemId(entry.id),
                        product,
                        amount: entry.attributes.amount,
                    }),
                    Err(e) => {
                        tracing::warn!(line_item = entry.id, cart = %cart_id, error = %e, "Line item product unreadable, skipping");
                        None
                    }
                }
            })
            .collect();
        Cart {
            id: cart_id,
            owner: owner.clone(),
            line_items,
        }
    }
}
