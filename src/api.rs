//! Typed storefront endpoints on top of [`HttpClient`].

use crate::cache::ReferenceSource;
use crate::error::ApiError;
use crate::http::{HttpClient, Method};
use crate::models::{
    Charity, Contact, Identity, Item, NewOrder, NewsletterSubscription, Order, OrderStatus,
    PaymentReceipt, Role, User,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

pub struct StorefrontApi {
    http: HttpClient,
}

impl StorefrontApi {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Exchange credentials for an identity and token
    pub fn login(&self, email: &str, password: &str) -> Result<(Identity, String), ApiError> {
        let body = json!({ "email": email, "password": password });
        let value = self
            .http
            .call_with_auth_fallback("/login/", Method::Post, Some(&body), None)?;
        parse_auth(&value, email)
    }

    pub fn signup(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<(Identity, String), ApiError> {
        let body = json!({ "name": name, "email": email, "password": password });
        let value = self
            .http
            .call_with_auth_fallback("/signup/", Method::Post, Some(&body), None)?;
        parse_auth(&value, email)
    }

    pub fn list_items(&self, token: Option<&str>) -> Result<Vec<Item>, ApiError> {
        self.get_list("/store/all-items", &["items"], token)
    }

    pub fn list_users(&self, token: Option<&str>) -> Result<Vec<User>, ApiError> {
        self.get_list("/all-users", &["users"], token)
    }

    pub fn list_orders(&self, token: Option<&str>) -> Result<Vec<Order>, ApiError> {
        self.get_list("/store/all-orders", &["orders"], token)
    }

    pub fn create_order(&self, order: &NewOrder, token: Option<&str>) -> Result<Value, ApiError> {
        let body = serde_json::to_value(order).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.http
            .call_with_auth_fallback("/store/create-order", Method::Post, Some(&body), token)
    }

    /// Change an order's status. Callers holding a [`crate::cache::ReferenceCache`] should refresh it afterwards.
    pub fn update_order_status(
        &self,
        order_id: u64,
        status: OrderStatus,
        token: Option<&str>,
    ) -> Result<Value, ApiError> {
        let body = json!({ "status": status.as_str() });
        self.http.call_with_auth_fallback(
            &format!("/store/update-order/{}/", order_id),
            Method::Patch,
            Some(&body),
            token,
        )
    }

    /// Rate a catalogue item; a second rating fails with `ErrorKind::AlreadyDone`
    pub fn rate_item(&self, item_id: u64, rating: u8, token: Option<&str>) -> Result<Value, ApiError> {
        if !(1..=5).contains(&rating) {
            return Err(ApiError::ValidationFailed {
                message: format!("Rating must be between 1 and 5, got {}", rating),
                fields: Default::default(),
            });
        }
        let body = json!({ "rating": rating });
        self.http.call_with_auth_fallback(
            &format!("/store/rate-item/{}/", item_id),
            Method::Post,
            Some(&body),
            token,
        )
    }

    pub fn pay(&self, order_id: u64, token: Option<&str>) -> Result<PaymentReceipt, ApiError> {
        let value = self.http.call_with_auth_fallback(
            &format!("/payments/pay/{}/", order_id),
            Method::Post,
            None,
            token,
        )?;
        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub fn list_contacts(&self, token: Option<&str>) -> Result<Vec<Contact>, ApiError> {
        self.get_list("/contacts/", &["contacts"], token)
    }

    pub fn list_newsletters(
        &self,
        token: Option<&str>,
    ) -> Result<Vec<NewsletterSubscription>, ApiError> {
        self.get_list("/newsletters/", &["newsletters", "subscribers"], token)
    }

    pub fn subscribe_newsletter(&self, email: &str) -> Result<Value, ApiError> {
        let body = json!({ "email": email });
        self.http
            .call_with_auth_fallback("/newsletters/subscribe/", Method::Post, Some(&body), None)
    }

    pub fn list_charities(&self, token: Option<&str>) -> Result<Vec<Charity>, ApiError> {
        self.get_list("/charities/", &["charities"], token)
    }

    fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        names: &[&str],
        token: Option<&str>,
    ) -> Result<Vec<T>, ApiError> {
        let value = self
            .http
            .call_with_auth_fallback(path, Method::Get, None, token)?;
        decode_list(value, names)
    }
}

impl ReferenceSource for StorefrontApi {
    fn fetch_items(&self, token: Option<&str>) -> Result<Vec<Item>, ApiError> {
        self.list_items(token)
    }

    fn fetch_users(&self, token: Option<&str>) -> Result<Vec<User>, ApiError> {
        self.list_users(token)
    }

    fn fetch_orders(&self, token: Option<&str>) -> Result<Vec<Order>, ApiError> {
        self.list_orders(token)
    }
}

/// Accept a bare array or one wrapped as `data`, `results`, or a resource-named key
fn decode_list<T: DeserializeOwned>(value: Value, names: &[&str]) -> Result<Vec<T>, ApiError> {
    let list = match value {
        Value::Array(_) => value,
        Value::Object(mut obj) => ["data", "results"]
            .iter()
            .chain(names.iter())
            .find_map(|key| obj.remove(*key).filter(Value::is_array))
            .ok_or_else(|| ApiError::Decode("expected a list in response".to_string()))?,
        _ => return Err(ApiError::Decode("expected a list in response".to_string())),
    };
    serde_json::from_value(list).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Pull token and identity out of a login/signup response.
///
/// The identity may be nested under `user` or sit at the top level; the role
/// comes from `role` or from the `is_staff`/`is_admin`/`is_superuser` flags.
fn parse_auth(value: &Value, fallback_email: &str) -> Result<(Identity, String), ApiError> {
    let token = ["token", "key", "access"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Decode("login response carried no token".to_string()))?
        .to_string();

    let user = value
        .get("user")
        .filter(|u| u.is_object())
        .unwrap_or(value);

    let role = match user.get("role").and_then(Value::as_str) {
        Some(role) => Role::from(role.to_string()),
        None => {
            let flagged = ["is_staff", "is_admin", "is_superuser"]
                .iter()
                .any(|key| user.get(*key).and_then(Value::as_bool) == Some(true));
            if flagged {
                Role::Admin
            } else {
                Role::Client
            }
        }
    };

    let identity = Identity {
        id: user
            .get("id")
            .or_else(|| user.get("user_id"))
            .and_then(Value::as_u64)
            .unwrap_or_default(),
        email: user
            .get("email")
            .and_then(Value::as_str)
            .unwrap_or(fallback_email)
            .to_string(),
        role,
        name: user
            .get("name")
            .or_else(|| user.get("username"))
            .and_then(Value::as_str)
            .map(String::from),
        logged_in_at: None,
    };
    Ok((identity, token))
}
