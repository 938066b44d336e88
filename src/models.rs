//! Wire types for the storefront API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Who a session belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "Option<String>")]
pub enum Role {
    Admin,
    #[default]
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Client => "client",
        }
    }
}

impl From<String> for Role {
    /// Anything other than "admin" is treated as a regular customer
    fn from(s: String) -> Self {
        if s.eq_ignore_ascii_case("admin") {
            Role::Admin
        } else {
            Role::Client
        }
    }
}

impl From<Option<String>> for Role {
    /// A null or missing role is a regular customer
    fn from(s: Option<String>) -> Self {
        s.map(Role::from).unwrap_or_default()
    }
}

/// The authenticated identity persisted under the `user` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: u64,
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logged_in_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Catalogue entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "de_decimal")]
    pub price: f64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub stock: Option<i64>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub rating: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    #[serde(alias = "item")]
    pub item_id: u64,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "de_decimal", alias = "total_price")]
    pub total: f64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub items: Vec<OrderLine>,
}

/// Body of `POST /store/create-order`
#[derive(Debug, Clone, Serialize)]
pub struct NewOrder {
    pub items: Vec<OrderLine>,
    pub shipping_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charity_id: Option<u64>,
}

/// Order lifecycle values accepted by the back office
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "shipped" => Some(Self::Shipped),
            "delivered" => Some(Self::Delivered),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Message left through the contact form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsletterSubscription {
    pub id: u64,
    pub email: String,
    #[serde(default)]
    pub subscribed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charity {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Outcome of `POST /payments/pay/{id}/`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    #[serde(default)]
    pub order_id: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Money fields arrive either as JSON numbers or as decimal strings ("199.00")
fn de_decimal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(de_opt_decimal(deserializer)?.unwrap_or_default())
}

fn de_opt_decimal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Decimal {
        Number(f64),
        Text(String),
    }

    match Option::<Decimal>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Decimal::Number(n)) => Ok(Some(n)),
        Some(Decimal::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Decimal::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid decimal '{}'", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_parsing() {
        let id: Identity =
            serde_json::from_value(json!({"id": 1, "email": "a@b.c", "role": "ADMIN"})).unwrap();
        assert!(id.is_admin());

        let id: Identity =
            serde_json::from_value(json!({"id": 2, "email": "c@d.e", "role": "customer"})).unwrap();
        assert_eq!(id.role, Role::Client);

        let id: Identity = serde_json::from_value(json!({"id": 3, "email": "x@y.z"})).unwrap();
        assert_eq!(id.role, Role::Client);
        assert_eq!(serde_json::to_value(Role::Admin).unwrap(), json!("admin"));
    }

    #[test]
    fn test_null_role_is_client() {
        let users: Vec<User> = serde_json::from_value(json!([
            {"id": 7, "email": "ana@example.com", "role": "admin"},
            {"id": 8, "email": "bo@example.com", "role": null}
        ]))
        .unwrap();
        assert_eq!(users[0].role, Role::Admin);
        assert_eq!(users[1].role, Role::Client);
    }

    #[test]
    fn test_item_decimal_price() {
        let item: Item = serde_json::from_value(json!({
            "id": 4,
            "name": "Oak table",
            "price": "349.90",
            "rating": 4.5
        }))
        .unwrap();
        assert!((item.price - 349.90).abs() < f64::EPSILON);
        assert_eq!(item.rating, Some(4.5));

        let item: Item =
            serde_json::from_value(json!({"id": 5, "name": "Stool", "price": 20, "rating": null}))
                .unwrap();
        assert_eq!(item.price, 20.0);
        assert!(item.rating.is_none());

        let bad = serde_json::from_value::<Item>(json!({"id": 6, "name": "X", "price": "abc"}));
        assert!(bad.is_err());
    }

    #[test]
    fn test_order_aliases() {
        let order: Order = serde_json::from_value(json!({
            "id": 9,
            "status": "pending",
            "total_price": "99.50",
            "items": [{"item": 4, "quantity": 2}, {"item_id": 5}]
        }))
        .unwrap();
        assert_eq!(order.total, 99.5);
        assert_eq!(order.items[0].item_id, 4);
        assert_eq!(order.items[1].quantity, 1);
    }

    #[test]
    fn test_order_status() {
        assert_eq!(OrderStatus::from_str("Shipped"), Some(OrderStatus::Shipped));
        assert_eq!(OrderStatus::from_str("canceled"), Some(OrderStatus::Cancelled));
        assert_eq!(OrderStatus::from_str("lost"), None);
        assert_eq!(OrderStatus::Delivered.as_str(), "delivered");
    }
}
