//! Shop-side entities read by the sync workflows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Billing address as stored by the shop, on orders and on customers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingAddress {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address_1: String,
    pub address_2: String,
    pub city: String,
    pub postcode: String,
    /// ISO country code, as typed by the shop (case not normalized).
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    /// None when the product has been deleted since the order was placed.
    #[serde(default)]
    pub product_id: Option<i64>,
    pub name: String,
    pub quantity: i64,
    /// Line total excluding tax.
    pub total: f64,
    /// Tax charged on the line subtotal.
    #[serde(default)]
    pub subtotal_tax: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    /// Display number, used as the invoice and payment key on the CRM side.
    pub number: String,
    /// Owning customer, 0 for guest checkouts.
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub billing: BillingAddress,
    pub total: f64,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub date_created: Option<DateTime<Utc>>,
}

impl Order {
    pub fn is_guest(&self) -> bool {
        self.user_id == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub billing: BillingAddress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub short_description: String,
    /// Price excluding tax.
    pub price: f64,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Which address a customer edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    Billing,
    Shipping,
}

impl AddressType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressType::Billing => "billing",
            AddressType::Shipping => "shipping",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "billing" => Some(AddressType::Billing),
            "shipping" => Some(AddressType::Shipping),
            _ => None,
        }
    }
}

impl std::fmt::Display for AddressType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_order_deserializes_with_defaults() {
        let order: Order = serde_json::from_value(json!({
            "id": 12,
            "number": "1012",
            "total": 24.0
        }))
        .unwrap();

        assert!(order.is_guest());
        assert!(order.items.is_empty());
        assert_eq!(order.billing, BillingAddress::default());
    }

    #[test]
    fn test_address_type_strings() {
        assert_eq!(AddressType::from_str("billing"), Some(AddressType::Billing));
        assert_eq!(AddressType::from_str("shipping"), Some(AddressType::Shipping));
        assert_eq!(AddressType::from_str("home"), None);
        assert_eq!(
            serde_json::to_value(AddressType::Billing).unwrap(),
            json!("billing")
        );
    }
}
