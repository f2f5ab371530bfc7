//! Builders for the JSON payloads Koban expects.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::config::SerializerSettings;
use crate::shop::{BillingAddress, Order, Product};

/// VAT rate applied to taxed lines and to products.
pub const DEFAULT_VAT_RATE: f64 = 20.0;

const FALLBACK_THIRD_TYPE: &str = "Particuliers (Autre)";

/// Koban third type for a billing country.
pub fn third_type_code(country: &str) -> &'static str {
    match country.to_uppercase().as_str() {
        "FR" => "P",
        "BE" => "PB",
        "CH" => "PS",
        "LX" => "PLX",
        _ => FALLBACK_THIRD_TYPE,
    }
}

/// Koban date format (UTC, second precision).
pub fn koban_date(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub struct KobanSerializer {
    settings: SerializerSettings,
}

impl KobanSerializer {
    pub fn new(settings: SerializerSettings) -> Self {
        Self { settings }
    }

    fn assigned_to(&self) -> Option<Value> {
        self.settings
            .assigned_to
            .as_ref()
            .map(|name| json!({ "FullName": name }))
    }

    /// Third (account) payload built from billing data.
    ///
    /// `guid` turns the payload into an update of a known third.
    pub fn third(&self, billing: &BillingAddress, guid: Option<&str>) -> Value {
        let mut label = format!("{} {}", billing.first_name, billing.last_name)
            .trim()
            .to_string();
        if label.is_empty() {
            label = if billing.email.is_empty() {
                "Guest".to_string()
            } else {
                billing.email.clone()
            };
        }

        let country = if billing.country.is_empty() {
            "FR".to_string()
        } else {
            billing.country.to_uppercase()
        };
        let address = json!({
            "Name": billing.last_name,
            "FirstName": billing.first_name,
            "Phone": billing.phone,
            "Street": format!("{} {}", billing.address_1, billing.address_2).trim(),
            "ZipCode": billing.postcode,
            "City": billing.city,
            "Country": country,
        });

        let mut payload = Map::new();
        payload.insert("Label".into(), json!(label));
        payload.insert("FirstName".into(), json!(billing.first_name));
        payload.insert(
            "Status".into(),
            json!({ "Code": self.settings.third_status_code }),
        );
        payload.insert(
            "Type".into(),
            json!({ "Code": third_type_code(&billing.country) }),
        );
        payload.insert("Address".into(), address.clone());
        payload.insert("InvoiceAddress".into(), address);
        payload.insert("EMail".into(), json!(billing.email));
        payload.insert("Optin".into(), json!(true));
        if let Some(assigned_to) = self.assigned_to() {
            payload.insert("AssignedTo".into(), assigned_to);
        }
        if let Some(guid) = guid {
            payload.insert("Guid".into(), json!(guid));
        }
        Value::Object(payload)
    }

    /// Invoice payload (a one-element array) for a paid order.
    ///
    /// `product_guids` maps shop product ids to Koban guids for the lines
    /// whose product is already synced.
    pub fn invoice(
        &self,
        order: &Order,
        third_guid: &str,
        product_guids: &HashMap<i64, String>,
        at: DateTime<Utc>,
    ) -> Value {
        let lines: Vec<Value> = order
            .items
            .iter()
            .map(|item| {
                let vat = if item.subtotal_tax > 0.0 {
                    DEFAULT_VAT_RATE
                } else {
                    0.0
                };
                let ht = item.total;
                let unit_price = if item.quantity > 0 {
                    round2(ht / item.quantity as f64)
                } else {
                    ht
                };

                let mut line = Map::new();
                if let Some(guid) = item.product_id.and_then(|id| product_guids.get(&id)) {
                    line.insert("Product".into(), json!({ "Guid": guid }));
                }
                line.insert("Label".into(), json!(item.name));
                line.insert("Quantity".into(), json!(item.quantity));
                line.insert("Ht".into(), json!(ht));
                line.insert("Ttc".into(), json!(round2(ht * (1.0 + vat / 100.0))));
                line.insert("Vat".into(), json!(vat));
                line.insert("UnitPrice".into(), json!(unit_price));
                Value::Object(line)
            })
            .collect();

        let mut invoice = Map::new();
        invoice.insert(
            "Number".into(),
            json!(format!("{}{}", self.settings.invoice_prefix, order.number)),
        );
        invoice.insert("InvoiceDate".into(), json!(koban_date(at)));
        invoice.insert("DueDate".into(), json!(""));
        invoice.insert("Status".into(), json!("PENDING"));
        invoice.insert("Third".into(), json!({ "Guid": third_guid }));
        invoice.insert("Lines".into(), Value::Array(lines));
        invoice.insert(
            "PaymentMode".into(),
            json!({ "Code": self.settings.payment_mode_code }),
        );
        if let Some(assigned_to) = self.assigned_to() {
            invoice.insert("AssignedTo".into(), assigned_to);
        }
        Value::Array(vec![Value::Object(invoice)])
    }

    /// Payment payload (a one-element array) settling an invoice.
    pub fn payment(&self, order: &Order, invoice_guid: &str, at: DateTime<Utc>) -> Value {
        json!([{
            "Extcode": format!("{}{}", self.settings.payment_prefix, order.number),
            "Invoice": { "Guid": invoice_guid },
            "PaymentDate": koban_date(at),
            "Ttc": order.total,
            "ModeRglt": { "Code": self.settings.payment_mode_code },
        }])
    }

    /// Product payload. Carries `Guid` when the product is known to Koban,
    /// a `Reference` built from the shop id otherwise.
    pub fn product(
        &self,
        product: &Product,
        category_code: Option<&str>,
        guid: Option<&str>,
    ) -> Value {
        let mut payload = Map::new();
        payload.insert("Label".into(), json!(product.name));
        payload.insert("Comments".into(), json!(product.short_description));
        payload.insert("Catproduct".into(), json!({ "Reference": category_code }));
        payload.insert("Ht".into(), json!(product.price));
        payload.insert("Vat".into(), json!(DEFAULT_VAT_RATE));
        payload.insert(
            "Ttc".into(),
            json!(round2(product.price * (1.0 + DEFAULT_VAT_RATE / 100.0))),
        );
        payload.insert("IsSelling".into(), json!(true));
        payload.insert("VatUpdatable".into(), json!(true));
        payload.insert("IsManufactured".into(), json!(true));
        payload.insert("Obsolete".into(), json!(false));
        if let Some(url) = &product.permalink {
            payload.insert("eShopURL".into(), json!(url));
        }
        if let Some(url) = &product.image_url {
            payload.insert("ImageUrl".into(), json!(url));
        }
        match guid {
            Some(guid) => {
                payload.insert("Guid".into(), json!(guid));
            }
            None => {
                payload.insert(
                    "Reference".into(),
                    json!(format!("{}{}", self.settings.product_prefix, product.id)),
                );
            }
        }
        Value::Object(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shop::OrderItem;
    use chrono::TimeZone;

    fn serializer() -> KobanSerializer {
        KobanSerializer::new(SerializerSettings {
            invoice_prefix: "WC-".to_string(),
            payment_prefix: "PAY-".to_string(),
            ..Default::default()
        })
    }

    fn billing() -> BillingAddress {
        BillingAddress {
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            email: "jane@example.com".into(),
            phone: "0601020304".into(),
            address_1: "1 rue de la Paix".into(),
            address_2: "".into(),
            city: "Paris".into(),
            postcode: "75002".into(),
            country: "fr".into(),
        }
    }

    fn order() -> Order {
        Order {
            id: 10,
            number: "1010".into(),
            user_id: 3,
            billing: billing(),
            total: 36.0,
            items: vec![
                OrderItem {
                    product_id: Some(7),
                    name: "Mug".into(),
                    quantity: 3,
                    total: 10.0,
                    subtotal_tax: 2.0,
                },
                OrderItem {
                    product_id: Some(8),
                    name: "Sticker".into(),
                    quantity: 0,
                    total: 5.0,
                    subtotal_tax: 0.0,
                },
            ],
            date_created: None,
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
    }

    #[test]
    fn test_third_payload() {
        let payload = serializer().third(&billing(), None);

        assert_eq!(payload["Label"], "Jane Doe");
        assert_eq!(payload["Status"]["Code"], "PTC");
        assert_eq!(payload["Type"]["Code"], "P");
        assert_eq!(payload["Address"]["Street"], "1 rue de la Paix");
        assert_eq!(payload["Address"]["Country"], "FR");
        assert_eq!(payload["Address"], payload["InvoiceAddress"]);
        assert_eq!(payload["EMail"], "jane@example.com");
        assert_eq!(payload["Optin"], true);
        assert!(payload.get("Guid").is_none());
        assert!(payload.get("AssignedTo").is_none());
    }

    #[test]
    fn test_third_label_falls_back_to_email_then_guest() {
        let mut billing = BillingAddress {
            email: "anon@example.com".into(),
            ..Default::default()
        };
        assert_eq!(serializer().third(&billing, None)["Label"], "anon@example.com");

        billing.email.clear();
        let payload = serializer().third(&billing, None);
        assert_eq!(payload["Label"], "Guest");
        assert_eq!(payload["Address"]["Country"], "FR");
    }

    #[test]
    fn test_third_update_carries_guid_and_assignee() {
        let serializer = KobanSerializer::new(SerializerSettings {
            assigned_to: Some("Sales Team".into()),
            ..Default::default()
        });

        let payload = serializer.third(&billing(), Some("third-1"));

        assert_eq!(payload["Guid"], "third-1");
        assert_eq!(payload["AssignedTo"]["FullName"], "Sales Team");
    }

    #[test]
    fn test_third_type_code_by_country() {
        assert_eq!(third_type_code("FR"), "P");
        assert_eq!(third_type_code("be"), "PB");
        assert_eq!(third_type_code("CH"), "PS");
        assert_eq!(third_type_code("LX"), "PLX");
        assert_eq!(third_type_code("DE"), "Particuliers (Autre)");
        assert_eq!(third_type_code(""), "Particuliers (Autre)");
    }

    #[test]
    fn test_invoice_payload() {
        let guids = HashMap::from([(7, "prod-7".to_string())]);
        let payload = serializer().invoice(&order(), "third-1", &guids, at());

        let invoice = &payload[0];
        assert_eq!(payload.as_array().unwrap().len(), 1);
        assert_eq!(invoice["Number"], "WC-1010");
        assert_eq!(invoice["InvoiceDate"], "2024-03-05T14:07:09Z");
        assert_eq!(invoice["DueDate"], "");
        assert_eq!(invoice["Status"], "PENDING");
        assert_eq!(invoice["Third"]["Guid"], "third-1");
        assert_eq!(invoice["PaymentMode"]["Code"], "CB");

        let taxed = &invoice["Lines"][0];
        assert_eq!(taxed["Product"]["Guid"], "prod-7");
        assert_eq!(taxed["Vat"], 20.0);
        assert_eq!(taxed["Ttc"], 12.0);
        assert_eq!(taxed["UnitPrice"], 3.33);

        let untaxed = &invoice["Lines"][1];
        assert!(untaxed.get("Product").is_none());
        assert_eq!(untaxed["Vat"], 0.0);
        assert_eq!(untaxed["Ttc"], 5.0);
        // Zero quantity keeps the line total as unit price
        assert_eq!(untaxed["UnitPrice"], 5.0);
    }

    #[test]
    fn test_payment_payload() {
        let payload = serializer().payment(&order(), "inv-1", at());

        assert_eq!(payload[0]["Extcode"], "PAY-1010");
        assert_eq!(payload[0]["Invoice"]["Guid"], "inv-1");
        assert_eq!(payload[0]["PaymentDate"], "2024-03-05T14:07:09Z");
        assert_eq!(payload[0]["Ttc"], 36.0);
        assert_eq!(payload[0]["ModeRglt"]["Code"], "CB");
    }

    #[test]
    fn test_product_create_and_update() {
        let product = Product {
            id: 7,
            name: "Mug".into(),
            short_description: "Ceramic".into(),
            price: 9.99,
            category_id: Some(2),
            permalink: Some("https://shop.test/mug".into()),
            image_url: None,
        };

        let create = serializer().product(&product, Some("CAT-MUG"), None);
        assert_eq!(create["Reference"], "WKS-7");
        assert!(create.get("Guid").is_none());
        assert_eq!(create["Catproduct"]["Reference"], "CAT-MUG");
        assert_eq!(create["Ttc"], 11.99);
        assert_eq!(create["eShopURL"], "https://shop.test/mug");
        assert!(create.get("ImageUrl").is_none());
        assert_eq!(create["Obsolete"], false);

        let update = serializer().product(&product, None, Some("prod-7"));
        assert_eq!(update["Guid"], "prod-7");
        assert!(update.get("Reference").is_none());
        assert_eq!(update["Catproduct"]["Reference"], Value::Null);
    }
}
