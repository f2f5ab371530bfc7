//! Shop entities seeded into every harness.

use koban_sync::shop::{BillingAddress, Customer, Order, OrderItem, Product};

use super::constants::*;

pub fn billing_address() -> BillingAddress {
    BillingAddress {
        first_name: "Jane".into(),
        last_name: "Doe".into(),
        email: "jane@example.com".into(),
        phone: "+33 1 23 45 67 89".into(),
        address_1: "12 rue des Lilas".into(),
        address_2: "Bat. B".into(),
        city: "Lyon".into(),
        postcode: "69003".into(),
        country: "fr".into(),
    }
}

pub fn customer() -> Customer {
    Customer {
        id: CUSTOMER_ID,
        email: "jane@example.com".into(),
        billing: billing_address(),
    }
}

pub fn product() -> Product {
    Product {
        id: PRODUCT_ID,
        name: "Field guide".into(),
        short_description: "Pocket edition".into(),
        price: 20.0,
        category_id: Some(CATEGORY_ID),
        permalink: Some("https://shop.test/field-guide".into()),
        image_url: None,
    }
}

fn items() -> Vec<OrderItem> {
    vec![OrderItem {
        product_id: Some(PRODUCT_ID),
        name: "Field guide".into(),
        quantity: 2,
        total: 40.0,
        subtotal_tax: 8.0,
    }]
}

pub fn registered_order() -> Order {
    Order {
        id: ORDER_ID,
        number: "1101".into(),
        user_id: CUSTOMER_ID,
        billing: billing_address(),
        total: 48.0,
        items: items(),
        date_created: None,
    }
}

pub fn guest_order() -> Order {
    let mut billing = billing_address();
    billing.first_name = "Guest".into();
    billing.last_name = "Buyer".into();
    billing.email = "guest@example.com".into();

    Order {
        id: GUEST_ORDER_ID,
        number: "1102".into(),
        user_id: 0,
        billing,
        total: 48.0,
        items: items(),
        date_created: None,
    }
}
