use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;

use super::models::{Customer, Order, Product};
use super::ShopStore;

/// Shop data held in memory.
#[derive(Default)]
pub struct InMemoryShopStore {
    orders: Mutex<HashMap<i64, Order>>,
    customers: Mutex<HashMap<i64, Customer>>,
    products: Mutex<HashMap<i64, Product>>,
}

impl InMemoryShopStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_order(&self, order: Order) {
        self.orders.lock().unwrap().insert(order.id, order);
    }

    pub fn insert_customer(&self, customer: Customer) {
        self.customers.lock().unwrap().insert(customer.id, customer);
    }

    pub fn insert_product(&self, product: Product) {
        self.products.lock().unwrap().insert(product.id, product);
    }

    pub fn remove_order(&self, id: i64) -> Option<Order> {
        self.orders.lock().unwrap().remove(&id)
    }
}

impl ShopStore for InMemoryShopStore {
    fn get_order(&self, id: i64) -> Result<Option<Order>> {
        Ok(self.orders.lock().unwrap().get(&id).cloned())
    }

    fn get_customer(&self, id: i64) -> Result<Option<Customer>> {
        Ok(self.customers.lock().unwrap().get(&id).cloned())
    }

    fn get_product(&self, id: i64) -> Result<Option<Product>> {
        Ok(self.products.lock().unwrap().get(&id).cloned())
    }
}
