//! Shared constants for end-to-end tests
//!
//! Ids of the seeded shop entities and the guids the fake Koban hands out.

// ============================================================================
// Shop entities
// ============================================================================

/// Registered customer with a billing address
pub const CUSTOMER_ID: i64 = 7;

/// Order placed by [`CUSTOMER_ID`]
pub const ORDER_ID: i64 = 101;

/// Order placed without an account
pub const GUEST_ORDER_ID: i64 = 102;

/// Product sold in both orders
pub const PRODUCT_ID: i64 = 55;

/// Category of [`PRODUCT_ID`], mapped to [`CATEGORY_CODE`]
pub const CATEGORY_ID: i64 = 3;
pub const CATEGORY_CODE: &str = "CAT-BOOKS";

/// Id no fixture uses
pub const MISSING_ID: i64 = 9999;

// ============================================================================
// Koban
// ============================================================================

pub const KOBAN_URL: &str = "https://koban.test/api/v1";

pub const THIRD_GUID: &str = "third-guid-1";
pub const INVOICE_GUID: &str = "invoice-guid-1";
pub const PAYMENT_GUID: &str = "payment-guid-1";
pub const PRODUCT_GUID: &str = "product-guid-1";

pub const PDF_BYTES: &[u8] = b"%PDF-1.7 test invoice";
