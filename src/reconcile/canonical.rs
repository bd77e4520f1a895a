//! Default back-office canonical schema
//!
//! Every tenant store is expected to hold these relations. Bump the version
//! whenever a relation or index is added.

use crate::domain::{CanonicalSchema, ColumnSpec, ColumnType, IndexSpec, RelationSpec, SchemaError};

pub const BACKOFFICE_SCHEMA_VERSION: u32 = 3;

fn text(name: &str) -> ColumnSpec {
    ColumnSpec::new(name, ColumnType::Text)
}

fn fk(name: &str, target: &str) -> ColumnSpec {
    ColumnSpec::new(name, ColumnType::BigInt).references(target)
}

fn money(name: &str) -> ColumnSpec {
    ColumnSpec::new(name, ColumnType::Numeric).not_null()
}

fn created_at() -> ColumnSpec {
    ColumnSpec::new("created_at", ColumnType::Timestamp)
        .not_null()
        .default_now()
}

/// The back-office relations in declaration order.
pub fn backoffice_relations() -> Vec<RelationSpec> {
    vec![
        RelationSpec::new("organizations")
            .column(ColumnSpec::id())
            .column(text("name").not_null())
            .column(text("legal_name"))
            .column(text("tax_number"))
            .column(text("base_currency").not_null())
            .column(created_at()),
        RelationSpec::new("settings")
            .column(ColumnSpec::id())
            .column(text("key").not_null())
            .column(ColumnSpec::new("value", ColumnType::Json))
            .index(IndexSpec::new("idx_settings_key", ["key"]).unique()),
        RelationSpec::new("roles")
            .column(ColumnSpec::id())
            .column(text("name").not_null())
            .column(ColumnSpec::new("permissions", ColumnType::Json))
            .index(IndexSpec::new("idx_roles_name", ["name"]).unique()),
        RelationSpec::new("users")
            .column(ColumnSpec::id())
            .column(fk("organization_id", "organizations"))
            .column(text("email").not_null())
            .column(text("display_name"))
            .column(ColumnSpec::new("active", ColumnType::Boolean).not_null())
            .column(created_at())
            .index(IndexSpec::new("idx_users_email", ["email"]).unique()),
        RelationSpec::new("user_roles")
            .column(ColumnSpec::id())
            .column(fk("user_id", "users").not_null())
            .column(fk("role_id", "roles").not_null())
            .index(IndexSpec::new("idx_user_roles_user_role", ["user_id", "role_id"]).unique()),
        RelationSpec::new("customers")
            .column(ColumnSpec::id())
            .column(text("name").not_null())
            .column(text("email"))
            .column(text("phone"))
            .column(text("billing_address"))
            .column(created_at())
            .index(IndexSpec::new("idx_customers_name", ["name"])),
        RelationSpec::new("suppliers")
            .column(ColumnSpec::id())
            .column(text("name").not_null())
            .column(text("email"))
            .column(text("payment_terms"))
            .column(created_at())
            .index(IndexSpec::new("idx_suppliers_name", ["name"])),
        RelationSpec::new("product_categories")
            .column(ColumnSpec::id())
            .column(text("name").not_null())
            .column(fk("parent_id", "product_categories")),
        RelationSpec::new("tax_rates")
            .column(ColumnSpec::id())
            .column(text("name").not_null())
            .column(ColumnSpec::new("rate", ColumnType::Numeric).not_null()),
        RelationSpec::new("products")
            .column(ColumnSpec::id())
            .column(fk("category_id", "product_categories"))
            .column(fk("tax_rate_id", "tax_rates"))
            .column(text("sku").not_null())
            .column(text("name").not_null())
            .column(money("unit_price"))
            .column(ColumnSpec::new("active", ColumnType::Boolean).not_null())
            .index(IndexSpec::new("idx_products_sku", ["sku"]).unique()),
        RelationSpec::new("warehouses")
            .column(ColumnSpec::id())
            .column(text("name").not_null())
            .column(text("address")),
        RelationSpec::new("stock_levels")
            .column(ColumnSpec::id())
            .column(fk("product_id", "products").not_null())
            .column(fk("warehouse_id", "warehouses").not_null())
            .column(ColumnSpec::new("quantity", ColumnType::Numeric).not_null())
            .index(
                IndexSpec::new("idx_stock_levels_product_warehouse", ["product_id", "warehouse_id"])
                    .unique(),
            ),
        RelationSpec::new("invoices")
            .column(ColumnSpec::id())
            .column(fk("customer_id", "customers").not_null())
            .column(text("number").not_null())
            .column(text("status").not_null())
            .column(ColumnSpec::new("issued_at", ColumnType::Timestamp))
            .column(ColumnSpec::new("due_at", ColumnType::Timestamp))
            .column(money("total"))
            .column(created_at())
            .index(IndexSpec::new("idx_invoices_number", ["number"]).unique())
            .index(IndexSpec::new("idx_invoices_customer", ["customer_id"])),
        RelationSpec::new("invoice_lines")
            .column(ColumnSpec::id())
            .column(fk("invoice_id", "invoices").not_null())
            .column(fk("product_id", "products"))
            .column(text("description"))
            .column(ColumnSpec::new("quantity", ColumnType::Numeric).not_null())
            .column(money("unit_price"))
            .index(IndexSpec::new("idx_invoice_lines_invoice", ["invoice_id"])),
        RelationSpec::new("payments")
            .column(ColumnSpec::id())
            .column(fk("invoice_id", "invoices"))
            .column(money("amount"))
            .column(text("method").not_null())
            .column(text("reference"))
            .column(ColumnSpec::new("received_at", ColumnType::Timestamp))
            .index(IndexSpec::new("idx_payments_invoice", ["invoice_id"])),
        RelationSpec::new("purchase_orders")
            .column(ColumnSpec::id())
            .column(fk("supplier_id", "suppliers").not_null())
            .column(text("number").not_null())
            .column(text("status").not_null())
            .column(money("total"))
            .column(created_at())
            .index(IndexSpec::new("idx_purchase_orders_number", ["number"]).unique()),
        RelationSpec::new("purchase_order_lines")
            .column(ColumnSpec::id())
            .column(fk("purchase_order_id", "purchase_orders").not_null())
            .column(fk("product_id", "products"))
            .column(ColumnSpec::new("quantity", ColumnType::Numeric).not_null())
            .column(money("unit_cost")),
        RelationSpec::new("expenses")
            .column(ColumnSpec::id())
            .column(fk("supplier_id", "suppliers"))
            .column(text("category").not_null())
            .column(money("amount"))
            .column(ColumnSpec::new("incurred_at", ColumnType::Timestamp))
            .column(text("notes")),
        RelationSpec::new("accounts")
            .column(ColumnSpec::id())
            .column(text("code").not_null())
            .column(text("name").not_null())
            .column(text("kind").not_null())
            .index(IndexSpec::new("idx_accounts_code", ["code"]).unique()),
        RelationSpec::new("journal_entries")
            .column(ColumnSpec::id())
            .column(text("memo"))
            .column(ColumnSpec::new("posted_at", ColumnType::Timestamp))
            .column(created_at()),
        RelationSpec::new("journal_lines")
            .column(ColumnSpec::id())
            .column(fk("entry_id", "journal_entries").not_null())
            .column(fk("account_id", "accounts").not_null())
            .column(money("debit"))
            .column(money("credit"))
            .index(IndexSpec::new("idx_journal_lines_entry", ["entry_id"])),
        RelationSpec::new("audit_log")
            .column(ColumnSpec::id())
            .column(fk("user_id", "users"))
            .column(text("action").not_null())
            .column(text("subject"))
            .column(ColumnSpec::new("detail", ColumnType::Json))
            .column(created_at())
            .index(IndexSpec::new("idx_audit_log_created_at", ["created_at"])),
    ]
}

/// The canonical back-office schema
pub fn backoffice_schema() -> Result<CanonicalSchema, SchemaError> {
    CanonicalSchema::new(BACKOFFICE_SCHEMA_VERSION, backoffice_relations())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoffice_schema_is_valid() {
        let schema = backoffice_schema().unwrap();
        assert_eq!(schema.len(), backoffice_relations().len());
        assert_eq!(schema.version(), BACKOFFICE_SCHEMA_VERSION);
    }

    #[test]
    fn test_referenced_relations_are_created_first() {
        let schema = backoffice_schema().unwrap();
        let position = |name: &str| {
            schema
                .ordered()
                .iter()
                .position(|r| r.name == name)
                .unwrap()
        };

        for relation in schema.ordered() {
            for dependency in relation.dependencies() {
                assert!(
                    position(dependency) < position(&relation.name),
                    "{dependency} must precede {}",
                    relation.name
                );
            }
        }
    }
}
