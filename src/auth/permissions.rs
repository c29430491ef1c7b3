use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Permission constants used across the route table and middleware.
pub mod consts {
    pub const ORDERS_READ: &str = "orders:read";
    pub const ORDERS_CREATE: &str = "orders:create";
    pub const ORDERS_UPDATE: &str = "orders:update";
    pub const ORDERS_CANCEL: &str = "orders:cancel";
    pub const ORDERS_CLOSE: &str = "orders:close";

    pub const INVENTORY_READ: &str = "inventory:read";
    pub const INVENTORY_RECORD: &str = "inventory:record";

    pub const STOCKTAKES_READ: &str = "stocktakes:read";
    pub const STOCKTAKES_CREATE: &str = "stocktakes:create";
    pub const STOCKTAKES_APPROVE: &str = "stocktakes:approve";

    pub const TABLES_READ: &str = "tables:read";
    pub const BRANCHES_MANAGE: &str = "branches:manage";
    pub const REALTIME_SUBSCRIBE: &str = "realtime:subscribe";

    pub const ADMIN_ALL: &str = "admin:*";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub name: String,
    pub description: String,
}

lazy_static! {
    /// Registry of all known permissions, keyed by name.
    pub static ref PERMISSIONS: HashMap<&'static str, Permission> = {
        let mut m = HashMap::new();
        let mut add = |name: &'static str, description: &str| {
            m.insert(
                name,
                Permission {
                    name: name.to_string(),
                    description: description.to_string(),
                },
            );
        };
        add(consts::ORDERS_READ, "View orders and order items");
        add(consts::ORDERS_CREATE, "Submit new orders");
        add(consts::ORDERS_UPDATE, "Update open orders and record payments");
        add(consts::ORDERS_CANCEL, "Cancel orders with a reason");
        add(consts::ORDERS_CLOSE, "Close fully paid orders");
        add(consts::INVENTORY_READ, "View inventory balances and movements");
        add(consts::INVENTORY_RECORD, "Record inventory transactions");
        add(consts::STOCKTAKES_READ, "View stocktakes");
        add(consts::STOCKTAKES_CREATE, "Create draft stocktakes");
        add(consts::STOCKTAKES_APPROVE, "Approve stocktakes and post adjustments");
        add(consts::TABLES_READ, "View dining tables");
        add(consts::BRANCHES_MANAGE, "Manage branch access grants");
        add(consts::REALTIME_SUBSCRIBE, "Subscribe to realtime branch events");
        add(consts::ADMIN_ALL, "Full administrative access");
        m
    };
}

/// Permission implication rules shared by middleware and handlers.
pub struct PermissionService;

impl PermissionService {
    /// Returns true when `granted` satisfies `required`.
    ///
    /// `*` and `admin:*` satisfy everything; `resource:*` satisfies any
    /// action on that resource; otherwise an exact match is needed.
    pub fn is_permission_implied(granted: &str, required: &str) -> bool {
        if granted == required {
            return true;
        }
        if granted == "*" || granted == consts::ADMIN_ALL {
            return true;
        }
        if let Some(resource) = granted.strip_suffix(":*") {
            if let Some((req_resource, _)) = required.split_once(':') {
                return resource == req_resource;
            }
        }
        false
    }

    /// Returns true when any permission in `granted` satisfies `required`.
    pub fn any_implies(granted: &[String], required: &str) -> bool {
        granted
            .iter()
            .any(|g| Self::is_permission_implied(g, required))
    }
}
