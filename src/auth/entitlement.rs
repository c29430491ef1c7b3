use crate::auth::AuthUser;
use crate::db::DbPool;
use crate::entities::branch_grant;
use crate::errors::ServiceError;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// The set of branches a user may act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entitlement {
    /// Admin tokens act on every branch.
    All,
    /// Everyone else is limited to an explicit set. May be empty, in
    /// which case every branch-scoped operation is denied.
    Branches(HashSet<Uuid>),
}

impl Entitlement {
    pub fn allows(&self, branch_id: Uuid) -> bool {
        match self {
            Entitlement::All => true,
            Entitlement::Branches(set) => set.contains(&branch_id),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Entitlement::All => false,
            Entitlement::Branches(set) => set.is_empty(),
        }
    }
}

/// Resolves and enforces branch-level access.
///
/// A user's entitlement is the union of the home branch carried in the
/// token and any explicit grants in `branch_grants`. The gate fails
/// closed: a lookup error denies access rather than allowing it.
#[derive(Clone)]
pub struct EntitlementGate {
    db: Arc<DbPool>,
}

impl EntitlementGate {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Resolve the full entitlement for a user.
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn entitled_branches(&self, user: &AuthUser) -> Result<Entitlement, ServiceError> {
        if user.is_admin() {
            return Ok(Entitlement::All);
        }

        let mut branches: HashSet<Uuid> = HashSet::new();
        if let Some(home) = user.branch_id {
            branches.insert(home);
        }

        let grants = branch_grant::Entity::find()
            .filter(branch_grant::Column::UserId.eq(user.user_id))
            .all(&*self.db)
            .await
            .map_err(|e| {
                ServiceError::Forbidden(format!("Branch entitlement lookup failed: {}", e))
            })?;

        branches.extend(grants.into_iter().map(|g| g.branch_id));

        Ok(Entitlement::Branches(branches))
    }

    /// Ensure the user may act on `branch_id`; 403 otherwise.
    pub async fn ensure_branch(&self, user: &AuthUser, branch_id: Uuid) -> Result<(), ServiceError> {
        let entitlement = self.entitled_branches(user).await?;
        if entitlement.allows(branch_id) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "User {} has no access to branch {}",
                user.user_id, branch_id
            )))
        }
    }
}
