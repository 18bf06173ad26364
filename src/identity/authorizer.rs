use std::sync::Arc;

use tracing::debug;

use crate::error::{AppError, AppResult};

use super::permissions::{PermissionMap, PermissionTable, PermissionValue, Role};
use super::principal::Identity;

/// Single decision point for resource/action checks.
///
/// Evaluation order:
/// 1. effective map = identity override when present (an empty override denies everything),
///    otherwise the table entry for the identity's role, otherwise the default role's entry;
/// 2. a missing resource or action denies;
/// 3. `Allow` allows, `Deny` denies, `OwnOnly` allows only when the supplied owner id equals
///    the identity's subject id, anything else denies.
#[derive(Debug, Clone)]
pub struct AccessControl {
    table: Arc<PermissionTable>,
}

impl AccessControl {
    pub fn new(table: Arc<PermissionTable>) -> Self { Self { table } }

    pub fn table(&self) -> &PermissionTable { &self.table }

    pub fn can(&self, identity: &Identity, resource: &str, action: &str, owner_id: Option<i64>) -> bool {
        let value = self
            .effective_permissions(identity)
            .get(resource)
            .and_then(|actions| actions.get(action))
            .copied();
        let allowed = match value {
            Some(PermissionValue::Allow) => true,
            Some(PermissionValue::OwnOnly) => owner_id == Some(identity.subject_id),
            Some(PermissionValue::Deny) | Some(PermissionValue::Unrecognized) | None => false,
        };
        debug!(
            target: "access",
            subject = identity.subject_id,
            role = %identity.role,
            resource,
            action,
            ?owner_id,
            ?value,
            allowed,
            "access decision"
        );
        allowed
    }

    /// `can` that turns a denial into a 403 for handlers.
    pub fn require(&self, identity: &Identity, resource: &str, action: &str, owner_id: Option<i64>) -> AppResult<()> {
        if self.can(identity, resource, action, owner_id) {
            Ok(())
        } else {
            Err(AppError::forbidden("forbidden", "insufficient permissions"))
        }
    }

    pub fn effective_permissions<'a>(&'a self, identity: &'a Identity) -> &'a PermissionMap {
        match &identity.overrides {
            Some(map) => map,
            None => self.table.entry_or_default(&identity.role),
        }
    }

    pub fn default_permissions(&self, role: &str) -> &PermissionMap { self.table.entry_or_default(role) }

    /// Convenience predicate only; admin access still flows through the table.
    pub fn is_admin(identity: &Identity) -> bool {
        Role::parse(&identity.role) == Some(Role::Admin)
    }
}

impl Default for AccessControl {
    fn default() -> Self { Self::new(Arc::new(PermissionTable::crm_defaults())) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::permissions::ActionMap;

    fn ac() -> AccessControl { AccessControl::default() }

    fn who(id: i64, role: &str) -> Identity { Identity::new(id, format!("u{}@crm.test", id), role, "U") }

    #[test]
    fn admin_allowed_by_table() {
        assert!(ac().can(&who(1, "admin"), "leads", "view", None));
        assert!(ac().can(&who(1, "Admin"), "settings", "delete", None));
    }

    #[test]
    fn own_only_compares_owner_with_subject() {
        let ac = ac();
        assert!(ac.can(&who(5, "vendedor"), "leads", "edit", Some(5)));
        assert!(!ac.can(&who(7, "vendedor"), "leads", "edit", Some(5)));
        assert!(!ac.can(&who(5, "vendedor"), "leads", "edit", None));
    }

    #[test]
    fn owner_zero_is_a_real_owner() {
        let ac = ac();
        assert!(ac.can(&who(0, "vendedor"), "leads", "edit", Some(0)));
        assert!(!ac.can(&who(1, "vendedor"), "leads", "edit", Some(0)));
    }

    #[test]
    fn missing_resource_or_action_denies() {
        let ac = ac();
        assert!(!ac.can(&who(1, "admin"), "invoices", "view", None));
        assert!(!ac.can(&who(1, "admin"), "leads", "export", None));
    }

    #[test]
    fn explicit_deny_denies() {
        assert!(!ac().can(&who(1, "vendedor"), "users", "view", None));
    }

    #[test]
    fn unknown_role_uses_default_role() {
        let ac = ac();
        assert_eq!(ac.default_permissions("unknown_role"), ac.default_permissions("comercial"));
        assert!(ac.can(&who(3, "estagiario"), "leads", "create", None));
        assert!(!ac.can(&who(3, "estagiario"), "leads", "view", None));
        assert!(ac.can(&who(3, "estagiario"), "leads", "view", Some(3)));
    }

    #[test]
    fn empty_override_denies_everything_while_absent_override_falls_back() {
        let ac = ac();
        let empty = who(1, "admin").with_overrides(Some(PermissionMap::new()));
        let absent = who(1, "admin").with_overrides(None);
        for resource in crate::identity::permissions::RESOURCES {
            assert!(!ac.can(&empty, resource, "view", Some(1)));
            assert!(ac.can(&absent, resource, "view", None));
        }
    }

    #[test]
    fn override_replaces_role_defaults_entirely() {
        let ac = ac();
        let mut tasks = ActionMap::new();
        tasks.insert("delete".into(), PermissionValue::Allow);
        let mut map = PermissionMap::new();
        map.insert("tasks".into(), tasks);
        let id = who(9, "suporte").with_overrides(Some(map));
        assert!(ac.can(&id, "tasks", "delete", None));
        // suporte's default grants leads.view, but the override has no leads row
        assert!(!ac.can(&id, "leads", "view", None));
        assert!(!ac.can(&id, "tasks", "view", None));
    }

    #[test]
    fn unrecognized_override_value_fails_closed() {
        let ac = ac();
        let map: PermissionMap = serde_json::from_str(r#"{"leads": {"view": "maybe"}}"#).unwrap();
        let id = who(1, "admin").with_overrides(Some(map));
        assert!(!ac.can(&id, "leads", "view", Some(1)));
    }

    #[test]
    fn substituted_table_is_used() {
        let table = PermissionTable::from_json(
            r#"{"default_role": "guest", "roles": {"guest": {"leads": {"view": false}}, "vendedor": {"leads": {"view": true}}}}"#,
        )
        .unwrap();
        let ac = AccessControl::new(Arc::new(table));
        assert!(ac.can(&who(1, "vendedor"), "leads", "view", None));
        assert!(!ac.can(&who(1, "admin"), "leads", "view", None));
    }

    #[test]
    fn require_maps_denial_to_forbidden() {
        let ac = ac();
        assert!(ac.require(&who(1, "admin"), "leads", "view", None).is_ok());
        let err = ac.require(&who(1, "suporte"), "leads", "delete", None).unwrap_err();
        assert_eq!(err.http_status(), 403);
    }

    #[test]
    fn is_admin_is_case_insensitive() {
        assert!(AccessControl::is_admin(&who(1, "ADMIN")));
        assert!(AccessControl::is_admin(&who(1, " admin ")));
        assert!(!AccessControl::is_admin(&who(1, "gerente")));
    }
}
