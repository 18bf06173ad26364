//! Permission values, per-role permission maps and the role table.
//!
//! A table maps `role -> resource -> action -> PermissionValue`. The table is built once at
//! startup (either [`PermissionTable::crm_defaults`] or a JSON file) and then shared read-only.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{AppError, AppResult};

/// Outcome stored in a permission map cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionValue {
    Allow,
    Deny,
    OwnOnly,
    /// A value read from JSON that is none of the above. Always denies.
    Unrecognized,
}

impl PermissionValue {
    fn from_json(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Bool(true) => PermissionValue::Allow,
            serde_json::Value::Bool(false) => PermissionValue::Deny,
            serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "allow" | "all" => PermissionValue::Allow,
                "deny" | "none" => PermissionValue::Deny,
                "own" | "own_only" | "ownonly" => PermissionValue::OwnOnly,
                _ => PermissionValue::Unrecognized,
            },
            _ => PermissionValue::Unrecognized,
        }
    }
}

impl Serialize for PermissionValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PermissionValue::Allow => serializer.serialize_bool(true),
            PermissionValue::Deny => serializer.serialize_bool(false),
            PermissionValue::OwnOnly => serializer.serialize_str("own"),
            PermissionValue::Unrecognized => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for PermissionValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = serde_json::Value::deserialize(deserializer)?;
        Ok(PermissionValue::from_json(&v))
    }
}

/// action -> value for a single resource
pub type ActionMap = BTreeMap<String, PermissionValue>;

/// resource -> action -> value; the shape of one role's entry and of a user override.
pub type PermissionMap = BTreeMap<String, ActionMap>;

/// Known CRM roles. Role strings outside this set are still accepted on tokens and resolve
/// to the table's default role when evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Gerente,
    Vendedor,
    Comercial,
    Suporte,
    Financeiro,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Admin,
        Role::Gerente,
        Role::Vendedor,
        Role::Comercial,
        Role::Suporte,
        Role::Financeiro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Gerente => "gerente",
            Role::Vendedor => "vendedor",
            Role::Comercial => "comercial",
            Role::Suporte => "suporte",
            Role::Financeiro => "financeiro",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        let lower = s.trim().to_ascii_lowercase();
        Role::ALL.into_iter().find(|r| r.as_str() == lower)
    }
}

/// Least-privileged commercial role; unknown roles resolve to it.
pub const DEFAULT_ROLE: Role = Role::Comercial;

pub const RESOURCES: [&str; 9] = [
    "leads",
    "clients",
    "proposals",
    "whatsapp",
    "notifications",
    "tasks",
    "users",
    "reports",
    "settings",
];

pub const ACTIONS: [&str; 4] = ["view", "create", "edit", "delete"];

/// Immutable role table plus the name of the fallback role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionTable {
    roles: BTreeMap<String, PermissionMap>,
    default_role: String,
}

#[derive(Deserialize)]
struct TableFile {
    #[serde(default)]
    default_role: Option<String>,
    roles: BTreeMap<String, PermissionMap>,
}

impl PermissionTable {
    /// Build a table. Role names are stored lowercased; `default_role` must name one of them.
    pub fn new(roles: BTreeMap<String, PermissionMap>, default_role: &str) -> AppResult<Self> {
        let roles: BTreeMap<String, PermissionMap> =
            roles.into_iter().map(|(k, v)| (k.trim().to_ascii_lowercase(), v)).collect();
        let default_role = default_role.trim().to_ascii_lowercase();
        if !roles.contains_key(&default_role) {
            return Err(AppError::user(
                "invalid_permission_table".to_string(),
                format!("default role '{}' has no entry in the permission table", default_role),
            ));
        }
        Ok(Self { roles, default_role })
    }

    /// Parse a table from JSON of the form `{"default_role": "...", "roles": {role: {resource: {action: value}}}}`.
    /// `default_role` falls back to `comercial` when omitted.
    pub fn from_json(text: &str) -> AppResult<Self> {
        let file: TableFile = serde_json::from_str(text).map_err(|e| {
            AppError::user("invalid_permission_table".to_string(), format!("permission table is not valid JSON: {}", e))
        })?;
        let default_role = file.default_role.unwrap_or_else(|| DEFAULT_ROLE.as_str().to_string());
        Self::new(file.roles, &default_role)
    }

    pub fn from_file(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::internal("permission_table_unreadable".to_string(), format!("{} ({:?}): {}", path.display(), e.kind(), e))
        })?;
        Self::from_json(&text)
    }

    /// Entry for `role` (case-insensitive), or `None` when the role is not in the table.
    pub fn entry(&self, role: &str) -> Option<&PermissionMap> {
        self.roles.get(&role.trim().to_ascii_lowercase())
    }

    /// Entry for `role`, falling back to the default role's entry.
    pub fn entry_or_default(&self, role: &str) -> &PermissionMap {
        match self.entry(role) {
            Some(map) => map,
            // `new` guarantees the default role is present
            None => &self.roles[&self.default_role],
        }
    }

    pub fn default_role(&self) -> &str { &self.default_role }

    pub fn roles(&self) -> impl Iterator<Item = &str> { self.roles.keys().map(|k| k.as_str()) }

    /// The built-in CRM table.
    pub fn crm_defaults() -> Self {
        use PermissionValue::{Allow as A, Deny as D, OwnOnly as O};

        let mut roles = BTreeMap::new();
        // Rows are [view, create, edit, delete] per resource, in RESOURCES order.
        let rows: [(Role, [[PermissionValue; 4]; 9]); 6] = [
            (Role::Admin, [[A, A, A, A]; 9]),
            (
                Role::Gerente,
                [
                    [A, A, A, A], // leads
                    [A, A, A, A], // clients
                    [A, A, A, A], // proposals
                    [A, A, A, D], // whatsapp
                    [A, A, A, A], // notifications
                    [A, A, A, A], // tasks
                    [A, D, D, D], // users
                    [A, D, D, D], // reports
                    [A, D, D, D], // settings
                ],
            ),
            (
                Role::Vendedor,
                [
                    [A, A, O, D],
                    [A, A, O, D],
                    [A, A, O, O],
                    [A, A, D, D],
                    [A, D, D, D],
                    [A, A, O, O],
                    [D, D, D, D],
                    [O, D, D, D],
                    [D, D, D, D],
                ],
            ),
            (
                Role::Comercial,
                [
                    [O, A, O, D],
                    [O, A, O, D],
                    [O, A, O, D],
                    [O, A, D, D],
                    [A, D, D, D],
                    [O, A, O, O],
                    [D, D, D, D],
                    [D, D, D, D],
                    [D, D, D, D],
                ],
            ),
            (
                Role::Suporte,
                [
                    [A, D, D, D],
                    [A, D, A, D],
                    [A, D, D, D],
                    [A, A, D, D],
                    [A, A, D, D],
                    [A, A, A, D],
                    [D, D, D, D],
                    [D, D, D, D],
                    [D, D, D, D],
                ],
            ),
            (
                Role::Financeiro,
                [
                    [A, D, D, D],
                    [A, D, A, D],
                    [A, D, A, D],
                    [D, D, D, D],
                    [A, D, D, D],
                    [A, A, O, O],
                    [D, D, D, D],
                    [A, A, D, D],
                    [D, D, D, D],
                ],
            ),
        ];

        for (role, grid) in rows {
            let mut map = PermissionMap::new();
            for (resource, cells) in RESOURCES.iter().zip(grid) {
                let actions: ActionMap =
                    ACTIONS.iter().zip(cells).map(|(a, v)| (a.to_string(), v)).collect();
                map.insert(resource.to_string(), actions);
            }
            roles.insert(role.as_str().to_string(), map);
        }

        Self { roles, default_role: DEFAULT_ROLE.as_str().to_string() }
    }
}

impl Default for PermissionTable {
    fn default() -> Self { Self::crm_defaults() }
}
