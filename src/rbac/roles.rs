//! Roles, departments and the Role-Access Table.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("Role not recognized: {0}")]
    UnknownRole(String),
    #[error("Role has no access rules: {0}")]
    RoleNotConfigured(String),
    #[error("Unknown department: {0}")]
    UnknownDepartment(String),
    #[error("Access denied for role {role} to department {department}")]
    Denied { role: String, department: String },
}

impl Serialize for AccessError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// A requesting role. Parsing is case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    Finance,
    Hr,
    Marketing,
    Engineering,
    Employees,
    CLevel,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Finance,
        Role::Hr,
        Role::Marketing,
        Role::Engineering,
        Role::Employees,
        Role::CLevel,
    ];

    /// The role with unconditional access to every department.
    pub const SUPER: Role = Role::CLevel;

    /// Canonical display name, as written in chunk records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Finance => "Finance",
            Role::Hr => "HR",
            Role::Marketing => "Marketing",
            Role::Engineering => "Engineering",
            Role::Employees => "Employees",
            Role::CLevel => "C-Level",
        }
    }

    /// Lower-cased name used for access comparisons.
    pub fn key(&self) -> &'static str {
        match self {
            Role::Finance => "finance",
            Role::Hr => "hr",
            Role::Marketing => "marketing",
            Role::Engineering => "engineering",
            Role::Employees => "employees",
            Role::CLevel => "c-level",
        }
    }

    pub fn is_super(&self) -> bool {
        *self == Role::SUPER
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.key() == normalized)
            .ok_or_else(|| AccessError::UnknownRole(s.to_string()))
    }
}

impl TryFrom<String> for Role {
    type Error = AccessError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

/// Department a document belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Department {
    Finance,
    Hr,
    Marketing,
    Engineering,
    General,
    /// No mapping rule matched the document path
    Unknown,
}

impl Department {
    /// Departments that can be configured and granted (excludes `Unknown`).
    pub const KNOWN: [Department; 5] = [
        Department::Finance,
        Department::Hr,
        Department::Marketing,
        Department::Engineering,
        Department::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Department::Finance => "Finance",
            Department::Hr => "HR",
            Department::Marketing => "Marketing",
            Department::Engineering => "Engineering",
            Department::General => "General",
            Department::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Department {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Department::KNOWN
            .iter()
            .chain(std::iter::once(&Department::Unknown))
            .copied()
            .find(|d| d.as_str().to_lowercase() == normalized)
            .ok_or_else(|| AccessError::UnknownDepartment(s.to_string()))
    }
}

impl TryFrom<String> for Department {
    type Error = AccessError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Department> for String {
    fn from(department: Department) -> Self {
        department.as_str().to_string()
    }
}

/// Static mapping from role to the departments it may read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAccessTable {
    rules: HashMap<Role, BTreeSet<Department>>,
}

impl Default for RoleAccessTable {
    fn default() -> Self {
        use Department::*;

        let mut rules = HashMap::new();
        rules.insert(Role::Finance, BTreeSet::from([Finance, General]));
        rules.insert(Role::Hr, BTreeSet::from([Hr, General]));
        rules.insert(Role::Engineering, BTreeSet::from([Engineering, General]));
        rules.insert(Role::Marketing, BTreeSet::from([Marketing, General]));
        rules.insert(Role::Employees, BTreeSet::from([General]));
        rules.insert(Role::CLevel, Department::KNOWN.into_iter().collect());
        Self { rules }
    }
}

impl RoleAccessTable {
    pub fn new(rules: HashMap<Role, BTreeSet<Department>>) -> Self {
        Self { rules }
    }

    /// Resolve a requested role name, rejecting anything not in the table.
    ///
    /// This runs before retrieval: an unrecognized role never reaches the index.
    pub fn authorize(&self, role_name: &str) -> Result<Role, AccessError> {
        let role: Role = role_name.parse()?;
        if !self.rules.contains_key(&role) {
            return Err(AccessError::RoleNotConfigured(role.to_string()));
        }
        Ok(role)
    }

    /// Whether `role` may read documents of `department`.
    pub fn can_read(&self, role: Role, department: Department) -> bool {
        if role.is_super() {
            return true;
        }
        self.rules
            .get(&role)
            .is_some_and(|departments| departments.contains(&department))
    }

    /// Department gate: authorize the role, then require read access.
    pub fn require(&self, role_name: &str, department: Department) -> Result<Role, AccessError> {
        let role = self.authorize(role_name)?;
        if !self.can_read(role, department) {
            return Err(AccessError::Denied {
                role: role.to_string(),
                department: department.to_string(),
            });
        }
        Ok(role)
    }

    /// Departments readable by `role`, empty when the role is not configured.
    pub fn departments(&self, role: Role) -> BTreeSet<Department> {
        self.rules.get(&role).cloned().unwrap_or_default()
    }

    /// Roles in the table, in canonical order.
    pub fn roles(&self) -> Vec<Role> {
        Role::ALL.into_iter().filter(|r| self.rules.contains_key(r)).collect()
    }
}
