//! Role Mapper
//!
//! Maps a document path to its department and to the roles allowed to see it.

use serde::Serialize;

use super::roles::{Department, Role};
use crate::config::ConfigError;

/// One ordered mapping rule: documents under any of `folders` belong to
/// `department` and are visible to `allowed_roles`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepartmentRule {
    pub department: Department,
    /// Lower-cased folder substrings
    pub folders: Vec<String>,
    pub allowed_roles: Vec<Role>,
}

impl DepartmentRule {
    pub fn new(department: Department, folders: &[&str], allowed_roles: &[Role]) -> Self {
        let mut roles = Vec::new();
        for role in allowed_roles {
            if !roles.contains(role) {
                roles.push(*role);
            }
        }
        Self {
            department,
            folders: folders.iter().map(|f| normalize_path(f)).collect(),
            allowed_roles: roles,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoleMapper {
    rules: Vec<DepartmentRule>,
    fallback: Option<Department>,
}

/// Lower-case and use forward slashes so rules match on every platform.
fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").to_lowercase()
}

impl RoleMapper {
    pub fn new(rules: Vec<DepartmentRule>, fallback: Option<Department>) -> Self {
        Self { rules, fallback }
    }

    pub fn rules(&self) -> &[DepartmentRule] {
        &self.rules
    }

    /// First department (in configuration order) with a folder substring
    /// contained in the normalized path; `Unknown` when none match.
    pub fn infer_department(&self, path: &str) -> Department {
        // Leading slash lets "/hr/" style rules match relative paths too
        let normalized = format!("/{}", normalize_path(path).trim_start_matches('/'));

        self.rules
            .iter()
            .find(|rule| rule.folders.iter().any(|folder| normalized.contains(folder.as_str())))
            .map(|rule| rule.department)
            .unwrap_or(Department::Unknown)
    }

    /// Roles configured for `department`; empty if it has no rule.
    pub fn allowed_roles(&self, department: Department) -> Vec<Role> {
        self.rules
            .iter()
            .find(|rule| rule.department == department)
            .map(|rule| rule.allowed_roles.clone())
            .unwrap_or_default()
    }

    /// Department and roles for a document, applying the configured fallback.
    ///
    /// An empty role set is never returned: it is reported as a
    /// configuration error naming the document.
    pub fn resolve(&self, path: &str) -> Result<(Department, Vec<Role>), ConfigError> {
        let mut department = self.infer_department(path);
        if department == Department::Unknown {
            if let Some(fallback) = self.fallback {
                department = fallback;
            }
        }

        let roles = self.allowed_roles(department);
        if roles.is_empty() {
            return Err(ConfigError::NoRoles {
                department: department.to_string(),
                document: path.to_string(),
            });
        }
        Ok((department, roles))
    }
}
