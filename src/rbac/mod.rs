//! Role-Based Access Control
//!
//! Closed role and department enumerations, the Role-Access Table and the
//! path-based Role Mapper used when chunks are built.

pub mod mapper;
pub mod roles;

pub use mapper::{DepartmentRule, RoleMapper};
pub use roles::{AccessError, Department, Role, RoleAccessTable};
