pub mod access;
pub mod breadcrumbs;
pub mod cache;
pub mod deadline;
pub mod identity;
