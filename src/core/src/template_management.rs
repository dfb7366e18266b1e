//! Lab template versioning.
//!
//! Templates move DRAFT → PUBLISHED → ARCHIVED. Drafts are freely editable;
//! publishing writes an immutable row per `(family, version)` and moves the
//! family's "latest" pointer onto it.

pub mod template_service;
pub mod types;

pub use template_service::TemplateService;
pub use types::{
    ChangelogEntry, ExecutionConfig, LabTemplate, NewTemplate, ResourceLimits, TemplatePatch,
    TemplateStatus,
};
