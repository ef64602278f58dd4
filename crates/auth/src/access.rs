//! Access evaluation (pure policy checks).
//!
//! Maps `(SessionIdentity, Section)` to allow/deny against the static
//! per-role tables, with two overriding rules layered on top:
//!
//! - **Tenant gating**: a role that requires a school assignment but lacks
//!   one is denied every tenant-scoped section, regardless of its table.
//! - **System-admin exclusion**: the platform-admin tier is denied every
//!   tenant section in this application; it is only valid on a separate
//!   administrative surface.
//!
//! Report *types* are a secondary restriction on top of the coarse `Reports`
//! section and are checked through [`can_access_report_type`], not folded
//! into [`can_access`].
//!
//! - No IO
//! - No panics
//! - No business logic (pure policy check)

use serde::{Deserialize, Serialize};

use crate::{Role, SessionIdentity};

/// Application section (navigation/feature surface).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    /// Universal landing section; the only one that is not tenant-scoped.
    Dashboard,
    Students,
    Staff,
    Grades,
    Attendance,
    Finance,
    Payroll,
    Reports,
    Messaging,
    Settings,
}

impl Section {
    /// Every section except the landing dashboard exposes tenant data.
    pub fn is_tenant_scoped(&self) -> bool {
        !matches!(self, Section::Dashboard)
    }
}

/// Report category, gated per role on top of the `Reports` section.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Academic,
    Attendance,
    Financial,
    Payroll,
    Enrollment,
}

/// Static per-role section grants (tenant-scoped sections only; the
/// dashboard is universal and handled in [`can_access`]).
fn permitted_sections(role: Role) -> &'static [Section] {
    match role {
        Role::Owner => &[
            Section::Students,
            Section::Staff,
            Section::Grades,
            Section::Attendance,
            Section::Finance,
            Section::Payroll,
            Section::Reports,
            Section::Messaging,
            Section::Settings,
        ],
        Role::Principal => &[
            Section::Students,
            Section::Staff,
            Section::Grades,
            Section::Attendance,
            Section::Reports,
            Section::Messaging,
            Section::Settings,
        ],
        Role::Teacher => &[
            Section::Students,
            Section::Grades,
            Section::Attendance,
            Section::Reports,
            Section::Messaging,
        ],
        Role::FinanceOfficer => &[Section::Finance, Section::Reports],
        Role::HrOfficer => &[Section::Staff, Section::Payroll, Section::Reports],
        Role::Guardian => &[Section::Grades, Section::Attendance, Section::Messaging],
        Role::SystemAdmin => &[],
    }
}

/// Static per-role report-type grants.
fn permitted_report_types(role: Role) -> &'static [ReportType] {
    match role {
        Role::Owner | Role::Principal => &[
            ReportType::Academic,
            ReportType::Attendance,
            ReportType::Financial,
            ReportType::Payroll,
            ReportType::Enrollment,
        ],
        Role::Teacher => &[ReportType::Academic, ReportType::Attendance],
        Role::FinanceOfficer => &[ReportType::Financial],
        Role::HrOfficer => &[ReportType::Payroll],
        Role::Guardian | Role::SystemAdmin => &[],
    }
}

/// Whether the role is unusable without a school assignment.
pub fn requires_tenant(role: Role) -> bool {
    role.requires_tenant()
}

/// Whether the identity carries a school assignment.
pub fn has_tenant_assignment(identity: &SessionIdentity) -> bool {
    identity.school_id.is_some()
}

/// Evaluate section access for a resolved identity.
pub fn can_access(identity: &SessionIdentity, section: Section) -> bool {
    // Universal landing section.
    if !section.is_tenant_scoped() {
        return true;
    }

    // Platform admins never reach tenant surfaces from this application.
    if identity.role == Role::SystemAdmin {
        return false;
    }

    // Missing tenant assignment overrides the static grant table.
    if identity.role.requires_tenant() && !has_tenant_assignment(identity) {
        return false;
    }

    permitted_sections(identity.role).contains(&section)
}

/// Evaluate report-type access. Layered on top of `can_access(Reports)`:
/// callers gate on the coarse section first, then on the type.
pub fn can_access_report_type(role: Role, report_type: ReportType) -> bool {
    permitted_report_types(role).contains(&report_type)
}
