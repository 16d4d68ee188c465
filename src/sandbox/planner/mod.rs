/*!
 * Mount Planner
 * Walks the policy documents in order and applies every resolved mount
 */

pub mod expand;
pub mod mount_point;
pub mod special;

pub use mount_point::{evaluate, Evaluation, ResolvedMount, SectionKind, SectionScope, SkipReason};

use crate::core::errors::{SandboxError, SandboxResult};
use crate::core::limits::{INTERNAL_BUNDLE_MARKER, MAX_APP_GIDS, NWEB_GPU_KEY, NWEB_RENDER_KEY, NWEB_SANDBOX_ROOT};
use crate::permissions::Grants;
use crate::policy::{PolicyDocument, SandboxSection, SymlinkConfig};
use crate::sandbox::context::SpawnSession;
use crate::sandbox::dec;
use crate::sandbox::executor::MountExecutor;
use crate::sandbox::resolver::{ParamCache, PathResolver};
use crate::sandbox::types::{MountOp, SymlinkOp};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Counters for one planning pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanReport {
    pub mounted: usize,
    pub symlinks: usize,
    pub skipped: usize,
    /// Failures that were logged and tolerated
    pub tolerated: usize,
}

/// How a failed operation affects the spawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fatality {
    WhenChecked,
    Never,
}

impl Fatality {
    fn of(kind: SectionKind) -> Self {
        match kind {
            SectionKind::AppBase
            | SectionKind::AppResources
            | SectionKind::Individual
            | SectionKind::FlagsPoint
            | SectionKind::Nweb => Fatality::WhenChecked,
            SectionKind::Permission | SectionKind::Debug => Fatality::Never,
        }
    }

    fn fatal(self, checked: bool) -> bool {
        match self {
            Fatality::WhenChecked => checked,
            Fatality::Never => false,
        }
    }
}

/// Plans and applies the mounts of one spawn
pub struct MountPlanner<'a> {
    resolver: &'a PathResolver<'a>,
    params: &'a ParamCache,
    grants: &'a Grants<'a>,
    executor: &'a MountExecutor<'a>,
    documents: &'a [Arc<PolicyDocument>],
}

impl<'a> MountPlanner<'a> {
    pub fn new(
        resolver: &'a PathResolver<'a>,
        params: &'a ParamCache,
        grants: &'a Grants<'a>,
        executor: &'a MountExecutor<'a>,
        documents: &'a [Arc<PolicyDocument>],
    ) -> Self {
        Self {
            resolver,
            params,
            grants,
            executor,
            documents,
        }
    }

    /// Sandbox root of the spawn, resolved once and cached in the session
    pub fn sandbox_root(&self, session: &mut SpawnSession) -> SandboxResult<String> {
        if let Some(root) = &session.sandbox_root {
            return Ok(root.clone());
        }
        let override_template = self.documents.iter().find_map(|d| d.root_override());
        let root = self.resolver.sandbox_root(override_template);
        if root.is_empty() {
            return Err(SandboxError::ArgInvalid(format!(
                "no sandbox root for {}",
                self.resolver.identity().bundle_name
            )));
        }
        session.sandbox_root = Some(root.clone());
        Ok(root)
    }

    /// Apply every section for the identity, in policy order
    pub fn plan_and_apply(&self, session: &mut SpawnSession) -> SandboxResult<PlanReport> {
        let identity = self.resolver.identity();
        let root = self.sandbox_root(session)?;
        let mut report = PlanReport::default();

        for document in self.documents {
            self.apply_common(document, &root, session, &mut report)?;
        }

        self.apply_external(&root, session, &mut report)?;

        if identity.bundle_name.contains(INTERNAL_BUNDLE_MARKER) {
            debug!("{} is internal, no individual section", identity.bundle_name);
        } else {
            for document in self.documents {
                if let Some(section) = document.individual(&identity.bundle_name) {
                    self.apply_section(
                        section,
                        SectionKind::Individual,
                        &root,
                        document.top_switch(),
                        session,
                        &mut report,
                    )?;
                }
            }
        }

        for document in self.documents {
            for (name, section) in document.permissions() {
                if !self.grants.has(name) {
                    continue;
                }
                debug!("Applying permission section {}", name);
                self.push_gids(&section.gids, session);
                let scope = SectionScope::new(SectionKind::Permission, root.clone());
                self.apply_mounts(&section.mount_paths, &scope, session, &mut report)?;
            }
        }

        self.apply_tail(&root, &mut report)?;
        session.mounts += report.mounted;
        info!(
            "Planned {} for {}: {} mounts, {} symlinks, {} skipped",
            root, identity.bundle_name, report.mounted, report.symlinks, report.skipped
        );
        Ok(report)
    }

    /// Web renderer and GPU processes, keyed by their internal section names
    pub fn plan_nweb(&self, session: &mut SpawnSession) -> SandboxResult<PlanReport> {
        let identity = self.resolver.identity();
        let key = match identity.process_type.as_deref() {
            Some("render") => NWEB_RENDER_KEY,
            Some("gpu") => NWEB_GPU_KEY,
            other => {
                return Err(SandboxError::ArgInvalid(format!(
                    "process type {:?} has no nweb sandbox",
                    other
                )))
            }
        };
        let root = format!("{}{}", NWEB_SANDBOX_ROOT, identity.bundle_name);
        session.sandbox_root = Some(root.clone());

        let mut report = PlanReport::default();
        for document in self.documents {
            if let Some(section) = document.individual(key) {
                self.apply_section(section, SectionKind::Nweb, &root, true, session, &mut report)?;
            }
        }
        self.apply_tail(&root, &mut report)?;
        session.mounts += report.mounted;
        Ok(report)
    }

    fn apply_common(
        &self,
        document: &PolicyDocument,
        root: &str,
        session: &mut SpawnSession,
        report: &mut PlanReport,
    ) -> SandboxResult<()> {
        let top_switch = document.top_switch();
        if let Some(base) = document.app_base() {
            let scope = self.scope(base, SectionKind::AppBase, root);
            self.apply_mounts(&base.mount_paths, &scope, session, report)?;
            if top_switch && base.switch_on() {
                self.apply_symlinks(&base.symbol_links, &scope, report)?;
            }
        }
        if let Some(resources) = document.app_resources() {
            let scope = self.scope(resources, SectionKind::AppResources, root);
            self.apply_mounts(&resources.mount_paths, &scope, session, report)?;
            if top_switch && resources.switch_on() {
                self.apply_symlinks(&resources.symbol_links, &scope, report)?;
            }
            self.apply_flags_points(resources, root, session, report)?;
        }
        Ok(())
    }

    /// Mounts, gids, symlinks, then flags-points of one section
    pub fn apply_section(
        &self,
        section: &SandboxSection,
        kind: SectionKind,
        root: &str,
        top_switch: bool,
        session: &mut SpawnSession,
        report: &mut PlanReport,
    ) -> SandboxResult<()> {
        let root = section.sandbox_root.as_deref().map_or_else(
            || root.to_string(),
            |template| self.resolver.resolve(template),
        );
        let scope = self.scope(section, kind, &root);
        self.apply_mounts(&section.mount_paths, &scope, session, report)?;
        self.push_gids(&section.gids, session);
        if top_switch && section.switch_on() {
            self.apply_symlinks(&section.symbol_links, &scope, report)?;
        }
        self.apply_flags_points(section, &root, session, report)
    }

    fn apply_flags_points(
        &self,
        section: &SandboxSection,
        root: &str,
        session: &mut SpawnSession,
        report: &mut PlanReport,
    ) -> SandboxResult<()> {
        let identity = self.resolver.identity();
        for point in &section.flags_points {
            if !special::flags_point_matches(&point.flags, identity) {
                continue;
            }
            debug!("flags-point {} applies to {}", point.flags, identity.bundle_name);
            let scope = SectionScope::new(SectionKind::FlagsPoint, root);
            self.apply_mounts(&point.mount_paths, &scope, session, report)?;
            self.apply_symlinks(&point.symbol_links, &scope, report)?;
        }
        Ok(())
    }

    fn scope(&self, section: &SandboxSection, kind: SectionKind, root: &str) -> SectionScope {
        SectionScope::new(kind, root).with_wps_check(section, self.resolver.identity())
    }

    /// Evaluate and mount each entry; DEC paths and dest modes follow a success
    pub fn apply_mounts(
        &self,
        entries: &[crate::policy::MountPointConfig],
        scope: &SectionScope,
        session: &mut SpawnSession,
        report: &mut PlanReport,
    ) -> SandboxResult<()> {
        let fatality = Fatality::of(scope.kind);
        for entry in entries {
            let resolved = match evaluate(
                entry,
                scope,
                self.resolver,
                self.params,
                self.executor.backend(),
            ) {
                Evaluation::Mount(resolved) => resolved,
                Evaluation::Skip(reason) => {
                    debug!("Skipped {} entry: {:?}", scope.kind.name(), reason);
                    report.skipped += 1;
                    continue;
                }
            };

            if let Err(e) = self.mount(&resolved.op, session) {
                if fatality.fatal(resolved.op.check_action_status) {
                    warn!("Mount {} failed in {}: {}", resolved.op.target, scope.kind.name(), e);
                    return Err(e);
                }
                debug!("Mount {} failed, tolerated: {}", resolved.op.target, e);
                report.tolerated += 1;
                continue;
            }
            report.mounted += 1;

            if !resolved.dec_paths.is_empty() {
                if let Err(e) = session.dec.accumulate(dec::permission_entries(&resolved.dec_paths)) {
                    warn!("DEC paths of {} dropped: {}", resolved.op.target, e);
                }
            }
            if let Some(mode) = resolved.dest_mode {
                if let Err(e) = self.executor.chmod(&resolved.op.target, mode) {
                    warn!("dest-mode {:o} on {} failed: {}", mode, resolved.op.target, e);
                }
            }
        }
        Ok(())
    }

    fn mount(&self, op: &MountOp, session: &mut SpawnSession) -> SandboxResult<()> {
        let identity = self.resolver.identity();
        if special::dlp_applies(identity, op) {
            let fd = special::mount_dlp_fuse(self.executor.backend(), identity, op)?;
            session.fuse_fd = Some(fd);
            return Ok(());
        }
        self.executor.mount_once(op)
    }

    fn apply_symlinks(
        &self,
        links: &[SymlinkConfig],
        scope: &SectionScope,
        report: &mut PlanReport,
    ) -> SandboxResult<()> {
        let fatality = Fatality::of(scope.kind);
        for link in links {
            let (Some(target), Some(name)) = (link.target_name.as_deref(), link.link_name.as_deref())
            else {
                report.skipped += 1;
                continue;
            };
            let target = self.resolver.resolve(target);
            let relative = self.resolver.resolve(name);
            if target.is_empty() || relative.is_empty() {
                report.skipped += 1;
                continue;
            }
            let op = SymlinkOp {
                target,
                link: format!("{}{}", scope.root, relative),
                check_action_status: link.check_action_status_or(scope.kind.checked_by_default()),
            };
            match self.executor.symlink_once(&op) {
                Ok(()) => report.symlinks += 1,
                Err(e) if fatality.fatal(op.check_action_status) => return Err(e),
                Err(e) => {
                    debug!("symlink {} tolerated: {}", op.link, e);
                    report.tolerated += 1;
                }
            }
        }
        Ok(())
    }

    /// HSP, data groups and the public install directory
    fn apply_external(
        &self,
        root: &str,
        session: &mut SpawnSession,
        report: &mut PlanReport,
    ) -> SandboxResult<()> {
        let identity = self.resolver.identity();

        if let Some(list) = &identity.ext.hsp_list {
            for op in expand::hsp_mounts(list, root)? {
                self.mount_tolerant(&op, report);
            }
        }

        if let Some(text) = identity.ext.data_group_list.as_deref() {
            let groups = expand::parse_data_groups(text)?;
            for op in expand::data_group_mounts(&groups, root, self.grants) {
                let outcome = session.data_groups.push(op)?;
                debug!("Data group queued: {:?}", outcome);
            }
        }

        if let Some(op) = expand::public_install_mount(identity, root) {
            self.mount_tolerant(&op, report);
        }
        Ok(())
    }

    /// Overlay and bundle resources close the plan
    fn apply_tail(&self, root: &str, report: &mut PlanReport) -> SandboxResult<()> {
        let identity = self.resolver.identity();
        for op in expand::overlay_mounts(identity, root) {
            self.mount_tolerant(&op, report);
        }
        if let Some(op) = expand::bundle_resource_mount(identity, root) {
            self.mount_tolerant(&op, report);
        }
        Ok(())
    }

    fn mount_tolerant(&self, op: &MountOp, report: &mut PlanReport) {
        match self.executor.mount_once(op) {
            Ok(()) => report.mounted += 1,
            Err(e) => {
                warn!("Mount {} to {} failed: {}", op.source, op.target, e);
                report.tolerated += 1;
            }
        }
    }

    fn push_gids(&self, gids: &[u32], session: &mut SpawnSession) {
        for gid in gids {
            if session.extra_gids.len() >= MAX_APP_GIDS {
                warn!("Gid table full, dropping {}", gid);
                return;
            }
            if !session.extra_gids.contains(gid) {
                session.extra_gids.push(*gid);
            }
        }
    }
}
