//! Opaque persistence boundary.
//!
//! The relational layer is an external collaborator; the core only needs the
//! CRUD surface below. `MemoryStore` backs the server by default and every
//! test. A `DATABASE_URL`-backed implementation can slot in behind the same
//! trait without touching the callers.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{Result, anyhow};

use crate::model::{Analysis, AnalysisStatus, Project, Rule, StoredViolation};

/// CRUD surface the core consumes. All methods are synchronous; callers hold
/// the store behind an `Arc`.
pub trait Store: Send + Sync {
    fn find_project_by_repo_id(&self, repo_id: u64) -> Option<Project>;

    /// Create a project for a repo. Idempotent on `repo_id`: an existing
    /// project is returned unchanged (installation id updated separately).
    fn create_project(
        &self,
        repo_id: u64,
        owner: &str,
        name: &str,
        default_branch: &str,
        installation_id: Option<u64>,
    ) -> Result<Project>;

    fn set_project_installation(&self, project_id: i64, installation_id: u64) -> Result<()>;

    /// Seed rules onto a project. Only called for newly created projects.
    fn seed_rules(&self, project_id: i64, rules: &[Rule]) -> Result<()>;

    /// Active rules for a project, optionally narrowed to one language.
    fn active_rules(&self, project_id: i64, language: Option<&str>) -> Vec<Rule>;

    fn create_analysis(&self, project_id: i64, commit_hash: &str, pr_number: u64)
    -> Result<Analysis>;

    fn set_analysis_status(&self, analysis_id: i64, status: AnalysisStatus) -> Result<()>;

    fn get_analysis(&self, analysis_id: i64) -> Option<Analysis>;

    fn record_violations(&self, violations: &[StoredViolation]) -> Result<()>;

    fn violations_for_analysis(&self, analysis_id: i64) -> Vec<StoredViolation>;

    fn project_count(&self) -> usize;

    fn analysis_count(&self) -> usize;
}

#[derive(Default)]
struct Inner {
    projects: Vec<Project>,
    rules: HashMap<i64, Vec<Rule>>,
    analyses: Vec<Analysis>,
    violations: Vec<StoredViolation>,
    next_project_id: i64,
    next_analysis_id: i64,
}

/// In-memory store used by the server and by tests.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_project_id: 1,
                next_analysis_id: 1,
                ..Default::default()
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn find_project_by_repo_id(&self, repo_id: u64) -> Option<Project> {
        let inner = self.inner.read().unwrap();
        inner.projects.iter().find(|p| p.repo_id == repo_id).cloned()
    }

    fn create_project(
        &self,
        repo_id: u64,
        owner: &str,
        name: &str,
        default_branch: &str,
        installation_id: Option<u64>,
    ) -> Result<Project> {
        let mut inner = self.inner.write().unwrap();
        if let Some(existing) = inner.projects.iter().find(|p| p.repo_id == repo_id) {
            return Ok(existing.clone());
        }
        let project = Project {
            id: inner.next_project_id,
            repo_id,
            owner: owner.to_string(),
            name: name.to_string(),
            default_branch: default_branch.to_string(),
            installation_id,
        };
        inner.next_project_id += 1;
        inner.projects.push(project.clone());
        Ok(project)
    }

    fn set_project_installation(&self, project_id: i64, installation_id: u64) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let project = inner
            .projects
            .iter_mut()
            .find(|p| p.id == project_id)
            .ok_or_else(|| anyhow!("project {} not found", project_id))?;
        project.installation_id = Some(installation_id);
        Ok(())
    }

    fn seed_rules(&self, project_id: i64, rules: &[Rule]) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner
            .rules
            .entry(project_id)
            .or_default()
            .extend(rules.iter().cloned());
        Ok(())
    }

    fn active_rules(&self, project_id: i64, language: Option<&str>) -> Vec<Rule> {
        let inner = self.inner.read().unwrap();
        inner
            .rules
            .get(&project_id)
            .map(|rules| {
                rules
                    .iter()
                    .filter(|r| r.is_active)
                    .filter(|r| language.is_none_or(|lang| r.language == lang))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn create_analysis(
        &self,
        project_id: i64,
        commit_hash: &str,
        pr_number: u64,
    ) -> Result<Analysis> {
        let mut inner = self.inner.write().unwrap();
        let analysis = Analysis {
            id: inner.next_analysis_id,
            project_id,
            commit_hash: commit_hash.to_string(),
            pr_number,
            status: AnalysisStatus::Pending,
        };
        inner.next_analysis_id += 1;
        inner.analyses.push(analysis.clone());
        Ok(analysis)
    }

    fn set_analysis_status(&self, analysis_id: i64, status: AnalysisStatus) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let analysis = inner
            .analyses
            .iter_mut()
            .find(|a| a.id == analysis_id)
            .ok_or_else(|| anyhow!("analysis {} not found", analysis_id))?;
        // PENDING transitions exactly once; a settled record never moves.
        if analysis.status == AnalysisStatus::Pending {
            analysis.status = status;
        }
        Ok(())
    }

    fn get_analysis(&self, analysis_id: i64) -> Option<Analysis> {
        let inner = self.inner.read().unwrap();
        inner.analyses.iter().find(|a| a.id == analysis_id).cloned()
    }

    fn record_violations(&self, violations: &[StoredViolation]) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.violations.extend(violations.iter().cloned());
        Ok(())
    }

    fn violations_for_analysis(&self, analysis_id: i64) -> Vec<StoredViolation> {
        let inner = self.inner.read().unwrap();
        inner
            .violations
            .iter()
            .filter(|v| v.analysis_id == analysis_id)
            .cloned()
            .collect()
    }

    fn project_count(&self) -> usize {
        self.inner.read().unwrap().projects.len()
    }

    fn analysis_count(&self) -> usize {
        self.inner.read().unwrap().analyses.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RuleCategory, Severity};

    fn rule(id: &str, language: &str, active: bool) -> Rule {
        Rule {
            id: id.to_string(),
            name: id.to_string(),
            category: RuleCategory::Security,
            severity: Severity::Critical,
            language: language.to_string(),
            pattern: "(call_expression)".to_string(),
            message: "msg".to_string(),
            is_active: active,
        }
    }

    #[test]
    fn project_creation_is_idempotent_on_repo_id() {
        let store = MemoryStore::new();
        let first = store
            .create_project(99, "octo", "demo", "main", Some(7))
            .unwrap();
        let second = store
            .create_project(99, "octo", "demo", "main", Some(7))
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.project_count(), 1);
    }

    #[test]
    fn inactive_rules_are_filtered() {
        let store = MemoryStore::new();
        let project = store
            .create_project(1, "octo", "demo", "main", None)
            .unwrap();
        store
            .seed_rules(
                project.id,
                &[rule("js-sec-001", "js", true), rule("js-sec-002", "js", false)],
            )
            .unwrap();
        let active = store.active_rules(project.id, Some("js"));
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "js-sec-001");
        assert!(store.active_rules(project.id, Some("py")).is_empty());
    }

    #[test]
    fn analysis_status_settles_once() {
        let store = MemoryStore::new();
        let project = store
            .create_project(1, "octo", "demo", "main", None)
            .unwrap();
        let analysis = store.create_analysis(project.id, "abc123", 4).unwrap();
        assert_eq!(analysis.status, AnalysisStatus::Pending);

        store
            .set_analysis_status(analysis.id, AnalysisStatus::Failure)
            .unwrap();
        store
            .set_analysis_status(analysis.id, AnalysisStatus::Success)
            .unwrap();
        assert_eq!(
            store.get_analysis(analysis.id).unwrap().status,
            AnalysisStatus::Failure
        );
    }
}
