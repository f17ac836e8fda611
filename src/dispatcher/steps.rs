//! Fixed catalog of primitive worker steps and the pure functions that pick
//! them for each kind of job.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PipelineError, Result};
use crate::models::{PostAction, TemplateType};
use crate::providers::GitProviderType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStep {
    GitInitPush,
    GitCloneCheckout,
    GitCommitPush,
    GitOverwriteTheme,
    HexoUpdateConfig,
    GenerateMetaspaceConfig,
    HexoGenerateDeploy,
    HugoGenerateDeploy,
    JekyllGenerateDeploy,
    GiteePagesRefresh,
    HexoCreatePost,
    HexoUpdatePost,
    HexoDeletePost,
    HexoCreateDraft,
    HexoUpdateDraft,
    HexoDeleteDraft,
    HugoCreatePost,
    HugoUpdatePost,
    HugoDeletePost,
    JekyllCreatePost,
    JekyllUpdatePost,
    JekyllDeletePost,
}

impl TaskStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GitInitPush => "GIT_INIT_PUSH",
            Self::GitCloneCheckout => "GIT_CLONE_CHECKOUT",
            Self::GitCommitPush => "GIT_COMMIT_PUSH",
            Self::GitOverwriteTheme => "GIT_OVERWRITE_THEME",
            Self::HexoUpdateConfig => "HEXO_UPDATE_CONFIG",
            Self::GenerateMetaspaceConfig => "GENERATE_METASPACE_CONFIG",
            Self::HexoGenerateDeploy => "HEXO_GENERATE_DEPLOY",
            Self::HugoGenerateDeploy => "HUGO_GENERATE_DEPLOY",
            Self::JekyllGenerateDeploy => "JEKYLL_GENERATE_DEPLOY",
            Self::GiteePagesRefresh => "GITEE_PAGES_REFRESH",
            Self::HexoCreatePost => "HEXO_CREATE_POST",
            Self::HexoUpdatePost => "HEXO_UPDATE_POST",
            Self::HexoDeletePost => "HEXO_DELETE_POST",
            Self::HexoCreateDraft => "HEXO_CREATE_DRAFT",
            Self::HexoUpdateDraft => "HEXO_UPDATE_DRAFT",
            Self::HexoDeleteDraft => "HEXO_DELETE_DRAFT",
            Self::HugoCreatePost => "HUGO_CREATE_POST",
            Self::HugoUpdatePost => "HUGO_UPDATE_POST",
            Self::HugoDeletePost => "HUGO_DELETE_POST",
            Self::JekyllCreatePost => "JEKYLL_CREATE_POST",
            Self::JekyllUpdatePost => "JEKYLL_UPDATE_POST",
            Self::JekyllDeletePost => "JEKYLL_DELETE_POST",
        }
    }
}

impl fmt::Display for TaskStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step selection. Every function is pure in its inputs.
pub struct StepPlanner;

impl StepPlanner {
    /// Deploy: seed or check out the repository, render the site config,
    /// commit and push.
    pub fn deploy(template: TemplateType, is_repo_empty: bool, is_last_task: bool) -> Vec<TaskStep> {
        let mut steps = vec![if is_repo_empty {
            TaskStep::GitInitPush
        } else {
            TaskStep::GitCloneCheckout
        }];
        if template == TemplateType::Hexo {
            steps.push(TaskStep::HexoUpdateConfig);
        }
        steps.push(TaskStep::GenerateMetaspaceConfig);
        steps.push(TaskStep::GitCommitPush);
        if !is_last_task {
            steps.push(TaskStep::GitOverwriteTheme);
        }
        steps
    }

    pub fn publish(template: TemplateType, publisher_type: GitProviderType) -> Vec<TaskStep> {
        let mut steps = vec![
            TaskStep::GitCloneCheckout,
            match template {
                TemplateType::Hexo => TaskStep::HexoGenerateDeploy,
                TemplateType::Hugo => TaskStep::HugoGenerateDeploy,
                TemplateType::Jekyll => TaskStep::JekyllGenerateDeploy,
            },
        ];
        if publisher_type == GitProviderType::Gitee {
            steps.push(TaskStep::GiteePagesRefresh);
        }
        steps
    }

    pub fn post_checkout() -> Vec<TaskStep> {
        vec![TaskStep::GitCloneCheckout]
    }

    /// Business step of a post batch. Draft variants exist for HEXO only.
    pub fn post_business(
        template: TemplateType,
        action: PostAction,
        is_draft: bool,
    ) -> Result<Vec<TaskStep>> {
        use PostAction::{Create, Delete, Update};
        let step = match (template, action, is_draft) {
            (TemplateType::Hexo, Create, false) => TaskStep::HexoCreatePost,
            (TemplateType::Hexo, Update, false) => TaskStep::HexoUpdatePost,
            (TemplateType::Hexo, Delete, false) => TaskStep::HexoDeletePost,
            (TemplateType::Hexo, Create, true) => TaskStep::HexoCreateDraft,
            (TemplateType::Hexo, Update, true) => TaskStep::HexoUpdateDraft,
            (TemplateType::Hexo, Delete, true) => TaskStep::HexoDeleteDraft,
            (TemplateType::Hugo, Create, false) => TaskStep::HugoCreatePost,
            (TemplateType::Hugo, Update, false) => TaskStep::HugoUpdatePost,
            (TemplateType::Hugo, Delete, false) => TaskStep::HugoDeletePost,
            (TemplateType::Jekyll, Create, false) => TaskStep::JekyllCreatePost,
            (TemplateType::Jekyll, Update, false) => TaskStep::JekyllUpdatePost,
            (TemplateType::Jekyll, Delete, false) => TaskStep::JekyllDeletePost,
            (other, _, true) => {
                return Err(PipelineError::validation(format!(
                    "Drafts are not supported by {other} templates"
                )))
            }
        };
        Ok(vec![step])
    }

    pub fn post_commit() -> Vec<TaskStep> {
        vec![TaskStep::GitCommitPush]
    }
}
