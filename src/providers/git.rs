use super::{
    GitInfo, GitProviderType, GitPublisherProvider, GitStorageProvider, PublishInfo,
};
use crate::models::{GitRepoSetting, SiteInfo};

const COMMIT_NAME: &str = "Metaspace Pipeline";

fn git_info(
    git_type: GitProviderType,
    repo: &GitRepoSetting,
    commit_email: &str,
) -> GitInfo {
    GitInfo {
        git_type,
        git_token: repo.access_token.clone(),
        git_username: repo.user_name.clone(),
        git_reponame: repo.repo_name.clone(),
        git_branch_name: repo.branch_name.clone(),
        git_commit_name: COMMIT_NAME.to_string(),
        git_commit_email: commit_email.to_string(),
    }
}

/// Custom domain first, then the site's managed domain, then the pages host
fn site_url(repo: &GitRepoSetting, site_info: &SiteInfo, pages_host: &str) -> (String, Option<String>) {
    let cname = repo
        .custom_domain
        .clone()
        .filter(|d| !d.is_empty())
        .or_else(|| Some(site_info.domain.clone()).filter(|d| !d.is_empty()));
    let host = cname.clone().unwrap_or_else(|| pages_host.to_string());
    (format!("https://{host}"), cname)
}

/// GitHub repositories and GitHub Pages
#[derive(Debug, Clone, Default)]
pub struct GithubProvider;

impl GitStorageProvider for GithubProvider {
    fn provider_type(&self) -> GitProviderType {
        GitProviderType::Github
    }

    fn generate_git_info(&self, repo: &GitRepoSetting) -> GitInfo {
        git_info(
            GitProviderType::Github,
            repo,
            &format!("{}@users.noreply.github.com", repo.user_name),
        )
    }
}

impl GitPublisherProvider for GithubProvider {
    fn provider_type(&self) -> GitProviderType {
        GitProviderType::Github
    }

    fn pages_host(&self, repo: &GitRepoSetting) -> String {
        format!("{}.github.io", repo.user_name.to_lowercase())
    }

    fn generate_publish_info(&self, repo: &GitRepoSetting, site_info: &SiteInfo) -> PublishInfo {
        let pages_host = GitPublisherProvider::pages_host(self, repo);
        let (site_url, cname) = site_url(repo, site_info, &pages_host);
        PublishInfo {
            publisher_type: GitProviderType::Github,
            git_username: repo.user_name.clone(),
            git_reponame: repo.repo_name.clone(),
            git_branch_name: repo.branch_name.clone(),
            pages_host,
            site_url,
            cname,
        }
    }
}

/// Gitee repositories and Gitee Pages.
///
/// Gitee Pages does not rebuild on push; publish jobs end with an explicit
/// refresh step.
#[derive(Debug, Clone, Default)]
pub struct GiteeProvider;

impl GitStorageProvider for GiteeProvider {
    fn provider_type(&self) -> GitProviderType {
        GitProviderType::Gitee
    }

    fn generate_git_info(&self, repo: &GitRepoSetting) -> GitInfo {
        git_info(
            GitProviderType::Gitee,
            repo,
            &format!("{}@user.noreply.gitee.com", repo.user_name),
        )
    }
}

impl GitPublisherProvider for GiteeProvider {
    fn provider_type(&self) -> GitProviderType {
        GitProviderType::Gitee
    }

    fn pages_host(&self, repo: &GitRepoSetting) -> String {
        format!("{}.gitee.io", repo.user_name.to_lowercase())
    }

    fn generate_publish_info(&self, repo: &GitRepoSetting, site_info: &SiteInfo) -> PublishInfo {
        let pages_host = GitPublisherProvider::pages_host(self, repo);
        let (site_url, cname) = site_url(repo, site_info, &pages_host);
        PublishInfo {
            publisher_type: GitProviderType::Gitee,
            git_username: repo.user_name.clone(),
            git_reponame: repo.repo_name.clone(),
            git_branch_name: repo.branch_name.clone(),
            pages_host,
            site_url,
            cname,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(custom_domain: Option<&str>) -> GitRepoSetting {
        GitRepoSetting {
            id: 1,
            user_id: 1,
            provider_type: GitProviderType::Github,
            user_name: "Alice".into(),
            repo_name: "blog".into(),
            branch_name: "main".into(),
            access_token: "token".into(),
            is_repo_empty: false,
            custom_domain: custom_domain.map(str::to_string),
        }
    }

    #[test]
    fn test_git_info_carries_credentials() {
        let info = GithubProvider.generate_git_info(&repo(None));
        assert_eq!(info.git_token, "token");
        assert_eq!(info.git_reponame, "blog");
        assert_eq!(info.git_commit_email, "Alice@users.noreply.github.com");
    }

    #[test]
    fn test_publish_info_prefers_custom_domain() {
        let site = SiteInfo {
            domain: "alice.metaspaces.life".into(),
            ..Default::default()
        };
        let info = GithubProvider.generate_publish_info(&repo(Some("blog.alice.dev")), &site);
        assert_eq!(info.site_url, "https://blog.alice.dev");
        assert_eq!(info.pages_host, "alice.github.io");

        let info = GiteeProvider.generate_publish_info(&repo(None), &site);
        assert_eq!(info.cname.as_deref(), Some("alice.metaspaces.life"));
        assert_eq!(info.pages_host, "alice.gitee.io");

        let info = GiteeProvider.generate_publish_info(&repo(None), &SiteInfo::default());
        assert_eq!(info.site_url, "https://alice.gitee.io");
        assert!(info.cname.is_none());
    }
}
