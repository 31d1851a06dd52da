//! Provider bindings behind the `Git`, `Ci`, `ContinuousDelivery` and
//! `SbomSearch` capabilities.

pub mod cd;
pub mod ci;
pub mod git;
pub mod sbom;

use std::sync::Arc;

use log::info;

use crate::auth::Token;
use crate::config::Config;
use crate::error::{HarnessError, Result};
use crate::workflow::WorkflowContext;

use cd::{ArgoCd, ContinuousDelivery};
use ci::{AzurePipelinesCi, Ci, CiType, GitHubActionsCi, GitLabCi, JenkinsCi, TektonCi};
use git::{BitbucketGit, Git, GitHubGit, GitLabGit, GitType};
use sbom::{SbomSearch, Tpa};

const GITHUB_API_URL: &str = "https://api.github.com";
const GITLAB_URL: &str = "https://gitlab.com";
const BITBUCKET_API_URL: &str = "https://api.bitbucket.org/2.0";

fn token(value: Option<&String>) -> Option<Token> {
    value.map(|t| Token::from(t.as_str()))
}

fn required_token(value: Option<&String>, key: &str) -> Result<Token> {
    token(value).ok_or_else(|| HarnessError::Config(format!("{key} is required")))
}

fn required_setting<'a>(value: Option<&'a String>, key: &str) -> Result<&'a str> {
    value
        .map(String::as_str)
        .ok_or_else(|| HarnessError::Config(format!("{key} is required")))
}

/// Builds the per-run context from a validated configuration.
pub fn build_context(config: &Config) -> Result<WorkflowContext> {
    let repos = config.repositories()?;
    let retry = config.workflow.request_retry();

    let git_config = &config.git;
    let git: Arc<dyn Git> = match git_config.provider {
        GitType::Github => Arc::new(
            GitHubGit::new(
                git_config.base_url.as_deref().unwrap_or(GITHUB_API_URL),
                repos.clone(),
                token(git_config.token.as_ref()),
            )?
            .with_retry(retry.clone()),
        ),
        GitType::Gitlab => Arc::new(
            GitLabGit::new(
                git_config.base_url.as_deref().unwrap_or(GITLAB_URL),
                repos.clone(),
                token(git_config.token.as_ref()),
            )?
            .with_retry(retry.clone()),
        ),
        GitType::Bitbucket => Arc::new(
            BitbucketGit::new(
                git_config.base_url.as_deref().unwrap_or(BITBUCKET_API_URL),
                repos.clone(),
                required_setting(git_config.username.as_ref(), "git.username")?,
                required_token(git_config.token.as_ref(), "git.token")?,
            )?
            .with_retry(retry.clone()),
        ),
    };

    let ci_config = &config.ci;
    // Hosted CI shares the Git provider's API and, unless overridden, its token.
    let ci_token = ci_config.token.as_ref().or(git_config.token.as_ref());
    let ci: Arc<dyn Ci> = match ci_config.provider {
        CiType::GithubActions => Arc::new(
            GitHubActionsCi::new(
                ci_config
                    .base_url
                    .as_deref()
                    .or(git_config.base_url.as_deref())
                    .unwrap_or(GITHUB_API_URL),
                repos.clone(),
                token(ci_token),
            )?
            .with_retry(retry.clone()),
        ),
        CiType::GitlabCi => Arc::new(
            GitLabCi::new(
                ci_config
                    .base_url
                    .as_deref()
                    .or(git_config.base_url.as_deref())
                    .unwrap_or(GITLAB_URL),
                repos.clone(),
                token(ci_token),
            )?
            .with_retry(retry.clone()),
        ),
        CiType::Jenkins => Arc::new(
            JenkinsCi::new(
                required_setting(ci_config.base_url.as_ref(), "ci.base-url")?,
                repos.clone(),
                ci_config.folder.clone(),
                required_setting(ci_config.username.as_ref(), "ci.username")?,
                required_token(ci_config.token.as_ref(), "ci.token")?,
            )?
            .with_retry(retry.clone()),
        ),
        CiType::Tekton => Arc::new(
            TektonCi::new(
                required_setting(ci_config.base_url.as_ref(), "ci.base-url")?,
                repos.clone(),
                required_setting(ci_config.namespace.as_ref(), "ci.namespace")?,
                token(ci_config.token.as_ref()),
            )?
            .with_retry(retry.clone()),
        ),
        CiType::Azure => Arc::new(
            AzurePipelinesCi::new(
                required_setting(ci_config.base_url.as_ref(), "ci.base-url")?,
                required_setting(ci_config.project.as_ref(), "ci.project")?,
                repos.clone(),
                required_token(ci_config.token.as_ref(), "ci.token")?,
            )?
            .with_retry(retry.clone()),
        ),
    };

    let cd: Arc<dyn ContinuousDelivery> = Arc::new(
        ArgoCd::new(
            required_setting(config.cd.base_url.as_ref(), "cd.base-url")?,
            token(config.cd.token.as_ref()),
            &repos.component,
            &config.cd.application_prefix,
        )?
        .with_retry(retry.clone())
        .with_sync_poll(config.workflow.sync_poll()),
    );

    let sbom = match &config.sbom {
        Some(sbom_config) => Some(Arc::new(
            Tpa::new(&sbom_config.base_url, token(sbom_config.token.as_ref()))?
                .with_retry(retry.clone()),
        ) as Arc<dyn SbomSearch>),
        None => None,
    };

    info!(
        "Using {} for {}, {} pipelines and Argo CD",
        git_config.provider, repos.component, ci_config.provider
    );

    Ok(WorkflowContext {
        git,
        ci,
        cd,
        sbom,
        settings: config.workflow.settings(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        let mut config = Config::default();
        config.component.name = Some("checkout".to_string());
        config.component.owner = Some("acme".to_string());
        config.cd.base_url = Some("https://argocd.local".to_string());
        config
    }

    #[test]
    fn builds_hosted_providers_from_defaults() {
        let ctx = build_context(&config()).unwrap();
        assert_eq!(ctx.ci.ci_type(), CiType::GithubActions);
        assert_eq!(ctx.git.git_type(), GitType::Github);
        assert_eq!(ctx.git.repositories().gitops, "checkout-gitops");
        assert_eq!(ctx.cd.application_name(crate::model::Environment::Stage), "checkout-stage");
        assert!(ctx.sbom.is_none());
    }

    #[test]
    fn jenkins_without_credentials_is_a_config_error() {
        let mut config = config();
        config.ci.provider = CiType::Jenkins;
        config.ci.base_url = Some("https://jenkins.local".to_string());

        let err = build_context(&config).err().unwrap();
        assert!(matches!(err, HarnessError::Config(ref msg) if msg.contains("ci.username")));
    }

    #[test]
    fn sbom_service_is_optional() {
        let mut config = config();
        config.sbom = Some(crate::config::SbomConfig {
            base_url: "https://tpa.local".to_string(),
            token: None,
        });
        config.ci.provider = CiType::Tekton;
        config.ci.base_url = Some("https://api.cluster.local:6443".to_string());
        config.ci.namespace = Some("checkout-ci".to_string());

        let ctx = build_context(&config).unwrap();
        assert_eq!(ctx.ci.ci_type(), CiType::Tekton);
        assert!(ctx.sbom.is_some());
    }
}
