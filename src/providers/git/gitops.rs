use std::sync::OnceLock;

use chrono::Utc;
use regex::{Captures, Regex};

use crate::error::{HarnessError, Result};
use crate::model::Environment;

fn image_line() -> &'static Regex {
    static IMAGE_LINE: OnceLock<Regex> = OnceLock::new();
    IMAGE_LINE.get_or_init(|| {
        Regex::new(r#"(?m)^([ \t]*(?:-[ \t]+)?image:[ \t]*)(["']?)([^\s"']+)(["']?)[ \t]*$"#)
            .expect("image line pattern is valid")
    })
}

/// Path of the file declaring the deployed image of `component` in `environment`.
pub fn deployment_patch_path(component: &str, environment: Environment) -> String {
    format!("components/{component}/overlays/{environment}/deployment-patch.yaml")
}

/// First container image referenced by a deployment manifest.
pub fn extract_image(content: &str) -> Option<String> {
    image_line()
        .captures(content)
        .map(|caps| caps[3].to_string())
}

/// Rewrites the first `image:` line of a manifest to point at `image`.
///
/// Quoting and indentation of the original line are preserved.
pub fn replace_image(content: &str, image: &str) -> Result<String> {
    if extract_image(content).is_none() {
        return Err(HarnessError::Precondition(
            "deployment manifest has no image reference".to_string(),
        ));
    }

    let updated = image_line().replace(content, |caps: &Captures| {
        format!("{}{}{}{}", &caps[1], &caps[2], image, &caps[4])
    });
    Ok(updated.into_owned())
}

/// Suffix keeping branch and file names unique across concurrent runs.
pub fn unique_suffix() -> String {
    Utc::now().format("%Y%m%d%H%M%S%3f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATCH: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: checkout
spec:
  template:
    spec:
      containers:
        - image: quay.io/acme/checkout@sha256:1111
          name: container-image
"#;

    #[test]
    fn path_follows_overlay_layout() {
        assert_eq!(
            deployment_patch_path("checkout", Environment::Stage),
            "components/checkout/overlays/stage/deployment-patch.yaml"
        );
    }

    #[test]
    fn extracts_list_item_image() {
        assert_eq!(
            extract_image(PATCH).as_deref(),
            Some("quay.io/acme/checkout@sha256:1111")
        );
    }

    #[test]
    fn extracts_quoted_image() {
        let content = "spec:\n  image: \"quay.io/acme/app:v1\"\n";
        assert_eq!(extract_image(content).as_deref(), Some("quay.io/acme/app:v1"));
    }

    #[test]
    fn replaces_only_the_image_value() {
        let updated = replace_image(PATCH, "quay.io/acme/checkout@sha256:2222").unwrap();
        assert!(updated.contains("        - image: quay.io/acme/checkout@sha256:2222\n"));
        assert!(updated.contains("name: container-image"));
        assert!(!updated.contains("1111"));
    }

    #[test]
    fn keeps_quotes_when_replacing() {
        let content = "image: 'quay.io/acme/app:v1'\n";
        let updated = replace_image(content, "quay.io/acme/app:v2").unwrap();
        assert_eq!(updated, "image: 'quay.io/acme/app:v2'\n");
    }

    #[test]
    fn manifest_without_image_is_rejected() {
        let result = replace_image("kind: Service\n", "quay.io/acme/app:v2");
        assert!(matches!(result, Err(HarnessError::Precondition(_))));
    }

    #[test]
    fn suffixes_are_digits() {
        let suffix = unique_suffix();
        assert_eq!(suffix.len(), 17);
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }
}
