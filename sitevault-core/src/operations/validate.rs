use crate::config::UploadConfig;
use crate::site::content_type::extension_of;
use crate::site::{SiteFile, is_entry_point};
use crate::store::normalize_batch;
use crate::{Result, VaultError};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};

/// Limits and file rules for upload batches.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_file_size: u64,
    pub max_site_size: u64,
    forbidden_extensions: HashSet<String>,
    allowed_hidden_paths: Vec<String>,
}

impl UploadPolicy {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            max_file_size: config.max_file_size,
            max_site_size: config.max_site_size,
            forbidden_extensions: config
                .forbidden_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            allowed_hidden_paths: config
                .allowed_hidden_paths
                .iter()
                .map(|prefix| prefix.trim_matches('/').to_string())
                .filter(|prefix| !prefix.is_empty())
                .collect(),
        }
    }

    fn check_extension(&self, path: &str) -> Result<()> {
        match extension_of(path) {
            Some(ext) if self.forbidden_extensions.contains(&ext) => {
                Err(VaultError::ForbiddenFileType {
                    path: path.to_string(),
                    reason: format!(".{} files are not allowed", ext),
                })
            }
            _ => Ok(()),
        }
    }

    fn check_hidden(&self, path: &str) -> Result<()> {
        if !path.split('/').any(|segment| segment.starts_with('.')) {
            return Ok(());
        }

        if self
            .allowed_hidden_paths
            .iter()
            .any(|prefix| within_prefix(path, prefix))
        {
            return Ok(());
        }

        Err(VaultError::ForbiddenFileType {
            path: path.to_string(),
            reason: "hidden files are not allowed".to_string(),
        })
    }
}

/// `prefix` must match whole path segments.
fn within_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

/// Size state of the site a batch is applied to.
#[derive(Debug, Clone, Default)]
pub struct SiteBaseline {
    pub total_size: u64,
    /// Current size of each live file the batch would replace.
    pub existing_sizes: HashMap<String, u64>,
    pub require_entry_point: bool,
}

impl SiteBaseline {
    pub fn new_site() -> Self {
        Self {
            require_entry_point: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidatedBatch {
    pub files: Vec<(String, Bytes)>,
    /// Site size after the batch is applied.
    pub total_size: u64,
}

/// Runs every check over the whole batch; nothing is written here.
pub fn validate_batch(
    policy: &UploadPolicy,
    files: Vec<SiteFile>,
    baseline: &SiteBaseline,
) -> Result<ValidatedBatch> {
    let files = normalize_batch(files)?;

    for (path, content) in &files {
        let size = content.len() as u64;
        if size > policy.max_file_size {
            return Err(VaultError::FileTooLarge {
                path: path.clone(),
                size,
                limit: policy.max_file_size,
            });
        }
    }

    let mut running_total = baseline.total_size;
    for (path, content) in &files {
        let replaced = baseline.existing_sizes.get(path).copied().unwrap_or(0);
        running_total = running_total.saturating_sub(replaced) + content.len() as u64;
        if running_total > policy.max_site_size {
            return Err(VaultError::SiteTooLarge {
                size: running_total,
                limit: policy.max_site_size,
            });
        }
    }

    if baseline.require_entry_point && !files.iter().any(|(path, _)| is_entry_point(path)) {
        return Err(VaultError::MissingEntryPoint);
    }

    for (path, _) in &files {
        policy.check_extension(path)?;
    }
    for (path, _) in &files {
        policy.check_hidden(path)?;
    }

    Ok(ValidatedBatch {
        files,
        total_size: running_total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> UploadPolicy {
        UploadPolicy::from_config(&UploadConfig {
            max_file_size: 10,
            max_site_size: 20,
            ..UploadConfig::default()
        })
    }

    #[test]
    fn accepts_valid_site() {
        let batch = validate_batch(
            &policy(),
            vec![
                SiteFile::new("/index.html", "12345"),
                SiteFile::new("css\\a.css", "123"),
            ],
            &SiteBaseline::new_site(),
        )
        .unwrap();

        let paths: Vec<&str> = batch.files.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["index.html", "css/a.css"]);
        assert_eq!(batch.total_size, 8);
    }

    #[test]
    fn rejects_traversal_before_size_checks() {
        let err = validate_batch(
            &policy(),
            vec![
                SiteFile::new("index.html", "x".repeat(100)),
                SiteFile::new("../../etc/passwd", "root"),
            ],
            &SiteBaseline::new_site(),
        )
        .unwrap_err();
        assert!(matches!(err, VaultError::InvalidPath(_)));
        assert!(err.is_validation());
    }

    #[test]
    fn file_and_site_limits() {
        assert!(matches!(
            validate_batch(
                &policy(),
                vec![SiteFile::new("index.html", "x".repeat(11))],
                &SiteBaseline::new_site(),
            ),
            Err(VaultError::FileTooLarge { size: 11, limit: 10, .. })
        ));

        assert!(matches!(
            validate_batch(
                &policy(),
                vec![
                    SiteFile::new("index.html", "x".repeat(10)),
                    SiteFile::new("a.html", "x".repeat(10)),
                    SiteFile::new("b.html", "x"),
                ],
                &SiteBaseline::new_site(),
            ),
            Err(VaultError::SiteTooLarge { size: 21, limit: 20 })
        ));
    }

    #[test]
    fn replaced_files_are_not_double_counted() {
        let baseline = SiteBaseline {
            total_size: 18,
            existing_sizes: HashMap::from([("index.html".to_string(), 10)]),
            require_entry_point: false,
        };

        let batch = validate_batch(
            &policy(),
            vec![SiteFile::new("index.html", "x".repeat(10))],
            &baseline,
        )
        .unwrap();
        assert_eq!(batch.total_size, 18);

        assert!(matches!(
            validate_batch(&policy(), vec![SiteFile::new("new.html", "xxx")], &baseline),
            Err(VaultError::SiteTooLarge { size: 21, .. })
        ));
    }

    #[test]
    fn entry_point_required_only_for_new_sites() {
        let files = vec![SiteFile::new("about.html", "a")];
        assert!(matches!(
            validate_batch(&policy(), files.clone(), &SiteBaseline::new_site()),
            Err(VaultError::MissingEntryPoint)
        ));
        assert!(validate_batch(&policy(), files, &SiteBaseline::default()).is_ok());

        assert!(
            validate_batch(
                &policy(),
                vec![SiteFile::new("index.htm", "a")],
                &SiteBaseline::new_site()
            )
            .is_ok()
        );
    }

    #[test]
    fn forbidden_extensions_and_hidden_files() {
        let check = |path: &str| {
            validate_batch(
                &policy(),
                vec![SiteFile::new("index.html", "a"), SiteFile::new(path, "b")],
                &SiteBaseline::new_site(),
            )
        };

        assert!(matches!(
            check("tools/setup.EXE"),
            Err(VaultError::ForbiddenFileType { .. })
        ));
        assert!(matches!(check("cgi/run.php"), Err(VaultError::ForbiddenFileType { .. })));
        assert!(matches!(check(".env"), Err(VaultError::ForbiddenFileType { .. })));
        assert!(matches!(
            check("assets/.git/config"),
            Err(VaultError::ForbiddenFileType { .. })
        ));

        assert!(check(".well-known/security.txt").is_ok());
        assert!(check("js/app.min.js").is_ok());
        assert!(check("README").is_ok());
    }

    #[test]
    fn hidden_allow_list_matches_whole_segments() {
        let config = UploadConfig {
            allowed_hidden_paths: vec![".well-known".to_string(), "/static/.cache/".to_string()],
            ..UploadConfig::default()
        };
        let policy = UploadPolicy::from_config(&config);
        let check = |path: &str| {
            validate_batch(
                &policy,
                vec![SiteFile::new("index.html", "a"), SiteFile::new(path, "b")],
                &SiteBaseline::new_site(),
            )
        };

        assert!(check(".well-known/security.txt").is_ok());
        assert!(check("static/.cache/app.js").is_ok());
        assert!(matches!(
            check(".well-knownx/secret"),
            Err(VaultError::ForbiddenFileType { .. })
        ));
        assert!(matches!(
            check("static/.cached"),
            Err(VaultError::ForbiddenFileType { .. })
        ));
    }
}
