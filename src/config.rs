use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TtorkConfig {
    pub source: PathBuf,
    pub k8s: K8sConfig,
    pub projects: Vec<ProjectConfig>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct K8sConfig {
    pub context: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ProjectConfig {
    pub name: String,
    pub tilt_file_path: String,
    pub environment: Vec<EnvVar>,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl ProjectConfig {
    /// Later entries win when a name repeats.
    pub fn environment_map(&self) -> BTreeMap<String, String> {
        self.environment
            .iter()
            .map(|var| (var.name.clone(), var.value.clone()))
            .collect()
    }
}

// Every key is optional here so that validation can report all missing keys
// at once instead of stopping at serde's first error.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    k8s: Option<K8sSection>,
    projects: Option<Vec<ProjectSection>>,
}

#[derive(Debug, Default, Deserialize)]
struct K8sSection {
    context: Option<String>,
    namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectSection {
    name: Option<String>,
    #[serde(rename = "tiltFilePath")]
    tilt_file_path: Option<String>,
    #[serde(default)]
    environment: Vec<EnvVar>,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

impl ConfigFile {
    fn validate(self, source: &Path) -> Result<TtorkConfig> {
        let mut problems = Vec::new();

        let k8s = match self.k8s {
            None => {
                problems.push("missing required key 'k8s'".to_string());
                None
            }
            Some(section) => {
                let context = present(section.context);
                let namespace = present(section.namespace);
                if context.is_none() {
                    problems.push("missing required key 'k8s.context'".to_string());
                }
                if namespace.is_none() {
                    problems.push("missing required key 'k8s.namespace'".to_string());
                }
                context
                    .zip(namespace)
                    .map(|(context, namespace)| K8sConfig { context, namespace })
            }
        };

        let mut projects = Vec::new();
        match self.projects {
            None => problems.push("missing required key 'projects'".to_string()),
            Some(sections) if sections.is_empty() => {
                problems.push("'projects' must contain at least one project".to_string());
            }
            Some(sections) => {
                for (index, section) in sections.into_iter().enumerate() {
                    let name = present(section.name);
                    let tilt_file_path = present(section.tilt_file_path);
                    if name.is_none() {
                        problems.push(format!("projects[{index}]: missing required key 'name'"));
                    }
                    if tilt_file_path.is_none() {
                        problems.push(format!(
                            "projects[{index}]: missing required key 'tiltFilePath'"
                        ));
                    }
                    if let (Some(name), Some(tilt_file_path)) = (name, tilt_file_path) {
                        projects.push(ProjectConfig {
                            name,
                            tilt_file_path,
                            environment: section.environment,
                        });
                    }
                }
            }
        }

        match k8s {
            Some(k8s) if problems.is_empty() => Ok(TtorkConfig {
                source: source.to_path_buf(),
                k8s,
                projects,
            }),
            _ => bail!(
                "invalid config {}:\n  {}",
                source.display(),
                problems.join("\n  ")
            ),
        }
    }
}

pub fn parse_config(raw: &str, source: &Path) -> Result<TtorkConfig> {
    let parsed: Option<ConfigFile> = serde_yaml::from_str(raw)
        .with_context(|| format!("failed to parse config {}", source.display()))?;
    parsed.unwrap_or_default().validate(source)
}

pub fn load_config(explicit: Option<&Path>) -> Result<TtorkConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => discover_config_path().context(
            "no config found (tried $TTORK_CONFIG, ./ttork.yaml, ./ttork.yml, ~/.config/ttork/config.yaml)",
        )?,
    };
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_config(&raw, &path)
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("TTORK_CONFIG")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    for candidate in [PathBuf::from("ttork.yaml"), PathBuf::from("ttork.yml")] {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let candidate = PathBuf::from(home).join(".config/ttork/config.yaml");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    None
}
