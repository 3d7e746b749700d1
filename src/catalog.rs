use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

use crate::models::ModelDescriptor;

const LIST_FORMAT: &str = "{{.NAME}}\t{{.PARAMETERS}}\t{{.QUANTIZATION}}\t{{.ARCHITECTURE}}\t{{.MODEL_ID}}\t{{.CREATED}}\t{{.SIZE}}";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to run docker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("docker model ls exited with {status}: {output}")]
    Failed { status: String, output: String },
}

#[async_trait]
pub trait ModelCatalog: Send + Sync {
    async fn list(&self) -> Result<Vec<ModelDescriptor>, CatalogError>;
}

/// Lists models pulled into the local Docker Model Runner.
#[derive(Debug, Clone)]
pub struct DockerModelRunner {
    program: String,
}

impl Default for DockerModelRunner {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }
}

impl DockerModelRunner {
    #[cfg(test)]
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ModelCatalog for DockerModelRunner {
    async fn list(&self) -> Result<Vec<ModelDescriptor>, CatalogError> {
        let output = Command::new(&self.program)
            .args(["model", "ls", "--format", LIST_FORMAT])
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(CatalogError::Failed {
                status: output.status.to_string(),
                output: text.trim().to_string(),
            });
        }

        let models = parse_listing(&String::from_utf8_lossy(&output.stdout));
        info!(count = models.len(), "retrieved docker models");
        Ok(models)
    }
}

/// One model per tab separated line; lines with fewer than seven fields
/// are skipped.
pub fn parse_listing(text: &str) -> Vec<ModelDescriptor> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 7 {
                warn!(line, "invalid model line format");
                return None;
            }
            Some(ModelDescriptor {
                name: fields[0].to_string(),
                parameters: fields[1].to_string(),
                quantization: fields[2].to_string(),
                architecture: fields[3].to_string(),
                model_id: fields[4].to_string(),
                created: fields[5].to_string(),
                size: fields[6].trim_end_matches('\r').to_string(),
            })
        })
        .collect()
}

pub fn fallback_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor {
            name: "ai/llama3.2:1B-Q8_0".to_string(),
            parameters: "1.24 B".to_string(),
            quantization: "Q8_0".to_string(),
            architecture: "llama".to_string(),
            model_id: "a15c3117eeeb".to_string(),
            created: "5 weeks ago".to_string(),
            size: "1.22 GiB".to_string(),
        },
        ModelDescriptor {
            name: "ai/qwen3".to_string(),
            parameters: "8.19 B".to_string(),
            quantization: "IQ2_XXS/Q4_K_M".to_string(),
            architecture: "qwen3".to_string(),
            model_id: "79fa56c07429".to_string(),
            created: "3 days ago".to_string(),
            size: "4.68 GiB".to_string(),
        },
    ]
}

/// Catalog listing, or the static fallback when it fails or is empty.
pub async fn list_or_fallback(catalog: &dyn ModelCatalog) -> Vec<ModelDescriptor> {
    match catalog.list().await {
        Ok(models) if !models.is_empty() => models,
        Ok(_) => {
            warn!("no models listed, using fallback");
            fallback_models()
        }
        Err(err) => {
            warn!(error = %err, "failed to get available models, using fallback");
            fallback_models()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Result<Vec<ModelDescriptor>, ()>);

    #[async_trait]
    impl ModelCatalog for Fixed {
        async fn list(&self) -> Result<Vec<ModelDescriptor>, CatalogError> {
            self.0.clone().map_err(|_| CatalogError::Failed {
                status: "exit status: 1".to_string(),
                output: "unknown command \"model\"".to_string(),
            })
        }
    }

    #[test]
    fn test_parse_listing_skips_malformed_lines() {
        let text = "ai/smollm2\t361.82 M\tIQ2_XXS/Q4_K_M\tllama\t354bf30d0aa3\t2 months ago\t256.35 MiB\n\
                    garbage line\n\
                    \n\
                    ai/gemma3\t3.88 B\tIQ2_XXS/Q4_K_M\tgemma3\t0b329b335467\t5 weeks ago\t2.31 GiB\r\n";
        let models = parse_listing(text);

        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "ai/smollm2");
        assert_eq!(models[0].model_id, "354bf30d0aa3");
        assert_eq!(models[1].size, "2.31 GiB");
    }

    #[tokio::test]
    async fn test_falls_back_on_error_or_empty_listing() {
        let failed = list_or_fallback(&Fixed(Err(()))).await;
        assert_eq!(failed, fallback_models());

        let empty = list_or_fallback(&Fixed(Ok(vec![]))).await;
        assert_eq!(empty.len(), 2);
        assert_eq!(empty[1].name, "ai/qwen3");

        let listed = list_or_fallback(&Fixed(Ok(parse_listing(
            "ai/phi4\t14.66 B\tIQ2_XXS/Q4_K_M\tphi3\t03c0bc8e0f5a\t2 months ago\t8.43 GiB",
        ))))
        .await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].architecture, "phi3");
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_spawn_error() {
        let catalog = DockerModelRunner::with_program("aiwatch-no-such-docker-binary");
        assert!(matches!(catalog.list().await, Err(CatalogError::Spawn(_))));
    }
}
