use thiserror::Error;

/// Every failure that can reach the session controller. Upstream errors are
/// converted into one of these at the HTTP boundary (`llm::remote`,
/// `ingestion`); display strings are the messages shown to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("{0}")]
    Configuration(String),

    #[error("Erreur News API : {0}")]
    Fetch(String),

    #[error("Quota API dépassé. Vérifiez votre facturation sur platform.openai.com.")]
    RateLimit,

    #[error("Impossible de se connecter à l'API OpenAI. Vérifiez votre connexion.")]
    Connectivity,

    #[error("Le prompt a été refusé par le filtre de sécurité. Choisissez une autre variante.")]
    ContentPolicy,

    #[error("Erreur API OpenAI : {0}")]
    Provider(String),

    #[error("{0}")]
    Validation(String),
}

impl PipelineError {
    /// Stable identifier used in JSON views and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "configuration",
            PipelineError::Fetch(_) => "fetch",
            PipelineError::RateLimit => "rate_limit",
            PipelineError::Connectivity => "connectivity",
            PipelineError::ContentPolicy => "content_policy",
            PipelineError::Provider(_) => "provider",
            PipelineError::Validation(_) => "validation",
        }
    }

    pub(crate) fn missing_key(env_var: &str) -> Self {
        PipelineError::Configuration(format!(
            "Clé API manquante : définissez la variable {} (fichier .env ou secrets).",
            env_var
        ))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_user_facing() {
        assert_eq!(
            PipelineError::RateLimit.to_string(),
            "Quota API dépassé. Vérifiez votre facturation sur platform.openai.com."
        );
        assert_eq!(
            PipelineError::Provider("model not found".into()).to_string(),
            "Erreur API OpenAI : model not found"
        );
        assert!(PipelineError::missing_key("OPENAI_API_KEY")
            .to_string()
            .contains("OPENAI_API_KEY"));
    }
}
