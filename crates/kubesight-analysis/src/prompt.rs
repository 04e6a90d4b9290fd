use kubesight_types::AnalysisRequest;

const SYSTEM_PROMPT: &str = "You are a Kubernetes site reliability engineer. \
You are shown the most recent lines of a container log. Identify the most likely \
failure pattern, its probable root cause, and the next concrete step an operator \
should take. Be brief. Secrets in the log have been replaced with [REDACTED]; \
never speculate about their values.";

/// Text handed to the reasoning service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Build the prompt for one request
pub fn build_prompt(request: &AnalysisRequest) -> Prompt {
    let meta = &request.meta;
    let mut user = String::with_capacity(request.recent_log_chunk.len() + 256);

    if let Some(cluster) = &meta.cluster {
        user.push_str(&format!("Cluster: {}\n", cluster));
    }
    user.push_str(&format!(
        "Namespace: {}\nPod: {}\nContainer: {}\n\n",
        meta.namespace, meta.pod, meta.container
    ));
    user.push_str("Recent log lines:\n```\n");
    user.push_str(request.recent_log_chunk.trim_end());
    user.push_str("\n```\n");

    match request.question.as_deref().map(str::trim) {
        Some(question) if !question.is_empty() => {
            user.push_str(&format!("\nOperator question: {}\n", question));
        }
        _ => user.push_str("\nWhat is going wrong, if anything?\n"),
    }

    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubesight_types::AnalysisMeta;

    #[test]
    fn test_prompt_includes_metadata_and_question() {
        let request = AnalysisRequest {
            meta: AnalysisMeta {
                namespace: "shop".to_string(),
                pod: "cart-0".to_string(),
                container: "cart".to_string(),
                cluster: Some("prod-eu".to_string()),
            },
            recent_log_chunk: "ERROR connection refused\n".to_string(),
            question: Some("Is the database down?".to_string()),
        };

        let prompt = build_prompt(&request);
        assert!(prompt.user.contains("Cluster: prod-eu"));
        assert!(prompt.user.contains("Pod: cart-0"));
        assert!(prompt.user.contains("ERROR connection refused\n```"));
        assert!(prompt.user.contains("Operator question: Is the database down?"));
    }

    #[test]
    fn test_blank_question_uses_default() {
        let request = AnalysisRequest {
            question: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(build_prompt(&request).user.contains("What is going wrong"));
    }
}
