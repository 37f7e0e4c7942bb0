//! Model-list and model-descriptor transforms out of the canonical OpenAI
//! list shape.

use maki_protocol::{claude, gemini, ollama, openai};

pub fn openai_to_claude(list: openai::ModelList) -> claude::ModelList {
    let data: Vec<claude::ModelInfo> = list
        .data
        .into_iter()
        .map(|model| claude::ModelInfo {
            display_name: model.id.clone(),
            id: model.id,
            kind: "model".to_string(),
            created_at: crate::chat::ollama2openai::iso_timestamp(model.created),
        })
        .collect();
    claude::ModelList {
        first_id: data.first().map(|m| m.id.clone()),
        last_id: data.last().map(|m| m.id.clone()),
        has_more: false,
        data,
    }
}

pub fn openai_to_gemini(list: openai::ModelList) -> gemini::ModelList {
    gemini::ModelList {
        models: list
            .data
            .into_iter()
            .map(|model| gemini::ModelInfo {
                name: format!("models/{}", model.id),
                display_name: Some(model.id),
                description: None,
                supported_generation_methods: Some(vec![
                    "generateContent".to_string(),
                    "streamGenerateContent".to_string(),
                ]),
            })
            .collect(),
    }
}

pub fn openai_to_ollama_tags(list: openai::ModelList) -> ollama::TagsResponse {
    ollama::TagsResponse {
        models: list
            .data
            .into_iter()
            .map(|model| ollama::ModelEntry {
                name: model.id.clone(),
                model: model.id.clone(),
                modified_at: crate::chat::ollama2openai::iso_timestamp(model.created),
                size: 0,
                digest: String::new(),
                details: ollama::ModelDetails {
                    format: "api".to_string(),
                    family: model.owned_by,
                    parameter_size: String::new(),
                    quantization_level: String::new(),
                },
            })
            .collect(),
    }
}

/// Canned `/api/show` descriptor; Ollama clients only need the shape.
pub fn ollama_show(model: &str) -> ollama::ShowResponse {
    ollama::ShowResponse {
        modelfile: format!("# proxied model {model}"),
        parameters: String::new(),
        template: "{{ .Prompt }}".to_string(),
        details: ollama::ModelDetails {
            format: "api".to_string(),
            family: "proxy".to_string(),
            parameter_size: String::new(),
            quantization_level: String::new(),
        },
        model_info: None,
    }
}
